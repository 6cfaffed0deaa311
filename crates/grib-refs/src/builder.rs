//! Reference manifest builder.
//!
//! Every classified message becomes one chunk of one data array. Axis
//! values (valid times, pressure levels) are collected per group, sorted,
//! and the chunk coordinate of a message is its position on those axes.
//! Coordinates are stored inline; payloads stay in the archives.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use grib2_parser::{GridDefinition, MessageDescriptor};
use grib_index::FileIndex;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::{RefsError, Result};
use crate::manifest::{RefItem, RefKey, Reference, ReferenceManifest};
use crate::mapping::{Placement, VariableMapping};

/// Codec id of chunks that are whole GRIB2 messages.
pub const GRIB_CODEC_ID: &str = "rawgrib";

pub const TIME_DIM: &str = "time";
pub const LEVEL_DIM: &str = "level";
pub const VALUE_DIM: &str = "value";

struct Entry<'a> {
    file: &'a str,
    descriptor: &'a MessageDescriptor,
    placement: Placement,
}

#[derive(Default)]
struct GroupPlan<'a> {
    entries: Vec<Entry<'a>>,
    times: BTreeSet<DateTime<Utc>>,
    levels: Vec<f64>,
    grid: Option<(&'a GridDefinition, &'a str, u64)>,
    variables: BTreeSet<String>,
    is_3d: bool,
}

/// Build the manifest of all groups found in `indices`.
pub fn build(indices: &[Arc<FileIndex>], mapping: &dyn VariableMapping) -> Result<ReferenceManifest> {
    let sources: Vec<String> = indices
        .iter()
        .map(|i| i.source.to_string_lossy().into_owned())
        .collect();

    let mut groups: BTreeMap<String, GroupPlan> = BTreeMap::new();
    let mut skipped = 0usize;

    for (index, file) in indices.iter().zip(sources.iter()) {
        for descriptor in &index.messages {
            let Some(placement) = mapping.classify(descriptor) else {
                skipped += 1;
                debug!(
                    file = %file,
                    offset = descriptor.offset,
                    level_type = descriptor.level.level_type,
                    "Message not mapped, skipping"
                );
                continue;
            };
            let plan = groups.entry(placement.group.clone()).or_default();
            plan.add(file, descriptor, placement)?;
        }
    }

    let mut manifest = ReferenceManifest::new();
    for (name, plan) in &groups {
        plan.emit(name, mapping.name(), &sources, &mut manifest)?;
        info!(
            group = %name,
            variables = plan.variables.len(),
            times = plan.times.len(),
            levels = plan.levels.len(),
            messages = plan.entries.len(),
            "Built group references"
        );
    }
    if skipped > 0 {
        info!(skipped, policy = mapping.name(), "Messages without a placement");
    }

    Ok(manifest)
}

impl<'a> GroupPlan<'a> {
    fn add(&mut self, file: &'a str, descriptor: &'a MessageDescriptor, placement: Placement) -> Result<()> {
        match self.grid {
            None => self.grid = Some((&descriptor.grid, file, descriptor.offset)),
            Some((grid, first_file, first_offset)) => {
                if grid.num_points != descriptor.grid.num_points {
                    return Err(RefsError::configuration(format!(
                        "group {}: chunk shape mismatch, {} points at {}@{} vs {} points at {}@{}",
                        placement.group,
                        grid.num_points,
                        first_file,
                        first_offset,
                        descriptor.grid.num_points,
                        file,
                        descriptor.offset
                    )));
                }
                if grid != &descriptor.grid {
                    return Err(RefsError::configuration(format!(
                        "group {}: grid of {}@{} differs from grid of {}@{}",
                        placement.group, file, descriptor.offset, first_file, first_offset
                    )));
                }
            }
        }

        self.times.insert(placement.valid_time);
        if let Some(level) = placement.level {
            self.is_3d = true;
            if !self.levels.iter().any(|l| *l == level) {
                self.levels.push(level);
            }
        }
        self.variables.insert(placement.variable.clone());
        self.entries.push(Entry {
            file,
            descriptor,
            placement,
        });
        Ok(())
    }

    fn emit(
        &self,
        group: &str,
        policy: &str,
        sources: &[String],
        manifest: &mut ReferenceManifest,
    ) -> Result<()> {
        let Some((grid, _, _)) = self.grid else {
            return Ok(());
        };
        let npoints = u64::from(grid.num_points);

        let mut levels = self.levels.clone();
        levels.sort_by(f64::total_cmp);
        let times: Vec<DateTime<Utc>> = self.times.iter().copied().collect();
        let time_index: HashMap<DateTime<Utc>, u64> = times
            .iter()
            .enumerate()
            .map(|(i, t)| (*t, i as u64))
            .collect();

        manifest.insert(
            RefKey::group(group, RefItem::ZGroup),
            Reference::json(json!({"zarr_format": 2})),
        );
        manifest.insert(
            RefKey::group(group, RefItem::ZAttrs),
            Reference::json(json!({"policy": policy, "source_files": sources})),
        );

        // Coordinates
        let seconds: Vec<i64> = times.iter().map(|t| t.timestamp()).collect();
        insert_coordinate(
            manifest,
            group,
            TIME_DIM,
            "<i8",
            seconds.len(),
            seconds.iter().flat_map(|s| s.to_le_bytes()).collect(),
            json!({
                "_ARRAY_DIMENSIONS": [TIME_DIM],
                "standard_name": "time",
                "units": "seconds since 1970-01-01T00:00:00",
                "calendar": "proleptic_gregorian",
            }),
        );
        if self.is_3d {
            insert_coordinate(
                manifest,
                group,
                LEVEL_DIM,
                "<f8",
                levels.len(),
                levels.iter().flat_map(|l| l.to_le_bytes()).collect(),
                json!({
                    "_ARRAY_DIMENSIONS": [LEVEL_DIM],
                    "standard_name": "air_pressure",
                    "units": "hPa",
                }),
            );
        }

        let samples = grid.sample_coordinates()?;
        insert_coordinate(
            manifest,
            group,
            "lat",
            "<f8",
            samples.len(),
            samples.iter().flat_map(|(lat, _)| lat.to_le_bytes()).collect(),
            json!({
                "_ARRAY_DIMENSIONS": [VALUE_DIM],
                "standard_name": "latitude",
                "units": "degrees_north",
            }),
        );
        insert_coordinate(
            manifest,
            group,
            "lon",
            "<f8",
            samples.len(),
            samples.iter().flat_map(|(_, lon)| lon.to_le_bytes()).collect(),
            json!({
                "_ARRAY_DIMENSIONS": [VALUE_DIM],
                "standard_name": "longitude",
                "units": "degrees_east",
            }),
        );

        // Data arrays
        let (shape, chunks, dims) = if self.is_3d {
            (
                vec![times.len() as u64, levels.len() as u64, npoints],
                vec![1, 1, npoints],
                vec![TIME_DIM, LEVEL_DIM, VALUE_DIM],
            )
        } else {
            (
                vec![times.len() as u64, npoints],
                vec![1, npoints],
                vec![TIME_DIM, VALUE_DIM],
            )
        };

        let mut first_parameter: BTreeMap<&str, &MessageDescriptor> = BTreeMap::new();
        for entry in &self.entries {
            first_parameter
                .entry(entry.placement.variable.as_str())
                .or_insert(entry.descriptor);
        }
        for (variable, descriptor) in &first_parameter {
            manifest.insert(
                RefKey::array(Some(group), variable, RefItem::ZArray),
                Reference::json(zarray(&shape, &chunks, "<f4", json!("NaN"), json!({"id": GRIB_CODEC_ID}))),
            );
            let p = descriptor.parameter;
            manifest.insert(
                RefKey::array(Some(group), variable, RefItem::ZAttrs),
                Reference::json(json!({
                    "_ARRAY_DIMENSIONS": dims,
                    "grib_parameter": format!("{}.{}.{}", p.discipline, p.category, p.number),
                    "grib_level_type": descriptor.level.level_type,
                })),
            );
        }

        let mut seen: HashMap<RefKey, (&str, u64)> = HashMap::new();
        for entry in &self.entries {
            let t = time_index.get(&entry.placement.valid_time).copied().ok_or_else(|| {
                RefsError::configuration(format!(
                    "group {}: valid time {} of {}@{} is not on the time axis",
                    group, entry.placement.valid_time, entry.file, entry.descriptor.offset
                ))
            })?;
            let mut idx = vec![t];
            if self.is_3d {
                let level = entry.placement.level.ok_or_else(|| {
                    RefsError::configuration(format!(
                        "group {}: {}@{} has no level but the group is 3-D",
                        group, entry.file, entry.descriptor.offset
                    ))
                })?;
                let l = levels.iter().position(|x| *x == level).ok_or_else(|| {
                    RefsError::configuration(format!(
                        "group {}: level {} of {}@{} is not on the level axis",
                        group, level, entry.file, entry.descriptor.offset
                    ))
                })?;
                idx.push(l as u64);
            }
            idx.push(0);

            let key = RefKey::array(Some(group), &entry.placement.variable, RefItem::Chunk(idx));
            if let Some((file, offset)) = seen.get(&key) {
                return Err(RefsError::configuration(format!(
                    "{} is claimed by {}@{} and {}@{}",
                    key, file, offset, entry.file, entry.descriptor.offset
                )));
            }
            seen.insert(key.clone(), (entry.file, entry.descriptor.offset));
            manifest.insert(
                key,
                Reference::Range {
                    file: entry.file.to_string(),
                    offset: entry.descriptor.offset,
                    length: entry.descriptor.length,
                },
            );
        }

        Ok(())
    }
}

fn zarray(shape: &[u64], chunks: &[u64], dtype: &str, fill_value: Value, compressor: Value) -> Value {
    json!({
        "zarr_format": 2,
        "shape": shape,
        "chunks": chunks,
        "dtype": dtype,
        "fill_value": fill_value,
        "compressor": compressor,
        "filters": null,
        "order": "C",
    })
}

fn insert_coordinate(
    manifest: &mut ReferenceManifest,
    group: &str,
    name: &str,
    dtype: &str,
    len: usize,
    bytes: Vec<u8>,
    attrs: Value,
) {
    let fill = if dtype == "<i8" { Value::Null } else { json!("NaN") };
    manifest.insert(
        RefKey::array(Some(group), name, RefItem::ZArray),
        Reference::json(zarray(&[len as u64], &[len as u64], dtype, fill, Value::Null)),
    );
    manifest.insert(RefKey::array(Some(group), name, RefItem::ZAttrs), Reference::json(attrs));
    manifest.insert(
        RefKey::array(Some(group), name, RefItem::Chunk(vec![0])),
        Reference::bytes(bytes),
    );
}

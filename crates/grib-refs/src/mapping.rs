//! Variable-mapping policies.
//!
//! A policy decides where a message lands in the manifest: which group,
//! which variable, and at which axis position. The chunk coordinate itself
//! is derived by the builder from the sorted axis values of each group.

use std::fmt;

use chrono::{DateTime, Utc};
use grib2_parser::{Grib2Tables, MessageDescriptor};
use serde::{Deserialize, Serialize};

use crate::level::{PRESSURE_GROUP, SURFACE_GROUP};

/// Code table 4.5 surface types understood by the policies.
pub const LEVEL_GROUND: u8 = 1;
pub const LEVEL_ISOBARIC: u8 = 100;
pub const LEVEL_MEAN_SEA: u8 = 101;
pub const LEVEL_HEIGHT_ABOVE_GROUND: u8 = 103;

/// Logical position of one message.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub group: String,
    pub variable: String,
    pub valid_time: DateTime<Utc>,
    /// Pressure in hPa for 3-D groups.
    pub level: Option<f64>,
}

pub trait VariableMapping: Send + Sync {
    /// Policy name, recorded in the manifest attributes.
    fn name(&self) -> &str;

    /// `None` when the message has no place in the manifest.
    fn classify(&self, descriptor: &MessageDescriptor) -> Option<Placement>;
}

/// Selects a policy from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingKind {
    #[default]
    Ifs,
    Gfs,
}

impl MappingKind {
    pub fn mapping(&self) -> Box<dyn VariableMapping> {
        match self {
            MappingKind::Ifs => Box::new(IfsMapping::default()),
            MappingKind::Gfs => Box::new(GfsMapping::default()),
        }
    }
}

impl fmt::Display for MappingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingKind::Ifs => f.write_str("ifs"),
            MappingKind::Gfs => f.write_str("gfs"),
        }
    }
}

/// Group and level coordinate shared by both policies.
fn group_of(descriptor: &MessageDescriptor) -> Option<(&'static str, Option<f64>)> {
    match descriptor.level.level_type {
        LEVEL_ISOBARIC => Some((PRESSURE_GROUP, Some(descriptor.level.value / 100.0))),
        LEVEL_GROUND | LEVEL_MEAN_SEA | LEVEL_HEIGHT_ABOVE_GROUND => Some((SURFACE_GROUP, None)),
        _ => None,
    }
}

fn param_key(descriptor: &MessageDescriptor) -> (u8, u8, u8) {
    let p = descriptor.parameter;
    (p.discipline, p.category, p.number)
}

/// ECMWF IFS output as retrieved from MARS.
#[derive(Debug, Clone)]
pub struct IfsMapping {
    tables: Grib2Tables,
}

impl Default for IfsMapping {
    fn default() -> Self {
        Self {
            tables: Grib2Tables::ecmwf(),
        }
    }
}

impl VariableMapping for IfsMapping {
    fn name(&self) -> &str {
        "ifs"
    }

    fn classify(&self, descriptor: &MessageDescriptor) -> Option<Placement> {
        let (group, level) = group_of(descriptor)?;
        let variable = self.tables.get_level_parameter_name(
            param_key(descriptor),
            descriptor.level.level_type,
            descriptor.level.value,
        );
        Some(Placement {
            group: group.to_string(),
            variable,
            valid_time: descriptor.valid_time(),
            level,
        })
    }
}

/// NCEP GFS output. Surface variables carry a level suffix.
#[derive(Debug, Clone)]
pub struct GfsMapping {
    tables: Grib2Tables,
}

impl Default for GfsMapping {
    fn default() -> Self {
        Self {
            tables: Grib2Tables::ncep(),
        }
    }
}

impl VariableMapping for GfsMapping {
    fn name(&self) -> &str {
        "gfs"
    }

    fn classify(&self, descriptor: &MessageDescriptor) -> Option<Placement> {
        let (group, level) = group_of(descriptor)?;
        let (d, c, n) = param_key(descriptor);
        let base = self.tables.get_parameter_name(d, c, n);

        let variable = if level.is_some() {
            base
        } else {
            let value = descriptor.level.value.max(0.0).round() as u32;
            match self
                .tables
                .get_level_description(descriptor.level.level_type, value)
            {
                Some(suffix) => format!("{}_{}", base, suffix),
                None => base,
            }
        };

        Some(Placement {
            group: group.to_string(),
            variable,
            valid_time: descriptor.valid_time(),
            level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grib2_parser::scan_bytes;
    use test_utils::Grib2Builder;

    fn describe(builder: Grib2Builder) -> MessageDescriptor {
        scan_bytes(&builder.build()).unwrap().remove(0)
    }

    #[test]
    fn test_ifs_surface_temperature() {
        let d = describe(Grib2Builder::new_ecmwf().with_level(103, 2).with_forecast_hour(6));
        let p = IfsMapping::default().classify(&d).unwrap();

        assert_eq!(p.group, "atm2d");
        assert_eq!(p.variable, "2t");
        assert_eq!(p.level, None);
        assert_eq!(p.valid_time.to_rfc3339(), "2024-01-01T06:00:00+00:00");
    }

    #[test]
    fn test_ifs_pressure_level_in_hpa() {
        let d = describe(
            Grib2Builder::new_ecmwf()
                .with_parameter(2, 8)
                .with_level(100, 50000),
        );
        let p = IfsMapping::default().classify(&d).unwrap();

        assert_eq!(p.group, "atm3d");
        assert_eq!(p.variable, "w");
        assert_eq!(p.level, Some(500.0));
    }

    #[test]
    fn test_unsupported_level_type_is_skipped() {
        // Entire atmosphere
        let d = describe(Grib2Builder::new_ecmwf().with_missing_level(200));
        assert!(IfsMapping::default().classify(&d).is_none());
        assert!(GfsMapping::default().classify(&d).is_none());
    }

    #[test]
    fn test_gfs_suffixes() {
        let mapping = GfsMapping::default();

        let d = describe(Grib2Builder::new_gfs().with_level(103, 2));
        assert_eq!(mapping.classify(&d).unwrap().variable, "TMP_2m");

        let d = describe(Grib2Builder::new_gfs().with_parameter(3, 1).with_missing_level(101));
        assert_eq!(mapping.classify(&d).unwrap().variable, "PRMSL_msl");

        let d = describe(Grib2Builder::new_gfs().with_level(100, 85000));
        let p = mapping.classify(&d).unwrap();
        assert_eq!(p.variable, "TMP");
        assert_eq!(p.level, Some(850.0));
    }

    #[test]
    fn test_mapping_kind_selects_policy() {
        assert_eq!(MappingKind::default().mapping().name(), "ifs");
        assert_eq!(MappingKind::Gfs.mapping().name(), "gfs");
        let kind: MappingKind = serde_json::from_str("\"gfs\"").unwrap();
        assert_eq!(kind, MappingKind::Gfs);
    }
}

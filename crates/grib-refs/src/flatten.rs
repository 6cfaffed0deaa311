//! Extraction of one level type's group as a standalone manifest.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{RefsError, Result};
use crate::level::LevelType;
use crate::manifest::{NormalizedManifest, RefKey, ReferenceManifest};

/// Select the group of `level_type` and re-root it.
///
/// Fails when the group is absent; a partial manifest is never returned.
/// A root `.zgroup` is injected only if the group did not carry one.
pub fn flatten(manifest: &ReferenceManifest, level_type: LevelType) -> Result<NormalizedManifest> {
    let group = level_type.group_name();

    let refs: BTreeMap<RefKey, _> = manifest
        .iter()
        .filter(|(key, _)| key.group.as_deref() == Some(group))
        .map(|(key, reference)| {
            let key = RefKey {
                group: None,
                node: key.node.clone(),
                item: key.item.clone(),
            };
            (key, reference.clone())
        })
        .collect();

    if refs.is_empty() {
        let available: Vec<&str> = manifest.groups().into_iter().collect();
        return Err(RefsError::schema(format!(
            "group '{}' for level type {} not found (available: {:?})",
            group, level_type, available
        )));
    }

    debug!(group, refs = refs.len(), "Flattened manifest");
    Ok(NormalizedManifest::from_refs(refs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{RefItem, Reference};
    use serde_json::json;

    fn manifest_with(groups: &[&str], with_zgroup: bool) -> ReferenceManifest {
        let mut m = ReferenceManifest::new();
        for g in groups {
            if with_zgroup {
                m.insert(
                    RefKey::group(g, RefItem::ZGroup),
                    Reference::json(json!({"zarr_format": 2, "origin": g})),
                );
            }
            m.insert(
                RefKey::array(Some(g), "t", RefItem::Chunk(vec![0, 0])),
                Reference::Range {
                    file: format!("{}.grib", g),
                    offset: 0,
                    length: 10,
                },
            );
        }
        m
    }

    #[test]
    fn test_missing_group_is_schema_error() {
        let m = manifest_with(&["atm3d"], true);
        assert!(matches!(
            flatten(&m, LevelType::Surface),
            Err(RefsError::Schema(_))
        ));
    }

    #[test]
    fn test_subtree_is_rerooted() {
        let m = manifest_with(&["atm2d", "atm3d"], true);
        let flat = flatten(&m, LevelType::Surface).unwrap();

        assert_eq!(flat.len(), 2);
        // Existing descriptor kept, not replaced
        let zgroup = flat.get(&RefKey::root(RefItem::ZGroup)).unwrap();
        assert_eq!(zgroup.as_json().unwrap()["origin"], "atm2d");
        assert_eq!(
            flat.get(&RefKey::array(None, "t", RefItem::Chunk(vec![0, 0]))),
            Some(&Reference::Range {
                file: "atm2d.grib".to_string(),
                offset: 0,
                length: 10
            })
        );
    }

    #[test]
    fn test_group_descriptor_injected_when_missing() {
        let m = manifest_with(&["atm3d"], false);
        let flat = flatten(&m, LevelType::PressureLevel).unwrap();

        assert_eq!(flat.len(), 2);
        let zgroup = flat.get(&RefKey::root(RefItem::ZGroup)).unwrap();
        assert_eq!(zgroup.as_json().unwrap(), &json!({"zarr_format": 2}));
    }
}

//! Reference manifest model and its kerchunk JSON form.
//!
//! Keys are structured `(group, node, item)` triples and values are either
//! inline data or a byte range inside a source archive. The JSON artifact
//! follows kerchunk version 1:
//!
//! ```json
//! {"version": 1, "refs": {".zgroup": "{\"zarr_format\":2}",
//!                         "time/0": "base64:AAAA...",
//!                         "2t/0.0": ["/data/an.grib", 0, 5120]}}
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::Write;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::{RefsError, Result};

const BASE64_PREFIX: &str = "base64:";

/// Last path component of a reference key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RefItem {
    ZGroup,
    ZAttrs,
    ZArray,
    Chunk(Vec<u64>),
}

impl RefItem {
    fn parse(s: &str) -> Option<Self> {
        match s {
            ".zgroup" => Some(RefItem::ZGroup),
            ".zattrs" => Some(RefItem::ZAttrs),
            ".zarray" => Some(RefItem::ZArray),
            chunk => chunk
                .split('.')
                .map(|p| p.parse::<u64>().ok())
                .collect::<Option<Vec<_>>>()
                .map(RefItem::Chunk),
        }
    }

    pub fn is_metadata(&self) -> bool {
        !matches!(self, RefItem::Chunk(_))
    }
}

impl fmt::Display for RefItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefItem::ZGroup => f.write_str(".zgroup"),
            RefItem::ZAttrs => f.write_str(".zattrs"),
            RefItem::ZArray => f.write_str(".zarray"),
            RefItem::Chunk(idx) => {
                let parts: Vec<String> = idx.iter().map(|i| i.to_string()).collect();
                f.write_str(&parts.join("."))
            }
        }
    }
}

/// Structured manifest key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RefKey {
    pub group: Option<String>,
    pub node: Option<String>,
    pub item: RefItem,
}

impl RefKey {
    pub fn root(item: RefItem) -> Self {
        Self {
            group: None,
            node: None,
            item,
        }
    }

    pub fn group(group: &str, item: RefItem) -> Self {
        Self {
            group: Some(group.to_string()),
            node: None,
            item,
        }
    }

    pub fn array(group: Option<&str>, node: &str, item: RefItem) -> Self {
        Self {
            group: group.map(str::to_string),
            node: Some(node.to_string()),
            item,
        }
    }

    pub fn path(&self) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(3);
        if let Some(g) = &self.group {
            parts.push(g.clone());
        }
        if let Some(n) = &self.node {
            parts.push(n.clone());
        }
        parts.push(self.item.to_string());
        parts.join("/")
    }

    /// Parse a key of a single-group manifest (`[node/]item`).
    pub fn parse_flat(path: &str) -> Result<Self> {
        let invalid = || RefsError::InvalidManifest(format!("unsupported key '{}'", path));
        let mut parts: Vec<&str> = path.split('/').collect();
        let item = parts
            .pop()
            .and_then(RefItem::parse)
            .ok_or_else(invalid)?;
        match parts.as_slice() {
            [] if item.is_metadata() => Ok(RefKey::root(item)),
            [node] if !node.is_empty() => Ok(RefKey::array(None, node, item)),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for RefKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InlineValue {
    Json(Value),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reference {
    Inline(InlineValue),
    /// Byte range of a whole message inside a source archive.
    Range { file: String, offset: u64, length: u64 },
}

impl Reference {
    pub fn json(value: Value) -> Self {
        Reference::Inline(InlineValue::Json(value))
    }

    pub fn bytes(data: Vec<u8>) -> Self {
        Reference::Inline(InlineValue::Bytes(data))
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Reference::Inline(InlineValue::Json(v)) => Some(v),
            _ => None,
        }
    }

    fn to_kerchunk(&self) -> Result<Value> {
        Ok(match self {
            Reference::Inline(InlineValue::Json(v)) => Value::String(serde_json::to_string(v)?),
            Reference::Inline(InlineValue::Bytes(b)) => {
                Value::String(format!("{}{}", BASE64_PREFIX, BASE64.encode(b)))
            }
            Reference::Range {
                file,
                offset,
                length,
            } => json!([file, offset, length]),
        })
    }

    fn from_kerchunk(key: &RefKey, value: &Value) -> Result<Self> {
        let invalid = |reason: &str| {
            RefsError::InvalidManifest(format!("{}: {}", key.path(), reason))
        };
        match value {
            Value::String(s) if key.item.is_metadata() => {
                Ok(Reference::json(serde_json::from_str(s)?))
            }
            Value::String(s) => match s.strip_prefix(BASE64_PREFIX) {
                Some(encoded) => BASE64
                    .decode(encoded)
                    .map(Reference::bytes)
                    .map_err(|e| invalid(&e.to_string())),
                None => Ok(Reference::bytes(s.as_bytes().to_vec())),
            },
            Value::Array(parts) => match parts.as_slice() {
                [Value::String(file), offset, length] => Ok(Reference::Range {
                    file: file.clone(),
                    offset: offset.as_u64().ok_or_else(|| invalid("bad offset"))?,
                    length: length.as_u64().ok_or_else(|| invalid("bad length"))?,
                }),
                _ => Err(invalid("expected [file, offset, length]")),
            },
            // Metadata occasionally appears as a JSON object rather than text
            Value::Object(_) if key.item.is_metadata() => Ok(Reference::json(value.clone())),
            _ => Err(invalid("unsupported reference value")),
        }
    }
}

/// References for every group produced from a set of archives.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceManifest {
    refs: BTreeMap<RefKey, Reference>,
}

impl ReferenceManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: RefKey, reference: Reference) -> Option<Reference> {
        self.refs.insert(key, reference)
    }

    pub fn get(&self, key: &RefKey) -> Option<&Reference> {
        self.refs.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RefKey, &Reference)> {
        self.refs.iter()
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Top-level group names present.
    pub fn groups(&self) -> BTreeSet<&str> {
        self.refs.keys().filter_map(|k| k.group.as_deref()).collect()
    }

    pub fn to_json(&self) -> Result<Value> {
        to_kerchunk(&self.refs)
    }
}

/// A self-contained, single-group manifest.
///
/// Every key has `group == None`, and exactly one root `.zgroup` exists.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedManifest {
    refs: BTreeMap<RefKey, Reference>,
}

impl NormalizedManifest {
    /// Build from single-group references, injecting a root `.zgroup` if missing.
    pub fn from_refs(mut refs: BTreeMap<RefKey, Reference>) -> Self {
        refs.entry(RefKey::root(RefItem::ZGroup))
            .or_insert_with(|| Reference::json(json!({"zarr_format": 2})));
        Self { refs }
    }

    pub fn get(&self, key: &RefKey) -> Option<&Reference> {
        self.refs.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RefKey, &Reference)> {
        self.refs.iter()
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Root group attributes.
    pub fn attrs(&self) -> Option<&Value> {
        self.get(&RefKey::root(RefItem::ZAttrs))
            .and_then(Reference::as_json)
    }

    /// Names of all arrays, sorted.
    pub fn arrays(&self) -> Vec<&str> {
        self.refs
            .keys()
            .filter(|k| k.item == RefItem::ZArray)
            .filter_map(|k| k.node.as_deref())
            .collect()
    }

    pub fn array_meta(&self, node: &str) -> Option<&Value> {
        self.get(&RefKey::array(None, node, RefItem::ZArray))
            .and_then(Reference::as_json)
    }

    pub fn array_attrs(&self, node: &str) -> Option<&Value> {
        self.get(&RefKey::array(None, node, RefItem::ZAttrs))
            .and_then(Reference::as_json)
    }

    /// Chunk references of one array, keyed by chunk index.
    pub fn chunks<'a>(&'a self, node: &'a str) -> impl Iterator<Item = (&'a [u64], &'a Reference)> + 'a {
        self.refs.iter().filter_map(move |(k, r)| match &k.item {
            RefItem::Chunk(idx) if k.node.as_deref() == Some(node) => Some((idx.as_slice(), r)),
            _ => None,
        })
    }

    pub fn to_json(&self) -> Result<Value> {
        to_kerchunk(&self.refs)
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let version = value.get("version").and_then(Value::as_u64);
        if version != Some(1) {
            return Err(RefsError::InvalidManifest(format!(
                "unsupported manifest version {:?}",
                version
            )));
        }
        let refs = value
            .get("refs")
            .and_then(Value::as_object)
            .ok_or_else(|| RefsError::InvalidManifest("missing 'refs' object".to_string()))?;

        let mut parsed = BTreeMap::new();
        for (path, v) in refs {
            let key = RefKey::parse_flat(path)?;
            let reference = Reference::from_kerchunk(&key, v)?;
            parsed.insert(key, reference);
        }
        Ok(Self::from_refs(parsed))
    }

    /// Write the manifest atomically: temporary file, then rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(|e| RefsError::io(parent, e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| RefsError::io(parent, e))?;
        serde_json::to_writer(&mut tmp, &self.to_json()?)?;
        tmp.flush().map_err(|e| RefsError::io(path, e))?;
        tmp.persist(path).map_err(|e| RefsError::io(path, e.error))?;

        debug!(path = %path.display(), refs = self.len(), "Saved reference manifest");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| RefsError::io(path, e))?;
        let value: Value = serde_json::from_slice(&bytes)?;
        Self::from_json(&value)
    }
}

fn to_kerchunk(refs: &BTreeMap<RefKey, Reference>) -> Result<Value> {
    let mut out = Map::new();
    for (key, reference) in refs {
        out.insert(key.path(), reference.to_kerchunk()?);
    }
    Ok(json!({"version": 1, "refs": out}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_paths() {
        assert_eq!(RefKey::root(RefItem::ZGroup).path(), ".zgroup");
        assert_eq!(RefKey::group("atm2d", RefItem::ZAttrs).path(), "atm2d/.zattrs");
        assert_eq!(
            RefKey::array(Some("atm3d"), "t", RefItem::Chunk(vec![1, 2, 0])).path(),
            "atm3d/t/1.2.0"
        );
    }

    #[test]
    fn test_parse_flat_keys() {
        assert_eq!(
            RefKey::parse_flat("2t/3.0").unwrap(),
            RefKey::array(None, "2t", RefItem::Chunk(vec![3, 0]))
        );
        assert_eq!(
            RefKey::parse_flat(".zgroup").unwrap(),
            RefKey::root(RefItem::ZGroup)
        );
        assert!(RefKey::parse_flat("atm2d/t/.zarray").is_err());
        assert!(RefKey::parse_flat("t/zz").is_err());
        assert!(RefKey::parse_flat("0.0").is_err());
    }

    #[test]
    fn test_kerchunk_round_trip() {
        let mut refs = BTreeMap::new();
        refs.insert(
            RefKey::array(None, "lat", RefItem::ZArray),
            Reference::json(json!({"shape": [4], "fill_value": "NaN"})),
        );
        refs.insert(
            RefKey::array(None, "lat", RefItem::Chunk(vec![0])),
            Reference::bytes(vec![0, 1, 2, 255]),
        );
        refs.insert(
            RefKey::array(None, "2t", RefItem::Chunk(vec![0, 0])),
            Reference::Range {
                file: "/data/an.grib".to_string(),
                offset: 1024,
                length: 187,
            },
        );
        let manifest = NormalizedManifest::from_refs(refs);

        let value = manifest.to_json().unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["refs"][".zgroup"], "{\"zarr_format\":2}");
        assert_eq!(value["refs"]["lat/0"], "base64:AAEC/w==");
        assert_eq!(value["refs"]["2t/0.0"], json!(["/data/an.grib", 1024, 187]));

        assert_eq!(NormalizedManifest::from_json(&value).unwrap(), manifest);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("refs/an/surface.json");
        let manifest = NormalizedManifest::from_refs(BTreeMap::new());

        manifest.save(&path).unwrap();
        assert_eq!(NormalizedManifest::load(&path).unwrap(), manifest);
        assert_eq!(manifest.len(), 1);
    }

    #[test]
    fn test_rejects_unknown_version() {
        assert!(matches!(
            NormalizedManifest::from_json(&json!({"version": 2, "refs": {}})),
            Err(RefsError::InvalidManifest(_))
        ));
    }
}

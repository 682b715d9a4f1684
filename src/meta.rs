// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Descriptor files - the small key/value document beside every item

use crate::error::{RegistryError, Result};
use crate::types::{IndexRecord, RepoRef};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// On-disk representation of a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetaFormat {
    /// `meta.yaml`
    #[default]
    Yaml,
    /// `meta.json`
    Json,
}

impl MetaFormat {
    /// File name used for this format
    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Yaml => "meta.yaml",
            Self::Json => "meta.json",
        }
    }

    /// Format of the descriptor already present in `dir`, YAML first
    #[must_use]
    pub fn existing(dir: &Path) -> Option<Self> {
        [Self::Yaml, Self::Json]
            .into_iter()
            .find(|f| dir.join(f.file_name()).is_file())
    }
}

/// An item or repository descriptor
///
/// Recognised fields are `uid`, `alias` and `tags`; every other field is
/// carried verbatim through loads, merges and saves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor(pub Map<String, Value>);

impl Descriptor {
    /// Empty descriptor
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Item uid, if present
    #[must_use]
    pub fn uid(&self) -> Option<&str> {
        self.0.get("uid").and_then(Value::as_str)
    }

    /// Item alias, if present
    #[must_use]
    pub fn alias(&self) -> Option<&str> {
        self.0.get("alias").and_then(Value::as_str)
    }

    /// Item tags; non-string entries are ignored
    #[must_use]
    pub fn tags(&self) -> Vec<String> {
        match self.0.get("tags") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Set the uid
    pub fn set_uid(&mut self, uid: &str) {
        self.0.insert("uid".into(), Value::String(uid.to_string()));
    }

    /// Set or clear the alias
    pub fn set_alias(&mut self, alias: Option<&str>) {
        match alias {
            Some(a) => {
                self.0.insert("alias".into(), Value::String(a.to_string()));
            }
            None => {
                self.0.remove("alias");
            }
        }
    }

    /// Replace the tag list
    pub fn set_tags(&mut self, tags: &[String]) {
        let list = tags.iter().cloned().map(Value::String).collect();
        self.0.insert("tags".into(), Value::Array(list));
    }

    /// Read access to an arbitrary field
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Deep-merge `other` into `self`
    pub fn merge(&mut self, other: &Descriptor, options: MergeOptions) {
        merge_maps(&mut self.0, &other.0, options);
    }
}

impl From<Map<String, Value>> for Descriptor {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// List handling for [`Descriptor::merge`]
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeOptions {
    /// Concatenate lists instead of replacing them
    pub append_lists: bool,
    /// Drop duplicates after concatenation
    pub append_unique: bool,
}

fn merge_maps(target: &mut Map<String, Value>, patch: &Map<String, Value>, options: MergeOptions) {
    for (key, value) in patch {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_maps(existing, incoming, options);
            }
            (Some(Value::Array(existing)), Value::Array(incoming)) if options.append_lists => {
                for item in incoming {
                    if !options.append_unique || !existing.contains(item) {
                        existing.push(item.clone());
                    }
                }
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Load the descriptor in `dir`, preferring YAML over JSON
///
/// Returns `Ok(None)` when neither file exists.
pub fn load(dir: &Path) -> Result<Option<(Descriptor, MetaFormat)>> {
    let Some(format) = MetaFormat::existing(dir) else {
        return Ok(None);
    };
    let path = dir.join(format.file_name());
    let value = read_value(&path, format)?;
    match value {
        Value::Object(mut map) => {
            // unquoted all-digit uids come back from YAML as numbers
            if let Some(Value::Number(n)) = map.get("uid") {
                let uid = n.to_string();
                map.insert("uid".into(), Value::String(uid));
            }
            Ok(Some((Descriptor(map), format)))
        }
        Value::Null => Ok(Some((Descriptor::new(), format))),
        _ => Err(RegistryError::Parse {
            path,
            message: "descriptor is not a mapping".into(),
        }),
    }
}

/// Write `descriptor` into `dir` using `format`
pub fn save(dir: &Path, descriptor: &Descriptor, format: MetaFormat) -> Result<PathBuf> {
    let path = dir.join(format.file_name());
    let text = match format {
        MetaFormat::Yaml => serde_yaml::to_string(descriptor).map_err(|e| RegistryError::Parse {
            path: path.clone(),
            message: e.to_string(),
        })?,
        MetaFormat::Json => {
            serde_json::to_string_pretty(descriptor).map_err(|e| RegistryError::Parse {
                path: path.clone(),
                message: e.to_string(),
            })?
        }
    };
    fs::write(&path, text).map_err(|e| RegistryError::io(&path, e))?;
    Ok(path)
}

/// Read a YAML or JSON file into a JSON value
pub fn read_value(path: &Path, format: MetaFormat) -> Result<Value> {
    let text = fs::read_to_string(path).map_err(|e| RegistryError::io(path, e))?;
    let parsed = match format {
        MetaFormat::Yaml => serde_yaml::from_str::<serde_yaml::Value>(&text)
            .map_err(|e| e.to_string())
            .and_then(|v| serde_json::to_value(v).map_err(|e| e.to_string())),
        MetaFormat::Json => serde_json::from_str::<Value>(&text).map_err(|e| e.to_string()),
    };
    parsed.map_err(|message| RegistryError::Parse {
        path: path.to_path_buf(),
        message,
    })
}

/// A resolved item with its decoded descriptor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Item {
    /// Item directory
    pub path: PathBuf,
    /// Owning repository
    pub repo: RepoRef,
    /// Decoded descriptor
    pub meta: Descriptor,
    /// Format the descriptor is stored in
    #[serde(skip)]
    pub format: MetaFormat,
}

impl Item {
    /// Load the item behind an index record
    ///
    /// A missing or unreadable descriptor falls back to the indexed fields.
    #[must_use]
    pub fn from_record(record: &IndexRecord) -> Self {
        let (meta, format) = match load(&record.path) {
            Ok(Some(found)) => found,
            Ok(None) => (fallback_descriptor(record), MetaFormat::default()),
            Err(err) => {
                tracing::warn!("Using indexed fields for {}: {}", record.path.display(), err);
                (fallback_descriptor(record), MetaFormat::default())
            }
        };
        Self {
            path: record.path.clone(),
            repo: record.repo.clone(),
            meta,
            format,
        }
    }

    /// Item uid from its descriptor
    #[must_use]
    pub fn uid(&self) -> Option<&str> {
        self.meta.uid()
    }

    /// Rewrite the descriptor in its current format
    pub fn save(&self) -> Result<PathBuf> {
        save(&self.path, &self.meta, self.format)
    }

    /// Index record for the current descriptor
    pub fn to_record(&self) -> Result<IndexRecord> {
        let uid = self.uid().ok_or_else(|| RegistryError::Parse {
            path: self.path.clone(),
            message: "descriptor has no uid".into(),
        })?;
        Ok(IndexRecord {
            uid: uid.to_string(),
            tags: self.meta.tags(),
            alias: self.meta.alias().map(String::from),
            path: self.path.clone(),
            repo: self.repo.clone(),
        })
    }
}

fn fallback_descriptor(record: &IndexRecord) -> Descriptor {
    let mut meta = Descriptor::new();
    meta.set_uid(&record.uid);
    meta.set_alias(record.alias.as_deref());
    meta.set_tags(&record.tags);
    meta
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn descriptor(value: Value) -> Descriptor {
        match value {
            Value::Object(map) => Descriptor(map),
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_yaml_preferred_over_json() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("meta.json"), r#"{"uid": "json"}"#).unwrap();
        fs::write(dir.path().join("meta.yaml"), "uid: yaml\n").unwrap();

        let (meta, format) = load(dir.path()).unwrap().unwrap();
        assert_eq!(format, MetaFormat::Yaml);
        assert_eq!(meta.uid(), Some("yaml"));
    }

    #[test]
    fn test_missing_descriptor_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_malformed_descriptor_is_parse_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("meta.json"), "{ not json").unwrap();
        let err = load(dir.path()).unwrap_err();
        assert_eq!(err.code(), "PARSE_ERROR");
    }

    #[test]
    fn test_save_and_reload_keeps_extra_fields() {
        let dir = TempDir::new().unwrap();
        let meta = descriptor(json!({
            "uid": "0123456789abcdef",
            "alias": "detect-os",
            "tags": ["detect", "os"],
            "new_env_keys": ["HOST_OS_*"]
        }));

        for format in [MetaFormat::Yaml, MetaFormat::Json] {
            save(dir.path(), &meta, format).unwrap();
            let (loaded, _) = load(dir.path()).unwrap().unwrap();
            assert_eq!(loaded, meta);
        }
    }

    #[test]
    fn test_merge_appends_unique_lists_and_recurses() {
        let mut base = descriptor(json!({
            "tags": ["a", "b"],
            "env": {"A": "1", "nested": {"x": 1}},
            "name": "old"
        }));
        let patch = descriptor(json!({
            "tags": ["b", "c"],
            "env": {"B": "2", "nested": {"y": 2}},
            "name": "new"
        }));

        base.merge(&patch, MergeOptions { append_lists: true, append_unique: true });

        assert_eq!(base.tags(), vec!["a", "b", "c"]);
        assert_eq!(base.get("env"), Some(&json!({"A": "1", "B": "2", "nested": {"x": 1, "y": 2}})));
        assert_eq!(base.get("name"), Some(&json!("new")));
    }

    #[test]
    fn test_merge_without_append_replaces_lists() {
        let mut base = descriptor(json!({"deps": [1, 2]}));
        base.merge(&descriptor(json!({"deps": [3]})), MergeOptions::default());
        assert_eq!(base.get("deps"), Some(&json!([3])));
    }
}

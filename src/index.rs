// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Derived search index over every registered repository
//!
//! The index is rebuilt from disk when the registry opens and then kept in
//! step by the mutating operations. The per-class JSON files it writes are
//! snapshots for inspection; they are never read back.

use crate::error::{RegistryError, Result};
use crate::meta;
use crate::types::{folder_name, IndexRecord, ItemClass, Repository};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Per-class lists of index records
#[derive(Debug)]
pub struct Index {
    /// Directory receiving the `index_<class>.json` snapshots
    dir: PathBuf,
    /// Records keyed by class
    lists: BTreeMap<ItemClass, Vec<IndexRecord>>,
}

impl Index {
    /// Scan `repos` and build a fresh index, writing snapshots into `dir`
    pub fn build(dir: &Path, repos: &[Repository]) -> Self {
        let mut index = Self {
            dir: dir.to_path_buf(),
            lists: ItemClass::ALL.iter().map(|c| (*c, Vec::new())).collect(),
        };

        for repo in repos {
            if !repo.path.is_dir() {
                continue;
            }
            for class in ItemClass::ALL {
                index.scan_class_dir(repo, class);
            }
        }

        debug!(
            "Index built: {} scripts, {} caches, {} experiments",
            index.records(ItemClass::Script).len(),
            index.records(ItemClass::Cache).len(),
            index.records(ItemClass::Experiment).len()
        );
        index.persist();
        index
    }

    fn scan_class_dir(&mut self, repo: &Repository, class: ItemClass) {
        let class_dir = repo.class_dir(class);
        if !class_dir.is_dir() {
            return;
        }

        let entries = WalkDir::new(&class_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().is_dir());

        for entry in entries {
            let item_dir = entry.path();
            match meta::load(item_dir) {
                Ok(Some((descriptor, _))) => match descriptor.uid() {
                    Some(uid) => self.list_mut(class).push(IndexRecord {
                        uid: uid.to_string(),
                        tags: descriptor.tags(),
                        alias: descriptor.alias().map(String::from),
                        path: item_dir.to_path_buf(),
                        repo: repo.to_ref(),
                    }),
                    None => info!("Skipping {}: missing 'uid' field", item_dir.display()),
                },
                Ok(None) => {}
                Err(err) => warn!("Skipping {}: {}", item_dir.display(), err),
            }
        }
    }

    fn list_mut(&mut self, class: ItemClass) -> &mut Vec<IndexRecord> {
        self.lists.entry(class).or_default()
    }

    /// All records of `class`
    #[must_use]
    pub fn records(&self, class: ItemClass) -> &[IndexRecord] {
        self.lists.get(&class).map_or(&[], Vec::as_slice)
    }

    /// Record of `class` with `uid`
    #[must_use]
    pub fn get(&self, class: ItemClass, uid: &str) -> Option<&IndexRecord> {
        self.records(class).iter().find(|r| r.uid == uid)
    }

    /// True when `uid` is already indexed for `class`
    #[must_use]
    pub fn contains_uid(&self, class: ItemClass, uid: &str) -> bool {
        self.get(class, uid).is_some()
    }

    fn position(&self, class: ItemClass, uid: &str) -> Option<usize> {
        self.records(class).iter().position(|r| r.uid == uid)
    }

    /// Append a record; callers check uid uniqueness beforehand
    pub fn add(&mut self, class: ItemClass, record: IndexRecord) {
        self.list_mut(class).push(record);
        self.persist();
    }

    /// Replace the record with the same uid, or append it
    pub fn update(&mut self, class: ItemClass, record: IndexRecord) {
        match self.position(class, &record.uid) {
            Some(pos) => self.list_mut(class)[pos] = record,
            None => {
                debug!("No index entry for {} {}, adding it", class, record.uid);
                self.list_mut(class).push(record);
            }
        }
        self.persist();
    }

    /// Drop the record with `uid`; returns whether one existed
    pub fn remove(&mut self, class: ItemClass, uid: &str) -> bool {
        let removed = match self.position(class, uid) {
            Some(pos) => {
                self.list_mut(class).remove(pos);
                true
            }
            None => {
                warn!("Index has no {} item with uid {}", class, uid);
                false
            }
        };
        self.persist();
        removed
    }

    /// Snapshot file for `class`
    #[must_use]
    pub fn file_for(&self, class: ItemClass) -> PathBuf {
        self.dir.join(format!("index_{}.json", class.dir_name()))
    }

    /// Write every class list to its snapshot file
    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| RegistryError::io(&self.dir, e))?;
        for class in ItemClass::ALL {
            let path = self.file_for(class);
            let json = serde_json::to_string_pretty(self.records(class)).map_err(|e| {
                RegistryError::Parse {
                    path: path.clone(),
                    message: e.to_string(),
                }
            })?;
            fs::write(&path, json).map_err(|e| RegistryError::io(&path, e))?;
        }
        Ok(())
    }

    fn persist(&self) {
        if let Err(err) = self.save() {
            error!("Failed to save index snapshot: {}", err);
        }
    }

    /// Records of `class` whose directory is named `name`
    #[must_use]
    pub fn by_folder_name(&self, class: ItemClass, name: &str) -> Vec<&IndexRecord> {
        self.records(class)
            .iter()
            .filter(|r| folder_name(&r.path) == name)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RepoMeta;
    use tempfile::TempDir;

    fn make_repo(root: &Path) -> Repository {
        fs::create_dir_all(root).unwrap();
        Repository {
            path: root.to_path_buf(),
            meta: RepoMeta {
                alias: "test@repo".into(),
                uid: Some("aaaaaaaaaaaaaaaa".into()),
                ..RepoMeta::default()
            },
        }
    }

    fn write_item(repo: &Repository, class: ItemClass, name: &str, body: &str, file: &str) -> PathBuf {
        let dir = repo.class_dir(class).join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(file), body).unwrap();
        dir
    }

    fn make_record(repo: &Repository, uid: &str, tags: &[&str]) -> IndexRecord {
        IndexRecord {
            uid: uid.into(),
            tags: tags.iter().map(|t| (*t).to_string()).collect(),
            alias: Some(format!("alias-{uid}")),
            path: repo.path.join("script").join(uid),
            repo: repo.to_ref(),
        }
    }

    #[test]
    fn test_build_indexes_yaml_and_json_items() {
        let tmp = TempDir::new().unwrap();
        let repo = make_repo(&tmp.path().join("repo"));
        write_item(&repo, ItemClass::Script, "detect-os", "uid: 1111aaaa1111aaaa\nalias: detect-os\ntags: [detect, os]\n", "meta.yaml");
        write_item(&repo, ItemClass::Cache, "c1", r#"{"uid": "2222222222222222", "tags": ["x"]}"#, "meta.json");

        let index = Index::build(tmp.path(), &[repo]);

        assert_eq!(index.records(ItemClass::Script).len(), 1);
        assert_eq!(index.records(ItemClass::Cache).len(), 1);
        let script = &index.records(ItemClass::Script)[0];
        assert_eq!(script.alias.as_deref(), Some("detect-os"));
        assert_eq!(script.tags, vec!["detect", "os"]);
        assert!(index.file_for(ItemClass::Script).is_file());
    }

    #[test]
    fn test_build_skips_malformed_and_uidless_items() {
        let tmp = TempDir::new().unwrap();
        let repo_a = make_repo(&tmp.path().join("a"));
        let repo_b = make_repo(&tmp.path().join("b"));
        write_item(&repo_a, ItemClass::Script, "broken", "{ nope", "meta.json");
        write_item(&repo_a, ItemClass::Script, "no-uid", "alias: no-uid\n", "meta.yaml");
        write_item(&repo_b, ItemClass::Script, "good", "uid: '3333333333333333'\n", "meta.yaml");

        let index = Index::build(tmp.path(), &[repo_a, repo_b]);

        let scripts = index.records(ItemClass::Script);
        assert_eq!(scripts.len(), 1);
        assert_eq!(scripts[0].uid, "3333333333333333");
    }

    #[test]
    fn test_update_replaces_in_place_or_appends() {
        let tmp = TempDir::new().unwrap();
        let repo = make_repo(&tmp.path().join("repo"));
        let mut index = Index::build(tmp.path(), &[repo.clone()]);

        index.add(ItemClass::Script, make_record(&repo, "u1", &["a"]));
        index.update(ItemClass::Script, make_record(&repo, "u1", &["a", "b"]));
        index.update(ItemClass::Script, make_record(&repo, "u2", &["c"]));

        let scripts = index.records(ItemClass::Script);
        assert_eq!(scripts.len(), 2);
        assert_eq!(scripts[0].tags, vec!["a", "b"]);
        assert_eq!(scripts[1].uid, "u2");
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let tmp = TempDir::new().unwrap();
        let repo = make_repo(&tmp.path().join("repo"));
        let mut index = Index::build(tmp.path(), &[repo.clone()]);
        index.add(ItemClass::Cache, make_record(&repo, "u1", &[]));

        assert!(index.remove(ItemClass::Cache, "u1"));
        assert!(!index.remove(ItemClass::Cache, "u1"));
        assert!(index.records(ItemClass::Cache).is_empty());
    }

    #[test]
    fn test_snapshot_tracks_mutations() {
        let tmp = TempDir::new().unwrap();
        let repo = make_repo(&tmp.path().join("repo"));
        let mut index = Index::build(tmp.path(), &[repo.clone()]);
        index.add(ItemClass::Experiment, make_record(&repo, "e1", &["t"]));

        let text = fs::read_to_string(index.file_for(ItemClass::Experiment)).unwrap();
        let snapshot: Vec<IndexRecord> = serde_json::from_str(&text).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].repo.alias, "test@repo");
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Invariant tests for the depot registry
//!
//! These tests verify critical invariants:
//! 1. Uid uniqueness - every add yields a uid not already indexed
//! 2. Round-trip - added items resolve by alias and tags with their descriptor intact
//! 3. Idempotent removal and identity-preserving moves
//! 4. Repository conflict resolution on pull

use depot::error::WarningCode;
use depot::index::Index;
use depot::meta;
use depot::prompt::ScriptedPrompt;
use depot::registry::{AddRequest, CopyRequest, Registry};
use depot::repos::{PullOutcome, PullRequest};
use depot::resolver::Query;
use depot::types::ItemClass;
use depot::vcs::Vcs;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::rc::Rc;
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

/// Clones by writing the descriptor registered for the URL
#[derive(Default)]
struct FakeVcs {
    remotes: RefCell<HashMap<String, String>>,
}

impl FakeVcs {
    fn remote(&self, url: &str, meta_yaml: &str) {
        self.remotes.borrow_mut().insert(url.into(), meta_yaml.into());
    }
}

impl Vcs for FakeVcs {
    fn clone_repo(&self, url: &str, dest: &Path, _branch: Option<&str>) -> depot::error::Result<()> {
        let remotes = self.remotes.borrow();
        let meta = remotes.get(url).ok_or_else(|| depot::error::RegistryError::ExternalTool {
            command: format!("git clone {url}"),
            stderr: "not found".into(),
        })?;
        fs::create_dir_all(dest.join(".git")).unwrap();
        fs::write(dest.join("meta.yaml"), meta).unwrap();
        Ok(())
    }

    fn local_changes(&self, _repo: &Path) -> depot::error::Result<String> {
        Ok(String::new())
    }

    fn pull(&self, _repo: &Path) -> depot::error::Result<()> {
        Ok(())
    }

    fn checkout(&self, _repo: &Path, _rev: &str) -> depot::error::Result<()> {
        Ok(())
    }
}

fn open(tmp: &TempDir) -> Registry {
    open_with(tmp, Rc::new(FakeVcs::default()))
}

fn open_with(tmp: &TempDir, vcs: Rc<FakeVcs>) -> Registry {
    Registry::with_parts(
        &tmp.path().join("repos"),
        Box::new(ScriptedPrompt::default()),
        Box::new(vcs),
    )
    .unwrap()
}

fn add(registry: &mut Registry, class: ItemClass, item: &str, tags: &str) -> depot::meta::Item {
    let request = AddRequest {
        item: Some(item.into()),
        tags: Some(tags.into()),
        ..AddRequest::default()
    };
    registry.add(class, &request).unwrap().items.remove(0)
}

// =============================================================================
// Uniqueness
// =============================================================================

#[test]
fn test_add_never_reuses_an_indexed_uid() {
    let tmp = TempDir::new().unwrap();
    let mut registry = open(&tmp);
    let mut seen = HashSet::new();

    for i in 0..40 {
        let before: HashSet<String> = registry
            .index()
            .records(ItemClass::Cache)
            .iter()
            .map(|r| r.uid.clone())
            .collect();
        let item = add(&mut registry, ItemClass::Cache, &format!("c{i}"), "bulk");
        let uid = item.uid().unwrap().to_string();

        assert!(!before.contains(&uid));
        assert!(seen.insert(uid));
    }
}

// =============================================================================
// Round-trip
// =============================================================================

#[test]
fn test_added_item_resolves_by_alias_and_tags() {
    let tmp = TempDir::new().unwrap();
    let mut registry = open(&tmp);
    let added = add(&mut registry, ItemClass::Script, "a", "x,y");

    let by_alias = registry.search(ItemClass::Script, &Query::from_identifier("a")).unwrap();
    let by_tags = registry.search(ItemClass::Script, &Query::tags("x,y")).unwrap();

    assert_eq!(by_alias.items.len(), 1);
    assert_eq!(by_tags.items.len(), 1);
    assert_eq!(by_alias.items[0].path, added.path);
    assert_eq!(by_tags.items[0].path, added.path);

    let (reloaded, _) = meta::load(&added.path).unwrap().unwrap();
    assert_eq!(reloaded, added.meta);
    assert_eq!(reloaded.alias(), Some("a"));
    assert_eq!(reloaded.tags(), vec!["x", "y"]);
}

#[test]
fn test_incremental_index_matches_rebuild() {
    let tmp = TempDir::new().unwrap();
    let mut registry = open(&tmp);
    add(&mut registry, ItemClass::Script, "keep", "k");
    let gone = add(&mut registry, ItemClass::Script, "gone", "g");
    add(&mut registry, ItemClass::Experiment, "exp", "e");
    registry
        .rm(ItemClass::Script, &Query::from_identifier(gone.uid().unwrap()), true)
        .unwrap();

    let rebuilt = Index::build(&tmp.path().join("snapshot"), registry.repos().repos());
    for class in ItemClass::ALL {
        let live: HashSet<_> = registry.index().records(class).iter().map(|r| r.uid.clone()).collect();
        let disk: HashSet<_> = rebuilt.records(class).iter().map(|r| r.uid.clone()).collect();
        assert_eq!(live, disk, "{class} index diverged from disk");
    }
}

// =============================================================================
// Removal and moves
// =============================================================================

#[test]
fn test_rm_twice_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let mut registry = open(&tmp);
    let item = add(&mut registry, ItemClass::Cache, "twice", "t");
    let query = Query::from_identifier(item.uid().unwrap());

    let first = registry.rm(ItemClass::Cache, &query, true).unwrap();
    let second = registry.rm(ItemClass::Cache, &query, true).unwrap();

    assert_eq!(first.items.len(), 1);
    assert_eq!(second.warnings[0].code, WarningCode::EmptyTarget);
    assert!(!registry.index().contains_uid(ItemClass::Cache, item.uid().unwrap()));
}

#[test]
fn test_mv_preserves_uid_and_content() {
    let tmp = TempDir::new().unwrap();
    let mut registry = open(&tmp);
    let src = add(&mut registry, ItemClass::Script, "src-item", "move,me");
    fs::write(src.path.join("payload.txt"), "payload").unwrap();
    let uid = src.uid().unwrap().to_string();

    let request = CopyRequest {
        src: Some("src-item".into()),
        dest: "moved-item".into(),
        ..CopyRequest::default()
    };
    registry.mv(ItemClass::Script, &request).unwrap();

    let found = registry.find(ItemClass::Script, &Query::from_identifier(&uid)).unwrap();
    assert_eq!(found.len(), 1);
    assert!(found[0].path.ends_with("moved-item"));
    assert_eq!(fs::read_to_string(found[0].path.join("payload.txt")).unwrap(), "payload");
    assert_eq!(registry.index().records(ItemClass::Script).len(), 1);

    assert!(!src.path.exists());
    let old = registry.find(ItemClass::Script, &Query::from_identifier("src-item")).unwrap();
    assert!(old.is_empty());
}

// =============================================================================
// Repository conflicts
// =============================================================================

#[test]
fn test_pull_conflict_replaces_old_registration() {
    let tmp = TempDir::new().unwrap();
    let vcs = Rc::new(FakeVcs::default());
    vcs.remote("https://github.com/acme/one.git", "alias: shared\nuid: abc1230000000000\n");
    vcs.remote("https://github.com/acme/two.git", "alias: shared\nuid: abc1230000000000\n");
    let mut registry = open_with(&tmp, Rc::clone(&vcs));

    registry.pull_repo(&PullRequest::new("acme@one")).unwrap();
    let count = registry.repos().repos().len();
    let outcome = registry.pull_repo(&PullRequest::new("acme@two")).unwrap();

    assert_eq!(outcome.warnings.len(), 1);
    assert_eq!(outcome.warnings[0].code, WarningCode::Replaced);
    assert_eq!(registry.repos().repos().len(), count);
    let found = registry.find_repo("shared").unwrap();
    assert_eq!(found.len(), 1);
    assert!(found[0].path.ends_with("acme@two"));
}

#[test]
fn test_pull_conflict_can_be_ignored() {
    let tmp = TempDir::new().unwrap();
    let vcs = Rc::new(FakeVcs::default());
    vcs.remote("https://github.com/acme/one.git", "alias: shared\nuid: abc1230000000000\n");
    vcs.remote("https://github.com/acme/two.git", "alias: shared\nuid: abc1230000000000\n");
    let mut registry = open_with(&tmp, Rc::clone(&vcs));
    registry.pull_repo(&PullRequest::new("acme@one")).unwrap();

    let request = PullRequest {
        ignore_on_conflict: true,
        ..PullRequest::new("acme@two")
    };
    registry.pull_repo(&request).unwrap();

    let found = registry.find_repo("shared").unwrap();
    assert!(found[0].path.ends_with("acme@one"));
}

#[test]
fn test_pulled_items_are_resolvable() {
    let tmp = TempDir::new().unwrap();
    let vcs = Rc::new(FakeVcs::default());
    vcs.remote("https://github.com/acme/tools.git", "alias: acme@tools\nuid: 1234567890abcdef\n");
    let mut registry = open_with(&tmp, Rc::clone(&vcs));
    registry.pull_repo(&PullRequest::new("acme@tools")).unwrap();

    let repo_path = registry.repos().root().join("acme@tools");
    let item_dir = repo_path.join("script").join("detect-os");
    fs::create_dir_all(&item_dir).unwrap();
    fs::write(item_dir.join("meta.yaml"), "alias: detect-os\nuid: '5b4e0237da074764'\ntags: [detect, os]\n").unwrap();
    registry.reindex();

    let found = registry
        .find(ItemClass::Script, &Query::from_identifier("acme@tools:detect-os"))
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].repo.alias, "acme@tools");
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_add_search_rm_scenario() {
    let tmp = TempDir::new().unwrap();
    let mut registry = open(&tmp);

    add(&mut registry, ItemClass::Script, "my-script-1", "my,new-tags-1");
    let found = registry.search(ItemClass::Script, &Query::from_identifier("my-script-1")).unwrap();
    assert_eq!(found.items.len(), 1);

    let removed = registry
        .rm(ItemClass::Script, &Query::from_identifier("my-script-1"), true)
        .unwrap();
    assert_eq!(removed.items.len(), 1);

    let found = registry.search(ItemClass::Script, &Query::from_identifier("my-script-1")).unwrap();
    assert!(found.items.is_empty());
}

#[test]
fn test_pull_outcome_reports_replacement() {
    let tmp = TempDir::new().unwrap();
    let vcs = Rc::new(FakeVcs::default());
    vcs.remote("https://github.com/acme/one.git", "alias: one\nuid: abc1230000000000\n");
    vcs.remote("https://github.com/acme/two.git", "alias: two\nuid: abc1230000000000\n");
    let mut registry = open_with(&tmp, Rc::clone(&vcs));
    registry.pull_repo(&PullRequest::new("acme@one")).unwrap();

    let root = registry.repos().root().to_path_buf();
    let mut repos = depot::repos::RepoRegistry::open(&root, Box::new(Rc::clone(&vcs))).unwrap();
    let outcome = repos.pull(&PullRequest::new("acme@two")).unwrap();

    assert_eq!(
        outcome,
        PullOutcome::Replaced {
            old: root.join("acme@one"),
            new: root.join("acme@two"),
        }
    );
}

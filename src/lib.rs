// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
//! Depot library - a local registry for items spread across repositories
//!
//! This crate tracks scripts, caches and experiments stored as directories
//! inside registered repositories, resolves them by uid, alias, tag set or
//! repo-qualified name, and keeps a derived index in step with the
//! descriptor files on disk.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod automation;
pub mod commands;
pub mod config;
pub mod error;
pub mod index;
pub mod meta;
pub mod prompt;
pub mod registry;
pub mod repos;
pub mod resolver;
pub mod vcs;

/// Core data types shared by the index, resolver and registry
pub mod types {
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use std::path::{Path, PathBuf};
    use std::str::FromStr;

    /// Alias of the repository that receives items added without a repo
    pub const LOCAL_REPO_ALIAS: &str = "local";

    /// Length of an item or repository uid
    pub const UID_LEN: usize = 16;

    // =========================================================================
    // Identifiers
    // =========================================================================

    /// Generate a fresh 16 hex-char uid
    #[must_use]
    pub fn new_uid() -> String {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        hex[..UID_LEN].to_string()
    }

    /// True when `value` looks like a uid (16 lowercase hex chars)
    #[must_use]
    pub fn is_uid(value: &str) -> bool {
        value.len() == UID_LEN
            && value
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    }

    /// Split a comma-separated list, trimming and dropping empty pieces
    #[must_use]
    pub fn split_list(value: &str) -> Vec<String> {
        value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }

    /// Collapse duplicates while keeping first-seen order
    #[must_use]
    pub fn dedup_tags<I>(tags: I) -> Vec<String>
    where
        I: IntoIterator<Item = String>,
    {
        let mut out: Vec<String> = Vec::new();
        for tag in tags {
            if !out.contains(&tag) {
                out.push(tag);
            }
        }
        out
    }

    // =========================================================================
    // Item classes
    // =========================================================================

    /// The three kinds of items a repository can hold
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum ItemClass {
        /// Runnable automation scripts
        Script,
        /// Cached outputs of script runs
        Cache,
        /// Experiment records
        Experiment,
    }

    impl ItemClass {
        /// Every class, in index order
        pub const ALL: [ItemClass; 3] = [Self::Script, Self::Cache, Self::Experiment];

        /// Sub-folder of a repository holding items of this class
        #[must_use]
        pub fn dir_name(self) -> &'static str {
            match self {
                Self::Script => "script",
                Self::Cache => "cache",
                Self::Experiment => "experiment",
            }
        }

        /// Whether `_`-prefixed tags are variation tags for this class
        #[must_use]
        pub fn has_variation_tags(self) -> bool {
            matches!(self, Self::Script)
        }
    }

    impl fmt::Display for ItemClass {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.dir_name())
        }
    }

    impl FromStr for ItemClass {
        type Err = String;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s {
                "script" => Ok(Self::Script),
                "cache" => Ok(Self::Cache),
                "experiment" => Ok(Self::Experiment),
                other => Err(format!("unknown item class: {other}")),
            }
        }
    }

    // =========================================================================
    // Repository
    // =========================================================================

    /// A dependency declared in a repository descriptor
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct RepoDep {
        /// URL or `owner@name` shorthand
        pub url: String,
        /// Branch to clone
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub branch: Option<String>,
        /// Commit or ref to check out
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub checkout: Option<String>,
        /// Ignore a uid conflict instead of replacing the existing registrant
        #[serde(default = "default_true")]
        pub is_alias_okay: bool,
    }

    fn default_true() -> bool {
        true
    }

    /// Repository descriptor (`meta.yaml` at the repository root)
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct RepoMeta {
        /// Short name, e.g. `owner@name` or `local`
        #[serde(default)]
        pub alias: String,
        /// Repository uid; a registrant without one is a data error
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub uid: Option<String>,
        /// Human readable name
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub name: Option<String>,
        /// Whether the repository is a git checkout
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub git: Option<bool>,
        /// Repositories that must be pulled before this one
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub deps: Vec<RepoDep>,
        /// Unrecognised fields, kept verbatim
        #[serde(flatten)]
        pub extra: serde_json::Map<String, serde_json::Value>,
    }

    /// A registered repository root
    #[derive(Debug, Clone, PartialEq)]
    pub struct Repository {
        /// Absolute path of the repository root
        pub path: PathBuf,
        /// Parsed descriptor
        pub meta: RepoMeta,
    }

    impl Repository {
        /// Last path segment of the repository root
        #[must_use]
        pub fn folder_name(&self) -> String {
            folder_name(&self.path)
        }

        /// Directory holding items of `class`
        #[must_use]
        pub fn class_dir(&self, class: ItemClass) -> PathBuf {
            self.path.join(class.dir_name())
        }

        /// Lightweight back-reference used by index records
        #[must_use]
        pub fn to_ref(&self) -> RepoRef {
            RepoRef {
                uid: self.meta.uid.clone().unwrap_or_default(),
                alias: self.meta.alias.clone(),
                path: self.path.clone(),
            }
        }
    }

    /// Non-owning reference from an index record to its repository
    #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct RepoRef {
        /// Repository uid
        pub uid: String,
        /// Repository alias
        pub alias: String,
        /// Repository root
        pub path: PathBuf,
    }

    impl RepoRef {
        /// True when this reference points at `repo`
        #[must_use]
        pub fn is(&self, repo: &Repository) -> bool {
            self.path == repo.path
        }
    }

    // =========================================================================
    // Index records
    // =========================================================================

    /// Denormalised projection of an item used for queries
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct IndexRecord {
        /// Item uid, unique within its class
        pub uid: String,
        /// Item tags
        #[serde(default)]
        pub tags: Vec<String>,
        /// Item alias
        pub alias: Option<String>,
        /// Item directory
        pub path: PathBuf,
        /// Owning repository
        pub repo: RepoRef,
    }

    impl IndexRecord {
        /// Last path segment of the item directory
        #[must_use]
        pub fn folder_name(&self) -> String {
            folder_name(&self.path)
        }
    }

    /// Last segment of `path` as an owned string
    #[must_use]
    pub fn folder_name(path: &Path) -> String {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Prelude for common imports
pub mod prelude {
    pub use crate::error::{RegistryError, Response, Result};
    pub use crate::registry::Registry;
    pub use crate::resolver::Query;
    pub use crate::types::*;
}

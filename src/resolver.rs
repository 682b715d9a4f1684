// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Identifier resolution - turns a free-form identifier into index records
//!
//! Every search, show, list and mutation goes through [`resolve`]:
//!
//! 1. uid and alias match any record (record-level OR)
//! 2. a `repo:` qualifier restricts the candidates (repo-level AND)
//! 3. the folder name is tried only when uid and alias matched nothing
//! 4. otherwise the query must be a tag expression
//! 5. `fetch_all` returns the whole class

use crate::error::{RegistryError, Result};
use crate::index::Index;
use crate::repos::RepoRegistry;
use crate::types::{is_uid, split_list, IndexRecord, ItemClass};
use std::path::PathBuf;

/// What to look for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    /// Exact uid
    pub uid: Option<String>,
    /// Exact alias
    pub alias: Option<String>,
    /// Directory name tried when uid and alias find nothing
    pub folder_name: Option<String>,
    /// Comma-separated tag expression
    pub tags: Option<String>,
    /// Repository qualifier
    pub repo: Option<String>,
    /// Return every record of the class
    pub fetch_all: bool,
}

impl Query {
    /// Parse `[repo:]alias`, `[repo:]alias,uid` or a bare uid
    #[must_use]
    pub fn from_identifier(identifier: &str) -> Self {
        let identifier = identifier.trim();
        let (repo, rest) = match identifier.split_once(':') {
            Some((repo, rest)) => (non_empty(repo), rest),
            None => (None, identifier),
        };
        let rest = rest.trim().trim_end_matches('/');

        let (alias, uid) = match rest.split_once(',') {
            Some((alias, uid)) => (non_empty(alias), non_empty(uid)),
            None if is_uid(rest) => (None, Some(rest.to_string())),
            None => (non_empty(rest), None),
        };

        Self {
            folder_name: alias.clone(),
            uid,
            alias,
            repo,
            ..Self::default()
        }
    }

    /// Query by tag expression only
    pub fn tags(expr: impl Into<String>) -> Self {
        Self {
            tags: Some(expr.into()),
            ..Self::default()
        }
    }

    /// Query for every record of a class
    #[must_use]
    pub fn all() -> Self {
        Self {
            fetch_all: true,
            ..Self::default()
        }
    }

    /// Restrict the query to a repository
    #[must_use]
    pub fn in_repo(mut self, repo: impl Into<String>) -> Self {
        self.repo = Some(repo.into());
        self
    }

    /// True when neither an identifier nor tags were given
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.fetch_all
            && self.uid.is_none()
            && self.alias.is_none()
            && self.folder_name.is_none()
            && self.repo.is_none()
            && self.tags.as_deref().map_or(true, |t| t.trim().is_empty())
    }

    fn has_identifier(&self) -> bool {
        self.uid.is_some() || self.alias.is_some()
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Positive and negative tags of a query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    /// Tags that must all be present
    pub include: Vec<String>,
    /// Tags that must all be absent
    pub exclude: Vec<String>,
}

impl TagFilter {
    /// Parse a comma-separated expression for `class`
    ///
    /// `-tag` excludes. For scripts a `_tag` variation tag is not required,
    /// though `-_tag` still excludes it.
    pub fn parse(expr: &str, class: ItemClass) -> Result<Self> {
        let tags = split_list(expr);
        if tags.is_empty() {
            return Err(RegistryError::Usage("tags not specified".into()));
        }

        let mut filter = Self::default();
        for tag in tags {
            if class.has_variation_tags() && tag.starts_with('_') {
                continue;
            }
            let (negative, name) = match tag.strip_prefix('-') {
                Some(name) => (true, name.to_string()),
                None => (false, tag),
            };
            if name.is_empty() {
                continue;
            }
            let list = if negative { &mut filter.exclude } else { &mut filter.include };
            if !list.contains(&name) {
                list.push(name);
            }
        }
        Ok(filter)
    }

    /// Superset of the positive tags and disjoint from the negative ones
    #[must_use]
    pub fn matches(&self, tags: &[String]) -> bool {
        self.include.iter().all(|t| tags.contains(t)) && !self.exclude.iter().any(|t| tags.contains(t))
    }
}

/// Resolve `query` against the records of `class`
pub fn resolve<'a>(
    index: &'a Index,
    repos: &RepoRegistry,
    class: ItemClass,
    query: &Query,
) -> Result<Vec<&'a IndexRecord>> {
    let records = index.records(class);
    if query.fetch_all {
        return Ok(records.iter().collect());
    }

    let repo_paths: Option<Vec<PathBuf>> = match &query.repo {
        Some(repo) => Some(
            repos
                .find_by_identifier(repo)?
                .into_iter()
                .map(|r| r.path.clone())
                .collect(),
        ),
        None => None,
    };
    let in_repo = |record: &IndexRecord| {
        repo_paths
            .as_ref()
            .map_or(true, |paths| paths.contains(&record.repo.path))
    };

    if query.has_identifier() {
        let found: Vec<&IndexRecord> = records
            .iter()
            .filter(|r| in_repo(r))
            .filter(|r| {
                query.uid.as_deref() == Some(r.uid.as_str())
                    || (query.alias.is_some() && query.alias == r.alias)
            })
            .collect();
        if !found.is_empty() {
            return Ok(found);
        }
        if query.folder_name.is_none() {
            return Ok(found);
        }
    }

    if let Some(name) = &query.folder_name {
        tracing::debug!("Falling back to folder name {} for {}", name, class);
        return Ok(index
            .by_folder_name(class, name)
            .into_iter()
            .filter(|r| in_repo(r))
            .collect());
    }

    match query.tags.as_deref() {
        Some(expr) => {
            let filter = TagFilter::parse(expr, class)?;
            Ok(records
                .iter()
                .filter(|r| in_repo(r) && filter.matches(&r.tags))
                .collect())
        }
        None if repo_paths.is_some() => Ok(records.iter().filter(|r| in_repo(r)).collect()),
        None => Err(RegistryError::Usage("tags not specified".into())),
    }
}

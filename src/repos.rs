// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Repository registration - the durable `repos.json` list and the parsed
//! repositories it points at

use crate::error::{Outcome, RegistryError, Result, Warning, WarningCode};
use crate::meta::{self, Descriptor, MetaFormat};
use crate::prompt::Prompt;
use crate::types::{is_uid, new_uid, RepoDep, RepoMeta, Repository, LOCAL_REPO_ALIAS};
use crate::vcs::{self, Credentials, Vcs};
use serde_json::Value;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// File holding the durable list of repository roots
pub const REPOS_FILE: &str = "repos.json";

/// Result of checking a candidate repository against the registered ones
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    /// No registered repository shares the uid
    None,
    /// Same uid at the same path is already registered
    Identical,
    /// Same uid registered from a different path
    SameUid {
        /// Path of the existing registrant
        existing: PathBuf,
    },
}

/// Parameters of a repository pull
#[derive(Debug, Clone, Default)]
pub struct PullRequest {
    /// URL or `owner@name` shorthand
    pub url: String,
    /// Branch to clone
    pub branch: Option<String>,
    /// Commit or ref to check out afterwards
    pub checkout: Option<String>,
    /// Release tag to check out afterwards
    pub tag: Option<String>,
    /// Access credentials
    pub credentials: Option<Credentials>,
    /// Leave an existing registrant with the same uid alone
    pub ignore_on_conflict: bool,
}

impl PullRequest {
    /// Pull `url` with no extra options
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    fn from_dep(dep: &RepoDep) -> Self {
        Self {
            url: dep.url.clone(),
            branch: dep.branch.clone(),
            checkout: dep.checkout.clone(),
            ignore_on_conflict: dep.is_alias_okay,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<()> {
        let selectors = [&self.branch, &self.checkout, &self.tag]
            .iter()
            .filter(|s| s.is_some())
            .count();
        if selectors > 1 {
            return Err(RegistryError::Usage(
                "only one of branch, checkout and tag can be specified".into(),
            ));
        }
        Ok(())
    }
}

/// What a pull did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    /// Newly registered
    Registered {
        /// Repository root
        path: PathBuf,
    },
    /// Already registered at the same path
    AlreadyRegistered {
        /// Repository root
        path: PathBuf,
    },
    /// Replaced an older registrant with the same uid
    Replaced {
        /// Unregistered path
        old: PathBuf,
        /// Newly registered path
        new: PathBuf,
    },
    /// Same uid already registered elsewhere and the conflict was ignored
    IgnoredConflict {
        /// Existing registrant
        existing: PathBuf,
        /// Pulled path left unregistered
        path: PathBuf,
    },
    /// Tracked files were modified; nothing was fetched
    LocalChanges {
        /// Repository root
        path: PathBuf,
        /// Porcelain status output
        changes: String,
    },
    /// Pulled but could not be registered
    NotRegistered {
        /// Repository root
        path: PathBuf,
        /// Why registration was skipped
        reason: String,
    },
}

impl PullOutcome {
    /// Warning to surface for outcomes that need the caller's attention
    #[must_use]
    pub fn warning(&self) -> Option<Warning> {
        match self {
            Self::LocalChanges { path, .. } => Some(Warning::new(
                WarningCode::LocalChanges,
                format!("local changes detected in {}, skipping the pull", path.display()),
            )),
            Self::NotRegistered { path, reason } => Some(Warning::new(
                WarningCode::NotRegistered,
                format!("{} pulled but not registered: {}", path.display(), reason),
            )),
            Self::Replaced { old, new } => Some(Warning::new(
                WarningCode::Replaced,
                format!("{} is registered and {} is unregistered", new.display(), old.display()),
            )),
            _ => None,
        }
    }
}

/// Registered repositories backed by `repos.json`
pub struct RepoRegistry {
    /// Folder holding `repos.json`, the index snapshots and pulled repositories
    root: PathBuf,
    /// Parsed repositories, in registration order
    repos: Vec<Repository>,
    /// Root of the repository aliased `local`
    local: Option<PathBuf>,
    /// Registered repository containing the working directory
    current: Option<PathBuf>,
    /// Repositories whose dependencies are being pulled
    pending: Vec<PathBuf>,
    vcs: Box<dyn Vcs>,
}

impl std::fmt::Debug for RepoRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoRegistry")
            .field("root", &self.root)
            .field("repos", &self.repos)
            .field("local", &self.local)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl RepoRegistry {
    /// Open the registry rooted at `root`, creating the local repository and
    /// `repos.json` on first use
    pub fn open(root: &Path, vcs: Box<dyn Vcs>) -> Result<Self> {
        fs::create_dir_all(root).map_err(|e| RegistryError::io(root, e))?;
        let root = fs::canonicalize(root).map_err(|e| RegistryError::io(root, e))?;
        let mut registry = Self {
            root,
            repos: Vec::new(),
            local: None,
            current: None,
            pending: Vec::new(),
            vcs,
        };
        registry.bootstrap()?;
        registry.load()?;
        if let Ok(cwd) = std::env::current_dir() {
            registry.locate_current(&cwd);
        }
        Ok(registry)
    }

    fn bootstrap(&self) -> Result<()> {
        let local = self.root.join(LOCAL_REPO_ALIAS);
        fs::create_dir_all(&local).map_err(|e| RegistryError::io(&local, e))?;

        if MetaFormat::existing(&local).is_none() {
            let meta = RepoMeta {
                alias: LOCAL_REPO_ALIAS.into(),
                uid: Some(new_uid()),
                name: Some("Depot local repository".into()),
                ..RepoMeta::default()
            };
            write_repo_meta(&local, &meta)?;
        }

        let list_file = self.list_file();
        if !list_file.exists() {
            self.write_list(&[local.clone()])?;
            info!("Created {} with the local repository {}", list_file.display(), local.display());
        }

        let cache = local.join("cache");
        fs::create_dir_all(&cache).map_err(|e| RegistryError::io(&cache, e))?;
        Ok(())
    }

    /// Folder holding `repos.json`
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of `repos.json`
    #[must_use]
    pub fn list_file(&self) -> PathBuf {
        self.root.join(REPOS_FILE)
    }

    /// Registered repositories
    #[must_use]
    pub fn repos(&self) -> &[Repository] {
        &self.repos
    }

    /// The repository aliased `local`
    #[must_use]
    pub fn local(&self) -> Option<&Repository> {
        self.local.as_deref().and_then(|p| self.get(p))
    }

    /// The registered repository containing the working directory
    #[must_use]
    pub fn current(&self) -> Option<&Repository> {
        self.current.as_deref().and_then(|p| self.get(p))
    }

    /// Registered repository rooted at `path`
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<&Repository> {
        self.repos.iter().find(|r| r.path == path)
    }

    /// Record which registered repository contains `cwd`
    pub fn locate_current(&mut self, cwd: &Path) {
        let cwd = fs::canonicalize(cwd).unwrap_or_else(|_| cwd.to_path_buf());
        self.current = self
            .repos
            .iter()
            .filter(|r| cwd.starts_with(&r.path))
            .max_by_key(|r| r.path.components().count())
            .map(|r| r.path.clone());
    }

    // =========================================================================
    // Durable list
    // =========================================================================

    fn read_list(&self) -> Result<Vec<PathBuf>> {
        let path = self.list_file();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&path).map_err(|e| RegistryError::io(&path, e))?;
        let entries: Vec<String> =
            serde_json::from_str(&text).map_err(|e| RegistryError::Parse {
                path: path.clone(),
                message: e.to_string(),
            })?;
        Ok(entries
            .iter()
            .map(|e| e.trim())
            .filter(|e| !e.is_empty())
            .map(PathBuf::from)
            .collect())
    }

    fn write_list(&self, paths: &[PathBuf]) -> Result<()> {
        let path = self.list_file();
        let entries: Vec<String> = paths.iter().map(|p| p.to_string_lossy().into_owned()).collect();
        let json = serde_json::to_string_pretty(&entries).map_err(|e| RegistryError::Parse {
            path: path.clone(),
            message: e.to_string(),
        })?;
        fs::write(&path, json).map_err(|e| RegistryError::io(&path, e))
    }

    /// Re-read `repos.json` and every repository descriptor
    ///
    /// Entries whose folder vanished are dropped from the durable list;
    /// entries without a descriptor are skipped but kept.
    pub fn load(&mut self) -> Result<()> {
        let listed = self.read_list()?;
        let listed_len = listed.len();
        let mut kept = Vec::with_capacity(listed.len());
        let mut repos = Vec::new();
        let mut local = None;

        for path in listed {
            if !path.exists() {
                warn!("{} not found, removing the stale entry from {}", path.display(), REPOS_FILE);
                continue;
            }
            kept.push(path.clone());

            match read_repo_meta(&path) {
                Ok(Some(meta)) => {
                    if meta.alias == LOCAL_REPO_ALIAS {
                        local = Some(path.clone());
                    }
                    repos.push(Repository { path, meta });
                }
                Ok(None) => warn!(
                    "No meta.yaml in {}; re-clone it or remove it with `rm repo`. Skipping",
                    path.display()
                ),
                Err(err) => warn!("Skipping repository {}: {}", path.display(), err),
            }
        }

        if kept.len() != listed_len {
            self.write_list(&kept)?;
        }

        self.repos = repos;
        self.local = local;
        Ok(())
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register `path`, pulling the repositories listed in `meta.deps` first
    pub fn register(&mut self, path: &Path, meta: RepoMeta) -> Result<()> {
        if !meta.deps.is_empty() {
            self.pending.push(path.to_path_buf());
            let deps = meta.deps.clone();
            let pulled: Result<Vec<PullOutcome>> =
                deps.iter().map(|dep| self.pull(&PullRequest::from_dep(dep))).collect();
            self.pending.retain(|p| p != path);
            for outcome in pulled? {
                debug!("Dependency of {}: {:?}", path.display(), outcome);
            }
        }

        let mut list = self.read_list()?;
        if list.iter().any(|p| p == path) {
            debug!("{} already listed in {}", path.display(), REPOS_FILE);
        } else {
            list.push(path.to_path_buf());
            self.write_list(&list)?;
            info!("Added new repo path: {}", path.display());
        }

        if meta.alias == LOCAL_REPO_ALIAS {
            self.local = Some(path.to_path_buf());
        }
        let repo = Repository {
            path: path.to_path_buf(),
            meta,
        };
        match self.repos.iter_mut().find(|r| r.path == path) {
            Some(existing) => *existing = repo,
            None => self.repos.push(repo),
        }
        Ok(())
    }

    /// Remove `path` from the durable list; returns whether it was listed
    pub fn unregister(&mut self, path: &Path) -> Result<bool> {
        let mut list = self.read_list()?;
        let before = list.len();
        list.retain(|p| p != path);
        let removed = list.len() < before;
        if removed {
            self.write_list(&list)?;
            info!("Unregistered {}", path.display());
        } else {
            info!("{} is not listed in {}, nothing to unregister", path.display(), REPOS_FILE);
        }

        self.repos.retain(|r| r.path != path);
        if self.local.as_deref() == Some(path) {
            self.local = None;
        }
        if self.current.as_deref() == Some(path) {
            self.current = None;
        }
        Ok(removed)
    }

    /// Compare a candidate descriptor at `path` with the registered repositories
    pub fn conflict(&self, candidate: &RepoMeta, path: &Path) -> Result<Conflict> {
        for repo in &self.repos {
            let Some(uid) = repo.meta.uid.as_deref().filter(|u| !u.is_empty()) else {
                return Err(RegistryError::MissingRepoUid(repo.path.clone()));
            };
            if candidate.uid.as_deref() == Some(uid) {
                if repo.path == path {
                    return Ok(Conflict::Identical);
                }
                return Ok(Conflict::SameUid {
                    existing: repo.path.clone(),
                });
            }
        }
        Ok(Conflict::None)
    }

    // =========================================================================
    // Pull
    // =========================================================================

    /// Clone or fast-forward a repository and register it
    pub fn pull(&mut self, request: &PullRequest) -> Result<PullOutcome> {
        request.validate()?;

        let mut url = vcs::canonical_url(&request.url);
        if let Some(credentials) = &request.credentials {
            url = vcs::with_credentials(&url, credentials);
        }
        let path = self.root.join(vcs::folder_name_for_url(&url));

        if self.pending.contains(&path) {
            return Ok(PullOutcome::NotRegistered {
                path,
                reason: "dependency cycle, already being pulled".into(),
            });
        }

        if path.exists() {
            info!("Repository already exists at {}. Checking for local changes", path.display());
            let changes = self.vcs.local_changes(&path)?;
            if !changes.is_empty() {
                warn!("Local changes in {}; commit or stash them before pulling", path.display());
                return Ok(PullOutcome::LocalChanges { path, changes });
            }
            self.vcs.pull(&path)?;
        } else {
            info!("Cloning repository {} to {}", request.url, path.display());
            self.vcs.clone_repo(&url, &path, request.branch.as_deref())?;
        }

        let rev = request
            .tag
            .as_ref()
            .map(|t| format!("tags/{t}"))
            .or_else(|| request.checkout.clone());
        if let Some(rev) = rev {
            info!("Checking out {} in {}", rev, path.display());
            self.vcs.checkout(&path, &rev)?;
        }

        let Some(meta) = read_repo_meta(&path)? else {
            warn!("meta.yaml not found in {}. Pulled but not registered", path.display());
            return Ok(PullOutcome::NotRegistered {
                path,
                reason: "no meta.yaml".into(),
            });
        };
        if meta.uid.as_deref().map_or(true, str::is_empty) {
            warn!("uid not found in meta.yaml at {}. Pulled but not registered", path.display());
            return Ok(PullOutcome::NotRegistered {
                path,
                reason: "no uid in meta.yaml".into(),
            });
        }

        match self.conflict(&meta, &path)? {
            Conflict::None => {
                self.register(&path, meta)?;
                Ok(PullOutcome::Registered { path })
            }
            Conflict::Identical => {
                debug!("{} is already registered", path.display());
                Ok(PullOutcome::AlreadyRegistered { path })
            }
            Conflict::SameUid { existing } if request.ignore_on_conflict => {
                debug!("{} shares its uid with {}, ignoring the pull", path.display(), existing.display());
                Ok(PullOutcome::IgnoredConflict { existing, path })
            }
            Conflict::SameUid { existing } => {
                warn!(
                    "The pulled repository conflicts with the one registered at {}",
                    existing.display()
                );
                self.unregister(&existing)?;
                self.register(&path, meta)?;
                warn!("{} is registered and {} is unregistered", path.display(), existing.display());
                Ok(PullOutcome::Replaced {
                    old: existing,
                    new: path,
                })
            }
        }
    }

    /// Pull every registered repository that is a git checkout
    pub fn pull_all(&mut self) -> Result<Vec<PullOutcome>> {
        let names: Vec<String> = self
            .repos
            .iter()
            .filter(|r| r.path.join(".git").exists())
            .map(Repository::folder_name)
            .collect();
        names
            .into_iter()
            .map(|name| self.pull(&PullRequest::new(name)))
            .collect()
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Resolve an alias, `owner@name`, uid, `alias,uid` or URL to repositories
    pub fn find_by_identifier(&self, identifier: &str) -> Result<Vec<&Repository>> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(RegistryError::Usage(
                "a repository is given as <owner>@<name>, <url>, <uid>, <alias> or <alias>,<uid>".into(),
            ));
        }

        let (alias, uid) = if let Some((a, u)) = identifier.split_once(',') {
            (non_empty(a), non_empty(u))
        } else if is_uid(identifier) {
            (None, Some(identifier.to_string()))
        } else if vcs::is_url(identifier) {
            (Some(vcs::folder_name_for_url(identifier)), None)
        } else {
            (Some(identifier.to_string()), None)
        };

        let by_uid: Vec<&Repository> = match &uid {
            Some(u) => self.repos.iter().filter(|r| r.meta.uid.as_deref() == Some(u)).collect(),
            None => Vec::new(),
        };
        let by_alias: Vec<&Repository> = match &alias {
            Some(a) => self
                .repos
                .iter()
                .filter(|r| &r.meta.alias == a || &r.folder_name() == a)
                .collect(),
            None => Vec::new(),
        };

        match (&alias, &uid) {
            (Some(a), Some(u)) => {
                if by_uid.is_empty() && by_alias.is_empty() {
                    return Err(RegistryError::NotFound(format!(
                        "no repository with alias '{a}' and no repository with UID '{u}'"
                    )));
                }
                if !by_uid.is_empty()
                    && !by_alias.is_empty()
                    && !by_uid.iter().any(|r| by_alias.contains(r))
                {
                    return Err(RegistryError::Usage(format!(
                        "alias '{a}' and UID '{u}' refer to different repositories"
                    )));
                }
                let mut found = by_uid;
                for repo in by_alias {
                    if !found.contains(&repo) {
                        found.push(repo);
                    }
                }
                Ok(found)
            }
            (None, Some(u)) if by_uid.is_empty() => Err(RegistryError::NotFound(format!(
                "no repository with UID '{u}'"
            ))),
            (Some(a), None) if by_alias.is_empty() => Err(RegistryError::NotFound(format!(
                "no repository with alias '{a}'"
            ))),
            (None, Some(_)) => Ok(by_uid),
            _ => Ok(by_alias),
        }
    }

    // =========================================================================
    // Local add / remove
    // =========================================================================

    /// Create and register a repository from a name, path or URL
    pub fn add(&mut self, spec: &str) -> Result<Repository> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(RegistryError::Usage("the repository to add is not specified".into()));
        }

        let given = Path::new(spec);
        let folder = if vcs::is_url(spec) {
            vcs::folder_name_for_url(spec)
        } else {
            crate::types::folder_name(given)
        };
        let managed = self.root.join(&folder);

        if managed.exists() || self.repos.iter().any(|r| r.path == given) {
            return Err(RegistryError::Conflict(format!(
                "repo {spec} already exists at {}",
                managed.display()
            )));
        }

        let path = if given.is_dir() {
            fs::canonicalize(given).map_err(|e| RegistryError::io(given, e))?
        } else {
            fs::create_dir_all(&managed).map_err(|e| RegistryError::io(&managed, e))?;
            managed
        };
        info!("New repo path: {}", path.display());

        let meta = match read_repo_meta(&path)? {
            Some(meta) => meta,
            None => {
                let meta = RepoMeta {
                    alias: folder,
                    uid: Some(new_uid()),
                    git: Some(true),
                    ..RepoMeta::default()
                };
                write_repo_meta(&path, &meta)?;
                meta
            }
        };

        self.register(&path, meta.clone())?;
        Ok(Repository { path, meta })
    }

    /// Delete a repository folder and unregister it
    ///
    /// `identifier` resolves like [`Self::find_by_identifier`], as the path of a
    /// registered repository, or as a folder name directly under the root.
    /// The local repository is refused in every form.
    pub fn remove(&mut self, identifier: &str, force: bool, prompt: &dyn Prompt) -> Result<Outcome> {
        let path = self.removal_target(identifier)?;
        if self.is_local(&path) {
            return Err(RegistryError::Usage("the local repository cannot be removed".into()));
        }

        if !path.exists() {
            warn!("{} not found on disk; dropping any stale registration", path.display());
            self.unregister(&path)?;
            return Ok(Outcome::warning(Warning::new(
                WarningCode::EmptyTarget,
                format!("repository {identifier} not found"),
            )));
        }

        let changes = if path.join(".git").exists() {
            self.vcs.local_changes(&path)?
        } else {
            String::new()
        };
        if !changes.is_empty() && !force {
            warn!("Local changes detected in {}:\n{}", path.display(), changes);
            if !prompt.confirm("Continue to remove repo?") {
                info!("Removal of {} cancelled", path.display());
                return Ok(Outcome::warning(Warning::new(
                    WarningCode::Cancelled,
                    "rm repo cancelled by user",
                )));
            }
        }

        fs::remove_dir_all(&path).map_err(|e| RegistryError::io(&path, e))?;
        info!("Repository at {} removed", path.display());
        self.unregister(&path)?;
        Ok(Outcome::message(format!("repository at {} removed", path.display())))
    }
}

impl RepoRegistry {
    fn removal_target(&self, identifier: &str) -> Result<PathBuf> {
        if let Ok(found) = self.find_by_identifier(identifier) {
            if let Some(repo) = found.first() {
                return Ok(repo.path.clone());
            }
        }

        let given = Path::new(identifier.trim());
        if given.is_absolute() {
            let given = fs::canonicalize(given).unwrap_or_else(|_| given.to_path_buf());
            return match self.get(&given) {
                Some(repo) => Ok(repo.path.clone()),
                None => Err(RegistryError::Usage(format!(
                    "{} is not a registered repository",
                    given.display()
                ))),
            };
        }

        let name = identifier.trim();
        let mut components = given.components();
        let plain = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) && !name.contains(['/', '\\']);
        if !plain {
            return Err(RegistryError::Usage(format!(
                "{name} is neither a registered repository nor a folder in {}",
                self.root.display()
            )));
        }

        let path = self.root.join(name);
        if path.exists() {
            let resolved = fs::canonicalize(&path).map_err(|e| RegistryError::io(&path, e))?;
            if !resolved.starts_with(&self.root) {
                return Err(RegistryError::Usage(format!(
                    "{} resolves outside {}",
                    path.display(),
                    self.root.display()
                )));
            }
        }
        Ok(path)
    }

    fn is_local(&self, path: &Path) -> bool {
        let resolved = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if self.local.as_deref() == Some(resolved.as_path()) {
            return true;
        }
        match self.get(&resolved) {
            Some(repo) => repo.meta.alias == LOCAL_REPO_ALIAS,
            None => read_repo_meta(&resolved)
                .ok()
                .flatten()
                .is_some_and(|meta| meta.alias == LOCAL_REPO_ALIAS),
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Parse the descriptor at a repository root
pub fn read_repo_meta(path: &Path) -> Result<Option<RepoMeta>> {
    let Some((descriptor, format)) = meta::load(path)? else {
        return Ok(None);
    };
    serde_json::from_value(Value::Object(descriptor.0))
        .map(Some)
        .map_err(|e| RegistryError::Parse {
            path: path.join(format.file_name()),
            message: e.to_string(),
        })
}

fn write_repo_meta(path: &Path, meta: &RepoMeta) -> Result<()> {
    let value = serde_json::to_value(meta).map_err(|e| RegistryError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let descriptor = match value {
        Value::Object(map) => Descriptor(map),
        _ => Descriptor::new(),
    };
    meta::save(path, &descriptor, MetaFormat::Yaml).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::AssumeAnswer;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;
    use tempfile::TempDir;

    /// Clones by writing the descriptor registered for the URL
    #[derive(Default)]
    struct FakeVcs {
        remotes: RefCell<HashMap<String, String>>,
        dirty: RefCell<Vec<PathBuf>>,
        calls: RefCell<Vec<String>>,
    }

    impl FakeVcs {
        fn remote(&self, url: &str, meta_yaml: &str) {
            self.remotes.borrow_mut().insert(url.into(), meta_yaml.into());
        }
    }

    impl Vcs for FakeVcs {
        fn clone_repo(&self, url: &str, dest: &Path, _branch: Option<&str>) -> Result<()> {
            self.calls.borrow_mut().push(format!("clone {url}"));
            let remotes = self.remotes.borrow();
            let meta = remotes.get(url).ok_or_else(|| RegistryError::ExternalTool {
                command: format!("git clone {url}"),
                stderr: "repository not found".into(),
            })?;
            fs::create_dir_all(dest.join(".git")).unwrap();
            fs::write(dest.join("meta.yaml"), meta).unwrap();
            Ok(())
        }

        fn local_changes(&self, repo: &Path) -> Result<String> {
            Ok(if self.dirty.borrow().iter().any(|p| p == repo) {
                " M script/x/meta.yaml".into()
            } else {
                String::new()
            })
        }

        fn pull(&self, repo: &Path) -> Result<()> {
            self.calls.borrow_mut().push(format!("pull {}", repo.display()));
            Ok(())
        }

        fn checkout(&self, _repo: &Path, rev: &str) -> Result<()> {
            self.calls.borrow_mut().push(format!("checkout {rev}"));
            Ok(())
        }
    }

    fn open(tmp: &TempDir, vcs: &Rc<FakeVcs>) -> RepoRegistry {
        RepoRegistry::open(&tmp.path().join("repos"), Box::new(Rc::clone(vcs))).unwrap()
    }

    #[test]
    fn test_bootstrap_creates_local_repo() {
        let tmp = TempDir::new().unwrap();
        let registry = open(&tmp, &Rc::new(FakeVcs::default()));

        let local = registry.local().expect("local repo");
        assert_eq!(local.meta.alias, "local");
        assert!(local.meta.uid.as_deref().is_some_and(is_uid));
        assert!(local.path.join("cache").is_dir());
        assert_eq!(registry.repos().len(), 1);
    }

    #[test]
    fn test_load_drops_vanished_entries() {
        let tmp = TempDir::new().unwrap();
        let vcs = Rc::new(FakeVcs::default());
        let mut registry = open(&tmp, &vcs);
        let gone = tmp.path().join("gone");
        let mut list = registry.read_list().unwrap();
        list.push(gone.clone());
        registry.write_list(&list).unwrap();

        registry.load().unwrap();

        assert!(!registry.read_list().unwrap().contains(&gone));
    }

    #[test]
    fn test_load_keeps_entries_without_descriptor() {
        let tmp = TempDir::new().unwrap();
        let vcs = Rc::new(FakeVcs::default());
        let mut registry = open(&tmp, &vcs);
        let bare = tmp.path().join("bare");
        fs::create_dir_all(&bare).unwrap();
        let mut list = registry.read_list().unwrap();
        list.push(bare.clone());
        registry.write_list(&list).unwrap();

        registry.load().unwrap();

        assert!(registry.read_list().unwrap().contains(&bare));
        assert!(registry.get(&bare).is_none());
    }

    #[test]
    fn test_pull_registers_clone() {
        let tmp = TempDir::new().unwrap();
        let vcs = Rc::new(FakeVcs::default());
        vcs.remote("https://github.com/acme/tools.git", "alias: acme@tools\nuid: 1234567890abcdef\n");
        let mut registry = open(&tmp, &vcs);

        let outcome = registry.pull(&PullRequest::new("acme@tools")).unwrap();

        let path = registry.root().join("acme@tools");
        assert_eq!(outcome, PullOutcome::Registered { path: path.clone() });
        assert!(registry.get(&path).is_some());
        assert_eq!(registry.find_by_identifier("acme@tools").unwrap().len(), 1);
    }

    #[test]
    fn test_pull_twice_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let vcs = Rc::new(FakeVcs::default());
        vcs.remote("https://github.com/acme/tools.git", "alias: acme@tools\nuid: 1234567890abcdef\n");
        let mut registry = open(&tmp, &vcs);

        registry.pull(&PullRequest::new("acme@tools")).unwrap();
        let second = registry.pull(&PullRequest::new("acme@tools")).unwrap();

        assert!(matches!(second, PullOutcome::AlreadyRegistered { .. }));
        assert_eq!(registry.repos().len(), 2);
    }

    #[test]
    fn test_pull_rejects_multiple_selectors() {
        let tmp = TempDir::new().unwrap();
        let mut registry = open(&tmp, &Rc::new(FakeVcs::default()));
        let request = PullRequest {
            branch: Some("dev".into()),
            tag: Some("v1".into()),
            ..PullRequest::new("acme@tools")
        };

        let err = registry.pull(&request).unwrap_err();
        assert_eq!(err.code(), "USAGE");
    }

    #[test]
    fn test_pull_skips_dirty_tree() {
        let tmp = TempDir::new().unwrap();
        let vcs = Rc::new(FakeVcs::default());
        vcs.remote("https://github.com/acme/tools.git", "alias: acme@tools\nuid: 1234567890abcdef\n");
        let mut registry = open(&tmp, &vcs);
        registry.pull(&PullRequest::new("acme@tools")).unwrap();
        vcs.dirty.borrow_mut().push(registry.root().join("acme@tools"));

        let outcome = registry.pull(&PullRequest::new("acme@tools")).unwrap();

        assert!(matches!(outcome, PullOutcome::LocalChanges { .. }));
        assert!(!vcs.calls.borrow().iter().any(|c| c.starts_with("pull")));
    }

    #[test]
    fn test_pull_tag_checks_out_tag_ref() {
        let tmp = TempDir::new().unwrap();
        let vcs = Rc::new(FakeVcs::default());
        vcs.remote("https://github.com/acme/tools.git", "alias: acme@tools\nuid: 1234567890abcdef\n");
        let mut registry = open(&tmp, &vcs);

        let request = PullRequest {
            tag: Some("v1.2".into()),
            ..PullRequest::new("acme@tools")
        };
        registry.pull(&request).unwrap();

        assert!(vcs.calls.borrow().contains(&"checkout tags/v1.2".to_string()));
    }

    #[test]
    fn test_clone_failure_is_external_tool_error() {
        let tmp = TempDir::new().unwrap();
        let mut registry = open(&tmp, &Rc::new(FakeVcs::default()));

        let err = registry.pull(&PullRequest::new("acme@missing")).unwrap_err();
        assert_eq!(err.code(), "EXTERNAL_TOOL");
        assert!(err.to_string().contains("repository not found"));
    }

    #[test]
    fn test_register_pulls_dependencies_first() {
        let tmp = TempDir::new().unwrap();
        let vcs = Rc::new(FakeVcs::default());
        vcs.remote("https://github.com/acme/base.git", "alias: acme@base\nuid: bbbbbbbbbbbbbbbb\n");
        vcs.remote(
            "https://github.com/acme/app.git",
            "alias: acme@app\nuid: cccccccccccccccc\ndeps:\n  - url: acme@base\n",
        );
        let mut registry = open(&tmp, &vcs);

        registry.pull(&PullRequest::new("acme@app")).unwrap();

        let list = registry.read_list().unwrap();
        let base = list.iter().position(|p| p.ends_with("acme@base")).unwrap();
        let app = list.iter().position(|p| p.ends_with("acme@app")).unwrap();
        assert!(base < app);
    }

    #[test]
    fn test_conflict_with_uidless_registrant_is_data_error() {
        let tmp = TempDir::new().unwrap();
        let vcs = Rc::new(FakeVcs::default());
        let mut registry = open(&tmp, &vcs);
        let odd = tmp.path().join("odd");
        fs::create_dir_all(&odd).unwrap();
        registry
            .register(&odd, RepoMeta { alias: "odd".into(), ..RepoMeta::default() })
            .unwrap();

        let candidate = RepoMeta {
            alias: "x".into(),
            uid: Some("dddddddddddddddd".into()),
            ..RepoMeta::default()
        };
        let err = registry.conflict(&candidate, &tmp.path().join("x")).unwrap_err();
        assert_eq!(err.code(), "MISSING_REPO_UID");
    }

    #[test]
    fn test_find_by_identifier_errors_name_the_half() {
        let tmp = TempDir::new().unwrap();
        let registry = open(&tmp, &Rc::new(FakeVcs::default()));

        let err = registry.find_by_identifier("ffffffffffffffff").unwrap_err();
        assert!(err.to_string().contains("UID 'ffffffffffffffff'"));

        let err = registry.find_by_identifier("nobody").unwrap_err();
        assert!(err.to_string().contains("alias 'nobody'"));

        let local_uid = registry.local().unwrap().meta.uid.clone().unwrap();
        let found = registry.find_by_identifier(&format!("local,{local_uid}")).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_find_by_url_uses_owner_at_name() {
        let tmp = TempDir::new().unwrap();
        let vcs = Rc::new(FakeVcs::default());
        vcs.remote("https://github.com/acme/tools.git", "alias: acme@tools\nuid: 1234567890abcdef\n");
        let mut registry = open(&tmp, &vcs);
        registry.pull(&PullRequest::new("acme@tools")).unwrap();

        let found = registry.find_by_identifier("https://github.com/acme/tools").unwrap();
        assert_eq!(found[0].meta.alias, "acme@tools");
    }

    #[test]
    fn test_add_and_remove_local_repo() {
        let tmp = TempDir::new().unwrap();
        let mut registry = open(&tmp, &Rc::new(FakeVcs::default()));

        let repo = registry.add("my-repo").unwrap();
        assert!(repo.path.join("meta.yaml").is_file());
        assert!(registry.add("my-repo").is_err());

        registry.remove("my-repo", false, &AssumeAnswer { yes: false }).unwrap();
        assert!(!repo.path.exists());
        assert!(registry.get(&repo.path).is_none());
    }

    #[test]
    fn test_local_repo_cannot_be_removed() {
        let tmp = TempDir::new().unwrap();
        let mut registry = open(&tmp, &Rc::new(FakeVcs::default()));
        let err = registry.remove("local", true, &AssumeAnswer { yes: true }).unwrap_err();
        assert_eq!(err.code(), "USAGE");

        let local_path = registry.local().unwrap().path.to_string_lossy().into_owned();
        let err = registry.remove(&local_path, true, &AssumeAnswer { yes: true }).unwrap_err();
        assert_eq!(err.code(), "USAGE");
        assert!(registry.local().unwrap().path.join("meta.yaml").is_file());
    }

    #[test]
    fn test_remove_stays_inside_root() {
        let tmp = TempDir::new().unwrap();
        let mut registry = open(&tmp, &Rc::new(FakeVcs::default()));
        let victim = tmp.path().join("victim");
        fs::create_dir_all(&victim).unwrap();
        fs::write(victim.join("precious.txt"), "keep").unwrap();

        let absolute = victim.to_string_lossy().into_owned();
        for identifier in [absolute.as_str(), "../victim", "local/../../victim"] {
            let err = registry.remove(identifier, true, &AssumeAnswer { yes: true }).unwrap_err();
            assert_eq!(err.code(), "USAGE", "{identifier}");
        }
        assert!(victim.join("precious.txt").is_file());

        let stray = registry.root().join("stray");
        fs::create_dir_all(&stray).unwrap();
        registry.remove("stray", true, &AssumeAnswer { yes: true }).unwrap();
        assert!(!stray.exists());
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Registry facade - add, rm, cp, mv, update and search over items
//!
//! Every mutation writes the descriptor first and touches the index only
//! once the filesystem step succeeded, so a failed operation leaves the
//! index as it was.

use crate::automation::{Action, AutomationRegistry, RunArgs, RunResult};
use crate::config::Config;
use crate::error::{Outcome, RegistryError, Result, Warning, WarningCode};
use crate::index::Index;
use crate::meta::{Descriptor, Item, MergeOptions, MetaFormat};
use crate::prompt::Prompt;
use crate::repos::{PullOutcome, PullRequest, RepoRegistry};
use crate::resolver::{self, Query};
use crate::types::{dedup_tags, is_uid, new_uid, split_list, IndexRecord, ItemClass, Repository};
use crate::vcs::{GitCli, Vcs};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Characters of the extra-tag suffix kept in cache folder names
const EXTRA_TAGS_SUFFIX_LEN: usize = 15;

/// Input of [`Registry::add`]
#[derive(Debug, Clone, Default)]
pub struct AddRequest {
    /// `alias` or `alias,uid`, optionally prefixed with `repo:`
    pub item: Option<String>,
    /// Destination repository; the local repository when absent
    pub item_repo: Option<String>,
    /// Comma-separated tags; defaults to the tags in `meta`
    pub tags: Option<String>,
    /// Comma-separated tags added on top of `tags`
    pub new_tags: Option<String>,
    /// Extra descriptor fields
    pub meta: Descriptor,
    /// Script the cache or experiment belongs to, used in the folder name
    pub script_alias: Option<String>,
    /// Comma-separated tags shortened into the folder name suffix
    pub extra_tags: Option<String>,
    /// Descriptor format to write
    pub format: MetaFormat,
}

/// Input of [`Registry::cp`] and [`Registry::mv`]
#[derive(Debug, Clone, Default)]
pub struct CopyRequest {
    /// Source as `[repo:]name`
    pub src: Option<String>,
    /// Source tag expression when `src` is absent
    pub src_tags: Option<String>,
    /// Destination as `[repo:]name`; `.` names the current repository
    pub dest: String,
    /// Uid for the copy; generated when absent
    pub uid: Option<String>,
    /// Replacement tag list for the copy
    pub tags: Option<String>,
    /// Take the first candidate instead of asking
    pub quiet: bool,
}

/// Input of [`Registry::update`]
#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    /// Item to update as `[repo:]alias[,uid]`
    pub item: Option<String>,
    /// Tag expression selecting the items to update
    pub search_tags: Option<String>,
    /// Tags merged into the found items
    pub tags: Option<String>,
    /// Repository used when nothing matches and the item is added
    pub item_repo: Option<String>,
    /// Descriptor fields deep-merged into the found items
    pub meta: Descriptor,
    /// Replace lists instead of appending to them
    pub replace_lists: bool,
}

/// The top-level registry
pub struct Registry {
    repos: RepoRegistry,
    index: Index,
    prompt: Box<dyn Prompt>,
    automations: AutomationRegistry,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("repos", &self.repos)
            .field("automations", &self.automations)
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Open the registry described by `config`, using the git CLI
    pub fn open(config: &Config, prompt: Box<dyn Prompt>) -> Result<Self> {
        let vcs = GitCli::new(config.git_program.clone());
        Self::with_parts(&config.repos_path, prompt, Box::new(vcs))
    }

    /// Open the registry rooted at `root` with explicit collaborators
    pub fn with_parts(root: &Path, prompt: Box<dyn Prompt>, vcs: Box<dyn Vcs>) -> Result<Self> {
        let repos = RepoRegistry::open(root, vcs)?;
        let index = Index::build(repos.root(), repos.repos());
        Ok(Self {
            repos,
            index,
            prompt,
            automations: AutomationRegistry::with_builtins(),
        })
    }

    /// Registered repositories
    #[must_use]
    pub fn repos(&self) -> &RepoRegistry {
        &self.repos
    }

    /// The item index
    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Automation plugins, for registering additional ones
    pub fn automations_mut(&mut self) -> &mut AutomationRegistry {
        &mut self.automations
    }

    /// Record which registered repository the `.` qualifier refers to
    pub fn locate_current(&mut self, cwd: &Path) {
        self.repos.locate_current(cwd);
    }

    /// Rebuild the index from every registered repository
    pub fn reindex(&mut self) {
        self.index = Index::build(self.repos.root(), self.repos.repos());
    }

    /// Index records matching `query`
    pub fn find(&self, class: ItemClass, query: &Query) -> Result<Vec<IndexRecord>> {
        let found = resolver::resolve(&self.index, &self.repos, class, query)?;
        Ok(found.into_iter().cloned().collect())
    }

    // =========================================================================
    // Read operations
    // =========================================================================

    /// Items matching `query`, with their descriptors
    pub fn search(&self, class: ItemClass, query: &Query) -> Result<Outcome> {
        let items: Vec<Item> = self.find(class, query)?.iter().map(Item::from_record).collect();
        debug!("{} {} item(s) found", items.len(), class);
        Ok(Outcome::items(items))
    }

    /// Items matching `query`, keeping only `keys` of each descriptor
    ///
    /// Unlike [`Registry::search`], nothing found is an error.
    pub fn show(&self, class: ItemClass, query: &Query, keys: &[String]) -> Result<Outcome> {
        let mut items: Vec<Item> = self.find(class, query)?.iter().map(Item::from_record).collect();
        if items.is_empty() {
            return Err(RegistryError::NotFound(format!("no {class} matched the query")));
        }
        if !keys.is_empty() {
            for item in &mut items {
                item.meta.0.retain(|k, _| keys.contains(k));
            }
        }
        Ok(Outcome::items(items))
    }

    /// Every item of `class`
    pub fn list(&self, class: ItemClass) -> Result<Outcome> {
        self.search(class, &Query::all())
    }

    // =========================================================================
    // add
    // =========================================================================

    fn destination_repo(&self, repo: Option<&str>) -> Result<Repository> {
        match repo {
            Some(ident) => self
                .repos
                .find_by_identifier(ident)?
                .first()
                .map(|r| (*r).clone())
                .ok_or_else(|| RegistryError::NotFound(format!("repository {ident} is not registered"))),
            None => self
                .repos
                .local()
                .cloned()
                .ok_or_else(|| RegistryError::NotFound("the local repository is not registered".into())),
        }
    }

    fn unique_uid(&self, class: ItemClass) -> String {
        loop {
            let uid = new_uid();
            if !self.index.contains_uid(class, &uid) {
                return uid;
            }
        }
    }

    /// Create a new item directory with its descriptor and index it
    pub fn add(&mut self, class: ItemClass, request: &AddRequest) -> Result<Outcome> {
        let (qualifier, name, uid) = split_item(request.item.as_deref());
        let repo_ident = request.item_repo.as_deref().or(qualifier.as_deref());
        let repo = self.destination_repo(repo_ident)?;

        let uid = match uid {
            Some(uid) if self.index.contains_uid(class, &uid) => {
                return Err(RegistryError::Conflict(format!("{class} with uid {uid} already exists")));
            }
            Some(uid) => uid,
            None => self.unique_uid(class),
        };

        let folder = item_folder_name(
            class,
            name.as_deref(),
            &uid,
            request.script_alias.as_deref(),
            request.extra_tags.as_deref(),
        );
        check_folder_name(&folder)?;
        let path = repo.class_dir(class).join(&folder);
        if path.exists() {
            return Err(RegistryError::Conflict(format!("item exists at {}", path.display())));
        }
        fs::create_dir_all(&path).map_err(|e| RegistryError::io(&path, e))?;

        let mut meta = request.meta.clone();
        meta.set_alias(name.as_deref());
        meta.set_uid(&uid);
        let base_tags = match request.tags.as_deref() {
            Some(tags) => split_list(tags),
            None => meta.tags(),
        };
        let new_tags = request.new_tags.as_deref().map(split_list).unwrap_or_default();
        meta.set_tags(&dedup_tags(base_tags.into_iter().chain(new_tags)));

        let item = Item {
            path: path.clone(),
            repo: repo.to_ref(),
            meta,
            format: request.format,
        };
        if let Err(err) = item.save() {
            if let Err(cleanup) = fs::remove_dir_all(&path) {
                warn!("Could not remove {} after a failed add: {}", path.display(), cleanup);
            }
            return Err(err);
        }
        self.index.add(class, item.to_record()?);

        info!("Item successfully added at {}", path.display());
        Ok(Outcome {
            message: Some(format!("Item successfully added at {}", path.display())),
            items: vec![item],
            warnings: Vec::new(),
        })
    }

    // =========================================================================
    // rm
    // =========================================================================

    /// Delete the items matching `query`
    ///
    /// Several matches are confirmed once for the whole batch unless `force`.
    pub fn rm(&mut self, class: ItemClass, query: &Query, force: bool) -> Result<Outcome> {
        let query = if query.is_empty() {
            if class != ItemClass::Cache {
                return Err(RegistryError::Usage(format!("item not given for rm {class}")));
            }
            Query::all()
        } else {
            query.clone()
        };

        let found = self.find(class, &query)?;
        if found.is_empty() {
            let description = if query.fetch_all {
                format!("{class} is empty, nothing to delete")
            } else {
                format!("no {class} found for the given identifier")
            };
            warn!("{}", description);
            return Ok(Outcome::warning(Warning::new(WarningCode::EmptyTarget, description)));
        }

        if !force {
            let question = if found.len() > 1 {
                for record in &found {
                    info!("{}", record.path.display());
                }
                format!("{} items found. Do you want to delete them all?", found.len())
            } else {
                format!("Are you sure you want to delete the item at {}?", found[0].path.display())
            };
            if !self.prompt.confirm(&question) {
                info!("rm {} cancelled", class);
                return Ok(Outcome::warning(Warning::new(
                    WarningCode::Cancelled,
                    "rm cancelled by user",
                )));
            }
        }

        let mut removed = Vec::with_capacity(found.len());
        for record in &found {
            let item = Item::from_record(record);
            self.delete_item(class, record)?;
            removed.push(item);
        }

        Ok(Outcome {
            message: Some(format!("{} {} item(s) removed", removed.len(), class)),
            items: removed,
            warnings: Vec::new(),
        })
    }

    fn delete_item(&mut self, class: ItemClass, record: &IndexRecord) -> Result<()> {
        if record.path.exists() {
            fs::remove_dir_all(&record.path).map_err(|e| RegistryError::io(&record.path, e))?;
            info!("{} item at {} removed", class, record.path.display());
        } else {
            warn!("{} does not exist, dropping its index entry", record.path.display());
        }
        self.index.remove(class, &record.uid);
        Ok(())
    }

    // =========================================================================
    // cp / mv
    // =========================================================================

    fn choose_one(&self, class: ItemClass, found: Vec<IndexRecord>, what: &str, quiet: bool) -> Result<IndexRecord> {
        if found.is_empty() {
            return Err(RegistryError::NotFound(format!("no {class} found for {what}")));
        }
        let choice = if found.len() > 1 && !quiet {
            let options: Vec<String> = found.iter().map(|r| r.path.display().to_string()).collect();
            self.prompt
                .choose(&format!("More than one {class} found for {what}. Select the correct one"), &options)
        } else {
            0
        };
        found
            .into_iter()
            .nth(choice)
            .ok_or_else(|| RegistryError::Usage(format!("invalid selection {}", choice + 1)))
    }

    fn copy(&mut self, class: ItemClass, request: &CopyRequest) -> Result<(IndexRecord, Item)> {
        if class != ItemClass::Script {
            return Err(RegistryError::Usage(format!(
                "the {class} target is not supported for mv/cp actions"
            )));
        }

        let (query, what) = match (&request.src, &request.src_tags) {
            (Some(src), _) => (Query::from_identifier(src), src.clone()),
            (None, Some(tags)) => (Query::tags(tags.clone()), tags.clone()),
            (None, None) => {
                return Err(RegistryError::Usage("either src or src_tags must be provided for cp".into()));
            }
        };
        let found = self.find(class, &query)?;
        let source = self.choose_one(class, found, &what, request.quiet)?;

        let (dest_repo, dest_name) = match request.dest.split_once(':') {
            Some((".", name)) => {
                let repo = self.repos.current().cloned().ok_or_else(|| {
                    RegistryError::Usage(
                        "the current directory is not inside a registered repository, so \".:\" is not valid".into(),
                    )
                })?;
                (repo, name.trim().to_string())
            }
            Some((repo, name)) => (self.destination_repo(Some(repo.trim()))?, name.trim().to_string()),
            None => {
                let repo = self
                    .repos
                    .get(&source.repo.path)
                    .cloned()
                    .ok_or_else(|| RegistryError::NotFound(format!("repository {} is not registered", source.repo.alias)))?;
                (repo, request.dest.trim().to_string())
            }
        };
        check_folder_name(&dest_name)?;

        let uid = match &request.uid {
            Some(uid) if self.index.contains_uid(class, uid) => {
                return Err(RegistryError::Conflict(format!("{class} with uid {uid} already exists")));
            }
            Some(uid) => uid.clone(),
            None => self.unique_uid(class),
        };

        let dest_path = dest_repo.class_dir(class).join(&dest_name);
        if dest_path.exists() {
            return Err(RegistryError::Conflict(format!(
                "destination folder {} already exists",
                dest_path.display()
            )));
        }
        copy_tree(&source.path, &dest_path)?;
        info!("Folder successfully copied from {} to {}", source.path.display(), dest_path.display());

        let src_item = Item::from_record(&source);
        let mut meta = src_item.meta.clone();
        meta.set_alias(Some(&dest_name));
        meta.set_uid(&uid);
        if let Some(tags) = &request.tags {
            meta.set_tags(&dedup_tags(split_list(tags)));
        }
        let format = MetaFormat::existing(&dest_path).unwrap_or_default();
        let dest = Item {
            path: dest_path,
            repo: dest_repo.to_ref(),
            meta,
            format,
        };
        dest.save()?;
        self.index.add(class, dest.to_record()?);

        info!("{} {} copied to {}", class, source.path.display(), dest.path.display());
        Ok((source, dest))
    }

    /// Copy a script to a new folder with a new uid
    pub fn cp(&mut self, class: ItemClass, request: &CopyRequest) -> Result<Outcome> {
        let (_, dest) = self.copy(class, request)?;
        Ok(Outcome {
            message: Some(format!("copied to {}", dest.path.display())),
            items: vec![dest],
            warnings: Vec::new(),
        })
    }

    /// Relocate a script, keeping its uid
    pub fn mv(&mut self, class: ItemClass, request: &CopyRequest) -> Result<Outcome> {
        let (source, mut dest) = self.copy(class, request)?;
        self.delete_item(class, &source)?;

        let interim = dest.to_record()?.uid;
        dest.meta.set_uid(&source.uid);
        dest.save()?;
        self.index.remove(class, &interim);
        self.index.update(class, dest.to_record()?);

        info!("{} moved from {} to {}", class, source.path.display(), dest.path.display());
        Ok(Outcome {
            message: Some(format!("moved to {}", dest.path.display())),
            items: vec![dest],
            warnings: Vec::new(),
        })
    }

    // =========================================================================
    // update
    // =========================================================================

    /// Merge tags and fields into the matching items, adding one if none match
    pub fn update(&mut self, class: ItemClass, request: &UpdateRequest) -> Result<Outcome> {
        let query = match (&request.item, &request.search_tags, &request.tags) {
            (Some(item), _, _) => Query::from_identifier(item),
            (None, Some(tags), _) | (None, None, Some(tags)) => Query::tags(tags.clone()),
            (None, None, None) => {
                return Err(RegistryError::Usage("item or tags not given for update".into()));
            }
        };

        let found = self.find(class, &query)?;
        if found.is_empty() {
            info!("No {} matched, adding a new one", class);
            let add = AddRequest {
                item: request.item.clone(),
                item_repo: request.item_repo.clone(),
                tags: request.tags.clone().or_else(|| request.search_tags.clone()),
                meta: request.meta.clone(),
                ..AddRequest::default()
            };
            return self.add(class, &add);
        }

        if found.len() > 1
            && !self
                .prompt
                .confirm(&format!("{} items found. Do you want to update all?", found.len()))
        {
            return Ok(Outcome::warning(Warning::new(
                WarningCode::Cancelled,
                "update cancelled by user",
            )));
        }

        let new_tags = request.tags.as_deref().map(split_list).unwrap_or_default();
        let mut patch = request.meta.clone();
        patch.0.remove("uid");
        patch.0.remove("tags");
        let options = MergeOptions {
            append_lists: !request.replace_lists,
            append_unique: true,
        };

        let mut updated = Vec::with_capacity(found.len());
        for record in &found {
            let mut item = Item::from_record(record);
            let tags = if request.replace_lists && request.tags.is_some() {
                dedup_tags(new_tags.iter().cloned())
            } else {
                dedup_tags(item.meta.tags().into_iter().chain(new_tags.iter().cloned()))
            };
            item.meta.set_tags(&tags);
            item.meta.merge(&patch, options);
            item.save()?;
            self.index.update(class, item.to_record()?);
            updated.push(item);
        }

        Ok(Outcome {
            message: Some(format!("updated {} item(s)", updated.len())),
            items: updated,
            warnings: Vec::new(),
        })
    }

    // =========================================================================
    // Automation hand-off
    // =========================================================================

    /// Resolve one item and hand it to its automation plugin
    pub fn execute(&self, class: ItemClass, query: &Query, action: Action, args: &RunArgs) -> Result<RunResult> {
        let found = self.find(class, query)?;
        let record = self.choose_one(class, found, "the given identifier", false)?;
        let item = Item::from_record(&record);
        let automation = item
            .meta
            .get("automation")
            .and_then(serde_json::Value::as_str)
            .map_or_else(|| class.to_string(), String::from);
        self.automations.dispatch(&automation, action, &item, args)
    }

    // =========================================================================
    // Repositories
    // =========================================================================

    /// Pull a repository and make its items resolvable
    pub fn pull_repo(&mut self, request: &PullRequest) -> Result<Outcome> {
        let outcome = self.repos.pull(request)?;
        self.reindex();
        Ok(pull_outcome(&outcome))
    }

    /// Pull every registered git repository
    pub fn pull_all(&mut self) -> Result<Outcome> {
        let outcomes = self.repos.pull_all()?;
        self.reindex();
        let mut merged = Outcome::message(format!("{} repositories pulled", outcomes.len()));
        for outcome in &outcomes {
            merged.warnings.extend(outcome.warning());
        }
        Ok(merged)
    }

    /// Create and register a local repository
    pub fn add_repo(&mut self, spec: &str) -> Result<Outcome> {
        let repo = self.repos.add(spec)?;
        self.reindex();
        Ok(Outcome::message(format!("repository {} added at {}", repo.meta.alias, repo.path.display())))
    }

    /// Delete and unregister a repository
    pub fn rm_repo(&mut self, identifier: &str, force: bool) -> Result<Outcome> {
        let outcome = self.repos.remove(identifier, force, &*self.prompt)?;
        self.reindex();
        Ok(outcome)
    }

    /// Repositories matching an identifier
    pub fn find_repo(&self, identifier: &str) -> Result<Vec<Repository>> {
        Ok(self
            .repos
            .find_by_identifier(identifier)?
            .into_iter()
            .cloned()
            .collect())
    }
}

fn pull_outcome(outcome: &PullOutcome) -> Outcome {
    let message = match outcome {
        PullOutcome::Registered { path } => format!("{} registered", path.display()),
        PullOutcome::AlreadyRegistered { path } => format!("{} is up to date", path.display()),
        PullOutcome::Replaced { new, .. } => format!("{} registered", new.display()),
        PullOutcome::IgnoredConflict { existing, .. } => {
            format!("a repository with the same uid is already registered at {}", existing.display())
        }
        PullOutcome::LocalChanges { changes, .. } => format!("local changes:\n{changes}"),
        PullOutcome::NotRegistered { path, .. } => format!("{} pulled", path.display()),
    };
    Outcome {
        message: Some(message),
        items: Vec::new(),
        warnings: outcome.warning().into_iter().collect(),
    }
}

/// Item folders are single path segments inside their class folder
fn check_folder_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(RegistryError::Usage("destination name not given".into()));
    }
    if name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(RegistryError::Usage(format!(
            "invalid item name '{name}': names cannot contain path separators or be '.' or '..'"
        )));
    }
    Ok(())
}

/// Split `[repo:]name[,uid]` into its parts
fn split_item(item: Option<&str>) -> (Option<String>, Option<String>, Option<String>) {
    let Some(item) = item.map(str::trim).filter(|i| !i.is_empty()) else {
        return (None, None, None);
    };
    let (repo, rest) = match item.split_once(':') {
        Some((repo, rest)) => (Some(repo.trim().to_string()).filter(|r| !r.is_empty()), rest),
        None => (None, item),
    };
    let (name, uid) = match rest.split_once(',') {
        Some((name, uid)) => (name.trim(), Some(uid.trim())),
        None => (rest.trim(), None),
    };
    let name = Some(name.to_string()).filter(|n| !n.is_empty());
    let uid = uid.filter(|u| !u.is_empty()).map(String::from);
    if let Some(uid) = &uid {
        if !is_uid(uid) {
            debug!("Using non-standard uid {}", uid);
        }
    }
    (repo, name, uid)
}

/// Folder name for a new item
///
/// Caches and experiments created for a script are prefixed with its alias
/// and a shortened form of the extra tags.
fn item_folder_name(
    class: ItemClass,
    name: Option<&str>,
    uid: &str,
    script_alias: Option<&str>,
    extra_tags: Option<&str>,
) -> String {
    let plain = name.map_or_else(|| uid.to_string(), String::from);
    if class == ItemClass::Script {
        return plain;
    }
    let Some(script_alias) = script_alias.filter(|s| !s.is_empty()) else {
        return plain;
    };
    let suffix: String = extra_tags
        .unwrap_or_default()
        .replace(',', "-")
        .chars()
        .take(EXTRA_TAGS_SUFFIX_LEN)
        .collect();
    let suffix = if suffix.is_empty() { String::new() } else { format!("_{suffix}") };
    let short = name.map_or_else(|| uid.chars().take(8).collect(), String::from);
    format!("{script_alias}{suffix}_{short}")
}

/// Recursively copy `src` to a new directory `dest`
fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    if !src.is_dir() {
        return Err(RegistryError::NotFound(format!("source folder {} not found", src.display())));
    }
    let result = WalkDir::new(src).into_iter().try_for_each(|entry| {
        let entry = entry.map_err(|e| RegistryError::Io {
            path: e.path().map_or_else(|| src.to_path_buf(), Path::to_path_buf),
            source: e.into(),
        })?;
        let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target: PathBuf = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| RegistryError::io(&target, e))
        } else {
            fs::copy(entry.path(), &target)
                .map(|_| ())
                .map_err(|e| RegistryError::io(&target, e))
        }
    });
    if result.is_err() && dest.exists() {
        if let Err(err) = fs::remove_dir_all(dest) {
            warn!("Could not clean up partial copy at {}: {}", dest.display(), err);
        }
    }
    result
}

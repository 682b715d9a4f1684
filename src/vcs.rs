// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Version-control collaborator used by repository pulls
//!
//! The registry never talks to a forge itself; it hands clone, fetch and
//! checkout to an implementation of [`Vcs`]. [`GitCli`] shells out to the
//! `git` executable.

use crate::error::{RegistryError, Result};
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Credentials used to rewrite a clone URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Personal access token embedded in an https URL
    Token(String),
    /// Clone over SSH
    Ssh,
}

/// Clone/fetch/checkout operations needed by [`crate::repos::RepoRegistry::pull`]
pub trait Vcs {
    /// Clone `url` into `dest`, optionally on `branch`
    fn clone_repo(&self, url: &str, dest: &Path, branch: Option<&str>) -> Result<()>;

    /// Porcelain status of tracked files; empty when the tree is clean
    fn local_changes(&self, repo: &Path) -> Result<String>;

    /// Fetch and fast-forward the current branch
    fn pull(&self, repo: &Path) -> Result<()>;

    /// Check out a branch, commit or `tags/<tag>`
    fn checkout(&self, repo: &Path, rev: &str) -> Result<()>;
}

/// [`Vcs`] backed by the `git` command line
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git")
    }
}

impl GitCli {
    /// Use `program` as the git executable
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let shown: Vec<String> = args.iter().map(|a| redact_url(a)).collect();
        let command = format!("{} {}", self.program, shown.join(" "));
        debug!("Running {}", command);
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| RegistryError::ExternalTool {
                command: command.clone(),
                stderr: e.to_string(),
            })?;
        if !output.status.success() {
            let mut stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            for (arg, masked) in args.iter().zip(&shown) {
                if *arg != masked.as_str() {
                    stderr = stderr.replace(*arg, masked);
                }
            }
            return Err(RegistryError::ExternalTool { command, stderr });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Vcs for GitCli {
    fn clone_repo(&self, url: &str, dest: &Path, branch: Option<&str>) -> Result<()> {
        let dest = dest.to_string_lossy();
        let mut args = vec!["clone"];
        if let Some(branch) = branch {
            args.extend(["--branch", branch]);
        }
        args.extend([url, &*dest]);
        self.run(&args).map(|_| ())
    }

    fn local_changes(&self, repo: &Path) -> Result<String> {
        let repo = repo.to_string_lossy();
        let status = self.run(&[
            "-C",
            &*repo,
            "status",
            "--porcelain",
            "--untracked-files=no",
        ])?;
        Ok(status.trim().to_string())
    }

    fn pull(&self, repo: &Path) -> Result<()> {
        let repo = repo.to_string_lossy();
        self.run(&["-C", &*repo, "pull"]).map(|_| ())
    }

    fn checkout(&self, repo: &Path, rev: &str) -> Result<()> {
        let repo = repo.to_string_lossy();
        self.run(&["-C", &*repo, "checkout", rev]).map(|_| ())
    }
}

impl<V: Vcs + ?Sized> Vcs for std::rc::Rc<V> {
    fn clone_repo(&self, url: &str, dest: &Path, branch: Option<&str>) -> Result<()> {
        (**self).clone_repo(url, dest, branch)
    }

    fn local_changes(&self, repo: &Path) -> Result<String> {
        (**self).local_changes(repo)
    }

    fn pull(&self, repo: &Path) -> Result<()> {
        (**self).pull(repo)
    }

    fn checkout(&self, repo: &Path, rev: &str) -> Result<()> {
        (**self).checkout(repo, rev)
    }
}

// =============================================================================
// URL helpers
// =============================================================================

fn is_short_name_part(part: &str) -> bool {
    !part.is_empty()
        && part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// True for the `owner@name` shorthand
#[must_use]
pub fn is_short_form(value: &str) -> bool {
    match value.split_once('@') {
        Some((owner, name)) => is_short_name_part(owner) && is_short_name_part(name),
        None => false,
    }
}

/// True when `value` looks like a clone URL rather than a name
#[must_use]
pub fn is_url(value: &str) -> bool {
    value.contains("://") || value.starts_with("git@") || value.contains("github.com")
}

/// Expand `owner@name` to a GitHub https URL; anything else is returned as is
#[must_use]
pub fn canonical_url(value: &str) -> String {
    if is_short_form(value) {
        let (owner, name) = value.split_once('@').unwrap_or((value, value));
        format!("https://github.com/{owner}/{name}.git")
    } else {
        value.to_string()
    }
}

/// Local folder name for a repository URL
///
/// GitHub URLs become `owner@name`; other URLs use their last segment
/// without a `.git` suffix.
#[must_use]
pub fn folder_name_for_url(url: &str) -> String {
    if let Some((owner, name)) = github_owner_and_name(url) {
        return format!("{owner}@{name}");
    }
    let last = url
        .trim_end_matches('/')
        .rsplit(['/', ':'])
        .next()
        .unwrap_or(url);
    last.trim_end_matches(".git").to_string()
}

fn github_owner_and_name(url: &str) -> Option<(String, String)> {
    let (_, rest) = url.split_once("github.com")?;
    let rest = rest.trim_start_matches([':', '/']);
    let mut parts = rest.split('/');
    let owner = parts.next().filter(|s| !s.is_empty())?;
    let name = parts.next().filter(|s| !s.is_empty())?;
    let name = name.trim_end_matches(".git");
    let name = name.split('.').next().unwrap_or(name);
    Some((owner.to_string(), name.to_string()))
}

/// Mask the userinfo of a `scheme://user@host/...` URL
///
/// Anything that is not such a URL is returned unchanged.
#[must_use]
pub fn redact_url(value: &str) -> String {
    let Some((scheme, rest)) = value.split_once("://") else {
        return value.to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rsplit_once('@') {
        Some((_, host)) => format!("{scheme}://***@{host}{}", &rest[authority_end..]),
        None => value.to_string(),
    }
}

/// Rewrite an https URL for token or SSH access
#[must_use]
pub fn with_credentials(url: &str, credentials: &Credentials) -> String {
    match credentials {
        Credentials::Token(token) => match url.split_once("://") {
            Some((scheme, rest)) => {
                let host_and_path = rest.rsplit_once('@').map_or(rest, |(_, r)| r);
                format!("{scheme}://{token}@{host_and_path}")
            }
            None => url.to_string(),
        },
        Credentials::Ssh => match github_owner_and_name(url) {
            Some((owner, name)) => format!("git@github.com:{owner}/{name}.git"),
            None => url.to_string(),
        },
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Repository commands - pull, add, rm, list and find

use super::report;
use crate::error::Response;
use crate::registry::Registry;
use crate::repos::PullRequest;
use crate::types::Repository;
use crate::vcs::Credentials;
use anyhow::{bail, Result};
use clap::Args;
use serde_json::json;

/// Arguments of `pull repo`
#[derive(Debug, Clone, Default, Args)]
pub struct PullArgs {
    /// URL or `owner@name`; every registered git repository when absent
    pub url: Option<String>,

    /// Branch to clone
    #[arg(long)]
    pub branch: Option<String>,

    /// Commit to check out
    #[arg(long)]
    pub checkout: Option<String>,

    /// Release tag to check out
    #[arg(long)]
    pub tag: Option<String>,

    /// Personal access token for https remotes
    #[arg(long, env = "DEPOT_GIT_PAT", hide_env_values = true)]
    pub pat: Option<String>,

    /// Clone over SSH
    #[arg(long, conflicts_with = "pat")]
    pub ssh: bool,

    /// Keep the existing registration when the uid is already registered
    #[arg(long)]
    pub ignore_on_conflict: bool,
}

/// Pull one repository, or all of them
pub fn pull(registry: &mut Registry, args: &PullArgs, json: bool) -> Result<bool> {
    let Some(url) = &args.url else {
        return report(&Response::from_result(registry.pull_all()), json);
    };
    let credentials = match (&args.pat, args.ssh) {
        (_, true) => Some(Credentials::Ssh),
        (Some(token), false) => Some(Credentials::Token(token.clone())),
        (None, false) => None,
    };
    let request = PullRequest {
        url: url.clone(),
        branch: args.branch.clone(),
        checkout: args.checkout.clone(),
        tag: args.tag.clone(),
        credentials,
        ignore_on_conflict: args.ignore_on_conflict,
    };
    report(&Response::from_result(registry.pull_repo(&request)), json)
}

/// Create a local repository
pub fn add(registry: &mut Registry, spec: Option<&str>, json: bool) -> Result<bool> {
    let Some(spec) = spec else {
        bail!("Repository name, path or URL is required");
    };
    report(&Response::from_result(registry.add_repo(spec)), json)
}

/// Delete a repository
pub fn rm(registry: &mut Registry, identifier: Option<&str>, force: bool, json: bool) -> Result<bool> {
    let Some(identifier) = identifier else {
        bail!("Repository identifier is required");
    };
    report(&Response::from_result(registry.rm_repo(identifier, force)), json)
}

/// Print registered repositories
pub fn list(registry: &Registry, json: bool) -> Result<bool> {
    print_repos(registry.repos().repos(), json)?;
    Ok(true)
}

/// Print repositories matching an identifier
pub fn find(registry: &Registry, identifier: Option<&str>, json: bool) -> Result<bool> {
    let Some(identifier) = identifier else {
        bail!("Repository identifier is required");
    };
    match registry.find_repo(identifier) {
        Ok(found) => {
            print_repos(&found, json)?;
            Ok(true)
        }
        Err(err) => report(&Response::from_result(Err(err)), json),
    }
}

fn print_repos(repos: &[Repository], json: bool) -> Result<()> {
    if json {
        let list: Vec<_> = repos
            .iter()
            .map(|r| json!({"alias": r.meta.alias, "uid": r.meta.uid, "path": r.path}))
            .collect();
        println!("{}", serde_json::to_string_pretty(&json!({"status": 0, "list": list}))?);
        return Ok(());
    }

    if repos.is_empty() {
        println!("No repositories registered");
        return Ok(());
    }
    for repo in repos {
        println!(
            "{:<30} {:<18} {}",
            repo.meta.alias,
            repo.meta.uid.as_deref().unwrap_or("-"),
            repo.path.display()
        );
    }
    Ok(())
}

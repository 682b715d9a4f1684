// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Item commands - add, rm, search, show, list, cp, mv, update and run

use super::{parse_fields, report};
use crate::automation::Action;
use crate::error::Response;
use crate::meta::MetaFormat;
use crate::registry::{AddRequest, CopyRequest, Registry, UpdateRequest};
use crate::resolver::Query;
use crate::types::ItemClass;
use anyhow::{bail, Result};
use clap::Args;

/// Item selection shared by the lookup commands
#[derive(Debug, Clone, Default, Args)]
pub struct SelectArgs {
    /// Item as `[repo:]alias`, `alias,uid` or a uid
    pub item: Option<String>,

    /// Comma-separated tags; `-tag` excludes
    #[arg(long)]
    pub tags: Option<String>,

    /// Only consider items of this repository
    #[arg(long)]
    pub repo: Option<String>,
}

impl SelectArgs {
    /// Query described by the arguments
    #[must_use]
    pub fn query(&self) -> Query {
        let query = match (&self.item, &self.tags) {
            (Some(item), _) => Query::from_identifier(item),
            (None, Some(tags)) => Query::tags(tags.clone()),
            (None, None) => Query::default(),
        };
        match &self.repo {
            Some(repo) if query.repo.is_none() => query.in_repo(repo.clone()),
            _ => query,
        }
    }
}

/// Arguments of `add`
#[derive(Debug, Clone, Default, Args)]
pub struct AddArgs {
    /// Item as `[repo:]alias[,uid]`, or the repository for `add repo`
    pub item: Option<String>,

    /// Destination repository
    #[arg(long)]
    pub repo: Option<String>,

    /// Comma-separated tags
    #[arg(long)]
    pub tags: Option<String>,

    /// Comma-separated tags added on top of --tags
    #[arg(long)]
    pub new_tags: Option<String>,

    /// Script alias used to name a cache or experiment folder
    #[arg(long)]
    pub script_alias: Option<String>,

    /// Tags shortened into a cache or experiment folder name
    #[arg(long)]
    pub extra_tags: Option<String>,

    /// Write meta.json instead of meta.yaml
    #[arg(long)]
    pub json_meta: bool,

    /// Extra descriptor field
    #[arg(long = "meta", value_name = "KEY=VALUE")]
    pub fields: Vec<String>,
}

/// Arguments of `rm`
#[derive(Debug, Clone, Default, Args)]
pub struct RmArgs {
    #[command(flatten)]
    pub select: SelectArgs,

    /// Remove without asking
    #[arg(short, long)]
    pub force: bool,
}

/// Arguments of `show`
#[derive(Debug, Clone, Default, Args)]
pub struct ShowArgs {
    #[command(flatten)]
    pub select: SelectArgs,

    /// Descriptor keys to print
    #[arg(long, value_delimiter = ',')]
    pub keys: Vec<String>,
}

/// Arguments of `cp` and `mv`
#[derive(Debug, Clone, Default, Args)]
pub struct CopyArgs {
    /// `<src> <dest>`, or just `<dest>` with --src-tags
    #[arg(num_args = 1..=2, required = true)]
    pub names: Vec<String>,

    /// Select the source by tags
    #[arg(long)]
    pub src_tags: Option<String>,

    /// Uid for the copy
    #[arg(long)]
    pub uid: Option<String>,

    /// Replacement tags for the copy
    #[arg(long)]
    pub tags: Option<String>,

    /// Take the first match instead of asking
    #[arg(long)]
    pub pick_first: bool,
}

impl CopyArgs {
    fn request(&self) -> Result<CopyRequest> {
        let (src, dest) = match (self.names.as_slice(), &self.src_tags) {
            ([src, dest], _) => (Some(src.clone()), dest.clone()),
            ([dest], Some(_)) => (None, dest.clone()),
            _ => bail!("Expected <src> <dest>, or --src-tags with <dest>"),
        };
        Ok(CopyRequest {
            src,
            src_tags: self.src_tags.clone(),
            dest,
            uid: self.uid.clone(),
            tags: self.tags.clone(),
            quiet: self.pick_first,
        })
    }
}

/// Arguments of `update`
#[derive(Debug, Clone, Default, Args)]
pub struct UpdateArgs {
    /// Item as `[repo:]alias[,uid]`
    pub item: Option<String>,

    /// Select the items to update by tags
    #[arg(long)]
    pub search_tags: Option<String>,

    /// Tags merged into the items
    #[arg(long)]
    pub tags: Option<String>,

    /// Repository receiving the item when nothing matches
    #[arg(long)]
    pub repo: Option<String>,

    /// Descriptor field to merge
    #[arg(long = "meta", value_name = "KEY=VALUE")]
    pub fields: Vec<String>,

    /// Replace lists instead of appending
    #[arg(long)]
    pub replace_lists: bool,
}

/// Arguments of `run`, `docker` and `test`
#[derive(Debug, Clone, Default, Args)]
pub struct ExecArgs {
    #[command(flatten)]
    pub select: SelectArgs,

    /// Arguments handed to the automation as `KEY=VALUE`
    #[arg(last = true)]
    pub args: Vec<String>,
}

/// Add an item
pub fn add(registry: &mut Registry, class: ItemClass, args: &AddArgs, json: bool) -> Result<bool> {
    let request = AddRequest {
        item: args.item.clone(),
        item_repo: args.repo.clone(),
        tags: args.tags.clone(),
        new_tags: args.new_tags.clone(),
        meta: parse_fields(&args.fields)?,
        script_alias: args.script_alias.clone(),
        extra_tags: args.extra_tags.clone(),
        format: if args.json_meta { MetaFormat::Json } else { MetaFormat::Yaml },
    };
    report(&Response::from_result(registry.add(class, &request)), json)
}

/// Remove items
pub fn rm(registry: &mut Registry, class: ItemClass, args: &RmArgs, json: bool) -> Result<bool> {
    let result = registry.rm(class, &args.select.query(), args.force);
    report(&Response::from_result(result), json)
}

/// Search items
pub fn search(registry: &Registry, class: ItemClass, args: &SelectArgs, json: bool) -> Result<bool> {
    report(&Response::from_result(registry.search(class, &args.query())), json)
}

/// Show items with selected descriptor keys
pub fn show(registry: &Registry, class: ItemClass, args: &ShowArgs, json: bool) -> Result<bool> {
    let result = registry.show(class, &args.select.query(), &args.keys);
    if json {
        return report(&Response::from_result(result), json);
    }
    match result {
        Ok(outcome) => {
            for item in &outcome.items {
                println!("Location: {}", item.path.display());
                println!("Repo: {} ({})", item.repo.alias, item.repo.path.display());
                for (key, value) in &item.meta.0 {
                    println!("  {key}: {value}");
                }
            }
            Ok(true)
        }
        Err(err) => report(&Response::from_result(Err(err)), json),
    }
}

/// List every item of a class
pub fn list(registry: &Registry, class: ItemClass, json: bool) -> Result<bool> {
    report(&Response::from_result(registry.list(class)), json)
}

/// Copy a script
pub fn cp(registry: &mut Registry, class: ItemClass, args: &CopyArgs, json: bool) -> Result<bool> {
    let request = args.request()?;
    report(&Response::from_result(registry.cp(class, &request)), json)
}

/// Move a script
pub fn mv(registry: &mut Registry, class: ItemClass, args: &CopyArgs, json: bool) -> Result<bool> {
    let request = args.request()?;
    report(&Response::from_result(registry.mv(class, &request)), json)
}

/// Update items, adding one when nothing matches
pub fn update(registry: &mut Registry, class: ItemClass, args: &UpdateArgs, json: bool) -> Result<bool> {
    let request = UpdateRequest {
        item: args.item.clone(),
        search_tags: args.search_tags.clone(),
        tags: args.tags.clone(),
        item_repo: args.repo.clone(),
        meta: parse_fields(&args.fields)?,
        replace_lists: args.replace_lists,
    };
    report(&Response::from_result(registry.update(class, &request)), json)
}

/// Hand an item to its automation
pub fn execute(registry: &Registry, class: ItemClass, action: Action, args: &ExecArgs, json: bool) -> Result<bool> {
    let run_args = parse_fields(&args.args)?.0;
    match registry.execute(class, &args.select.query(), action, &run_args) {
        Ok(result) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if let Some(error) = &result.error {
                eprintln!("Error: {error}");
            }
            Ok(result.status == 0)
        }
        Err(err) => report(&Response::from_result(Err(err)), json),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_args_query() {
        let args = SelectArgs {
            item: Some("detect-os".into()),
            repo: Some("local".into()),
            ..SelectArgs::default()
        };
        let query = args.query();
        assert_eq!(query.alias.as_deref(), Some("detect-os"));
        assert_eq!(query.repo.as_deref(), Some("local"));

        let args = SelectArgs { tags: Some("a,-b".into()), ..SelectArgs::default() };
        assert_eq!(args.query().tags.as_deref(), Some("a,-b"));
    }

    #[test]
    fn test_copy_args_forms() {
        let args = CopyArgs { names: vec!["a".into(), "b".into()], ..CopyArgs::default() };
        let request = args.request().unwrap();
        assert_eq!(request.src.as_deref(), Some("a"));
        assert_eq!(request.dest, "b");

        let args = CopyArgs { names: vec!["b".into()], src_tags: Some("x".into()), ..CopyArgs::default() };
        assert!(args.request().unwrap().src.is_none());

        let args = CopyArgs { names: vec!["b".into()], ..CopyArgs::default() };
        assert!(args.request().is_err());
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
//! Depot CLI - find, add and move items across your registered repositories

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use depot::automation::Action;
use depot::commands::item::{AddArgs, CopyArgs, ExecArgs, RmArgs, SelectArgs, ShowArgs, UpdateArgs};
use depot::commands::repo::PullArgs;
use depot::commands::{self, Target};
use depot::config::Config;
use depot::prompt::{AssumeAnswer, Prompt, TerminalPrompt};
use depot::registry::Registry;
use depot::types::ItemClass;

#[derive(Parser)]
#[command(name = "depot")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Configuration file path
    #[arg(short, long, env = depot::config::CONFIG_ENV, global = true)]
    config: Option<std::path::PathBuf>,

    /// Repositories folder override
    #[arg(long, global = true)]
    repos: Option<std::path::PathBuf>,

    /// Answer yes to every confirmation
    #[arg(short, long, global = true)]
    yes: bool,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add an item, or create a local repository
    Add {
        /// What to add
        target: Target,
        #[command(flatten)]
        args: AddArgs,
    },

    /// Remove items or a repository
    Rm {
        /// What to remove
        target: Target,
        #[command(flatten)]
        args: RmArgs,
    },

    /// Search items by identifier or tags
    Search {
        /// What to search
        target: Target,
        #[command(flatten)]
        args: SelectArgs,
    },

    /// Alias of search; resolves repositories for `find repo`
    Find {
        /// What to find
        target: Target,
        #[command(flatten)]
        args: SelectArgs,
    },

    /// Show items with their descriptor fields
    Show {
        /// What to show
        target: Target,
        #[command(flatten)]
        args: ShowArgs,
    },

    /// List every item of a class, or every repository
    List {
        /// What to list
        target: Target,
    },

    /// Copy a script
    Cp {
        /// What to copy
        target: Target,
        #[command(flatten)]
        args: CopyArgs,
    },

    /// Move a script, keeping its uid
    Mv {
        /// What to move
        target: Target,
        #[command(flatten)]
        args: CopyArgs,
    },

    /// Merge tags and fields into items
    Update {
        /// What to update
        target: Target,
        #[command(flatten)]
        args: UpdateArgs,
    },

    /// Clone or update a repository and register it
    Pull {
        /// Only `repo` can be pulled
        target: Target,
        #[command(flatten)]
        args: PullArgs,
    },

    /// Run a script through its automation
    Run {
        /// What to run
        target: Target,
        #[command(flatten)]
        args: ExecArgs,
    },

    /// Run a script inside a container
    Docker {
        /// What to run
        target: Target,
        #[command(flatten)]
        args: ExecArgs,
    },

    /// Run the tests of a script
    Test {
        /// What to test
        target: Target,
        #[command(flatten)]
        args: ExecArgs,
    },

    /// Generate shell completions
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        shell: clap_complete::Shell,
    },
}

fn item_class(target: Target, command: &str) -> Result<ItemClass> {
    match target.class() {
        Some(class) => Ok(class),
        None => bail!("`{} repo` is not supported", command),
    }
}

fn run(cli: Cli, mut config: Config) -> Result<bool> {
    if let Commands::Completions { shell } = cli.command {
        commands::completions::run::<Cli>(shell)?;
        return Ok(true);
    }

    if let Some(repos) = cli.repos {
        config.repos_path = repos;
    }
    tracing::debug!("Using repositories folder {}", config.repos_path.display());

    let prompt: Box<dyn Prompt> = if cli.yes {
        Box::new(AssumeAnswer { yes: true })
    } else {
        Box::new(TerminalPrompt)
    };
    let mut registry = Registry::open(&config, prompt)
        .with_context(|| format!("Failed to open registry at {}", config.repos_path.display()))?;
    let json = cli.json;

    match cli.command {
        Commands::Add { target, args } => match target.class() {
            Some(class) => commands::item::add(&mut registry, class, &args, json),
            None => commands::repo::add(&mut registry, args.item.as_deref(), json),
        },
        Commands::Rm { target, args } => match target.class() {
            Some(class) => commands::item::rm(&mut registry, class, &args, json),
            None => commands::repo::rm(&mut registry, args.select.item.as_deref(), args.force, json),
        },
        Commands::Search { target, args } => {
            commands::item::search(&registry, item_class(target, "search")?, &args, json)
        }
        Commands::Find { target, args } => match target.class() {
            Some(class) => commands::item::search(&registry, class, &args, json),
            None => commands::repo::find(&registry, args.item.as_deref(), json),
        },
        Commands::Show { target, args } => {
            commands::item::show(&registry, item_class(target, "show")?, &args, json)
        }
        Commands::List { target } => match target.class() {
            Some(class) => commands::item::list(&registry, class, json),
            None => commands::repo::list(&registry, json),
        },
        Commands::Cp { target, args } => {
            commands::item::cp(&mut registry, item_class(target, "cp")?, &args, json)
        }
        Commands::Mv { target, args } => {
            commands::item::mv(&mut registry, item_class(target, "mv")?, &args, json)
        }
        Commands::Update { target, args } => {
            commands::item::update(&mut registry, item_class(target, "update")?, &args, json)
        }
        Commands::Pull { target, args } => {
            if target != Target::Repo {
                bail!("Only repositories can be pulled");
            }
            commands::repo::pull(&mut registry, &args, json)
        }
        Commands::Run { target, args } => {
            commands::item::execute(&registry, item_class(target, "run")?, Action::Run, &args, json)
        }
        Commands::Docker { target, args } => {
            commands::item::execute(&registry, item_class(target, "docker")?, Action::Docker, &args, json)
        }
        Commands::Test { target, args } => {
            commands::item::execute(&registry, item_class(target, "test")?, Action::Test, &args, json)
        }
        Commands::Completions { .. } => Ok(true),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = depot::config::load(cli.config.as_deref())?;

    // Initialize logging
    let log_level = match cli.verbose {
        0 if cli.quiet => tracing::Level::ERROR,
        0 => config.log_level.parse().unwrap_or(tracing::Level::INFO),
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if !run(cli, config)? {
        std::process::exit(1);
    }
    Ok(())
}

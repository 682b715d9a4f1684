// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Configuration management
//!
//! Layers, lowest first: built-in defaults, an optional TOML file, then
//! `DEPOT_*` environment variables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "DEPOT_CONFIG";

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Folder holding `repos.json`, the local repository and pulled repositories
    pub repos_path: PathBuf,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Executable used for clone, pull and checkout
    pub git_program: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repos_path: default_repos_path(),
            log_level: "info".to_string(),
            git_program: "git".to_string(),
        }
    }
}

/// `$HOME/DEPOT/repos`, or a relative fallback when there is no home directory
#[must_use]
pub fn default_repos_path() -> PathBuf {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().join("DEPOT").join("repos"))
        .unwrap_or_else(|| PathBuf::from("DEPOT/repos"))
}

/// Per-user config file location
#[must_use]
pub fn default_config_file() -> Option<PathBuf> {
    directories::ProjectDirs::from("org", "depot", "depot").map(|d| d.config_dir().join("config.toml"))
}

/// Load configuration, reading `file` if given or the per-user file if present
pub fn load(file: Option<&Path>) -> Result<Config> {
    let defaults = Config::default();
    let mut builder = config::Config::builder()
        .set_default("repos_path", defaults.repos_path.to_string_lossy().into_owned())?
        .set_default("log_level", defaults.log_level)?
        .set_default("git_program", defaults.git_program)?;

    match file {
        Some(path) => {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        None => {
            if let Some(path) = default_config_file() {
                builder = builder.add_source(config::File::from(path).required(false));
            }
        }
    }

    builder
        .add_source(config::Environment::with_prefix("DEPOT"))
        .build()
        .context("Failed to read configuration")?
        .try_deserialize()
        .context("Invalid configuration")
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
//! Command implementations

pub mod completions;
pub mod item;
pub mod repo;

use crate::error::Response;
use crate::meta::{Descriptor, MergeOptions};
use crate::types::ItemClass;
use anyhow::{Context, Result};
use clap::ValueEnum;
use serde_json::Value;

/// What a command acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Target {
    /// Registered repositories
    Repo,
    /// Automation scripts
    Script,
    /// Cached script outputs
    Cache,
    /// Experiment records
    Experiment,
}

impl Target {
    /// Item class, or `None` for repositories
    #[must_use]
    pub fn class(self) -> Option<ItemClass> {
        match self {
            Self::Repo => None,
            Self::Script => Some(ItemClass::Script),
            Self::Cache => Some(ItemClass::Cache),
            Self::Experiment => Some(ItemClass::Experiment),
        }
    }
}

/// Print a response as JSON or as plain lines; returns whether it succeeded
pub fn report(response: &Response, json: bool) -> Result<bool> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(response).context("Failed to serialize response")?
        );
        return Ok(response.is_ok());
    }

    if let Some(error) = &response.error {
        eprintln!("Error: {error}");
    }
    if let Some(message) = &response.message {
        println!("{message}");
    }
    for warning in &response.warnings {
        eprintln!("Warning {}: {}", warning.code.number(), warning.description);
    }
    for item in &response.list {
        println!("{}", item.path.display());
    }
    Ok(response.is_ok())
}

/// Parse `key=value` pairs into descriptor fields
///
/// Values are read as YAML scalars or sequences, so `n=3` is a number and
/// `deps=[a, b]` a list. Dotted keys build nested mappings.
pub fn parse_fields(pairs: &[String]) -> Result<Descriptor> {
    let mut meta = Descriptor::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("Expected key=value, got {}", pair))?;
        let value: Value = serde_yaml::from_str::<serde_yaml::Value>(raw)
            .ok()
            .and_then(|v| serde_json::to_value(v).ok())
            .filter(|v| !v.is_null())
            .unwrap_or_else(|| Value::String(raw.to_string()));

        let mut parts = key.split('.').rev();
        let Some(last) = parts.next() else { continue };
        let mut fields = serde_json::Map::new();
        fields.insert(last.to_string(), value);
        for part in parts {
            let mut outer = serde_json::Map::new();
            outer.insert(part.to_string(), Value::Object(fields));
            fields = outer;
        }
        meta.merge(&Descriptor::from(fields), MergeOptions::default());
    }
    Ok(meta)
}

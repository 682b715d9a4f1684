// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Script automation plugins
//!
//! Runnable behaviour lives outside the registry. An automation package
//! implements [`Automation`] and is registered by name; a resolved item is
//! handed to the plugin named by its `automation` descriptor field.

use crate::error::{RegistryError, Result};
use crate::meta::Item;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::Path;
use std::process::Command;
use tracing::{debug, info};

/// Arguments passed through to a plugin unchanged
pub type RunArgs = Map<String, Value>;

/// `{status, error}` result relayed from a plugin
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunResult {
    /// 0 on success
    pub status: i32,
    /// Failure description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Plugin-specific output
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl RunResult {
    /// Successful result
    #[must_use]
    pub fn ok() -> Self {
        Self::default()
    }

    /// Failed result
    pub fn failed(status: i32, error: impl Into<String>) -> Self {
        Self {
            status,
            error: Some(error.into()),
            data: Map::new(),
        }
    }
}

/// Which entry point of a plugin to invoke
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Run natively
    Run,
    /// Run inside a container
    Docker,
    /// Run the item's tests
    Test,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Run => "run",
            Self::Docker => "docker",
            Self::Test => "test",
        })
    }
}

/// Contract implemented by automation packages
pub trait Automation {
    /// Name matched against an item's `automation` field
    fn name(&self) -> &str;

    /// Run `item` with `args`
    fn run(&self, item: &Item, args: &RunArgs) -> Result<RunResult>;

    /// Run `item` inside a container
    fn docker(&self, _item: &Item, _args: &RunArgs) -> Result<RunResult> {
        Err(RegistryError::Usage(format!("automation {} does not support docker", self.name())))
    }

    /// Run the tests of `item`
    fn test(&self, _item: &Item, _args: &RunArgs) -> Result<RunResult> {
        Err(RegistryError::Usage(format!("automation {} does not support test", self.name())))
    }
}

/// Named automation plugins, first registration wins
#[derive(Default)]
pub struct AutomationRegistry {
    plugins: Vec<Box<dyn Automation>>,
}

impl std::fmt::Debug for AutomationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.plugins.iter().map(|p| p.name())).finish()
    }
}

impl AutomationRegistry {
    /// Registry with the built-in `script` automation
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        registry.register(Box::new(ShellScript));
        registry
    }

    /// Add a plugin
    pub fn register(&mut self, plugin: Box<dyn Automation>) {
        debug!("Registered automation {}", plugin.name());
        self.plugins.push(plugin);
    }

    /// Plugin registered under `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn Automation> {
        self.plugins.iter().find(|p| p.name() == name).map(|p| &**p)
    }

    /// Hand `item` to its plugin and relay the result
    pub fn dispatch(&self, name: &str, action: Action, item: &Item, args: &RunArgs) -> Result<RunResult> {
        let plugin = self
            .get(name)
            .ok_or_else(|| RegistryError::Usage(format!("no automation registered as {name}")))?;
        info!("{} {} with automation {}", action, item.path.display(), name);
        match action {
            Action::Run => plugin.run(item, args),
            Action::Docker => plugin.docker(item, args),
            Action::Test => plugin.test(item, args),
        }
    }
}

/// Runs `run.sh` (or `run.bat` on Windows) in the item directory
///
/// Arguments are exported as `DEPOT_<KEY>` environment variables.
#[derive(Debug, Default)]
pub struct ShellScript;

impl ShellScript {
    fn entry_point(dir: &Path) -> Option<std::path::PathBuf> {
        let name = if cfg!(windows) { "run.bat" } else { "run.sh" };
        let path = dir.join(name);
        path.is_file().then_some(path)
    }

    fn env_value(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            Value::Bool(true) => "yes".into(),
            Value::Bool(false) => "no".into(),
            other => other.to_string(),
        }
    }
}

impl Automation for ShellScript {
    fn name(&self) -> &str {
        "script"
    }

    fn run(&self, item: &Item, args: &RunArgs) -> Result<RunResult> {
        let Some(entry) = Self::entry_point(&item.path) else {
            return Ok(RunResult::failed(1, format!("no run script in {}", item.path.display())));
        };

        let mut command = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&entry);
            c
        } else {
            let mut c = Command::new("bash");
            c.arg(&entry);
            c
        };
        command.current_dir(&item.path);
        for (key, value) in args {
            command.env(format!("DEPOT_{}", key.to_uppercase()), Self::env_value(value));
        }

        let status = command.status().map_err(|e| RegistryError::ExternalTool {
            command: entry.display().to_string(),
            stderr: e.to_string(),
        })?;
        Ok(match status.code() {
            Some(0) => RunResult::ok(),
            Some(code) => RunResult::failed(code, format!("{} exited with {}", entry.display(), code)),
            None => RunResult::failed(1, format!("{} was terminated by a signal", entry.display())),
        })
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Error taxonomy and the uniform result envelope

use crate::meta::Item;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Result type used across the registry core
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Everything that can go wrong in the registry core
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Missing identifier, conflicting flags or unsupported class
    #[error("{0}")]
    Usage(String),

    /// The resolver found no candidates
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate uid or an existing destination
    #[error("conflict: {0}")]
    Conflict(String),

    /// A registered repository descriptor has no uid
    #[error("uid is not present in the descriptor of the repository at {}", .0.display())]
    MissingRepoUid(PathBuf),

    /// The version-control subprocess failed
    #[error("{command} failed: {stderr}")]
    ExternalTool {
        /// Command line that was run
        command: String,
        /// Captured standard error
        stderr: String,
    },

    /// Filesystem failure
    #[error("{}: {source}", path.display())]
    Io {
        /// Offending path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Unreadable descriptor or list file
    #[error("failed to parse {}: {message}", path.display())]
    Parse {
        /// Offending path
        path: PathBuf,
        /// Parser message
        message: String,
    },
}

impl RegistryError {
    /// Build an [`RegistryError::Io`] for `path`
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Stable machine-readable code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Usage(_) => "USAGE",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::MissingRepoUid(_) => "MISSING_REPO_UID",
            Self::ExternalTool { .. } => "EXTERNAL_TOOL",
            Self::Io { .. } => "IO_ERROR",
            Self::Parse { .. } => "PARSE_ERROR",
        }
    }
}

/// Non-fatal conditions reported alongside a successful result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningCode {
    /// Nothing matched the request
    EmptyTarget,
    /// A working tree had tracked-file modifications
    LocalChanges,
    /// The user declined a confirmation
    Cancelled,
    /// A pulled repository could not be registered
    NotRegistered,
    /// A pulled repository took over the uid of a registered one
    Replaced,
}

impl WarningCode {
    /// Numeric code kept stable for scripted callers
    #[must_use]
    pub fn number(self) -> u16 {
        match self {
            Self::LocalChanges => 1000,
            Self::NotRegistered => 1002,
            Self::Replaced => 1003,
            Self::Cancelled => 1004,
            Self::EmptyTarget => 1006,
        }
    }
}

/// A warning attached to an [`Outcome`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    /// Warning kind
    pub code: WarningCode,
    /// Human-readable description
    pub description: String,
}

impl Warning {
    /// Create a warning
    pub fn new(code: WarningCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }
}

/// Successful result of a registry operation
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    /// Summary line
    pub message: Option<String>,
    /// Items touched or found
    pub items: Vec<Item>,
    /// Non-fatal conditions
    pub warnings: Vec<Warning>,
}

impl Outcome {
    /// Outcome carrying only a message
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Outcome carrying only a warning
    #[must_use]
    pub fn warning(warning: Warning) -> Self {
        Self {
            warnings: vec![warning],
            ..Self::default()
        }
    }

    /// Outcome carrying found items
    #[must_use]
    pub fn items(items: Vec<Item>) -> Self {
        Self {
            items,
            ..Self::default()
        }
    }
}

/// Uniform `{status, error, ...}` envelope handed to outer layers
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    /// 0 on success, 1 on error
    pub status: u8,
    /// Error message when `status` is non-zero
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Error code when `status` is non-zero
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    /// Summary line
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Non-fatal conditions
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
    /// Resolved items with their decoded metadata
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub list: Vec<Item>,
}

impl Response {
    /// Fold an operation result into the envelope
    #[must_use]
    pub fn from_result(result: Result<Outcome>) -> Self {
        match result {
            Ok(outcome) => Self {
                status: 0,
                error: None,
                code: None,
                message: outcome.message,
                warnings: outcome.warnings,
                list: outcome.items,
            },
            Err(err) => Self {
                status: 1,
                error: Some(err.to_string()),
                code: Some(err.code()),
                message: None,
                warnings: Vec::new(),
                list: Vec::new(),
            },
        }
    }

    /// True when the operation succeeded
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_carries_code() {
        let response = Response::from_result(Err(RegistryError::NotFound("script x".into())));
        assert_eq!(response.status, 1);
        assert_eq!(response.code, Some("NOT_FOUND"));
        assert_eq!(response.error.as_deref(), Some("not found: script x"));
    }

    #[test]
    fn test_success_response_keeps_warnings() {
        let outcome = Outcome::warning(Warning::new(WarningCode::EmptyTarget, "cache is empty"));
        let response = Response::from_result(Ok(outcome));
        assert!(response.is_ok());
        assert_eq!(response.warnings.len(), 1);
        assert_eq!(response.warnings[0].code.number(), 1006);
    }

    #[test]
    fn test_external_tool_message_includes_stderr() {
        let err = RegistryError::ExternalTool {
            command: "git clone".into(),
            stderr: "repository not found".into(),
        };
        assert!(err.to_string().contains("repository not found"));
        assert_eq!(err.code(), "EXTERNAL_TOOL");
    }
}

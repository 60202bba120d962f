//! Controller configuration.
//!
//! Parsed from TOML; every field has a default so an empty document is a
//! valid standalone configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from configuration loading.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML document could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// How this process participates in the management hierarchy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ProcessRole {
    /// A self-contained process owning its whole configuration.
    #[default]
    Standalone,
    /// The top-level coordinator of a multi-process hierarchy.
    Coordinator,
    /// A managed process mirroring a coordinator's configuration; its
    /// config-storage attributes cannot be modified locally.
    ManagedMirror,
}

impl ProcessRole {
    /// Returns the string representation of this role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Standalone => "standalone",
            Self::Coordinator => "coordinator",
            Self::ManagedMirror => "managed_mirror",
        }
    }

    /// Returns true for processes that mirror a coordinator's
    /// configuration.
    #[must_use]
    pub const fn is_managed_mirror(&self) -> bool {
        matches!(self, Self::ManagedMirror)
    }
}

impl std::fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Top-level controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// The role of this process in the hierarchy.
    #[serde(default)]
    pub role: ProcessRole,

    /// How long a step targeting a remote process waits for the remote
    /// terminal outcome before failing, in milliseconds.
    #[serde(default = "default_proxy_timeout_ms")]
    pub proxy_timeout_ms: u64,

    /// How long a model write waits for a conflicting writer to release
    /// the subtree before the step fails, in milliseconds.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Default composite behavior: roll back sibling sub-operations when
    /// one fails at runtime stage.
    #[serde(default = "default_rollback_on_runtime_failure")]
    pub rollback_on_runtime_failure: bool,
}

const fn default_proxy_timeout_ms() -> u64 {
    5_000
}

const fn default_lock_timeout_ms() -> u64 {
    30_000
}

const fn default_rollback_on_runtime_failure() -> bool {
    true
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            role: ProcessRole::default(),
            proxy_timeout_ms: default_proxy_timeout_ms(),
            lock_timeout_ms: default_lock_timeout_ms(),
            rollback_on_runtime_failure: default_rollback_on_runtime_failure(),
        }
    }
}

impl ControllerConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// The proxy step timeout as a [`Duration`].
    #[must_use]
    pub const fn proxy_timeout(&self) -> Duration {
        Duration::from_millis(self.proxy_timeout_ms)
    }

    /// The model write-lock deadline as a [`Duration`].
    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

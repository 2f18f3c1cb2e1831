//! Multiplex configuration via `multiplex.toml`
//!
//! The file decides which backends are compensated when a later backend's
//! commit fails. The policy is read once, when the manager is built, and
//! copied into every coordinator; it never changes mid-transaction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use strata_core::{StrataError, StrataResult};

/// Config file name.
pub const CONFIG_FILE_NAME: &str = "multiplex.toml";

/// Per-backend settings, persisted under `[backends.<name>]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendConfig {
    /// Compensate this backend if a later commit fails. Falls back to
    /// `compensate_by_default` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensate: Option<bool>,
}

/// Multiplex configuration loaded from `multiplex.toml`.
///
/// # Example
///
/// ```toml
/// compensate_by_default = true
///
/// [backends.search-index]
/// compensate = false
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MultiplexConfig {
    /// Compensate backends without an explicit setting.
    #[serde(default = "default_compensate")]
    pub compensate_by_default: bool,
    /// Per-backend overrides, keyed by backend name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub backends: BTreeMap<String, BackendConfig>,
}

fn default_compensate() -> bool {
    true
}

impl Default for MultiplexConfig {
    fn default() -> Self {
        Self {
            compensate_by_default: default_compensate(),
            backends: BTreeMap::new(),
        }
    }
}

impl MultiplexConfig {
    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Multiplex transaction configuration
#
# Backends are committed in reverse order of first use. When a commit
# fails, backends that already committed are reversed using snapshots
# taken during the transaction ("compensation").
#
# Compensate backends that have no explicit setting below (default: true)
compensate_by_default = true

# Per-backend overrides. Disable compensation for backends whose writes
# are idempotent or rebuilt elsewhere.
# [backends.search-index]
# compensate = false
"#
    }

    /// Parse config from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid configuration.
    pub fn from_toml_str(content: &str) -> StrataResult<Self> {
        toml::from_str(content)
            .map_err(|e| StrataError::invalid_input(format!("Failed to parse config: {}", e)))
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> StrataResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StrataError::internal(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        toml::from_str(&content).map_err(|e| {
            StrataError::invalid_input(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> StrataResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                StrataError::internal(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> StrataResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| StrataError::internal(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            StrataError::internal(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Compensation policy described by this config.
    pub fn compensation_policy(&self) -> CompensationPolicy {
        let mut policy = CompensationPolicy::new(self.compensate_by_default);
        for (name, backend) in &self.backends {
            if let Some(compensate) = backend.compensate {
                policy = policy.with_backend(name.clone(), compensate);
            }
        }
        policy
    }
}

// ============================================================================
// Compensation Policy
// ============================================================================

/// Which backends are reversed when a later commit fails
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompensationPolicy {
    default: bool,
    overrides: BTreeMap<String, bool>,
}

impl Default for CompensationPolicy {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CompensationPolicy {
    /// Policy applying `default` to every backend
    pub fn new(default: bool) -> Self {
        Self {
            default,
            overrides: BTreeMap::new(),
        }
    }

    /// Compensate every backend
    pub fn all() -> Self {
        Self::new(true)
    }

    /// Compensate no backend
    pub fn none() -> Self {
        Self::new(false)
    }

    /// Override the setting for one backend
    pub fn with_backend(mut self, name: impl Into<String>, compensate: bool) -> Self {
        self.overrides.insert(name.into(), compensate);
        self
    }

    /// Whether the named backend is compensated
    pub fn applies_to(&self, backend: &str) -> bool {
        self.overrides.get(backend).copied().unwrap_or(self.default)
    }

    /// Backend names with an explicit setting
    pub fn overridden_backends(&self) -> impl Iterator<Item = &str> {
        self.overrides.keys().map(|k| k.as_str())
    }
}

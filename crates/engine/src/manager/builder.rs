//! Manager builder for fluent configuration

use std::path::Path;
use std::sync::Arc;
use strata_concurrency::{SnapshotStrategies, SnapshotStrategy};
use strata_core::metadata::EntityMetadata;
use strata_core::traits::Backend;
use strata_core::types::EntityType;
use strata_core::{StrataError, StrataResult};
use tracing::info;

use super::config::{CompensationPolicy, MultiplexConfig, CONFIG_FILE_NAME};
use super::MultiplexManager;

// ============================================================================
// Manager Builder Pattern
// ============================================================================

/// Builder for [`MultiplexManager`]
///
/// Backends are registered in the order given. Ownership conflicts are
/// reported by [`build`](Self::build), not when a backend is added.
pub struct MultiplexManagerBuilder {
    metadata: Arc<dyn EntityMetadata>,
    backends: Vec<Arc<dyn Backend>>,
    strategies: SnapshotStrategies,
    config: MultiplexConfig,
    policy: Option<CompensationPolicy>,
}

impl MultiplexManagerBuilder {
    /// Create a builder with no backends and default configuration
    pub fn new(metadata: Arc<dyn EntityMetadata>) -> Self {
        Self {
            metadata,
            backends: Vec::new(),
            strategies: SnapshotStrategies::new(),
            config: MultiplexConfig::default(),
            policy: None,
        }
    }

    /// Register a backend
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Snapshot strategy for one entity type (and its subtypes)
    pub fn snapshot_strategy(
        mut self,
        entity_type: impl Into<EntityType>,
        strategy: Arc<dyn SnapshotStrategy>,
    ) -> Self {
        self.strategies.register(entity_type.into(), strategy);
        self
    }

    /// Snapshot strategy for types without a registered one
    pub fn default_snapshot_strategy(mut self, strategy: Arc<dyn SnapshotStrategy>) -> Self {
        self.strategies.set_fallback(strategy);
        self
    }

    /// Use an already-loaded configuration
    pub fn config(mut self, config: MultiplexConfig) -> Self {
        self.config = config;
        self
    }

    /// Load `multiplex.toml` from a directory, writing the default file first
    /// if none exists
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written, read or parsed.
    pub fn open_config<P: AsRef<Path>>(mut self, dir: P) -> StrataResult<Self> {
        let path = dir.as_ref().join(CONFIG_FILE_NAME);
        MultiplexConfig::write_default_if_missing(&path)?;
        self.config = MultiplexConfig::from_file(&path)?;
        Ok(self)
    }

    /// Set the compensation policy directly, ignoring the configuration's
    pub fn compensation(mut self, policy: CompensationPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Register every backend and build the manager
    ///
    /// # Errors
    ///
    /// - `AmbiguousOwnership` if two backends own the same entity type
    /// - `InvalidInput` if two backends share a name, or the configuration
    ///   names a backend that was never registered
    pub fn build(self) -> StrataResult<MultiplexManager> {
        let mut router = crate::router::Router::new(self.metadata);
        for backend in self.backends {
            router.register(backend)?;
        }

        for name in self.config.backends.keys() {
            if router.find(name).is_none() {
                return Err(StrataError::invalid_input(format!(
                    "{} configures unknown backend '{}'",
                    CONFIG_FILE_NAME, name
                )));
            }
        }

        let policy = self
            .policy
            .unwrap_or_else(|| self.config.compensation_policy());

        info!(
            target: "strata::mux",
            backends = router.len(),
            compensate_by_default = self.config.compensate_by_default,
            "Multiplex manager ready"
        );
        Ok(MultiplexManager::from_parts(router, self.strategies, policy))
    }
}

impl std::fmt::Debug for MultiplexManagerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.backends.iter().map(|b| b.name()).collect();
        f.debug_struct("MultiplexManagerBuilder")
            .field("backends", &names)
            .field("config", &self.config)
            .finish()
    }
}

//! Runtime configuration.

use std::num::NonZeroU32;
use std::sync::Arc;

use serde::Deserialize;

use crate::dispatcher::{DispatchMode, TransactionalUnit};
use crate::error::DomainError;
use crate::registry::HandlerRegistry;
use crate::snapshot::{DEFAULT_SNAPSHOT_INTERVAL, SimpleSnapshotPolicy};

/// Environment variable holding the snapshot interval.
pub const SNAPSHOT_INTERVAL_VAR: &str = "CHRONICLE_SNAPSHOT_INTERVAL";
/// Environment variable switching atomic dispatch on or off.
pub const ATOMIC_DISPATCH_VAR: &str = "CHRONICLE_ATOMIC_DISPATCH";

/// Tunables of the reconstruction and dispatch runtime.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ChronicleConfig {
    /// Versions between two snapshots of a restored aggregate.
    pub snapshot_interval: u32,
    /// Whether event handlers run inside a transaction.
    pub atomic_dispatch: bool,
}

impl Default for ChronicleConfig {
    fn default() -> Self {
        Self {
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL.get(),
            atomic_dispatch: true,
        }
    }
}

impl ChronicleConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if a variable cannot be parsed or
    /// the result is invalid.
    pub fn from_env() -> Result<Self, DomainError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, falling back to defaults
    /// for missing keys.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if a value cannot be parsed or the
    /// result is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, DomainError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let snapshot_interval = match lookup(SNAPSHOT_INTERVAL_VAR) {
            Some(raw) => raw.trim().parse().map_err(|e| {
                DomainError::Validation(format!("{SNAPSHOT_INTERVAL_VAR} must be a valid u32: {e}"))
            })?,
            None => defaults.snapshot_interval,
        };
        let atomic_dispatch = match lookup(ATOMIC_DISPATCH_VAR) {
            Some(raw) => raw.trim().parse().map_err(|e| {
                DomainError::Validation(format!("{ATOMIC_DISPATCH_VAR} must be true or false: {e}"))
            })?,
            None => defaults.atomic_dispatch,
        };

        let config = Self {
            snapshot_interval,
            atomic_dispatch,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for values the runtime cannot work with.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the snapshot interval is zero.
    pub fn validate(&self) -> Result<(), DomainError> {
        self.interval().map(|_| ())
    }

    /// Builds the snapshot policy described by this configuration.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the snapshot interval is zero.
    pub fn snapshot_policy(
        &self,
        registry: Arc<HandlerRegistry>,
    ) -> Result<SimpleSnapshotPolicy, DomainError> {
        Ok(SimpleSnapshotPolicy::with_interval(registry, self.interval()?))
    }

    /// Selects the dispatch mode, using `unit` when dispatch is atomic.
    #[must_use]
    pub fn dispatch_mode(&self, unit: Arc<dyn TransactionalUnit>) -> DispatchMode {
        if self.atomic_dispatch {
            DispatchMode::Atomic(unit)
        } else {
            DispatchMode::BestEffort
        }
    }

    fn interval(&self) -> Result<NonZeroU32, DomainError> {
        NonZeroU32::new(self.snapshot_interval).ok_or_else(|| {
            DomainError::Validation("snapshot interval must be greater than zero".to_owned())
        })
    }
}

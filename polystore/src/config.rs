//! Adapter Configuration
//!
//! TigerStyle: Sensible defaults, builder pattern, explicit over implicit.
//!
//! Every struct here derives `Deserialize` so deployments can load it from a
//! file; tests build it in code.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use polystore_core::{RefTarget, BACKEND_ALIAS_DEFAULT};
use serde::{Deserialize, Serialize};

use crate::error::{BackendError, BackendResult};

/// Environment variable read by [`PostgresConfig::from_env`].
pub const POSTGRES_URL_ENV: &str = "POLYSTORE_POSTGRES_URL";

/// Default pool size for the client/server adapter.
pub const POSTGRES_CONNECTIONS_COUNT_DEFAULT: u32 = 10;

/// Default pool acquire timeout.
pub const POSTGRES_ACQUIRE_TIMEOUT_MS_DEFAULT: u64 = 5_000;

// =============================================================================
// Hierarchy
// =============================================================================

/// Storage layout of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hierarchy {
    /// Top-level collection
    #[default]
    Flat,
    /// Records nested under their parent record's address
    Subcollection,
}

// =============================================================================
// AdapterConfig
// =============================================================================

/// Configuration shared by every adapter.
///
/// # Example
///
/// ```rust
/// use polystore::config::{AdapterConfig, Hierarchy};
///
/// let config = AdapterConfig::new("docs")
///     .with_hierarchy("comment", Hierarchy::Subcollection)
///     .with_mapping("User", "users")
///     .with_soft_delete(true);
/// assert!(config.is_subcollection("comment"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Registry key of the adapter.
    pub alias: String,

    /// Layout per collection; absent means flat.
    pub hierarchy: HashMap<String, Hierarchy>,

    /// Referenced model name to collection/table name.
    pub mapping: HashMap<String, String>,

    /// Whether `delete` rewrites status instead of removing.
    ///
    /// Default: false
    pub soft_delete: bool,

    /// Whether reference columns hold bare foreign keys instead of
    /// `{ref, label}` JSON.
    ///
    /// Default: false
    pub use_native_foreign_keys: bool,

    /// Log generated queries and return them in `meta.debug`.
    ///
    /// Default: false
    pub debug: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            alias: BACKEND_ALIAS_DEFAULT.to_string(),
            hierarchy: HashMap::new(),
            mapping: HashMap::new(),
            soft_delete: false,
            use_native_foreign_keys: false,
            debug: false,
        }
    }
}

impl AdapterConfig {
    /// Create a config with the given alias.
    #[must_use]
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            ..Self::default()
        }
    }

    /// Declare the layout of a collection.
    #[must_use]
    pub fn with_hierarchy(mut self, collection: impl Into<String>, layout: Hierarchy) -> Self {
        self.hierarchy.insert(collection.into(), layout);
        self
    }

    /// Map a referenced model to a collection/table.
    #[must_use]
    pub fn with_mapping(mut self, model: impl Into<String>, table: impl Into<String>) -> Self {
        self.mapping.insert(model.into(), table.into());
        self
    }

    /// Enable or disable soft delete.
    #[must_use]
    pub fn with_soft_delete(mut self, enabled: bool) -> Self {
        self.soft_delete = enabled;
        self
    }

    /// Enable or disable bare foreign-key reference columns.
    #[must_use]
    pub fn with_native_foreign_keys(mut self, enabled: bool) -> Self {
        self.use_native_foreign_keys = enabled;
        self
    }

    /// Enable or disable debug output.
    #[must_use]
    pub fn with_debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// Whether the collection nests under parent records.
    #[must_use]
    pub fn is_subcollection(&self, collection: &str) -> bool {
        self.hierarchy.get(collection) == Some(&Hierarchy::Subcollection)
    }

    /// Collection/table holding the records a reference points at.
    ///
    /// The configured mapping wins over the target's declared collection.
    #[must_use]
    pub fn reference_collection(&self, target: &RefTarget) -> Option<String> {
        self.mapping
            .get(&target.model)
            .cloned()
            .or_else(|| target.collection.clone())
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns `Config` for an empty alias or empty mapping entries.
    pub fn validate(&self) -> BackendResult<()> {
        if self.alias.is_empty() {
            return Err(BackendError::config("alias cannot be empty"));
        }
        if let Some((model, _)) = self.mapping.iter().find(|(_, t)| t.is_empty()) {
            return Err(BackendError::config(format!(
                "mapping for model {model} is empty"
            )));
        }
        Ok(())
    }
}

// =============================================================================
// PostgresConfig
// =============================================================================

/// Connection settings for the client/server adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    /// `postgres://` connection URL
    pub url: String,
    /// Pool size
    pub max_connections: u32,
    /// How long to wait for a pooled connection
    pub acquire_timeout_ms: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost:5432/polystore".to_string(),
            max_connections: POSTGRES_CONNECTIONS_COUNT_DEFAULT,
            acquire_timeout_ms: POSTGRES_ACQUIRE_TIMEOUT_MS_DEFAULT,
        }
    }
}

impl PostgresConfig {
    /// Create a config for a connection URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Read the URL from `POLYSTORE_POSTGRES_URL`.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        std::env::var(POSTGRES_URL_ENV).ok().map(Self::new)
    }

    /// Set pool size.
    #[must_use]
    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Acquire timeout as a duration.
    #[must_use]
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns `Config` for a non-postgres URL or an empty pool.
    pub fn validate(&self) -> BackendResult<()> {
        if !(self.url.starts_with("postgres://") || self.url.starts_with("postgresql://")) {
            return Err(BackendError::config("connection string must be postgres URL"));
        }
        if self.max_connections == 0 {
            return Err(BackendError::config("max_connections must be positive"));
        }
        Ok(())
    }
}

// =============================================================================
// SqliteConfig
// =============================================================================

/// Database location for the embedded adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Database file; `None` for an in-memory database
    pub path: Option<PathBuf>,
}

impl SqliteConfig {
    /// In-memory database, gone when the adapter closes.
    #[must_use]
    pub fn in_memory() -> Self {
        Self { path: None }
    }

    /// File-backed database, created if missing.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_config_defaults() {
        let config = AdapterConfig::default();
        assert_eq!(config.alias, BACKEND_ALIAS_DEFAULT);
        assert!(!config.soft_delete);
        assert!(!config.is_subcollection("anything"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_reference_collection_prefers_mapping() {
        let config = AdapterConfig::new("pg").with_mapping("User", "users");
        let target = RefTarget::model("User").with_collection("user");
        assert_eq!(config.reference_collection(&target).as_deref(), Some("users"));

        let other = RefTarget::model("Entity").with_collection("entity");
        assert_eq!(config.reference_collection(&other).as_deref(), Some("entity"));
        assert_eq!(config.reference_collection(&RefTarget::model("Org")), None);
    }

    #[test]
    fn test_config_from_json() {
        let config: AdapterConfig = serde_json::from_str(
            r#"{"alias": "docs", "hierarchy": {"comment": "subcollection"}, "softDelete": true}"#,
        )
        .unwrap();
        assert_eq!(config.alias, "docs");
        assert!(config.is_subcollection("comment"));
        // unknown keys are ignored; snake_case is the canonical spelling
        assert!(!config.soft_delete);
    }

    #[test]
    fn test_postgres_config_validation() {
        assert!(PostgresConfig::default().validate().is_ok());
        assert!(PostgresConfig::new("mysql://x").validate().is_err());
        assert!(PostgresConfig::default()
            .with_max_connections(0)
            .validate()
            .is_err());
    }
}

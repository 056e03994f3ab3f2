//! Backend Registry
//!
//! TigerStyle: Explicit object built at the composition root, passed to
//! whatever needs adapters. No process-wide state.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use polystore_core::ObjectUri;

use crate::adapter::BackendAdapter;
use crate::error::{BackendError, BackendResult};

/// Alias to adapter map with one default alias.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    adapters: HashMap<String, Arc<dyn BackendAdapter>>,
    default_alias: Option<String>,
}

impl BackendRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under an alias, replacing any previous one.
    ///
    /// The first registered adapter becomes the default.
    pub fn register(&mut self, alias: impl Into<String>, adapter: Arc<dyn BackendAdapter>) {
        let alias = alias.into();
        if self.default_alias.is_none() {
            self.default_alias = Some(alias.clone());
        }
        tracing::info!(alias = %alias, "backend registered");
        self.adapters.insert(alias, adapter);
    }

    /// Designate the default alias.
    ///
    /// # Errors
    /// Returns `UnknownBackend` if nothing is registered under the alias.
    pub fn set_default(&mut self, alias: &str) -> BackendResult<()> {
        if !self.adapters.contains_key(alias) {
            return Err(BackendError::UnknownBackend {
                alias: alias.to_string(),
            });
        }
        self.default_alias = Some(alias.to_string());
        Ok(())
    }

    /// Adapter registered under an alias.
    ///
    /// # Errors
    /// Returns `UnknownBackend` for unregistered aliases.
    pub fn get(&self, alias: &str) -> BackendResult<Arc<dyn BackendAdapter>> {
        self.adapters
            .get(alias)
            .cloned()
            .ok_or_else(|| BackendError::UnknownBackend {
                alias: alias.to_string(),
            })
    }

    /// Default adapter.
    ///
    /// # Errors
    /// Returns `UnknownBackend` when the registry is empty.
    pub fn default_adapter(&self) -> BackendResult<Arc<dyn BackendAdapter>> {
        match &self.default_alias {
            Some(alias) => self.get(alias),
            None => Err(BackendError::UnknownBackend {
                alias: polystore_core::BACKEND_ALIAS_DEFAULT.to_string(),
            }),
        }
    }

    /// Adapter an address belongs to: its backend alias, or the default.
    ///
    /// # Errors
    /// Returns `UnknownBackend` for unregistered aliases.
    pub fn resolve(&self, uri: &ObjectUri) -> BackendResult<Arc<dyn BackendAdapter>> {
        match uri.backend() {
            Some(alias) => self.get(alias),
            None => self.default_adapter(),
        }
    }

    /// Registered aliases, sorted.
    #[must_use]
    pub fn aliases(&self) -> Vec<&str> {
        let mut aliases: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        aliases.sort_unstable();
        aliases
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("aliases", &self.aliases())
            .field("default", &self.default_alias)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdapterConfig;
    use crate::document::{DocumentAdapter, SimDocumentStore};

    fn adapter(alias: &str) -> Arc<dyn BackendAdapter> {
        Arc::new(
            DocumentAdapter::new(Arc::new(SimDocumentStore::new(1)), AdapterConfig::new(alias))
                .unwrap(),
        )
    }

    #[test]
    fn test_first_registered_is_default() {
        let mut registry = BackendRegistry::new();
        registry.register("docs", adapter("docs"));
        registry.register("archive", adapter("archive"));

        assert_eq!(registry.default_adapter().unwrap().alias(), "docs");
        registry.set_default("archive").unwrap();
        assert_eq!(registry.default_adapter().unwrap().alias(), "archive");
        assert_eq!(registry.aliases(), vec!["archive", "docs"]);
    }

    #[test]
    fn test_unknown_alias() {
        let registry = BackendRegistry::new();
        assert!(matches!(
            registry.get("nope"),
            Err(BackendError::UnknownBackend { .. })
        ));
        assert!(registry.default_adapter().is_err());

        let mut registry = BackendRegistry::new();
        assert!(registry.set_default("nope").is_err());
    }

    #[test]
    fn test_resolve_by_uri() {
        let mut registry = BackendRegistry::new();
        registry.register("docs", adapter("docs"));
        registry.register("archive", adapter("archive"));

        let uri = ObjectUri::parse("archive:user/u1").unwrap();
        assert_eq!(registry.resolve(&uri).unwrap().alias(), "archive");

        let plain = ObjectUri::parse("user/u1").unwrap();
        assert_eq!(registry.resolve(&plain).unwrap().alias(), "docs");

        let unknown = ObjectUri::parse("pg:user/u1").unwrap();
        assert!(registry.resolve(&unknown).is_err());
    }
}

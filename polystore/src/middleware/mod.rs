//! Middleware Pipeline - Mutation Hooks Around CRUD Actions
//!
//! TigerStyle: Ordered, typed, fail-fast.
//!
//! Hooks run in registration order before the adapter writes anything. A
//! failing hook aborts the surrounding operation, so no persistence write is
//! issued after a middleware error.

mod inject_meta;
mod keywords;

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use polystore_core::Record;

use crate::error::{BackendError, BackendResult};

pub use inject_meta::{Clock, InjectMetaMiddleware};
pub use keywords::{extract_keywords, KeywordsMiddleware};

// =============================================================================
// Action
// =============================================================================

/// CRUD action a middleware is invoked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// First persist
    Create,
    /// Load by address
    Read,
    /// Partial write
    Update,
    /// Soft or hard removal
    Delete,
}

impl Action {
    /// Action name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of the action being run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionParams {
    /// Identifier requested by the caller on create
    pub desired_uid: Option<String>,
    /// Whether a delete physically removes the record
    pub hard_delete: bool,
}

impl ActionParams {
    /// Parameters for a create.
    #[must_use]
    pub fn create(desired_uid: Option<&str>) -> Self {
        Self {
            desired_uid: desired_uid.map(str::to_string),
            hard_delete: false,
        }
    }

    /// Parameters for a delete.
    #[must_use]
    pub fn delete(hard_delete: bool) -> Self {
        Self {
            desired_uid: None,
            hard_delete,
        }
    }
}

// =============================================================================
// Middleware Trait
// =============================================================================

/// A hook that mutates a record around a CRUD action.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Mutate the record in place.
    ///
    /// # Errors
    /// Any error aborts the surrounding operation.
    async fn execute(
        &self,
        record: &mut Record,
        action: Action,
        params: &ActionParams,
    ) -> BackendResult<()>;
}

// =============================================================================
// MiddlewarePipeline
// =============================================================================

/// Ordered list of middlewares, at most one per concrete type.
#[derive(Clone, Default)]
pub struct MiddlewarePipeline {
    entries: Vec<(TypeId, Arc<dyn Middleware>)>,
}

impl MiddlewarePipeline {
    /// Empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a middleware at the end of the pipeline.
    ///
    /// # Errors
    /// Returns `DuplicateMiddleware` if one of the same type is registered.
    pub fn add<M: Middleware>(&mut self, middleware: M) -> BackendResult<()> {
        if self.has::<M>() {
            return Err(BackendError::DuplicateMiddleware {
                name: middleware.name().to_string(),
            });
        }
        tracing::debug!(middleware = middleware.name(), "middleware registered");
        self.entries.push((TypeId::of::<M>(), Arc::new(middleware)));
        Ok(())
    }

    /// Whether a middleware of this type is registered.
    #[must_use]
    pub fn has<M: Middleware>(&self) -> bool {
        let id = TypeId::of::<M>();
        self.entries.iter().any(|(t, _)| *t == id)
    }

    /// Number of registered middlewares.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pipeline is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names in execution order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|(_, m)| m.name()).collect()
    }

    /// Run every middleware in registration order, stopping at the first
    /// failure.
    ///
    /// # Errors
    /// Returns the first middleware error unchanged.
    pub async fn run(
        &self,
        record: &mut Record,
        action: Action,
        params: &ActionParams,
    ) -> BackendResult<()> {
        for (_, middleware) in &self.entries {
            if let Err(e) = middleware.execute(record, action, params).await {
                tracing::warn!(
                    middleware = middleware.name(),
                    action = %action,
                    error = %e,
                    "middleware aborted action"
                );
                return Err(e);
            }
        }
        Ok(())
    }
}

impl fmt::Debug for MiddlewarePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polystore_core::ModelSchema;
    use std::sync::Mutex;

    struct Recorder {
        seen: Arc<Mutex<Vec<String>>>,
        tag: &'static str,
    }

    #[async_trait]
    impl Middleware for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        async fn execute(
            &self,
            _record: &mut Record,
            action: Action,
            _params: &ActionParams,
        ) -> BackendResult<()> {
            self.seen.lock().unwrap().push(format!("{}:{action}", self.tag));
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Middleware for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn execute(
            &self,
            _record: &mut Record,
            _action: Action,
            _params: &ActionParams,
        ) -> BackendResult<()> {
            Err(BackendError::middleware("failing", "nope"))
        }
    }

    fn record() -> Record {
        Record::new(ModelSchema::builder("Note").string("title").build().unwrap())
    }

    #[tokio::test]
    async fn test_duplicate_type_rejected() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = MiddlewarePipeline::new();
        pipeline
            .add(Recorder {
                seen: Arc::clone(&seen),
                tag: "a",
            })
            .unwrap();

        let err = pipeline
            .add(Recorder {
                seen: Arc::clone(&seen),
                tag: "b",
            })
            .unwrap_err();
        assert!(matches!(err, BackendError::DuplicateMiddleware { .. }));
        assert_eq!(pipeline.len(), 1);
        assert!(pipeline.has::<Recorder>());
        assert!(!pipeline.has::<Failing>());
    }

    #[tokio::test]
    async fn test_failure_stops_pipeline() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = MiddlewarePipeline::new();
        pipeline.add(Failing).unwrap();
        pipeline
            .add(Recorder {
                seen: Arc::clone(&seen),
                tag: "after",
            })
            .unwrap();

        let mut rec = record();
        let result = pipeline
            .run(&mut rec, Action::Create, &ActionParams::default())
            .await;

        assert!(matches!(result, Err(BackendError::Middleware { .. })));
        assert!(seen.lock().unwrap().is_empty(), "later hooks must not run");
    }

    #[tokio::test]
    async fn test_runs_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = MiddlewarePipeline::new();
        pipeline
            .add(Recorder {
                seen: Arc::clone(&seen),
                tag: "first",
            })
            .unwrap();
        pipeline.add(KeywordsMiddleware::new()).unwrap();

        let mut rec = record();
        pipeline
            .run(&mut rec, Action::Update, &ActionParams::default())
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["first:update".to_string()]);
        assert_eq!(pipeline.names(), vec!["recorder", "keywords"]);
    }
}

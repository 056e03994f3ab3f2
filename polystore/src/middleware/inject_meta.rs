//! `InjectMetaMiddleware` - Author and Timestamp Stamping

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use polystore_core::{
    DataReference, Record, Value, PROPERTY_CREATED_AT, PROPERTY_CREATED_BY, PROPERTY_DELETED_AT,
    PROPERTY_DELETED_BY, PROPERTY_UPDATED_AT, PROPERTY_UPDATED_BY,
};

use super::{Action, ActionParams, Middleware};
use crate::error::BackendResult;

/// Source of the current time.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Stamps `created_*`, `updated_*` and `deleted_*` properties.
///
/// Only properties the model declares are touched. Hard deletes are not
/// stamped since the record is gone afterwards.
#[derive(Clone)]
pub struct InjectMetaMiddleware {
    user: Option<DataReference>,
    clock: Clock,
}

impl InjectMetaMiddleware {
    /// Stamp with the system clock and no author.
    #[must_use]
    pub fn new() -> Self {
        Self {
            user: None,
            clock: Arc::new(Utc::now),
        }
    }

    /// Stamp the given user as author.
    #[must_use]
    pub fn with_user(mut self, user: DataReference) -> Self {
        self.user = Some(user);
        self
    }

    /// Replace the clock, for deterministic tests.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn stamp(&self, record: &mut Record, at: &str, by: &str, now: DateTime<Utc>) -> BackendResult<()> {
        if record.schema().has_property(at) {
            record.set(at, now)?;
        }
        if let Some(user) = &self.user {
            if record.schema().has_property(by) {
                record.set(by, Value::Reference(user.clone()))?;
            }
        }
        Ok(())
    }
}

impl Default for InjectMetaMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InjectMetaMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectMetaMiddleware")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Middleware for InjectMetaMiddleware {
    fn name(&self) -> &'static str {
        "inject_meta"
    }

    async fn execute(
        &self,
        record: &mut Record,
        action: Action,
        params: &ActionParams,
    ) -> BackendResult<()> {
        let now = (self.clock)();
        match action {
            Action::Create => {
                self.stamp(record, PROPERTY_CREATED_AT, PROPERTY_CREATED_BY, now)?;
                self.stamp(record, PROPERTY_UPDATED_AT, PROPERTY_UPDATED_BY, now)
            }
            Action::Update => self.stamp(record, PROPERTY_UPDATED_AT, PROPERTY_UPDATED_BY, now),
            Action::Delete if !params.hard_delete => {
                self.stamp(record, PROPERTY_DELETED_AT, PROPERTY_DELETED_BY, now)
            }
            Action::Delete | Action::Read => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use polystore_core::ModelSchema;

    fn fixed_clock() -> Clock {
        Arc::new(|| Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap())
    }

    fn user_record() -> Record {
        Record::new(
            ModelSchema::builder("Post")
                .with_base_properties()
                .string("title")
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_create_stamps_created_and_updated() {
        let mw = InjectMetaMiddleware::new()
            .with_clock(fixed_clock())
            .with_user(DataReference::new("user/u1", Some("Jane".into())));
        let mut record = user_record();

        mw.execute(&mut record, Action::Create, &ActionParams::default())
            .await
            .unwrap();

        let expected = Value::DateTime(fixed_clock()());
        assert_eq!(record.val(PROPERTY_CREATED_AT), &expected);
        assert_eq!(record.val(PROPERTY_UPDATED_AT), &expected);
        assert_eq!(
            record.val(PROPERTY_CREATED_BY).as_reference().unwrap().reference,
            "user/u1"
        );
        assert!(record.val(PROPERTY_DELETED_AT).is_null());
    }

    #[tokio::test]
    async fn test_hard_delete_not_stamped() {
        let mw = InjectMetaMiddleware::new().with_clock(fixed_clock());
        let mut record = user_record();

        mw.execute(&mut record, Action::Delete, &ActionParams::delete(true))
            .await
            .unwrap();
        assert!(record.val(PROPERTY_DELETED_AT).is_null());

        mw.execute(&mut record, Action::Delete, &ActionParams::delete(false))
            .await
            .unwrap();
        assert!(!record.val(PROPERTY_DELETED_AT).is_null());
        assert!(record.val(PROPERTY_DELETED_BY).is_null(), "no user configured");
    }

    #[tokio::test]
    async fn test_undeclared_properties_ignored() {
        let mw = InjectMetaMiddleware::new();
        let mut record = Record::new(ModelSchema::builder("Tag").string("label").build().unwrap());
        mw.execute(&mut record, Action::Create, &ActionParams::default())
            .await
            .unwrap();
        assert!(record.changed_properties().is_empty());
    }
}

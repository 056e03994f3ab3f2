//! Record - A Typed Property Map Bound to a Schema
//!
//! TigerStyle: Values are validated on `set`, change flags drive partial
//! updates, and the address is assigned by the backend on first persist.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::{Map as JsonMap, Value as Json};

use crate::error::{CoreError, CoreResult};
use crate::model::ModelSchema;
use crate::uri::ObjectUri;
use crate::value::{DataReference, Value};

static NULL_VALUE: Value = Value::Null;

/// A record of a given model.
///
/// Cloning a record is how backends rehydrate query results: the query
/// template is cloned per row and populated.
#[derive(Debug, Clone)]
pub struct Record {
    schema: Arc<ModelSchema>,
    uri: ObjectUri,
    values: BTreeMap<String, Value>,
    changed: BTreeSet<String>,
    keywords: Option<Vec<String>>,
}

impl Record {
    /// Create an unsaved record with property defaults.
    #[must_use]
    pub fn new(schema: Arc<ModelSchema>) -> Self {
        let values = schema
            .properties()
            .iter()
            .map(|p| (p.name().to_string(), p.default_value().clone()))
            .collect();

        Self {
            schema,
            uri: ObjectUri::empty(),
            values,
            changed: BTreeSet::new(),
            keywords: None,
        }
    }

    /// Schema of this record.
    #[must_use]
    pub fn schema(&self) -> &Arc<ModelSchema> {
        &self.schema
    }

    /// Borrow a property value.
    ///
    /// # Errors
    /// Returns `UnknownProperty` if the property is not declared.
    pub fn get(&self, name: &str) -> CoreResult<&Value> {
        self.values
            .get(name)
            .ok_or_else(|| CoreError::unknown_property(self.schema.name(), name))
    }

    /// Property value, `Null` for undeclared properties.
    #[must_use]
    pub fn val(&self, name: &str) -> &Value {
        self.values.get(name).unwrap_or(&NULL_VALUE)
    }

    /// Set a property, validating against its kind.
    ///
    /// The property is flagged as changed only if the value differs.
    ///
    /// # Errors
    /// Returns `UnknownProperty` or `Validation`.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> CoreResult<()> {
        let property = self
            .schema
            .property(name)
            .ok_or_else(|| CoreError::unknown_property(self.schema.name(), name))?;
        let value = property.coerce(value.into())?;

        if self.values.get(name) != Some(&value) {
            self.values.insert(name.to_string(), value);
            self.changed.insert(name.to_string());
        }
        Ok(())
    }

    /// Merge stored data without flagging changes.
    ///
    /// Keys the schema does not declare are ignored.
    ///
    /// # Errors
    /// Returns `Validation` if a stored value does not fit its property.
    pub fn populate(&mut self, data: BTreeMap<String, Value>) -> CoreResult<()> {
        for (name, value) in data {
            if let Some(property) = self.schema.property(&name) {
                let value = property.coerce(value)?;
                self.changed.remove(&name);
                self.values.insert(name, value);
            }
        }
        Ok(())
    }

    /// Merge a stored JSON document without flagging changes.
    ///
    /// # Errors
    /// Returns `Validation` if a stored value does not fit its property.
    pub fn populate_json(&mut self, data: &JsonMap<String, Json>) -> CoreResult<()> {
        let mut decoded = BTreeMap::new();
        for property in self.schema.persisted_properties() {
            if let Some(json) = data.get(property.name()) {
                decoded.insert(
                    property.name().to_string(),
                    Value::from_json(property.name(), property.storage(), json)?,
                );
            }
        }
        self.populate(decoded)
    }

    /// Persisted properties as a JSON document.
    #[must_use]
    pub fn to_json(&self) -> JsonMap<String, Json> {
        self.schema
            .persisted_properties()
            .map(|p| (p.name().to_string(), self.val(p.name()).to_json()))
            .collect()
    }

    /// Whether a property was modified since the last load or save.
    #[must_use]
    pub fn has_changed(&self, name: &str) -> bool {
        self.changed.contains(name)
    }

    /// Changed properties in declaration order.
    #[must_use]
    pub fn changed_properties(&self) -> Vec<&str> {
        self.schema
            .properties()
            .iter()
            .map(|p| p.name())
            .filter(|name| self.changed.contains(*name))
            .collect()
    }

    /// Forget change flags, after a successful save.
    pub fn clear_changes(&mut self) {
        self.changed.clear();
    }

    /// Address, empty until persisted.
    #[must_use]
    pub fn uri(&self) -> &ObjectUri {
        &self.uri
    }

    /// Unique identifier, once persisted.
    #[must_use]
    pub fn uid(&self) -> Option<&str> {
        self.uri.uid()
    }

    /// Whether the record has an address.
    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.uri.is_set()
    }

    /// Assign the address.
    pub fn set_uri(&mut self, uri: ObjectUri) {
        self.uri = uri;
    }

    /// Drop the address, after a hard delete.
    pub fn clear_uri(&mut self) {
        self.uri = ObjectUri::empty();
    }

    /// Display label taken from the label property, falling back to uid.
    #[must_use]
    pub fn label(&self) -> Option<String> {
        self.schema
            .label_property()
            .and_then(|p| self.val(p).to_text())
            .filter(|s| !s.is_empty())
            .or_else(|| self.uid().map(str::to_string))
    }

    /// Reference to this record, once persisted.
    #[must_use]
    pub fn to_reference(&self) -> Option<DataReference> {
        self.is_persisted()
            .then(|| DataReference::new(self.uri.path(), self.label()))
    }

    /// Keywords materialised by the keywords middleware.
    #[must_use]
    pub fn keywords(&self) -> Option<&[String]> {
        self.keywords.as_deref()
    }

    /// Replace the keywords index.
    pub fn set_keywords(&mut self, keywords: Vec<String>) {
        self.keywords = Some(keywords);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RefTarget;
    use serde_json::json;

    fn user_schema() -> Arc<ModelSchema> {
        ModelSchema::builder("User")
            .with_base_properties()
            .string("lastname")
            .number("age")
            .reference("entity", RefTarget::model("Entity").with_collection("entity"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_defaults_and_change_flags() {
        let mut user = Record::new(user_schema());
        assert_eq!(user.val("status"), &Value::from("created"));
        assert!(user.changed_properties().is_empty());

        user.set("lastname", "Doe").unwrap();
        user.set("age", 42).unwrap();
        assert!(user.has_changed("lastname"));
        assert_eq!(user.changed_properties(), vec!["lastname", "age"]);

        user.clear_changes();
        user.set("lastname", "Doe").unwrap();
        assert!(!user.has_changed("lastname"), "same value is not a change");
    }

    #[test]
    fn test_unknown_property() {
        let mut user = Record::new(user_schema());
        assert!(user.set("nickname", "JD").is_err());
        assert!(user.get("nickname").is_err());
        assert!(user.val("nickname").is_null());
    }

    #[test]
    fn test_populate_does_not_flag_changes() {
        let mut user = Record::new(user_schema());
        user.populate_json(
            json!({"lastname": "Doe", "age": 3, "keywords": ["doe"], "entity": {"ref": "entity/e1"}})
                .as_object()
                .unwrap(),
        )
        .unwrap();

        assert_eq!(user.val("lastname"), &Value::from("Doe"));
        assert_eq!(user.val("age"), &Value::Number(3.0));
        assert!(user.changed_properties().is_empty());
        assert!(user.keywords().is_none());
    }

    #[test]
    fn test_label_and_reference() {
        let mut user = Record::new(user_schema());
        assert!(user.to_reference().is_none());

        user.set_uri(ObjectUri::build("user", "u1").unwrap());
        assert_eq!(user.label().as_deref(), Some("u1"));

        user.set("name", "Jane").unwrap();
        let reference = user.to_reference().unwrap();
        assert_eq!(reference.reference, "user/u1");
        assert_eq!(reference.label.as_deref(), Some("Jane"));
    }
}

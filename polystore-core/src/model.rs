//! Model Schemas - Declared Properties of a Record Type
//!
//! TigerStyle: Property kinds are a closed enum. Each property resolves
//! its [`StorageClass`] once, at declaration, and every backend dispatches
//! on that class only.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::SubsecRound;

use crate::constants::{
    DATETIME_SUBSEC_DIGITS_MAX, PROPERTY_CREATED_AT, PROPERTY_CREATED_BY, PROPERTY_DELETED_AT, PROPERTY_DELETED_BY,
    PROPERTY_KEYWORDS, PROPERTY_NAME, PROPERTY_PARENT, PROPERTY_STATUS, PROPERTY_UID,
    PROPERTY_UPDATED_AT, PROPERTY_UPDATED_BY, STATUS_ACTIVE, STATUS_CREATED, STATUS_DELETED,
    STATUS_PENDING, USER_MODEL_NAME,
};
use crate::error::{CoreError, CoreResult};
use crate::value::{DataReference, Value};

// =============================================================================
// Property Kinds
// =============================================================================

/// Target of an object-reference property.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefTarget {
    /// Referenced model name
    pub model: String,
    /// Collection declared by the referenced model, when known
    pub collection: Option<String>,
}

impl RefTarget {
    /// Reference a model whose collection is resolved by adapter mapping.
    #[must_use]
    pub fn model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            collection: None,
        }
    }

    /// Reference a model with a known collection.
    #[must_use]
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }
}

/// Closed set of property kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyKind {
    /// Free text
    String,
    /// 64-bit float
    Number,
    /// 64-bit integer
    Integer,
    /// Boolean
    Boolean,
    /// Text restricted to the listed values
    Enum(Vec<String>),
    /// UTC timestamp
    DateTime,
    /// List of scalars
    Array,
    /// Arbitrary nested object
    Map,
    /// Flat dictionary of text values
    Hash,
    /// Reference to another record
    ObjectRef(RefTarget),
    /// Back-link to records of another model; never persisted
    Collection(String),
}

/// How a property is laid out in a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageClass {
    /// Text column / string field
    Text,
    /// Floating point
    Real,
    /// Integer
    Integer,
    /// Boolean (integer on engines without one)
    Boolean,
    /// Timestamp (text on engines without one)
    Timestamp,
    /// Array of scalars (JSON text on engines without arrays)
    TextArray,
    /// Nested JSON object
    Json,
    /// `{ref, label}` or bare foreign key
    Reference,
    /// Not persisted
    Virtual,
}

impl PropertyKind {
    /// Storage class of this kind.
    #[must_use]
    pub fn storage_class(&self) -> StorageClass {
        match self {
            Self::String | Self::Enum(_) => StorageClass::Text,
            Self::Number => StorageClass::Real,
            Self::Integer => StorageClass::Integer,
            Self::Boolean => StorageClass::Boolean,
            Self::DateTime => StorageClass::Timestamp,
            Self::Array => StorageClass::TextArray,
            Self::Map | Self::Hash => StorageClass::Json,
            Self::ObjectRef(_) => StorageClass::Reference,
            Self::Collection(_) => StorageClass::Virtual,
        }
    }
}

// =============================================================================
// PropertyDef
// =============================================================================

/// One declared property of a model.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDef {
    name: String,
    kind: PropertyKind,
    storage: StorageClass,
    full_search: bool,
    default: Value,
}

impl PropertyDef {
    /// Declare a property.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: PropertyKind) -> Self {
        let storage = kind.storage_class();
        Self {
            name: name.into(),
            kind,
            storage,
            full_search: false,
            default: Value::Null,
        }
    }

    /// Feed this property to the keywords index.
    #[must_use]
    pub fn full_search(mut self) -> Self {
        self.full_search = true;
        self
    }

    /// Initial value for new records.
    #[must_use]
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = value.into();
        self
    }

    /// Property name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared kind.
    #[must_use]
    pub fn kind(&self) -> &PropertyKind {
        &self.kind
    }

    /// Resolved storage class.
    #[must_use]
    pub fn storage(&self) -> StorageClass {
        self.storage
    }

    /// Whether the property feeds the keywords index.
    #[must_use]
    pub fn is_full_search(&self) -> bool {
        self.full_search
    }

    /// Initial value for new records.
    #[must_use]
    pub fn default_value(&self) -> &Value {
        &self.default
    }

    /// Whether the property is stored by backends.
    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.storage != StorageClass::Virtual
    }

    /// Reference target, for object-reference properties.
    #[must_use]
    pub fn reference_target(&self) -> Option<&RefTarget> {
        match &self.kind {
            PropertyKind::ObjectRef(target) => Some(target),
            _ => None,
        }
    }

    /// Validate a value and coerce it to this property's canonical form.
    ///
    /// # Errors
    /// Returns `Validation` if the value does not fit the kind.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::float_cmp
    )]
    pub fn coerce(&self, value: Value) -> CoreResult<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }

        let reject = |value: &Value| {
            CoreError::validation(
                &self.name,
                format!("{value:?} is not a valid {:?}", self.kind),
            )
        };

        match (&self.kind, value) {
            (PropertyKind::String, v @ Value::String(_)) => Ok(v),
            (PropertyKind::Enum(allowed), Value::String(s)) => {
                if allowed.iter().any(|a| a == &s) {
                    Ok(Value::String(s))
                } else {
                    Err(CoreError::validation(
                        &self.name,
                        format!("'{s}' is not one of {allowed:?}"),
                    ))
                }
            }
            (PropertyKind::Number, v @ Value::Number(_)) => Ok(v),
            (PropertyKind::Number, Value::Integer(i)) => Ok(Value::Number(i as f64)),
            (PropertyKind::Integer, v @ Value::Integer(_)) => Ok(v),
            (PropertyKind::Integer, Value::Number(n)) if n.fract() == 0.0 => {
                Ok(Value::Integer(n as i64))
            }
            (PropertyKind::Boolean, v @ Value::Bool(_)) => Ok(v),
            (PropertyKind::Boolean, Value::Integer(i)) if i == 0 || i == 1 => {
                Ok(Value::Bool(i == 1))
            }
            (PropertyKind::DateTime, Value::DateTime(dt)) => {
                Ok(Value::DateTime(dt.trunc_subsecs(DATETIME_SUBSEC_DIGITS_MAX)))
            }
            (PropertyKind::DateTime, Value::String(s)) => {
                chrono::DateTime::parse_from_rfc3339(&s)
                    .map(|dt| {
                        Value::DateTime(
                            dt.with_timezone(&chrono::Utc)
                                .trunc_subsecs(DATETIME_SUBSEC_DIGITS_MAX),
                        )
                    })
                    .map_err(|e| CoreError::validation(&self.name, e.to_string()))
            }
            (PropertyKind::Array | PropertyKind::Collection(_), v @ Value::Array(_)) => Ok(v),
            (PropertyKind::Map, v @ Value::Map(_)) => Ok(v),
            (PropertyKind::Hash, Value::Map(map)) => {
                if map.values().all(|v| matches!(v, Value::String(_) | Value::Null)) {
                    Ok(Value::Map(map))
                } else {
                    Err(CoreError::validation(&self.name, "hash values must be text"))
                }
            }
            (PropertyKind::ObjectRef(_), v @ Value::Reference(_)) => Ok(v),
            (PropertyKind::ObjectRef(target), Value::String(s)) => {
                self.reference_from_text(target, s)
            }
            (_, other) => Err(reject(&other)),
        }
    }

    /// A bare id needs the target collection to become a path.
    fn reference_from_text(&self, target: &RefTarget, text: String) -> CoreResult<Value> {
        if text.contains('/') {
            return Ok(Value::Reference(DataReference::new(text, None)));
        }
        match &target.collection {
            Some(collection) => Ok(Value::Reference(DataReference::new(
                format!("{collection}/{text}"),
                None,
            ))),
            None => Err(CoreError::validation(
                &self.name,
                format!("bare id '{text}' needs a collection for model {}", target.model),
            )),
        }
    }
}

// =============================================================================
// ModelSchema
// =============================================================================

/// Declared shape of a record type.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSchema {
    name: String,
    collection: String,
    properties: Vec<PropertyDef>,
    index: HashMap<String, usize>,
    label_property: Option<String>,
    parent_property: Option<String>,
}

impl ModelSchema {
    /// Start declaring a model.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ModelSchemaBuilder {
        ModelSchemaBuilder::new(name)
    }

    /// Model name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared collection name.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// All properties in declaration order.
    #[must_use]
    pub fn properties(&self) -> &[PropertyDef] {
        &self.properties
    }

    /// Look up a property by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.index.get(name).map(|&i| &self.properties[i])
    }

    /// Whether the property is declared.
    #[must_use]
    pub fn has_property(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Properties that backends store.
    pub fn persisted_properties(&self) -> impl Iterator<Item = &PropertyDef> {
        self.properties.iter().filter(|p| p.is_persisted())
    }

    /// Object-reference properties.
    pub fn reference_properties(&self) -> impl Iterator<Item = &PropertyDef> {
        self.properties
            .iter()
            .filter(|p| p.storage() == StorageClass::Reference)
    }

    /// Properties flagged for keyword indexing.
    pub fn full_search_properties(&self) -> impl Iterator<Item = &PropertyDef> {
        self.properties.iter().filter(|p| p.is_full_search())
    }

    /// Property used as display label.
    #[must_use]
    pub fn label_property(&self) -> Option<&str> {
        self.label_property.as_deref()
    }

    /// Reference property pointing at the owning record, for nested storage.
    #[must_use]
    pub fn parent_property(&self) -> Option<&str> {
        self.parent_property.as_deref()
    }

    /// Check a filter or sort property path against the schema.
    ///
    /// Accepts declared properties, the primary-key pseudo property, the
    /// keywords pseudo property, and `reference.column` paths whose head is
    /// a declared reference property.
    ///
    /// # Errors
    /// Returns `UnknownProperty` otherwise.
    pub fn check_property_path(&self, path: &str) -> CoreResult<()> {
        if path == PROPERTY_UID || path == PROPERTY_KEYWORDS || self.has_property(path) {
            return Ok(());
        }
        if let Some((head, tail)) = path.split_once('.') {
            let is_ref = self
                .property(head)
                .is_some_and(|p| p.storage() == StorageClass::Reference);
            if is_ref && !tail.is_empty() {
                return Ok(());
            }
        }
        Err(CoreError::unknown_property(&self.name, path))
    }
}

// =============================================================================
// ModelSchemaBuilder
// =============================================================================

/// Builder for [`ModelSchema`].
#[derive(Debug)]
pub struct ModelSchemaBuilder {
    name: String,
    collection: Option<String>,
    properties: Vec<PropertyDef>,
    label_property: Option<String>,
    parent_property: Option<String>,
}

impl ModelSchemaBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collection: None,
            properties: Vec::new(),
            label_property: None,
            parent_property: None,
        }
    }

    /// Collection name. Defaults to the lower-cased model name.
    #[must_use]
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Add a property.
    #[must_use]
    pub fn property(mut self, property: PropertyDef) -> Self {
        self.properties.push(property);
        self
    }

    /// Add a text property.
    #[must_use]
    pub fn string(self, name: &str) -> Self {
        self.property(PropertyDef::new(name, PropertyKind::String))
    }

    /// Add a float property.
    #[must_use]
    pub fn number(self, name: &str) -> Self {
        self.property(PropertyDef::new(name, PropertyKind::Number))
    }

    /// Add an integer property.
    #[must_use]
    pub fn integer(self, name: &str) -> Self {
        self.property(PropertyDef::new(name, PropertyKind::Integer))
    }

    /// Add a boolean property.
    #[must_use]
    pub fn boolean(self, name: &str) -> Self {
        self.property(PropertyDef::new(name, PropertyKind::Boolean))
    }

    /// Add a timestamp property.
    #[must_use]
    pub fn datetime(self, name: &str) -> Self {
        self.property(PropertyDef::new(name, PropertyKind::DateTime))
    }

    /// Add an array property.
    #[must_use]
    pub fn array(self, name: &str) -> Self {
        self.property(PropertyDef::new(name, PropertyKind::Array))
    }

    /// Add an object-reference property.
    #[must_use]
    pub fn reference(self, name: &str, target: RefTarget) -> Self {
        self.property(PropertyDef::new(name, PropertyKind::ObjectRef(target)))
    }

    /// Use this property as display label.
    #[must_use]
    pub fn label_property(mut self, name: impl Into<String>) -> Self {
        self.label_property = Some(name.into());
        self
    }

    /// Use this reference property as owning parent for nested storage.
    #[must_use]
    pub fn parent_property(mut self, name: impl Into<String>) -> Self {
        self.parent_property = Some(name.into());
        self
    }

    /// Add the stock metadata properties: `name`, `status` and the
    /// created/updated/deleted stamps.
    #[must_use]
    pub fn with_base_properties(self) -> Self {
        let user = || PropertyKind::ObjectRef(RefTarget::model(USER_MODEL_NAME));
        let statuses = [STATUS_CREATED, STATUS_PENDING, STATUS_ACTIVE, STATUS_DELETED]
            .iter()
            .map(|s| (*s).to_string())
            .collect();

        self.property(PropertyDef::new(PROPERTY_NAME, PropertyKind::String).full_search())
            .property(
                PropertyDef::new(PROPERTY_STATUS, PropertyKind::Enum(statuses))
                    .with_default(STATUS_CREATED),
            )
            .property(PropertyDef::new(PROPERTY_CREATED_AT, PropertyKind::DateTime))
            .property(PropertyDef::new(PROPERTY_CREATED_BY, user()))
            .property(PropertyDef::new(PROPERTY_UPDATED_AT, PropertyKind::DateTime))
            .property(PropertyDef::new(PROPERTY_UPDATED_BY, user()))
            .property(PropertyDef::new(PROPERTY_DELETED_AT, PropertyKind::DateTime))
            .property(PropertyDef::new(PROPERTY_DELETED_BY, user()))
    }

    /// Finish the schema.
    ///
    /// # Errors
    /// Returns `Validation` on duplicate or reserved property names, or when
    /// the label/parent property is not declared.
    pub fn build(self) -> CoreResult<Arc<ModelSchema>> {
        let mut index = HashMap::with_capacity(self.properties.len());
        for (i, property) in self.properties.iter().enumerate() {
            let name = property.name();
            if name.is_empty() || name == PROPERTY_UID || name == PROPERTY_KEYWORDS {
                return Err(CoreError::validation(name, "reserved property name"));
            }
            if index.insert(name.to_string(), i).is_some() {
                return Err(CoreError::validation(name, "declared twice"));
            }
        }

        let label_property = match self.label_property {
            Some(label) if !index.contains_key(&label) => {
                return Err(CoreError::unknown_property(&self.name, label));
            }
            Some(label) => Some(label),
            None => index
                .contains_key(PROPERTY_NAME)
                .then(|| PROPERTY_NAME.to_string()),
        };

        let is_ref = |name: &str| {
            index
                .get(name)
                .is_some_and(|&i| self.properties[i].storage() == StorageClass::Reference)
        };
        let parent_property = match self.parent_property {
            Some(parent) if !is_ref(&parent) => {
                return Err(CoreError::validation(parent, "parent must be a reference"));
            }
            Some(parent) => Some(parent),
            None => is_ref(PROPERTY_PARENT).then(|| PROPERTY_PARENT.to_string()),
        };

        let collection = self
            .collection
            .unwrap_or_else(|| self.name.to_lowercase());

        Ok(Arc::new(ModelSchema {
            name: self.name,
            collection,
            properties: self.properties,
            index,
            label_property,
            parent_property,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_schema() -> Arc<ModelSchema> {
        ModelSchema::builder("User")
            .with_base_properties()
            .string("firstname")
            .string("lastname")
            .reference("entity", RefTarget::model("Entity").with_collection("entity"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_storage_class_resolved_once() {
        let schema = user_schema();
        assert_eq!(schema.property("lastname").unwrap().storage(), StorageClass::Text);
        assert_eq!(schema.property("status").unwrap().storage(), StorageClass::Text);
        assert_eq!(schema.property("entity").unwrap().storage(), StorageClass::Reference);
        assert_eq!(schema.collection(), "user");
        assert_eq!(schema.label_property(), Some("name"));
    }

    #[test]
    fn test_reserved_and_duplicate_names() {
        let err = ModelSchema::builder("X").string("uid").build().unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));

        let err = ModelSchema::builder("X").string("a").string("a").build().unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[test]
    fn test_datetime_truncated_to_micros() {
        let property = PropertyDef::new("born_at", PropertyKind::DateTime);
        let expected = chrono::DateTime::parse_from_rfc3339("2024-01-02T03:04:05.123456Z")
            .unwrap()
            .with_timezone(&chrono::Utc);

        let from_text = property
            .coerce(Value::from("2024-01-02T03:04:05.123456789Z"))
            .unwrap();
        assert_eq!(from_text, Value::DateTime(expected));

        let precise = expected + chrono::Duration::nanoseconds(789);
        assert_eq!(property.coerce(Value::DateTime(precise)).unwrap(), Value::DateTime(expected));
    }

    #[test]
    fn test_property_paths() {
        let schema = user_schema();
        assert!(schema.check_property_path("lastname").is_ok());
        assert!(schema.check_property_path("uid").is_ok());
        assert!(schema.check_property_path("keywords").is_ok());
        assert!(schema.check_property_path("entity.name").is_ok());
        assert!(schema.check_property_path("lastname.x").is_err());
        assert!(schema.check_property_path("nickname").is_err());
    }

    #[test]
    fn test_coerce_enum_and_numbers() {
        let schema = user_schema();
        let status = schema.property("status").unwrap();
        assert!(status.coerce(Value::from("deleted")).is_ok());
        assert!(status.coerce(Value::from("gone")).is_err());

        let age = PropertyDef::new("age", PropertyKind::Number);
        assert_eq!(age.coerce(Value::Integer(3)).unwrap(), Value::Number(3.0));
        assert!(age.coerce(Value::from("three")).is_err());
    }

    #[test]
    fn test_coerce_reference_from_bare_id() {
        let schema = user_schema();
        let entity = schema.property("entity").unwrap();
        let value = entity.coerce(Value::from("e1")).unwrap();
        assert_eq!(value.as_reference().unwrap().reference, "entity/e1");

        let unmapped = PropertyDef::new("owner", PropertyKind::ObjectRef(RefTarget::model("Org")));
        assert!(unmapped.coerce(Value::from("o1")).is_err());
        assert!(unmapped.coerce(Value::from("org/o1")).is_ok());
    }

    #[test]
    fn test_parent_property_defaults() {
        let schema = ModelSchema::builder("Comment")
            .reference("parent", RefTarget::model("Post").with_collection("post"))
            .build()
            .unwrap();
        assert_eq!(schema.parent_property(), Some("parent"));

        let err = ModelSchema::builder("Comment")
            .string("owner")
            .parent_property("owner")
            .build()
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }
}

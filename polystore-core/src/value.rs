//! Values - What a Property Holds
//!
//! TigerStyle: One closed value enum, converted to and from JSON by
//! storage class rather than by inspecting runtime types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map as JsonMap, Value as Json};

use crate::constants::PATH_SEPARATOR;
use crate::error::{CoreError, CoreResult};
use crate::model::StorageClass;
use crate::uri::ObjectUri;

// =============================================================================
// DataReference
// =============================================================================

/// Wire form of an object reference: `{ref: "<collection>/<uid>", label}`.
///
/// Every backend produces this shape for reference properties, whatever it
/// stores natively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataReference {
    /// Full path of the referenced record
    #[serde(rename = "ref")]
    pub reference: String,
    /// Display label of the referenced record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl DataReference {
    /// Create a reference to a path.
    #[must_use]
    pub fn new(reference: impl Into<String>, label: Option<String>) -> Self {
        Self {
            reference: reference.into(),
            label,
        }
    }

    /// Reference the record at an address, keeping its label.
    #[must_use]
    pub fn from_uri(uri: &ObjectUri) -> Self {
        Self {
            reference: uri.path(),
            label: uri.label().map(str::to_string),
        }
    }

    /// Address of the referenced record.
    ///
    /// # Errors
    /// Returns `MalformedPath` if the stored path is invalid.
    pub fn uri(&self) -> CoreResult<ObjectUri> {
        let uri = ObjectUri::parse(&self.reference)?;
        Ok(match &self.label {
            Some(label) => uri.with_label(label.clone()),
            None => uri,
        })
    }

    /// Raw identifier of the referenced record (last path segment).
    #[must_use]
    pub fn uid(&self) -> &str {
        self.reference
            .rsplit(PATH_SEPARATOR)
            .next()
            .unwrap_or(&self.reference)
    }

    /// Encode as a JSON object.
    #[must_use]
    pub fn to_json(&self) -> Json {
        match &self.label {
            Some(label) => json!({ "ref": self.reference, "label": label }),
            None => json!({ "ref": self.reference }),
        }
    }

    /// Decode from a JSON object carrying at least `ref`.
    #[must_use]
    pub fn from_json(value: &Json) -> Option<Self> {
        let obj = value.as_object()?;
        let reference = obj.get("ref").and_then(Json::as_str)?;
        let label = obj
            .get("label")
            .and_then(Json::as_str)
            .map(str::to_string);
        Some(Self::new(reference, label))
    }
}

// =============================================================================
// Value
// =============================================================================

/// Value held by a record property or carried by a filter.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Absent value
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit integer
    Integer(i64),
    /// 64-bit float
    Number(f64),
    /// UTF-8 text
    String(String),
    /// UTC timestamp
    DateTime(DateTime<Utc>),
    /// Ordered list
    Array(Vec<Value>),
    /// String-keyed map
    Map(BTreeMap<String, Value>),
    /// Reference to another record
    Reference(DataReference),
}

impl Value {
    /// Whether this is `Null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Borrow as text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Read as a float, widening integers.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Read as an integer.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Read as a boolean.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Borrow as a list.
    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Borrow as a reference.
    #[must_use]
    pub fn as_reference(&self) -> Option<&DataReference> {
        match self {
            Self::Reference(r) => Some(r),
            _ => None,
        }
    }

    /// Plain text rendering used for labels and keyword extraction.
    #[must_use]
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Bool(b) => Some(b.to_string()),
            Self::Integer(i) => Some(i.to_string()),
            Self::Number(n) => Some(n.to_string()),
            Self::String(s) => Some(s.clone()),
            Self::DateTime(dt) => Some(dt.to_rfc3339()),
            Self::Reference(r) => r.label.clone().or_else(|| Some(r.reference.clone())),
            Self::Array(items) => Some(
                items
                    .iter()
                    .filter_map(Value::to_text)
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            Self::Map(map) => Some(
                map.values()
                    .filter_map(Value::to_text)
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
        }
    }

    /// Encode as JSON. Timestamps become RFC 3339 strings.
    #[must_use]
    pub fn to_json(&self) -> Json {
        match self {
            Self::Null => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Integer(i) => Json::from(*i),
            Self::Number(n) => serde_json::Number::from_f64(*n).map_or(Json::Null, Json::Number),
            Self::String(s) => Json::String(s.clone()),
            Self::DateTime(dt) => Json::String(dt.to_rfc3339()),
            Self::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Self::Map(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect::<JsonMap<String, Json>>(),
            ),
            Self::Reference(r) => r.to_json(),
        }
    }

    /// Decode JSON without a declared storage class.
    ///
    /// Objects carrying a string `ref` decode as references.
    #[must_use]
    pub fn from_json_untyped(json: &Json) -> Self {
        match json {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(*b),
            Json::Number(n) => n
                .as_i64()
                .map_or_else(|| Self::Number(n.as_f64().unwrap_or(0.0)), Self::Integer),
            Json::String(s) => Self::String(s.clone()),
            Json::Array(items) => Self::Array(items.iter().map(Self::from_json_untyped).collect()),
            Json::Object(obj) => match DataReference::from_json(json) {
                Some(reference) if obj.len() <= 3 => Self::Reference(reference),
                _ => Self::Map(
                    obj.iter()
                        .map(|(k, v)| (k.clone(), Self::from_json_untyped(v)))
                        .collect(),
                ),
            },
        }
    }

    /// Decode JSON for a property of the given storage class.
    ///
    /// # Errors
    /// Returns `Validation` when the JSON shape does not fit the class.
    pub fn from_json(property: &str, class: StorageClass, json: &Json) -> CoreResult<Self> {
        if json.is_null() {
            return Ok(Self::Null);
        }

        let mismatch =
            || CoreError::validation(property, format!("cannot decode {json} as {class:?}"));

        match class {
            StorageClass::Text => json.as_str().map(Self::from).ok_or_else(mismatch),
            StorageClass::Real => json.as_f64().map(Self::Number).ok_or_else(mismatch),
            StorageClass::Integer => json.as_i64().map(Self::Integer).ok_or_else(mismatch),
            StorageClass::Boolean => match json {
                Json::Bool(b) => Ok(Self::Bool(*b)),
                Json::Number(n) => Ok(Self::Bool(n.as_i64().unwrap_or(0) != 0)),
                _ => Err(mismatch()),
            },
            StorageClass::Timestamp => {
                let text = json.as_str().ok_or_else(mismatch)?;
                DateTime::parse_from_rfc3339(text)
                    .map(|dt| Self::DateTime(dt.with_timezone(&Utc)))
                    .map_err(|_| mismatch())
            }
            StorageClass::TextArray => match json {
                Json::Array(items) => Ok(Self::Array(
                    items.iter().map(Self::from_json_untyped).collect(),
                )),
                _ => Err(mismatch()),
            },
            StorageClass::Json => match json {
                Json::Object(_) => Ok(Self::from_json_untyped(json)),
                _ => Err(mismatch()),
            },
            StorageClass::Reference => match json {
                Json::String(s) => Ok(Self::String(s.clone())),
                _ => DataReference::from_json(json)
                    .map(Self::Reference)
                    .ok_or_else(mismatch),
            },
            StorageClass::Virtual => Ok(Self::Null),
        }
    }
}

// =============================================================================
// Conversions
// =============================================================================

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::DateTime(dt)
    }
}

impl From<DataReference> for Value {
    fn from(r: DataReference) -> Self {
        Self::Reference(r)
    }
}

impl From<&ObjectUri> for Value {
    fn from(uri: &ObjectUri) -> Self {
        Self::Reference(DataReference::from_uri(uri))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_json_shape() {
        let r = DataReference::new("entity/e1", Some("Acme".to_string()));
        assert_eq!(r.to_json(), json!({"ref": "entity/e1", "label": "Acme"}));
        assert_eq!(DataReference::from_json(&r.to_json()), Some(r.clone()));
        assert_eq!(r.uid(), "e1");
        assert_eq!(r.uri().unwrap().label(), Some("Acme"));
    }

    #[test]
    fn test_reference_from_uri() {
        let uri = ObjectUri::parse("users/u1/posts/p1").unwrap().with_label("Hi");
        let value = Value::from(&uri);
        let r = value.as_reference().unwrap();
        assert_eq!(r.reference, "users/u1/posts/p1");
        assert_eq!(r.uid(), "p1");
    }

    #[test]
    fn test_untyped_json_decoding() {
        assert_eq!(Value::from_json_untyped(&json!(3)), Value::Integer(3));
        assert_eq!(Value::from_json_untyped(&json!(1.5)), Value::Number(1.5));
        assert!(matches!(
            Value::from_json_untyped(&json!({"ref": "a/b", "label": "x"})),
            Value::Reference(_)
        ));
        assert!(matches!(
            Value::from_json_untyped(&json!({"color": "red"})),
            Value::Map(_)
        ));
    }

    #[test]
    fn test_timestamp_round_trip_through_json() {
        let now = Utc::now();
        let json = Value::DateTime(now).to_json();
        let back = Value::from_json("at", StorageClass::Timestamp, &json).unwrap();
        assert_eq!(back, Value::DateTime(now));
    }

    #[test]
    fn test_typed_decoding_rejects_mismatch() {
        let err = Value::from_json("age", StorageClass::Real, &json!("old")).unwrap_err();
        assert!(matches!(err, CoreError::Validation { ref property, .. } if property == "age"));
    }

    #[test]
    fn test_sqlite_style_booleans() {
        assert_eq!(
            Value::from_json("flag", StorageClass::Boolean, &json!(1)).unwrap(),
            Value::Bool(true)
        );
    }
}

//! Message payload: authoritative raw bytes plus typed properties.

// Layer 1: Standard library imports
use std::collections::BTreeMap;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
use crate::error::EngineError;

/// A typed property value attached to a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum PropertyValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Datetime(DateTime<Utc>),
    Bytes(Vec<u8>),
    List(Vec<PropertyValue>),
    Dict(BTreeMap<String, PropertyValue>),
}

impl PropertyValue {
    /// Approximate encoded size in bytes, used for `max_size` enforcement.
    pub fn size(&self) -> usize {
        match self {
            PropertyValue::String(s) => s.len(),
            PropertyValue::Int(_) | PropertyValue::Float(_) => 8,
            PropertyValue::Bool(_) => 1,
            PropertyValue::Datetime(_) => 8,
            PropertyValue::Bytes(b) => b.len(),
            PropertyValue::List(items) => items.iter().map(PropertyValue::size).sum(),
            PropertyValue::Dict(map) => map.iter().map(|(k, v)| k.len() + v.size()).sum(),
        }
    }

    /// Name of the property type, for validation messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::String(_) => "string",
            PropertyValue::Int(_) => "int",
            PropertyValue::Float(_) => "float",
            PropertyValue::Bool(_) => "bool",
            PropertyValue::Datetime(_) => "datetime",
            PropertyValue::Bytes(_) => "bytes",
            PropertyValue::List(_) => "list",
            PropertyValue::Dict(_) => "dict",
        }
    }
}

/// A property value with an optional size constraint.
///
/// Size constraints are enforced at construction; a violating value never
/// enters the engine.
///
/// # Examples
///
/// ```rust
/// use interlink_engine::message::{PropertyValue, TypedProperty};
///
/// let ok = TypedProperty::new(PropertyValue::String("NHS123".into()), Some(16));
/// assert!(ok.is_ok());
///
/// let too_big = TypedProperty::new(PropertyValue::String("x".repeat(32)), Some(16));
/// assert!(too_big.is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedProperty {
    pub value: PropertyValue,
    pub max_size: Option<usize>,
}

impl TypedProperty {
    /// Construct a property, enforcing `max_size` if present.
    pub fn new(value: PropertyValue, max_size: Option<usize>) -> Result<Self, EngineError> {
        if let Some(limit) = max_size {
            let actual = value.size();
            if actual > limit {
                return Err(EngineError::Validation {
                    reason: format!(
                        "{} property of {actual} bytes exceeds max_size {limit}",
                        value.type_name()
                    ),
                });
            }
        }
        Ok(Self { value, max_size })
    }

    /// Construct an unconstrained property.
    pub fn unbounded(value: PropertyValue) -> Self {
        Self {
            value,
            max_size: None,
        }
    }
}

/// Content half of a message: raw bytes are authoritative and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Authoritative raw content.
    pub raw: Vec<u8>,
    /// MIME content type, e.g. `application/hl7-v2+er7`.
    pub content_type: String,
    /// Character encoding of `raw`.
    pub encoding: String,
    /// Typed properties keyed by name.
    pub properties: BTreeMap<String, TypedProperty>,
}

impl Payload {
    /// Create a payload from raw bytes.
    pub fn new(raw: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            content_type: content_type.into(),
            encoding: "utf-8".into(),
            properties: BTreeMap::new(),
        }
    }

    /// Look up a property by name.
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name).map(|p| &p.value)
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Returns `true` when the payload carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_size_enforced_at_construction() {
        let result = TypedProperty::new(PropertyValue::Bytes(vec![0u8; 100]), Some(10));
        assert!(matches!(result, Err(EngineError::Validation { .. })));
    }

    #[test]
    fn test_property_within_limit() {
        let prop = TypedProperty::new(PropertyValue::String("ok".into()), Some(10));
        assert!(prop.is_ok());
    }

    #[test]
    fn test_property_unbounded() {
        let prop = TypedProperty::unbounded(PropertyValue::Bytes(vec![0u8; 1 << 20]));
        assert!(prop.max_size.is_none());
    }

    #[test]
    fn test_nested_sizes() {
        let list = PropertyValue::List(vec![
            PropertyValue::String("abc".into()),
            PropertyValue::Bytes(vec![0u8; 5]),
        ]);
        assert_eq!(list.size(), 8);

        let mut map = BTreeMap::new();
        map.insert("k".to_string(), PropertyValue::String("vv".into()));
        assert_eq!(PropertyValue::Dict(map).size(), 3);
    }

    #[test]
    fn test_payload_accessors() {
        let mut payload = Payload::new(b"MSH|".to_vec(), "application/hl7-v2+er7");
        payload.properties.insert(
            "facility".into(),
            TypedProperty::unbounded(PropertyValue::String("F1".into())),
        );

        assert_eq!(payload.len(), 4);
        assert!(!payload.is_empty());
        assert_eq!(
            payload.property("facility"),
            Some(&PropertyValue::String("F1".into()))
        );
        assert_eq!(payload.property("missing"), None);
    }

    #[test]
    fn test_payload_json_roundtrip() {
        #[allow(clippy::unwrap_used)]
        {
            let payload = Payload::new(b"PID|1".to_vec(), "text/plain");
            let json = serde_json::to_string(&payload).unwrap();
            let back: Payload = serde_json::from_str(&json).unwrap();
            assert_eq!(payload, back);
        }
    }
}

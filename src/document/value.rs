use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{Map, Value as JsonValue};

use super::facet::Facet;

/// A typed field value
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Str(String),
    U64(u64),
    I64(i64),
    F64(f64),
    Bytes(Vec<u8>),
    Facet(Facet),
    Json(Map<String, JsonValue>),
}

impl Value {
    /// Name of the value's kind, for error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "text",
            Value::U64(_) => "u64",
            Value::I64(_) => "i64",
            Value::F64(_) => "f64",
            Value::Bytes(_) => "bytes",
            Value::Facet(_) => "facet",
            Value::Json(_) => "json",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_facet(&self) -> Option<&Facet> {
        match self {
            Value::Facet(f) => Some(f),
            _ => None,
        }
    }

    /// JSON rendering: bytes are base64 encoded, facets become path strings
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Str(s) => JsonValue::String(s.clone()),
            Value::U64(v) => JsonValue::from(*v),
            Value::I64(v) => JsonValue::from(*v),
            Value::F64(v) => JsonValue::from(*v),
            Value::Bytes(b) => JsonValue::String(STANDARD.encode(b)),
            Value::Facet(f) => JsonValue::String(f.to_string()),
            Value::Json(map) => JsonValue::Object(map.clone()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::U64(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::I64(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::F64(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<Facet> for Value {
    fn from(value: Facet) -> Self {
        Value::Facet(value)
    }
}

impl From<Map<String, JsonValue>> for Value {
    fn from(value: Map<String, JsonValue>) -> Self {
        Value::Json(value)
    }
}

/// A raw document: field names mapped to one or more values.
///
/// Carries no identity; the writer assigns an ordinal when it is indexed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Document {
    fields: BTreeMap<String, Vec<Value>>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value to a field
    pub fn add(&mut self, field: &str, value: impl Into<Value>) {
        self.fields
            .entry(field.to_string())
            .or_default()
            .push(value.into());
    }

    /// Builder-style `add`
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.add(field, value);
        self
    }

    /// Replace all values of a field
    pub fn set_values(&mut self, field: &str, values: Vec<Value>) {
        self.fields.insert(field.to_string(), values);
    }

    pub fn get_first(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).and_then(|values| values.first())
    }

    pub fn get_all(&self, field: &str) -> &[Value] {
        self.fields.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Value])> {
        self.fields
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// JSON object with one entry per field; single values are unwrapped,
    /// multi-valued fields become arrays.
    pub fn to_json(&self) -> JsonValue {
        let mut object = Map::new();
        for (name, values) in &self.fields {
            let rendered = if values.len() == 1 {
                values[0].to_json()
            } else {
                JsonValue::Array(values.iter().map(Value::to_json).collect())
            };
            object.insert(name.clone(), rendered);
        }
        JsonValue::Object(object)
    }
}

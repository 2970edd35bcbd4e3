//! Document codec: validates raw documents against a schema and encodes the
//! stored subset for the document store.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::facet::Facet;
use super::value::{Document, Value};
use crate::error::{LoupeError, Result, SchemaViolation};
use crate::schema::{FieldId, FieldKind, Schema};

/// A document validated against a schema, values keyed by field id
#[derive(Clone, Debug, PartialEq)]
pub struct EncodedDocument {
    values: Vec<(FieldId, Value)>,
}

impl EncodedDocument {
    /// All values ordered by field id, insertion order within a field
    pub fn values(&self) -> &[(FieldId, Value)] {
        &self.values
    }

    pub fn values_for(&self, field: FieldId) -> impl Iterator<Item = &Value> {
        self.values
            .iter()
            .filter(move |(id, _)| *id == field)
            .map(|(_, value)| value)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Rough heap footprint, used for writer memory accounting
    pub fn heap_size(&self) -> usize {
        self.values
            .iter()
            .map(|(_, value)| {
                std::mem::size_of::<(FieldId, Value)>()
                    + match value {
                        Value::Str(s) => s.len(),
                        Value::Bytes(b) => b.len(),
                        Value::Facet(f) => f.as_str().len(),
                        Value::Json(map) => map.len() * 64,
                        _ => 0,
                    }
            })
            .sum()
    }
}

fn mismatch(field: &str, kind: FieldKind, actual: &str) -> SchemaViolation {
    SchemaViolation::TypeMismatch {
        field: field.to_string(),
        expected: kind.name().to_string(),
        actual: actual.to_string(),
    }
}

/// `v` as f64, if the conversion is exact
fn u64_to_f64_exact(v: u64) -> Option<f64> {
    let f = v as f64;
    // 2^64 saturates back to u64::MAX, so bound it explicitly
    (f < 18_446_744_073_709_551_616.0 && f as u64 == v).then_some(f)
}

fn i64_to_f64_exact(v: i64) -> Option<f64> {
    let f = v as f64;
    (f < 9_223_372_036_854_775_808.0 && f as i64 == v).then_some(f)
}

/// Check a value against a field kind, applying lossless numeric widening
fn coerce(field: &str, kind: FieldKind, value: &Value) -> std::result::Result<Value, SchemaViolation> {
    let coerced = match (kind, value) {
        (FieldKind::Text, Value::Str(_))
        | (FieldKind::U64, Value::U64(_))
        | (FieldKind::I64, Value::I64(_))
        | (FieldKind::F64, Value::F64(_))
        | (FieldKind::Bytes, Value::Bytes(_))
        | (FieldKind::Facet, Value::Facet(_))
        | (FieldKind::Json, Value::Json(_)) => value.clone(),
        (FieldKind::U64, Value::I64(v)) if *v >= 0 => Value::U64(*v as u64),
        (FieldKind::I64, Value::U64(v)) if *v <= i64::MAX as u64 => Value::I64(*v as i64),
        (FieldKind::F64, Value::U64(v)) => match u64_to_f64_exact(*v) {
            Some(f) => Value::F64(f),
            None => return Err(mismatch(field, kind, "u64 without an exact f64 form")),
        },
        (FieldKind::F64, Value::I64(v)) => match i64_to_f64_exact(*v) {
            Some(f) => Value::F64(f),
            None => return Err(mismatch(field, kind, "i64 without an exact f64 form")),
        },
        (FieldKind::Facet, Value::Str(path)) => Value::Facet(Facet::from_path(path)?),
        _ => return Err(mismatch(field, kind, value.kind_name())),
    };
    Ok(coerced)
}

/// Validate `doc` against `schema`.
///
/// Every field must exist and every value must match its field's kind.
/// Fields absent from the document are simply omitted.
pub fn encode(schema: &Schema, doc: &Document) -> Result<EncodedDocument> {
    let mut values = Vec::new();
    for (name, field_values) in doc.iter() {
        let field = schema.get_field(name)?;
        if field_values.is_empty() {
            return Err(SchemaViolation::MissingRequiredValue(name.to_string()).into());
        }
        let kind = schema.entry(field).kind;
        for value in field_values {
            values.push((field, coerce(name, kind, value)?));
        }
    }
    // stable: keeps insertion order within a field
    values.sort_by_key(|(field, _)| *field);
    Ok(EncodedDocument { values })
}

/// Rebuild a raw document from an encoded one
pub fn decode(schema: &Schema, encoded: &EncodedDocument) -> Document {
    let mut doc = Document::new();
    for (field, value) in &encoded.values {
        doc.add(schema.field_name(*field), value.clone());
    }
    doc
}

fn json_to_value(field: &str, kind: FieldKind, json: &JsonValue) -> std::result::Result<Value, SchemaViolation> {
    let actual = || match json {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    };
    let value = match (kind, json) {
        (FieldKind::Text, JsonValue::String(s)) => Value::Str(s.clone()),
        (FieldKind::U64, JsonValue::Number(n)) => {
            Value::U64(n.as_u64().ok_or_else(|| mismatch(field, kind, &n.to_string()))?)
        }
        (FieldKind::I64, JsonValue::Number(n)) => {
            Value::I64(n.as_i64().ok_or_else(|| mismatch(field, kind, &n.to_string()))?)
        }
        (FieldKind::F64, JsonValue::Number(n)) => {
            let exact = if let Some(v) = n.as_u64() {
                u64_to_f64_exact(v)
            } else if let Some(v) = n.as_i64() {
                i64_to_f64_exact(v)
            } else {
                n.as_f64()
            };
            Value::F64(exact.ok_or_else(|| mismatch(field, kind, &n.to_string()))?)
        }
        (FieldKind::Bytes, JsonValue::String(s)) => Value::Bytes(
            STANDARD
                .decode(s)
                .map_err(|_| mismatch(field, kind, "string that is not valid base64"))?,
        ),
        (FieldKind::Facet, JsonValue::String(s)) => Value::Facet(Facet::from_path(s)?),
        (FieldKind::Json, JsonValue::Object(map)) => Value::Json(map.clone()),
        _ => return Err(mismatch(field, kind, actual())),
    };
    Ok(value)
}

impl Document {
    /// Parse a JSON object into a document typed by `schema`.
    ///
    /// Arrays become multi-valued fields; `bytes` fields expect base64 strings.
    pub fn from_json(schema: &Schema, json: &str) -> Result<Document> {
        let parsed: JsonValue = serde_json::from_str(json)?;
        Self::from_json_value(schema, &parsed)
    }

    pub fn from_json_value(schema: &Schema, json: &JsonValue) -> Result<Document> {
        let object = json.as_object().ok_or_else(|| {
            LoupeError::InvalidArgument("a document must be a JSON object".to_string())
        })?;
        let mut doc = Document::new();
        for (name, raw) in object {
            let field = schema.get_field(name)?;
            let kind = schema.entry(field).kind;
            let items: Vec<&JsonValue> = match raw {
                JsonValue::Array(items) if kind != FieldKind::Json || items.iter().all(JsonValue::is_object) => {
                    items.iter().collect()
                }
                JsonValue::Null => Vec::new(),
                other => vec![other],
            };
            if items.is_empty() {
                return Err(SchemaViolation::MissingRequiredValue(name.clone()).into());
            }
            let values = items
                .into_iter()
                .map(|item| json_to_value(name, kind, item))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            doc.set_values(name, values);
        }
        Ok(doc)
    }
}

/// Stored representation; JSON objects are kept as text so the record stays
/// decodable by a non-self-describing format.
#[derive(Serialize, Deserialize)]
enum StoredValue {
    Str(String),
    U64(u64),
    I64(i64),
    F64(f64),
    Bytes(Vec<u8>),
    Facet(String),
    Json(String),
}

/// Serialize the stored fields of a document into a store record
pub fn serialize_stored(schema: &Schema, doc: &EncodedDocument) -> Result<Vec<u8>> {
    let mut stored: Vec<(u16, StoredValue)> = Vec::new();
    for (field, value) in &doc.values {
        if !schema.entry(*field).is_stored() {
            continue;
        }
        let value = match value {
            Value::Str(s) => StoredValue::Str(s.clone()),
            Value::U64(v) => StoredValue::U64(*v),
            Value::I64(v) => StoredValue::I64(*v),
            Value::F64(v) => StoredValue::F64(*v),
            Value::Bytes(b) => StoredValue::Bytes(b.clone()),
            Value::Facet(f) => StoredValue::Facet(f.to_string()),
            Value::Json(map) => StoredValue::Json(serde_json::to_string(map)?),
        };
        stored.push((field.0, value));
    }
    Ok(bincode::serialize(&stored)?)
}

/// Decode a store record back into a document
pub fn deserialize_stored(schema: &Schema, bytes: &[u8]) -> Result<Document> {
    let stored: Vec<(u16, StoredValue)> = bincode::deserialize(bytes)?;
    let mut doc = Document::new();
    for (field, value) in stored {
        let field = FieldId(field);
        if field.index() >= schema.num_fields() {
            return Err(LoupeError::CorruptIndex(format!(
                "stored document references unknown {}",
                field
            )));
        }
        let value = match value {
            StoredValue::Str(s) => Value::Str(s),
            StoredValue::U64(v) => Value::U64(v),
            StoredValue::I64(v) => Value::I64(v),
            StoredValue::F64(v) => Value::F64(v),
            StoredValue::Bytes(b) => Value::Bytes(b),
            StoredValue::Facet(path) => Value::Facet(Facet::from_path(&path)?),
            StoredValue::Json(text) => match serde_json::from_str::<JsonValue>(&text)? {
                JsonValue::Object(map) => Value::Json(map),
                _ => {
                    return Err(LoupeError::CorruptIndex(
                        "stored json value is not an object".to_string(),
                    ))
                }
            },
        };
        doc.add(schema.field_name(field), value);
    }
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldOptions, FAST, STORED, TEXT};

    fn schema() -> Schema {
        let mut builder = Schema::builder();
        builder.add_text_field("title", TEXT | STORED).unwrap();
        builder.add_u64_field("count", FieldOptions::fast_stored()).unwrap();
        builder.add_i64_field("delta", STORED).unwrap();
        builder.add_f64_field("price", FAST | STORED).unwrap();
        builder.add_bytes_field("blob", STORED).unwrap();
        builder.add_facet_field("category", FieldOptions::indexed_stored()).unwrap();
        builder.add_json_field("attrs", FieldOptions::indexed_stored()).unwrap();
        builder.add_text_field("body", TEXT).unwrap();
        builder.freeze()
    }

    fn violation(err: LoupeError) -> SchemaViolation {
        match err {
            LoupeError::SchemaViolation(v) => v,
            other => panic!("expected schema violation, got {:?}", other),
        }
    }

    #[test]
    fn test_roundtrip_every_kind() {
        let schema = schema();
        let mut attrs = serde_json::Map::new();
        attrs.insert("color".into(), JsonValue::from("red"));
        let doc = Document::new()
            .with("title", "Hello World")
            .with("count", 7u64)
            .with("delta", -3i64)
            .with("price", 9.5f64)
            .with("blob", vec![0u8, 255, 42])
            .with("category", Facet::from_path("/a/b").unwrap())
            .with("attrs", attrs);

        let encoded = encode(&schema, &doc).unwrap();
        assert_eq!(decode(&schema, &encoded), doc);

        let stored = serialize_stored(&schema, &encoded).unwrap();
        assert_eq!(deserialize_stored(&schema, &stored).unwrap(), doc);
    }

    #[test]
    fn test_unstored_fields_not_in_store() {
        let schema = schema();
        let doc = Document::new().with("title", "a").with("body", "secret");
        let encoded = encode(&schema, &doc).unwrap();
        let stored = deserialize_stored(&schema, &serialize_stored(&schema, &encoded).unwrap()).unwrap();
        assert!(stored.get_first("body").is_none());
        assert!(stored.get_first("title").is_some());
    }

    #[test]
    fn test_unknown_field() {
        let err = encode(&schema(), &Document::new().with("nope", "x")).unwrap_err();
        assert_eq!(violation(err), SchemaViolation::UnknownField("nope".into()));
    }

    #[test]
    fn test_type_mismatch() {
        let err = encode(&schema(), &Document::new().with("count", "seven")).unwrap_err();
        assert!(matches!(violation(err), SchemaViolation::TypeMismatch { .. }));

        let err = encode(&schema(), &Document::new().with("count", -1i64)).unwrap_err();
        assert!(matches!(violation(err), SchemaViolation::TypeMismatch { .. }));
    }

    #[test]
    fn test_numeric_widening() {
        let schema = schema();
        let encoded = encode(&schema, &Document::new().with("price", 3u64).with("delta", 4u64)).unwrap();
        let price = schema.field("price").unwrap();
        let delta = schema.field("delta").unwrap();
        assert_eq!(encoded.values_for(price).next(), Some(&Value::F64(3.0)));
        assert_eq!(encoded.values_for(delta).next(), Some(&Value::I64(4)));
    }

    #[test]
    fn test_widening_to_f64_must_be_exact() {
        let schema = schema();
        let price = schema.field("price").unwrap();
        let exact = encode(&schema, &Document::new().with("price", 1u64 << 53)).unwrap();
        assert_eq!(exact.values_for(price).next(), Some(&Value::F64(9_007_199_254_740_992.0)));

        for doc in [
            Document::new().with("price", (1u64 << 53) + 1),
            Document::new().with("price", u64::MAX),
            Document::new().with("price", i64::MAX),
            Document::new().with("price", -(1i64 << 53) - 1),
        ] {
            let err = encode(&schema, &doc).unwrap_err();
            assert!(matches!(violation(err), SchemaViolation::TypeMismatch { .. }));
        }
        assert!(encode(&schema, &Document::new().with("price", i64::MIN)).is_ok());

        let err = Document::from_json(&schema, r#"{"price": 9007199254740993}"#).unwrap_err();
        assert!(matches!(violation(err), SchemaViolation::TypeMismatch { .. }));
        let doc = Document::from_json(&schema, r#"{"price": 9007199254740992}"#).unwrap();
        assert_eq!(doc.get_first("price"), Some(&Value::F64(9_007_199_254_740_992.0)));
    }

    #[test]
    fn test_missing_value() {
        let mut doc = Document::new();
        doc.set_values("title", Vec::new());
        let err = encode(&schema(), &doc).unwrap_err();
        assert_eq!(violation(err), SchemaViolation::MissingRequiredValue("title".into()));
    }

    #[test]
    fn test_invalid_facet_string() {
        let err = encode(&schema(), &Document::new().with("category", "no-slash")).unwrap_err();
        assert!(matches!(violation(err), SchemaViolation::InvalidFacetPath(_)));
    }

    #[test]
    fn test_from_json() {
        let schema = schema();
        let doc = Document::from_json(
            &schema,
            r#"{"title": ["Hello", "World"], "count": 1, "blob": "AQID", "category": "/x/y", "attrs": {"k": 1}}"#,
        )
        .unwrap();
        assert_eq!(doc.get_all("title").len(), 2);
        assert_eq!(doc.get_first("count"), Some(&Value::U64(1)));
        assert_eq!(doc.get_first("blob"), Some(&Value::Bytes(vec![1, 2, 3])));
        assert!(doc.get_first("attrs").unwrap().kind_name() == "json");
    }

    #[test]
    fn test_from_json_errors() {
        let schema = schema();
        assert!(Document::from_json(&schema, r#"{"count": -5}"#).is_err());
        assert!(Document::from_json(&schema, r#"{"blob": "@@@"}"#).is_err());
        assert!(Document::from_json(&schema, r#"{"title": []}"#).is_err());
        assert!(Document::from_json(&schema, r#"[1, 2]"#).is_err());
    }
}

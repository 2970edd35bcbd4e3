//! Field & schema registry

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::field_type::{FieldEntry, FieldId, FieldKind, FieldOptions};
use crate::error::{Result, SchemaViolation};
use crate::tokenizer::Analyzer;

const RESERVED_NAME_CHARS: &[char] = &[':', '.', '(', ')', '[', ']', '"', '^', '/'];

/// Accumulates field definitions until the schema is frozen
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    fields: Vec<FieldEntry>,
    by_name: HashMap<String, FieldId>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a field. Fails on duplicate names and on option sets that are
    /// empty or meaningless for the kind.
    pub fn define(
        &mut self,
        name: &str,
        kind: FieldKind,
        options: FieldOptions,
    ) -> Result<FieldId> {
        let options = options.normalized();
        if self.by_name.contains_key(name) {
            return Err(SchemaViolation::DuplicateField(name.to_string()).into());
        }
        validate_name(name)?;
        validate_options(name, kind, &options)?;
        if self.fields.len() >= u16::MAX as usize {
            return Err(invalid(name, "too many fields").into());
        }

        let id = FieldId(self.fields.len() as u16);
        self.fields.push(FieldEntry {
            name: name.to_string(),
            kind,
            options,
        });
        self.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn add_text_field(&mut self, name: &str, options: FieldOptions) -> Result<FieldId> {
        self.define(name, FieldKind::Text, options)
    }

    pub fn add_u64_field(&mut self, name: &str, options: FieldOptions) -> Result<FieldId> {
        self.define(name, FieldKind::U64, options)
    }

    pub fn add_i64_field(&mut self, name: &str, options: FieldOptions) -> Result<FieldId> {
        self.define(name, FieldKind::I64, options)
    }

    pub fn add_f64_field(&mut self, name: &str, options: FieldOptions) -> Result<FieldId> {
        self.define(name, FieldKind::F64, options)
    }

    pub fn add_bytes_field(&mut self, name: &str, options: FieldOptions) -> Result<FieldId> {
        self.define(name, FieldKind::Bytes, options)
    }

    pub fn add_facet_field(&mut self, name: &str, options: FieldOptions) -> Result<FieldId> {
        self.define(name, FieldKind::Facet, options)
    }

    pub fn add_json_field(&mut self, name: &str, options: FieldOptions) -> Result<FieldId> {
        self.define(name, FieldKind::Json, options)
    }

    /// Freeze the definitions into an immutable schema
    pub fn freeze(self) -> Schema {
        let analyzers = self
            .fields
            .iter()
            .map(|entry| {
                if entry.kind == FieldKind::Text && entry.is_indexed() {
                    Analyzer::from_name(entry.tokenizer_name())
                } else {
                    None
                }
            })
            .collect();
        Schema(Arc::new(SchemaInner {
            fields: self.fields,
            by_name: self.by_name,
            analyzers,
        }))
    }
}

fn invalid(field: &str, reason: &str) -> SchemaViolation {
    SchemaViolation::InvalidOptionCombination {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(invalid(name, "field name is empty").into());
    }
    if name.chars().any(|c| c.is_whitespace() || RESERVED_NAME_CHARS.contains(&c)) {
        return Err(invalid(name, "field name contains a reserved character").into());
    }
    if name.starts_with('-') || name.starts_with('+') {
        return Err(invalid(name, "field name starts with an operator").into());
    }
    Ok(())
}

fn validate_options(name: &str, kind: FieldKind, options: &FieldOptions) -> Result<()> {
    if options.is_empty() {
        return Err(invalid(name, "at least one of stored, indexed or fast is required").into());
    }
    if options.fast && !kind.is_numeric() {
        return Err(invalid(name, &format!("fast is only supported on numeric fields, not {}", kind)).into());
    }
    if let Some(tokenizer) = &options.tokenizer {
        if kind != FieldKind::Text {
            return Err(invalid(name, "a tokenizer can only be set on text fields").into());
        }
        if Analyzer::from_name(tokenizer).is_none() {
            return Err(invalid(name, &format!("unknown tokenizer '{}'", tokenizer)).into());
        }
    }
    Ok(())
}

#[derive(Debug)]
struct SchemaInner {
    fields: Vec<FieldEntry>,
    by_name: HashMap<String, FieldId>,
    analyzers: Vec<Option<Analyzer>>,
}

/// An immutable, cheaply cloneable schema
#[derive(Clone, Debug)]
pub struct Schema(Arc<SchemaInner>);

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<FieldId> {
        self.0.by_name.get(name).copied()
    }

    /// Look up a field by name, failing with `UnknownField`
    pub fn get_field(&self, name: &str) -> Result<FieldId> {
        self.field(name)
            .ok_or_else(|| SchemaViolation::UnknownField(name.to_string()).into())
    }

    pub fn entry(&self, field: FieldId) -> &FieldEntry {
        &self.0.fields[field.index()]
    }

    pub fn field_name(&self, field: FieldId) -> &str {
        &self.entry(field).name
    }

    /// Fields in definition order
    pub fn fields(&self) -> impl Iterator<Item = (FieldId, &FieldEntry)> {
        self.0
            .fields
            .iter()
            .enumerate()
            .map(|(idx, entry)| (FieldId(idx as u16), entry))
    }

    pub fn num_fields(&self) -> usize {
        self.0.fields.len()
    }

    /// Analyzer of an indexed text field
    pub fn analyzer(&self, field: FieldId) -> Analyzer {
        self.0
            .analyzers
            .get(field.index())
            .copied()
            .flatten()
            .unwrap_or_default()
    }

    /// Indexed text fields, searched by field-less query terms
    pub fn default_search_fields(&self) -> Vec<FieldId> {
        self.fields()
            .filter(|(_, entry)| entry.kind == FieldKind::Text && entry.is_indexed())
            .map(|(id, _)| id)
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Rebuild a schema from entries, validating them as `define` does
    pub fn from_entries(entries: Vec<FieldEntry>) -> Result<Self> {
        let mut builder = SchemaBuilder::new();
        for entry in entries {
            builder.define(&entry.name, entry.kind, entry.options)?;
        }
        Ok(builder.freeze())
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.0.fields == other.0.fields
    }
}

impl Serialize for Schema {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.fields.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Schema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let entries = Vec::<FieldEntry>::deserialize(deserializer)?;
        Schema::from_entries(entries).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoupeError;
    use crate::schema::{FAST, STORED, STRING, TEXT};

    fn violation(err: LoupeError) -> SchemaViolation {
        match err {
            LoupeError::SchemaViolation(v) => v,
            other => panic!("expected schema violation, got {:?}", other),
        }
    }

    #[test]
    fn test_define_assigns_ids_in_order() {
        let mut builder = Schema::builder();
        let title = builder.add_text_field("title", TEXT | STORED).unwrap();
        let ts = builder.add_u64_field("timestamp", FieldOptions::fast_stored()).unwrap();
        let schema = builder.freeze();

        assert_eq!(title, FieldId(0));
        assert_eq!(ts, FieldId(1));
        assert_eq!(schema.field("timestamp"), Some(ts));
        assert_eq!(schema.field_name(title), "title");
        assert_eq!(schema.default_search_fields(), vec![title]);
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let mut builder = Schema::builder();
        builder.add_text_field("title", TEXT).unwrap();
        let err = builder.add_u64_field("title", FAST).unwrap_err();
        assert_eq!(violation(err), SchemaViolation::DuplicateField("title".into()));
    }

    #[test]
    fn test_invalid_option_combinations() {
        let mut builder = Schema::builder();
        for (name, kind, opts) in [
            ("empty", FieldKind::Text, FieldOptions::default()),
            ("fast_text", FieldKind::Text, FAST),
            ("tok_on_u64", FieldKind::U64, TEXT.with_tokenizer("raw")),
            ("bad_tok", FieldKind::Text, TEXT.with_tokenizer("nope")),
            ("a:b", FieldKind::Text, TEXT),
        ] {
            let err = builder.define(name, kind, opts).unwrap_err();
            assert!(matches!(
                violation(err),
                SchemaViolation::InvalidOptionCombination { .. }
            ));
        }
    }

    #[test]
    fn test_analyzer_resolution() {
        let mut builder = Schema::builder();
        let body = builder.add_text_field("body", TEXT.with_tokenizer("en_stem")).unwrap();
        let tag = builder.add_text_field("tag", STRING).unwrap();
        let schema = builder.freeze();
        assert_eq!(schema.analyzer(body).name(), "en_stem");
        assert_eq!(schema.analyzer(tag), Analyzer::Raw);
    }

    #[test]
    fn test_json_roundtrip() {
        let mut builder = Schema::builder();
        builder.add_text_field("title", FieldOptions::text_stored()).unwrap();
        builder.add_facet_field("category", FieldOptions::indexed_stored()).unwrap();
        builder.add_f64_field("price", FAST).unwrap();
        let schema = builder.freeze();

        let json = schema.to_json().unwrap();
        let back = Schema::from_json(&json).unwrap();
        assert_eq!(back, schema);
    }

    #[test]
    fn test_from_json_validates() {
        let json = r#"[{"name":"a","kind":"text","options":{}}]"#;
        assert!(Schema::from_json(json).is_err());
    }
}

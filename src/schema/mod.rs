//! Schema and field type system
//!
//! A schema is an ordered set of uniquely named fields, each with a value
//! kind and an option set drawn from {stored, indexed, fast}. It is frozen
//! before an index is created and never changes afterwards.

mod field_type;
mod registry;
mod term;

pub use field_type::{
    FieldEntry, FieldId, FieldKind, FieldOptions, FAST, INDEXED, STORED, STRING, TEXT,
};
pub use registry::{Schema, SchemaBuilder};
pub use term::{
    f64_to_u64, i64_to_u64, json_number_token, u64_to_f64, u64_to_i64, Term, JSON_PATH_END,
};

//! Field kinds and option sets

use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

/// Dense field identifier, assigned in definition order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldId(pub u16);

impl FieldId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field#{}", self.0)
    }
}

/// Value kind of a field
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Analyzed text
    Text,
    U64,
    I64,
    F64,
    /// Opaque bytes, indexed as a single term
    Bytes,
    /// Slash-delimited hierarchical path
    Facet,
    /// Structured JSON object, indexed as flattened `path:token` terms
    Json,
}

impl FieldKind {
    pub fn is_numeric(self) -> bool {
        matches!(self, FieldKind::U64 | FieldKind::I64 | FieldKind::F64)
    }

    pub fn name(self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::U64 => "u64",
            FieldKind::I64 => "i64",
            FieldKind::F64 => "f64",
            FieldKind::Bytes => "bytes",
            FieldKind::Facet => "facet",
            FieldKind::Json => "json",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Option set of a field: a subset of {stored, indexed, fast} plus an optional
/// analyzer name for indexed text.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOptions {
    #[serde(default)]
    pub stored: bool,
    #[serde(default)]
    pub indexed: bool,
    #[serde(default)]
    pub fast: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokenizer: Option<String>,
}

/// Indexed with the default analyzer
pub const TEXT: FieldOptions = FieldOptions {
    stored: false,
    indexed: true,
    fast: false,
    tokenizer: None,
};

/// Indexed as one untokenized term
pub const STRING: FieldOptions = FieldOptions {
    stored: false,
    indexed: true,
    fast: false,
    tokenizer: Some(String::new()),
};

/// Retrievable verbatim
pub const STORED: FieldOptions = FieldOptions {
    stored: true,
    indexed: false,
    fast: false,
    tokenizer: None,
};

/// Indexed as terms (non-text kinds)
pub const INDEXED: FieldOptions = FieldOptions {
    stored: false,
    indexed: true,
    fast: false,
    tokenizer: None,
};

/// Columnar access for range filtering
pub const FAST: FieldOptions = FieldOptions {
    stored: false,
    indexed: false,
    fast: true,
    tokenizer: None,
};

impl FieldOptions {
    /// Indexed and stored text
    pub fn text_stored() -> Self {
        FieldOptions {
            stored: true,
            indexed: true,
            ..Default::default()
        }
    }

    /// Fast and stored numeric value
    pub fn fast_stored() -> Self {
        FieldOptions {
            stored: true,
            fast: true,
            ..Default::default()
        }
    }

    pub fn indexed_stored() -> Self {
        FieldOptions {
            stored: true,
            indexed: true,
            ..Default::default()
        }
    }

    /// Resolve a shorthand name such as `text_stored` or `fast` into an option set
    pub fn from_shorthand(name: &str) -> Option<Self> {
        match name {
            "text" => Some(TEXT),
            "string" => Some(STRING.normalized()),
            "stored" => Some(STORED),
            "indexed" => Some(INDEXED),
            "fast" => Some(FAST),
            "text_stored" => Some(Self::text_stored()),
            "fast_stored" => Some(Self::fast_stored()),
            "indexed_stored" => Some(Self::indexed_stored()),
            _ => None,
        }
    }

    /// Set the analyzer used for an indexed text field
    pub fn with_tokenizer(mut self, name: impl Into<String>) -> Self {
        self.tokenizer = Some(name.into());
        self
    }

    pub fn set_stored(mut self) -> Self {
        self.stored = true;
        self
    }

    pub fn set_indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn set_fast(mut self) -> Self {
        self.fast = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        !self.stored && !self.indexed && !self.fast
    }

    // `STRING` marks "raw" with an empty name so it can stay a const
    pub(crate) fn normalized(mut self) -> Self {
        if self.tokenizer.as_deref() == Some("") {
            self.tokenizer = Some("raw".to_string());
        }
        self
    }
}

impl BitOr for FieldOptions {
    type Output = FieldOptions;

    fn bitor(self, rhs: FieldOptions) -> FieldOptions {
        FieldOptions {
            stored: self.stored || rhs.stored,
            indexed: self.indexed || rhs.indexed,
            fast: self.fast || rhs.fast,
            tokenizer: self.tokenizer.or(rhs.tokenizer),
        }
        .normalized()
    }
}

/// A named field with its kind and options
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldEntry {
    pub name: String,
    pub kind: FieldKind,
    pub options: FieldOptions,
}

impl FieldEntry {
    pub fn is_stored(&self) -> bool {
        self.options.stored
    }

    pub fn is_indexed(&self) -> bool {
        self.options.indexed
    }

    pub fn is_fast(&self) -> bool {
        self.options.fast
    }

    /// Analyzer name for indexed text fields
    pub fn tokenizer_name(&self) -> &str {
        self.options.tokenizer.as_deref().unwrap_or("default")
    }
}

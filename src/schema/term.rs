//! Terms: the (field, normalized value) retrieval unit
//!
//! A term is serialized as the big-endian field id followed by the value bytes.
//! Numeric values use an order-preserving u64 mapping so their byte order
//! matches their numeric order.

use std::fmt;

use super::field_type::FieldId;
use crate::document::Facet;

/// Separator between a JSON path and its token
pub const JSON_PATH_END: u8 = 0;

/// Canonical token for a JSON number, so `340`, `340.0` and `3.4e2` index
/// and query as the same term. Returns `None` for text that is not a finite
/// number.
pub fn json_number_token(text: &str) -> Option<String> {
    if let Ok(v) = text.parse::<u64>() {
        return Some(v.to_string());
    }
    if let Ok(v) = text.parse::<i64>() {
        return Some(v.to_string());
    }
    let v = text.parse::<f64>().ok().filter(|v| v.is_finite())?;
    // integral values inside the exact range print without a fraction
    if v.fract() == 0.0 && v.abs() < 9_007_199_254_740_992.0 {
        Some((v as i64).to_string())
    } else {
        Some(v.to_string())
    }
}

/// Map an i64 onto u64 preserving order
pub fn i64_to_u64(value: i64) -> u64 {
    (value as u64) ^ (1 << 63)
}

pub fn u64_to_i64(value: u64) -> i64 {
    (value ^ (1 << 63)) as i64
}

/// Map an f64 onto u64 preserving the total order of non-NaN values
pub fn f64_to_u64(value: f64) -> u64 {
    let bits = value.to_bits();
    if bits & (1 << 63) != 0 {
        !bits
    } else {
        bits ^ (1 << 63)
    }
}

pub fn u64_to_f64(value: u64) -> f64 {
    let bits = if value & (1 << 63) != 0 {
        value ^ (1 << 63)
    } else {
        !value
    };
    f64::from_bits(bits)
}

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Term {
    key: Vec<u8>,
}

impl Term {
    fn with_field(field: FieldId, capacity: usize) -> Self {
        let mut key = Vec::with_capacity(2 + capacity);
        key.extend_from_slice(&field.0.to_be_bytes());
        Self { key }
    }

    pub fn from_field_text(field: FieldId, text: &str) -> Self {
        Self::from_field_bytes(field, text.as_bytes())
    }

    pub fn from_field_bytes(field: FieldId, bytes: &[u8]) -> Self {
        let mut term = Self::with_field(field, bytes.len());
        term.key.extend_from_slice(bytes);
        term
    }

    pub fn from_field_u64(field: FieldId, value: u64) -> Self {
        Self::from_field_bytes(field, &value.to_be_bytes())
    }

    pub fn from_field_i64(field: FieldId, value: i64) -> Self {
        Self::from_field_u64(field, i64_to_u64(value))
    }

    pub fn from_field_f64(field: FieldId, value: f64) -> Self {
        Self::from_field_u64(field, f64_to_u64(value))
    }

    /// Term for a facet path, matching the path itself and every descendant
    pub fn from_facet(field: FieldId, facet: &Facet) -> Self {
        Self::from_field_text(field, facet.as_str())
    }

    /// Term for one token under a JSON path (`path` uses `.` separators)
    pub fn from_json_path(field: FieldId, path: &str, token: &str) -> Self {
        let mut term = Self::with_field(field, path.len() + 1 + token.len());
        term.key.extend_from_slice(path.as_bytes());
        term.key.push(JSON_PATH_END);
        term.key.extend_from_slice(token.as_bytes());
        term
    }

    /// Rebuild a term from its serialized key
    pub fn from_key(key: &[u8]) -> Option<Self> {
        if key.len() < 2 {
            return None;
        }
        Some(Self { key: key.to_vec() })
    }

    pub fn field(&self) -> FieldId {
        FieldId(u16::from_be_bytes([self.key[0], self.key[1]]))
    }

    pub fn value_bytes(&self) -> &[u8] {
        &self.key[2..]
    }

    /// Text value, if the value bytes are valid UTF-8
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(self.value_bytes()).ok()
    }

    /// Serialized form used as the term dictionary key
    pub fn as_key(&self) -> &[u8] {
        &self.key
    }

    pub fn into_key(self) -> Vec<u8> {
        self.key
    }
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(text) => write!(f, "Term({}, {:?})", self.field().0, text),
            None => write!(f, "Term({}, {:?})", self.field().0, self.value_bytes()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i64_order_preserved() {
        let values = [i64::MIN, -10, -1, 0, 1, 42, i64::MAX];
        for pair in values.windows(2) {
            assert!(i64_to_u64(pair[0]) < i64_to_u64(pair[1]));
        }
        assert_eq!(u64_to_i64(i64_to_u64(-77)), -77);
    }

    #[test]
    fn test_f64_order_preserved() {
        let values = [f64::NEG_INFINITY, -2.5, -0.0, 0.0, 1e-9, 3.25, f64::INFINITY];
        for pair in values.windows(2) {
            assert!(f64_to_u64(pair[0]) <= f64_to_u64(pair[1]));
        }
        assert_eq!(u64_to_f64(f64_to_u64(-2.5)), -2.5);
    }

    #[test]
    fn test_term_keys_sort_by_field_then_value() {
        let a = Term::from_field_text(FieldId(0), "zebra");
        let b = Term::from_field_text(FieldId(1), "apple");
        assert!(a.as_key() < b.as_key());
        assert_eq!(b.field(), FieldId(1));
        assert_eq!(b.as_str(), Some("apple"));
    }

    #[test]
    fn test_json_term_layout() {
        let term = Term::from_json_path(FieldId(3), "color", "red");
        assert_eq!(term.value_bytes(), b"color\0red");
        assert_eq!(Term::from_key(term.as_key()).unwrap(), term);
    }

    #[test]
    fn test_json_number_tokens_are_canonical() {
        for text in ["340", "340.0", "3.4e2", "0340"] {
            assert_eq!(json_number_token(text).as_deref(), Some("340"), "{}", text);
        }
        assert_eq!(json_number_token("-0.0").as_deref(), Some("0"));
        assert_eq!(json_number_token("10.50").as_deref(), Some("10.5"));
        assert_eq!(json_number_token("-7").as_deref(), Some("-7"));
        assert_eq!(
            json_number_token("18446744073709551615").as_deref(),
            Some("18446744073709551615")
        );
        assert_eq!(json_number_token("red"), None);
        assert_eq!(json_number_token("NaN"), None);
        assert_eq!(json_number_token("inf"), None);
    }
}

//! Text analysis
//!
//! Every indexed text field is tokenized by one [`Analyzer`], chosen by name
//! when the schema is defined. Positions are counted over the raw words so
//! dropped stopwords still leave a gap for phrase matching.

mod analyzer;
mod language;

pub use analyzer::{Analyzer, Token, Tokenize, MAX_TOKEN_BYTES};
pub use language::Language;

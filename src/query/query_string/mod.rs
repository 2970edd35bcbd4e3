//! Query string syntax
//!
//! - `title:rust AND body:tutorial`
//! - `"hello world"` (phrase across the default search fields)
//! - `timestamp:[2 TO 10]`, `score:[* TO 5]` (fast numeric fields)
//! - `category:/lang/rust` (the facet and everything below it)
//! - `attrs.color:red` (a key inside a JSON field)
//! - `+required -excluded NOT excluded`, `(a OR b)^2`, `*`
//!
//! Keywords are case-insensitive, AND binds tighter than OR and adjacent
//! clauses default to OR.

pub mod lexer;
pub mod parser;

pub use lexer::{Lexer, Token};
pub use parser::QueryStringParser;

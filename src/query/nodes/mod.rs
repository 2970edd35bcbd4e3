//! Concrete query node implementations

mod all_docs;
mod bool_query;
mod exists_query;
mod facet_query;
mod fuzzy_query;
mod multi_term;
mod phrase_query;
mod prefix_query;
mod range_query;
mod term_query;
mod wildcard_query;

pub use all_docs::AllDocsQuery;
pub use bool_query::BoolQuery;
pub use exists_query::ExistsQuery;
pub use facet_query::FacetQuery;
pub use fuzzy_query::{FuzzyQuery, MAX_FUZZINESS};
pub use multi_term::DEFAULT_MAX_EXPANSIONS;
pub use phrase_query::PhraseQuery;
pub use prefix_query::PrefixQuery;
pub use range_query::RangeQuery;
pub use term_query::TermQuery;
pub use wildcard_query::{has_wildcards, unescape_pattern, WildcardQuery};

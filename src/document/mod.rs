//! Documents, typed values and the document codec

mod codec;
mod facet;
mod value;

pub use codec::{decode, deserialize_stored, encode, serialize_stored, EncodedDocument};
pub use facet::Facet;
pub use value::{Document, Value};

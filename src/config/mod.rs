//! Configuration-string parsing and validation.
//!
//! Config strings are comma-separated `key=value` pairs, with nested groups
//! `k=(a=1,b=2)`, lists `k=[x,y]`, quoted or bare strings, integers, and
//! booleans. A small recursive-descent parser turns one into a typed tree,
//! which per-method schemas then validate against expected keys and types.

mod parser;
mod schema;
mod value;

pub use parser::parse;
pub use schema::{FieldKind, FieldSpec, Schema};
pub use value::ConfigValue;

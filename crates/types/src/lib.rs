//! # Shaper Types
//!
//! Shared type definitions for the data shaper: the declarative [`Shape`]
//! model and the dot-notation reference grammar.
//!
//! A shape maps output field names to references. A reference is a
//! dot-separated hop sequence where each hop is either a plain field name
//! (forward reference, resolved by reading a foreign key and fetching the
//! target) or a reverse-reference expression such as
//! `addresses(personId=id)` (resolved by querying a target collection for
//! records matching fields of the current record).
//!
//! Everything in this crate is pure: parsing and query building only, no
//! I/O and no async. The engine crate drives the actual resolution.

pub mod reference;
pub mod shape;

pub use reference::{
    Hop, ReverseReference, build_query, classify_segment, format_key_id, hash_fetch_call, is_one_to_many,
    parse_hops, parse_reverse_reference, split_reference,
};
pub use shape::{FieldRule, Fragment, Shape};

/// Separator between collection name and id in normalized map keys.
pub const KEY_SEPARATOR: &str = "::";

/// Builds the composite `collection::id` key used in normalized maps.
pub fn composite_key(collection: &str, id: &serde_json::Value) -> String {
    format!("{}{}{}", collection, KEY_SEPARATOR, format_key_id(id))
}

/// Splits a composite `collection::id` key back into its parts.
///
/// Returns `None` when the separator is absent.
pub fn split_composite_key(key: &str) -> Option<(&str, &str)> {
    key.split_once(KEY_SEPARATOR)
}

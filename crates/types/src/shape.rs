//! Declarative shape model.
//!
//! Shapes describe the desired output: a collection name plus a map from
//! output field names to the references that produce their values. A field
//! can also be a [`Fragment`], a reference paired with a nested shape that
//! is applied to the related record(s).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Description of one normalized collection entry.
///
/// The field map must contain an `id` entry; the engine validates this
/// before resolving anything, because the resolved id is what the record
/// is keyed by in the normalized output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    /// Name of the collection the shaped records belong to.
    #[serde(rename = "collectionName")]
    pub collection_name: String,
    /// Output field name -> reference or nested fragment, in declaration order.
    pub shape: IndexMap<String, FieldRule>,
}

impl Shape {
    /// Creates an empty shape for the given collection.
    pub fn new(collection_name: impl Into<String>) -> Self {
        Self {
            collection_name: collection_name.into(),
            shape: IndexMap::new(),
        }
    }

    /// Adds a field rule, consuming and returning the shape for chaining.
    pub fn with_field(mut self, name: impl Into<String>, rule: impl Into<FieldRule>) -> Self {
        self.shape.insert(name.into(), rule.into());
        self
    }
}

/// A single field in a shape: either a reference string or a fragment.
///
/// Serialized untagged so shape documents read like the natural JSON form:
/// `{"name": "firstName", "company": {"reference": "companyId", "shape": ...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldRule {
    /// Plain dot-notation reference resolved to a value.
    Reference(String),
    /// Reference plus nested shape applied to the related record(s).
    Fragment(Box<Fragment>),
}

impl FieldRule {
    /// Returns the reference string for plain reference rules.
    pub fn as_reference(&self) -> Option<&str> {
        match self {
            FieldRule::Reference(reference) => Some(reference),
            FieldRule::Fragment(_) => None,
        }
    }
}

impl From<&str> for FieldRule {
    fn from(reference: &str) -> Self {
        FieldRule::Reference(reference.to_string())
    }
}

impl From<String> for FieldRule {
    fn from(reference: String) -> Self {
        FieldRule::Reference(reference)
    }
}

impl From<Fragment> for FieldRule {
    fn from(fragment: Fragment) -> Self {
        FieldRule::Fragment(Box::new(fragment))
    }
}

/// A reference paired with a nested shape.
///
/// Resolving a fragment produces an embedded id (or id list for plural
/// relations) on the parent record plus a normalized sub-collection of the
/// shaped related records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    /// Reference leading to the related record(s).
    pub reference: String,
    /// Shape applied to each related record.
    pub shape: Shape,
}

impl Fragment {
    /// Creates a fragment from a reference and nested shape.
    pub fn new(reference: impl Into<String>, shape: Shape) -> Self {
        Self {
            reference: reference.into(),
            shape,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_shape_with_nested_fragment() {
        let shape: Shape = serde_json::from_value(json!({
            "collectionName": "persons",
            "shape": {
                "id": "id",
                "name": "firstName",
                "company": {
                    "reference": "companyId",
                    "shape": {
                        "collectionName": "companies",
                        "shape": { "id": "id", "name": "name" }
                    }
                }
            }
        }))
        .expect("shape should deserialize");

        assert_eq!(shape.collection_name, "persons");
        assert_eq!(shape.shape.get("name"), Some(&FieldRule::Reference("firstName".into())));
        match shape.shape.get("company") {
            Some(FieldRule::Fragment(fragment)) => {
                assert_eq!(fragment.reference, "companyId");
                assert_eq!(fragment.shape.collection_name, "companies");
            }
            other => panic!("expected fragment, got {:?}", other),
        }
    }

    #[test]
    fn preserves_field_declaration_order() {
        let shape = Shape::new("persons")
            .with_field("id", "id")
            .with_field("name", "firstName")
            .with_field("age", "age");

        let fields: Vec<&str> = shape.shape.keys().map(String::as_str).collect();
        assert_eq!(fields, vec!["id", "name", "age"]);
    }

    #[test]
    fn round_trips_through_json() {
        let shape = Shape::new("persons").with_field("id", "id").with_field(
            "address",
            Fragment::new(
                "addresses(personId=id)",
                Shape::new("addresses").with_field("id", "id"),
            ),
        );

        let encoded = serde_json::to_value(&shape).expect("serialize");
        let decoded: Shape = serde_json::from_value(encoded).expect("deserialize");
        assert_eq!(decoded, shape);
    }
}

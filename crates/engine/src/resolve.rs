//! Default value resolution: walks a reference hop by hop against a
//! record, fetching related records as needed.
//!
//! Only the head hop is consumed per step; the remaining reference is fed
//! back through [`ShapeContext::resolve_value`] so overridden resolvers
//! participate in the recursion and deep chains stay on boxed futures
//! instead of the call stack. Depth is unbounded.

use async_trait::async_trait;
use futures_util::future::try_join_all;
use serde_json::Value;

use shaper_types::{Hop, classify_segment, split_reference};

use crate::{
    context::{ShapeContext, ValueResolver},
    error::ShapeError,
    fetch::FetchResult,
};

/// Built-in [`ValueResolver`].
pub struct DefaultValueResolver;

#[async_trait]
impl ValueResolver for DefaultValueResolver {
    async fn resolve_value(&self, record: &Value, reference: &str, ctx: &ShapeContext) -> Result<Value, ShapeError> {
        // A null source short-circuits the whole chain; no fetch happens.
        if record.is_null() {
            return Ok(Value::Null);
        }

        let segments = split_reference(reference);
        let Some((head, rest)) = segments.split_first() else {
            // Out of hops; the current value is the result.
            return Ok(record.clone());
        };
        let child_reference = rest.join(".");

        match classify_segment(head.clone()) {
            Hop::Forward(field) => {
                if rest.is_empty() {
                    return Ok(record.get(&field).cloned().unwrap_or(Value::Null));
                }
                let key = record.get(&field).cloned().unwrap_or(Value::Null);
                tracing::trace!(field = %field, "resolving forward hop");
                let fetched = ctx.fetch(&key, &field).await?;
                continue_resolution(fetched, &child_reference, true, &field, ctx).await
            }
            Hop::Reverse(reverse) => {
                let query = Value::Object(reverse.query(record));
                tracing::trace!(collection = %reverse.collection, "resolving reverse hop");
                let fetched = ctx.fetch(&query, &reverse.collection).await?;
                continue_resolution(fetched, &child_reference, reverse.one_to_many, &reverse.collection, ctx).await
            }
        }
    }
}

/// Continues resolution of the remaining reference against a fetch result.
async fn continue_resolution(
    fetched: FetchResult,
    child_reference: &str,
    one_to_many: bool,
    reference_name: &str,
    ctx: &ShapeContext,
) -> Result<Value, ShapeError> {
    match fetched {
        FetchResult::Null => Ok(Value::Null),
        FetchResult::One(related) => ctx.resolve_value(&related, child_reference).await,
        FetchResult::Many(entries) if one_to_many => {
            let resolutions = entries.values().map(|entry| ctx.resolve_value(entry, child_reference));
            let values = try_join_all(resolutions).await?;
            Ok(Value::Array(dedup_first_seen(values)))
        }
        FetchResult::Many(entries) => {
            // One-to-one cardinality: the mapping is expected to hold a
            // single entry. Extra rows indicate a modeling problem on the
            // source side; the first entry wins.
            if entries.len() > 1 {
                tracing::warn!(
                    reference = reference_name,
                    rows = entries.len(),
                    "one-to-one reference resolved to multiple records; taking the first"
                );
            }
            match entries.values().next() {
                Some(sole) => ctx.resolve_value(sole, child_reference).await,
                None => Ok(Value::Null),
            }
        }
    }
}

/// Removes duplicates by value equality, keeping first-seen order.
fn dedup_first_seen(values: Vec<Value>) -> Vec<Value> {
    let mut unique: Vec<Value> = Vec::with_capacity(values.len());
    for value in values {
        if !unique.contains(&value) {
            unique.push(value);
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        context::{FragmentResolver, RecordShaper},
        fetch::FetchData,
        fragment::DefaultFragmentResolver,
        shape::DefaultRecordShaper,
    };
    use anyhow::Result;
    use serde_json::json;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    /// Relational fixture answering forward lookups by field name and
    /// reverse queries by collection name.
    struct RelationFetch {
        calls: Arc<AtomicUsize>,
    }

    impl RelationFetch {
        fn new() -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (Self { calls: Arc::clone(&calls) }, calls)
        }

        fn collection(name: &str) -> Vec<(String, Value)> {
            match name {
                "companies" => vec![("2".into(), json!({ "id": 2, "name": "VG", "municipalId": 1 }))],
                "municipals" => vec![("1".into(), json!({ "id": 1, "name": "Oslo", "countryId": 1 }))],
                "countries" => vec![("1".into(), json!({ "id": 1, "name": "Norway" }))],
                "phoneTypes" => vec![
                    ("1".into(), json!({ "id": 1, "name": "Mobile" })),
                    ("2".into(), json!({ "id": 2, "name": "Landline" })),
                ],
                "phoneNumbers" => vec![
                    ("1".into(), json!({ "id": 1, "employeeId": 1, "phoneTypeId": 1, "number": 98765432 })),
                    ("2".into(), json!({ "id": 2, "employeeId": 1, "phoneTypeId": 2, "number": 23456789 })),
                    ("3".into(), json!({ "id": 3, "employeeId": 2, "phoneTypeId": 1, "number": 99999999 })),
                    ("4".into(), json!({ "id": 4, "employeeId": 1, "phoneTypeId": 1, "number": 98989898 })),
                ],
                _ => vec![],
            }
        }

        fn collection_for_field(field: &str) -> Option<&'static str> {
            match field {
                "companyId" => Some("companies"),
                "municipalId" => Some("municipals"),
                "countryId" => Some("countries"),
                "phoneTypeId" => Some("phoneTypes"),
                _ => None,
            }
        }
    }

    #[async_trait]
    impl FetchData for RelationFetch {
        async fn fetch(&self, key: &Value, reference: &str) -> Result<FetchResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if let Value::Object(query) = key {
                let matches: Vec<(String, Value)> = Self::collection(reference)
                    .into_iter()
                    .filter(|(_, record)| {
                        query.iter().all(|(field, expected)| record.get(field) == Some(expected))
                    })
                    .collect();
                return Ok(FetchResult::collection(matches));
            }

            let Some(collection) = Self::collection_for_field(reference) else {
                return Ok(FetchResult::Null);
            };
            let id = shaper_types::format_key_id(key);
            Ok(Self::collection(collection)
                .into_iter()
                .find(|(record_id, _)| *record_id == id)
                .map(|(_, record)| FetchResult::One(record))
                .unwrap_or(FetchResult::Null))
        }
    }

    fn context() -> (ShapeContext, Arc<AtomicUsize>) {
        let (fetch, calls) = RelationFetch::new();
        let ctx = ShapeContext::new(
            Arc::new(fetch),
            Arc::new(DefaultValueResolver) as Arc<dyn ValueResolver>,
            Arc::new(DefaultFragmentResolver) as Arc<dyn FragmentResolver>,
            Arc::new(DefaultRecordShaper) as Arc<dyn RecordShaper>,
        );
        (ctx, calls)
    }

    #[tokio::test]
    async fn takes_local_values_off_the_record() {
        let (ctx, calls) = context();
        let record = json!({ "id": 1, "lastName": "Flintstone" });

        let value = ctx.resolve_value(&record, "lastName").await.expect("resolve");

        assert_eq!(value, json!("Flintstone"));
        assert_eq!(calls.load(Ordering::SeqCst), 0, "single local hop must not fetch");
    }

    #[tokio::test]
    async fn missing_local_field_resolves_to_null() {
        let (ctx, _) = context();
        let value = ctx.resolve_value(&json!({ "id": 1 }), "nope").await.expect("resolve");
        assert_eq!(value, Value::Null);
    }

    #[tokio::test]
    async fn resolves_dot_notated_references() {
        let (ctx, _) = context();
        let person = json!({ "id": 1, "companyId": 2 });

        let value = ctx
            .resolve_value(&person, "companyId.municipalId.countryId.name")
            .await
            .expect("resolve");

        assert_eq!(value, json!("Norway"));
    }

    #[tokio::test]
    async fn null_record_short_circuits_without_fetching() {
        let (ctx, calls) = context();

        let value = ctx.resolve_value(&Value::Null, "companyId.name").await.expect("resolve");

        assert_eq!(value, Value::Null);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn resolves_one_to_many_relation_with_dedup() {
        let (ctx, _) = context();
        let person = json!({ "id": 1, "firstName": "Fred" });

        // Employee 1 has three numbers over two phone types; duplicates
        // collapse in first-seen order.
        let value = ctx
            .resolve_value(&person, "phoneNumbers(employeeId=id).phoneTypeId.name")
            .await
            .expect("resolve");

        assert_eq!(value, json!(["Mobile", "Landline"]));
    }

    #[tokio::test]
    async fn one_to_one_reverse_takes_sole_entry() {
        let (ctx, _) = context();
        let person = json!({ "id": 1 });

        let value = ctx
            .resolve_value(&person, "phoneNumbers(employeeId==id, phoneTypeId=2).number")
            .await
            .expect("resolve");

        assert_eq!(value, json!(23456789));
    }

    #[tokio::test]
    async fn malformed_reverse_segment_falls_back_to_forward_field() {
        let (ctx, calls) = context();
        let record = json!({ "id": 1, "sfd(bar": "literal" });

        // "sfd(bar" does not match the reverse grammar, so it is treated
        // as a plain field name.
        let value = ctx.resolve_value(&record, "sfd(bar").await.expect("resolve");

        assert_eq!(value, json!("literal"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fetch_errors_surface_unchanged() {
        struct FailingFetch;

        #[async_trait]
        impl FetchData for FailingFetch {
            async fn fetch(&self, _key: &Value, _reference: &str) -> Result<FetchResult> {
                anyhow::bail!("Some error")
            }
        }

        let ctx = ShapeContext::new(
            Arc::new(FailingFetch),
            Arc::new(DefaultValueResolver),
            Arc::new(DefaultFragmentResolver),
            Arc::new(DefaultRecordShaper),
        );

        let err = ctx
            .resolve_value(&json!({ "companyId": 2 }), "companyId.name")
            .await
            .expect_err("should fail");
        assert_eq!(err.to_string(), "Some error");
    }
}

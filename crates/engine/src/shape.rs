//! Default record shaping: resolves every declared field of a shape
//! concurrently, merges fragment sub-collections, and emits the normalized
//! entry for the record.

use async_trait::async_trait;
use futures_util::future::try_join_all;
use serde_json::{Map as JsonMap, Value};

use shaper_types::{FieldRule, Shape, composite_key, is_one_to_many};

use crate::{
    context::{NormalizedMap, RecordShaper, ShapeContext, merge_normalized},
    error::ShapeError,
    fragment::ResolvedFragment,
};

/// Built-in [`RecordShaper`].
pub struct DefaultRecordShaper;

enum FieldOutcome {
    Value(Value),
    Fragment { resolved: ResolvedFragment, one_to_many: bool },
}

#[async_trait]
impl RecordShaper for DefaultRecordShaper {
    async fn shape_record(&self, record: &Value, shape: &Shape, ctx: &ShapeContext) -> Result<NormalizedMap, ShapeError> {
        // The resolved id is what the record is keyed by; without an id
        // rule there is nothing to resolve, so fail before any I/O.
        match shape.shape.get("id") {
            Some(FieldRule::Reference(_)) => {}
            Some(FieldRule::Fragment(_)) => {
                return Err(ShapeError::InvalidIdField {
                    collection: shape.collection_name.clone(),
                });
            }
            None => {
                return Err(ShapeError::MissingIdField {
                    collection: shape.collection_name.clone(),
                });
            }
        }

        let resolutions = shape.shape.iter().map(|(field, rule)| async move {
            let outcome = match rule {
                FieldRule::Reference(reference) => FieldOutcome::Value(ctx.resolve_value(record, reference).await?),
                FieldRule::Fragment(fragment) => FieldOutcome::Fragment {
                    resolved: ctx.resolve_fragment(record, fragment).await?,
                    one_to_many: is_one_to_many(&fragment.reference),
                },
            };
            Ok::<_, ShapeError>((field.clone(), outcome))
        });
        let outcomes = try_join_all(resolutions).await?;

        let mut data = NormalizedMap::new();
        let mut shaped = JsonMap::new();
        for (field, outcome) in outcomes {
            match outcome {
                FieldOutcome::Value(value) => {
                    shaped.insert(field, value);
                }
                FieldOutcome::Fragment { resolved, one_to_many } => {
                    merge_normalized(&mut data, resolved.data);

                    let mut id = resolved.id;
                    // Singular relations embed a scalar id even when the
                    // resolver produced a list.
                    if !one_to_many && let Value::Array(ids) = &id {
                        id = ids.first().cloned().unwrap_or(Value::Null);
                    }
                    let mut link = JsonMap::new();
                    link.insert(resolved.collection, id);
                    shaped.insert(field, Value::Object(link));
                }
            }
        }

        let id = shaped.get("id").cloned().unwrap_or(Value::Null);
        data.insert(composite_key(&shape.collection_name, &id), Value::Object(shaped));
        Ok(data)
    }
}

//! Default fragment resolution: resolves a fragment's reference to related
//! record(s), shapes them with the nested shape, and reports the embedded
//! id(s) for the parent record.

use async_trait::async_trait;
use futures_util::future::try_join_all;
use serde_json::Value;

use shaper_types::{FieldRule, Fragment, Shape, composite_key, split_reference};

use crate::{
    context::{FragmentResolver, NormalizedMap, ShapeContext, merge_normalized},
    error::ShapeError,
    fetch::FetchResult,
};

/// Outcome of resolving one fragment.
#[derive(Debug)]
pub struct ResolvedFragment {
    /// Normalized sub-collections produced by shaping the related record(s).
    pub data: NormalizedMap,
    /// Collection the related records belong to.
    pub collection: String,
    /// Scalar id for singular relations; ordered id list (nulls excluded)
    /// for plural ones.
    pub id: Value,
}

/// Built-in [`FragmentResolver`].
pub struct DefaultFragmentResolver;

#[async_trait]
impl FragmentResolver for DefaultFragmentResolver {
    async fn resolve_fragment(&self, record: &Value, fragment: &Fragment, ctx: &ShapeContext) -> Result<ResolvedFragment, ShapeError> {
        let leaf = split_reference(&fragment.reference).pop().unwrap_or_default();
        let collection = fragment.shape.collection_name.clone();

        let resolved = ctx.resolve_value(record, &fragment.reference).await?;
        match resolved {
            // Reverse one-to-many relations arrive as a list of already
            // fetched records.
            Value::Array(entries) => shape_entries(entries, fragment, ctx).await,
            // Sole record of a one-to-one reverse relation, also already
            // fetched.
            Value::Object(_) => {
                let id = entry_id(&resolved, &fragment.shape, ctx).await?;
                let data = ctx.shape_record(&resolved, &fragment.shape).await?;
                Ok(ResolvedFragment { data, collection, id })
            }
            // Forward relation: the resolved value is the foreign key; the
            // full record still has to be fetched.
            foreign_key => match ctx.fetch(&foreign_key, &leaf).await? {
                FetchResult::Null => {
                    // Orphan marker, not an error: the relation points at
                    // nothing, which the output records as an explicit null.
                    let mut data = NormalizedMap::new();
                    data.insert(composite_key(&collection, &foreign_key), Value::Null);
                    Ok(ResolvedFragment {
                        data,
                        collection,
                        id: foreign_key,
                    })
                }
                FetchResult::One(related) => {
                    let data = ctx.shape_record(&related, &fragment.shape).await?;
                    Ok(ResolvedFragment {
                        data,
                        collection,
                        id: foreign_key,
                    })
                }
                FetchResult::Many(entries) => shape_entries(entries.into_values().collect(), fragment, ctx).await,
            },
        }
    }
}

/// Shapes a batch of related records concurrently and collects their ids.
async fn shape_entries(entries: Vec<Value>, fragment: &Fragment, ctx: &ShapeContext) -> Result<ResolvedFragment, ShapeError> {
    let shaped = try_join_all(entries.iter().filter(|entry| !entry.is_null()).map(|entry| async move {
        let id = entry_id(entry, &fragment.shape, ctx).await?;
        let data = ctx.shape_record(entry, &fragment.shape).await?;
        Ok::<_, ShapeError>((id, data))
    }))
    .await?;

    let mut data = NormalizedMap::new();
    let mut ids = Vec::new();
    for (id, entry_data) in shaped {
        merge_normalized(&mut data, entry_data);
        if !id.is_null() && !ids.contains(&id) {
            ids.push(id);
        }
    }

    Ok(ResolvedFragment {
        data,
        collection: fragment.shape.collection_name.clone(),
        id: Value::Array(ids),
    })
}

/// Resolves the id a shaped entry will be keyed by.
///
/// The nested shape's `id` rule must be a plain reference; a fragment in
/// id position cannot produce a usable key.
async fn entry_id(record: &Value, shape: &Shape, ctx: &ShapeContext) -> Result<Value, ShapeError> {
    match shape.shape.get("id") {
        Some(FieldRule::Reference(reference)) => ctx.resolve_value(record, reference).await,
        Some(FieldRule::Fragment(_)) => Err(ShapeError::InvalidIdField {
            collection: shape.collection_name.clone(),
        }),
        None => Err(ShapeError::MissingIdField {
            collection: shape.collection_name.clone(),
        }),
    }
}

//! Strategy traits and the per-invocation shaping context.
//!
//! The three stages of the pipeline — value resolution, fragment
//! resolution, and record shaping — are trait objects so callers can
//! override any of them. All recursion is routed through
//! [`ShapeContext`], never directly between the default implementations,
//! so an override composes with the built-ins exactly like replacing one
//! stage of the pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;

use shaper_types::{Fragment, Shape};

use crate::{
    error::ShapeError,
    fetch::{FetchData, FetchResult},
    fragment::ResolvedFragment,
};

/// Flat normalized data: composite `collection::id` key -> shaped record.
pub type NormalizedMap = IndexMap<String, Value>;

/// Merges one normalized map into another.
///
/// Key-based and order-independent across disjoint keys; identical
/// composite keys resolve last-writer-wins.
pub fn merge_normalized(into: &mut NormalizedMap, from: NormalizedMap) {
    for (key, record) in from {
        into.insert(key, record);
    }
}

/// Resolves a reference against a record to a value.
#[async_trait]
pub trait ValueResolver: Send + Sync {
    /// Walks the reference's hops, fetching related records as needed.
    async fn resolve_value(&self, record: &Value, reference: &str, ctx: &ShapeContext) -> Result<Value, ShapeError>;
}

/// Resolves a fragment to shaped related record(s).
#[async_trait]
pub trait FragmentResolver: Send + Sync {
    /// Resolves the fragment's reference and shapes whatever it points at.
    async fn resolve_fragment(&self, record: &Value, fragment: &Fragment, ctx: &ShapeContext) -> Result<ResolvedFragment, ShapeError>;
}

/// Shapes one record into a normalized map.
#[async_trait]
pub trait RecordShaper: Send + Sync {
    /// Resolves every declared field and emits the normalized entry.
    async fn shape_record(&self, record: &Value, shape: &Shape, ctx: &ShapeContext) -> Result<NormalizedMap, ShapeError>;
}

/// Per-invocation bundle of the fetch capability and the three strategies.
///
/// A fresh context is built for every shaper invocation so the memoization
/// cache wrapped around the fetch capability is request-scoped.
#[derive(Clone)]
pub struct ShapeContext {
    fetch_data: Arc<dyn FetchData>,
    value_resolver: Arc<dyn ValueResolver>,
    fragment_resolver: Arc<dyn FragmentResolver>,
    record_shaper: Arc<dyn RecordShaper>,
}

impl ShapeContext {
    /// Bundles a fetch capability with the strategy implementations.
    pub fn new(
        fetch_data: Arc<dyn FetchData>,
        value_resolver: Arc<dyn ValueResolver>,
        fragment_resolver: Arc<dyn FragmentResolver>,
        record_shaper: Arc<dyn RecordShaper>,
    ) -> Self {
        Self {
            fetch_data,
            value_resolver,
            fragment_resolver,
            record_shaper,
        }
    }

    /// Invokes the fetch capability.
    pub async fn fetch(&self, key: &Value, reference: &str) -> Result<FetchResult, ShapeError> {
        Ok(self.fetch_data.fetch(key, reference).await?)
    }

    /// Resolves a reference through the configured value resolver.
    pub async fn resolve_value(&self, record: &Value, reference: &str) -> Result<Value, ShapeError> {
        self.value_resolver.resolve_value(record, reference, self).await
    }

    /// Resolves a fragment through the configured fragment resolver.
    pub async fn resolve_fragment(&self, record: &Value, fragment: &Fragment) -> Result<ResolvedFragment, ShapeError> {
        self.fragment_resolver.resolve_fragment(record, fragment, self).await
    }

    /// Shapes a record through the configured record shaper.
    pub async fn shape_record(&self, record: &Value, shape: &Shape) -> Result<NormalizedMap, ShapeError> {
        self.record_shaper.shape_record(record, shape, self).await
    }
}

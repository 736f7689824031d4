//! # Shaper Engine
//!
//! Reshapes nested or relational source records into a normalized, flat
//! `collection -> id -> record` map according to a declarative [`Shape`],
//! resolving forward and reverse cross-entity references through a
//! caller-supplied [`FetchData`] capability.
//!
//! This is a normalization engine, not a data store: every invocation
//! builds a fresh output owned by the caller, and the only caching is a
//! request-scoped memoization of identical fetch calls.
//!
//! ## Usage
//!
//! ```
//! use std::sync::Arc;
//! use anyhow::Result;
//! use async_trait::async_trait;
//! use serde_json::{Value, json};
//! use shaper_engine::{FetchData, FetchResult, Fragment, Shape, Shaper, ShaperOptions};
//!
//! struct CompanyFetch;
//!
//! #[async_trait]
//! impl FetchData for CompanyFetch {
//!     async fn fetch(&self, _key: &Value, reference: &str) -> Result<FetchResult> {
//!         assert_eq!(reference, "companyId");
//!         Ok(FetchResult::record(json!({ "id": 2, "name": "VG" })))
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<()> {
//! let shaper = Shaper::new(ShaperOptions::default().fetch_data(Arc::new(CompanyFetch)))?;
//! let shape = Shape::new("persons")
//!     .with_field("id", "id")
//!     .with_field("name", "firstName")
//!     .with_field(
//!         "company",
//!         Fragment::new(
//!             "companyId",
//!             Shape::new("companies").with_field("id", "id").with_field("name", "name"),
//!         ),
//!     );
//!
//! let person = json!({ "id": 1, "firstName": "Fred", "companyId": 2 });
//! let shaped = shaper.shape_record(person, &shape).await?;
//!
//! assert_eq!(shaped["companies"]["2"], json!({ "id": 2, "name": "VG" }));
//! assert_eq!(shaped["persons"]["1"]["company"], json!({ "companies": 2 }));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`fetch`]: capability contract, typed fetch results, memoization
//! - [`resolve`]: reference resolution against records
//! - [`fragment`]: nested shape resolution for related records
//! - [`shape`]: per-record shaping and sub-collection merging
//! - [`context`]: strategy traits and the per-invocation context
//!
//! All "concurrency" is cooperative fan-out/fan-in over I/O-bound fetch
//! futures: sibling resolutions have no ordering guarantee, join points
//! wait for all siblings, and the first error observed at a join point is
//! the one the caller sees.

use std::sync::Arc;

use futures_util::future::try_join_all;
use indexmap::IndexMap;
use serde_json::Value;

pub mod context;
pub mod error;
pub mod fetch;
pub mod fragment;
pub mod resolve;
pub mod shape;

pub use context::{FragmentResolver, NormalizedMap, RecordShaper, ShapeContext, ValueResolver, merge_normalized};
pub use error::ShapeError;
pub use fetch::{FetchData, FetchResult, MemoizedFetch, NullFetch};
pub use fragment::{DefaultFragmentResolver, ResolvedFragment};
pub use resolve::DefaultValueResolver;
pub use shape::DefaultRecordShaper;

// Re-export the shape model so most callers only need this crate.
pub use shaper_types::{FieldRule, Fragment, Shape};

/// Shaped output regrouped by collection: `collection -> id -> record`.
///
/// Safe to deep-merge across invocations by collection and id.
pub type ShapedData = IndexMap<String, IndexMap<String, Value>>;

/// Configuration for a [`Shaper`].
///
/// Precedence is explicit: a configured strategy replaces the built-in
/// default wholesale, and `memoize` defaults to `true`. The fetch
/// capability is the only required piece.
#[derive(Default)]
pub struct ShaperOptions {
    fetch_data: Option<Arc<dyn FetchData>>,
    memoize: Option<bool>,
    value_resolver: Option<Arc<dyn ValueResolver>>,
    fragment_resolver: Option<Arc<dyn FragmentResolver>>,
    record_shaper: Option<Arc<dyn RecordShaper>>,
}

impl ShaperOptions {
    /// Sets the required fetch capability.
    pub fn fetch_data(mut self, capability: Arc<dyn FetchData>) -> Self {
        self.fetch_data = Some(capability);
        self
    }

    /// Enables or disables request-scoped fetch memoization (default on).
    pub fn memoize(mut self, enabled: bool) -> Self {
        self.memoize = Some(enabled);
        self
    }

    /// Replaces the built-in value resolver.
    pub fn value_resolver(mut self, resolver: Arc<dyn ValueResolver>) -> Self {
        self.value_resolver = Some(resolver);
        self
    }

    /// Replaces the built-in fragment resolver.
    pub fn fragment_resolver(mut self, resolver: Arc<dyn FragmentResolver>) -> Self {
        self.fragment_resolver = Some(resolver);
        self
    }

    /// Replaces the built-in record shaper.
    pub fn record_shaper(mut self, shaper: Arc<dyn RecordShaper>) -> Self {
        self.record_shaper = Some(shaper);
        self
    }
}

/// Public entry point: shapes record batches into normalized collections.
pub struct Shaper {
    fetch_data: Arc<dyn FetchData>,
    memoize: bool,
    value_resolver: Arc<dyn ValueResolver>,
    fragment_resolver: Arc<dyn FragmentResolver>,
    record_shaper: Arc<dyn RecordShaper>,
}

impl Shaper {
    /// Validates the options and builds a shaper.
    ///
    /// A missing fetch capability fails here, synchronously, before any
    /// future is polled.
    pub fn new(options: ShaperOptions) -> Result<Self, ShapeError> {
        let fetch_data = options.fetch_data.ok_or(ShapeError::MissingFetchData)?;
        Ok(Self {
            fetch_data,
            memoize: options.memoize.unwrap_or(true),
            value_resolver: options.value_resolver.unwrap_or_else(|| Arc::new(DefaultValueResolver)),
            fragment_resolver: options.fragment_resolver.unwrap_or_else(|| Arc::new(DefaultFragmentResolver)),
            record_shaper: options.record_shaper.unwrap_or_else(|| Arc::new(DefaultRecordShaper)),
        })
    }

    /// Shapes a batch of records.
    ///
    /// Records are shaped concurrently; the first error fails the whole
    /// batch. The merged normalized maps are regrouped into
    /// `collection -> id -> record`. An empty batch yields an empty map
    /// without validating the shape, since validation is per record.
    pub async fn shape(&self, records: Vec<Value>, shape: &Shape) -> Result<ShapedData, ShapeError> {
        tracing::debug!(records = records.len(), collection = %shape.collection_name, "shaping batch");
        let ctx = self.invocation_context();

        let shaped = try_join_all(records.iter().map(|record| ctx.shape_record(record, shape))).await?;

        let mut merged = NormalizedMap::new();
        for normalized in shaped {
            merge_normalized(&mut merged, normalized);
        }
        Ok(regroup_collections(merged))
    }

    /// Shapes a single record; equivalent to a one-element batch.
    pub async fn shape_record(&self, record: Value, shape: &Shape) -> Result<ShapedData, ShapeError> {
        self.shape(vec![record], shape).await
    }

    /// Builds the per-invocation context, wiring a fresh memoization
    /// cache around the fetch capability when enabled.
    fn invocation_context(&self) -> ShapeContext {
        let fetch_data: Arc<dyn FetchData> = if self.memoize {
            Arc::new(MemoizedFetch::new(Arc::clone(&self.fetch_data)))
        } else {
            Arc::clone(&self.fetch_data)
        };
        ShapeContext::new(
            fetch_data,
            Arc::clone(&self.value_resolver),
            Arc::clone(&self.fragment_resolver),
            Arc::clone(&self.record_shaper),
        )
    }
}

/// Regroups composite `collection::id` keys into nested collections.
fn regroup_collections(raw: NormalizedMap) -> ShapedData {
    let mut grouped = ShapedData::new();
    for (key, record) in raw {
        let Some((collection, id)) = shaper_types::split_composite_key(&key) else {
            // Every built-in path keys through composite_key; a key
            // without the separator means a custom shaper misbehaved.
            tracing::warn!(key = %key, "skipping normalized entry without a composite key");
            continue;
        };
        grouped.entry(collection.to_string()).or_default().insert(id.to_string(), record);
    }
    grouped
}

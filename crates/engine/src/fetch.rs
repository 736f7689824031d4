//! Fetch capability contract and request-scoped memoization.
//!
//! The engine never talks to a data source itself. Callers supply a
//! [`FetchData`] implementation; the engine hands it either a scalar
//! foreign key plus the referencing field name, or a query object plus the
//! target collection name for reverse references.

use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::{Mutex, OnceCell};

use shaper_types::hash_fetch_call;

/// Outcome of a fetch call.
///
/// Forward references resolve to a single record (or nothing); reverse
/// references resolve to an id-to-record mapping whose insertion order is
/// preserved, because one-to-many results are deduplicated in first-seen
/// order downstream.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResult {
    /// Nothing matched.
    Null,
    /// A single record.
    One(Value),
    /// Id -> record mapping, in source order.
    Many(IndexMap<String, Value>),
}

impl FetchResult {
    /// Wraps a single record.
    pub fn record(value: impl Into<Value>) -> Self {
        FetchResult::One(value.into())
    }

    /// Builds an ordered id -> record mapping.
    pub fn collection<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        FetchResult::Many(entries.into_iter().map(|(id, record)| (id.into(), record.into())).collect())
    }
}

/// Caller-supplied data-fetching capability.
///
/// * `key` — scalar foreign key (forward hop) or query object (reverse hop).
/// * `reference` — referencing field name (forward) or collection name
///   (reverse).
///
/// Implementations own timeouts and cancellation; the engine imposes
/// neither, and propagates the first failure unchanged.
#[async_trait]
pub trait FetchData: Send + Sync {
    /// Fetches the record(s) behind a reference.
    async fn fetch(&self, key: &Value, reference: &str) -> Result<FetchResult>;
}

/// No-op capability answering [`FetchResult::Null`] for every call.
///
/// Useful for tests and for shapes known to contain only local fields.
pub struct NullFetch;

#[async_trait]
impl FetchData for NullFetch {
    async fn fetch(&self, _key: &Value, _reference: &str) -> Result<FetchResult> {
        Ok(FetchResult::Null)
    }
}

/// Request-scoped memoizing wrapper around a fetch capability.
///
/// Identical `(key, reference)` calls — keyed by
/// [`hash_fetch_call`] — share a single in-flight fetch: duplicates await
/// the first caller's [`OnceCell`] initialization instead of issuing their
/// own request. The cache lives for one shaper invocation and is never
/// shared across invocations.
pub struct MemoizedFetch {
    inner: Arc<dyn FetchData>,
    cells: Mutex<HashMap<String, Arc<OnceCell<FetchResult>>>>,
}

impl MemoizedFetch {
    /// Wraps a capability with a fresh, empty cache.
    pub fn new(inner: Arc<dyn FetchData>) -> Self {
        Self {
            inner,
            cells: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl FetchData for MemoizedFetch {
    async fn fetch(&self, key: &Value, reference: &str) -> Result<FetchResult> {
        let hash = hash_fetch_call(key, reference);
        let cell = {
            let mut cells = self.cells.lock().await;
            Arc::clone(cells.entry(hash).or_default())
        };
        let result = cell
            .get_or_try_init(|| async {
                tracing::debug!(reference, "dispatching fetch");
                self.inner.fetch(key, reference).await
            })
            .await?;
        Ok(result.clone())
    }
}

//! Error types for the shaping engine.

use thiserror::Error;

/// Errors surfaced while shaping records.
///
/// Fetch capability failures are carried verbatim: whatever error the
/// caller's capability produced is the error the caller gets back, wrapped
/// only for typing. There are no retries and no partial results; a failing
/// field fails its record and a failing record fails the whole batch.
#[derive(Debug, Error)]
pub enum ShapeError {
    /// No fetch capability was configured. Raised synchronously by
    /// [`Shaper::new`](crate::Shaper::new), before any I/O.
    #[error("missing fetchData capability in shaper options")]
    MissingFetchData,

    /// The shape does not declare an `id` field. Raised before any field
    /// of the offending record is resolved.
    #[error("shape [{collection}] must contain an id")]
    MissingIdField {
        /// Collection name of the invalid shape.
        collection: String,
    },

    /// The shape's `id` field is a fragment; ids must be plain references.
    #[error("shape [{collection}] id field must be a plain reference")]
    InvalidIdField {
        /// Collection name of the invalid shape.
        collection: String,
    },

    /// The fetch capability failed; the original error is preserved.
    #[error(transparent)]
    Fetch(#[from] anyhow::Error),
}

use thiserror::Error;

use crate::types::ShardTarget;

/// Failure taxonomy of one fetch invocation. Nothing here is retried
/// internally; partial results are never published.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request was cancelled; observed cooperatively at request start
    /// and segment boundaries.
    #[error("fetch cancelled")]
    Cancelled,

    /// I/O failure reading stored fields or source for one document.
    #[error("storage read failed for doc [{doc_id}]")]
    StorageRead {
        doc_id: u32,
        #[source]
        source: anyhow::Error,
    },

    /// Nested projection could not find the expected nested array in the
    /// root source; indicates a schema/storage mismatch.
    #[error("couldn't find nested source for path [{path}]")]
    InconsistentSource { path: String },

    /// An extension failed to build its processor for the request.
    #[error("error building fetch sub-phases")]
    ExtensionBuild {
        #[source]
        source: anyhow::Error,
    },

    /// An extension failed while handling one specific document.
    #[error("error running fetch sub-phase for doc [{doc_id}]")]
    ExtensionProcess {
        doc_id: u32,
        #[source]
        source: anyhow::Error,
    },

    /// Phase-level wrapper carrying the shard target. Cancellation is
    /// surfaced unwrapped.
    #[error("fetch phase failed on {target}")]
    Phase {
        target: ShardTarget,
        #[source]
        source: Box<FetchError>,
    },
}

pub type Result<T> = std::result::Result<T, FetchError>;

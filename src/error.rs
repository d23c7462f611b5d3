// THEORY:
// Every fallible operation in the crate reports through this one error type.
// Nothing is recovered locally: region algebra, the ensemble and the
// orchestrator all hand their failures straight back to the caller, who owns
// the user-facing behavior. The variants follow the failure taxonomy of the
// engine (shape mismatch, malformed region, worker failure, configuration)
// plus the plumbing failures of the ambient stack (transport, codec, io).

use crate::transport::Rank;
use thiserror::Error;

/// Boxed error carried by a failed worker so the handler's own error survives.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum Error {
    /// The feature extractor cannot be applied to the requested data.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("invalid region: {0}")]
    InvalidRegion(String),

    #[error("invalid extent: {0}")]
    InvalidExtent(String),

    /// A worker handler failed; the run was aborted.
    #[error("worker {rank} failed: {source}")]
    WorkerFailure {
        rank: Rank,
        #[source]
        source: BoxError,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, Error>;

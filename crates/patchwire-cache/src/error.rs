use std::sync::Arc;
use std::time::Duration;

use patchwire_payload::{MergeError, Path};
use patchwire_transport::TransportError;

use crate::key::OperationKey;

/// Errors delivered to cache readers and subscribers.
///
/// One failure may be handed to many subscribers, so the type is `Clone`
/// and shares the underlying transport error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// The read was made in a context where it can never succeed.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// The operation's transport failed.
    #[error("operation {operation} failed: {source}")]
    Transport {
        operation: OperationKey,
        #[source]
        source: Arc<TransportError>,
    },

    /// A payload could not be merged into the operation's result tree.
    #[error("operation {operation} received an unmergeable payload: {source}")]
    Merge {
        operation: OperationKey,
        #[source]
        source: MergeError,
    },

    /// The operation finished without ever sending a payload for the path.
    #[error("operation {operation} completed without delivering {path}")]
    PathNotDelivered { operation: OperationKey, path: Path },

    /// The caller's deadline passed first.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The operation was cancelled after its last subscriber went away.
    #[error("operation {0} was disposed")]
    Disposed(OperationKey),

    /// An operation cannot start outside a tokio runtime.
    #[error("no tokio runtime to run the operation on")]
    NoRuntime,
}

impl CacheError {
    pub(crate) fn transport(operation: &OperationKey, source: TransportError) -> Self {
        CacheError::Transport {
            operation: operation.clone(),
            source: Arc::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

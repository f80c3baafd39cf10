use crate::path::Path;

/// Errors converting a JSON body into a [`Payload`](crate::Payload).
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// Payloads are JSON objects.
    #[error("payload must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    /// The object did not match the payload shape.
    #[error("invalid payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors merging a patch into a result tree.
///
/// The executor emits a parent before any patch below it, so these indicate
/// a protocol violation by the producer rather than a recoverable state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    /// A node along the patch path does not exist yet.
    #[error("no node at {at} while merging patch for {path}")]
    MissingSegment { at: Path, path: Path },

    /// A node along the patch path has the wrong shape for the next segment.
    #[error("expected {expected} at {at} while merging patch for {path}, found {found}")]
    TypeMismatch {
        at: Path,
        path: Path,
        expected: &'static str,
        found: &'static str,
    },
}

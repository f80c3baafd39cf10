/// Errors that can occur during multipart encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The boundary token cannot be used as a multipart delimiter.
    #[error("invalid boundary {boundary:?}: {reason}")]
    InvalidBoundary {
        boundary: String,
        reason: &'static str,
    },

    /// A part grew past the configured maximum without a closing delimiter.
    #[error("part too large ({size} bytes buffered without a boundary, max {max})")]
    PartTooLarge { size: usize, max: usize },

    /// The stream ended before the first boundary was seen.
    #[error("no multipart boundary found before end of stream")]
    BoundaryNotFound,

    /// The stream ended in the middle of a part.
    #[error("stream ended inside a part ({buffered} bytes without a closing boundary)")]
    Truncated { buffered: usize },

    /// A body handed to the encoder contains the delimiter marker.
    #[error("part body contains the boundary marker")]
    BoundaryInBody,

    /// A payload could not be serialized to JSON.
    #[error("json encode error: {0}")]
    Json(#[from] serde_json::Error),

    /// An I/O error occurred while reading or writing the stream.
    #[error("multipart I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;

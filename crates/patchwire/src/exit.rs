use std::fmt;
use std::io;

use patchwire_cache::CacheError;
use patchwire_frame::FrameError;
use patchwire_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;
pub const INTERRUPTED: i32 = 130;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::InvalidInput => USAGE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::InvalidBoundary { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn transport_error(context: &str, err: &TransportError) -> CliError {
    let code = match err {
        TransportError::Timeout(_) => TIMEOUT,
        TransportError::Http(source) if source.is_timeout() => TIMEOUT,
        TransportError::Frame(FrameError::Io(_)) => TRANSPORT_ERROR,
        TransportError::Frame(_)
        | TransportError::Payload(_)
        | TransportError::Json(_)
        | TransportError::UnsupportedContentType(_) => DATA_INVALID,
        _ => TRANSPORT_ERROR,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn cache_error(context: &str, err: CacheError) -> CliError {
    match &err {
        CacheError::Transport { source, .. } => transport_error(context, source),
        CacheError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        CacheError::Merge { .. } | CacheError::PathNotDelivered { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        CacheError::Precondition(_) => CliError::new(USAGE, format!("{context}: {err}")),
        CacheError::Disposed(_) => CliError::new(FAILURE, format!("{context}: {err}")),
        CacheError::NoRuntime => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}

//! Incremental delivery of query results.
//!
//! A server answers one request with an initial result and a series of
//! patches that fill in deferred and streamed parts of the tree. patchwire
//! frames those payloads on the wire, merges them on the client, and serves
//! reads from a cache that shares one request between concurrent readers.
//!
//! # Crate Structure
//!
//! - [`frame`]: `multipart/mixed` encoding and incremental decoding
//! - [`payload`]: payload types, paths, and patch merging
//! - [`transport`]: the transport seam, HTTP client, and server helpers
//! - [`cache`]: operation channels and the result cache

/// Re-export frame types.
pub mod frame {
    pub use patchwire_frame::*;
}

/// Re-export payload types.
pub mod payload {
    pub use patchwire_payload::*;
}

/// Re-export transport types.
pub mod transport {
    pub use patchwire_transport::*;
}

/// Re-export cache types.
pub mod cache {
    pub use patchwire_cache::*;
}

pub use patchwire_cache::{
    CacheConfig, CacheError, FragmentRef, FragmentResult, OperationKey, QueryResult, ReadResult,
    ResultCache,
};
pub use patchwire_payload::{path, Path, Payload};
pub use patchwire_transport::{HttpTransport, HttpTransportConfig, OperationRequest, Transport};

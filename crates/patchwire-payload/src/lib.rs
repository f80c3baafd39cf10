//! Incremental result payloads and patch merging.
//!
//! A result arrives as an [`ExecutionResult`] followed by zero or more
//! [`Patch`]es, each addressed by a [`Path`] into the result tree. The
//! [`merge`] functions fold them, in wire order, into one tree.

pub mod error;
pub mod merge;
pub mod path;
pub mod payload;

pub use error::{MergeError, PayloadError};
pub use merge::{apply_payload, lookup, merge, merge_in_place};
pub use path::{Path, PathKey, PathSegment};
pub use payload::{ExecutionResult, GraphQLError, Location, Patch, Payload};

//! Client-side coordination of incremental results.
//!
//! A [`ResultCache`] owns one [`OperationChannel`] per operation in flight.
//! Each channel drives its transport on a tokio task, merges payloads into
//! the operation's result tree in the shared [`CacheStore`], and notifies
//! subscribers. Reads come back as a [`ReadResult`]: ready data, a
//! [`PendingRead`] to await, or a failure.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use patchwire_cache::{CacheConfig, ResultCache};
//! # use patchwire_transport::ScriptedTransport;
//! # async fn demo() -> patchwire_cache::Result<()> {
//! let cache = ResultCache::new(Arc::new(ScriptedTransport::new()), CacheConfig::default());
//! let result = cache.query("{ products { id } }", None).resolve().await?;
//! println!("{}", result.data());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod channel;
pub mod config;
pub mod error;
pub mod key;
pub mod read;
pub mod store;

pub use cache::{FragmentResult, QueryResult, ResultCache};
pub use channel::{
    Delivery, Lifecycle, LifecycleHook, OperationChannel, Phase, SubscriberId, Update,
};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use key::{FragmentRef, OperationKey};
pub use read::{PendingRead, ReadResult};
pub use store::{CacheStore, ResultTree};

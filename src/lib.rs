//! mediachunk - Chunked media storage over a document store
//!
//! Stores images and video as text payloads in a document database that
//! limits document size. Large payloads are split into ordered fragments
//! behind a manifest; reads reassemble them in bounded batches and cache
//! the result per reference.

pub mod cache;
pub mod chunk;
pub mod config;
pub mod error;
pub mod media;
pub mod store;

pub use config::Config;
pub use error::{Error, FetchError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cache::MediaCache;
    pub use crate::config::Config;
    pub use crate::error::{Error, FetchError, Result};
    pub use crate::media::{MediaKind, MediaReference, MediaService, MediaSlots, ResourceHandle};
    pub use crate::store::{DocumentStore, MemoryStore, SledStore};
}

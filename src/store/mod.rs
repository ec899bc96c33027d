//! Document store module
//!
//! Abstracts the hosted document backend the media pipeline persists to:
//! - The `DocumentStore` trait every backend implements
//! - Typed manifest, record and fragment access (`FragmentStore`)
//! - Write pacing and retry backoff

mod fragments;
mod memory;
mod pacing;
mod sled_store;

pub use fragments::{FragmentStore, RetryPolicy};
pub use memory::MemoryStore;
pub use pacing::{ExponentialBackoff, Pacer};
pub use sled_store::SledStore;

use crate::chunk::ChunkManifest;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A stored document body
pub type Document = serde_json::Value;

/// Minimal document-store API the media pipeline consumes
///
/// Collections are full paths (see `CollectionPaths`). A missing document
/// is `Ok(None)`, not an error.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read one document
    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    /// Create or replace a document under a caller-chosen id
    async fn set_document(&self, collection: &str, id: &str, doc: Document) -> Result<()>;

    /// Create a document under a store-generated id
    async fn add_document(&self, collection: &str, doc: Document) -> Result<String>;

    /// Delete a document; deleting a missing document succeeds
    async fn delete_document(&self, collection: &str, id: &str) -> Result<()>;

    /// List document ids starting with `prefix` (empty prefix lists all)
    async fn list_ids(&self, collection: &str, prefix: &str) -> Result<Vec<String>>;
}

/// An unfragmented media record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DirectRecord {
    /// Complete encoded payload
    #[serde(rename = "base64")]
    pub payload: String,
    /// Creation time (unix millis)
    pub created_at: i64,
}

impl DirectRecord {
    /// Create a record stamped with the current time
    pub fn new(payload: impl Into<String>) -> Self {
        DirectRecord {
            payload: payload.into(),
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// A document in the manifests collection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum MediaRecord {
    /// Manifest of a fragmented payload
    Chunked(ChunkManifest),
    /// Payload stored inline in the record
    Direct(DirectRecord),
}

/// A document in the fragments collection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FragmentRecord {
    /// Fragment text
    pub data: String,
}

//! Persistent local document store on sled
//!
//! Each collection path maps to one sled tree; documents are stored as
//! JSON bytes keyed by document id.

use super::{Document, DocumentStore};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

/// Document store backed by a sled database
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    /// Open (or create) a store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        debug!("Opening sled store at {:?}", path.as_ref());
        let db = sled::open(path)?;
        Ok(SledStore { db })
    }

    /// Open a throwaway store that is removed when dropped
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(SledStore { db })
    }

    /// Flush pending writes to disk
    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }

    fn tree(&self, collection: &str) -> Result<sled::Tree> {
        Ok(self.db.open_tree(collection)?)
    }
}

#[async_trait]
impl DocumentStore for SledStore {
    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        match self.tree(collection)?.get(id)? {
            Some(bytes) => {
                let doc = serde_json::from_slice(&bytes)
                    .map_err(|e| Error::Deserialization(format!("{}/{}: {}", collection, id, e)))?;
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    async fn set_document(&self, collection: &str, id: &str, doc: Document) -> Result<()> {
        let bytes = serde_json::to_vec(&doc).map_err(|e| Error::Serialization(e.to_string()))?;
        self.tree(collection)?.insert(id, bytes)?;
        Ok(())
    }

    async fn add_document(&self, collection: &str, doc: Document) -> Result<String> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.set_document(collection, &id, doc).await?;
        Ok(id)
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<()> {
        self.tree(collection)?.remove(id)?;
        Ok(())
    }

    async fn list_ids(&self, collection: &str, prefix: &str) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in self.tree(collection)?.scan_prefix(prefix) {
            let (key, _) = entry?;
            let id = String::from_utf8(key.to_vec())
                .map_err(|e| Error::Deserialization(format!("non-UTF-8 key: {}", e)))?;
            ids.push(id);
        }
        Ok(ids)
    }
}

//! In-process document store
//!
//! Keeps every collection in memory. Used by tests and for runs that do
//! not need persistence.

use super::{Document, DocumentStore};
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// Document store backed by in-memory maps
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Document>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    /// Whether a collection holds no documents
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// Whether a document exists
    pub fn contains(&self, collection: &str, id: &str) -> bool {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.contains_key(id))
            .unwrap_or(false)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|c| c.get(id).cloned()))
    }

    async fn set_document(&self, collection: &str, id: &str, doc: Document) -> Result<()> {
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), doc);
        Ok(())
    }

    async fn add_document(&self, collection: &str, doc: Document) -> Result<String> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.set_document(collection, &id, doc).await?;
        Ok(id)
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<()> {
        if let Some(c) = self.collections.write().get_mut(collection) {
            c.remove(id);
        }
        Ok(())
    }

    async fn list_ids(&self, collection: &str, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|c| {
                c.range(prefix.to_string()..)
                    .take_while(|(id, _)| id.starts_with(prefix))
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

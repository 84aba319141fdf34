//! The gateway seam between the facade and the engine.

use crate::error::Result;
use crate::request::{CollectionRef, SearchRequest};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// How an index write treats an identifier that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Overwrite the existing document.
    #[default]
    Upsert,
    /// Reject the write with [`SearchError::Conflict`](crate::SearchError::Conflict).
    CreateOnly,
}

/// Options attached to a single write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteOptions {
    /// Existing-identifier behavior for index writes.
    pub mode: WriteMode,
    /// Wait until the write is visible to search before returning.
    pub refresh: bool,
}

/// Executes composed requests against a document engine.
///
/// Each call is one round trip. Retries, timeouts and connection pooling
/// belong to the implementation; any failure comes back as
/// [`SearchError::Transport`](crate::SearchError::Transport) (or `Conflict`).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run a search and return the raw engine response.
    async fn search(&self, request: &SearchRequest) -> Result<Value>;

    /// Store `source` under `id`, returning the identifier the engine reports.
    async fn index(
        &self,
        collection: &CollectionRef,
        id: &str,
        source: &Map<String, Value>,
        options: WriteOptions,
    ) -> Result<String>;

    /// Merge `patch` into the stored document `id`.
    async fn update(
        &self,
        collection: &CollectionRef,
        id: &str,
        patch: &Map<String, Value>,
        options: WriteOptions,
    ) -> Result<()>;

    /// Delete document `id`. `Ok(false)` when it did not exist.
    async fn delete(&self, collection: &CollectionRef, id: &str, options: WriteOptions)
    -> Result<bool>;

    /// Make recent writes visible to search.
    async fn refresh(&self, collection: &CollectionRef) -> Result<()>;
}

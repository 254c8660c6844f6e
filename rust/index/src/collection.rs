use async_trait::async_trait;
use serde_json::Value;
use shortkey_error::ShortkeyError;
use shortkey_types::EnsureIndexRequest;

/// The database collection a document class is stored in.
///
/// Documents, filters and updates are passed through as JSON values keyed by
/// storage keys. `ensure_index` must be idempotent: it is called again every
/// time an index's cache window runs out.
#[async_trait]
pub trait CollectionHandle: Send + Sync {
    async fn ensure_index(&self, request: &EnsureIndexRequest)
        -> Result<(), Box<dyn ShortkeyError>>;

    async fn find_one(&self, filter: &Value) -> Result<Option<Value>, Box<dyn ShortkeyError>>;

    async fn find(&self, filter: &Value) -> Result<Vec<Value>, Box<dyn ShortkeyError>>;

    async fn insert(&self, document: Value) -> Result<(), Box<dyn ShortkeyError>>;

    /// Returns the number of documents modified.
    async fn update(&self, filter: &Value, update: &Value) -> Result<u64, Box<dyn ShortkeyError>>;

    /// Returns the number of documents removed.
    async fn remove(&self, filter: &Value) -> Result<u64, Box<dyn ShortkeyError>>;

    async fn count(&self, filter: &Value) -> Result<u64, Box<dyn ShortkeyError>>;
}

/// Hands out the collection handle for a database/collection pair.
pub trait CollectionProvider: Send + Sync {
    type Handle: CollectionHandle;

    fn collection(&self, database: &str, collection: &str) -> Self::Handle;
}

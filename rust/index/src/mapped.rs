use std::sync::Arc;

use serde_json::Value;
use shortkey_config::registry::Registry;
use shortkey_types::DocumentSchema;

use crate::collection::{CollectionHandle, CollectionProvider};
use crate::scheduler::{EnsureOutcome, IndexError, IndexScheduler};

/// A document class bound to its database collection.
///
/// Every operation first gives the [`IndexScheduler`] a chance to ensure the
/// class's indexes, then forwards to the collection. Inserted documents are
/// renamed to storage keys and found documents back to attribute names;
/// filters and updates are forwarded as given.
pub struct MappedCollection<C> {
    schema: Arc<DocumentSchema>,
    handle: C,
    scheduler: IndexScheduler,
}

impl<C: CollectionHandle> MappedCollection<C> {
    pub fn new(schema: Arc<DocumentSchema>, handle: C, scheduler: IndexScheduler) -> Self {
        Self {
            schema,
            handle,
            scheduler,
        }
    }

    /// Opens the schema's database and collection through `provider`.
    pub fn open<P>(schema: Arc<DocumentSchema>, provider: &P, scheduler: IndexScheduler) -> Self
    where
        P: CollectionProvider<Handle = C>,
    {
        let handle = provider.collection(schema.database(), schema.collection());
        Self::new(schema, handle, scheduler)
    }

    /// Like [`MappedCollection::open`], with the scheduler shared through
    /// `registry`.
    pub fn from_registry<P>(schema: Arc<DocumentSchema>, provider: &P, registry: &Registry) -> Self
    where
        P: CollectionProvider<Handle = C>,
    {
        Self::open(schema, provider, IndexScheduler::shared(registry))
    }

    pub fn schema(&self) -> &DocumentSchema {
        &self.schema
    }

    pub fn handle(&self) -> &C {
        &self.handle
    }

    pub async fn ensure_indexes(&self) -> Result<EnsureOutcome, IndexError> {
        self.scheduler
            .ensure_indexes(&self.schema, &self.handle)
            .await
    }

    /// Makes the next operation ensure every index again.
    pub fn reset_ensured(&self) {
        self.scheduler.reset(self.schema.name());
    }

    pub async fn find_one(&self, filter: &Value) -> Result<Option<Value>, IndexError> {
        self.ensure_indexes().await?;
        let found = self
            .handle
            .find_one(filter)
            .await
            .map_err(IndexError::Collection)?;
        Ok(found.map(|document| self.schema.from_storage(&document)))
    }

    pub async fn find(&self, filter: &Value) -> Result<Vec<Value>, IndexError> {
        self.ensure_indexes().await?;
        let found = self
            .handle
            .find(filter)
            .await
            .map_err(IndexError::Collection)?;
        Ok(found
            .iter()
            .map(|document| self.schema.from_storage(document))
            .collect())
    }

    pub async fn insert(&self, document: &Value) -> Result<(), IndexError> {
        self.ensure_indexes().await?;
        self.handle
            .insert(self.schema.to_storage(document))
            .await
            .map_err(IndexError::Collection)
    }

    pub async fn update(&self, filter: &Value, update: &Value) -> Result<u64, IndexError> {
        self.ensure_indexes().await?;
        self.handle
            .update(filter, update)
            .await
            .map_err(IndexError::Collection)
    }

    pub async fn remove(&self, filter: &Value) -> Result<u64, IndexError> {
        self.ensure_indexes().await?;
        self.handle
            .remove(filter)
            .await
            .map_err(IndexError::Collection)
    }

    pub async fn count(&self, filter: &Value) -> Result<u64, IndexError> {
        self.ensure_indexes().await?;
        self.handle
            .count(filter)
            .await
            .map_err(IndexError::Collection)
    }
}

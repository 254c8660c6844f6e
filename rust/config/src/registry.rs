use parking_lot::Mutex;
use shortkey_error::{ErrorCodes, ShortkeyError};
use std::{
    any::{type_name, Any, TypeId},
    collections::HashMap,
    sync::Arc,
};
use thiserror::Error;

pub trait Injectable: Any + Send + Sync + Clone {}

/// A registry holding at most one value per type, used to hand the same
/// long-lived component (e.g. the index scheduler) to every consumer.
/// ## Note
/// Values are cloned on retrieval, so registered types should share state
/// between clones (commonly via the Arc<Inner> pattern).
#[derive(Default, Clone)]
pub struct Registry {
    storage: Arc<Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>>,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Type [{0}] not found in the registry")]
    TypeNotFound(String),
}

impl ShortkeyError for RegistryError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::Internal
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Injectable>(&self, value: T) {
        let mut storage = self.storage.lock();
        storage.insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get<T: Injectable>(&self) -> Result<T, RegistryError> {
        let storage = self.storage.lock();
        storage
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<T>())
            .cloned()
            .ok_or(RegistryError::TypeNotFound(type_name::<T>().to_string()))
    }

    /// Returns the registered value, registering `init()` first if the type is absent.
    pub fn get_or_register_with<T: Injectable>(
        &self,
        init: impl FnOnce() -> T,
    ) -> Result<T, RegistryError> {
        let mut storage = self.storage.lock();
        storage
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(init()))
            .downcast_ref::<T>()
            .cloned()
            .ok_or(RegistryError::TypeNotFound(type_name::<T>().to_string()))
    }
}

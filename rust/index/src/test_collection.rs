use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use shortkey_error::{CodedError, ShortkeyError};
use shortkey_types::EnsureIndexRequest;

use crate::collection::{CollectionHandle, CollectionProvider};

#[derive(Debug, Default)]
struct State {
    ensure_calls: Vec<EnsureIndexRequest>,
    fail_next: Option<(usize, CodedError)>,
    fail_specs: HashMap<String, CodedError>,
    ensure_delay: Duration,
    documents: Vec<Value>,
}

/// In-memory collection that records every ensure-index call.
///
/// Filters match on equality of top-level or dotted fields, updates support
/// `$set` or a full replacement. Clones share state.
#[derive(Clone, Debug, Default)]
pub struct RecordingCollection {
    state: Arc<Mutex<State>>,
}

impl RecordingCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure_calls(&self) -> Vec<EnsureIndexRequest> {
        self.state.lock().ensure_calls.clone()
    }

    /// Fails the next `count` ensure-index calls with `error`.
    pub fn fail_next_ensures(&self, count: usize, error: CodedError) {
        self.state.lock().fail_next = (count > 0).then_some((count, error));
    }

    /// Fails every ensure-index call whose resolved spec displays as `spec`.
    pub fn fail_ensure_for(&self, spec: impl Into<String>, error: CodedError) {
        self.state.lock().fail_specs.insert(spec.into(), error);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.fail_next = None;
        state.fail_specs.clear();
    }

    /// Makes every ensure-index call take `delay` before it completes.
    pub fn set_ensure_delay(&self, delay: Duration) {
        self.state.lock().ensure_delay = delay;
    }

    /// Documents as stored, keyed by storage keys.
    pub fn documents(&self) -> Vec<Value> {
        self.state.lock().documents.clone()
    }

    fn next_ensure_failure(&self, request: &EnsureIndexRequest) -> Option<CodedError> {
        let mut state = self.state.lock();
        if let Some((remaining, error)) = state.fail_next.as_mut() {
            let error = error.clone();
            *remaining -= 1;
            if *remaining == 0 {
                state.fail_next = None;
            }
            return Some(error);
        }
        state.fail_specs.get(&request.spec.to_string()).cloned()
    }
}

fn field<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(document, |value, segment| value.get(segment))
}

fn matches(document: &Value, filter: &Value) -> bool {
    match filter.as_object() {
        Some(conditions) => conditions
            .iter()
            .all(|(path, expected)| field(document, path) == Some(expected)),
        None => false,
    }
}

fn set_field(document: &mut Value, path: &str, value: Value) {
    let mut segments = path.split('.').peekable();
    let mut current = document;
    while let Some(segment) = segments.next() {
        let Some(object) = current.as_object_mut() else {
            return;
        };
        if segments.peek().is_none() {
            object.insert(segment.to_string(), value);
            return;
        }
        current = object
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

fn apply_update(document: &mut Value, update: &Value) {
    match update.get("$set").and_then(Value::as_object) {
        Some(fields) => {
            for (path, value) in fields {
                set_field(document, path, value.clone());
            }
        }
        None => *document = update.clone(),
    }
}

#[async_trait]
impl CollectionHandle for RecordingCollection {
    async fn ensure_index(
        &self,
        request: &EnsureIndexRequest,
    ) -> Result<(), Box<dyn ShortkeyError>> {
        let delay = {
            let mut state = self.state.lock();
            state.ensure_calls.push(request.clone());
            state.ensure_delay
        };
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
        match self.next_ensure_failure(request) {
            Some(error) => Err(error.boxed()),
            None => Ok(()),
        }
    }

    async fn find_one(&self, filter: &Value) -> Result<Option<Value>, Box<dyn ShortkeyError>> {
        Ok(self
            .state
            .lock()
            .documents
            .iter()
            .find(|document| matches(document, filter))
            .cloned())
    }

    async fn find(&self, filter: &Value) -> Result<Vec<Value>, Box<dyn ShortkeyError>> {
        Ok(self
            .state
            .lock()
            .documents
            .iter()
            .filter(|document| matches(document, filter))
            .cloned()
            .collect())
    }

    async fn insert(&self, document: Value) -> Result<(), Box<dyn ShortkeyError>> {
        self.state.lock().documents.push(document);
        Ok(())
    }

    async fn update(&self, filter: &Value, update: &Value) -> Result<u64, Box<dyn ShortkeyError>> {
        let mut state = self.state.lock();
        let mut modified = 0;
        for document in state
            .documents
            .iter_mut()
            .filter(|document| matches(document, filter))
        {
            apply_update(document, update);
            modified += 1;
        }
        Ok(modified)
    }

    async fn remove(&self, filter: &Value) -> Result<u64, Box<dyn ShortkeyError>> {
        let mut state = self.state.lock();
        let before = state.documents.len();
        state.documents.retain(|document| !matches(document, filter));
        Ok((before - state.documents.len()) as u64)
    }

    async fn count(&self, filter: &Value) -> Result<u64, Box<dyn ShortkeyError>> {
        Ok(self
            .state
            .lock()
            .documents
            .iter()
            .filter(|document| matches(document, filter))
            .count() as u64)
    }
}

/// Hands out one shared [`RecordingCollection`] per database/collection pair.
#[derive(Clone, Debug, Default)]
pub struct RecordingDatabase {
    collections: Arc<Mutex<HashMap<(String, String), RecordingCollection>>>,
}

impl RecordingDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened(&self) -> Vec<(String, String)> {
        let mut opened = self
            .collections
            .lock()
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        opened.sort();
        opened
    }
}

impl CollectionProvider for RecordingDatabase {
    type Handle = RecordingCollection;

    fn collection(&self, database: &str, collection: &str) -> RecordingCollection {
        self.collections
            .lock()
            .entry((database.to_string(), collection.to_string()))
            .or_default()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_filters_and_updates() {
        let collection = RecordingCollection::new();
        collection
            .insert(json!({"u": "ann", "m": {"t": "rust"}}))
            .await
            .unwrap();
        collection.insert(json!({"u": "bob"})).await.unwrap();

        assert_eq!(collection.count(&json!({})).await.unwrap(), 2);
        assert_eq!(collection.count(&json!({"m.t": "rust"})).await.unwrap(), 1);

        let modified = collection
            .update(&json!({"u": "bob"}), &json!({"$set": {"m.t": "go"}}))
            .await
            .unwrap();
        assert_eq!(modified, 1);
        assert_eq!(
            collection.find_one(&json!({"u": "bob"})).await.unwrap(),
            Some(json!({"u": "bob", "m": {"t": "go"}}))
        );

        assert_eq!(collection.remove(&json!({"m.t": "go"})).await.unwrap(), 1);
        assert_eq!(collection.find(&json!({})).await.unwrap().len(), 1);
    }

    #[test]
    fn test_database_shares_handles() {
        let database = RecordingDatabase::new();
        let first = database.collection("app", "posts");
        first.set_ensure_delay(Duration::from_secs(1));
        let second = database.collection("app", "posts");
        assert_eq!(second.state.lock().ensure_delay, Duration::from_secs(1));
        assert_eq!(
            database.opened(),
            vec![("app".to_string(), "posts".to_string())]
        );
    }
}

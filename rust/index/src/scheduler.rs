use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use opentelemetry::metrics::Counter;
use opentelemetry::KeyValue;
use parking_lot::Mutex;
use shortkey_config::registry::{Injectable, Registry};
use shortkey_config::Configurable;
use shortkey_error::{ErrorCodes, ShortkeyError};
use shortkey_types::{DocumentSchema, IndexDescriptor, IndexSpecError};
use thiserror::Error;
use tokio::time::Instant;

use crate::collection::CollectionHandle;
use crate::config::{EnsureFailurePolicy, IndexSchedulerConfig};
use crate::partitioned_mutex::AsyncPartitionedMutex;

#[derive(Debug, Error)]
pub enum IndexError {
    /// An index declaration could not be turned into an ensure-index call.
    #[error(transparent)]
    Spec(#[from] IndexSpecError),
    /// The database rejected an ensure-index call.
    #[error(transparent)]
    EnsureIndex(Box<dyn ShortkeyError>),
    /// The guarded operation itself failed.
    #[error(transparent)]
    Collection(Box<dyn ShortkeyError>),
}

impl ShortkeyError for IndexError {
    fn code(&self) -> ErrorCodes {
        match self {
            IndexError::Spec(err) => err.code(),
            IndexError::EnsureIndex(err) => err.code(),
            IndexError::Collection(err) => err.code(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SchedulerMetrics {
    ensure_calls: Counter<u64>,
    ensure_failures: Counter<u64>,
    ensure_skipped: Counter<u64>,
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        let meter = opentelemetry::global::meter("shortkey_index");
        Self {
            ensure_calls: meter
                .u64_counter("index_ensure_calls")
                .with_description("Number of ensure-index calls issued")
                .build(),
            ensure_failures: meter
                .u64_counter("index_ensure_failures")
                .with_description("Number of ensure-index calls that failed")
                .build(),
            ensure_skipped: meter
                .u64_counter("index_ensure_skipped")
                .with_description("Number of index checks skipped inside their cache window")
                .build(),
        }
    }
}

/// What one pass of [`IndexScheduler::ensure_indexes`] did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EnsureOutcome {
    /// Ensure-index calls made, including a failed one.
    pub issued: usize,
    /// Descriptors left alone because their cache window had not run out, or
    /// because a previous failure is still backing off.
    pub skipped: usize,
    pub failed: bool,
}

/// Where a document class lives. Schemas that share a name but are stored
/// elsewhere keep separate state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DocumentKey {
    name: String,
    database: String,
    collection: String,
}

impl DocumentKey {
    fn of(schema: &DocumentSchema) -> Self {
        Self {
            name: schema.name().to_string(),
            database: schema.database().to_string(),
            collection: schema.collection().to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct EnsureState {
    // Matched by descriptor value, not position: a different declaration
    // under the same document is a different index.
    ensured_at: Vec<(IndexDescriptor, Instant)>,
    failed_at: Option<Instant>,
}

impl EnsureState {
    fn ensured_at(&self, descriptor: &IndexDescriptor) -> Option<Instant> {
        self.ensured_at
            .iter()
            .find(|(ensured, _)| ensured == descriptor)
            .map(|(_, at)| *at)
    }

    fn record(&mut self, descriptor: &IndexDescriptor, now: Instant) {
        match self
            .ensured_at
            .iter_mut()
            .find(|(ensured, _)| ensured == descriptor)
        {
            Some((_, at)) => *at = now,
            None => self.ensured_at.push((descriptor.clone(), now)),
        }
    }
}

struct Inner {
    config: IndexSchedulerConfig,
    locks: AsyncPartitionedMutex<String>,
    state: Mutex<HashMap<DocumentKey, EnsureState>>,
    metrics: SchedulerMetrics,
}

/// Keeps the declared indexes of every document class in place without
/// issuing an ensure-index call on every operation.
///
/// For each descriptor of a document the scheduler remembers when it was
/// last ensured. A pass only calls the database for descriptors whose
/// `cache_for` window has run out (or that were never ensured), and records
/// the new time only if every call of the pass succeeded. A pass holds a lock
/// for its document, so concurrent operations hitting an expired window wait
/// for one pass instead of each running their own.
///
/// Cloning is cheap and clones share state.
#[derive(Clone)]
pub struct IndexScheduler {
    inner: Arc<Inner>,
}

impl Injectable for IndexScheduler {}

impl Default for IndexScheduler {
    fn default() -> Self {
        Self::new(IndexSchedulerConfig::default())
    }
}

enum Due {
    BackingOff,
    Descriptors(Vec<usize>),
}

impl IndexScheduler {
    pub fn new(config: IndexSchedulerConfig) -> Self {
        let locks = AsyncPartitionedMutex::with_partitions(config.lock_partitions, ());
        Self {
            inner: Arc::new(Inner {
                config,
                locks,
                state: Mutex::new(HashMap::new()),
                metrics: SchedulerMetrics::default(),
            }),
        }
    }

    /// The scheduler registered in `registry`, registering a default one if
    /// there is none yet.
    pub fn shared(registry: &Registry) -> Self {
        match registry.get_or_register_with(IndexScheduler::default) {
            Ok(scheduler) => scheduler,
            Err(err) => {
                tracing::warn!("Falling back to an unregistered index scheduler: {err}");
                IndexScheduler::default()
            }
        }
    }

    pub fn config(&self) -> &IndexSchedulerConfig {
        &self.inner.config
    }

    /// Ensures the indexes of `schema` through `collection` if any of them is
    /// due. Declaration errors are returned before any call is made; how a
    /// failed call is reported depends on the configured failure policy.
    #[tracing::instrument(skip_all, fields(document = %schema.name()))]
    pub async fn ensure_indexes<C>(
        &self,
        schema: &DocumentSchema,
        collection: &C,
    ) -> Result<EnsureOutcome, IndexError>
    where
        C: CollectionHandle + ?Sized,
    {
        let descriptors = schema.indexes();
        if descriptors.is_empty() {
            return Ok(EnsureOutcome::default());
        }
        let attributes = [KeyValue::new("document", schema.name().to_string())];

        let _guard = self.inner.locks.lock(schema.name()).await;
        let now = Instant::now();

        let due = match self.due_descriptors(schema, now) {
            Due::BackingOff => {
                tracing::trace!("Previous ensure pass failed, backing off");
                self.inner
                    .metrics
                    .ensure_skipped
                    .add(descriptors.len() as u64, &attributes);
                return Ok(EnsureOutcome {
                    skipped: descriptors.len(),
                    ..Default::default()
                });
            }
            Due::Descriptors(due) => due,
        };
        let skipped = descriptors.len() - due.len();
        if skipped > 0 {
            self.inner
                .metrics
                .ensure_skipped
                .add(skipped as u64, &attributes);
        }
        if due.is_empty() {
            tracing::trace!("All indexes ensured within their cache window");
            return Ok(EnsureOutcome {
                skipped,
                ..Default::default()
            });
        }

        // Resolve everything up front: a bad declaration must not leave the
        // database with half of the pass applied.
        let requests = due
            .iter()
            .map(|&position| descriptors[position].resolve(schema))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(count = requests.len(), skipped, "Ensuring indexes");
        for (position, request) in requests.iter().enumerate() {
            tracing::debug!(
                spec = %request.spec,
                options = ?request.options.to_map(),
                "ensure_index"
            );
            self.inner.metrics.ensure_calls.add(1, &attributes);
            if let Err(err) = collection.ensure_index(request).await {
                self.inner.metrics.ensure_failures.add(1, &attributes);
                self.record_failure(schema, now);
                let outcome = EnsureOutcome {
                    issued: position + 1,
                    skipped,
                    failed: true,
                };
                return match self.inner.config.ensure_failure_policy {
                    EnsureFailurePolicy::Proceed => {
                        tracing::warn!(
                            spec = %request.spec,
                            error = %err,
                            "ensure_index failed, indexes will be ensured again on the next operation"
                        );
                        Ok(outcome)
                    }
                    EnsureFailurePolicy::Abort => {
                        tracing::error!(spec = %request.spec, error = %err, "ensure_index failed");
                        Err(IndexError::EnsureIndex(err))
                    }
                };
            }
        }

        self.record_success(schema, &due, now);
        Ok(EnsureOutcome {
            issued: requests.len(),
            skipped,
            failed: false,
        })
    }

    /// Whether a guarded operation on `schema` right now would run an ensure
    /// pass. Does not take the document's lock.
    pub fn needs_ensure(&self, schema: &DocumentSchema) -> bool {
        match self.due_descriptors(schema, Instant::now()) {
            Due::BackingOff => false,
            Due::Descriptors(due) => !due.is_empty(),
        }
    }

    /// When the descriptor at `position` of `schema` was last ensured.
    pub fn last_ensured(&self, schema: &DocumentSchema, position: usize) -> Option<Instant> {
        let descriptor = schema.indexes().get(position)?;
        self.inner
            .state
            .lock()
            .get(&DocumentKey::of(schema))
            .and_then(|state| state.ensured_at(descriptor))
    }

    /// Forgets everything about documents named `document`; their next guarded
    /// operation ensures all of their indexes.
    pub fn reset(&self, document: &str) {
        self.inner
            .state
            .lock()
            .retain(|key, _| key.name != document);
    }

    pub fn reset_all(&self) {
        self.inner.state.lock().clear();
    }

    fn due_descriptors(&self, schema: &DocumentSchema, now: Instant) -> Due {
        let state = self.inner.state.lock();
        let entry = state.get(&DocumentKey::of(schema));

        if let Some(failed_at) = entry.and_then(|entry| entry.failed_at) {
            if now.duration_since(failed_at) < self.inner.config.retry_backoff {
                return Due::BackingOff;
            }
        }

        Due::Descriptors(
            schema
                .indexes()
                .iter()
                .enumerate()
                .filter(|(_, descriptor)| {
                    match entry.and_then(|entry| entry.ensured_at(descriptor)) {
                        None => true,
                        Some(ensured_at) => {
                            now.duration_since(ensured_at) >= descriptor.cache_window()
                        }
                    }
                })
                .map(|(position, _)| position)
                .collect(),
        )
    }

    fn record_success(&self, schema: &DocumentSchema, ensured: &[usize], now: Instant) {
        let mut state = self.inner.state.lock();
        let entry = state.entry(DocumentKey::of(schema)).or_default();
        entry.failed_at = None;
        for &position in ensured {
            entry.record(&schema.indexes()[position], now);
        }
    }

    fn record_failure(&self, schema: &DocumentSchema, now: Instant) {
        let mut state = self.inner.state.lock();
        state.entry(DocumentKey::of(schema)).or_default().failed_at = Some(now);
    }
}

#[async_trait]
impl Configurable<IndexSchedulerConfig> for IndexScheduler {
    async fn try_from_config(
        config: &IndexSchedulerConfig,
        registry: &Registry,
    ) -> Result<Self, Box<dyn ShortkeyError>> {
        let scheduler = IndexScheduler::new(config.clone());
        registry.register(scheduler.clone());
        Ok(scheduler)
    }
}

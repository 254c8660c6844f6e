use serde::{Deserialize, Serialize};
use shortkey_config::helpers::{
    deserialize_duration_from_seconds, serialize_duration_to_seconds,
};
use shortkey_config::ConfigError;
use shortkey_tracing::LogFilter;
use shortkey_types::DocumentDefinition;
use std::time::Duration;

use crate::partitioned_mutex::DEFAULT_NUM_PARTITIONS;

/// What a guarded operation does when the database rejects an ensure-index
/// call. Declaration errors (unresolvable paths, malformed descriptors)
/// always fail the operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsureFailurePolicy {
    /// Log the failure and run the operation anyway.
    #[default]
    Proceed,
    /// Return the failure to the caller without running the operation.
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSchedulerConfig {
    #[serde(default)]
    pub ensure_failure_policy: EnsureFailurePolicy,
    /// Minimum time between a failed ensure pass and the next attempt. Zero
    /// retries on the very next guarded operation.
    #[serde(
        default,
        rename = "retry_backoff_secs",
        deserialize_with = "deserialize_duration_from_seconds",
        serialize_with = "serialize_duration_to_seconds"
    )]
    pub retry_backoff: Duration,
    #[serde(default = "IndexSchedulerConfig::default_lock_partitions")]
    pub lock_partitions: usize,
}

impl IndexSchedulerConfig {
    fn default_lock_partitions() -> usize {
        DEFAULT_NUM_PARTITIONS
    }
}

impl Default for IndexSchedulerConfig {
    fn default() -> Self {
        Self {
            ensure_failure_policy: EnsureFailurePolicy::default(),
            retry_backoff: Duration::ZERO,
            lock_partitions: Self::default_lock_partitions(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// # Description
/// Root config: scheduler settings, the document classes to map and extra log
/// filters. Read from a YAML file, with environment variables prefixed
/// SHORTKEY_ taking precedence (nested keys separated by "__").
pub struct ShortkeyConfig {
    #[serde(default)]
    pub scheduler: IndexSchedulerConfig,
    #[serde(default)]
    pub documents: Vec<DocumentDefinition>,
    #[serde(default)]
    pub log_filters: Vec<LogFilter>,
}

impl ShortkeyConfig {
    /// Loads from `SHORTKEY_CONFIG_PATH`, or `./shortkey_config.yaml` by default.
    pub fn load() -> Result<Self, ConfigError> {
        shortkey_config::load()
    }

    pub fn load_from_path(path: &str) -> Result<Self, ConfigError> {
        shortkey_config::load_from_path(path)
    }

    pub fn document(&self, name: &str) -> Option<&DocumentDefinition> {
        self.documents.iter().find(|document| document.name == name)
    }

    /// Installs the stdout subscriber with this config's log filters.
    pub fn init_tracing(&self) {
        shortkey_tracing::init_stdout_tracing(&self.log_filters);
    }
}

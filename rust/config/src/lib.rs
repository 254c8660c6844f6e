pub mod helpers;
pub mod registry;

use async_trait::async_trait;
use figment::providers::{Env, Format, Yaml};
use registry::Registry;
use serde::de::DeserializeOwned;
use shortkey_error::{ErrorCodes, ShortkeyError};
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "./shortkey_config.yaml";
pub const CONFIG_PATH_ENV_VAR: &str = "SHORTKEY_CONFIG_PATH";
pub const ENV_PREFIX: &str = "SHORTKEY_";

/// # Description
/// A trait for building a component from its configuration. Components that
/// are shared across the process register themselves in the [`Registry`] so
/// later lookups reuse the same instance.
#[async_trait]
pub trait Configurable<T, E = Box<dyn ShortkeyError>> {
    async fn try_from_config(config: &T, registry: &Registry) -> Result<Self, E>
    where
        Self: Sized;
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Error loading config: {0}")]
    Load(#[from] figment::Error),
}

impl ShortkeyError for ConfigError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::InvalidArgument
    }
}

/// # Description
/// Load a config object from the path named by `SHORTKEY_CONFIG_PATH`, or from
/// `./shortkey_config.yaml` when the variable is unset.
/// # Notes
/// See [`load_from_path`] for how the YAML file and the environment combine.
pub fn load<T: DeserializeOwned>() -> Result<T, ConfigError> {
    match std::env::var(CONFIG_PATH_ENV_VAR) {
        Ok(path) => load_from_path(&path),
        Err(_) => load_from_path(DEFAULT_CONFIG_PATH),
    }
}

/// # Description
/// Load a config object from a YAML file, overlaid with environment variables.
/// # Notes
/// Environment variables are prefixed with SHORTKEY_ and take precedence over
/// values in the YAML file. A missing file is not an error: the config is then
/// built from the environment and serde defaults alone.
pub fn load_from_path<T: DeserializeOwned>(path: &str) -> Result<T, ConfigError> {
    // Figment splits nested keys on '.', but '.' cannot appear in an environment
    // variable name, so nesting is written as "__" and mapped here.
    let mut f = figment::Figment::from(
        Env::prefixed(ENV_PREFIX).map(|k| k.as_str().replace("__", ".").into()),
    );
    if Path::new(path).exists() {
        f = figment::Figment::from(Yaml::file(path)).merge(f);
    }
    Ok(f.extract()?)
}

use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt;
use tracing_subscriber::Registry;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Layer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFilterLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogFilterLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFilterLevel::Trace => f.write_str("trace"),
            LogFilterLevel::Debug => f.write_str("debug"),
            LogFilterLevel::Info => f.write_str("info"),
            LogFilterLevel::Warn => f.write_str("warn"),
            LogFilterLevel::Error => f.write_str("error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFilter {
    pub crate_name: String,
    pub filter_level: LogFilterLevel,
}

// These need to have underscores because the Rust compiler converts hyphens
// in crate names to underscores.
const DEFAULT_CRATE_NAMES: &[&str] = &[
    "shortkey_config",
    "shortkey_error",
    "shortkey_index",
    "shortkey_tracing",
    "shortkey_types",
];

pub(crate) fn global_filter_directives(custom_filters: &[LogFilter]) -> String {
    let mut directives = vec!["error".to_string()];
    directives.extend(DEFAULT_CRATE_NAMES.iter().map(|s| format!("{s}=info")));
    directives.extend(
        custom_filters
            .iter()
            .map(|filter| format!("{}={}", filter.crate_name, filter.filter_level)),
    );
    directives.join(",")
}

pub fn init_global_filter_layer(
    custom_filters: &[LogFilter],
) -> Box<dyn Layer<Registry> + Send + Sync> {
    EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| global_filter_directives(custom_filters)),
    )
    .boxed()
}

pub fn init_stdout_layer() -> Box<dyn Layer<Registry> + Send + Sync> {
    fmt::layer().with_target(true).boxed()
}

/// Installs the layers as the global subscriber. Does nothing if no layers
/// are given; a second call after a subscriber is installed only logs.
pub fn init_tracing(layers: Vec<Box<dyn Layer<Registry> + Send + Sync>>) {
    let Some(layers) = layers
        .into_iter()
        .reduce(|a, b| Box::new(a.and_then(b)))
    else {
        return;
    };
    let subscriber = tracing_subscriber::registry().with(layers);
    match tracing::subscriber::set_global_default(subscriber) {
        Ok(()) => tracing::info!("Global tracing subscriber set"),
        Err(err) => tracing::warn!("Global tracing subscriber already set: {err}"),
    }
}

pub fn init_panic_tracing_hook() {
    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let payload = panic_info.payload();

        let payload = if let Some(s) = payload.downcast_ref::<&str>() {
            Some(&**s)
        } else {
            payload.downcast_ref::<String>().map(|s| s.as_str())
        };

        tracing::error!(
            panic.payload = payload,
            panic.location = panic_info.location().map(|l| l.to_string()),
            panic.backtrace = tracing::field::display(std::backtrace::Backtrace::capture()),
            "A panic occurred"
        );

        prev_hook(panic_info);
    }));
}

pub fn init_stdout_tracing(custom_filters: &[LogFilter]) {
    let layers = vec![
        // The global filter applies to all subsequent layers
        init_global_filter_layer(custom_filters),
        init_stdout_layer(),
    ];
    init_tracing(layers);
    init_panic_tracing_hook();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_cover_workspace_crates() {
        let directives = global_filter_directives(&[]);
        assert!(directives.starts_with("error,"));
        assert!(directives.contains("shortkey_index=info"));
        assert!(directives.contains("shortkey_types=info"));
    }

    #[test]
    fn test_custom_filters_are_appended() {
        let filters: Vec<LogFilter> = serde_json::from_str(
            r#"[{"crate_name": "shortkey_index", "filter_level": "trace"}]"#,
        )
        .unwrap();
        let directives = global_filter_directives(&filters);
        assert!(directives.ends_with(",shortkey_index=trace"));
    }
}

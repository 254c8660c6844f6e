use std::sync::Arc;
use std::time::Duration;

use figment::Jail;
use serde_json::json;
use serial_test::serial;
use shortkey_config::registry::Registry;
use shortkey_config::Configurable;
use shortkey_index::test_collection::RecordingDatabase;
use shortkey_index::{EnsureFailurePolicy, IndexScheduler, MappedCollection, ShortkeyConfig};
use shortkey_tracing::{LogFilter, LogFilterLevel};
use shortkey_types::{Direction, DocumentSchema, ResolvedIndexSpec};

const CONFIG: &str = r#"
scheduler:
    retry_backoff_secs: 15
documents:
    - name: Post
      database: blog
      collection: posts
      attributes:
          user_name: u
          published: true
          meta:
              key: m
              attributes:
                  tag: t
      indexes:
          - keys: user_name
            sparse: true
          - keys: [["user_name", 1], ["meta.tag", -1]]
            cache_for: 60
            name: user_tag
log_filters:
    - crate_name: hyper
      filter_level: warn
"#;

#[test]
#[serial]
fn test_load_documents_from_yaml() {
    Jail::expect_with(|jail| {
        jail.create_file("shortkey_config.yaml", CONFIG)?;
        let config = ShortkeyConfig::load().expect("config should load");

        assert_eq!(config.scheduler.retry_backoff, Duration::from_secs(15));
        assert_eq!(
            config.scheduler.ensure_failure_policy,
            EnsureFailurePolicy::Proceed
        );
        assert_eq!(
            config.log_filters,
            vec![LogFilter {
                crate_name: "hyper".to_string(),
                filter_level: LogFilterLevel::Warn,
            }]
        );

        let post = config.document("Post").expect("Post is declared");
        let schema = DocumentSchema::from_definition(post);
        assert_eq!(schema.resolve("meta.tag").unwrap(), "m.t");
        assert_eq!(schema.key("user_name"), Some("u"));
        assert_eq!(schema.indexes().len(), 2);
        assert_eq!(
            schema.indexes()[1].cache_window(),
            Duration::from_secs(60)
        );
        assert!(config.document("Comment").is_none());
        Ok(())
    });
}

#[test]
#[serial]
fn test_env_overrides_scheduler_settings() {
    Jail::expect_with(|jail| {
        jail.create_file("custom.yaml", CONFIG)?;
        jail.set_env("SHORTKEY_CONFIG_PATH", "custom.yaml");
        jail.set_env("SHORTKEY_SCHEDULER__ENSURE_FAILURE_POLICY", "abort");
        jail.set_env("SHORTKEY_SCHEDULER__LOCK_PARTITIONS", 8);
        let config = ShortkeyConfig::load().expect("config should load");

        assert_eq!(
            config.scheduler.ensure_failure_policy,
            EnsureFailurePolicy::Abort
        );
        assert_eq!(config.scheduler.lock_partitions, 8);
        assert_eq!(config.scheduler.retry_backoff, Duration::from_secs(15));
        assert_eq!(config.documents.len(), 1);
        Ok(())
    });
}

#[test]
#[serial]
fn test_missing_file_yields_defaults() {
    Jail::expect_with(|_jail| {
        let config = ShortkeyConfig::load_from_path("missing.yaml").expect("config should load");
        assert_eq!(config, ShortkeyConfig::default());
        Ok(())
    });
}

#[test]
#[serial]
fn test_invalid_policy_is_an_error() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "shortkey_config.yaml",
            r#"
            scheduler:
                ensure_failure_policy: sometimes
            "#,
        )?;
        assert!(ShortkeyConfig::load().is_err());
        Ok(())
    });
}

#[tokio::test]
async fn test_configured_documents_ensure_their_indexes() {
    let config: ShortkeyConfig = post_config();
    let registry = Registry::new();
    IndexScheduler::try_from_config(&config.scheduler, &registry)
        .await
        .unwrap();

    let database = RecordingDatabase::new();
    let schema = Arc::new(DocumentSchema::from_definition(&config.documents[0]));
    let posts = MappedCollection::from_registry(schema, &database, &registry);

    posts
        .insert(&json!({"user_name": "ann", "published": false, "meta": {"tag": "rust"}}))
        .await
        .unwrap();

    assert_eq!(
        database.opened(),
        vec![("blog".to_string(), "posts".to_string())]
    );
    let calls = posts.handle().ensure_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].spec, ResolvedIndexSpec::Key("u".to_string()));
    assert_eq!(
        serde_json::Value::Object(calls[0].options.to_map()),
        json!({"background": true, "cache_for": 86400, "sparse": true})
    );
    assert_eq!(
        calls[1].spec,
        ResolvedIndexSpec::Compound(vec![
            ("u".to_string(), Direction::Ascending),
            ("m.t".to_string(), Direction::Descending),
        ])
    );
    assert_eq!(
        serde_json::Value::Object(calls[1].options.to_map()),
        json!({"background": true, "cache_for": 60, "name": "user_tag"})
    );
    assert_eq!(
        posts.handle().documents(),
        vec![json!({"u": "ann", "published": false, "m": {"t": "rust"}})]
    );
}

// The same document set as CONFIG, in JSON form, so the async test does not
// depend on the process environment.
fn post_config() -> ShortkeyConfig {
    serde_json::from_value(json!({
        "documents": [{
            "name": "Post",
            "database": "blog",
            "collection": "posts",
            "attributes": {
                "user_name": "u",
                "published": true,
                "meta": {"key": "m", "attributes": {"tag": "t"}}
            },
            "indexes": [
                {"keys": "user_name", "sparse": true},
                {"keys": [["user_name", 1], ["meta.tag", -1]], "cache_for": 60, "name": "user_tag"}
            ]
        }]
    }))
    .unwrap()
}

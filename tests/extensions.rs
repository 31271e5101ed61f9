//! Integration tests for the extension registry with the built-in extensions.

use ai_lib_gateway::extensions::{
    set_enabled_for_request, ContentFilterExtension, DependencyDeclarer, Extension,
    ExtensionConfig, ExtensionRegistry, Initializable, RequestTagExtension, RouteRequest,
    RouteTable,
};
use ai_lib_gateway::types::{ChatRequest, Metadata};
use ai_lib_gateway::Error;
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

struct Dependent {
    log: Arc<Mutex<Vec<String>>>,
}

impl Extension for Dependent {
    fn name(&self) -> &str {
        "dependent"
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    fn description(&self) -> &str {
        "initializes after the content filter"
    }

    fn as_initializable(&self) -> Option<&dyn Initializable> {
        Some(self)
    }

    fn as_dependency_declarer(&self) -> Option<&dyn DependencyDeclarer> {
        Some(self)
    }
}

impl DependencyDeclarer for Dependent {
    fn dependencies(&self) -> Vec<String> {
        vec![ContentFilterExtension::NAME.to_string()]
    }
}

#[async_trait]
impl Initializable for Dependent {
    async fn initialize(&self, _config: &Metadata) -> ai_lib_gateway::Result<()> {
        self.log.lock().unwrap().push("init".into());
        Ok(())
    }

    async fn shutdown(&self, _ctx: &CancellationToken) -> ai_lib_gateway::Result<()> {
        self.log.lock().unwrap().push("shutdown".into());
        Ok(())
    }
}

fn configs(patterns: serde_json::Value) -> HashMap<String, ExtensionConfig> {
    let mut map = HashMap::new();
    map.insert(
        ContentFilterExtension::NAME.to_string(),
        ExtensionConfig::enabled().with_value("patterns", patterns),
    );
    map.insert("dependent".to_string(), ExtensionConfig::enabled());
    map.insert(
        RequestTagExtension::NAME.to_string(),
        ExtensionConfig::enabled().with_value("tags", json!({"region": "eu"})),
    );
    map
}

#[tokio::test]
async fn test_configured_registry_end_to_end() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = ExtensionRegistry::new();
    registry
        .register(Arc::new(Dependent { log: log.clone() }))
        .unwrap();
    let filter = Arc::new(ContentFilterExtension::new(Vec::<String>::new()).unwrap());
    registry.register(filter.clone()).unwrap();
    registry
        .register(Arc::new(RequestTagExtension::new()))
        .unwrap();

    let order = registry.initialization_order();
    let filter_pos = order.iter().position(|n| n == "content_filter").unwrap();
    let dependent_pos = order.iter().position(|n| n == "dependent").unwrap();
    assert!(filter_pos < dependent_pos);

    registry
        .initialize(&configs(json!(["drop\\s+table"])))
        .await
        .unwrap();
    assert_eq!(filter.pattern_count(), 1);
    assert_eq!(*log.lock().unwrap(), vec!["init"]);

    let ctx = CancellationToken::new();
    let mut ok = ChatRequest::new("m").with_prompt("hello");
    registry.run_before_generate(&ctx, &mut ok).await.unwrap();
    assert_eq!(ok.metadata["region"], json!("eu"));
    assert!(ok.metadata.contains_key(RequestTagExtension::REQUEST_ID_KEY));

    let mut bad = ChatRequest::new("m").with_prompt("please DROP   TABLE users");
    assert!(registry.run_before_generate(&ctx, &mut bad).await.is_err());

    let mut table = RouteTable::new();
    registry.register_routes(&mut table).unwrap();
    let resp = table
        .dispatch(RouteRequest::new("GET", "/extensions/content_filter/stats"))
        .await;
    assert_eq!(resp.status, 200);
    assert!(resp.body_str().contains("\"blocked\":1"));

    registry.shutdown(&ctx).await.unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["init", "shutdown"]);
}

#[tokio::test]
async fn test_bad_pattern_config_fails_init() {
    let registry = ExtensionRegistry::new();
    registry
        .register(Arc::new(ContentFilterExtension::new(Vec::<String>::new()).unwrap()))
        .unwrap();
    let err = registry.initialize(&configs(json!([42]))).await.unwrap_err();
    match err {
        Error::InitFailed { name, source } => {
            assert_eq!(name, "content_filter");
            assert!(matches!(*source, Error::Configuration { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_request_opt_out_skips_tagging() {
    let registry = ExtensionRegistry::new();
    registry
        .register(Arc::new(RequestTagExtension::new().with_tag("env", "ci")))
        .unwrap();

    let ctx = CancellationToken::new();
    let mut request = ChatRequest::new("m");
    set_enabled_for_request(&mut request.metadata, RequestTagExtension::NAME, false);
    registry.run_before_generate(&ctx, &mut request).await.unwrap();
    assert!(!request.metadata.contains_key("env"));
    assert!(!request
        .metadata
        .contains_key(RequestTagExtension::REQUEST_ID_KEY));
}

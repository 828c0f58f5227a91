//! # Reconciler Integration Tests
//!
//! End-to-end syncs through the public API. A wiremock server plays the gateway admin
//! API (plugin schemas and the bulk `/config` endpoint); the diff-apply collaborators
//! and the secret store are in-test fakes.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use gateway_reconciler::custom_entities::SecretStore;
use gateway_reconciler::reconcile::{
    ChangeAction, Differencer, Dumper, PlannedChange, Solver, SyncPlan,
};
use gateway_reconciler::state::{
    Plugin, Route, RouteNode, Service, ServiceNode, Upstream, UpstreamNode,
};
use gateway_reconciler::{
    DesiredState, Document, ReconcileError, ReconcileResult, ReconcilerBuilder, SyncConfig,
    SyncMode, SyncOutcome, SyncSession,
};
use serde_json::{json, Value};
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn desired_state() -> DesiredState {
    DesiredState {
        services: vec![ServiceNode {
            service: Service {
                name: Some("echo".to_string()),
                host: Some("echo.default.svc".to_string()),
                port: Some(80),
                ..Default::default()
            },
            routes: vec![
                RouteNode {
                    route: Route {
                        name: Some("plain".to_string()),
                        ..Default::default()
                    },
                    plugins: Vec::new(),
                },
                RouteNode {
                    route: Route {
                        name: Some("moved".to_string()),
                        https_redirect_status_code: Some(301),
                        ..Default::default()
                    },
                    plugins: Vec::new(),
                },
            ],
            plugins: vec![Plugin {
                name: Some("rate-limiting".to_string()),
                config: json!({"minute": 5}).as_object().cloned(),
                ..Default::default()
            }],
        }],
        upstreams: vec![UpstreamNode {
            upstream: Upstream {
                name: Some("echo.default.80.svc".to_string()),
                ..Default::default()
            },
            targets: Vec::new(),
        }],
        ..Default::default()
    }
}

async fn gateway(expected_pushes: u64) -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/plugins/schema/rate-limiting"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "fields": [{"config": {"type": "record", "fields": [
                {"minute": {"type": "number"}},
                {"policy": {"type": "string", "default": "cluster"}},
                {"redis_host": {"type": "string", "default": null}}
            ]}}]
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/config"))
        .and(query_param("check_hash", "1"))
        .respond_with(ResponseTemplate::new(201))
        .expect(expected_pushes)
        .mount(&server)
        .await;

    server
}

fn config_for(server: &MockServer) -> SyncConfig {
    let mut config = SyncConfig::default();
    config.gateway.admin_url = server.uri();
    config
}

async fn pushed_bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|request| request.url.path() == "/config")
        .map(|request| serde_json::from_slice(&request.body).unwrap())
        .collect()
}

#[tokio::test]
async fn test_full_push_renders_defaults_and_strips_nulls() {
    let server = gateway(1).await;
    let reconciler = ReconcilerBuilder::new(&config_for(&server)).build().unwrap();
    let mut session = SyncSession::new();

    assert_ok!(reconciler.on_update(&mut session, &desired_state()).await);

    let bodies = pushed_bodies(&server).await;
    let body = &bodies[0];

    assert!(body.get("_info").is_none());

    let routes = &body["services"][0]["routes"];
    assert_eq!(routes[0]["name"], json!("moved"));
    assert_eq!(routes[0]["https_redirect_status_code"], json!(301));
    assert_eq!(routes[1]["name"], json!("plain"));
    assert_eq!(routes[1]["https_redirect_status_code"], json!(426));
    assert_eq!(routes[1]["path_handling"], json!("v0"));

    let plugin = &body["services"][0]["plugins"][0];
    assert_eq!(plugin["config"], json!({"minute": 5, "policy": "cluster"}));
    assert_eq!(plugin["enabled"], json!(true));
    assert_eq!(plugin["protocols"], json!(["http", "https"]));

    assert_eq!(body["upstreams"][0]["algorithm"], json!("round-robin"));
}

#[tokio::test]
async fn test_unchanged_state_is_pushed_once() {
    let server = gateway(1).await;
    let reconciler = ReconcilerBuilder::new(&config_for(&server)).build().unwrap();
    let mut session = SyncSession::new();

    let first = reconciler.on_update(&mut session, &desired_state()).await.unwrap();
    assert!(matches!(first, SyncOutcome::Applied { fingerprint: Some(_) }));

    let second = reconciler.on_update(&mut session, &desired_state()).await.unwrap();
    assert_eq!(second, SyncOutcome::Skipped);
}

#[tokio::test]
async fn test_reverse_sync_pushes_every_time() {
    let server = gateway(2).await;
    let mut config = config_for(&server);
    config.reverse_sync = true;
    let reconciler = ReconcilerBuilder::new(&config).build().unwrap();
    let mut session = SyncSession::new();

    for _ in 0..2 {
        let outcome = reconciler.on_update(&mut session, &desired_state()).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Applied { fingerprint: None });
    }
}

#[tokio::test]
async fn test_rejected_push_is_retried_on_next_sync() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/plugins/schema/rate-limiting"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/config"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let reconciler = ReconcilerBuilder::new(&config_for(&server)).build().unwrap();
    let mut session = SyncSession::new();

    for _ in 0..2 {
        let err = reconciler
            .on_update(&mut session, &desired_state())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(session.last_applied().is_none());
    }
}

struct StaticSecrets(BTreeMap<String, Vec<u8>>);

#[async_trait]
impl SecretStore for StaticSecrets {
    async fn get_secret(&self, _namespace: &str, _name: &str) -> ReconcileResult<BTreeMap<String, Vec<u8>>> {
        Ok(self.0.clone())
    }
}

#[tokio::test]
async fn test_custom_entities_never_override_rendered_sections() {
    let server = gateway(1).await;
    let mut config = config_for(&server);
    config.custom_entities_secret = Some("kong/custom-entities".to_string());

    let custom = json!({
        "services": [{"name": "from-secret"}],
        "custom_things": [{"id": "1"}]
    });
    let secrets = StaticSecrets(BTreeMap::from([(
        "config".to_string(),
        serde_json::to_vec(&custom).unwrap(),
    )]));

    let reconciler = ReconcilerBuilder::new(&config)
        .secret_store(Arc::new(secrets))
        .build()
        .unwrap();
    let mut session = SyncSession::new();

    assert_ok!(reconciler.on_update(&mut session, &desired_state()).await);

    let bodies = pushed_bodies(&server).await;
    assert_eq!(bodies[0]["services"][0]["name"], json!("echo"));
    assert_eq!(bodies[0]["custom_things"], json!([{"id": "1"}]));
}

/// Live state shared between the fake dumper and solver
#[derive(Clone, Default)]
struct FakeGateway {
    dumps: Arc<AtomicUsize>,
    solves: Arc<AtomicUsize>,
    /// Solver runs that report failures before the gateway starts accepting changes
    failing_runs: usize,
    seen_tags: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Dumper for FakeGateway {
    async fn dump(&self, selector_tags: &[String]) -> ReconcileResult<Vec<u8>> {
        self.dumps.fetch_add(1, Ordering::SeqCst);
        *self.seen_tags.lock().unwrap() = selector_tags.to_vec();
        Ok(serde_json::to_vec(&Document::default())?)
    }
}

impl Differencer for FakeGateway {
    fn diff(&self, _current: &Document, target: &Document) -> ReconcileResult<SyncPlan> {
        let mut operations = Vec::new();
        for service in &target.services {
            operations.push(PlannedChange {
                action: ChangeAction::Create,
                kind: "service".to_string(),
                key: service.service.name.clone().unwrap_or_default(),
            });
            for route in &service.routes {
                operations.push(PlannedChange {
                    action: ChangeAction::Create,
                    kind: "route".to_string(),
                    key: route.route.name.clone().unwrap_or_default(),
                });
            }
        }
        Ok(SyncPlan::new(operations))
    }
}

#[async_trait]
impl Solver for FakeGateway {
    async fn solve(&self, plan: SyncPlan, _concurrency: usize) -> Vec<ReconcileError> {
        let run = self.solves.fetch_add(1, Ordering::SeqCst);
        if run < self.failing_runs {
            // the last two operations fail, the rest went through
            return plan
                .operations
                .iter()
                .rev()
                .take(2)
                .map(|op| ReconcileError::HttpClient {
                    message: format!("{} {} failed", op.kind, op.key),
                })
                .collect();
        }
        Vec::new()
    }
}

fn diff_apply_reconciler(gateway: &FakeGateway, schemas: &MockServer) -> gateway_reconciler::Reconciler {
    let mut config = config_for(schemas);
    config.mode = SyncMode::DiffApply;
    config.gateway.has_tag_support = true;
    config.gateway.filter_tags = vec!["managed-by-ingress-controller".to_string()];

    ReconcilerBuilder::new(&config)
        .diff_collaborators(
            Box::new(gateway.clone()),
            Box::new(gateway.clone()),
            Box::new(gateway.clone()),
        )
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_partial_solver_failure_does_not_advance_fingerprint() {
    let schemas = gateway(0).await;
    let fake = FakeGateway {
        failing_runs: 1,
        ..Default::default()
    };
    let reconciler = diff_apply_reconciler(&fake, &schemas);
    let mut session = SyncSession::new();

    let err = assert_err!(reconciler.on_update(&mut session, &desired_state()).await);
    match err.root_cause() {
        ReconcileError::Solve { errors } => assert_eq!(errors.len(), 2),
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(session.last_applied().is_none());

    // same desired state, but the previous run never completed
    let retry = reconciler.on_update(&mut session, &desired_state()).await.unwrap();
    assert!(matches!(retry, SyncOutcome::Applied { fingerprint: Some(_) }));
    assert_eq!(fake.solves.load(Ordering::SeqCst), 2);

    let settled = reconciler.on_update(&mut session, &desired_state()).await.unwrap();
    assert_eq!(settled, SyncOutcome::Skipped);
    assert_eq!(fake.dumps.load(Ordering::SeqCst), 2);
    assert_eq!(
        *fake.seen_tags.lock().unwrap(),
        vec!["managed-by-ingress-controller".to_string()]
    );
}

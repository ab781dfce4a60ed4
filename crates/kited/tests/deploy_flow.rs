//! End-to-end flows through the REST API: register, deploy, cut over and
//! sweep against an in-memory cluster store.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, Response, StatusCode, header};
use kite_cluster::{ClusterClient, ClusterStore, LabelSelector, epoch_secs};
use kite_core::config::ClusterConfig;
use kite_core::labels::{LABEL_DEPLOY_ID, LABEL_SHA};
use kite_core::{KiteConfig, ServiceMetadata};
use kite_health::StaticDialer;
use kite_notify::{DeploymentState, MemoryNotifier, MemoryStatusSink};
use kited::Kite;
use serde_json::Value;
use tower::ServiceExt;

const NS: &str = "kakao";

struct Daemon {
    router: Router,
    store: ClusterStore,
    status: Arc<MemoryStatusSink>,
    notifier: Arc<MemoryNotifier>,
}

fn daemon(ready: bool) -> Daemon {
    let store = ClusterStore::open_in_memory().unwrap();
    store.set_start_pods_running(true);
    let config = KiteConfig {
        cluster: ClusterConfig {
            poll_interval: Duration::from_secs(1),
            poll_timeout: Duration::from_secs(20),
            ..ClusterConfig::default()
        },
        ..KiteConfig::default()
    };
    let status = Arc::new(MemoryStatusSink::new());
    let notifier = Arc::new(MemoryNotifier::new());
    let kite = Kite::assemble(
        config,
        Arc::new(store.clone()),
        Arc::new(StaticDialer(ready)),
        status.clone(),
        notifier.clone(),
    );
    Daemon {
        router: kite.router(),
        store,
        status,
        notifier,
    }
}

fn metadata() -> ServiceMetadata {
    ServiceMetadata {
        service: "api".to_string(),
        github_org: "kakao".to_string(),
        github_repo: "api".to_string(),
        git_branch: "main".to_string(),
        http_port: "8080".to_string(),
        replicas: 2,
        ..Default::default()
    }
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> Response<Body> {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&json).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    router.clone().oneshot(req).await.unwrap()
}

async fn json(resp: Response<Body>) -> Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn register(d: &Daemon) {
    let body = serde_json::to_value(metadata()).unwrap();
    let resp = send(&d.router, "POST", "/api/v1/services", Some(body)).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
}

async fn deploy(d: &Daemon, sha: &str) -> u64 {
    let uri = format!("/api/v1/namespaces/{NS}/services/api/deploy/{sha}?image=registry.example/api:{sha}");
    let resp = send(&d.router, "POST", &uri, None).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let location = resp.headers().get(header::LOCATION).unwrap().to_str().unwrap().to_string();
    let body = json(resp).await;
    let id = body["data"]["deploy_id"].as_u64().unwrap();
    assert_eq!(location, format!("/deploy_log/{id}"));
    id
}

async fn wait_terminal(d: &Daemon, id: u64) -> DeploymentState {
    for _ in 0..120 {
        if let Some(state) = d.status.states(id).get(1) {
            return *state;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    panic!("deploy {id} never finished: {:?}", d.status.states(id));
}

async fn selector(d: &Daemon) -> (Option<String>, Option<String>) {
    let svc = d.store.get_service(NS, "api").await.unwrap();
    (
        svc.spec.selector.get(LABEL_SHA).map(str::to_string),
        svc.spec.selector.get(LABEL_DEPLOY_ID).map(str::to_string),
    )
}

async fn groups_by_sha(d: &Daemon) -> Vec<String> {
    let mut shas: Vec<String> = d
        .store
        .list_replica_groups(NS, &LabelSelector::everything())
        .await
        .unwrap()
        .into_iter()
        .filter_map(|g| g.meta.labels.get(LABEL_SHA).map(str::to_string))
        .collect();
    shas.sort();
    shas
}

#[tokio::test(start_paused = true)]
async fn deploy_activate_and_sweep() {
    let d = daemon(true);
    register(&d).await;

    let first = deploy(&d, "aaa").await;
    assert_eq!(wait_terminal(&d, first).await, DeploymentState::Success);
    assert_eq!(selector(&d).await, (Some("aaa".to_string()), Some(first.to_string())));

    let second = deploy(&d, "bbb").await;
    assert_eq!(wait_terminal(&d, second).await, DeploymentState::Success);
    assert_eq!(selector(&d).await, (Some("bbb".to_string()), Some(second.to_string())));
    assert_eq!(groups_by_sha(&d).await, vec!["aaa", "bbb"]);

    // Roll back traffic to the first revision.
    let uri = format!("/api/v1/namespaces/{NS}/services/api/activate/aaa/{first}");
    let resp = send(&d.router, "PUT", &uri, None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(selector(&d).await, (Some("aaa".to_string()), Some(first.to_string())));

    // Age both groups past the default retention; only the unselected one goes.
    for group in d
        .store
        .list_replica_groups(NS, &LabelSelector::everything())
        .await
        .unwrap()
    {
        d.store
            .set_replica_group_created_at(NS, &group.meta.name, epoch_secs() - 80 * 3600)
            .unwrap();
    }
    let resp = send(&d.router, "POST", "/api/v1/gc", None).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    assert_eq!(json(resp).await["data"], "garbage collection initiated");

    for _ in 0..60 {
        if groups_by_sha(&d).await.len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(groups_by_sha(&d).await, vec!["aaa"]);
    assert!(
        d.notifier
            .messages()
            .iter()
            .any(|m| m.starts_with("deleted replica groups: 1"))
    );
}

#[tokio::test(start_paused = true)]
async fn failed_deploy_leaves_traffic_alone() {
    let d = daemon(true);
    register(&d).await;
    let first = deploy(&d, "aaa").await;
    assert_eq!(wait_terminal(&d, first).await, DeploymentState::Success);

    // Same store, but nothing answers on the new revision's port.
    let broken = Kite::assemble(
        KiteConfig {
            cluster: ClusterConfig {
                poll_interval: Duration::from_secs(1),
                poll_timeout: Duration::from_secs(20),
                ..ClusterConfig::default()
            },
            ..KiteConfig::default()
        },
        Arc::new(d.store.clone()),
        Arc::new(StaticDialer(false)),
        d.status.clone(),
        d.notifier.clone(),
    );
    let broken = Daemon {
        router: broken.router(),
        store: d.store.clone(),
        status: d.status.clone(),
        notifier: d.notifier.clone(),
    };

    let second = deploy(&broken, "bbb").await;
    assert_eq!(wait_terminal(&broken, second).await, DeploymentState::Failure);

    assert_eq!(selector(&d).await, (Some("aaa".to_string()), Some(first.to_string())));
    assert_eq!(groups_by_sha(&d).await, vec!["aaa"]);
    assert!(
        d.notifier
            .messages()
            .last()
            .is_some_and(|m| m.starts_with("deploy failed:"))
    );
}

#[tokio::test]
async fn lookup_and_settings_round_through_the_api() {
    let d = daemon(true);
    register(&d).await;

    let resp = send(&d.router, "GET", "/api/v1/services?owner=kakao&repo=api&branch=main", None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json(resp).await;
    assert_eq!(body["data"]["replicas"], 2);

    let mut updated = metadata();
    updated.replicas = 4;
    updated.environment = "LOG_LEVEL=debug".to_string();
    let uri = format!("/api/v1/namespaces/{NS}/services/api/settings");
    let resp = send(&d.router, "PUT", &uri, Some(serde_json::to_value(updated).unwrap())).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = send(&d.router, "GET", "/api/v1/services?owner=kakao&repo=api&branch=main", None).await;
    let body = json(resp).await;
    assert_eq!(body["data"]["replicas"], 4);
    assert_eq!(body["data"]["environment"], "LOG_LEVEL=debug");
}

#[tokio::test]
async fn bad_requests_are_rejected() {
    let d = daemon(true);
    register(&d).await;

    let resp = send(&d.router, "POST", "/api/v1/services", Some(serde_json::to_value(metadata()).unwrap())).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(json(resp).await["success"], false);

    let uri = format!("/api/v1/namespaces/{NS}/services/api/activate/aaa/not-a-number");
    let resp = send(&d.router, "PUT", &uri, None).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let uri = format!("/api/v1/namespaces/{NS}/services/api/deploy/aaa");
    let resp = send(&d.router, "POST", &uri, None).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = send(&d.router, "GET", "/api/v1/nope", None).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = send(&d.router, "DELETE", "/api/v1/namespaces/kube-system", None).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn service_teardown_through_the_api() {
    let d = daemon(true);
    register(&d).await;

    let uri = format!("/api/v1/namespaces/{NS}/services/api");
    let resp = send(&d.router, "DELETE", &uri, None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(d.store.get_service(NS, "api").await.unwrap_err().is_not_found());

    let resp = send(&d.router, "DELETE", &format!("/api/v1/namespaces/{NS}"), None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(d.store.get_namespace(NS).await.unwrap_err().is_not_found());
}

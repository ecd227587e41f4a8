//! HTTP-level tests over the axum router: status codes, envelopes, auth.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use arx_config::ArxConfig;
use arx_core::{ServiceLimits, Services};
use arx_crypto::{ChunkingOptions, CryptoEngine, CryptoOptions};
use arx_rbac::seed_roles;
use arx_server::pipeline::token_digest;
use arx_server::{rest, AppState};
use arx_store::{PoolOptions, Store};
use arx_types::RequestContext;

struct Harness {
    router: Router,
    store: Store,
    _dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(&dir.path().join("arx.db"), PoolOptions::default()).unwrap();
    seed_roles(&store).unwrap();

    let crypto = CryptoEngine::open(CryptoOptions {
        enabled: true,
        use_kek: true,
        kek_path: dir.path().join("keys/kek.key"),
        dek_path: dir.path().join("keys/dek.ring"),
        chunking: ChunkingOptions::default(),
    })
    .unwrap();

    let services = Services::new(store.clone(), Arc::new(crypto), ServiceLimits::default());
    let mut config = ArxConfig::default();
    config.storage.database.path = dir.path().join("arx.db");
    config.storage.encryption.kek_path = dir.path().join("keys/kek.key");
    config.storage.encryption.dek_path = dir.path().join("keys/dek.ring");
    let state = AppState::new(services, config);

    Harness {
        router: rest::router(state),
        store,
        _dir: dir,
    }
}

impl Harness {
    /// Create a user with `role` in namespace `default` and mint a token.
    fn token_for(&self, username: &str, role: Option<&str>) -> String {
        let ctx = RequestContext::anonymous();
        let user = self.store.create_user(&ctx, username, None, "x").unwrap();
        if let Some(role) = role {
            let role = self.store.get_role_by_name(&ctx, role).unwrap().unwrap();
            let ns = self.store.ensure_namespace(&ctx, "default").unwrap();
            self.store
                .assign_role_to_user(&ctx, user.id, role.id, Some(ns.id))
                .unwrap();
        }
        let token = format!("test-token-{username}");
        self.store
            .insert_token(&ctx, &token_digest(&token), user.id, None)
            .unwrap();
        token
    }

    async fn request(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        (status, json)
    }
}

fn create_body(name: &str, value: &str) -> serde_json::Value {
    serde_json::json!({
        "name": name,
        "value": value,
        "namespace": "default",
        "zone": "global",
        "environment": "development",
    })
}

#[tokio::test]
async fn health_is_public() {
    let h = harness();
    let (status, body) = h.request("GET", "/api/v1/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert!(body["checks"]["database"].is_string());
    assert!(body["checks"]["encryption"].is_string());
}

#[tokio::test]
async fn missing_token_yields_401_envelope() {
    let h = harness();
    let (status, body) = h.request("GET", "/api/v1/secrets", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthenticated");
    assert_eq!(body["code"], 401);
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn create_and_read_secret_over_http() {
    let h = harness();
    let alice = h.token_for("alice", Some("editor"));

    let (status, body) = h
        .request(
            "POST",
            "/api/v1/secrets",
            Some(&alice),
            Some(create_body("db-password", "hunter2")),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["id"], 1);
    assert_eq!(body["data"]["name"], "db-password");
    assert!(body["data"]["value"].is_null(), "create never echoes the value");

    let (status, body) = h
        .request("GET", "/api/v1/secrets/1?include_value=true", Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["value"], "hunter2");
    assert_eq!(body["data"]["sharing"]["badge"], "OWNER");

    // Metadata-only read leaves the counter alone.
    let (status, body) = h
        .request("GET", "/api/v1/secrets/1", Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["value"].is_null());

    let (status, body) = h
        .request("GET", "/api/v1/secrets/1/versions", Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["version"], 1);
    assert_eq!(body["data"][0]["read_count"], 1);
}

#[tokio::test]
async fn duplicate_create_conflicts() {
    let h = harness();
    let alice = h.token_for("alice", Some("editor"));

    let (status, _) = h
        .request(
            "POST",
            "/api/v1/secrets",
            Some(&alice),
            Some(create_body("dup", "v")),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = h
        .request(
            "POST",
            "/api/v1/secrets",
            Some(&alice),
            Some(create_body("dup", "v")),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_exists");
}

#[tokio::test]
async fn share_revoke_flow_over_http() {
    let h = harness();
    let alice = h.token_for("alice", Some("editor"));
    let bob = h.token_for("bob", None);

    h.request(
        "POST",
        "/api/v1/secrets",
        Some(&alice),
        Some(create_body("db-password", "hunter2")),
    )
    .await;

    // Bob's id is 2 (admin-free fixture: alice is 1).
    let (status, body) = h
        .request(
            "POST",
            "/api/v1/secrets/1/share",
            Some(&alice),
            Some(serde_json::json!({ "recipient_id": 2, "is_group": false, "permission": "read" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let share_id = body["data"]["id"].as_i64().unwrap();

    let (status, body) = h
        .request("GET", "/api/v1/secrets/1?include_value=true", Some(&bob), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["value"], "hunter2");
    assert_eq!(body["data"]["sharing"]["icon"], "shared-read");

    // Bob cannot see the share roster.
    let (status, _) = h
        .request("GET", "/api/v1/secrets/1/shares", Some(&bob), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = h
        .request("DELETE", &format!("/api/v1/shares/{share_id}"), Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = h
        .request("GET", "/api/v1/secrets/1?include_value=true", Some(&bob), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "permission_denied");
}

#[tokio::test]
async fn read_budget_maps_to_410() {
    let h = harness();
    let alice = h.token_for("alice", Some("editor"));

    let mut body = create_body("otp", "123456");
    body["max_reads"] = serde_json::json!(1);
    h.request("POST", "/api/v1/secrets", Some(&alice), Some(body))
        .await;

    let (status, body) = h
        .request("GET", "/api/v1/secrets/1?include_value=true", Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["value"], "123456");

    let (status, body) = h
        .request("GET", "/api/v1/secrets/1?include_value=true", Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["error"], "expired");
}

#[tokio::test]
async fn immutable_field_update_is_bad_request_with_details() {
    let h = harness();
    let alice = h.token_for("alice", Some("editor"));

    h.request(
        "POST",
        "/api/v1/secrets",
        Some(&alice),
        Some(create_body("fixed", "v")),
    )
    .await;

    let (status, body) = h
        .request(
            "PUT",
            "/api/v1/secrets/1",
            Some(&alice),
            Some(serde_json::json!({ "name": "renamed" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_argument");
    assert_eq!(body["details"][0]["field"], "name");
}

#[tokio::test]
async fn audit_requires_permission() {
    let h = harness();
    let alice = h.token_for("alice", Some("editor"));
    let auditor = h.token_for("carol", Some("auditor"));

    h.request(
        "POST",
        "/api/v1/secrets",
        Some(&alice),
        Some(create_body("s", "v")),
    )
    .await;

    let (status, _) = h
        .request("GET", "/api/v1/audit/logs", Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = h
        .request("GET", "/api/v1/audit/logs?namespace_id=1", Some(&auditor), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let items = body["data"]["items"].as_array().unwrap();
    assert!(items.iter().any(|e| e["kind"] == "secret_created"));
}

#[tokio::test]
async fn system_info_requires_admin_scope() {
    let h = harness();
    let viewer = h.token_for("eve", Some("viewer"));
    let (status, _) = h
        .request("GET", "/api/v1/system/info", Some(&viewer), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn openapi_and_swagger_are_served() {
    let h = harness();
    let (status, _) = h.request("GET", "/api/v1/swagger/", None, None).await;
    assert_eq!(status, StatusCode::OK);

    let response = h
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/openapi.yaml")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/yaml"
    );
}

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use gatehouse_auth::JwtClaims;
use gatehouse_core::{RoleId, UserId};
use gatehouse_infra::{FetchPolicy, GatehouseConfig, InMemoryAuthzStore, administrator_role_id};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{Value, json};

const JWT_SECRET: &str = "test-secret";

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod; no DATABASE_URL, so the seeded in-memory store.
        let app = gatehouse_api::app::build_app(config())
            .await
            .expect("failed to build app");
        Self::serve(app).await
    }

    async fn spawn_with_store(config: GatehouseConfig, store: Arc<InMemoryAuthzStore>) -> Self {
        Self::serve(gatehouse_api::app::build_app_with_store(&config, store)).await
    }

    async fn serve(app: axum::Router) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            client: reqwest::Client::new(),
            handle,
        }
    }

    async fn get(&self, path: &str, token: Option<&str>) -> reqwest::Response {
        let mut req = self.client.get(format!("{}{}", self.base_url, path));
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        req.send().await.unwrap()
    }

    async fn post(&self, path: &str, token: &str, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn config() -> GatehouseConfig {
    GatehouseConfig {
        jwt_secret: JWT_SECRET.to_string(),
        ..GatehouseConfig::default()
    }
}

fn mint_jwt(roles: Vec<RoleId>, ttl: ChronoDuration) -> String {
    let now = Utc::now();
    let claims = JwtClaims {
        sub: UserId::new(),
        roles,
        issued_at: now - ChronoDuration::seconds(5),
        expires_at: now + ttl,
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

fn admin_token() -> String {
    mint_jwt(vec![administrator_role_id()], ChronoDuration::minutes(10))
}

async fn assert_denied(res: reqwest::Response, status: StatusCode, code: &str) {
    assert_eq!(res.status(), status);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], status.as_u16());
    assert_eq!(body["code"], code);
    assert!(body["message"].as_str().is_some_and(|m| !m.is_empty()));
}

#[tokio::test]
async fn health_bypasses_the_gate() {
    let srv = TestServer::spawn().await;
    assert_eq!(srv.get("/health", None).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn whoami_requires_a_valid_token() {
    let srv = TestServer::spawn().await;

    assert_denied(srv.get("/whoami", None).await, StatusCode::UNAUTHORIZED, "unauthorized").await;

    let expired = mint_jwt(vec![], ChronoDuration::seconds(-1));
    assert_denied(
        srv.get("/whoami", Some(&expired)).await,
        StatusCode::UNAUTHORIZED,
        "unauthorized",
    )
    .await;

    let role = RoleId::new();
    let token = mint_jwt(vec![role], ChronoDuration::minutes(10));
    let res = srv.get("/whoami", Some(&token)).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["role_ids"][0].as_str().unwrap(), role.to_string());
}

#[tokio::test]
async fn unregistered_routes_are_denied() {
    let srv = TestServer::spawn().await;
    assert_denied(
        srv.get("/nowhere", Some(&admin_token())).await,
        StatusCode::FORBIDDEN,
        "rule_not_found",
    )
    .await;
}

#[tokio::test]
async fn admin_surface_requires_authz_keys() {
    let srv = TestServer::spawn().await;

    let outsider = mint_jwt(vec![RoleId::new()], ChronoDuration::minutes(10));
    assert_denied(
        srv.get("/admin/authz/rules", Some(&outsider)).await,
        StatusCode::FORBIDDEN,
        "forbidden",
    )
    .await;

    let res = srv.get("/admin/authz/rules", Some(&admin_token())).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert!(body["version"].as_u64().is_some());
    assert!(
        body["rules"]
            .as_array()
            .unwrap()
            .iter()
            .any(|r| r["path"] == "/admin/authz/rules" && r["method"] == "GET")
    );
}

#[tokio::test]
async fn grants_made_through_the_api_apply_to_the_next_request() {
    let srv = TestServer::spawn().await;
    let admin = admin_token();

    let res = srv
        .post("/admin/authz/roles", &admin, json!({ "name": "Auditor" }))
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let role: Value = res.json().await.unwrap();
    let role_id: RoleId = role["id"].as_str().unwrap().parse().unwrap();

    let auditor = mint_jwt(vec![role_id], ChronoDuration::minutes(10));
    assert_denied(
        srv.get("/admin/authz/rules", Some(&auditor)).await,
        StatusCode::FORBIDDEN,
        "forbidden",
    )
    .await;

    let res = srv
        .post(
            "/admin/authz/roles/grant",
            &admin,
            json!({ "role_id": role_id, "permission_key": "Authz.Read" }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    assert_eq!(srv.get("/admin/authz/rules", Some(&auditor)).await.status(), StatusCode::OK);
    // Read does not imply write.
    assert_denied(
        srv.post("/admin/authz/roles", &auditor, json!({ "name": "Sneaky" })).await,
        StatusCode::FORBIDDEN,
        "forbidden",
    )
    .await;

    let res = srv
        .get(&format!("/admin/authz/roles/grants?role_id={role_id}"), Some(&admin))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let grants: Value = res.json().await.unwrap();
    assert_eq!(grants["keys"], json!(["Authz.Read"]));

    let res = srv
        .post(
            "/admin/authz/roles/revoke",
            &admin,
            json!({ "role_id": role_id, "permission_key": "Authz.Read" }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert_denied(
        srv.get("/admin/authz/rules", Some(&auditor)).await,
        StatusCode::FORBIDDEN,
        "forbidden",
    )
    .await;
}

#[tokio::test]
async fn new_rules_and_override_parameter() {
    let srv = TestServer::spawn().await;
    let admin = admin_token();

    for key in ["Reports.Read", "Reports.Export", "Reports.Delete"] {
        let res = srv
            .post("/admin/authz/permissions", &admin, json!({ "key": key }))
            .await;
        assert_eq!(res.status(), StatusCode::CREATED);
    }

    let res = srv
        .post(
            "/admin/authz/rules",
            &admin,
            json!({
                "path": "/reports",
                "method": "get",
                "bindings": [
                    { "permission_key": "Reports.Read" },
                    { "permission_key": "Reports.Export", "enforced": false },
                ],
            }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = srv
        .post("/admin/authz/roles", &admin, json!({ "name": "Analyst" }))
        .await;
    let analyst: Value = res.json().await.unwrap();
    let analyst_id = analyst["id"].as_str().unwrap().to_string();
    for key in ["Reports.Read", "Reports.Export"] {
        let res = srv
            .post(
                "/admin/authz/roles/grant",
                &admin,
                json!({ "role_id": analyst_id, "permission_key": key }),
            )
            .await;
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
    }
    let token = mint_jwt(vec![analyst_id.parse().unwrap()], ChronoDuration::minutes(10));

    // Allowed by the gate; no handler serves /reports.
    assert_eq!(srv.get("/reports", Some(&token)).await.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        srv.get("/reports?permission=Reports.Export", Some(&token)).await.status(),
        StatusCode::NOT_FOUND
    );
    assert_denied(
        srv.get("/reports?permission=Reports.Delete", Some(&token)).await,
        StatusCode::FORBIDDEN,
        "forbidden",
    )
    .await;

    let res = srv
        .get(
            "/admin/authz/explain?path=/reports&method=GET&permission=Reports.Delete",
            Some(&token),
        )
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let explanation: Value = res.json().await.unwrap();
    assert_eq!(explanation["verdict"]["decision"], "deny");
    assert_eq!(explanation["verdict"]["cause"], "override_not_bound");
}

#[tokio::test]
async fn duplicate_routes_conflict() {
    let srv = TestServer::spawn().await;
    let res = srv
        .post(
            "/admin/authz/rules",
            &admin_token(),
            json!({ "path": "/whoami/", "method": "GET" }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["code"], "duplicate");
}

#[tokio::test]
async fn stalled_store_fails_closed() {
    let store = Arc::new(InMemoryAuthzStore::seeded());
    let config = GatehouseConfig {
        fetch: FetchPolicy {
            timeout: Duration::from_millis(20),
            retry_backoff: Duration::from_millis(5),
        },
        ..config()
    };
    let srv = TestServer::spawn_with_store(config, Arc::clone(&store)).await;

    store.stall_next_reads(2, Duration::from_millis(200));
    assert_denied(
        srv.get("/whoami", Some(&admin_token())).await,
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
    )
    .await;

    // Nothing was cached by the failed attempt; the next request rebuilds.
    assert_eq!(srv.get("/whoami", Some(&admin_token())).await.status(), StatusCode::OK);
}

#![allow(dead_code)]

use std::net::SocketAddr;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use kagra_api::auth::JwtProvider;
use kagra_api::config::{AppConfig, Environment};
use kagra_api::rbac::Role;
use kagra_api::store::{MemoryStore, User};
use kagra_api::{build_router, AppState};

pub const TEST_USER_AGENT: &str = "kagra-integration/1.0";

/// Socket peer of every request unless `send_from` names another
pub const DEFAULT_PEER: &str = "192.0.2.1:40000";

/// Router over a fresh in-memory store, plus a way to mint tokens for it.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub config: AppConfig,
    jwt: JwtProvider,
}

/// Parsed response: status, headers and JSON body (`Null` when empty)
pub struct Reply {
    pub status: StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: Value,
}

impl Reply {
    pub fn data(&self) -> &Value {
        &self.body["data"]
    }

    pub fn error_message(&self) -> &str {
        self.body["error"]["message"].as_str().unwrap_or_default()
    }
}

/// Development preset with rate limiting off, so tests can hammer routes.
pub fn unthrottled_config() -> AppConfig {
    let mut config = AppConfig::for_environment(Environment::Development);
    config.api.enable_rate_limiting = false;
    config.security.password_hash_cost = 4;
    config
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(unthrottled_config())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let jwt = JwtProvider::new(config.security.jwt_secret.clone(), 1);
        let state = AppState::build(config.clone(), store.clone(), store.clone())
            .expect("development config has a JWT provider");

        Self {
            router: build_router(state),
            store,
            config,
            jwt,
        }
    }

    /// Provision a user row with `role` and return its id and a bearer token.
    pub async fn user(&self, role: Role) -> (Uuid, String) {
        let id = Uuid::new_v4();
        let email = format!("{}-{}@kagra.test", role.as_str(), &id.simple().to_string()[..8]);
        self.store.insert_user(User::new(id, &email, Some(role))).await;
        let token = self.jwt.issue_token(id, Some(email)).expect("token");
        (id, token)
    }

    pub async fn request(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Reply {
        self.send(method, uri, token, body, &[]).await
    }

    pub async fn get(&self, uri: &str, token: &str) -> Reply {
        self.request("GET", uri, Some(token), None).await
    }

    pub async fn post(&self, uri: &str, token: &str, body: Value) -> Reply {
        self.request("POST", uri, Some(token), Some(body)).await
    }

    pub async fn put(&self, uri: &str, token: &str, body: Value) -> Reply {
        self.request("PUT", uri, Some(token), Some(body)).await
    }

    pub async fn delete(&self, uri: &str, token: &str) -> Reply {
        self.request("DELETE", uri, Some(token), None).await
    }

    pub async fn send(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> Reply {
        self.send_from(DEFAULT_PEER, method, uri, token, body, headers).await
    }

    /// `send` as if the TCP connection came from `peer`
    pub async fn send_from(
        &self,
        peer: &str,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> Reply {
        let peer: SocketAddr = peer.parse().expect("peer address");
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .extension(ConnectInfo(peer));
        if !headers.iter().any(|(name, _)| name.eq_ignore_ascii_case("user-agent")) {
            builder = builder.header("user-agent", TEST_USER_AGENT);
        }
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        let response = self.router.clone().oneshot(request).await.expect("router is infallible");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
        };

        Reply { status, headers, body }
    }

    /// Create a node as `token`'s owner and return its id.
    pub async fn node(&self, token: &str, title: &str, is_public: bool) -> String {
        let reply = self
            .post(
                "/api/v1/charaxy/nodes",
                token,
                serde_json::json!({ "title": title, "is_public": is_public }),
            )
            .await;
        assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
        reply.data()["id"].as_str().expect("node id").to_string()
    }

    pub async fn block(&self, token: &str, node_id: &str, title: &str) -> String {
        let reply = self
            .post(
                "/api/v1/charaxy/blocks",
                token,
                serde_json::json!({ "node_id": node_id, "title": title, "content": "body text" }),
            )
            .await;
        assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
        reply.data()["id"].as_str().expect("block id").to_string()
    }

    /// Register through the API and return the token response body
    pub async fn register(&self, email: &str, password: &str) -> Value {
        let reply = self
            .send(
                "POST",
                "/api/v1/auth/register",
                None,
                Some(serde_json::json!({ "email": email, "password": password })),
                &[],
            )
            .await;
        assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
        reply.data().clone()
    }
}

static SERVER: OnceLock<TestServer> = OnceLock::new();

/// The real `kagra-api` binary on a free port, backed by the memory store
pub struct TestServer {
    pub port: u16,
    pub base_url: String,
    child: Child,
}

impl TestServer {
    fn spawn() -> Result<Self> {
        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let base_url = format!("http://127.0.0.1:{}/api/v1", port);

        let child = Command::new(env!("CARGO_BIN_EXE_kagra-api"))
            .env("APP_ENV", "development")
            .env("KAGRA_STORE", "memory")
            .env("API_HOST", "127.0.0.1")
            .env("API_PORT", port.to_string())
            .env("API_LOG_LEVEL", "warn")
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .context("failed to spawn server binary")?;

        Ok(Self { port, base_url, child })
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let client = reqwest::Client::new();
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            let url = format!("{}/health", self.base_url);
            if let Ok(resp) = client.get(&url).header("user-agent", TEST_USER_AGENT).send().await {
                if resp.status() == reqwest::StatusCode::OK {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        anyhow::bail!("server did not become ready on {} within {:?}", self.base_url, timeout)
    }
}

pub async fn ensure_server() -> Result<&'static TestServer> {
    let server = SERVER.get_or_init(|| TestServer::spawn().expect("failed to spawn server binary"));
    server.wait_ready(Duration::from_secs(10)).await?;
    Ok(server)
}

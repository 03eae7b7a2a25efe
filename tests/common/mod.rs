use std::net::SocketAddr;
use std::sync::Arc;

use agora_auth::crypto::sign_challenge;
use agora_auth::{api, AppState, Config};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use reqwest::{Client, Response};
use serde_json::{json, Value};
use tempfile::TempDir;

pub const TEST_SECRET: &str = "integration-test-secret-at-least-32-chars";

pub struct TestServer {
    pub base_url: String,
    pub client: Client,
    pub state: Arc<AppState>,
    _dir: TempDir,
}

/// Start a server on a random port
pub async fn spawn_test_server(rate_limit_enabled: bool) -> TestServer {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = Config {
        data_dir: dir.path().to_path_buf(),
        host: "127.0.0.1".into(),
        port: 0,
        jwt_secret: TEST_SECRET.into(),
        jwt_previous_secret: None,
        rate_limit_enabled,
        ..Config::default()
    };

    let state = AppState::new(config).expect("Failed to build state");
    let app = api::create_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("Server failed");
    });

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    TestServer {
        base_url: format!("http://{}", addr),
        client: Client::new(),
        state,
        _dir: dir,
    }
}

/// An agent keypair held by the test
pub struct TestAgent {
    pub key: SigningKey,
    pub address: String,
}

impl TestAgent {
    pub fn generate() -> SigningKey {
        SigningKey::generate(&mut OsRng)
    }

    pub fn public_hex(key: &SigningKey) -> String {
        hex::encode(key.verifying_key().to_bytes())
    }
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn post(&self, path: &str, body: Value) -> Response {
        self.client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .expect("Failed to send request")
    }

    pub async fn get(&self, path: &str) -> Response {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to send request")
    }

    pub async fn delete(&self, path: &str, token: Option<&str>) -> Response {
        let mut req = self.client.delete(self.url(path));
        if let Some(token) = token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }
        req.send().await.expect("Failed to send request")
    }

    pub async fn register(&self, name: &str) -> TestAgent {
        let key = TestAgent::generate();
        let resp = self
            .post(
                "/register",
                json!({ "name": name, "public_key_hex": TestAgent::public_hex(&key) }),
            )
            .await;
        assert_eq!(resp.status(), 201);
        let body: Value = resp.json().await.unwrap();
        let address = body["data"]["address"].as_str().unwrap().to_string();
        TestAgent { key, address }
    }

    pub async fn challenge(&self, address: &str) -> String {
        let resp = self.post("/challenge", json!({ "address": address })).await;
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        body["data"]["challenge"].as_str().unwrap().to_string()
    }

    /// Full challenge/verify round; returns the session token
    pub async fn login(&self, agent: &TestAgent) -> String {
        let challenge = self.challenge(&agent.address).await;
        let signature = sign_challenge(&agent.key, &challenge).unwrap();
        let resp = self
            .post(
                "/verify",
                json!({ "address": agent.address, "signature_hex": signature }),
            )
            .await;
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        body["data"]["jwt_token"].as_str().unwrap().to_string()
    }
}

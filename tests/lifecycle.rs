use gatehouse::api;
use gatehouse::application_impl::{JwtConfig, JwtTokenService};
use gatehouse::application_port::TokenService;
use gatehouse::domain_model::{TokenRecord, UserEmail};
use gatehouse::domain_port::{StoreError, TokenStore};
use gatehouse::infra_memory::MemoryTokenStore;
use gatehouse::server::Server;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use warp::Filter;
use warp::filters::BoxedFilter;
use warp::http::StatusCode;
use warp::reply::Response;

fn jwt_config() -> JwtConfig {
    JwtConfig {
        issuer: "gatehouse.auth".to_string(),
        audience: "gatehouse-client".to_string(),
        access_ttl: Duration::from_secs(1800),
        refresh_ttl: Duration::from_secs(604_800),
        signing_key: b"integration-test-signing-key-0123456789".to_vec(),
    }
}

fn build_server() -> Arc<Server> {
    let store = Arc::new(MemoryTokenStore::new(Duration::from_millis(100)));
    let expiry_rx = store.watch_expiry();
    let store: Arc<dyn TokenStore> = store;
    let token_service: Arc<dyn TokenService> = Arc::new(JwtTokenService::new(store, jwt_config()));
    Arc::new(Server::new(
        token_service,
        expiry_rx,
        Duration::from_secs(600),
        Duration::from_millis(500),
    ))
}

fn routes(server: Arc<Server>) -> BoxedFilter<(Response,)> {
    warp::path("api")
        .and(warp::path("v1"))
        .and(api::v1::routes(server))
        .recover(api::v1::recover_error)
        .map(|reply| warp::reply::Reply::into_response(reply))
        .boxed()
}

async fn issue_pair(api: &BoxedFilter<(Response,)>, email: &str) -> (String, String) {
    let resp = warp::test::request()
        .method("POST")
        .path("/api/v1/token")
        .json(&json!({ "email": email, "roles": ["USER"] }))
        .reply(api)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(resp.body()).unwrap();
    let tokens = &body["data"]["tokens"];
    (
        tokens["access_token"].as_str().unwrap().to_string(),
        tokens["refresh_token"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn token_lifecycle_over_the_api() {
    let server = build_server();
    let api = routes(server.clone());

    let (access, refresh) = issue_pair(&api, "alice@example.com").await;

    // The pair authenticates.
    let resp = warp::test::request()
        .method("GET")
        .path("/api/v1/me")
        .header("authorization", format!("Bearer {access}"))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["data"]["email"], "alice@example.com");
    assert_eq!(body["data"]["roles"][0], "USER");

    // Rotation invalidates the old pair.
    let resp = warp::test::request()
        .method("POST")
        .path("/api/v1/refresh")
        .json(&json!({ "token": refresh }))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(resp.body()).unwrap();
    let new_access = body["data"]["access_token"].as_str().unwrap().to_string();

    let resp = warp::test::request()
        .method("POST")
        .path("/api/v1/refresh")
        .json(&json!({ "token": refresh }))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "replayed refresh");

    let resp = warp::test::request()
        .method("GET")
        .path("/api/v1/me")
        .header("authorization", format!("Bearer {access}"))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "pre-rotation access");

    // Logout revokes the current pair.
    let resp = warp::test::request()
        .method("POST")
        .path("/api/v1/logout")
        .header("authorization", format!("Bearer {new_access}"))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = warp::test::request()
        .method("GET")
        .path("/api/v1/me")
        .header("authorization", format!("Bearer {new_access}"))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    server.shutdown().await;
}

#[tokio::test]
async fn refresh_endpoint_rejects_an_access_token() {
    let server = build_server();
    let api = routes(server.clone());

    let (access, _refresh) = issue_pair(&api, "bob@example.com").await;
    let resp = warp::test::request()
        .method("POST")
        .path("/api/v1/refresh")
        .json(&json!({ "token": access }))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    server.shutdown().await;
}

async fn recv_envelope(client: &mut warp::test::WsClient) -> Value {
    let msg = client.recv().await.expect("ws message");
    serde_json::from_str(msg.to_str().expect("text frame")).expect("envelope json")
}

#[tokio::test]
async fn presence_channel_roster_and_duplicate_rejection() {
    let server = build_server();
    let api = routes(server.clone());

    let (alice_access, _) = issue_pair(&api, "alice@example.com").await;
    let (bob_access, _) = issue_pair(&api, "bob@example.com").await;

    let mut alice_ws = warp::test::ws()
        .path(&format!("/api/v1/ws?access_token={alice_access}"))
        .handshake(routes(server.clone()))
        .await
        .expect("alice handshake");

    // Wait for the roster so alice is fully registered.
    let roster = recv_envelope(&mut alice_ws).await;
    assert_eq!(roster["type"], "online");
    assert_eq!(roster["content"], "alice@example.com");

    // Duplicate session for the same identity is refused at admission.
    let duplicate = warp::test::ws()
        .path(&format!("/api/v1/ws?access_token={alice_access}"))
        .handshake(routes(server.clone()))
        .await;
    assert!(duplicate.is_err(), "second session must be rejected");

    let mut bob_ws = warp::test::ws()
        .path(&format!("/api/v1/ws?access_token={bob_access}"))
        .handshake(routes(server.clone()))
        .await
        .expect("bob handshake");

    let bob_roster = recv_envelope(&mut bob_ws).await;
    assert_eq!(bob_roster["type"], "online");
    assert_eq!(bob_roster["content"], "alice@example.com,bob@example.com");

    let login = recv_envelope(&mut alice_ws).await;
    assert_eq!(login["type"], "login");
    assert_eq!(login["content"], "bob@example.com");

    // Direct message alice -> bob.
    alice_ws
        .send_text(
            json!({ "to": "bob@example.com", "type": "private", "content": "hi", "date": 0 })
                .to_string(),
        )
        .await;
    let private = recv_envelope(&mut bob_ws).await;
    assert_eq!(private["type"], "private");
    assert_eq!(private["from"], "alice@example.com");
    assert_eq!(private["content"], "hi");

    // Alice drops; bob hears the logout.
    drop(alice_ws);
    let logout = recv_envelope(&mut bob_ws).await;
    assert_eq!(logout["type"], "logout");
    assert_eq!(logout["content"], "alice@example.com");

    server.shutdown().await;
}

#[tokio::test]
async fn missing_or_bogus_ws_credential_fails_closed() {
    let server = build_server();

    let no_token = warp::test::ws()
        .path("/api/v1/ws")
        .handshake(routes(server.clone()))
        .await;
    assert!(no_token.is_err());

    let bogus = warp::test::ws()
        .path("/api/v1/ws?access_token=bogus")
        .handshake(routes(server.clone()))
        .await;
    assert!(bogus.is_err());

    server.shutdown().await;
}

/// A store whose backend is gone: every call times out.
struct UnavailableStore {
    expired_tx: broadcast::Sender<TokenRecord>,
}

#[async_trait::async_trait]
impl TokenStore for UnavailableStore {
    async fn put(&self, _record: &TokenRecord) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    async fn get(&self, _token: &str) -> Result<Option<TokenRecord>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    async fn take(&self, _token: &str) -> Result<Option<TokenRecord>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    async fn find_all_by_email(&self, _email: &UserEmail) -> Result<Vec<TokenRecord>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    async fn delete_all(&self, _records: &[TokenRecord]) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    fn watch_expiry(&self) -> broadcast::Receiver<TokenRecord> {
        self.expired_tx.subscribe()
    }
}

#[tokio::test]
async fn store_outage_is_not_an_auth_failure() {
    let (expired_tx, expiry_rx) = broadcast::channel(8);
    let store: Arc<dyn TokenStore> = Arc::new(UnavailableStore { expired_tx });
    let token_service: Arc<dyn TokenService> = Arc::new(JwtTokenService::new(store, jwt_config()));
    let server = Arc::new(Server::new(
        token_service,
        expiry_rx,
        Duration::from_secs(600),
        Duration::from_millis(500),
    ));
    let api = routes(server.clone());

    let resp = warp::test::request()
        .method("GET")
        .path("/api/v1/me")
        .header("authorization", "Bearer whatever")
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    server.shutdown().await;
}

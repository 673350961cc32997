mod common;

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use anchorchat_api::{AppStateInner, router};
use anchorchat_chain::wallet::Wallet;
use anchorchat_db::Database;
use anchorchat_gateway::Dispatcher;
use anchorchat_types::api::ServiceClaims;

use common::{ALICE_WALLET, CountingChain, FakeWallet, open_db, seed_group, session};

const SECRET: &str = "test-service-secret";

fn app(db: Arc<Database>, user: Uuid, wallet: Option<Arc<dyn Wallet>>) -> Router {
    let session = Arc::new(session(db, user, Arc::new(CountingChain::default()), wallet));
    router(Arc::new(AppStateInner {
        session,
        dispatcher: Dispatcher::new(),
        service_secret: SECRET.into(),
    }))
}

fn service_token(secret: &str) -> String {
    let claims = ServiceClaims {
        sub: "scheduler".into(),
        role: "service".into(),
        exp: (chrono::Utc::now() + chrono::Duration::minutes(5)).timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn connect_without_wallet_is_precondition_failed() {
    let (_dir, db) = open_db();
    let app = app(db, Uuid::new_v4(), None);

    let (status, body) = call(&app, post("/wallet/connect", json!({}))).await;

    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert_eq!(body["kind"], "wallet_missing");
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn connect_then_send_anchored_message() {
    let (_dir, db) = open_db();
    let alice = Uuid::new_v4();
    let conv = seed_group(&db, &[alice]);
    let app = app(db, alice, Some(FakeWallet::new(ALICE_WALLET, "5.0")));

    let (status, body) = call(&app, post("/wallet/connect", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["wallet"]["can_anchor"], true);
    assert_eq!(body["wallet"]["phase"]["state"], "connected");
    assert_eq!(body["wallet"]["phase"]["network"], "on_network");

    let uri = format!("/conversations/{conv}/messages");
    let (status, body) = call(&app, post(&uri, json!({ "content": "hello" }))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["chain_verified"], true);
    assert_eq!(body["anchor_status"], "anchored");

    let (status, body) = call(&app, Request::get(&uri).body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["content"], "hello");
    assert!(body[0]["seq"].as_i64().is_some());
}

#[tokio::test]
async fn empty_message_is_bad_request() {
    let (_dir, db) = open_db();
    let alice = Uuid::new_v4();
    let conv = seed_group(&db, &[alice]);
    let app = app(db, alice, None);

    let (status, body) = call(
        &app,
        post(&format!("/conversations/{conv}/messages"), json!({ "content": "   " })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_input");
}

#[tokio::test]
async fn direct_conversation_endpoint_deduplicates() {
    let (_dir, db) = open_db();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let app = app(db, alice, None);

    let (_, first) = call(&app, post("/conversations/direct", json!({ "peer_id": bob }))).await;
    let (_, second) = call(&app, post("/conversations/direct", json!({ "peer_id": bob }))).await;

    assert!(first["conversation_id"].is_string());
    assert_eq!(first["conversation_id"], second["conversation_id"]);
}

#[tokio::test]
async fn reconciliation_requires_service_token() {
    let (_dir, db) = open_db();
    let app = app(db, Uuid::new_v4(), None);
    let body = json!({ "action": "get_status" });

    let (status, _) = call(&app, post("/functions/blockchain-sync", body.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let mut forged = post("/functions/blockchain-sync", body.clone());
    forged.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {}", service_token("wrong-secret")).parse().unwrap(),
    );
    let (status, _) = call(&app, forged).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let mut authorised = post("/functions/blockchain-sync", body);
    authorised.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {}", service_token(SECRET)).parse().unwrap(),
    );
    let (status, body) = call(&app, authorised).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_messages"], 0);
    assert_eq!(body["chain_mode"], "simulated");
}

#[tokio::test]
async fn unknown_action_is_bad_request() {
    let (_dir, db) = open_db();
    let app = app(db, Uuid::new_v4(), None);

    let mut req = post("/functions/blockchain-sync", json!({ "action": "drop_tables" }));
    req.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {}", service_token(SECRET)).parse().unwrap(),
    );
    let (status, body) = call(&app, req).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("drop_tables"));
}

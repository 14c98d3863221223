//! HTTP surface: status codes per error class, operator key gate and a
//! ticket-to-bet flow over JSON.

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use crash_engine::{
    api::ApiServer,
    config::EngineConfig,
    services::ServiceBuilder,
    tickets::{PaymentStatus, StaticPaymentVerifier},
    types::{Round, Ticket, UNITS_PER_TOKEN},
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn app(operator_key: Option<&str>) -> Router {
    let mut config = EngineConfig::testing();
    config.api.operator_key = operator_key.map(str::to_string);
    let services = Arc::new(
        ServiceBuilder::new(config.clone())
            .with_payment_verifier(Arc::new(StaticPaymentVerifier::new(PaymentStatus::Confirmed)))
            .build()
            .unwrap(),
    );
    ApiServer::new(config.api, services).app()
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>, key: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(key) = key {
        builder = builder.header("x-operator-key", key);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    assert!(response.headers().contains_key("x-request-id"));
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn test_health_and_status() {
    let app = app(None);
    let (status, body) = call(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Running");

    let (status, body) = call(&app, "GET", "/status", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["game_active"], true);
    assert!(body["claim_signer"].is_string());
}

#[tokio::test]
async fn test_operator_routes_require_key() {
    let app = app(Some("secret"));
    let (status, body) = call(&app, "POST", "/rounds/start", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    assert!(body["request_id"].is_string());

    let (status, _) = call(&app, "POST", "/rounds/start", None, Some("secret")).await;
    assert_eq!(status, StatusCode::OK);

    // Player routes stay open
    let (status, _) = call(&app, "GET", "/rounds", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_bet_flow_and_error_classes() {
    let app = app(None);
    let (status, round) = call(&app, "POST", "/rounds/start", Some(json!({})), None).await;
    assert_eq!(status, StatusCode::OK);
    let round: Round = serde_json::from_value(round).unwrap();

    let purchase = json!({
        "wallet": "0xAAA",
        "ticket_value": 5 * UNITS_PER_TOKEN,
        "payment_currency": "WOVER",
        "payment_amount": 5 * UNITS_PER_TOKEN,
        "payment_ref": "0xhttp-1",
    });
    let (status, ticket) = call(&app, "POST", "/tickets/purchase", Some(purchase), None).await;
    assert_eq!(status, StatusCode::OK);
    let ticket: Ticket = serde_json::from_value(ticket).unwrap();
    assert_eq!(ticket.owner.as_str(), "0xaaa");

    let bet = json!({ "round_id": round.id, "wallet": "0xaaa", "ticket_id": ticket.id });
    let (status, _) = call(&app, "POST", "/bets", Some(bet.clone()), None).await;
    assert_eq!(status, StatusCode::OK);

    // Validation: one bet per wallet per round
    let (status, body) = call(&app, "POST", "/bets", Some(bet), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION");

    // Conflict: a second round while one is open
    let (status, body) = call(&app, "POST", "/rounds/start", None, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");

    // Blocking: paused game
    let (status, _) = call(&app, "POST", "/admin/pause", Some(json!({ "reason": "maintenance" })), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = call(&app, "GET", "/status", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["game_paused_reason"], "maintenance");

    let (status, tickets) = call(&app, "GET", "/wallets/0xAAA/tickets", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tickets[0]["state"], "consumed");

    let uri = format!("/rounds/{}/countdown", round.id);
    let (status, _) = call(&app, "POST", &uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = call(&app, "POST", &uri, None, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn test_verify_endpoint() {
    let app = app(None);
    let (_, round) = call(&app, "POST", "/rounds/start", Some(json!({ "server_seed": "abc" })), None).await;
    let round: Round = serde_json::from_value(round).unwrap();
    for path in ["countdown", "fly"] {
        let (status, _) = call(&app, "POST", &format!("/rounds/{}/{}", round.id, path), None, None).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, outcome) = call(&app, "POST", &format!("/rounds/{}/crash", round.id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["server_seed"], "abc");

    let request = json!({
        "server_seed": "abc",
        "seed_hash": round.server_seed_hash,
        "round_number": round.round_number,
        "crash_point": outcome["crash_point"],
    });
    let (status, body) = call(&app, "POST", "/verify", Some(request), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);

    let forged = json!({
        "server_seed": "abd",
        "seed_hash": round.server_seed_hash,
        "round_number": round.round_number,
        "crash_point": outcome["crash_point"],
    });
    let (_, body) = call(&app, "POST", "/verify", Some(forged), None).await;
    assert_eq!(body["valid"], false);
    assert_eq!(body["hash_matches"], false);
}

#[tokio::test]
async fn test_cashout_checks_wallet() {
    let app = app(None);
    let (_, round) = call(&app, "POST", "/rounds/start", None, None).await;
    let round: Round = serde_json::from_value(round).unwrap();
    let purchase = json!({
        "wallet": "0xowner",
        "ticket_value": UNITS_PER_TOKEN,
        "payment_currency": "WOVER",
        "payment_amount": UNITS_PER_TOKEN,
        "payment_ref": "0xhttp-owner",
    });
    let (_, ticket) = call(&app, "POST", "/tickets/purchase", Some(purchase), None).await;
    let bet = json!({ "round_id": round.id, "wallet": "0xowner", "ticket_id": ticket["id"] });
    let (status, bet) = call(&app, "POST", "/bets", Some(bet), None).await;
    assert_eq!(status, StatusCode::OK);
    for path in ["countdown", "fly"] {
        call(&app, "POST", &format!("/rounds/{}/{}", round.id, path), None, None).await;
    }

    let uri = format!("/bets/{}/cashout", bet["id"].as_str().unwrap());
    let forced = json!({ "wallet": "0xintruder", "multiplier": 100 });
    let (status, body) = call(&app, "POST", &uri, Some(forced), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION");
    let (_, bets) = call(&app, "GET", &format!("/rounds/{}/bets", round.id), None, None).await;
    assert_eq!(bets[0]["status"], "active");
}

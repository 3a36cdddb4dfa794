//! Vault lifecycle driven through the agent router against the in-memory
//! ledger and a manual clock.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use reliq_server::app_state::AppState;
use reliq_server::clock::ManualClock;
use reliq_server::crypto::eip712::{reliq_domain, Eip712Domain, HeartbeatDomain};
use reliq_server::crypto::{signature_to_hex, Address, Wallet, U256};
use reliq_server::ledger::{InMemoryLedger, VaultLedger};
use reliq_server::models::{NewVault, VerificationResult};
use reliq_server::routes;
use reliq_server::services::{HeartbeatSigner, ProofVerifier, UnlockOutcome, VaultService};

const START: u64 = 1_700_000_000;
const AMOUNT: u64 = 100_000_000_000_000;

struct FixedOracle(bool);

#[async_trait]
impl ProofVerifier for FixedOracle {
    async fn verify(&self, _condition: &str, _proof: &str) -> VerificationResult {
        VerificationResult {
            verified: self.0,
            confidence: 0.95,
            reasoning: "death certificate matches condition".to_string(),
        }
    }
}

fn domain(chain_id: u64) -> Eip712Domain {
    reliq_domain(chain_id, Address::repeat_byte(0x11))
}

struct Harness {
    clock: Arc<ManualClock>,
    ledger: Arc<InMemoryLedger>,
    service: Arc<VaultService>,
    owner: HeartbeatSigner,
    vault_id: u64,
    app: Router,
}

async fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new(START));
    let ledger = Arc::new(InMemoryLedger::new(&domain(103698795), clock.clone()));
    let owner = HeartbeatSigner::new(Wallet::random());
    let (vault_id, _) = ledger
        .create_vault(NewVault {
            owner: owner.wallet().address(),
            encrypted_payload: b"legacy message".to_vec(),
            encrypted_condition: b"owner has passed away".to_vec(),
            timeout: 300,
            amount: U256::from(AMOUNT),
        })
        .await
        .unwrap();

    let service = Arc::new(VaultService::new(ledger.clone(), clock.clone()));
    let state = AppState::new(service.clone(), Arc::new(FixedOracle(true)), None);
    let app = routes::agent_app(state, &["http://localhost:3000".to_string()]);

    Harness {
        clock,
        ledger,
        service,
        owner,
        vault_id,
        app,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: String) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: String, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn status(h: &Harness) -> Value {
    let (code, body) = send(&h.app, get(format!("/api/heartbeat/status/{}", h.vault_id))).await;
    assert_eq!(code, StatusCode::OK, "{body}");
    body
}

fn heartbeat_body(h: &Harness, heartbeat_domain: &HeartbeatDomain, timestamp: u64, nonce: u64) -> Value {
    let signed = h
        .owner
        .sign_with_nonce(heartbeat_domain, h.vault_id, timestamp, nonce)
        .unwrap();
    json!({
        "vaultId": signed.vault_id,
        "timestamp": signed.timestamp,
        "nonce": signed.nonce,
        "signature": signature_to_hex(&signed.signature),
    })
}

#[tokio::test]
async fn expired_unlocked_vault_pays_beneficiary() {
    let h = harness().await;
    let beneficiary = Address::repeat_byte(0xbe);

    let before = status(&h).await;
    assert_eq!(before["canTrigger"], false);
    assert_eq!(before["state"], "ACTIVE");
    assert_eq!(before["amount"], AMOUNT.to_string());

    h.ledger.force_expire(h.vault_id).await.unwrap();
    let expired = status(&h).await;
    assert_eq!(expired["canTrigger"], true);
    assert_eq!(expired["state"], "EXPIRED");

    let approved = VerificationResult {
        verified: true,
        confidence: 0.9,
        reasoning: "ok".to_string(),
    };
    let outcome = h.service.unlock_if_verified(h.vault_id, &approved).await.unwrap();
    assert!(matches!(outcome, UnlockOutcome::Unlocked(_)));
    assert_eq!(status(&h).await["isUnlocked"], true);

    let trigger_uri = format!("/api/vaults/{}/trigger", h.vault_id);
    let (code, body) = send(
        &h.app,
        post(trigger_uri.clone(), json!({ "beneficiary": beneficiary.to_string() })),
    )
    .await;
    assert_eq!(code, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert!(body["transactionHash"].as_str().unwrap().starts_with("0x"));

    let after = status(&h).await;
    assert_eq!(after["executed"], true);
    assert_eq!(after["state"], "EXECUTED");
    assert_eq!(after["canTrigger"], false);
    assert_eq!(h.ledger.balance_of(&beneficiary).await, U256::from(AMOUNT));

    let (code, body) = send(
        &h.app,
        post(trigger_uri, json!({ "beneficiary": beneficiary.to_string() })),
    )
    .await;
    assert_eq!(code, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
    assert_eq!(h.ledger.balance_of(&beneficiary).await, U256::from(AMOUNT));
}

#[tokio::test]
async fn trigger_before_expiry_or_unlock_is_refused() {
    let h = harness().await;
    let uri = format!("/api/vaults/{}/trigger", h.vault_id);
    let beneficiary = json!({ "beneficiary": Address::repeat_byte(0xbe).to_string() });

    let (code, _) = send(&h.app, post(uri.clone(), beneficiary.clone())).await;
    assert_eq!(code, StatusCode::CONFLICT);

    h.clock.advance(300);
    let (code, body) = send(&h.app, post(uri.clone(), beneficiary)).await;
    assert_eq!(code, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("not unlocked"));

    let (code, _) = send(&h.app, post(uri.clone(), json!({ "beneficiary": "0x1234" }))).await;
    assert_eq!(code, StatusCode::BAD_REQUEST);

    let zero = json!({ "beneficiary": Address::ZERO.to_string() });
    let (code, _) = send(&h.app, post(uri, zero)).await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn heartbeat_resets_liveness_window() {
    let h = harness().await;
    let heartbeat_domain = h.service.heartbeat_domain().await.unwrap();

    h.clock.advance(200);
    let body = heartbeat_body(&h, &heartbeat_domain, START + 200, 1);
    let (code, reply) = send(&h.app, post("/api/heartbeat/respond".to_string(), body)).await;
    assert_eq!(code, StatusCode::OK, "{reply}");
    assert_eq!(reply["success"], true);
    assert!(reply["transactionHash"].is_string());

    h.clock.advance(299);
    assert_eq!(status(&h).await["canTrigger"], false);
    assert_eq!(status(&h).await["secondsUntilExpiry"], 1);
    h.clock.advance(1);
    assert_eq!(status(&h).await["canTrigger"], true);
}

#[tokio::test]
async fn replayed_or_misbound_heartbeats_are_unprocessable() {
    let h = harness().await;
    let heartbeat_domain = h.service.heartbeat_domain().await.unwrap();

    let body = heartbeat_body(&h, &heartbeat_domain, START, 42);
    let (code, _) = send(&h.app, post("/api/heartbeat/respond".to_string(), body.clone())).await;
    assert_eq!(code, StatusCode::OK);

    let (code, reply) = send(&h.app, post("/api/heartbeat/respond".to_string(), body)).await;
    assert_eq!(code, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(reply["success"], false);
    assert!(reply["error"].as_str().unwrap().contains("nonce"));

    // Signed for another chain.
    let foreign = HeartbeatDomain::from_domain(&domain(1));
    let body = heartbeat_body(&h, &foreign, START, 43);
    let (code, reply) = send(&h.app, post("/api/heartbeat/respond".to_string(), body)).await;
    assert_eq!(code, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(reply["success"], false);

    // Signed for this vault, submitted for another one.
    let (other_id, _) = h
        .ledger
        .create_vault(NewVault {
            owner: h.owner.wallet().address(),
            encrypted_payload: vec![1],
            encrypted_condition: vec![2],
            timeout: 300,
            amount: U256::from(1u64),
        })
        .await
        .unwrap();
    let mut body = heartbeat_body(&h, &heartbeat_domain, START, 44);
    body["vaultId"] = json!(other_id);
    let (code, _) = send(&h.app, post("/api/heartbeat/respond".to_string(), body)).await;
    assert_eq!(code, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn malformed_requests_are_rejected_without_side_effects() {
    let h = harness().await;

    let (code, body) = send(
        &h.app,
        post("/api/heartbeat/respond".to_string(), json!({ "vaultId": h.vault_id })),
    )
    .await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing required fields");

    let (code, _) = send(
        &h.app,
        post(
            "/api/heartbeat/respond".to_string(),
            json!({ "vaultId": h.vault_id, "timestamp": START, "nonce": 1, "signature": "0xdead" }),
        ),
    )
    .await;
    assert_eq!(code, StatusCode::BAD_REQUEST);

    let (code, _) = send(&h.app, get("/api/heartbeat/status/99".to_string())).await;
    assert_eq!(code, StatusCode::NOT_FOUND);
    assert_eq!(h.ledger.vault_count().await.unwrap(), 1);
}

#[tokio::test]
async fn open_routes_answer_without_payment() {
    let h = harness().await;

    let (code, body) = send(&h.app, get("/health".to_string())).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok", "service": "ReliQ-Agent" }));

    let (code, body) = send(&h.app, post("/api/verify".to_string(), json!({ "proof": "x" }))).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["verified"], true);
    assert_eq!(body["confidence"], 0.85);
    assert_eq!(body["note"], "Free tier verification (Mock)");
}

#[tokio::test]
async fn paid_route_without_gate_is_unavailable() {
    let h = harness().await;
    let (code, body) = send(
        &h.app,
        post(
            "/api/verify-paid".to_string(),
            json!({ "proof": "p", "condition": "c", "vaultId": h.vault_id }),
        ),
    )
    .await;
    assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "Service unavailable: Payment gateway (x402) is down.");
    assert_eq!(status(&h).await["isUnlocked"], false);
}

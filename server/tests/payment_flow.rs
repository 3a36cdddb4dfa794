//! x402 flow: the facilitator's HTTP surface and the agent's payment gate,
//! with the token contract replaced by an in-process double.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{HeaderMap, Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use tower::ServiceExt;

use reliq_server::app_state::{AppState, FacilitatorState};
use reliq_server::chain::{ChainError, TxReceipt};
use reliq_server::clock::ManualClock;
use reliq_server::crypto::eip712::{reliq_domain, TransferWithAuthorization};
use reliq_server::crypto::{Address, Signature, Wallet, B256, U256};
use reliq_server::ledger::{InMemoryLedger, VaultLedger};
use reliq_server::models::payment::{PaymentPayload, PaymentRequirements};
use reliq_server::models::{NewVault, VerificationResult};
use reliq_server::payment::exact_evm::EvmSigner;
use reliq_server::payment::hooks::PaymentContext;
use reliq_server::payment::{
    ExactEvmPayload, ExactEvmScheme, Facilitator, FacilitatorClient, HookError, NetworkPattern,
    PaymentGate, ResourceServer, RoutePaymentConfig,
};
use reliq_server::routes;
use reliq_server::services::{ProofVerifier, VaultService};

const NOW: u64 = 1_700_000_000;
const NETWORK: &str = "eip155:103698795";

/// Token double. `records_nonces: false` models a node whose
/// `authorizationState` lags behind settled transfers; `offline` fails every
/// read.
struct Token {
    balance: U256,
    records_nonces: bool,
    offline: bool,
    used_nonces: Mutex<HashSet<B256>>,
    transfers: Mutex<u32>,
}

impl Token {
    fn read(&self) -> Result<(), ChainError> {
        if self.offline {
            return Err(ChainError::Timeout(Duration::from_secs(10)));
        }
        Ok(())
    }
}

#[async_trait]
impl EvmSigner for Token {
    fn address(&self) -> Address {
        Address::repeat_byte(0xfa)
    }

    async fn balance_of(&self, _: Address, _: Address) -> Result<U256, ChainError> {
        self.read()?;
        Ok(self.balance)
    }

    async fn authorization_state(&self, _: Address, _: Address, nonce: B256) -> Result<bool, ChainError> {
        self.read()?;
        Ok(self.used_nonces.lock().unwrap().contains(&nonce))
    }

    async fn transfer_with_authorization(
        &self,
        _: Address,
        authorization: &TransferWithAuthorization,
        _: &Signature,
    ) -> Result<TxReceipt, ChainError> {
        if self.records_nonces {
            self.used_nonces.lock().unwrap().insert(authorization.nonce);
        }
        let mut transfers = self.transfers.lock().unwrap();
        *transfers += 1;
        Ok(TxReceipt {
            tx_hash: B256::with_last_byte(*transfers as u8),
            block_number: Some(u64::from(*transfers)),
            gas_used: Some(60_000),
            status: true,
        })
    }
}

struct Approve;

#[async_trait]
impl ProofVerifier for Approve {
    async fn verify(&self, _condition: &str, _proof: &str) -> VerificationResult {
        VerificationResult {
            verified: true,
            confidence: 0.92,
            reasoning: "proof satisfies condition".to_string(),
        }
    }
}

fn requirements(amount: &str) -> PaymentRequirements {
    serde_json::from_value(json!({
        "scheme": "exact",
        "network": NETWORK,
        "amount": amount,
        "asset": "0xc4083B1E81ceb461Ccef3FDa8A9F24F0d764B6D8",
        "payTo": "0x000000000000000000000000000000000000dEaD",
        "maxTimeoutSeconds": 300,
        "extra": { "name": "Axios USD", "version": "1" }
    }))
    .unwrap()
}

fn pay(wallet: &Wallet, requirements: &PaymentRequirements, nonce: u8) -> PaymentPayload {
    ExactEvmPayload::sign(wallet, requirements, NOW - 60, NOW + 300, B256::repeat_byte(nonce)).unwrap()
}

fn facilitator(token: Arc<Token>, blocked: bool) -> Arc<Facilitator> {
    let scheme = Arc::new(ExactEvmScheme::new(token, Arc::new(ManualClock::new(NOW))));
    let builder = Facilitator::builder().register(NetworkPattern::Namespace("eip155".to_string()), scheme);
    let builder = if blocked {
        builder.on_before_settle(|_: PaymentContext| async {
            Err::<(), _>(HookError::abort("payer on deny list"))
        })
    } else {
        builder
    };
    Arc::new(builder.build())
}

fn token_with(balance: u64, records_nonces: bool, offline: bool) -> Arc<Token> {
    Arc::new(Token {
        balance: U256::from(balance),
        records_nonces,
        offline,
        used_nonces: Mutex::new(HashSet::new()),
        transfers: Mutex::new(0),
    })
}

fn token(balance: u64) -> Arc<Token> {
    token_with(balance, true, false)
}

fn lagging_token(balance: u64) -> Arc<Token> {
    token_with(balance, false, false)
}

fn offline_token() -> Arc<Token> {
    token_with(0, true, true)
}

fn facilitator_app(facilitator: Arc<Facilitator>) -> Router {
    routes::facilitator_app(
        FacilitatorState {
            facilitator,
            wallet: Address::repeat_byte(0xfa),
        },
        &[],
    )
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, headers, body)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn facilitator_body(payload: &PaymentPayload, requirements: &PaymentRequirements) -> Value {
    json!({ "paymentPayload": payload, "paymentRequirements": requirements })
}

fn decode_header(headers: &HeaderMap, name: &str) -> Value {
    let raw = headers.get(name).unwrap().to_str().unwrap();
    serde_json::from_slice(&STANDARD.decode(raw).unwrap()).unwrap()
}

#[tokio::test]
async fn facilitator_describes_itself() {
    let app = facilitator_app(facilitator(token(0), false));

    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let (code, _, body) = send(&app, request).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["name"], "ReliQ x402 Facilitator");
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["networks"], json!(["eip155:*"]));
    assert_eq!(body["endpoints"]["settle"], "/settle");

    let request = Request::builder().uri("/supported").body(Body::empty()).unwrap();
    let (_, _, body) = send(&app, request).await;
    assert_eq!(
        body["kinds"],
        json!([{ "x402Version": 2, "scheme": "exact", "network": "eip155:*" }])
    );
}

#[tokio::test]
async fn verify_checks_network_and_amount() {
    let app = facilitator_app(facilitator(token(1_000_000), false));
    let payer = Wallet::random();
    let price = requirements("10000");

    let (code, _, body) = send(&app, post("/verify", json!({ "paymentRequirements": price }))).await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing paymentPayload or paymentRequirements");

    let good = pay(&payer, &price, 1);
    let (code, _, body) = send(&app, post("/verify", facilitator_body(&good, &price))).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["success"], true, "{body}");
    let reported = body["payer"].as_str().unwrap();
    assert!(reported.eq_ignore_ascii_case(&payer.address().to_string()), "{reported}");

    let cheap = pay(&payer, &requirements("1"), 2);
    let (_, _, body) = send(&app, post("/verify", facilitator_body(&cheap, &price))).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["invalidReason"], "invalid_exact_evm_payload_authorization_value");

    let mut elsewhere = requirements("10000");
    elsewhere.network = "eip155:1".to_string();
    let wrong_chain = pay(&payer, &elsewhere, 3);
    let (_, _, body) = send(&app, post("/verify", facilitator_body(&wrong_chain, &price))).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["invalidReason"], "network_mismatch");
}

#[tokio::test]
async fn settlement_happens_once_per_payload() {
    let chain = token(1_000_000);
    let app = facilitator_app(facilitator(chain.clone(), false));
    let price = requirements("10000");
    let payload = pay(&Wallet::random(), &price, 9);

    let (code, _, first) = send(&app, post("/settle", facilitator_body(&payload, &price))).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(first["success"], true, "{first}");
    assert_eq!(first["network"], NETWORK);

    let (_, _, second) = send(&app, post("/settle", facilitator_body(&payload, &price))).await;
    assert_eq!(second["txHash"], first["txHash"]);
    assert_eq!(*chain.transfers.lock().unwrap(), 1);
}

#[tokio::test]
async fn chain_outage_during_verify_is_unavailable() {
    let app = facilitator_app(facilitator(offline_token(), false));
    let price = requirements("10000");
    let payload = pay(&Wallet::random(), &price, 8);

    let (code, _, body) = send(&app, post("/verify", facilitator_body(&payload, &price))).await;
    assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Upstream service unavailable");

    let (code, _, _) = send(&app, post("/settle", facilitator_body(&payload, &price))).await;
    assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn hook_abort_surfaces_as_settlement_failure() {
    let chain = token(1_000_000);
    let app = facilitator_app(facilitator(chain.clone(), true));
    let price = requirements("10000");
    let payload = pay(&Wallet::random(), &price, 4);

    let (code, _, body) = send(&app, post("/settle", facilitator_body(&payload, &price))).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "success": false, "errorReason": "payer on deny list", "network": NETWORK })
    );
    assert_eq!(*chain.transfers.lock().unwrap(), 0);
}

struct Agent {
    app: Router,
    ledger: Arc<InMemoryLedger>,
    vault_id: u64,
}

async fn gated_agent(facilitator: Arc<Facilitator>) -> Agent {
    let clock = Arc::new(ManualClock::new(NOW));
    let domain = reliq_domain(103698795, Address::repeat_byte(0x11));
    let ledger = Arc::new(InMemoryLedger::new(&domain, clock.clone()));
    let (vault_id, _) = ledger
        .create_vault(NewVault {
            owner: Address::repeat_byte(0x44),
            encrypted_payload: vec![0xaa],
            encrypted_condition: vec![0xbb],
            timeout: 300,
            amount: U256::from(1u64),
        })
        .await
        .unwrap();

    let client: Arc<dyn FacilitatorClient> = facilitator;
    let server = ResourceServer::new(client).register("eip155:*".parse().unwrap(), "exact");
    let route = RoutePaymentConfig {
        accepts: vec![requirements("10000")],
        description: Some("ReliQ Agent Verification Service".to_string()),
        mime_type: Some("application/json".to_string()),
    };
    let gate = PaymentGate::initialize(server, route).await.unwrap();

    let service = Arc::new(VaultService::new(ledger.clone(), clock));
    let state = AppState::new(service, Arc::new(Approve), Some(Arc::new(gate)));
    Agent {
        app: routes::agent_app(state, &[]),
        ledger,
        vault_id,
    }
}

fn paid_request(payload: Option<&PaymentPayload>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/verify-paid")
        .header("content-type", "application/json");
    if let Some(payload) = payload {
        let encoded = STANDARD.encode(serde_json::to_vec(payload).unwrap());
        builder = builder.header("PAYMENT-SIGNATURE", encoded);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn unpaid_request_gets_payment_requirements() {
    let agent = gated_agent(facilitator(token(1_000_000), false)).await;
    let body = json!({ "proof": "p", "condition": "c", "vaultId": agent.vault_id });

    let (code, headers, reply) = send(&agent.app, paid_request(None, body)).await;
    assert_eq!(code, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(reply["x402Version"], 2);
    assert_eq!(reply["accepts"][0]["amount"], "10000");
    let advertised = decode_header(&headers, "payment-required");
    assert_eq!(advertised["accepts"][0]["network"], NETWORK);
    assert_eq!(advertised["resource"]["url"], "/api/verify-paid");
}

#[tokio::test]
async fn underpaid_or_foreign_payment_is_refused() {
    let agent = gated_agent(facilitator(token(1_000_000), false)).await;
    let payer = Wallet::random();
    let body = json!({ "proof": "p", "condition": "c", "vaultId": agent.vault_id });

    let cheap = pay(&payer, &requirements("1"), 1);
    let (code, _, reply) = send(&agent.app, paid_request(Some(&cheap), body.clone())).await;
    assert_eq!(code, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(reply["error"], "invalid_exact_evm_payload_authorization_value");

    let mut elsewhere = requirements("10000");
    elsewhere.network = "eip155:1".to_string();
    let foreign = pay(&payer, &elsewhere, 2);
    let (code, _, reply) = send(&agent.app, paid_request(Some(&foreign), body)).await;
    assert_eq!(code, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(reply["error"], "No matching payment requirements");

    let vault = agent.ledger.get_vault(agent.vault_id).await.unwrap();
    assert!(!vault.is_unlocked);
}

#[tokio::test]
async fn paid_verification_unlocks_vault() {
    let chain = token(1_000_000);
    let agent = gated_agent(facilitator(chain.clone(), false)).await;
    let payment = pay(&Wallet::random(), &requirements("10000"), 5);
    let body = json!({ "proof": "certificate", "condition": "owner deceased", "vaultId": agent.vault_id });

    let (code, headers, reply) = send(&agent.app, paid_request(Some(&payment), body)).await;
    assert_eq!(code, StatusCode::OK, "{reply}");
    assert_eq!(reply["verified"], true);
    assert_eq!(reply["analysis"], "proof satisfies condition");
    assert!(reply["txHash"].as_str().unwrap().starts_with("0x"));
    assert!(reply["timestamp"].is_string());

    let receipt = decode_header(&headers, "payment-response");
    assert_eq!(receipt["success"], true);
    assert_eq!(*chain.transfers.lock().unwrap(), 1);
    assert!(agent.ledger.get_vault(agent.vault_id).await.unwrap().is_unlocked);
}

#[tokio::test]
async fn paid_request_without_vault_id_is_bad_request() {
    let chain = token(1_000_000);
    let agent = gated_agent(facilitator(chain.clone(), false)).await;
    let payment = pay(&Wallet::random(), &requirements("10000"), 6);

    let (code, _, reply) = send(
        &agent.app,
        paid_request(Some(&payment), json!({ "proof": "p", "condition": "c" })),
    )
    .await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
    assert_eq!(reply["error"], "vaultId is required");
    assert_eq!(*chain.transfers.lock().unwrap(), 0);
}

#[tokio::test]
async fn failed_handler_does_not_charge_and_frees_the_payment() {
    let chain = token(1_000_000);
    let agent = gated_agent(facilitator(chain.clone(), false)).await;
    let payment = pay(&Wallet::random(), &requirements("10000"), 6);

    let (code, headers, _) = send(
        &agent.app,
        paid_request(Some(&payment), json!({ "proof": "p", "condition": "c" })),
    )
    .await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
    assert!(headers.get("payment-response").is_none());
    assert_eq!(*chain.transfers.lock().unwrap(), 0);

    let (code, _, _) = send(
        &agent.app,
        paid_request(Some(&payment), json!({ "proof": "p", "condition": "c", "vaultId": 99 })),
    )
    .await;
    assert_eq!(code, StatusCode::NOT_FOUND);
    assert_eq!(*chain.transfers.lock().unwrap(), 0);

    let body = json!({ "proof": "p", "condition": "c", "vaultId": agent.vault_id });
    let (code, _, reply) = send(&agent.app, paid_request(Some(&payment), body)).await;
    assert_eq!(code, StatusCode::OK, "{reply}");
    assert_eq!(*chain.transfers.lock().unwrap(), 1);
}

#[tokio::test]
async fn settled_payment_cannot_be_replayed() {
    let chain = token(1_000_000);
    let agent = gated_agent(facilitator(chain.clone(), false)).await;
    let payment = pay(&Wallet::random(), &requirements("10000"), 7);
    let body = json!({ "proof": "p", "condition": "c", "vaultId": agent.vault_id });

    let (code, _, _) = send(&agent.app, paid_request(Some(&payment), body.clone())).await;
    assert_eq!(code, StatusCode::OK);

    let (code, _, reply) = send(&agent.app, paid_request(Some(&payment), body)).await;
    assert_eq!(code, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(reply["error"], "invalid_exact_evm_payload_authorization_nonce_used");
    assert_eq!(*chain.transfers.lock().unwrap(), 1);
}

#[tokio::test]
async fn gate_refuses_a_settled_payload_even_if_the_token_lags() {
    let chain = lagging_token(1_000_000);
    let agent = gated_agent(facilitator(chain.clone(), false)).await;
    let payment = pay(&Wallet::random(), &requirements("10000"), 8);
    let body = json!({ "proof": "p", "condition": "c", "vaultId": agent.vault_id });

    let (code, _, _) = send(&agent.app, paid_request(Some(&payment), body.clone())).await;
    assert_eq!(code, StatusCode::OK);

    let (code, _, reply) = send(&agent.app, paid_request(Some(&payment), body)).await;
    assert_eq!(code, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(reply["error"], "payment_already_used");
    assert_eq!(*chain.transfers.lock().unwrap(), 1);
}

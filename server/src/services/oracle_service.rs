//! Language-model oracle that judges a proof against a vault's unlock
//! condition. Every failure collapses into a rejected verdict.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::OracleConfig;
use crate::models::VerificationResult;

#[async_trait]
pub trait ProofVerifier: Send + Sync {
    /// Never fails: upstream problems come back as `verified: false`.
    async fn verify(&self, condition: &str, proof: &str) -> VerificationResult;
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("OPENROUTER_API_KEY not configured")]
    MissingApiKey,

    #[error("oracle request timed out")]
    Timeout,

    #[error("oracle transport error: {0}")]
    Transport(reqwest::Error),

    #[error("oracle returned {status}: {body}")]
    Upstream { status: StatusCode, body: String },

    #[error("oracle response had no message content")]
    MissingContent,

    #[error("no JSON object in model output")]
    NoJsonObject,

    #[error("model JSON did not match the verdict shape: {0}")]
    Parse(#[from] serde_json::Error),
}

impl From<reqwest::Error> for OracleError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            OracleError::Timeout
        } else {
            OracleError::Transport(err)
        }
    }
}

#[derive(Debug, Deserialize)]
struct ModelVerdict {
    verified: bool,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    reasoning: String,
}

/// OpenRouter-compatible chat-completions client.
pub struct OpenRouterOracle {
    http: Client,
    config: OracleConfig,
}

impl OpenRouterOracle {
    pub fn new(config: OracleConfig) -> Result<Self, OracleError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(OracleError::Transport)?;
        Ok(Self { http, config })
    }

    async fn ask(&self, condition: &str, proof: &str) -> Result<VerificationResult, OracleError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(OracleError::MissingApiKey)?;

        info!(model = %self.config.model, "calling verification model");
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(url)
            .bearer_auth(api_key)
            .header("HTTP-Referer", "https://reliq.app")
            .header("X-Title", "ReliQ Agent")
            .json(&json!({
                "model": self.config.model,
                "messages": [{ "role": "user", "content": build_prompt(condition, proof) }],
                "temperature": 0.3,
                "max_tokens": 1024,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Upstream { status, body });
        }

        let body: Value = response.json().await?;
        let content = body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or(OracleError::MissingContent)?;

        parse_verdict(content)
    }
}

#[async_trait]
impl ProofVerifier for OpenRouterOracle {
    async fn verify(&self, condition: &str, proof: &str) -> VerificationResult {
        match self.ask(condition, proof).await {
            Ok(result) => {
                info!(
                    verified = result.verified,
                    confidence = result.confidence,
                    "model verdict received"
                );
                result
            }
            Err(err) => {
                match &err {
                    OracleError::MissingApiKey => warn!("oracle disabled: {err}"),
                    _ => error!(error = %err, "oracle verification failed"),
                }
                VerificationResult::rejected(format!("AI Verification Failed: {err}"))
            }
        }
    }
}

fn build_prompt(condition: &str, proof: &str) -> String {
    format!(
        r#"You are an impartial executor for a digital inheritance vault.
Your task is to verify if the provided proof satisfies the condition set by the vault creator.

Condition: "{condition}"
Proof Content: "{proof}"

Analyze strictly. Is the condition met?
Respond in JSON format:
{{
  "verified": boolean,
  "confidence": number (0-1),
  "reasoning": "short explanation"
}}"#
    )
}

fn parse_verdict(content: &str) -> Result<VerificationResult, OracleError> {
    let raw = extract_first_json_object(content).ok_or(OracleError::NoJsonObject)?;
    let verdict: ModelVerdict = serde_json::from_str(raw)?;
    let confidence = if verdict.confidence.is_finite() {
        verdict.confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };
    Ok(VerificationResult {
        verified: verdict.verified,
        confidence,
        reasoning: verdict.reasoning,
    })
}

/// First balanced `{...}` in `text`, skipping braces inside string literals.
pub fn extract_first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

//! Stripe payment intents adapter.

use std::time::Duration;

use async_trait::async_trait;
use domain::PaymentProvider;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::Sha256;

use super::{
    CallbackEvent, CallbackOutcome, InitiatedPayment, PaymentRequest, ProviderAdapter,
    ProviderError,
};

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_API_BASE: &str = "https://api.stripe.com";

/// Oldest webhook timestamp accepted, in seconds.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Stripe credentials.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    /// Signing secret of the webhook endpoint (`whsec_...`).
    pub webhook_secret: Option<String>,
    pub api_base: Option<String>,
}

impl StripeConfig {
    fn api_base(&self) -> String {
        self.api_base
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/')
            .to_string()
    }
}

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StripeErrorBody {
    #[serde(default)]
    error: Option<StripeErrorDetail>,
}

#[derive(Debug, Default, Deserialize)]
struct StripeErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

/// Verifies a `Stripe-Signature` header (`t=<ts>,v1=<hex>`) against the raw body.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
) -> Result<(), ProviderError> {
    let mut timestamp = "";
    let mut signatures = Vec::new();
    for part in header.split(',') {
        let part = part.trim();
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = t;
        } else if let Some(v) = part.strip_prefix("v1=") {
            signatures.push(v);
        }
    }
    if timestamp.is_empty() || signatures.is_empty() {
        return Err(ProviderError::InvalidSignature(
            "invalid Stripe-Signature header".into(),
        ));
    }

    let ts: i64 = timestamp
        .parse()
        .map_err(|_| ProviderError::InvalidSignature("invalid timestamp".into()))?;
    if (now - ts).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(ProviderError::InvalidSignature(
            "timestamp outside the tolerance window".into(),
        ));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ProviderError::Configuration("invalid webhook secret".into()))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);

    // Any v1 signature may match (secrets are rolled with overlap).
    let matched = signatures.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });
    if !matched {
        return Err(ProviderError::InvalidSignature(
            "signature mismatch".into(),
        ));
    }
    Ok(())
}

/// Builds a `Stripe-Signature` header for `payload`.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, ProviderError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ProviderError::Configuration("invalid webhook secret".into()))?;
    mac.update(format!("{timestamp}.").as_bytes());
    mac.update(payload);
    Ok(format!(
        "t={timestamp},v1={}",
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Adapter for Stripe payment intents.
#[derive(Debug, Clone)]
pub struct StripeAdapter {
    config: StripeConfig,
    client: reqwest::Client,
}

impl StripeAdapter {
    pub fn new(config: StripeConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| ProviderError::Configuration(e.to_string()))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl ProviderAdapter for StripeAdapter {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Stripe
    }

    #[tracing::instrument(skip(self, request), fields(payment_id = %request.payment_id, order_id = %request.order_id))]
    async fn initiate(&self, request: &PaymentRequest) -> Result<InitiatedPayment, ProviderError> {
        let form = [
            ("amount", request.amount.cents().to_string()),
            ("currency", request.currency.to_ascii_lowercase()),
            ("metadata[order_id]", request.order_id.to_string()),
            ("metadata[user_id]", request.user_id.to_string()),
            ("metadata[payment_id]", request.payment_id.to_string()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
        ];

        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.config.api_base()))
            .basic_auth(&self.config.secret_key, None::<&str>)
            .header("Idempotency-Key", request.payment_id.to_string())
            .form(&form)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ProviderError::Unavailable(format!(
                "payment_intents returned {status}"
            )));
        }
        if !status.is_success() {
            let body: StripeErrorBody = response.json().await.unwrap_or_default();
            let message = body
                .error
                .and_then(|e| e.message)
                .unwrap_or_else(|| format!("payment_intents returned {status}"));
            return Err(if status == reqwest::StatusCode::UNAUTHORIZED {
                ProviderError::Authentication(message)
            } else {
                ProviderError::Rejected(message)
            });
        }

        let intent: PaymentIntent = response
            .json()
            .await
            .map_err(|e| ProviderError::Rejected(format!("malformed payment intent: {e}")))?;

        tracing::info!(payment_intent = %intent.id, "payment intent created");
        Ok(InitiatedPayment {
            external_reference: intent.id.clone(),
            client_token: intent.client_secret.clone(),
            metadata: json!({
                "payment_intent_id": intent.id,
                "client_secret": intent.client_secret,
                "intent_status": intent.status,
            }),
        })
    }

    fn verify_callback(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<Option<CallbackEvent>, ProviderError> {
        let secret = self.config.webhook_secret.as_deref().ok_or_else(|| {
            ProviderError::Configuration("Stripe webhook secret is not configured".into())
        })?;
        let header = signature.ok_or_else(|| {
            ProviderError::InvalidSignature("missing Stripe-Signature header".into())
        })?;
        verify_signature(payload, header, secret, chrono::Utc::now().timestamp())?;

        let event: Value = serde_json::from_slice(payload)
            .map_err(|e| ProviderError::MalformedPayload(e.to_string()))?;
        let event_type = event.get("type").and_then(Value::as_str).unwrap_or_default();
        let object = event
            .pointer("/data/object")
            .ok_or_else(|| ProviderError::MalformedPayload("missing data.object".into()))?;

        let outcome = match event_type {
            "payment_intent.succeeded" => {
                // latest_charge is an id, or an object when expanded.
                let charge = match object.get("latest_charge") {
                    Some(Value::String(id)) => Some(id.clone()),
                    Some(Value::Object(charge)) => {
                        charge.get("id").and_then(Value::as_str).map(str::to_string)
                    }
                    _ => None,
                };
                CallbackOutcome::Succeeded {
                    transaction_id: charge
                        .or_else(|| object.get("id").and_then(Value::as_str).map(str::to_string)),
                }
            }
            "payment_intent.payment_failed" => CallbackOutcome::Failed {
                reason: object
                    .pointer("/last_payment_error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("payment failed")
                    .to_string(),
            },
            other => {
                tracing::debug!(event_type = other, "ignoring Stripe event");
                return Ok(None);
            }
        };

        let intent_id = object
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::MalformedPayload("missing payment intent id".into()))?
            .to_string();

        Ok(Some(CallbackEvent {
            external_reference: intent_id,
            outcome,
            payload: event,
        }))
    }
}

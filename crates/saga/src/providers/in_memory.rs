//! Gateway stand-in for tests and local runs.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use domain::PaymentProvider;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;

use super::{
    CallbackEvent, CallbackOutcome, InitiatedPayment, PaymentRequest, ProviderAdapter,
    ProviderError, constant_time_eq,
};

/// Callback body understood by [`InMemoryProvider`].
#[derive(Debug, Deserialize)]
struct FakeCallback {
    reference: String,
    status: String,
    #[serde(default)]
    transaction_id: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

/// A provider that accepts every payment and authenticates callbacks with a
/// shared secret passed as the signature.
///
/// Callback body: `{"reference": "...", "status": "succeeded" | "failed",
/// "transaction_id": "...", "reason": "..."}`. Other statuses are ignored.
#[derive(Debug)]
pub struct InMemoryProvider {
    provider: PaymentProvider,
    secret: String,
    sequence: AtomicU64,
    fail_on_initiate: Mutex<Option<String>>,
    requests: Mutex<Vec<PaymentRequest>>,
}

impl InMemoryProvider {
    pub fn new(provider: PaymentProvider, secret: impl Into<String>) -> Self {
        Self {
            provider,
            secret: secret.into(),
            sequence: AtomicU64::new(0),
            fail_on_initiate: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Makes the next initiations fail with the given reason (`None` to recover).
    pub async fn set_fail_on_initiate(&self, reason: Option<String>) {
        *self.fail_on_initiate.lock().await = reason;
    }

    /// Requests received so far.
    pub async fn requests(&self) -> Vec<PaymentRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl ProviderAdapter for InMemoryProvider {
    fn provider(&self) -> PaymentProvider {
        self.provider
    }

    async fn initiate(&self, request: &PaymentRequest) -> Result<InitiatedPayment, ProviderError> {
        self.requests.lock().await.push(request.clone());
        if let Some(reason) = self.fail_on_initiate.lock().await.clone() {
            return Err(ProviderError::Rejected(reason));
        }

        let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let reference = format!("{}-{n:06}", self.provider);
        Ok(InitiatedPayment {
            client_token: Some(format!("{reference}_secret")),
            metadata: json!({ "simulated": true }),
            external_reference: reference,
        })
    }

    fn verify_callback(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<Option<CallbackEvent>, ProviderError> {
        let signature = signature
            .ok_or_else(|| ProviderError::InvalidSignature("missing signature".into()))?;
        if !constant_time_eq(signature.as_bytes(), self.secret.as_bytes()) {
            return Err(ProviderError::InvalidSignature("signature mismatch".into()));
        }

        let raw: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| ProviderError::MalformedPayload(e.to_string()))?;
        let callback: FakeCallback = serde_json::from_value(raw.clone())
            .map_err(|e| ProviderError::MalformedPayload(e.to_string()))?;

        let outcome = match callback.status.as_str() {
            "succeeded" => CallbackOutcome::Succeeded {
                transaction_id: callback.transaction_id,
            },
            "failed" => CallbackOutcome::Failed {
                reason: callback.reason.unwrap_or_else(|| "payment failed".into()),
            },
            _ => return Ok(None),
        };
        Ok(Some(CallbackEvent {
            external_reference: callback.reference,
            outcome,
            payload: raw,
        }))
    }
}

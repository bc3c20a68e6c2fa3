//! M-Pesa STK push (mobile money) adapter.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use domain::PaymentProvider;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{
    CallbackEvent, CallbackOutcome, InitiatedPayment, PaymentRequest, ProviderAdapter,
    ProviderError, TokenCache, constant_time_eq,
};

/// Which Daraja deployment to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MpesaEnvironment {
    #[default]
    Sandbox,
    Production,
}

impl MpesaEnvironment {
    pub fn base_url(&self) -> &'static str {
        match self {
            MpesaEnvironment::Sandbox => "https://sandbox.safaricom.co.ke",
            MpesaEnvironment::Production => "https://api.safaricom.co.ke",
        }
    }
}

impl std::str::FromStr for MpesaEnvironment {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sandbox" => Ok(MpesaEnvironment::Sandbox),
            "production" | "live" => Ok(MpesaEnvironment::Production),
            other => Err(ProviderError::Configuration(format!(
                "unknown M-Pesa environment {other:?}"
            ))),
        }
    }
}

/// M-Pesa credentials and endpoints.
#[derive(Debug, Clone)]
pub struct MpesaConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub shortcode: String,
    pub passkey: String,
    pub callback_url: String,
    /// Shared secret appended to the callback URL as `?token=`.
    pub callback_token: Option<String>,
    pub environment: MpesaEnvironment,
    /// Overrides the environment's base URL.
    pub base_url: Option<String>,
}

impl MpesaConfig {
    fn api_base(&self) -> String {
        self.base_url
            .as_deref()
            .unwrap_or(self.environment.base_url())
            .trim_end_matches('/')
            .to_string()
    }

    /// The callback URL registered with the gateway, token included.
    pub fn callback_url_with_token(&self) -> String {
        match &self.callback_token {
            Some(token) => {
                let separator = if self.callback_url.contains('?') { '&' } else { '?' };
                format!("{}{}token={}", self.callback_url, separator, token)
            }
            None => self.callback_url.clone(),
        }
    }
}

/// Normalises a Kenyan phone number to `2547XXXXXXXX` form.
pub fn normalize_phone(raw: &str) -> Result<String, ProviderError> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    let normalized = if let Some(rest) = digits.strip_prefix('0') {
        format!("254{rest}")
    } else if digits.starts_with("254") {
        digits
    } else {
        format!("254{digits}")
    };

    if normalized.len() != 12 {
        return Err(ProviderError::InvalidRequest(format!(
            "phone number {raw:?} is not a valid M-Pesa number"
        )));
    }
    Ok(normalized)
}

/// STK push timestamp, `YYYYMMDDHHMMSS` in East Africa Time.
fn eat_timestamp() -> String {
    (Utc::now() + chrono::Duration::hours(3))
        .format("%Y%m%d%H%M%S")
        .to_string()
}

#[derive(Debug, Deserialize)]
struct OAuthResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushRequest<'a> {
    business_short_code: &'a str,
    password: String,
    timestamp: String,
    transaction_type: &'static str,
    amount: i64,
    party_a: &'a str,
    party_b: &'a str,
    phone_number: &'a str,
    #[serde(rename = "CallBackURL")]
    callback_url: String,
    account_reference: String,
    transaction_desc: String,
}

#[derive(Debug, Default, Deserialize)]
struct StkPushResponse {
    #[serde(rename = "ResponseCode", default)]
    response_code: Option<String>,
    #[serde(rename = "ResponseDescription", default)]
    response_description: Option<String>,
    #[serde(rename = "CheckoutRequestID", default)]
    checkout_request_id: Option<String>,
    #[serde(rename = "MerchantRequestID", default)]
    merchant_request_id: Option<String>,
    #[serde(rename = "CustomerMessage", default)]
    customer_message: Option<String>,
    #[serde(rename = "errorMessage", default)]
    error_message: Option<String>,
}

/// Adapter for the M-Pesa Daraja STK push API.
#[derive(Debug)]
pub struct MpesaAdapter {
    config: MpesaConfig,
    client: reqwest::Client,
    tokens: TokenCache,
}

impl MpesaAdapter {
    pub fn new(config: MpesaConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::Configuration(e.to_string()))?;
        Ok(Self::with_client(config, client))
    }

    pub fn with_client(config: MpesaConfig, client: reqwest::Client) -> Self {
        Self {
            config,
            client,
            tokens: TokenCache::new(),
        }
    }

    async fn fetch_token(&self) -> Result<(String, Duration), ProviderError> {
        let response = self
            .client
            .get(format!(
                "{}/oauth/v1/generate?grant_type=client_credentials",
                self.config.api_base()
            ))
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::BAD_REQUEST
        {
            return Err(ProviderError::Authentication(format!(
                "OAuth endpoint returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(ProviderError::Unavailable(format!(
                "OAuth endpoint returned {status}"
            )));
        }

        let body: OAuthResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("malformed OAuth response: {e}")))?;
        // Daraja sends expires_in as a string.
        let expires_in = body.expires_in.and_then(|v| match v {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        });
        Ok((body.access_token, TokenCache::lifetime(expires_in)))
    }

    async fn access_token(&self) -> Result<String, ProviderError> {
        self.tokens.get_or_refresh(|| self.fetch_token()).await
    }

    async fn send_stk_push(
        &self,
        token: &str,
        body: &StkPushRequest<'_>,
    ) -> Result<reqwest::Response, ProviderError> {
        self.client
            .post(format!(
                "{}/mpesa/stkpush/v1/processrequest",
                self.config.api_base()
            ))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl ProviderAdapter for MpesaAdapter {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Mpesa
    }

    #[tracing::instrument(skip(self, request), fields(payment_id = %request.payment_id, order_id = %request.order_id))]
    async fn initiate(&self, request: &PaymentRequest) -> Result<InitiatedPayment, ProviderError> {
        let raw_phone = request
            .phone_number
            .as_deref()
            .ok_or_else(|| ProviderError::InvalidRequest("phone number is required".into()))?;
        let phone = normalize_phone(raw_phone)?;

        let amount = request.amount.round_to_major();
        if amount < 1 {
            return Err(ProviderError::InvalidRequest(format!(
                "amount {} rounds to less than 1",
                request.amount
            )));
        }

        let timestamp = eat_timestamp();
        let password = BASE64.encode(format!(
            "{}{}{}",
            self.config.shortcode, self.config.passkey, timestamp
        ));
        let body = StkPushRequest {
            business_short_code: &self.config.shortcode,
            password,
            timestamp,
            transaction_type: "CustomerPayBillOnline",
            amount,
            party_a: &phone,
            party_b: &self.config.shortcode,
            phone_number: &phone,
            callback_url: self.config.callback_url_with_token(),
            account_reference: format!("ORDER-{}", request.order_id),
            transaction_desc: format!("Payment for order {}", request.order_id),
        };

        let token = self.access_token().await?;
        let mut response = self.send_stk_push(&token, &body).await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            tracing::warn!("M-Pesa rejected cached access token, refreshing");
            self.tokens.invalidate().await;
            let token = self.access_token().await?;
            response = self.send_stk_push(&token, &body).await?;
        }

        let status = response.status();
        if status.is_server_error() {
            return Err(ProviderError::Unavailable(format!(
                "STK push returned {status}"
            )));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
            return Err(ProviderError::Authentication(
                "STK push rejected the access token".into(),
            ));
        }
        let parsed: StkPushResponse = response.json().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ProviderError::Rejected(
                parsed
                    .error_message
                    .unwrap_or_else(|| format!("STK push returned {status}")),
            ));
        }
        if parsed.response_code.as_deref() != Some("0") {
            return Err(ProviderError::Rejected(
                parsed
                    .response_description
                    .or(parsed.error_message)
                    .unwrap_or_else(|| "STK push was not accepted".into()),
            ));
        }
        let checkout_request_id = parsed.checkout_request_id.ok_or_else(|| {
            ProviderError::Rejected("STK push response has no CheckoutRequestID".into())
        })?;

        tracing::info!(checkout_request_id = %checkout_request_id, "STK push accepted");
        Ok(InitiatedPayment {
            external_reference: checkout_request_id.clone(),
            client_token: Some(checkout_request_id),
            metadata: json!({
                "merchant_request_id": parsed.merchant_request_id,
                "customer_message": parsed.customer_message,
                "phone_number": phone,
            }),
        })
    }

    fn verify_callback(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<Option<CallbackEvent>, ProviderError> {
        if let Some(expected) = &self.config.callback_token {
            let provided = signature.unwrap_or_default();
            if !constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
                return Err(ProviderError::InvalidSignature(
                    "callback token mismatch".into(),
                ));
            }
        }

        let body: Value = serde_json::from_slice(payload)
            .map_err(|e| ProviderError::MalformedPayload(e.to_string()))?;
        let callback = body
            .pointer("/Body/stkCallback")
            .ok_or_else(|| ProviderError::MalformedPayload("missing Body.stkCallback".into()))?;

        let checkout_request_id = callback
            .get("CheckoutRequestID")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::MalformedPayload("missing CheckoutRequestID".into()))?
            .to_string();
        let result_code = callback
            .get("ResultCode")
            .and_then(|code| match code {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.parse().ok(),
                _ => None,
            })
            .ok_or_else(|| ProviderError::MalformedPayload("missing ResultCode".into()))?;

        let outcome = if result_code == 0 {
            let receipt = callback
                .pointer("/CallbackMetadata/Item")
                .and_then(Value::as_array)
                .and_then(|items| {
                    items.iter().find(|item| {
                        item.get("Name").and_then(Value::as_str) == Some("MpesaReceiptNumber")
                    })
                })
                .and_then(|item| item.get("Value"))
                .and_then(|value| match value {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                });
            CallbackOutcome::Succeeded {
                transaction_id: receipt,
            }
        } else {
            CallbackOutcome::Failed {
                reason: callback
                    .get("ResultDesc")
                    .and_then(Value::as_str)
                    .unwrap_or("payment failed")
                    .to_string(),
            }
        };

        Ok(Some(CallbackEvent {
            external_reference: checkout_request_id,
            outcome,
            payload: body,
        }))
    }
}

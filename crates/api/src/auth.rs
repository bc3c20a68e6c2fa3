//! Bearer token authentication and the internal-caller guard.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use common::UserId;
use saga::SagaError;
use saga::services::INTERNAL_TOKEN_HEADER;
use serde::{Deserialize, Serialize};
use store::Store;

use crate::config::StaticToken;
use crate::error::ApiError;
use crate::state::AppState;

/// The caller a bearer token belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub id: UserId,
    #[serde(default)]
    pub role: String,
}

/// Resolves bearer tokens to users.
#[async_trait]
pub trait AuthVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<AuthenticatedUser, ApiError>;
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    user: AuthenticatedUser,
}

/// Verifies tokens with the auth service (`POST {base}/api/verify`).
#[derive(Debug, Clone)]
pub struct HttpAuthVerifier {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAuthVerifier {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ApiError::Internal(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl AuthVerifier for HttpAuthVerifier {
    async fn verify(&self, token: &str) -> Result<AuthenticatedUser, ApiError> {
        let response = self
            .client
            .post(format!("{}/api/verify", self.base_url))
            .bearer_auth(token)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| {
                ApiError::Saga(SagaError::UpstreamUnavailable(format!("auth service: {e}")))
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ApiError::Saga(SagaError::UpstreamUnavailable(format!(
                "auth service returned {status}"
            ))));
        }
        if !status.is_success() {
            return Err(ApiError::Unauthorized("Invalid token".to_string()));
        }

        let body: VerifyResponse = response.json().await.map_err(|e| {
            tracing::warn!(error = %e, "unreadable auth service response");
            ApiError::Unauthorized("Invalid token".to_string())
        })?;
        Ok(body.user)
    }
}

/// A fixed token table, for tests and local runs without an auth service.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, AuthenticatedUser>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, id: UserId, role: impl Into<String>) -> Self {
        self.tokens.insert(
            token.into(),
            AuthenticatedUser {
                id,
                role: role.into(),
            },
        );
        self
    }

    pub fn from_tokens(tokens: &[StaticToken]) -> Self {
        tokens.iter().fold(Self::new(), |verifier, entry| {
            verifier.with_token(entry.token.clone(), entry.user_id, entry.role.clone())
        })
    }
}

#[async_trait]
impl AuthVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<AuthenticatedUser, ApiError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| ApiError::Unauthorized("Invalid token".to_string()))
    }
}

/// Extractor for the authenticated caller of a customer-facing route.
#[derive(Debug, Clone)]
pub struct AuthUser(pub AuthenticatedUser);

impl<S: Store> FromRequestParts<Arc<AppState<S>>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState<S>>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("No token provided".to_string()))?
            .to_string();

        let user = state.auth.verify(&token).await?;
        Ok(AuthUser(user))
    }
}

/// Extractor that admits a request to `/internal/*` routes.
///
/// When an internal token is configured the request must carry it in
/// `x-internal-token`; otherwise every caller is admitted.
#[derive(Debug, Clone, Copy)]
pub struct InternalCaller;

impl<S: Store> FromRequestParts<Arc<AppState<S>>> for InternalCaller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState<S>>,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = &state.internal_token else {
            return Ok(InternalCaller);
        };
        match parts
            .headers
            .get(INTERNAL_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            Some(provided) if provided == expected => Ok(InternalCaller),
            Some(_) => Err(ApiError::Forbidden("Invalid internal token".to_string())),
            None => Err(ApiError::Unauthorized(
                "Internal token required".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_static_verifier() {
        let user = UserId::new();
        let verifier = StaticTokenVerifier::new().with_token("t1", user, "customer");

        assert_eq!(verifier.verify("t1").await.unwrap().id, user);
        assert!(matches!(
            verifier.verify("t2").await,
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_http_verifier_accepts_valid_token() {
        let server = MockServer::start_async().await;
        let user = UserId::new();
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/verify")
                    .header("authorization", "Bearer good");
                then.status(200).json_body(json!({
                    "user": {"id": user.to_string(), "role": "customer", "email": "a@b.c"}
                }));
            })
            .await;

        let verifier = HttpAuthVerifier::new(server.base_url()).unwrap();
        let verified = verifier.verify("good").await.unwrap();

        mock.assert_async().await;
        assert_eq!(verified.id, user);
        assert_eq!(verified.role, "customer");
    }

    #[tokio::test]
    async fn test_http_verifier_rejects_and_reports_outages() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/verify")
                    .header("authorization", "Bearer bad");
                then.status(401).json_body(json!({"error": "Invalid token"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/verify")
                    .header("authorization", "Bearer any");
                then.status(502);
            })
            .await;

        let verifier = HttpAuthVerifier::new(server.base_url()).unwrap();
        assert!(matches!(
            verifier.verify("bad").await,
            Err(ApiError::Unauthorized(_))
        ));
        assert!(matches!(
            verifier.verify("any").await,
            Err(ApiError::Saga(SagaError::UpstreamUnavailable(_)))
        ));
    }
}

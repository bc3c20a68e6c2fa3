//! API error types with HTTP response mapping.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::SagaError;
use serde_json::{Value, json};

/// API-level error type that maps to HTTP responses.
///
/// Every variant renders as `{"error": ..., "code": ..., "details"?: ...}`.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request from the client.
    BadRequest(String),
    /// Missing or invalid credentials.
    Unauthorized(String),
    /// Valid credentials without access to the resource.
    Forbidden(String),
    /// Resource not found.
    NotFound(String),
    /// Error from the order or payment saga.
    Saga(SagaError),
    /// Internal server error.
    Internal(String),
}

impl ApiError {
    fn parts(self) -> (StatusCode, &'static str, String, Option<Value>) {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, None),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg, None),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg, None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
            ApiError::Saga(err) => saga_error_parts(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Internal server error".to_string(),
                    None,
                )
            }
        }
    }
}

fn saga_error_parts(err: SagaError) -> (StatusCode, &'static str, String, Option<Value>) {
    match err {
        SagaError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg, None),
        SagaError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
        SagaError::InsufficientStock(shortfalls) => (
            StatusCode::BAD_REQUEST,
            "INSUFFICIENT_STOCK",
            "Insufficient stock".to_string(),
            Some(json!(shortfalls)),
        ),
        SagaError::InvalidTransition(msg) => {
            (StatusCode::BAD_REQUEST, "INVALID_TRANSITION", msg, None)
        }
        SagaError::UpstreamUnavailable(msg) => {
            tracing::warn!(error = %msg, "upstream service unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "UPSTREAM_UNAVAILABLE",
                "A required service is unavailable".to_string(),
                None,
            )
        }
        SagaError::ProviderRejected(msg) => (
            StatusCode::BAD_REQUEST,
            "PROVIDER_REJECTED",
            "Payment provider rejected the request".to_string(),
            Some(json!(msg)),
        ),
        err @ (SagaError::Store(_) | SagaError::Internal(_)) => {
            tracing::error!(error = %err, "internal server error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Internal server error".to_string(),
                None,
            )
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = self.parts();
        let mut body = json!({ "error": message, "code": code });
        if let Some(details) = details {
            body["details"] = details;
        }
        (status, axum::Json(body)).into_response()
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::ProductId;
    use saga::StockShortfall;

    async fn render(err: ApiError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_insufficient_stock_carries_details() {
        let (status, body) = render(ApiError::Saga(SagaError::InsufficientStock(vec![
            StockShortfall {
                product_id: ProductId::new("P"),
                requested: 3,
                available: 1,
            },
        ])))
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INSUFFICIENT_STOCK");
        assert_eq!(body["details"][0]["product_id"], "P");
        assert_eq!(body["details"][0]["available"], 1);
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let cases = [
            (SagaError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (SagaError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (SagaError::InvalidTransition("x".into()), StatusCode::BAD_REQUEST),
            (
                SagaError::UpstreamUnavailable("x".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (SagaError::ProviderRejected("x".into()), StatusCode::BAD_REQUEST),
            (
                SagaError::Internal("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            let (status, _) = render(err.into()).await;
            assert_eq!(status, expected);
        }
    }

    #[tokio::test]
    async fn test_internal_details_are_hidden() {
        let (status, body) = render(ApiError::Saga(SagaError::Internal(
            "connection refused to 10.0.0.5".into(),
        )))
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error");
        assert!(body.get("details").is_none());
    }
}

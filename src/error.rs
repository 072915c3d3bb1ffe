// src/error.rs

use axum::{
    body::Body,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Every client-visible and fatal-startup failure path, mapped to the exact status
/// and body text the proxy contract requires. Client-facing variants produce literal
/// `text/plain` bodies, not a JSON envelope.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("proxy error: {0}")]
    OriginUnreachable(String),

    #[error("proxy error: conditional request failed")]
    RevalidationFailed,

    #[error("origin response too large")]
    ResponseTooLarge,

    #[error("proxy error: unknown origin")]
    UnknownOrigin,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to bind listener: {0}")]
    BindFailed(std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::OriginUnreachable(reason) => (
                StatusCode::BAD_GATEWAY,
                format!("Proxy error: {reason}"),
            ),
            AppError::RevalidationFailed => (
                StatusCode::BAD_GATEWAY,
                "Proxy error: conditional request failed".to_string(),
            ),
            AppError::ResponseTooLarge => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "Origin response too large".to_string(),
            ),
            AppError::UnknownOrigin => (
                StatusCode::BAD_GATEWAY,
                "Proxy error: unknown origin".to_string(),
            ),
            AppError::Config(_) | AppError::BindFailed(_) | AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        Response::builder()
            .status(status)
            .header(axum::http::header::CONTENT_TYPE, "text/plain")
            .body(Body::from(body))
            .unwrap_or_else(|_| status.into_response())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn check(error: AppError, expected_status: StatusCode, expected_body: &str) {
        let response = error.into_response();
        assert_eq!(response.status(), expected_status);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(std::str::from_utf8(&bytes).unwrap(), expected_body);
    }

    #[tokio::test]
    async fn origin_unreachable_is_502() {
        check(
            AppError::OriginUnreachable("connection refused".into()),
            StatusCode::BAD_GATEWAY,
            "Proxy error: connection refused",
        )
        .await;
    }

    #[tokio::test]
    async fn revalidation_failed_is_502_with_fixed_body() {
        check(
            AppError::RevalidationFailed,
            StatusCode::BAD_GATEWAY,
            "Proxy error: conditional request failed",
        )
        .await;
    }

    #[tokio::test]
    async fn response_too_large_is_413() {
        check(
            AppError::ResponseTooLarge,
            StatusCode::PAYLOAD_TOO_LARGE,
            "Origin response too large",
        )
        .await;
    }

    #[tokio::test]
    async fn unknown_origin_is_502() {
        check(
            AppError::UnknownOrigin,
            StatusCode::BAD_GATEWAY,
            "Proxy error: unknown origin",
        )
        .await;
    }

    #[tokio::test]
    async fn internal_errors_are_500_and_do_not_leak_detail() {
        check(
            AppError::Internal("sensitive detail".into()),
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error",
        )
        .await;
    }
}

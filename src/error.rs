//! Error taxonomy. Every component maps its native failures into `ApiError`
//! at its boundary; the axum layer turns them into status codes and a
//! structured `{detail}` body. 5xx responses carry a correlation id that is
//! also attached to the log line.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("authentication required")]
    Unauthorized,
    #[error("insufficient permissions")]
    Forbidden,
    #[error("resource not found")]
    NotFound,
    #[error("{0}")]
    Conflict(String),
    #[error("service temporarily unavailable")]
    Transient(#[source] sqlx::Error),
    #[error("internal error")]
    Fatal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation",
            ApiError::Unauthorized => "unauthorized",
            ApiError::Forbidden => "forbidden",
            ApiError::NotFound => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::Transient(_) => "transient",
            ApiError::Fatal(_) => "fatal",
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => ApiError::NotFound,
            other => ApiError::Transient(other),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();
        let correlation_id = if status.is_server_error() {
            Some(Uuid::new_v4().to_string())
        } else {
            None
        };

        // Validation problems never log above INFO; server faults log the
        // underlying cause, which stays out of the response body.
        match &self {
            ApiError::Validation(detail) => info!(kind, detail = %detail, "request_rejected"),
            ApiError::Unauthorized | ApiError::Forbidden | ApiError::NotFound => {
                info!(kind, "request_rejected")
            }
            ApiError::Conflict(detail) => info!(kind, detail = %detail, "request_conflict"),
            ApiError::Transient(source) => warn!(
                kind,
                correlation_id = correlation_id.as_deref().unwrap_or(""),
                error = %source,
                "request_failed_transient"
            ),
            ApiError::Fatal(detail) => error!(
                kind,
                correlation_id = correlation_id.as_deref().unwrap_or(""),
                detail = %detail,
                "request_failed_fatal"
            ),
        }

        let body = ErrorBody { detail: self.to_string(), correlation_id };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(ApiError::Validation("x".into()).status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::Conflict("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::Fatal("x".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn row_not_found_maps_to_404() {
        let e: ApiError = sqlx::Error::RowNotFound.into();
        assert_eq!(e.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn auth_errors_do_not_leak_detail() {
        // Generic messages only; no role or resource disclosure.
        assert_eq!(ApiError::Unauthorized.to_string(), "authentication required");
        assert_eq!(ApiError::Forbidden.to_string(), "insufficient permissions");
        assert_eq!(ApiError::NotFound.to_string(), "resource not found");
    }

    #[test]
    fn fatal_detail_stays_out_of_body() {
        let e = ApiError::Fatal("hash chain mismatch at row 42".into());
        // The response detail is the generic display string.
        assert_eq!(e.to_string(), "internal error");
    }
}

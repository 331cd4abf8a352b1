use crate::disposition::UnknownDisposition;
use crate::handler::middleware::request_log::SyncTrace;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::DbErr;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Failures surfaced to webhook and form callers.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error(transparent)]
    UnknownDisposition(#[from] UnknownDisposition),
    #[error("contact {0} not found in CRM")]
    UnknownContact(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("{step} failed: {source:#}")]
    Upstream {
        step: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

impl SyncError {
    pub fn upstream(step: &'static str, source: anyhow::Error) -> Self {
        SyncError::Upstream { step, source }
    }

    /// Short label for the access log.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::MissingField(_) => "missing_field",
            SyncError::InvalidPayload(_) => "invalid_payload",
            SyncError::UnknownDisposition(_) => "unknown_disposition",
            SyncError::UnknownContact(_) => "unknown_contact",
            SyncError::NotFound(_) => "not_found",
            SyncError::NotConfigured(_) => "not_configured",
            SyncError::Upstream { .. } => "upstream",
            SyncError::Database(_) => "database",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            SyncError::MissingField(_)
            | SyncError::InvalidPayload(_)
            | SyncError::UnknownDisposition(_) => StatusCode::BAD_REQUEST,
            SyncError::UnknownContact(_) | SyncError::NotFound(_) => StatusCode::NOT_FOUND,
            SyncError::NotConfigured(_) | SyncError::Upstream { .. } | SyncError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Unwraps a side effect whose failure must not abort the request. Failures
/// are logged and recorded in `warnings` for the response body.
pub fn best_effort<T>(step: &str, result: anyhow::Result<T>, warnings: &mut Vec<String>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(step, "best-effort step failed: {:#}", e);
            warnings.push(format!("{} failed: {:#}", step, e));
            None
        }
    }
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(status = status.as_u16(), "request failed: {}", self);
        }
        let mut response = (
            status,
            Json(json!({ "success": false, "error": self.to_string() })),
        )
            .into_response();
        response.extensions_mut().insert(SyncTrace::new(self.kind()));
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            SyncError::MissingField("extern_id").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            SyncError::UnknownContact("42".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            SyncError::NotConfigured("crm").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        let err = SyncError::upstream("call log write", anyhow::anyhow!("HTTP 502"));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "call log write failed: HTTP 502");
    }

    #[test]
    fn test_error_response_carries_trace() {
        let response = SyncError::MissingField("call_id").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.extensions().get::<SyncTrace>(),
            Some(&SyncTrace::new("missing_field"))
        );

        let response = SyncError::upstream("contact lookup", anyhow::anyhow!("HTTP 503")).into_response();
        assert_eq!(
            response.extensions().get::<SyncTrace>().map(|t| t.outcome),
            Some("upstream")
        );
    }

    #[test]
    fn test_best_effort_collects_warnings() {
        let mut warnings = Vec::new();
        assert_eq!(best_effort("note", Ok(7), &mut warnings), Some(7));
        assert!(warnings.is_empty());
        let failed: Option<()> = best_effort("note", Err(anyhow::anyhow!("HTTP 400")), &mut warnings);
        assert!(failed.is_none());
        assert_eq!(warnings, vec!["note failed: HTTP 400".to_string()]);
    }
}

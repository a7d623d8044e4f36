use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Failure modes callers of the core can act on.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("no data: {0}")]
    NoData(String),
    #[error("invalid rule: {0}")]
    InvalidRule(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::DeviceNotFound(_) => Self::not_found(err.to_string()),
            CoreError::InvalidRule(_) => Self::bad_request(err.to_string()),
            CoreError::NoData(_) => Self::new(StatusCode::UNPROCESSABLE_ENTITY, err.to_string()),
            CoreError::Store(err) => {
                tracing::error!("store failure: {err:#}");
                Self::internal("Internal server error")
            }
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_http_statuses() {
        let cases = [
            (CoreError::DeviceNotFound("gen-9".into()), StatusCode::NOT_FOUND),
            (CoreError::InvalidRule("min > max".into()), StatusCode::BAD_REQUEST),
            (CoreError::NoData("no fuel".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (
                CoreError::Store(anyhow::anyhow!("connection refused")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }

    #[test]
    fn store_failures_do_not_leak_details() {
        let err = AppError::from(CoreError::Store(anyhow::anyhow!("password=hunter2")));
        assert_eq!(err.message, "Internal server error");
    }
}

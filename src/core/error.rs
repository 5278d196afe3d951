use axum::{http::StatusCode, response::IntoResponse, Json};
use log::error;

use crate::channels::ChannelError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{message}")]
    Custom { message: String, status: StatusCode },
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("Connection error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Generic error carrying its own status code.
    pub fn new(message: impl Into<String>, status: StatusCode) -> Self {
        Self::Custom {
            message: message.into(),
            status,
        }
    }

    pub fn not_found(code: &str) -> Self {
        Self::NotFound(code.to_string())
    }

    pub fn bad_request(code: &str) -> Self {
        Self::BadRequest(code.to_string())
    }

    pub fn forbidden(code: &str) -> Self {
        Self::Forbidden(code.to_string())
    }

    pub fn conflict(code: &str) -> Self {
        Self::Conflict(code.to_string())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Custom { status, .. } => *status,
            Self::Database(diesel::result::Error::NotFound) => StatusCode::NOT_FOUND,
            Self::Channel(_) => StatusCode::BAD_GATEWAY,
            Self::Database(_) | Self::Pool(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let message = match &self {
            Self::Database(diesel::result::Error::NotFound) => "ERR_NOT_FOUND".to_string(),
            Self::Database(e) => {
                error!("Database error: {e}");
                "ERR_INTERNAL".to_string()
            }
            Self::Pool(e) => {
                error!("Failed to get database connection: {e}");
                "ERR_INTERNAL".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_error_keeps_status() {
        let err = AppError::new("ERR_SOMETHING", StatusCode::PAYMENT_REQUIRED);
        assert_eq!(err.status_code(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(err.to_string(), "ERR_SOMETHING");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::not_found("ERR_NO_TICKET_FOUND").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::conflict("ERR_OTHER_OPEN_TICKET").status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::Database(diesel::result::Error::NotFound).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Channel(ChannelError::Unsupported("sms".into())).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_internal_details_not_leaked() {
        let response = AppError::Database(diesel::result::Error::RollbackTransaction)
            .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::error;

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("unknown job type: {0}")]
    UnknownJobType(String),

    #[error("no teams configured")]
    NoTeamsConfigured,

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("team not found: {0}")]
    TeamNotFound(String),

    #[error("job {0} is already {1}")]
    AlreadyTerminal(String, &'static str),

    #[error("job {0} is not running")]
    JobNotRunning(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("authentication required")]
    Unauthorized,

    #[error("insufficient permissions")]
    Forbidden,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnknownJobType(_)
            | Self::NoTeamsConfigured
            | Self::JobNotFound(_)
            | Self::TeamNotFound(_) => StatusCode::NOT_FOUND,
            Self::AlreadyTerminal(..) | Self::JobNotRunning(_) | Self::Conflict(_) => {
                StatusCode::CONFLICT
            }
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Database(_) | Self::Migration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Migration(_))
    }
}

macro_rules! rejection_as_invalid_input {
    ($($rejection:ty),*) => {
        $(impl From<$rejection> for ServiceError {
            fn from(rejection: $rejection) -> Self {
                Self::InvalidInput(rejection.body_text())
            }
        })*
    };
}

rejection_as_invalid_input!(JsonRejection, QueryRejection, PathRejection);

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let message = if self.is_internal() {
            error!(error = %self, "request failed");
            "internal error".to_string()
        } else {
            self.to_string()
        };
        let body = Json(serde_json::json!({"status": "error", "message": message}));
        (self.status(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_taxonomy_to_status_codes() {
        assert_eq!(
            ServiceError::NoTeamsConfigured.status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::AlreadyTerminal("j".into(), "complete").status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::InvalidInput("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::Database(sqlx::Error::RowNotFound).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_errors_are_not_leaked() {
        assert!(ServiceError::Database(sqlx::Error::PoolTimedOut).is_internal());
        assert!(!ServiceError::Forbidden.is_internal());
    }
}

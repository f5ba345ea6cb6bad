//! Central error taxonomy and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("invalid or expired token")]
    InvalidToken,

    #[error("token expired")]
    ExpiredToken,

    #[error("invalid username or password")]
    BadCredentials,

    #[error("rate limited, retry after {0}s")]
    RateLimited(u64),

    #[error("manually blocked, retry after {0}s")]
    ManuallyBlocked(u64),

    #[error("policy database unavailable")]
    PolicyDbUnavailable,

    #[error("shared counter store unavailable")]
    KvUnavailable,

    #[error("data store error: {0}")]
    DataDbError(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidToken | AppError::ExpiredToken | AppError::BadCredentials => {
                StatusCode::UNAUTHORIZED
            }
            AppError::RateLimited(_) | AppError::ManuallyBlocked(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::PolicyDbUnavailable | AppError::KvUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::DataDbError(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable, user-facing detail string. Always mentions remaining seconds for blocks.
    pub fn detail(&self) -> String {
        match self {
            AppError::RateLimited(secs) => format!("rate limit exceeded, retry in {secs}s"),
            AppError::ManuallyBlocked(secs) => format!("account blocked, retry in {secs}s"),
            other => other.to_string(),
        }
    }
}

#[derive(Serialize)]
struct AuthErrorBody {
    detail: String,
}

#[derive(Serialize)]
struct DataErrorBody {
    success: bool,
    error: String,
    details: String,
    execution_time: f64,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        tracing::warn!(error = %self, status = %status, "request failed");

        // Data-store errors use the tabular response envelope; everything else uses a
        // plain `{detail}` body, matching the original FastAPI HTTPException shape.
        match &self {
            AppError::DataDbError(details) => {
                let body = DataErrorBody {
                    success: false,
                    error: "internal error".to_string(),
                    details: details.clone(),
                    execution_time: 0.0,
                };
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
            _ => {
                let body = AuthErrorBody {
                    detail: self.detail(),
                };
                (status, Json(body)).into_response()
            }
        }
    }
}

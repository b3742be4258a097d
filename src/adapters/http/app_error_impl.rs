use crate::app_error::{AppError, ErrorCode};
use axum::Json;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() {
            tracing::error!(error = ?self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        let code = self.code();
        let message = match self {
            AppError::Validation(msg) | AppError::NotCancelable(msg) | AppError::Conflict(msg) => {
                Some(msg)
            }
            AppError::InsufficientCredits { .. } | AppError::AlreadySubscribed => {
                Some(self.to_string())
            }
            // Gateway, database and signature details stay in the logs.
            _ => None,
        };

        error_resp(status, code, message)
    }
}

fn status_for(error: &AppError) -> StatusCode {
    match error {
        AppError::Validation(_) | AppError::Signature(_) => StatusCode::BAD_REQUEST,
        AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
        AppError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
        AppError::Forbidden => StatusCode::FORBIDDEN,
        AppError::NotFound => StatusCode::NOT_FOUND,
        AppError::AlreadySubscribed | AppError::NotCancelable(_) | AppError::Conflict(_) => {
            StatusCode::CONFLICT
        }
        AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        AppError::ExternalGateway(_) => StatusCode::BAD_GATEWAY,
        AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_resp(status: StatusCode, code: ErrorCode, message: Option<String>) -> Response {
    let body = match message {
        Some(msg) => serde_json::json!({ "code": code.as_str(), "message": msg }),
        None => serde_json::json!({ "code": code.as_str() }),
    };
    (status, Json(body)).into_response()
}

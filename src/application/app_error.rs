use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Too many requests. Please slow down.")]
    RateLimited,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Forbidden")]
    Forbidden,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found")]
    NotFound,

    #[error("Account already has a subscription")]
    AlreadySubscribed,

    #[error("Nothing to cancel or resume: {0}")]
    NotCancelable(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Insufficient credits: requested {requested}, available {available}")]
    InsufficientCredits { requested: i64, available: i64 },

    #[error("Payment gateway error: {0}")]
    ExternalGateway(String),

    #[error("Signature verification failed: {0}")]
    Signature(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Transient failures. Webhook senders are told to redeliver.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Database(_) => true,
            AppError::ExternalGateway(_) => true,
            AppError::Internal(_) => true,
            AppError::RateLimited => true,

            AppError::InvalidCredentials => false,
            AppError::Forbidden => false,
            AppError::Validation(_) => false,
            AppError::NotFound => false,
            AppError::AlreadySubscribed => false,
            AppError::NotCancelable(_) => false,
            AppError::Conflict(_) => false,
            AppError::InsufficientCredits { .. } => false,
            AppError::Signature(_) => false,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::RateLimited => ErrorCode::RateLimited,
            AppError::InvalidCredentials => ErrorCode::InvalidCredentials,
            AppError::Forbidden => ErrorCode::Forbidden,
            AppError::Validation(_) => ErrorCode::ValidationError,
            AppError::NotFound => ErrorCode::NotFound,
            AppError::AlreadySubscribed => ErrorCode::AlreadySubscribed,
            AppError::NotCancelable(_) => ErrorCode::NotCancelable,
            AppError::Conflict(_) => ErrorCode::Conflict,
            AppError::InsufficientCredits { .. } => ErrorCode::InsufficientCredits,
            AppError::ExternalGateway(_) => ErrorCode::ExternalGatewayError,
            AppError::Signature(_) => ErrorCode::SignatureError,
            AppError::Internal(_) => ErrorCode::InternalError,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    DatabaseError,
    InvalidCredentials,
    Forbidden,
    RateLimited,
    ValidationError,
    NotFound,
    AlreadySubscribed,
    NotCancelable,
    Conflict,
    InsufficientCredits,
    ExternalGatewayError,
    SignatureError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::InvalidCredentials => "INVALID_CREDENTIALS",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::AlreadySubscribed => "ALREADY_SUBSCRIBED",
            ErrorCode::NotCancelable => "NOT_CANCELABLE",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::InsufficientCredits => "INSUFFICIENT_CREDITS",
            ErrorCode::ExternalGatewayError => "EXTERNAL_GATEWAY_ERROR",
            ErrorCode::SignatureError => "SIGNATURE_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

use sqlx::PgPool;

use crate::app_error::AppError;

pub mod ledger;

/// Unique index holding the idempotency keys of applied transitions.
pub(crate) const IDEMPOTENCY_KEY_INDEX: &str = "subscription_events_idempotency_key_idx";

#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    pub fn new(pool: PgPool) -> Self {
        PostgresPersistence { pool }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => AppError::NotFound,
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                AppError::Conflict("A record with this value already exists".into())
            }
            sqlx::Error::Database(db_err) if db_err.is_check_violation() => {
                tracing::error!(error = ?err, "Ledger constraint violated");
                AppError::Conflict("Ledger constraint violated".into())
            }
            _ => {
                // Log the actual error for debugging, but don't expose details
                tracing::error!(error = ?err, "Database error");
                AppError::Database("Database operation failed".into())
            }
        }
    }
}

/// Whether `err` is the insert of an idempotency key that is already recorded.
pub(crate) fn is_idempotency_conflict(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err)
            if db_err.is_unique_violation()
                && db_err.constraint() == Some(IDEMPOTENCY_KEY_INDEX)
    )
}

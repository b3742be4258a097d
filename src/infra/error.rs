use thiserror::Error;

/// Failures while bringing the service up. None of these reach an HTTP client.
///
/// Display strings never include connection strings or secrets; the wrapped
/// source errors might, so log these with `%` rather than `?`.
#[derive(Error, Debug)]
pub enum InfraError {
    #[error("could not reach Postgres (check DATABASE_URL)")]
    DatabaseConnection(#[source] sqlx::Error),

    #[error("applying ledger migrations failed")]
    Migration(#[source] sqlx::migrate::MigrateError),

    #[error("could not reach Redis (check REDIS_URL)")]
    RedisConnection(#[source] redis::RedisError),

    #[error("{var} is invalid: {reason}")]
    ConfigInvalid { var: &'static str, reason: String },
}

impl From<sqlx::Error> for InfraError {
    fn from(e: sqlx::Error) -> Self {
        Self::DatabaseConnection(e)
    }
}

impl From<sqlx::migrate::MigrateError> for InfraError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        Self::Migration(e)
    }
}

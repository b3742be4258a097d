pub mod app;
pub mod cache_sweeper;
pub mod config;
pub mod db;
pub mod error;
pub mod rate_limit;
pub mod setup;
pub mod stripe_client;
pub mod stripe_gateway;

pub use error::InfraError;
pub use rate_limit::RateLimiterTrait;

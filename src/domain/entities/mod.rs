pub mod credit_transaction;
pub mod plan;
pub mod snapshot;
pub mod subscription_event;
pub mod subscription_status;

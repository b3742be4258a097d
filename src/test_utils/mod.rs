//! Test utilities.
//!
//! This module provides:
//! - Test data factories for creating valid test fixtures
//! - An in-memory ledger store and a stub payment gateway
//! - `TestAppStateBuilder` for HTTP-level tests

mod app_state_builder;
mod factories;
mod gateway_mocks;
mod ledger_mocks;
mod rate_limit_mocks;

pub use app_state_builder::*;
pub use factories::*;
pub use gateway_mocks::*;
pub use ledger_mocks::*;
pub use rate_limit_mocks::*;

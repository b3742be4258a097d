pub mod ledger;
pub mod reconciler;
pub mod subscription;
pub mod webhook;

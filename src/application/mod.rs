//! Application layer containing the transaction lifecycle orchestration.
//!
//! `TransactionLedger` drives records through the state machine, the
//! `CallbackReconciler` folds asynchronous gateway notifications into the same
//! versioned update path, and `GatewayPlugin` is the host-facing surface that
//! validates raw requests before either of them sees one.

pub mod idempotency;
pub mod ledger;
pub mod plugin;
pub mod reconciler;

//! weightbook-rebalancer: live execution of weight-hierarchy rebalances.
//!
//! Loads an account snapshot from the persistence collaborator, validates its
//! weights, plans per-portfolio trades, nets them into one order per symbol
//! and drives those orders through the market gate in two phases (sells,
//! then buys). Batches can be cancelled, resumed and reconciled; every run
//! leaves a JSONL audit trail.

pub mod audit;
pub mod batch;
pub mod config;
pub mod diff;
pub mod error;
pub mod execution;
pub mod gate;
pub mod lease;
pub mod order;
pub mod reconcile;
pub mod store;

pub use batch::{BatchId, BatchKind, BatchStatus, ExecutionBatch};
pub use error::{Error, Result};
pub use execution::Engine;

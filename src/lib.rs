//! Scanforge - distributed security-scan orchestration (master side)
//!
//! The orchestration kernel that turns declarative scan projects into
//! dispatched agent tasks:
//! - Scheduler loop advancing projects through sequential or DAG workflows
//! - Pluggable target-source providers with whitelist and skip filtering
//! - Pre-dispatch policy enforcement (scope, global whitelist, skip rules)
//! - Load-aware agent selection and at-most-once task dispatch
//! - Result ingestion with a bounded, backpressured ETL queue
//! - SQLite persistence behind repository ports

pub mod adapters;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::{DomainError, DomainResult};

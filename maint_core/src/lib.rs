#![forbid(unsafe_code)]

//! Core domain model and decision logic for bike maintenance tracking.
//!
//! This crate provides:
//! - Domain types (activities, maintenance events, thresholds, alerts)
//! - Threshold registry with load-time validation
//! - Threshold evaluation engine
//! - Ingestion of raw rows with per-record rejection
//! - Local persistence (activity store, maintenance log, alert sinks)

pub mod types;
pub mod error;
pub mod registry;
pub mod config;
pub mod logging;
pub mod ingest;
pub mod engine;
pub mod alert;
pub mod store;
pub mod sink;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use registry::{default_registry, ThresholdRegistry};
pub use config::Config;
pub use ingest::{Ingested, RejectReason, Rejection};
pub use engine::{evaluate, EvaluationContext};
pub use alert::format_digest;
pub use sink::{AlertSink, CsvAlertSink, JsonlAlertSink};

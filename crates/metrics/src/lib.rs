//! Metrics for cairn.
//!
//! Metric names live in one place so every crate records under the same
//! names. Libraries record through the re-exported `metrics` facade macros
//! behind their own `metrics` feature; nothing is exported unless a recorder
//! is installed with [`init_metrics`].
//!
//! ```rust,ignore
//! use cairn_metrics::{counter, replica};
//!
//! counter!(replica::OPS_INTEGRATED_TOTAL).increment(3);
//! ```
//!
//! # Features
//!
//! - `prometheus`: install a Prometheus recorder and render its text format

mod definitions;
mod recorder;

pub use {
    definitions::*,
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};

//! gpuops core: cluster checks for GPU operators.
//!
//! Convergence polling, check aggregation, the health-check suites,
//! version snapshots, log capture, Calico interface cleanup and the Run:ai
//! REST client. The `gpuops` binary in the `cli` crate wires these together.

pub mod api;
pub mod calico;
pub mod check;
pub mod cluster;
pub mod config;
pub mod convergence;
pub mod credentials;
pub mod error;
pub mod infrastructure;
pub mod logs;
pub mod report;
pub mod signal;
pub mod snapshot;
pub mod suites;

pub use error::OpsError;

//! Run:ai REST API access.

pub mod client;

pub use client::{discover_cluster, ApiClient, ApiError, ClusterInfo};

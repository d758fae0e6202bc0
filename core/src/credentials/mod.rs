//! Credential file for the Run:ai REST API.

pub mod store;

pub use store::{Credentials, EnvFile, StoreError};

//! Infrastructure backends for talking to the outside world.
//!
//! Every cluster CLI call (kubectl, helm, runai, ssh) goes through the
//! `CommandRunner` trait so suites can be driven by `MockRunner` in tests.

pub mod runner;

pub use runner::{CommandRunner, Invocation, MockRunner, ProcessRunner, RunError};

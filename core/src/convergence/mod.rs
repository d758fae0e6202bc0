//! Convergence waits: a generic bounded poller and the resource conditions
//! built on top of it.

pub mod conditions;
pub mod poller;

pub use conditions::{ClaimState, Presence};
pub use poller::{poll, poll_observed, poll_with, PollOutcome, PollPolicy};

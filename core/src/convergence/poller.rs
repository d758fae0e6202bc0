//! Bounded convergence polling.
//!
//! A `PollPolicy` caps how many times an external condition is queried and
//! how long to wait between queries. `poll` evaluates a query against a
//! predicate until the predicate holds or the attempt budget runs out, and
//! returns a `PollOutcome` either way. Query failures count as attempts and
//! are treated as "not yet", never as fatal.

use std::fmt::Display;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

// ---------------------------------------------------------------------------
// PollPolicy
// ---------------------------------------------------------------------------

/// How many times to query and how long to sleep between queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl PollPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        PollPolicy {
            max_attempts,
            delay_ms: delay.as_millis() as u64,
        }
    }

    /// A policy that polls without sleeping. Used by tests and dry runs.
    pub fn immediate(max_attempts: u32) -> Self {
        PollPolicy {
            max_attempts,
            delay_ms: 0,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// The advertised upper bound on waiting, `max_attempts * delay`.
    pub fn budget(&self) -> Duration {
        self.delay() * self.max_attempts
    }
}

impl Default for PollPolicy {
    /// Default: 10 attempts, 3s apart.
    fn default() -> Self {
        PollPolicy {
            max_attempts: 10,
            delay_ms: 3000,
        }
    }
}

// ---------------------------------------------------------------------------
// PollOutcome
// ---------------------------------------------------------------------------

/// Result of a polling loop. `satisfied == false` means the condition was
/// not observed within the budget and the caller must treat it as failed.
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome<T> {
    pub satisfied: bool,
    /// Most recent value the query returned successfully.
    pub last_observed: Option<T>,
    pub attempts_used: u32,
    pub elapsed: Duration,
    /// Most recent query error, if any attempt failed.
    pub last_error: Option<String>,
}

impl<T> PollOutcome<T> {
    /// The satisfying value, only when the poll succeeded.
    pub fn value(&self) -> Option<&T> {
        if self.satisfied {
            self.last_observed.as_ref()
        } else {
            None
        }
    }

    pub fn into_value(self) -> Option<T> {
        if self.satisfied {
            self.last_observed
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

/// Query until `predicate` holds or `policy.max_attempts` queries were made,
/// sleeping `policy.delay()` between attempts (never after the last one).
pub fn poll<T, E, Q, P>(policy: &PollPolicy, query: Q, predicate: P) -> PollOutcome<T>
where
    E: Display,
    Q: FnMut() -> Result<T, E>,
    P: Fn(&T) -> bool,
{
    poll_with(policy, query, predicate, std::thread::sleep, |_, _| {})
}

/// Like [`poll`], but every attempt is reported to `observe` as
/// `(attempt_number, result)` before the loop decides whether to continue.
pub fn poll_observed<T, E, Q, P, O>(
    policy: &PollPolicy,
    query: Q,
    predicate: P,
    observe: O,
) -> PollOutcome<T>
where
    E: Display,
    Q: FnMut() -> Result<T, E>,
    P: Fn(&T) -> bool,
    O: FnMut(u32, Result<&T, &E>),
{
    poll_with(policy, query, predicate, std::thread::sleep, observe)
}

/// The polling loop with an injected sleeper.
pub fn poll_with<T, E, Q, P, S, O>(
    policy: &PollPolicy,
    mut query: Q,
    predicate: P,
    mut sleep: S,
    mut observe: O,
) -> PollOutcome<T>
where
    E: Display,
    Q: FnMut() -> Result<T, E>,
    P: Fn(&T) -> bool,
    S: FnMut(Duration),
    O: FnMut(u32, Result<&T, &E>),
{
    let started = Instant::now();
    let mut last_observed = None;
    let mut last_error = None;
    let mut attempts: u32 = 0;

    while attempts < policy.max_attempts {
        if attempts > 0 {
            sleep(policy.delay());
        }
        attempts += 1;

        match query() {
            Ok(value) => {
                let done = predicate(&value);
                observe(attempts, Ok(&value));
                last_observed = Some(value);
                if done {
                    debug!(attempts, "poll satisfied");
                    return PollOutcome {
                        satisfied: true,
                        last_observed,
                        attempts_used: attempts,
                        elapsed: started.elapsed(),
                        last_error,
                    };
                }
            }
            Err(e) => {
                debug!(attempt = attempts, error = %e, "poll query failed");
                observe(attempts, Err(&e));
                last_error = Some(e.to_string());
            }
        }
    }

    debug!(attempts, "poll budget exhausted");
    PollOutcome {
        satisfied: false,
        last_observed,
        attempts_used: attempts,
        elapsed: started.elapsed(),
        last_error,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Verdict computation over an ordered sequence of check statuses.
//!
//! `Strict` fails on any Fail and warns on any Warn. `Threshold` scores
//! only Pass and Fail results and passes when the pass rate reaches the
//! configured percentage; a passing rate with failures or warnings present
//! is reported as Warn.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::CheckStatus;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Warn,
    Fail,
}

impl Verdict {
    /// Warn is still a successful run.
    pub fn is_success(&self) -> bool {
        !matches!(self, Verdict::Fail)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => write!(f, "PASSED"),
            Verdict::Warn => write!(f, "PASSED WITH WARNINGS"),
            Verdict::Fail => write!(f, "FAILED"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum PassPolicy {
    Strict,
    Threshold { percent: u8 },
}

impl Default for PassPolicy {
    fn default() -> Self {
        PassPolicy::Strict
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tally {
    pub passed: usize,
    pub failed: usize,
    pub warnings: usize,
    pub info: usize,
}

impl Tally {
    pub fn count(statuses: &[CheckStatus]) -> Self {
        let mut t = Tally::default();
        for s in statuses {
            match s {
                CheckStatus::Pass => t.passed += 1,
                CheckStatus::Fail => t.failed += 1,
                CheckStatus::Warn => t.warnings += 1,
                CheckStatus::Info => t.info += 1,
            }
        }
        t
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.warnings + self.info
    }

    /// Results that count toward a pass rate.
    pub fn scored(&self) -> usize {
        self.passed + self.failed
    }

    /// Pass rate in percent, `None` when nothing was scored.
    pub fn pass_rate(&self) -> Option<f64> {
        if self.scored() == 0 {
            None
        } else {
            Some(self.passed as f64 * 100.0 / self.scored() as f64)
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Summary {
    pub tally: Tally,
    pub verdict: Verdict,
    pub policy: PassPolicy,
}

pub fn summarize(statuses: &[CheckStatus], policy: PassPolicy) -> Summary {
    let tally = Tally::count(statuses);
    let verdict = match policy {
        PassPolicy::Strict => strict_verdict(&tally),
        PassPolicy::Threshold { percent } => threshold_verdict(&tally, percent),
    };
    Summary {
        tally,
        verdict,
        policy,
    }
}

fn strict_verdict(t: &Tally) -> Verdict {
    if t.failed > 0 {
        Verdict::Fail
    } else if t.warnings > 0 {
        Verdict::Warn
    } else {
        Verdict::Pass
    }
}

fn threshold_verdict(t: &Tally, percent: u8) -> Verdict {
    let scored = t.scored();
    if scored == 0 {
        return if t.warnings > 0 {
            Verdict::Warn
        } else {
            Verdict::Pass
        };
    }
    // passed / scored < percent / 100
    if t.passed * 100 < scored * percent as usize {
        Verdict::Fail
    } else if t.failed > 0 || t.warnings > 0 {
        Verdict::Warn
    } else {
        Verdict::Pass
    }
}

//! Check results and the suite report they are collected into.
//!
//! A `CheckResult` is the outcome of one step of a health check. Suites
//! collect results into titled `Section`s of a `SuiteReport`; the verdict
//! is computed by [`summary::summarize`] under the report's `PassPolicy`.

pub mod summary;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use summary::{summarize, PassPolicy, Summary, Tally, Verdict};

// ---------------------------------------------------------------------------
// CheckStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Info,
}

impl CheckStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            CheckStatus::Pass => "✓",
            CheckStatus::Fail => "✗",
            CheckStatus::Warn => "⚠",
            CheckStatus::Info => "ℹ",
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckStatus::Pass => write!(f, "PASS"),
            CheckStatus::Fail => write!(f, "FAIL"),
            CheckStatus::Warn => write!(f, "WARN"),
            CheckStatus::Info => write!(f, "INFO"),
        }
    }
}

// ---------------------------------------------------------------------------
// CheckResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// What the operator should do about a failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl CheckResult {
    pub fn new(name: impl Into<String>, status: CheckStatus, message: impl Into<String>) -> Self {
        CheckResult {
            name: name.into(),
            status,
            message: message.into(),
            detail: None,
            remediation: None,
        }
    }

    pub fn pass(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Pass, message)
    }

    pub fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Fail, message)
    }

    pub fn warn(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Warn, message)
    }

    pub fn info(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Info, message)
    }

    /// Pass or fail depending on `ok`.
    pub fn expect(name: impl Into<String>, ok: bool, message: impl Into<String>) -> Self {
        let status = if ok { CheckStatus::Pass } else { CheckStatus::Fail };
        Self::new(name, status, message)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        if !detail.is_empty() {
            self.detail = Some(detail);
        }
        self
    }

    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = Some(remediation.into());
        self
    }

    pub fn is_fail(&self) -> bool {
        self.status == CheckStatus::Fail
    }
}

// ---------------------------------------------------------------------------
// SuiteReport
// ---------------------------------------------------------------------------

/// A titled group of results within a suite.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Section {
    pub title: String,
    pub checks: Vec<CheckResult>,
}

/// Everything a suite produced, in execution order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuiteReport {
    pub title: String,
    /// Key/value lines describing what was checked (project, namespace, nodes).
    pub context: Vec<(String, String)>,
    pub sections: Vec<Section>,
    pub policy: PassPolicy,
    /// Free-form lines printed after the summary (manual cleanup hints).
    pub notes: Vec<String>,
}

impl SuiteReport {
    pub fn new(title: impl Into<String>, policy: PassPolicy) -> Self {
        SuiteReport {
            title: title.into(),
            context: Vec::new(),
            sections: Vec::new(),
            policy,
            notes: Vec::new(),
        }
    }

    pub fn context(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.context.push((key.into(), value.into()));
    }

    /// Start a new section; subsequent `push` calls add to it.
    pub fn section(&mut self, title: impl Into<String>) {
        self.sections.push(Section {
            title: title.into(),
            checks: Vec::new(),
        });
    }

    /// Append a result to the current section, opening an untitled one if needed.
    pub fn push(&mut self, check: CheckResult) {
        if self.sections.is_empty() {
            self.section("");
        }
        if let Some(section) = self.sections.last_mut() {
            section.checks.push(check);
        }
    }

    pub fn note(&mut self, line: impl Into<String>) {
        self.notes.push(line.into());
    }

    pub fn checks(&self) -> impl Iterator<Item = &CheckResult> {
        self.sections.iter().flat_map(|s| s.checks.iter())
    }

    pub fn summary(&self) -> Summary {
        let statuses: Vec<CheckStatus> = self.checks().map(|c| c.status).collect();
        summarize(&statuses, self.policy)
    }
}

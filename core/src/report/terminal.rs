//! Terminal rendering of a `SuiteReport`.
//!
//! Colour is decided by the caller through a [`Palette`]; a disabled
//! palette produces plain text suitable for log files.

use crate::check::{CheckResult, CheckStatus, PassPolicy, SuiteReport, Verdict};

const RULE: &str = "==========================================";

/// ANSI colouring, on or off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub enabled: bool,
}

impl Palette {
    pub fn color() -> Self {
        Palette { enabled: true }
    }

    pub fn plain() -> Self {
        Palette { enabled: false }
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.enabled {
            format!("\x1b[{}m{}\x1b[0m", code, text)
        } else {
            text.to_string()
        }
    }

    pub fn green(&self, text: &str) -> String {
        self.paint("0;32", text)
    }

    pub fn red(&self, text: &str) -> String {
        self.paint("0;31", text)
    }

    pub fn yellow(&self, text: &str) -> String {
        self.paint("1;33", text)
    }

    pub fn blue(&self, text: &str) -> String {
        self.paint("0;34", text)
    }

    pub fn bold(&self, text: &str) -> String {
        self.paint("1", text)
    }

    fn status(&self, status: CheckStatus) -> String {
        let label = format!("{} {}", status.symbol(), status);
        match status {
            CheckStatus::Pass => self.green(&label),
            CheckStatus::Fail => self.red(&label),
            CheckStatus::Warn => self.yellow(&label),
            CheckStatus::Info => self.blue(&label),
        }
    }

    fn verdict(&self, verdict: Verdict) -> String {
        let text = verdict.to_string();
        match verdict {
            Verdict::Pass => self.green(&text),
            Verdict::Warn => self.yellow(&text),
            Verdict::Fail => self.red(&text),
        }
    }
}

fn render_check(out: &mut String, check: &CheckResult, palette: &Palette) {
    out.push_str(&format!(
        "  {} {}: {}\n",
        palette.status(check.status),
        check.name,
        check.message
    ));
    if let Some(detail) = &check.detail {
        for line in detail.lines() {
            out.push_str(&format!("      {}\n", line));
        }
    }
    if let Some(fix) = &check.remediation {
        out.push_str(&format!("      Remediation: {}\n", fix));
    }
}

/// Header, sections, summary and notes of a finished suite.
pub fn render_suite(report: &SuiteReport, palette: &Palette) -> String {
    let mut out = String::new();

    out.push_str(&format!("{}\n", palette.blue(RULE)));
    out.push_str(&format!("{}\n", palette.bold(&report.title)));
    out.push_str(&format!("{}\n", palette.blue(RULE)));
    for (key, value) in &report.context {
        out.push_str(&format!("{}: {}\n", key, value));
    }

    for section in &report.sections {
        out.push('\n');
        if !section.title.is_empty() {
            out.push_str(&format!("{}\n", palette.bold(&format!("--- {} ---", section.title))));
        }
        for check in &section.checks {
            render_check(&mut out, check, palette);
        }
    }

    let summary = report.summary();
    let t = &summary.tally;
    out.push('\n');
    out.push_str(&format!("{}\n", palette.blue(RULE)));
    out.push_str(&format!("{}\n", palette.bold("Summary")));
    out.push_str(&format!("{}\n", palette.blue(RULE)));
    out.push_str(&format!("Total checks: {}\n", t.total()));
    out.push_str(&format!("Passed: {}\n", palette.green(&t.passed.to_string())));
    out.push_str(&format!("Failed: {}\n", palette.red(&t.failed.to_string())));
    out.push_str(&format!("Warnings: {}\n", palette.yellow(&t.warnings.to_string())));
    if let PassPolicy::Threshold { percent } = summary.policy {
        let rate = t
            .pass_rate()
            .map(|r| format!("{:.1}%", r))
            .unwrap_or_else(|| "n/a".into());
        out.push_str(&format!("Pass rate: {} (threshold {}%)\n", rate, percent));
    }
    out.push_str(&format!("Result: {}\n", palette.verdict(summary.verdict)));

    if !report.notes.is_empty() {
        out.push('\n');
        for note in &report.notes {
            out.push_str(&format!("{}\n", note));
        }
    }
    out
}

//! Health-check suites.
//!
//! Each suite runs its checks in a fixed order against a [`Cluster`] and
//! returns a [`SuiteReport`](crate::check::SuiteReport). Query failures are
//! turned into failed checks where they happen; nothing here returns an
//! error to the caller.
//!
//! [`Cluster`]: crate::cluster::Cluster

pub mod dgx_pods;
pub mod gpu_operator;
pub mod ingress_nginx;
pub mod kube_state_metrics;
pub mod metrics_server;
pub mod network_operator;
pub mod prometheus_stack;
pub mod storage;

use std::fmt::Display;

use crate::check::CheckResult;
use crate::cluster::{Cluster, Pod};

const SAMPLE_LINES: usize = 5;

/// `name: phase, Ready: bool, Restarts: n`, one pod per line.
pub(crate) fn pod_lines(pods: &[Pod]) -> String {
    pods.iter()
        .map(|p| {
            format!(
                "  {}: {}, Ready: {}, Restarts: {}",
                p.name(),
                p.phase(),
                p.is_ready(),
                p.restarts()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// A failed check for a query that could not be run or decoded.
pub(crate) fn query_failed(name: &str, what: &str, err: &impl Display) -> CheckResult {
    CheckResult::fail(name, format!("Failed to query {}", what)).with_detail(err.to_string())
}

/// Count of pods in phase Running, and the total.
pub(crate) fn running_count(pods: &[Pod]) -> (usize, usize) {
    (pods.iter().filter(|p| p.is_running()).count(), pods.len())
}

/// Pods matching `selector` must all be Running and Ready.
pub(crate) fn pods_ready(cluster: &Cluster, name: &str, ns: &str, selector: &str, what: &str) -> CheckResult {
    let pods: Vec<Pod> = match cluster.list("pods", Some(ns), Some(selector)) {
        Ok(p) => p,
        Err(e) => return query_failed(name, what, &e),
    };
    pods_status(name, what, &pods)
}

/// Pass when every pod is Running and Ready; fail on an empty list.
pub(crate) fn pods_status(name: &str, what: &str, pods: &[Pod]) -> CheckResult {
    if pods.is_empty() {
        return CheckResult::fail(name, format!("No {} found", what));
    }
    let (running, total) = running_count(pods);
    let ready = pods.iter().filter(|p| p.is_ready()).count();
    CheckResult::expect(
        name,
        running == total && ready == total,
        format!("Found {} pod(s): {} running, {} ready", total, running, ready),
    )
    .with_detail(pod_lines(pods))
}

/// First few lines, then a count of the rest.
pub(crate) fn sample(lines: &[&str], noun: &str) -> String {
    let mut out: Vec<String> = lines
        .iter()
        .take(SAMPLE_LINES)
        .map(|l| format!("  {}", l))
        .collect();
    if lines.len() > SAMPLE_LINES {
        out.push(format!("  ... and {} more {}", lines.len() - SAMPLE_LINES, noun));
    }
    out.join("\n")
}

pub(crate) fn non_empty_lines(out: &str) -> Vec<&str> {
    out.lines().filter(|l| !l.trim().is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pod_lines_formats_each_pod() {
        let pods: Vec<Pod> = serde_json::from_str(
            r#"[{"metadata":{"name":"a"},"status":{"phase":"Running",
                "conditions":[{"type":"Ready","status":"True"}],
                "containerStatuses":[{"restartCount":2}]}},
               {"metadata":{"name":"b"}}]"#,
        )
        .unwrap();
        assert_eq!(
            pod_lines(&pods),
            "  a: Running, Ready: true, Restarts: 2\n  b: Unknown, Ready: false, Restarts: 0"
        );
        assert_eq!(running_count(&pods), (1, 2));
    }

    #[test]
    fn sample_truncates_long_output() {
        let lines: Vec<String> = (0..8).map(|i| format!("n{}", i)).collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let s = sample(&refs, "nodes");
        assert_eq!(s.lines().count(), 6);
        assert!(s.ends_with("... and 3 more nodes"));
    }

    #[test]
    fn non_empty_lines_skips_blanks() {
        assert_eq!(non_empty_lines("a\n\n  \nb\n"), vec!["a", "b"]);
    }
}

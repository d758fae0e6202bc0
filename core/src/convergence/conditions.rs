//! Resource conditions the suites wait on.
//!
//! Each condition is a plain predicate over an observed value plus a
//! `wait_for_*` helper that pairs the predicate with a cluster query and
//! runs it through [`poll_observed`], logging every unsatisfied attempt.

use tracing::debug;

use crate::cluster::{Cluster, Pod, QueryError};
use crate::infrastructure::RunError;

use super::poller::{poll_observed, PollOutcome, PollPolicy};

/// Whether a named object still exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Present,
    Absent,
}

/// Phase and bound volume of a claim, read through
/// `jsonpath={.status.phase}|{.spec.volumeName}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimState {
    pub phase: String,
    pub volume_name: Option<String>,
}

impl ClaimState {
    pub fn parse(output: &str) -> Option<ClaimState> {
        let (phase, volume) = output.trim().split_once('|')?;
        Some(ClaimState {
            phase: phase.to_string(),
            volume_name: if volume.is_empty() {
                None
            } else {
                Some(volume.to_string())
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Predicates
// ---------------------------------------------------------------------------

pub fn pvc_bound(state: &ClaimState) -> bool {
    state.phase == "Bound"
}

pub fn is_absent(presence: &Presence) -> bool {
    *presence == Presence::Absent
}

/// At least `expected` pods, all Running or Succeeded.
pub fn pods_settled(pods: &[Pod], expected: usize) -> bool {
    pods.len() >= expected && pods.iter().all(Pod::is_settled)
}

pub fn pod_terminal(phase: &str) -> bool {
    matches!(phase, "Succeeded" | "Failed")
}

// ---------------------------------------------------------------------------
// Waits
// ---------------------------------------------------------------------------

/// Find the claim Run:ai created for a data source, named `{datasource}-project-<suffix>`.
pub fn discover_pvc(
    cluster: &Cluster,
    namespace: &str,
    datasource: &str,
    policy: &PollPolicy,
) -> PollOutcome<Option<String>> {
    let pattern = format!("{}-project-", datasource);
    poll_observed(
        policy,
        || {
            cluster
                .kubectl(&["get", "pvc", "-n", namespace, "-o", "name"])
                .map(|out| {
                    out.lines()
                        .map(|l| l.trim().trim_start_matches("persistentvolumeclaim/"))
                        .find(|name| name.contains(&pattern))
                        .map(str::to_string)
                })
        },
        |found| found.is_some(),
        |attempt, r| debug!(attempt, found = r.is_ok(), "pvc discovery"),
    )
}

pub fn wait_for_pvc_bound(
    cluster: &Cluster,
    namespace: &str,
    claim: &str,
    policy: &PollPolicy,
) -> PollOutcome<ClaimState> {
    poll_observed(
        policy,
        || -> Result<ClaimState, QueryError> {
            let out = cluster.jsonpath(
                "pvc",
                claim,
                Some(namespace),
                "{.status.phase}|{.spec.volumeName}",
            )?;
            ClaimState::parse(&out).ok_or_else(|| QueryError::Parse {
                command: format!("get pvc {}", claim),
                message: format!("unexpected output '{}'", out),
            })
        },
        pvc_bound,
        |attempt, r| {
            if let Ok(state) = r {
                debug!(attempt, phase = %state.phase, "waiting for pvc bound");
            }
        },
    )
}

pub fn wait_for_absent(
    cluster: &Cluster,
    kind: &str,
    name: &str,
    namespace: Option<&str>,
    policy: &PollPolicy,
) -> PollOutcome<Presence> {
    poll_observed(
        policy,
        || -> Result<Presence, RunError> { cluster.presence(kind, name, namespace) },
        is_absent,
        |attempt, _| debug!(attempt, kind = kind, object = name, "waiting for deletion"),
    )
}

/// Wait until `expected` pods matching `selector` are Running or Succeeded.
pub fn wait_for_pods(
    cluster: &Cluster,
    namespace: &str,
    selector: &str,
    expected: usize,
    policy: &PollPolicy,
) -> PollOutcome<Vec<Pod>> {
    poll_observed(
        policy,
        || cluster.list::<Pod>("pods", Some(namespace), Some(selector)),
        |pods| pods_settled(pods, expected),
        |attempt, r| {
            if let Ok(pods) = r {
                let settled = pods.iter().filter(|p| p.is_settled()).count();
                debug!(attempt, settled, expected, "waiting for pods");
            }
        },
    )
}

/// Wait until a pod reaches Succeeded or Failed; the outcome carries the phase.
pub fn wait_for_pod_terminal(
    cluster: &Cluster,
    namespace: &str,
    pod: &str,
    policy: &PollPolicy,
) -> PollOutcome<String> {
    poll_observed(
        policy,
        || cluster.jsonpath("pod", pod, Some(namespace), "{.status.phase}"),
        |phase| pod_terminal(phase),
        |attempt, r| {
            if let Ok(phase) = r {
                debug!(attempt, phase = %phase, "waiting for pod completion");
            }
        },
    )
}

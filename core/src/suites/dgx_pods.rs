//! DGX worker pod placement.
//!
//! GPU worker nodes should only carry DaemonSet pods and user workloads
//! from `runai-<project>` namespaces. Everything else (Run:ai control
//! plane, monitoring, ingress) belongs on system nodes. Nodes labelled
//! with the runai-system, control-plane or master role are system nodes;
//! every other node is a DGX worker.

use std::collections::{BTreeMap, BTreeSet};

use crate::check::{CheckResult, PassPolicy, SuiteReport};
use crate::cluster::{Cluster, List, Node, Pod};

use super::query_failed;

pub const SYSTEM_ROLE_LABELS: [&str; 3] = [
    "node-role.kubernetes.io/runai-system",
    "node-role.kubernetes.io/control-plane",
    "node-role.kubernetes.io/master",
];

/// `runai-` namespaces hold project workloads, except this one.
const RUNAI_BACKEND: &str = "runai-backend";

const REMEDIATION: &str = "Review pod affinity/nodeSelector configurations for these workloads; \
they should be scheduled on runai-system nodes";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeClasses {
    pub system: Vec<String>,
    pub workers: Vec<String>,
}

pub fn classify_nodes(nodes: &[Node]) -> NodeClasses {
    let mut classes = NodeClasses::default();
    for node in nodes {
        let labels = &node.metadata.labels;
        let name = node.metadata.name.clone();
        if SYSTEM_ROLE_LABELS.iter().any(|l| labels.contains_key(*l)) {
            classes.system.push(name);
        } else {
            classes.workers.push(name);
        }
    }
    classes
}

/// A pod that should not be on a DGX worker.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Misplaced {
    pub namespace: String,
    pub owner_kind: String,
    pub pod: String,
    pub node: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placement {
    pub total: usize,
    pub daemonset: usize,
    pub user_workload: usize,
    /// Sorted by namespace, owner kind, then pod name.
    pub misplaced: Vec<Misplaced>,
}

fn is_project_namespace(ns: &str) -> bool {
    ns.starts_with("runai-") && ns != RUNAI_BACKEND
}

/// Sort the pods scheduled on `workers` into allowed and misplaced.
pub fn analyze(pods: &[Pod], workers: &BTreeSet<&str>) -> Placement {
    let mut placement = Placement::default();
    for pod in pods {
        let Some(node) = pod.spec.node_name.as_deref() else {
            continue;
        };
        if !workers.contains(node) {
            continue;
        }
        placement.total += 1;
        let kind = pod.owner_kind();
        if kind == "DaemonSet" {
            placement.daemonset += 1;
        } else if is_project_namespace(&pod.metadata.namespace) {
            placement.user_workload += 1;
        } else {
            placement.misplaced.push(Misplaced {
                namespace: pod.metadata.namespace.clone(),
                owner_kind: kind.to_string(),
                pod: pod.name().to_string(),
                node: node.to_string(),
            });
        }
    }
    placement.misplaced.sort();
    placement
}

/// Misplaced pods as a table, namespace and kind shown once per group,
/// followed by a count per namespace.
pub fn misplaced_table(misplaced: &[Misplaced]) -> String {
    let mut lines = vec![format!(
        "  {:<25} {:<20} {:<40} {}",
        "Namespace", "Type", "Pod Name", "Node"
    )];
    let mut previous: Option<(&str, &str)> = None;
    for m in misplaced {
        let group = (m.namespace.as_str(), m.owner_kind.as_str());
        let (ns, kind) = if previous == Some(group) {
            ("", "")
        } else {
            group
        };
        previous = Some(group);
        lines.push(format!("  {:<25} {:<20} {:<40} {}", ns, kind, m.pod, m.node));
    }

    let mut per_namespace: BTreeMap<&str, usize> = BTreeMap::new();
    for m in misplaced {
        *per_namespace.entry(m.namespace.as_str()).or_default() += 1;
    }
    lines.push(String::new());
    lines.push("  By namespace:".into());
    for (ns, n) in per_namespace {
        lines.push(format!("    {}: {} pod(s)", ns, n));
    }
    lines.join("\n")
}

pub fn run(cluster: &Cluster) -> SuiteReport {
    const NODES: &str = "Node classification";
    const PLACEMENT: &str = "Pod placement";

    let mut report = SuiteReport::new("DGX Node Pod Placement Health Check", PassPolicy::Strict);
    report.context(
        "Purpose",
        "DGX worker nodes run only user workloads and DaemonSets",
    );

    report.section("Nodes");
    let nodes: Vec<Node> = match cluster.list("nodes", None, None) {
        Ok(n) => n,
        Err(e) => {
            report.push(query_failed(NODES, "nodes", &e));
            return report;
        }
    };
    let classes = classify_nodes(&nodes);
    if classes.workers.is_empty() {
        report.push(CheckResult::pass(
            NODES,
            "No DGX worker nodes found; all nodes are runai-system/control-plane nodes",
        ));
        return report;
    }
    report.push(
        CheckResult::info(
            NODES,
            format!(
                "{} system node(s), {} DGX worker node(s)",
                classes.system.len(),
                classes.workers.len()
            ),
        )
        .with_detail(format!(
            "  RunAI system nodes: {}\n  DGX worker nodes: {}",
            classes.system.join(", "),
            classes.workers.join(", ")
        )),
    );

    report.section("Pod Placement");
    let pods: Vec<Pod> = match cluster.kubectl_json::<List<Pod>>(&["get", "pods", "-A", "-o", "json"]) {
        Ok(list) => list.items,
        Err(e) => {
            report.push(query_failed(PLACEMENT, "pods", &e));
            return report;
        }
    };
    let workers: BTreeSet<&str> = classes.workers.iter().map(String::as_str).collect();
    let placement = analyze(&pods, &workers);
    if placement.total == 0 {
        report.push(CheckResult::pass(PLACEMENT, "No pods found on DGX nodes"));
        return report;
    }

    let counts = format!(
        "  Pods on DGX nodes: {}\n  DaemonSet pods (allowed): {}\n  \
         User workload pods from runai-<project> (allowed): {}\n  \
         System/infrastructure pods: {}",
        placement.total,
        placement.daemonset,
        placement.user_workload,
        placement.misplaced.len()
    );
    if placement.misplaced.is_empty() {
        report.push(
            CheckResult::pass(PLACEMENT, "All DGX nodes run only user workloads and DaemonSets")
                .with_detail(counts),
        );
    } else {
        report.push(
            CheckResult::fail(
                PLACEMENT,
                format!(
                    "Found {} misplaced pod(s) on DGX worker nodes",
                    placement.misplaced.len()
                ),
            )
            .with_detail(format!("{}\n\n{}", counts, misplaced_table(&placement.misplaced)))
            .with_remediation(REMEDIATION),
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::{CheckStatus, Verdict};
    use crate::config::Tools;
    use crate::infrastructure::MockRunner;
    use serde_json::{json, Value};

    const NODES: &str = "kubectl get nodes -o json";
    const PODS: &str = "kubectl get pods -A -o json";

    fn node(name: &str, role: Option<&str>) -> Value {
        let mut labels = json!({"kubernetes.io/hostname": name});
        if let Some(role) = role {
            labels[format!("node-role.kubernetes.io/{}", role)] = json!("");
        }
        json!({"metadata": {"name": name, "labels": labels}})
    }

    fn pod(ns: &str, name: &str, node: &str, owner: Option<&str>) -> Value {
        let owners = match owner {
            Some(kind) => json!([{"kind": kind, "name": "owner"}]),
            None => json!([]),
        };
        json!({"metadata": {"name": name, "namespace": ns, "ownerReferences": owners},
               "spec": {"nodeName": node}, "status": {"phase": "Running"}})
    }

    fn runner(pods: Vec<Value>) -> MockRunner {
        MockRunner::new()
            .on(
                NODES,
                Ok(json!({"items": [
                    node("head01", Some("control-plane")),
                    node("sys01", Some("runai-system")),
                    node("dgx030", None),
                    node("dgx031", None)
                ]})
                .to_string()),
            )
            .on(PODS, Ok(json!({ "items": pods }).to_string()))
    }

    fn run_with(runner: &MockRunner) -> SuiteReport {
        let tools = Tools::default();
        let cluster = Cluster::new(runner, &tools);
        run(&cluster)
    }

    #[test]
    fn classify_by_role_label() {
        let nodes: Vec<Node> = serde_json::from_value(json!([
            node("head01", Some("master")),
            node("dgx030", None)
        ]))
        .unwrap();
        let classes = classify_nodes(&nodes);
        assert_eq!(classes.system, vec!["head01"]);
        assert_eq!(classes.workers, vec!["dgx030"]);
    }

    #[test]
    fn daemonsets_and_projects_are_allowed() {
        let report = run_with(&runner(vec![
            pod("gpu-operator", "nvidia-dcgm-exporter-x", "dgx030", Some("DaemonSet")),
            pod("runai-team-a", "train-0-0", "dgx031", Some("Job")),
            pod("runai", "scheduler-7d", "sys01", Some("ReplicaSet")),
        ]));
        assert_eq!(report.summary().verdict, Verdict::Pass);
        let placement = report.checks().find(|c| c.name == "Pod placement").unwrap();
        let detail = placement.detail.as_deref().unwrap();
        assert!(detail.contains("Pods on DGX nodes: 2"));
        assert!(detail.contains("DaemonSet pods (allowed): 1"));
    }

    #[test]
    fn system_pods_on_workers_fail() {
        let report = run_with(&runner(vec![
            pod("runai-backend", "backend-db-0", "dgx030", Some("StatefulSet")),
            pod("prometheus", "grafana-5c9-a", "dgx030", Some("ReplicaSet")),
            pod("prometheus", "grafana-5c9-b", "dgx031", Some("ReplicaSet")),
            pod("default", "debug", "dgx031", None),
        ]));
        assert_eq!(report.summary().verdict, Verdict::Fail);
        let placement = report.checks().find(|c| c.name == "Pod placement").unwrap();
        assert_eq!(placement.status, CheckStatus::Fail);
        assert!(placement.message.contains("4 misplaced"));
        assert!(placement.remediation.as_deref().unwrap().contains("nodeSelector"));
        let detail = placement.detail.as_deref().unwrap();
        assert!(detail.contains("runai-backend: 1 pod(s)"));
        assert!(detail.contains("prometheus: 2 pod(s)"));
        assert!(detail.contains("Deployment"));
    }

    #[test]
    fn misplaced_table_groups_namespace_and_kind() {
        let pods: Vec<Pod> = serde_json::from_value(json!([
            pod("prometheus", "b", "dgx030", Some("ReplicaSet")),
            pod("prometheus", "a", "dgx030", Some("ReplicaSet")),
        ]))
        .unwrap();
        let workers: BTreeSet<&str> = ["dgx030"].into_iter().collect();
        let placement = analyze(&pods, &workers);
        assert_eq!(placement.misplaced[0].pod, "a");
        let table = misplaced_table(&placement.misplaced);
        assert_eq!(table.matches("prometheus").count(), 2);
    }

    #[test]
    fn no_workers_passes_without_listing_pods() {
        let runner = MockRunner::new().on(
            NODES,
            Ok(json!({"items": [node("head01", Some("control-plane"))]}).to_string()),
        );
        let report = run_with(&runner);
        assert_eq!(report.summary().verdict, Verdict::Pass);
        assert_eq!(runner.count(PODS), 0);
    }

    #[test]
    fn node_query_failure_fails() {
        let runner = MockRunner::new().on(NODES, MockRunner::failure("Unauthorized"));
        let report = run_with(&runner);
        assert_eq!(report.summary().verdict, Verdict::Fail);
    }
}

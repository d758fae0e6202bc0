//! GPU Operator validation, run before and after an operator upgrade.
//!
//! Checks the operator's pods and DaemonSets, confirms GPU nodes are
//! labelled, then schedules a one-GPU CUDA pod and waits for it to finish.

use std::fmt;

use tracing::{info, warn};

use crate::check::{CheckResult, PassPolicy, SuiteReport};
use crate::cluster::{Cluster, HelmRelease, Node, Pod, Workload};
use crate::config::PollSettings;
use crate::convergence::conditions::wait_for_pod_terminal;
use crate::convergence::Presence;

use super::query_failed;

pub const DEFAULT_NAMESPACE: &str = "gpu-operator";
pub const TEST_POD: &str = "gpu-operator-test-pod";
pub const CUDA_IMAGE: &str = "nvidia/cuda:12.2.0-base-ubuntu22.04";
/// Printed by the test pod as its last line.
pub const COMPLETION_MARKER: &str = "CUDA Test Complete";

const GPU_NODE_SELECTOR: &str = "nvidia.com/gpu.present=true";
const MIN_GPU_LABELS: usize = 6;

/// When the suite is run relative to an upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    Before,
    After,
    #[default]
    Baseline,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Before => write!(f, "before"),
            Phase::After => write!(f, "after"),
            Phase::Baseline => write!(f, "baseline"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuOptions {
    pub phase: Phase,
    pub namespace: String,
    /// Namespace the CUDA test pod runs in.
    pub workload_namespace: String,
    pub skip_workload: bool,
}

impl Default for GpuOptions {
    fn default() -> Self {
        GpuOptions {
            phase: Phase::Baseline,
            namespace: DEFAULT_NAMESPACE.into(),
            workload_namespace: "default".into(),
            skip_workload: false,
        }
    }
}

/// Single-container pod that requests one GPU and prints device details.
pub fn test_pod_manifest(name: &str, namespace: &str) -> String {
    format!(
        r#"apiVersion: v1
kind: Pod
metadata:
  name: {name}
  namespace: {namespace}
spec:
  restartPolicy: Never
  containers:
  - name: cuda
    image: {image}
    command:
      - /bin/bash
      - -c
      - |
        echo "=== CUDA Test Starting ==="
        nvidia-smi -L
        nvidia-smi --query-gpu=index,name,driver_version,memory.total,memory.free --format=csv
        echo "=== {marker} ==="
    resources:
      limits:
        nvidia.com/gpu: 1
"#,
        name = name,
        namespace = namespace,
        image = CUDA_IMAGE,
        marker = COMPLETION_MARKER,
    )
}

pub fn run(cluster: &Cluster, polls: &PollSettings, opts: &GpuOptions) -> SuiteReport {
    let mut report = SuiteReport::new("GPU Operator Validation", PassPolicy::Strict);
    let ns = opts.namespace.as_str();
    report.context("Phase", opts.phase.to_string());
    report.context("Namespace", ns);

    report.section("Environment");
    report.push(check_chart(cluster, ns));

    report.section("Operator Pods");
    report.push(check_pods(cluster, ns));

    report.section("GPU Nodes");
    let nodes = match cluster.list::<Node>("nodes", None, Some(GPU_NODE_SELECTOR)) {
        Ok(nodes) => {
            report.push(check_gpu_nodes(&nodes));
            nodes
        }
        Err(e) => {
            report.push(query_failed("GPU node discovery", "GPU nodes", &e));
            Vec::new()
        }
    };

    report.section("DaemonSets");
    report.push(check_daemonset(
        cluster,
        ns,
        "Device plugin",
        "nvidia-device-plugin-daemonset",
    ));
    report.push(check_feature_discovery(cluster, ns, nodes.first()));
    report.push(check_dcgm_exporter(cluster, ns));
    report.push(check_daemonset(
        cluster,
        ns,
        "Operator validator",
        "nvidia-operator-validator",
    ));

    report.section("CUDA Workload");
    if opts.skip_workload {
        report.push(CheckResult::info("CUDA workload", "Skipped (--skip-workload)"));
    } else {
        let check = run_cuda_workload(cluster, polls, &opts.workload_namespace);
        if !cleanup_test_pod(cluster, &opts.workload_namespace) {
            report.note(format!(
                "Test pod may remain: kubectl delete pod {} -n {}",
                TEST_POD, opts.workload_namespace
            ));
        }
        report.push(check);
    }
    report
}

fn check_chart(cluster: &Cluster, ns: &str) -> CheckResult {
    const NAME: &str = "GPU Operator chart";
    let releases: Result<Vec<HelmRelease>, String> = cluster
        .helm(&["list", "-n", ns, "-o", "json"])
        .map_err(|e| e.to_string())
        .and_then(|out| serde_json::from_str(&out).map_err(|e| e.to_string()));
    match releases {
        Ok(releases) => match releases.first() {
            Some(r) => CheckResult::info(NAME, format!("GPU Operator chart: {}", r.chart))
                .with_detail(format!("App version: {}, Status: {}", r.app_version, r.status)),
            None => CheckResult::info(NAME, format!("No Helm release in namespace {}", ns)),
        },
        Err(e) => CheckResult::info(NAME, "GPU Operator chart: unknown").with_detail(e),
    }
}

fn check_pods(cluster: &Cluster, ns: &str) -> CheckResult {
    const NAME: &str = "Pod status";
    let pods: Vec<Pod> = match cluster.list("pods", Some(ns), None) {
        Ok(p) => p,
        Err(e) => return query_failed(NAME, "operator pods", &e),
    };
    let running = pods.iter().filter(|p| p.is_running()).count();
    let completed = pods.iter().filter(|p| p.phase() == "Succeeded").count();
    let healthy = running + completed;
    let unhealthy: Vec<String> = pods
        .iter()
        .filter(|p| !p.is_settled())
        .map(|p| format!("  {}: {}", p.name(), p.phase()))
        .collect();
    if !pods.is_empty() && healthy == pods.len() {
        CheckResult::pass(
            NAME,
            format!(
                "All GPU Operator pods are healthy ({} Running + {} Completed = {}/{})",
                running,
                completed,
                healthy,
                pods.len()
            ),
        )
    } else {
        CheckResult::fail(
            NAME,
            format!("Not all pods are healthy ({}/{})", healthy, pods.len()),
        )
        .with_detail(unhealthy.join("\n"))
    }
}

fn check_gpu_nodes(nodes: &[Node]) -> CheckResult {
    const NAME: &str = "GPU node discovery";
    if nodes.is_empty() {
        return CheckResult::fail(NAME, "No GPU nodes found");
    }
    let detail = nodes
        .iter()
        .filter_map(|n| {
            let capacity = n.status.capacity.get("nvidia.com/gpu")?;
            let allocatable = n
                .status
                .allocatable
                .get("nvidia.com/gpu")
                .map(String::as_str)
                .unwrap_or("0");
            Some(format!(
                "  {}: {} GPUs (Allocatable: {})",
                n.metadata.name, capacity, allocatable
            ))
        })
        .collect::<Vec<_>>()
        .join("\n");
    CheckResult::pass(
        NAME,
        format!("GPU nodes discovered: {} nodes with GPUs", nodes.len()),
    )
    .with_detail(detail)
}

/// `(ready, desired)` from a DaemonSet's status.
fn daemonset_counts(cluster: &Cluster, ns: &str, daemonset: &str) -> Result<(u32, u32), String> {
    let ds: Workload = cluster
        .get("daemonset", daemonset, Some(ns))
        .map_err(|e| e.to_string())?;
    Ok((
        ds.status.number_ready.unwrap_or(0),
        ds.status.desired_number_scheduled.unwrap_or(0),
    ))
}

fn check_daemonset(cluster: &Cluster, ns: &str, name: &str, daemonset: &str) -> CheckResult {
    match daemonset_counts(cluster, ns, daemonset) {
        Ok((ready, desired)) => CheckResult::expect(
            name,
            ready == desired && desired > 0,
            format!("{}: {}/{} pods ready", daemonset, ready, desired),
        ),
        Err(e) => CheckResult::fail(name, format!("DaemonSet {} not found", daemonset)).with_detail(e),
    }
}

fn check_feature_discovery(cluster: &Cluster, ns: &str, sample: Option<&Node>) -> CheckResult {
    const NAME: &str = "GPU Feature Discovery";
    let (ready, desired) = match daemonset_counts(cluster, ns, "gpu-feature-discovery") {
        Ok(counts) => counts,
        Err(e) => {
            return CheckResult::fail(NAME, "DaemonSet gpu-feature-discovery not found").with_detail(e)
        }
    };
    let Some(node) = sample else {
        return CheckResult::fail(NAME, "No GPU nodes found to check labels");
    };
    let labels: Vec<String> = node
        .metadata
        .labels
        .iter()
        .filter(|(k, _)| k.starts_with("nvidia.com/"))
        .map(|(k, v)| format!("  {}={}", k, v))
        .collect();
    let detail = labels.iter().take(10).cloned().collect::<Vec<_>>().join("\n");
    let ok = ready == desired && desired > 0 && labels.len() >= MIN_GPU_LABELS;
    let message = if ok {
        format!(
            "GFD {}/{} ready, {} NVIDIA labels on {}",
            ready,
            desired,
            labels.len(),
            node.metadata.name
        )
    } else {
        format!(
            "GFD not fully functional or labels missing ({}/{} ready, {} labels on {})",
            ready,
            desired,
            labels.len(),
            node.metadata.name
        )
    };
    CheckResult::expect(NAME, ok, message).with_detail(detail)
}

fn check_dcgm_exporter(cluster: &Cluster, ns: &str) -> CheckResult {
    const NAME: &str = "DCGM exporter";
    let (ready, desired) = match daemonset_counts(cluster, ns, "nvidia-dcgm-exporter") {
        Ok(counts) => counts,
        Err(e) => {
            return CheckResult::fail(NAME, "DaemonSet nvidia-dcgm-exporter not found").with_detail(e)
        }
    };
    if desired == 0 {
        return CheckResult::warn(
            NAME,
            "DCGM exporter DaemonSet found but not scheduled on any nodes",
        );
    }
    if ready != desired {
        return CheckResult::fail(
            NAME,
            format!("DCGM exporter not ready on all nodes ({}/{})", ready, desired),
        );
    }
    let service = match cluster.presence("svc", "nvidia-dcgm-exporter", Some(ns)) {
        Ok(Presence::Present) => "DCGM metrics service available for scraping",
        _ => "DCGM service not found (metrics may not be scrapeable)",
    };
    CheckResult::pass(
        NAME,
        format!("DCGM exporter running on all GPU nodes ({}/{})", ready, desired),
    )
    .with_detail(service)
}

fn run_cuda_workload(cluster: &Cluster, polls: &PollSettings, namespace: &str) -> CheckResult {
    const NAME: &str = "CUDA workload";
    cleanup_test_pod(cluster, namespace);
    if let Err(e) = cluster.apply_stdin(&test_pod_manifest(TEST_POD, namespace)) {
        return CheckResult::fail(NAME, "Could not create test pod").with_detail(e.stderr());
    }
    info!(pod = TEST_POD, namespace, "test pod created");

    let outcome = wait_for_pod_terminal(cluster, namespace, TEST_POD, &polls.workload_completion);
    let phase = outcome
        .last_observed
        .clone()
        .unwrap_or_else(|| "Unknown".to_string());
    let logs = cluster
        .kubectl(&["logs", TEST_POD, "-n", namespace])
        .unwrap_or_else(|e| e.stderr());

    if phase == "Succeeded" && logs.contains(COMPLETION_MARKER) {
        CheckResult::pass(NAME, "CUDA workload executed successfully").with_detail(logs.trim().to_string())
    } else if !outcome.satisfied {
        CheckResult::fail(
            NAME,
            format!(
                "Test pod did not finish within {}s (status: {})",
                polls.workload_completion.budget().as_secs(),
                phase
            ),
        )
        .with_detail(logs.trim().to_string())
    } else {
        CheckResult::fail(NAME, format!("CUDA workload test failed (status: {})", phase))
            .with_detail(logs.trim().to_string())
    }
}

/// Delete the test pod if present; false when the delete itself failed.
fn cleanup_test_pod(cluster: &Cluster, namespace: &str) -> bool {
    match cluster.kubectl(&[
        "delete",
        "pod",
        TEST_POD,
        "-n",
        namespace,
        "--ignore-not-found=true",
    ]) {
        Ok(_) => true,
        Err(e) => {
            warn!(error = %e, "cannot delete test pod");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::{CheckStatus, Verdict};
    use crate::config::Tools;
    use crate::infrastructure::MockRunner;
    use serde_json::json;

    const DELETE_POD: &str = "kubectl delete pod gpu-operator-test-pod -n default --ignore-not-found=true";
    const POD_PHASE: &str = "kubectl get pod gpu-operator-test-pod -n default -o jsonpath={.status.phase}";
    const POD_LOGS: &str = "kubectl logs gpu-operator-test-pod -n default";

    fn daemonset(ready: u32, desired: u32) -> Result<String, crate::infrastructure::RunError> {
        Ok(json!({"status": {"numberReady": ready, "desiredNumberScheduled": desired}}).to_string())
    }

    fn healthy() -> MockRunner {
        let labels: serde_json::Map<String, serde_json::Value> = (0..8)
            .map(|i| (format!("nvidia.com/gpu.label-{}", i), json!("x")))
            .collect();
        MockRunner::new()
            .on(
                "helm list -n gpu-operator -o json",
                Ok(r#"[{"name":"gpu-operator","chart":"gpu-operator-v25.3.0","app_version":"v25.3.0","status":"deployed"}]"#.into()),
            )
            .on(
                "kubectl get pods -n gpu-operator -o json",
                Ok(json!({"items": [
                    {"metadata": {"name": "gpu-operator-1"}, "status": {"phase": "Running"}},
                    {"metadata": {"name": "nvidia-cuda-validator-x"}, "status": {"phase": "Succeeded"}}
                ]})
                .to_string()),
            )
            .on(
                "kubectl get nodes -l nvidia.com/gpu.present=true -o json",
                Ok(json!({"items": [{
                    "metadata": {"name": "dgx030", "labels": labels},
                    "status": {"capacity": {"nvidia.com/gpu": "8"}, "allocatable": {"nvidia.com/gpu": "8"}}
                }]})
                .to_string()),
            )
            .on(
                "kubectl get daemonset nvidia-device-plugin-daemonset -n gpu-operator -o json",
                daemonset(2, 2),
            )
            .on("kubectl get daemonset gpu-feature-discovery -n gpu-operator -o json", daemonset(2, 2))
            .on("kubectl get daemonset nvidia-dcgm-exporter -n gpu-operator -o json", daemonset(2, 2))
            .on("kubectl get svc nvidia-dcgm-exporter -n gpu-operator", Ok("svc".into()))
            .on(
                "kubectl get daemonset nvidia-operator-validator -n gpu-operator -o json",
                daemonset(2, 2),
            )
            .on(DELETE_POD, Ok(String::new()))
            .on("kubectl apply -f -", Ok("pod/gpu-operator-test-pod created".into()))
            .on_sequence(POD_PHASE, vec![Ok("Pending".into()), Ok("Succeeded".into())])
            .on(POD_LOGS, Ok("=== CUDA Test Starting ===\nGPU 0: B200\n=== CUDA Test Complete ===\n".into()))
    }

    fn run_with(runner: &MockRunner, opts: &GpuOptions) -> SuiteReport {
        let tools = Tools::default();
        let cluster = Cluster::new(runner, &tools);
        run(&cluster, &PollSettings::immediate(4), opts)
    }

    fn find<'a>(report: &'a SuiteReport, name: &str) -> &'a CheckResult {
        report.checks().find(|c| c.name == name).unwrap()
    }

    #[test]
    fn phase_displays_lowercase() {
        assert_eq!(Phase::Before.to_string(), "before");
        assert_eq!(Phase::After.to_string(), "after");
    }

    #[test]
    fn manifest_requests_one_gpu() {
        let m = test_pod_manifest(TEST_POD, "default");
        assert!(m.contains("name: gpu-operator-test-pod"));
        assert!(m.contains("nvidia.com/gpu: 1"));
        assert!(m.contains(COMPLETION_MARKER));
    }

    #[test]
    fn healthy_operator_passes_with_workload() {
        let runner = healthy();
        let report = run_with(&runner, &GpuOptions::default());
        assert_eq!(report.summary().verdict, Verdict::Pass);
        assert_eq!(find(&report, "GPU Operator chart").message, "GPU Operator chart: gpu-operator-v25.3.0");
        assert_eq!(find(&report, "CUDA workload").status, CheckStatus::Pass);

        let invocations = runner.invocations();
        let apply = invocations
            .iter()
            .find(|i| i.command_line() == "kubectl apply -f -")
            .unwrap();
        assert!(apply.stdin.as_deref().unwrap().contains("restartPolicy: Never"));
        assert_eq!(runner.count(DELETE_POD), 2);
        assert_eq!(runner.count(POD_PHASE), 2);
    }

    #[test]
    fn unscheduled_dcgm_is_a_warning() {
        let runner = healthy().on(
            "kubectl get daemonset nvidia-dcgm-exporter -n gpu-operator -o json",
            daemonset(0, 0),
        );
        let report = run_with(&runner, &GpuOptions::default());
        assert_eq!(find(&report, "DCGM exporter").status, CheckStatus::Warn);
        assert_eq!(report.summary().verdict, Verdict::Warn);
    }

    #[test]
    fn partially_ready_device_plugin_fails() {
        let runner = healthy().on(
            "kubectl get daemonset nvidia-device-plugin-daemonset -n gpu-operator -o json",
            daemonset(1, 2),
        );
        let report = run_with(&runner, &GpuOptions::default());
        let plugin = find(&report, "Device plugin");
        assert!(plugin.is_fail());
        assert_eq!(plugin.message, "nvidia-device-plugin-daemonset: 1/2 pods ready");
    }

    #[test]
    fn missing_marker_fails_workload() {
        let runner = healthy().on(POD_LOGS, Ok("nvidia-smi: command not found\n".into()));
        let report = run_with(&runner, &GpuOptions::default());
        let workload = find(&report, "CUDA workload");
        assert_eq!(workload.message, "CUDA workload test failed (status: Succeeded)");
    }

    #[test]
    fn stuck_pod_times_out() {
        let runner = healthy().on(POD_PHASE, Ok("Pending".into()));
        let report = run_with(&runner, &GpuOptions::default());
        let workload = find(&report, "CUDA workload");
        assert!(workload.message.starts_with("Test pod did not finish"));
        assert_eq!(runner.count(POD_PHASE), 4);
    }

    #[test]
    fn skip_workload_is_info() {
        let runner = healthy();
        let opts = GpuOptions {
            skip_workload: true,
            ..GpuOptions::default()
        };
        let report = run_with(&runner, &opts);
        assert_eq!(find(&report, "CUDA workload").status, CheckStatus::Info);
        assert_eq!(runner.count("kubectl apply -f -"), 0);
    }

    #[test]
    fn too_few_labels_fails_gfd() {
        let runner = healthy().on(
            "kubectl get nodes -l nvidia.com/gpu.present=true -o json",
            Ok(json!({"items": [{"metadata": {"name": "dgx030",
                "labels": {"nvidia.com/gpu.present": "true"}}}]})
            .to_string()),
        );
        let report = run_with(&runner, &GpuOptions::default());
        assert!(find(&report, "GPU Feature Discovery").is_fail());
    }
}

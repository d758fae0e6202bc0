//! metrics-server health check.
//!
//! Seven checks from pod status through the aggregated Metrics API to the
//! Deployment itself. Pod metrics coverage legitimately lags for pods that
//! are pending or completed, so the suite is judged by a pass-rate
//! threshold rather than strictly.

use std::time::Duration;

use serde::Deserialize;

use crate::check::{CheckResult, PassPolicy, SuiteReport};
use crate::cluster::resources::Condition;
use crate::cluster::{Cluster, Pod, Service, Workload};
use crate::snapshot::collect::image_version;

use super::{non_empty_lines, pods_status, query_failed, sample};

pub const DEFAULT_NAMESPACE: &str = "kube-system";
pub const API_SERVICE: &str = "v1beta1.metrics.k8s.io";

/// Minimum share of pods that must report metrics.
pub const POD_COVERAGE_PERCENT: f64 = 80.0;

/// `kubectl top pods -A` walks every pod in the cluster.
pub const POD_METRICS_TIMEOUT: Duration = Duration::from_secs(45);

const KEY_ARGS: [&str; 4] = [
    "--kubelet-preferred-address-types",
    "--kubelet-insecure-tls",
    "--cert-dir",
    "--metric-resolution",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsOptions {
    pub namespace: String,
    /// Pass-rate threshold for the suite verdict.
    pub pass_percent: u8,
}

impl Default for MetricsOptions {
    fn default() -> Self {
        MetricsOptions {
            namespace: DEFAULT_NAMESPACE.into(),
            pass_percent: 85,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ApiService {
    #[serde(default)]
    spec: ApiServiceSpec,
    #[serde(default)]
    status: ApiServiceStatus,
}

#[derive(Debug, Default, Deserialize)]
struct ApiServiceSpec {
    #[serde(default)]
    service: Option<ServiceRef>,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceRef {
    #[serde(default)]
    name: String,
    #[serde(default)]
    namespace: String,
}

#[derive(Debug, Default, Deserialize)]
struct ApiServiceStatus {
    #[serde(default)]
    conditions: Vec<Condition>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResourceList {
    #[serde(default)]
    group_version: Option<String>,
    #[serde(default)]
    resources: Vec<ApiResource>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiResource {
    #[serde(default)]
    name: String,
}

pub fn run(cluster: &Cluster, opts: &MetricsOptions) -> SuiteReport {
    let mut report = SuiteReport::new(
        "Metrics-Server Health Check",
        PassPolicy::Threshold {
            percent: opts.pass_percent,
        },
    );
    let ns = opts.namespace.as_str();
    report.context("Namespace", ns);
    report.context("Component", "metrics-server");

    report.section("Deployment");
    report.push(check_pods(cluster, ns));
    report.push(check_service(cluster, ns));
    report.push(check_configuration(cluster, ns));

    report.section("Metrics API");
    report.push(check_api_service(cluster));
    report.push(check_metrics_api(cluster));

    report.section("Metrics Collection");
    report.push(check_node_metrics(cluster));
    report.push(check_pod_metrics(cluster));
    report
}

fn check_pods(cluster: &Cluster, ns: &str) -> CheckResult {
    const NAME: &str = "Pod status";
    let mut pods: Vec<Pod> =
        match cluster.list("pods", Some(ns), Some("app.kubernetes.io/name=metrics-server")) {
            Ok(p) => p,
            Err(e) => return query_failed(NAME, "metrics-server pods", &e),
        };
    if pods.is_empty() {
        pods = match cluster.list("pods", Some(ns), Some("k8s-app=metrics-server")) {
            Ok(p) => p,
            Err(e) => return query_failed(NAME, "metrics-server pods", &e),
        };
    }
    pods_status(NAME, "metrics-server pods", &pods)
}

fn check_service(cluster: &Cluster, ns: &str) -> CheckResult {
    const NAME: &str = "Service availability";
    let svc: Service = match cluster.get("svc", "metrics-server", Some(ns)) {
        Ok(s) => s,
        Err(e) => return query_failed(NAME, "metrics-server service", &e),
    };
    let ports: Vec<String> = svc.spec.ports.iter().map(|p| p.mapping()).collect();
    CheckResult::pass(NAME, format!("Service {} exists", svc.metadata.name)).with_detail(format!(
        "  Type: {}\n  ClusterIP: {}\n  Ports: {}",
        svc.kind(),
        svc.cluster_ip(),
        ports.join(", ")
    ))
}

fn check_api_service(cluster: &Cluster) -> CheckResult {
    const NAME: &str = "API service registration";
    let api: ApiService = match cluster.get("apiservice", API_SERVICE, None) {
        Ok(a) => a,
        Err(e) => {
            return CheckResult::fail(NAME, format!("API Service {} not found", API_SERVICE))
                .with_detail(e.to_string())
        }
    };
    let backing = api
        .spec
        .service
        .as_ref()
        .map(|s| format!("{}/{}", s.namespace, s.name))
        .unwrap_or_else(|| "local".into());
    let mut lines = vec![format!("  Service: {}", backing)];
    for c in &api.status.conditions {
        lines.push(format!(
            "  {}: {} ({})",
            c.kind,
            c.status,
            c.reason.as_deref().unwrap_or("")
        ));
    }
    let available = api
        .status
        .conditions
        .iter()
        .any(|c| c.kind == "Available" && c.status == "True");
    let message = if available {
        format!("{} is Available", API_SERVICE)
    } else {
        format!("{} is not available", API_SERVICE)
    };
    CheckResult::expect(NAME, available, message).with_detail(lines.join("\n"))
}

fn check_metrics_api(cluster: &Cluster) -> CheckResult {
    const NAME: &str = "Metrics API availability";
    let out = match cluster.kubectl(&["get", "--raw", "/apis/metrics.k8s.io/v1beta1"]) {
        Ok(out) => out,
        Err(e) => {
            return CheckResult::fail(NAME, "Cannot access Metrics API").with_detail(e.stderr())
        }
    };
    match serde_json::from_str::<ApiResourceList>(&out) {
        Ok(list) => {
            let names: Vec<&str> = list.resources.iter().map(|r| r.name.as_str()).collect();
            CheckResult::pass(NAME, "Metrics API responding").with_detail(format!(
                "  API version: {}\n  Resources: {}",
                list.group_version.as_deref().unwrap_or("unknown"),
                names.join(", ")
            ))
        }
        // Reaching the endpoint is what matters.
        Err(_) => CheckResult::pass(NAME, "Metrics API responding (non-JSON response)"),
    }
}

fn check_node_metrics(cluster: &Cluster) -> CheckResult {
    const NAME: &str = "Node metrics";
    let node_count = match cluster.kubectl(&["get", "nodes", "-o", "name"]) {
        Ok(out) => non_empty_lines(&out).len(),
        Err(e) => return CheckResult::fail(NAME, "Cannot get node count").with_detail(e.stderr()),
    };
    let out = match cluster.kubectl(&["top", "nodes", "--no-headers"]) {
        Ok(out) => out,
        Err(e) => {
            return CheckResult::fail(NAME, "Cannot retrieve node metrics").with_detail(e.stderr())
        }
    };
    let lines = non_empty_lines(&out);
    CheckResult::expect(
        NAME,
        lines.len() == node_count,
        format!("Node metrics collected: {}/{} nodes", lines.len(), node_count),
    )
    .with_detail(sample(&lines, "nodes"))
}

fn check_pod_metrics(cluster: &Cluster) -> CheckResult {
    const NAME: &str = "Pod metrics";
    let pod_count = match cluster.kubectl(&["get", "pods", "-A", "--no-headers"]) {
        Ok(out) => non_empty_lines(&out).len(),
        Err(e) => return CheckResult::fail(NAME, "Cannot get pod count").with_detail(e.stderr()),
    };
    let out = match cluster.kubectl_with_timeout(&["top", "pods", "-A", "--no-headers"], POD_METRICS_TIMEOUT) {
        Ok(out) => out,
        Err(e) => {
            return CheckResult::fail(NAME, "Cannot retrieve pod metrics").with_detail(e.stderr())
        }
    };
    let lines = non_empty_lines(&out);
    let coverage = if pod_count > 0 {
        lines.len() as f64 * 100.0 / pod_count as f64
    } else {
        0.0
    };
    CheckResult::expect(
        NAME,
        coverage >= POD_COVERAGE_PERCENT,
        format!(
            "Pod metrics collected: {}/{} pods ({:.1}%)",
            lines.len(),
            pod_count,
            coverage
        ),
    )
    .with_detail(sample(&lines, "pods"))
}

fn check_configuration(cluster: &Cluster, ns: &str) -> CheckResult {
    const NAME: &str = "Configuration";
    let deployment: Workload = match cluster.get("deployment", "metrics-server", Some(ns)) {
        Ok(d) => d,
        Err(e) => return query_failed(NAME, "metrics-server deployment", &e),
    };
    let Some(container) = deployment.spec.template.spec.containers.first() else {
        return CheckResult::fail(NAME, "No containers found in deployment");
    };
    let replicas = deployment.spec.replicas.unwrap_or(0);
    let available = deployment.status.available_replicas.unwrap_or(0);

    let mut lines = vec![
        format!("  Image: {}", container.image),
        format!("  Version: {}", image_version(&container.image)),
        format!("  Replicas: {}/{} available", available, replicas),
    ];
    let key_args: Vec<&String> = container
        .args
        .iter()
        .filter(|a| KEY_ARGS.iter().any(|k| a.contains(k)))
        .collect();
    if !key_args.is_empty() {
        lines.push("  Key args:".into());
        lines.extend(key_args.iter().map(|a| format!("    {}", a)));
    }
    CheckResult::expect(
        NAME,
        replicas > 0 && available >= replicas,
        format!("Replicas: {}/{} available", available, replicas),
    )
    .with_detail(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::{CheckStatus, Verdict};
    use crate::config::Tools;
    use crate::infrastructure::MockRunner;
    use serde_json::json;

    const TOP_PODS: &str = "kubectl top pods -A --no-headers";

    fn healthy() -> MockRunner {
        let pod = json!({
            "metadata": {"name": "metrics-server-6d94bc8694-x2x9q"},
            "status": {"phase": "Running", "conditions": [{"type": "Ready", "status": "True"}]}
        });
        MockRunner::new()
            .on(
                "kubectl get pods -n kube-system -l app.kubernetes.io/name=metrics-server -o json",
                Ok(json!({ "items": [pod] }).to_string()),
            )
            .on(
                "kubectl get svc metrics-server -n kube-system -o json",
                Ok(json!({"metadata": {"name": "metrics-server"},
                          "spec": {"type": "ClusterIP", "clusterIP": "10.96.0.12",
                                   "ports": [{"name": "https", "port": 443, "targetPort": "https"}]}})
                .to_string()),
            )
            .on(
                "kubectl get deployment metrics-server -n kube-system -o json",
                Ok(json!({"spec": {"replicas": 1, "template": {"spec": {"containers": [{
                              "name": "metrics-server",
                              "image": "registry.k8s.io/metrics-server/metrics-server:v0.7.2",
                              "args": ["--cert-dir=/tmp", "--secure-port=10250", "--kubelet-insecure-tls"]}]}}},
                          "status": {"availableReplicas": 1}})
                .to_string()),
            )
            .on(
                "kubectl get apiservice v1beta1.metrics.k8s.io -o json",
                Ok(json!({"spec": {"service": {"name": "metrics-server", "namespace": "kube-system"}},
                          "status": {"conditions": [{"type": "Available", "status": "True", "reason": "Passed"}]}})
                .to_string()),
            )
            .on(
                "kubectl get --raw /apis/metrics.k8s.io/v1beta1",
                Ok(r#"{"groupVersion":"metrics.k8s.io/v1beta1","resources":[{"name":"nodes"},{"name":"pods"}]}"#.into()),
            )
            .on("kubectl get nodes -o name", Ok("node/a\nnode/b\n".into()))
            .on("kubectl top nodes --no-headers", Ok("a 250m 3% 4Gi 2%\nb 300m 4% 5Gi 3%\n".into()))
            .on(
                "kubectl get pods -A --no-headers",
                Ok((0..10).map(|i| format!("ns pod-{} 1/1 Running 0 1d\n", i)).collect()),
            )
            .on(
                TOP_PODS,
                Ok((0..9).map(|i| format!("ns pod-{} 1m 10Mi\n", i)).collect()),
            )
    }

    fn run_with(runner: &MockRunner) -> SuiteReport {
        let tools = Tools::default();
        let cluster = Cluster::new(runner, &tools);
        run(&cluster, &MetricsOptions::default())
    }

    fn find<'a>(report: &'a SuiteReport, name: &str) -> &'a CheckResult {
        report.checks().find(|c| c.name == name).unwrap()
    }

    #[test]
    fn healthy_server_passes_all_seven() {
        let report = run_with(&healthy());
        assert_eq!(report.checks().count(), 7);
        assert!(report.checks().all(|c| c.status == CheckStatus::Pass));
        assert_eq!(report.summary().verdict, Verdict::Pass);

        let config = find(&report, "Configuration");
        let detail = config.detail.as_deref().unwrap();
        assert!(detail.contains("Version: v0.7.2"));
        assert!(detail.contains("--kubelet-insecure-tls"));
        assert!(!detail.contains("--secure-port"));
        assert!(find(&report, "Pod metrics").message.contains("9/10 pods (90.0%)"));
    }

    #[test]
    fn pod_metrics_query_gets_a_longer_timeout() {
        let runner = healthy();
        run_with(&runner);
        let top = runner
            .invocations()
            .into_iter()
            .find(|i| i.command_line() == TOP_PODS)
            .unwrap();
        assert_eq!(top.timeout, Some(POD_METRICS_TIMEOUT));
        let nodes = runner
            .invocations()
            .into_iter()
            .find(|i| i.command_line() == "kubectl top nodes --no-headers")
            .unwrap();
        assert_eq!(nodes.timeout, None);
    }

    #[test]
    fn legacy_label_fallback() {
        let runner = healthy()
            .on(
                "kubectl get pods -n kube-system -l app.kubernetes.io/name=metrics-server -o json",
                Ok(r#"{"items":[]}"#.into()),
            )
            .on(
                "kubectl get pods -n kube-system -l k8s-app=metrics-server -o json",
                Ok(json!({"items": [{"metadata": {"name": "ms-old"},
                    "status": {"phase": "Running", "conditions": [{"type": "Ready", "status": "True"}]}}]})
                .to_string()),
            );
        let report = run_with(&runner);
        assert_eq!(find(&report, "Pod status").status, CheckStatus::Pass);
        assert_eq!(runner.count("kubectl get pods -n kube-system -l k8s-app=metrics-server -o json"), 1);
    }

    #[test]
    fn one_failure_in_seven_is_a_warning() {
        let runner = healthy().on(TOP_PODS, Ok("ns pod-0 1m 10Mi\n".into()));
        let report = run_with(&runner);
        assert!(find(&report, "Pod metrics").is_fail());
        // 6 of 7 scored = 85.7%, at or above 85.
        assert_eq!(report.summary().verdict, Verdict::Warn);
        assert!(report.summary().verdict.is_success());
    }

    #[test]
    fn two_failures_fail_the_suite() {
        let runner = healthy()
            .on(TOP_PODS, Ok(String::new()))
            .on("kubectl top nodes --no-headers", MockRunner::failure("metrics not available yet"));
        let report = run_with(&runner);
        assert_eq!(report.summary().verdict, Verdict::Fail);
        let nodes = find(&report, "Node metrics");
        assert_eq!(nodes.detail.as_deref(), Some("metrics not available yet"));
    }

    #[test]
    fn unavailable_api_service_fails() {
        let runner = healthy().on(
            "kubectl get apiservice v1beta1.metrics.k8s.io -o json",
            Ok(json!({"status": {"conditions": [{"type": "Available", "status": "False",
                                                 "reason": "FailedDiscoveryCheck"}]}})
            .to_string()),
        );
        let report = run_with(&runner);
        let api = find(&report, "API service registration");
        assert!(api.is_fail());
        assert!(api.detail.as_deref().unwrap().contains("FailedDiscoveryCheck"));
    }
}

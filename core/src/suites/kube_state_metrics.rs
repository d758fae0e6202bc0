//! kube-state-metrics health check.
//!
//! Eight checks over the pods, Service, metrics endpoint, ServiceMonitor
//! and Deployment. The metrics page is fetched once through the API
//! server's pod proxy and shared by the endpoint, core-metric and
//! freshness checks.

use crate::check::{CheckResult, PassPolicy, SuiteReport};
use crate::cluster::{Cluster, Pod, Service, Workload};
use crate::snapshot::collect::image_version;

use super::prometheus_stack::ServiceMonitor;
use super::{non_empty_lines, pods_status, query_failed};

pub const DEFAULT_NAMESPACE: &str = "kube-system";
pub const SELECTOR: &str = "app.kubernetes.io/name=kube-state-metrics";
pub const METRICS_PORT: u16 = 8080;

pub const CORE_METRICS: [&str; 7] = [
    "kube_pod_info",
    "kube_pod_status_phase",
    "kube_node_info",
    "kube_node_status_condition",
    "kube_deployment_status_replicas",
    "kube_daemonset_status_number_ready",
    "kube_namespace_status_phase",
];

/// Share of `CORE_METRICS` that must be exposed.
const CORE_METRICS_PERCENT: f64 = 80.0;

/// Scraped counts may trail the live cluster by this much.
const NODE_TOLERANCE: usize = 1;
const POD_TOLERANCE: usize = 5;

/// Resources kube-state-metrics exports when `--resources` is not set.
pub const DEFAULT_RESOURCES: [&str; 13] = [
    "pods",
    "nodes",
    "deployments",
    "daemonsets",
    "statefulsets",
    "jobs",
    "cronjobs",
    "services",
    "namespaces",
    "persistentvolumes",
    "persistentvolumeclaims",
    "configmaps",
    "secrets",
];

const CRITICAL_RESOURCES: [&str; 3] = ["pods", "nodes", "deployments"];

const ENDPOINT_SAMPLE: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateMetricsOptions {
    pub namespace: String,
    pub pass_percent: u8,
}

impl Default for StateMetricsOptions {
    fn default() -> Self {
        StateMetricsOptions {
            namespace: DEFAULT_NAMESPACE.into(),
            pass_percent: 75,
        }
    }
}

pub fn metrics_path(ns: &str, pod: &str) -> String {
    format!(
        "/api/v1/namespaces/{}/pods/{}:{}/proxy/metrics",
        ns, pod, METRICS_PORT
    )
}

/// Number of samples of `metric`, i.e. lines starting `metric{`.
pub fn series_count(metrics: &str, metric: &str) -> usize {
    let prefix = format!("{}{{", metric);
    metrics.lines().filter(|l| l.starts_with(&prefix)).count()
}

/// The metrics page, or why it could not be read.
type Scrape = Result<String, String>;

pub fn run(cluster: &Cluster, opts: &StateMetricsOptions) -> SuiteReport {
    let mut report = SuiteReport::new(
        "Kube-State-Metrics Health Check",
        PassPolicy::Threshold {
            percent: opts.pass_percent,
        },
    );
    let ns = opts.namespace.as_str();
    report.context("Namespace", ns);
    report.context("Component", "kube-state-metrics");

    report.section("Deployment");
    let pods: Result<Vec<Pod>, _> = cluster.list("pods", Some(ns), Some(SELECTOR));
    let scrape: Scrape = match &pods {
        Ok(pods) => {
            report.push(pods_status("Pod status", "kube-state-metrics pods", pods));
            match pods.iter().find(|p| p.is_running()) {
                Some(pod) => cluster
                    .kubectl(&["get", "--raw", &metrics_path(ns, pod.name())])
                    .map_err(|e| e.to_string()),
                None => Err("No running kube-state-metrics pod available".into()),
            }
        }
        Err(e) => {
            report.push(query_failed("Pod status", "kube-state-metrics pods", e));
            Err("No kube-state-metrics pod available".into())
        }
    };
    report.push(check_services(cluster, ns));

    report.section("Metrics");
    report.push(check_endpoint(&scrape));
    report.push(check_core_metrics(&scrape));
    report.push(check_service_monitor(cluster, ns));
    report.push(check_freshness(cluster, &scrape));

    report.section("Configuration");
    let deployment: Result<Option<Workload>, String> = cluster
        .list::<Workload>("deployments", Some(ns), Some(SELECTOR))
        .map(|d| d.into_iter().next())
        .map_err(|e| e.to_string());
    report.push(check_resource_coverage(&deployment));
    report.push(check_configuration(&deployment));
    report
}

fn check_services(cluster: &Cluster, ns: &str) -> CheckResult {
    const NAME: &str = "Service availability";
    let services: Vec<Service> = match cluster.list("svc", Some(ns), Some(SELECTOR)) {
        Ok(s) => s,
        Err(e) => return query_failed(NAME, "kube-state-metrics service", &e),
    };
    if services.is_empty() {
        return CheckResult::fail(NAME, "No kube-state-metrics service found");
    }
    let mut lines = Vec::new();
    for svc in &services {
        let ports: Vec<String> = svc.spec.ports.iter().map(|p| p.mapping()).collect();
        lines.push(format!("  {}: {}", svc.metadata.name, svc.kind()));
        lines.push(format!("    ClusterIP: {}", svc.cluster_ip()));
        lines.push(format!("    Ports: {}", ports.join(", ")));
    }
    CheckResult::pass(NAME, format!("Found {} service(s)", services.len()))
        .with_detail(lines.join("\n"))
}

fn check_endpoint(scrape: &Scrape) -> CheckResult {
    const NAME: &str = "Metrics endpoint";
    let metrics = match scrape {
        Ok(m) => m,
        Err(e) => return CheckResult::fail(NAME, "Cannot access metrics endpoint").with_detail(e.clone()),
    };
    if !metrics.contains("kube_") && !metrics.contains("HELP") {
        return CheckResult::fail(NAME, "Metrics endpoint returned no kube-state-metrics output");
    }
    let sample: Vec<String> = metrics
        .lines()
        .take(ENDPOINT_SAMPLE)
        .map(|l| format!("  {}", l))
        .collect();
    CheckResult::pass(NAME, "Metrics endpoint responding").with_detail(sample.join("\n"))
}

fn check_core_metrics(scrape: &Scrape) -> CheckResult {
    const NAME: &str = "Core metrics";
    let metrics = match scrape {
        Ok(m) => m,
        Err(e) => return CheckResult::fail(NAME, "Cannot fetch metrics for validation").with_detail(e.clone()),
    };
    let (found, missing): (Vec<&str>, Vec<&str>) =
        CORE_METRICS.iter().copied().partition(|m| metrics.contains(*m));
    let mut lines: Vec<String> = found.iter().map(|m| format!("  ✓ {}", m)).collect();
    lines.extend(missing.iter().map(|m| format!("  ✗ {}", m)));
    let ok = found.len() as f64 * 100.0 >= CORE_METRICS.len() as f64 * CORE_METRICS_PERCENT;
    CheckResult::expect(
        NAME,
        ok,
        format!("Found {}/{} core metrics", found.len(), CORE_METRICS.len()),
    )
    .with_detail(lines.join("\n"))
}

fn check_service_monitor(cluster: &Cluster, ns: &str) -> CheckResult {
    const NAME: &str = "ServiceMonitor";
    let monitors: Vec<ServiceMonitor> = match cluster.list("servicemonitor", Some(ns), Some(SELECTOR)) {
        Ok(m) => m,
        Err(e) => {
            return CheckResult::fail(
                NAME,
                "ServiceMonitor not found (not required without the Prometheus Operator)",
            )
            .with_detail(e.to_string())
        }
    };
    if monitors.is_empty() {
        return CheckResult::fail(NAME, "No ServiceMonitor found for kube-state-metrics");
    }
    let mut lines = Vec::new();
    for m in &monitors {
        lines.push(format!("  {} (namespace: {})", m.metadata.name, m.metadata.namespace));
        for (i, ep) in m.spec.endpoints.iter().enumerate() {
            lines.push(format!(
                "    {}. Port: {}, Path: {}, Interval: {}",
                i + 1,
                ep.port.as_deref().unwrap_or("unknown"),
                ep.path.as_deref().unwrap_or("/metrics"),
                ep.interval.as_deref().unwrap_or("default")
            ));
        }
    }
    CheckResult::pass(NAME, format!("Found {} ServiceMonitor(s)", monitors.len()))
        .with_detail(lines.join("\n"))
}

fn check_freshness(cluster: &Cluster, scrape: &Scrape) -> CheckResult {
    const NAME: &str = "Metric freshness";
    let metrics = match scrape {
        Ok(m) => m,
        Err(e) => return CheckResult::fail(NAME, "Cannot fetch metrics for validation").with_detail(e.clone()),
    };
    let nodes = match cluster.kubectl(&["get", "nodes", "--no-headers"]) {
        Ok(out) => non_empty_lines(&out).len(),
        Err(e) => return CheckResult::fail(NAME, "Cannot get node count").with_detail(e.stderr()),
    };
    let pods = cluster
        .kubectl(&["get", "pods", "-A", "--no-headers"])
        .map(|out| non_empty_lines(&out).len())
        .unwrap_or(0);
    let metric_nodes = series_count(metrics, "kube_node_info");
    let metric_pods = series_count(metrics, "kube_pod_info");

    let fresh = metric_nodes.abs_diff(nodes) <= NODE_TOLERANCE && metric_pods.abs_diff(pods) <= POD_TOLERANCE;
    let message = if fresh {
        "Metrics match the live cluster"
    } else {
        "Metrics may be stale or inaccurate"
    };
    CheckResult::expect(NAME, fresh, message).with_detail(format!(
        "  Nodes: {} (metrics) vs {} (actual)\n  Pods: {} (metrics) vs {} (actual)",
        metric_nodes, nodes, metric_pods, pods
    ))
}

fn check_resource_coverage(deployment: &Result<Option<Workload>, String>) -> CheckResult {
    const NAME: &str = "Resource coverage";
    let deployment = match deployment {
        Ok(Some(d)) => d,
        Ok(None) => return CheckResult::fail(NAME, "No kube-state-metrics deployment found"),
        Err(e) => return query_failed(NAME, "kube-state-metrics deployment", e),
    };
    let configured: Option<Vec<&str>> = deployment
        .spec
        .template
        .spec
        .containers
        .iter()
        .find_map(|c| c.arg_value("--resources"))
        .map(|v| v.split(',').filter(|r| !r.is_empty()).collect());
    let mut resources = configured
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| DEFAULT_RESOURCES.to_vec());
    resources.sort_unstable();

    let missing: Vec<&str> = CRITICAL_RESOURCES
        .iter()
        .copied()
        .filter(|r| !resources.contains(r))
        .collect();
    let detail = format!("  {}", resources.join(", "));
    if missing.is_empty() {
        CheckResult::pass(NAME, format!("Monitoring {} resource type(s)", resources.len()))
            .with_detail(detail)
    } else {
        CheckResult::fail(
            NAME,
            format!("Missing critical resources: {}", missing.join(", ")),
        )
        .with_detail(detail)
    }
}

fn check_configuration(deployment: &Result<Option<Workload>, String>) -> CheckResult {
    const NAME: &str = "Configuration";
    let deployment = match deployment {
        Ok(Some(d)) => d,
        Ok(None) => return CheckResult::fail(NAME, "No kube-state-metrics deployment found"),
        Err(e) => return query_failed(NAME, "kube-state-metrics deployment", e),
    };
    let Some(container) = deployment.spec.template.spec.containers.first() else {
        return CheckResult::fail(NAME, "No containers found in deployment");
    };
    let replicas = deployment.replicas();
    let available = deployment.status.available_replicas.unwrap_or(0);
    let res = &container.resources;
    let quantity = |m: &std::collections::BTreeMap<String, String>, key: &str| {
        m.get(key).cloned().unwrap_or_else(|| "not set".into())
    };
    let detail = [
        format!("  Image: {}", container.image),
        format!("  Version: {}", image_version(&container.image)),
        format!("  Replicas: {}/{} available", available, replicas),
        format!(
            "  Requests: cpu {}, memory {}",
            quantity(&res.requests, "cpu"),
            quantity(&res.requests, "memory")
        ),
        format!(
            "  Limits: cpu {}, memory {}",
            quantity(&res.limits, "cpu"),
            quantity(&res.limits, "memory")
        ),
    ]
    .join("\n");
    CheckResult::expect(
        NAME,
        replicas > 0 && available >= replicas,
        format!("Replicas: {}/{} available", available, replicas),
    )
    .with_detail(detail)
}

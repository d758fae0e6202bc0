//! kube-prometheus-stack health check.
//!
//! Ten checks: the operator, Prometheus, Alertmanager, Grafana and node
//! exporter workloads, the ServiceMonitor and PrometheusRule objects,
//! target health and a live query, and the operator CRDs. Optional
//! components are common, so the suite is judged by a pass-rate threshold.
//!
//! The Prometheus HTTP API is reached through the API server's pod proxy
//! (`kubectl get --raw .../pods/<pod>:9090/proxy/...`), so no local port
//! is bound.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::check::{CheckResult, PassPolicy, SuiteReport};
use crate::cluster::{Cluster, ObjectMeta, Pod, Workload};
use crate::convergence::Presence;

use super::{pods_ready, query_failed};

pub const DEFAULT_NAMESPACE: &str = "prometheus";

const OPERATOR_SELECTOR: &str = "app.kubernetes.io/name=kube-prometheus-stack-prometheus-operator";
const PROMETHEUS_SELECTOR: &str = "app.kubernetes.io/name=prometheus";
const PROMETHEUS_POD_SELECTOR: &str = "app.kubernetes.io/name=prometheus,statefulset.kubernetes.io/pod-name";
const ALERTMANAGER_SELECTOR: &str = "app.kubernetes.io/name=alertmanager";
const GRAFANA_SELECTOR: &str = "app.kubernetes.io/name=grafana";
const NODE_EXPORTER_SELECTOR: &str = "app.kubernetes.io/name=prometheus-node-exporter";

pub const PROMETHEUS_PORT: u16 = 9090;

/// Share of active scrape targets that must be up.
pub const TARGETS_UP_PERCENT: f64 = 90.0;

pub const REQUIRED_CRDS: [&str; 5] = [
    "prometheuses.monitoring.coreos.com",
    "prometheusrules.monitoring.coreos.com",
    "servicemonitors.monitoring.coreos.com",
    "alertmanagers.monitoring.coreos.com",
    "podmonitors.monitoring.coreos.com",
];

const LISTED: usize = 10;
const SAMPLE_TARGETS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrometheusOptions {
    pub namespace: String,
    pub pass_percent: u8,
}

impl Default for PrometheusOptions {
    fn default() -> Self {
        PrometheusOptions {
            namespace: DEFAULT_NAMESPACE.into(),
            pass_percent: 80,
        }
    }
}

// ---------------------------------------------------------------------------
// Operator objects
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceMonitor {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ServiceMonitorSpec,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceMonitorSpec {
    #[serde(default)]
    pub endpoints: Vec<MonitorEndpoint>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MonitorEndpoint {
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub interval: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PrometheusRule {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    spec: RuleSpec,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RuleSpec {
    #[serde(default)]
    groups: Vec<RuleGroup>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RuleGroup {
    #[serde(default)]
    rules: Vec<serde_json::Value>,
}

impl PrometheusRule {
    fn rule_count(&self) -> usize {
        self.spec.groups.iter().map(|g| g.rules.len()).sum()
    }
}

// ---------------------------------------------------------------------------
// Prometheus HTTP API replies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ApiReply<T> {
    #[serde(default)]
    status: String,
    data: Option<T>,
}

#[derive(Debug, Default, Deserialize)]
struct TargetsData {
    #[serde(default, rename = "activeTargets")]
    active_targets: Vec<Target>,
}

#[derive(Debug, Default, Deserialize)]
struct Target {
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    health: String,
}

#[derive(Debug, Default, Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<serde_json::Value>,
}

/// API-server proxy path to a Prometheus pod's HTTP API.
pub fn proxy_path(ns: &str, pod: &str, api: &str) -> String {
    format!(
        "/api/v1/namespaces/{}/pods/{}:{}/proxy{}",
        ns, pod, PROMETHEUS_PORT, api
    )
}

/// GET through the pod proxy and decode a `status: success` reply.
fn prometheus_api<T: DeserializeOwned>(cluster: &Cluster, path: &str) -> Result<T, String> {
    let out = cluster
        .kubectl(&["get", "--raw", path])
        .map_err(|e| e.to_string())?;
    let reply: ApiReply<T> = serde_json::from_str(&out)
        .map_err(|e| format!("cannot parse Prometheus API response: {}", e))?;
    if reply.status != "success" {
        return Err(format!("Prometheus API returned status: {}", reply.status));
    }
    reply
        .data
        .ok_or_else(|| "Prometheus API response has no data".to_string())
}

// ---------------------------------------------------------------------------
// Suite
// ---------------------------------------------------------------------------

pub fn run(cluster: &Cluster, opts: &PrometheusOptions) -> SuiteReport {
    let mut report = SuiteReport::new(
        "Kube-Prometheus-Stack Health Check",
        PassPolicy::Threshold {
            percent: opts.pass_percent,
        },
    );
    let ns = opts.namespace.as_str();
    report.context("Namespace", ns);
    report.context("Component", "kube-prometheus-stack");

    report.section("Components");
    report.push(pods_ready(
        cluster,
        "Prometheus Operator pods",
        ns,
        OPERATOR_SELECTOR,
        "Prometheus Operator pods",
    ));
    report.push(check_statefulsets(cluster, ns, "Prometheus StatefulSet", PROMETHEUS_SELECTOR, "Prometheus"));
    report.push(check_statefulsets(cluster, ns, "Alertmanager StatefulSet", ALERTMANAGER_SELECTOR, "Alertmanager"));
    report.push(check_grafana(cluster, ns));
    report.push(check_node_exporter(cluster, ns));

    report.section("Monitoring Resources");
    report.push(check_service_monitors(cluster, ns));
    report.push(check_rules(cluster, ns));

    report.section("Prometheus API");
    let pod = prometheus_pod(cluster, ns);
    report.push(check_targets(cluster, ns, pod.as_deref()));
    report.push(check_query(cluster, ns, pod.as_deref()));

    report.section("CRDs");
    report.push(check_crds(cluster));
    report
}

/// First running Prometheus server pod.
fn prometheus_pod(cluster: &Cluster, ns: &str) -> Option<String> {
    match cluster.list::<Pod>("pods", Some(ns), Some(PROMETHEUS_POD_SELECTOR)) {
        Ok(pods) => pods
            .into_iter()
            .find(|p| p.is_running())
            .map(|p| p.metadata.name),
        Err(e) => {
            debug!(error = %e, "cannot list Prometheus pods");
            None
        }
    }
}

fn check_statefulsets(cluster: &Cluster, ns: &str, name: &str, selector: &str, what: &str) -> CheckResult {
    let sets: Vec<Workload> = match cluster.list("statefulsets", Some(ns), Some(selector)) {
        Ok(s) => s,
        Err(e) => return query_failed(name, &format!("{} StatefulSets", what), &e),
    };
    if sets.is_empty() {
        return CheckResult::fail(name, format!("No {} StatefulSets found", what));
    }
    let mut healthy = true;
    let mut lines = Vec::new();
    for sts in &sets {
        let ready = sts.status.ready_replicas.unwrap_or(0);
        let ok = ready >= sts.replicas();
        healthy &= ok;
        lines.push(format!(
            "  {}: {}/{} ready {}",
            sts.name(),
            ready,
            sts.replicas(),
            if ok { "✓" } else { "✗" }
        ));
    }
    CheckResult::expect(name, healthy, format!("Found {} {} StatefulSet(s)", sets.len(), what))
        .with_detail(lines.join("\n"))
}

fn check_grafana(cluster: &Cluster, ns: &str) -> CheckResult {
    const NAME: &str = "Grafana deployment";
    let deployments: Vec<Workload> = match cluster.list("deployments", Some(ns), Some(GRAFANA_SELECTOR)) {
        Ok(d) => d,
        Err(e) => return query_failed(NAME, "Grafana deployments", &e),
    };
    if deployments.is_empty() {
        return CheckResult::fail(NAME, "No Grafana deployments found");
    }
    let mut healthy = true;
    let mut lines = Vec::new();
    for d in &deployments {
        let available = d.status.available_replicas.unwrap_or(0);
        let ok = available >= d.replicas();
        healthy &= ok;
        lines.push(format!(
            "  {}: {}/{} available {}",
            d.name(),
            available,
            d.replicas(),
            if ok { "✓" } else { "✗" }
        ));
    }
    CheckResult::expect(
        NAME,
        healthy,
        format!("Found {} Grafana deployment(s)", deployments.len()),
    )
    .with_detail(lines.join("\n"))
}

fn check_node_exporter(cluster: &Cluster, ns: &str) -> CheckResult {
    const NAME: &str = "Node exporter DaemonSet";
    let sets: Vec<Workload> = match cluster.list("daemonsets", Some(ns), Some(NODE_EXPORTER_SELECTOR)) {
        Ok(d) => d,
        Err(e) => return query_failed(NAME, "node exporter DaemonSets", &e),
    };
    if sets.is_empty() {
        return CheckResult::fail(NAME, "No node exporter DaemonSets found");
    }
    let mut healthy = true;
    let mut lines = Vec::new();
    for ds in &sets {
        let desired = ds.status.desired_number_scheduled.unwrap_or(0);
        let ready = ds.status.number_ready.unwrap_or(0);
        let available = ds.status.number_available.unwrap_or(0);
        let ok = ready >= desired && available >= desired;
        healthy &= ok;
        lines.push(format!(
            "  {}: {}/{} ready, {}/{} available {}",
            ds.name(),
            ready,
            desired,
            available,
            desired,
            if ok { "✓" } else { "✗" }
        ));
    }
    CheckResult::expect(
        NAME,
        healthy,
        format!("Found {} node exporter DaemonSet(s)", sets.len()),
    )
    .with_detail(lines.join("\n"))
}

fn check_service_monitors(cluster: &Cluster, ns: &str) -> CheckResult {
    const NAME: &str = "ServiceMonitors";
    let monitors: Vec<ServiceMonitor> = match cluster.list("servicemonitors", Some(ns), None) {
        Ok(m) => m,
        Err(e) => {
            return CheckResult::fail(NAME, "Failed to query ServiceMonitors (CRD may not be installed)")
                .with_detail(e.to_string())
        }
    };
    if monitors.is_empty() {
        return CheckResult::fail(NAME, "No ServiceMonitors found");
    }
    let mut lines: Vec<String> = monitors
        .iter()
        .take(LISTED)
        .map(|m| format!("  {}: {} endpoint(s)", m.metadata.name, m.spec.endpoints.len()))
        .collect();
    if monitors.len() > LISTED {
        lines.push(format!("  ... and {} more", monitors.len() - LISTED));
    }
    CheckResult::pass(NAME, format!("Found {} ServiceMonitor(s)", monitors.len()))
        .with_detail(lines.join("\n"))
}

fn check_rules(cluster: &Cluster, ns: &str) -> CheckResult {
    const NAME: &str = "PrometheusRules";
    let rules: Vec<PrometheusRule> = match cluster.list("prometheusrules", Some(ns), None) {
        Ok(r) => r,
        Err(e) => {
            return CheckResult::fail(NAME, "Failed to query PrometheusRules (CRD may not be installed)")
                .with_detail(e.to_string())
        }
    };
    if rules.is_empty() {
        return CheckResult::fail(NAME, "No PrometheusRules found");
    }
    let groups: usize = rules.iter().map(|r| r.spec.groups.len()).sum();
    let total: usize = rules.iter().map(PrometheusRule::rule_count).sum();
    let mut lines: Vec<String> = rules
        .iter()
        .take(LISTED)
        .map(|r| {
            format!(
                "  {}: {} group(s), {} rule(s)",
                r.metadata.name,
                r.spec.groups.len(),
                r.rule_count()
            )
        })
        .collect();
    if rules.len() > LISTED {
        lines.push(format!("  ... and {} more PrometheusRules", rules.len() - LISTED));
    }
    CheckResult::pass(
        NAME,
        format!(
            "Found {} PrometheusRule(s) with {} group(s) and {} rule(s)",
            rules.len(),
            groups,
            total
        ),
    )
    .with_detail(lines.join("\n"))
}

fn check_targets(cluster: &Cluster, ns: &str, pod: Option<&str>) -> CheckResult {
    const NAME: &str = "Targets health";
    let Some(pod) = pod else {
        return CheckResult::fail(NAME, "No running Prometheus pod available");
    };
    let data: TargetsData = match prometheus_api(cluster, &proxy_path(ns, pod, "/api/v1/targets")) {
        Ok(d) => d,
        Err(e) => return CheckResult::fail(NAME, "Cannot read Prometheus targets").with_detail(e),
    };
    let targets = &data.active_targets;
    let total = targets.len();
    let up = targets.iter().filter(|t| t.health == "up").count();
    let percent = if total > 0 {
        up as f64 * 100.0 / total as f64
    } else {
        0.0
    };

    let mut lines = vec![
        format!("  Up: {}", up),
        format!("  Down: {}", total - up),
    ];
    for t in targets.iter().take(SAMPLE_TARGETS) {
        lines.push(format!(
            "    {}: {} {}",
            t.labels.get("job").map(String::as_str).unwrap_or("unknown"),
            t.health,
            if t.health == "up" { "✓" } else { "✗" }
        ));
    }
    if total > SAMPLE_TARGETS {
        lines.push(format!("    ... and {} more targets", total - SAMPLE_TARGETS));
    }
    CheckResult::expect(
        NAME,
        percent >= TARGETS_UP_PERCENT,
        format!("{}/{} targets up ({:.1}%)", up, total, percent),
    )
    .with_detail(lines.join("\n"))
}

fn check_query(cluster: &Cluster, ns: &str, pod: Option<&str>) -> CheckResult {
    const NAME: &str = "Query";
    let Some(pod) = pod else {
        return CheckResult::fail(NAME, "No running Prometheus pod available");
    };
    let data: QueryData = match prometheus_api(cluster, &proxy_path(ns, pod, "/api/v1/query?query=up")) {
        Ok(d) => d,
        Err(e) => return CheckResult::fail(NAME, "Cannot query Prometheus").with_detail(e),
    };
    if data.result.is_empty() {
        return CheckResult::fail(NAME, "Query 'up' returned no data (no metrics collected yet?)");
    }
    CheckResult::pass(
        NAME,
        format!("Query 'up' returned {} time series", data.result.len()),
    )
}

fn check_crds(cluster: &Cluster) -> CheckResult {
    const NAME: &str = "CRDs";
    let mut lines = Vec::new();
    let mut missing = Vec::new();
    for crd in REQUIRED_CRDS {
        match cluster.presence("crd", crd, None) {
            Ok(Presence::Present) => lines.push(format!("  ✓ {}", crd)),
            Ok(Presence::Absent) => {
                lines.push(format!("  ✗ {}", crd));
                missing.push(crd);
            }
            Err(e) => {
                lines.push(format!("  ✗ {} ({})", crd, e.stderr()));
                missing.push(crd);
            }
        }
    }
    let message = if missing.is_empty() {
        "All required CRDs are installed".to_string()
    } else {
        format!("Missing CRDs: {}", missing.join(", "))
    };
    CheckResult::expect(NAME, missing.is_empty(), message).with_detail(lines.join("\n"))
}

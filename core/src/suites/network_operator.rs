//! NVIDIA Network Operator checklist for InfiniBand NCCL workloads.
//!
//! Cluster-level checks go through kubectl and helm. Node-level checks
//! (VF activation, `ibstat` port state) run over ssh and are skipped with
//! an Info result when `skip_ssh` is set.

use serde::Deserialize;
use tracing::warn;

use crate::check::{CheckResult, CheckStatus, PassPolicy, SuiteReport};
use crate::cluster::{Cluster, HelmRelease, Node, ObjectMeta, Pod};

use super::{query_failed, running_count};

pub const DEFAULT_NAMESPACE: &str = "network-operator";
pub const GPU_NODE_SELECTOR: &str = "nvidia.com/gpu.present=true";

/// InfiniBand interfaces expected on every GPU node.
pub const IB_INTERFACES: [&str; 8] = [
    "ibp24s0", "ibp64s0", "ibp79s0", "ibp94s0", "ibp154s0", "ibp192s0", "ibp206s0", "ibp220s0",
];

/// Virtual functions expected per interface, and allocatable quantity per resource.
pub const VFS_PER_INTERFACE: u32 = 8;

const EXPECTED_IP_POOLS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkOptions {
    /// Nodes to check; empty means every GPU node.
    pub nodes: Vec<String>,
    pub skip_ssh: bool,
    pub namespace: String,
}

impl Default for NetworkOptions {
    fn default() -> Self {
        NetworkOptions {
            nodes: Vec::new(),
            skip_ssh: false,
            namespace: DEFAULT_NAMESPACE.into(),
        }
    }
}

/// `nvidia.com/resibp24s0` and friends, one per interface.
pub fn ib_resource_names() -> Vec<String> {
    IB_INTERFACES
        .iter()
        .map(|iface| format!("nvidia.com/res{}", iface))
        .collect()
}

/// `ibp24s0-sriovnet` and friends, one per interface.
pub fn attachment_names() -> Vec<String> {
    IB_INTERFACES
        .iter()
        .map(|iface| format!("{}-sriovnet", iface))
        .collect()
}

// ---------------------------------------------------------------------------
// Custom resources
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct NicClusterPolicy {
    #[serde(default)]
    status: NicPolicyStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NicPolicyStatus {
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    applied_states: Vec<AppliedState>,
}

#[derive(Debug, Default, Deserialize)]
struct AppliedState {
    #[serde(default)]
    name: String,
    #[serde(default)]
    state: String,
}

#[derive(Debug, Default, Deserialize)]
struct SriovNodeState {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    status: SriovStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SriovStatus {
    #[serde(default)]
    sync_status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct IpPool {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    spec: IpPoolSpec,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpPoolSpec {
    #[serde(default)]
    subnet: Option<String>,
    #[serde(default)]
    per_node_block_size: Option<u32>,
}

/// Any object where only the name matters.
#[derive(Debug, Default, Deserialize)]
struct Named {
    #[serde(default)]
    metadata: ObjectMeta,
}

// ---------------------------------------------------------------------------
// ibstat
// ---------------------------------------------------------------------------

/// One port as reported by `ibstat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IbPort {
    pub ca: String,
    pub port: String,
    pub state: String,
    pub lid: Option<String>,
}

impl IbPort {
    pub fn has_invalid_lid(&self) -> bool {
        matches!(self.lid.as_deref(), Some("0xffff") | Some("65535"))
    }

    pub fn is_healthy(&self) -> bool {
        self.state == "Active" && !self.has_invalid_lid()
    }
}

/// Parse `ibstat` output (or the `CA`/`Port`/`State:`/`Base lid:` lines of it).
pub fn parse_ibstat(output: &str) -> Vec<IbPort> {
    let mut ports: Vec<IbPort> = Vec::new();
    let mut ca: Option<String> = None;
    let mut port: Option<String> = None;

    for line in output.lines().map(str::trim) {
        if line.starts_with("CA '") {
            ca = line.split('\'').nth(1).map(str::to_string);
            port = None;
        } else if line.starts_with("Port ") {
            port = line
                .split_whitespace()
                .nth(1)
                .map(|p| p.trim_end_matches(':').to_string());
        } else if let Some(state) = line.strip_prefix("State:") {
            if let (Some(ca), Some(port)) = (&ca, &port) {
                ports.push(IbPort {
                    ca: ca.clone(),
                    port: port.clone(),
                    state: state.trim().to_string(),
                    lid: None,
                });
            }
        } else if line.to_lowercase().starts_with("base lid:") {
            let lid = line.get("base lid:".len()..).unwrap_or("").trim().to_string();
            if let Some(last) = ports.last_mut() {
                last.lid = Some(lid);
            }
        }
    }
    ports
}

// ---------------------------------------------------------------------------
// Suite
// ---------------------------------------------------------------------------

pub fn run(cluster: &Cluster, opts: &NetworkOptions) -> SuiteReport {
    let mut report = SuiteReport::new("NVIDIA Network Operator Health Check", PassPolicy::Strict);
    let ns = opts.namespace.as_str();
    report.context("Namespace", ns);
    if opts.nodes.is_empty() {
        report.context("Target nodes", format!("All GPU nodes ({})", GPU_NODE_SELECTOR));
    } else {
        report.context("Target nodes", opts.nodes.join(", "));
    }

    report.section("Network Operator Deployment");
    report.push(check_release(cluster, ns));
    report.push(check_operator_pods(cluster, ns));
    report.push(check_nic_cluster_policy(cluster));

    let nodes = if opts.nodes.is_empty() {
        gpu_nodes(cluster)
    } else {
        opts.nodes.clone()
    };

    report.section("SR-IOV Configuration");
    report.push(check_sriov_states(cluster, ns, &opts.nodes));
    report.push(check_ib_resources(cluster, &nodes));

    report.section("NV-IPAM Configuration");
    report.push(check_nv_ipam(cluster, ns));

    report.section("RDMA Shared Device Plugin");
    report.push(check_rdma_plugin(cluster, ns));

    report.section("Secondary Network Components");
    report.push(check_secondary_network(cluster, ns));

    report.section("Network Attachment Definitions");
    report.push(check_attachments(cluster, ns));

    if opts.skip_ssh {
        report.section("Node-Level Checks");
        report.push(CheckResult::info("Node-level checks", "Skipped (--skip-ssh)"));
    } else {
        report.section("Node-Level InfiniBand Configuration");
        if nodes.is_empty() {
            report.push(CheckResult::warn("Node-level checks", "No GPU nodes found for SSH checks"));
        }
        for node in &nodes {
            report.push(check_vf_activation(cluster, node));
            report.push(check_ib_ports(cluster, node));
        }
    }
    report
}

/// Names of nodes labelled `nvidia.com/gpu.present=true`; empty on error.
pub fn gpu_nodes(cluster: &Cluster) -> Vec<String> {
    match cluster.kubectl(&[
        "get",
        "nodes",
        "-l",
        GPU_NODE_SELECTOR,
        "-o",
        "jsonpath={.items[*].metadata.name}",
    ]) {
        Ok(out) => out.split_whitespace().map(str::to_string).collect(),
        Err(e) => {
            warn!(error = %e, "cannot list GPU nodes");
            Vec::new()
        }
    }
}

fn check_release(cluster: &Cluster, ns: &str) -> CheckResult {
    const NAME: &str = "Helm release";
    let out = match cluster.helm(&["list", "-n", ns, "-o", "json"]) {
        Ok(out) => out,
        Err(e) => return query_failed(NAME, "Helm releases", &e),
    };
    let releases: Vec<HelmRelease> = match serde_json::from_str(&out) {
        Ok(r) => r,
        Err(e) => return CheckResult::fail(NAME, "Failed to parse Helm output").with_detail(e.to_string()),
    };
    let Some(release) = releases.iter().find(|r| r.name == "network-operator") else {
        return CheckResult::fail(NAME, "Network Operator Helm release not found");
    };
    let detail = format!("Chart: {}, Status: {}", release.chart, release.status);
    if release.status == "deployed" {
        CheckResult::pass(NAME, "Network Operator deployed").with_detail(detail)
    } else {
        CheckResult::warn(NAME, format!("Network Operator status: {}", release.status)).with_detail(detail)
    }
}

fn check_operator_pods(cluster: &Cluster, ns: &str) -> CheckResult {
    const NAME: &str = "Operator pods";
    let pods: Vec<Pod> =
        match cluster.list("pods", Some(ns), Some("app.kubernetes.io/name=network-operator")) {
            Ok(p) => p,
            Err(e) => return query_failed(NAME, "operator pods", &e),
        };
    if pods.is_empty() {
        return CheckResult::fail(NAME, "No Network Operator pods found");
    }
    let (running, total) = running_count(&pods);
    let detail = pods
        .iter()
        .filter(|p| !p.is_running())
        .map(|p| format!("  Pod {}: {}", p.name(), p.phase()))
        .collect::<Vec<_>>()
        .join("\n");
    CheckResult::expect(
        NAME,
        running == total,
        format!("Network Operator pods running ({}/{})", running, total),
    )
    .with_detail(detail)
}

fn check_nic_cluster_policy(cluster: &Cluster) -> CheckResult {
    const NAME: &str = "NicClusterPolicy";
    let policy: NicClusterPolicy =
        match cluster.get("nicclusterpolicies.mellanox.com", "nic-cluster-policy", None) {
            Ok(p) => p,
            Err(e) => {
                return CheckResult::fail(NAME, "NicClusterPolicy 'nic-cluster-policy' not found")
                    .with_detail(e.to_string())
                    .with_remediation("Create a NicClusterPolicy to enable Network Operator components")
            }
        };
    let state = policy.status.state.as_deref().unwrap_or("unknown");
    let mut all_ready = true;
    let mut lines = Vec::new();
    for component in &policy.status.applied_states {
        match component.state.as_str() {
            "ready" => lines.push(format!("  {}: ready", component.name)),
            "ignore" => lines.push(format!("  {}: ignored (not configured)", component.name)),
            other => {
                all_ready = false;
                lines.push(format!("  {}: {}", component.name, other));
            }
        }
    }
    if state == "ready" && all_ready {
        CheckResult::pass(NAME, "NicClusterPolicy is ready").with_detail(lines.join("\n"))
    } else {
        CheckResult::warn(NAME, format!("NicClusterPolicy state: {}", state)).with_detail(lines.join("\n"))
    }
}

fn check_sriov_states(cluster: &Cluster, ns: &str, nodes: &[String]) -> CheckResult {
    const NAME: &str = "SR-IOV node states";
    let states: Vec<SriovNodeState> = match cluster.list("sriovnetworknodestates", Some(ns), None) {
        Ok(s) => s,
        Err(e) => return query_failed(NAME, "SriovNetworkNodeState resources", &e),
    };
    if states.is_empty() {
        return CheckResult::fail(NAME, "No SriovNetworkNodeState resources found");
    }
    let mut lines = Vec::new();
    let mut failed = 0;
    for state in &states {
        let node = &state.metadata.name;
        if !nodes.is_empty() && !nodes.contains(node) {
            continue;
        }
        let sync = state.status.sync_status.as_deref().unwrap_or("Unknown");
        if sync != "Succeeded" {
            failed += 1;
        }
        lines.push(format!("  {}: {}", node, sync));
    }
    if lines.is_empty() {
        return CheckResult::warn(NAME, "No matching nodes found in SriovNetworkNodeState");
    }
    let detail = lines.join("\n");
    if failed > 0 {
        CheckResult::fail(
            NAME,
            format!("SR-IOV configuration not succeeded on {} node(s)", failed),
        )
        .with_detail(detail)
    } else {
        CheckResult::pass(
            NAME,
            format!("SR-IOV configuration succeeded on {} node(s)", lines.len()),
        )
        .with_detail(detail)
    }
}

fn check_ib_resources(cluster: &Cluster, nodes: &[String]) -> CheckResult {
    const NAME: &str = "IB extended resources";
    if nodes.is_empty() {
        return CheckResult::warn(NAME, "No nodes specified for checking");
    }
    let expected = ib_resource_names();
    let mut lines = Vec::new();
    let mut failed = 0;
    for name in nodes {
        let node: Node = match cluster.get("node", name, None) {
            Ok(n) => n,
            Err(_) => {
                failed += 1;
                lines.push(format!("  {}: Failed to query", name));
                continue;
            }
        };
        let quantities: Vec<u32> = expected
            .iter()
            .filter_map(|r| node.status.allocatable.get(r))
            .map(|q| q.parse().unwrap_or(0))
            .collect();
        if quantities.len() != expected.len() {
            failed += 1;
            lines.push(format!(
                "  {}: Only {}/{} IB resources found",
                name,
                quantities.len(),
                expected.len()
            ));
        } else if quantities.iter().any(|q| *q != VFS_PER_INTERFACE) {
            failed += 1;
            lines.push(format!(
                "  {}: Resources present but incorrect quantities: {:?}",
                name, quantities
            ));
        } else {
            lines.push(format!(
                "  {}: All {} IB resources available ({} VFs each)",
                name,
                expected.len(),
                VFS_PER_INTERFACE
            ));
        }
    }
    let detail = lines.join("\n");
    if failed > 0 {
        CheckResult::fail(
            NAME,
            format!("IB extended resources missing/incorrect on {} node(s)", failed),
        )
        .with_detail(detail)
    } else {
        CheckResult::pass(
            NAME,
            format!("All IB extended resources available on {} node(s)", nodes.len()),
        )
        .with_detail(detail)
    }
}

fn check_nv_ipam(cluster: &Cluster, ns: &str) -> CheckResult {
    const NAME: &str = "NV-IPAM";
    let pods: Vec<Pod> = match cluster.list("pods", Some(ns), Some("component=nv-ipam-node")) {
        Ok(p) => p,
        Err(e) => return query_failed(NAME, "nv-ipam pods", &e),
    };
    if pods.is_empty() {
        return CheckResult::fail(NAME, "NV-IPAM pods not found").with_remediation(
            "Enable nvIpam in NicClusterPolicy with the nvidia-k8s-ipam image",
        );
    }
    let (running, total) = running_count(&pods);
    if running != total {
        return CheckResult::fail(
            NAME,
            format!("Not all nv-ipam pods running ({}/{})", running, total),
        );
    }
    let pools: Vec<IpPool> = match cluster.list("ippools.nv-ipam.nvidia.com", Some(ns), None) {
        Ok(p) => p,
        Err(_) => {
            return CheckResult::warn(
                NAME,
                format!("NV-IPAM pods running ({}/{}) but IPPools not found", running, total),
            )
            .with_detail("IPPools may not be created yet")
        }
    };
    if pools.len() != EXPECTED_IP_POOLS {
        return CheckResult::warn(
            NAME,
            format!(
                "NV-IPAM running but expected {} IPPools, found {}",
                EXPECTED_IP_POOLS,
                pools.len()
            ),
        );
    }
    let detail = pools
        .iter()
        .map(|pool| {
            let block = pool.spec.per_node_block_size.unwrap_or(0);
            let subnet = pool.spec.subnet.as_deref().unwrap_or("unknown");
            if block == VFS_PER_INTERFACE {
                format!("  {}: {}, blockSize={}", pool.metadata.name, subnet, block)
            } else {
                format!(
                    "  {}: {}, blockSize={} (expected {})",
                    pool.metadata.name, subnet, block, VFS_PER_INTERFACE
                )
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    CheckResult::pass(NAME, format!("NV-IPAM running with {} IPPools", pools.len())).with_detail(detail)
}

fn check_rdma_plugin(cluster: &Cluster, ns: &str) -> CheckResult {
    const NAME: &str = "RDMA device plugin";
    let pods: Vec<Pod> = match cluster.list("pods", Some(ns), Some("app=rdma-shared-dp")) {
        Ok(p) => p,
        Err(e) => return query_failed(NAME, "RDMA device plugin pods", &e),
    };
    if pods.is_empty() {
        return CheckResult::fail(NAME, "RDMA Shared Device Plugin not found")
            .with_remediation("Enable rdmaSharedDevicePlugin in NicClusterPolicy");
    }
    let (running, total) = running_count(&pods);
    if running != total {
        return CheckResult::fail(
            NAME,
            format!("Not all RDMA device plugin pods running ({}/{})", running, total),
        );
    }
    let check = CheckResult::pass(NAME, format!("RDMA Device Plugin running on {} node(s)", total));
    match cluster.list::<Node>("nodes", None, None) {
        Ok(nodes) => {
            let with_rdma = nodes
                .iter()
                .filter(|n| n.status.allocatable.contains_key("rdma/rdma_shared_device_a"))
                .count();
            check.with_detail(format!(
                "  rdma_shared_device_a resources available on {} node(s)",
                with_rdma
            ))
        }
        Err(_) => check,
    }
}

fn check_secondary_network(cluster: &Cluster, ns: &str) -> CheckResult {
    const NAME: &str = "Secondary network components";
    const COMPONENTS: [(&str, &str); 3] = [
        ("Multus CNI", "kube-multus-ds"),
        ("CNI Plugins", "cni-plugins-ds"),
        ("Whereabouts IPAM", "whereabouts"),
    ];
    let pods: Vec<Pod> = match cluster.list("pods", Some(ns), None) {
        Ok(p) => p,
        Err(e) => return query_failed(NAME, "pods", &e),
    };
    let mut all_running = true;
    let mut lines = Vec::new();
    for (label, pattern) in COMPONENTS {
        let matching: Vec<&Pod> = pods.iter().filter(|p| p.name().contains(pattern)).collect();
        let running = matching.iter().filter(|p| p.is_running()).count();
        if matching.is_empty() {
            all_running = false;
            lines.push(format!("  {}: Not found", label));
        } else if running == matching.len() {
            lines.push(format!("  {}: Running ({} pod(s))", label, running));
        } else {
            all_running = false;
            lines.push(format!("  {}: {}/{} running", label, running, matching.len()));
        }
    }
    let message = if all_running {
        "All secondary network components running"
    } else {
        "Some secondary network components not running"
    };
    CheckResult::expect(NAME, all_running, message).with_detail(lines.join("\n"))
}

fn check_attachments(cluster: &Cluster, ns: &str) -> CheckResult {
    const NAME: &str = "Network attachment definitions";
    let nads: Vec<Named> = match cluster.list("network-attachment-definitions", Some(ns), None) {
        Ok(n) => n,
        Err(e) => return query_failed(NAME, "Network Attachment Definitions", &e),
    };
    let expected = attachment_names();
    let missing: Vec<&String> = expected
        .iter()
        .filter(|name| !nads.iter().any(|n| &n.metadata.name == *name))
        .collect();
    if missing.is_empty() {
        CheckResult::pass(
            NAME,
            format!("All {} Network Attachment Definitions found", expected.len()),
        )
        .with_detail(format!("  Namespace: {}", ns))
    } else {
        let names: Vec<&str> = missing.iter().map(|s| s.as_str()).collect();
        CheckResult::fail(NAME, format!("Missing {} NAD(s)", missing.len()))
            .with_detail(format!("  Missing: {}", names.join(", ")))
    }
}

fn check_vf_activation(cluster: &Cluster, node: &str) -> CheckResult {
    let name = format!("VF activation ({})", node);
    let mut lines = Vec::new();
    let mut failed = 0;
    for iface in IB_INTERFACES {
        let cmd = format!("cat /sys/class/net/{}/device/sriov_numvfs 2>/dev/null", iface);
        match cluster.ssh(node, &cmd) {
            Ok(out) => {
                let vfs = out.trim();
                if vfs == VFS_PER_INTERFACE.to_string() {
                    lines.push(format!("  {}: {} VFs active", iface, vfs));
                } else {
                    failed += 1;
                    lines.push(format!("  {}: {} VFs (expected {})", iface, vfs, VFS_PER_INTERFACE));
                }
            }
            Err(_) => {
                failed += 1;
                lines.push(format!("  {}: Not found or inaccessible", iface));
            }
        }
    }
    let detail = lines.join("\n");
    if failed > 0 {
        CheckResult::fail(
            name,
            format!("{}: VF activation issues on {} interface(s)", node, failed),
        )
        .with_detail(detail)
    } else {
        CheckResult::pass(
            name,
            format!(
                "{}: All {} IB interfaces have {} VFs active",
                node,
                IB_INTERFACES.len(),
                VFS_PER_INTERFACE
            ),
        )
        .with_detail(detail)
    }
}

fn check_ib_ports(cluster: &Cluster, node: &str) -> CheckResult {
    let name = format!("IB ports ({})", node);
    let out = match cluster.ssh(node, "ibstat 2>/dev/null | grep -E '(CA |Port |State:|lid:)'") {
        Ok(out) => out,
        Err(_) => {
            return CheckResult::fail(name, format!("{}: Failed to run ibstat", node))
                .with_remediation("Ensure InfiniBand drivers are loaded")
        }
    };
    let ports = parse_ibstat(&out);
    if ports.is_empty() {
        return CheckResult::warn(name, format!("{}: ibstat reported no ports", node));
    }
    let lines: Vec<String> = ports
        .iter()
        .map(|p| match (&p.lid, p.is_healthy()) {
            (Some(lid), true) => format!("  {} port {}: {}, LID {}", p.ca, p.port, p.state, lid),
            (None, true) => format!("  {} port {}: {}", p.ca, p.port, p.state),
            (Some(lid), false) if p.has_invalid_lid() => {
                format!("  {} port {}: {}, LID {} (invalid)", p.ca, p.port, p.state, lid)
            }
            _ => format!("  {} port {}: {} (expected Active)", p.ca, p.port, p.state),
        })
        .collect();
    let unhealthy = ports.iter().filter(|p| !p.is_healthy()).count();
    let status = if unhealthy > 0 {
        CheckStatus::Warn
    } else {
        CheckStatus::Pass
    };
    let message = if unhealthy > 0 {
        format!("{}: {} IB port(s) not active or invalid LID", node, unhealthy)
    } else {
        format!("{}: All IB ports Active", node)
    };
    CheckResult::new(name, status, message).with_detail(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::Verdict;
    use crate::config::Tools;
    use crate::infrastructure::MockRunner;
    use serde_json::json;

    const IBSTAT: &str = "\
CA 'mlx5_0'
\tCA type: MT4129
\tPort 1:
\t\tState: Active
\t\tPhysical state: LinkUp
\t\tBase lid: 12
CA 'mlx5_1'
\tPort 1:
\t\tState: Down
\t\tBase lid: 0xffff
";

    fn pods(names: &[&str], phase: &str) -> String {
        let items: Vec<_> = names
            .iter()
            .map(|n| json!({"metadata": {"name": n}, "status": {"phase": phase}}))
            .collect();
        json!({ "items": items }).to_string()
    }

    fn gpu_node(name: &str) -> String {
        let allocatable: serde_json::Map<String, serde_json::Value> = ib_resource_names()
            .into_iter()
            .map(|r| (r, json!("8")))
            .chain([("rdma/rdma_shared_device_a".to_string(), json!("63"))])
            .collect();
        json!({"metadata": {"name": name}, "status": {"allocatable": allocatable}}).to_string()
    }

    fn healthy() -> MockRunner {
        let nads: Vec<_> = attachment_names()
            .iter()
            .map(|n| json!({"metadata": {"name": n}}))
            .collect();
        let pools: Vec<_> = (0..8)
            .map(|i| {
                json!({"metadata": {"name": format!("pool-{}", i)},
                       "spec": {"subnet": format!("10.{}.0.0/16", i), "perNodeBlockSize": 8}})
            })
            .collect();
        MockRunner::new()
            .on(
                "helm list -n network-operator -o json",
                Ok(r#"[{"name":"network-operator","chart":"network-operator-25.7.0","status":"deployed"}]"#.into()),
            )
            .on(
                "kubectl get pods -n network-operator -l app.kubernetes.io/name=network-operator -o json",
                Ok(pods(&["network-operator-7d9"], "Running")),
            )
            .on(
                "kubectl get nicclusterpolicies.mellanox.com nic-cluster-policy -o json",
                Ok(json!({"status": {"state": "ready", "appliedStates": [
                    {"name": "state-OFED", "state": "ignore"},
                    {"name": "state-multus-cni", "state": "ready"}
                ]}})
                .to_string()),
            )
            .on(
                "kubectl get nodes -l nvidia.com/gpu.present=true -o jsonpath={.items[*].metadata.name}",
                Ok("dgx030 dgx031".into()),
            )
            .on(
                "kubectl get sriovnetworknodestates -n network-operator -o json",
                Ok(json!({"items": [
                    {"metadata": {"name": "dgx030"}, "status": {"syncStatus": "Succeeded"}},
                    {"metadata": {"name": "dgx031"}, "status": {"syncStatus": "Succeeded"}}
                ]})
                .to_string()),
            )
            .on("kubectl get node dgx030 -o json", Ok(gpu_node("dgx030")))
            .on("kubectl get node dgx031 -o json", Ok(gpu_node("dgx031")))
            .on(
                "kubectl get pods -n network-operator -l component=nv-ipam-node -o json",
                Ok(pods(&["nv-ipam-node-a", "nv-ipam-node-b"], "Running")),
            )
            .on(
                "kubectl get ippools.nv-ipam.nvidia.com -n network-operator -o json",
                Ok(json!({ "items": pools }).to_string()),
            )
            .on(
                "kubectl get pods -n network-operator -l app=rdma-shared-dp -o json",
                Ok(pods(&["rdma-shared-dp-ds-x"], "Running")),
            )
            .on(
                "kubectl get nodes -o json",
                Ok(format!(r#"{{"items":[{}]}}"#, gpu_node("dgx030"))),
            )
            .on(
                "kubectl get pods -n network-operator -o json",
                Ok(pods(&["kube-multus-ds-1", "cni-plugins-ds-1", "whereabouts-1"], "Running")),
            )
            .on(
                "kubectl get network-attachment-definitions -n network-operator -o json",
                Ok(json!({ "items": nads }).to_string()),
            )
    }

    fn run_with(runner: &MockRunner, opts: &NetworkOptions) -> SuiteReport {
        let tools = Tools::default();
        let cluster = Cluster::new(runner, &tools);
        run(&cluster, opts)
    }

    fn find<'a>(report: &'a SuiteReport, name: &str) -> &'a CheckResult {
        report
            .checks()
            .find(|c| c.name == name)
            .unwrap_or_else(|| panic!("no check named {}", name))
    }

    #[test]
    fn resource_and_attachment_names() {
        assert_eq!(ib_resource_names()[0], "nvidia.com/resibp24s0");
        assert_eq!(attachment_names()[7], "ibp220s0-sriovnet");
    }

    #[test]
    fn parse_ibstat_ports_and_lids() {
        let ports = parse_ibstat(IBSTAT);
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].ca, "mlx5_0");
        assert_eq!(ports[0].port, "1");
        assert_eq!(ports[0].lid.as_deref(), Some("12"));
        assert!(ports[0].is_healthy());
        assert_eq!(ports[1].state, "Down");
        assert!(ports[1].has_invalid_lid());
        assert!(!ports[1].is_healthy());
    }

    #[test]
    fn physical_state_is_not_port_state() {
        let ports = parse_ibstat("CA 'mlx5_0'\nPort 1:\nPhysical state: LinkUp\nState: Active\n");
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].state, "Active");
    }

    #[test]
    fn healthy_cluster_with_skip_ssh_passes() {
        let runner = healthy();
        let opts = NetworkOptions {
            skip_ssh: true,
            ..NetworkOptions::default()
        };
        let report = run_with(&runner, &opts);
        let failing: Vec<&str> = report
            .checks()
            .filter(|c| c.status != CheckStatus::Pass && c.status != CheckStatus::Info)
            .map(|c| c.name.as_str())
            .collect();
        assert!(failing.is_empty(), "unexpected non-pass: {:?}", failing);
        assert_eq!(find(&report, "Node-level checks").status, CheckStatus::Info);
        assert_eq!(report.summary().verdict, Verdict::Pass);
        assert!(runner.executed_commands().iter().all(|c| !c.starts_with("ssh")));
    }

    #[test]
    fn explicit_nodes_filter_sriov_states() {
        let runner = healthy().on(
            "kubectl get sriovnetworknodestates -n network-operator -o json",
            Ok(json!({"items": [
                {"metadata": {"name": "dgx030"}, "status": {"syncStatus": "Succeeded"}},
                {"metadata": {"name": "dgx099"}, "status": {"syncStatus": "InProgress"}}
            ]})
            .to_string()),
        );
        let opts = NetworkOptions {
            nodes: vec!["dgx030".into()],
            skip_ssh: true,
            ..NetworkOptions::default()
        };
        let report = run_with(&runner, &opts);
        assert_eq!(find(&report, "SR-IOV node states").status, CheckStatus::Pass);
        assert_eq!(runner.count("kubectl get node dgx031 -o json"), 0);
    }

    #[test]
    fn unready_policy_is_a_warning() {
        let runner = healthy().on(
            "kubectl get nicclusterpolicies.mellanox.com nic-cluster-policy -o json",
            Ok(json!({"status": {"state": "notReady", "appliedStates": [
                {"name": "state-rdma-shared-dp", "state": "notReady"}
            ]}})
            .to_string()),
        );
        let opts = NetworkOptions {
            skip_ssh: true,
            ..NetworkOptions::default()
        };
        let report = run_with(&runner, &opts);
        let policy = find(&report, "NicClusterPolicy");
        assert_eq!(policy.status, CheckStatus::Warn);
        assert!(policy.detail.as_deref().unwrap().contains("state-rdma-shared-dp: notReady"));
        assert_eq!(report.summary().verdict, Verdict::Warn);
    }

    #[test]
    fn wrong_vf_quantity_fails_ib_resources() {
        let mut node: serde_json::Value = serde_json::from_str(&gpu_node("dgx030")).unwrap();
        node["status"]["allocatable"]["nvidia.com/resibp64s0"] = json!("4");
        let runner = healthy().on("kubectl get node dgx030 -o json", Ok(node.to_string()));
        let opts = NetworkOptions {
            skip_ssh: true,
            ..NetworkOptions::default()
        };
        let report = run_with(&runner, &opts);
        let resources = find(&report, "IB extended resources");
        assert!(resources.is_fail());
        assert!(resources.detail.as_deref().unwrap().contains("incorrect quantities"));
    }

    #[test]
    fn missing_pools_and_nads() {
        let runner = healthy()
            .on(
                "kubectl get ippools.nv-ipam.nvidia.com -n network-operator -o json",
                Ok(r#"{"items":[]}"#.into()),
            )
            .on(
                "kubectl get network-attachment-definitions -n network-operator -o json",
                Ok(json!({"items": [{"metadata": {"name": "ibp24s0-sriovnet"}}]}).to_string()),
            );
        let opts = NetworkOptions {
            skip_ssh: true,
            ..NetworkOptions::default()
        };
        let report = run_with(&runner, &opts);
        assert_eq!(find(&report, "NV-IPAM").status, CheckStatus::Warn);
        let nads = find(&report, "Network attachment definitions");
        assert_eq!(nads.message, "Missing 7 NAD(s)");
    }

    #[test]
    fn ssh_checks_per_node() {
        let mut runner = healthy();
        for iface in IB_INTERFACES {
            let cmd = format!(
                "ssh -o StrictHostKeyChecking=no -o BatchMode=yes dgx030 \
                 cat /sys/class/net/{}/device/sriov_numvfs 2>/dev/null",
                iface
            );
            let vfs = if iface == "ibp206s0" { "0" } else { "8" };
            runner = runner.on(&cmd, Ok(format!("{}\n", vfs)));
        }
        runner = runner.on(
            "ssh -o StrictHostKeyChecking=no -o BatchMode=yes dgx030 \
             ibstat 2>/dev/null | grep -E '(CA |Port |State:|lid:)'",
            Ok(IBSTAT.into()),
        );
        let opts = NetworkOptions {
            nodes: vec!["dgx030".into()],
            ..NetworkOptions::default()
        };
        let report = run_with(&runner, &opts);

        let vf = find(&report, "VF activation (dgx030)");
        assert!(vf.is_fail());
        assert!(vf.detail.as_deref().unwrap().contains("ibp206s0: 0 VFs (expected 8)"));

        let ports = find(&report, "IB ports (dgx030)");
        assert_eq!(ports.status, CheckStatus::Warn);
        assert!(ports.detail.as_deref().unwrap().contains("LID 0xffff (invalid)"));
    }

    #[test]
    fn unreachable_node_fails_ibstat() {
        let opts = NetworkOptions {
            nodes: vec!["dgx040".into()],
            ..NetworkOptions::default()
        };
        let report = run_with(&healthy(), &opts);
        let ports = find(&report, "IB ports (dgx040)");
        assert!(ports.is_fail());
        assert!(ports.remediation.is_some());
    }
}

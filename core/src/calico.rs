//! Orphaned Calico interface cleanup.
//!
//! A pod that dies without CNI teardown can leave its `cali*` interface and
//! host route behind. A new pod given the same IP then fails with "route
//! already exists for an interface other than ...". [`scan`] finds routes
//! on each node whose IP no running pod owns and whose interface still
//! exists; [`cleanup`] deletes those interfaces over ssh.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use tracing::{debug, info, warn};

use crate::cluster::{Cluster, List, Node, Pod, QueryError};
use crate::infrastructure::RunError;

/// Host routes into the pod network that point at Calico interfaces.
pub const ROUTE_COMMAND: &str = "ip route show | grep -E '^172\\.' | grep cali";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalicoRoute {
    pub interface: String,
    pub ip: String,
    pub line: String,
}

/// Parse `172.16.106.21 dev califabcd1234 scope link` lines. Anything else is skipped.
pub fn parse_routes(output: &str) -> Vec<CalicoRoute> {
    output
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let dest = tokens.next()?;
            if tokens.next()? != "dev" {
                return None;
            }
            let interface = tokens.next()?;
            if !interface.starts_with("cali") {
                return None;
            }
            let ip = dest.split('/').next()?;
            ip.parse::<Ipv4Addr>().ok()?;
            Some(CalicoRoute {
                interface: interface.to_string(),
                ip: ip.to_string(),
                line: line.trim().to_string(),
            })
        })
        .collect()
}

pub fn all_nodes(cluster: &Cluster) -> Result<Vec<String>, QueryError> {
    let nodes: Vec<Node> = cluster.list("nodes", None, None)?;
    Ok(nodes.into_iter().map(|n| n.metadata.name).collect())
}

/// IPs of Running pods, keyed by the node they run on.
pub fn running_pod_ips(cluster: &Cluster) -> Result<BTreeMap<String, BTreeSet<String>>, QueryError> {
    let list: List<Pod> = cluster.kubectl_json(&[
        "get",
        "pods",
        "-A",
        "-o",
        "json",
        "--field-selector",
        "status.phase=Running",
    ])?;
    let mut by_node: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for pod in list.items {
        if let (Some(node), Some(ip)) = (pod.spec.node_name, pod.status.pod_ip) {
            by_node.entry(node).or_default().insert(ip);
        }
    }
    Ok(by_node)
}

/// What was found on one node.
#[derive(Debug, Clone, Default)]
pub struct NodeScan {
    pub node: String,
    pub running_pods: usize,
    pub routes: usize,
    pub orphaned: Vec<CalicoRoute>,
    /// Set when the node could not be inspected at all.
    pub error: Option<String>,
}

fn interface_exists(cluster: &Cluster, node: &str, interface: &str) -> bool {
    cluster
        .ssh(node, &format!("ip link show {}", interface))
        .is_ok()
}

pub fn scan_node(cluster: &Cluster, node: &str, pod_ips: &BTreeSet<String>) -> NodeScan {
    let mut scan = NodeScan {
        node: node.to_string(),
        running_pods: pod_ips.len(),
        ..NodeScan::default()
    };
    let routes = match cluster.ssh(node, ROUTE_COMMAND) {
        Ok(out) => parse_routes(&out),
        // grep exits 1 without output when nothing matches. ssh itself
        // exits 255 when the node cannot be reached.
        Err(RunError::Failed {
            code: Some(1),
            stderr,
            ..
        }) if stderr.trim().is_empty() => Vec::new(),
        Err(e) => {
            warn!(node, error = %e, "cannot read routes");
            scan.error = Some(e.to_string());
            return scan;
        }
    };
    scan.routes = routes.len();
    for route in routes {
        if pod_ips.contains(&route.ip) {
            continue;
        }
        if interface_exists(cluster, node, &route.interface) {
            debug!(node, interface = %route.interface, ip = %route.ip, "orphaned");
            scan.orphaned.push(route);
        }
    }
    scan
}

/// Scan every node against the current set of running pods.
pub fn scan(cluster: &Cluster, nodes: &[String]) -> Result<Vec<NodeScan>, QueryError> {
    let ips = running_pod_ips(cluster)?;
    let empty = BTreeSet::new();
    Ok(nodes
        .iter()
        .map(|node| scan_node(cluster, node, ips.get(node).unwrap_or(&empty)))
        .collect())
}

// ---------------------------------------------------------------------------
// Cleanup
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Cleanup {
    pub dry_run: bool,
    /// `(node, interface)` deleted, or that would be in a dry run.
    pub deleted: Vec<(String, String)>,
    /// `(node, interface, error)`
    pub failed: Vec<(String, String, String)>,
}

impl Cleanup {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Delete every orphaned interface found by `scan`. A dry run only records them.
pub fn cleanup(cluster: &Cluster, scans: &[NodeScan], dry_run: bool) -> Cleanup {
    let mut result = Cleanup {
        dry_run,
        ..Cleanup::default()
    };
    for scan in scans {
        for route in &scan.orphaned {
            let key = (scan.node.clone(), route.interface.clone());
            if dry_run {
                result.deleted.push(key);
                continue;
            }
            match cluster.ssh(&scan.node, &format!("ip link delete {}", route.interface)) {
                Ok(_) => {
                    info!(node = %scan.node, interface = %route.interface, "deleted");
                    result.deleted.push(key);
                }
                Err(e) => {
                    warn!(node = %scan.node, interface = %route.interface, error = %e, "delete failed");
                    result.failed.push((key.0, key.1, e.stderr()));
                }
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Tools;
    use crate::infrastructure::MockRunner;
    use serde_json::json;

    const PODS: &str = "kubectl get pods -A -o json --field-selector status.phase=Running";

    fn ssh(node: &str, cmd: &str) -> String {
        format!("ssh -o StrictHostKeyChecking=no -o BatchMode=yes {} {}", node, cmd)
    }

    fn runner() -> MockRunner {
        MockRunner::new()
            .on(
                PODS,
                Ok(json!({"items": [
                    {"metadata": {"name": "a"}, "spec": {"nodeName": "dgx030"}, "status": {"podIP": "172.16.0.10"}},
                    {"metadata": {"name": "b"}, "spec": {"nodeName": "dgx031"}, "status": {"podIP": "172.16.1.5"}}
                ]})
                .to_string()),
            )
            .on(
                &ssh("dgx030", ROUTE_COMMAND),
                Ok("172.16.0.10 dev cali1111 scope link\n\
                    172.16.0.11 dev cali2222 scope link\n\
                    172.16.0.12 dev cali3333 scope link\n"
                    .into()),
            )
            .on(&ssh("dgx030", "ip link show cali2222"), Ok("2222: cali2222@if3".into()))
            .on(&ssh("dgx030", "ip link show cali3333"), MockRunner::failure("Device does not exist"))
            .on(&ssh("dgx031", ROUTE_COMMAND), MockRunner::failure(""))
    }

    #[test]
    fn parse_routes_matches_calico_lines_only() {
        let routes = parse_routes(
            "172.16.106.21 dev califabcd1234 scope link\n\
             172.16.106.0/26 dev cali99 proto bird\n\
             172.17.0.0/16 dev docker0 proto kernel\n\
             blackhole 172.16.106.0/26 proto bird\n",
        );
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].interface, "califabcd1234");
        assert_eq!(routes[0].ip, "172.16.106.21");
        assert_eq!(routes[1].ip, "172.16.106.0");
    }

    #[test]
    fn scan_reports_only_existing_unowned_interfaces() {
        let runner = runner();
        let tools = Tools::default();
        let cluster = Cluster::new(&runner, &tools);
        let scans = scan(&cluster, &["dgx030".into(), "dgx031".into()]).unwrap();

        assert_eq!(scans[0].routes, 3);
        assert_eq!(scans[0].running_pods, 1);
        let orphaned: Vec<&str> = scans[0].orphaned.iter().map(|r| r.interface.as_str()).collect();
        assert_eq!(orphaned, vec!["cali2222"]);

        assert!(scans[1].orphaned.is_empty());
        assert!(scans[1].error.is_none());
    }

    #[test]
    fn unreachable_node_is_reported_not_clean() {
        let runner = runner().on(
            &ssh("dgx099", ROUTE_COMMAND),
            Err(RunError::Failed {
                command: "ssh".into(),
                code: Some(255),
                stdout: String::new(),
                stderr: "ssh: connect to host dgx099 port 22: No route to host".into(),
            }),
        );
        let tools = Tools::default();
        let cluster = Cluster::new(&runner, &tools);
        let scans = scan(&cluster, &["dgx099".into()]).unwrap();
        assert_eq!(scans[0].routes, 0);
        assert!(scans[0].orphaned.is_empty());
        assert!(scans[0].error.as_deref().unwrap().contains("No route to host"));
    }

    #[test]
    fn grep_failure_with_stderr_is_an_error() {
        let runner = runner().on(&ssh("dgx031", ROUTE_COMMAND), MockRunner::failure("Permission denied"));
        let tools = Tools::default();
        let cluster = Cluster::new(&runner, &tools);
        let scans = scan(&cluster, &["dgx031".into()]).unwrap();
        assert!(scans[0].error.is_some());
    }

    #[test]
    fn dry_run_deletes_nothing() {
        let runner = runner();
        let tools = Tools::default();
        let cluster = Cluster::new(&runner, &tools);
        let scans = scan(&cluster, &["dgx030".into()]).unwrap();
        let result = cleanup(&cluster, &scans, true);
        assert_eq!(result.deleted, vec![("dgx030".to_string(), "cali2222".to_string())]);
        assert_eq!(runner.count(&ssh("dgx030", "ip link delete cali2222")), 0);
    }

    #[test]
    fn failed_delete_is_recorded() {
        let runner = runner().on(
            &ssh("dgx030", "ip link delete cali2222"),
            MockRunner::failure("Operation not permitted"),
        );
        let tools = Tools::default();
        let cluster = Cluster::new(&runner, &tools);
        let scans = scan(&cluster, &["dgx030".into()]).unwrap();
        let result = cleanup(&cluster, &scans, false);
        assert!(!result.is_complete());
        assert_eq!(result.failed[0].2, "Operation not permitted");
    }

    #[test]
    fn pod_query_failure_aborts_scan() {
        let runner = MockRunner::new().on(PODS, MockRunner::failure("forbidden"));
        let tools = Tools::default();
        let cluster = Cluster::new(&runner, &tools);
        assert!(scan(&cluster, &["dgx030".into()]).is_err());
    }
}

//! Version collection from a live cluster.
//!
//! Builds a `VersionSnapshot` with three sections:
//! - `helm_releases/<namespace>/<release>/{chart_version,app_version}`
//! - `workloads/<namespace>/<name>/<container>` → image tag, for
//!   Deployments, StatefulSets and DaemonSets not owned by a Helm release
//! - `k8s_versions/<component>` → kubectl, server, kubeadm, kubelet,
//!   containerd and the CNI image tag when found
//!
//! Any source that cannot be queried is skipped with a warning; collection
//! itself never fails.

use serde_json::Value;
use tracing::{debug, warn};

use crate::cluster::{Cluster, HelmRelease, List, Pod, Workload};

use super::version::VersionSnapshot;

pub const HELM_RELEASES: &str = "helm_releases";
pub const WORKLOADS: &str = "workloads";
pub const K8S_VERSIONS: &str = "k8s_versions";

const WORKLOAD_KINDS: [&str; 3] = ["deployments", "statefulsets", "daemonsets"];

/// A collected snapshot plus whatever could not be collected.
#[derive(Debug, Clone)]
pub struct Collection {
    pub snapshot: VersionSnapshot,
    pub warnings: Vec<String>,
}

pub fn collect(cluster: &Cluster) -> Collection {
    let mut collection = Collection {
        snapshot: VersionSnapshot::now(),
        warnings: Vec::new(),
    };
    let releases = collect_helm(cluster, &mut collection);
    collect_workloads(cluster, &releases, &mut collection);
    collect_components(cluster, &mut collection);
    collection
}

impl Collection {
    fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }
}

// ---------------------------------------------------------------------------
// Helm
// ---------------------------------------------------------------------------

fn collect_helm(cluster: &Cluster, out: &mut Collection) -> Vec<HelmRelease> {
    match cluster.helm_releases() {
        Ok(releases) => {
            for r in &releases {
                let app_version = if r.app_version.is_empty() {
                    "N/A"
                } else {
                    r.app_version.as_str()
                };
                out.snapshot.insert(
                    &[HELM_RELEASES, r.namespace.as_str(), r.name.as_str(), "chart_version"],
                    r.chart_version(),
                );
                out.snapshot.insert(
                    &[HELM_RELEASES, r.namespace.as_str(), r.name.as_str(), "app_version"],
                    app_version,
                );
            }
            debug!(count = releases.len(), "helm releases collected");
            releases
        }
        Err(e) => {
            out.warn(format!("could not list Helm releases: {}", e));
            Vec::new()
        }
    }
}

// ---------------------------------------------------------------------------
// Workloads
// ---------------------------------------------------------------------------

fn collect_workloads(cluster: &Cluster, releases: &[HelmRelease], out: &mut Collection) {
    for kind in WORKLOAD_KINDS {
        let items = match cluster.kubectl_json::<List<Workload>>(&[
            "get",
            kind,
            "--all-namespaces",
            "-o",
            "json",
        ]) {
            Ok(list) => list.items,
            Err(e) => {
                out.warn(format!("could not get {}: {}", kind, e));
                continue;
            }
        };
        for w in &items {
            if helm_release_for(w, releases).is_some() {
                continue;
            }
            let meta = &w.metadata;
            for c in &w.spec.template.spec.containers {
                if c.image.is_empty() {
                    continue;
                }
                out.snapshot.insert(
                    &[WORKLOADS, meta.namespace.as_str(), meta.name.as_str(), c.name.as_str()],
                    image_version(&c.image),
                );
            }
        }
    }
}

/// The tag of an image reference, ignoring any digest. Untagged images and
/// explicit `latest` both yield `latest`.
pub fn image_version(image: &str) -> String {
    let without_digest = image.split('@').next().unwrap_or(image);
    // A ':' before the last '/' is a registry port, not a tag.
    let last_segment = without_digest.rsplit('/').next().unwrap_or(without_digest);
    match last_segment.rsplit_once(':') {
        Some((_, tag)) if !tag.is_empty() && !tag.eq_ignore_ascii_case("latest") => tag.to_string(),
        _ => "latest".to_string(),
    }
}

/// The Helm release that owns a workload: by the `managed-by: Helm` labels
/// first, then by a release in the same namespace whose name prefixes the
/// workload name.
pub fn helm_release_for<'r>(workload: &Workload, releases: &'r [HelmRelease]) -> Option<&'r HelmRelease> {
    let meta = &workload.metadata;
    let managed = meta
        .labels
        .get("app.kubernetes.io/managed-by")
        .map(|v| v.eq_ignore_ascii_case("helm"))
        .unwrap_or(false);
    if managed {
        let instance = meta
            .labels
            .get("app.kubernetes.io/instance")
            .or_else(|| meta.labels.get("release"));
        if let Some(instance) = instance {
            if let Some(r) = releases
                .iter()
                .find(|r| r.namespace == meta.namespace && &r.name == instance)
            {
                return Some(r);
            }
        }
    }
    releases
        .iter()
        .find(|r| r.namespace == meta.namespace && !r.name.is_empty() && meta.name.starts_with(&r.name))
}

// ---------------------------------------------------------------------------
// Kubernetes components
// ---------------------------------------------------------------------------

fn collect_components(cluster: &Cluster, out: &mut Collection) {
    let mut record = |component: &str, version: Option<String>| {
        if let Some(v) = version {
            out.snapshot.insert(&[K8S_VERSIONS, component], v);
        } else {
            debug!(component, "version not available");
        }
    };

    record(
        "kubectl",
        cluster
            .kubectl(&["version", "--client=true", "-o", "json"])
            .ok()
            .and_then(|s| git_version(&s, "clientVersion")),
    );
    record(
        "kubernetes-server",
        cluster
            .kubectl(&["version", "-o", "json"])
            .ok()
            .and_then(|s| git_version(&s, "serverVersion")),
    );
    record(
        "kubeadm",
        cluster
            .local("kubeadm", &["version", "-o", "short"])
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
    );
    record(
        "kubelet",
        cluster
            .local("kubelet", &["--version"])
            .ok()
            .and_then(|s| kubelet_version(&s)),
    );
    record(
        "containerd",
        cluster
            .local("containerd", &["--version"])
            .ok()
            .and_then(|s| s.split_whitespace().nth(2).map(str::to_string)),
    );

    match cluster.list::<Pod>("pods", Some("kube-system"), None) {
        Ok(pods) => {
            for (component, marker) in [("calico-cni", "calico"), ("flannel-cni", "flannel")] {
                record(component, cni_version(&pods, marker));
            }
        }
        Err(e) => debug!(error = %e, "kube-system pods unavailable"),
    }
}

fn git_version(json: &str, section: &str) -> Option<String> {
    let v: Value = serde_json::from_str(json).ok()?;
    v.get(section)?
        .get("gitVersion")?
        .as_str()
        .map(str::to_string)
}

/// `Kubernetes v1.30.2` → `v1.30.2`.
fn kubelet_version(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .find(|t| t.starts_with('v') && t[1..].starts_with(|c: char| c.is_ascii_digit()))
        .map(str::to_string)
}

fn cni_version(pods: &[Pod], marker: &str) -> Option<String> {
    pods.iter()
        .filter(|p| p.name().to_lowercase().contains(marker))
        .flat_map(|p| p.spec.containers.iter())
        .find(|c| c.image.contains(marker))
        .map(|c| image_version(&c.image))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Tools;
    use crate::infrastructure::MockRunner;

    fn workload(ns: &str, name: &str, labels: &[(&str, &str)]) -> Workload {
        let labels: serde_json::Map<String, Value> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect();
        serde_json::from_value(serde_json::json!({
            "metadata": {"name": name, "namespace": ns, "labels": labels}
        }))
        .unwrap()
    }

    fn release(ns: &str, name: &str) -> HelmRelease {
        HelmRelease {
            name: name.into(),
            namespace: ns.into(),
            chart: format!("{}-1.0.0", name),
            ..Default::default()
        }
    }

    #[test]
    fn image_tags() {
        assert_eq!(image_version("nginx:1.21.0"), "1.21.0");
        assert_eq!(image_version("nvcr.io/nvidia/k8s-device-plugin:v0.16.1"), "v0.16.1");
        assert_eq!(image_version("repo/app:2.0@sha256:abcd"), "2.0");
        assert_eq!(image_version("busybox"), "latest");
        assert_eq!(image_version("busybox:latest"), "latest");
        assert_eq!(image_version("registry:5000/team/app"), "latest");
        assert_eq!(image_version("registry:5000/team/app:3.1"), "3.1");
    }

    #[test]
    fn helm_ownership_by_labels_and_prefix() {
        let releases = vec![release("monitoring", "prom"), release("gpu-operator", "gpu-operator")];
        let labelled = workload(
            "monitoring",
            "grafana",
            &[("app.kubernetes.io/managed-by", "Helm"), ("app.kubernetes.io/instance", "prom")],
        );
        assert_eq!(helm_release_for(&labelled, &releases).map(|r| r.name.as_str()), Some("prom"));

        let prefixed = workload("gpu-operator", "gpu-operator-node-feature-discovery", &[]);
        assert!(helm_release_for(&prefixed, &releases).is_some());

        let standalone = workload("default", "web", &[]);
        assert!(helm_release_for(&standalone, &releases).is_none());
    }

    #[test]
    fn kubelet_and_git_versions() {
        assert_eq!(kubelet_version("Kubernetes v1.30.2\n").as_deref(), Some("v1.30.2"));
        assert_eq!(kubelet_version("garbage"), None);
        let json = r#"{"clientVersion":{"gitVersion":"v1.30.1"}}"#;
        assert_eq!(git_version(json, "clientVersion").as_deref(), Some("v1.30.1"));
        assert_eq!(git_version(json, "serverVersion"), None);
    }

    #[test]
    fn collect_builds_all_sections_and_records_warnings() {
        let deployments = r#"{"items":[
            {"metadata":{"name":"web","namespace":"default"},
             "spec":{"template":{"spec":{"containers":[{"name":"nginx","image":"nginx:1.25"}]}}}},
            {"metadata":{"name":"gpu-operator","namespace":"gpu-operator"},
             "spec":{"template":{"spec":{"containers":[{"name":"op","image":"nvcr.io/gpu-operator:v24.9.1"}]}}}}
        ]}"#;
        let runner = MockRunner::new()
            .on(
                "helm list -A -o json",
                Ok(r#"[{"name":"gpu-operator","namespace":"gpu-operator","chart":"gpu-operator-v24.9.1","app_version":"v24.9.1"}]"#.into()),
            )
            .on("kubectl get deployments --all-namespaces -o json", Ok(deployments.into()))
            .on("kubectl get statefulsets --all-namespaces -o json", Ok(r#"{"items":[]}"#.into()))
            .on("kubectl get daemonsets --all-namespaces -o json", MockRunner::failure("forbidden"))
            .on(
                "kubectl version --client=true -o json",
                Ok(r#"{"clientVersion":{"gitVersion":"v1.30.2"}}"#.into()),
            )
            .on(
                "kubectl version -o json",
                Ok(r#"{"serverVersion":{"gitVersion":"v1.30.0"}}"#.into()),
            )
            .on("containerd --version", Ok("containerd containerd.io 1.7.20 abc\n".into()))
            .on(
                "kubectl get pods -n kube-system -o json",
                Ok(r#"{"items":[{"metadata":{"name":"calico-node-x"},"spec":{"containers":[{"name":"calico-node","image":"docker.io/calico/node:v3.28.0"}]}}]}"#.into()),
            );
        let tools = Tools::default();
        let cluster = Cluster::new(&runner, &tools);
        let c = collect(&cluster);
        let s = &c.snapshot;

        assert_eq!(s.get(&[HELM_RELEASES, "gpu-operator", "gpu-operator", "chart_version"]), Some("v24.9.1"));
        assert_eq!(s.get(&[WORKLOADS, "default", "web", "nginx"]), Some("1.25"));
        assert_eq!(s.get(&[WORKLOADS, "gpu-operator", "gpu-operator", "op"]), None);
        assert_eq!(s.get(&[K8S_VERSIONS, "kubectl"]), Some("v1.30.2"));
        assert_eq!(s.get(&[K8S_VERSIONS, "kubernetes-server"]), Some("v1.30.0"));
        assert_eq!(s.get(&[K8S_VERSIONS, "containerd"]), Some("1.7.20"));
        assert_eq!(s.get(&[K8S_VERSIONS, "calico-cni"]), Some("v3.28.0"));
        assert_eq!(s.get(&[K8S_VERSIONS, "kubeadm"]), None);
        assert_eq!(c.warnings.len(), 1);
        assert!(c.warnings[0].contains("daemonsets"));
    }
}

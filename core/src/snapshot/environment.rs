//! Environment discovery: a full pre-upgrade record of the host and cluster
//! as one Markdown document with a table of contents.
//!
//! Every capture runs one command and embeds its stdout in a code block.
//! A failing command leaves its stderr in the document instead; discovery
//! itself never fails. Sections that depend on optional components (VPA,
//! metrics-server, OLM, a container runtime CLI) are only captured when a
//! cheap gate command succeeds.

use std::time::Duration;

use tracing::{debug, info};

use crate::cluster::{Cluster, List, ObjectMeta, Secret};
use crate::infrastructure::{Invocation, RunError};

/// Per-command timeout; YAML dumps of large clusters are slow.
pub const CAPTURE_TIMEOUT: Duration = Duration::from_secs(300);

const CNI_PLUGINS: [(&str, &str); 4] = [
    ("Calico", "calico"),
    ("Flannel", "flannel"),
    ("Weave", "weave"),
    ("Cilium", "cilium"),
];

const RUNTIME_CLIS: [(&str, &str, &[&str]); 3] = [
    ("docker", "Docker", &["version", "info"]),
    ("crictl", "CRI-CTL", &["version", "info"]),
    ("nerdctl", "Nerdctl", &["version"]),
];

#[derive(Debug, Clone, Copy)]
enum Tool {
    Kubectl,
    Helm,
    Local(&'static str),
}

/// One command whose output becomes a level-3 section.
#[derive(Debug, Clone, Copy)]
struct Capture {
    title: &'static str,
    tool: Tool,
    args: &'static [&'static str],
    lang: &'static str,
}

const fn kubectl(title: &'static str, args: &'static [&'static str], lang: &'static str) -> Capture {
    Capture {
        title,
        tool: Tool::Kubectl,
        args,
        lang,
    }
}

const fn local(title: &'static str, program: &'static str, args: &'static [&'static str]) -> Capture {
    Capture {
        title,
        tool: Tool::Local(program),
        args,
        lang: "",
    }
}

/// `get <kind> --all-namespaces` as a list and as YAML.
macro_rules! all_namespaces {
    ($list:expr, $yaml:expr, $kind:expr) => {
        [
            kubectl($list, &["get", $kind, "--all-namespaces", "-o", "wide"], ""),
            kubectl($yaml, &["get", $kind, "--all-namespaces", "-o", "yaml"], "yaml"),
        ]
    };
}

const SYSTEM: [Capture; 5] = [
    Capture {
        lang: "bash",
        ..local("Operating System", "cat", &["/etc/os-release"])
    },
    Capture {
        lang: "bash",
        ..local("Kernel Version", "uname", &["-a"])
    },
    local("CPU Information", "lscpu", &[]),
    local("Memory Information", "free", &["-h"]),
    local("Disk Usage", "df", &["-h"]),
];

const KUBERNETES: [Capture; 4] = [
    kubectl("Kubectl Version", &["version"], ""),
    kubectl("Cluster Info", &["cluster-info"], ""),
    kubectl("Cluster API Versions", &["api-versions"], ""),
    kubectl("Cluster API Resources", &["api-resources"], ""),
];

const NODES: [Capture; 3] = [
    kubectl("Node List", &["get", "nodes", "-o", "wide"], ""),
    kubectl("Node Details (YAML)", &["get", "nodes", "-o", "yaml"], "yaml"),
    kubectl("Node Capacity and Allocatable", &["describe", "nodes"], ""),
];

const NAMESPACES: [Capture; 2] = [
    kubectl("Namespace List", &["get", "namespaces"], ""),
    kubectl("Namespace Details (YAML)", &["get", "namespaces", "-o", "yaml"], "yaml"),
];

const HELM: [Capture; 2] = [
    Capture {
        title: "Helm Version",
        tool: Tool::Helm,
        args: &["version"],
        lang: "",
    },
    Capture {
        title: "Helm Releases (All Namespaces)",
        tool: Tool::Helm,
        args: &["list", "--all-namespaces"],
        lang: "",
    },
];

const STORAGE: [Capture; 6] = [
    kubectl("Persistent Volumes", &["get", "pv", "-o", "wide"], ""),
    kubectl("Persistent Volume Details (YAML)", &["get", "pv", "-o", "yaml"], "yaml"),
    kubectl("Persistent Volume Claims (All Namespaces)", &["get", "pvc", "--all-namespaces", "-o", "wide"], ""),
    kubectl("Persistent Volume Claim Details (YAML)", &["get", "pvc", "--all-namespaces", "-o", "yaml"], "yaml"),
    kubectl("Storage Classes", &["get", "storageclasses", "-o", "wide"], ""),
    kubectl("Storage Class Details (YAML)", &["get", "storageclasses", "-o", "yaml"], "yaml"),
];

const RBAC: [Capture; 5] = [
    kubectl("Cluster Roles", &["get", "clusterroles"], ""),
    kubectl("Cluster Role Bindings", &["get", "clusterrolebindings"], ""),
    kubectl("Roles (All Namespaces)", &["get", "roles", "--all-namespaces"], ""),
    kubectl("Role Bindings (All Namespaces)", &["get", "rolebindings", "--all-namespaces"], ""),
    kubectl("Service Accounts (All Namespaces)", &["get", "serviceaccounts", "--all-namespaces"], ""),
];

const QUOTAS: [Capture; 4] = [
    kubectl("Resource Quotas", &["get", "resourcequotas", "--all-namespaces"], ""),
    kubectl("Resource Quota Details (YAML)", &["get", "resourcequotas", "--all-namespaces", "-o", "yaml"], "yaml"),
    kubectl("Limit Ranges", &["get", "limitranges", "--all-namespaces"], ""),
    kubectl("Limit Range Details (YAML)", &["get", "limitranges", "--all-namespaces", "-o", "yaml"], "yaml"),
];

/// Plain resource sections, in document order after the Run:ai section.
const RESOURCE_SECTIONS: [(&str, &[Capture]); 8] = [
    ("Pods (All Namespaces)", &all_namespaces!("Pod List (All Namespaces)", "Pod Details (YAML)", "pods")),
    ("Deployments (All Namespaces)", &all_namespaces!("Deployment List", "Deployment Details (YAML)", "deployments")),
    ("StatefulSets (All Namespaces)", &all_namespaces!("StatefulSet List", "StatefulSet Details (YAML)", "statefulsets")),
    ("DaemonSets (All Namespaces)", &all_namespaces!("DaemonSet List", "DaemonSet Details (YAML)", "daemonsets")),
    ("Services (All Namespaces)", &all_namespaces!("Service List", "Service Details (YAML)", "services")),
    ("Ingresses (All Namespaces)", &all_namespaces!("Ingress List", "Ingress Details (YAML)", "ingresses")),
    (
        "ConfigMaps (All Namespaces)",
        &[
            kubectl("ConfigMap List", &["get", "configmaps", "--all-namespaces"], ""),
            kubectl("ConfigMap Details (YAML)", &["get", "configmaps", "--all-namespaces", "-o", "yaml"], "yaml"),
        ],
    ),
    (
        "Secrets (All Namespaces)",
        &[kubectl("Secret List", &["get", "secrets", "--all-namespaces"], "")],
    ),
];

/// Sections after secrets, up to the autoscalers.
const POLICY_SECTIONS: [(&str, &[Capture]); 8] = [
    ("Storage", &STORAGE),
    ("Network Policies", &all_namespaces!("Network Policy List", "Network Policy Details (YAML)", "networkpolicies")),
    ("RBAC Configuration", &RBAC),
    (
        "Custom Resource Definitions",
        &[
            kubectl("CRD List", &["get", "crds"], ""),
            kubectl("CRD Details (YAML)", &["get", "crds", "-o", "yaml"], "yaml"),
        ],
    ),
    (
        "Jobs and CronJobs",
        &[
            kubectl("Job List", &["get", "jobs", "--all-namespaces", "-o", "wide"], ""),
            kubectl("Job Details (YAML)", &["get", "jobs", "--all-namespaces", "-o", "yaml"], "yaml"),
            kubectl("CronJob List", &["get", "cronjobs", "--all-namespaces", "-o", "wide"], ""),
            kubectl("CronJob Details (YAML)", &["get", "cronjobs", "--all-namespaces", "-o", "yaml"], "yaml"),
        ],
    ),
    ("Resource Quotas and Limits", &QUOTAS),
    (
        "Priority Classes",
        &[
            kubectl("Priority Class List", &["get", "priorityclasses"], ""),
            kubectl("Priority Class Details (YAML)", &["get", "priorityclasses", "-o", "yaml"], "yaml"),
        ],
    ),
    (
        "Pod Disruption Budgets",
        &[
            kubectl("PDB List", &["get", "poddisruptionbudgets", "--all-namespaces"], ""),
            kubectl("PDB Details (YAML)", &["get", "poddisruptionbudgets", "--all-namespaces", "-o", "yaml"], "yaml"),
        ],
    ),
];

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// GitHub-style heading anchor.
pub fn anchor(title: &str) -> String {
    title
        .to_lowercase()
        .replace(' ', "-")
        .replace(['(', ')'], "")
        .replace('/', "-")
}

/// Markdown body plus the headings seen so far, for the table of contents.
#[derive(Debug, Default)]
struct Document {
    toc: Vec<(usize, String)>,
    lines: Vec<String>,
}

impl Document {
    fn heading(&mut self, title: &str, level: usize) {
        self.toc.push((level, title.to_string()));
        self.lines.push(String::new());
        self.lines.push(format!("{} {}", "#".repeat(level), title));
        self.lines.push(String::new());
    }

    fn text(&mut self, text: impl Into<String>) {
        self.lines.push(text.into());
    }

    /// An italic note followed by a blank line.
    fn note(&mut self, text: &str) {
        self.lines.push(format!("_{}_", text));
        self.lines.push(String::new());
    }

    fn code(&mut self, content: &str, lang: &str) {
        self.lines.push(format!("```{}", lang));
        self.lines.push(content.trim_end().to_string());
        self.lines.push("```".into());
        self.lines.push(String::new());
    }

    /// Embed a command result: output, else its error, else a placeholder.
    fn result(&mut self, result: Result<String, RunError>, lang: &str) {
        match result {
            Ok(out) if !out.trim().is_empty() => self.code(&out, lang),
            Err(e) if !e.stderr().trim().is_empty() => {
                self.text(format!("⚠️ **Error:** {}", e.stderr().trim()));
                self.text("");
            }
            _ => self.note("No output or resource not found"),
        }
    }

    fn render(self) -> String {
        let mut out = vec!["# Table of Contents".to_string(), String::new()];
        for (level, title) in &self.toc {
            out.push(format!(
                "{}- [{}](#{})",
                "  ".repeat(level.saturating_sub(1)),
                title,
                anchor(title)
            ));
        }
        out.extend([String::new(), "---".into(), String::new()]);
        out.extend(self.lines);
        out.join("\n")
    }
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

struct Discovery<'c, 'a> {
    cluster: &'c Cluster<'a>,
    doc: Document,
}

impl<'c, 'a> Discovery<'c, 'a> {
    fn exec(&self, tool: Tool, args: &[&str]) -> Result<String, RunError> {
        let tools = self.cluster.tools();
        let program = match tool {
            Tool::Kubectl => tools.kubectl.as_str(),
            Tool::Helm => tools.helm.as_str(),
            Tool::Local(p) => p,
        };
        let invocation = Invocation::new(program)
            .args(args.iter().copied())
            .timeout(CAPTURE_TIMEOUT);
        self.cluster.runner().run(&invocation)
    }

    fn succeeds(&self, tool: Tool, args: &[&str]) -> bool {
        self.exec(tool, args).is_ok()
    }

    fn capture(&mut self, capture: &Capture) {
        debug!(title = capture.title, "collecting");
        self.doc.heading(capture.title, 3);
        let result = self.exec(capture.tool, capture.args);
        self.doc.result(result, capture.lang);
    }

    fn captures(&mut self, captures: &[Capture]) {
        for c in captures {
            self.capture(c);
        }
    }

    /// A level-3 section whose content is computed rather than captured.
    fn computed(&mut self, title: &str, content: &str) {
        self.doc.heading(title, 3);
        self.doc.code(content, "");
    }

    fn helm_details(&mut self) {
        self.doc.heading("Detailed Helm Release Information", 3);
        let releases = match self.cluster.helm_releases() {
            Ok(r) if !r.is_empty() => r,
            _ => {
                self.doc.note("No Helm releases found");
                return;
            }
        };
        for r in releases.iter().filter(|r| !r.name.is_empty() && !r.namespace.is_empty()) {
            debug!(release = %r.name, namespace = %r.namespace, "collecting helm release");
            self.doc
                .heading(&format!("Helm Release: {} (Namespace: {})", r.name, r.namespace), 4);
            for (label, what) in [("Values", "values"), ("Manifest", "manifest")] {
                if let Ok(out) = self.exec(Tool::Helm, &["get", what, &r.name, "-n", &r.namespace]) {
                    if !out.trim().is_empty() {
                        self.doc.text(format!("**{}:**", label));
                        self.doc.code(&out, "yaml");
                    }
                }
            }
        }
    }

    /// Names of `kind` objects containing `runai`, or None when the list failed.
    fn runai_names(&self, kind: &str) -> Option<Vec<String>> {
        let list: List<Named> = self
            .cluster
            .kubectl_json(&["get", kind, "-o", "json"])
            .ok()?;
        Some(
            list.items
                .into_iter()
                .map(|i| i.metadata.name)
                .filter(|n| n.to_lowercase().contains("runai"))
                .collect(),
        )
    }

    fn runai(&mut self) {
        if let Some(namespaces) = self.runai_names("namespaces") {
            if namespaces.is_empty() {
                self.doc.note("No RunAI-specific namespaces found");
            } else {
                self.doc.heading("RunAI Namespaces Found", 3);
                for ns in &namespaces {
                    self.doc.text(format!("- `{}`", ns));
                }
                self.doc.text("");
                for ns in &namespaces {
                    self.doc
                        .heading(&format!("RunAI Resources in Namespace: {}", ns), 3);
                    let result = self.exec(Tool::Kubectl, &["get", "all", "-n", ns, "-o", "wide"]);
                    self.doc.result(result, "");
                }
            }
        }

        let crds = self.runai_names("crd").unwrap_or_default();
        let listing = if crds.is_empty() {
            "No RunAI CRDs found".to_string()
        } else {
            crds.join("\n")
        };
        self.computed("RunAI Custom Resource Definitions", &listing);
        for crd in &crds {
            self.doc.heading(&format!("CRD Details: {}", crd), 3);
            let result = self.exec(Tool::Kubectl, &["get", "crd", crd, "-o", "yaml"]);
            self.doc.result(result, "yaml");
        }
    }

    fn secret_names(&mut self) {
        self.doc
            .heading("Secret Names and Types (values redacted for security)", 3);
        match self
            .cluster
            .kubectl_json::<List<Secret>>(&["get", "secrets", "--all-namespaces", "-o", "json"])
        {
            Ok(list) if !list.items.is_empty() => {
                let lines: Vec<String> = list
                    .items
                    .iter()
                    .map(|s| {
                        let kind = if s.kind.is_empty() { "Unknown" } else { s.kind.as_str() };
                        format!("- `{}/{}` ({})", s.metadata.namespace, s.metadata.name, kind)
                    })
                    .collect();
                self.doc.text(lines.join("\n"));
                self.doc.text("");
            }
            Ok(_) => {}
            Err(_) => self.doc.note("Could not parse secrets JSON"),
        }
    }

    /// Run `captures` only when `gate` succeeds, else leave `skipped`.
    fn gated(&mut self, tool: Tool, gate: &[&str], captures: &[Capture], skipped: &str) {
        if self.succeeds(tool, gate) {
            self.captures(captures);
        } else {
            self.doc.note(skipped);
        }
    }

    /// Lines of `kubectl <args>` containing any of `needles`, case-insensitively.
    fn matching_lines(&self, args: &[&str], needles: &[&str]) -> Vec<String> {
        self.exec(Tool::Kubectl, args)
            .map(|out| {
                out.lines()
                    .filter(|l| {
                        let lower = l.to_lowercase();
                        needles.iter().any(|n| lower.contains(n))
                    })
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn gpu(&mut self) {
        self.gated(
            Tool::Local("which"),
            &["nvidia-smi"],
            &[
                local("NVIDIA GPU Status", "nvidia-smi", &[]),
                local("NVIDIA GPU Details", "nvidia-smi", &["-q"]),
            ],
            "nvidia-smi not found - skipping GPU information",
        );
        let pods = self.matching_lines(&["get", "pods", "--all-namespaces"], &["gpu", "nvidia"]);
        let listing = if pods.is_empty() {
            "No GPU-related pods found".to_string()
        } else {
            pods.join("\n")
        };
        self.computed("GPU Device Plugin Pods", &listing);
    }

    fn container_runtime(&mut self) {
        for (program, label, subcommands) in RUNTIME_CLIS {
            if !self.succeeds(Tool::Local("which"), &[program]) {
                continue;
            }
            for &sub in subcommands {
                let title = format!("{} {}", label, if sub == "info" { "Info" } else { "Version" });
                self.doc.heading(&title, 3);
                let result = self.exec(Tool::Local(program), &[sub]);
                self.doc.result(result, "");
            }
            return;
        }
        self.doc.note("No container runtime CLI found");
    }

    fn network_plugin(&mut self) {
        let pods = self
            .exec(Tool::Kubectl, &["get", "pods", "-n", "kube-system"])
            .unwrap_or_default();
        for (label, needle) in CNI_PLUGINS {
            let lines: Vec<&str> = pods
                .lines()
                .filter(|l| l.to_lowercase().contains(needle))
                .collect();
            let listing = if lines.is_empty() {
                format!("{} not found", label)
            } else {
                lines.join("\n")
            };
            self.computed(&format!("{} Resources", label), &listing);
        }
    }
}

/// Only the name of an arbitrary object is needed.
#[derive(Debug, Clone, Default, serde::Deserialize)]
struct Named {
    #[serde(default)]
    metadata: ObjectMeta,
}

fn first_line(cluster: &Cluster, program: &str) -> String {
    cluster
        .local(program, &[])
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "unknown".into())
}

/// Build the discovery document. `generated_at` is printed in the header.
pub fn discover(cluster: &Cluster, generated_at: &str) -> String {
    let mut d = Discovery {
        cluster,
        doc: Document::default(),
    };

    d.doc.heading("Environment Discovery Report", 1);
    d.doc.text(format!("**Generated:** {}", generated_at));
    d.doc.text(format!("**Hostname:** {}", first_line(cluster, "hostname")));
    d.doc.text(format!("**User:** {}", first_line(cluster, "whoami")));
    d.doc.text("");

    for (title, captures) in [
        ("System Information", &SYSTEM[..]),
        ("Kubernetes Cluster Information", &KUBERNETES[..]),
        ("Kubernetes Nodes", &NODES[..]),
        ("Kubernetes Namespaces", &NAMESPACES[..]),
    ] {
        d.doc.heading(title, 2);
        d.captures(captures);
    }

    d.doc.heading("Helm Releases", 2);
    d.captures(&HELM);
    d.helm_details();

    d.doc.heading("RunAI Configuration", 2);
    d.runai();

    for (title, captures) in RESOURCE_SECTIONS {
        d.doc.heading(title, 2);
        d.captures(captures);
    }
    d.secret_names();

    for (title, captures) in POLICY_SECTIONS {
        d.doc.heading(title, 2);
        d.captures(captures);
    }

    d.doc.heading("Horizontal Pod Autoscalers", 2);
    d.captures(&all_namespaces!("HPA List", "HPA Details (YAML)", "hpa"));

    d.doc.heading("Vertical Pod Autoscalers", 2);
    d.gated(
        Tool::Kubectl,
        &["get", "crd", "verticalpodautoscalers.autoscaling.k8s.io"],
        &all_namespaces!("VPA List", "VPA Details (YAML)", "vpa"),
        "VPA CRD not found - skipping",
    );

    d.doc.heading("Recent Events (All Namespaces)", 2);
    d.capture(&kubectl(
        "Events",
        &["get", "events", "--all-namespaces", "--sort-by=.lastTimestamp"],
        "",
    ));

    d.doc.heading("Component Status", 2);
    d.doc.heading("Component Status", 3);
    match d.exec(Tool::Kubectl, &["get", "componentstatuses"]) {
        Ok(out) if !out.trim().is_empty() => d.doc.code(&out, ""),
        _ => d.doc.code(
            "Component status API may be deprecated in this Kubernetes version",
            "",
        ),
    }

    d.doc.heading("Metrics", 2);
    d.gated(
        Tool::Kubectl,
        &["top", "nodes"],
        &[
            kubectl("Node Metrics", &["top", "nodes"], ""),
            kubectl("Pod Metrics (All Namespaces)", &["top", "pods", "--all-namespaces"], ""),
        ],
        "Metrics server not available - skipping metrics collection",
    );

    d.doc.heading("GPU Information", 2);
    d.gpu();

    d.doc.heading("Container Runtime", 2);
    d.container_runtime();

    d.doc.heading("Kubernetes Configuration", 2);
    d.captures(&[
        kubectl("Current Context", &["config", "current-context"], ""),
        kubectl("Available Contexts", &["config", "get-contexts"], ""),
    ]);

    d.doc.heading("Network Plugin", 2);
    d.network_plugin();

    d.doc.heading("Operators", 2);
    d.gated(
        Tool::Kubectl,
        &["get", "crd", "clusterserviceversions.operators.coreos.com"],
        &[
            kubectl("Cluster Service Versions (OLM)", &["get", "csv", "--all-namespaces"], ""),
            kubectl("Operator Subscriptions", &["get", "subscriptions", "--all-namespaces"], ""),
            kubectl("Install Plans", &["get", "installplans", "--all-namespaces"], ""),
        ],
        "OLM not detected",
    );

    info!(sections = d.doc.toc.len(), "environment discovery complete");
    d.doc.render()
}

//! Simplified upgrade summary: one row per application instead of one per
//! container.
//!
//! A Helm release is an application versioned by its chart. Workloads not
//! owned by a release become applications of their own, versioned by their
//! image tags, except in the namespaces of the platform operators, where
//! the release row already stands for everything.

use std::collections::{BTreeMap, BTreeSet};

use super::collect::{HELM_RELEASES, K8S_VERSIONS, WORKLOADS};
use super::diff::ChangeKind;
use super::version::{VersionNode, VersionSnapshot};

/// Namespaces whose standalone workloads are folded into their Helm release.
pub const FOLDED_NAMESPACES: [&str; 5] = [
    "runai",
    "runai-backend",
    "gpu-operator",
    "network-operator",
    "prometheus",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRow {
    pub namespace: String,
    pub name: String,
    pub before: Option<String>,
    pub after: Option<String>,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeSummary {
    pub pre_captured_at: String,
    pub post_captured_at: String,
    /// `k8s_versions` entries; `namespace` is empty.
    pub components: Vec<SummaryRow>,
    /// Sorted by `namespace/name`.
    pub applications: Vec<SummaryRow>,
}

fn children(node: &VersionNode) -> Option<&BTreeMap<String, VersionNode>> {
    match node {
        VersionNode::Group(c) => Some(c),
        VersionNode::Version(_) => None,
    }
}

fn section<'s>(snapshot: &'s VersionSnapshot, name: &str) -> impl Iterator<Item = (&'s String, &'s VersionNode)> {
    snapshot
        .components
        .get(name)
        .and_then(children)
        .into_iter()
        .flatten()
}

/// `namespace/name` → `(namespace, name, version)` for every application.
pub fn applications(snapshot: &VersionSnapshot) -> BTreeMap<String, (String, String, String)> {
    let mut apps = BTreeMap::new();
    for (ns, releases) in section(snapshot, HELM_RELEASES) {
        for (release, fields) in children(releases).into_iter().flatten() {
            let version = children(fields)
                .and_then(|f| f.get("chart_version"))
                .and_then(|v| match v {
                    VersionNode::Version(s) => Some(s.clone()),
                    VersionNode::Group(_) => None,
                })
                .unwrap_or_else(|| "N/A".into());
            apps.insert(
                format!("{}/{}", ns, release),
                (ns.clone(), release.clone(), version),
            );
        }
    }
    for (ns, workloads) in section(snapshot, WORKLOADS) {
        if FOLDED_NAMESPACES.contains(&ns.as_str()) {
            continue;
        }
        for (name, containers) in children(workloads).into_iter().flatten() {
            let key = format!("{}/{}", ns, name);
            if apps.contains_key(&key) {
                continue;
            }
            let tags: Vec<&str> = children(containers)
                .into_iter()
                .flatten()
                .filter_map(|(_, v)| match v {
                    VersionNode::Version(s) => Some(s.as_str()),
                    VersionNode::Group(_) => None,
                })
                .collect();
            let version = if tags.is_empty() {
                "N/A".to_string()
            } else {
                tags.join(", ")
            };
            apps.insert(key, (ns.clone(), name.clone(), version));
        }
    }
    apps
}

fn change(before: Option<&String>, after: Option<&String>) -> ChangeKind {
    match (before, after) {
        (None, Some(_)) => ChangeKind::Added,
        (Some(_), None) => ChangeKind::Removed,
        (Some(b), Some(a)) if b != a => ChangeKind::Upgraded,
        _ => ChangeKind::Unchanged,
    }
}

impl UpgradeSummary {
    pub fn compute(pre: &VersionSnapshot, post: &VersionSnapshot) -> Self {
        let component_versions = |s: &VersionSnapshot| -> BTreeMap<String, String> {
            section(s, K8S_VERSIONS)
                .filter_map(|(k, v)| match v {
                    VersionNode::Version(s) => Some((k.clone(), s.clone())),
                    VersionNode::Group(_) => None,
                })
                .collect()
        };
        let (before, after) = (component_versions(pre), component_versions(post));
        let names: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
        let components = names
            .into_iter()
            .map(|name| SummaryRow {
                namespace: String::new(),
                name: name.clone(),
                before: before.get(name).cloned(),
                after: after.get(name).cloned(),
                kind: change(before.get(name), after.get(name)),
            })
            .collect();

        let (pre_apps, post_apps) = (applications(pre), applications(post));
        let keys: BTreeSet<&String> = pre_apps.keys().chain(post_apps.keys()).collect();
        let applications = keys
            .into_iter()
            .filter_map(|key| {
                let b = pre_apps.get(key);
                let a = post_apps.get(key);
                let (ns, name, _) = b.or(a)?;
                Some(SummaryRow {
                    namespace: ns.clone(),
                    name: name.clone(),
                    before: b.map(|x| x.2.clone()),
                    after: a.map(|x| x.2.clone()),
                    kind: change(b.map(|x| &x.2), a.map(|x| &x.2)),
                })
            })
            .collect();

        UpgradeSummary {
            pre_captured_at: pre.captured_at.clone(),
            post_captured_at: post.captured_at.clone(),
            components,
            applications,
        }
    }

    pub fn components_changed(&self) -> usize {
        self.components
            .iter()
            .filter(|c| c.kind != ChangeKind::Unchanged)
            .count()
    }

    /// Applications with the given change.
    pub fn count(&self, kind: ChangeKind) -> usize {
        self.applications.iter().filter(|a| a.kind == kind).count()
    }
}

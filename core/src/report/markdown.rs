//! Markdown reports for version snapshots, their diffs and the upgrade summary.

use std::collections::BTreeMap;

use crate::snapshot::collect::{HELM_RELEASES, K8S_VERSIONS, WORKLOADS};
use crate::snapshot::{ChangeKind, SummaryRow, UpgradeSummary, VersionChange, VersionDiff, VersionSnapshot};

fn section_title(section: &str) -> &str {
    match section {
        HELM_RELEASES => "Helm Releases",
        WORKLOADS => "Workloads",
        K8S_VERSIONS => "Kubernetes Components",
        other => other,
    }
}

/// Group flattened `section/item` keys by section, keeping key order.
fn by_section(flat: &BTreeMap<String, String>) -> BTreeMap<&str, Vec<(&str, &str)>> {
    let mut grouped: BTreeMap<&str, Vec<(&str, &str)>> = BTreeMap::new();
    for (key, version) in flat {
        let (section, item) = key.split_once('/').unwrap_or((key.as_str(), ""));
        grouped
            .entry(section)
            .or_default()
            .push((item, version.as_str()));
    }
    grouped
}

/// Render a snapshot as one table per section, followed by any collection warnings.
pub fn render_snapshot(snapshot: &VersionSnapshot, warnings: &[String]) -> String {
    let mut out = String::new();
    out.push_str("# Cluster Version Overview\n\n");
    out.push_str(&format!("- **Captured:** {}\n", snapshot.captured_at));

    let flat = snapshot.flatten();
    out.push_str(&format!("- **Entries:** {}\n\n", flat.len()));

    if flat.is_empty() {
        out.push_str("No versions collected.\n\n");
    }
    for (section, items) in by_section(&flat) {
        out.push_str(&format!("## {}\n\n", section_title(section)));
        out.push_str("| Component | Version |\n");
        out.push_str("|-----------|---------|\n");
        for (item, version) in items {
            out.push_str(&format!("| {} | {} |\n", item, version));
        }
        out.push('\n');
    }

    if !warnings.is_empty() {
        out.push_str("## Collection Warnings\n\n");
        for w in warnings {
            out.push_str(&format!("- {}\n", w));
        }
        out.push('\n');
    }
    out
}

fn change_rows(out: &mut String, changes: &[&VersionChange]) {
    out.push_str("| Section | Component | Before | After |\n");
    out.push_str("|---------|-----------|--------|-------|\n");
    for c in changes {
        out.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            section_title(c.section()),
            c.item(),
            c.before.as_deref().unwrap_or("-"),
            c.after.as_deref().unwrap_or("-"),
        ));
    }
    out.push('\n');
}

/// Render a diff: counts per kind, then a table per kind that has entries.
pub fn render_diff(diff: &VersionDiff) -> String {
    let mut out = String::new();
    out.push_str("# Version Diff\n\n");
    out.push_str(&format!("- **Pre-upgrade:** {}\n", diff.pre_captured_at));
    out.push_str(&format!("- **Post-upgrade:** {}\n\n", diff.post_captured_at));

    out.push_str("## Summary\n\n");
    out.push_str("| Change | Count |\n");
    out.push_str("|--------|-------|\n");
    for kind in [
        ChangeKind::Upgraded,
        ChangeKind::Added,
        ChangeKind::Removed,
        ChangeKind::Unchanged,
    ] {
        out.push_str(&format!("| {} | {} |\n", kind, diff.count(kind)));
    }
    out.push('\n');

    if diff.is_empty() {
        out.push_str("No version changes detected.\n\n");
        return out;
    }

    for kind in [ChangeKind::Upgraded, ChangeKind::Added, ChangeKind::Removed] {
        let changes: Vec<&VersionChange> =
            diff.changes.iter().filter(|c| c.kind == kind).collect();
        if changes.is_empty() {
            continue;
        }
        out.push_str(&format!("## {}\n\n", kind));
        change_rows(&mut out, &changes);
    }
    out
}

fn status(kind: ChangeKind) -> &'static str {
    match kind {
        ChangeKind::Upgraded => "✅ Upgraded",
        ChangeKind::Added => "🆕 Added",
        ChangeKind::Removed => "❌ Removed",
        ChangeKind::Unchanged => "No change",
    }
}

fn version_cell(row: &SummaryRow, after: bool) -> &str {
    let v = if after { &row.after } else { &row.before };
    v.as_deref().unwrap_or("-")
}

/// Render the simplified summary meant for pasting into an email.
pub fn render_summary(summary: &UpgradeSummary) -> String {
    let mut out = String::new();
    out.push_str("# Upgrade Summary (Simplified)\n\n");
    out.push_str("This summary consolidates components for easy copy-paste to emails.\n\n");
    out.push_str(&format!("**Pre-upgrade:** {}\n\n", summary.pre_captured_at));
    out.push_str(&format!("**Post-upgrade:** {}\n\n", summary.post_captured_at));

    out.push_str("## Kubernetes Components\n\n");
    out.push_str("| Component | Pre-Upgrade | Post-Upgrade | Status |\n");
    out.push_str("|-----------|-------------|--------------|--------|\n");
    for c in &summary.components {
        out.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            c.name,
            version_cell(c, false),
            version_cell(c, true),
            status(c.kind)
        ));
    }
    out.push('\n');

    out.push_str("## Applications\n\n");
    out.push_str("| Namespace | Application | Pre-Upgrade | Post-Upgrade | Status |\n");
    out.push_str("|-----------|-------------|-------------|--------------|--------|\n");
    for a in &summary.applications {
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            a.namespace,
            a.name,
            version_cell(a, false),
            version_cell(a, true),
            status(a.kind)
        ));
    }
    out.push('\n');

    out.push_str("## Summary\n\n");
    out.push_str(&format!(
        "- **Kubernetes Components Changed:** {}\n",
        summary.components_changed()
    ));
    for (label, kind) in [
        ("Upgraded", ChangeKind::Upgraded),
        ("Added", ChangeKind::Added),
        ("Removed", ChangeKind::Removed),
        ("Unchanged", ChangeKind::Unchanged),
    ] {
        out.push_str(&format!("- **Applications {}:** {}\n", label, summary.count(kind)));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(at: &str, entries: &[(&str, &str)]) -> VersionSnapshot {
        let mut s = VersionSnapshot::new(at);
        for (path, v) in entries {
            let keys: Vec<&str> = path.split('/').collect();
            s.insert(&keys, *v);
        }
        s
    }

    #[test]
    fn snapshot_tables_per_section() {
        let s = snap(
            "2026-01-05T10:00:00+00:00",
            &[
                ("helm_releases/gpu-operator/gpu-operator/chart_version", "v24.9.0"),
                ("k8s_versions/kubectl", "v1.30.2"),
            ],
        );
        let md = render_snapshot(&s, &["could not get daemonsets: forbidden".into()]);
        assert!(md.starts_with("# Cluster Version Overview\n"));
        assert!(md.contains("## Helm Releases"));
        assert!(md.contains("| gpu-operator/gpu-operator/chart_version | v24.9.0 |"));
        assert!(md.contains("## Kubernetes Components"));
        assert!(md.contains("| kubectl | v1.30.2 |"));
        assert!(md.contains("- could not get daemonsets: forbidden"));
    }

    #[test]
    fn empty_snapshot() {
        let md = render_snapshot(&VersionSnapshot::new("t"), &[]);
        assert!(md.contains("No versions collected."));
        assert!(!md.contains("Warnings"));
    }

    #[test]
    fn diff_lists_each_kind() {
        let pre = snap("pre", &[("k8s_versions/kubernetes-server", "v1.29.4"), ("workloads/ns/old/c", "1.0")]);
        let post = snap("post", &[("k8s_versions/kubernetes-server", "v1.30.2"), ("workloads/ns/new/c", "2.0")]);
        let md = render_diff(&VersionDiff::compute(&pre, &post));
        assert!(md.contains("| Upgraded | 1 |"));
        assert!(md.contains("| Added | 1 |"));
        assert!(md.contains("| Removed | 1 |"));
        assert!(md.contains("| Kubernetes Components | kubernetes-server | v1.29.4 | v1.30.2 |"));
        assert!(md.contains("| Workloads | ns/new/c | - | 2.0 |"));
        assert!(md.contains("| Workloads | ns/old/c | 1.0 | - |"));
    }

    #[test]
    fn identical_snapshots_render_no_changes() {
        let s = snap("t", &[("k8s_versions/kubernetes-server", "v1.30.2")]);
        let md = render_diff(&VersionDiff::compute(&s, &s));
        assert!(md.contains("| No change | 1 |"));
        assert!(md.contains("No version changes detected."));
    }

    #[test]
    fn summary_has_component_and_application_tables() {
        let pre = snap(
            "pre",
            &[
                ("k8s_versions/kubernetes-server", "v1.29.4"),
                ("helm_releases/runai/runai-cluster/chart_version", "2.17.0"),
            ],
        );
        let post = snap(
            "post",
            &[
                ("k8s_versions/kubernetes-server", "v1.30.2"),
                ("helm_releases/runai/runai-cluster/chart_version", "2.18.0"),
                ("workloads/default/web/app", "1.0"),
            ],
        );
        let md = render_summary(&UpgradeSummary::compute(&pre, &post));
        assert!(md.starts_with("# Upgrade Summary (Simplified)\n"));
        assert!(md.contains("| kubernetes-server | v1.29.4 | v1.30.2 | ✅ Upgraded |"));
        assert!(md.contains("| runai | runai-cluster | 2.17.0 | 2.18.0 | ✅ Upgraded |"));
        assert!(md.contains("| default | web | - | 1.0 | 🆕 Added |"));
        assert!(md.contains("- **Kubernetes Components Changed:** 1"));
        assert!(md.contains("- **Applications Added:** 1"));
    }
}

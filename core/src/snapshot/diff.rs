//! Version diff: compare two `VersionSnapshot`s key by key over the union
//! of their flattened paths.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::version::VersionSnapshot;

// ---------------------------------------------------------------------------
// ChangeKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Upgraded,
    Added,
    Removed,
    Unchanged,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Upgraded => write!(f, "Upgraded"),
            ChangeKind::Added => write!(f, "Added"),
            ChangeKind::Removed => write!(f, "Removed"),
            ChangeKind::Unchanged => write!(f, "No change"),
        }
    }
}

// ---------------------------------------------------------------------------
// VersionChange
// ---------------------------------------------------------------------------

/// One flattened key and its before/after values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionChange {
    pub key: String,
    pub kind: ChangeKind,
    pub before: Option<String>,
    pub after: Option<String>,
}

impl VersionChange {
    /// The top-level section the key belongs to (`helm_releases`, ...).
    pub fn section(&self) -> &str {
        self.key.split('/').next().unwrap_or("")
    }

    /// The key without its section prefix.
    pub fn item(&self) -> &str {
        self.key.split_once('/').map(|(_, rest)| rest).unwrap_or(&self.key)
    }
}

// ---------------------------------------------------------------------------
// VersionDiff
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionDiff {
    pub pre_captured_at: String,
    pub post_captured_at: String,
    /// Every key in the union, sorted by key.
    pub changes: Vec<VersionChange>,
}

impl VersionDiff {
    pub fn compute(pre: &VersionSnapshot, post: &VersionSnapshot) -> Self {
        let before = pre.flatten();
        let after = post.flatten();
        let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();

        let changes = keys
            .into_iter()
            .map(|key| {
                let b = before.get(key).cloned();
                let a = after.get(key).cloned();
                let kind = match (&b, &a) {
                    (None, Some(_)) => ChangeKind::Added,
                    (Some(_), None) => ChangeKind::Removed,
                    (Some(x), Some(y)) if x != y => ChangeKind::Upgraded,
                    _ => ChangeKind::Unchanged,
                };
                VersionChange {
                    key: key.clone(),
                    kind,
                    before: b,
                    after: a,
                }
            })
            .collect();

        VersionDiff {
            pre_captured_at: pre.captured_at.clone(),
            post_captured_at: post.captured_at.clone(),
            changes,
        }
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        self.changes.iter().filter(|c| c.kind == kind).count()
    }

    pub fn kind_of(&self, key: &str) -> Option<ChangeKind> {
        self.changes.iter().find(|c| c.key == key).map(|c| c.kind)
    }

    /// Changes other than `Unchanged`.
    pub fn changed(&self) -> impl Iterator<Item = &VersionChange> {
        self.changes.iter().filter(|c| c.kind != ChangeKind::Unchanged)
    }

    pub fn is_empty(&self) -> bool {
        self.changed().next().is_none()
    }

    /// Produce a human-readable summary of the diff.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        for (kind, label) in [
            (ChangeKind::Upgraded, "upgraded"),
            (ChangeKind::Added, "added"),
            (ChangeKind::Removed, "removed"),
        ] {
            let n = self.count(kind);
            if n > 0 {
                parts.push(format!("{} {}", n, label));
            }
        }
        if parts.is_empty() {
            "no changes".to_string()
        } else {
            format!(
                "{} ({} unchanged)",
                parts.join(", "),
                self.count(ChangeKind::Unchanged)
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(entries: &[(&str, &str)]) -> VersionSnapshot {
        let mut s = VersionSnapshot::new("t");
        for (path, v) in entries {
            let keys: Vec<&str> = path.split('/').collect();
            s.insert(&keys, *v);
        }
        s
    }

    #[test]
    fn changed_value_is_upgraded_and_new_key_is_added() {
        let pre = snap(&[("k8s_versions/kubectl", "v1.29.0")]);
        let post = snap(&[
            ("k8s_versions/kubectl", "v1.30.2"),
            ("k8s_versions/containerd", "1.7.20"),
        ]);
        let diff = VersionDiff::compute(&pre, &post);
        assert_eq!(diff.kind_of("k8s_versions/kubectl"), Some(ChangeKind::Upgraded));
        assert_eq!(diff.kind_of("k8s_versions/containerd"), Some(ChangeKind::Added));
        assert_eq!(diff.count(ChangeKind::Upgraded), 1);
        assert_eq!(diff.count(ChangeKind::Added), 1);
    }

    #[test]
    fn removed_and_unchanged() {
        let pre = snap(&[("a/x", "1"), ("a/y", "2")]);
        let post = snap(&[("a/y", "2")]);
        let diff = VersionDiff::compute(&pre, &post);
        assert_eq!(diff.kind_of("a/x"), Some(ChangeKind::Removed));
        assert_eq!(diff.kind_of("a/y"), Some(ChangeKind::Unchanged));
        assert_eq!(diff.changed().count(), 1);
        assert_eq!(diff.summary(), "1 removed (1 unchanged)");
    }

    #[test]
    fn identical_snapshots_have_no_changes() {
        let s = snap(&[("helm_releases/ns/rel/chart_version", "1.0")]);
        let diff = VersionDiff::compute(&s, &s);
        assert!(diff.is_empty());
        assert_eq!(diff.summary(), "no changes");
    }

    #[test]
    fn change_covers_key_union_sorted() {
        let pre = snap(&[("b", "1"), ("a", "1")]);
        let post = snap(&[("c", "1")]);
        let diff = VersionDiff::compute(&pre, &post);
        let keys: Vec<&str> = diff.changes.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn section_and_item_split() {
        let c = VersionChange {
            key: "workloads/default/web/nginx".into(),
            kind: ChangeKind::Unchanged,
            before: None,
            after: None,
        };
        assert_eq!(c.section(), "workloads");
        assert_eq!(c.item(), "default/web/nginx");
    }
}

//! Version snapshots: a nested, string-keyed tree of version strings
//! captured at one point in time and persisted as pretty JSON.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("cannot read snapshot '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write snapshot '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed snapshot '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("cannot serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// VersionNode
// ---------------------------------------------------------------------------

/// A leaf version string or a group of named children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VersionNode {
    Version(String),
    Group(BTreeMap<String, VersionNode>),
}

impl VersionNode {
    fn flatten_into(&self, prefix: &str, out: &mut BTreeMap<String, String>) {
        match self {
            VersionNode::Version(v) => {
                out.insert(prefix.to_string(), v.clone());
            }
            VersionNode::Group(children) => {
                for (key, child) in children {
                    let path = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{}/{}", prefix, key)
                    };
                    child.flatten_into(&path, out);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// VersionSnapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSnapshot {
    /// RFC 3339 capture time.
    pub captured_at: String,
    #[serde(default)]
    pub components: BTreeMap<String, VersionNode>,
}

impl VersionSnapshot {
    pub fn new(captured_at: impl Into<String>) -> Self {
        VersionSnapshot {
            captured_at: captured_at.into(),
            components: BTreeMap::new(),
        }
    }

    /// A snapshot stamped with the current local time.
    pub fn now() -> Self {
        Self::new(chrono::Local::now().to_rfc3339())
    }

    /// Set the version at `path`, creating groups along the way. A leaf in
    /// the way of a deeper path is replaced by a group.
    pub fn insert(&mut self, path: &[&str], version: impl Into<String>) {
        let Some((last, parents)) = path.split_last() else {
            return;
        };
        let mut level = &mut self.components;
        for key in parents {
            let node = level
                .entry(key.to_string())
                .or_insert_with(|| VersionNode::Group(BTreeMap::new()));
            if let VersionNode::Version(_) = node {
                *node = VersionNode::Group(BTreeMap::new());
            }
            level = match node {
                VersionNode::Group(children) => children,
                VersionNode::Version(_) => return,
            };
        }
        level.insert(last.to_string(), VersionNode::Version(version.into()));
    }

    pub fn get(&self, path: &[&str]) -> Option<&str> {
        let (first, rest) = path.split_first()?;
        let mut node = self.components.get(*first)?;
        for key in rest {
            node = match node {
                VersionNode::Group(children) => children.get(*key)?,
                VersionNode::Version(_) => return None,
            };
        }
        match node {
            VersionNode::Version(v) => Some(v),
            VersionNode::Group(_) => None,
        }
    }

    /// Number of entries directly under a top-level section.
    pub fn section_len(&self, section: &str) -> usize {
        match self.components.get(section) {
            Some(VersionNode::Group(children)) => children.len(),
            Some(VersionNode::Version(_)) => 1,
            None => 0,
        }
    }

    /// Every leaf keyed by its `/`-joined path.
    pub fn flatten(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for (key, node) in &self.components {
            node.flatten_into(key, &mut out);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Save a snapshot to a JSON file, creating parent directories.
pub fn save_snapshot(snapshot: &VersionSnapshot, path: &Path) -> Result<(), SnapshotError> {
    let json = serde_json::to_string_pretty(snapshot)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| SnapshotError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, json).map_err(|source| SnapshotError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Load a snapshot from a JSON file.
pub fn load_snapshot(path: &Path) -> Result<VersionSnapshot, SnapshotError> {
    let content = std::fs::read_to_string(path).map_err(|source| SnapshotError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| SnapshotError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

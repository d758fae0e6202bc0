//! Version snapshots for before/after upgrade comparison.

pub mod collect;
pub mod diff;
pub mod environment;
pub mod summary;
pub mod version;

pub use collect::{collect, Collection};
pub use diff::{ChangeKind, VersionChange, VersionDiff};
pub use summary::{SummaryRow, UpgradeSummary};
pub use version::{load_snapshot, save_snapshot, SnapshotError, VersionNode, VersionSnapshot};

/// Snapshot file written by `overview pre`.
pub const PRE_SNAPSHOT: &str = "pre-upgrade-overview.json";
/// Snapshot file written by `overview post`.
pub const POST_SNAPSHOT: &str = "post-upgrade-overview.json";
/// Markdown report written by `overview diff`.
pub const DIFF_REPORT: &str = "diff-overview.md";
/// Markdown report written by `overview summary`.
pub const SUMMARY_REPORT: &str = "summary-overview.md";
/// Markdown document written by `discover-environment`.
pub const ENVIRONMENT_REPORT: &str = "pre-upgrade-snapshot.md";

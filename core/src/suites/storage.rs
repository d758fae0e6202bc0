//! Storage lifecycle check through a Run:ai PVC data source.
//!
//! Creates a small ReadWriteMany data source in the project, waits for the
//! claim Run:ai generates to bind, inspects the backing volume, then deletes
//! the data source and waits for both the claim and the volume to go away.
//! Deletion is attempted whenever creation succeeded.

use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{info, warn};

use crate::check::{CheckResult, PassPolicy, SuiteReport};
use crate::cluster::Cluster;
use crate::config::PollSettings;
use crate::convergence::conditions::{discover_pvc, wait_for_absent, wait_for_pvc_bound};
use crate::convergence::PollPolicy;

pub const LOGIN_COMMAND: &str = "runai login remote-browser";

const RUNAI_MUTATION_TIMEOUT: Duration = Duration::from_secs(60);

const STEP_CLI: &str = "Run:ai CLI connectivity";
const STEP_PROJECT: &str = "Project validation";
const STEP_CREATE: &str = "Data source creation";
const STEP_BOUND: &str = "PVC status (Bound)";
const STEP_PV: &str = "PV association";
const STEP_DELETE: &str = "Data source deletion";
const STEP_PVC_CLEANUP: &str = "PVC cleanup";
const STEP_PV_CLEANUP: &str = "PV cleanup";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageOptions {
    pub project: String,
    pub storage_class: String,
    pub size: String,
    /// Name of the data source to create, unique per run.
    pub datasource: String,
}

impl StorageOptions {
    pub fn new(
        project: impl Into<String>,
        storage_class: impl Into<String>,
        size: impl Into<String>,
    ) -> Self {
        StorageOptions {
            project: project.into(),
            storage_class: storage_class.into(),
            size: size.into(),
            datasource: datasource_name(&Local::now()),
        }
    }

    /// Run:ai places project resources in `runai-{project}`.
    pub fn namespace(&self) -> String {
        format!("runai-{}", self.project)
    }

    pub fn delete_command(&self) -> String {
        format!(
            "runai datasource delete pvc {} --project {}",
            self.datasource, self.project
        )
    }
}

/// `storage-test-YYYYmmdd-HHMMSS`
pub fn datasource_name(at: &DateTime<Local>) -> String {
    format!("storage-test-{}", at.format("%Y%m%d-%H%M%S"))
}

pub fn run(cluster: &Cluster, polls: &PollSettings, opts: &StorageOptions) -> SuiteReport {
    let mut report = SuiteReport::new("Storage Health Check", PassPolicy::Strict);
    report.context("Project", &opts.project);
    report.context("Storage class", &opts.storage_class);
    report.context("Size", &opts.size);
    report.context("Data source", &opts.datasource);

    report.section("Prerequisites");
    let cli = check_cli(cluster);
    if cli.is_fail() {
        report.push(cli);
        report.note("Cannot proceed without Run:ai CLI access.");
        return report;
    }
    report.push(cli);

    let project = check_project(cluster, &opts.project);
    if project.is_fail() {
        report.push(project);
        report.note("Cannot proceed with an invalid project.");
        return report;
    }
    report.push(project);

    report.section("Provisioning");
    let created = create_datasource(cluster, opts);
    if created.is_fail() {
        report.push(created);
        for step in [STEP_BOUND, STEP_PV] {
            report.push(CheckResult::fail(step, "Skipped: data source was not created"));
        }
        report.section("Cleanup");
        for step in [STEP_DELETE, STEP_PVC_CLEANUP, STEP_PV_CLEANUP] {
            report.push(CheckResult::fail(step, "Skipped: data source was not created"));
        }
        return report;
    }
    report.push(created);

    let namespace = opts.namespace();
    let discovery = discover_pvc(cluster, &namespace, &opts.datasource, &polls.pvc_discovery);
    let claim = discovery.into_value().flatten();
    let (bound, volume) = match &claim {
        Some(claim) => {
            info!(claim = %claim, "found claim");
            check_bound(cluster, &namespace, claim, &polls.pvc_bound)
        }
        None => (
            CheckResult::fail(STEP_BOUND, "Could not discover the PVC").with_detail(format!(
                "no claim named {}-project-* in {}",
                opts.datasource, namespace
            )),
            None,
        ),
    };
    report.push(bound);
    report.push(check_volume(cluster, volume.as_deref()));

    report.section("Cleanup");
    let deleted = delete_datasource(cluster, opts);
    if deleted.is_fail() {
        report.push(deleted);
        for step in [STEP_PVC_CLEANUP, STEP_PV_CLEANUP] {
            report.push(CheckResult::fail(step, "Skipped: data source deletion failed"));
        }
        warn!(datasource = %opts.datasource, "manual cleanup required");
        report.note(format!("Manual cleanup required: {}", opts.delete_command()));
        return report;
    }
    report.push(deleted);

    report.push(match &claim {
        Some(claim) => check_gone(
            cluster,
            STEP_PVC_CLEANUP,
            "pvc",
            claim,
            Some(&namespace),
            &polls.resource_cleanup,
        ),
        None => CheckResult::fail(STEP_PVC_CLEANUP, "PVC name not available"),
    });
    report.push(match &volume {
        Some(pv) => check_gone(cluster, STEP_PV_CLEANUP, "pv", pv, None, &polls.resource_cleanup),
        None => CheckResult::fail(STEP_PV_CLEANUP, "PV name not available"),
    });
    report
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

fn not_authenticated(message: &str) -> CheckResult {
    CheckResult::fail(STEP_CLI, message).with_remediation(format!("Run: {}", LOGIN_COMMAND))
}

fn check_cli(cluster: &Cluster) -> CheckResult {
    match cluster.runai(&["config", "get"]) {
        Ok(out) if out.to_lowercase().contains("not logged in") => {
            not_authenticated("Run:ai CLI not authenticated")
        }
        Ok(_) => CheckResult::pass(STEP_CLI, "Run:ai CLI is available and authenticated"),
        Err(e) if e.stderr().to_lowercase().contains("authentication") => {
            not_authenticated("Run:ai CLI not authenticated").with_detail(e.stderr())
        }
        Err(e) => not_authenticated("Run:ai CLI not available or not authenticated")
            .with_detail(e.to_string()),
    }
}

fn check_project(cluster: &Cluster, project: &str) -> CheckResult {
    match cluster.runai(&["project", "list"]) {
        Ok(out) => {
            let found = out
                .lines()
                .any(|line| line.split_whitespace().any(|word| word == project));
            if found {
                CheckResult::pass(STEP_PROJECT, format!("Project '{}' exists", project))
            } else {
                CheckResult::fail(
                    STEP_PROJECT,
                    format!("Project '{}' not found in available projects", project),
                )
            }
        }
        Err(e) => CheckResult::fail(STEP_PROJECT, "Failed to list projects").with_detail(e.stderr()),
    }
}

fn create_datasource(cluster: &Cluster, opts: &StorageOptions) -> CheckResult {
    let args = [
        "datasource",
        "create",
        "pvc",
        opts.datasource.as_str(),
        "--project",
        opts.project.as_str(),
        "--storage-class",
        opts.storage_class.as_str(),
        "--size",
        opts.size.as_str(),
        "--access-mode",
        "ReadWriteMany",
    ];
    match cluster.runai_with_timeout(&args, RUNAI_MUTATION_TIMEOUT) {
        Ok(_) => CheckResult::pass(
            STEP_CREATE,
            format!("Data source '{}' created ({})", opts.datasource, opts.size),
        ),
        Err(e) => CheckResult::fail(STEP_CREATE, "Failed to create data source").with_detail(e.stderr()),
    }
}

/// The bound check and the volume name, when the claim bound.
fn check_bound(
    cluster: &Cluster,
    namespace: &str,
    claim: &str,
    policy: &PollPolicy,
) -> (CheckResult, Option<String>) {
    let outcome = wait_for_pvc_bound(cluster, namespace, claim, policy);
    if let Some(state) = outcome.value() {
        let volume = state.volume_name.clone();
        let message = format!(
            "PVC '{}' is Bound to PV '{}'",
            claim,
            volume.as_deref().unwrap_or("<none>")
        );
        return (CheckResult::pass(STEP_BOUND, message), volume);
    }
    let check = match &outcome.last_observed {
        Some(state) => CheckResult::fail(
            STEP_BOUND,
            format!("PVC is in '{}' state, not Bound", state.phase),
        ),
        None => CheckResult::fail(
            STEP_BOUND,
            format!("Failed to get PVC status after {} attempts", outcome.attempts_used),
        )
        .with_detail(outcome.last_error.unwrap_or_default()),
    };
    (check, None)
}

fn check_volume(cluster: &Cluster, volume: Option<&str>) -> CheckResult {
    let Some(pv) = volume else {
        return CheckResult::fail(STEP_PV, "PV name not available");
    };
    let out = match cluster.jsonpath(
        "pv",
        pv,
        None,
        "{.status.phase}|{.spec.storageClassName}|{.spec.capacity.storage}",
    ) {
        Ok(out) => out,
        Err(e) => {
            return CheckResult::fail(STEP_PV, format!("PV '{}' not found", pv)).with_detail(e.stderr())
        }
    };
    let parts: Vec<&str> = out.split('|').collect();
    let [phase, storage_class, capacity] = parts.as_slice() else {
        return CheckResult::fail(STEP_PV, "Failed to parse PV information").with_detail(out.clone());
    };
    let detail = format!(
        "  Phase: {}\n  Storage class: {}\n  Capacity: {}",
        phase, storage_class, capacity
    );
    if *phase == "Bound" {
        CheckResult::pass(STEP_PV, format!("PV '{}' is Bound", pv)).with_detail(detail)
    } else {
        CheckResult::fail(STEP_PV, format!("PV '{}' is in '{}' state, expected 'Bound'", pv, phase))
            .with_detail(detail)
    }
}

fn delete_datasource(cluster: &Cluster, opts: &StorageOptions) -> CheckResult {
    let args = [
        "datasource",
        "delete",
        "pvc",
        opts.datasource.as_str(),
        "--project",
        opts.project.as_str(),
    ];
    match cluster.runai_with_timeout(&args, RUNAI_MUTATION_TIMEOUT) {
        Ok(_) => CheckResult::pass(STEP_DELETE, format!("Data source '{}' deleted", opts.datasource)),
        Err(e) => CheckResult::fail(STEP_DELETE, "Failed to delete data source")
            .with_detail(e.stderr())
            .with_remediation(format!("Delete it manually: {}", opts.delete_command())),
    }
}

fn check_gone(
    cluster: &Cluster,
    step: &str,
    kind: &str,
    name: &str,
    namespace: Option<&str>,
    policy: &PollPolicy,
) -> CheckResult {
    let outcome = wait_for_absent(cluster, kind, name, namespace, policy);
    if outcome.satisfied {
        return CheckResult::pass(step, format!("{} '{}' removed from cluster", kind.to_uppercase(), name));
    }
    let check = CheckResult::fail(
        step,
        format!(
            "{} '{}' still exists after {}s",
            kind.to_uppercase(),
            name,
            policy.budget().as_secs()
        ),
    );
    // A lingering volume is usually Released or Terminating.
    match cluster.jsonpath(kind, name, namespace, "{.status.phase}") {
        Ok(phase) if !phase.is_empty() => check.with_detail(format!("Last phase: {}", phase)),
        _ => check.with_detail(outcome.last_error.unwrap_or_default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::{CheckStatus, Verdict};
    use crate::config::Tools;
    use crate::infrastructure::{MockRunner, RunError};
    use chrono::TimeZone;

    const CREATE: &str = "runai datasource create pvc storage-test-1 --project test \
                          --storage-class vast-nfs-ib --size 1Gi --access-mode ReadWriteMany";
    const DELETE: &str = "runai datasource delete pvc storage-test-1 --project test";
    const LIST_PVC: &str = "kubectl get pvc -n runai-test -o name";
    const CLAIM: &str = "storage-test-1-project-x7k2q";
    const CLAIM_STATE: &str = "kubectl get pvc storage-test-1-project-x7k2q -n runai-test \
                               -o jsonpath={.status.phase}|{.spec.volumeName}";
    const PV_INFO: &str = "kubectl get pv pvc-42 \
                           -o jsonpath={.status.phase}|{.spec.storageClassName}|{.spec.capacity.storage}";
    const GET_CLAIM: &str = "kubectl get pvc storage-test-1-project-x7k2q -n runai-test";
    const GET_PV: &str = "kubectl get pv pvc-42";

    fn opts() -> StorageOptions {
        StorageOptions {
            project: "test".into(),
            storage_class: "vast-nfs-ib".into(),
            size: "1Gi".into(),
            datasource: "storage-test-1".into(),
        }
    }

    fn logged_in() -> MockRunner {
        MockRunner::new()
            .on("runai config get", Ok("Project: test\n".into()))
            .on("runai project list", Ok("PROJECT  DEPARTMENT\ntest     default\n".into()))
    }

    fn healthy() -> MockRunner {
        logged_in()
            .on(CREATE, Ok("created".into()))
            .on_sequence(
                LIST_PVC,
                vec![
                    Ok(String::new()),
                    Ok(format!("persistentvolumeclaim/other\npersistentvolumeclaim/{}\n", CLAIM)),
                ],
            )
            .on_sequence(CLAIM_STATE, vec![Ok("Pending|".into()), Ok("Bound|pvc-42".into())])
            .on(PV_INFO, Ok("Bound|vast-nfs-ib|1Gi".into()))
            .on(DELETE, Ok("deleted".into()))
            .on_sequence(GET_CLAIM, vec![Ok(CLAIM.into()), MockRunner::failure("NotFound")])
            .on(GET_PV, MockRunner::failure("NotFound"))
    }

    fn run_with(runner: &MockRunner) -> SuiteReport {
        let tools = Tools::default();
        let cluster = Cluster::new(runner, &tools);
        run(&cluster, &PollSettings::immediate(5), &opts())
    }

    #[test]
    fn datasource_name_is_timestamped() {
        let at = Local.with_ymd_and_hms(2025, 11, 2, 14, 3, 9).unwrap();
        assert_eq!(datasource_name(&at), "storage-test-20251102-140309");
    }

    #[test]
    fn full_lifecycle_passes_all_eight_steps() {
        let runner = healthy();
        let report = run_with(&runner);
        let statuses: Vec<CheckStatus> = report.checks().map(|c| c.status).collect();
        assert_eq!(statuses, vec![CheckStatus::Pass; 8]);
        assert_eq!(report.summary().verdict, Verdict::Pass);

        let pv = report.checks().find(|c| c.name == STEP_PV).unwrap();
        assert!(pv.detail.as_deref().unwrap().contains("Capacity: 1Gi"));
        assert_eq!(runner.count(CLAIM_STATE), 2);
        assert_eq!(runner.count(DELETE), 1);
    }

    #[test]
    fn unauthenticated_cli_aborts() {
        let runner = MockRunner::new().on(
            "runai config get",
            Err(RunError::Failed {
                command: "runai config get".into(),
                code: Some(1),
                stdout: String::new(),
                stderr: "Authentication required".into(),
            }),
        );
        let report = run_with(&runner);
        let checks: Vec<&CheckResult> = report.checks().collect();
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].status, CheckStatus::Fail);
        assert!(checks[0].remediation.as_deref().unwrap().contains(LOGIN_COMMAND));
        assert_eq!(runner.executed_commands(), vec!["runai config get"]);
    }

    #[test]
    fn not_logged_in_output_fails() {
        let runner = MockRunner::new().on("runai config get", Ok("Error: not logged in".into()));
        let report = run_with(&runner);
        assert_eq!(report.summary().verdict, Verdict::Fail);
        assert_eq!(report.checks().count(), 1);
    }

    #[test]
    fn missing_project_aborts_before_create() {
        let runner = MockRunner::new()
            .on("runai config get", Ok("ok".into()))
            .on("runai project list", Ok("PROJECT\ntesting\n".into()));
        let report = run_with(&runner);
        assert_eq!(report.checks().count(), 2);
        assert_eq!(runner.count(CREATE), 0);
    }

    #[test]
    fn failed_creation_fails_remaining_steps_without_deleting() {
        let runner = logged_in().on(CREATE, MockRunner::failure("quota exceeded"));
        let report = run_with(&runner);
        let checks: Vec<&CheckResult> = report.checks().collect();
        assert_eq!(checks.len(), 8);
        assert!(checks[2..].iter().all(|c| c.is_fail()));
        assert_eq!(checks[2].detail.as_deref(), Some("quota exceeded"));
        assert_eq!(runner.count(DELETE), 0);
    }

    #[test]
    fn claim_that_never_binds_still_deletes() {
        let runner = logged_in()
            .on(CREATE, Ok("created".into()))
            .on(LIST_PVC, Ok(format!("persistentvolumeclaim/{}", CLAIM)))
            .on(CLAIM_STATE, Ok("Pending|".into()))
            .on(DELETE, Ok("deleted".into()))
            .on(GET_CLAIM, MockRunner::failure("NotFound"));
        let report = run_with(&runner);

        let bound = report.checks().find(|c| c.name == STEP_BOUND).unwrap();
        assert_eq!(bound.message, "PVC is in 'Pending' state, not Bound");
        assert_eq!(runner.count(CLAIM_STATE), 5);
        assert_eq!(runner.count(DELETE), 1);

        let statuses: Vec<CheckStatus> = report.checks().map(|c| c.status).collect();
        assert_eq!(
            statuses,
            vec![
                CheckStatus::Pass,
                CheckStatus::Pass,
                CheckStatus::Pass,
                CheckStatus::Fail,
                CheckStatus::Fail,
                CheckStatus::Pass,
                CheckStatus::Pass,
                CheckStatus::Fail,
            ]
        );
    }

    #[test]
    fn undiscovered_claim_is_reported() {
        let runner = logged_in()
            .on(CREATE, Ok("created".into()))
            .on(LIST_PVC, Ok(String::new()))
            .on(DELETE, Ok("deleted".into()));
        let report = run_with(&runner);
        let bound = report.checks().find(|c| c.name == STEP_BOUND).unwrap();
        assert_eq!(bound.message, "Could not discover the PVC");
        assert_eq!(runner.count(LIST_PVC), 5);
    }

    #[test]
    fn failed_deletion_carries_manual_command() {
        let runner = healthy().on(DELETE, MockRunner::failure("forbidden"));
        let report = run_with(&runner);
        let delete = report.checks().find(|c| c.name == STEP_DELETE).unwrap();
        assert!(delete.remediation.as_deref().unwrap().contains(DELETE));
        assert!(report.notes[0].contains(DELETE));
        assert_eq!(runner.count(GET_CLAIM), 0);
        assert_eq!(report.summary().verdict, Verdict::Fail);
    }

    #[test]
    fn lingering_volume_reports_phase() {
        let runner = healthy()
            .on(GET_PV, Ok("pvc-42".into()))
            .on("kubectl get pv pvc-42 -o jsonpath={.status.phase}", Ok("Released".into()));
        let report = run_with(&runner);
        let cleanup = report.checks().find(|c| c.name == STEP_PV_CLEANUP).unwrap();
        assert!(cleanup.is_fail());
        assert_eq!(cleanup.detail.as_deref(), Some("Last phase: Released"));
    }
}

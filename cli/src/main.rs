//! gpuops: health checks and upgrade tooling for GPU Kubernetes clusters.
//!
//! # Usage
//!
//! ```text
//! gpuops storage --project team-a
//! gpuops network-operator --nodes dgx030,dgx031
//! gpuops gpu-operator --phase before
//! gpuops metrics-server
//! gpuops prometheus-stack --namespace prometheus
//! gpuops kube-state-metrics
//! gpuops ingress-nginx
//! gpuops dgx-pods
//! gpuops overview pre
//! gpuops overview diff --dir .logs
//! gpuops overview summary
//! gpuops discover-environment
//! gpuops logs --project team-a --job nccl-test --workers 4
//! gpuops discover-cluster --env-file .env
//! gpuops calico-cleanup --node dgx030 --dry-run
//! ```

use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use gpuops_core::api::discover_cluster;
use gpuops_core::calico;
use gpuops_core::check::SuiteReport;
use gpuops_core::cluster::Cluster;
use gpuops_core::config::{self, OpsConfig};
use gpuops_core::convergence::conditions::wait_for_pods;
use gpuops_core::credentials::store::CLUSTER_ID;
use gpuops_core::credentials::EnvFile;
use gpuops_core::infrastructure::ProcessRunner;
use gpuops_core::logs::{CancelToken, KubectlLogStreamer, LogCapture};
use gpuops_core::report::{render_diff, render_snapshot, render_suite, render_summary, Palette};
use gpuops_core::signal;
use gpuops_core::snapshot::{self, ChangeKind, UpgradeSummary, VersionDiff};
use gpuops_core::suites::dgx_pods;
use gpuops_core::suites::gpu_operator::{self, GpuOptions, Phase};
use gpuops_core::suites::ingress_nginx::{self, IngressOptions};
use gpuops_core::suites::kube_state_metrics::{self, StateMetricsOptions};
use gpuops_core::suites::metrics_server::{self, MetricsOptions};
use gpuops_core::suites::network_operator::{self, NetworkOptions};
use gpuops_core::suites::prometheus_stack::{self, PrometheusOptions};
use gpuops_core::suites::storage::{self, StorageOptions};
use gpuops_core::OpsError;

const EXIT_OK: i32 = 0;
const EXIT_FAILED: i32 = 1;
const EXIT_USAGE: i32 = 2;

const CAPTURE_STEP: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(name = "gpuops", version, about = "GPU cluster health checks and upgrade tooling")]
struct Cli {
    #[arg(long, global = true, env = "GPUOPS_CONFIG", help = "YAML config file")]
    config: Option<PathBuf>,
    #[arg(short, long, global = true, action = clap::ArgAction::Count, help = "Debug logging (-vv for trace)")]
    verbose: u8,
    #[arg(long, global = true, help = "Disable ANSI colours")]
    no_color: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create, bind and delete a test PVC through Run:ai
    Storage {
        #[arg(long)]
        project: String,
        #[arg(long, help = "Defaults to storage_class from the config")]
        storage_class: Option<String>,
        #[arg(long, default_value = "1Gi")]
        size: String,
    },
    /// Check the NVIDIA Network Operator, SR-IOV and InfiniBand
    NetworkOperator {
        #[arg(long, value_delimiter = ',', help = "Nodes to check (default: all GPU nodes)")]
        nodes: Vec<String>,
        #[arg(long)]
        skip_ssh: bool,
        #[arg(long, default_value = network_operator::DEFAULT_NAMESPACE)]
        namespace: String,
    },
    /// Check the NVIDIA GPU Operator and run a CUDA test pod
    GpuOperator {
        #[arg(long, value_enum, default_value_t = PhaseArg::Baseline)]
        phase: PhaseArg,
        #[arg(long)]
        skip_workload: bool,
        #[arg(long, default_value = gpu_operator::DEFAULT_NAMESPACE)]
        namespace: String,
    },
    /// Check metrics-server and the Metrics API
    MetricsServer {
        #[arg(long, default_value = metrics_server::DEFAULT_NAMESPACE)]
        namespace: String,
    },
    /// Check the kube-prometheus-stack components and Prometheus API
    PrometheusStack {
        #[arg(long, default_value = prometheus_stack::DEFAULT_NAMESPACE)]
        namespace: String,
    },
    /// Check kube-state-metrics and the freshness of its metrics
    KubeStateMetrics {
        #[arg(long, default_value = kube_state_metrics::DEFAULT_NAMESPACE)]
        namespace: String,
    },
    /// Check the ingress-nginx controller and its TLS certificate
    IngressNginx {
        #[arg(long, default_value = ingress_nginx::DEFAULT_NAMESPACE)]
        namespace: String,
        #[arg(long, default_value_t = ingress_nginx::DEFAULT_HTTPS_PORT)]
        https_port: u16,
    },
    /// Check that DGX worker nodes only run user workloads and DaemonSets
    DgxPods,
    /// Capture, compare or summarize cluster version snapshots
    Overview {
        #[arg(value_enum)]
        stage: Stage,
        #[arg(long, help = "Defaults to logs_dir from the config")]
        dir: Option<PathBuf>,
    },
    /// Stream the logs of a job's pods into files
    Logs {
        #[arg(long)]
        project: String,
        #[arg(long)]
        job: String,
        #[arg(long, default_value_t = 1)]
        workers: usize,
        #[arg(long, help = "Defaults to logs_dir from the config")]
        dir: Option<PathBuf>,
    },
    /// Record the host and cluster configuration as one Markdown document
    DiscoverEnvironment {
        #[arg(long, help = "Defaults to logs_dir from the config")]
        dir: Option<PathBuf>,
    },
    /// Look up the cluster id through the REST API and store it in the env file
    DiscoverCluster {
        #[arg(long, default_value = ".env")]
        env_file: PathBuf,
    },
    /// Find and delete Calico interfaces left behind by dead pods
    CalicoCleanup {
        #[arg(long, help = "Check a single node (default: all nodes)")]
        node: Option<String>,
        #[arg(long, help = "Report orphaned interfaces without deleting them")]
        dry_run: bool,
        #[arg(long, help = "Delete without asking")]
        auto_fix: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PhaseArg {
    Before,
    After,
    Baseline,
}

impl From<PhaseArg> for Phase {
    fn from(p: PhaseArg) -> Self {
        match p {
            PhaseArg::Before => Phase::Before,
            PhaseArg::After => Phase::After,
            PhaseArg::Baseline => Phase::Baseline,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Stage {
    Pre,
    Post,
    Diff,
    Summary,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("gpuops: {}", e);
            if e.is_usage() {
                EXIT_USAGE
            } else {
                EXIT_FAILED
            }
        }
    };
    process::exit(code);
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<i32, OpsError> {
    let cfg = config::resolve(cli.config.as_deref())?;
    debug!(?cfg, "configuration");
    let palette = Palette {
        enabled: !cli.no_color && std::io::stdout().is_terminal(),
    };
    let runner = ProcessRunner::new(cfg.command_timeout());
    let cluster = Cluster::new(&runner, &cfg.tools);

    match cli.command {
        Commands::Storage {
            project,
            storage_class,
            size,
        } => {
            let class = storage_class.unwrap_or_else(|| cfg.storage_class.clone());
            let opts = StorageOptions::new(project, class, size);
            let report = storage::run(&cluster, &cfg.polls, &opts);
            Ok(finish(&report, &palette))
        }
        Commands::NetworkOperator {
            nodes,
            skip_ssh,
            namespace,
        } => {
            let opts = NetworkOptions {
                nodes,
                skip_ssh,
                namespace,
            };
            let report = network_operator::run(&cluster, &opts);
            Ok(finish(&report, &palette))
        }
        Commands::GpuOperator {
            phase,
            skip_workload,
            namespace,
        } => {
            let opts = GpuOptions {
                phase: phase.into(),
                namespace,
                skip_workload,
                ..GpuOptions::default()
            };
            let report = gpu_operator::run(&cluster, &cfg.polls, &opts);
            let path = save_suite_log(&report, &cfg.logs_dir, opts.phase)?;
            let code = finish(&report, &palette);
            println!("Report saved to {}", path.display());
            Ok(code)
        }
        Commands::MetricsServer { namespace } => {
            let opts = MetricsOptions {
                namespace,
                pass_percent: cfg.metrics_server_pass_percent,
            };
            let report = metrics_server::run(&cluster, &opts);
            Ok(finish(&report, &palette))
        }
        Commands::PrometheusStack { namespace } => {
            let opts = PrometheusOptions {
                namespace,
                pass_percent: cfg.prometheus_pass_percent,
            };
            let report = prometheus_stack::run(&cluster, &opts);
            Ok(finish(&report, &palette))
        }
        Commands::KubeStateMetrics { namespace } => {
            let opts = StateMetricsOptions {
                namespace,
                pass_percent: cfg.kube_state_metrics_pass_percent,
            };
            let report = kube_state_metrics::run(&cluster, &opts);
            Ok(finish(&report, &palette))
        }
        Commands::IngressNginx {
            namespace,
            https_port,
        } => {
            let opts = IngressOptions {
                namespace,
                https_port,
            };
            let report = ingress_nginx::run(&cluster, &opts);
            Ok(finish(&report, &palette))
        }
        Commands::DgxPods => {
            let report = dgx_pods::run(&cluster);
            Ok(finish(&report, &palette))
        }
        Commands::Overview { stage, dir } => {
            let dir = dir.unwrap_or_else(|| cfg.logs_dir.clone());
            match stage {
                Stage::Diff => overview_diff(&dir),
                Stage::Summary => overview_summary(&dir),
                Stage::Pre | Stage::Post => overview_capture(&cluster, stage, &dir),
            }
        }
        Commands::DiscoverEnvironment { dir } => {
            let dir = dir.unwrap_or_else(|| cfg.logs_dir.clone());
            discover_environment(&cluster, &dir)
        }
        Commands::Logs {
            project,
            job,
            workers,
            dir,
        } => {
            let dir = dir.unwrap_or_else(|| cfg.logs_dir.clone());
            capture_logs(&cluster, &cfg, &project, &job, workers, &dir)
        }
        Commands::DiscoverCluster { env_file } => discover(&env_file, &cfg),
        Commands::CalicoCleanup {
            node,
            dry_run,
            auto_fix,
        } => calico_cleanup(&cluster, node, dry_run, auto_fix, &palette),
    }
}

/// Print a suite report and map its verdict to an exit code.
fn finish(report: &SuiteReport, palette: &Palette) -> i32 {
    print!("{}", render_suite(report, palette));
    if report.summary().verdict.is_success() {
        EXIT_OK
    } else {
        EXIT_FAILED
    }
}

fn write_file(path: &Path, content: &str) -> Result<(), OpsError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| OpsError::io(format!("cannot create '{}'", parent.display()), e))?;
    }
    std::fs::write(path, content)
        .map_err(|e| OpsError::io(format!("cannot write '{}'", path.display()), e))
}

/// Plain-text copy of a GPU Operator run, named by phase and time.
fn save_suite_log(report: &SuiteReport, dir: &Path, phase: Phase) -> Result<PathBuf, OpsError> {
    let name = format!(
        "gpu-operator-test-{}-{}.log",
        phase,
        Local::now().format("%Y%m%d_%H%M%S")
    );
    let path = dir.join(name);
    write_file(&path, &render_suite(report, &Palette::plain()))?;
    Ok(path)
}

// ---------------------------------------------------------------------------
// overview
// ---------------------------------------------------------------------------

fn snapshot_path(dir: &Path, stage: Stage) -> PathBuf {
    match stage {
        Stage::Post => dir.join(snapshot::POST_SNAPSHOT),
        _ => dir.join(snapshot::PRE_SNAPSHOT),
    }
}

fn overview_capture(cluster: &Cluster, stage: Stage, dir: &Path) -> Result<i32, OpsError> {
    let collection = snapshot::collect(cluster);
    let json_path = snapshot_path(dir, stage);
    snapshot::save_snapshot(&collection.snapshot, &json_path)?;

    let md_path = json_path.with_extension("md");
    write_file(
        &md_path,
        &render_snapshot(&collection.snapshot, &collection.warnings),
    )?;

    let flat = collection.snapshot.flatten();
    println!("Captured {} version entries", flat.len());
    for section in [
        snapshot::collect::HELM_RELEASES,
        snapshot::collect::WORKLOADS,
        snapshot::collect::K8S_VERSIONS,
    ] {
        println!("  {}: {}", section, collection.snapshot.section_len(section));
    }
    for w in &collection.warnings {
        println!("  warning: {}", w);
    }
    println!("Snapshot: {}", json_path.display());
    println!("Report: {}", md_path.display());
    Ok(EXIT_OK)
}

fn overview_diff(dir: &Path) -> Result<i32, OpsError> {
    let pre = snapshot::load_snapshot(&snapshot_path(dir, Stage::Pre))?;
    let post = snapshot::load_snapshot(&snapshot_path(dir, Stage::Post))?;
    let diff = VersionDiff::compute(&pre, &post);

    let md_path = dir.join(snapshot::DIFF_REPORT);
    write_file(&md_path, &render_diff(&diff))?;

    println!("Version diff: {}", diff.summary());
    for kind in [
        ChangeKind::Upgraded,
        ChangeKind::Added,
        ChangeKind::Removed,
        ChangeKind::Unchanged,
    ] {
        println!("  {}: {}", kind, diff.count(kind));
    }
    println!("Report: {}", md_path.display());
    Ok(EXIT_OK)
}

fn overview_summary(dir: &Path) -> Result<i32, OpsError> {
    let pre = snapshot::load_snapshot(&snapshot_path(dir, Stage::Pre))?;
    let post = snapshot::load_snapshot(&snapshot_path(dir, Stage::Post))?;
    let summary = UpgradeSummary::compute(&pre, &post);

    let md_path = dir.join(snapshot::SUMMARY_REPORT);
    write_file(&md_path, &render_summary(&summary))?;

    println!("Kubernetes components changed: {}", summary.components_changed());
    for kind in [
        ChangeKind::Upgraded,
        ChangeKind::Added,
        ChangeKind::Removed,
        ChangeKind::Unchanged,
    ] {
        println!("  Applications {}: {}", kind, summary.count(kind));
    }
    println!("Report: {}", md_path.display());
    Ok(EXIT_OK)
}

fn discover_environment(cluster: &Cluster, dir: &Path) -> Result<i32, OpsError> {
    let path = dir.join(snapshot::ENVIRONMENT_REPORT);
    println!("Collecting environment; this can take several minutes...");
    let generated = Local::now().format("%Y-%m-%d %H:%M:%S %Z").to_string();
    let document = snapshot::environment::discover(cluster, &generated);
    write_file(&path, &document)?;
    println!("Output file: {} ({} bytes)", path.display(), document.len());
    Ok(EXIT_OK)
}

// ---------------------------------------------------------------------------
// logs
// ---------------------------------------------------------------------------

fn capture_logs(
    cluster: &Cluster,
    cfg: &OpsConfig,
    project: &str,
    job: &str,
    workers: usize,
    dir: &Path,
) -> Result<i32, OpsError> {
    let namespace = format!("runai-{}", project);
    let selector = format!("app={}", job);
    // One launcher plus the workers.
    let expected = workers + 1;

    println!("Waiting for {} pod(s) of {} in {}...", expected, job, namespace);
    let outcome = wait_for_pods(cluster, &namespace, &selector, expected, &cfg.polls.pod_ready);
    if !outcome.satisfied {
        eprintln!(
            "Timed out after {} attempt(s) waiting for pods{}",
            outcome.attempts_used,
            outcome
                .last_error
                .as_deref()
                .map(|e| format!(": {}", e))
                .unwrap_or_default()
        );
        return Ok(EXIT_FAILED);
    }
    let pods: Vec<String> = outcome
        .into_value()
        .unwrap_or_default()
        .iter()
        .map(|p| p.name().to_string())
        .collect();

    signal::install();
    let streamer = Arc::new(KubectlLogStreamer::new(cfg.tools.kubectl.as_str(), namespace.as_str()));
    let capture = LogCapture::start(streamer, dir, job, &pods, CancelToken::new())?;
    for (pod, path) in capture.files() {
        println!("  {} -> {}", pod, path.display());
    }
    println!("Capturing logs; press Ctrl-C to stop.");

    while !signal::interrupted() && !capture.all_finished() {
        thread::sleep(CAPTURE_STEP);
    }
    let interrupted = signal::interrupted();
    if interrupted {
        info!("interrupted, stopping log capture");
    }

    let reports = capture.shutdown();
    let mut failed = false;
    for r in &reports {
        match &r.outcome {
            Ok(end) => println!("  {}: {:?} ({})", r.pod, end, r.path.display()),
            Err(e) => {
                failed = true;
                eprintln!("  {}: capture failed: {}", r.pod, e);
            }
        }
    }
    Ok(if interrupted {
        signal::EXIT_INTERRUPTED
    } else if failed {
        EXIT_FAILED
    } else {
        EXIT_OK
    })
}

// ---------------------------------------------------------------------------
// discover-cluster
// ---------------------------------------------------------------------------

fn discover(env_file: &Path, cfg: &OpsConfig) -> Result<i32, OpsError> {
    let (mut file, created) = EnvFile::load_or_create(env_file)?;
    if created {
        eprintln!(
            "Created {}; fill in the Run:ai API URL, client id and secret, then rerun.",
            env_file.display()
        );
        return Ok(EXIT_USAGE);
    }
    let creds = file.credentials()?;
    let cluster = discover_cluster(&creds, cfg.command_timeout())?;

    if creds.cluster_id.as_deref() == Some(cluster.uuid.as_str()) {
        println!("Cluster id already set: {} ({})", cluster.uuid, cluster.name);
        return Ok(EXIT_OK);
    }
    file.set(CLUSTER_ID, &cluster.uuid);
    file.save(env_file)?;
    println!("Cluster: {} ({})", cluster.name, cluster.uuid);
    println!("Saved {} to {}", CLUSTER_ID, env_file.display());
    Ok(EXIT_OK)
}

// ---------------------------------------------------------------------------
// calico-cleanup
// ---------------------------------------------------------------------------

fn calico_cleanup(
    cluster: &Cluster,
    node: Option<String>,
    dry_run: bool,
    auto_fix: bool,
    palette: &Palette,
) -> Result<i32, OpsError> {
    let nodes = match node {
        Some(n) => vec![n],
        None => calico::all_nodes(cluster)?,
    };
    println!("Checking {} node(s): {}", nodes.len(), nodes.join(", "));
    let scans = calico::scan(cluster, &nodes)?;

    let mut total = 0;
    for scan in &scans {
        if let Some(e) = &scan.error {
            println!("{} {}: {}", palette.yellow("!"), scan.node, e);
            continue;
        }
        println!(
            "{}: {} running pod(s), {} Calico route(s), {} orphaned",
            palette.bold(&scan.node),
            scan.running_pods,
            scan.routes,
            scan.orphaned.len()
        );
        for route in &scan.orphaned {
            println!("  {} {} ({})", palette.red("x"), route.interface, route.ip);
        }
        total += scan.orphaned.len();
    }

    if total == 0 {
        println!("{}", palette.green("No orphaned interfaces found"));
        return Ok(EXIT_OK);
    }
    if !dry_run && !auto_fix && !confirm(&format!("Delete {} orphaned interface(s)? [y/N]: ", total))? {
        println!("Aborted.");
        return Ok(EXIT_FAILED);
    }

    let result = calico::cleanup(cluster, &scans, dry_run);
    let verb = if dry_run { "Would delete" } else { "Deleted" };
    for (node, iface) in &result.deleted {
        println!("  {} {} on {}", verb, iface, node);
    }
    for (node, iface, err) in &result.failed {
        println!("  {} {} on {}: {}", palette.red("Failed to delete"), iface, node, err);
    }
    println!(
        "{} {} interface(s), {} failed",
        verb,
        result.deleted.len(),
        result.failed.len()
    );
    Ok(if result.is_complete() { EXIT_OK } else { EXIT_FAILED })
}

fn confirm(prompt: &str) -> Result<bool, OpsError> {
    print!("{}", prompt);
    io::stdout()
        .flush()
        .map_err(|e| OpsError::io("cannot write prompt", e))?;
    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .map_err(|e| OpsError::io("cannot read answer", e))?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn nodes_split_on_commas() {
        let cli = Cli::try_parse_from(["gpuops", "network-operator", "--nodes", "dgx030,dgx031"]).unwrap();
        match cli.command {
            Commands::NetworkOperator { nodes, skip_ssh, namespace } => {
                assert_eq!(nodes, vec!["dgx030", "dgx031"]);
                assert!(!skip_ssh);
                assert_eq!(namespace, "network-operator");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn verbosity_counts() {
        let cli = Cli::try_parse_from(["gpuops", "-vv", "metrics-server"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn snapshot_paths_follow_stage() {
        let dir = Path::new(".logs");
        assert_eq!(snapshot_path(dir, Stage::Pre), dir.join("pre-upgrade-overview.json"));
        assert_eq!(snapshot_path(dir, Stage::Post), dir.join("post-upgrade-overview.json"));
    }

    #[test]
    fn calico_cleanup_flags() {
        let cli = Cli::try_parse_from(["gpuops", "calico-cleanup", "--node", "dgx030", "--dry-run"]).unwrap();
        match cli.command {
            Commands::CalicoCleanup { node, dry_run, auto_fix } => {
                assert_eq!(node.as_deref(), Some("dgx030"));
                assert!(dry_run);
                assert!(!auto_fix);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn ingress_defaults() {
        let cli = Cli::try_parse_from(["gpuops", "ingress-nginx"]).unwrap();
        match cli.command {
            Commands::IngressNginx { namespace, https_port } => {
                assert_eq!(namespace, "ingress-nginx");
                assert_eq!(https_port, 443);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn new_suites_parse() {
        let cli = Cli::try_parse_from(["gpuops", "kube-state-metrics", "--namespace", "monitoring"]).unwrap();
        assert!(matches!(cli.command, Commands::KubeStateMetrics { namespace } if namespace == "monitoring"));
        let cli = Cli::try_parse_from(["gpuops", "prometheus-stack"]).unwrap();
        assert!(matches!(cli.command, Commands::PrometheusStack { namespace } if namespace == "prometheus"));
        let cli = Cli::try_parse_from(["gpuops", "dgx-pods"]).unwrap();
        assert!(matches!(cli.command, Commands::DgxPods));
    }

    #[test]
    fn overview_summary_stage() {
        let cli = Cli::try_parse_from(["gpuops", "overview", "summary", "--dir", "/tmp/x"]).unwrap();
        match cli.command {
            Commands::Overview { stage, dir } => {
                assert_eq!(stage, Stage::Summary);
                assert_eq!(dir, Some(PathBuf::from("/tmp/x")));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn phase_maps_to_core() {
        assert_eq!(Phase::from(PhaseArg::After), Phase::After);
        assert_eq!(Phase::from(PhaseArg::Baseline).to_string(), "baseline");
    }
}

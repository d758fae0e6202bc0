//! Operator configuration loaded from a YAML file.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration. The CLI resolves the path from `--config` or
//! `GPUOPS_CONFIG`; an explicitly named file that does not exist is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::convergence::PollPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpsConfig {
    pub tools: Tools,

    /// Per-command timeout applied by the process runner.
    pub command_timeout_secs: u64,

    pub polls: PollSettings,

    /// Minimum pass rate for the metrics-server suite.
    pub metrics_server_pass_percent: u8,

    /// Minimum pass rate for the kube-prometheus-stack suite.
    pub prometheus_pass_percent: u8,

    /// Minimum pass rate for the kube-state-metrics suite.
    pub kube_state_metrics_pass_percent: u8,

    /// Storage class used when creating the test data source.
    pub storage_class: String,

    /// Directory for snapshots, reports and captured logs.
    pub logs_dir: PathBuf,
}

/// Program names (or absolute paths) of the cluster CLIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tools {
    pub kubectl: String,
    pub helm: String,
    pub runai: String,
    pub ssh: String,
}

/// Poll policies for each convergence wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub pvc_discovery: PollPolicy,
    pub pvc_bound: PollPolicy,
    pub resource_cleanup: PollPolicy,
    pub pod_ready: PollPolicy,
    pub workload_completion: PollPolicy,
}

impl Default for OpsConfig {
    fn default() -> Self {
        OpsConfig {
            tools: Tools::default(),
            command_timeout_secs: 30,
            polls: PollSettings::default(),
            metrics_server_pass_percent: 85,
            prometheus_pass_percent: 80,
            kube_state_metrics_pass_percent: 75,
            storage_class: "vast-nfs-ib".into(),
            logs_dir: PathBuf::from(".logs"),
        }
    }
}

impl Default for Tools {
    fn default() -> Self {
        Tools {
            kubectl: "kubectl".into(),
            helm: "helm".into(),
            runai: "runai".into(),
            ssh: "ssh".into(),
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        PollSettings {
            pvc_discovery: PollPolicy::new(10, Duration::from_secs(3)),
            pvc_bound: PollPolicy::new(10, Duration::from_secs(3)),
            resource_cleanup: PollPolicy::new(10, Duration::from_secs(3)),
            pod_ready: PollPolicy::new(60, Duration::from_secs(5)),
            workload_completion: PollPolicy::new(30, Duration::from_secs(2)),
        }
    }
}

impl PollSettings {
    /// Every policy polling without delay. Used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        let p = PollPolicy::immediate(max_attempts);
        PollSettings {
            pvc_discovery: p,
            pvc_bound: p,
            resource_cleanup: p,
            pod_ready: p,
            workload_completion: p,
        }
    }

    fn named(&self) -> [(&'static str, &PollPolicy); 5] {
        [
            ("pvc_discovery", &self.pvc_discovery),
            ("pvc_bound", &self.pvc_bound),
            ("resource_cleanup", &self.resource_cleanup),
            ("pod_ready", &self.pod_ready),
            ("workload_completion", &self.workload_completion),
        ]
    }
}

impl OpsConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Reject values that would make a suite meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, policy) in self.polls.named() {
            if policy.max_attempts == 0 {
                return Err(ConfigError::Invalid(format!(
                    "polls.{}.max_attempts must be at least 1",
                    name
                )));
            }
        }
        for (name, percent) in [
            ("metrics_server_pass_percent", self.metrics_server_pass_percent),
            ("prometheus_pass_percent", self.prometheus_pass_percent),
            ("kube_state_metrics_pass_percent", self.kube_state_metrics_pass_percent),
        ] {
            if percent > 100 {
                return Err(ConfigError::Invalid(format!(
                    "{} must be 0-100, got {}",
                    name, percent
                )));
            }
        }
        if self.command_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "command_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Load and validate a config from a YAML file.
pub fn load(path: &Path) -> Result<OpsConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&content)
}

/// Parse and validate a config from a YAML string. Blank input is the default config.
pub fn parse(content: &str) -> Result<OpsConfig, ConfigError> {
    let cfg: OpsConfig = if content.trim().is_empty() {
        OpsConfig::default()
    } else {
        serde_yaml::from_str(content)?
    };
    cfg.validate()?;
    Ok(cfg)
}

/// Load from `path` when given, otherwise return the defaults.
pub fn resolve(path: Option<&Path>) -> Result<OpsConfig, ConfigError> {
    match path {
        Some(p) => load(p),
        None => Ok(OpsConfig::default()),
    }
}

//! Cluster access through the external CLIs.
//!
//! `Cluster` pairs a `CommandRunner` with the configured program names and
//! builds the `kubectl`/`helm`/`runai`/`ssh` invocations the suites need.
//! JSON output is decoded into the types in [`resources`].

pub mod resources;

use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::Tools;
use crate::convergence::Presence;
use crate::infrastructure::{CommandRunner, Invocation, RunError};

pub use resources::{
    Container, HelmRelease, List, Node, ObjectMeta, PersistentVolume, PersistentVolumeClaim, Pod,
    Secret, Service, Workload,
};

/// A command either failed to run or printed something we could not decode.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryError {
    Run(RunError),
    Parse { command: String, message: String },
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::Run(e) => write!(f, "{}", e),
            QueryError::Parse { command, message } => {
                write!(f, "cannot parse output of `{}`: {}", command, message)
            }
        }
    }
}

impl std::error::Error for QueryError {}

impl From<RunError> for QueryError {
    fn from(e: RunError) -> Self {
        QueryError::Run(e)
    }
}

pub struct Cluster<'a> {
    runner: &'a dyn CommandRunner,
    tools: &'a Tools,
}

impl<'a> Cluster<'a> {
    pub fn new(runner: &'a dyn CommandRunner, tools: &'a Tools) -> Self {
        Cluster { runner, tools }
    }

    pub fn runner(&self) -> &'a dyn CommandRunner {
        self.runner
    }

    pub fn tools(&self) -> &'a Tools {
        self.tools
    }

    fn exec(&self, invocation: Invocation) -> Result<String, RunError> {
        debug!(command = %invocation.command_line(), "exec");
        self.runner.run(&invocation)
    }

    pub fn kubectl(&self, args: &[&str]) -> Result<String, RunError> {
        self.exec(Invocation::new(&self.tools.kubectl).args(args.iter().copied()))
    }

    /// Run kubectl and decode its stdout as JSON.
    pub fn kubectl_json<T: DeserializeOwned>(&self, args: &[&str]) -> Result<T, QueryError> {
        let out = self.kubectl(args)?;
        decode(&self.tools.kubectl, args, &out)
    }

    /// `kubectl get <kind> [-n ns] [-l selector] -o json`, decoded as a list.
    pub fn list<T: DeserializeOwned>(
        &self,
        kind: &str,
        namespace: Option<&str>,
        selector: Option<&str>,
    ) -> Result<Vec<T>, QueryError> {
        let mut args = vec!["get", kind];
        if let Some(ns) = namespace {
            args.extend(["-n", ns]);
        }
        if let Some(sel) = selector {
            args.extend(["-l", sel]);
        }
        args.extend(["-o", "json"]);
        let list: List<T> = self.kubectl_json(&args)?;
        Ok(list.items)
    }

    /// `kubectl get <kind> <name> [-n ns] -o json`.
    pub fn get<T: DeserializeOwned>(
        &self,
        kind: &str,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<T, QueryError> {
        let mut args = vec!["get", kind, name];
        if let Some(ns) = namespace {
            args.extend(["-n", ns]);
        }
        args.extend(["-o", "json"]);
        self.kubectl_json(&args)
    }

    /// `kubectl get <kind> <name> [-n ns] -o jsonpath=<path>`, trimmed.
    pub fn jsonpath(
        &self,
        kind: &str,
        name: &str,
        namespace: Option<&str>,
        path: &str,
    ) -> Result<String, RunError> {
        let output = format!("jsonpath={}", path);
        let mut args = vec!["get", kind, name];
        if let Some(ns) = namespace {
            args.extend(["-n", ns]);
        }
        args.extend(["-o", output.as_str()]);
        self.kubectl(&args).map(|s| s.trim().to_string())
    }

    /// Whether a named object exists. Only a NotFound reply means absent;
    /// any other failure is an error.
    pub fn presence(
        &self,
        kind: &str,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Presence, RunError> {
        let mut args = vec!["get", kind, name];
        if let Some(ns) = namespace {
            args.extend(["-n", ns]);
        }
        match self.kubectl(&args) {
            Ok(_) => Ok(Presence::Present),
            Err(e) if e.is_exit_failure() && is_not_found(&e.stderr()) => Ok(Presence::Absent),
            Err(e) => Err(e),
        }
    }

    /// `kubectl apply -f -` with the manifest on stdin.
    pub fn apply_stdin(&self, manifest: &str) -> Result<String, RunError> {
        self.exec(
            Invocation::new(&self.tools.kubectl)
                .args(["apply", "-f", "-"])
                .stdin(manifest),
        )
    }

    /// `kubectl` with its own timeout, for queries that scale with cluster size.
    pub fn kubectl_with_timeout(&self, args: &[&str], timeout: Duration) -> Result<String, RunError> {
        self.exec(
            Invocation::new(&self.tools.kubectl)
                .args(args.iter().copied())
                .timeout(timeout),
        )
    }

    pub fn helm(&self, args: &[&str]) -> Result<String, RunError> {
        self.exec(Invocation::new(&self.tools.helm).args(args.iter().copied()))
    }

    /// `helm list -A -o json`.
    pub fn helm_releases(&self) -> Result<Vec<HelmRelease>, QueryError> {
        let args = ["list", "-A", "-o", "json"];
        let out = self.helm(&args)?;
        decode(&self.tools.helm, &args, &out)
    }

    pub fn runai(&self, args: &[&str]) -> Result<String, RunError> {
        self.exec(Invocation::new(&self.tools.runai).args(args.iter().copied()))
    }

    /// `runai` with a longer timeout, for create/delete calls that wait on the scheduler.
    pub fn runai_with_timeout(&self, args: &[&str], timeout: Duration) -> Result<String, RunError> {
        self.exec(
            Invocation::new(&self.tools.runai)
                .args(args.iter().copied())
                .timeout(timeout),
        )
    }

    /// Run a node-local binary (kubeadm, kubelet, containerd) by name.
    pub fn local(&self, program: &str, args: &[&str]) -> Result<String, RunError> {
        self.exec(Invocation::new(program).args(args.iter().copied()))
    }

    /// Run a local program with `input` on stdin.
    pub fn local_stdin(&self, program: &str, args: &[&str], input: &str) -> Result<String, RunError> {
        self.exec(Invocation::new(program).args(args.iter().copied()).stdin(input))
    }

    /// Run a remote command on a node over ssh in batch mode.
    pub fn ssh(&self, host: &str, command: &str) -> Result<String, RunError> {
        self.exec(Invocation::new(&self.tools.ssh).args([
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            "BatchMode=yes",
            host,
            command,
        ]))
    }
}

fn is_not_found(stderr: &str) -> bool {
    stderr.contains("NotFound") || stderr.contains("not found")
}

fn decode<T: DeserializeOwned>(program: &str, args: &[&str], out: &str) -> Result<T, QueryError> {
    serde_json::from_str(out).map_err(|e| QueryError::Parse {
        command: format!("{} {}", program, args.join(" ")),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::MockRunner;

    fn tools() -> Tools {
        Tools::default()
    }

    #[test]
    fn list_builds_selector_and_namespace() {
        let runner = MockRunner::new().on(
            "kubectl get pods -n gpu-operator -l app=x -o json",
            Ok(r#"{"items":[{"metadata":{"name":"a"},"status":{"phase":"Running"}}]}"#.into()),
        );
        let t = tools();
        let cluster = Cluster::new(&runner, &t);
        let pods: Vec<Pod> = cluster.list("pods", Some("gpu-operator"), Some("app=x")).unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].name(), "a");
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let runner = MockRunner::new().on("kubectl get nodes -o json", Ok("not json".into()));
        let t = tools();
        let cluster = Cluster::new(&runner, &t);
        let err = cluster.list::<Node>("nodes", None, None).unwrap_err();
        match err {
            QueryError::Parse { command, .. } => assert_eq!(command, "kubectl get nodes -o json"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn presence_maps_exit_failure_to_absent() {
        let runner = MockRunner::new()
            .on("kubectl get pvc gone -n ns", MockRunner::failure("NotFound"))
            .on("kubectl get pvc here -n ns", Ok("here".into()));
        let t = tools();
        let cluster = Cluster::new(&runner, &t);
        assert_eq!(cluster.presence("pvc", "gone", Some("ns")).unwrap(), Presence::Absent);
        assert_eq!(cluster.presence("pvc", "here", Some("ns")).unwrap(), Presence::Present);
    }

    #[test]
    fn presence_treats_server_errors_as_errors() {
        let runner = MockRunner::new().on(
            "kubectl get pv pv-1",
            MockRunner::failure("The connection to the server 10.0.0.1:6443 was refused"),
        );
        let t = tools();
        let cluster = Cluster::new(&runner, &t);
        assert!(cluster.presence("pv", "pv-1", None).is_err());
    }

    #[test]
    fn presence_accepts_lowercase_not_found() {
        let runner = MockRunner::new().on(
            "kubectl get pvc x -n ns",
            MockRunner::failure("Error from server (NotFound): persistentvolumeclaims \"x\" not found"),
        );
        let t = tools();
        let cluster = Cluster::new(&runner, &t);
        assert_eq!(cluster.presence("pvc", "x", Some("ns")).unwrap(), Presence::Absent);
    }

    #[test]
    fn presence_propagates_timeout() {
        let runner = MockRunner::new().on(
            "kubectl get pv x",
            Err(RunError::TimedOut {
                command: "kubectl get pv x".into(),
                secs: 30,
            }),
        );
        let t = tools();
        let cluster = Cluster::new(&runner, &t);
        assert!(cluster.presence("pv", "x", None).is_err());
    }

    #[test]
    fn apply_passes_manifest_on_stdin() {
        let runner = MockRunner::new().on("kubectl apply -f -", Ok("pod/x created".into()));
        let t = tools();
        let cluster = Cluster::new(&runner, &t);
        cluster.apply_stdin("kind: Pod\n").unwrap();
        let invocations = runner.invocations();
        assert_eq!(invocations[0].stdin.as_deref(), Some("kind: Pod\n"));
    }

    #[test]
    fn configured_program_names_are_used() {
        let runner = MockRunner::new().on("/opt/helm list -A -o json", Ok("[]".into()));
        let t = Tools {
            helm: "/opt/helm".into(),
            ..Tools::default()
        };
        let cluster = Cluster::new(&runner, &t);
        assert!(cluster.helm_releases().unwrap().is_empty());
    }

    #[test]
    fn jsonpath_trims_output() {
        let runner = MockRunner::new().on(
            "kubectl get pvc c -n ns -o jsonpath={.status.phase}",
            Ok("Bound\n".into()),
        );
        let t = tools();
        let cluster = Cluster::new(&runner, &t);
        assert_eq!(cluster.jsonpath("pvc", "c", Some("ns"), "{.status.phase}").unwrap(), "Bound");
    }
}

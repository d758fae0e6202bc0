//! Per-pod log capture into files.
//!
//! `LogCapture` owns one sink per pod. Each sink is a thread running a
//! `LogStreamer` that writes the pod's log stream into
//! `{dir}/{job}_{pod}_{YYYYmmdd_HHMMSS}.log`. All sinks share a
//! `CancelToken`; [`LogCapture::shutdown`] sets it and joins every thread,
//! and dropping the capture does the same.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Local};
use thiserror::Error;
use tracing::{debug, info, warn};

const STREAM_CHECK: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum LogError {
    #[error("cannot create log directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot create log file '{path}': {source}")]
    CreateFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

// ---------------------------------------------------------------------------
// CancelToken
// ---------------------------------------------------------------------------

/// Shared cancellation flag observed by every sink.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// LogStreamer
// ---------------------------------------------------------------------------

/// How a stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The source closed the stream (pod finished).
    Finished,
    Cancelled,
}

/// Writes one pod's log stream to `out` until it ends or `cancel` is set.
pub trait LogStreamer: Send + Sync {
    fn stream(&self, pod: &str, out: File, cancel: &CancelToken) -> io::Result<StreamEnd>;
}

/// Follows `kubectl logs -f <pod> -n <namespace>`, killing the child on cancel.
pub struct KubectlLogStreamer {
    kubectl: String,
    namespace: String,
}

impl KubectlLogStreamer {
    pub fn new(kubectl: impl Into<String>, namespace: impl Into<String>) -> Self {
        KubectlLogStreamer {
            kubectl: kubectl.into(),
            namespace: namespace.into(),
        }
    }
}

impl LogStreamer for KubectlLogStreamer {
    fn stream(&self, pod: &str, out: File, cancel: &CancelToken) -> io::Result<StreamEnd> {
        // kubectl's own errors ("container not found") land in the same file.
        let err = out.try_clone()?;
        let mut child = Command::new(&self.kubectl)
            .args(["logs", "-f", pod, "-n", self.namespace.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::from(out))
            .stderr(Stdio::from(err))
            .spawn()?;
        debug!(pod, pid = child.id(), "log stream started");

        loop {
            if cancel.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                return Ok(StreamEnd::Cancelled);
            }
            if child.try_wait()?.is_some() {
                return Ok(StreamEnd::Finished);
            }
            thread::sleep(STREAM_CHECK);
        }
    }
}

// ---------------------------------------------------------------------------
// LogCapture
// ---------------------------------------------------------------------------

/// `{job}_{pod}_{YYYYmmdd_HHMMSS}.log`
pub fn log_file_name(job: &str, pod: &str, at: &DateTime<Local>) -> String {
    format!("{}_{}_{}.log", job, pod, at.format("%Y%m%d_%H%M%S"))
}

struct LogSink {
    pod: String,
    path: PathBuf,
    handle: Option<JoinHandle<io::Result<StreamEnd>>>,
}

/// How one sink ended after shutdown.
#[derive(Debug)]
pub struct SinkReport {
    pub pod: String,
    pub path: PathBuf,
    pub outcome: Result<StreamEnd, String>,
}

pub struct LogCapture {
    sinks: Vec<LogSink>,
    cancel: CancelToken,
}

impl LogCapture {
    /// Create the log directory and start one sink per pod.
    pub fn start(
        streamer: Arc<dyn LogStreamer>,
        dir: &Path,
        job: &str,
        pods: &[String],
        cancel: CancelToken,
    ) -> Result<Self, LogError> {
        std::fs::create_dir_all(dir).map_err(|source| LogError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut capture = LogCapture {
            sinks: Vec::new(),
            cancel,
        };
        let now = Local::now();
        for pod in pods {
            let path = dir.join(log_file_name(job, pod, &now));
            // On error the capture is dropped, which cancels sinks already started.
            let file = File::create(&path).map_err(|source| LogError::CreateFile {
                path: path.clone(),
                source,
            })?;
            let streamer = Arc::clone(&streamer);
            let token = capture.cancel.clone();
            let pod_name = pod.clone();
            let handle = thread::spawn(move || streamer.stream(&pod_name, file, &token));
            info!(pod = %pod, path = %path.display(), "capturing logs");
            capture.sinks.push(LogSink {
                pod: pod.clone(),
                path,
                handle: Some(handle),
            });
        }
        Ok(capture)
    }

    /// `(pod, log file)` for every sink.
    pub fn files(&self) -> Vec<(&str, &Path)> {
        self.sinks
            .iter()
            .map(|s| (s.pod.as_str(), s.path.as_path()))
            .collect()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// True when every stream has ended on its own.
    pub fn all_finished(&self) -> bool {
        self.sinks
            .iter()
            .all(|s| s.handle.as_ref().map_or(true, |h| h.is_finished()))
    }

    /// Block until all streams end or the token is cancelled.
    pub fn wait(&self, step: Duration) {
        while !self.cancel.is_cancelled() && !self.all_finished() {
            thread::sleep(step);
        }
    }

    /// Cancel every sink and join its thread.
    pub fn shutdown(mut self) -> Vec<SinkReport> {
        self.stop()
    }

    fn stop(&mut self) -> Vec<SinkReport> {
        self.cancel.cancel();
        let mut reports = Vec::new();
        for sink in &mut self.sinks {
            let Some(handle) = sink.handle.take() else {
                continue;
            };
            let outcome = match handle.join() {
                Ok(Ok(end)) => Ok(end),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err("log sink thread panicked".to_string()),
            };
            if let Err(e) = &outcome {
                warn!(pod = %sink.pod, error = %e, "log capture failed");
            }
            reports.push(SinkReport {
                pod: sink.pod.clone(),
                path: sink.path.clone(),
                outcome,
            });
        }
        reports
    }
}

impl Drop for LogCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    /// Writes one line, then either returns or waits for cancellation.
    struct FakeStreamer {
        follow: bool,
    }

    impl LogStreamer for FakeStreamer {
        fn stream(&self, pod: &str, mut out: File, cancel: &CancelToken) -> io::Result<StreamEnd> {
            writeln!(out, "log line from {}", pod)?;
            if !self.follow {
                return Ok(StreamEnd::Finished);
            }
            while !cancel.is_cancelled() {
                thread::sleep(Duration::from_millis(5));
            }
            Ok(StreamEnd::Cancelled)
        }
    }

    fn pods() -> Vec<String> {
        vec!["job-1-master-0".to_string(), "job-1-worker-0".to_string()]
    }

    #[cfg(unix)]
    #[test]
    fn kubectl_errors_are_written_to_the_log_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("kubectl");
        std::fs::write(&fake, "#!/bin/sh\necho 'error: container not found (\"main\")' >&2\nexit 1\n").unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let path = dir.path().join("out.log");
        let out = File::create(&path).unwrap();
        let streamer = KubectlLogStreamer::new(fake.to_string_lossy(), "runai-team-a");
        let end = streamer.stream("job-1-worker-0", out, &CancelToken::new()).unwrap();
        assert_eq!(end, StreamEnd::Finished);
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("container not found"));
    }

    #[test]
    fn file_name_format() {
        let at = Local.with_ymd_and_hms(2025, 3, 7, 9, 5, 1).unwrap();
        assert_eq!(log_file_name("nccl-3", "nccl-3-worker-0", &at), "nccl-3_nccl-3-worker-0_20250307_090501.log");
    }

    #[test]
    fn shutdown_cancels_following_sinks() {
        let dir = tempfile::tempdir().unwrap();
        let capture = LogCapture::start(
            Arc::new(FakeStreamer { follow: true }),
            dir.path(),
            "job-1",
            &pods(),
            CancelToken::new(),
        )
        .unwrap();
        assert_eq!(capture.files().len(), 2);
        assert!(!capture.all_finished());

        let reports = capture.shutdown();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.outcome == Ok(StreamEnd::Cancelled)));
        for r in &reports {
            let content = std::fs::read_to_string(&r.path).unwrap();
            assert!(content.contains(&r.pod));
        }
    }

    #[test]
    fn finished_streams_end_wait() {
        let dir = tempfile::tempdir().unwrap();
        let capture = LogCapture::start(
            Arc::new(FakeStreamer { follow: false }),
            &dir.path().join("logs"),
            "job-2",
            &pods(),
            CancelToken::new(),
        )
        .unwrap();
        capture.wait(Duration::from_millis(5));
        assert!(capture.all_finished());
        let reports = capture.shutdown();
        assert!(reports.iter().all(|r| r.outcome == Ok(StreamEnd::Finished)));
    }

    #[test]
    fn external_cancel_ends_wait() {
        let dir = tempfile::tempdir().unwrap();
        let token = CancelToken::new();
        let capture = LogCapture::start(
            Arc::new(FakeStreamer { follow: true }),
            dir.path(),
            "job-3",
            &pods(),
            token.clone(),
        )
        .unwrap();
        token.cancel();
        capture.wait(Duration::from_millis(5));
        assert!(capture.cancel_token().is_cancelled());
        drop(capture);
    }

    #[test]
    fn unwritable_directory_errors() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let result = LogCapture::start(
            Arc::new(FakeStreamer { follow: false }),
            &blocker.join("sub"),
            "job",
            &pods(),
            CancelToken::new(),
        );
        assert!(matches!(result, Err(LogError::CreateDir { .. })));
    }
}

//! Command runner abstraction for executing cluster CLIs.
//!
//! `CommandRunner` is the trait every cluster query goes through.
//! `ProcessRunner` is the production implementation: it spawns the program
//! directly (no shell), feeds optional stdin, and kills the child when the
//! per-call timeout elapses.
//! `MockRunner` is the test double that records calls and returns preset responses.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

const WAIT_STEP: Duration = Duration::from_millis(20);

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

/// A single external command invocation: program, argv, optional stdin and
/// an optional timeout overriding the runner default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
    pub timeout: Option<Duration>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Invocation {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The command line as one display string, e.g. `kubectl get pods -n x`.
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

// ---------------------------------------------------------------------------
// RunError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    /// The program could not be started at all (missing binary, permissions).
    Spawn { program: String, message: String },
    /// The program ran and exited non-zero.
    Failed {
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    /// The program did not exit before the timeout and was killed.
    TimedOut { command: String, secs: u64 },
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::Spawn { program, message } => {
                write!(f, "failed to execute {}: {}", program, message)
            }
            RunError::Failed {
                command,
                code,
                stderr,
                ..
            } => {
                let status = match code {
                    Some(c) => format!("exit {}", c),
                    None => "killed by signal".to_string(),
                };
                write!(f, "`{}` failed ({}): {}", command, status, stderr.trim())
            }
            RunError::TimedOut { command, secs } => {
                write!(f, "`{}` timed out after {}s", command, secs)
            }
        }
    }
}

impl std::error::Error for RunError {}

impl RunError {
    /// Standard error of a failed command, or the error description otherwise.
    pub fn stderr(&self) -> String {
        match self {
            RunError::Failed { stderr, .. } => stderr.trim().to_string(),
            other => other.to_string(),
        }
    }

    /// Standard output captured from a failed command, if any.
    pub fn stdout(&self) -> &str {
        match self {
            RunError::Failed { stdout, .. } => stdout,
            _ => "",
        }
    }

    /// True when the command ran and reported failure, as opposed to being
    /// unreachable or timing out.
    pub fn is_exit_failure(&self) -> bool {
        matches!(self, RunError::Failed { .. })
    }
}

// ---------------------------------------------------------------------------
// CommandRunner
// ---------------------------------------------------------------------------

/// Trait for executing external commands. Returns captured stdout on success.
pub trait CommandRunner: Send + Sync {
    fn run(&self, invocation: &Invocation) -> Result<String, RunError>;
}

/// Production runner that spawns the program and enforces a timeout.
pub struct ProcessRunner {
    default_timeout: Duration,
}

impl ProcessRunner {
    pub fn new(default_timeout: Duration) -> Self {
        ProcessRunner { default_timeout }
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        ProcessRunner::new(Duration::from_secs(30))
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&self, invocation: &Invocation) -> Result<String, RunError> {
        let command = invocation.command_line();
        let timeout = invocation.timeout.unwrap_or(self.default_timeout);
        debug!(%command, timeout_secs = timeout.as_secs(), "exec");

        let stdin = if invocation.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        };
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RunError::Spawn {
                program: invocation.program.clone(),
                message: e.to_string(),
            })?;

        if let (Some(input), Some(mut pipe)) = (&invocation.stdin, child.stdin.take()) {
            // A child that exits without reading stdin closes the pipe early;
            // its exit status is what matters.
            if let Err(e) = pipe.write_all(input.as_bytes()) {
                debug!(%command, error = %e, "stdin write failed");
            }
        }

        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    debug!(%command, "timed out, child killed");
                    return Err(RunError::TimedOut {
                        command,
                        secs: timeout.as_secs(),
                    });
                }
                Ok(None) => std::thread::sleep(WAIT_STEP),
                Err(e) => {
                    return Err(RunError::Spawn {
                        program: invocation.program.clone(),
                        message: e.to_string(),
                    })
                }
            }
        };

        let stdout = collect(stdout_reader);
        let stderr = collect(stderr_reader);
        trace!(%command, code = ?status.code(), bytes = stdout.len(), "exit");

        if status.success() {
            Ok(stdout)
        } else {
            Err(RunError::Failed {
                command,
                code: status.code(),
                stdout,
                stderr,
            })
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn collect(reader: Option<JoinHandle<String>>) -> String {
    reader.and_then(|h| h.join().ok()).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// MockRunner
// ---------------------------------------------------------------------------

/// Test-double runner that records invocations and returns pre-configured
/// responses.
///
/// Responses registered with [`MockRunner::on`] are keyed by the full
/// command line. A routed sequence is consumed front to back and its last
/// entry repeats forever, which suits polling loops. Commands with no route
/// fall back to the scripted queue from [`MockRunner::with_responses`]; when
/// that is empty too the command fails with exit code 1.
pub struct MockRunner {
    routes: Mutex<HashMap<String, VecDeque<Result<String, RunError>>>>,
    scripted: Mutex<VecDeque<Result<String, RunError>>>,
    invocations: Mutex<Vec<Invocation>>,
}

impl MockRunner {
    pub fn new() -> Self {
        MockRunner {
            routes: Mutex::new(HashMap::new()),
            scripted: Mutex::new(VecDeque::new()),
            invocations: Mutex::new(Vec::new()),
        }
    }

    pub fn with_responses(responses: Vec<Result<String, RunError>>) -> Self {
        let runner = MockRunner::new();
        *lock(&runner.scripted) = responses.into();
        runner
    }

    /// Route a single response to an exact command line.
    pub fn on(self, command_line: &str, response: Result<String, RunError>) -> Self {
        self.on_sequence(command_line, vec![response])
    }

    /// Route a sequence of responses to an exact command line.
    pub fn on_sequence(self, command_line: &str, responses: Vec<Result<String, RunError>>) -> Self {
        lock(&self.routes).insert(command_line.to_string(), responses.into());
        self
    }

    /// A failed-command response, as produced by a non-zero exit.
    pub fn failure(stderr: &str) -> Result<String, RunError> {
        Err(RunError::Failed {
            command: "mock".into(),
            code: Some(1),
            stdout: String::new(),
            stderr: stderr.to_string(),
        })
    }

    pub fn executed_commands(&self) -> Vec<String> {
        lock(&self.invocations)
            .iter()
            .map(Invocation::command_line)
            .collect()
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        lock(&self.invocations).clone()
    }

    /// How many times the given command line was run.
    pub fn count(&self, command_line: &str) -> usize {
        lock(&self.invocations)
            .iter()
            .filter(|i| i.command_line() == command_line)
            .count()
    }
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for MockRunner {
    fn run(&self, invocation: &Invocation) -> Result<String, RunError> {
        let command = invocation.command_line();
        lock(&self.invocations).push(invocation.clone());

        if let Some(queue) = lock(&self.routes).get_mut(&command) {
            let response = if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            };
            if let Some(response) = response {
                return response;
            }
        }
        if let Some(response) = lock(&self.scripted).pop_front() {
            return response;
        }
        Err(RunError::Failed {
            command: command.clone(),
            code: Some(1),
            stdout: String::new(),
            stderr: format!("mock: no response for `{}`", command),
        })
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

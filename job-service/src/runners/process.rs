// Process Runner
// Launches job commands, captures their output and terminates them on demand

use crate::config::EngineConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::runners::strategy::CommandLine;

use std::collections::BTreeMap;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Callback for handling output lines in real-time (line, is_stderr)
pub type OutputCallback = Arc<dyn Fn(&str, bool) + Send + Sync>;

/// How long to keep draining pipes after the process has gone
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Bytes read from a pipe at a time
const READ_CHUNK: usize = 8 * 1024;

/// Configuration for launching job processes
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Time between SIGTERM and SIGKILL
    pub kill_grace_period: Duration,
    /// Maximum bytes kept per output stream
    pub max_output_bytes: usize,
    /// Whether the child inherits the engine's environment
    pub inherit_env: bool,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for ProcessConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            kill_grace_period: config.kill_grace_period,
            max_output_bytes: config.max_output_bytes,
            inherit_env: config.inherit_env,
        }
    }
}

/// Output captured from one stream, bounded by `max_output_bytes`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub text: String,
    pub truncated: bool,
}

impl CapturedOutput {
    /// Add a line, keeping whatever prefix still fits under `limit`
    fn push_line(&mut self, line: &str, limit: usize) {
        if self.truncated {
            return;
        }
        let separator = if self.text.is_empty() { "" } else { "\n" };
        let used = self.text.len() + separator.len();
        if used + line.len() <= limit {
            self.text.push_str(separator);
            self.text.push_str(line);
            return;
        }

        self.truncated = true;
        let mut keep = limit.saturating_sub(used).min(line.len());
        while !line.is_char_boundary(keep) {
            keep -= 1;
        }
        if keep > 0 {
            self.text.push_str(separator);
            self.text.push_str(&line[..keep]);
        }
    }

    /// Append another capture, as when a job runs several commands
    pub fn append(&mut self, other: CapturedOutput, limit: usize) {
        if !other.text.is_empty() {
            self.push_line(&other.text, limit);
        }
        self.truncated |= other.truncated;
    }
}

/// Both output streams of a job, accumulated across its commands
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedStreams {
    pub stdout: CapturedOutput,
    pub stderr: CapturedOutput,
}

impl CapturedStreams {
    /// Append one process's output
    pub fn extend(&mut self, outcome: &ProcessOutcome, limit: usize) {
        self.stdout.append(outcome.stdout.clone(), limit);
        self.stderr.append(outcome.stderr.clone(), limit);
    }
}

/// Why a process stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// It exited on its own (or was killed by a signal we did not send)
    Exited,
    TimedOut,
    Cancelled,
}

/// Result of supervising one process to completion
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub reason: ExitReason,
    /// Exit code; None when terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: CapturedOutput,
    pub stderr: CapturedOutput,
}

impl ProcessOutcome {
    /// Exited on its own with status 0
    pub fn succeeded(&self) -> bool {
        self.reason == ExitReason::Exited && self.exit_code == Some(0)
    }
}

/// Launches job commands
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    config: ProcessConfig,
}

impl ProcessRunner {
    pub fn new(config: ProcessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// Start a command in its own process group with piped output
    pub fn spawn(
        &self,
        command: &CommandLine,
        env: &BTreeMap<String, String>,
        working_dir: &Path,
        on_output: Option<OutputCallback>,
    ) -> ServiceResult<RunningProcess> {
        check_program(&command.program)?;

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args);
        cmd.current_dir(working_dir);
        if !self.config.inherit_env {
            cmd.env_clear();
            if let Some(path) = std::env::var_os("PATH") {
                cmd.env("PATH", path);
            }
        }
        cmd.envs(env);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| ServiceError::ProcessLaunch {
            program: command.program.clone(),
            reason: e.to_string(),
        })?;

        let limit = self.config.max_output_bytes;
        let stdout = Arc::new(Mutex::new(CapturedOutput::default()));
        let stderr = Arc::new(Mutex::new(CapturedOutput::default()));
        let mut readers = Vec::new();
        if let Some(pipe) = child.stdout.take() {
            readers.push(capture(pipe, stdout.clone(), limit, false, on_output.clone()));
        }
        if let Some(pipe) = child.stderr.take() {
            readers.push(capture(pipe, stderr.clone(), limit, true, on_output));
        }

        tracing::debug!(pid = ?child.id(), command = %command, "Process started");

        Ok(RunningProcess {
            child,
            readers,
            stdout,
            stderr,
            grace: self.config.kill_grace_period,
        })
    }
}

/// A launched process awaiting supervision
pub struct RunningProcess {
    child: Child,
    readers: Vec<JoinHandle<()>>,
    stdout: Arc<Mutex<CapturedOutput>>,
    stderr: Arc<Mutex<CapturedOutput>>,
    grace: Duration,
}

impl RunningProcess {
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the process to exit, the deadline to pass, or cancellation.
    ///
    /// On timeout or cancellation the whole process group is sent SIGTERM,
    /// then SIGKILL once the grace period has elapsed.
    pub async fn wait(
        mut self,
        deadline: Option<Instant>,
        cancel: &mut watch::Receiver<bool>,
    ) -> ProcessOutcome {
        let pid = self.child.id();

        let (reason, status) = tokio::select! {
            status = self.child.wait() => (ExitReason::Exited, status.ok()),
            _ = deadline_elapsed(deadline) => (ExitReason::TimedOut, None),
            _ = cancellation(cancel) => (ExitReason::Cancelled, None),
        };

        let status = match reason {
            ExitReason::Exited => status,
            _ => terminate(&mut self.child, pid, self.grace).await,
        };

        for reader in self.readers {
            let abort = reader.abort_handle();
            if tokio::time::timeout(DRAIN_TIMEOUT, reader).await.is_err() {
                abort.abort();
            }
        }

        let stdout = self.stdout.lock().await.clone();
        let stderr = self.stderr.lock().await.clone();
        ProcessOutcome {
            reason,
            exit_code: status.and_then(|s| s.code()),
            stdout,
            stderr,
        }
    }
}

fn check_program(program: &str) -> ServiceResult<()> {
    if program.contains(std::path::MAIN_SEPARATOR) {
        if Path::new(program).is_file() {
            return Ok(());
        }
        return Err(ServiceError::ProcessLaunch {
            program: program.to_string(),
            reason: "no such file".to_string(),
        });
    }
    which::which(program)
        .map(|_| ())
        .map_err(|_| ServiceError::ProcessLaunch {
            program: program.to_string(),
            reason: "not found on PATH".to_string(),
        })
}

fn capture<R>(
    mut pipe: R,
    sink: Arc<Mutex<CapturedOutput>>,
    limit: usize,
    is_stderr: bool,
    on_output: Option<OutputCallback>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        // One byte past the limit is enough to detect truncation
        let line_cap = limit.saturating_add(1);
        let mut chunk = vec![0u8; READ_CHUNK];
        let mut line = Vec::new();
        let mut clipped = false;

        loop {
            let read = match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(read) => read,
            };
            for piece in chunk[..read].split_inclusive(|b| *b == b'\n') {
                let room = line_cap.saturating_sub(line.len());
                if piece.len() > room {
                    clipped = true;
                }
                line.extend_from_slice(&piece[..piece.len().min(room)]);
                if piece.ends_with(b"\n") {
                    emit_line(&line, clipped, &sink, limit, is_stderr, &on_output).await;
                    line.clear();
                    clipped = false;
                }
            }
        }
        if !line.is_empty() || clipped {
            emit_line(&line, clipped, &sink, limit, is_stderr, &on_output).await;
        }
    })
}

async fn emit_line(
    raw: &[u8],
    clipped: bool,
    sink: &Mutex<CapturedOutput>,
    limit: usize,
    is_stderr: bool,
    on_output: &Option<OutputCallback>,
) {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches(['\n', '\r']);
    if let Some(callback) = on_output {
        callback(line, is_stderr);
    }
    let mut captured = sink.lock().await;
    captured.push_line(line, limit);
    captured.truncated |= clipped;
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Completes once cancellation is requested; never if it cannot be
pub(crate) async fn cancellation(cancel: &mut watch::Receiver<bool>) {
    let observed = cancel.wait_for(|requested| *requested).await.map(|_| ());
    if observed.is_err() {
        // Sender gone: nobody can cancel any more
        std::future::pending::<()>().await;
    }
}

async fn terminate(child: &mut Child, pid: Option<u32>, grace: Duration) -> Option<ExitStatus> {
    if let Some(pid) = pid {
        signal_group(pid, Signal::Term);
    }
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status.ok(),
        Err(_) => {
            if let Some(pid) = pid {
                signal_group(pid, Signal::Kill);
            }
            let _ = child.start_kill();
            child.wait().await.ok()
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: Signal) {
    let signo = match signal {
        Signal::Term => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    let pid = pid as libc::pid_t;
    // The child leads its own group; fall back to the pid if the group is gone
    let rc = unsafe { libc::kill(-pid, signo) };
    if rc != 0 {
        unsafe {
            libc::kill(pid, signo);
        }
    }
    tracing::debug!(pid, ?signal, "Signal sent to process group");
}

#[cfg(not(unix))]
fn signal_group(_pid: u32, _signal: Signal) {}

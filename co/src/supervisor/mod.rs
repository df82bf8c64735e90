//! ProcessSupervisor - owns at most one external tool process
//!
//! Each run gets an exit-monitor task that awaits the child and reports its
//! exit code through a one-shot [`ExitSignal`] plus an optional registered
//! callback. Liveness is always a live query: no recorded exit and the OS
//! still knows the pid.

mod output;
mod process;
mod tool;

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use output::OutputBuffer;
pub use process::{exit_code, force_kill, is_process_running, terminate};
pub use tool::{ToolCommand, ToolStatus, tool_check};

/// Time allowed for a forced kill to take effect
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Time the exit monitor waits for output readers to drain after exit
const READER_DRAIN: Duration = Duration::from_millis(500);

/// Poll interval while waiting on a process we hold no handle for
const EXTERNAL_POLL: Duration = Duration::from_millis(100);

#[cfg(windows)]
const CREATE_NEW_CONSOLE: u32 = 0x0000_0010;

/// Errors from starting a process
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("A process is already running with PID {0}")]
    AlreadyRunning(u32),

    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),

    #[error("Working directory does not exist: {}", .0.display())]
    WorkdirMissing(PathBuf),

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Supervisor settings
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Capture stdout/stderr into the output buffer; otherwise the tool
    /// inherits the console so an operator can watch it directly
    pub capture_output: bool,
    pub output_buffer_lines: usize,
    /// Grace period used by `reset`
    pub stop_grace: Duration,
    /// The tool outlives this process: stdio goes to null and the tool gets
    /// its own process group
    pub detached: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            capture_output: true,
            output_buffer_lines: 1000,
            stop_grace: Duration::from_secs(10),
            detached: false,
        }
    }
}

/// Callback invoked once with the exit code
pub type ExitCallback = Box<dyn FnOnce(i32) + Send + 'static>;

/// One-shot completion signal for a single run
#[derive(Debug)]
pub struct ExitSignal(oneshot::Receiver<i32>);

impl ExitSignal {
    /// Wait for the exit code; None if the supervisor dropped the run
    pub async fn wait(self) -> Option<i32> {
        self.0.await.ok()
    }
}

/// Returned by a successful `start`
#[derive(Debug)]
pub struct RunStarted {
    pub pid: u32,
    pub started: DateTime<Utc>,
    pub exit: ExitSignal,
}

#[derive(Debug)]
struct ProcessHandle {
    run: u64,
    pid: u32,
    started_at: Instant,
    done_rx: watch::Receiver<Option<i32>>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl ProcessHandle {
    fn is_live(&self) -> bool {
        self.done_rx.borrow().is_none() && is_process_running(self.pid)
    }
}

#[derive(Debug, Default)]
struct Inner {
    next_run: u64,
    handle: Option<ProcessHandle>,
    last_exit: Option<i32>,
}

/// Supervisor for a single external process
pub struct ProcessSupervisor {
    config: SupervisorConfig,
    inner: Arc<Mutex<Inner>>,
    callback: Arc<Mutex<Option<ExitCallback>>>,
    output: Arc<OutputBuffer>,
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("config", &self.config)
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new(SupervisorConfig::default())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl ProcessSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        debug!(?config, "ProcessSupervisor::new: called");
        let output = Arc::new(OutputBuffer::new(config.output_buffer_lines));
        Self {
            config,
            inner: Arc::new(Mutex::new(Inner::default())),
            callback: Arc::new(Mutex::new(None)),
            output,
        }
    }

    /// Start `command` in `workdir`
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, command: &ToolCommand, workdir: &Path) -> Result<RunStarted, SupervisorError> {
        debug!(%command, ?workdir, "ProcessSupervisor::start: called");
        let mut inner = lock(&self.inner);

        if let Some(handle) = &inner.handle
            && handle.is_live()
        {
            debug!(pid = handle.pid, "ProcessSupervisor::start: already running");
            return Err(SupervisorError::AlreadyRunning(handle.pid));
        }
        if !workdir.is_dir() {
            return Err(SupervisorError::WorkdirMissing(workdir.to_path_buf()));
        }

        self.output.clear();

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args).current_dir(workdir).stdin(Stdio::null());
        if self.config.detached {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
            #[cfg(unix)]
            cmd.process_group(0);
        } else if self.config.capture_output {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            #[cfg(windows)]
            cmd.creation_flags(CREATE_NEW_CONSOLE);
        }

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => SupervisorError::ExecutableNotFound(command.program.clone()),
            _ => SupervisorError::Spawn {
                program: command.program.clone(),
                source: e,
            },
        })?;
        let pid = child.id().ok_or_else(|| SupervisorError::Spawn {
            program: command.program.clone(),
            source: io::Error::other("process exited before its pid was read"),
        })?;

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, self.output.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, self.output.clone()));
        }

        let run = inner.next_run;
        inner.next_run += 1;

        let (done_tx, done_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = oneshot::channel();

        tokio::spawn(monitor_exit(MonitorContext {
            run,
            pid,
            child,
            readers,
            kill_rx,
            done_tx,
            exit_tx,
            inner: self.inner.clone(),
            callback: self.callback.clone(),
        }));

        inner.handle = Some(ProcessHandle {
            run,
            pid,
            started_at: Instant::now(),
            done_rx,
            kill_tx: Some(kill_tx),
        });
        inner.last_exit = None;

        let started = Utc::now();
        info!(pid, %command, capture = self.config.capture_output, detached = self.config.detached, "Process started");
        Ok(RunStarted {
            pid,
            started,
            exit: ExitSignal(exit_rx),
        })
    }

    /// Register the exit callback; replaces any earlier registration
    pub fn on_exit(&self, callback: impl FnOnce(i32) + Send + 'static) {
        debug!("ProcessSupervisor::on_exit: called");
        *lock(&self.callback) = Some(Box::new(callback));
    }

    /// Whether the supervised process is alive right now
    pub fn is_running(&self) -> bool {
        let result = lock(&self.inner).handle.as_ref().is_some_and(ProcessHandle::is_live);
        debug!(result, "ProcessSupervisor::is_running: returning");
        result
    }

    /// PID of the live process
    pub fn get_pid(&self) -> Option<u32> {
        lock(&self.inner)
            .handle
            .as_ref()
            .filter(|h| h.is_live())
            .map(|h| h.pid)
    }

    /// Time since the current process was started
    pub fn runtime(&self) -> Option<Duration> {
        lock(&self.inner).handle.as_ref().map(|h| h.started_at.elapsed())
    }

    /// Exit code of the most recent run, once it has exited
    pub fn last_exit_code(&self) -> Option<i32> {
        lock(&self.inner).last_exit
    }

    /// Drain up to `max_lines` captured lines without blocking
    pub fn get_recent_output(&self, max_lines: usize) -> Vec<String> {
        self.output.drain(max_lines)
    }

    /// Stop the process: graceful request, then forced kill after `timeout`
    ///
    /// Returns true when nothing was running or the graceful path worked.
    pub async fn stop(&self, timeout: Duration) -> bool {
        debug!(?timeout, "ProcessSupervisor::stop: called");
        let (run, pid, mut done_rx) = {
            let inner = lock(&self.inner);
            match &inner.handle {
                Some(handle) if handle.done_rx.borrow().is_none() => (handle.run, handle.pid, handle.done_rx.clone()),
                _ => {
                    debug!("ProcessSupervisor::stop: nothing running");
                    return true;
                }
            }
        };

        info!(pid, "Stopping process");
        let graceful = terminate(pid)
            && tokio::time::timeout(timeout, done_rx.wait_for(Option::is_some))
                .await
                .is_ok();

        if !graceful {
            warn!(pid, "Process did not stop gracefully, killing");
            let kill_tx = lock(&self.inner)
                .handle
                .as_mut()
                .filter(|h| h.run == run)
                .and_then(|h| h.kill_tx.take());
            if let Some(kill_tx) = kill_tx {
                let _ = kill_tx.send(());
            }
            if tokio::time::timeout(KILL_WAIT, done_rx.wait_for(Option::is_some))
                .await
                .is_err()
            {
                warn!(pid, "Process still not reaped after kill");
            }
        }

        let mut inner = lock(&self.inner);
        if inner.handle.as_ref().is_some_and(|h| h.run == run) {
            inner.handle = None;
        }
        info!(pid, graceful, "Process stopped");
        graceful
    }

    /// Stop any process and clear handle, callback and captured output
    pub async fn reset(&self) {
        debug!("ProcessSupervisor::reset: called");
        *lock(&self.callback) = None;
        self.stop(self.config.stop_grace).await;
        {
            let mut inner = lock(&self.inner);
            inner.handle = None;
            inner.last_exit = None;
        }
        self.output.clear();
        info!("Supervisor reset");
    }
}

/// Stop a process this supervisor holds no handle for, such as a tool left
/// running by a detached invocation
///
/// Same escalation as `stop`: SIGTERM, wait up to `timeout`, then SIGKILL.
/// Returns true when the graceful path worked.
pub async fn stop_external(pid: u32, timeout: Duration) -> bool {
    debug!(pid, ?timeout, "stop_external: called");
    if !is_process_running(pid) {
        return true;
    }

    info!(pid, "Stopping external process");
    if terminate(pid) && wait_gone(pid, timeout).await {
        info!(pid, "External process stopped");
        return true;
    }

    warn!(pid, "External process did not stop gracefully, killing");
    force_kill(pid);
    if !wait_gone(pid, KILL_WAIT).await {
        warn!(pid, "External process still alive after kill");
    }
    false
}

async fn wait_gone(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while is_process_running(pid) {
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(EXTERNAL_POLL).await;
    }
    true
}

fn spawn_reader<R>(stream: R, output: Arc<OutputBuffer>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => output.push(line.trim_end()),
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "spawn_reader: read failed");
                    break;
                }
            }
        }
    })
}

struct MonitorContext {
    run: u64,
    pid: u32,
    child: Child,
    readers: Vec<JoinHandle<()>>,
    kill_rx: oneshot::Receiver<()>,
    done_tx: watch::Sender<Option<i32>>,
    exit_tx: oneshot::Sender<i32>,
    inner: Arc<Mutex<Inner>>,
    callback: Arc<Mutex<Option<ExitCallback>>>,
}

async fn monitor_exit(ctx: MonitorContext) {
    let MonitorContext {
        run,
        pid,
        mut child,
        readers,
        mut kill_rx,
        done_tx,
        exit_tx,
        inner,
        callback,
    } = ctx;
    debug!(pid, run, "monitor_exit: started");

    let status = tokio::select! {
        status = child.wait() => status,
        Ok(()) = &mut kill_rx => {
            debug!(pid, "monitor_exit: kill requested");
            if let Err(e) = child.start_kill() {
                warn!(pid, error = %e, "Failed to kill process");
            }
            child.wait().await
        }
    };

    let code = match status {
        Ok(status) => exit_code(status),
        Err(e) => {
            warn!(pid, error = %e, "Failed to wait for process");
            -1
        }
    };

    let deadline = tokio::time::Instant::now() + READER_DRAIN;
    for reader in readers {
        let _ = tokio::time::timeout_at(deadline, reader).await;
    }

    lock(&inner).last_exit = Some(code);
    let _ = done_tx.send(Some(code));
    let _ = exit_tx.send(code);
    info!(pid, code, "Process exited");

    let callback = lock(&callback).take();
    if let Some(callback) = callback {
        debug!(pid, "monitor_exit: invoking exit callback");
        callback(code);
    }

    let mut inner = lock(&inner);
    if inner.handle.as_ref().is_some_and(|h| h.run == run) {
        inner.handle = None;
    }
    debug!(pid, run, "monitor_exit: done");
}

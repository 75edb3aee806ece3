//! External process supervision
//!
//! Spawns long-running helper processes (emulator, capture proxy, exploration
//! agent), watches their output for readiness markers and tears them down with
//! SIGTERM, escalating to SIGKILL after a fixed grace period.

use crate::{Error, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::ffi::OsStr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// How long a process gets to exit after SIGTERM before it is killed.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Lines of stdout kept around for observers that attach late.
const BACKLOG_LINES: usize = 1024;

#[derive(Debug, Clone)]
enum OutputEvent {
    Line(String),
    Eof,
}

/// Stdout of a supervised process, shared between the reader task and observers.
struct OutputLog {
    backlog: Mutex<VecDeque<String>>,
    closed: Mutex<bool>,
    events: broadcast::Sender<OutputEvent>,
}

impl OutputLog {
    fn new() -> Self {
        let (events, _) = broadcast::channel(BACKLOG_LINES);
        Self {
            backlog: Mutex::new(VecDeque::with_capacity(64)),
            closed: Mutex::new(false),
            events,
        }
    }

    fn push(&self, line: String) {
        {
            let mut backlog = self.backlog.lock();
            if backlog.len() == BACKLOG_LINES {
                backlog.pop_front();
            }
            backlog.push_back(line.clone());
        }
        // No receivers is fine.
        let _ = self.events.send(OutputEvent::Line(line));
    }

    fn close(&self) {
        *self.closed.lock() = true;
        let _ = self.events.send(OutputEvent::Eof);
    }

    fn backlog_contains(&self, marker: &str) -> bool {
        self.backlog.lock().iter().any(|l| l.contains(marker))
    }

    fn is_closed(&self) -> bool {
        *self.closed.lock()
    }
}

/// Exclusive ownership of one spawned process.
///
/// Dropping the handle kills the process.
pub struct ProcessHandle {
    name: String,
    pid: Option<u32>,
    child: Child,
    stdout: Arc<OutputLog>,
    readers: Vec<JoinHandle<()>>,
}

impl ProcessHandle {
    /// Whether the process is still alive.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("name", &self.name)
            .field("pid", &self.pid)
            .finish()
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
    }
}

/// Starts, observes and stops external processes.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    grace: Duration,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self {
            grace: STOP_GRACE_PERIOD,
        }
    }
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `program` without waiting for it.
    pub fn start<I, S>(&self, name: &str, program: &str, args: I) -> Result<ProcessHandle>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::SpawnFailed {
                program: program.to_string(),
                reason: e.to_string(),
            })?;

        let pid = child.id();
        info!("Started {} ({}) with PID {:?}", name, program, pid);

        let stdout = Arc::new(OutputLog::new());
        let mut readers = Vec::with_capacity(2);

        if let Some(out) = child.stdout.take() {
            let log = stdout.clone();
            let label = name.to_string();
            readers.push(tokio::spawn(async move {
                forward_lines(out, &label, |line| log.push(line)).await;
                log.close();
            }));
        } else {
            stdout.close();
        }

        if let Some(err) = child.stderr.take() {
            let label = name.to_string();
            readers.push(tokio::spawn(async move {
                forward_lines(err, &label, |_| {}).await;
            }));
        }

        Ok(ProcessHandle {
            name: name.to_string(),
            pid,
            child,
            stdout,
            readers,
        })
    }

    /// Wait until a stdout line containing `marker` shows up.
    ///
    /// Returns `Ok(false)` if stdout closes first and [`Error::Timeout`] if
    /// nothing arrives within `limit`. The observer is detached on return.
    pub async fn await_ready(
        &self,
        handle: &ProcessHandle,
        marker: &str,
        limit: Duration,
    ) -> Result<bool> {
        let log = handle.stdout.clone();
        // Subscribe before looking at the backlog so no line slips between the two.
        let mut events = log.events.subscribe();

        let watch = async move {
            if log.backlog_contains(marker) {
                return true;
            }
            if log.is_closed() {
                return false;
            }
            loop {
                match events.recv().await {
                    Ok(OutputEvent::Line(line)) if line.contains(marker) => return true,
                    Ok(OutputEvent::Line(_)) => {}
                    Ok(OutputEvent::Eof) | Err(broadcast::error::RecvError::Closed) => {
                        return log.backlog_contains(marker);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        trace!("Readiness observer lagged by {} lines", skipped);
                        if log.backlog_contains(marker) {
                            return true;
                        }
                    }
                }
            }
        };

        match tokio::time::timeout(limit, watch).await {
            Ok(found) => {
                if found {
                    debug!("{} is ready ('{}')", handle.name, marker);
                }
                Ok(found)
            }
            Err(_) => Err(Error::timeout(
                format!("waiting for {} to print '{}'", handle.name, marker),
                limit,
            )),
        }
    }

    /// Terminate the process: SIGTERM, then SIGKILL after the grace period.
    ///
    /// Never fails; a process that already exited is left alone.
    pub async fn stop(&self, handle: &mut ProcessHandle) {
        terminate(handle, self.grace).await;
    }

    /// [`stop`](Self::stop) for an optional handle, releasing it.
    pub async fn stop_opt(&self, handle: &mut Option<ProcessHandle>) {
        if let Some(mut h) = handle.take() {
            self.stop(&mut h).await;
        }
    }

    /// Stop and release every handle in `handles`.
    pub async fn stop_all(&self, handles: &mut Vec<ProcessHandle>) {
        for mut h in handles.drain(..) {
            self.stop(&mut h).await;
        }
    }
}

async fn forward_lines<R, F>(stream: R, label: &str, mut sink: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(String),
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                trace!(target: "privprobe::child", "[{}] {}", label, line);
                sink(line);
            }
            Ok(None) => break,
            Err(e) => {
                debug!("Stopped reading output of {}: {}", label, e);
                break;
            }
        }
    }
}

async fn terminate(handle: &mut ProcessHandle, grace: Duration) {
    match handle.child.try_wait() {
        Ok(Some(status)) => {
            debug!("{} already exited ({})", handle.name, status);
            return;
        }
        Ok(None) => {}
        Err(e) => {
            warn!("Could not query {} state: {}", handle.name, e);
        }
    }

    info!("Stopping {} (pid: {:?})", handle.name, handle.pid);

    if let Some(pid) = handle.pid {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!("SIGTERM to {} failed: {}", handle.name, e);
        }
    }

    match tokio::time::timeout(grace, handle.child.wait()).await {
        Ok(Ok(status)) => {
            debug!("{} exited with {}", handle.name, status);
        }
        Ok(Err(e)) => {
            warn!("Waiting for {} failed: {}", handle.name, e);
        }
        Err(_) => {
            info!("Force killing {} after {:?}", handle.name, grace);
            if let Err(e) = handle.child.kill().await {
                warn!("Failed to kill {}: {}", handle.name, e);
            }
        }
    }
}

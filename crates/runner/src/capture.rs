//! Capture proxy lifecycle
//!
//! At most one proxy process is alive at a time: starting a new session always
//! stops the previous one first.

use crate::bridge::CommandRunner;
use crate::config::CaptureConfig;
use privprobe_common::{Error, ProcessHandle, ProcessSupervisor, Result};
use std::sync::Arc;
use tracing::info;

/// Owner of the capture proxy process
pub struct CaptureProxy {
    config: CaptureConfig,
    runner: Arc<dyn CommandRunner>,
    supervisor: ProcessSupervisor,
    current: Option<ProcessHandle>,
    run_id: Option<i64>,
}

impl CaptureProxy {
    pub fn new(config: CaptureConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config,
            runner,
            supervisor: ProcessSupervisor::new(),
            current: None,
            run_id: None,
        }
    }

    /// Start a proxy session bound to `run_id` and wait for it to accept
    /// connections. Any previous session is stopped first.
    pub async fn start(&mut self, run_id: i64) -> Result<()> {
        if self.current.is_some() {
            info!("Stopping existing capture proxy");
            self.stop().await;
        }

        info!("Starting capture proxy for run {}", run_id);
        let addon = self.config.addon_path.to_string_lossy().to_string();
        let session = format!("run={}", run_id);
        let handle = self.runner.spawn(
            "mitmdump",
            &self.config.mitmdump_path,
            &["-s", &addon, "--set", &session],
        )?;

        // Tracked before waiting so a failed start is still torn down.
        let handle = self.current.insert(handle);
        self.run_id = Some(run_id);

        let ready = self
            .supervisor
            .await_ready(handle, &self.config.ready_marker, self.config.ready_timeout())
            .await?;

        if !ready {
            return Err(Error::Capture(format!(
                "proxy exited before printing '{}'",
                self.config.ready_marker
            )));
        }
        Ok(())
    }

    /// Stop the current session, if any.
    pub async fn stop(&mut self) {
        self.supervisor.stop_opt(&mut self.current).await;
        self.run_id = None;
    }

    /// Run the live session belongs to.
    pub fn current_run(&self) -> Option<i64> {
        self.run_id
    }

    pub fn is_running(&mut self) -> bool {
        self.current.as_mut().map_or(false, ProcessHandle::is_running)
    }
}

impl std::fmt::Debug for CaptureProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureProxy")
            .field("current", &self.current)
            .field("run_id", &self.run_id)
            .finish()
    }
}

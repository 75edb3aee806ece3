//! Host command execution
//!
//! All device-bridge, packaging and instrumentation tools are invoked through
//! [`CommandRunner`] so the device implementations can be driven by a scripted
//! runner in tests.

use async_trait::async_trait;
use privprobe_common::{Error, ProcessHandle, ProcessSupervisor, Result};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn a non-zero exit into [`Error::CommandFailed`].
    pub fn check(self, program: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(Error::CommandFailed {
                program: program.to_string(),
                code: self.code,
                stdout: self.stdout,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Runs host commands to completion or spawns long-lived ones.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` to completion. A non-zero exit is not an error here.
    async fn output(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;

    /// Start `program` without waiting for it.
    fn spawn(&self, name: &str, program: &str, args: &[&str]) -> Result<ProcessHandle>;

    /// Run `program` and fail on a non-zero exit.
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        self.output(program, args).await?.check(program)
    }
}

/// [`CommandRunner`] executing on the host
#[derive(Debug, Clone, Default)]
pub struct HostCommandRunner {
    supervisor: ProcessSupervisor,
}

impl HostCommandRunner {
    pub fn new(supervisor: ProcessSupervisor) -> Self {
        Self { supervisor }
    }
}

#[async_trait]
impl CommandRunner for HostCommandRunner {
    async fn output(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        debug!("Running: {} {}", program, args.join(" "));

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::SpawnFailed {
                program: program.to_string(),
                reason: e.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    fn spawn(&self, name: &str, program: &str, args: &[&str]) -> Result<ProcessHandle> {
        debug!("Spawning: {} {}", program, args.join(" "));
        self.supervisor.start(name, program, args)
    }
}

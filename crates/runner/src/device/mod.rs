//! Device control
//!
//! [`DeviceControl`] is the capability set the orchestrator drives a test
//! device through. Each platform provides one implementation; the orchestrator
//! only ever sees the trait.

pub mod android;
pub mod instrumentation;

use async_trait::async_trait;
use privprobe_common::Result;
use std::path::Path;
use tracing::info;

pub use android::AndroidDevice;
pub use instrumentation::{FridaCli, InstrumentationChannel};

/// Step run after the app is installed and configured but before its first
/// launch. Used to bring up traffic capture so no early request is missed.
#[async_trait]
pub trait PreLaunchHook: Send {
    async fn before_launch(&mut self, app_id: &str) -> Result<()>;
}

/// Capabilities of a controllable test device.
#[async_trait]
pub trait DeviceControl: Send {
    /// Start (or restart) the device and wait until it and its
    /// instrumentation daemon are reachable.
    async fn ensure_device(&mut self) -> Result<()>;

    /// Restore the clean snapshot and re-check the instrumentation daemon.
    async fn reset_device(&mut self) -> Result<()>;

    /// Dismiss unexpected dialogs.
    async fn clear_stuck_modals(&mut self) -> Result<()>;

    async fn install_app(&mut self, path: &Path) -> Result<()>;

    /// Uninstall; succeeds when the app wasn't installed.
    async fn uninstall_app(&mut self, app_id: &str) -> Result<()>;

    /// Grant every dangerous permission the app declares.
    async fn set_app_permissions(&mut self, app_id: &str) -> Result<()>;

    /// Launch the app through the exploration agent. Returns once the agent
    /// is spawned; the agent keeps running alongside the app.
    async fn start_app(&mut self, app_id: &str) -> Result<()>;

    /// Stop exploration agents left over from a previous app.
    async fn stop_agents(&mut self);

    async fn get_foreground_app_id(&mut self) -> Result<Option<String>>;

    async fn get_pid_for_app_id(&mut self, app_id: &str) -> Result<Option<u32>>;

    async fn set_clipboard(&mut self, text: &str) -> Result<()>;

    async fn set_geolocation(&mut self, longitude: f64, latitude: f64, altitude: f64)
        -> Result<()>;

    /// Version declared by the app package, if it can be recovered.
    async fn get_app_version(&mut self, path: &Path) -> Result<Option<String>>;

    /// Clipboard value planted before every launch.
    fn clipboard_fixture(&self) -> &str;

    /// Release every process this device owns.
    async fn release(&mut self);

    /// Uninstall, install, grant permissions, dismiss dialogs, plant the
    /// clipboard fixture, run `hook`, then launch.
    async fn reset_app(
        &mut self,
        app_id: &str,
        path: &Path,
        hook: Option<&mut dyn PreLaunchHook>,
    ) -> Result<()> {
        self.stop_agents().await;

        info!("Resetting and installing {}", app_id);
        self.uninstall_app(app_id).await?;
        self.install_app(path).await?;
        self.set_app_permissions(app_id).await?;
        self.clear_stuck_modals().await?;
        let clipboard = self.clipboard_fixture().to_string();
        self.set_clipboard(&clipboard).await?;

        if let Some(hook) = hook {
            hook.before_launch(app_id).await?;
        }

        info!("Starting {}", app_id);
        self.start_app(app_id).await
    }
}

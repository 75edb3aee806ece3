//! Runner configuration

use privprobe_common::{timing::PollPolicy, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Directory containing one `<app id>.apk` per candidate
    pub apps_dir: PathBuf,

    /// Directory for the run ledger and failure records
    pub data_dir: PathBuf,

    /// Android emulator configuration
    pub android: AndroidConfig,

    /// Capture proxy configuration
    pub capture: CaptureConfig,

    /// Timeouts and polling
    pub timing: TimingConfig,

    /// Values injected into the device before each app
    pub fixtures: FixtureConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            apps_dir: PathBuf::from("apps"),
            data_dir: PathBuf::from("data"),
            android: AndroidConfig::default(),
            capture: CaptureConfig::default(),
            timing: TimingConfig::default(),
            fixtures: FixtureConfig::default(),
        }
    }
}

/// Android-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AndroidConfig {
    /// Name of the emulator AVD
    pub avd_name: String,

    /// Snapshot the emulator is reset to before each app
    /// (create with `adb emu avd snapshot save <name>`)
    pub avd_snapshot_name: String,

    pub adb_path: String,
    pub emulator_path: String,
    pub aapt_path: String,
    pub frida_ps_path: String,
    pub frida_path: String,
    pub objection_path: String,

    /// Location of the frida-server binary on the device
    pub frida_server_path: String,

    /// Launcher package, used as the host process for clipboard injection
    pub launcher_package: String,

    /// HTTP proxy the emulator routes traffic through
    pub http_proxy: String,

    pub phone_number: String,
}

impl Default for AndroidConfig {
    fn default() -> Self {
        Self {
            avd_name: String::new(),
            avd_snapshot_name: String::new(),
            adb_path: "adb".to_string(),
            emulator_path: "emulator".to_string(),
            aapt_path: "aapt".to_string(),
            frida_ps_path: "venv/bin/frida-ps".to_string(),
            frida_path: "venv/bin/frida".to_string(),
            objection_path: "venv/bin/objection".to_string(),
            frida_server_path: "/data/local/tmp/frida-server".to_string(),
            launcher_package: "com.google.android.apps.nexuslauncher".to_string(),
            http_proxy: "127.0.0.1:8080".to_string(),
            phone_number: "4915585834346".to_string(),
        }
    }
}

/// Capture proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub mitmdump_path: String,

    /// Add-on script that stores flows for the run given via `--set run=<id>`
    pub addon_path: PathBuf,

    /// Output line that signals the proxy accepts connections
    pub ready_marker: String,

    pub ready_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            mitmdump_path: "venv/bin/mitmdump".to_string(),
            addon_path: PathBuf::from("mitm-addon.py"),
            ready_marker: "Proxy server listening".to_string(),
            ready_timeout_ms: 150_000,
        }
    }
}

impl CaptureConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

/// Timeouts and polling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// How long each app is observed in the foreground
    pub app_timeout_ms: u64,

    /// Limit for each device reset / restart step
    pub reset_timeout_ms: u64,

    /// Limit for a single device query such as the foreground check
    pub query_timeout_ms: u64,

    /// Attempt cap for device polling loops
    pub poll_attempts: u32,

    pub poll_interval_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            app_timeout_ms: 60_000,
            reset_timeout_ms: 20_000,
            query_timeout_ms: 20_000,
            poll_attempts: 100,
            poll_interval_ms: 250,
        }
    }
}

impl TimingConfig {
    pub fn app_timeout(&self) -> Duration {
        Duration::from_millis(self.app_timeout_ms)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(self.poll_attempts, Duration::from_millis(self.poll_interval_ms))
    }
}

/// Fixture values
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureConfig {
    pub clipboard: String,
    pub geolocation: GeoFixture,

    /// Domains used to check that tracker traffic isn't blocked by DNS
    pub tracker_domains: Vec<String>,
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            clipboard: "LDDsvPqQdT".to_string(),
            geolocation: GeoFixture::default(),
            tracker_domains: vec![
                "doubleclick.net".to_string(),
                "graph.facebook.com".to_string(),
                "branch.io".to_string(),
                "app-measurement.com".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoFixture {
    pub longitude: f64,
    pub latitude: f64,
    pub altitude: f64,
}

impl Default for GeoFixture {
    fn default() -> Self {
        Self {
            longitude: 52.23528,
            latitude: 10.56437,
            altitude: 77.23,
        }
    }
}

impl RunnerConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)
                .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Check the settings needed to drive a device.
    pub fn validate(&self) -> Result<()> {
        if self.android.avd_name.is_empty() {
            return Err(Error::InvalidConfig("android.avd_name is required".to_string()));
        }
        if self.android.avd_snapshot_name.is_empty() {
            return Err(Error::InvalidConfig(
                "android.avd_snapshot_name is required".to_string(),
            ));
        }
        if self.timing.app_timeout_ms == 0
            || self.timing.reset_timeout_ms == 0
            || self.timing.query_timeout_ms == 0
            || self.capture.ready_timeout_ms == 0
        {
            return Err(Error::InvalidConfig("timeouts must be non-zero".to_string()));
        }
        if self.timing.poll_attempts == 0 {
            return Err(Error::InvalidConfig("timing.poll_attempts must be non-zero".to_string()));
        }
        if self.fixtures.tracker_domains.is_empty() {
            return Err(Error::InvalidConfig(
                "fixtures.tracker_domains must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the ledger database path
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("ledger.db")
    }

    /// Get the failure record directory
    pub fn failures_dir(&self) -> PathBuf {
        self.data_dir.join("failed-apps")
    }
}

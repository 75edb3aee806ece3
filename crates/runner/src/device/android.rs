//! Android emulator control
//!
//! Drives an AVD through `adb`, `emulator`, `aapt`, frida and objection.

use super::instrumentation::{set_clipboard_script, FridaCli, InstrumentationChannel};
use super::DeviceControl;
use crate::bridge::CommandRunner;
use crate::config::AndroidConfig;
use async_trait::async_trait;
use privprobe_common::{
    timing::{poll_until, PollPolicy},
    Error, ProcessHandle, ProcessSupervisor, Result,
};
use regex::Regex;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// Output of `pm uninstall` for packages that aren't installed.
const NOT_INSTALLED: &str = "not installed for 0";

/// Prefix of dangerous permission lines in `pm list permissions -g -d -u`.
const PERMISSION_PREFIX: &str = "  permission:";

const KEYCODE_HOME: &str = "3";
const KEYCODE_BACK: &str = "4";

fn recent_task_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"A=\d+:(.+?) U=").ok()).as_ref()
}

fn version_name_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"versionName='(.+?)'").ok()).as_ref()
}

/// Top-most app id from `dumpsys activity recents` output.
pub fn parse_foreground_app(dumpsys: &str) -> Option<String> {
    let line = dumpsys.lines().find(|l| l.contains("Recent #0"))?;
    recent_task_regex()?
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|id| !id.is_empty())
}

/// Dangerous permission names from `pm list permissions -g -d -u` output.
pub fn parse_dangerous_permissions(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter_map(|l| l.strip_prefix(PERMISSION_PREFIX))
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// `versionName` from `aapt dump badging` output.
pub fn parse_version_name(badging: &str) -> Option<String> {
    version_name_regex()?
        .captures(badging)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// [`DeviceControl`] for an Android emulator
pub struct AndroidDevice {
    config: AndroidConfig,
    poll: PollPolicy,
    clipboard: String,
    runner: Arc<dyn CommandRunner>,
    instrumentation: Box<dyn InstrumentationChannel>,
    supervisor: ProcessSupervisor,
    /// Emulator started by [`ensure_device`](DeviceControl::ensure_device)
    emulator: Option<ProcessHandle>,
    /// Exploration agents started for the current app
    agents: Vec<ProcessHandle>,
}

impl AndroidDevice {
    /// Create a device driven through `runner`.
    pub fn new(
        config: AndroidConfig,
        poll: PollPolicy,
        clipboard: impl Into<String>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let instrumentation = Box::new(FridaCli::new(config.frida_path.clone(), runner.clone()));
        Self {
            config,
            poll,
            clipboard: clipboard.into(),
            runner,
            instrumentation,
            supervisor: ProcessSupervisor::new(),
            emulator: None,
            agents: Vec::new(),
        }
    }

    /// Replace the instrumentation channel.
    pub fn with_instrumentation(mut self, channel: Box<dyn InstrumentationChannel>) -> Self {
        self.instrumentation = channel;
        self
    }

    /// Number of exploration agents currently tracked.
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Build emulator command line arguments
    pub fn emulator_args(&self) -> Vec<String> {
        vec![
            "-avd".to_string(),
            self.config.avd_name.clone(),
            "-no-audio".to_string(),
            "-no-boot-anim".to_string(),
            "-writable-system".to_string(),
            "-http-proxy".to_string(),
            self.config.http_proxy.clone(),
            "-no-snapshot-save".to_string(),
            "-phone-number".to_string(),
            self.config.phone_number.clone(),
            "-no-window".to_string(),
        ]
    }

    async fn adb(&self, args: &[&str]) -> Result<String> {
        Ok(self.runner.run(&self.config.adb_path, args).await?.stdout)
    }

    async fn adb_succeeds(&self, args: &[&str]) -> Result<bool> {
        Ok(self.runner.output(&self.config.adb_path, args).await?.success())
    }

    async fn instrumentation_running(&self) -> Result<bool> {
        let out = self.runner.output(&self.config.frida_ps_path, &["-U"]).await?;
        Ok(out.success() && out.stdout.contains("frida-server"))
    }

    async fn boot_completed(&self) -> Result<bool> {
        let out = self
            .runner
            .output(&self.config.adb_path, &["shell", "getprop", "sys.boot_completed"])
            .await?;
        Ok(out.success() && out.stdout.trim() == "1")
    }

    /// Make sure frida-server runs on the device, starting it if needed.
    pub async fn ensure_instrumentation(&mut self) -> Result<()> {
        if self.instrumentation_running().await? {
            debug!("frida-server already running");
            return Ok(());
        }

        info!("Starting frida-server");
        self.adb(&["root"]).await?;

        poll_until("connecting via adb", self.poll, || {
            self.adb_succeeds(&["get-state"])
        })
        .await?;

        let launch = format!("nohup {} >/dev/null 2>&1 &", self.config.frida_server_path);
        self.adb(&["shell", &launch]).await?;

        poll_until("starting frida-server", self.poll, || {
            self.instrumentation_running()
        })
        .await
    }
}

#[async_trait]
impl DeviceControl for AndroidDevice {
    async fn ensure_device(&mut self) -> Result<()> {
        info!("Starting emulator {}", self.config.avd_name);
        self.supervisor.stop_opt(&mut self.emulator).await;

        let args = self.emulator_args();
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.emulator = Some(self.runner.spawn("emulator", &self.config.emulator_path, &args)?);

        poll_until("waiting for emulator boot", self.poll, || {
            self.boot_completed()
        })
        .await?;

        self.ensure_instrumentation().await
    }

    async fn reset_device(&mut self) -> Result<()> {
        info!("Resetting emulator to snapshot {}", self.config.avd_snapshot_name);
        let snapshot = self.config.avd_snapshot_name.clone();
        self.adb(&["emu", "avd", "snapshot", "load", &snapshot]).await?;
        self.ensure_instrumentation().await
    }

    async fn clear_stuck_modals(&mut self) -> Result<()> {
        self.adb(&["shell", "input", "keyevent", KEYCODE_BACK]).await?;
        self.adb(&["shell", "input", "keyevent", KEYCODE_HOME]).await?;
        Ok(())
    }

    async fn install_app(&mut self, path: &Path) -> Result<()> {
        let path = path.to_string_lossy();
        self.adb(&["install-multiple", "-g", &path]).await?;
        Ok(())
    }

    async fn uninstall_app(&mut self, app_id: &str) -> Result<()> {
        let out = self
            .runner
            .output(&self.config.adb_path, &["shell", "pm", "uninstall", "--user", "0", app_id])
            .await?;

        if out.stdout.contains(NOT_INSTALLED) || out.stderr.contains(NOT_INSTALLED) {
            debug!("{} was not installed", app_id);
            return Ok(());
        }
        out.check(&self.config.adb_path)?;
        Ok(())
    }

    // Normal permissions are granted at install time; only dangerous ones need
    // an explicit grant.
    async fn set_app_permissions(&mut self, app_id: &str) -> Result<()> {
        let listing = self
            .adb(&["shell", "pm", "list", "permissions", "-g", "-d", "-u"])
            .await?;

        for permission in parse_dangerous_permissions(&listing) {
            // Fails for permissions the app doesn't declare.
            match self.adb(&["shell", "pm", "grant", app_id, &permission]).await {
                Ok(_) => debug!("Granted {} to {}", permission, app_id),
                Err(e) => debug!("Not granting {} to {}: {}", permission, app_id, e),
            }
        }
        Ok(())
    }

    async fn start_app(&mut self, app_id: &str) -> Result<()> {
        // objection stays attached for the app's lifetime, so it isn't awaited.
        let agent = self.runner.spawn(
            "objection",
            &self.config.objection_path,
            &[
                "--gadget",
                app_id,
                "explore",
                "--startup-command",
                "android sslpinning disable",
            ],
        )?;
        self.agents.push(agent);
        Ok(())
    }

    async fn stop_agents(&mut self) {
        if !self.agents.is_empty() {
            debug!("Stopping {} exploration agent(s)", self.agents.len());
        }
        self.supervisor.stop_all(&mut self.agents).await;
    }

    async fn get_foreground_app_id(&mut self) -> Result<Option<String>> {
        let recents = self.adb(&["shell", "dumpsys", "activity", "recents"]).await?;
        Ok(parse_foreground_app(&recents))
    }

    async fn get_pid_for_app_id(&mut self, app_id: &str) -> Result<Option<u32>> {
        let out = self
            .runner
            .output(&self.config.adb_path, &["shell", "pidof", "-s", app_id])
            .await?;
        if !out.success() {
            return Ok(None);
        }
        Ok(out.stdout.trim().parse().ok())
    }

    async fn set_clipboard(&mut self, text: &str) -> Result<()> {
        let launcher = self.config.launcher_package.clone();
        let pid = self.get_pid_for_app_id(&launcher).await?.ok_or_else(|| {
            Error::Instrumentation(format!("Setting clipboard failed: {} is not running", launcher))
        })?;

        let result = self
            .instrumentation
            .run_script(pid, &set_clipboard_script(text))
            .await?;

        let succeeded = match &result {
            serde_json::Value::Null => false,
            serde_json::Value::Bool(b) => *b,
            _ => true,
        };
        if !succeeded {
            return Err(Error::Instrumentation(format!(
                "Setting clipboard failed: script returned {}",
                result
            )));
        }
        Ok(())
    }

    async fn set_geolocation(&mut self, longitude: f64, latitude: f64, altitude: f64) -> Result<()> {
        let (lon, lat, alt) = (longitude.to_string(), latitude.to_string(), altitude.to_string());
        self.adb(&["emu", "geo", "fix", &lon, &lat, &alt]).await?;
        Ok(())
    }

    // aapt sometimes fails on unrelated resources (e.g. "ERROR getting
    // 'android:icon' attribute") yet still prints the version.
    async fn get_app_version(&mut self, path: &Path) -> Result<Option<String>> {
        let path = path.to_string_lossy();
        let out = self
            .runner
            .output(&self.config.aapt_path, &["dump", "badging", &path])
            .await?;

        let version = parse_version_name(&out.stdout);
        if version.is_some() && !out.success() {
            warn!("aapt reported errors for {} but printed a version", path);
        }
        Ok(version)
    }

    fn clipboard_fixture(&self) -> &str {
        &self.clipboard
    }

    async fn release(&mut self) {
        self.stop_agents().await;
        self.supervisor.stop_opt(&mut self.emulator).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::CommandOutput;
    use crate::device::PreLaunchHook;
    use parking_lot::Mutex;
    use std::path::PathBuf;
    use std::time::Duration;

    const RECENTS: &str = "\
ACTIVITY MANAGER RECENT TASKS (dumpsys activity recents)
  Recent tasks:
  * Recent #0: TaskRecord{7d5c2b1 #42 A=10123:com.example.a U=0 StackId=12 sz=1}
  * Recent #1: TaskRecord{1f2a3b4 #17 A=10050:com.google.android.apps.nexuslauncher U=0 StackId=0 sz=1}
";

    const PERMISSIONS: &str = "\
Dangerous Permissions:

group:android.permission-group.CONTACTS
  permission:android.permission.READ_CONTACTS
  permission:android.permission.WRITE_CONTACTS

group:android.permission-group.LOCATION
  permission:android.permission.ACCESS_FINE_LOCATION
";

    type Responder = Box<dyn Fn(&str) -> CommandOutput + Send + Sync>;

    /// Scripted runner: answers by matching the joined command line.
    struct ScriptedRunner {
        calls: Mutex<Vec<String>>,
        spawned: Mutex<Vec<String>>,
        respond: Responder,
    }

    impl ScriptedRunner {
        fn new(respond: impl Fn(&str) -> CommandOutput + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                spawned: Mutex::new(Vec::new()),
                respond: Box::new(respond),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        fn spawned(&self) -> Vec<String> {
            self.spawned.lock().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn output(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
            let line = format!("{} {}", program, args.join(" "));
            self.calls.lock().push(line.clone());
            Ok((self.respond)(&line))
        }

        fn spawn(&self, name: &str, program: &str, args: &[&str]) -> Result<ProcessHandle> {
            self.spawned
                .lock()
                .push(format!("{} {}", program, args.join(" ")));
            ProcessSupervisor::new().start(name, "sleep", ["30"])
        }
    }

    /// Healthy device where everything succeeds.
    fn healthy(line: &str) -> CommandOutput {
        if line.starts_with("frida-ps") {
            CommandOutput::ok("  PID  Name\n  812  frida-server\n")
        } else if line.contains("getprop sys.boot_completed") {
            CommandOutput::ok("1\n")
        } else if line.contains("pm list permissions") {
            CommandOutput::ok(PERMISSIONS)
        } else if line.contains("pidof -s com.google.android.apps.nexuslauncher") {
            CommandOutput::ok("1234\n")
        } else if line.contains("dumpsys activity recents") {
            CommandOutput::ok(RECENTS)
        } else if line.starts_with("frida ") {
            CommandOutput::ok("{\"name\":\"getObjFromFridaScript\",\"payload\":true}\n")
        } else {
            CommandOutput::ok("")
        }
    }

    fn config() -> AndroidConfig {
        AndroidConfig {
            avd_name: "pixel".to_string(),
            avd_snapshot_name: "clean".to_string(),
            frida_ps_path: "frida-ps".to_string(),
            frida_path: "frida".to_string(),
            objection_path: "objection".to_string(),
            ..Default::default()
        }
    }

    fn device(runner: Arc<ScriptedRunner>) -> AndroidDevice {
        AndroidDevice::new(
            config(),
            PollPolicy::new(5, Duration::from_millis(1)),
            "LDDsvPqQdT",
            runner,
        )
    }

    #[test]
    fn test_parse_foreground_app() {
        assert_eq!(parse_foreground_app(RECENTS).as_deref(), Some("com.example.a"));
        assert_eq!(parse_foreground_app("no tasks"), None);
    }

    #[test]
    fn test_parse_dangerous_permissions() {
        assert_eq!(
            parse_dangerous_permissions(PERMISSIONS),
            vec![
                "android.permission.READ_CONTACTS",
                "android.permission.WRITE_CONTACTS",
                "android.permission.ACCESS_FINE_LOCATION",
            ]
        );
    }

    #[test]
    fn test_parse_version_name_with_warnings() {
        let badging = "package: name='com.example.a' versionCode='7' versionName='1.0.3' \
                       platformBuildVersionName='11'\n\
                       AndroidManifest.xml:42: error: ERROR getting 'android:icon' attribute";
        assert_eq!(parse_version_name(badging).as_deref(), Some("1.0.3"));
        assert_eq!(parse_version_name("ERROR: dump failed"), None);
    }

    #[tokio::test]
    async fn test_uninstall_tolerates_missing_app() {
        let runner = ScriptedRunner::new(|line| {
            if line.contains("pm uninstall") {
                CommandOutput::failed(1, "Failure [not installed for 0]", "")
            } else {
                healthy(line)
            }
        });
        let mut dev = device(runner);
        dev.uninstall_app("com.example.a").await.unwrap();
    }

    #[tokio::test]
    async fn test_uninstall_propagates_other_errors() {
        let runner = ScriptedRunner::new(|line| {
            if line.contains("pm uninstall") {
                CommandOutput::failed(1, "", "error: no devices/emulators found")
            } else {
                healthy(line)
            }
        });
        let mut dev = device(runner);
        let err = dev.uninstall_app("com.example.a").await.unwrap_err();
        assert!(matches!(err, Error::CommandFailed { .. }));
    }

    #[tokio::test]
    async fn test_permission_failures_are_independent() {
        let runner = ScriptedRunner::new(|line| {
            if line.contains("pm grant") && line.contains("WRITE_CONTACTS") {
                CommandOutput::failed(255, "", "has not requested permission")
            } else {
                healthy(line)
            }
        });
        let mut dev = device(runner.clone());
        dev.set_app_permissions("com.example.a").await.unwrap();

        let grants: Vec<_> = runner
            .calls()
            .into_iter()
            .filter(|c| c.contains("pm grant"))
            .collect();
        assert_eq!(grants.len(), 3);
        assert!(grants[2].ends_with("android.permission.ACCESS_FINE_LOCATION"));
    }

    #[tokio::test]
    async fn test_ensure_instrumentation_starts_server() {
        let started = Arc::new(Mutex::new(false));
        let flag = started.clone();
        let runner = ScriptedRunner::new(move |line| {
            if line.starts_with("frida-ps") {
                if *flag.lock() {
                    CommandOutput::ok("812 frida-server\n")
                } else {
                    CommandOutput::ok("1 init\n")
                }
            } else if line.contains("nohup") {
                *flag.lock() = true;
                CommandOutput::ok("")
            } else {
                healthy(line)
            }
        });
        let mut dev = device(runner.clone());
        dev.ensure_instrumentation().await.unwrap();

        let calls = runner.calls();
        assert!(calls.contains(&"adb root".to_string()));
        assert!(calls.contains(&"adb get-state".to_string()));
        assert!(calls
            .iter()
            .any(|c| c == "adb shell nohup /data/local/tmp/frida-server >/dev/null 2>&1 &"));
    }

    #[tokio::test]
    async fn test_ensure_instrumentation_gives_up() {
        let runner = ScriptedRunner::new(|line| {
            if line.starts_with("frida-ps") {
                CommandOutput::ok("")
            } else {
                healthy(line)
            }
        });
        let mut dev = device(runner);
        let err = dev.ensure_instrumentation().await.unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { attempts: 5, .. }));
    }

    #[tokio::test]
    async fn test_adb_connection_cap() {
        let runner = ScriptedRunner::new(|line| {
            if line.starts_with("frida-ps") {
                CommandOutput::ok("")
            } else if line == "adb get-state" {
                CommandOutput::failed(1, "", "error: device offline")
            } else {
                healthy(line)
            }
        });
        let mut dev = device(runner.clone());
        let err = dev.ensure_instrumentation().await.unwrap_err();
        match err {
            Error::RetriesExhausted { operation, attempts } => {
                assert_eq!(operation, "connecting via adb");
                assert_eq!(attempts, 5);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!runner.calls().iter().any(|c| c.contains("nohup")));
    }

    #[tokio::test]
    async fn test_ensure_device_restarts_emulator() {
        let runner = ScriptedRunner::new(healthy);
        let mut dev = device(runner.clone());

        dev.ensure_device().await.unwrap();
        dev.ensure_device().await.unwrap();

        let spawned = runner.spawned();
        assert_eq!(spawned.len(), 2);
        assert!(spawned[0].starts_with("emulator -avd pixel -no-audio"));
        assert!(spawned[0].ends_with("-no-window"));

        dev.release().await;
    }

    #[tokio::test]
    async fn test_ensure_device_gives_up_when_boot_never_completes() {
        let runner = ScriptedRunner::new(|line| {
            if line.contains("getprop sys.boot_completed") {
                CommandOutput::ok("0\n")
            } else {
                healthy(line)
            }
        });
        let mut dev = device(runner.clone());

        let err = dev.ensure_device().await.unwrap_err();
        match err {
            Error::RetriesExhausted { operation, attempts } => {
                assert_eq!(operation, "waiting for emulator boot");
                assert_eq!(attempts, 5);
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let calls = runner.calls();
        let boot_checks = calls
            .iter()
            .filter(|c| c.contains("getprop sys.boot_completed"))
            .count();
        assert_eq!(boot_checks, 5);
        assert!(!calls.iter().any(|c| c.starts_with("frida-ps")));

        dev.release().await;
    }

    #[tokio::test]
    async fn test_reset_device_loads_snapshot() {
        let runner = ScriptedRunner::new(healthy);
        let mut dev = device(runner.clone());
        dev.reset_device().await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls[0], "adb emu avd snapshot load clean");
        assert_eq!(calls[1], "frida-ps -U");
    }

    #[tokio::test]
    async fn test_set_clipboard_requires_launcher() {
        let runner = ScriptedRunner::new(|line| {
            if line.contains("pidof") {
                CommandOutput::failed(1, "", "")
            } else {
                healthy(line)
            }
        });
        let mut dev = device(runner);
        let err = dev.set_clipboard("LDDsvPqQdT").await.unwrap_err();
        assert!(matches!(err, Error::Instrumentation(_)));
    }

    #[tokio::test]
    async fn test_set_clipboard_runs_script_in_launcher() {
        let runner = ScriptedRunner::new(healthy);
        let mut dev = device(runner.clone());
        dev.set_clipboard("LDDsvPqQdT").await.unwrap();

        assert!(runner
            .calls()
            .iter()
            .any(|c| c.starts_with("frida -U -p 1234 -l ") && c.ends_with(".js -q")));
    }

    #[tokio::test]
    async fn test_set_clipboard_rejects_falsy_result() {
        let runner = ScriptedRunner::new(|line| {
            if line.starts_with("frida ") {
                CommandOutput::ok("{\"name\":\"getObjFromFridaScript\",\"payload\":false}")
            } else {
                healthy(line)
            }
        });
        let mut dev = device(runner);
        assert!(dev.set_clipboard("x").await.is_err());
    }

    #[tokio::test]
    async fn test_foreground_and_pid() {
        let runner = ScriptedRunner::new(|line| {
            if line.contains("pidof -s com.example.a") {
                CommandOutput::ok("4321\n")
            } else {
                healthy(line)
            }
        });
        let mut dev = device(runner);
        assert_eq!(
            dev.get_foreground_app_id().await.unwrap().as_deref(),
            Some("com.example.a")
        );
        assert_eq!(dev.get_pid_for_app_id("com.example.a").await.unwrap(), Some(4321));
    }

    #[tokio::test]
    async fn test_geolocation_command() {
        let runner = ScriptedRunner::new(healthy);
        let mut dev = device(runner.clone());
        dev.set_geolocation(52.23528, 10.56437, 77.23).await.unwrap();
        assert_eq!(runner.calls(), vec!["adb emu geo fix 52.23528 10.56437 77.23"]);
    }

    #[tokio::test]
    async fn test_app_version_tolerates_aapt_errors() {
        let runner = ScriptedRunner::new(|line| {
            if line.starts_with("aapt") {
                CommandOutput::failed(
                    1,
                    "package: name='com.example.a' versionName='1.0'",
                    "ERROR getting 'android:icon' attribute",
                )
            } else {
                healthy(line)
            }
        });
        let mut dev = device(runner);
        let version = dev.get_app_version(Path::new("apps/com.example.a.apk")).await.unwrap();
        assert_eq!(version.as_deref(), Some("1.0"));
    }

    struct RecordingHook {
        runner: Arc<ScriptedRunner>,
        seen_calls: usize,
        seen_spawns: usize,
    }

    #[async_trait]
    impl PreLaunchHook for RecordingHook {
        async fn before_launch(&mut self, _app_id: &str) -> Result<()> {
            self.seen_calls = self.runner.calls().len();
            self.seen_spawns = self.runner.spawned().len();
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_reset_app_order() {
        let runner = ScriptedRunner::new(healthy);
        let mut dev = device(runner.clone());
        let apk = PathBuf::from("apps/com.example.a.apk");

        let mut hook = RecordingHook {
            runner: runner.clone(),
            seen_calls: 0,
            seen_spawns: 0,
        };
        dev.reset_app("com.example.a", &apk, Some(&mut hook)).await.unwrap();

        let calls = runner.calls();
        let position = |needle: &str| {
            calls
                .iter()
                .position(|c| c.contains(needle))
                .unwrap_or_else(|| panic!("missing {}", needle))
        };
        assert!(position("pm uninstall") < position("install-multiple"));
        assert!(position("install-multiple") < position("pm list permissions"));
        assert!(position("pm list permissions") < position("keyevent 4"));
        assert!(position("keyevent 3") < position("frida -U"));

        // Hook ran after every setup command and before the agent spawned.
        assert_eq!(hook.seen_calls, calls.len());
        assert_eq!(hook.seen_spawns, 0);
        assert_eq!(runner.spawned().len(), 1);
        assert!(runner.spawned()[0].starts_with("objection --gadget com.example.a explore"));
        assert_eq!(dev.agent_count(), 1);

        // A second reset replaces the agent instead of piling up.
        dev.reset_app("com.example.a", &apk, None).await.unwrap();
        assert_eq!(dev.agent_count(), 1);

        dev.release().await;
        assert_eq!(dev.agent_count(), 0);
    }
}

//! Runtime instrumentation channel
//!
//! Runs small scripts inside a process on the device. A script reports back
//! with exactly one message of the shape
//! `{"name": "getObjFromFridaScript", "payload": <value>}`.

use crate::bridge::CommandRunner;
use async_trait::async_trait;
use privprobe_common::{Error, Result};
use serde::Deserialize;
use std::io::Write;
use std::sync::Arc;
use tracing::debug;

/// Message name a script uses to hand back its result.
pub const RESULT_MESSAGE: &str = "getObjFromFridaScript";

/// Runs a script against a device process and returns its result payload.
#[async_trait]
pub trait InstrumentationChannel: Send + Sync {
    async fn run_script(&self, pid: u32, script: &str) -> Result<serde_json::Value>;
}

#[derive(Debug, Deserialize)]
struct ScriptMessage {
    name: String,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Extract the result payload from script output.
///
/// The first line that parses as a JSON object is the message; anything that
/// isn't a result message is an error.
pub fn parse_script_output(stdout: &str) -> Result<serde_json::Value> {
    for line in stdout.lines().map(str::trim).filter(|l| l.starts_with('{')) {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        return match serde_json::from_value::<ScriptMessage>(value) {
            Ok(msg) if msg.name == RESULT_MESSAGE => Ok(msg.payload),
            _ => Err(Error::Instrumentation(format!("unexpected script message: {}", line))),
        };
    }
    Err(Error::Instrumentation("script produced no result".to_string()))
}

/// Script that sets the clipboard from within an app context.
pub fn set_clipboard_script(text: &str) -> String {
    // JSON string literals are valid JS string literals.
    let literal = serde_json::Value::String(text.to_string()).to_string();
    format!(
        r#"Java.perform(function () {{
    var appCtx = Java.use('android.app.ActivityThread').currentApplication().getApplicationContext();
    var cm = Java.cast(appCtx.getSystemService("clipboard"), Java.use("android.content.ClipboardManager"));
    cm.setText(Java.use("java.lang.StringBuilder").$new({literal}));
    console.log(JSON.stringify({{ name: "{RESULT_MESSAGE}", payload: true }}));
}});
"#
    )
}

/// [`InstrumentationChannel`] using the `frida` command-line tool over USB.
pub struct FridaCli {
    frida_path: String,
    runner: Arc<dyn CommandRunner>,
}

impl FridaCli {
    pub fn new(frida_path: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            frida_path: frida_path.into(),
            runner,
        }
    }
}

#[async_trait]
impl InstrumentationChannel for FridaCli {
    async fn run_script(&self, pid: u32, script: &str) -> Result<serde_json::Value> {
        let mut file = tempfile::Builder::new()
            .prefix("privprobe-")
            .suffix(".js")
            .tempfile()?;
        file.write_all(script.as_bytes())?;
        file.flush()?;

        let pid = pid.to_string();
        let script_path = file.path().to_string_lossy().to_string();
        debug!("Running instrumentation script against PID {}", pid);

        let output = self
            .runner
            .run(&self.frida_path, &["-U", "-p", &pid, "-l", &script_path, "-q"])
            .await?;

        parse_script_output(&output.stdout)
    }
}

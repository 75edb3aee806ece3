//! Status reporting over the run ledger and the skip-list

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use privprobe_common::{FailureRepository, Result, RunLedger, SqliteLedger};
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

/// A tested app version and its capture sessions
#[derive(Debug, Clone, Serialize)]
pub struct AppStatus {
    pub id: i64,
    pub name: String,
    pub version: String,
    pub runs: usize,
    pub last_run: Option<DateTime<Utc>>,
}

impl TableDisplay for AppStatus {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "App", "Version", "Runs", "Last run"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.to_string(),
            self.name.clone(),
            self.version.clone(),
            self.runs.to_string(),
            self.last_run
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
        ]
    }
}

/// An app on the skip-list
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedApp {
    pub app_id: String,
    pub date: DateTime<Utc>,
    pub kind: String,
    pub error: String,
}

impl TableDisplay for FailedApp {
    fn headers() -> Vec<&'static str> {
        vec!["App", "Failed at", "Kind", "Error"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.app_id.clone(),
            self.date.format("%Y-%m-%d %H:%M:%S").to_string(),
            self.kind.clone(),
            self.error.clone(),
        ]
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub apps: Vec<AppStatus>,
    pub failed: Vec<FailedApp>,
}

impl StatusReport {
    /// Report on the ledger file at `ledger_path`, opened read-only. A
    /// missing ledger reads as one without apps and is not created.
    pub fn load(ledger_path: &Path, failures: &dyn FailureRepository) -> Result<Self> {
        if ledger_path.exists() {
            let ledger = SqliteLedger::open_read_only(ledger_path)?;
            return Self::collect(&ledger, failures);
        }

        info!("No run ledger at {:?} yet", ledger_path);
        Ok(Self {
            apps: Vec::new(),
            failed: failed_apps(failures)?,
        })
    }

    /// Read-only snapshot of the ledger and the skip-list.
    pub fn collect(ledger: &dyn RunLedger, failures: &dyn FailureRepository) -> Result<Self> {
        let mut apps = Vec::new();
        for app in ledger.list_apps()? {
            let runs = ledger.runs_for_app(app.id)?;
            apps.push(AppStatus {
                last_run: runs.iter().map(|r| r.start_time).max(),
                runs: runs.len(),
                id: app.id,
                name: app.name,
                version: app.version,
            });
        }

        Ok(Self {
            apps,
            failed: failed_apps(failures)?,
        })
    }

    pub fn render(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Table => format!(
                "Tested apps\n{}\n\nSkip-list\n{}",
                render_table(&self.apps),
                render_table(&self.failed)
            ),
            OutputFormat::Json => serde_json::to_string_pretty(self).unwrap_or_default(),
        }
    }
}

/// Skip-list entries, oldest first
fn failed_apps(failures: &dyn FailureRepository) -> Result<Vec<FailedApp>> {
    let mut failed: Vec<FailedApp> = failures
        .records()?
        .into_iter()
        .map(|r| FailedApp {
            app_id: r.app_id,
            date: r.date,
            kind: r.error.kind,
            error: r.error.message,
        })
        .collect();
    failed.sort_by(|a, b| a.date.cmp(&b.date));
    Ok(failed)
}

fn render_table<T: TableDisplay>(items: &[T]) -> String {
    if items.is_empty() {
        return "No items found.".to_string();
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(T::headers());
    for item in items {
        table.add_row(item.row());
    }

    table.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use privprobe_common::{Error, FailureRecord, FsFailureStore, SqliteLedger};
    use tempfile::TempDir;

    fn fixture() -> (SqliteLedger, FsFailureStore, TempDir) {
        let ledger = SqliteLedger::open_memory().unwrap();
        let a = ledger.insert_app("com.example.a", "1.0").unwrap();
        ledger.insert_run(a).unwrap();
        ledger.insert_run(a).unwrap();
        ledger.insert_app("com.example.b", "2.1").unwrap();

        let tmp = TempDir::new().unwrap();
        let failures = FsFailureStore::new(tmp.path());
        failures
            .record_failure(&FailureRecord::new(
                "com.example.c",
                &Error::AppNotForeground {
                    expected: "com.example.c".to_string(),
                    actual: None,
                },
            ))
            .unwrap();

        (ledger, failures, tmp)
    }

    #[test]
    fn test_collect() {
        let (ledger, failures, _tmp) = fixture();
        let report = StatusReport::collect(&ledger, &failures).unwrap();

        assert_eq!(report.apps.len(), 2);
        let a = report.apps.iter().find(|s| s.name == "com.example.a").unwrap();
        assert_eq!(a.runs, 2);
        assert!(a.last_run.is_some());
        let b = report.apps.iter().find(|s| s.name == "com.example.b").unwrap();
        assert_eq!(b.runs, 0);
        assert!(b.last_run.is_none());

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].app_id, "com.example.c");
        assert_eq!(report.failed[0].kind, "app_not_foreground");
    }

    #[test]
    fn test_render_table() {
        let (ledger, failures, _tmp) = fixture();
        let text = StatusReport::collect(&ledger, &failures)
            .unwrap()
            .render(OutputFormat::Table);

        assert!(text.contains("com.example.a"));
        assert!(text.contains("Skip-list"));
        assert!(text.contains("com.example.c"));
    }

    #[test]
    fn test_render_json() {
        let (ledger, failures, _tmp) = fixture();
        let text = StatusReport::collect(&ledger, &failures)
            .unwrap()
            .render(OutputFormat::Json);

        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["apps"].as_array().unwrap().len(), 2);
        assert_eq!(value["failed"][0]["appId"], "com.example.c");
    }

    #[test]
    fn test_empty_report() {
        let ledger = SqliteLedger::open_memory().unwrap();
        let tmp = TempDir::new().unwrap();
        let failures = FsFailureStore::new(tmp.path().join("missing"));

        let text = StatusReport::collect(&ledger, &failures)
            .unwrap()
            .render(OutputFormat::Table);
        assert!(text.contains("No items found."));
    }

    #[test]
    fn test_load_without_ledger_leaves_data_dir_alone() {
        let (_ledger, failures, tmp) = fixture();
        let data_dir = tmp.path().join("data");
        let path = data_dir.join("ledger.db");

        let report = StatusReport::load(&path, &failures).unwrap();
        assert!(report.apps.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert!(!data_dir.exists());
    }

    #[test]
    fn test_load_reads_existing_ledger() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ledger.db");
        {
            let ledger = SqliteLedger::open(&path).unwrap();
            let id = ledger.insert_app("com.example.a", "1.0").unwrap();
            ledger.insert_run(id).unwrap();
        }
        let failures = FsFailureStore::new(tmp.path().join("failed-apps"));

        let report = StatusReport::load(&path, &failures).unwrap();
        assert_eq!(report.apps.len(), 1);
        assert_eq!(report.apps[0].name, "com.example.a");
        assert_eq!(report.apps[0].runs, 1);
        assert!(report.failed.is_empty());
    }
}

//! Failure skip-list
//!
//! One JSON file per failed attempt. The set of app ids found in these files
//! is excluded from automatic retries.

use crate::types::FailureRecord;
use crate::Result;
use chrono::SecondsFormat;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Storage for failure records
pub trait FailureRepository: Send + Sync {
    /// App ids with at least one failure record.
    fn list_failures(&self) -> Result<HashSet<String>>;

    /// Append a failure record.
    fn record_failure(&self, record: &FailureRecord) -> Result<()>;

    /// All stored records, oldest first.
    fn records(&self) -> Result<Vec<FailureRecord>>;
}

/// [`FailureRepository`] backed by a directory of JSON files
#[derive(Debug, Clone)]
pub struct FsFailureStore {
    dir: PathBuf,
}

impl FsFailureStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(record: &FailureRecord) -> String {
        let date = record.date.to_rfc3339_opts(SecondsFormat::Millis, true);
        let app_id: String = record
            .app_id
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        format!("{}-{}.json", date, app_id)
    }

    fn json_files(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().map(|e| e == "json").unwrap_or(false) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

impl FailureRepository for FsFailureStore {
    fn list_failures(&self) -> Result<HashSet<String>> {
        Ok(self.records()?.into_iter().map(|r| r.app_id).collect())
    }

    fn record_failure(&self, record: &FailureRecord) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(Self::file_name(record));
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(&path, json)?;

        debug!("Wrote failure record to {}", path.display());
        Ok(())
    }

    fn records(&self) -> Result<Vec<FailureRecord>> {
        let mut records = Vec::new();
        for path in self.json_files()? {
            let content = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<FailureRecord>(&content) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Ignoring unreadable failure record {}: {}", path.display(), e),
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use tempfile::TempDir;

    #[test]
    fn test_missing_dir_means_no_failures() {
        let tmp = TempDir::new().unwrap();
        let store = FsFailureStore::new(tmp.path().join("failed-apps"));
        assert!(store.list_failures().unwrap().is_empty());
    }

    #[test]
    fn test_record_and_list() {
        let tmp = TempDir::new().unwrap();
        let store = FsFailureStore::new(tmp.path().join("failed-apps"));

        let err = Error::Device("adb went away".to_string());
        store.record_failure(&FailureRecord::new("com.example.a", &err)).unwrap();
        store.record_failure(&FailureRecord::new("com.example.b", &err)).unwrap();
        store.record_failure(&FailureRecord::new("com.example.a", &err)).unwrap();

        let failed = store.list_failures().unwrap();
        assert_eq!(failed.len(), 2);
        assert!(failed.contains("com.example.a"));
        assert!(failed.contains("com.example.b"));

        let files = std::fs::read_dir(store.dir()).unwrap().count();
        assert!(files >= 2);
    }

    #[test]
    fn test_file_contents() {
        let tmp = TempDir::new().unwrap();
        let store = FsFailureStore::new(tmp.path());
        let err = Error::timeout("reset device", std::time::Duration::from_secs(20));
        let record = FailureRecord::new("com.example.a", &err);
        store.record_failure(&record).unwrap();

        let path = store.json_files().unwrap().pop().unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with("-com.example.a.json"), "{}", name);

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["appId"], "com.example.a");
        assert_eq!(json["error"]["kind"], "timeout");
        assert_eq!(json["error"]["message"], "reset device timed out after 20s");
    }

    #[test]
    fn test_garbage_files_are_ignored() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("broken.json"), "{ not json").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "hello").unwrap();

        let store = FsFailureStore::new(tmp.path());
        assert!(store.list_failures().unwrap().is_empty());
    }
}

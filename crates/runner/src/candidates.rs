//! Candidate discovery

use privprobe_common::{AppCandidate, Result};
use rand::seq::SliceRandom;
use std::path::Path;
use tracing::debug;

const APP_EXTENSION: &str = "apk";

/// Every `<app id>.apk` in `dir`, in random order.
///
/// The order changes from run to run so no app systematically benefits from
/// running first.
pub fn discover(dir: &Path) -> Result<Vec<AppCandidate>> {
    let mut candidates = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(APP_EXTENSION) {
            continue;
        }
        match path.file_stem().and_then(|s| s.to_str()) {
            Some(stem) if !stem.is_empty() => {
                candidates.push(AppCandidate::new(stem, path.clone()));
            }
            _ => debug!("Ignoring {}", path.display()),
        }
    }

    candidates.shuffle(&mut rand::thread_rng());
    Ok(candidates)
}

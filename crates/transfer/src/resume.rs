//! Resume sidecars.
//!
//! While a file is being received, `<destination>.resume` holds a small JSON
//! record of how many bytes have been written. Persistence is best effort:
//! failures are logged and never abort a transfer.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

/// Suffix appended to the destination path.
pub const RESUME_SUFFIX: &str = ".resume";

/// Persisted partial-receive state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeRecord {
    pub file_path: PathBuf,
    pub file_size: u64,
    pub transferred_size: u64,
    /// Seconds since the Unix epoch when the record was written.
    pub timestamp: f64,
}

impl ResumeRecord {
    pub fn new(file_path: &Path, file_size: u64, transferred_size: u64) -> Self {
        let now = Utc::now();
        Self {
            file_path: file_path.to_path_buf(),
            file_size,
            transferred_size,
            timestamp: now.timestamp_micros() as f64 / 1_000_000.0,
        }
    }

    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        let secs = self.timestamp.trunc() as i64;
        let nanos = (self.timestamp.fract() * 1e9) as u32;
        DateTime::from_timestamp(secs, nanos)
    }

    /// Whether this record can continue a transfer of a `file_size`-byte
    /// file whose partial destination currently holds `on_disk` bytes.
    pub fn is_resumable(&self, file_size: u64, on_disk: u64) -> bool {
        self.file_size == file_size
            && self.transferred_size <= self.file_size
            && on_disk >= self.transferred_size
    }
}

/// Returns the sidecar path for a destination file.
pub fn sidecar_path(destination: &Path) -> PathBuf {
    let mut s = destination.as_os_str().to_owned();
    s.push(RESUME_SUFFIX);
    PathBuf::from(s)
}

/// Writes the sidecar for `destination`. Failures are logged.
pub async fn save(destination: &Path, file_size: u64, transferred_size: u64) {
    let record = ResumeRecord::new(destination, file_size, transferred_size);
    if let Err(e) = write_record(destination, &record).await {
        warn!(
            path = %destination.display(),
            error = %e,
            "failed to save resume record"
        );
    }
}

async fn write_record(destination: &Path, record: &ResumeRecord) -> std::io::Result<()> {
    let path = sidecar_path(destination);
    let json = serde_json::to_vec(record)?;

    // Write-then-rename so a crash never leaves a half-written record.
    let mut tmp = path.clone().into_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, json).await?;
    fs::rename(&tmp, &path).await
}

/// Loads the sidecar for `destination`.
///
/// Returns `None` if the sidecar is missing, unreadable or not valid JSON.
pub async fn load(destination: &Path) -> Option<ResumeRecord> {
    let path = sidecar_path(destination);
    let contents = match fs::read(&path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read resume record");
            return None;
        }
    };
    match serde_json::from_slice(&contents) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring corrupt resume record");
            None
        }
    }
}

/// Deletes the sidecar for `destination`, if any.
///
/// Only called once the received file has passed its digest check.
pub async fn clear(destination: &Path) {
    let path = sidecar_path(destination);
    match fs::remove_file(&path).await {
        Ok(()) => debug!(path = %path.display(), "resume record cleared"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to clear resume record"),
    }
}

//! Local file presence and change checks

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde_json::json;
use tokio::io::AsyncReadExt;

use super::StatusProvider;
use crate::error::CheckError;
use crate::health::checks::{body_from, strip_query, Check, CheckResult};

const CONTENT_PREVIEW_BYTES: u64 = 100;

#[derive(Debug, Clone, Copy)]
struct FileStamp {
    size: u64,
    modified: SystemTime,
}

#[derive(Default)]
pub struct FileProvider {
    last_seen: Mutex<HashMap<PathBuf, FileStamp>>,
}

impl FileProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn forget(&self, path: &Path) {
        self.last_seen.lock().remove(path);
    }

    /// Returns `(size_change, modif_change_ms)` against the previous stat and
    /// stores the new one. On first observation both are absolute values.
    fn record(&self, path: &Path, stamp: FileStamp) -> (i64, i64) {
        let mut last_seen = self.last_seen.lock();
        let changes = match last_seen.get(path) {
            Some(previous) => (
                stamp.size as i64 - previous.size as i64,
                unix_millis(stamp.modified) - unix_millis(previous.modified),
            ),
            None => (stamp.size as i64, unix_millis(stamp.modified)),
        };
        last_seen.insert(path.to_path_buf(), stamp);
        changes
    }
}

fn unix_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => since.as_millis() as i64,
        Err(before) => -(before.duration().as_millis() as i64),
    }
}

async fn read_preview(path: &Path) -> Result<String, CheckError> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| CheckError::Transport(format!("can't open {}: {}", path.display(), e)))?;
    let mut buf = Vec::with_capacity(CONTENT_PREVIEW_BYTES as usize);
    file.take(CONTENT_PREVIEW_BYTES)
        .read_to_end(&mut buf)
        .await
        .map_err(|e| CheckError::Transport(format!("can't read {}: {}", path.display(), e)))?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[async_trait::async_trait]
impl StatusProvider for FileProvider {
    async fn status(&self, check: &Check) -> Result<CheckResult, CheckError> {
        let start = Instant::now();
        let path = PathBuf::from(strip_query(check.url.trim_start_matches("file://")));

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.forget(&path);
                return Ok(CheckResult::ok(&check.name)
                    .with_body(body_from(json!({"status": "not found"})))
                    .with_response_time(start.elapsed()));
            }
            Err(e) => {
                return Err(CheckError::Transport(format!("can't stat {}: {}", path.display(), e)));
            }
        };

        let modified = metadata
            .modified()
            .map_err(|e| CheckError::Transport(format!("can't read mtime of {}: {}", path.display(), e)))?;
        let stamp = FileStamp {
            size: metadata.len(),
            modified,
        };

        let content = if metadata.is_file() {
            read_preview(&path).await?
        } else {
            String::new()
        };

        let since_modif = SystemTime::now()
            .duration_since(modified)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let (size_change, modif_change) = self.record(&path, stamp);

        let body = json!({
            "status": "found",
            "size": stamp.size,
            "modif_time": DateTime::<Utc>::from(modified).to_rfc3339_opts(SecondsFormat::AutoSi, true),
            "since_modif": since_modif,
            "size_change": size_change,
            "modif_change": modif_change,
            "content": content,
        });

        Ok(CheckResult::ok(&check.name)
            .with_body(body_from(body))
            .with_response_time(start.elapsed()))
    }
}

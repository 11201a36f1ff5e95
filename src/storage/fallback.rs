//! Local last-resort log for outcomes the store would not take
//!
//! Each outcome is appended as one JSON line. The file is opened in append mode for
//! every write and synced afterwards, so a crash loses at most the line being written.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, warn};

use super::error::StorageResult;
use crate::CheckOutcome;

#[derive(Clone)]
pub struct FallbackLog {
    path: PathBuf,
    // Serializes writers so lines never interleave
    write_lock: Arc<Mutex<()>>,
}

impl FallbackLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one outcome as a JSON line
    pub async fn append(&self, outcome: &CheckOutcome) -> StorageResult<()> {
        let mut line = serde_json::to_string(outcome)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.sync_data().await?;
        Ok(())
    }

    /// Append, and if even that fails put the whole outcome into the error log
    pub async fn preserve(&self, outcome: &CheckOutcome) -> bool {
        match self.append(outcome).await {
            Ok(()) => {
                warn!(
                    url = %outcome.target_url,
                    path = %self.path.display(),
                    "outcome written to fallback log"
                );
                true
            }
            Err(e) => {
                let serialized = serde_json::to_string(outcome)
                    .unwrap_or_else(|_| format!("{outcome:?}"));
                error!(
                    path = %self.path.display(),
                    "fallback log write failed ({e}), outcome: {serialized}"
                );
                false
            }
        }
    }

    /// Read back every preserved outcome
    pub async fn read_all(&self) -> StorageResult<Vec<CheckOutcome>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(Into::into))
            .collect()
    }
}

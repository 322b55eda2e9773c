use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::warn;

use maimai_core::domain::knowledge::KnowledgeFact;
use maimai_core::storage::{KnowledgeLog, StoreError, UserRecordStore, UserRecords};

/// User records kept as one pretty-printed JSON object keyed by user id.
pub struct JsonUserStore {
    path: PathBuf,
}

impl JsonUserStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Moves an unreadable user file aside so the next save cannot silently
    /// replace it.
    pub async fn quarantine(&self) -> Result<Option<PathBuf>, StoreError> {
        quarantine_file(&self.path).await
    }
}

#[async_trait::async_trait]
impl UserRecordStore for JsonUserStore {
    async fn load_all(&self) -> Result<UserRecords, StoreError> {
        Ok(read_json(&self.path).await?.unwrap_or_default())
    }

    async fn save_all(&self, records: &UserRecords) -> Result<(), StoreError> {
        write_json_atomic(&self.path, records).await
    }
}

/// Remembered facts as a JSON array; every append rewrites the whole file.
pub struct JsonKnowledgeLog {
    path: PathBuf,
    facts: Mutex<Vec<KnowledgeFact>>,
}

impl JsonKnowledgeLog {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let facts = read_json(&path).await?.unwrap_or_default();
        Ok(Self { path, facts: Mutex::new(facts) })
    }

    /// Like [`JsonKnowledgeLog::open`], but an unreadable file is moved aside
    /// and the log starts empty.
    pub async fn open_or_recover(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match read_json(&path).await {
            Ok(facts) => Self { path, facts: Mutex::new(facts.unwrap_or_default()) },
            Err(error) => {
                warn!(
                    event_name = "storage.knowledge.load_failed",
                    path = %path.display(),
                    error = %error,
                    "starting with an empty knowledge log"
                );
                if let Err(error) = quarantine_file(&path).await {
                    warn!(
                        event_name = "storage.file.quarantine_failed",
                        path = %path.display(),
                        error = %error,
                        "unreadable knowledge file left in place"
                    );
                }
                Self { path, facts: Mutex::new(Vec::new()) }
            }
        }
    }
}

#[async_trait::async_trait]
impl KnowledgeLog for JsonKnowledgeLog {
    async fn append(&self, fact: KnowledgeFact) -> Result<(), StoreError> {
        let mut facts = self.facts.lock().await;
        facts.push(fact);
        // On failure the fact stays in memory; the next successful append
        // rewrites the whole file.
        write_json_atomic(&self.path, &*facts).await
    }

    async fn all(&self) -> Result<Vec<KnowledgeFact>, StoreError> {
        Ok(self.facts.lock().await.clone())
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(io_error(path, &error)),
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }

    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|error| StoreError::Serialization(format!("{}: {error}", path.display())))
}

/// Writes to a sibling temp file and renames it over the target, so readers
/// never observe a half-written document.
async fn write_json_atomic<T>(path: &Path, value: &T) -> Result<(), StoreError>
where
    T: Serialize + ?Sized,
{
    let body = serde_json::to_vec_pretty(value)
        .map_err(|error| StoreError::Serialization(error.to_string()))?;

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(|error| io_error(parent, &error))?;
    }

    let mut temp_name = path.file_name().map(|name| name.to_os_string()).unwrap_or_default();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);

    tokio::fs::write(&temp_path, &body).await.map_err(|error| io_error(&temp_path, &error))?;
    if let Err(error) = tokio::fs::rename(&temp_path, path).await {
        warn!(
            event_name = "storage.file.rename_failed",
            path = %path.display(),
            error = %error,
            "previous file contents kept"
        );
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(io_error(path, &error));
    }
    Ok(())
}

/// Renames `path` to `<name>.corrupt-<timestamp>`. Returns the new location,
/// or `None` when there was nothing to move.
async fn quarantine_file(path: &Path) -> Result<Option<PathBuf>, StoreError> {
    let mut target_name = path.file_name().map(|name| name.to_os_string()).unwrap_or_default();
    target_name.push(format!(".corrupt-{}", Utc::now().format("%Y%m%d%H%M%S")));
    let target = path.with_file_name(target_name);

    match tokio::fs::rename(path, &target).await {
        Ok(()) => {
            warn!(
                event_name = "storage.file.quarantined",
                path = %path.display(),
                moved_to = %target.display(),
                "unreadable store file moved aside"
            );
            Ok(Some(target))
        }
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(io_error(path, &error)),
    }
}

fn io_error(path: &Path, error: &std::io::Error) -> StoreError {
    StoreError::Io { path: path.to_path_buf(), message: error.to_string() }
}

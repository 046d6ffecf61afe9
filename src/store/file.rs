//! JSON file backed store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{KeyValueStore, StoreError};

/// Store persisted as a single JSON object on disk.
///
/// Every write replaces the file through a sibling temporary file and a
/// rename, so a crash leaves either the old or the new document.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, Value>>,
}

impl JsonFileStore {
    /// Opens the store at `path`, loading existing content if the file exists.
    ///
    /// A file that is not a JSON object is renamed to `<name>.corrupt` and
    /// the store starts empty.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file exists but cannot be read.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => HashMap::new(),
            Ok(bytes) => match parse_document(&path, &bytes) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(error = %e, "state file is unreadable; starting empty");
                    set_aside(&path).await;
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        debug!(path = %path.display(), keys = entries.len(), "state file opened");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self, entries: &HashMap<String, Value>) -> Result<(), StoreError> {
        let document: Map<String, Value> = entries
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let bytes = serde_json::to_vec_pretty(&Value::Object(document))?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StoreError::io(&self.path, e))
    }
}

/// Path a corrupt state file is moved to.
fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".corrupt");
    PathBuf::from(name)
}

async fn set_aside(path: &Path) {
    let target = corrupt_path(path);
    match tokio::fs::rename(path, &target).await {
        Ok(()) => warn!(kept = %target.display(), "corrupt state file moved aside"),
        Err(e) => warn!(path = %path.display(), error = %e, "corrupt state file could not be moved aside"),
    }
}

fn parse_document(path: &Path, bytes: &[u8]) -> Result<HashMap<String, Value>, StoreError> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => Ok(map.into_iter().collect()),
        Ok(other) => Err(StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("expected a JSON object, found {other}"),
        }),
        Err(e) => Err(StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>, StoreError> {
        let entries = self.entries.lock().await;
        Ok(keys
            .iter()
            .filter_map(|key| entries.get(*key).map(|value| ((*key).to_string(), value.clone())))
            .collect())
    }

    async fn set(&self, values: HashMap<String, Value>) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        let mut next = entries.clone();
        next.extend(values);
        self.flush(&next).await?;
        *entries = next;
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        if !keys.iter().any(|key| entries.contains_key(*key)) {
            return Ok(());
        }
        let mut next = entries.clone();
        for key in keys {
            next.remove(*key);
        }
        self.flush(&next).await?;
        *entries = next;
        Ok(())
    }
}

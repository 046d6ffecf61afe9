//! Destinations for bytes obtained by in-process strategies.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tracing::debug;

use super::StrategyError;
use crate::filename::resolve_unique_path;

/// A file being written chunk by chunk.
///
/// End it with [`PartialArtifact::finish`] to keep the file or
/// [`PartialArtifact::discard`] to delete it.
#[derive(Debug)]
pub struct PartialArtifact {
    path: PathBuf,
    writer: BufWriter<File>,
    written: u64,
}

impl PartialArtifact {
    /// Wraps a freshly created file.
    #[must_use]
    pub fn new(path: PathBuf, file: File) -> Self {
        Self {
            path,
            writer: BufWriter::new(file),
            written: 0,
        }
    }

    /// Target path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written so far.
    #[must_use]
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Appends `chunk`.
    ///
    /// # Errors
    ///
    /// [`StrategyError::Save`] on IO failure.
    pub async fn write(&mut self, chunk: &[u8]) -> Result<(), StrategyError> {
        self.writer
            .write_all(chunk)
            .await
            .map_err(|e| save_error(&self.path, &e))?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Flushes and keeps the file.
    ///
    /// # Errors
    ///
    /// [`StrategyError::Save`] if the flush fails; the file is removed.
    pub async fn finish(mut self) -> Result<PathBuf, StrategyError> {
        if let Err(e) = self.writer.flush().await {
            let error = save_error(&self.path, &e);
            self.discard().await;
            return Err(error);
        }
        debug!(path = %self.path.display(), bytes = self.written, "artifact saved");
        Ok(self.path)
    }

    /// Deletes the partial file.
    pub async fn discard(self) {
        drop(self.writer);
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            debug!(path = %self.path.display(), error = %e, "partial artifact not removed");
        }
    }
}

fn save_error(path: &Path, error: &std::io::Error) -> StrategyError {
    StrategyError::Save {
        filename: path
            .file_name()
            .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned()),
        reason: error.to_string(),
    }
}

/// Writes an acquired artifact somewhere durable.
#[async_trait]
pub trait SaveSink: Send + Sync {
    /// Creates an empty file under a name derived from `filename`.
    async fn create(&self, filename: &str) -> Result<PartialArtifact, StrategyError>;

    /// Saves `bytes` in one go and returns the path.
    async fn save(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf, StrategyError> {
        let mut artifact = self.create(filename).await?;
        if let Err(e) = artifact.write(bytes).await {
            artifact.discard().await;
            return Err(e);
        }
        artifact.finish().await
    }
}

/// Saves into a directory, picking a fresh name on collision.
#[derive(Debug)]
pub struct DirectorySink {
    dir: PathBuf,
    // Serializes name resolution and file creation.
    lock: Mutex<()>,
}

impl DirectorySink {
    /// Creates a sink writing into `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    /// Target directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl SaveSink for DirectorySink {
    async fn create(&self, filename: &str) -> Result<PartialArtifact, StrategyError> {
        let create_error = |e: std::io::Error| StrategyError::Save {
            filename: filename.to_string(),
            reason: e.to_string(),
        };

        let _guard = self.lock.lock().await;
        tokio::fs::create_dir_all(&self.dir).await.map_err(create_error)?;
        let path = resolve_unique_path(&self.dir, filename);
        let file = File::create(&path).await.map_err(create_error)?;
        Ok(PartialArtifact::new(path, file))
    }
}

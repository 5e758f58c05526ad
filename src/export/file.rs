//! Filesystem output sink
//!
//! Writes each saved window to `<dir>/recording-<millis>.<ext>`. The bytes go
//! to a temporary file in the same directory first and are renamed into
//! place, so a crash mid-write never leaves a truncated recording behind.

use super::types::{ExportError, ExportReceipt, ExportedFile, OutputSink};
use async_trait::async_trait;
use chrono::Utc;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Saves recordings into a directory
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn write(dir: &Path, file: &ExportedFile) -> Result<ExportReceipt, ExportError> {
        if file.segments().is_empty() {
            return Err(ExportError::Empty);
        }

        std::fs::create_dir_all(dir)?;
        let path = dir.join(file.file_name());

        let mut tmp = NamedTempFile::new_in(dir)?;
        for segment in file.segments() {
            tmp.write_all(segment.data())?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| ExportError::Persist {
            path: path.clone(),
            source: e.error,
        })?;

        tracing::info!(
            "Saved {} ({} segments, {} bytes)",
            path.display(),
            file.segments().len(),
            file.byte_len()
        );

        Ok(ExportReceipt {
            path: Some(path),
            byte_count: file.byte_len(),
            segment_count: file.segments().len(),
            saved_at: Utc::now(),
        })
    }
}

#[async_trait]
impl OutputSink for FileSink {
    async fn export(&self, file: ExportedFile) -> Result<ExportReceipt, ExportError> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || Self::write(&dir, &file))
            .await
            .map_err(|e| ExportError::Task(e.to_string()))?
    }
}

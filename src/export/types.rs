//! Export types
//!
//! The hand-off between a save and whatever persists the footage: the
//! immutable exported file, the sink trait, and receipts/errors.

use crate::recorder::stream::Segment;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Container a codec configuration produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    Webm,
    Matroska,
    Mp4,
}

impl ContainerFormat {
    /// Derive the container from a `mime;codecs=...` configuration string
    pub fn from_codec(codec: &str) -> Option<Self> {
        let mime = codec.split(';').next()?.trim().to_ascii_lowercase();
        match mime.as_str() {
            "video/webm" => Some(ContainerFormat::Webm),
            "video/x-matroska" | "video/matroska" => Some(ContainerFormat::Matroska),
            "video/mp4" => Some(ContainerFormat::Mp4),
            _ => None,
        }
    }

    /// Get the file extension for this container
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Webm => "webm",
            ContainerFormat::Matroska => "mkv",
            ContainerFormat::Mp4 => "mp4",
        }
    }

    /// FFmpeg muxer name
    pub fn muxer(&self) -> &'static str {
        match self {
            ContainerFormat::Webm => "webm",
            ContainerFormat::Matroska => "matroska",
            ContainerFormat::Mp4 => "mp4",
        }
    }
}

/// Name offered to the sink for a save made at `at`
pub fn suggested_name(at: DateTime<Utc>) -> String {
    format!("recording-{}", at.timestamp_millis())
}

/// A saved buffer window, frozen at the moment of the save
#[derive(Debug, Clone)]
pub struct ExportedFile {
    segments: Vec<Segment>,
    suggested_name: String,
    container: ContainerFormat,
}

impl ExportedFile {
    pub fn new(segments: Vec<Segment>, suggested_name: String, container: ContainerFormat) -> Self {
        Self {
            segments,
            suggested_name,
            container,
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn suggested_name(&self) -> &str {
        &self.suggested_name
    }

    /// Suggested name with the container's extension
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.suggested_name, self.container.extension())
    }

    pub fn byte_len(&self) -> usize {
        self.segments.iter().map(Segment::size).sum()
    }

    /// All segment payloads, in arrival order, as one buffer
    pub fn concat(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.byte_len());
        for segment in &self.segments {
            bytes.extend_from_slice(segment.data());
        }
        bytes
    }
}

/// What a sink reports after persisting a file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportReceipt {
    /// Where the file ended up, if the sink writes to disk
    pub path: Option<PathBuf>,
    pub byte_count: usize,
    pub segment_count: usize,
    pub saved_at: DateTime<Utc>,
}

/// Export errors
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to persist {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Nothing to export")]
    Empty,

    #[error("Export task failed: {0}")]
    Task(String),
}

/// Persists saved footage
#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn export(&self, file: ExportedFile) -> Result<ExportReceipt, ExportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tokio::time::Instant;

    #[test]
    fn test_container_from_codec() {
        assert_eq!(
            ContainerFormat::from_codec("video/webm;codecs=vp8,opus"),
            Some(ContainerFormat::Webm)
        );
        assert_eq!(
            ContainerFormat::from_codec("video/x-matroska;codecs=avc1,opus"),
            Some(ContainerFormat::Matroska)
        );
        assert_eq!(ContainerFormat::from_codec("audio/ogg"), None);
    }

    #[test]
    fn test_suggested_name_uses_epoch_millis() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(suggested_name(at), "recording-1700000000123");
    }

    #[test]
    fn test_concat_preserves_arrival_order() {
        let now = Instant::now();
        let file = ExportedFile::new(
            vec![
                Segment::new(0, 1, now, b"ab".to_vec()),
                Segment::new(1, 1, now, b"cd".to_vec()),
                Segment::new(2, 1, now, b"e".to_vec()),
            ],
            "recording-1".to_string(),
            ContainerFormat::Webm,
        );
        assert_eq!(file.concat(), b"abcde".to_vec());
        assert_eq!(file.byte_len(), 5);
        assert_eq!(file.file_name(), "recording-1.webm");
    }
}

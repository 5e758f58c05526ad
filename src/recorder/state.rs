//! Recorder state management
//!
//! Defines the rolling-buffer state machine and the status/outcome types
//! reported to callers.

use crate::capture::SourceDescriptor;
use crate::recorder::stream::StreamState;
use serde::{Deserialize, Serialize};

/// Current state of the rolling buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderState {
    /// No source has been attached yet
    Uninitialized,
    /// Encoder running, segments accumulating
    Buffering,
    /// A save stopped the encoder; waiting out the grace delay before resuming
    Resuming,
    /// The encoder could not be started or died; needs a new source
    Failed,
    /// Session torn down, nothing will run again
    TornDown,
}

impl Default for RecorderState {
    fn default() -> Self {
        Self::Uninitialized
    }
}

/// Snapshot of the recorder for the frontend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderStatus {
    pub state: RecorderState,

    /// Generation of the current encoder session
    pub generation: u64,

    /// Segments in the current window
    pub segment_count: usize,

    /// Total bytes in the current window
    pub buffered_bytes: usize,

    /// Age of the current window, clamped to the retention limit
    pub elapsed_secs: u64,

    /// State of the encoder session, if one exists
    pub stream_state: Option<StreamState>,

    /// The bound capture source, if any
    pub source: Option<SourceDescriptor>,
}

/// Why a save request did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    /// No encoder session is buffering
    NoSession,
    /// The window has no segments yet
    EmptyBuffer,
    /// A previous save is still inside its restart grace delay
    Resuming,
}

/// Result of a save request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SaveOutcome {
    /// Snapshot handed to the output sink
    #[serde(rename_all = "camelCase")]
    Started {
        suggested_name: String,
        segment_count: usize,
        byte_count: usize,
    },
    /// Nothing to save
    Skipped { reason: SkipReason },
}

impl SaveOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, SaveOutcome::Started { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_outcome_serializes_with_status_tag() {
        let outcome = SaveOutcome::Started {
            suggested_name: "recording-1700000000000".to_string(),
            segment_count: 30,
            byte_count: 4096,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "started");
        assert_eq!(json["segmentCount"], 30);

        let skipped = SaveOutcome::Skipped {
            reason: SkipReason::EmptyBuffer,
        };
        let json = serde_json::to_value(&skipped).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "emptyBuffer");
    }
}

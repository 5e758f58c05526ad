//! Segment-producing encoder sessions
//!
//! A [`SegmentStream`] wraps a live capture source in an encoder that emits
//! opaque container chunks at a fixed cadence. Every call to `start` begins a
//! fresh encoding context, so segments are only concatenation-compatible with
//! other segments of the same generation.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Lifecycle of a single encoder session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Idle,
    Recording,
    Stopped,
}

impl Default for StreamState {
    fn default() -> Self {
        Self::Idle
    }
}

/// Encoder session errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("Unsupported codec configuration: {0}")]
    UnsupportedCodec(String),

    #[error("None of the configured codecs are supported")]
    NoSupportedCodec,

    #[error("Encoder failed to start: {0}")]
    Start(String),

    #[error("Encoder session is already recording")]
    AlreadyRecording,
}

/// One encoded chunk as held by the rolling buffer
///
/// The payload is reference counted so snapshots are shallow copies.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Position in arrival order across the whole recorder lifetime
    pub sequence: u64,
    /// Encoder generation that produced this chunk
    pub generation: u64,
    /// When the chunk reached the buffer
    pub arrived_at: Instant,
    data: Arc<[u8]>,
}

impl Segment {
    pub fn new(sequence: u64, generation: u64, arrived_at: Instant, data: Vec<u8>) -> Self {
        Self {
            sequence,
            generation,
            arrived_at,
            data: data.into(),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Message from an encoder session back to the recorder
#[derive(Debug)]
pub enum StreamEvent {
    /// A chunk of encoded output
    Segment { generation: u64, data: Vec<u8> },
    /// The encoder died on its own
    Failed { generation: u64, reason: String },
}

impl StreamEvent {
    pub fn generation(&self) -> u64 {
        match self {
            StreamEvent::Segment { generation, .. } | StreamEvent::Failed { generation, .. } => {
                *generation
            }
        }
    }
}

/// Where an encoder session delivers its output
///
/// Each sink is stamped with the generation of the session it was handed to,
/// so the recorder can drop anything a superseded session still emits.
#[derive(Debug, Clone)]
pub struct SegmentSink {
    generation: u64,
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl SegmentSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<StreamEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Deliver a chunk. Returns false once the recorder has gone away.
    pub fn push(&self, data: Vec<u8>) -> bool {
        self.tx
            .send(StreamEvent::Segment {
                generation: self.generation,
                data,
            })
            .is_ok()
    }

    /// Report that the encoder stopped unexpectedly
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.tx
            .send(StreamEvent::Failed {
                generation: self.generation,
                reason: reason.into(),
            })
            .is_ok()
    }
}

/// An encoder bound to one capture source
///
/// `start` and `stop` must not block: implementations hand the actual work to
/// background tasks and report output through the [`SegmentSink`].
pub trait SegmentStream: Send {
    /// Begin a fresh encoding context that emits through `sink` every `cadence`
    fn start(&mut self, cadence: Duration, sink: SegmentSink) -> Result<(), StreamError>;

    /// Stop the current encoding context. Output still in flight may arrive
    /// afterwards, tagged with the old generation.
    fn stop(&mut self);

    fn state(&self) -> StreamState;

    /// Codec configuration this session was opened with
    fn codec(&self) -> &str;

    fn is_recording(&self) -> bool {
        self.state() == StreamState::Recording
    }
}

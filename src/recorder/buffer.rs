//! Rolling buffer
//!
//! Holds the segments of the current retention window and owns the encoder
//! session that produces them. Encoded output cannot be trimmed from the
//! front without breaking the container, so the window is bounded by throwing
//! the whole encoding context away and starting a fresh one once it grows
//! older than the retention limit.
//!
//! Retention is only evaluated when a segment arrives, so the window may
//! overshoot the limit by up to one cadence.

use super::config::BufferConfig;
use super::state::RecorderState;
use super::stream::{Segment, SegmentSink, SegmentStream, StreamError, StreamEvent, StreamState};
use crate::capture::CaptureSource;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// What happened to an arriving segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentOutcome {
    /// Added to the window, which now holds `count` segments
    Appended { count: usize },
    /// The window was too old; `discarded` segments (including this one)
    /// were dropped and the encoder restarted as `generation`
    WindowReset { discarded: usize, generation: u64 },
    /// Empty payload
    Ignored,
    /// Produced by a session that has since been replaced or stopped
    Stale,
}

pub struct RollingBuffer {
    config: BufferConfig,
    state: RecorderState,
    segments: Vec<Segment>,
    window_start: Option<Instant>,
    generation: u64,
    next_sequence: u64,
    stream: Option<Box<dyn SegmentStream>>,
    events_tx: mpsc::UnboundedSender<StreamEvent>,
}

impl RollingBuffer {
    /// Encoder sessions started by this buffer report through `events_tx`
    pub fn new(config: BufferConfig, events_tx: mpsc::UnboundedSender<StreamEvent>) -> Self {
        Self {
            config,
            state: RecorderState::Uninitialized,
            segments: Vec::new(),
            window_start: None,
            generation: 0,
            next_sequence: 0,
            stream: None,
            events_tx,
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn window_start(&self) -> Option<Instant> {
        self.window_start
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.segments.iter().map(Segment::size).sum()
    }

    pub fn stream_state(&self) -> Option<StreamState> {
        self.stream.as_ref().map(|s| s.state())
    }

    /// Codec of the current encoder session
    pub fn codec(&self) -> Option<&str> {
        self.stream.as_ref().map(|s| s.codec())
    }

    /// Age of the current window
    pub fn elapsed(&self, now: Instant) -> Duration {
        self.window_start
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or_default()
    }

    /// Begin buffering from `source`, replacing any running session
    pub fn start(&mut self, source: &dyn CaptureSource, now: Instant) -> Result<u64, StreamError> {
        self.stop_stream();
        self.stream = None;
        self.segments.clear();
        self.window_start = Some(now);
        self.generation += 1;

        let stream = match self.open_stream(source) {
            Ok(stream) => stream,
            Err(e) => {
                self.state = RecorderState::Failed;
                return Err(e);
            }
        };
        self.stream = Some(stream);
        self.start_stream()?;

        self.state = RecorderState::Buffering;
        tracing::debug!("Buffer started, generation {}", self.generation);
        Ok(self.generation)
    }

    /// Accept a segment and enforce retention
    pub fn on_segment_arrived(
        &mut self,
        generation: u64,
        data: Vec<u8>,
        now: Instant,
    ) -> Result<SegmentOutcome, StreamError> {
        if generation != self.generation || self.state != RecorderState::Buffering {
            return Ok(SegmentOutcome::Stale);
        }
        if data.is_empty() {
            return Ok(SegmentOutcome::Ignored);
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.segments.push(Segment::new(sequence, generation, now, data));

        if self.elapsed(now) > self.config.retention() {
            let discarded = self.segments.len();
            self.window_reset(now)?;
            return Ok(SegmentOutcome::WindowReset {
                discarded,
                generation: self.generation,
            });
        }

        Ok(SegmentOutcome::Appended {
            count: self.segments.len(),
        })
    }

    /// Point-in-time copy of the window. Payloads are shared, never copied.
    pub fn snapshot(&self) -> Vec<Segment> {
        self.segments.clone()
    }

    /// Stop the encoder ahead of a save's restart delay
    ///
    /// Returns the token the deferred resume must present; anything that
    /// replaces the session in the meantime invalidates it.
    pub fn suspend_for_save(&mut self) -> u64 {
        self.stop_stream();
        self.generation += 1;
        self.state = RecorderState::Resuming;
        self.generation
    }

    pub fn is_pending_resume(&self, token: u64) -> bool {
        self.state == RecorderState::Resuming && self.generation == token
    }

    /// Start a fresh window on the existing session after a save
    pub fn reset_after_save(&mut self, now: Instant) -> Result<(), StreamError> {
        self.segments.clear();
        self.window_start = Some(now);

        let needs_start = self
            .stream
            .as_ref()
            .map(|s| !s.is_recording())
            .unwrap_or(false);
        if needs_start {
            self.start_stream()?;
        }

        self.state = RecorderState::Buffering;
        Ok(())
    }

    /// Record that the session of `generation` died. False if it was stale.
    pub fn mark_failed(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.state != RecorderState::Buffering {
            return false;
        }
        self.stop_stream();
        self.state = RecorderState::Failed;
        true
    }

    /// Stop the encoder for good
    pub fn teardown(&mut self) {
        self.stop_stream();
        self.stream = None;
        self.segments.clear();
        self.generation += 1;
        self.state = RecorderState::TornDown;
    }

    fn window_reset(&mut self, now: Instant) -> Result<(), StreamError> {
        self.segments.clear();
        self.window_start = Some(now);
        self.stop_stream();
        self.generation += 1;
        self.start_stream()
    }

    /// Open an encoder, walking the codec preference list
    fn open_stream(&self, source: &dyn CaptureSource) -> Result<Box<dyn SegmentStream>, StreamError> {
        for codec in self.config.codec_preferences() {
            match source.open_stream(codec) {
                Ok(stream) => {
                    tracing::info!("Opened encoder session with codec {}", codec);
                    return Ok(stream);
                }
                Err(StreamError::UnsupportedCodec(_)) => {
                    tracing::warn!("Codec {} not supported, trying next", codec);
                }
                Err(e) => return Err(e),
            }
        }
        Err(StreamError::NoSupportedCodec)
    }

    fn start_stream(&mut self) -> Result<(), StreamError> {
        let sink = SegmentSink::new(self.generation, self.events_tx.clone());
        let cadence = self.config.cadence();
        let result = match self.stream.as_mut() {
            Some(stream) => stream.start(cadence, sink),
            None => Err(StreamError::Start("no encoder session".to_string())),
        };
        if result.is_err() {
            self.state = RecorderState::Failed;
        }
        result
    }

    fn stop_stream(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            if stream.is_recording() {
                stream.stop();
            }
        }
    }
}

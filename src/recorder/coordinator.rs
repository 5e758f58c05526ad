//! Recording coordinator
//!
//! Owns the rolling buffer and processes everything that touches it, one
//! event at a time: encoder output, save requests, deferred restarts after a
//! save, and the elapsed-time tick. Each handler runs to completion before the
//! next event is looked at, so a save always snapshots a consistent window.

use super::buffer::{RollingBuffer, SegmentOutcome};
use super::config::BufferConfig;
use super::elapsed::{elapsed_secs, ElapsedTimePublisher};
use super::state::{RecorderState, RecorderStatus, SaveOutcome, SkipReason};
use super::stream::{StreamError, StreamEvent};
use crate::capture::CaptureSource;
use crate::export::{suggested_name, ContainerFormat, ExportReceipt, ExportedFile, OutputSink};
use crate::utils::error::{AppError, AppResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

/// Events emitted during recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RecordingEvent {
    /// Buffering began on a new source
    Started { generation: u64 },
    /// The window outgrew the retention limit and was restarted
    WindowReset { generation: u64, discarded: usize },
    /// A snapshot was handed to the output sink
    #[serde(rename_all = "camelCase")]
    SaveStarted {
        suggested_name: String,
        segment_count: usize,
    },
    /// The output sink finished persisting a snapshot
    Saved { receipt: ExportReceipt },
    /// Buffering continues after a save
    Resumed { generation: u64 },
    /// Error occurred
    Error { message: String },
    /// Session torn down
    TornDown,
}

enum Command {
    Attach {
        source: Box<dyn CaptureSource>,
        reply: oneshot::Sender<Result<u64, StreamError>>,
    },
    Save {
        reply: oneshot::Sender<SaveOutcome>,
    },
    Status {
        reply: oneshot::Sender<RecorderStatus>,
    },
    Teardown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable front door to a running coordinator
#[derive(Clone)]
pub struct RecorderHandle {
    commands: mpsc::Sender<Command>,
    elapsed: watch::Receiver<u64>,
    events: broadcast::Sender<RecordingEvent>,
}

impl RecorderHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> AppResult<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| AppError::RecorderUnavailable)?;
        rx.await.map_err(|_| AppError::RecorderUnavailable)
    }

    /// Hand a freshly acquired source to the buffer; returns the new generation
    pub async fn attach(&self, source: Box<dyn CaptureSource>) -> AppResult<u64> {
        let generation = self
            .request(|reply| Command::Attach { source, reply })
            .await??;
        Ok(generation)
    }

    /// Export the current window. Returns as soon as the snapshot is handed
    /// off; persistence finishes in the background.
    pub async fn save(&self) -> AppResult<SaveOutcome> {
        self.request(|reply| Command::Save { reply }).await
    }

    pub async fn status(&self) -> AppResult<RecorderStatus> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Stop tracks, encoder and tick. A no-op if already torn down.
    pub async fn teardown(&self) -> AppResult<()> {
        match self.request(|reply| Command::Teardown { reply }).await {
            Ok(()) | Err(AppError::RecorderUnavailable) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Elapsed seconds of the current window, updated every tick
    pub fn elapsed(&self) -> watch::Receiver<u64> {
        self.elapsed.clone()
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.events.subscribe()
    }
}

/// Single owner of the buffer state
pub struct RecordingCoordinator {
    config: BufferConfig,
    buffer: RollingBuffer,
    elapsed: ElapsedTimePublisher,
    source: Option<Box<dyn CaptureSource>>,
    sink: Arc<dyn OutputSink>,
    commands: mpsc::Receiver<Command>,
    stream_rx: mpsc::UnboundedReceiver<StreamEvent>,
    resume_tx: mpsc::UnboundedSender<u64>,
    resume_rx: mpsc::UnboundedReceiver<u64>,
    event_tx: broadcast::Sender<RecordingEvent>,
}

impl RecordingCoordinator {
    /// Spawn a coordinator task. It runs until torn down or until every
    /// handle is dropped.
    pub fn spawn(config: BufferConfig, sink: Arc<dyn OutputSink>) -> (RecorderHandle, JoinHandle<()>) {
        let (command_tx, commands) = mpsc::channel(32);
        let (stream_tx, stream_rx) = mpsc::unbounded_channel();
        let (resume_tx, resume_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));

        let elapsed = ElapsedTimePublisher::new(config.cadence(), config.retention_secs());
        let handle = RecorderHandle {
            commands: command_tx,
            elapsed: elapsed.subscribe(),
            events: event_tx.clone(),
        };

        let coordinator = Self {
            buffer: RollingBuffer::new(config.clone(), stream_tx),
            config,
            elapsed,
            source: None,
            sink,
            commands,
            stream_rx,
            resume_tx,
            resume_rx,
            event_tx,
        };

        let session = Uuid::new_v4();
        let task = tokio::spawn(
            coordinator
                .run()
                .instrument(tracing::info_span!("recorder", %session)),
        );
        (handle, task)
    }

    async fn run(mut self) {
        tracing::info!(
            "Recorder running: retention {}ms, cadence {}ms",
            self.config.retention_window_ms,
            self.config.segment_cadence_ms
        );

        loop {
            tokio::select! {
                biased;

                Some(event) = self.stream_rx.recv() => self.handle_stream_event(event),
                Some(token) = self.resume_rx.recv() => self.resume_after_save(token),
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if self.handle_command(command) {
                            break;
                        }
                    }
                    None => {
                        tracing::debug!("All recorder handles dropped");
                        self.teardown();
                        break;
                    }
                },
                _ = self.elapsed.tick() => {
                    self.elapsed.publish(self.buffer.window_start(), Instant::now());
                }
            }
        }

        tracing::info!("Recorder stopped");
    }

    /// Returns true once the recorder should exit
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Attach { source, reply } => {
                let _ = reply.send(self.attach(source));
            }
            Command::Save { reply } => {
                let _ = reply.send(self.save());
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::Teardown { reply } => {
                self.teardown();
                let _ = reply.send(());
                return true;
            }
        }
        false
    }

    fn attach(&mut self, source: Box<dyn CaptureSource>) -> Result<u64, StreamError> {
        let now = Instant::now();
        let result = self.buffer.start(source.as_ref(), now);

        // The old encoder is stopped by now; release its devices
        if let Some(mut previous) = self.source.replace(source) {
            tracing::info!("Releasing previous source '{}'", previous.descriptor().label);
            previous.stop_tracks();
        }

        match &result {
            Ok(generation) => {
                self.elapsed.arm(now);
                tracing::info!("Background recording started (generation {})", generation);
                let _ = self.event_tx.send(RecordingEvent::Started {
                    generation: *generation,
                });
            }
            Err(e) => {
                self.elapsed.disarm();
                self.elapsed.publish(None, now);
                tracing::error!("Failed to start background recording: {}", e);
                let _ = self.event_tx.send(RecordingEvent::Error {
                    message: e.to_string(),
                });
            }
        }
        result
    }

    fn handle_stream_event(&mut self, event: StreamEvent) {
        let now = Instant::now();
        match event {
            StreamEvent::Segment { generation, data } => {
                let size = data.len();
                match self.buffer.on_segment_arrived(generation, data, now) {
                    Ok(SegmentOutcome::Appended { count }) => {
                        tracing::trace!("Buffered segment of {} bytes ({} in window)", size, count);
                    }
                    Ok(SegmentOutcome::WindowReset {
                        discarded,
                        generation,
                    }) => {
                        self.elapsed.arm(now);
                        tracing::info!(
                            "Retention window exceeded: discarded {} segments, encoder restarted (generation {})",
                            discarded,
                            generation
                        );
                        let _ = self.event_tx.send(RecordingEvent::WindowReset {
                            generation,
                            discarded,
                        });
                    }
                    Ok(SegmentOutcome::Ignored) => {
                        tracing::debug!("Ignoring empty segment");
                    }
                    Ok(SegmentOutcome::Stale) => {
                        tracing::debug!(
                            "Dropping {} bytes from superseded generation {}",
                            size,
                            generation
                        );
                    }
                    Err(e) => self.fail(format!("Encoder restart failed: {}", e)),
                }
            }
            StreamEvent::Failed { generation, reason } => {
                if self.buffer.mark_failed(generation) {
                    self.fail(format!("Encoder stopped unexpectedly: {}", reason));
                } else {
                    tracing::debug!(
                        "Ignoring failure from superseded generation {}: {}",
                        generation,
                        reason
                    );
                }
            }
        }
    }

    fn save(&mut self) -> SaveOutcome {
        match self.buffer.state() {
            RecorderState::Buffering => {}
            RecorderState::Resuming => {
                tracing::debug!("Save ignored, previous save still resuming");
                return SaveOutcome::Skipped {
                    reason: SkipReason::Resuming,
                };
            }
            _ => {
                return SaveOutcome::Skipped {
                    reason: SkipReason::NoSession,
                }
            }
        }

        let segments = self.buffer.snapshot();
        if segments.is_empty() {
            tracing::debug!("Save ignored, buffer is empty");
            return SaveOutcome::Skipped {
                reason: SkipReason::EmptyBuffer,
            };
        }

        let container = self
            .buffer
            .codec()
            .and_then(ContainerFormat::from_codec)
            .unwrap_or(ContainerFormat::Webm);
        let file = ExportedFile::new(segments, suggested_name(Utc::now()), container);
        let outcome = SaveOutcome::Started {
            suggested_name: file.suggested_name().to_string(),
            segment_count: file.segments().len(),
            byte_count: file.byte_len(),
        };

        tracing::info!(
            "Saving {} ({} segments, {} bytes)",
            file.suggested_name(),
            file.segments().len(),
            file.byte_len()
        );
        let _ = self.event_tx.send(RecordingEvent::SaveStarted {
            suggested_name: file.suggested_name().to_string(),
            segment_count: file.segments().len(),
        });
        self.spawn_export(file);

        let token = self.buffer.suspend_for_save();
        self.schedule_resume(token);
        outcome
    }

    fn spawn_export(&self, file: ExportedFile) {
        let sink = self.sink.clone();
        let events = self.event_tx.clone();
        tokio::spawn(
            async move {
                let name = file.suggested_name().to_string();
                match sink.export(file).await {
                    Ok(receipt) => {
                        let _ = events.send(RecordingEvent::Saved { receipt });
                    }
                    Err(e) => {
                        tracing::error!("Failed to export {}: {}", name, e);
                        let _ = events.send(RecordingEvent::Error {
                            message: format!("Failed to save {}: {}", name, e),
                        });
                    }
                }
            }
            .in_current_span(),
        );
    }

    fn schedule_resume(&mut self, token: u64) {
        let grace = self.config.save_grace();
        if grace.is_zero() {
            self.resume_after_save(token);
            return;
        }

        let resume_tx = self.resume_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = resume_tx.send(token);
        });
    }

    fn resume_after_save(&mut self, token: u64) {
        if !self.buffer.is_pending_resume(token) {
            tracing::debug!("Ignoring stale resume for generation {}", token);
            return;
        }

        let now = Instant::now();
        match self.buffer.reset_after_save(now) {
            Ok(()) => {
                self.elapsed.arm(now);
                tracing::info!("Buffering resumed after save (generation {})", token);
                let _ = self
                    .event_tx
                    .send(RecordingEvent::Resumed { generation: token });
            }
            Err(e) => self.fail(format!("Failed to resume after save: {}", e)),
        }
    }

    fn fail(&mut self, message: String) {
        tracing::error!("{}", message);
        self.elapsed.disarm();
        self.elapsed.publish(None, Instant::now());
        let _ = self.event_tx.send(RecordingEvent::Error { message });
    }

    fn status(&self) -> RecorderStatus {
        let now = Instant::now();
        RecorderStatus {
            state: self.buffer.state(),
            generation: self.buffer.generation(),
            segment_count: self.buffer.len(),
            buffered_bytes: self.buffer.buffered_bytes(),
            elapsed_secs: self
                .buffer
                .window_start()
                .map(|start| elapsed_secs(start, now, self.config.retention_secs()))
                .unwrap_or(0),
            stream_state: self.buffer.stream_state(),
            source: self.source.as_ref().map(|s| s.descriptor()),
        }
    }

    fn teardown(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.stop_tracks();
        }
        self.buffer.teardown();
        self.elapsed.disarm();

        tracing::info!("Capture session torn down");
        let _ = self.event_tx.send(RecordingEvent::TornDown);
    }
}

//! Capture session lifecycle
//!
//! Acquisition and the start of buffering are one step: a source obtained by
//! the acquisition ladder is handed straight to the recorder and bound to the
//! viewfinder once it is buffering.

use super::config::BufferConfig;
use super::coordinator::{RecorderHandle, RecordingCoordinator, RecordingEvent};
use super::state::{RecorderStatus, SaveOutcome};
use crate::capture::{Acquisition, DeviceAcquirer, MediaDevices, SourceDescriptor, Viewfinder};
use crate::export::OutputSink;
use crate::utils::error::{AppError, AppResult};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

pub struct DashcamSession {
    acquirer: DeviceAcquirer,
    viewfinder: Arc<dyn Viewfinder>,
    recorder: RecorderHandle,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DashcamSession {
    /// Spawns the recorder; must be called from within a tokio runtime
    pub fn new(
        config: BufferConfig,
        devices: Arc<dyn MediaDevices>,
        viewfinder: Arc<dyn Viewfinder>,
        sink: Arc<dyn OutputSink>,
    ) -> Self {
        let (recorder, task) = RecordingCoordinator::spawn(config, sink);
        Self {
            acquirer: DeviceAcquirer::new(devices),
            viewfinder,
            recorder,
            task: Mutex::new(Some(task)),
        }
    }

    /// Run the acquisition ladder and start buffering from the result
    ///
    /// On failure the viewfinder is cleared and nothing records. Calling this
    /// again is the manual retry; it starts from the top of the ladder.
    pub async fn acquire(&self) -> AppResult<SourceDescriptor> {
        match self.acquirer.acquire().await {
            Acquisition::Acquired { source, strategy } => {
                let descriptor = source.descriptor();
                tracing::info!("Camera acquired via {}: {}", strategy, descriptor.label);

                if let Err(e) = self.recorder.attach(source).await {
                    tracing::warn!("Could not start buffering from {}: {}", descriptor.label, e);
                    self.viewfinder.clear();
                    return Err(e);
                }
                self.viewfinder.bind(&descriptor);
                Ok(descriptor)
            }
            Acquisition::Failed(failure) => {
                tracing::warn!("No capture source available: {}", failure);
                self.viewfinder.clear();
                Err(AppError::Acquisition(failure))
            }
        }
    }

    pub async fn save(&self) -> AppResult<SaveOutcome> {
        self.recorder.save().await
    }

    pub async fn status(&self) -> AppResult<RecorderStatus> {
        self.recorder.status().await
    }

    pub fn elapsed(&self) -> watch::Receiver<u64> {
        self.recorder.elapsed()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.recorder.subscribe()
    }

    pub fn recorder(&self) -> &RecorderHandle {
        &self.recorder
    }

    /// Release the source, stop the encoder and the tick, and wait for the
    /// recorder to exit
    pub async fn teardown(&self) -> AppResult<()> {
        self.recorder.teardown().await?;
        self.viewfinder.clear();

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!("Recorder task ended abnormally: {}", e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{AcquisitionFailure, FacingMode};
    use crate::recorder::state::RecorderState;
    use crate::recorder::config::DEFAULT_CODEC;
    use crate::recorder::stream::{StreamError, StreamState};
    use crate::test_support::{FakeDevices, MemorySink, RecordingViewfinder};

    fn session(devices: Arc<FakeDevices>) -> (DashcamSession, Arc<RecordingViewfinder>) {
        session_with(BufferConfig::default(), devices)
    }

    fn session_with(
        config: BufferConfig,
        devices: Arc<FakeDevices>,
    ) -> (DashcamSession, Arc<RecordingViewfinder>) {
        let viewfinder = Arc::new(RecordingViewfinder::default());
        let session = DashcamSession::new(
            config,
            devices,
            viewfinder.clone(),
            Arc::new(MemorySink::new()),
        );
        (session, viewfinder)
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_binds_viewfinder_and_starts_buffering() {
        let devices = Arc::new(
            FakeDevices::new().with_camera("Back Camera", Some(FacingMode::Environment)),
        );
        let (session, viewfinder) = session(devices.clone());

        let descriptor = session.acquire().await.unwrap();
        assert_eq!(descriptor.label, "Back Camera");
        assert!(!descriptor.is_generic());
        assert_eq!(viewfinder.bound(), vec![descriptor]);

        let status = session.status().await.unwrap();
        assert_eq!(status.state, RecorderState::Buffering);
        assert_eq!(status.stream_state, Some(StreamState::Recording));
        assert_eq!(devices.open_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_back_to_any_camera() {
        let devices = Arc::new(FakeDevices::new().with_camera("USB Webcam", None));
        let (session, _viewfinder) = session(devices.clone());

        let descriptor = session.acquire().await.unwrap();
        assert_eq!(descriptor.label, "USB Webcam");
        assert!(descriptor.is_generic());
        assert_eq!(devices.open_attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_acquisition_leaves_session_idle() {
        let devices = Arc::new(
            FakeDevices::new()
                .with_camera("USB Webcam", None)
                .deny_with(AcquisitionFailure::PermissionDenied("blocked".to_string())),
        );
        let (session, viewfinder) = session(devices.clone());

        let result = session.acquire().await;
        assert!(matches!(
            result,
            Err(AppError::Acquisition(AcquisitionFailure::PermissionDenied(_)))
        ));
        assert_eq!(devices.open_attempts(), 2);
        assert_eq!(viewfinder.clears(), 1);
        assert!(viewfinder.bound().is_empty());

        let status = session.status().await.unwrap();
        assert_eq!(status.state, RecorderState::Uninitialized);
        assert!(status.source.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_encoder_error_leaves_viewfinder_unbound() {
        let devices = Arc::new(FakeDevices::new().with_camera("USB Webcam", None));
        devices.control().mark_unsupported(DEFAULT_CODEC);
        let config = BufferConfig {
            fallback_codecs: Vec::new(),
            ..BufferConfig::default()
        };
        let (session, viewfinder) = session_with(config, devices.clone());

        let result = session.acquire().await;
        assert!(matches!(
            result,
            Err(AppError::Stream(StreamError::NoSupportedCodec))
        ));
        assert!(viewfinder.bound().is_empty());
        assert_eq!(viewfinder.clears(), 1);

        let status = session.status().await.unwrap();
        assert_eq!(status.state, RecorderState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_retry_restarts_the_ladder() {
        let devices = Arc::new(FakeDevices::new());
        let (session, _viewfinder) = session(devices.clone());
        assert!(session.acquire().await.is_err());
        assert_eq!(devices.open_attempts(), 2);

        devices.add_camera("Rear Camera", Some(FacingMode::Environment));
        let descriptor = session.acquire().await.unwrap();
        assert_eq!(descriptor.label, "Rear Camera");
        assert_eq!(devices.open_attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_releases_source_once() {
        let devices = Arc::new(FakeDevices::new().with_camera("USB Webcam", None));
        let (session, viewfinder) = session(devices.clone());
        session.acquire().await.unwrap();

        session.teardown().await.unwrap();
        assert_eq!(devices.released(), 1);
        assert_eq!(devices.control().state(), StreamState::Stopped);
        assert_eq!(viewfinder.clears(), 1);

        session.teardown().await.unwrap();
        assert_eq!(devices.released(), 1);
        assert!(session.status().await.is_err());
    }
}

//! Scripted devices, encoder sessions and sinks for tests

use crate::capture::{
    AcquisitionFailure, CaptureConstraints, CaptureSource, FacingMode, MediaDevices,
    SourceDescriptor, TrackInfo, TrackKind, Viewfinder,
};
use crate::export::{ExportError, ExportReceipt, ExportedFile, OutputSink};
use crate::recorder::stream::{SegmentSink, SegmentStream, StreamError, StreamState};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct ControlInner {
    state: StreamState,
    sink: Option<SegmentSink>,
    starts: usize,
    stops: usize,
    fail_start: bool,
    unsupported: Vec<String>,
    opened_codecs: Vec<String>,
}

/// Test-side remote for every fake encoder session opened from one device set
#[derive(Clone, Default)]
pub struct StreamControl {
    inner: Arc<Mutex<ControlInner>>,
}

impl StreamControl {
    /// Emit a chunk from the running session. False if nothing is recording.
    pub fn emit(&self, data: Vec<u8>) -> bool {
        let inner = self.inner.lock();
        match (&inner.state, &inner.sink) {
            (StreamState::Recording, Some(sink)) => sink.push(data),
            _ => false,
        }
    }

    /// Report an encoder crash from the running session
    pub fn fail(&self, reason: &str) -> bool {
        let inner = self.inner.lock();
        match &inner.sink {
            Some(sink) => sink.fail(reason),
            None => false,
        }
    }

    /// The sink handed to the most recent `start`
    pub fn current_sink(&self) -> Option<SegmentSink> {
        self.inner.lock().sink.clone()
    }

    pub fn state(&self) -> StreamState {
        self.inner.lock().state
    }

    pub fn starts(&self) -> usize {
        self.inner.lock().starts
    }

    pub fn stops(&self) -> usize {
        self.inner.lock().stops
    }

    /// Every codec an encoder session was requested with, in order
    pub fn opened_codecs(&self) -> Vec<String> {
        self.inner.lock().opened_codecs.clone()
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.inner.lock().fail_start = fail;
    }

    pub fn mark_unsupported(&self, codec: &str) {
        self.inner.lock().unsupported.push(codec.to_string());
    }
}

pub struct FakeStream {
    control: StreamControl,
    codec: String,
}

impl SegmentStream for FakeStream {
    fn start(&mut self, _cadence: Duration, sink: SegmentSink) -> Result<(), StreamError> {
        let mut inner = self.control.inner.lock();
        if inner.fail_start {
            return Err(StreamError::Start("scripted start failure".to_string()));
        }
        if inner.state == StreamState::Recording {
            return Err(StreamError::AlreadyRecording);
        }
        inner.state = StreamState::Recording;
        inner.sink = Some(sink);
        inner.starts += 1;
        Ok(())
    }

    fn stop(&mut self) {
        let mut inner = self.control.inner.lock();
        if inner.state == StreamState::Recording {
            inner.state = StreamState::Stopped;
            inner.stops += 1;
        }
    }

    fn state(&self) -> StreamState {
        self.control.inner.lock().state
    }

    fn codec(&self) -> &str {
        &self.codec
    }
}

pub struct FakeSource {
    descriptor: SourceDescriptor,
    control: StreamControl,
    released: Arc<AtomicUsize>,
}

impl CaptureSource for FakeSource {
    fn descriptor(&self) -> SourceDescriptor {
        self.descriptor.clone()
    }

    fn open_stream(&self, codec: &str) -> Result<Box<dyn SegmentStream>, StreamError> {
        let mut inner = self.control.inner.lock();
        inner.opened_codecs.push(codec.to_string());
        if inner.unsupported.iter().any(|c| c == codec) {
            return Err(StreamError::UnsupportedCodec(codec.to_string()));
        }
        Ok(Box::new(FakeStream {
            control: self.control.clone(),
            codec: codec.to_string(),
        }))
    }

    fn stop_tracks(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Camera set with scriptable outcomes
#[derive(Default)]
pub struct FakeDevices {
    cameras: Mutex<Vec<(String, Option<FacingMode>)>>,
    deny: Mutex<Option<AcquisitionFailure>>,
    attempts: AtomicUsize,
    released: Arc<AtomicUsize>,
    control: StreamControl,
}

impl FakeDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_camera(self, name: &str, facing: Option<FacingMode>) -> Self {
        self.add_camera(name, facing);
        self
    }

    pub fn deny_with(self, failure: AcquisitionFailure) -> Self {
        *self.deny.lock() = Some(failure);
        self
    }

    pub fn add_camera(&self, name: &str, facing: Option<FacingMode>) {
        self.cameras.lock().push((name.to_string(), facing));
    }

    pub fn allow(&self) {
        *self.deny.lock() = None;
    }

    pub fn open_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// How many times any source's tracks were stopped
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn control(&self) -> StreamControl {
        self.control.clone()
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn open(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn CaptureSource>, AcquisitionFailure> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = self.deny.lock().clone() {
            return Err(failure);
        }

        let cameras = self.cameras.lock();
        let camera = match constraints.facing {
            Some(facing) => cameras.iter().find(|(_, f)| *f == Some(facing)),
            None => cameras.first(),
        };
        let (name, _) = camera
            .ok_or_else(|| AcquisitionFailure::NotFound("no matching camera".to_string()))?;

        let mut tracks = vec![TrackInfo {
            kind: TrackKind::Video,
            label: name.clone(),
        }];
        if constraints.audio {
            tracks.push(TrackInfo {
                kind: TrackKind::Audio,
                label: "Fake Microphone".to_string(),
            });
        }

        Ok(Box::new(FakeSource {
            descriptor: SourceDescriptor {
                label: name.clone(),
                tracks,
                constraints: constraints.clone(),
            },
            control: self.control.clone(),
            released: self.released.clone(),
        }))
    }
}

/// Output sink that keeps every export in memory
#[derive(Default)]
pub struct MemorySink {
    exports: Mutex<Vec<ExportedFile>>,
    failing: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            exports: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    pub fn exports(&self) -> Vec<ExportedFile> {
        self.exports.lock().clone()
    }

    /// Wait until at least `count` exports arrived
    pub async fn wait_for(&self, count: usize) -> Vec<ExportedFile> {
        for _ in 0..100 {
            if self.exports.lock().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        self.exports()
    }
}

#[async_trait]
impl OutputSink for MemorySink {
    async fn export(&self, file: ExportedFile) -> Result<ExportReceipt, ExportError> {
        if self.failing {
            return Err(ExportError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        let receipt = ExportReceipt {
            path: None,
            byte_count: file.byte_len(),
            segment_count: file.segments().len(),
            saved_at: Utc::now(),
        };
        self.exports.lock().push(file);
        Ok(receipt)
    }
}

/// Viewfinder that records what it was asked to show
#[derive(Default)]
pub struct RecordingViewfinder {
    bound: Mutex<Vec<SourceDescriptor>>,
    clears: AtomicUsize,
}

impl RecordingViewfinder {
    pub fn bound(&self) -> Vec<SourceDescriptor> {
        self.bound.lock().clone()
    }

    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

impl Viewfinder for RecordingViewfinder {
    fn bind(&self, source: &SourceDescriptor) {
        self.bound.lock().push(source.clone());
    }

    fn clear(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
    }
}

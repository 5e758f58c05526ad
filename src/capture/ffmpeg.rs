//! FFmpeg capture backend
//!
//! Each encoder session is an `ffmpeg` child process that reads the camera and
//! microphone directly and writes a live container stream to stdout. Whatever
//! accumulated on stdout is emitted as one segment per cadence tick.

use super::traits::{
    AcquisitionFailure, CameraInfo, CaptureConstraints, CaptureSource, FacingMode, MediaDevices,
    Resolution, SourceDescriptor, TrackInfo, TrackKind,
};
use crate::export::ContainerFormat;
use crate::recorder::stream::{SegmentSink, SegmentStream, StreamError, StreamState};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};

/// How long ffmpeg gets to finalize after being asked to quit
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Extra wait on top of `STOP_TIMEOUT` for a killed process to be reaped
const RELEASE_SLACK: Duration = Duration::from_secs(1);

const READ_CHUNK: usize = 64 * 1024;

/// Capture input flavor of the host OS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// video4linux2 camera, PulseAudio microphone
    V4l2Pulse,
    AvFoundation,
    DirectShow,
}

impl InputFormat {
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            InputFormat::AvFoundation
        } else if cfg!(target_os = "windows") {
            InputFormat::DirectShow
        } else {
            InputFormat::V4l2Pulse
        }
    }
}

/// A camera ffmpeg can open
#[derive(Debug, Clone)]
pub struct FfmpegCamera {
    pub info: CameraInfo,
    /// Device path, index or name as the input format expects it
    pub input: String,
}

#[derive(Debug, Clone)]
pub struct FfmpegMicrophone {
    pub name: String,
    pub input: String,
}

/// Encoder arguments for a codec configuration string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderProfile {
    pub container: ContainerFormat,
    pub video: &'static [&'static str],
    pub audio: &'static [&'static str],
}

impl EncoderProfile {
    /// Map `mime;codecs=video,audio` to ffmpeg encoders. None if unknown.
    pub fn for_codec(codec: &str) -> Option<Self> {
        let container = ContainerFormat::from_codec(codec)?;
        let codecs = codec
            .split(';')
            .nth(1)
            .and_then(|params| params.trim().strip_prefix("codecs="))
            .unwrap_or("")
            .trim_matches('"')
            .to_ascii_lowercase();
        let mut names = codecs.split(',').map(str::trim);
        let video_name = names.next().unwrap_or("");
        let audio_name = names.next().unwrap_or("");

        let video: &'static [&'static str] = match (container, video_name) {
            (ContainerFormat::Webm, "vp8") => &[
                "-c:v", "libvpx", "-deadline", "realtime", "-cpu-used", "8", "-b:v", "2M",
            ],
            (ContainerFormat::Webm, "vp9") => &[
                "-c:v", "libvpx-vp9", "-deadline", "realtime", "-cpu-used", "8", "-row-mt", "1",
                "-b:v", "2M",
            ],
            (ContainerFormat::Matroska | ContainerFormat::Mp4, name)
                if name.starts_with("avc1") || name == "h264" =>
            {
                &[
                    "-c:v", "libx264", "-preset", "veryfast", "-tune", "zerolatency", "-pix_fmt",
                    "yuv420p",
                ]
            }
            _ => return None,
        };
        let audio: &'static [&'static str] = match (container, audio_name) {
            (ContainerFormat::Webm | ContainerFormat::Matroska, "opus") => {
                &["-c:a", "libopus", "-b:a", "96k"]
            }
            (ContainerFormat::Mp4, name) if name.starts_with("mp4a") || name == "aac" => {
                &["-c:a", "aac", "-b:a", "128k"]
            }
            _ => return None,
        };

        Some(Self {
            container,
            video,
            audio,
        })
    }

    fn output_args(&self) -> Vec<String> {
        let mut args: Vec<String> = self.video.iter().map(|s| s.to_string()).collect();
        args.extend(self.audio.iter().map(|s| s.to_string()));
        if self.container == ContainerFormat::Mp4 {
            args.extend(["-movflags", "frag_keyframe+empty_moov+default_base_moof"].map(String::from));
        }
        args.extend(["-f", self.container.muxer(), "pipe:1"].map(String::from));
        args
    }
}

/// Input arguments for a camera (and optional microphone)
pub fn input_args(
    format: InputFormat,
    camera: &FfmpegCamera,
    microphone: Option<&FfmpegMicrophone>,
    resolution: Option<Resolution>,
) -> Vec<String> {
    let mut args = Vec::new();
    let size = resolution.map(|r| r.to_string());

    match format {
        InputFormat::V4l2Pulse => {
            args.extend(["-f", "v4l2"].map(String::from));
            if let Some(size) = size {
                args.extend(["-video_size".to_string(), size]);
            }
            args.extend(["-i".to_string(), camera.input.clone()]);
            if let Some(mic) = microphone {
                args.extend(["-f", "pulse", "-i"].map(String::from));
                args.push(mic.input.clone());
            }
        }
        InputFormat::AvFoundation => {
            args.extend(["-f", "avfoundation", "-framerate", "30"].map(String::from));
            if let Some(size) = size {
                args.extend(["-video_size".to_string(), size]);
            }
            let audio = microphone.map(|m| m.input.as_str()).unwrap_or("none");
            args.extend(["-i".to_string(), format!("{}:{}", camera.input, audio)]);
        }
        InputFormat::DirectShow => {
            args.extend(["-f", "dshow"].map(String::from));
            if let Some(size) = size {
                args.extend(["-video_size".to_string(), size]);
            }
            let mut device = format!("video={}", camera.input);
            if let Some(mic) = microphone {
                device.push_str(&format!(":audio={}", mic.input));
            }
            args.extend(["-i".to_string(), device]);
        }
    }
    args
}

/// Exit signal of the last encoder process that opened a device set
///
/// Capture devices are exclusive. A new process may only open them once the
/// previous one has exited, or once it has certainly been killed.
#[derive(Debug, Clone, Default)]
pub struct DeviceLease {
    exited: Arc<Mutex<Option<oneshot::Receiver<()>>>>,
}

impl DeviceLease {
    /// Register a new holder; returns the previous holder's exit signal
    /// while that process is still running
    fn take_over(&self, exited: oneshot::Receiver<()>) -> Option<oneshot::Receiver<()>> {
        let mut previous = self.exited.lock().replace(exited)?;
        match previous.try_recv() {
            Err(oneshot::error::TryRecvError::Empty) => Some(previous),
            _ => None,
        }
    }
}

/// Cameras and microphone reachable through ffmpeg
#[derive(Debug, Clone)]
pub struct FfmpegDevices {
    program: PathBuf,
    format: InputFormat,
    cameras: Vec<FfmpegCamera>,
    microphone: Option<FfmpegMicrophone>,
    lease: DeviceLease,
}

impl FfmpegDevices {
    pub fn new(cameras: Vec<FfmpegCamera>, microphone: Option<FfmpegMicrophone>) -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            format: InputFormat::current(),
            cameras,
            microphone,
            lease: DeviceLease::default(),
        }
    }

    pub fn with_format(mut self, format: InputFormat) -> Self {
        self.format = format;
        self
    }

    /// Best-effort device list without a native enumeration backend
    pub fn probe() -> Self {
        match InputFormat::current() {
            InputFormat::V4l2Pulse => Self::new(probe_v4l2_cameras(), Some(default_microphone("default"))),
            InputFormat::AvFoundation => Self::new(
                vec![indexed_camera("0", "Default Camera")],
                Some(default_microphone("0")),
            ),
            // dshow needs real device names
            InputFormat::DirectShow => Self::new(Vec::new(), None),
        }
    }

    pub fn cameras(&self) -> Vec<CameraInfo> {
        self.cameras.iter().map(|c| c.info.clone()).collect()
    }

    fn select_camera(&self, constraints: &CaptureConstraints) -> Result<&FfmpegCamera, AcquisitionFailure> {
        if self.cameras.is_empty() {
            return Err(AcquisitionFailure::NotFound("no camera available".to_string()));
        }
        match constraints.facing {
            Some(facing) => self
                .cameras
                .iter()
                .find(|c| c.info.facing == Some(facing))
                .ok_or_else(|| {
                    AcquisitionFailure::NotFound(format!("no camera facing {:?}", facing).to_lowercase())
                }),
            None => Ok(&self.cameras[0]),
        }
    }

    fn source_for(&self, constraints: &CaptureConstraints) -> Result<FfmpegSource, AcquisitionFailure> {
        let camera = self.select_camera(constraints)?.clone();
        let microphone = if constraints.audio {
            let mic = self
                .microphone
                .clone()
                .ok_or_else(|| AcquisitionFailure::NotFound("no microphone available".to_string()))?;
            Some(mic)
        } else {
            None
        };

        if self.format == InputFormat::V4l2Pulse {
            check_device_access(&camera.input)?;
        }

        let resolution = constraints
            .ideal_resolution
            .filter(|r| camera.info.supports(*r));
        if let (Some(ideal), None) = (constraints.ideal_resolution, resolution) {
            tracing::debug!("{} does not offer {}, using its default size", camera.info.name, ideal);
        }

        let mut tracks = vec![TrackInfo {
            kind: TrackKind::Video,
            label: camera.info.name.clone(),
        }];
        if let Some(mic) = &microphone {
            tracks.push(TrackInfo {
                kind: TrackKind::Audio,
                label: mic.name.clone(),
            });
        }

        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error"].map(String::from).into();
        args.extend(input_args(self.format, &camera, microphone.as_ref(), resolution));

        Ok(FfmpegSource {
            program: self.program.clone(),
            input: args,
            descriptor: SourceDescriptor {
                label: camera.info.name.clone(),
                tracks,
                constraints: constraints.clone(),
            },
            released: false,
            lease: self.lease.clone(),
        })
    }
}

#[async_trait]
impl MediaDevices for FfmpegDevices {
    async fn open(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn CaptureSource>, AcquisitionFailure> {
        let source = self.source_for(constraints)?;
        Ok(Box::new(source))
    }
}

/// Camera + microphone pair opened through ffmpeg
pub struct FfmpegSource {
    program: PathBuf,
    input: Vec<String>,
    descriptor: SourceDescriptor,
    released: bool,
    lease: DeviceLease,
}

impl CaptureSource for FfmpegSource {
    fn descriptor(&self) -> SourceDescriptor {
        self.descriptor.clone()
    }

    fn open_stream(&self, codec: &str) -> Result<Box<dyn SegmentStream>, StreamError> {
        if self.released {
            return Err(StreamError::Start("capture source already released".to_string()));
        }
        let profile =
            EncoderProfile::for_codec(codec).ok_or_else(|| StreamError::UnsupportedCodec(codec.to_string()))?;

        let mut args = self.input.clone();
        args.extend(profile.output_args());
        Ok(Box::new(
            FfmpegSegmentStream::new(self.program.clone(), args, codec).with_lease(self.lease.clone()),
        ))
    }

    fn stop_tracks(&mut self) {
        // The devices are held by the encoder process; once released no new
        // session may reopen them.
        if !self.released {
            tracing::info!("Released capture devices for {}", self.descriptor.label);
            self.released = true;
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: StreamState,
    run: u64,
}

/// One `ffmpeg` process per recording run
pub struct FfmpegSegmentStream {
    program: PathBuf,
    args: Vec<String>,
    codec: String,
    shared: Arc<Mutex<Shared>>,
    stop_tx: Option<oneshot::Sender<()>>,
    lease: DeviceLease,
}

impl FfmpegSegmentStream {
    pub fn new(program: PathBuf, args: Vec<String>, codec: &str) -> Self {
        Self {
            program,
            args,
            codec: codec.to_string(),
            shared: Arc::new(Mutex::new(Shared::default())),
            stop_tx: None,
            lease: DeviceLease::default(),
        }
    }

    /// Share the device lease of the source this stream records from
    pub fn with_lease(mut self, lease: DeviceLease) -> Self {
        self.lease = lease;
        self
    }
}

fn spawn_encoder(program: &Path, args: &[String]) -> Result<Child, StreamError> {
    Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| StreamError::Start(format!("Failed to start {}: {}", program.display(), e)))
}

impl SegmentStream for FfmpegSegmentStream {
    fn start(&mut self, cadence: Duration, sink: SegmentSink) -> Result<(), StreamError> {
        let run = {
            let mut shared = self.shared.lock();
            if shared.state == StreamState::Recording {
                return Err(StreamError::AlreadyRecording);
            }
            shared.run += 1;
            shared.run
        };

        let (exit_tx, exit_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let shared = self.shared.clone();

        match self.lease.take_over(exit_rx) {
            None => {
                let child = spawn_encoder(&self.program, &self.args)?;
                self.shared.lock().state = StreamState::Recording;
                tracing::debug!("Encoder process started (run {}, codec {})", run, self.codec);
                tokio::spawn(pump(child, cadence, sink, stop_rx, exit_tx, shared, run));
            }
            Some(previous) => {
                self.shared.lock().state = StreamState::Recording;
                tracing::debug!(
                    "Encoder run {} waits for the previous process to release the devices",
                    run
                );
                tokio::spawn(start_when_released(
                    previous,
                    self.program.clone(),
                    self.args.clone(),
                    cadence,
                    sink,
                    stop_rx,
                    exit_tx,
                    shared,
                    run,
                ));
            }
        }

        self.stop_tx = Some(stop_tx);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        let mut shared = self.shared.lock();
        if shared.state == StreamState::Recording {
            shared.state = StreamState::Stopped;
        }
    }

    fn state(&self) -> StreamState {
        self.shared.lock().state
    }

    fn codec(&self) -> &str {
        &self.codec
    }
}

/// Spawn the encoder once the previous holder of the devices has exited
#[allow(clippy::too_many_arguments)]
async fn start_when_released(
    previous: oneshot::Receiver<()>,
    program: PathBuf,
    args: Vec<String>,
    cadence: Duration,
    sink: SegmentSink,
    mut stop_rx: oneshot::Receiver<()>,
    exit_tx: oneshot::Sender<()>,
    shared: Arc<Mutex<Shared>>,
    run: u64,
) {
    tokio::select! {
        released = timeout(STOP_TIMEOUT + RELEASE_SLACK, previous) => {
            if released.is_err() {
                tracing::warn!("Previous encoder still holds the devices, starting run {} anyway", run);
            }
        }
        _ = &mut stop_rx => {
            tracing::debug!("Encoder run {} stopped before it started", run);
            return;
        }
    }

    match spawn_encoder(&program, &args) {
        Ok(child) => {
            tracing::debug!("Encoder process started (run {})", run);
            pump(child, cadence, sink, stop_rx, exit_tx, shared, run).await;
        }
        Err(e) => {
            {
                let mut shared = shared.lock();
                if shared.run == run {
                    shared.state = StreamState::Stopped;
                }
            }
            sink.fail(e.to_string());
        }
    }
}

/// Move stdout into segments until the process exits
async fn pump(
    mut child: Child,
    cadence: Duration,
    sink: SegmentSink,
    mut stop_rx: oneshot::Receiver<()>,
    exit_tx: oneshot::Sender<()>,
    shared: Arc<Mutex<Shared>>,
    run: u64,
) {
    let Some(mut stdout) = child.stdout.take() else {
        sink.fail("encoder stdout unavailable");
        return;
    };
    let mut stdin = child.stdin.take();
    let mut stderr = child.stderr.take();

    let mut ticker = interval_at(Instant::now() + cadence, cadence);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut pending = Vec::new();
    let mut stopping = false;
    let mut read_error = None;
    let deadline = sleep(STOP_TIMEOUT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            read = stdout.read(&mut chunk) => match read {
                Ok(0) => break,
                Ok(n) => pending.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    read_error = Some(e.to_string());
                    break;
                }
            },
            _ = ticker.tick(), if !stopping => {
                if !pending.is_empty() {
                    sink.push(std::mem::take(&mut pending));
                }
            }
            _ = &mut stop_rx, if !stopping => {
                stopping = true;
                deadline.as_mut().reset(Instant::now() + STOP_TIMEOUT);
                // 'q' then EOF asks ffmpeg to finalize the container
                if let Some(mut stdin) = stdin.take() {
                    let _ = stdin.write_all(b"q").await;
                }
            }
            _ = &mut deadline, if stopping => {
                tracing::warn!("Encoder did not exit in time, killing it");
                let _ = child.start_kill();
                break;
            }
        }
    }

    if !pending.is_empty() {
        sink.push(pending);
    }

    let status = child.wait().await;
    let _ = exit_tx.send(());
    if stopping {
        tracing::debug!("Encoder process finished (run {})", run);
        return;
    }

    let mut message = match (read_error, status) {
        (Some(e), _) => format!("failed reading encoder output: {}", e),
        (None, Ok(status)) => format!("encoder exited with {}", status),
        (None, Err(e)) => format!("encoder could not be awaited: {}", e),
    };
    if let Some(stderr) = stderr.as_mut() {
        let mut log = String::new();
        if stderr.read_to_string(&mut log).await.is_ok() && !log.trim().is_empty() {
            message.push_str(": ");
            message.push_str(log.trim());
        }
    }

    {
        let mut shared = shared.lock();
        if shared.run == run {
            shared.state = StreamState::Stopped;
        }
    }
    sink.fail(message);
}

/// Report an unreadable device node as a permission problem
fn check_device_access(input: &str) -> Result<(), AcquisitionFailure> {
    if !input.starts_with("/dev/") {
        return Ok(());
    }
    match std::fs::File::open(input) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => Err(
            AcquisitionFailure::PermissionDenied(format!("cannot open {}: {}", input, e)),
        ),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(AcquisitionFailure::NotFound(format!("{} does not exist", input)))
        }
        Err(e) => Err(AcquisitionFailure::Other(format!("cannot open {}: {}", input, e))),
    }
}

pub(crate) fn common_resolutions() -> Vec<Resolution> {
    vec![
        Resolution::FULL_HD,
        Resolution {
            width: 1280,
            height: 720,
        },
        Resolution {
            width: 640,
            height: 480,
        },
    ]
}

pub(crate) fn indexed_camera(input: &str, name: &str) -> FfmpegCamera {
    FfmpegCamera {
        info: CameraInfo {
            id: input.to_string(),
            name: name.to_string(),
            facing: FacingMode::infer_from_name(name),
            supported_resolutions: common_resolutions(),
        },
        input: input.to_string(),
    }
}

pub(crate) fn default_microphone(input: &str) -> FfmpegMicrophone {
    FfmpegMicrophone {
        name: "Default Microphone".to_string(),
        input: input.to_string(),
    }
}

/// video4linux devices listed in sysfs, named after the driver's label
fn probe_v4l2_cameras() -> Vec<FfmpegCamera> {
    let entries = match std::fs::read_dir("/sys/class/video4linux") {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Failed to enumerate video4linux devices: {}", e);
            return Vec::new();
        }
    };

    let mut cameras: Vec<FfmpegCamera> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let node = entry.file_name().to_string_lossy().to_string();
            if !node.starts_with("video") {
                return None;
            }
            let name = std::fs::read_to_string(entry.path().join("name"))
                .map(|n| n.trim().to_string())
                .unwrap_or_else(|_| node.clone());
            Some(indexed_camera(&format!("/dev/{}", node), &name))
        })
        .collect();
    cameras.sort_by(|a, b| a.input.cmp(&b.input));
    cameras
}

/// Version line of the ffmpeg binary, if one can be run
pub async fn ffmpeg_version(program: &str) -> Option<String> {
    let output = Command::new(program).arg("-version").output().await.ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|line| line.trim().to_string())
}

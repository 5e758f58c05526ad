//! Capture trait definitions
//!
//! Platform-agnostic types and traits for camera/microphone sources.

use crate::recorder::stream::{SegmentStream, StreamError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which way a camera points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Rear camera, pointing away from the user
    Environment,
    /// Front camera, pointing at the user
    User,
}

impl FacingMode {
    /// Guess the facing of a camera from its human-readable name
    pub fn infer_from_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        if ["back", "rear", "environment", "world"]
            .iter()
            .any(|hint| name.contains(hint))
        {
            Some(FacingMode::Environment)
        } else if ["front", "facetime", "user", "selfie"]
            .iter()
            .any(|hint| name.contains(hint))
        {
            Some(FacingMode::User)
        } else {
            None
        }
    }
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const FULL_HD: Resolution = Resolution {
        width: 1920,
        height: 1080,
    };
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Information about a camera/webcam
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraInfo {
    /// Unique device ID
    pub id: String,

    /// Device name
    pub name: String,

    /// Facing, when it can be determined
    pub facing: Option<FacingMode>,

    /// Supported resolutions
    pub supported_resolutions: Vec<Resolution>,
}

impl CameraInfo {
    pub fn supports(&self, resolution: Resolution) -> bool {
        self.supported_resolutions.contains(&resolution)
    }
}

/// Parameters for one acquisition attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConstraints {
    /// Required facing; None accepts any camera
    pub facing: Option<FacingMode>,

    /// Preferred resolution, used only if the camera offers it
    pub ideal_resolution: Option<Resolution>,

    /// Whether a microphone track is required
    pub audio: bool,
}

impl CaptureConstraints {
    /// Rear camera at full HD with audio
    pub fn rear_high_resolution() -> Self {
        Self {
            facing: Some(FacingMode::Environment),
            ideal_resolution: Some(Resolution::FULL_HD),
            audio: true,
        }
    }

    /// Any camera with audio
    pub fn generic() -> Self {
        Self {
            facing: None,
            ideal_resolution: None,
            audio: true,
        }
    }

    pub fn is_generic(&self) -> bool {
        self.facing.is_none() && self.ideal_resolution.is_none()
    }
}

/// Kind of media a track carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

/// One track of a capture source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub kind: TrackKind,
    pub label: String,
}

/// What the viewfinder and status report show about a bound source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDescriptor {
    pub label: String,
    pub tracks: Vec<TrackInfo>,
    pub constraints: CaptureConstraints,
}

impl SourceDescriptor {
    /// True when the fallback acquisition was used
    pub fn is_generic(&self) -> bool {
        self.constraints.is_generic()
    }
}

/// Why a capture source could not be obtained
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "camelCase")]
pub enum AcquisitionFailure {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

/// A live audio/video input
///
/// Owned by exactly one recorder. `stop_tracks` releases the devices and is
/// called once, at teardown or when the source is replaced.
pub trait CaptureSource: Send {
    fn descriptor(&self) -> SourceDescriptor;

    /// Create an encoder session for this source with the given codec
    fn open_stream(&self, codec: &str) -> Result<Box<dyn SegmentStream>, StreamError>;

    /// Stop every underlying track
    fn stop_tracks(&mut self);
}

/// Platform media subsystem
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Try to open a source satisfying the constraints
    async fn open(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn CaptureSource>, AcquisitionFailure>;
}

/// Display surface that shows the live feed
pub trait Viewfinder: Send + Sync {
    fn bind(&self, source: &SourceDescriptor);

    /// Blank the display (no capture available)
    fn clear(&self);
}

/// Viewfinder for headless use
#[derive(Debug, Default, Clone, Copy)]
pub struct NoViewfinder;

impl Viewfinder for NoViewfinder {
    fn bind(&self, source: &SourceDescriptor) {
        tracing::debug!("Headless viewfinder bound to {}", source.label);
    }

    fn clear(&self) {}
}

//! Camera and microphone capture
//!
//! Device traits, the acquisition ladder, and the ffmpeg backend that records
//! from real devices.

pub mod acquirer;
pub mod ffmpeg;
pub mod traits;

#[cfg(feature = "native")]
pub mod native;

pub use acquirer::{Acquisition, AcquisitionStrategy, DeviceAcquirer};
pub use ffmpeg::{FfmpegDevices, FfmpegSegmentStream, FfmpegSource};
pub use traits::{
    AcquisitionFailure, CameraInfo, CaptureConstraints, CaptureSource, FacingMode, MediaDevices,
    NoViewfinder, Resolution, SourceDescriptor, TrackInfo, TrackKind, Viewfinder,
};

/// Devices for the ffmpeg backend, enumerated natively when available
pub fn discover_devices() -> FfmpegDevices {
    #[cfg(feature = "native")]
    {
        native::discover()
    }
    #[cfg(not(feature = "native"))]
    {
        FfmpegDevices::probe()
    }
}

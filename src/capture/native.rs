//! Native device discovery
//!
//! Enumerates cameras through nokhwa and the default microphone through cpal,
//! and describes them in the form the ffmpeg backend opens them.

use super::ffmpeg::{default_microphone, indexed_camera, FfmpegCamera, FfmpegDevices, FfmpegMicrophone, InputFormat};
use cpal::traits::{DeviceTrait, HostTrait};
use nokhwa::utils::{ApiBackend, CameraIndex};

/// Get list of available cameras, as ffmpeg inputs
pub fn ffmpeg_cameras(format: InputFormat) -> Vec<FfmpegCamera> {
    match nokhwa::query(ApiBackend::Auto) {
        Ok(cameras) => cameras
            .into_iter()
            .map(|info| {
                let name = info.human_name();
                let input = match (format, info.index()) {
                    (InputFormat::V4l2Pulse, CameraIndex::Index(i)) => format!("/dev/video{}", i),
                    (InputFormat::DirectShow, _) => name.clone(),
                    (_, CameraIndex::Index(i)) => i.to_string(),
                    (_, CameraIndex::String(s)) => s.to_string(),
                };
                indexed_camera(&input, &name)
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate cameras: {:?}", e);
            Vec::new()
        }
    }
}

/// The host's default input device
pub fn default_ffmpeg_microphone(format: InputFormat) -> Option<FfmpegMicrophone> {
    let device = cpal::default_host().default_input_device()?;
    let name = device.name().unwrap_or_else(|_| "Default Microphone".to_string());

    let mut microphone = match format {
        InputFormat::V4l2Pulse => default_microphone("default"),
        InputFormat::AvFoundation => default_microphone("0"),
        InputFormat::DirectShow => default_microphone(&name),
    };
    microphone.name = name;
    Some(microphone)
}

/// Device set for the ffmpeg backend built from native enumeration
pub fn discover() -> FfmpegDevices {
    let format = InputFormat::current();
    let cameras = ffmpeg_cameras(format);
    let microphone = default_ffmpeg_microphone(format);
    tracing::info!(
        "Discovered {} camera(s), microphone: {}",
        cameras.len(),
        microphone.as_ref().map(|m| m.name.as_str()).unwrap_or("none")
    );
    FfmpegDevices::new(cameras, microphone)
}

//! System-related Tauri commands

use crate::capture::ffmpeg::ffmpeg_version;
use serde::{Deserialize, Serialize};

/// System information
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub os: String,
    pub os_version: String,
    pub arch: String,
    /// First line of `ffmpeg -version`; None when ffmpeg is missing
    pub ffmpeg: Option<String>,
}

/// Get basic system information
#[tauri::command]
pub async fn get_system_info() -> Result<SystemInfo, String> {
    Ok(SystemInfo {
        os: std::env::consts::OS.to_string(),
        os_version: get_os_version().await,
        arch: std::env::consts::ARCH.to_string(),
        ffmpeg: ffmpeg_version("ffmpeg").await,
    })
}

async fn get_os_version() -> String {
    let command = if cfg!(target_os = "macos") {
        Some(("sw_vers", vec!["-productVersion"]))
    } else if cfg!(target_os = "windows") {
        Some(("cmd", vec!["/C", "ver"]))
    } else if cfg!(target_os = "linux") {
        Some(("uname", vec!["-r"]))
    } else {
        None
    };

    let Some((program, args)) = command else {
        return "Unknown".to_string();
    };
    tokio::process::Command::new(program)
        .args(args)
        .output()
        .await
        .ok()
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

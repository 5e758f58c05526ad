//! Recording-related Tauri commands

use crate::capture::{CameraInfo, SourceDescriptor, Viewfinder};
use crate::recorder::{BufferConfig, DashcamSession, RecorderStatus, SaveOutcome};
use crate::utils::ErrorResponse;
use std::sync::Arc;
use tauri::{AppHandle, Emitter, State};

pub const ELAPSED_EVENT: &str = "buffer-elapsed";
pub const RECORDER_EVENT: &str = "recorder-event";
pub const VIEWFINDER_BOUND_EVENT: &str = "viewfinder-bound";
pub const VIEWFINDER_CLEARED_EVENT: &str = "viewfinder-cleared";

/// Application state for the dashcam
pub struct DashcamState {
    pub session: Arc<DashcamSession>,
    pub config: BufferConfig,
}

/// Viewfinder backed by the webview
pub struct TauriViewfinder {
    app: AppHandle,
}

impl TauriViewfinder {
    pub fn new(app: AppHandle) -> Self {
        Self { app }
    }
}

impl Viewfinder for TauriViewfinder {
    fn bind(&self, source: &SourceDescriptor) {
        if let Err(e) = self.app.emit(VIEWFINDER_BOUND_EVENT, source) {
            tracing::warn!("Failed to notify viewfinder: {}", e);
        }
    }

    fn clear(&self) {
        if let Err(e) = self.app.emit(VIEWFINDER_CLEARED_EVENT, ()) {
            tracing::warn!("Failed to notify viewfinder: {}", e);
        }
    }
}

/// Relay elapsed seconds and recorder events to the frontend until the
/// recorder shuts down
pub fn forward_to_frontend(app: AppHandle, session: &DashcamSession) {
    let mut elapsed = session.elapsed();
    let elapsed_app = app.clone();
    tauri::async_runtime::spawn(async move {
        while elapsed.changed().await.is_ok() {
            let secs = *elapsed.borrow_and_update();
            let _ = elapsed_app.emit(ELAPSED_EVENT, secs);
        }
    });

    let mut events = session.subscribe();
    tauri::async_runtime::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let _ = app.emit(RECORDER_EVENT, &event);
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("Frontend missed {} recorder events", missed);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Export the last retention window
#[tauri::command]
pub async fn save_recording(state: State<'_, DashcamState>) -> Result<SaveOutcome, ErrorResponse> {
    Ok(state.session.save().await?)
}

/// Re-run the camera acquisition ladder
#[tauri::command]
pub async fn retry_camera(state: State<'_, DashcamState>) -> Result<SourceDescriptor, ErrorResponse> {
    Ok(state.session.acquire().await?)
}

#[tauri::command]
pub async fn get_recorder_status(
    state: State<'_, DashcamState>,
) -> Result<RecorderStatus, ErrorResponse> {
    Ok(state.session.status().await?)
}

/// Current elapsed seconds of the buffer window
#[tauri::command]
pub async fn get_buffer_elapsed(state: State<'_, DashcamState>) -> Result<u64, ErrorResponse> {
    let elapsed = *state.session.elapsed().borrow();
    Ok(elapsed)
}

#[tauri::command]
pub async fn get_buffer_config(state: State<'_, DashcamState>) -> Result<BufferConfig, ErrorResponse> {
    Ok(state.config.clone())
}

/// Get list of available cameras/webcams
#[tauri::command]
pub async fn get_cameras() -> Result<Vec<CameraInfo>, ErrorResponse> {
    Ok(crate::capture::discover_devices().cameras())
}

//! Dashcam - keeps the last minute of camera footage, saves it on demand.
//!
//! Library crate with the rolling-buffer recorder, the capture backends and,
//! behind the `desktop` feature, the Tauri application shell.

pub mod capture;
#[cfg(feature = "desktop")]
pub mod commands;
pub mod export;
pub mod recorder;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Name of the configuration file inside the app config directory
pub const CONFIG_FILE: &str = "dashcam.json";

/// Install the global tracing subscriber; `RUST_LOG` overrides the default filter
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dashcam_lib=debug,tauri=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Initialize the application
#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    use commands::recording::{forward_to_frontend, DashcamState, TauriViewfinder};
    use export::FileSink;
    use recorder::DashcamSession;
    use std::sync::Arc;
    use tauri::Manager;

    init_tracing();
    tracing::info!("Starting Dashcam v{}", env!("CARGO_PKG_VERSION"));

    let result = tauri::Builder::default()
        .invoke_handler(tauri::generate_handler![
            // Recorder commands
            commands::recording::save_recording,
            commands::recording::retry_camera,
            commands::recording::get_recorder_status,
            commands::recording::get_buffer_elapsed,
            commands::recording::get_buffer_config,
            commands::recording::get_cameras,
            // System commands
            commands::system::get_system_info,
        ])
        .setup(|app| {
            let handle = app.handle().clone();

            let config_path = app.path().app_config_dir()?.join(CONFIG_FILE);
            let config = recorder::load_config(&config_path)?;
            let output_dir = match &config.output_dir {
                Some(dir) => dir.clone(),
                None => app.path().video_dir()?.join("Dashcam"),
            };
            std::fs::create_dir_all(&output_dir)?;
            tracing::info!("Saving recordings to {:?}", output_dir);

            let session = tauri::async_runtime::block_on(async {
                DashcamSession::new(
                    config.clone(),
                    Arc::new(capture::discover_devices()),
                    Arc::new(TauriViewfinder::new(handle.clone())),
                    Arc::new(FileSink::new(output_dir)),
                )
            });
            let session = Arc::new(session);
            forward_to_frontend(handle, &session);

            // Buffering starts as soon as a camera is available
            let acquiring = session.clone();
            tauri::async_runtime::spawn(async move {
                if let Err(e) = acquiring.acquire().await {
                    tracing::warn!("Starting without a camera: {}", e);
                }
            });

            app.manage(DashcamState { session, config });
            Ok(())
        })
        .on_window_event(|window, event| {
            if let tauri::WindowEvent::Destroyed = event {
                let session = window.state::<DashcamState>().session.clone();
                if let Err(e) = tauri::async_runtime::block_on(session.teardown()) {
                    tracing::error!("Failed to tear down capture session: {}", e);
                }
            }
        })
        .run(tauri::generate_context!());

    if let Err(e) = result {
        tracing::error!("Error while running tauri application: {}", e);
        std::process::exit(1);
    }
}

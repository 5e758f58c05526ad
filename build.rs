fn main() {
    // The webview shell is the only part that needs generated Tauri context
    #[cfg(feature = "desktop")]
    tauri_build::build()
}

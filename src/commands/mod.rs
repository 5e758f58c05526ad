//! Tauri command handlers
//!
//! IPC commands the webview can invoke, plus the event relays that push
//! recorder state to it.

pub mod recording;
pub mod system;

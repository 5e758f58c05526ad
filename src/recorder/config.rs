//! Buffer configuration
//!
//! Retention, cadence and codec settings, persisted as camelCase JSON.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Codec used when nothing else is configured
pub const DEFAULT_CODEC: &str = "video/webm;codecs=vp8,opus";

/// Configuration for the rolling buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BufferConfig {
    /// How much footage the window keeps before it is restarted
    pub retention_window_ms: u64,

    /// How often the encoder emits a segment
    pub segment_cadence_ms: u64,

    /// Delay between stopping the encoder on save and starting it again
    pub save_restart_grace_ms: u64,

    /// Preferred codec configuration string
    pub codec: String,

    /// Codecs to try, in order, when the preferred one is unsupported
    pub fallback_codecs: Vec<String>,

    /// Where saved recordings go (None = platform video directory)
    pub output_dir: Option<PathBuf>,

    /// Capacity of the recorder event broadcast channel
    pub event_capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            retention_window_ms: 60_000,
            segment_cadence_ms: 1_000,
            save_restart_grace_ms: 100,
            codec: DEFAULT_CODEC.to_string(),
            fallback_codecs: vec![
                "video/webm;codecs=vp9,opus".to_string(),
                "video/x-matroska;codecs=avc1,opus".to_string(),
            ],
            output_dir: None,
            event_capacity: 100,
        }
    }
}

impl BufferConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_window_ms)
    }

    pub fn cadence(&self) -> Duration {
        Duration::from_millis(self.segment_cadence_ms)
    }

    pub fn save_grace(&self) -> Duration {
        Duration::from_millis(self.save_restart_grace_ms)
    }

    /// Upper bound of the published elapsed counter
    pub fn retention_secs(&self) -> u64 {
        self.retention_window_ms / 1000
    }

    /// Preferred codec followed by the fallbacks, without duplicates
    pub fn codec_preferences(&self) -> Vec<&str> {
        let mut codecs: Vec<&str> = Vec::with_capacity(1 + self.fallback_codecs.len());
        for codec in std::iter::once(&self.codec).chain(self.fallback_codecs.iter()) {
            if !codecs.contains(&codec.as_str()) {
                codecs.push(codec.as_str());
            }
        }
        codecs
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.segment_cadence_ms == 0 {
            bail!("segmentCadenceMs must be greater than zero");
        }
        if self.retention_window_ms < self.segment_cadence_ms {
            bail!(
                "retentionWindowMs ({}) must be at least one cadence ({})",
                self.retention_window_ms,
                self.segment_cadence_ms
            );
        }
        if self.codec.trim().is_empty() {
            bail!("codec must not be empty");
        }
        if self.event_capacity == 0 {
            bail!("eventCapacity must be greater than zero");
        }
        Ok(())
    }
}

/// Load configuration from disk, falling back to defaults when the file is missing
pub fn load_config(path: &Path) -> anyhow::Result<BufferConfig> {
    if !path.exists() {
        tracing::info!("No buffer config at {:?}, using defaults", path);
        return Ok(BufferConfig::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: BufferConfig = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse config {}", path.display()))?;
    config.validate()?;

    tracing::info!("Loaded buffer config from {:?}", path);
    Ok(config)
}

/// Save configuration to disk
pub fn save_config(path: &Path, config: &BufferConfig) -> anyhow::Result<()> {
    config.validate()?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config dir {}", parent.display()))?;
    }

    let contents = serde_json::to_string_pretty(config)?;
    std::fs::write(path, contents)
        .with_context(|| format!("Failed to write config {}", path.display()))?;

    tracing::info!("Saved buffer config to {:?}", path);
    Ok(())
}

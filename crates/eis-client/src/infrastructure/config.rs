//! TOML configuration for an input session.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration:
//!
//! ```toml
//! name = "eis-client"
//! handshake_timeout_ms = 5000
//! required = ["pointer", "keyboard"]
//! requested = ["pointer", "keyboard", "touch"]
//!
//! [display]
//! width = 1920
//! height = 1080
//!
//! [timing]
//! click_interval_ms = 50
//! drag_step_px = 10.0
//! drag_step_interval_ms = 10
//! scroll_px_per_unit = 15.0
//! ```
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` take the value of
//! `some_fn()` when the key is absent, so older files keep loading after
//! new settings are added.

use std::path::{Path, PathBuf};
use std::time::Duration;

use eis_core::{Capability, CapabilitySet, DisplayBounds};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::gestures::Timing;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values parsed but make no sense together.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level session configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// Client name sent in the handshake.
    #[serde(default = "default_name")]
    pub name: String,
    /// How long to wait for devices before giving up.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Capabilities that must have a device for the session to start.
    #[serde(default = "default_required")]
    pub required: Vec<Capability>,
    /// Capabilities bound when a seat offers them.
    #[serde(default = "default_requested")]
    pub requested: Vec<Capability>,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub timing: TimingConfig,
}

/// Virtual display used until devices advertise their regions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisplayConfig {
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
    #[serde(default = "default_display_width")]
    pub width: u32,
    #[serde(default = "default_display_height")]
    pub height: u32,
}

/// Gesture pacing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimingConfig {
    /// Pause between the clicks of a multi-click.
    #[serde(default = "default_click_interval_ms")]
    pub click_interval_ms: u64,
    /// Longest pointer jump per drag step, in pixels.
    #[serde(default = "default_drag_step_px")]
    pub drag_step_px: f64,
    #[serde(default = "default_drag_step_interval_ms")]
    pub drag_step_interval_ms: u64,
    /// Pixels sent per unit of smooth scroll.
    #[serde(default = "default_scroll_px_per_unit")]
    pub scroll_px_per_unit: f64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_name() -> String {
    "eis-client".to_string()
}
fn default_handshake_timeout_ms() -> u64 {
    5000
}
fn default_required() -> Vec<Capability> {
    vec![Capability::Pointer, Capability::Keyboard]
}
fn default_requested() -> Vec<Capability> {
    Capability::ALL.to_vec()
}
fn default_display_width() -> u32 {
    1920
}
fn default_display_height() -> u32 {
    1080
}
fn default_click_interval_ms() -> u64 {
    50
}
fn default_drag_step_px() -> f64 {
    10.0
}
fn default_drag_step_interval_ms() -> u64 {
    10
}
fn default_scroll_px_per_unit() -> f64 {
    15.0
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            required: default_required(),
            requested: default_requested(),
            display: DisplayConfig::default(),
            timing: TimingConfig::default(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            width: default_display_width(),
            height: default_display_height(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            click_interval_ms: default_click_interval_ms(),
            drag_step_px: default_drag_step_px(),
            drag_step_interval_ms: default_drag_step_interval_ms(),
            scroll_px_per_unit: default_scroll_px_per_unit(),
        }
    }
}

impl ClientConfig {
    /// Loads a config from `path`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, [`ConfigError::Parse`]
    /// for malformed TOML and [`ConfigError::Invalid`] for unusable values.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parses and validates TOML text.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] or [`ConfigError::Invalid`].
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let cfg: ClientConfig = toml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.display.width == 0 || self.display.height == 0 {
            return Err(ConfigError::Invalid("display size must be non-zero".to_string()));
        }
        if !is_positive(self.timing.drag_step_px) {
            return Err(ConfigError::Invalid("drag_step_px must be positive".to_string()));
        }
        if !is_positive(self.timing.scroll_px_per_unit) {
            return Err(ConfigError::Invalid(
                "scroll_px_per_unit must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn required_set(&self) -> CapabilitySet {
        self.required.iter().copied().collect()
    }

    pub fn requested_set(&self) -> CapabilitySet {
        self.requested.iter().copied().collect()
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn bounds(&self) -> DisplayBounds {
        DisplayBounds::new(self.display.x, self.display.y, self.display.width, self.display.height)
    }

    /// Gesture timing with the configured overrides applied.
    pub fn timing(&self) -> Timing {
        Timing {
            click_interval: Duration::from_millis(self.timing.click_interval_ms),
            drag_max_step_px: self.timing.drag_step_px,
            drag_step_interval: Duration::from_millis(self.timing.drag_step_interval_ms),
            scroll_px_per_unit: self.timing.scroll_px_per_unit,
            ..Timing::default()
        }
    }
}

fn is_positive(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

// ── Tests ─────────────────────────────────────────────────────────────────────

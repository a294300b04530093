//! Persistent settings for conversion defaults and front-end preferences.
//!
//! Settings live in one JSON file. Loading an absent file yields the stock
//! defaults and writes them out, so the file always exists after first use
//! and users have something concrete to edit.
//!
//! Updates are partial: callers hand in a JSON fragment containing only the
//! keys they want to change, and [`ConfigFile::update`] deep-merges it over
//! the current settings. Unknown keys and out-of-range values are rejected,
//! never silently dropped or clamped, so a typo in a settings file surfaces
//! as an error instead of a mysteriously ignored preference.
//!
//! ## File Contents
//!
//! ```json
//! {
//!   "conversion": {
//!     "default_output_format": "png",
//!     "jpeg_quality": 85,
//!     "webp_quality": 85,
//!     "png_compression": 6,
//!     "maintain_aspect_ratio": true,
//!     "max_image_size": 4096
//!   },
//!   "ui": {
//!     "theme": "light",
//!     "language": "en",
//!     "show_preview": true,
//!     "window_width": 800,
//!     "window_height": 600
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot access settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed settings: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid settings: {0}")]
    Validation(String),
}

/// Conversion defaults applied when a request leaves a knob unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConversionSettings {
    pub default_output_format: String,
    pub jpeg_quality: u8,
    pub webp_quality: u8,
    pub png_compression: u8,
    pub maintain_aspect_ratio: bool,
    pub max_image_size: u32,
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            default_output_format: "png".to_string(),
            jpeg_quality: 85,
            webp_quality: 85,
            png_compression: 6,
            maintain_aspect_ratio: true,
            max_image_size: 4096,
        }
    }
}

/// Front-end presentation preferences. Stored and validated here so every
/// front end sees the same values; this crate only persists them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UiSettings {
    pub theme: String,
    pub language: String,
    pub show_preview: bool,
    pub window_width: u32,
    pub window_height: u32,
}

impl Default for UiSettings {
    fn default() -> Self {
        Self {
            theme: "light".to_string(),
            language: "en".to_string(),
            show_preview: true,
            window_width: 800,
            window_height: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub conversion: ConversionSettings,
    pub ui: UiSettings,
}

impl Settings {
    /// Check every cross-field constraint. Type and key errors are caught
    /// earlier by deserialization; this covers ranges and enumerations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Validation(msg));

        let c = &self.conversion;
        if !(1..=100).contains(&c.jpeg_quality) {
            return invalid(format!("jpeg_quality must be 1-100, got {}", c.jpeg_quality));
        }
        if !(1..=100).contains(&c.webp_quality) {
            return invalid(format!("webp_quality must be 1-100, got {}", c.webp_quality));
        }
        if c.png_compression > 9 {
            return invalid(format!(
                "png_compression must be 0-9, got {}",
                c.png_compression
            ));
        }
        if !matches!(
            c.default_output_format.as_str(),
            "png" | "jpg" | "jpeg" | "webp" | "ico"
        ) {
            return invalid(format!(
                "unsupported default_output_format: {}",
                c.default_output_format
            ));
        }
        if c.max_image_size < 1 {
            return invalid("max_image_size must be at least 1".to_string());
        }

        let u = &self.ui;
        if !matches!(u.theme.as_str(), "light" | "dark" | "auto") {
            return invalid(format!("unknown theme: {}", u.theme));
        }
        if u.window_width < 600 {
            return invalid(format!(
                "window_width must be at least 600, got {}",
                u.window_width
            ));
        }
        if u.window_height < 400 {
            return invalid(format!(
                "window_height must be at least 400, got {}",
                u.window_height
            ));
        }
        Ok(())
    }

    /// Default quality for the given target format name, for callers that
    /// did not specify one.
    pub fn quality_for(&self, format: &str) -> u8 {
        match format {
            "webp" => self.conversion.webp_quality,
            _ => self.conversion.jpeg_quality,
        }
    }
}

/// A settings file on disk.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: PathBuf,
}

impl ConfigFile {
    /// Bind to a settings path. The file is created with defaults on the
    /// first [`load`](Self::load) if it does not exist.
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and validate settings, creating the file with defaults first
    /// if it is missing.
    pub fn load(&self) -> Result<Settings, ConfigError> {
        if !self.path.exists() {
            let defaults = Settings::default();
            self.save(&defaults)?;
            tracing::info!(path = %self.path.display(), "created default settings file");
            return Ok(defaults);
        }

        let text = fs::read_to_string(&self.path).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;
        let settings: Settings = serde_json::from_str(&text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Write settings as pretty-printed JSON, creating parent directories.
    pub fn save(&self, settings: &Settings) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let text = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, text).map_err(io_err)
    }

    /// Deep-merge a partial JSON fragment over the current settings,
    /// validate the result, and persist it.
    ///
    /// Rejects unknown keys, wrong types, and out-of-range values; the file
    /// on disk is untouched when anything is rejected.
    pub fn update(&self, current: &Settings, patch: Value) -> Result<Settings, ConfigError> {
        let mut merged = serde_json::to_value(current)?;
        merge_value(&mut merged, patch);
        let settings: Settings = serde_json::from_value(merged)?;
        settings.validate()?;
        self.save(&settings)?;
        Ok(settings)
    }
}

/// Recursive merge: objects merge key-by-key, everything else replaces.
fn merge_value(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                match base_map.get_mut(&key) {
                    Some(slot) => merge_value(slot, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, patch) => *base = patch,
    }
}

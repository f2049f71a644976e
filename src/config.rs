use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::camera::{Facing, FlashMode};
use crate::compose::Strategy;
use crate::geo::AddressFormat;

/// In-memory configuration for one capture session. Nothing is persisted
/// implicitly; `load_from_file`/`save_to_file` exist for hosts that carry a
/// TOML file around.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub camera: CameraConfig,
    pub location: LocationConfig,
    pub annotation: AnnotationConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub width: u32,
    pub height: u32,
    pub jpeg_quality: u8,
    pub capture_timeout_ms: u64,
    pub facing: Facing,
    pub flash: FlashMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    pub position_timeout_ms: u64,
    pub geocode_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationConfig {
    pub strategy: Strategy,
    pub address_format: AddressFormat,
    pub caption_padding: u32,
    pub caption_opacity: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub library_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                width: 1920,
                height: 1080,
                jpeg_quality: 85,
                capture_timeout_ms: 3000,
                facing: Facing::Back,
                flash: FlashMode::Off,
            },
            location: LocationConfig {
                position_timeout_ms: 5000,
                geocode_timeout_ms: 3000,
            },
            annotation: AnnotationConfig {
                strategy: Strategy::Metadata,
                address_format: AddressFormat::Components,
                caption_padding: 12,
                caption_opacity: 0.55,
            },
            storage: StorageConfig {
                library_dir: PathBuf::from("photos"),
            },
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = toml::from_str(&contents)
            .with_context(|| "Failed to parse configuration file")?;

        log::info!("Configuration loaded from {}", path.as_ref().display());
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        std::fs::write(path.as_ref(), contents)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        log::info!("Configuration saved to {}", path.as_ref().display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow::anyhow!(
                "Invalid capture dimensions: {}x{}",
                self.camera.width,
                self.camera.height
            ));
        }

        if self.camera.jpeg_quality == 0 || self.camera.jpeg_quality > 100 {
            return Err(anyhow::anyhow!(
                "Invalid JPEG quality: {}",
                self.camera.jpeg_quality
            ));
        }

        if self.camera.capture_timeout_ms == 0
            || self.location.position_timeout_ms == 0
            || self.location.geocode_timeout_ms == 0
        {
            return Err(anyhow::anyhow!("Device-call timeouts must be non-zero"));
        }

        if !(0.0..=1.0).contains(&self.annotation.caption_opacity) {
            return Err(anyhow::anyhow!(
                "Caption opacity out of range: {}",
                self.annotation.caption_opacity
            ));
        }

        if self.annotation.caption_padding > self.camera.height / 4 {
            return Err(anyhow::anyhow!(
                "Caption padding {} too large for a {}px-tall frame",
                self.annotation.caption_padding,
                self.camera.height
            ));
        }

        Ok(())
    }

    pub fn capture_aspect_ratio(&self) -> f32 {
        self.camera.width as f32 / self.camera.height as f32
    }
}

// Environment-specific configuration presets
impl Config {
    /// Small frames, short timeouts, caption baked in: quick feedback on a
    /// development machine without camera or GPS hardware.
    pub fn development_desktop() -> Self {
        Config {
            camera: CameraConfig {
                width: 1280,
                height: 720,
                capture_timeout_ms: 1000,
                ..Config::default().camera
            },
            location: LocationConfig {
                position_timeout_ms: 500,
                geocode_timeout_ms: 500,
            },
            annotation: AnnotationConfig {
                strategy: Strategy::Caption,
                ..Config::default().annotation
            },
            ..Default::default()
        }
    }

    /// Full-resolution stills with EXIF metadata, the shipping configuration.
    pub fn full_resolution() -> Self {
        Config {
            camera: CameraConfig {
                width: 4056,
                height: 3040,
                jpeg_quality: 95,
                ..Config::default().camera
            },
            ..Default::default()
        }
    }
}

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::{ImageBuffer, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::process::Command;
use tokio::time::timeout;

use crate::config::CameraConfig;
use crate::error::Error;

/// Which physical camera the session is pointed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Facing {
    #[default]
    Back,
    Front,
}

impl Facing {
    pub fn toggled(self) -> Self {
        match self {
            Facing::Back => Facing::Front,
            Facing::Front => Facing::Back,
        }
    }

    /// Device index handed to the capture backend (back camera first).
    pub fn device_index(self) -> u8 {
        match self {
            Facing::Back => 0,
            Facing::Front => 1,
        }
    }
}

/// Flash mode, cycled off -> on -> auto -> off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlashMode {
    #[default]
    Off,
    On,
    Auto,
}

impl FlashMode {
    pub fn cycled(self) -> Self {
        match self {
            FlashMode::Off => FlashMode::On,
            FlashMode::On => FlashMode::Auto,
            FlashMode::Auto => FlashMode::Off,
        }
    }
}

/// Session state applied to subsequent captures; already-captured frames are
/// unaffected by later changes.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    pub facing: Facing,
    pub flash: FlashMode,
    /// Normalized zoom in `[0.0, 1.0]`.
    pub zoom: f32,
}

/// One captured still frame. Never mutated after capture.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pixels: RgbImage,
    captured_at: DateTime<Utc>,
}

impl RawFrame {
    pub fn new(pixels: RgbImage, captured_at: DateTime<Utc>) -> Self {
        Self {
            pixels,
            captured_at,
        }
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }
}

/// Produces still frames from a camera device.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn acquire_frame(&self, settings: &CaptureSettings) -> Result<RawFrame>;
}

/// Capture backend shelling out to a still-capture binary (`rpicam-still`,
/// with `libcamera-still` as the legacy fallback).
pub struct CommandCapture {
    binary: &'static str,
    temp_image_path: PathBuf,
}

impl CommandCapture {
    /// Probes for a usable capture binary. Fails when neither candidate is
    /// installed; callers can then fall back to [`SyntheticCamera`].
    pub fn detect() -> Result<Self> {
        for binary in ["rpicam-still", "libcamera-still"] {
            if std::process::Command::new(binary)
                .arg("--help")
                .output()
                .is_ok()
            {
                log::info!("Camera backend initialized (using {})", binary);
                return Ok(Self {
                    binary,
                    temp_image_path: std::env::temp_dir().join("geostamp_capture.jpg"),
                });
            }
        }
        Err(anyhow!(
            "no capture binary found (tried rpicam-still, libcamera-still)"
        ))
    }

    /// Region-of-interest crop implementing digital zoom: zoom 0.0 keeps the
    /// full sensor, zoom 1.0 crops to the center half (2x).
    fn roi_for_zoom(zoom: f32) -> Option<String> {
        if zoom <= 0.0 {
            return None;
        }
        let visible = 1.0 - 0.5 * zoom.clamp(0.0, 1.0);
        let offset = (1.0 - visible) / 2.0;
        Some(format!(
            "{:.3},{:.3},{:.3},{:.3}",
            offset, offset, visible, visible
        ))
    }
}

#[async_trait]
impl FrameSource for CommandCapture {
    async fn acquire_frame(&self, settings: &CaptureSettings) -> Result<RawFrame> {
        if self.temp_image_path.exists() {
            let _ = fs::remove_file(&self.temp_image_path).await;
        }

        if settings.flash != FlashMode::Off {
            log::debug!(
                "flash mode {:?} is not supported by the command backend",
                settings.flash
            );
        }

        let output_path = self.temp_image_path.to_string_lossy().to_string();
        let mut args = vec![
            "-o".to_string(),
            output_path,
            "--width".to_string(),
            settings.width.to_string(),
            "--height".to_string(),
            settings.height.to_string(),
            "--quality".to_string(),
            settings.quality.to_string(),
            "--camera".to_string(),
            settings.facing.device_index().to_string(),
            "--immediate".to_string(),
            "--nopreview".to_string(),
            "--timeout".to_string(),
            "1000".to_string(),
        ];
        if let Some(roi) = Self::roi_for_zoom(settings.zoom) {
            args.push("--roi".to_string());
            args.push(roi);
        }

        log::info!("Capture command: {} {}", self.binary, args.join(" "));
        // kill_on_drop: when the caller's deadline drops this future, the
        // still-running capture process goes with it.
        let output = Command::new(self.binary)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.binary))?;
        if !output.status.success() {
            return Err(anyhow!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr)
            ));
        }

        let captured_at = Utc::now();
        let path = self.temp_image_path.clone();
        let img = tokio::task::spawn_blocking(move || image::open(&path))
            .await
            .context("image decode task failed")?
            .context("failed to load captured image")?
            .to_rgb8();
        let _ = fs::remove_file(&self.temp_image_path).await;

        log::info!("Photo captured: {}x{}", img.width(), img.height());
        Ok(RawFrame::new(img, captured_at))
    }
}

/// Deterministic gradient test pattern standing in for a camera device on
/// machines without one. Also the frame source used by the test suite.
pub struct SyntheticCamera;

#[async_trait]
impl FrameSource for SyntheticCamera {
    async fn acquire_frame(&self, settings: &CaptureSettings) -> Result<RawFrame> {
        let (width, height) = (settings.width, settings.height);
        let img: RgbImage = ImageBuffer::from_fn(width, height, |x, y| {
            let r = (x * 255 / width) as u8;
            let g = (y * 255 / height) as u8;
            let b = ((x + y) * 255 / (width + height)) as u8;
            Rgb([r, g, b])
        });
        Ok(RawFrame::new(img, Utc::now()))
    }
}

/// Wraps the live camera device: holds the mutable session state and issues
/// single still-frame capture requests against it.
pub struct CameraController {
    source: Arc<dyn FrameSource>,
    settings: CaptureSettings,
    capture_timeout: Duration,
}

impl CameraController {
    pub fn new(source: Arc<dyn FrameSource>, config: &CameraConfig) -> Self {
        Self {
            source,
            settings: CaptureSettings {
                width: config.width,
                height: config.height,
                quality: config.jpeg_quality,
                facing: config.facing,
                flash: config.flash,
                zoom: 0.0,
            },
            capture_timeout: Duration::from_millis(config.capture_timeout_ms),
        }
    }

    /// Picks the real command backend when available, the synthetic pattern
    /// otherwise. A missing camera degrades to the test pattern rather than
    /// failing construction; capture itself reports unavailability.
    pub fn with_default_source(config: &CameraConfig) -> Self {
        let source: Arc<dyn FrameSource> = match CommandCapture::detect() {
            Ok(backend) => Arc::new(backend),
            Err(e) => {
                log::warn!("Camera not available ({}), using test pattern", e);
                Arc::new(SyntheticCamera)
            }
        };
        Self::new(source, config)
    }

    pub fn toggle_facing(&mut self) -> Facing {
        self.settings.facing = self.settings.facing.toggled();
        log::info!("Camera facing switched to {:?}", self.settings.facing);
        self.settings.facing
    }

    pub fn cycle_flash(&mut self) -> FlashMode {
        self.settings.flash = self.settings.flash.cycled();
        log::info!("Flash mode switched to {:?}", self.settings.flash);
        self.settings.flash
    }

    pub fn set_zoom(&mut self, zoom: f32) {
        self.settings.zoom = zoom.clamp(0.0, 1.0);
    }

    pub fn facing(&self) -> Facing {
        self.settings.facing
    }

    pub fn flash(&self) -> FlashMode {
        self.settings.flash
    }

    pub fn zoom(&self) -> f32 {
        self.settings.zoom
    }

    /// Captures one still frame with the current session state. A backend
    /// failure or an expired deadline both surface as `CaptureUnavailable`.
    pub async fn capture(&self) -> Result<RawFrame, Error> {
        match timeout(self.capture_timeout, self.source.acquire_frame(&self.settings)).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(e)) => {
                log::error!("Capture failed: {}", e);
                Err(Error::CaptureUnavailable(e.to_string()))
            }
            Err(_) => {
                log::error!(
                    "Capture timed out after {}ms",
                    self.capture_timeout.as_millis()
                );
                Err(Error::CaptureUnavailable(format!(
                    "capture timed out after {}ms",
                    self.capture_timeout.as_millis()
                )))
            }
        }
    }
}

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;

use crate::capture::{CaptureConstraints, Facing};
use crate::presenter::{EnvironmentPreset, FallbackPolicy, Rgb};

const DEFAULT_DEVICE: &str = "stub://user";
const DEFAULT_WIDTH: u32 = 1024;
const DEFAULT_HEIGHT: u32 = 1024;
const DEFAULT_FALLBACK: &str = "flat";
const DEFAULT_FALLBACK_COLOR: &str = "#c0c0c8";
const DEFAULT_FALLBACK_PRESET: &str = "city";
const DEFAULT_REFLECTION_INTENSITY: f32 = 1.2;
const MAX_DIMENSION: u32 = 8192;

#[derive(Debug, Deserialize, Default)]
struct ChromeConfigFile {
    camera: Option<CameraConfigFile>,
    fallback: Option<FallbackConfigFile>,
    surface: Option<SurfaceConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    facing: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct FallbackConfigFile {
    policy: Option<String>,
    color: Option<String>,
    preset: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SurfaceConfigFile {
    reflection_intensity: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct ChromeConfig {
    pub camera: CameraSettings,
    pub fallback: FallbackSettings,
    pub reflection_intensity: f32,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub device: String,
    pub constraints: CaptureConstraints,
}

/// Raw fallback choices; resolved into a `FallbackPolicy` by `policy()`.
#[derive(Debug, Clone)]
pub struct FallbackSettings {
    pub policy: String,
    pub color: String,
    pub preset: String,
}

impl FallbackSettings {
    pub fn policy(&self) -> Result<FallbackPolicy> {
        match self.policy.trim().to_ascii_lowercase().as_str() {
            "flat" => Ok(FallbackPolicy::FlatTone {
                base: self.color.parse::<Rgb>()?,
            }),
            "environment" => Ok(FallbackPolicy::Environment {
                preset: self.preset.parse::<EnvironmentPreset>()?,
            }),
            other => Err(anyhow!(
                "unknown fallback policy '{}' (expected flat|environment)",
                other
            )),
        }
    }
}

impl ChromeConfig {
    /// Defaults, then the JSON file named by `CHROME_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CHROME_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ChromeConfigFile) -> Result<Self> {
        let camera = file.camera.unwrap_or_default();
        let fallback = file.fallback.unwrap_or_default();
        let facing = match camera.facing.as_deref() {
            Some(facing) => facing.parse::<Facing>()?,
            None => Facing::User,
        };
        Ok(Self {
            camera: CameraSettings {
                device: camera.device.unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
                constraints: CaptureConstraints {
                    width: camera.width.unwrap_or(DEFAULT_WIDTH),
                    height: camera.height.unwrap_or(DEFAULT_HEIGHT),
                    facing,
                },
            },
            fallback: FallbackSettings {
                policy: fallback
                    .policy
                    .unwrap_or_else(|| DEFAULT_FALLBACK.to_string()),
                color: fallback
                    .color
                    .unwrap_or_else(|| DEFAULT_FALLBACK_COLOR.to_string()),
                preset: fallback
                    .preset
                    .unwrap_or_else(|| DEFAULT_FALLBACK_PRESET.to_string()),
            },
            reflection_intensity: file
                .surface
                .and_then(|surface| surface.reflection_intensity)
                .unwrap_or(DEFAULT_REFLECTION_INTENSITY),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(device) = std::env::var("CHROME_CAMERA_DEVICE") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Ok(width) = std::env::var("CHROME_CAMERA_WIDTH") {
            self.camera.constraints.width = width
                .trim()
                .parse()
                .map_err(|_| anyhow!("CHROME_CAMERA_WIDTH must be a positive integer"))?;
        }
        if let Ok(height) = std::env::var("CHROME_CAMERA_HEIGHT") {
            self.camera.constraints.height = height
                .trim()
                .parse()
                .map_err(|_| anyhow!("CHROME_CAMERA_HEIGHT must be a positive integer"))?;
        }
        if let Ok(policy) = std::env::var("CHROME_FALLBACK") {
            if !policy.trim().is_empty() {
                self.fallback.policy = policy;
            }
        }
        if let Ok(preset) = std::env::var("CHROME_FALLBACK_PRESET") {
            if !preset.trim().is_empty() {
                self.fallback.preset = preset;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let constraints = &self.camera.constraints;
        for (name, value) in [("width", constraints.width), ("height", constraints.height)] {
            if value == 0 || value > MAX_DIMENSION {
                return Err(anyhow!(
                    "camera {} must be between 1 and {}, got {}",
                    name,
                    MAX_DIMENSION,
                    value
                ));
            }
        }
        if self.camera.device.trim().is_empty() {
            return Err(anyhow!("camera device must not be empty"));
        }
        if !self.reflection_intensity.is_finite() || self.reflection_intensity < 0.0 {
            return Err(anyhow!(
                "reflection_intensity must be a non-negative number"
            ));
        }
        self.fallback.policy()?;
        Ok(())
    }

    pub fn fallback_policy(&self) -> Result<FallbackPolicy> {
        self.fallback.policy()
    }
}

fn read_config_file(path: &Path) -> Result<ChromeConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

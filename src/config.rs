//! Configuration management for CrabCapture
//!
//! Loads and saves the TOML configuration for default open parameters, focus
//! metering and the camera worker. `load_layered` additionally overlays
//! `CRABCAPTURE__SECTION__KEY` environment variables.

use crate::errors::CameraError;
use crate::types::{Facing, Size};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrabCaptureConfig {
    pub camera: CameraConfig,
    pub focus: FocusConfig,
    pub worker: WorkerConfig,
}

/// Default open parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Facing used when a switch happens before any open
    pub default_facing: Facing,
    /// Default requested resolution [width, height]
    pub default_resolution: [u32; 2],
    /// Rotate requests into sensor orientation before size matching
    pub match_rotated_sizes: bool,
}

/// Focus and metering configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusConfig {
    /// Region size for center focus, as a fraction of each preview dimension
    pub center_region_fraction: f32,
    /// Weight of metering rectangles (0-1000)
    pub metering_weight: u32,
}

/// Camera worker thread configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub thread_name: String,
    /// How long close waits for the worker to drain and exit
    pub join_timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            default_facing: Facing::Back,
            default_resolution: [720, 1280],
            match_rotated_sizes: true,
        }
    }
}

impl Default for FocusConfig {
    fn default() -> Self {
        Self {
            center_region_fraction: 0.1,
            metering_weight: 1000,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            thread_name: "crabcapture-camera".to_string(),
            join_timeout_ms: 2000,
        }
    }
}

impl Default for CrabCaptureConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            focus: FocusConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl CameraConfig {
    pub fn default_size(&self) -> Size {
        Size::new(self.default_resolution[0], self.default_resolution[1])
    }
}

impl WorkerConfig {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

impl CrabCaptureConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, CameraError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|e| {
            CameraError::InitializationError(format!("Failed to read config file: {}", e))
        })?;

        let config: CrabCaptureConfig = toml::from_str(&contents).map_err(|e| {
            CameraError::InitializationError(format!("Failed to parse config file: {}", e))
        })?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load the TOML file (if present) with environment overrides on top,
    /// e.g. `CRABCAPTURE__WORKER__JOIN_TIMEOUT_MS=500`.
    pub fn load_layered<P: AsRef<Path>>(path: P) -> Result<Self, CameraError> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default()).map_err(|e| {
                CameraError::InitializationError(format!("Failed to seed config defaults: {}", e))
            })?)
            .add_source(
                config::File::from(path.to_path_buf())
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix("CRABCAPTURE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| {
                CameraError::InitializationError(format!("Failed to load layered config: {}", e))
            })?;

        let loaded: CrabCaptureConfig = settings.try_deserialize().map_err(|e| {
            CameraError::InitializationError(format!("Failed to parse layered config: {}", e))
        })?;

        log::debug!("Loaded layered configuration (file {:?})", path);
        Ok(loaded)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), CameraError> {
        let path = path.as_ref();

        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CameraError::InitializationError(format!(
                    "Failed to create config directory: {}",
                    e
                ))
            })?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(|e| {
            CameraError::InitializationError(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(path, toml_string).map_err(|e| {
            CameraError::InitializationError(format!("Failed to write config file: {}", e))
        })?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("crabcapture.toml")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.camera.default_resolution[0] == 0 || self.camera.default_resolution[1] == 0 {
            return Err("Invalid default resolution".to_string());
        }

        let fraction = self.focus.center_region_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err("Center region fraction must be in (0.0, 1.0]".to_string());
        }
        if self.focus.metering_weight > 1000 {
            return Err("Metering weight must be between 0 and 1000".to_string());
        }

        if self.worker.thread_name.trim().is_empty() {
            return Err("Worker thread name must not be empty".to_string());
        }
        if self.worker.thread_name.contains('\0') {
            return Err("Worker thread name must not contain NUL bytes".to_string());
        }
        if self.worker.join_timeout_ms == 0 {
            return Err("Worker join timeout must be positive".to_string());
        }

        Ok(())
    }
}

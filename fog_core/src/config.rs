//! Configuration for the fog-of-war engine.
//!
//! Loaded from `fog_config.json` with support for an environment variable override.

use std::{
    collections::HashMap,
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use bevy::prelude::Resource;
use serde::Deserialize;
use thiserror::Error;

use crate::game::UnitKind;

pub const BUILTIN_FOG_CONFIG: &str = include_str!("data/fog_config.json");

/// Root configuration for the fog engine.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FogConfig {
    pub vision: VisionConfig,
    pub fade: FadeConfig,
    pub grid: GridConfig,
    pub overlay: OverlayConfig,
}

impl FogConfig {
    pub fn builtin() -> Arc<Self> {
        Arc::new(
            serde_json::from_str(BUILTIN_FOG_CONFIG).expect("builtin fog config should parse"),
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self, FogConfigError> {
        let config: FogConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, FogConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| FogConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        FogConfig::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<(), FogConfigError> {
        if self.grid.chunk_size == 0 {
            return Err(FogConfigError::Invalid("grid.chunk_size must be positive".into()));
        }
        if !self
            .grid
            .downscale_thresholds
            .windows(2)
            .all(|pair| pair[0] < pair[1])
        {
            return Err(FogConfigError::Invalid(
                "grid.downscale_thresholds must be strictly ascending".into(),
            ));
        }
        let threshold = self.vision.mobile_skip_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(FogConfigError::Invalid(format!(
                "vision.mobile_skip_threshold must be in (0, 1], got {threshold}"
            )));
        }
        if self.fade.remembered_floor == 0 || self.fade.remembered_floor == u8::MAX {
            return Err(FogConfigError::Invalid(
                "fade.remembered_floor must lie strictly between 0 and 255".into(),
            ));
        }
        if self.fade.fade_step == 0 {
            return Err(FogConfigError::Invalid("fade.fade_step must be positive".into()));
        }
        Ok(())
    }
}

/// Vision sources and update cadence.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub update_interval_ms: u64,
    /// Radius granted by every border tile, in full-resolution tiles.
    pub border_radius: u32,
    /// Fraction of a mobile unit's disk that must already be visible for the
    /// unit to be skipped this update.
    pub mobile_skip_threshold: f32,
    /// Radius multiplier gained per level above 1 for upgradable kinds.
    pub level_bonus: f32,
    pub default_radius: u32,
    pub ranges: HashMap<String, u32>,
}

impl VisionConfig {
    /// Vision radius in full-resolution tiles for a unit of `kind` at `level`.
    pub fn radius_for(&self, kind: UnitKind, level: u32) -> u32 {
        let base = self
            .ranges
            .get(kind.config_key())
            .copied()
            .unwrap_or(self.default_radius);
        if !kind.is_upgradable() {
            return base;
        }
        let levels_above_first = level.max(1) - 1;
        let scale = 1.0 + levels_above_first as f32 * self.level_bonus;
        (base as f32 * scale).round() as u32
    }
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 100,
            border_radius: 10,
            mobile_skip_threshold: 0.75,
            level_bonus: 0.2,
            default_radius: 15,
            ranges: default_vision_ranges(),
        }
    }
}

fn default_vision_ranges() -> HashMap<String, u32> {
    [
        (UnitKind::City, 30),
        (UnitKind::Port, 80),
        (UnitKind::DefensePost, 70),
        (UnitKind::Warship, 140),
        (UnitKind::MissileSilo, 200),
        (UnitKind::SamLauncher, 400),
        (UnitKind::Factory, 35),
    ]
    .into_iter()
    .map(|(kind, radius)| (kind.config_key().to_string(), radius))
    .collect()
}

/// How previously seen cells fade back toward the remembered floor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FadeConfig {
    pub remembered_floor: u8,
    /// Fog added per merge to a seen-but-not-visible cell until it reaches the floor.
    pub fade_step: u8,
}

impl Default for FadeConfig {
    fn default() -> Self {
        Self {
            remembered_floor: 204,
            fade_step: 204,
        }
    }
}

/// Low-resolution grid sizing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Map areas (full-resolution tiles) at which the downscale factor steps up by one.
    pub downscale_thresholds: Vec<u64>,
    /// Side length of a dirty-tracking chunk in low-resolution cells.
    pub chunk_size: u32,
}

impl GridConfig {
    pub fn scale_for_area(&self, area: u64) -> u32 {
        1 + self
            .downscale_thresholds
            .iter()
            .filter(|&&threshold| area >= threshold)
            .count() as u32
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            downscale_thresholds: vec![1_000_000, 4_000_000, 9_000_000],
            chunk_size: 16,
        }
    }
}

/// Overlay colours.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub fog_rgb: [u8; 3],
    pub territory_rgba: [u8; 4],
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            fog_rgb: [0, 0, 0],
            territory_rgba: [40, 120, 255, 48],
        }
    }
}

#[derive(Debug, Error)]
pub enum FogConfigError {
    #[error("failed to parse fog config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read fog config from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid fog config: {0}")]
    Invalid(String),
}

/// Handle for accessing the fog configuration.
#[derive(Resource, Debug, Clone)]
pub struct FogConfigHandle(pub Arc<FogConfig>);

impl FogConfigHandle {
    pub fn new(config: Arc<FogConfig>) -> Self {
        Self(config)
    }

    pub fn get(&self) -> Arc<FogConfig> {
        Arc::clone(&self.0)
    }
}

/// Load fog configuration from `FOG_CONFIG_PATH`, falling back to the builtin.
pub fn load_fog_config_from_env() -> Arc<FogConfig> {
    if let Some(path) = env::var("FOG_CONFIG_PATH").ok().map(PathBuf::from) {
        match FogConfig::from_file(&path) {
            Ok(config) => {
                tracing::info!(
                    target: "fog::config",
                    path = %path.display(),
                    "fog_config.loaded=file"
                );
                return Arc::new(config);
            }
            Err(err) => {
                tracing::warn!(
                    target: "fog::config",
                    path = %path.display(),
                    error = %err,
                    "fog_config.load_failed"
                );
            }
        }
    }

    tracing::info!(target: "fog::config", "fog_config.loaded=builtin");
    FogConfig::builtin()
}

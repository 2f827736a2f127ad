//! Configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::keystone::KeystoneSettings;
use crate::outline::DEFAULT_ARC_SEGMENTS;
use crate::render::{RenderControls, RenderParams};
use crate::transform::{clamp_steps, DEFAULT_MIN_ROWS};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8092,
        }
    }
}

/// Output surface and mesh settings, plus the initial operator controls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Projector frame size in pixels
    pub surface_width: u32,
    pub surface_height: u32,
    /// Horizontal mesh cells (clamped to 8..=40)
    pub subdivisions: u32,
    /// Floor for the vertical mesh cell count
    #[serde(default = "default_mesh_min_rows")]
    pub mesh_min_rows: u32,
    #[serde(default = "default_arc_segments")]
    pub outline_arc_segments: u32,
    #[serde(default = "default_true")]
    pub warp_enabled: bool,
    #[serde(default)]
    pub show_grid: bool,
    #[serde(default = "default_true")]
    pub show_outline: bool,
}

fn default_mesh_min_rows() -> u32 {
    DEFAULT_MIN_ROWS
}

fn default_arc_segments() -> u32 {
    DEFAULT_ARC_SEGMENTS
}

fn default_true() -> bool {
    true
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            surface_width: 1280,
            surface_height: 800,
            subdivisions: 18,
            mesh_min_rows: DEFAULT_MIN_ROWS,
            outline_arc_segments: DEFAULT_ARC_SEGMENTS,
            warp_enabled: true,
            show_grid: false,
            show_outline: true,
        }
    }
}

/// Pointer interaction tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeystoneConfig {
    pub handle_radius: f64,
    pub hit_margin: f64,
    pub wheel_grow: f64,
    pub wheel_shrink: f64,
}

impl Default for KeystoneConfig {
    fn default() -> Self {
        let d = KeystoneSettings::default();
        Self {
            handle_radius: d.handle_radius,
            hit_margin: d.hit_margin,
            wheel_grow: d.wheel_grow,
            wheel_shrink: d.wheel_shrink,
        }
    }
}

/// Local state storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the key-value records
    pub state_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("state"),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub render: RenderConfig,

    #[serde(default)]
    pub keystone: KeystoneConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from a file, or create default if it doesn't exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            tracing::info!("Created default configuration at {:?}", path);
            Ok(config)
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory {:?}", parent))?;
            }
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    pub fn render_params(&self) -> RenderParams {
        RenderParams {
            surface: (
                self.render.surface_width.max(1),
                self.render.surface_height.max(1),
            ),
            mesh_min_rows: self.render.mesh_min_rows.max(1),
            outline_arc_segments: self.render.outline_arc_segments.max(1),
            handle_radius: self.keystone.handle_radius,
        }
    }

    pub fn initial_controls(&self) -> RenderControls {
        RenderControls {
            warp_enabled: self.render.warp_enabled,
            show_grid: self.render.show_grid,
            show_outline: self.render.show_outline,
            subdivisions: clamp_steps(self.render.subdivisions),
        }
    }

    pub fn keystone_settings(&self) -> KeystoneSettings {
        KeystoneSettings {
            handle_radius: self.keystone.handle_radius,
            hit_margin: self.keystone.hit_margin,
            wheel_grow: self.keystone.wheel_grow,
            wheel_shrink: self.keystone.wheel_shrink,
        }
    }
}

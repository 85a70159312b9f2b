//! Monitor configuration.
//!
//! Loaded from `monitor_config.json` with support for an environment variable override.

use std::{
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::filter::{FilterError, FilterSpec, VisibilityFilter};
use crate::instances::{ColorMode, InstanceSettings, ViewScale, GROWTH_CHUNK, MIN_CAPACITY};
use crate::palette::{default_palette, Palette, Rgba};
use crate::regions::{RegionSettings, DEFAULT_CELL_SIZE};
use crate::telemetry::DEFAULT_FRAME_HISTORY;

pub const BUILTIN_MONITOR_CONFIG: &str = include_str!("data/monitor_config.json");
pub const MONITOR_CONFIG_ENV: &str = "MONITOR_CONFIG_PATH";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub index: IndexConfig,
    pub view: ViewConfig,
    pub regions: RegionConfig,
    pub telemetry: TelemetryConfig,
    pub palette: Vec<Rgba>,
    pub filter: FilterSpec,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            index: IndexConfig::default(),
            view: ViewConfig::default(),
            regions: RegionConfig::default(),
            telemetry: TelemetryConfig::default(),
            palette: default_palette(),
            filter: FilterSpec::default(),
        }
    }
}

impl MonitorConfig {
    pub fn builtin() -> Arc<Self> {
        Arc::new(
            serde_json::from_str(BUILTIN_MONITOR_CONFIG)
                .expect("builtin monitor config should parse"),
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self, MonitorConfigError> {
        let config: MonitorConfig = serde_json::from_str(json)?;
        config.default_filter()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, MonitorConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| MonitorConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        MonitorConfig::from_json_str(&contents)
    }

    pub fn palette(&self) -> Palette {
        Palette::new(self.palette.clone())
    }

    pub fn default_filter(&self) -> Result<VisibilityFilter, FilterError> {
        VisibilityFilter::try_from(&self.filter)
    }

    pub fn instance_settings(&self) -> InstanceSettings {
        InstanceSettings {
            initial_capacity: self.index.initial_capacity,
            growth_chunk: self.index.growth_chunk,
            min_capacity: self.index.min_capacity,
            view: ViewScale {
                visible_half_extent: self.view.visible_half_extent,
                full_half_extent: self.view.full_half_extent,
            },
            initial_zoom: self.view.initial_zoom,
            color_mode: self.view.color_mode,
            palette: self.palette(),
        }
    }

    pub fn region_settings(&self) -> RegionSettings {
        RegionSettings {
            cell_size: self.regions.cell_size,
            debounce: Duration::from_millis(self.regions.debounce_ms),
            palette: self.palette(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub initial_capacity: usize,
    pub growth_chunk: usize,
    pub min_capacity: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            initial_capacity: GROWTH_CHUNK,
            growth_chunk: GROWTH_CHUNK,
            min_capacity: MIN_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    pub visible_half_extent: f32,
    pub full_half_extent: f32,
    pub initial_zoom: f32,
    pub color_mode: ColorMode,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            visible_half_extent: 8192.0,
            full_half_extent: 8192.0,
            initial_zoom: 4.0,
            color_mode: ColorMode::ObjectType,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    pub cell_size: f32,
    pub debounce_ms: u64,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            cell_size: DEFAULT_CELL_SIZE,
            debounce_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub frame_history_len: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            frame_history_len: DEFAULT_FRAME_HISTORY,
        }
    }
}

#[derive(Debug, Error)]
pub enum MonitorConfigError {
    #[error("failed to parse monitor config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read monitor config from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid default filter in monitor config: {0}")]
    Filter(#[from] FilterError),
}

/// Where the active configuration came from.
#[derive(Debug, Clone, Default)]
pub struct MonitorConfigMetadata {
    path: Option<PathBuf>,
}

impl MonitorConfigMetadata {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }
}

/// Load the monitor configuration from `MONITOR_CONFIG_PATH` or the crate
/// default path, falling back to the builtin config.
pub fn load_monitor_config_from_env() -> (Arc<MonitorConfig>, MonitorConfigMetadata) {
    let path = env::var(MONITOR_CONFIG_ENV)
        .ok()
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src/data/monitor_config.json")
        });
    load_monitor_config(&path)
}

pub fn load_monitor_config(path: &Path) -> (Arc<MonitorConfig>, MonitorConfigMetadata) {
    match MonitorConfig::from_file(path) {
        Ok(config) => {
            tracing::info!(
                target: "cluster_monitor::config",
                path = %path.display(),
                "monitor_config.loaded=file"
            );
            return (
                Arc::new(config),
                MonitorConfigMetadata::new(Some(path.to_path_buf())),
            );
        }
        Err(err) => {
            tracing::warn!(
                target: "cluster_monitor::config",
                path = %path.display(),
                error = %err,
                "monitor_config.load_failed"
            );
        }
    }

    let config = MonitorConfig::builtin();
    tracing::info!(target: "cluster_monitor::config", "monitor_config.loaded=builtin");
    (config, MonitorConfigMetadata::new(None))
}

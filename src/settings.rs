use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use log::{LevelFilter, debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::render::{DEFAULT_CACHE_SIZE, DEFAULT_IDLE_CLEANUP_TIMEOUT, RenderConfig};

pub const CURRENT_VERSION: u32 = 2;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "pagerat";

/// Page spread layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SpreadMode {
    #[default]
    None,
    Odd,
    Even,
}

/// How pages are laid out for scrolling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScrollMode {
    #[default]
    Vertical,
    Horizontal,
    Wrapped,
    Page,
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write settings file {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] serde_yaml::Error),

    #[error("unknown log level {0:?}")]
    InvalidLogLevel(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default = "default_cache_size")]
    pub base_cache_size: usize,

    #[serde(default = "default_idle_cleanup_timeout_ms")]
    pub idle_cleanup_timeout_ms: u64,

    #[serde(default)]
    pub spread_mode: SpreadMode,

    #[serde(default)]
    pub scroll_mode: ScrollMode,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Version 1 stored the idle timeout in whole seconds
    #[serde(default, skip_serializing)]
    idle_cleanup_secs: Option<u64>,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_cache_size() -> usize {
    DEFAULT_CACHE_SIZE
}

fn default_idle_cleanup_timeout_ms() -> u64 {
    DEFAULT_IDLE_CLEANUP_TIMEOUT.as_millis() as u64
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            base_cache_size: default_cache_size(),
            idle_cleanup_timeout_ms: default_idle_cleanup_timeout_ms(),
            spread_mode: SpreadMode::default(),
            scroll_mode: ScrollMode::default(),
            log_level: default_log_level(),
            idle_cleanup_secs: None,
        }
    }
}

/// `<config dir>/pagerat/config.yaml`
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

impl Settings {
    /// Parse settings from YAML text, migrating older versions
    pub fn from_yaml(content: &str, path: &Path) -> Result<Self, SettingsError> {
        let mut settings: Settings =
            serde_yaml::from_str(content).map_err(|source| SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if settings.version < CURRENT_VERSION {
            migrate_settings(&mut settings);
        }
        Ok(settings)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, SettingsError> {
        let content = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_yaml(&content, path)?;
        debug!("Loaded settings from {path:?}");
        Ok(settings)
    }

    /// Load from `path`, or defaults if the file does not exist yet
    pub fn load_or_default(path: &Path) -> Result<Self, SettingsError> {
        if path.exists() {
            Self::load_from_path(path)
        } else {
            info!("Settings file {path:?} not found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|source| SettingsError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content).map_err(|source| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Saved settings to {path:?}");
        Ok(())
    }
}

fn migrate_settings(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );

    if settings.version < 2 {
        if let Some(secs) = settings.idle_cleanup_secs.take() {
            settings.idle_cleanup_timeout_ms = secs.saturating_mul(1000);
        }
    }

    settings.version = CURRENT_VERSION;
}

/// Values that take precedence over the settings file, e.g. from the command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub base_cache_size: Option<usize>,
    pub spread_mode: Option<SpreadMode>,
    pub scroll_mode: Option<ScrollMode>,
    pub log_level: Option<String>,
}

/// Settings after overrides and validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSettings {
    pub render: RenderConfig,
    pub spread_mode: SpreadMode,
    pub scroll_mode: ScrollMode,
    pub log_level: LevelFilter,
}

/// Merge `overrides` into `settings` and derive the render configuration
pub fn resolve(settings: &Settings, overrides: &Overrides) -> Result<ResolvedSettings, SettingsError> {
    let spread_mode = overrides.spread_mode.unwrap_or(settings.spread_mode);
    let scroll_mode = overrides.scroll_mode.unwrap_or(settings.scroll_mode);

    let mut base_cache_size = overrides.base_cache_size.unwrap_or(settings.base_cache_size);
    if base_cache_size == 0 {
        warn!("base_cache_size must be at least 1, using 1");
        base_cache_size = 1;
    }

    let level = overrides.log_level.as_deref().unwrap_or(&settings.log_level);
    let log_level = LevelFilter::from_str(level)
        .map_err(|_| SettingsError::InvalidLogLevel(level.to_string()))?;

    Ok(ResolvedSettings {
        render: RenderConfig {
            base_cache_size,
            pre_render_extra: spread_mode != SpreadMode::None
                && scroll_mode != ScrollMode::Horizontal,
            idle_cleanup_timeout: Duration::from_millis(settings.idle_cleanup_timeout_ms),
        },
        spread_mode,
        scroll_mode,
        log_level,
    })
}

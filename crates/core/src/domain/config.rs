//! Configuration management for Murmur
//!
//! This module provides:
//! - Configuration structs for the gate, analysis rates and play sessions
//! - TOML load/save of the whole configuration
//! - A manager for the main config file with corrupt-file fallback

use crate::domain::gate::{DEFAULT_THRESHOLD, DEFAULT_TICK_INTERVAL};
use crate::domain::meter::Resolution;
use crate::domain::preset::REDUCER_DEFAULT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, error, info, instrument};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Gate target of a playback session; louder than a bare reducer's
pub const SESSION_TARGET: f32 = 20.0;

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("File watch error: {0}")]
    WatchError(#[from] notify::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Preset not found: {0}")]
    PresetNotFound(String),
}

/// Noise gate settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Level below which the floor gain applies
    pub threshold: f32,

    /// Level the gate normalises toward
    pub target: f32,

    /// Control tick period in milliseconds
    pub tick_interval_ms: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            target: SESSION_TARGET,
            tick_interval_ms: DEFAULT_TICK_INTERVAL.as_millis() as u64,
        }
    }
}

impl GateConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Analyser sizes and refresh rates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// FFT size of the meters that drive control decisions
    pub gate_fft_size: usize,

    /// FFT size of the before/after display analysers
    pub display_fft_size: usize,

    pub spectrum_refresh_ms: u64,

    pub measurement_interval_ms: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            gate_fft_size: Resolution::Control.fft_size(),
            display_fft_size: Resolution::Display.fft_size(),
            spectrum_refresh_ms: 50,
            measurement_interval_ms: 16,
        }
    }
}

impl AnalysisConfig {
    pub fn spectrum_refresh(&self) -> Duration {
        Duration::from_millis(self.spectrum_refresh_ms)
    }

    pub fn measurement_interval(&self) -> Duration {
        Duration::from_millis(self.measurement_interval_ms)
    }
}

/// Play session behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Derive the gate threshold from the running statistics
    pub auto_threshold: bool,

    /// Number of mean deviations the auto threshold sits below the mean
    pub deviation_factor: f32,

    /// Linear gain applied before the reducer
    pub input_gain: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_threshold: true,
            deviation_factor: 2.0,
            input_gain: 1.0,
        }
    }
}

/// Preset storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresetConfig {
    /// Preset directory; relative paths resolve against the config directory
    pub directory: PathBuf,

    /// Preset applied when a session starts
    pub default_preset: String,
}

impl Default for PresetConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("presets"),
            default_preset: REDUCER_DEFAULT.to_string(),
        }
    }
}

/// Complete Murmur configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MurmurConfig {
    pub gate: GateConfig,
    pub analysis: AnalysisConfig,
    pub session: SessionConfig,
    pub presets: PresetConfig,
}

fn check(condition: bool, message: impl FnOnce() -> String) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(ConfigError::Invalid(message()))
    }
}

fn is_fft_size(size: usize) -> bool {
    size.is_power_of_two() && (32..=32768).contains(&size)
}

impl MurmurConfig {
    /// Load configuration from TOML file
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;

        debug!("Configuration loaded successfully");
        Ok(config)
    }

    /// Save configuration to TOML file
    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Saving configuration");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        fs::write(path, toml_str).await?;

        debug!("Configuration saved successfully");
        Ok(())
    }

    /// Create factory default configuration
    pub fn factory_default() -> Self {
        Self::default()
    }

    /// Reject values no component would accept
    pub fn validate(&self) -> Result<()> {
        let gate = &self.gate;
        check(gate.threshold.is_finite(), || {
            format!("gate.threshold must be finite, got {}", gate.threshold)
        })?;
        check(gate.target.is_finite() && gate.target >= 0.0, || {
            format!("gate.target must be a non-negative level, got {}", gate.target)
        })?;
        check(gate.tick_interval_ms > 0, || {
            "gate.tick_interval_ms must be positive".to_string()
        })?;

        let analysis = &self.analysis;
        check(is_fft_size(analysis.gate_fft_size), || {
            format!(
                "analysis.gate_fft_size must be a power of two in 32..=32768, got {}",
                analysis.gate_fft_size
            )
        })?;
        check(is_fft_size(analysis.display_fft_size), || {
            format!(
                "analysis.display_fft_size must be a power of two in 32..=32768, got {}",
                analysis.display_fft_size
            )
        })?;
        check(
            analysis.spectrum_refresh_ms > 0 && analysis.measurement_interval_ms > 0,
            || "analysis refresh intervals must be positive".to_string(),
        )?;

        let session = &self.session;
        check(
            session.deviation_factor.is_finite() && session.deviation_factor >= 0.0,
            || {
                format!(
                    "session.deviation_factor must be non-negative, got {}",
                    session.deviation_factor
                )
            },
        )?;
        check(session.input_gain.is_finite() && session.input_gain >= 0.0, || {
            format!(
                "session.input_gain must be non-negative, got {}",
                session.input_gain
            )
        })?;

        Ok(())
    }
}

/// Manager for the main configuration file
///
/// Manages `~/.config/murmur/config.toml`, writing the factory default on
/// first run.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: PathBuf,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(config_dir: PathBuf) -> Self {
        let config_path = config_dir.join("config.toml");
        Self {
            config_dir,
            config_path,
        }
    }

    /// `~/.config/murmur` on Linux, the platform equivalent elsewhere
    pub fn default_config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("murmur"))
            .ok_or_else(|| ConfigError::Invalid("Could not determine config directory".to_string()))
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Preset directory of `config`, resolved against the config directory
    pub fn preset_dir(&self, config: &MurmurConfig) -> PathBuf {
        if config.presets.directory.is_absolute() {
            config.presets.directory.clone()
        } else {
            self.config_dir.join(&config.presets.directory)
        }
    }

    /// Load configuration from file
    ///
    /// A missing file yields the factory default, which is saved for next
    /// time. A corrupt file is copied to `config.toml.corrupt` and replaced
    /// by the factory default in memory.
    #[instrument(skip(self))]
    pub async fn load(&self) -> MurmurConfig {
        if !self.config_path.exists() {
            info!(
                path = %self.config_path.display(),
                "Config file not found, creating factory default"
            );

            let config = MurmurConfig::factory_default();
            if let Err(e) = config.save_to_file(&self.config_path).await {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to save factory default config"
                );
            }
            return config;
        }

        match MurmurConfig::load_from_file(&self.config_path).await {
            Ok(config) => config,
            Err(e) => {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to load config, using factory default"
                );

                let backup_path = self.config_path.with_extension("toml.corrupt");
                if let Err(copy_err) = fs::copy(&self.config_path, &backup_path).await {
                    error!(
                        path = %backup_path.display(),
                        error = %copy_err,
                        "Failed to backup corrupt config"
                    );
                }

                MurmurConfig::factory_default()
            }
        }
    }

    #[instrument(skip(self, config))]
    pub async fn save(&self, config: &MurmurConfig) -> Result<()> {
        config.validate()?;
        fs::create_dir_all(&self.config_dir).await?;
        config.save_to_file(&self.config_path).await
    }

    /// Delete the config file if present
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<()> {
        if self.config_path.exists() {
            fs::remove_file(&self.config_path).await?;
            info!(path = %self.config_path.display(), "Configuration cleared");
        }
        Ok(())
    }

    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }
}

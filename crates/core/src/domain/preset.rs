//! Equalizer presets
//!
//! This module provides:
//! - [`EqPreset`], a named bundle of optional band arrays
//! - the built-in preset table
//! - TOML preset files managed by [`PresetManager`]
//! - [`PresetLibrary`], built-ins merged with user presets
//! - hot-reload notifications via [`PresetWatcher`]

use crate::domain::audio::Result as AudioResult;
use crate::domain::config::{ConfigError, Result};
use crate::domain::equalizer::{validate_frequency, validate_gain, validate_q};
use crate::domain::graph::FilterType;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

/// Name of the preset a noise reducer applies when it is built
pub const REDUCER_DEFAULT: &str = "Reducer Default";

/// Named equalizer configuration
///
/// Each array is optional and configures bands from index 0 upwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EqPreset {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequencies: Option<Vec<f32>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<FilterType>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q_factors: Option<Vec<f32>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gains: Option<Vec<f32>>,
}

impl EqPreset {
    /// An empty preset; applying it changes nothing
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            frequencies: None,
            types: None,
            q_factors: None,
            gains: None,
        }
    }

    pub fn with_frequencies(mut self, values: impl Into<Vec<f32>>) -> Self {
        self.frequencies = Some(values.into());
        self
    }

    pub fn with_types(mut self, values: impl Into<Vec<FilterType>>) -> Self {
        self.types = Some(values.into());
        self
    }

    pub fn with_q_factors(mut self, values: impl Into<Vec<f32>>) -> Self {
        self.q_factors = Some(values.into());
        self
    }

    pub fn with_gains(mut self, values: impl Into<Vec<f32>>) -> Self {
        self.gains = Some(values.into());
        self
    }

    /// Check every value, including ones past the end of a given chain
    pub fn validate(&self) -> AudioResult<()> {
        for &f in self.frequencies.iter().flatten() {
            validate_frequency(f)?;
        }
        for &q in self.q_factors.iter().flatten() {
            validate_q(q)?;
        }
        for &g in self.gains.iter().flatten() {
            validate_gain(g)?;
        }
        Ok(())
    }

    /// File stem used when the preset is saved
    pub fn file_stem(&self) -> String {
        let slug: String = self
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect();
        slug.split('-')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("-")
    }
}

/// The preset table shipped with the application
pub fn builtin_presets() -> Vec<EqPreset> {
    use FilterType::*;

    vec![
        EqPreset::new(REDUCER_DEFAULT)
            .with_frequencies([200.0, 200.0, 191.0, 677.0, 1014.0, 2858.0, 6240.0, 10000.0])
            .with_types([Highpass, Peaking, Notch, Notch, Notch, Notch, Lowpass, Peaking]),
        EqPreset::new("BG Noise/Rumble 1")
            .with_frequencies([164.0, 200.0, 191.0, 677.0, 1014.0, 2858.0, 6240.0])
            .with_types([Highpass, Peaking, Notch, Notch, Notch, Notch, Lowpass]),
        EqPreset::new("BG Noise/Rumble 2")
            .with_frequencies([144.0, 986.0])
            .with_types([Highpass, Notch])
            .with_q_factors([1.0, 0.5]),
        EqPreset::new("Low Volume 1")
            .with_frequencies([194.0, 524.0, 2675.0, 4058.0])
            .with_types([Highpass, Peaking, Notch, Peaking])
            .with_q_factors([1.0, 1.0, 0.5, 1.0])
            .with_gains([1.0, 16.0, 1.0, 20.0]),
        EqPreset::new("Low Volume 2")
            .with_frequencies([194.0, 524.0, 1600.0, 6000.0])
            .with_types([Highpass, Peaking, Notch, Peaking])
            .with_q_factors([1.0, 2.0, 1.0, 2.0])
            .with_gains([1.0, 16.0, 1.0, 20.0]),
    ]
}

/// Built-in reducer preset
pub fn reducer_default() -> EqPreset {
    builtin_presets()
        .into_iter()
        .find(|p| p.name == REDUCER_DEFAULT)
        .unwrap_or_else(|| EqPreset::new(REDUCER_DEFAULT))
}

/// Preset manager for TOML preset files in one directory
pub struct PresetManager {
    preset_dir: PathBuf,
}

impl PresetManager {
    /// Create a new preset manager
    pub fn new(preset_dir: PathBuf) -> Self {
        Self { preset_dir }
    }

    pub fn preset_dir(&self) -> &PathBuf {
        &self.preset_dir
    }

    fn path_for(&self, stem: &str) -> PathBuf {
        self.preset_dir.join(format!("{}.toml", stem))
    }

    /// List the stems of all preset files, sorted
    #[instrument(skip(self))]
    pub async fn list_presets(&self) -> Result<Vec<String>> {
        let mut presets = Vec::new();

        let mut entries = fs::read_dir(&self.preset_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "toml").unwrap_or(false) {
                if let Some(name) = path.file_stem().and_then(|n| n.to_str()) {
                    presets.push(name.to_string());
                }
            }
        }

        presets.sort();
        debug!(count = presets.len(), "Listed presets");
        Ok(presets)
    }

    /// Load a preset file by stem
    #[instrument(skip(self))]
    pub async fn load_preset(&self, stem: &str) -> Result<EqPreset> {
        let path = self.path_for(stem);

        if !path.exists() {
            return Err(ConfigError::PresetNotFound(stem.to_string()));
        }

        let contents = fs::read_to_string(&path).await?;
        let preset: EqPreset = toml::from_str(&contents)?;
        preset
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("{}: {e}", path.display())))?;
        Ok(preset)
    }

    /// Save a preset under its file stem
    #[instrument(skip(self, preset), fields(name = %preset.name))]
    pub async fn save_preset(&self, preset: &EqPreset) -> Result<PathBuf> {
        preset
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let stem = preset.file_stem();
        if stem.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "preset name '{}' has no usable characters",
                preset.name
            )));
        }

        fs::create_dir_all(&self.preset_dir).await?;
        let path = self.path_for(&stem);
        fs::write(&path, toml::to_string_pretty(preset)?).await?;
        info!(path = %path.display(), "Preset saved");
        Ok(path)
    }

    /// Delete a preset file by stem
    #[instrument(skip(self))]
    pub async fn delete_preset(&self, stem: &str) -> Result<()> {
        let path = self.path_for(stem);

        if !path.exists() {
            return Err(ConfigError::PresetNotFound(stem.to_string()));
        }

        fs::remove_file(&path).await?;
        info!(stem, "Preset deleted");
        Ok(())
    }

    /// Check if a preset file exists
    pub async fn preset_exists(&self, stem: &str) -> bool {
        self.path_for(stem).exists()
    }
}

/// Built-in presets plus any user presets, addressable by name or index
#[derive(Debug, Clone)]
pub struct PresetLibrary {
    presets: Vec<EqPreset>,
}

impl PresetLibrary {
    pub fn builtin() -> Self {
        Self {
            presets: builtin_presets(),
        }
    }

    /// Built-ins followed by every readable preset in the manager's directory
    ///
    /// A missing directory yields only the built-ins; unreadable files are
    /// logged and skipped.
    pub async fn load(manager: &PresetManager) -> Self {
        let mut library = Self::builtin();

        let stems = match manager.list_presets().await {
            Ok(stems) => stems,
            Err(e) => {
                debug!(dir = %manager.preset_dir().display(), error = %e, "No user presets");
                return library;
            }
        };

        for stem in stems {
            match manager.load_preset(&stem).await {
                Ok(preset) => library.insert(preset),
                Err(e) => warn!(stem, error = %e, "Skipping unreadable preset"),
            }
        }
        library
    }

    /// Add a preset, replacing one with the same name
    pub fn insert(&mut self, preset: EqPreset) {
        match self
            .presets
            .iter_mut()
            .find(|p| p.name.eq_ignore_ascii_case(&preset.name))
        {
            Some(existing) => *existing = preset,
            None => self.presets.push(preset),
        }
    }

    /// Find a preset by case-insensitive name
    pub fn get(&self, name: &str) -> Option<&EqPreset> {
        self.presets.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn by_index(&self, index: usize) -> Option<&EqPreset> {
        self.presets.get(index)
    }

    /// Resolve a selector: a list index, a name, or a file stem
    pub fn resolve(&self, selector: &str) -> Result<&EqPreset> {
        if let Ok(index) = selector.parse::<usize>() {
            if let Some(preset) = self.by_index(index) {
                return Ok(preset);
            }
        }
        self.get(selector)
            .or_else(|| self.presets.iter().find(|p| p.file_stem() == selector))
            .ok_or_else(|| ConfigError::PresetNotFound(selector.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &EqPreset> {
        self.presets.iter()
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}

impl Default for PresetLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}

/// File system watcher announcing created or modified preset files
pub struct PresetWatcher {
    _watcher: notify::RecommendedWatcher,
    changes_tx: broadcast::Sender<PathBuf>,
}

impl PresetWatcher {
    /// Watch a preset directory, creating it if needed
    pub async fn new(preset_dir: PathBuf) -> Result<Self> {
        use notify::Watcher;

        let (changes_tx, _changes_rx) = broadcast::channel(32);

        fs::create_dir_all(&preset_dir).await?;

        let tx_clone = changes_tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                if matches!(
                    event.kind,
                    notify::EventKind::Create(_) | notify::EventKind::Modify(_)
                ) {
                    for path in event.paths {
                        if path.extension().and_then(|e| e.to_str()) == Some("toml") {
                            if let Err(e) = tx_clone.send(path) {
                                error!("Failed to send preset change event: {}", e);
                            }
                        }
                    }
                }
            }
        })?;

        watcher.watch(&preset_dir, notify::RecursiveMode::NonRecursive)?;

        info!(path = %preset_dir.display(), "Preset watcher started");

        Ok(Self {
            _watcher: watcher,
            changes_tx,
        })
    }

    /// Subscribe to preset change events
    pub fn subscribe(&self) -> broadcast::Receiver<PathBuf> {
        self.changes_tx.subscribe()
    }
}

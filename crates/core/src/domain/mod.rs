//! Domain entities and control logic

pub mod audio;
pub mod config;
pub mod equalizer;
pub mod gate;
pub mod graph;
pub mod memory_graph;
pub mod meter;
pub mod preset;
pub mod reducer;
pub mod session;
pub mod spectrum;
pub mod stats;
pub mod task;

// Re-export specific items to avoid ambiguous glob imports
pub use audio::{AudioError, BufferDecoder, SampleBuffer};
pub use config::{ConfigError, ConfigManager, MurmurConfig};
pub use equalizer::{EqualizerBandSpec, ParametricEqualizer};
pub use gate::{GateControl, NoiseGate, FLOOR_GAIN};
pub use graph::{AudioGraph, BiquadParams, Connection, FilterType, NodeId, NodeKind};
pub use memory_graph::{Capabilities, MemoryGraph};
pub use meter::{LevelMeter, Resolution};
pub use preset::{builtin_presets, EqPreset, PresetLibrary, PresetManager, PresetWatcher};
pub use reducer::NoiseReducer;
pub use session::PlaybackSession;
pub use spectrum::{spectrum_bars, SpectrumAnalyser};
pub use stats::{Measurement, RunningStats};
pub use task::PeriodicTask;

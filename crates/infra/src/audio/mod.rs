//! Audio adapters backed by `hound` and `rustfft`
//!
//! - WAV decoding into [`murmur_core::domain::audio::SampleBuffer`]
//! - byte magnitude spectra matching the browser analyser node
//! - deterministic offline rendering of a playback session

pub mod decoder;
pub mod offline;
pub mod spectrum;

pub use decoder::WavDecoder;
pub use offline::{GateSummary, OfflineRenderer, RenderReport};
pub use spectrum::SpectrumAnalyzer;

//! Platform-side adapters for murmur
//!
//! Decoding, FFT spectrum snapshots and the offline renderer that drives a
//! playback session over a decoded file.

pub mod audio;

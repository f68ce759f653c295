//! Audio platform errors and decoded sample buffers
//!
//! The audio platform (graph execution, decoding, analysis) is an external
//! collaborator. This module defines the error taxonomy shared by every
//! component that talks to it, the decoded buffer handle, and the decoder
//! seam. Concrete decoders live in the `infra` crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur in the audio subsystem
#[derive(Debug, Error)]
pub enum AudioError {
    /// The platform lacks a capability the caller requires (fatal at init)
    #[error("Capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// A source could not be decoded into a sample buffer
    #[error("Decode failure: {0}")]
    DecodeFailure(String),

    /// A setter or preset supplied an out-of-range value
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Gain computed against a zero or near-zero level
    #[error("Degenerate division: level {level} cannot normalise to target {target}")]
    DivisionDegenerate { level: f32, target: f32 },

    /// A node handle does not belong to the graph
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// An operation was requested before its prerequisites were met
    #[error("Not ready: {0}")]
    NotReady(String),

    /// No async runtime is available to schedule periodic work
    #[error("Runtime error: {0}")]
    Runtime(String),
}

pub type Result<T> = std::result::Result<T, AudioError>;

/// Decoded audio, interleaved `f32` samples normalised to [-1.0, 1.0]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleBuffer {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl SampleBuffer {
    pub fn new(sample_rate: u32, channels: u16, samples: Vec<f32>) -> Result<Self> {
        if sample_rate == 0 {
            return Err(AudioError::InvalidConfiguration(
                "sample rate must be positive".to_string(),
            ));
        }
        if channels == 0 {
            return Err(AudioError::InvalidConfiguration(
                "channel count must be positive".to_string(),
            ));
        }
        Ok(Self {
            sample_rate,
            channels,
            samples,
        })
    }

    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Duration in seconds
    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    /// Average all channels of each frame into a single mono signal
    pub fn mono(&self) -> Vec<f32> {
        let channels = self.channels as usize;
        if channels == 1 {
            return self.samples.clone();
        }
        self.samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    }
}

/// Turns an encoded file into a sample buffer
///
/// Decoding is asynchronous; a failure is reported per file and never
/// tears down the session that requested it.
#[async_trait]
pub trait BufferDecoder: Send + Sync {
    /// Decode a complete file held in memory
    async fn decode(&self, name: &str, bytes: Vec<u8>) -> Result<SampleBuffer>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_frames_and_duration() {
        let buffer = SampleBuffer::new(4, 2, vec![0.0; 16]).unwrap();
        assert_eq!(buffer.frames(), 8);
        assert!((buffer.duration_secs() - 2.0).abs() < 1e-9);
        assert!(!buffer.is_empty());
    }

    #[test]
    fn test_buffer_mono_mixdown() {
        let buffer = SampleBuffer::new(48000, 2, vec![1.0, 0.0, 0.5, 0.5]).unwrap();
        assert_eq!(buffer.mono(), vec![0.5, 0.5]);
    }

    #[test]
    fn test_buffer_rejects_zero_rate() {
        assert!(matches!(
            SampleBuffer::new(0, 1, Vec::new()),
            Err(AudioError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_error_display() {
        let err = AudioError::DivisionDegenerate {
            level: 0.0,
            target: 10.0,
        };
        assert!(err.to_string().contains("Degenerate"));
    }
}

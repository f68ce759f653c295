//! Loudness metering from magnitude spectra
//!
//! A [`LevelMeter`] owns one analyser node and reduces its byte spectrum to
//! a single loudness value: the mean over all frequency bins.

use crate::domain::audio::Result;
use crate::domain::graph::{AudioGraph, NodeId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::trace;

/// Analysis resolution of a meter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// 512-point FFT, used to drive gain control
    Control,
    /// 2048-point FFT, used for spectrum display
    Display,
    Custom(usize),
}

impl Resolution {
    pub fn fft_size(&self) -> usize {
        match self {
            Resolution::Control => 512,
            Resolution::Display => 2048,
            Resolution::Custom(size) => *size,
        }
    }

    pub fn from_fft_size(size: usize) -> Self {
        match size {
            512 => Resolution::Control,
            2048 => Resolution::Display,
            size => Resolution::Custom(size),
        }
    }
}

/// Arithmetic mean of a byte spectrum; an empty spectrum reads as silence
pub fn mean_level(spectrum: &[u8]) -> f32 {
    if spectrum.is_empty() {
        return 0.0;
    }
    let total: u32 = spectrum.iter().map(|&b| b as u32).sum();
    total as f32 / spectrum.len() as f32
}

/// Loudness meter over a spectrum analyser
#[derive(Debug)]
pub struct LevelMeter {
    graph: Arc<dyn AudioGraph>,
    node: NodeId,
    resolution: Resolution,
    // Reused between reads so metering does not allocate per tick
    scratch: Vec<u8>,
}

impl LevelMeter {
    /// Create the meter's analyser node
    ///
    /// Fails with `CapabilityUnavailable` when the graph cannot analyse.
    pub fn new(graph: Arc<dyn AudioGraph>, resolution: Resolution) -> Result<Self> {
        let node = graph.create_analyser(resolution.fft_size())?;
        let bins = graph.frequency_bin_count(node)?;
        Ok(Self {
            graph,
            node,
            resolution,
            scratch: vec![0; bins],
        })
    }

    /// The analyser node; route audio into it to meter it
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn bin_count(&self) -> usize {
        self.scratch.len()
    }

    /// Read the current spectrum and return its mean bin magnitude
    ///
    /// Every call re-reads the analyser; nothing is cached.
    pub fn current_level(&mut self) -> Result<f32> {
        let written = self.graph.byte_frequency_data(self.node, &mut self.scratch)?;
        let level = mean_level(&self.scratch[..written]);
        trace!(node = %self.node, level, "Meter read");
        Ok(level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::audio::AudioError;
    use crate::domain::memory_graph::{Capabilities, MemoryGraph};

    #[test]
    fn test_mean_level() {
        assert_eq!(mean_level(&[]), 0.0);
        assert_eq!(mean_level(&[0, 0, 0, 0]), 0.0);
        assert_eq!(mean_level(&[10, 20, 30, 40]), 25.0);
        assert_eq!(mean_level(&[255; 256]), 255.0);
    }

    #[test]
    fn test_resolutions() {
        assert_eq!(Resolution::Control.fft_size(), 512);
        assert_eq!(Resolution::Display.fft_size(), 2048);
        assert_eq!(Resolution::from_fft_size(1024), Resolution::Custom(1024));
        assert_eq!(Resolution::from_fft_size(512), Resolution::Control);
    }

    #[test]
    fn test_meter_reads_spectrum_every_call() {
        let graph = Arc::new(MemoryGraph::new(48000));
        let mut meter = LevelMeter::new(graph.clone(), Resolution::Control).unwrap();
        assert_eq!(meter.bin_count(), 256);

        assert_eq!(meter.current_level().unwrap(), 0.0);

        graph.fill_spectrum(meter.node(), 12).unwrap();
        assert_eq!(meter.current_level().unwrap(), 12.0);

        graph.fill_spectrum(meter.node(), 3).unwrap();
        assert_eq!(meter.current_level().unwrap(), 3.0);
    }

    #[test]
    fn test_meter_half_filled_spectrum() {
        let graph = Arc::new(MemoryGraph::new(48000));
        let mut meter = LevelMeter::new(graph.clone(), Resolution::Control).unwrap();

        let spectrum: Vec<u8> = (0..256).map(|i| if i < 128 { 1 } else { 0 }).collect();
        graph.set_spectrum(meter.node(), &spectrum).unwrap();

        assert_eq!(meter.current_level().unwrap(), 0.5);
    }

    #[test]
    fn test_meter_fails_fast_without_analysis() {
        let graph = Arc::new(MemoryGraph::with_capabilities(
            48000,
            Capabilities { analysis: false },
        ));
        let result = LevelMeter::new(graph, Resolution::Display);
        assert!(matches!(result, Err(AudioError::CapabilityUnavailable(_))));
    }
}

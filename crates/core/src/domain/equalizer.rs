//! N-band parametric equalizer
//!
//! A chain of biquad stages behind an input gain node:
//!
//! ```text
//! input -> stage 0 -> stage 1 -> ... -> stage N-1 (output)
//! ```
//!
//! Bulk setters configure bands by index. Input shorter than the chain
//! leaves trailing bands untouched, input longer than the chain is ignored.
//! Every value is validated before any band changes, so a rejected call
//! leaves the equalizer exactly as it was.

use crate::domain::audio::{AudioError, Result};
use crate::domain::graph::{AudioGraph, BiquadParams, FilterType, NodeId};
use crate::domain::preset::EqPreset;
use std::sync::Arc;
use tracing::debug;

/// Configuration of one equalizer band
pub type EqualizerBandSpec = BiquadParams;

/// Default number of bands
pub const DEFAULT_BAND_COUNT: usize = 8;

/// Center frequency of band 0 before any preset is applied
pub const BASE_FREQUENCY_HZ: f32 = 64.0;

pub(crate) fn validate_frequency(value: f32) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(AudioError::InvalidConfiguration(format!(
            "band frequency must be a positive number of Hz, got {value}"
        )))
    }
}

pub(crate) fn validate_q(value: f32) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(AudioError::InvalidConfiguration(format!(
            "band Q must be positive, got {value}"
        )))
    }
}

pub(crate) fn validate_gain(value: f32) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(AudioError::InvalidConfiguration(format!(
            "band gain must be finite, got {value}"
        )))
    }
}

/// Chain of configurable filter stages
#[derive(Debug)]
pub struct ParametricEqualizer {
    graph: Arc<dyn AudioGraph>,
    input: NodeId,
    stages: Vec<NodeId>,
    bands: Vec<EqualizerBandSpec>,
}

impl ParametricEqualizer {
    /// Create an equalizer with [`DEFAULT_BAND_COUNT`] bands
    pub fn new(graph: Arc<dyn AudioGraph>) -> Result<Self> {
        Self::with_band_count(graph, DEFAULT_BAND_COUNT)
    }

    /// Create an equalizer with `count` bands, chained in index order
    pub fn with_band_count(graph: Arc<dyn AudioGraph>, count: usize) -> Result<Self> {
        if count == 0 {
            return Err(AudioError::InvalidConfiguration(
                "an equalizer needs at least one band".to_string(),
            ));
        }

        let input = graph.create_gain()?;
        let mut stages = Vec::with_capacity(count);
        let mut bands = Vec::with_capacity(count);

        for index in 0..count {
            let spec = Self::default_band(index);
            let stage = graph.create_biquad(spec)?;
            if let Some(&previous) = stages.last() {
                graph.connect(previous, stage)?;
            }
            stages.push(stage);
            bands.push(spec);
        }
        graph.connect(input, stages[0])?;

        debug!(bands = count, %input, "Equalizer created");

        Ok(Self {
            graph,
            input,
            stages,
            bands,
        })
    }

    /// Initial configuration of band `index`: peaking at 64·2^index Hz, Q 1
    pub fn default_band(index: usize) -> EqualizerBandSpec {
        EqualizerBandSpec {
            filter_type: FilterType::Peaking,
            frequency_hz: BASE_FREQUENCY_HZ * 2f32.powi(index as i32),
            q: 1.0,
            gain_db: 0.0,
        }
    }

    /// Entry node of the chain
    pub fn input(&self) -> NodeId {
        self.input
    }

    /// First filter stage
    pub fn first_stage(&self) -> NodeId {
        self.stages[0]
    }

    /// Last filter stage; the chain's output
    pub fn output(&self) -> NodeId {
        self.stages[self.stages.len() - 1]
    }

    pub fn stages(&self) -> &[NodeId] {
        &self.stages
    }

    pub fn bands(&self) -> &[EqualizerBandSpec] {
        &self.bands
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// Set band center/cutoff frequencies; returns how many bands changed
    pub fn set_frequencies(&mut self, values: &[f32]) -> Result<usize> {
        self.update("frequency", values, validate_frequency, |band, v| {
            band.frequency_hz = v
        })
    }

    /// Set band filter types; returns how many bands changed
    pub fn set_types(&mut self, values: &[FilterType]) -> Result<usize> {
        self.update("type", values, |_| Ok(()), |band, v| band.filter_type = v)
    }

    /// Set band Q factors; returns how many bands changed
    pub fn set_q_factors(&mut self, values: &[f32]) -> Result<usize> {
        self.update("q", values, validate_q, |band, v| band.q = v)
    }

    /// Set band gains in dB; returns how many bands changed
    ///
    /// Gain only shapes peaking and shelving bands, but is stored for all.
    pub fn set_gains(&mut self, values: &[f32]) -> Result<usize> {
        self.update("gain", values, validate_gain, |band, v| band.gain_db = v)
    }

    /// Apply a preset: frequencies, then types, then Q factors, then gains
    ///
    /// The whole preset is validated first; nothing changes if any value is
    /// rejected.
    pub fn apply_preset(&mut self, preset: &EqPreset) -> Result<()> {
        preset.validate()?;

        if let Some(frequencies) = &preset.frequencies {
            self.set_frequencies(frequencies)?;
        }
        if let Some(types) = &preset.types {
            self.set_types(types)?;
        }
        if let Some(q_factors) = &preset.q_factors {
            self.set_q_factors(q_factors)?;
        }
        if let Some(gains) = &preset.gains {
            self.set_gains(gains)?;
        }

        debug!(preset = %preset.name, "Equalizer preset applied");
        Ok(())
    }

    fn update<T: Copy>(
        &mut self,
        attribute: &str,
        values: &[T],
        validate: impl Fn(T) -> Result<()>,
        apply: impl Fn(&mut EqualizerBandSpec, T),
    ) -> Result<usize> {
        let count = self.bands.len().min(values.len());
        for &value in &values[..count] {
            validate(value)?;
        }

        for (index, &value) in values[..count].iter().enumerate() {
            let mut band = self.bands[index];
            apply(&mut band, value);
            self.graph.set_biquad(self.stages[index], band)?;
            self.bands[index] = band;
        }

        debug!(
            attribute,
            applied = count,
            ignored = values.len() - count,
            "Equalizer bands updated"
        );
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::Connection;
    use crate::domain::memory_graph::MemoryGraph;
    use proptest::prelude::*;

    fn equalizer() -> (Arc<MemoryGraph>, ParametricEqualizer) {
        let graph = Arc::new(MemoryGraph::new(48000));
        let eq = ParametricEqualizer::new(graph.clone()).unwrap();
        (graph, eq)
    }

    #[test]
    fn test_default_bands() {
        let (_, eq) = equalizer();
        assert_eq!(eq.band_count(), 8);

        let frequencies: Vec<f32> = eq.bands().iter().map(|b| b.frequency_hz).collect();
        assert_eq!(
            frequencies,
            vec![64.0, 128.0, 256.0, 512.0, 1024.0, 2048.0, 4096.0, 8192.0]
        );
        assert!(eq.bands().iter().all(|b| b.filter_type == FilterType::Peaking));
        assert!(eq.bands().iter().all(|b| b.q == 1.0));
    }

    #[test]
    fn test_stages_are_chained_in_order() {
        let (graph, eq) = equalizer();
        let stages = eq.stages();

        let mut expected = vec![Connection::new(eq.input(), stages[0])];
        for pair in stages.windows(2) {
            expected.push(Connection::new(pair[0], pair[1]));
        }
        expected.sort();

        assert_eq!(graph.connections(), expected);
        assert_eq!(eq.output(), stages[7]);
    }

    #[test]
    fn test_graph_mirrors_band_state() {
        let (graph, mut eq) = equalizer();
        eq.set_types(&[FilterType::Highpass, FilterType::Notch]).unwrap();
        eq.set_q_factors(&[0.7]).unwrap();

        for (stage, band) in eq.stages().iter().zip(eq.bands()) {
            assert_eq!(graph.biquad(*stage).unwrap(), *band);
        }
    }

    #[test]
    fn test_partial_update_leaves_trailing_bands() {
        let (_, mut eq) = equalizer();
        let before = eq.bands().to_vec();

        assert_eq!(eq.set_frequencies(&[100.0, 200.0]).unwrap(), 2);

        let after = eq.bands();
        assert_eq!(after[0].frequency_hz, 100.0);
        assert_eq!(after[1].frequency_hz, 200.0);
        assert_eq!(&after[2..], &before[2..]);
    }

    #[test]
    fn test_long_input_is_truncated() {
        let graph = Arc::new(MemoryGraph::new(48000));
        let mut eq = ParametricEqualizer::with_band_count(graph, 2).unwrap();

        assert_eq!(eq.set_gains(&[1.0, 2.0, 3.0, 4.0]).unwrap(), 2);
        assert_eq!(eq.bands()[1].gain_db, 2.0);
        assert_eq!(eq.band_count(), 2);
    }

    #[test]
    fn test_empty_input_is_noop() {
        let (_, mut eq) = equalizer();
        let before = eq.bands().to_vec();
        assert_eq!(eq.set_q_factors(&[]).unwrap(), 0);
        assert_eq!(eq.bands(), before.as_slice());
    }

    #[test]
    fn test_invalid_values_change_nothing() {
        let (_, mut eq) = equalizer();
        let before = eq.bands().to_vec();

        assert!(eq.set_frequencies(&[100.0, -5.0]).is_err());
        assert!(eq.set_q_factors(&[1.0, 0.0]).is_err());
        assert!(eq.set_gains(&[f32::NAN]).is_err());

        assert_eq!(eq.bands(), before.as_slice());
    }

    #[test]
    fn test_invalid_value_beyond_chain_is_ignored() {
        let graph = Arc::new(MemoryGraph::new(48000));
        let mut eq = ParametricEqualizer::with_band_count(graph, 1).unwrap();
        assert_eq!(eq.set_frequencies(&[440.0, -1.0]).unwrap(), 1);
    }

    #[test]
    fn test_zero_bands_rejected() {
        let graph = Arc::new(MemoryGraph::new(48000));
        assert!(ParametricEqualizer::with_band_count(graph, 0).is_err());
    }

    fn filter_type() -> impl Strategy<Value = FilterType> {
        prop::sample::select(vec![
            FilterType::Lowpass,
            FilterType::Highpass,
            FilterType::Bandpass,
            FilterType::Lowshelf,
            FilterType::Highshelf,
            FilterType::Peaking,
            FilterType::Notch,
            FilterType::Allpass,
        ])
    }

    proptest! {
        #[test]
        fn prop_setters_are_idempotent(
            frequencies in prop::collection::vec(20.0f32..20000.0, 0..12),
            gains in prop::collection::vec(-40.0f32..40.0, 0..12),
        ) {
            let (_, mut eq) = equalizer();
            eq.set_frequencies(&frequencies).unwrap();
            eq.set_gains(&gains).unwrap();
            let once = eq.bands().to_vec();

            eq.set_frequencies(&frequencies).unwrap();
            eq.set_gains(&gains).unwrap();
            prop_assert_eq!(eq.bands(), once.as_slice());
        }

        #[test]
        fn prop_setters_are_order_independent(
            frequencies in prop::collection::vec(20.0f32..20000.0, 0..12),
            types in prop::collection::vec(filter_type(), 0..12),
            q_factors in prop::collection::vec(0.1f32..10.0, 0..12),
            gains in prop::collection::vec(-40.0f32..40.0, 0..12),
        ) {
            let (_, mut a) = equalizer();
            a.set_frequencies(&frequencies).unwrap();
            a.set_types(&types).unwrap();
            a.set_q_factors(&q_factors).unwrap();
            a.set_gains(&gains).unwrap();

            let (_, mut b) = equalizer();
            b.set_gains(&gains).unwrap();
            b.set_q_factors(&q_factors).unwrap();
            b.set_types(&types).unwrap();
            b.set_frequencies(&frequencies).unwrap();

            prop_assert_eq!(a.bands(), b.bands());
        }
    }
}

//! Offline rendering of a playback session
//!
//! Drives a [`PlaybackSession`] over an in-memory graph without a real-time
//! clock. The decoded file is walked in blocks of one gate tick; for every
//! block the renderer computes the spectra each analyser node would see and
//! runs the gate and measurement steps in order:
//!
//! 1. input spectrum (after the input gain) into the display and gate meters
//! 2. gate tick
//! 3. output spectrum (input scaled by gate and post gain) into the after
//!    display and the session meter
//! 4. a measurement whenever a measurement interval has elapsed
//!
//! Equalizer filtering is not modelled: the gate meters the input as if the
//! equalizer were flat.

use super::spectrum::SpectrumAnalyzer;
use anyhow::{Context, Result};
use murmur_core::domain::audio::SampleBuffer;
use murmur_core::domain::config::MurmurConfig;
use murmur_core::domain::equalizer::EqualizerBandSpec;
use murmur_core::domain::gate::FLOOR_GAIN;
use murmur_core::domain::graph::AudioGraph;
use murmur_core::domain::memory_graph::MemoryGraph;
use murmur_core::domain::session::PlaybackSession;
use murmur_core::domain::stats::{Measurement, RunningStats};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Gate behaviour over a render
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GateSummary {
    pub ticks: usize,
    pub min_gain: f32,
    pub max_gain: f32,
    pub mean_gain: f32,
    /// Share of ticks at the floor gain
    pub floor_ratio: f32,
}

impl GateSummary {
    fn from_gains(gains: &[f32]) -> Self {
        if gains.is_empty() {
            return Self::default();
        }
        let count = gains.len() as f32;
        Self {
            ticks: gains.len(),
            min_gain: gains.iter().copied().fold(f32::INFINITY, f32::min),
            max_gain: gains.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            mean_gain: gains.iter().sum::<f32>() / count,
            floor_ratio: gains.iter().filter(|&&g| g == FLOOR_GAIN).count() as f32 / count,
        }
    }
}

/// Outcome of one offline render
#[derive(Debug, Clone, Serialize)]
pub struct RenderReport {
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_secs: f64,
    pub blocks: usize,
    pub bypassed: bool,
    pub auto_threshold: bool,
    pub final_threshold: f32,
    pub target: f32,
    pub post_gain: f32,
    /// Equalizer bands in effect for the render
    pub equalizer: Vec<EqualizerBandSpec>,
    pub gate: GateSummary,
    pub stats: RunningStats,
    pub last_measurement: Option<Measurement>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub gains: Vec<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub measurements: Vec<Measurement>,
}

/// Session plus the spectrum model that stands in for real analysers
#[derive(Debug)]
pub struct OfflineRenderer {
    graph: Arc<MemoryGraph>,
    session: PlaybackSession,
    block: Duration,
    measurement_interval: Duration,
    timeline: bool,
    before: SpectrumAnalyzer,
    gate_meter: SpectrumAnalyzer,
    after: SpectrumAnalyzer,
    session_meter: SpectrumAnalyzer,
}

impl OfflineRenderer {
    /// Renderer for audio at `sample_rate`, configured from `config`
    pub fn new(config: &MurmurConfig, sample_rate: u32) -> Result<Self> {
        let graph = Arc::new(MemoryGraph::new(sample_rate));
        let session = PlaybackSession::from_config(graph.clone(), config)
            .context("failed to build playback session")?;

        let display = config.analysis.display_fft_size;
        let control = config.analysis.gate_fft_size;

        Ok(Self {
            graph,
            session,
            block: config.gate.tick_interval(),
            measurement_interval: config.analysis.measurement_interval(),
            timeline: false,
            before: SpectrumAnalyzer::new(display)?,
            gate_meter: SpectrumAnalyzer::new(control)?,
            after: SpectrumAnalyzer::new(display)?,
            session_meter: SpectrumAnalyzer::new(control)?,
        })
    }

    /// Keep every gate gain and measurement in the report
    pub fn with_timeline(mut self, timeline: bool) -> Self {
        self.timeline = timeline;
        self
    }

    /// The session being driven, for presets, bypass and thresholds
    pub fn session(&self) -> &PlaybackSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut PlaybackSession {
        &mut self.session
    }

    pub fn graph(&self) -> &Arc<MemoryGraph> {
        &self.graph
    }

    /// Run the whole buffer through the session
    pub fn render(&mut self, buffer: SampleBuffer) -> Result<RenderReport> {
        anyhow::ensure!(
            buffer.sample_rate == self.graph.sample_rate(),
            "buffer is {} Hz but the renderer runs at {} Hz",
            buffer.sample_rate,
            self.graph.sample_rate()
        );

        let mono = buffer.mono();
        let rate = buffer.sample_rate as f64;
        let block_len = ((self.block.as_secs_f64() * rate).round() as usize).max(1);
        let measure_every = ((self.measurement_interval.as_secs_f64() * rate).round() as usize).max(1);

        let report_base = (buffer.sample_rate, buffer.channels, buffer.duration_secs());
        self.session.set_buffer(buffer);

        let bypassed = self.session.reducer().is_bypassed();
        let input_gain = self.session.input_gain()?;
        let post_gain = self.session.reducer().post_gain()?;
        let gate = self.session.reducer().gate();
        let (before_node, after_node) = (self.session.before().node(), self.session.after().node());
        let (gate_node, meter_node) = (gate.input(), self.session.meter_node());

        info!(
            frames = mono.len(),
            block_len,
            bypassed,
            "Offline render started"
        );

        let mut gains = Vec::new();
        let mut measurements = Vec::new();
        let mut last_measurement = None;
        let mut next_measure = 0usize;
        let mut blocks = 0usize;
        let mut position = 0usize;

        while position < mono.len() {
            let end = (position + block_len).min(mono.len());
            let recent = &mono[..end];

            self.graph
                .set_spectrum(before_node, &self.before.analyse(recent, input_gain))?;

            // Bypass skips the gate but still ends at the post-gain node
            let applied = if bypassed {
                input_gain * post_gain
            } else {
                let spectrum = self.gate_meter.analyse(recent, input_gain);
                self.graph.set_spectrum(gate_node, &spectrum)?;
                let gain = self.session.reducer().gate().tick()?;
                gains.push(gain);
                input_gain * gain * post_gain
            };

            self.graph
                .set_spectrum(after_node, &self.after.analyse(recent, applied))?;
            self.graph
                .set_spectrum(meter_node, &self.session_meter.analyse(recent, applied))?;

            if end >= next_measure {
                let measurement = self.session.measure_once()?;
                if self.timeline {
                    measurements.push(measurement);
                }
                last_measurement = Some(measurement);
                next_measure += measure_every;
            }

            position = end;
            blocks += 1;
        }

        let gate = self.session.reducer().gate();
        let summary = GateSummary::from_gains(&gains);
        debug!(?summary, "Gate summary");

        let (sample_rate, channels, duration_secs) = report_base;
        let report = RenderReport {
            sample_rate,
            channels,
            duration_secs,
            blocks,
            bypassed,
            auto_threshold: self.session.auto_threshold(),
            final_threshold: gate.threshold(),
            target: gate.target(),
            post_gain,
            equalizer: self.session.reducer().equalizer().bands().to_vec(),
            gate: summary,
            stats: self.session.stats(),
            last_measurement,
            gains: if self.timeline { gains } else { Vec::new() },
            measurements,
        };

        info!(
            blocks,
            mean_level = report.stats.mean_level(),
            threshold = report.final_threshold,
            "Offline render finished"
        );
        Ok(report)
    }
}

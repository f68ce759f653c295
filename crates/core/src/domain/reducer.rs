//! Noise reducer: equalizer, gate and post gain as one pluggable unit
//!
//! ```text
//! active:   input -> eq stage 0 .. N-1 -> gate meter -> gate gain -> output
//! bypassed: input -> output
//! ```
//!
//! `input` is the equalizer's entry node and `output` the post-gain node, so
//! callers wire the reducer like any single node.

use crate::domain::audio::{AudioError, Result};
use crate::domain::equalizer::ParametricEqualizer;
use crate::domain::gate::{NoiseGate, DEFAULT_TARGET, DEFAULT_THRESHOLD};
use crate::domain::graph::{AudioGraph, NodeId};
use crate::domain::preset::{reducer_default, EqPreset};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug)]
pub struct NoiseReducer {
    graph: Arc<dyn AudioGraph>,
    equalizer: ParametricEqualizer,
    gate: NoiseGate,
    output: NodeId,
    bypassed: bool,
    /// Whether the owner asked the gate loop to run
    running: bool,
}

impl NoiseReducer {
    /// Reducer with threshold 1 and target 10
    pub fn new(graph: Arc<dyn AudioGraph>) -> Result<Self> {
        Self::with_levels(graph, DEFAULT_THRESHOLD, DEFAULT_TARGET)
    }

    /// Build the chain and apply the "Reducer Default" equalizer preset
    pub fn with_levels(graph: Arc<dyn AudioGraph>, threshold: f32, target: f32) -> Result<Self> {
        let mut equalizer = ParametricEqualizer::new(Arc::clone(&graph))?;
        equalizer.apply_preset(&reducer_default())?;

        let gate = NoiseGate::new(Arc::clone(&graph), threshold, target)?;
        let output = graph.create_gain()?;

        graph.connect(equalizer.output(), gate.input())?;
        graph.connect(gate.output(), output)?;

        info!(
            input = %equalizer.input(),
            %output,
            threshold,
            target,
            "Noise reducer created"
        );

        Ok(Self {
            graph,
            equalizer,
            gate,
            output,
            bypassed: false,
            running: false,
        })
    }

    /// Gate control tick period; applies from the next `start`
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.gate = self.gate.with_tick_interval(interval);
        self
    }

    pub fn input(&self) -> NodeId {
        self.equalizer.input()
    }

    pub fn output(&self) -> NodeId {
        self.output
    }

    pub fn equalizer(&self) -> &ParametricEqualizer {
        &self.equalizer
    }

    pub fn equalizer_mut(&mut self) -> &mut ParametricEqualizer {
        &mut self.equalizer
    }

    pub fn gate(&self) -> &NoiseGate {
        &self.gate
    }

    pub fn apply_preset(&mut self, preset: &EqPreset) -> Result<()> {
        self.equalizer.apply_preset(preset)
    }

    /// Linear gain after the gate
    pub fn set_post_gain(&self, gain: f32) -> Result<()> {
        if !gain.is_finite() || gain < 0.0 {
            return Err(AudioError::InvalidConfiguration(format!(
                "post gain must be non-negative, got {gain}"
            )));
        }
        self.graph.set_gain(self.output, gain)
    }

    pub fn post_gain(&self) -> Result<f32> {
        self.graph.gain(self.output)
    }

    /// Route around the chain (`true`) or through it (`false`)
    ///
    /// The gate loop is suspended while bypassed and resumed afterwards if
    /// it was started. Repeating the current state does nothing.
    pub fn bypass(&mut self, enabled: bool) -> Result<()> {
        if enabled == self.bypassed {
            return Ok(());
        }

        let input = self.input();
        if enabled {
            self.route(input, self.output)?;
            self.gate.stop();
        } else {
            // The gate must be running before audio reaches it; a failed
            // start leaves the reducer bypassed.
            if self.running {
                self.gate.start()?;
            }
            if let Err(e) = self.route(input, self.equalizer.first_stage()) {
                self.gate.stop();
                return Err(e);
            }
        }
        self.bypassed = enabled;

        debug!(bypassed = enabled, "Reducer routing changed");
        Ok(())
    }

    fn route(&self, input: NodeId, to: NodeId) -> Result<()> {
        self.graph.disconnect(input)?;
        self.graph.connect(input, to)
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypassed
    }

    /// Start the gate control loop (deferred while bypassed)
    pub fn start(&mut self) -> Result<()> {
        self.running = true;
        if !self.bypassed {
            self.gate.start()?;
        }
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.gate.stop();
    }

    pub fn is_running(&self) -> bool {
        self.gate.is_running()
    }
}

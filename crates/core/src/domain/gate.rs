//! Level-driven noise gate
//!
//! The gate meters its own input and, on every control tick, rewrites the
//! gain of its output node:
//! - below the threshold the gain is pinned to [`FLOOR_GAIN`], suppressing
//!   low-level noise without going fully silent
//! - at or above the threshold the gain is `target / level`, pulling the
//!   loudness toward the target
//!
//! A zero level at or above the threshold (only possible with a threshold
//! of zero or below) cannot be normalised and falls back to the floor gain.

use crate::domain::audio::{AudioError, Result};
use crate::domain::graph::{AudioGraph, NodeId};
use crate::domain::meter::{LevelMeter, Resolution};
use crate::domain::task::PeriodicTask;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, trace};

/// Gain applied while the level is below the threshold
pub const FLOOR_GAIN: f32 = 0.2;

pub const DEFAULT_THRESHOLD: f32 = 1.0;
pub const DEFAULT_TARGET: f32 = 10.0;

/// Control tick period
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(10);

/// Which branch of the gain policy produced a gain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Level below threshold
    Floor,
    /// Level normalised toward the target
    Normalize,
    /// Level at/above threshold but not divisible; floor gain used
    Degenerate,
}

/// `target / level`, refusing zero, negative and non-finite results
pub fn normalizing_gain(target: f32, level: f32) -> Result<f32> {
    let gain = target / level;
    if level <= 0.0 || !gain.is_finite() {
        return Err(AudioError::DivisionDegenerate { level, target });
    }
    Ok(gain)
}

/// Gain policy of the gate
pub fn gate_gain(level: f32, threshold: f32, target: f32) -> (f32, GateDecision) {
    if level < threshold {
        return (FLOOR_GAIN, GateDecision::Floor);
    }
    match normalizing_gain(target, level) {
        Ok(gain) => (gain, GateDecision::Normalize),
        Err(_) => (FLOOR_GAIN, GateDecision::Degenerate),
    }
}

fn load(cell: &AtomicU32) -> f32 {
    f32::from_bits(cell.load(Ordering::Relaxed))
}

fn store(cell: &AtomicU32, value: f32) {
    cell.store(value.to_bits(), Ordering::Relaxed);
}

/// Threshold and target shared between the gate and whoever tunes it
///
/// Changes are picked up by the next control tick.
#[derive(Debug)]
pub struct GateControl {
    threshold: AtomicU32,
    target: AtomicU32,
    current_gain: AtomicU32,
}

impl GateControl {
    fn new(threshold: f32, target: f32) -> Result<Self> {
        let control = Self {
            threshold: AtomicU32::new(0),
            target: AtomicU32::new(0),
            current_gain: AtomicU32::new(1.0f32.to_bits()),
        };
        control.set_threshold(threshold)?;
        control.set_target(target)?;
        Ok(control)
    }

    pub fn threshold(&self) -> f32 {
        load(&self.threshold)
    }

    /// Any finite threshold is accepted, including negative ones
    pub fn set_threshold(&self, threshold: f32) -> Result<()> {
        if !threshold.is_finite() {
            return Err(AudioError::InvalidConfiguration(format!(
                "gate threshold must be finite, got {threshold}"
            )));
        }
        store(&self.threshold, threshold);
        trace!(threshold, "Gate threshold set");
        Ok(())
    }

    pub fn target(&self) -> f32 {
        load(&self.target)
    }

    pub fn set_target(&self, target: f32) -> Result<()> {
        if !target.is_finite() || target < 0.0 {
            return Err(AudioError::InvalidConfiguration(format!(
                "gate target must be a non-negative level, got {target}"
            )));
        }
        store(&self.target, target);
        trace!(target, "Gate target set");
        Ok(())
    }

    /// Gain written by the most recent tick
    pub fn current_gain(&self) -> f32 {
        load(&self.current_gain)
    }
}

#[derive(Debug)]
struct GateCore {
    graph: Arc<dyn AudioGraph>,
    meter: Mutex<LevelMeter>,
    output: NodeId,
    control: Arc<GateControl>,
}

impl GateCore {
    fn tick(&self) -> Result<f32> {
        let level = self
            .meter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .current_level()?;
        let threshold = self.control.threshold();
        let target = self.control.target();

        let (gain, decision) = gate_gain(level, threshold, target);
        if decision == GateDecision::Degenerate {
            debug!(level, threshold, target, "Level cannot be normalised, using floor gain");
        }

        self.graph.set_gain(self.output, gain)?;
        store(&self.control.current_gain, gain);
        trace!(level, gain, ?decision, "Gate tick");
        Ok(gain)
    }
}

/// Noise gate: a private meter feeding a gain node
///
/// ```text
/// input (meter analyser) -> output (gain)
/// ```
#[derive(Debug)]
pub struct NoiseGate {
    core: Arc<GateCore>,
    input: NodeId,
    tick_interval: Duration,
    task: Option<PeriodicTask>,
}

impl NoiseGate {
    /// Create a gate; it does not tick until [`NoiseGate::start`]
    pub fn new(graph: Arc<dyn AudioGraph>, threshold: f32, target: f32) -> Result<Self> {
        let control = Arc::new(GateControl::new(threshold, target)?);
        let meter = LevelMeter::new(Arc::clone(&graph), Resolution::Control)?;
        let input = meter.node();
        let output = graph.create_gain()?;
        graph.connect(input, output)?;

        debug!(%input, %output, threshold, target, "Noise gate created");

        Ok(Self {
            core: Arc::new(GateCore {
                graph,
                meter: Mutex::new(meter),
                output,
                control,
            }),
            input,
            tick_interval: DEFAULT_TICK_INTERVAL,
            task: None,
        })
    }

    /// Change the control tick period; applies from the next `start`
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn input(&self) -> NodeId {
        self.input
    }

    pub fn output(&self) -> NodeId {
        self.core.output
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Shared handle for tuning threshold and target from elsewhere
    pub fn control(&self) -> Arc<GateControl> {
        Arc::clone(&self.core.control)
    }

    pub fn threshold(&self) -> f32 {
        self.core.control.threshold()
    }

    pub fn set_threshold(&self, threshold: f32) -> Result<()> {
        self.core.control.set_threshold(threshold)
    }

    pub fn target(&self) -> f32 {
        self.core.control.target()
    }

    pub fn set_target(&self, target: f32) -> Result<()> {
        self.core.control.set_target(target)
    }

    pub fn current_gain(&self) -> f32 {
        self.core.control.current_gain()
    }

    /// Run one control step now and return the gain written
    pub fn tick(&self) -> Result<f32> {
        self.core.tick()
    }

    /// Start the periodic control loop; a no-op if already running
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        let core = Arc::clone(&self.core);
        let task = PeriodicTask::spawn("noise-gate", self.tick_interval, move || {
            core.tick().map(|_| ())
        })?;
        self.task = Some(task);
        info!(output = %self.core.output, "Noise gate started");
        Ok(())
    }

    /// Stop the control loop; the last gain stays on the output node
    pub fn stop(&mut self) {
        if let Some(mut task) = self.task.take() {
            task.cancel();
            info!(output = %self.core.output, "Noise gate stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(PeriodicTask::is_active).unwrap_or(false)
    }
}

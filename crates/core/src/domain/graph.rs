//! Audio graph abstraction
//!
//! This module defines the platform-agnostic node graph the control logic
//! configures: gain nodes, biquad filter nodes, spectrum analysers and
//! buffer sources, connected by directed edges. The graph owns node state;
//! components hold [`NodeId`] handles and a shared `Arc<dyn AudioGraph>`.

use crate::domain::audio::{AudioError, Result, SampleBuffer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Stable identity of a node within one graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Directed edge between two nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Connection {
    pub from: NodeId,
    pub to: NodeId,
}

impl Connection {
    pub fn new(from: NodeId, to: NodeId) -> Self {
        Self { from, to }
    }
}

/// Biquad filter response type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    Lowpass,
    Highpass,
    Bandpass,
    Lowshelf,
    Highshelf,
    Peaking,
    Notch,
    Allpass,
}

impl FilterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterType::Lowpass => "lowpass",
            FilterType::Highpass => "highpass",
            FilterType::Bandpass => "bandpass",
            FilterType::Lowshelf => "lowshelf",
            FilterType::Highshelf => "highshelf",
            FilterType::Peaking => "peaking",
            FilterType::Notch => "notch",
            FilterType::Allpass => "allpass",
        }
    }

    /// Whether the gain parameter affects this response
    pub fn uses_gain(&self) -> bool {
        matches!(
            self,
            FilterType::Peaking | FilterType::Lowshelf | FilterType::Highshelf
        )
    }
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for FilterType {
    type Err = AudioError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lowpass" => Ok(FilterType::Lowpass),
            "highpass" => Ok(FilterType::Highpass),
            "bandpass" => Ok(FilterType::Bandpass),
            "lowshelf" => Ok(FilterType::Lowshelf),
            "highshelf" => Ok(FilterType::Highshelf),
            "peaking" => Ok(FilterType::Peaking),
            "notch" => Ok(FilterType::Notch),
            "allpass" => Ok(FilterType::Allpass),
            other => Err(AudioError::InvalidConfiguration(format!(
                "unknown filter type '{other}'"
            ))),
        }
    }
}

/// Parameters of one biquad filter node
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BiquadParams {
    pub filter_type: FilterType,
    pub frequency_hz: f32,
    pub q: f32,
    #[serde(default)]
    pub gain_db: f32,
}

impl Default for BiquadParams {
    fn default() -> Self {
        Self {
            filter_type: FilterType::Peaking,
            frequency_hz: 350.0,
            q: 1.0,
            gain_db: 0.0,
        }
    }
}

/// Kind of a node, as reported by the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Destination,
    Gain,
    Biquad,
    Analyser,
    BufferSource,
}

/// Platform audio graph
///
/// Node creation and parameter changes take `&self`: the graph is shared
/// between the components that configure it and the periodic tasks that
/// read from it, so implementations manage their own interior state.
pub trait AudioGraph: Send + Sync + fmt::Debug {
    /// Sample rate the graph renders at
    fn sample_rate(&self) -> u32;

    /// Final sink of the graph
    fn destination(&self) -> NodeId;

    /// Kind of an existing node
    fn kind(&self, node: NodeId) -> Result<NodeKind>;

    /// Create a gain node with unity gain
    fn create_gain(&self) -> Result<NodeId>;

    /// Create a biquad filter node
    fn create_biquad(&self, params: BiquadParams) -> Result<NodeId>;

    /// Create a spectrum analyser exposing `fft_size / 2` frequency bins
    ///
    /// Returns [`AudioError::CapabilityUnavailable`] when the platform has
    /// no frequency analysis support.
    fn create_analyser(&self, fft_size: usize) -> Result<NodeId>;

    /// Create a one-shot source playing the given buffer
    fn create_buffer_source(&self, buffer: Arc<SampleBuffer>) -> Result<NodeId>;

    /// Add an edge `from -> to`; connecting twice is a no-op
    fn connect(&self, from: NodeId, to: NodeId) -> Result<()>;

    /// Remove every outgoing edge of `from`
    fn disconnect(&self, from: NodeId) -> Result<()>;

    fn set_gain(&self, node: NodeId, gain: f32) -> Result<()>;

    fn gain(&self, node: NodeId) -> Result<f32>;

    fn set_biquad(&self, node: NodeId, params: BiquadParams) -> Result<()>;

    fn biquad(&self, node: NodeId) -> Result<BiquadParams>;

    /// Number of bins an analyser exposes
    fn frequency_bin_count(&self, node: NodeId) -> Result<usize>;

    /// Copy the latest byte magnitude spectrum of an analyser into `out`
    ///
    /// Returns the number of bins written.
    fn byte_frequency_data(&self, node: NodeId, out: &mut [u8]) -> Result<usize>;

    fn start_source(&self, node: NodeId) -> Result<()>;

    fn stop_source(&self, node: NodeId) -> Result<()>;

    /// Snapshot of every edge, in a stable order
    fn connections(&self) -> Vec<Connection>;
}

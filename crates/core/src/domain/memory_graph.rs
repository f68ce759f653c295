//! In-process audio graph
//!
//! `MemoryGraph` implements [`AudioGraph`] without rendering audio. It keeps
//! node parameters and edges, and serves analyser spectra that are pushed
//! into it by a driver (the offline renderer, or a test). This makes the
//! control logic fully observable: every gain the gate writes and every
//! connection bypass rewires can be read back.

use crate::domain::audio::{AudioError, Result, SampleBuffer};
use crate::domain::graph::{AudioGraph, BiquadParams, Connection, NodeId, NodeKind};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

/// Smallest analyser FFT size the graph accepts
pub const MIN_FFT_SIZE: usize = 32;
/// Largest analyser FFT size the graph accepts
pub const MAX_FFT_SIZE: usize = 32768;

/// Optional platform features
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Frequency-domain analysis nodes
    pub analysis: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self { analysis: true }
    }
}

#[derive(Debug)]
enum NodeState {
    Destination,
    Gain { gain: f32 },
    Biquad(BiquadParams),
    Analyser { fft_size: usize, spectrum: Vec<u8> },
    BufferSource { buffer: Arc<SampleBuffer>, started: bool, playing: bool },
}

impl NodeState {
    fn kind(&self) -> NodeKind {
        match self {
            NodeState::Destination => NodeKind::Destination,
            NodeState::Gain { .. } => NodeKind::Gain,
            NodeState::Biquad(_) => NodeKind::Biquad,
            NodeState::Analyser { .. } => NodeKind::Analyser,
            NodeState::BufferSource { .. } => NodeKind::BufferSource,
        }
    }
}

#[derive(Debug)]
struct GraphState {
    nodes: Vec<NodeState>,
    edges: BTreeSet<Connection>,
}

impl GraphState {
    fn node(&self, id: NodeId) -> Result<&NodeState> {
        self.nodes
            .get(id.raw() as usize)
            .ok_or_else(|| AudioError::NodeNotFound(id.to_string()))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeState> {
        self.nodes
            .get_mut(id.raw() as usize)
            .ok_or_else(|| AudioError::NodeNotFound(id.to_string()))
    }

    fn push(&mut self, node: NodeState) -> NodeId {
        let id = NodeId::new(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }
}

/// Audio graph that records configuration instead of rendering
#[derive(Debug)]
pub struct MemoryGraph {
    sample_rate: u32,
    capabilities: Capabilities,
    destination: NodeId,
    state: Mutex<GraphState>,
}

impl MemoryGraph {
    /// Create a graph with every capability available
    pub fn new(sample_rate: u32) -> Self {
        Self::with_capabilities(sample_rate, Capabilities::default())
    }

    pub fn with_capabilities(sample_rate: u32, capabilities: Capabilities) -> Self {
        let mut state = GraphState {
            nodes: Vec::new(),
            edges: BTreeSet::new(),
        };
        let destination = state.push(NodeState::Destination);
        debug!(sample_rate, ?capabilities, "Memory graph created");
        Self {
            sample_rate,
            capabilities,
            destination,
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> MutexGuard<'_, GraphState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the spectrum an analyser reports
    ///
    /// Values beyond the analyser's bin count are dropped; missing bins
    /// read as zero.
    pub fn set_spectrum(&self, node: NodeId, spectrum: &[u8]) -> Result<()> {
        let mut state = self.state();
        match state.node_mut(node)? {
            NodeState::Analyser { spectrum: bins, .. } => {
                let n = bins.len().min(spectrum.len());
                bins[..n].copy_from_slice(&spectrum[..n]);
                bins[n..].fill(0);
                Ok(())
            }
            other => Err(wrong_kind(node, other.kind(), NodeKind::Analyser)),
        }
    }

    /// Set every bin of an analyser to the same value
    pub fn fill_spectrum(&self, node: NodeId, value: u8) -> Result<()> {
        let mut state = self.state();
        match state.node_mut(node)? {
            NodeState::Analyser { spectrum, .. } => {
                spectrum.fill(value);
                Ok(())
            }
            other => Err(wrong_kind(node, other.kind(), NodeKind::Analyser)),
        }
    }

    /// FFT size an analyser was created with
    pub fn fft_size(&self, node: NodeId) -> Result<usize> {
        match self.state().node(node)? {
            NodeState::Analyser { fft_size, .. } => Ok(*fft_size),
            other => Err(wrong_kind(node, other.kind(), NodeKind::Analyser)),
        }
    }

    /// Whether a buffer source is currently playing
    pub fn is_playing(&self, node: NodeId) -> Result<bool> {
        match self.state().node(node)? {
            NodeState::BufferSource { playing, .. } => Ok(*playing),
            other => Err(wrong_kind(node, other.kind(), NodeKind::BufferSource)),
        }
    }

    /// Buffer attached to a source node
    pub fn source_buffer(&self, node: NodeId) -> Result<Arc<SampleBuffer>> {
        match self.state().node(node)? {
            NodeState::BufferSource { buffer, .. } => Ok(Arc::clone(buffer)),
            other => Err(wrong_kind(node, other.kind(), NodeKind::BufferSource)),
        }
    }

    /// Direct successors of a node
    pub fn outputs(&self, node: NodeId) -> Vec<NodeId> {
        self.state()
            .edges
            .iter()
            .filter(|edge| edge.from == node)
            .map(|edge| edge.to)
            .collect()
    }

    /// Whether `to` is reachable from `from` along edges
    pub fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let state = self.state();
        let mut stack = vec![from];
        let mut seen = BTreeSet::new();
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if !seen.insert(node) {
                continue;
            }
            stack.extend(state.edges.iter().filter(|e| e.from == node).map(|e| e.to));
        }
        false
    }

    pub fn node_count(&self) -> usize {
        self.state().nodes.len()
    }
}

fn wrong_kind(node: NodeId, actual: NodeKind, expected: NodeKind) -> AudioError {
    AudioError::InvalidConfiguration(format!(
        "{node} is a {actual:?} node, expected {expected:?}"
    ))
}

impl AudioGraph for MemoryGraph {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn destination(&self) -> NodeId {
        self.destination
    }

    fn kind(&self, node: NodeId) -> Result<NodeKind> {
        Ok(self.state().node(node)?.kind())
    }

    fn create_gain(&self) -> Result<NodeId> {
        Ok(self.state().push(NodeState::Gain { gain: 1.0 }))
    }

    fn create_biquad(&self, params: BiquadParams) -> Result<NodeId> {
        Ok(self.state().push(NodeState::Biquad(params)))
    }

    fn create_analyser(&self, fft_size: usize) -> Result<NodeId> {
        if !self.capabilities.analysis {
            return Err(AudioError::CapabilityUnavailable(
                "frequency analysis is not supported by this graph".to_string(),
            ));
        }
        if !fft_size.is_power_of_two() || !(MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&fft_size) {
            return Err(AudioError::InvalidConfiguration(format!(
                "FFT size {fft_size} must be a power of two in {MIN_FFT_SIZE}..={MAX_FFT_SIZE}"
            )));
        }
        Ok(self.state().push(NodeState::Analyser {
            fft_size,
            spectrum: vec![0; fft_size / 2],
        }))
    }

    fn create_buffer_source(&self, buffer: Arc<SampleBuffer>) -> Result<NodeId> {
        Ok(self.state().push(NodeState::BufferSource {
            buffer,
            started: false,
            playing: false,
        }))
    }

    fn connect(&self, from: NodeId, to: NodeId) -> Result<()> {
        let mut state = self.state();
        state.node(from)?;
        if let NodeState::BufferSource { .. } = state.node(to)? {
            return Err(AudioError::InvalidConfiguration(format!(
                "{to} is a source and has no inputs"
            )));
        }
        if let NodeState::Destination = state.node(from)? {
            return Err(AudioError::InvalidConfiguration(
                "the destination has no outputs".to_string(),
            ));
        }
        if state.edges.insert(Connection::new(from, to)) {
            trace!(%from, %to, "Connected");
        }
        Ok(())
    }

    fn disconnect(&self, from: NodeId) -> Result<()> {
        let mut state = self.state();
        state.node(from)?;
        state.edges.retain(|edge| edge.from != from);
        trace!(%from, "Disconnected all outputs");
        Ok(())
    }

    fn set_gain(&self, node: NodeId, gain: f32) -> Result<()> {
        if !gain.is_finite() {
            return Err(AudioError::InvalidConfiguration(format!(
                "gain {gain} is not finite"
            )));
        }
        let mut state = self.state();
        match state.node_mut(node)? {
            NodeState::Gain { gain: value } => {
                *value = gain;
                Ok(())
            }
            other => Err(wrong_kind(node, other.kind(), NodeKind::Gain)),
        }
    }

    fn gain(&self, node: NodeId) -> Result<f32> {
        match self.state().node(node)? {
            NodeState::Gain { gain } => Ok(*gain),
            other => Err(wrong_kind(node, other.kind(), NodeKind::Gain)),
        }
    }

    fn set_biquad(&self, node: NodeId, params: BiquadParams) -> Result<()> {
        let mut state = self.state();
        match state.node_mut(node)? {
            NodeState::Biquad(value) => {
                *value = params;
                Ok(())
            }
            other => Err(wrong_kind(node, other.kind(), NodeKind::Biquad)),
        }
    }

    fn biquad(&self, node: NodeId) -> Result<BiquadParams> {
        match self.state().node(node)? {
            NodeState::Biquad(params) => Ok(*params),
            other => Err(wrong_kind(node, other.kind(), NodeKind::Biquad)),
        }
    }

    fn frequency_bin_count(&self, node: NodeId) -> Result<usize> {
        match self.state().node(node)? {
            NodeState::Analyser { spectrum, .. } => Ok(spectrum.len()),
            other => Err(wrong_kind(node, other.kind(), NodeKind::Analyser)),
        }
    }

    fn byte_frequency_data(&self, node: NodeId, out: &mut [u8]) -> Result<usize> {
        match self.state().node(node)? {
            NodeState::Analyser { spectrum, .. } => {
                let n = spectrum.len().min(out.len());
                out[..n].copy_from_slice(&spectrum[..n]);
                Ok(n)
            }
            other => Err(wrong_kind(node, other.kind(), NodeKind::Analyser)),
        }
    }

    fn start_source(&self, node: NodeId) -> Result<()> {
        let mut state = self.state();
        match state.node_mut(node)? {
            NodeState::BufferSource { started, playing, .. } => {
                if *started {
                    return Err(AudioError::NotReady(format!(
                        "{node} has already been started"
                    )));
                }
                *started = true;
                *playing = true;
                Ok(())
            }
            other => Err(wrong_kind(node, other.kind(), NodeKind::BufferSource)),
        }
    }

    fn stop_source(&self, node: NodeId) -> Result<()> {
        let mut state = self.state();
        match state.node_mut(node)? {
            NodeState::BufferSource { started, playing, .. } => {
                if !*started {
                    return Err(AudioError::NotReady(format!("{node} was never started")));
                }
                *playing = false;
                Ok(())
            }
            other => Err(wrong_kind(node, other.kind(), NodeKind::BufferSource)),
        }
    }

    fn connections(&self) -> Vec<Connection> {
        self.state().edges.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::FilterType;

    #[test]
    fn test_destination_exists() {
        let graph = MemoryGraph::new(48000);
        assert_eq!(graph.kind(graph.destination()).unwrap(), NodeKind::Destination);
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn test_connect_is_idempotent() {
        let graph = MemoryGraph::new(48000);
        let a = graph.create_gain().unwrap();
        let b = graph.create_gain().unwrap();

        graph.connect(a, b).unwrap();
        graph.connect(a, b).unwrap();

        assert_eq!(graph.connections(), vec![Connection::new(a, b)]);
    }

    #[test]
    fn test_disconnect_removes_all_outputs() {
        let graph = MemoryGraph::new(48000);
        let a = graph.create_gain().unwrap();
        let b = graph.create_gain().unwrap();
        let c = graph.create_gain().unwrap();
        graph.connect(a, b).unwrap();
        graph.connect(a, c).unwrap();
        graph.connect(b, c).unwrap();

        graph.disconnect(a).unwrap();

        assert_eq!(graph.connections(), vec![Connection::new(b, c)]);
        assert!(graph.outputs(a).is_empty());
    }

    #[test]
    fn test_reaches_follows_chains() {
        let graph = MemoryGraph::new(48000);
        let a = graph.create_gain().unwrap();
        let b = graph.create_biquad(BiquadParams::default()).unwrap();
        graph.connect(a, b).unwrap();
        graph.connect(b, graph.destination()).unwrap();

        assert!(graph.reaches(a, graph.destination()));
        assert!(!graph.reaches(graph.destination(), a));
    }

    #[test]
    fn test_analyser_capability_missing() {
        let graph = MemoryGraph::with_capabilities(48000, Capabilities { analysis: false });
        assert!(matches!(
            graph.create_analyser(512),
            Err(AudioError::CapabilityUnavailable(_))
        ));
    }

    #[test]
    fn test_analyser_rejects_bad_fft_size() {
        let graph = MemoryGraph::new(48000);
        assert!(graph.create_analyser(500).is_err());
        assert!(graph.create_analyser(16).is_err());
        assert_eq!(
            graph.frequency_bin_count(graph.create_analyser(2048).unwrap()).unwrap(),
            1024
        );
    }

    #[test]
    fn test_spectrum_round_trip_pads_with_zero() {
        let graph = MemoryGraph::new(48000);
        let analyser = graph.create_analyser(32).unwrap();
        graph.fill_spectrum(analyser, 9).unwrap();
        graph.set_spectrum(analyser, &[1, 2, 3]).unwrap();

        let mut out = vec![0xff; 16];
        assert_eq!(graph.byte_frequency_data(analyser, &mut out).unwrap(), 16);
        assert_eq!(&out[..4], &[1, 2, 3, 0]);
        assert!(out[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_gain_and_biquad_parameters() {
        let graph = MemoryGraph::new(48000);
        let gain = graph.create_gain().unwrap();
        assert_eq!(graph.gain(gain).unwrap(), 1.0);
        graph.set_gain(gain, 0.2).unwrap();
        assert_eq!(graph.gain(gain).unwrap(), 0.2);
        assert!(graph.set_gain(gain, f32::NAN).is_err());

        let filter = graph.create_biquad(BiquadParams::default()).unwrap();
        let params = BiquadParams {
            filter_type: FilterType::Notch,
            frequency_hz: 677.0,
            q: 0.5,
            gain_db: 0.0,
        };
        graph.set_biquad(filter, params).unwrap();
        assert_eq!(graph.biquad(filter).unwrap(), params);
        assert!(graph.set_gain(filter, 1.0).is_err());
    }

    #[test]
    fn test_source_is_one_shot() {
        let graph = MemoryGraph::new(48000);
        let buffer = Arc::new(SampleBuffer::new(48000, 1, vec![0.0; 10]).unwrap());
        let source = graph.create_buffer_source(buffer).unwrap();

        assert!(graph.stop_source(source).is_err());
        graph.start_source(source).unwrap();
        assert!(graph.is_playing(source).unwrap());
        graph.stop_source(source).unwrap();
        assert!(!graph.is_playing(source).unwrap());
        assert!(graph.start_source(source).is_err());
    }

    #[test]
    fn test_unknown_node() {
        let graph = MemoryGraph::new(48000);
        assert!(matches!(
            graph.gain(NodeId::new(99)),
            Err(AudioError::NodeNotFound(_))
        ));
    }
}

//! Play session: the full processing graph around a noise reducer
//!
//! ```text
//! source -> before (display) -> input gain -> reducer -> after (display)
//!        -> session meter -> destination
//! ```
//!
//! While a buffer plays, a measurement task reads the session meter once
//! per display frame, folds the level into the running statistics and,
//! with auto threshold enabled, retunes the gate from them. Measurements are
//! published on a watch channel.

use crate::domain::audio::{AudioError, BufferDecoder, Result, SampleBuffer};
use crate::domain::config::MurmurConfig;
use crate::domain::gate::GateControl;
use crate::domain::graph::{AudioGraph, NodeId};
use crate::domain::meter::{LevelMeter, Resolution};
use crate::domain::preset::EqPreset;
use crate::domain::reducer::NoiseReducer;
use crate::domain::spectrum::{SpectrumAnalyser, DEFAULT_HEIGHT, DEFAULT_REFRESH};
use crate::domain::stats::{Measurement, RunningStats};
use crate::domain::task::PeriodicTask;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, instrument, trace, warn};

/// Roughly one display frame
pub const DEFAULT_MEASUREMENT_INTERVAL: Duration = Duration::from_millis(16);

pub const DEFAULT_DEVIATION_FACTOR: f32 = 2.0;

/// Measurement state shared with the measurement task
#[derive(Debug)]
struct Measurer {
    meter: Mutex<LevelMeter>,
    stats: Mutex<RunningStats>,
    gate: Arc<GateControl>,
    auto_threshold: AtomicBool,
    deviation_factor: AtomicU32,
    published: watch::Sender<Option<Measurement>>,
}

impl Measurer {
    fn measure(&self) -> Result<Measurement> {
        let level = self
            .meter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .current_level()?;
        let measurement = self
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(level);

        if self.auto_threshold.load(Ordering::Relaxed) {
            let factor = f32::from_bits(self.deviation_factor.load(Ordering::Relaxed));
            self.gate
                .set_threshold(measurement.suggested_threshold(factor))?;
        }

        self.published.send_replace(Some(measurement));
        trace!(
            level = measurement.level,
            average = measurement.average_level,
            "Measurement"
        );
        Ok(measurement)
    }

    fn stats(&self) -> RunningStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reset(&self) {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
    }
}

/// Graph, controls and measurement loop of one play session
#[derive(Debug)]
pub struct PlaybackSession {
    graph: Arc<dyn AudioGraph>,
    before: SpectrumAnalyser,
    input_gain: NodeId,
    reducer: NoiseReducer,
    after: SpectrumAnalyser,
    meter_node: NodeId,
    measurer: Arc<Measurer>,
    measurement_interval: Duration,
    spectrum_refresh: Duration,
    buffer: Option<Arc<SampleBuffer>>,
    source: Option<NodeId>,
    measurement: Option<PeriodicTask>,
}

impl PlaybackSession {
    /// Session with factory settings
    pub fn new(graph: Arc<dyn AudioGraph>) -> Result<Self> {
        Self::from_config(graph, &MurmurConfig::factory_default())
    }

    /// Build the session graph; no task runs until `start`/`play`
    pub fn from_config(graph: Arc<dyn AudioGraph>, config: &MurmurConfig) -> Result<Self> {
        let display = Resolution::from_fft_size(config.analysis.display_fft_size);
        let control = Resolution::from_fft_size(config.analysis.gate_fft_size);

        let before = SpectrumAnalyser::with_resolution(Arc::clone(&graph), display, DEFAULT_HEIGHT)?;
        let input_gain = graph.create_gain()?;
        let reducer =
            NoiseReducer::with_levels(Arc::clone(&graph), config.gate.threshold, config.gate.target)?
                .with_tick_interval(config.gate.tick_interval());
        let after = SpectrumAnalyser::with_resolution(Arc::clone(&graph), display, DEFAULT_HEIGHT)?;
        let meter = LevelMeter::new(Arc::clone(&graph), control)?;
        let meter_node = meter.node();

        graph.connect(before.node(), input_gain)?;
        graph.connect(input_gain, reducer.input())?;
        graph.connect(reducer.output(), after.node())?;
        graph.connect(after.node(), meter_node)?;
        graph.connect(meter_node, graph.destination())?;

        let (published, _) = watch::channel(None);
        let measurer = Arc::new(Measurer {
            meter: Mutex::new(meter),
            stats: Mutex::new(RunningStats::new()),
            gate: reducer.gate().control(),
            auto_threshold: AtomicBool::new(config.session.auto_threshold),
            deviation_factor: AtomicU32::new(config.session.deviation_factor.to_bits()),
            published,
        });

        let session = Self {
            graph,
            before,
            input_gain,
            reducer,
            after,
            meter_node,
            measurer,
            measurement_interval: if config.analysis.measurement_interval_ms == 0 {
                DEFAULT_MEASUREMENT_INTERVAL
            } else {
                config.analysis.measurement_interval()
            },
            spectrum_refresh: if config.analysis.spectrum_refresh_ms == 0 {
                DEFAULT_REFRESH
            } else {
                config.analysis.spectrum_refresh()
            },
            buffer: None,
            source: None,
            measurement: None,
        };
        session.set_input_gain(config.session.input_gain)?;

        info!(
            before = %session.before.node(),
            after = %session.after.node(),
            meter = %meter_node,
            "Playback session created"
        );
        Ok(session)
    }

    /// Start the gate loop and both spectrum displays; idempotent
    pub fn start(&mut self) -> Result<()> {
        self.reducer.start()?;
        self.before.start(self.spectrum_refresh)?;
        self.after.start(self.spectrum_refresh)?;
        Ok(())
    }

    /// Decode and keep a buffer for playback
    ///
    /// Playback is disabled while decoding; a failed decode leaves it
    /// disabled until a valid buffer is loaded.
    #[instrument(skip(self, decoder, bytes), fields(len = bytes.len()))]
    pub async fn load_buffer(
        &mut self,
        decoder: &dyn BufferDecoder,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<()> {
        self.buffer = None;
        match decoder.decode(name, bytes).await {
            Ok(buffer) => {
                self.set_buffer(buffer);
                Ok(())
            }
            Err(e) => {
                warn!(name, error = %e, "Decoding failed, playback disabled");
                Err(e)
            }
        }
    }

    /// Use an already decoded buffer for playback
    pub fn set_buffer(&mut self, buffer: SampleBuffer) {
        info!(
            sample_rate = buffer.sample_rate,
            channels = buffer.channels,
            frames = buffer.frames(),
            "Buffer ready"
        );
        self.buffer = Some(Arc::new(buffer));
    }

    pub fn buffer(&self) -> Option<&Arc<SampleBuffer>> {
        self.buffer.as_ref()
    }

    pub fn can_play(&self) -> bool {
        self.buffer.is_some()
    }

    /// Play the loaded buffer from the start
    ///
    /// Resets the statistics, connects a fresh source to the graph and
    /// starts the measurement task. A session that is already playing is
    /// stopped first.
    pub fn play(&mut self) -> Result<()> {
        let buffer = self
            .buffer
            .clone()
            .ok_or_else(|| AudioError::NotReady("no decoded buffer loaded".to_string()))?;
        if self.is_playing() {
            self.stop()?;
        }

        self.measurer.reset();
        let source = self.graph.create_buffer_source(buffer)?;
        self.graph.connect(source, self.before.node())?;
        self.graph.start_source(source)?;
        self.source = Some(source);

        let measurer = Arc::clone(&self.measurer);
        self.measurement = Some(PeriodicTask::spawn(
            "measurement",
            self.measurement_interval,
            move || measurer.measure().map(|_| ()),
        )?);

        info!(%source, "Playback started");
        Ok(())
    }

    /// Stop playback; statistics keep their last values
    pub fn stop(&mut self) -> Result<()> {
        if let Some(mut task) = self.measurement.take() {
            task.cancel();
        }
        if let Some(source) = self.source.take() {
            self.graph.stop_source(source)?;
            self.graph.disconnect(source)?;
            info!(%source, "Playback stopped");
        }
        Ok(())
    }

    pub fn is_playing(&self) -> bool {
        self.measurement
            .as_ref()
            .map(PeriodicTask::is_active)
            .unwrap_or(false)
    }

    /// Stop playback and every periodic task
    pub fn shutdown(&mut self) -> Result<()> {
        self.stop()?;
        self.reducer.stop();
        self.before.stop();
        self.after.stop();
        debug!("Playback session shut down");
        Ok(())
    }

    /// Run one measurement tick now
    pub fn measure_once(&self) -> Result<Measurement> {
        self.measurer.measure()
    }

    pub fn stats(&self) -> RunningStats {
        self.measurer.stats()
    }

    /// Latest measurement; `None` until the first tick
    pub fn subscribe(&self) -> watch::Receiver<Option<Measurement>> {
        self.measurer.published.subscribe()
    }

    /// Slider position `v` maps to linear gain `v / 10`
    pub fn set_input_slider(&self, value: f32) -> Result<()> {
        self.set_input_gain(value / 10.0)
    }

    pub fn set_input_gain(&self, gain: f32) -> Result<()> {
        if !gain.is_finite() || gain < 0.0 {
            return Err(AudioError::InvalidConfiguration(format!(
                "input gain must be non-negative, got {gain}"
            )));
        }
        self.graph.set_gain(self.input_gain, gain)
    }

    pub fn input_gain(&self) -> Result<f32> {
        self.graph.gain(self.input_gain)
    }

    pub fn set_auto_threshold(&self, enabled: bool) {
        self.measurer.auto_threshold.store(enabled, Ordering::Relaxed);
        debug!(enabled, "Auto threshold toggled");
    }

    pub fn auto_threshold(&self) -> bool {
        self.measurer.auto_threshold.load(Ordering::Relaxed)
    }

    pub fn set_deviation_factor(&self, factor: f32) -> Result<()> {
        if !factor.is_finite() || factor < 0.0 {
            return Err(AudioError::InvalidConfiguration(format!(
                "deviation factor must be non-negative, got {factor}"
            )));
        }
        self.measurer
            .deviation_factor
            .store(factor.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    pub fn apply_preset(&mut self, preset: &EqPreset) -> Result<()> {
        self.reducer.apply_preset(preset)
    }

    /// Route around the reducer (`true`) or through it (`false`)
    pub fn bypass(&mut self, enabled: bool) -> Result<()> {
        self.reducer.bypass(enabled)
    }

    pub fn reducer(&self) -> &NoiseReducer {
        &self.reducer
    }

    pub fn reducer_mut(&mut self) -> &mut NoiseReducer {
        &mut self.reducer
    }

    pub fn before(&self) -> &SpectrumAnalyser {
        &self.before
    }

    pub fn after(&self) -> &SpectrumAnalyser {
        &self.after
    }

    pub fn input_gain_node(&self) -> NodeId {
        self.input_gain
    }

    pub fn meter_node(&self) -> NodeId {
        self.meter_node
    }

    pub fn source(&self) -> Option<NodeId> {
        self.source
    }

    pub fn graph(&self) -> &Arc<dyn AudioGraph> {
        &self.graph
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "Session shutdown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::memory_graph::{Capabilities, MemoryGraph};
    use async_trait::async_trait;

    #[derive(Debug)]
    struct FixedDecoder;

    #[async_trait]
    impl BufferDecoder for FixedDecoder {
        async fn decode(&self, name: &str, bytes: Vec<u8>) -> Result<SampleBuffer> {
            if bytes.is_empty() {
                return Err(AudioError::DecodeFailure(format!("{name}: empty")));
            }
            SampleBuffer::new(48000, 1, bytes.iter().map(|&b| b as f32 / 255.0).collect())
        }
    }

    fn session() -> (Arc<MemoryGraph>, PlaybackSession) {
        let graph = Arc::new(MemoryGraph::new(48000));
        let session = PlaybackSession::new(graph.clone()).unwrap();
        (graph, session)
    }

    fn loaded() -> (Arc<MemoryGraph>, PlaybackSession) {
        let (graph, mut session) = session();
        session.set_buffer(SampleBuffer::new(48000, 1, vec![0.0; 480]).unwrap());
        (graph, session)
    }

    #[test]
    fn test_session_graph_topology() {
        let (graph, session) = session();
        let reducer = session.reducer();

        assert_eq!(graph.outputs(session.before().node()), vec![session.input_gain_node()]);
        assert_eq!(graph.outputs(session.input_gain_node()), vec![reducer.input()]);
        assert_eq!(graph.outputs(reducer.output()), vec![session.after().node()]);
        assert_eq!(graph.outputs(session.after().node()), vec![session.meter_node()]);
        assert_eq!(graph.outputs(session.meter_node()), vec![graph.destination()]);
        assert!(graph.reaches(session.before().node(), graph.destination()));
    }

    #[test]
    fn test_session_gate_levels() {
        let (_, session) = session();
        let gate = session.reducer().gate();
        assert_eq!(gate.threshold(), 1.0);
        assert_eq!(gate.target(), 20.0);
    }

    #[test]
    fn test_analyser_resolutions() {
        let (graph, session) = session();
        assert_eq!(graph.fft_size(session.before().node()).unwrap(), 2048);
        assert_eq!(graph.fft_size(session.after().node()).unwrap(), 2048);
        assert_eq!(graph.fft_size(session.meter_node()).unwrap(), 512);
        assert_eq!(graph.fft_size(session.reducer().gate().input()).unwrap(), 512);
    }

    #[test]
    fn test_session_requires_analysis() {
        let graph = Arc::new(MemoryGraph::with_capabilities(
            48000,
            Capabilities { analysis: false },
        ));
        assert!(matches!(
            PlaybackSession::new(graph),
            Err(AudioError::CapabilityUnavailable(_))
        ));
    }

    #[test]
    fn test_play_without_buffer_is_not_ready() {
        let (_, mut session) = session();
        assert!(!session.can_play());
        assert!(matches!(session.play(), Err(AudioError::NotReady(_))));
    }

    #[test]
    fn test_input_slider_maps_to_tenths() {
        let (_, session) = session();
        session.set_input_slider(15.0).unwrap();
        assert_eq!(session.input_gain().unwrap(), 1.5);
        assert!(session.set_input_gain(f32::NAN).is_err());
    }

    #[test]
    fn test_measurement_tunes_threshold() {
        let (graph, session) = session();
        let meter = session.meter_node();

        for level in [10, 20, 30] {
            graph.fill_spectrum(meter, level).unwrap();
            session.measure_once().unwrap();
        }

        let stats = session.stats();
        assert_eq!(stats.count(), 3);
        assert_eq!(stats.mean_level(), 20.0);
        let expected = stats.mean_level() - 2.0 * stats.mean_deviation();
        assert!((session.reducer().gate().threshold() - expected).abs() < 1e-5);
    }

    #[test]
    fn test_manual_threshold_without_auto() {
        let (graph, session) = session();
        session.set_auto_threshold(false);
        session.reducer().gate().set_threshold(7.0).unwrap();

        graph.fill_spectrum(session.meter_node(), 40).unwrap();
        session.measure_once().unwrap();
        assert_eq!(session.reducer().gate().threshold(), 7.0);
    }

    #[tokio::test]
    async fn test_decode_failure_disables_play() {
        let (_, mut session) = session();
        session
            .load_buffer(&FixedDecoder, "tone", vec![1, 2, 3])
            .await
            .unwrap();
        assert!(session.can_play());

        let result = session.load_buffer(&FixedDecoder, "broken", Vec::new()).await;
        assert!(matches!(result, Err(AudioError::DecodeFailure(_))));
        assert!(!session.can_play());
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_and_stop() {
        let (graph, mut session) = loaded();
        let mut rx = session.subscribe();
        graph.fill_spectrum(session.meter_node(), 12).unwrap();

        session.play().unwrap();
        let source = session.source().unwrap();
        assert!(graph.is_playing(source).unwrap());
        assert_eq!(graph.outputs(source), vec![session.before().node()]);

        rx.changed().await.unwrap();
        let latest = *rx.borrow();
        assert_eq!(latest.map(|m| m.level), Some(12.0));

        tokio::time::sleep(Duration::from_millis(100)).await;
        session.stop().unwrap();
        assert!(!session.is_playing());
        assert!(!graph.is_playing(source).unwrap());
        assert!(graph.outputs(source).is_empty());

        // Frozen after stop
        let frozen = session.stats();
        assert!(frozen.count() > 1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(session.stats(), frozen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_resets_stats() {
        let (graph, mut session) = loaded();
        graph.fill_spectrum(session.meter_node(), 50).unwrap();
        for _ in 0..5 {
            session.measure_once().unwrap();
        }
        assert_eq!(session.stats().count(), 5);

        session.play().unwrap();
        session.stop().unwrap();
        // Only the immediate first tick can have run
        assert!(session.stats().count() <= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_replaces_source() {
        let (graph, mut session) = loaded();
        session.play().unwrap();
        let first = session.source().unwrap();

        session.play().unwrap();
        let second = session.source().unwrap();
        assert_ne!(first, second);
        assert!(!graph.is_playing(first).unwrap());
        assert!(graph.is_playing(second).unwrap());

        session.shutdown().unwrap();
        assert!(!session.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_runs_background_tasks() {
        let (_, mut session) = session();
        session.start().unwrap();
        session.start().unwrap();
        assert!(session.reducer().is_running());
        assert!(session.before().is_running());

        session.shutdown().unwrap();
        assert!(!session.reducer().is_running());
        assert!(!session.after().is_running());
    }
}

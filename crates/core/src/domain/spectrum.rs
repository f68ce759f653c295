//! Spectrum display analysers
//!
//! A display analyser samples its node on its own refresh period,
//! independent of the gate's control tick, and publishes bar heights for
//! rendering. Bars sit on an exponential frequency scale: bar `i` shows the
//! bin nearest `4^(i/20)` Hz.

use crate::domain::audio::Result;
use crate::domain::graph::{AudioGraph, NodeId};
use crate::domain::meter::Resolution;
use crate::domain::task::PeriodicTask;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, trace};

pub const BAR_COUNT: usize = 200;

/// Bars per factor-of-four step in frequency
const BARS_PER_STEP: f32 = 20.0;

/// Full-scale bar height
pub const DEFAULT_HEIGHT: f32 = 256.0;

pub const DEFAULT_REFRESH: Duration = Duration::from_millis(50);

/// Frequency shown by bar `index`
pub fn bar_frequency(index: usize) -> f32 {
    4f32.powf(index as f32 / BARS_PER_STEP)
}

/// FFT bin holding `frequency_hz`
pub fn frequency_bin(frequency_hz: f32, sample_rate: u32, fft_size: usize) -> usize {
    (frequency_hz / sample_rate as f32 * fft_size as f32).round() as usize
}

/// Bar heights for a byte spectrum, scaled so 256 maps to `height`
///
/// Bars whose frequency falls beyond the last bin are zero.
pub fn spectrum_bars(spectrum: &[u8], sample_rate: u32, fft_size: usize, height: f32) -> Vec<f32> {
    (0..BAR_COUNT)
        .map(|i| {
            let bin = frequency_bin(bar_frequency(i), sample_rate, fft_size);
            spectrum
                .get(bin)
                .map(|&value| value as f32 * height / 256.0)
                .unwrap_or(0.0)
        })
        .collect()
}

#[derive(Debug)]
struct Snapshot {
    graph: Arc<dyn AudioGraph>,
    node: NodeId,
    fft_size: usize,
    height: f32,
    scratch: Mutex<Vec<u8>>,
    bars: watch::Sender<Vec<f32>>,
}

impl Snapshot {
    fn refresh(&self) -> Result<Vec<f32>> {
        let mut scratch = self.scratch.lock().unwrap_or_else(PoisonError::into_inner);
        let written = self.graph.byte_frequency_data(self.node, &mut scratch)?;
        let bars = spectrum_bars(
            &scratch[..written],
            self.graph.sample_rate(),
            self.fft_size,
            self.height,
        );
        self.bars.send_replace(bars.clone());
        trace!(node = %self.node, "Spectrum refreshed");
        Ok(bars)
    }
}

/// Analyser node that renders its spectrum as bars
#[derive(Debug)]
pub struct SpectrumAnalyser {
    snapshot: Arc<Snapshot>,
    task: Option<PeriodicTask>,
}

impl SpectrumAnalyser {
    /// Display analyser at 2048-point resolution
    pub fn new(graph: Arc<dyn AudioGraph>) -> Result<Self> {
        Self::with_resolution(graph, Resolution::Display, DEFAULT_HEIGHT)
    }

    pub fn with_resolution(
        graph: Arc<dyn AudioGraph>,
        resolution: Resolution,
        height: f32,
    ) -> Result<Self> {
        let fft_size = resolution.fft_size();
        let node = graph.create_analyser(fft_size)?;
        let bins = graph.frequency_bin_count(node)?;
        let (bars, _) = watch::channel(vec![0.0; BAR_COUNT]);

        Ok(Self {
            snapshot: Arc::new(Snapshot {
                graph,
                node,
                fft_size,
                height,
                scratch: Mutex::new(vec![0; bins]),
                bars,
            }),
            task: None,
        })
    }

    pub fn node(&self) -> NodeId {
        self.snapshot.node
    }

    pub fn fft_size(&self) -> usize {
        self.snapshot.fft_size
    }

    /// Sample the analyser now and publish the bars
    pub fn refresh(&self) -> Result<Vec<f32>> {
        self.snapshot.refresh()
    }

    /// Latest bars, updated on every refresh
    pub fn subscribe(&self) -> watch::Receiver<Vec<f32>> {
        self.snapshot.bars.subscribe()
    }

    /// Refresh every `period`; a no-op if already refreshing
    pub fn start(&mut self, period: Duration) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        let snapshot = Arc::clone(&self.snapshot);
        self.task = Some(PeriodicTask::spawn("spectrum", period, move || {
            snapshot.refresh().map(|_| ())
        })?);
        debug!(node = %self.snapshot.node, "Spectrum display started");
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(mut task) = self.task.take() {
            task.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(PeriodicTask::is_active).unwrap_or(false)
    }
}

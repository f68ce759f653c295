//! Byte magnitude spectra
//!
//! Mirrors the browser analyser node: Blackman window, magnitude scaled by
//! `1/N`, exponential smoothing across calls (time constant 0.8), then
//! decibels mapped linearly from [-100, -30] dB onto 0..=255.

use murmur_core::domain::audio::{AudioError, Result};
use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::fmt;
use std::sync::Arc;

pub const DEFAULT_SMOOTHING: f32 = 0.8;
pub const DEFAULT_MIN_DB: f32 = -100.0;
pub const DEFAULT_MAX_DB: f32 = -30.0;

pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    scratch: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
    smoothing: f32,
    min_db: f32,
    max_db: f32,
}

impl fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("fft_size", &self.fft_size())
            .field("smoothing", &self.smoothing)
            .field("min_db", &self.min_db)
            .field("max_db", &self.max_db)
            .finish()
    }
}

fn blackman(size: usize) -> Vec<f32> {
    const A0: f32 = 0.42;
    const A1: f32 = 0.5;
    const A2: f32 = 0.08;
    (0..size)
        .map(|i| {
            let x = i as f32 / size as f32;
            A0 - A1 * (2.0 * PI * x).cos() + A2 * (4.0 * PI * x).cos()
        })
        .collect()
}

impl SpectrumAnalyzer {
    pub fn new(fft_size: usize) -> Result<Self> {
        if !fft_size.is_power_of_two() || !(32..=32768).contains(&fft_size) {
            return Err(AudioError::InvalidConfiguration(format!(
                "FFT size {fft_size} must be a power of two in 32..=32768"
            )));
        }
        let mut planner = FftPlanner::<f32>::new();
        Ok(Self {
            fft: planner.plan_fft_forward(fft_size),
            window: blackman(fft_size),
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
            smoothed: vec![0.0; fft_size / 2],
            smoothing: DEFAULT_SMOOTHING,
            min_db: DEFAULT_MIN_DB,
            max_db: DEFAULT_MAX_DB,
        })
    }

    /// Smoothing time constant in [0, 1]; 0 disables smoothing
    pub fn with_smoothing(mut self, smoothing: f32) -> Self {
        self.smoothing = smoothing.clamp(0.0, 1.0);
        self
    }

    pub fn fft_size(&self) -> usize {
        self.window.len()
    }

    pub fn bin_count(&self) -> usize {
        self.smoothed.len()
    }

    /// Forget smoothing history
    pub fn reset(&mut self) {
        self.smoothed.fill(0.0);
    }

    /// Analyse the most recent `fft_size` samples of `frame`
    ///
    /// Shorter input is treated as preceded by silence. `gain` scales the
    /// samples before windowing.
    pub fn analyse(&mut self, frame: &[f32], gain: f32) -> Vec<u8> {
        let mut out = vec![0; self.bin_count()];
        self.analyse_into(frame, gain, &mut out);
        out
    }

    pub fn analyse_into(&mut self, frame: &[f32], gain: f32, out: &mut [u8]) {
        let size = self.fft_size();
        let recent = &frame[frame.len().saturating_sub(size)..];
        let offset = size - recent.len();

        for (i, slot) in self.scratch.iter_mut().enumerate() {
            let sample = if i < offset { 0.0 } else { recent[i - offset] * gain };
            *slot = Complex::new(sample * self.window[i], 0.0);
        }
        self.fft.process(&mut self.scratch);

        let norm = 1.0 / size as f32;
        let range = self.max_db - self.min_db;
        for (k, smoothed) in self.smoothed.iter_mut().enumerate() {
            let magnitude = self.scratch[k].norm() * norm;
            *smoothed = self.smoothing * *smoothed + (1.0 - self.smoothing) * magnitude;
            if let Some(byte) = out.get_mut(k) {
                let db = 20.0 * smoothed.log10();
                let scaled = 255.0 / range * (db - self.min_db);
                // log10(0) is -inf, which clamps to 0
                *byte = scaled.clamp(0.0, 255.0) as u8;
            }
        }
    }
}

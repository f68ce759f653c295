//! Integration tests for the noise-reduction chain
//!
//! These tests drive the core control logic through the infra adapters:
//! decoded WAV files, FFT spectra pushed into the in-memory graph, preset
//! files on disk and the offline renderer.

use murmur_core::domain::audio::{AudioError, SampleBuffer};
use murmur_core::domain::config::{ConfigManager, MurmurConfig};
use murmur_core::domain::gate::FLOOR_GAIN;
use murmur_core::domain::graph::{AudioGraph, FilterType};
use murmur_core::domain::memory_graph::MemoryGraph;
use murmur_core::domain::preset::{EqPreset, PresetLibrary, PresetManager};
use murmur_core::domain::reducer::NoiseReducer;
use murmur_core::domain::session::PlaybackSession;
use murmur_core::domain::spectrum::spectrum_bars;
use murmur_infra::audio::{OfflineRenderer, SpectrumAnalyzer, WavDecoder};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn generate_sine_wave(frequency: f32, sample_rate: u32, duration_ms: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (sample_rate as f32 * duration_ms / 1000.0) as usize;
    (0..num_samples)
        .map(|i| 2.0 * std::f32::consts::PI * frequency * i as f32 / sample_rate as f32)
        .map(|phase| amplitude * phase.sin())
        .collect()
}

fn wav_bytes(sample_rate: u32, samples: &[f32]) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample((s * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// Set a spectrum whose mean bin value is exactly `level`
fn push_level(graph: &MemoryGraph, node: murmur_core::domain::graph::NodeId, level: f32) {
    let bins = graph.frequency_bin_count(node).unwrap();
    let total = (level * bins as f32).round() as usize;
    let spectrum: Vec<u8> = (0..bins)
        .map(|i| (total / bins + usize::from(i < total % bins)) as u8)
        .collect();
    graph.set_spectrum(node, &spectrum).unwrap();
}

// ============================================================================
// GATE AND REDUCER
// ============================================================================

#[test]
fn test_reducer_gate_levels() {
    let graph = Arc::new(MemoryGraph::new(48000));
    let reducer = NoiseReducer::with_levels(graph.clone(), 1.0, 10.0).unwrap();

    let gains: Vec<f32> = [0.5, 2.0, 5.0, 20.0]
        .into_iter()
        .map(|level| {
            push_level(&graph, reducer.gate().input(), level);
            reducer.gate().tick().unwrap()
        })
        .collect();

    assert_eq!(gains, vec![FLOOR_GAIN, 5.0, 2.0, 0.5]);
    assert_eq!(graph.gain(reducer.gate().output()).unwrap(), 0.5);
}

#[test]
fn test_bypass_round_trip_inside_session() {
    let graph = Arc::new(MemoryGraph::new(48000));
    let mut session = PlaybackSession::new(graph.clone()).unwrap();
    let before = graph.connections();

    session.bypass(true).unwrap();
    session.bypass(true).unwrap();
    assert!(graph.reaches(session.before().node(), graph.destination()));
    session.bypass(false).unwrap();

    assert_eq!(graph.connections(), before);
}

// ============================================================================
// SESSION LIFECYCLE
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_session_plays_decoded_wav() {
    let graph = Arc::new(MemoryGraph::new(16000));
    let mut session = PlaybackSession::new(graph.clone()).unwrap();
    let bytes = wav_bytes(16000, &generate_sine_wave(440.0, 16000, 250.0, 0.5));

    session.load_buffer(&WavDecoder::new(), "tone.wav", bytes).await.unwrap();
    assert_eq!(session.buffer().unwrap().frames(), 4000);

    session.start().unwrap();
    push_level(&graph, session.meter_node(), 30.0);
    session.play().unwrap();

    let mut measurements = session.subscribe();
    measurements.changed().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    session.stop().unwrap();

    let stats = session.stats();
    assert!(stats.count() >= 10);
    assert_eq!(stats.mean_level(), 30.0);
    // Constant level: no deviation, so the auto threshold equals the level
    assert_eq!(session.reducer().gate().threshold(), 30.0);

    session.shutdown().unwrap();
}

#[tokio::test]
async fn test_invalid_file_keeps_play_disabled() {
    let graph = Arc::new(MemoryGraph::new(16000));
    let mut session = PlaybackSession::new(graph).unwrap();

    let result = session
        .load_buffer(&WavDecoder::new(), "notes.txt", b"not audio".to_vec())
        .await;
    assert!(matches!(result, Err(AudioError::DecodeFailure(_))));
    assert!(matches!(session.play(), Err(AudioError::NotReady(_))));
}

// ============================================================================
// SPECTRUM PIPELINE
// ============================================================================

#[test]
fn test_fft_spectrum_drives_meter_and_bars() {
    let graph = Arc::new(MemoryGraph::new(48000));
    let session = PlaybackSession::new(graph.clone()).unwrap();
    let signal = generate_sine_wave(1500.0, 48000, 50.0, 0.2);

    let mut display = SpectrumAnalyzer::new(2048).unwrap().with_smoothing(0.0);
    let spectrum = display.analyse(&signal, 1.0);
    graph.set_spectrum(session.after().node(), &spectrum).unwrap();

    let bars = session.after().refresh().unwrap();
    let expected = spectrum_bars(&spectrum, 48000, 2048, 256.0);
    assert_eq!(bars, expected);
    assert!(bars.iter().any(|&h| h > 0.0));

    let mut meter = SpectrumAnalyzer::new(512).unwrap();
    graph
        .set_spectrum(session.meter_node(), &meter.analyse(&signal, 1.0))
        .unwrap();
    let measurement = session.measure_once().unwrap();
    assert!(measurement.level > 0.0);
}

// ============================================================================
// PRESETS AND CONFIGURATION
// ============================================================================

#[tokio::test]
async fn test_user_preset_applies_to_reducer() {
    let temp_dir = TempDir::new().unwrap();
    let manager = PresetManager::new(temp_dir.path().to_path_buf());
    let preset = EqPreset::new("Hiss Cut")
        .with_types([FilterType::Lowshelf, FilterType::Highshelf])
        .with_gains([3.0, -12.0]);
    manager.save_preset(&preset).await.unwrap();

    let library = PresetLibrary::load(&manager).await;
    let resolved = library.resolve("hiss-cut").unwrap();

    let graph = Arc::new(MemoryGraph::new(48000));
    let mut reducer = NoiseReducer::new(graph.clone()).unwrap();
    reducer.apply_preset(resolved).unwrap();

    let bands = reducer.equalizer().bands();
    assert_eq!(bands[1].filter_type, FilterType::Highshelf);
    assert_eq!(bands[1].gain_db, -12.0);
    // Frequencies keep the construction preset
    assert_eq!(bands[0].frequency_hz, 200.0);
    assert_eq!(
        graph.biquad(reducer.equalizer().stages()[1]).unwrap(),
        bands[1]
    );
}

#[tokio::test]
async fn test_offline_render_with_saved_config() {
    let temp_dir = TempDir::new().unwrap();
    let config_manager = ConfigManager::new(temp_dir.path().to_path_buf());

    let mut config = MurmurConfig::factory_default();
    config.session.auto_threshold = false;
    config.gate.threshold = 1000.0;
    config_manager.save(&config).await.unwrap();

    let loaded = config_manager.load().await;
    assert_eq!(loaded, config);

    let buffer = SampleBuffer::new(16000, 1, generate_sine_wave(300.0, 16000, 300.0, 0.4)).unwrap();
    let mut renderer = OfflineRenderer::new(&loaded, 16000).unwrap();
    let report = renderer.render(buffer).unwrap();

    // Nothing reaches a threshold of 1000
    assert_eq!(report.gate.floor_ratio, 1.0);
    assert_eq!(report.final_threshold, 1000.0);
}

#[test]
fn test_louder_input_gets_lower_gain() {
    let config = MurmurConfig::factory_default();
    let mut quiet_config = config.clone();
    quiet_config.session.auto_threshold = false;
    quiet_config.gate.threshold = 0.0;
    let loud_config = quiet_config.clone();

    let quiet = SampleBuffer::new(16000, 1, generate_sine_wave(500.0, 16000, 300.0, 0.05)).unwrap();
    let loud = SampleBuffer::new(16000, 1, generate_sine_wave(500.0, 16000, 300.0, 0.8)).unwrap();

    let quiet_report = OfflineRenderer::new(&quiet_config, 16000)
        .unwrap()
        .render(quiet)
        .unwrap();
    let loud_report = OfflineRenderer::new(&loud_config, 16000)
        .unwrap()
        .render(loud)
        .unwrap();

    assert!(loud_report.gate.mean_gain < quiet_report.gate.mean_gain);
}

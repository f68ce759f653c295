//! Murmur CLI Application

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use murmur_core::domain::config::{ConfigManager, MurmurConfig};
use murmur_core::domain::preset::{EqPreset, PresetLibrary, PresetManager, PresetWatcher};
use murmur_infra::audio::{OfflineRenderer, RenderReport, WavDecoder};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "murmur")]
#[command(about = "Noise reduction for recorded speech", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration directory (defaults to the platform config dir)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List equalizer presets
    Presets {
        #[command(subcommand)]
        action: Option<PresetAction>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a WAV file through the noise reducer and report the gate's behaviour
    Analyse {
        file: PathBuf,

        /// Preset index, name or file stem
        #[arg(short, long)]
        preset: Option<String>,

        /// Gate threshold (disables auto threshold)
        #[arg(long)]
        threshold: Option<f32>,

        /// Gate target level
        #[arg(long)]
        target: Option<f32>,

        /// Input gain slider position (gain = value / 10)
        #[arg(long)]
        input: Option<f32>,

        /// Route around the reducer
        #[arg(long)]
        bypass: bool,

        /// Keep the threshold fixed instead of deriving it from the statistics
        #[arg(long)]
        no_auto: bool,

        /// Include every gate gain and measurement
        #[arg(long)]
        timeline: bool,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum PresetAction {
    /// Write a preset to the user preset directory
    Export { selector: String },
    /// Delete a user preset file
    Delete { stem: String },
    /// Print preset files as they are created or modified
    Watch,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write the factory default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
    /// Print the configuration file path
    Path,
}

#[derive(Serialize)]
struct PresetRow<'a> {
    index: usize,
    name: &'a str,
    stem: String,
    bands: usize,
}

fn band_count(preset: &EqPreset) -> usize {
    [
        preset.frequencies.as_ref().map(Vec::len),
        preset.types.as_ref().map(Vec::len),
        preset.q_factors.as_ref().map(Vec::len),
        preset.gains.as_ref().map(Vec::len),
    ]
    .into_iter()
    .flatten()
    .max()
    .unwrap_or(0)
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "murmur=debug,murmur_core=debug,murmur_infra=debug,info"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn config_manager(config_dir: Option<PathBuf>) -> Result<ConfigManager> {
    let dir = match config_dir {
        Some(dir) => dir,
        None => ConfigManager::default_config_dir()?,
    };
    Ok(ConfigManager::new(dir))
}

fn list_presets(library: &PresetLibrary, json: bool) -> Result<()> {
    let rows: Vec<PresetRow> = library
        .iter()
        .enumerate()
        .map(|(index, preset)| PresetRow {
            index,
            name: &preset.name,
            stem: preset.file_stem(),
            bands: band_count(preset),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for row in rows {
            println!("{:>3}  {:<24} {} band(s)", row.index, row.name, row.bands);
        }
    }
    Ok(())
}

async fn watch_presets(manager: &PresetManager) -> Result<()> {
    let watcher = PresetWatcher::new(manager.preset_dir().clone()).await?;
    let mut changes = watcher.subscribe();
    println!("Watching {} (Ctrl-C to stop)", manager.preset_dir().display());

    loop {
        tokio::select! {
            change = changes.recv() => match change {
                Ok(path) => {
                    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
                    match manager.load_preset(stem).await {
                        Ok(preset) => println!("updated: {} ({})", preset.name, path.display()),
                        Err(e) => println!("invalid: {} ({e})", path.display()),
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Preset watcher lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

fn print_report(report: &RenderReport, preset: &str) {
    println!("preset          {preset}");
    println!(
        "audio           {} Hz, {} ch, {:.2} s",
        report.sample_rate, report.channels, report.duration_secs
    );
    println!("blocks          {}", report.blocks);
    println!(
        "reducer         {}",
        if report.bypassed { "bypassed" } else { "active" }
    );
    println!(
        "threshold       {:.3}{}",
        report.final_threshold,
        if report.auto_threshold { " (auto)" } else { "" }
    );
    println!("target          {:.3}", report.target);
    println!("post gain       {:.3}", report.post_gain);
    println!("average level   {:.3}", report.stats.mean_level());
    println!("avg deviation   {:.3}", report.stats.mean_deviation());
    if let Some(ratio) = report.last_measurement.and_then(|m| m.deviation_per_level()) {
        println!("dev / level     {ratio:.3}");
    }
    if report.gate.ticks > 0 {
        println!(
            "gate gain       min {:.3}  mean {:.3}  max {:.3}",
            report.gate.min_gain, report.gate.mean_gain, report.gate.max_gain
        );
        println!("at floor        {:.1}%", report.gate.floor_ratio * 100.0);
    }
    println!("equalizer");
    for (i, band) in report.equalizer.iter().enumerate() {
        println!(
            "  {i}  {:<10} {:>8.1} Hz  Q {:<5.2} {:+.1} dB",
            band.filter_type, band.frequency_hz, band.q, band.gain_db
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let manager = config_manager(cli.config_dir)?;

    match cli.command {
        Commands::Presets { action, json } => {
            let config = manager.load().await;
            let presets = PresetManager::new(manager.preset_dir(&config));
            let library = PresetLibrary::load(&presets).await;

            match action {
                None => list_presets(&library, json)?,
                Some(PresetAction::Export { selector }) => {
                    let preset = library.resolve(&selector)?;
                    let path = presets.save_preset(preset).await?;
                    println!("{}", path.display());
                }
                Some(PresetAction::Delete { stem }) => presets.delete_preset(&stem).await?,
                Some(PresetAction::Watch) => watch_presets(&presets).await?,
            }
        }

        Commands::Analyse {
            file,
            preset,
            threshold,
            target,
            input,
            bypass,
            no_auto,
            timeline,
            json,
        } => {
            let mut config = manager.load().await;
            if let Some(threshold) = threshold {
                config.gate.threshold = threshold;
                config.session.auto_threshold = false;
            }
            if let Some(target) = target {
                config.gate.target = target;
            }
            if let Some(input) = input {
                config.session.input_gain = input / 10.0;
            }
            if no_auto {
                config.session.auto_threshold = false;
            }
            config.validate()?;

            let library = PresetLibrary::load(&PresetManager::new(manager.preset_dir(&config))).await;
            let selector = preset.unwrap_or_else(|| config.presets.default_preset.clone());
            let preset = library.resolve(&selector)?.clone();

            let buffer = WavDecoder::new()
                .decode_file(&file)
                .await
                .with_context(|| format!("failed to decode {}", file.display()))?;

            let mut renderer =
                OfflineRenderer::new(&config, buffer.sample_rate)?.with_timeline(timeline);
            renderer.session_mut().apply_preset(&preset)?;
            renderer.session_mut().bypass(bypass)?;
            let report = renderer.render(buffer)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report, &preset.name);
            }
        }

        Commands::Config { action } => match action {
            ConfigAction::Init { force } => {
                if manager.exists() && !force {
                    anyhow::bail!(
                        "{} already exists (use --force to overwrite)",
                        manager.config_path().display()
                    );
                }
                manager.save(&MurmurConfig::factory_default()).await?;
                println!("{}", manager.config_path().display());
            }
            ConfigAction::Show => {
                let config = manager.load().await;
                print!("{}", toml::to_string_pretty(&config)?);
            }
            ConfigAction::Path => println!("{}", manager.config_path().display()),
        },
    }

    Ok(())
}

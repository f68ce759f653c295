//! Example driving a noise reducer over the in-memory graph
//!
//! Run with: cargo run --package murmur-core --example reducer_demo

use murmur_core::domain::graph::AudioGraph;
use murmur_core::domain::memory_graph::MemoryGraph;
use murmur_core::domain::preset::PresetLibrary;
use murmur_core::domain::session::PlaybackSession;
use std::sync::Arc;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("murmur_core=debug,info")
        .init();

    println!("=== Murmur Reducer Demo ===\n");

    let graph = Arc::new(MemoryGraph::new(48000));
    let mut session = PlaybackSession::new(graph.clone())?;

    println!("1. Equalizer bands after construction:");
    for (i, band) in session.reducer().equalizer().bands().iter().enumerate() {
        println!(
            "   band {i}: {:>9} {:>8.1} Hz  Q {:.2}  {:+.1} dB",
            band.filter_type, band.frequency_hz, band.q, band.gain_db
        );
    }

    println!("\n2. Applying preset \"Low Volume 1\"...");
    let library = PresetLibrary::builtin();
    let preset = library.resolve("Low Volume 1")?;
    session.apply_preset(preset)?;
    println!("   gains now {:?}", session.reducer().equalizer().bands().iter().map(|b| b.gain_db).collect::<Vec<_>>());

    println!("\n3. Gate response to input levels (threshold 1, target 20):");
    let gate_meter = session.reducer().gate().input();
    for level in [0u8, 2, 5, 20] {
        graph.fill_spectrum(gate_meter, level)?;
        let gain = session.reducer().gate().tick()?;
        println!("   level {level:>3} -> gain {gain:.2}");
    }

    println!("\n4. Session measurements with auto threshold:");
    for level in [10u8, 20, 30, 25, 15] {
        graph.fill_spectrum(session.meter_node(), level)?;
        let m = session.measure_once()?;
        println!(
            "   level {:>5.1}  avg {:>5.1}  dev {:>5.1}  avg dev {:>5.2}  threshold {:>6.2}",
            m.level,
            m.average_level,
            m.deviation,
            m.average_deviation,
            session.reducer().gate().threshold()
        );
    }

    println!("\n5. Bypass round trip:");
    let before = graph.connections().len();
    session.bypass(true)?;
    println!("   bypassed: {} edges", graph.connections().len());
    session.bypass(false)?;
    println!("   restored: {} edges (was {before})", graph.connections().len());

    println!("\n=== Demo Complete ===");
    Ok(())
}

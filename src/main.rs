use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use arcade_sim::config::SimConfig;
use arcade_sim::demo::{DemoScene, DemoSettings, HeadlessRenderer};
use arcade_sim::sim::Simulation;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize logging, RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Arcade sim v{}", env!("CARGO_PKG_VERSION"));

    let config = SimConfig::load_or_default();
    config.validate()?;
    info!(
        "Configuration loaded: grid={}x{} cell_size={} capacity={} threaded_grid={} threaded_update={}",
        config.grid_rows,
        config.grid_columns,
        config.grid_cell_size,
        config.object_capacity,
        config.threaded_grid,
        config.threaded_update
    );

    let stop = Arc::new(AtomicBool::new(false));

    // Ctrl+C stops the frame loop after the current frame
    let stop_on_signal = Arc::clone(&stop);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                stop_on_signal.store(true, Ordering::Relaxed);
            }
            Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
        }
    });

    let settings = DemoSettings::from_env();
    let loop_stop = Arc::clone(&stop);
    let outcome = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        let scene = DemoScene::new(&config, settings);
        let mut sim = Simulation::new(config, scene)?;
        let mut renderer = HeadlessRenderer::default();
        let frames = sim.run(&mut renderer, &loop_stop)?;
        Ok((frames, renderer, sim.app().score(), sim.metrics().snapshot()))
    })
    .await?;

    match outcome {
        Ok((frames, renderer, score, snapshot)) => {
            info!(
                "Simulated {} frames, presented {} ({} draws), score {}",
                frames, renderer.frames, renderer.draws, score
            );
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
        Err(e) => {
            error!("Simulation failed: {}", e);
            Err(e)
        }
    }
}

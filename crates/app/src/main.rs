use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use clap::Parser;
use ledcava_core::{
    AppConfig, AudioSource, Display, EffectRegistry, FrameBuffer, Geometry, RenderScheduler,
};
use tracing_subscriber::EnvFilter;

fn main() -> ledcava_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        tracing::error!(error = %e, "shutting down after fatal error");
        return Err(e);
    }
    Ok(())
}

fn run(cli: &Cli) -> ledcava_core::Result<()> {
    let config = AppConfig::load(&cli.config)?;
    let geometry = Geometry::from_config(&config.display)?;
    tracing::info!(
        width = geometry.module_width,
        height = geometry.module_height,
        modules = geometry.module_count,
        "display configured"
    );

    // The physical strip driver plugs in here; headless runs render into an
    // in-memory frame buffer.
    let output = Box::new(FrameBuffer::new(geometry.total_pixels()));
    let mut display = Display::new(geometry, output);

    let registry = EffectRegistry::builtin(&config.effects);
    let mut scheduler = RenderScheduler::new(registry, &config.effects, config.audio.framerate);
    if let Some(name) = cli.effect.as_deref() {
        scheduler.select(name)?;
    }

    let mut audio = AudioSource::new(&config.audio);
    audio.start()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        tracing::warn!(error = %e, "could not install the Ctrl+C handler");
    }

    tracing::info!("system ready, press Ctrl+C to exit");
    let result = scheduler.run(&audio, &mut display, &shutdown);
    audio.stop();
    tracing::info!("system stopped");
    result
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio-reactive LED matrix controller", long_about = None)]
struct Cli {
    /// Effect to start with (e.g. BlueWave, WarmPeaks). Disables auto-cycle.
    #[arg(short, long)]
    effect: Option<String>,
    /// Path to the settings file.
    #[arg(short, long, default_value = "settings.json")]
    config: PathBuf,
}

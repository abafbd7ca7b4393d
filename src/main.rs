//! CLI entry point for rust-vision
//!
//! Runs the vision pipeline on the simulated board, or checks a
//! configuration file.
//!
//! # Usage
//!
//! ```bash
//! rust-vision run --config config/pipeline.toml --duration-secs 10
//! rust-vision check-config --config config/pipeline.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use rust_vision::config::{VisionConfig, DEFAULT_CONFIG_PATH};
use rust_vision::logging::{self, OutputFormat};
use rust_vision::sim::{detector_model, detector_network, SimulatedBoard};
use rust_vision::{abort_on_fatal, Pipeline};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;
use vision_driver_mock::MockPostprocessor;
use vision_hal::PostprocessKind;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "rust-vision")]
#[command(about = "Camera to neural network to USB video pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline on simulated hardware
    Run {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Stop after this many seconds (runs until killed when absent)
        #[arg(long)]
        duration_secs: Option<u64>,

        /// Log as JSON regardless of the configured format
        #[arg(long)]
        json: bool,
    },

    /// Load and validate a configuration file
    CheckConfig {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            duration_secs,
            json,
        } => run(config, duration_secs.map(Duration::from_secs), json),
        Commands::CheckConfig { config } => check_config(config),
    }
}

fn load_config(path: &Path) -> Result<VisionConfig> {
    let config = VisionConfig::load_from(path)
        .with_context(|| format!("loading {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("validating {}", path.display()))?;
    Ok(config)
}

fn run(path: PathBuf, duration: Option<Duration>, json: bool) -> Result<()> {
    let mut config = load_config(&path)?;
    if json {
        config.application.log_format = OutputFormat::Json;
    }
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;
    info!(
        name = %config.application.name,
        config = %path.display(),
        "starting pipeline on simulated hardware"
    );

    let board = SimulatedBoard::new(&config).context("building simulated board")?;
    let network = detector_network(&config);
    let pipeline = Pipeline::start(
        &config,
        board.hardware(),
        vec![detector_model(network)],
        Box::new(MockPostprocessor::new(PostprocessKind::YoloV2)),
        abort_on_fatal(),
    )
    .context("starting pipeline")?;

    if config.simulation.stream_active {
        board.sink.set_streaming(true);
    }

    let started = Instant::now();
    loop {
        thread::sleep(REPORT_INTERVAL);
        let stats = pipeline.stats().snapshot();
        let cpu = pipeline.stats().cpu_load();
        let ctx = pipeline.context();
        if json {
            let line = serde_json::json!({ "stats": stats, "cpu_load": cpu });
            info!(snapshot = %line, "pipeline statistics");
        } else {
            info!(
                inference_ms = stats.nn_inference.last,
                nn_mean_ms = stats.nn_total.mean,
                display_mean_ms = stats.disp_total.mean,
                cpu_1s = cpu.one_second,
                dropped = ctx.dropped_frames(),
                streamed = board.sink.frames_shown(),
                "pipeline statistics"
            );
        }

        if duration.is_some_and(|d| started.elapsed() >= d) {
            break;
        }
    }

    board.camera.stop();
    info!(
        frames = board.camera.frames(vision_hal::Pipe::Main),
        inferences = board.npu.runs(),
        streamed = board.sink.frames_shown(),
        "run finished"
    );
    Ok(())
}

fn check_config(path: PathBuf) -> Result<()> {
    let config = load_config(&path)?;
    println!("{} is valid", path.display());
    println!(
        "  camera: {}x{} @ {} fps, capture delay {}",
        config.camera.display_width,
        config.camera.display_height,
        config.camera.fps,
        config.camera.capture_delay
    );
    println!(
        "  nn input: {}x{}x{} ({} bytes)",
        config.nn.width,
        config.nn.height,
        config.nn.bpp,
        config.nn.input_len()
    );
    Ok(())
}

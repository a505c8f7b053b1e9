//! edgevisiond - edge vision pipeline daemon
//!
//! Loads configuration, starts the engine, and runs until killed. The
//! HTTP surface is deployed separately and talks to the engine through
//! its snapshot accessors; this daemon only drives the pipeline.
//!
//! Exit codes: 0 ok, 2 invalid configuration, 3 key load/generate
//! failure, 4 no camera sources opened, 5 fatal runtime error.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use edge_vision::engine::NoCameraSources;
use edge_vision::{Engine, EngineConfig, VaultError};

const EXIT_OK: i32 = 0;
const EXIT_CONFIG: i32 = 2;
const EXIT_KEY: i32 = 3;
const EXIT_NO_SOURCES: i32 = 4;
const EXIT_FATAL: i32 = 5;

#[derive(Parser, Debug)]
#[command(name = "edgevisiond", about = "Multi-camera edge vision daemon")]
struct Args {
    /// Path to a JSON config file (overrides EDGE_VISION_CONFIG).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Validate the configuration and exit.
    #[arg(long)]
    validate: bool,

    /// Seconds between status log lines.
    #[arg(long, default_value_t = 30)]
    status_interval: u64,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    std::process::exit(run());
}

fn run() -> i32 {
    let args = Args::parse();

    let cfg = match load_config(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            log::error!("invalid configuration: {:#}", e);
            return EXIT_CONFIG;
        }
    };

    if args.validate {
        log::info!(
            "configuration valid: {} source(s), device {}, {}x{} @ {} fps, segments {}s",
            cfg.camera_sources.len(),
            cfg.device,
            cfg.resolution.0,
            cfg.resolution.1,
            cfg.target_fps,
            cfg.segment_seconds
        );
        return EXIT_OK;
    }

    let mut engine = match Engine::with_defaults(cfg) {
        Ok(engine) => engine,
        Err(e) => {
            log::error!("engine construction failed: {:#}", e);
            return EXIT_FATAL;
        }
    };

    if let Err(e) = engine.start() {
        if e.downcast_ref::<VaultError>().is_some() {
            log::error!("vault key failure: {:#}", e);
            return EXIT_KEY;
        }
        if e.downcast_ref::<NoCameraSources>().is_some() {
            log::error!("{:#}", e);
            return EXIT_NO_SOURCES;
        }
        log::error!("engine start failed: {:#}", e);
        return EXIT_FATAL;
    }

    let interval = Duration::from_secs(args.status_interval.max(1));
    loop {
        std::thread::sleep(interval);
        for camera in engine.status() {
            log::info!(
                "[cam {}] {:?} fps={:.1} det={} frames={} write_errs={} drops={}",
                camera.index,
                camera.state,
                camera.fps_ewma,
                camera.last_detection_count,
                camera.frames_total,
                camera.write_errors,
                camera.evidence_drops
            );
        }
    }
}

fn load_config(args: &Args) -> anyhow::Result<EngineConfig> {
    match &args.config {
        Some(path) => EngineConfig::load_from(Some(path)),
        None => EngineConfig::load(),
    }
}

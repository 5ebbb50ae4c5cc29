use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use handmark_core::{DetectOptions, HandDetector, OnnxHandPredictor};
use handmark_hw::{Camera, ImageSequence};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod output;
mod tracking;

use config::Config;
use output::{SaveSink, SaveTarget, WindowSink};
use tracking::{JsonSink, LoopOptions};

#[derive(Parser)]
#[command(name = "handmark", about = "Hand landmark tracking and finger features")]
struct Cli {
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Hand landmark ONNX model (overrides config)
    #[arg(long, global = true)]
    model: Option<PathBuf>,
    /// Maximum number of hands to report
    #[arg(long, global = true)]
    max_hands: Option<usize>,
    /// Minimum score for a newly found hand
    #[arg(long, global = true)]
    detection_confidence: Option<f32>,
    /// Minimum score for keeping a tracked hand
    #[arg(long, global = true)]
    tracking_confidence: Option<f32>,
    /// Keep Left/Right labels as the model reports them
    #[arg(long, global = true)]
    no_mirror: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track hands on a live camera
    Run {
        /// V4L2 device path (e.g., /dev/video0)
        #[arg(short, long)]
        device: Option<String>,
        /// Print per-frame JSON instead of opening a window
        #[arg(long)]
        headless: bool,
        /// Stop after this many frames
        #[arg(long)]
        frames: Option<usize>,
        /// Show frames without overlays
        #[arg(long)]
        no_draw: bool,
        /// Detect every frame from scratch, without tracking
        #[arg(long)]
        static_image_mode: bool,
    },
    /// Detect hands in an image file or a directory of images
    Image {
        /// Image file or directory
        input: PathBuf,
        /// Where to write the annotated image (a directory when the input is one)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Also list every landmark of this hand
        #[arg(long)]
        position: Option<usize>,
    },
    /// List V4L2 capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(model) = cli.model {
        config.model_path = model;
    }
    if let Some(n) = cli.max_hands {
        config.predictor.max_hands = n;
    }
    if let Some(c) = cli.detection_confidence {
        config.predictor.detection_confidence = c;
    }
    if let Some(c) = cli.tracking_confidence {
        config.predictor.tracking_confidence = c;
    }
    if cli.no_mirror {
        config.mirror_handedness = false;
    }

    match cli.command {
        Commands::Run {
            device,
            headless,
            frames,
            no_draw,
            static_image_mode,
        } => {
            if let Some(device) = device {
                config.camera_device = device;
            }
            if static_image_mode {
                config.predictor.static_image_mode = true;
            }

            let stop = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&stop);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("interrupted, stopping");
                    flag.store(true, Ordering::Relaxed);
                }
            });

            let processed = tokio::task::spawn_blocking(move || {
                run_live(&config, headless, frames, !no_draw && !headless, &stop)
            })
            .await??;
            tracing::info!(frames = processed, "done");
        }
        Commands::Image {
            input,
            output,
            position,
        } => {
            config.predictor.static_image_mode = true;
            let processed =
                tokio::task::spawn_blocking(move || run_images(&config, input, output, position))
                    .await??;
            tracing::info!(frames = processed, "done");
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
    }

    Ok(())
}

fn load_detector(config: &Config) -> Result<HandDetector<OnnxHandPredictor>> {
    let predictor = OnnxHandPredictor::load(&config.model_path_str(), config.predictor)
        .with_context(|| format!("loading hand model {}", config.model_path.display()))?;
    Ok(HandDetector::new(predictor))
}

fn run_live(
    config: &Config,
    headless: bool,
    frames: Option<usize>,
    draw: bool,
    stop: &AtomicBool,
) -> Result<usize> {
    let mut detector = load_detector(config)?;
    let mut camera = Camera::open(&config.camera_device, config.width, config.height)
        .with_context(|| format!("opening camera {}", config.camera_device))?;
    if let Some(brightness) = camera.discard_frames(config.warmup_frames) {
        tracing::info!(brightness, "camera warmed up");
    }

    let options = LoopOptions {
        detect: DetectOptions {
            draw,
            mirror_handedness: config.mirror_handedness,
        },
        max_frames: frames,
        max_capture_failures: config.max_capture_failures,
        position_hand: None,
    };

    if headless {
        let mut sink = JsonSink::new(std::io::stdout().lock());
        tracking::run_loop(&mut camera, &mut detector, &mut sink, options, stop)
    } else {
        let mut sink = WindowSink::new(
            &format!("handmark: {}", config.camera_device),
            camera.width as usize,
            camera.height as usize,
        )?;
        tracking::run_loop(&mut camera, &mut detector, &mut sink, options, stop)
    }
}

fn run_images(
    config: &Config,
    input: PathBuf,
    output: Option<PathBuf>,
    position: Option<usize>,
) -> Result<usize> {
    let mut detector = load_detector(config)?;
    let mut images = ImageSequence::open(&input)?;

    let options = LoopOptions {
        detect: DetectOptions {
            draw: output.is_some(),
            mirror_handedness: config.mirror_handedness,
        },
        max_frames: None,
        // Undecodable files are skipped, not fatal.
        max_capture_failures: images.len(),
        position_hand: position,
    };

    let target = output.map(|path| SaveTarget::for_input(&input, path));
    let mut sink = SaveSink::new(std::io::stdout().lock(), images.paths().to_vec(), target)?;
    let never = AtomicBool::new(false);
    tracking::run_loop(&mut images, &mut detector, &mut sink, options, &never)
}

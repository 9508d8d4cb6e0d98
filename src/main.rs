//! Command-line interface for mel-spectrogram synthesis.
//!
//! `say` runs the full pipeline from a YAML config; `inspect` lists the
//! normalized parameters of a checkpoint.

#![recursion_limit = "256"]

use anyhow::Result;
use burn::tensor::backend::Backend;
use burn_ndarray::{NdArray, NdArrayDevice};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use ttsynth::config::{load_config, DEFAULT_CONFIG_PATH};
use ttsynth::perf;
use ttsynth::runtime::SynthesisRuntime;
use ttsynth::weights::load_checkpoint;

#[cfg(feature = "backend-wgpu")]
use burn_wgpu::graphics::AutoGraphicsApi;
#[cfg(feature = "backend-wgpu")]
use burn_wgpu::{init_setup, Wgpu, WgpuDevice};

const DEFAULT_TEXT: &str = "Transformer model is so fast!";

/// Supported compute backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
enum BackendChoice {
    /// Follow `use_gpu` from the config.
    Auto,
    /// Use the WGPU backend (GPU acceleration when available).
    Wgpu,
    /// Use the ndarray backend (CPU).
    Ndarray,
}

/// Top-level CLI options.
#[derive(Parser)]
#[command(name = "ttsynth")]
#[command(about = "Autoregressive mel-spectrogram text-to-speech", long_about = None)]
struct Cli {
    /// Debug logging and a performance summary at the end of the run.
    #[arg(long, short, global = true)]
    verbose: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Synthesize speech from text.
    Say {
        /// Synthesis configuration YAML.
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Text to synthesize.
        #[arg(long, default_value = DEFAULT_TEXT)]
        text: String,
        /// Output WAV path (defaults to `<sample_path>/test.wav`).
        #[arg(long)]
        output: Option<PathBuf>,
        /// Override the number of decoder steps.
        #[arg(long)]
        max_len: Option<usize>,
        /// Compute backend to use.
        #[arg(long, value_enum, default_value_t = BackendChoice::Auto)]
        backend: BackendChoice,
        /// Show a progress bar while decoding.
        #[arg(long)]
        progress: bool,
    },
    /// List the normalized parameters of a checkpoint.
    Inspect {
        /// Checkpoint directory.
        #[arg(long)]
        dir: PathBuf,
        /// Step identifier (file stem of `<step>.safetensors`).
        #[arg(long)]
        step: String,
    },
}

#[derive(Debug, Clone)]
struct SayArgs {
    config: PathBuf,
    text: String,
    output: Option<PathBuf>,
    max_len: Option<usize>,
    progress: bool,
}

/// Entry point for the CLI.
fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Say {
            config,
            text,
            output,
            max_len,
            backend,
            progress,
        } => {
            let args = SayArgs {
                config,
                text,
                output,
                max_len,
                progress,
            };
            let use_gpu = match backend {
                BackendChoice::Auto => load_config(&args.config)?.use_gpu,
                BackendChoice::Wgpu => true,
                BackendChoice::Ndarray => false,
            };
            let interrupted = Arc::new(AtomicBool::new(false));
            let interrupt_flag = Arc::clone(&interrupted);
            ctrlc::set_handler(move || {
                interrupt_flag.store(true, Ordering::SeqCst);
            })?;
            if use_gpu {
                #[cfg(feature = "backend-wgpu")]
                {
                    let device = WgpuDevice::default();
                    init_setup::<AutoGraphicsApi>(&device, Default::default());
                    run_say::<Wgpu>(args, &device, interrupted)?;
                }
                #[cfg(not(feature = "backend-wgpu"))]
                {
                    if backend == BackendChoice::Wgpu {
                        anyhow::bail!(
                            "WGPU backend not enabled; build with --features backend-wgpu"
                        );
                    }
                    tracing::warn!("use_gpu is set but the WGPU backend is not compiled in; using CPU");
                    let device = NdArrayDevice::default();
                    run_say::<NdArray<f32>>(args, &device, interrupted)?;
                }
            } else {
                let device = NdArrayDevice::default();
                run_say::<NdArray<f32>>(args, &device, interrupted)?;
            }
        }
        Commands::Inspect { dir, step } => {
            let params = load_checkpoint(&dir, &step)?;
            for (name, tensor) in params.iter() {
                println!("{name}\t{:?}\t{:?}", tensor.dtype, tensor.shape);
            }
        }
    }

    if cli.verbose {
        eprintln!("{}", perf::report());
    }

    Ok(())
}

fn run_say<B: Backend>(args: SayArgs, device: &B::Device, interrupted: Arc<AtomicBool>) -> Result<()> {
    let mut config = load_config(&args.config)?;
    if let Some(max_len) = args.max_len {
        config.max_len = max_len;
    }
    let runtime = SynthesisRuntime::<B>::from_config(&config, device)?;
    if interrupted.load(Ordering::SeqCst) {
        anyhow::bail!("Interrupted");
    }

    let bar = args.progress.then(|| create_progress_bar(config.max_len as u64));
    let result = runtime.run(&args.text, args.output.as_deref(), |step| {
        if interrupted.load(Ordering::SeqCst) {
            anyhow::bail!("Interrupted");
        }
        if let Some(bar) = bar.as_ref() {
            bar.set_position(step.step as u64 + 1);
        }
        Ok(())
    });
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
    let (synthesis, path) = result?;

    info!(
        "Saved {:.2}s of audio to {}",
        synthesis.samples.len() as f32 / synthesis.sample_rate as f32,
        path.display()
    );
    if let Some(step) = synthesis.stop_step {
        info!("Stop token fired at step {step}");
    }
    Ok(())
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Warning: tracing subscriber already installed");
    }
}

fn create_progress_bar(len: u64) -> ProgressBar {
    let bar = ProgressBar::new(len);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} frames")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    bar.set_style(style);
    bar
}

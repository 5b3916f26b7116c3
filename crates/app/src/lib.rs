use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use segmask_core::config::{
    config_path, data_dir, initialize_data_dir, resolve_relative_to, AppConfig,
};
use segmask_core::contract::StreamDeclaration;
use segmask_core::executor::NodeRunner;
use segmask_core::gpu::GpuContext;
use segmask_core::logging::{self, LogRequest, LogSink, DEFAULT_LOG_FILTER};
use segmask_core::node::NodeState;
use segmask_core::registry::{register_all_nodes, NodeRegistry};
use segmask_core::segmentation::converter::ConverterTable;
use segmask_core::segmentation::node::{MASK_TAG, NODE_TYPE, OUTPUT_SIZE_TAG, TENSORS_TAG};
use segmask_core::segmentation::{Activation, SegmentationOptions};
use segmask_core::types::{Image, PortData, Residency, Tensor, Timestamp};

#[derive(Parser)]
#[command(
    name = "segmask",
    about = "Convert segmentation model output tensors into mask images"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        global = true,
        help = "Increase log verbosity (-v: debug, -vv: trace)"
    )]
    verbose: u8,

    #[arg(
        long = "log-filter",
        value_name = "FILTER",
        global = true,
        help = "Explicit tracing filter (overrides RUST_LOG and -v)"
    )]
    log_filter: Option<String>,

    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run tensor files through the segmentation node, one frame per file.
    Run(RunArgs),
    /// List the converter backends this build and config offer.
    Backends,
}

#[derive(Args)]
struct RunArgs {
    #[arg(required = true, help = "Tensor JSON files ({\"shape\": [...], \"data\": [...]})")]
    inputs: Vec<PathBuf>,
    #[arg(long, help = "Activation override: NONE, SIGMOID or SOFTMAX")]
    activation: Option<String>,
    #[arg(
        long = "output-size",
        value_name = "WxH",
        value_parser = parse_output_size,
        help = "Resize every mask to WIDTHxHEIGHT"
    )]
    output_size: Option<(i32, i32)>,
    #[arg(long, help = "Mark input tensors as GPU-resident")]
    gpu_resident: bool,
    #[arg(short = 'o', long, help = "Directory for mask PNGs (default: [output].dir)")]
    output: Option<PathBuf>,
}

pub async fn run_from_env() -> Result<()> {
    let cli = Cli::parse();
    let resolved_data_dir = data_dir(cli.data_dir.as_deref());

    init_logging(
        Some(resolved_data_dir.as_path()),
        cli.verbose,
        cli.log_filter.as_deref(),
    );
    log_startup_metadata(&resolved_data_dir);

    if let Err(e) = initialize_data_dir(&resolved_data_dir) {
        warn!(error = %e, "Failed to initialize data directory");
    }
    let config = match AppConfig::load_from_path(&config_path(&resolved_data_dir)) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load config file, using defaults");
            AppConfig::default()
        }
    };

    match cli.command {
        Commands::Run(run) => {
            let out_dir = run
                .output
                .clone()
                .unwrap_or_else(|| resolve_relative_to(&resolved_data_dir, &config.output.dir));
            tokio::task::spawn_blocking(move || run_frames(&config, &run, &out_dir))
                .await
                .context("mask worker panicked")?
        }
        Commands::Backends => {
            print_backends(&config);
            Ok(())
        }
    }
}

#[cfg(test)]
fn select_log_filter(rust_log_env: Option<&str>, verbose: u8, cli_log_filter: Option<&str>) -> String {
    LogRequest {
        verbose,
        cli_filter: cli_log_filter.map(ToString::to_string),
        rust_log: rust_log_env.map(ToString::to_string),
    }
    .filters()
    .console
}

fn init_logging(data_dir: Option<&Path>, verbose: u8, cli_log_filter: Option<&str>) {
    let filters = LogRequest::from_env(verbose, cli_log_filter).filters();
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(parse_env_filter_with_fallback(&filters.console, "console"));

    match logging::open_log_sink(data_dir) {
        LogSink::File(appender) => {
            let subscriber = tracing_subscriber::registry().with(console_layer).with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(appender)
                    .with_filter(parse_env_filter_with_fallback(&filters.file, "file")),
            );

            if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!(
                    "Failed to initialize tracing subscriber: {error}. Continuing without structured tracing."
                );
            }
        }
        LogSink::ConsoleOnly { log_dir, reason } => {
            let subscriber = tracing_subscriber::registry().with(console_layer);
            if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!(
                    "Failed to initialize tracing subscriber: {error}. Continuing without structured tracing."
                );
                return;
            }

            warn!(
                attempted_log_dir = ?log_dir,
                reason = %reason,
                "Persistent file logging unavailable; continuing with console-only logging"
            );
        }
    }
}

fn parse_env_filter_with_fallback(filter: &str, sink_name: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_new(filter).unwrap_or_else(|error| {
        eprintln!(
            "Invalid {sink_name} log filter '{filter}': {error}. Falling back to '{DEFAULT_LOG_FILTER}'."
        );
        tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)
    })
}

fn log_startup_metadata(data_dir: &Path) {
    info!(
        pid = std::process::id(),
        data_dir = %data_dir.display(),
        config_path = %config_path(data_dir).display(),
        "Runtime startup metadata"
    );
}

/// Parse `WIDTHxHEIGHT`. Non-positive values are passed through untouched;
/// the converter decides what to do with them.
fn parse_output_size(raw: &str) -> Result<(i32, i32), String> {
    let (w, h) = raw
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{raw}'"))?;
    let w = w
        .trim()
        .parse::<i32>()
        .map_err(|e| format!("invalid width '{w}': {e}"))?;
    let h = h
        .trim()
        .parse::<i32>()
        .map_err(|e| format!("invalid height '{h}': {e}"))?;
    Ok((w, h))
}

#[derive(Debug, Deserialize)]
struct TensorFile {
    shape: Vec<usize>,
    data: Vec<f32>,
}

fn load_tensor(path: &Path, residency: Residency) -> Result<Tensor> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read tensor file: {}", path.display()))?;
    let file: TensorFile = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse tensor JSON: {}", path.display()))?;
    let tensor = Tensor::from_f32(&file.shape, file.data).with_context(|| {
        format!(
            "tensor data does not match shape {:?}: {}",
            file.shape,
            path.display()
        )
    })?;
    Ok(tensor.with_residency(residency))
}

/// 8-bit grayscale rendering of a mask. GPU masks are written in the
/// device's row order.
fn mask_to_gray(mask: &Image) -> image::GrayImage {
    image::GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        let value = mask.mask_value(x, y).unwrap_or(0.0).clamp(0.0, 1.0);
        image::Luma([(value * 255.0).round() as u8])
    })
}

fn options_to_params(options: &SegmentationOptions) -> Result<HashMap<String, serde_json::Value>> {
    match serde_json::to_value(options).context("failed to encode segmentation options")? {
        serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
        other => bail!("segmentation options encoded as {other}, expected an object"),
    }
}

fn build_registry(config: &AppConfig) -> NodeRegistry {
    let mut registry = NodeRegistry::new();

    register_all_nodes(&mut registry, &config.runtime.capabilities());

    registry
}

fn gpu_context(config: &AppConfig) -> Option<Arc<GpuContext>> {
    let caps = config.runtime.capabilities();
    caps.can_use_gpu().then(|| {
        Arc::new(GpuContext::new(
            config.runtime.gpu_api,
            config.runtime.gpu_device.clone(),
        ))
    })
}

fn build_runner(config: &AppConfig, run: &RunArgs) -> Result<NodeRunner> {
    let mut options = config.segmentation.clone();
    if let Some(name) = run.activation.as_deref() {
        options.activation = Activation::parse(name)?;
    }

    let registry = build_registry(config);
    let node = registry
        .create(NODE_TYPE, options_to_params(&options)?)
        .context("failed to create segmentation node")?;

    let tensors = format!("{TENSORS_TAG}:tensors");
    let size = format!("{OUTPUT_SIZE_TAG}:output_size");
    let mask = format!("{MASK_TAG}:mask");
    let mut inputs = vec![tensors.as_str()];
    if run.output_size.is_some() {
        inputs.push(size.as_str());
    }
    let declaration = StreamDeclaration::parse(&inputs, &[mask.as_str()])?;

    let mut runner = NodeRunner::new(node, &declaration, gpu_context(config))?;
    runner.open()?;
    Ok(runner)
}

fn run_frames(config: &AppConfig, run: &RunArgs, out_dir: &Path) -> Result<()> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create output directory: {}", out_dir.display()))?;

    let mut runner = build_runner(config, run)?;
    let residency = if run.gpu_resident {
        Residency::Gpu
    } else {
        Residency::Host
    };

    let mut written = 0usize;
    let mut failed = 0usize;
    for (index, path) in run.inputs.iter().enumerate() {
        let timestamp = Timestamp(index as i64);

        let tensor = match load_tensor(path, residency) {
            Ok(tensor) => tensor,
            Err(err) => {
                warn!(path = %path.display(), error = %format!("{err:#}"), "Skipping unreadable tensor file");
                failed += 1;
                continue;
            }
        };

        let mut frame = HashMap::from([(TENSORS_TAG.to_string(), PortData::Tensors(vec![tensor]))]);
        if let Some((w, h)) = run.output_size {
            frame.insert(OUTPUT_SIZE_TAG.to_string(), PortData::Size(w, h));
        }

        if let Err(err) = runner.process(timestamp, frame) {
            if runner.state() == NodeState::Faulted {
                return Err(err).context("segmentation node faulted");
            }
            warn!(path = %path.display(), %timestamp, error = %format!("{err:#}"), "Frame skipped");
            failed += 1;
            continue;
        }

        let packet = runner
            .output(MASK_TAG)
            .and_then(|stream| stream.pop())
            .ok_or_else(|| anyhow!("no mask published for {}", path.display()))?;
        let mask = packet
            .into_image()
            .ok_or_else(|| anyhow!("MASK packet does not carry an image"))?;

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("frame-{index}"));
        let out_path = out_dir.join(format!("{stem}.png"));
        mask_to_gray(&mask)
            .save(&out_path)
            .with_context(|| format!("failed to write mask: {}", out_path.display()))?;
        info!(
            path = %out_path.display(),
            width = mask.width(),
            height = mask.height(),
            residency = ?mask.residency(),
            "Wrote mask"
        );
        written += 1;
    }

    info!(written, failed, "Segmentation run finished");
    if written == 0 && failed > 0 {
        bail!("all {failed} frame(s) failed");
    }
    Ok(())
}

fn print_backends(config: &AppConfig) {
    let table = ConverterTable::from_capabilities(&config.runtime.capabilities());
    let backends = table.backends();
    if backends.is_empty() {
        println!("no converter backends available");
        return;
    }
    for (backend, kind) in backends {
        println!("{backend}\t{kind}");
    }
}

//! image-ingest CLI
//!
//! One command: turn a list of image files into resized, cropped,
//! color-augmented float tensors and print a JSON summary of what came out.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context as _, Result};
use clap::{ArgAction, Parser, ValueEnum};
use serde::Serialize;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use image_ingest_core::{
    BatchConfig, CropLocation, IngestRequest, IngestService, Packing, TensorOutput,
};

mod parser;

#[derive(Parser)]
#[command(
    name = "image-ingest",
    version,
    about = "Batched image decode and augmentation for training pipelines",
    long_about = "Decode, resize, crop, and color-augment a batch of images on a \
                  worker pool, optionally packing the batch into a single tensor \
                  and mirroring it into device memory.\n\n\
                  Use --prefetch to kick off work in the background; a following \
                  invocation with the same filenames collects it."
)]
struct Cli {
    /// Worker pool size (defaults to the core count)
    #[arg(long, default_value_t = num_cpus::get())]
    num_threads: usize,

    /// Start probe and fetch work, then return without waiting
    #[arg(long)]
    prefetch: bool,

    /// Resize: S (shortest side) or HxW (fixed)
    #[arg(long, value_name = "S|HxW")]
    resize: Option<String>,

    /// Emit a single (H, W, 3, N) tensor; requires a fixed resize
    #[arg(long)]
    pack: bool,

    /// Copy outputs to device memory
    #[arg(long)]
    gpu: bool,

    /// Per-channel mean to subtract
    #[arg(long, value_name = "R,G,B")]
    subtract_average: Option<String>,

    /// Brightness deviation: scalar, 3 diagonal values, or 9 matrix values
    #[arg(long, value_name = "B|R,G,B|9xB")]
    brightness: Option<String>,

    /// Contrast deviation in [0, 1]
    #[arg(long)]
    contrast: Option<f32>,

    /// Saturation deviation in [0, 1]
    #[arg(long)]
    saturation: Option<f32>,

    /// Crop aspect sampling range
    #[arg(long, value_name = "MIN,MAX")]
    crop_anisotropy: Option<String>,

    /// Relative crop size range, a subset of [0, 1]
    #[arg(long, value_name = "MIN,MAX")]
    crop_size: Option<String>,

    /// Crop placement policy
    #[arg(long, value_enum, default_value_t = CropArg::Center)]
    crop_location: CropArg,

    /// Enable a 50/50 horizontal flip per image
    #[arg(long)]
    flip: bool,

    /// Batch RNG seed for reproducible augmentation
    #[arg(long)]
    seed: Option<u64>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Image files to ingest
    #[arg(required = true)]
    filenames: Vec<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum CropArg {
    Center,
    Random,
}

#[derive(Serialize)]
struct Summary {
    packed: bool,
    prefetched: bool,
    elapsed_ms: u128,
    outputs: Vec<SlotSummary>,
    warnings: Vec<String>,
}

#[derive(Serialize)]
struct SlotSummary {
    file: Option<String>,
    shape: Option<[usize; 4]>,
    device: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let config = build_config(&cli)?;
    let filenames = cli.filenames.clone();

    let mut service = IngestService::new();
    let started = Instant::now();
    let result = service.run(IngestRequest {
        config,
        prefetch_only: cli.prefetch,
        filenames: filenames.clone(),
    })?;
    let elapsed_ms = started.elapsed().as_millis();

    let outputs = if result.packed {
        result
            .outputs
            .iter()
            .map(|slot| SlotSummary {
                file: None,
                shape: slot.as_ref().map(TensorOutput::shape),
                device: matches!(slot, Some(TensorOutput::Device { .. })),
            })
            .collect()
    } else {
        filenames
            .iter()
            .zip(result.outputs.iter())
            .map(|(file, slot)| SlotSummary {
                file: Some(file.display().to_string()),
                shape: slot.as_ref().map(TensorOutput::shape),
                device: matches!(slot, Some(TensorOutput::Device { .. })),
            })
            .collect()
    };

    let summary = Summary {
        packed: result.packed,
        prefetched: result.prefetched,
        elapsed_ms,
        outputs,
        warnings: result.warnings,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn build_config(cli: &Cli) -> Result<BatchConfig> {
    let mut config = BatchConfig {
        num_threads: cli.num_threads,
        gpu: cli.gpu,
        flip: cli.flip,
        seed: cli.seed,
        crop_location: match cli.crop_location {
            CropArg::Center => CropLocation::Center,
            CropArg::Random => CropLocation::Random,
        },
        ..BatchConfig::default()
    };
    if cli.pack {
        config.packing = Packing::Packed;
    }
    if let Some(resize) = &cli.resize {
        config.resize = parser::parse_resize(resize)?;
    }
    if let Some(avg) = &cli.subtract_average {
        config.subtract_average = parser::parse_vec3("subtract_average", avg)?;
    }
    if let Some(brightness) = &cli.brightness {
        config.brightness = parser::parse_brightness(brightness)?;
    }
    if let Some(contrast) = cli.contrast {
        config.contrast = contrast;
    }
    if let Some(saturation) = cli.saturation {
        config.saturation = saturation;
    }
    if let Some(range) = &cli.crop_anisotropy {
        config.crop_anisotropy = parser::parse_range("crop_anisotropy", range)?;
    }
    if let Some(range) = &cli.crop_size {
        config.crop_size = parser::parse_range("crop_size", range)?;
    }
    Ok(config)
}

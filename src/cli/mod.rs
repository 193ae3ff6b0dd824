//! CLI subcommand definitions and handlers.
//!
//! Uses clap derive to define the subcommand hierarchy:
//! - `fetch` -- retrieve a remote image without transforming it
//! - `resize` -- retrieve and produce one resized JPEG
//! - `batch` -- retrieve and resize for several named target sizes
//! - `inspect` -- retrieve and report intrinsic metadata as JSON
//!
//! Every subcommand goes through the full SSRF-guarded pipeline; there is
//! no raw-fetch escape hatch.

use std::error::Error;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::fetch::{FetchConfig, DEFAULT_FETCH_TIMEOUT_MS};
use crate::pipeline::ImagePipeline;
use crate::resize::{FitPolicy, TargetSize};

/// SSRF-safe remote image fetch-and-resize pipeline.
#[derive(Parser, Debug)]
#[command(
    name = "imagepipe",
    version = env!("CARGO_PKG_VERSION"),
    about = "imagepipe — fetch remote images safely and resize them"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Permit loopback targets (local development only).
    #[arg(long, global = true)]
    pub allow_loopback: bool,

    /// Fetch timeout in milliseconds.
    #[arg(long, global = true, default_value_t = DEFAULT_FETCH_TIMEOUT_MS)]
    pub timeout_ms: u64,

    /// Emit JSON logs instead of plaintext.
    #[arg(long, global = true)]
    pub json_logs: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch a remote image and write the raw bytes to a file.
    Fetch {
        /// Source URL (http or https).
        url: String,

        /// Output file path.
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Fetch a remote image and write one resized JPEG.
    Resize {
        /// Source URL (http or https).
        url: String,

        /// Target width in pixels.
        #[arg(short = 'W', long)]
        width: u32,

        /// Target height in pixels.
        #[arg(short = 'H', long)]
        height: u32,

        /// Fit policy: cover, contain, fill, inside, outside
        /// (unrecognized values fall back to cover).
        #[arg(short, long, default_value = "cover")]
        fit: String,

        /// Output file path.
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Fetch a remote image, resize for each named target size, and print
    /// the batch records as JSON.
    Batch {
        /// Source URL (http or https).
        url: String,

        /// Target size spec `name=WIDTHxHEIGHT`; repeatable.
        #[arg(short, long = "size", value_parser = parse_target_size, required = true)]
        sizes: Vec<TargetSize>,

        /// Fit policy applied to every size.
        #[arg(short, long, default_value = "cover")]
        fit: String,
    },

    /// Fetch a remote image and print its intrinsic metadata as JSON.
    Inspect {
        /// Source URL (http or https).
        url: String,
    },
}

/// Parse a `name=WIDTHxHEIGHT` size spec (e.g. `leaderboard=728x90`).
fn parse_target_size(spec: &str) -> Result<TargetSize, String> {
    let (name, dims) = spec
        .split_once('=')
        .ok_or_else(|| format!("expected name=WIDTHxHEIGHT, got '{spec}'"))?;
    let (w, h) = dims
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT after '=', got '{dims}'"))?;

    let width: u32 = w.parse().map_err(|_| format!("invalid width '{w}'"))?;
    let height: u32 = h.parse().map_err(|_| format!("invalid height '{h}'"))?;

    if name.is_empty() {
        return Err("size name cannot be empty".to_string());
    }

    Ok(TargetSize {
        name: name.to_string(),
        width,
        height,
        aspect_ratio: format!("{width}:{height}"),
    })
}

/// Build the pipeline from global CLI flags.
pub fn build_pipeline(cli: &Cli) -> ImagePipeline {
    let mut config = FetchConfig::default().with_timeout_ms(cli.timeout_ms);
    if cli.allow_loopback {
        config = config.allow_loopback();
    }
    ImagePipeline::with_config(config)
}

pub async fn handle_fetch(
    pipeline: &ImagePipeline,
    url: &str,
    output: &Path,
) -> Result<(), Box<dyn Error>> {
    let result = pipeline.fetch(url).await?;
    std::fs::write(output, &result.bytes)?;
    eprintln!(
        "wrote {} bytes to {} (content-type: {})",
        result.size,
        output.display(),
        result.content_type.as_deref().unwrap_or("unknown")
    );
    Ok(())
}

pub async fn handle_resize(
    pipeline: &ImagePipeline,
    url: &str,
    width: u32,
    height: u32,
    fit: &str,
    output: &Path,
) -> Result<(), Box<dyn Error>> {
    let bytes = pipeline
        .fetch_and_resize(url, width, height, FitPolicy::parse(fit))
        .await?;
    std::fs::write(output, &bytes)?;
    eprintln!("wrote {} bytes to {}", bytes.len(), output.display());
    Ok(())
}

pub async fn handle_batch(
    pipeline: &ImagePipeline,
    url: &str,
    sizes: Vec<TargetSize>,
    fit: &str,
) -> Result<(), Box<dyn Error>> {
    let records = pipeline
        .fetch_for_sizes(url, sizes, FitPolicy::parse(fit))
        .await?;
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

pub async fn handle_inspect(pipeline: &ImagePipeline, url: &str) -> Result<(), Box<dyn Error>> {
    let meta = pipeline.inspect(url).await?;
    println!("{}", serde_json::to_string_pretty(&meta)?);
    Ok(())
}

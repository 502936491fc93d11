use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use layers::RasterLayerOptions;
use tools::{BenchConfig, init_logging, run_bench};

/// Drives a tiled raster layer over a procedural source and prints one
/// JSON line per frame.
#[derive(Debug, Parser)]
#[command(name = "tilebench")]
struct Args {
    #[arg(long, default_value_t = 4096)]
    width: u64,
    #[arg(long, default_value_t = 4096)]
    height: u64,
    #[arg(long, default_value_t = 256)]
    tile_size: u32,
    #[arg(long, default_value_t = 60)]
    frames: u32,
    /// Source stores every level natively.
    #[arg(long)]
    multi_res: bool,
    /// Attach a precise projection to the dataset.
    #[arg(long)]
    precise: bool,
    /// JSON file with layer options.
    #[arg(long)]
    options: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();

    let mut options = match &args.options {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            RasterLayerOptions::from_json_str(&json)
                .with_context(|| format!("parsing {}", path.display()))?
        }
        None => RasterLayerOptions::default(),
    };
    options.spawn_reader_worker = true;

    let config = BenchConfig {
        width: args.width,
        height: args.height,
        tile_size: args.tile_size,
        frames: args.frames,
        multi_resolution: args.multi_res,
        precise: args.precise,
        options,
        ..BenchConfig::default()
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    run_bench(&config, &mut out)?;
    out.flush()?;
    Ok(())
}

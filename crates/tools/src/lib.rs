//! Headless benchmarking for the tiled raster renderer.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use foundation::{GeoBounds, GeoPoint};
use gpu::RecordingContext;
use layers::{
    Layer, MemorySourceFactory, RasterDataset, RasterLayerOptions, TileSourceFactory,
    TiledRasterLayer,
};
use quadtree::{CornerProjection, MapView, RasterCorners, RenderGlobals, TileState};
use serde::Serialize;
use streaming::{PixelFormat, SharedTextureCache, TextureCache, num_resolution_levels};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

/// `RUST_LOG` overrides the default `info` filter.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();
}

#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub width: u64,
    pub height: u64,
    pub tile_size: u32,
    pub frames: u32,
    pub multi_resolution: bool,
    pub precise: bool,
    pub options: RasterLayerOptions,
    /// Pause between frames while the reader worker runs.
    pub frame_interval: Duration,
    pub texture_cache_bytes: usize,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            width: 4096,
            height: 4096,
            tile_size: 256,
            frames: 60,
            multi_resolution: false,
            precise: false,
            options: RasterLayerOptions::default(),
            frame_interval: Duration::from_millis(16),
            texture_cache_bytes: 64 << 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameLine {
    pub frame: u32,
    pub pump: u64,
    pub state: TileState,
    pub target_level: u32,
    pub tiles_drawn: usize,
    pub fetches_issued: usize,
    pub live_textures: usize,
}

fn corners() -> RasterCorners {
    RasterCorners {
        upper_left: GeoPoint::new(1.0, 0.0),
        upper_right: GeoPoint::new(1.0, 1.0),
        lower_right: GeoPoint::new(0.0, 1.0),
        lower_left: GeoPoint::new(0.0, 0.0),
    }
}

/// Zooms from the root level down to full resolution over the run.
fn level_for_frame(frame: u32, frames: u32, root_level: u32) -> u32 {
    let span = frames.saturating_sub(1).max(1);
    let step = (root_level as u64 * frame as u64 / span as u64) as u32;
    root_level.saturating_sub(step)
}

/// Runs the frame loop, writing one JSON line per frame to `out`.
pub fn run_bench(config: &BenchConfig, out: &mut dyn Write) -> anyhow::Result<Vec<FrameLine>> {
    let dataset = RasterDataset::new(
        "tilebench",
        "mem://tilebench",
        config.width,
        config.height,
        corners(),
    );
    let dataset = if config.precise {
        dataset.with_precise()
    } else {
        dataset
    };

    let mut factory =
        MemorySourceFactory::new(config.tile_size, PixelFormat::Rgba, config.multi_resolution);
    if config.precise {
        // stand-in sensor model a fraction of a pixel off the corner fit
        let mut nudged = corners();
        nudged.upper_right.lon += 1e-7;
        nudged.lower_left.lat -= 1e-7;
        let precise = CornerProjection::new(config.width, config.height, nudged)?;
        factory = factory.with_precise_projection(Arc::new(precise));
    }

    let cache: SharedTextureCache<gpu::TextureId> = TextureCache::shared(config.texture_cache_bytes);
    let globals = RenderGlobals::new().with_texture_cache(cache);
    let mut layer = TiledRasterLayer::new(
        1,
        dataset.clone(),
        Arc::new(factory) as Arc<dyn TileSourceFactory>,
        config.options.clone(),
        globals,
    );

    let root_level = num_resolution_levels(
        config.width,
        config.height,
        config.tile_size as u64,
        config.tile_size as u64,
    )
    .saturating_sub(1);
    info!(
        "tilebench: {}x{} tile={} root_level={root_level} frames={} worker={}",
        config.width,
        config.height,
        config.tile_size,
        config.frames,
        config.options.spawn_reader_worker
    );

    let mut gfx = RecordingContext::new();
    let mut view = MapView::new(GeoBounds::new(-0.25, -0.25, 1.25, 1.25), dataset.gsd_m);
    let mut lines = Vec::with_capacity(config.frames as usize);
    for frame in 0..config.frames {
        let level = level_for_frame(frame, config.frames, root_level);
        view.draw_resolution = dataset.gsd_m * f64::from(1u32 << level.min(31));
        gfx.clear_commands();

        let report = layer.draw(&view, &mut gfx);
        if let Some(tree) = layer.quadtree() {
            if config.options.spawn_reader_worker {
                std::thread::sleep(config.frame_interval);
            } else {
                tree.reader().run_pending();
            }
        }

        let line = FrameLine {
            frame,
            pump: view.pump.index,
            state: report.map_or(TileState::Unresolvable, |r| r.state),
            target_level: level,
            tiles_drawn: report.map_or(0, |r| r.tiles_drawn),
            fetches_issued: report.map_or(0, |r| r.fetches_issued),
            live_textures: gfx.live_textures(),
        };
        serde_json::to_writer(&mut *out, &line)?;
        writeln!(out)?;
        lines.push(line);
        view.advance();
    }

    layer.release(&mut gfx);
    info!("tilebench done: live_textures={}", gfx.live_textures());
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::{BenchConfig, level_for_frame, run_bench};
    use pretty_assertions::assert_eq;

    #[test]
    fn zoom_reaches_full_resolution_on_the_last_frame() {
        let levels: Vec<u32> = (0..5).map(|f| level_for_frame(f, 5, 4)).collect();
        assert_eq!(levels, vec![4, 3, 2, 1, 0]);
        assert_eq!(level_for_frame(0, 1, 3), 3);
    }

    #[test]
    fn bench_writes_one_line_per_frame() {
        let config = BenchConfig {
            width: 512,
            height: 512,
            tile_size: 256,
            frames: 4,
            ..BenchConfig::default()
        };
        let mut out = Vec::new();
        let lines = run_bench(&config, &mut out).unwrap();
        assert_eq!(lines.len(), 4);

        let text = String::from_utf8(out).unwrap();
        let parsed: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(parsed.len(), 4);
        assert_eq!(parsed[0]["frame"], 0);
        assert!(parsed[0].get("live_textures").is_some());

        assert!(lines[0].fetches_issued > 0);
        assert!(lines.iter().any(|l| l.tiles_drawn > 0));
        assert!(lines.windows(2).all(|w| w[1].pump > w[0].pump));
    }
}

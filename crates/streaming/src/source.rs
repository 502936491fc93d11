use std::sync::Arc;

use foundation::Aabb2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::request::TileIndex;

/// Pixel layout of tile data, 8 bits per channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Mono,
    MonoAlpha,
    Rgb,
    Rgba,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Mono => 1,
            PixelFormat::MonoAlpha => 2,
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba => 4,
        }
    }
}

/// A block of pixels for part or all of one tile.
///
/// `dst_x`/`dst_y` are relative to the tile origin at the tile's level.
#[derive(Debug, Clone, PartialEq)]
pub struct TileUpdate {
    pub dst_x: u32,
    pub dst_y: u32,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub pixels: Vec<u8>,
}

impl TileUpdate {
    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("tile out of range: {0}")]
    OutOfRange(TileIndex),
    #[error("i/o error: {0}")]
    Io(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("read canceled")]
    Canceled,
    #[error("invalid source geometry: {0}")]
    InvalidGeometry(String),
}

/// Cache/offline controls exposed by remote tile sources.
pub trait TileClientControl: Send + Sync {
    fn set_offline_only(&self, offline: bool);
    fn is_offline_only(&self) -> bool;
    /// Drops cached tiles so the next reads go back to the server; sources
    /// report refreshed tiles through a bumped `tile_version`.
    fn refresh_cache(&self);
    fn set_cache_auto_refresh_interval(&self, millis: u64);
    fn cache_auto_refresh_interval(&self) -> u64;
}

/// A tiled raster.
///
/// `read` is called on an I/O thread; updates handed to `sink` may cover the
/// tile in several parts and are delivered in order.
pub trait TileSource: Send + Sync {
    fn uri(&self) -> &str;
    /// Full-resolution width in pixels.
    fn width(&self) -> u64;
    /// Full-resolution height in pixels.
    fn height(&self) -> u64;
    /// Nominal tile width in pixels.
    fn tile_width(&self) -> u32;
    /// Nominal tile height in pixels.
    fn tile_height(&self) -> u32;
    fn format(&self) -> PixelFormat;
    /// Whether every level is stored natively (true) or coarser levels are
    /// subsampled from full resolution on demand (false).
    fn is_multi_resolution(&self) -> bool;

    fn tile_version(&self, _tile: TileIndex) -> i64 {
        0
    }

    fn read(&self, tile: TileIndex, sink: &mut dyn FnMut(TileUpdate)) -> Result<(), SourceError>;

    fn client_control(&self) -> Option<Arc<dyn TileClientControl>> {
        None
    }
}

/// Pyramid geometry derived from the `TileSource` dimensions.
pub trait TileGeometry {
    fn level_width(&self, level: u32) -> u64;
    fn level_height(&self, level: u32) -> u64;
    fn tile_width_at(&self, level: u32, col: u64) -> u32;
    fn tile_height_at(&self, level: u32, row: u64) -> u32;
    fn num_tiles_x(&self, level: u32) -> u64;
    fn num_tiles_y(&self, level: u32) -> u64;
    fn tile_source_x(&self, level: u32, col: u64) -> u64;
    fn tile_source_y(&self, level: u32, row: u64) -> u64;
    fn tile_source_width(&self, level: u32, col: u64) -> u64;
    fn tile_source_height(&self, level: u32, row: u64) -> u64;
    fn max_num_resolution_levels(&self) -> u32;

    fn contains_tile(&self, tile: TileIndex) -> bool {
        tile.col < self.num_tiles_x(tile.level) && tile.row < self.num_tiles_y(tile.level)
    }

    /// Tile extent in full-resolution pixels.
    fn tile_source_bounds(&self, tile: TileIndex) -> Aabb2 {
        Aabb2::from_origin_size(
            self.tile_source_x(tile.level, tile.col) as f64,
            self.tile_source_y(tile.level, tile.row) as f64,
            self.tile_source_width(tile.level, tile.col) as f64,
            self.tile_source_height(tile.level, tile.row) as f64,
        )
    }
}

fn clipped_extent(nominal: u64, index: u64, extent: u64) -> u64 {
    if nominal * (index + 1) > extent {
        extent.saturating_sub(nominal * index)
    } else {
        nominal
    }
}

impl<S: TileSource + ?Sized> TileGeometry for S {
    fn level_width(&self, level: u32) -> u64 {
        (self.width() >> level.min(63)).max(1)
    }

    fn level_height(&self, level: u32) -> u64 {
        (self.height() >> level.min(63)).max(1)
    }

    fn tile_width_at(&self, level: u32, col: u64) -> u32 {
        let tw = self.tile_width() as u64;
        clipped_extent(tw, col, self.level_width(level)) as u32
    }

    fn tile_height_at(&self, level: u32, row: u64) -> u32 {
        let th = self.tile_height() as u64;
        clipped_extent(th, row, self.level_height(level)) as u32
    }

    fn num_tiles_x(&self, level: u32) -> u64 {
        self.level_width(level).div_ceil(self.tile_width().max(1) as u64)
    }

    fn num_tiles_y(&self, level: u32) -> u64 {
        self.level_height(level).div_ceil(self.tile_height().max(1) as u64)
    }

    fn tile_source_x(&self, level: u32, col: u64) -> u64 {
        col * ((self.tile_width() as u64) << level)
    }

    fn tile_source_y(&self, level: u32, row: u64) -> u64 {
        row * ((self.tile_height() as u64) << level)
    }

    fn tile_source_width(&self, level: u32, col: u64) -> u64 {
        let span = (self.tile_width() as u64) << level;
        clipped_extent(span, col, self.width())
    }

    fn tile_source_height(&self, level: u32, row: u64) -> u64 {
        let span = (self.tile_height() as u64) << level;
        clipped_extent(span, row, self.height())
    }

    fn max_num_resolution_levels(&self) -> u32 {
        num_resolution_levels(
            self.width(),
            self.height(),
            self.tile_width() as u64,
            self.tile_height() as u64,
        )
    }
}

/// Number of levels until the whole raster fits in one tile (at least 1).
pub fn num_resolution_levels(width: u64, height: u64, tile_width: u64, tile_height: u64) -> u32 {
    let tile_width = tile_width.max(1);
    let tile_height = tile_height.max(1);
    let (mut w, mut h) = (width.max(1), height.max(1));
    let mut levels = 1;
    while w.div_ceil(tile_width) > 1 || h.div_ceil(tile_height) > 1 {
        w = (w >> 1).max(1);
        h = (h >> 1).max(1);
        levels += 1;
    }
    levels
}

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::request::TileIndex;
use crate::source::{
    PixelFormat, SourceError, TileClientControl, TileGeometry, TileSource, TileUpdate,
};

/// Client control for [`MemoryTileSource`]; a cache refresh bumps every
/// tile's version.
#[derive(Debug, Default)]
pub struct MemoryClientControl {
    offline: AtomicBool,
    auto_refresh_ms: AtomicU64,
    refreshes: AtomicI64,
}

impl MemoryClientControl {
    pub fn refreshes(&self) -> i64 {
        self.refreshes.load(Ordering::Acquire)
    }
}

impl TileClientControl for MemoryClientControl {
    fn set_offline_only(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    fn is_offline_only(&self) -> bool {
        self.offline.load(Ordering::Acquire)
    }

    fn refresh_cache(&self) {
        self.refreshes.fetch_add(1, Ordering::AcqRel);
    }

    fn set_cache_auto_refresh_interval(&self, millis: u64) {
        self.auto_refresh_ms.store(millis, Ordering::Release);
    }

    fn cache_auto_refresh_interval(&self) -> u64 {
        self.auto_refresh_ms.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    versions: BTreeMap<TileIndex, i64>,
    failing: BTreeSet<TileIndex>,
    reads: Vec<TileIndex>,
    rows_per_update: Option<u32>,
}

/// Procedural in-memory tile source.
///
/// Pixels are a checkerboard tinted per level, so every tile is cheap to
/// produce and distinguishable. Tiles can be made to fail, versions can be
/// bumped, and every read is logged.
#[derive(Debug)]
pub struct MemoryTileSource {
    uri: String,
    width: u64,
    height: u64,
    tile_size: u32,
    format: PixelFormat,
    multi_resolution: bool,
    state: Mutex<MemoryState>,
    control: Option<Arc<MemoryClientControl>>,
}

impl MemoryTileSource {
    pub fn new(
        uri: impl Into<String>,
        width: u64,
        height: u64,
        tile_size: u32,
        format: PixelFormat,
        multi_resolution: bool,
    ) -> Self {
        Self {
            uri: uri.into(),
            width,
            height,
            tile_size,
            format,
            multi_resolution,
            state: Mutex::new(MemoryState::default()),
            control: None,
        }
    }

    /// Behaves like a remote source and exposes a client control.
    pub fn remote(mut self) -> Self {
        self.control = Some(Arc::new(MemoryClientControl::default()));
        self
    }

    pub fn memory_control(&self) -> Option<&Arc<MemoryClientControl>> {
        self.control.as_ref()
    }

    /// Deliver tiles in bands of `rows` rows instead of one update.
    pub fn set_rows_per_update(&self, rows: Option<u32>) {
        self.state.lock().rows_per_update = rows.filter(|r| *r > 0);
    }

    pub fn set_tile_version(&self, tile: TileIndex, version: i64) {
        self.state.lock().versions.insert(tile, version);
    }

    pub fn fail_tile(&self, tile: TileIndex) {
        self.state.lock().failing.insert(tile);
    }

    pub fn clear_failures(&self) {
        self.state.lock().failing.clear();
    }

    /// Every tile read so far, in service order.
    pub fn reads(&self) -> Vec<TileIndex> {
        self.state.lock().reads.clone()
    }

    pub fn read_count(&self, tile: TileIndex) -> usize {
        self.state.lock().reads.iter().filter(|t| **t == tile).count()
    }

    fn pixel(&self, tile: TileIndex, x: u32, y: u32) -> [u8; 4] {
        let on = ((x / 16) + (y / 16)) % 2 == 0;
        let shade = (tile.level as u8).wrapping_mul(40);
        let base = if on { 230u8 } else { 40u8 };
        [
            base.wrapping_sub(shade),
            base,
            base.wrapping_add((tile.col % 7) as u8 * 8),
            255,
        ]
    }

    fn encode(&self, rgba: [u8; 4], out: &mut Vec<u8>) {
        match self.format {
            PixelFormat::Mono => out.push(rgba[0]),
            PixelFormat::MonoAlpha => out.extend_from_slice(&[rgba[0], rgba[3]]),
            PixelFormat::Rgb => out.extend_from_slice(&rgba[..3]),
            PixelFormat::Rgba => out.extend_from_slice(&rgba),
        }
    }
}

impl TileSource for MemoryTileSource {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn width(&self) -> u64 {
        self.width
    }

    fn height(&self) -> u64 {
        self.height
    }

    fn tile_width(&self) -> u32 {
        self.tile_size
    }

    fn tile_height(&self) -> u32 {
        self.tile_size
    }

    fn format(&self) -> PixelFormat {
        self.format
    }

    fn is_multi_resolution(&self) -> bool {
        self.multi_resolution
    }

    fn tile_version(&self, tile: TileIndex) -> i64 {
        let base = self.state.lock().versions.get(&tile).copied().unwrap_or(0);
        base + self.control.as_ref().map(|c| c.refreshes()).unwrap_or(0)
    }

    fn read(&self, tile: TileIndex, sink: &mut dyn FnMut(TileUpdate)) -> Result<(), SourceError> {
        let rows_per_update = {
            let mut state = self.state.lock();
            state.reads.push(tile);
            if state.failing.contains(&tile) {
                return Err(SourceError::Io(format!("simulated failure for {tile}")));
            }
            state.rows_per_update
        };
        if !self.contains_tile(tile) {
            return Err(SourceError::OutOfRange(tile));
        }

        let width = self.tile_width_at(tile.level, tile.col);
        let height = self.tile_height_at(tile.level, tile.row);
        let band = rows_per_update.unwrap_or(height).max(1);
        let mut y0 = 0;
        while y0 < height {
            let rows = band.min(height - y0);
            let mut pixels = Vec::with_capacity(
                width as usize * rows as usize * self.format.bytes_per_pixel(),
            );
            for y in y0..y0 + rows {
                for x in 0..width {
                    self.encode(self.pixel(tile, x, y), &mut pixels);
                }
            }
            sink(TileUpdate {
                dst_x: 0,
                dst_y: y0,
                width,
                height: rows,
                format: self.format,
                pixels,
            });
            y0 += rows;
        }
        Ok(())
    }

    fn client_control(&self) -> Option<Arc<dyn TileClientControl>> {
        self.control
            .as_ref()
            .map(|c| Arc::clone(c) as Arc<dyn TileClientControl>)
    }
}

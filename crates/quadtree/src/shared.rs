use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use gpu::{
    BufferId, Filter, GraphicsContext, TextureDesc, TextureFormat, TextureId, TextureRegion,
};
use parking_lot::Mutex;
use runtime::{RenderPump, RenderSender};
use streaming::{AsyncReader, FocusPrioritizer, SharedTextureCache, TileIndex, TileSource};
use tracing::warn;

use crate::events::TreeEvent;
use crate::grid::SharedGrids;
use crate::options::QuadtreeOptions;
use crate::projection::ProjectionPair;
use crate::resolver::VertexResolver;

const LOADING_TEXTURE_SIZE: u32 = 64;
const LOADING_SQUARE: u32 = 16;

/// 64x64 RGBA checkerboard of 16 pixel gray squares.
fn loading_pixels() -> Vec<u8> {
    let size = LOADING_TEXTURE_SIZE;
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for row in 0..size {
        for col in 0..size {
            let dark = ((col % (2 * LOADING_SQUARE) + row % (2 * LOADING_SQUARE)) / LOADING_SQUARE)
                % 2
                == 0;
            let v = if dark { 0x7F } else { 0xAA };
            pixels.extend_from_slice(&[v, v, v, 0xFF]);
        }
    }
    pixels
}

/// Process-scoped render state shared by every tree built from it.
///
/// Cloning shares the same flag, cache, and loading texture.
#[derive(Clone, Default)]
pub struct RenderGlobals {
    offscreen_unsupported: Arc<AtomicBool>,
    texture_cache: Option<SharedTextureCache<TextureId>>,
    loading_texture: Arc<Mutex<Option<TextureId>>>,
}

impl RenderGlobals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_texture_cache(mut self, cache: SharedTextureCache<TextureId>) -> Self {
        self.texture_cache = Some(cache);
        self
    }

    /// Same off-screen flag, no texture cache.
    pub fn without_texture_cache(&self) -> Self {
        Self {
            offscreen_unsupported: Arc::clone(&self.offscreen_unsupported),
            texture_cache: None,
            loading_texture: Arc::clone(&self.loading_texture),
        }
    }

    pub fn texture_cache(&self) -> Option<&SharedTextureCache<TextureId>> {
        self.texture_cache.as_ref()
    }

    pub fn offscreen_supported(&self) -> bool {
        !self.offscreen_unsupported.load(Ordering::Acquire)
    }

    /// Returns true for the first caller only.
    pub(crate) fn mark_offscreen_unsupported(&self) -> bool {
        !self.offscreen_unsupported.swap(true, Ordering::AcqRel)
    }

    /// Placeholder for tiles with nothing to borrow, created on first use
    /// and again after `gfx` lost it.
    pub(crate) fn loading_texture(&self, gfx: &mut dyn GraphicsContext) -> Option<TextureId> {
        let mut slot = self.loading_texture.lock();
        if let Some(id) = *slot
            && gfx.texture_desc(id).is_some()
        {
            return Some(id);
        }
        let size = LOADING_TEXTURE_SIZE;
        let id = gfx.create_texture(TextureDesc::new(size, size, TextureFormat::Rgba));
        let region = TextureRegion {
            x: 0,
            y: 0,
            width: size,
            height: size,
        };
        if let Err(err) = gfx.upload_texture(id, region, TextureFormat::Rgba, &loading_pixels()) {
            warn!("loading texture upload failed: {err}");
            gfx.delete_texture(id);
            *slot = None;
            return None;
        }
        *slot = Some(id);
        Some(id)
    }

    /// Deletes the shared loading texture; the next tree to need it
    /// creates a new one.
    pub fn release(&self, gfx: &mut dyn GraphicsContext) {
        if let Some(id) = self.loading_texture.lock().take() {
            gfx.delete_texture(id);
        }
    }
}

impl std::fmt::Debug for RenderGlobals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderGlobals")
            .field("offscreen_supported", &self.offscreen_supported())
            .field("texture_cache", &self.texture_cache.is_some())
            .field("loading_texture", &*self.loading_texture.lock())
            .finish()
    }
}

/// Last bindings issued this pump, to skip redundant state changes.
#[derive(Debug, Default)]
pub(crate) struct RenderState {
    texture: Option<TextureId>,
    tex_coords: Option<BufferId>,
    vertices: Option<BufferId>,
    indices: Option<Option<BufferId>>,
    color: Option<[f32; 4]>,
}

impl RenderState {
    pub(crate) fn reset(&mut self) {
        *self = RenderState::default();
    }

    pub(crate) fn bind_texture(&mut self, gfx: &mut dyn GraphicsContext, id: TextureId) {
        if self.texture != Some(id) {
            gfx.bind_texture(id);
            self.texture = Some(id);
        }
    }

    pub(crate) fn bind_tex_coords(&mut self, gfx: &mut dyn GraphicsContext, id: BufferId) {
        if self.tex_coords != Some(id) {
            gfx.bind_tex_coords(id);
            self.tex_coords = Some(id);
        }
    }

    pub(crate) fn bind_vertices(&mut self, gfx: &mut dyn GraphicsContext, id: BufferId) {
        if self.vertices != Some(id) {
            gfx.bind_vertices(id);
            self.vertices = Some(id);
        }
    }

    pub(crate) fn bind_indices(&mut self, gfx: &mut dyn GraphicsContext, id: Option<BufferId>) {
        if self.indices != Some(id) {
            gfx.bind_indices(id);
            self.indices = Some(id);
        }
    }

    pub(crate) fn set_color(&mut self, gfx: &mut dyn GraphicsContext, rgba: [f32; 4]) {
        if self.color != Some(rgba) {
            gfx.set_color(rgba);
            self.color = Some(rgba);
        }
    }

    /// Forgets a deleted buffer so a recycled id is bound again.
    pub(crate) fn forget_buffer(&mut self, id: BufferId) {
        if self.tex_coords == Some(id) {
            self.tex_coords = None;
        }
        if self.vertices == Some(id) {
            self.vertices = None;
        }
        if self.indices == Some(Some(id)) {
            self.indices = None;
        }
    }

    pub(crate) fn forget_texture(&mut self, id: TextureId) {
        if self.texture == Some(id) {
            self.texture = None;
        }
    }
}

/// Per-pump counters reported back to the host.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct FrameStats {
    pub(crate) tiles_drawn: usize,
    pub(crate) fetches_issued: usize,
    pub(crate) refresh_requested: bool,
}

/// State shared by every node of one tree.
pub(crate) struct NodeCore {
    pub(crate) uri: String,
    pub(crate) source: Arc<dyn TileSource>,
    pub(crate) reader: Arc<AsyncReader>,
    pub(crate) prioritizer: Arc<FocusPrioritizer>,
    pub(crate) projection: Arc<ProjectionPair>,
    pub(crate) resolver: Box<dyn VertexResolver>,
    pub(crate) options: QuadtreeOptions,
    pub(crate) globals: RenderGlobals,
    pub(crate) grids: SharedGrids,
    pub(crate) events: RenderSender<TreeEvent>,
    pub(crate) render_state: RenderState,
    pub(crate) multi_resolution: bool,
    pub(crate) root_level: u32,
    pub(crate) draw_pump_level: u32,
    pub(crate) mag_filter: Filter,
    pub(crate) color: [f32; 4],
    pub(crate) pump: RenderPump,
    pub(crate) updated_tiles: BTreeSet<TileIndex>,
    pub(crate) frame: FrameStats,
}

impl NodeCore {
    /// Process cache, when this tree may return textures to it.
    pub(crate) fn texture_cache(&self) -> Option<&SharedTextureCache<TextureId>> {
        if self.multi_resolution {
            return None;
        }
        self.globals.texture_cache()
    }

    pub(crate) fn cache_key(&self, tile: TileIndex) -> String {
        format!("{}&x={}&y={}&z={}", self.uri, tile.col, tile.row, tile.level)
    }

    pub(crate) fn compositing_enabled(&self) -> bool {
        self.multi_resolution
            && self.options.texture_copy_enabled
            && self.globals.offscreen_supported()
    }

    pub(crate) fn needs_refresh(&self, tile: TileIndex, tile_version: i64) -> bool {
        tile_version != self.source.tile_version(tile) || self.updated_tiles.contains(&tile)
    }

    pub(crate) fn delete_buffer(&mut self, gfx: &mut dyn GraphicsContext, id: BufferId) {
        self.render_state.forget_buffer(id);
        gfx.delete_buffer(id);
    }

    pub(crate) fn delete_texture(&mut self, gfx: &mut dyn GraphicsContext, id: TextureId) {
        self.render_state.forget_texture(id);
        gfx.delete_texture(id);
    }
}

#[cfg(test)]
mod tests {
    use super::{RenderGlobals, RenderState};
    use gpu::{GraphicsContext, RecordingContext, RenderCommand, TextureDesc, TextureFormat};
    use pretty_assertions::assert_eq;

    #[test]
    fn offscreen_failure_is_reported_once_and_shared() {
        let globals = RenderGlobals::new();
        let other = globals.clone();
        assert!(globals.offscreen_supported());
        assert!(globals.mark_offscreen_unsupported());
        assert!(!other.mark_offscreen_unsupported());
        assert!(!other.offscreen_supported());
    }

    #[test]
    fn redundant_binds_are_skipped() {
        let mut gfx = RecordingContext::new();
        let tex = gfx.create_texture(TextureDesc::new(4, 4, TextureFormat::Rgba));
        gfx.clear_commands();

        let mut state = RenderState::default();
        state.bind_texture(&mut gfx, tex);
        state.bind_texture(&mut gfx, tex);
        state.set_color(&mut gfx, [1.0; 4]);
        state.set_color(&mut gfx, [1.0; 4]);
        assert_eq!(
            gfx.commands(),
            &[RenderCommand::BindTexture(tex), RenderCommand::SetColor([1.0; 4])]
        );

        state.forget_texture(tex);
        state.bind_texture(&mut gfx, tex);
        assert_eq!(gfx.commands().len(), 3);
    }

    #[test]
    fn loading_texture_is_shared_and_recreated_after_release() {
        let mut gfx = RecordingContext::new();
        let globals = RenderGlobals::new();
        let other = globals.without_texture_cache();
        let tex = globals.loading_texture(&mut gfx).unwrap();
        assert_eq!(other.loading_texture(&mut gfx), Some(tex));
        assert_eq!(gfx.texel(tex, 0, 0), Some([0x7F, 0x7F, 0x7F, 0xFF]));
        assert_eq!(gfx.texel(tex, 16, 0), Some([0xAA, 0xAA, 0xAA, 0xFF]));
        assert_eq!(gfx.texel(tex, 16, 16), Some([0x7F, 0x7F, 0x7F, 0xFF]));

        globals.release(&mut gfx);
        assert!(!gfx.has_texture(tex));
        let again = other.loading_texture(&mut gfx).unwrap();
        assert_ne!(again, tex);
        assert_eq!(gfx.live_textures(), 1);
    }
}

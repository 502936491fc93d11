use std::sync::Arc;

use gpu::{
    BufferKind, GraphicsContext, Ortho, QuadRect, TexCoord, TextureDesc, TextureFormat, TextureId,
    as_bytes, quad_mesh_tex_coords,
};
use streaming::{CacheEntry, CacheOpaque, HINT_RESOLVED, PixelFormat, TileGeometry};
use tracing::{debug, warn};

use crate::events::NodeListener;
use crate::node::{NodeId, TileNode};
use crate::shared::NodeCore;
use crate::state::TileState;
use crate::tree::Quadtree;

pub(crate) fn source_texture_format(format: PixelFormat) -> TextureFormat {
    match format {
        PixelFormat::Mono => TextureFormat::Luminance,
        PixelFormat::MonoAlpha => TextureFormat::LuminanceAlpha,
        PixelFormat::Rgb => TextureFormat::Rgb,
        PixelFormat::Rgba => TextureFormat::Rgba,
    }
}

/// Makes sure `node` owns a texture matching its tile size and format.
pub(crate) fn validate_texture(
    core: &mut NodeCore,
    node: &mut TileNode,
    gfx: &mut dyn GraphicsContext,
) -> TextureId {
    let desc = TextureDesc::new(
        node.tile_width.max(1),
        node.tile_height.max(1),
        node.texture_format,
    );
    if let Some(tex) = node.texture {
        if gfx.texture_desc(tex) == Some(desc) {
            return tex;
        }
        core.delete_texture(gfx, tex);
    }
    let tex = gfx.create_texture(desc);
    node.texture = Some(tex);
    node.filter = None;
    tex
}

impl Quadtree {
    /// Finds texture data for a node: a cached texture, a composite of its
    /// children, or (when `fetch` is set) a read from the source.
    pub(crate) fn resolve_texture(
        &mut self,
        id: NodeId,
        gfx: &mut dyn GraphicsContext,
        fetch: bool,
    ) {
        if self.restore_cached(id, gfx) {
            return;
        }
        let Some(state) = self.nodes.get(id.0).map(|n| n.state) else {
            return;
        };
        if state != TileState::Resolved && self.core.compositing_enabled() {
            self.composite_from_children(id, gfx);
        } else if state == TileState::Resolved {
            // refresh requested
            if let Some(node) = self.nodes.get_mut(id.0) {
                node.state = TileState::Unresolved;
            }
        }
        let unresolved = self
            .nodes
            .get(id.0)
            .is_some_and(|n| n.state == TileState::Unresolved);
        if unresolved && fetch {
            self.fetch(id);
        }
    }

    /// Returns true when the node came back resolved from the texture cache.
    fn restore_cached(&mut self, id: NodeId, gfx: &mut dyn GraphicsContext) -> bool {
        let Some(cache) = self.core.texture_cache().cloned() else {
            return false;
        };
        let Some(node) = self.nodes.get_mut(id.0) else {
            return false;
        };
        let key = self.core.cache_key(node.tile);
        let Some(entry) = cache.lock().remove(&key) else {
            return false;
        };
        let resolved = entry.is_resolved();
        let Some(tex) = entry.texture else {
            return false;
        };
        if let Some(old) = node.texture.replace(tex) {
            self.core.delete_texture(gfx, old);
        }
        node.state = if resolved {
            TileState::Resolved
        } else {
            TileState::Unresolved
        };
        if let CacheOpaque::Version(version) = entry.opaque {
            node.tile_version = version;
        }
        node.received_update = true;
        node.filter = None;
        node.tex_coords_valid = false;
        debug!("restored cached texture for {key} resolved={resolved}");
        resolved
    }

    pub(crate) fn fetch(&mut self, id: NodeId) {
        let Some(tile) = self.nodes.get(id.0).map(|n| n.tile) else {
            return;
        };
        let listener = Arc::new(NodeListener::new(id, self.core.events.clone()));
        let request = self.core.reader.async_read(tile, listener);
        if let Some(node) = self.nodes.get_mut(id.0) {
            node.state = TileState::Resolving;
            node.read_start_s = self.core.pump.time_s;
            if let Some(previous) = node.current_request.replace(request) {
                previous.cancel();
            }
            self.core.frame.fetches_issued += 1;
        }
    }

    /// Renders the children's textures into this node's texture.
    fn composite_from_children(&mut self, id: NodeId, gfx: &mut dyn GraphicsContext) {
        let Quadtree { core, nodes, .. } = self;
        let Some(node) = nodes.get(id.0) else {
            return;
        };

        let mut num_children = 0;
        let mut will_be_resolved = true;
        let mut sources = Vec::new();
        for i in 0..4 {
            let Some(child_tile) = node.child_tile(i) else {
                continue;
            };
            if !core.source.contains_tile(child_tile) {
                continue;
            }
            num_children += 1;
            let child = node.children[i].and_then(|c| nodes.get(c.0));
            will_be_resolved &= child.is_some_and(|c| c.state == TileState::Resolved);
            if let Some((child, tex)) = child
                .filter(|c| c.has_data())
                .and_then(|c| c.texture.map(|t| (c, t)))
            {
                sources.push((i as u32, tex, child.state == TileState::Resolved));
            }
        }
        if sources.is_empty() {
            return;
        }

        let half_width = core.source.tile_width() / 2;
        let half_height = core.source.tile_height() / 2;
        let Some(node) = nodes.get_mut(id.0) else {
            return;
        };
        let (tile_width, tile_height) = (node.tile_width, node.tile_height);
        node.texture_format = TextureFormat::Rgba;
        let target = validate_texture(core, node, gfx);

        let mut parts = 0;
        let projection = Ortho::new(0.0, tile_width as f32, 0.0, tile_height as f32);
        match gfx.begin_offscreen(target, projection) {
            Ok(()) => {
                for (i, tex, resolved) in sources {
                    let (tx, ty) = (i % 2, i / 2);
                    let x = tx * half_width;
                    let y = ty * half_height;
                    let width = ((tx + 1) * half_width).min(tile_width).saturating_sub(x);
                    let height = ((ty + 1) * half_height).min(tile_height).saturating_sub(y);
                    gfx.draw_offscreen_quad(
                        tex,
                        QuadRect::new(x as f32, y as f32, (x + width) as f32, (y + height) as f32),
                        QuadRect::new(0.0, 0.0, 1.0, 1.0),
                    );
                    if resolved {
                        parts += 1;
                    }
                }
                gfx.end_offscreen();
                core.render_state.reset();
                node.received_update = true;
                node.tex_coords_valid = false;
                node.composite_nearest = !will_be_resolved;
            }
            Err(err) => {
                if core.globals.mark_offscreen_unsupported() {
                    warn!("off-screen rendering unavailable, texture compositing disabled: {err}");
                }
            }
        }

        let was_unresolvable = node.state == TileState::Unresolvable;
        if parts == num_children {
            if core.options.child_texture_copy_resolves_parent {
                node.state = TileState::Resolved;
            } else if node.state != TileState::Unresolvable {
                node.state = TileState::Unresolved;
            }
        } else if node.state != TileState::Suspended {
            node.state = TileState::Unresolved;
        }
        if was_unresolvable {
            node.derived_unresolvable_data |= parts > 0;
        }
    }

    /// Returns the node's texture to the process cache when eligible and
    /// frees its mesh.
    pub(crate) fn release_texture(&mut self, id: NodeId, gfx: &mut dyn GraphicsContext) {
        let cache = self.core.texture_cache().cloned();
        let Quadtree { core, nodes, .. } = self;
        let Some(node) = nodes.get_mut(id.0) else {
            return;
        };

        if let Some(tex) = node.texture.take() {
            match (&cache, gfx.texture_desc(tex)) {
                (Some(cache), Some(desc)) => {
                    let key = core.cache_key(node.tile);
                    let hints = if node.state == TileState::Resolved {
                        HINT_RESOLVED
                    } else {
                        0
                    };
                    let entry = CacheEntry::texture(
                        tex,
                        desc.byte_len(),
                        hints,
                        CacheOpaque::Version(node.tile_version),
                    );
                    core.render_state.forget_texture(tex);
                    let put = cache.lock().put(key, entry);
                    match put {
                        Ok(evicted) => {
                            for evicted in evicted.into_iter().filter_map(|(_, e)| e.texture) {
                                core.delete_texture(gfx, evicted);
                            }
                        }
                        Err(err) => {
                            debug!("texture for {} not cached: {err}", node.tile);
                            core.delete_texture(gfx, tex);
                        }
                    }
                }
                _ => core.delete_texture(gfx, tex),
            }
            node.touched = false;
        }

        if let Some(buffer) = node.tex_coords.take() {
            if !node.tex_coords_shared {
                core.delete_buffer(gfx, buffer);
            }
        }
        node.tex_coords_shared = false;
        if let Some(buffer) = node.indices.take() {
            if !node.indices_shared {
                core.delete_buffer(gfx, buffer);
            }
        }
        node.indices_shared = false;
        if let Some(buffer) = node.vertex_buffer.take() {
            core.delete_buffer(gfx, buffer);
        }
        if let Some(buffer) = node.borrow_tex_coords.take() {
            core.delete_buffer(gfx, buffer);
        }
        node.borrowing_from = None;
        node.tex_coords_valid = false;
        node.vertices_valid = false;
        node.filter = None;
        node.composite_nearest = false;

        if node.state != TileState::Unresolvable {
            node.state = TileState::Unresolved;
        }
        node.received_update = false;
        node.derived_unresolvable_data = false;
    }

    /// Nearest ancestor texture to draw in place of the node's own. An
    /// ancestor whose texture sits in the process cache is restored from it.
    pub(crate) fn try_borrow(
        &mut self,
        id: NodeId,
        gfx: &mut dyn GraphicsContext,
    ) -> Option<TextureId> {
        let cache = self.core.texture_cache().cloned();
        let node = self.nodes.get(id.0)?;
        let current = node.borrowing_from;
        let mut cursor = node.parent;
        let mut updated = None;
        while cursor != current {
            let Some(ancestor_id) = cursor else {
                break;
            };
            let Some(ancestor) = self.nodes.get(ancestor_id.0) else {
                cursor = None;
                break;
            };
            if ancestor.state == TileState::Resolved && ancestor.texture.is_some() {
                break;
            }
            if ancestor.texture.is_none()
                && let Some(cache) = &cache
            {
                let key = self.core.cache_key(ancestor.tile);
                let mut cache = cache.lock();
                match cache.get(&key).filter(|e| e.texture.is_some()) {
                    Some(entry) if entry.is_resolved() => break,
                    Some(_) if updated.is_none() => updated = Some(ancestor_id),
                    _ => {}
                }
            }
            if ancestor.received_update && ancestor.texture.is_some() && updated.is_none() {
                updated = Some(ancestor_id);
            }
            cursor = ancestor.parent;
        }
        let Some(from) = cursor.or(updated) else {
            if let Some(node) = self.nodes.get_mut(id.0) {
                node.borrowing_from = None;
            }
            return None;
        };

        if self.nodes.get(from.0)?.texture.is_none() {
            self.restore_cached(from, gfx);
        }
        let node = self.nodes.get(id.0)?;
        let ancestor = self.nodes.get(from.0)?;
        let texture = ancestor.texture?;
        if current == Some(from) {
            return Some(texture);
        }

        let src = node.src;
        let a = ancestor.src;
        let min_x = ((src.x as f64 - a.x as f64 - 1.0) / a.width as f64).max(0.0);
        let min_y = ((src.y as f64 - a.y as f64 - 1.0) / a.height as f64).max(0.0);
        let max_x = (((src.x + src.width) as f64 - a.x as f64 + 1.0) / a.width as f64).min(1.0);
        let max_y = (((src.y + src.height) as f64 - a.y as f64 + 1.0) / a.height as f64).min(1.0);
        let tex_coords = quad_mesh_tex_coords(
            TexCoord::new(min_x as f32, min_y as f32),
            TexCoord::new(max_x as f32, min_y as f32),
            TexCoord::new(max_x as f32, max_y as f32),
            TexCoord::new(min_x as f32, max_y as f32),
            node.grid_width,
            node.grid_height,
        );

        let Quadtree { core, nodes, .. } = self;
        let node = nodes.get_mut(id.0)?;
        if let Some(old) = node.borrow_tex_coords.take() {
            core.delete_buffer(gfx, old);
        }
        node.borrow_tex_coords = Some(gfx.create_buffer(BufferKind::Vertex, as_bytes(&tex_coords)));
        node.borrowing_from = Some(from);
        node.vertices_valid = false;
        Some(texture)
    }

    pub(crate) fn clear_borrow(&mut self, id: NodeId, gfx: &mut dyn GraphicsContext) {
        let Quadtree { core, nodes, .. } = self;
        let Some(node) = nodes.get_mut(id.0) else {
            return;
        };
        node.borrowing_from = None;
        if let Some(buffer) = node.borrow_tex_coords.take() {
            core.delete_buffer(gfx, buffer);
        }
    }

    /// Starts the fade-in for a node that was borrowing when its own data
    /// completed.
    pub(crate) fn reset_fade_timer(&mut self, id: NodeId) {
        let limit = self.core.options.fade_timer_limit_ms as f64;
        let root_level = self.core.root_level as f64;
        let pump_level = self.core.draw_pump_level as f64;
        let Some(node) = self.nodes.get_mut(id.0) else {
            return;
        };
        node.fade_timer_ms = if limit > 0.0 && node.borrowing_from.is_some() {
            let span = root_level - pump_level;
            let level_scale = if span > 0.0 {
                1.0 - (node.tile.level as f64 - pump_level) / span
            } else {
                1.0
            };
            (limit * level_scale - node.read_elapsed_ms).max(0.0)
        } else {
            0.0
        };
    }
}

use std::collections::BTreeSet;
use std::sync::Arc;

use foundation::{Arena, GeoBounds};
use gpu::{Filter, GraphicsContext, TextureRegion};
use runtime::{RenderQueue, UploadBudget};
use serde::Serialize;
use streaming::{
    AsyncReader, FocusPrioritizer, RequestId, RequestPrioritizer, TileGeometry, TileIndex,
    TileSource,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::events::{ReadEvent, TreeEvent};
use crate::grid::SharedGrids;
use crate::mesh::TexCoordSource;
use crate::node::{NodeId, TileNode};
use crate::options::QuadtreeOptions;
use crate::precise::PreciseVertexResolver;
use crate::projection::ProjectionPair;
use crate::resolver::{DefaultVertexResolver, VertexResolver};
use crate::roi::raster_roi;
use crate::shared::{FrameStats, NodeCore, RenderGlobals, RenderState};
use crate::state::{StateMask, TileState};
use crate::texture::{source_texture_format, validate_texture};
use crate::view::MapView;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("tile source {uri} has no extent ({width}x{height})")]
    EmptySource { uri: String, width: u64, height: u64 },
    #[error("tile source {uri} reports a zero tile size")]
    ZeroTileSize { uri: String },
}

/// What one pump did, for hosts that log or schedule frames.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct DrawReport {
    pub pump: u64,
    pub state: TileState,
    pub tiles_drawn: usize,
    pub fetches_issued: usize,
    pub events_handled: usize,
    /// Another pump is needed even if the view does not change.
    pub refresh_requested: bool,
}

/// Child visit order per half-quadrant (45 degree sector) of the focus
/// direction, measured from the tile center in image space.
const CHILD_ITERATION_BIAS: [[usize; 4]; 8] = [
    [1, 3, 0, 2],
    [1, 0, 2, 3],
    [0, 1, 2, 3],
    [0, 2, 1, 3],
    [2, 0, 3, 1],
    [2, 3, 0, 1],
    [3, 2, 1, 0],
    [3, 1, 2, 0],
];

/// Pyramid level to draw at: `ceil(log2(1 / scale) + adjustment)`, where
/// `scale` is dataset resolution over view resolution, capped at the root.
pub fn target_level(gsd: f64, draw_resolution: f64, adjustment: f64, root_level: u32) -> u32 {
    let scale = gsd / draw_resolution;
    let level = ((1.0 / scale).log2() + adjustment).max(0.0).ceil();
    if !level.is_finite() {
        return root_level;
    }
    (level as u32).min(root_level)
}

/// Quadtree renderer for one tiled raster.
///
/// All methods run on the render thread. Reads complete on the reader's
/// thread and are applied at the start of the next [`Quadtree::draw`].
pub struct Quadtree {
    pub(crate) core: NodeCore,
    pub(crate) nodes: Arena<TileNode>,
    root: NodeId,
    queue: RenderQueue<TreeEvent>,
    state_mask: StateMask,
    vertices_invalid: bool,
    raster_bounds: GeoBounds,
    /// View focus in image pixels, for this pump.
    focus: Option<[f64; 2]>,
}

impl Quadtree {
    pub fn new(
        source: Arc<dyn TileSource>,
        projection: Arc<ProjectionPair>,
        options: QuadtreeOptions,
        globals: RenderGlobals,
    ) -> Result<Self, TreeError> {
        let uri = source.uri().to_string();
        if source.width() == 0 || source.height() == 0 {
            return Err(TreeError::EmptySource {
                uri,
                width: source.width(),
                height: source.height(),
            });
        }
        if source.tile_width() == 0 || source.tile_height() == 0 {
            return Err(TreeError::ZeroTileSize { uri });
        }

        let queue = RenderQueue::bounded(options.render_queue_capacity);
        let reader = Arc::new(AsyncReader::new(Arc::clone(&source)));
        let prioritizer = Arc::new(FocusPrioritizer::new(false));
        reader.set_prioritizer(Some(prioritizer.clone() as Arc<dyn RequestPrioritizer>));

        let resolver: Box<dyn VertexResolver> =
            if options.precise_vertices_enabled && projection.has_precise() {
                Box::new(PreciseVertexResolver::new(
                    &uri,
                    source.width(),
                    source.height(),
                    Arc::clone(&projection),
                    globals.texture_cache().cloned(),
                    queue.sender(),
                    options.precise_grid_refine_cap,
                ))
            } else {
                Box::new(DefaultVertexResolver::new(Arc::clone(&projection)))
            };

        let root_level = source.max_num_resolution_levels().saturating_sub(1);
        let root_node = TileNode::new(
            source.as_ref(),
            projection.imprecise().as_ref(),
            &options,
            TileIndex::new(0, 0, root_level),
            None,
        );
        let raster_bounds = root_node.bounds;
        let mut nodes = Arena::new();
        let root = NodeId(nodes.insert(root_node));

        debug!(
            "quadtree created: uri={uri} {}x{} root_level={root_level} multi_resolution={}",
            source.width(),
            source.height(),
            source.is_multi_resolution()
        );

        let core = NodeCore {
            uri,
            multi_resolution: source.is_multi_resolution(),
            source,
            reader,
            prioritizer,
            projection,
            resolver,
            grids: SharedGrids::new(options.max_grid_size),
            options,
            globals,
            events: queue.sender(),
            render_state: RenderState::default(),
            root_level,
            draw_pump_level: 0,
            mag_filter: Filter::Linear,
            color: [1.0; 4],
            pump: Default::default(),
            updated_tiles: BTreeSet::new(),
            frame: FrameStats::default(),
        };
        Ok(Self {
            core,
            nodes,
            root,
            queue,
            state_mask: StateMask::empty(),
            vertices_invalid: false,
            raster_bounds,
            focus: None,
        })
    }

    pub fn uri(&self) -> &str {
        &self.core.uri
    }

    pub fn projection(&self) -> &Arc<ProjectionPair> {
        &self.core.projection
    }

    pub fn reader(&self) -> &Arc<AsyncReader> {
        &self.core.reader
    }

    pub fn options(&self) -> &QuadtreeOptions {
        &self.core.options
    }

    pub fn root_level(&self) -> u32 {
        self.core.root_level
    }

    /// Lon/lat extent of the raster under the imprecise projection.
    pub fn raster_bounds(&self) -> GeoBounds {
        self.raster_bounds
    }

    /// Aggregate of the terminal nodes drawn in the last pump.
    pub fn state(&self) -> TileState {
        self.state_mask.aggregate()
    }

    pub fn set_color(&mut self, rgba: [f32; 4]) {
        self.core.color = rgba;
    }

    /// Forces the given tiles to be re-read the next time they are drawn.
    pub fn notify_tiles_updated(&mut self, tiles: impl IntoIterator<Item = TileIndex>) {
        self.core.updated_tiles.extend(tiles);
    }

    /// Tiles that currently hold a texture.
    pub fn resident_tiles(&self) -> Vec<TileIndex> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.texture.is_some())
            .map(|(_, n)| n.tile)
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Renders one pump.
    pub fn draw(&mut self, view: &MapView, gfx: &mut dyn GraphicsContext) -> DrawReport {
        self.core.pump = view.pump;
        self.core.frame = FrameStats::default();
        let events_handled = self.drain_events(gfx);

        let (width, height) = (self.core.source.width(), self.core.source.height());
        let imprecise = Arc::clone(self.core.projection.imprecise());
        let rois = raster_roi(
            &view.bounds,
            &self.raster_bounds,
            width,
            height,
            imprecise.as_ref(),
        );
        let focus = imprecise.ground_to_image(view.focus).map(|p| [p.x, p.y]);
        let visible = !rois.is_empty();
        self.focus = focus;
        self.core.prioritizer.set_focus(focus, rois);

        let previous = self.state_mask;
        if visible {
            if self.vertices_invalid {
                for handle in self.nodes.handles() {
                    if let Some(node) = self.nodes.get_mut(handle) {
                        node.invalidate_vertices();
                    }
                }
            }

            self.state_mask = StateMask::empty();
            let level = target_level(
                self.core.projection.gsd(),
                view.draw_resolution,
                self.core.options.level_transition_adjustment,
                self.core.root_level,
            );
            self.core.draw_pump_level = level;
            self.core.mag_filter = if view.targeting && self.core.projection.has_precise() {
                Filter::Nearest
            } else {
                Filter::Linear
            };

            self.core.render_state.reset();
            self.core.resolver.begin_draw(view);
            self.draw_node(self.root, level, view, gfx);
            let expand = self.core.resolver.end_draw(view);
            if !expand.is_empty() {
                self.core.frame.refresh_requested = true;
            }
            for id in expand {
                if let Some(node) = self.nodes.get_mut(id.0) {
                    node.expand_grid();
                }
            }
            if self.vertices_invalid {
                self.vertices_invalid = false;
                self.core.resolver.vertices_refreshed();
            }
        }
        self.cull(gfx);
        self.core.render_state.reset();

        let frame = self.core.frame;
        let refresh_requested = frame.refresh_requested
            || previous != self.state_mask
            || self.state_mask.contains(TileState::Resolving)
            || !self.queue.is_empty();
        DrawReport {
            pump: view.pump.index,
            state: self.state(),
            tiles_drawn: frame.tiles_drawn,
            fetches_issued: frame.fetches_issued,
            events_handled,
            refresh_requested,
        }
    }

    /// Applies queued read and resolver events within the upload budget.
    fn drain_events(&mut self, gfx: &mut dyn GraphicsContext) -> usize {
        let mut budget = UploadBudget::new(self.core.options.upload_budget_bytes);
        let mut handled = 0;
        while !budget.is_exhausted() {
            let Some(event) = self.queue.try_recv() else {
                break;
            };
            budget.spend(event.upload_bytes());
            self.handle_event(event, gfx);
            handled += 1;
        }
        handled
    }

    fn handle_event(&mut self, event: TreeEvent, gfx: &mut dyn GraphicsContext) {
        match event {
            TreeEvent::VerticesInvalid => self.vertices_invalid = true,
            TreeEvent::Read {
                node,
                request,
                event,
            } => self.handle_read(node, request, event, gfx),
        }
    }

    fn handle_read(
        &mut self,
        id: NodeId,
        request: RequestId,
        event: ReadEvent,
        gfx: &mut dyn GraphicsContext,
    ) {
        let current = self
            .nodes
            .get(id.0)
            .and_then(|n| n.current_request.as_ref())
            .map(|r| r.id);
        if current != Some(request) {
            debug!("dropping stale read event for {id} request={}", request.0);
            return;
        }

        match event {
            ReadEvent::Started => {}
            ReadEvent::Update(update) => {
                let Quadtree { core, nodes, .. } = self;
                let Some(node) = nodes.get_mut(id.0) else {
                    return;
                };
                let texture = validate_texture(core, node, gfx);
                let region = TextureRegion {
                    x: update.dst_x,
                    y: update.dst_y,
                    width: update.width,
                    height: update.height,
                };
                match gfx.upload_texture(
                    texture,
                    region,
                    source_texture_format(update.format),
                    &update.pixels,
                ) {
                    Ok(()) => node.received_update = true,
                    Err(err) => warn!("texture upload failed for tile {}: {err}", node.tile),
                }
            }
            ReadEvent::Completed => {
                let elapsed_ms = {
                    let pump_time = self.core.pump.time_s;
                    let version_source = Arc::clone(&self.core.source);
                    let Some(node) = self.nodes.get_mut(id.0) else {
                        return;
                    };
                    node.state = TileState::Resolved;
                    node.received_update = node.texture.is_some();
                    node.current_request = None;
                    node.tile_version = version_source.tile_version(node.tile);
                    node.read_elapsed_ms = ((pump_time - node.read_start_s) * 1000.0).max(0.0);
                    node.read_elapsed_ms
                };
                self.reset_fade_timer(id);
                debug!("{id} resolved in {elapsed_ms:.0}ms");
            }
            ReadEvent::Canceled => {
                if let Some(node) = self.nodes.get_mut(id.0) {
                    node.current_request = None;
                    if node.state == TileState::Resolving {
                        node.state = TileState::Unresolved;
                    }
                }
            }
            ReadEvent::Error(err) => {
                let parent = {
                    let source = Arc::clone(&self.core.source);
                    let Some(node) = self.nodes.get_mut(id.0) else {
                        return;
                    };
                    node.current_request = None;
                    node.tile_version = source.tile_version(node.tile);
                    node.state = TileState::Unresolvable;
                    debug!("{id} unresolvable: {err}");
                    node.parent
                };
                // give borrowers below a coarser tile to fall back on
                if !self.core.multi_resolution {
                    return;
                }
                let Some(parent) = parent else {
                    return;
                };
                let fetch_parent = self.nodes.get(parent.0).is_some_and(|p| {
                    p.state == TileState::Unresolved && p.current_request.is_none()
                });
                if fetch_parent {
                    self.fetch(parent);
                }
            }
        }
    }

    /// Draws the subtree under `id`. Returns true when something drawn
    /// below still lacks its own resolved data.
    fn draw_node(
        &mut self,
        id: NodeId,
        level: u32,
        view: &MapView,
        gfx: &mut dyn GraphicsContext,
    ) -> bool {
        let pump = self.core.pump.index;
        let Some(node) = self.nodes.get_mut(id.0) else {
            return false;
        };
        node.last_touch = Some(pump);
        let node_level = node.tile.level;

        if node_level <= level || node_level == 0 {
            return self.draw_terminal(id, view, gfx, true);
        }

        if self.core.multi_resolution
            && (Some(node_level) == self.core.root_level.checked_sub(1)
                || node_level == level.saturating_add(3))
        {
            self.prefetch(id, gfx);
        }

        // every third level shows its own data before its children load
        if self.core.options.progressive_load && node_level % 3 == 0 {
            let pending = self
                .nodes
                .get(id.0)
                .is_some_and(|n| !n.touched || n.fade_timer_ms > 0.0);
            if pending {
                self.core.frame.refresh_requested = true;
                return self.draw_terminal(id, view, gfx, false);
            }
        }

        let mut visible = [false; 4];
        for (i, slot) in visible.iter_mut().enumerate() {
            let Some(node) = self.nodes.get(id.0) else {
                return false;
            };
            let shown = node.child_bounds[i].is_some_and(|b| b.intersects_unwrapped(&view.bounds))
                && node
                    .child_tile(i)
                    .is_some_and(|t| self.core.source.contains_tile(t));
            match (node.children[i], shown) {
                (Some(_), true) => *slot = true,
                (None, true) => *slot = self.create_child(id, i).is_some(),
                (Some(child), false) => {
                    self.release_node(child, gfx);
                    if let Some(node) = self.nodes.get_mut(id.0) {
                        node.children[i] = None;
                    }
                }
                (None, false) => {}
            }
        }
        // nothing below intersects the view
        if !visible.contains(&true) {
            return self.draw_terminal(id, view, gfx, false);
        }

        let mut descendants = false;
        for i in self.child_order(id, &visible) {
            let Some(child) = self.nodes.get(id.0).and_then(|n| n.children[i]) else {
                continue;
            };
            descendants |= self.draw_node(child, level, view, gfx);
        }

        let Some(node) = self.nodes.get(id.0) else {
            return false;
        };
        if descendants && node.state == TileState::Unresolved && !node.touched {
            self.resolve_texture(id, gfx, self.core.multi_resolution);
            if let Some(node) = self.nodes.get_mut(id.0) {
                node.touched = true;
            }
            self.core.frame.refresh_requested = true;
        } else if !descendants {
            self.drop_covered(id, gfx);
        }
        descendants
            && self
                .nodes
                .get(id.0)
                .is_some_and(|n| n.state != TileState::Resolved)
    }

    /// Draws `id` in place of its subtree.
    fn draw_terminal(
        &mut self,
        id: NodeId,
        view: &MapView,
        gfx: &mut dyn GraphicsContext,
        abandon: bool,
    ) -> bool {
        self.draw_self(id, view, gfx);
        if abandon {
            self.abandon(id, gfx);
        }
        let Some(state) = self.nodes.get(id.0).map(|n| n.state) else {
            return false;
        };
        self.state_mask.insert(state);
        state != TileState::Resolved
    }

    /// Visible children, nearest the focus first.
    fn child_order(&self, id: NodeId, visible: &[bool; 4]) -> Vec<usize> {
        let Some(node) = self.nodes.get(id.0) else {
            return Vec::new();
        };
        let mut order = Vec::with_capacity(4);
        let mut offset = 2;
        if let Some([x, y]) = self.focus
            && (x > 0.0 || y > 0.0)
        {
            if node.src.contains(x, y) {
                let first = (0..4).find(|&i| {
                    visible[i]
                        && node.children[i]
                            .and_then(|c| self.nodes.get(c.0))
                            .is_some_and(|c| c.src.contains(x, y))
                });
                order.extend(first);
            }
            let (mid_x, mid_y) = node.src.center();
            let theta = (y - mid_y).atan2(x - mid_x).to_degrees().rem_euclid(360.0);
            offset = (theta / 45.0) as usize % 8;
        }
        for &i in &CHILD_ITERATION_BIAS[offset] {
            if visible[i] && !order.contains(&i) {
                order.push(i);
            }
        }
        order
    }

    /// Once everything drawn below has its own data, the node gives up its
    /// read and, unless something still borrows it, its texture.
    fn drop_covered(&mut self, id: NodeId, gfx: &mut dyn GraphicsContext) {
        let Some(node) = self.nodes.get_mut(id.0) else {
            return;
        };
        if let Some(request) = node.current_request.take() {
            request.cancel();
            if node.state == TileState::Resolving {
                node.state = TileState::Unresolved;
            }
            debug!("{id} covered by its children, read canceled");
        }
        if node.texture.is_none() {
            return;
        }
        let touched = node.touched;
        if self.nodes.iter().any(|(_, n)| n.borrowing_from == Some(id)) {
            return;
        }
        self.release_texture(id, gfx);
        if let Some(node) = self.nodes.get_mut(id.0) {
            node.touched = touched;
        }
    }

    fn create_child(&mut self, parent: NodeId, i: usize) -> Option<NodeId> {
        let tile = self.nodes.get(parent.0)?.child_tile(i)?;
        let node = TileNode::new(
            self.core.source.as_ref(),
            self.core.projection.imprecise().as_ref(),
            &self.core.options,
            tile,
            Some(parent),
        );
        let child = NodeId(self.nodes.insert(node));
        if let Some(node) = self.nodes.get_mut(parent.0) {
            node.children[i] = Some(child);
        }
        Some(child)
    }

    /// Coarse data for borrowers: resolve intermediate levels while
    /// descending.
    fn prefetch(&mut self, id: NodeId, gfx: &mut dyn GraphicsContext) {
        let Some(node) = self.nodes.get(id.0) else {
            return;
        };
        let refresh = node.state == TileState::Unresolvable
            && self.core.options.version_check_enabled
            && self.core.needs_refresh(node.tile, node.tile_version);
        let unresolved = node.state == TileState::Unresolved && node.current_request.is_none();
        if !(unresolved || refresh) {
            return;
        }
        if refresh {
            let tile = node.tile;
            self.core.updated_tiles.remove(&tile);
            if let Some(node) = self.nodes.get_mut(id.0) {
                node.state = TileState::Unresolved;
            }
        }
        self.resolve_texture(id, gfx, true);
    }

    /// Resolves and draws a terminal node with the best texture available.
    fn draw_self(&mut self, id: NodeId, view: &MapView, gfx: &mut dyn GraphicsContext) {
        let Some(node) = self.nodes.get(id.0) else {
            return;
        };
        let (state, tile) = (node.state, node.tile);
        let refresh = matches!(state, TileState::Resolved | TileState::Unresolvable)
            && self.core.options.version_check_enabled
            && self.core.needs_refresh(tile, node.tile_version);
        if refresh {
            self.core.updated_tiles.remove(&tile);
            if state == TileState::Unresolvable
                && let Some(node) = self.nodes.get_mut(id.0)
            {
                node.state = TileState::Unresolved;
            }
            self.resolve_texture(id, gfx, true);
            self.core.frame.refresh_requested = true;
        } else if self.should_resolve(id) {
            self.resolve_texture(id, gfx, true);
        }

        let Some(node) = self.nodes.get_mut(id.0) else {
            return;
        };
        if matches!(node.state, TileState::Resolved | TileState::Unresolvable) {
            node.touched = true;
        }

        if node.state != TileState::Resolved {
            let borrowed = if self.core.options.texture_borrow_enabled {
                self.try_borrow(id, gfx)
            } else {
                None
            };
            if let Some(texture) = borrowed {
                self.validate_vertices(id, view, gfx);
                self.draw_texture(id, view, gfx, texture, TexCoordSource::Borrowed);
            } else if self.core.options.loading_texture_enabled
                && let Some(texture) = self.core.globals.loading_texture(gfx)
            {
                self.validate_vertices(id, view, gfx);
                self.draw_texture(id, view, gfx, texture, TexCoordSource::Own);
            }
        } else {
            self.clear_borrow(id, gfx);
        }

        let own = self
            .nodes
            .get(id.0)
            .filter(|n| n.received_update)
            .and_then(|n| n.texture);
        if let Some(texture) = own {
            self.validate_vertices(id, view, gfx);
            self.draw_texture(id, view, gfx, texture, TexCoordSource::Own);
        }

        let dt_ms = self.core.pump.dt_ms();
        if let Some(node) = self.nodes.get_mut(id.0)
            && node.state == TileState::Resolved
            && node.fade_timer_ms > 0.0
        {
            node.fade_timer_ms = (node.fade_timer_ms - dt_ms).max(0.0);
            self.core.frame.refresh_requested = true;
        }
    }

    fn should_resolve(&self, id: NodeId) -> bool {
        let Some(node) = self.nodes.get(id.0) else {
            return false;
        };
        match node.state {
            TileState::Unresolvable => node
                .children
                .iter()
                .flatten()
                .any(|c| self.nodes.get(c.0).is_some_and(|c| c.received_update)),
            TileState::Unresolved => node.current_request.is_none(),
            _ => false,
        }
    }

    /// Releases every node the last pump did not visit.
    fn cull(&mut self, gfx: &mut dyn GraphicsContext) {
        let pump = self.core.pump.index;
        let root = self.root;
        let touched = self
            .nodes
            .get(root.0)
            .is_some_and(|n| n.last_touch == Some(pump));
        if touched {
            self.cull_children(root, pump, gfx);
        } else {
            self.abandon(root, gfx);
        }
    }

    fn cull_children(&mut self, id: NodeId, pump: u64, gfx: &mut dyn GraphicsContext) {
        let Some(children) = self.nodes.get(id.0).map(|n| n.children) else {
            return;
        };
        for (i, child) in children.into_iter().enumerate() {
            let Some(child) = child else {
                continue;
            };
            let touched = self
                .nodes
                .get(child.0)
                .is_some_and(|n| n.last_touch == Some(pump));
            if touched {
                self.cull_children(child, pump, gfx);
            } else {
                self.release_node(child, gfx);
                if let Some(node) = self.nodes.get_mut(id.0) {
                    node.children[i] = None;
                }
            }
        }
    }

    /// Releases every descendant of `id`.
    fn abandon(&mut self, id: NodeId, gfx: &mut dyn GraphicsContext) {
        let Some(children) = self.nodes.get_mut(id.0).map(|n| std::mem::take(&mut n.children))
        else {
            return;
        };
        for child in children.into_iter().flatten() {
            self.release_node(child, gfx);
        }
    }

    /// Cancels, frees, and (except for the root) removes a subtree.
    fn release_node(&mut self, id: NodeId, gfx: &mut dyn GraphicsContext) {
        self.abandon(id, gfx);
        if let Some(node) = self.nodes.get_mut(id.0) {
            if let Some(request) = node.current_request.take() {
                request.cancel();
            }
            if node.state == TileState::Resolving {
                node.state = TileState::Unresolved;
            }
        }
        self.release_texture(id, gfx);
        if id == self.root {
            if let Some(node) = self.nodes.get_mut(id.0) {
                node.touched = false;
                node.last_touch = None;
            }
        } else {
            self.nodes.remove(id.0);
        }
    }

    /// Cancels in-flight reads and parks their nodes until [`Quadtree::resume`].
    pub fn suspend(&mut self) {
        for handle in self.nodes.handles() {
            let Some(node) = self.nodes.get_mut(handle) else {
                continue;
            };
            if node.state != TileState::Resolving {
                continue;
            }
            if let Some(request) = node.current_request.take() {
                request.cancel();
                node.state = TileState::Suspended;
            }
        }
    }

    pub fn resume(&mut self) {
        for handle in self.nodes.handles() {
            if let Some(node) = self.nodes.get_mut(handle)
                && node.state == TileState::Suspended
            {
                node.state = TileState::Unresolved;
                node.current_request = None;
            }
        }
    }

    /// Tears the tree down, returning eligible textures and precise points
    /// to the process cache.
    pub fn release(mut self, gfx: &mut dyn GraphicsContext) {
        for (_, node) in self.nodes.iter() {
            if let Some(request) = &node.current_request {
                request.cancel();
            }
        }
        let root = self.root;
        self.release_node(root, gfx);
        self.nodes.remove(root.0);
        // a worker blocked on a full queue must fail its post before the join
        self.queue.close();
        self.core.reader.shutdown();
        self.core.resolver.release(gfx);
        self.core.grids.release(gfx);
        debug!("quadtree released: uri={}", self.core.uri);
    }

    pub(crate) fn root_id(&self) -> NodeId {
        self.root
    }
}

impl Drop for Quadtree {
    fn drop(&mut self) {
        self.queue.close();
        self.core.reader.shutdown();
    }
}

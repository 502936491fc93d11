use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use foundation::GeoPoint;
use gpu::GraphicsContext;
use parking_lot::Mutex;
use quadtree::{
    CornerProjection, DatasetProjection, DrawReport, MapView, ProjectionError, ProjectionPair,
    Quadtree, QuadtreeOptions, RenderGlobals, TileState, TreeError,
};
use serde::{Deserialize, Serialize};
use streaming::{MemoryTileSource, PixelFormat, TileClientControl, TileSource};
use thiserror::Error;
use tracing::{debug, error};

use crate::dataset::RasterDataset;
use crate::layer::{Layer, LayerId};

#[derive(Debug, Error)]
pub enum LayerError {
    #[error("failed to open tile source {uri}: {reason}")]
    SourceFactory { uri: String, reason: String },
    #[error(transparent)]
    Projection(#[from] ProjectionError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error("failed to start reader worker: {0}")]
    ReaderWorker(#[from] std::io::Error),
}

/// Opens the tile source behind a dataset.
pub trait TileSourceFactory: Send + Sync {
    fn open(&self, dataset: &RasterDataset) -> Result<Arc<dyn TileSource>, LayerError>;

    /// A sensor-model projection more accurate than the corner fit.
    fn precise_projection(&self, _dataset: &RasterDataset) -> Option<Arc<dyn DatasetProjection>> {
        None
    }
}

/// Serves every dataset from a procedural [`MemoryTileSource`].
pub struct MemorySourceFactory {
    pub tile_size: u32,
    pub format: PixelFormat,
    pub multi_resolution: bool,
    precise: Option<Arc<dyn DatasetProjection>>,
    opened: Mutex<Vec<Arc<MemoryTileSource>>>,
}

impl MemorySourceFactory {
    pub fn new(tile_size: u32, format: PixelFormat, multi_resolution: bool) -> Self {
        Self {
            tile_size,
            format,
            multi_resolution,
            precise: None,
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn with_precise_projection(mut self, projection: Arc<dyn DatasetProjection>) -> Self {
        self.precise = Some(projection);
        self
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().len()
    }

    pub fn last_opened(&self) -> Option<Arc<MemoryTileSource>> {
        self.opened.lock().last().cloned()
    }
}

impl TileSourceFactory for MemorySourceFactory {
    fn open(&self, dataset: &RasterDataset) -> Result<Arc<dyn TileSource>, LayerError> {
        if self.tile_size == 0 {
            return Err(LayerError::SourceFactory {
                uri: dataset.uri.clone(),
                reason: "tile size is zero".into(),
            });
        }
        let mut source = MemoryTileSource::new(
            dataset.uri.clone(),
            dataset.width,
            dataset.height,
            self.tile_size,
            self.format,
            self.multi_resolution,
        );
        if dataset.remote {
            source = source.remote();
        }
        let source = Arc::new(source);
        self.opened.lock().push(Arc::clone(&source));
        Ok(source)
    }

    fn precise_projection(&self, _dataset: &RasterDataset) -> Option<Arc<dyn DatasetProjection>> {
        self.precise.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterLayerOptions {
    /// Positive values draw coarser levels; the tree bias is `0.5 - relative_scale`.
    pub relative_scale: f64,
    pub texture_cache_enabled: bool,
    /// Run reads on a background thread instead of waiting for the host
    /// to pump the reader.
    pub spawn_reader_worker: bool,
    pub quadtree: QuadtreeOptions,
}

impl Default for RasterLayerOptions {
    fn default() -> Self {
        Self {
            relative_scale: 0.0,
            texture_cache_enabled: true,
            spawn_reader_worker: false,
            quadtree: QuadtreeOptions::default(),
        }
    }
}

impl RasterLayerOptions {
    pub fn from_json_str(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// ARGB tint, writable from any thread and applied at the next draw.
#[derive(Debug)]
pub struct ColorControl {
    argb: AtomicU32,
}

impl Default for ColorControl {
    fn default() -> Self {
        Self {
            argb: AtomicU32::new(0xFFFF_FFFF),
        }
    }
}

impl ColorControl {
    pub fn set_color(&self, argb: u32) {
        self.argb.store(argb, Ordering::Release);
    }

    pub fn color(&self) -> u32 {
        self.argb.load(Ordering::Acquire)
    }

    pub fn rgba(&self) -> [f32; 4] {
        unpack_argb(self.color())
    }
}

pub fn unpack_argb(argb: u32) -> [f32; 4] {
    let channel = |shift: u32| ((argb >> shift) & 0xFF) as f32 / 255.0;
    [channel(16), channel(8), channel(0), channel(24)]
}

#[derive(Debug, Default)]
struct ClientSettings {
    offline_only: bool,
    refresh_interval_ms: u64,
    refresh_requested: bool,
    dirty: bool,
}

/// Changes waiting to be pushed to the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingClientChanges {
    pub offline_only: bool,
    pub refresh_interval_ms: u64,
    pub refresh: bool,
}

/// Cache and offline settings for a remote layer.
///
/// Setters only record the change; the layer pushes it to the source on
/// the render thread before its next draw.
#[derive(Debug, Default)]
pub struct LayerClientControl {
    settings: Mutex<ClientSettings>,
}

impl LayerClientControl {
    pub fn take_pending(&self) -> Option<PendingClientChanges> {
        let mut s = self.settings.lock();
        if !s.dirty {
            return None;
        }
        s.dirty = false;
        let refresh = std::mem::take(&mut s.refresh_requested);
        Some(PendingClientChanges {
            offline_only: s.offline_only,
            refresh_interval_ms: s.refresh_interval_ms,
            refresh,
        })
    }

    fn mark_dirty(&self) {
        self.settings.lock().dirty = true;
    }

    /// Adopts the source's settings unless the caller already changed them.
    fn seed_from(&self, control: &dyn TileClientControl) {
        let mut s = self.settings.lock();
        if !s.dirty {
            s.offline_only = control.is_offline_only();
            s.refresh_interval_ms = control.cache_auto_refresh_interval();
        }
    }
}

impl TileClientControl for LayerClientControl {
    fn set_offline_only(&self, offline: bool) {
        let mut s = self.settings.lock();
        s.offline_only = offline;
        s.dirty = true;
    }

    fn is_offline_only(&self) -> bool {
        self.settings.lock().offline_only
    }

    fn refresh_cache(&self) {
        let mut s = self.settings.lock();
        s.refresh_requested = true;
        s.dirty = true;
    }

    fn set_cache_auto_refresh_interval(&self, millis: u64) {
        let mut s = self.settings.lock();
        s.refresh_interval_ms = millis;
        s.dirty = true;
    }

    fn cache_auto_refresh_interval(&self) -> u64 {
        self.settings.lock().refresh_interval_ms
    }
}

/// Layer adapter over one quadtree.
///
/// The tree is built on the first draw. A failed build is logged and the
/// layer stays empty until it is released.
pub struct TiledRasterLayer {
    id: LayerId,
    dataset: RasterDataset,
    factory: Arc<dyn TileSourceFactory>,
    options: RasterLayerOptions,
    globals: RenderGlobals,
    color: Arc<ColorControl>,
    applied_color: Option<u32>,
    client_control: Option<Arc<LayerClientControl>>,
    tree: Option<Quadtree>,
    initialized: bool,
}

impl TiledRasterLayer {
    pub fn new(
        id: u64,
        dataset: RasterDataset,
        factory: Arc<dyn TileSourceFactory>,
        options: RasterLayerOptions,
        globals: RenderGlobals,
    ) -> Self {
        let client_control = dataset
            .remote
            .then(|| Arc::new(LayerClientControl::default()));
        Self {
            id: LayerId(id),
            dataset,
            factory,
            options,
            globals,
            color: Arc::new(ColorControl::default()),
            applied_color: None,
            client_control,
            tree: None,
            initialized: false,
        }
    }

    pub fn dataset(&self) -> &RasterDataset {
        &self.dataset
    }

    pub fn color_control(&self) -> Arc<ColorControl> {
        Arc::clone(&self.color)
    }

    /// Present for remote datasets only.
    pub fn client_control(&self) -> Option<Arc<LayerClientControl>> {
        self.client_control.clone()
    }

    pub fn quadtree(&self) -> Option<&Quadtree> {
        self.tree.as_ref()
    }

    /// The projection pair when `point` falls inside the raster.
    pub fn access_raster_data(&self, point: GeoPoint) -> Option<Arc<ProjectionPair>> {
        let tree = self.tree.as_ref()?;
        tree.raster_bounds()
            .contains(point.lon, point.lat)
            .then(|| Arc::clone(tree.projection()))
    }

    fn build_tree(&self) -> Result<Quadtree, LayerError> {
        let ds = &self.dataset;
        let source = self.factory.open(ds)?;
        let imprecise: Arc<dyn DatasetProjection> =
            Arc::new(CornerProjection::new(ds.width, ds.height, ds.corners)?);
        let precise = if ds.precise {
            self.factory.precise_projection(ds)
        } else {
            None
        };
        let mut options = self.options.quadtree.clone();
        let projection = Arc::new(ProjectionPair::new(
            imprecise,
            precise,
            ds.gsd_m,
            source.tile_width(),
            source.tile_height(),
            options.discrepancy_divisor,
        ));
        // remote parents are always fetched
        options.child_texture_copy_resolves_parent &= !ds.remote;
        options.level_transition_adjustment = 0.5 - self.options.relative_scale;

        let globals = if self.options.texture_cache_enabled {
            self.globals.clone()
        } else {
            self.globals.without_texture_cache()
        };
        if let (Some(layer), Some(remote)) = (&self.client_control, source.client_control()) {
            layer.seed_from(remote.as_ref());
        }
        let tree = Quadtree::new(source, projection, options, globals)?;
        if self.options.spawn_reader_worker {
            tree.reader().spawn_worker()?;
        }
        Ok(tree)
    }

    fn apply_client_control(&mut self) {
        let (Some(layer), Some(tree)) = (&self.client_control, self.tree.as_mut()) else {
            return;
        };
        let Some(source) = tree.reader().source().client_control() else {
            return;
        };
        let Some(pending) = layer.take_pending() else {
            return;
        };
        source.set_offline_only(pending.offline_only);
        source.set_cache_auto_refresh_interval(pending.refresh_interval_ms);
        if pending.refresh {
            source.refresh_cache();
            let resident = tree.resident_tiles();
            debug!(
                "cache refresh: uri={} resident_tiles={}",
                self.dataset.uri,
                resident.len()
            );
            tree.notify_tiles_updated(resident);
        }
    }

    fn apply_color(&mut self) {
        let Some(tree) = self.tree.as_mut() else {
            return;
        };
        let argb = self.color.color();
        if self.applied_color != Some(argb) {
            tree.set_color(unpack_argb(argb));
            self.applied_color = Some(argb);
        }
    }
}

impl Layer for TiledRasterLayer {
    fn id(&self) -> LayerId {
        self.id
    }

    fn draw(&mut self, view: &MapView, gfx: &mut dyn GraphicsContext) -> Option<DrawReport> {
        if !self.initialized {
            self.initialized = true;
            match self.build_tree() {
                Ok(tree) => self.tree = Some(tree),
                Err(err) => error!(
                    "raster layer init failed: name={} uri={} -> {err}",
                    self.dataset.name, self.dataset.uri
                ),
            }
        }
        self.apply_client_control();
        self.apply_color();
        let tree = self.tree.as_mut()?;
        Some(tree.draw(view, gfx))
    }

    fn release(&mut self, gfx: &mut dyn GraphicsContext) {
        if let Some(tree) = self.tree.take() {
            tree.release(gfx);
        }
        self.globals.release(gfx);
        self.initialized = false;
        self.applied_color = None;
        if let Some(control) = &self.client_control {
            control.mark_dirty();
        }
    }

    fn state(&self) -> TileState {
        self.tree
            .as_ref()
            .map_or(TileState::Resolved, Quadtree::state)
    }

    fn suspend(&mut self) {
        if let Some(tree) = self.tree.as_mut() {
            tree.suspend();
        }
    }

    fn resume(&mut self) {
        if let Some(tree) = self.tree.as_mut() {
            tree.resume();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use foundation::GeoBounds;
    use gpu::RecordingContext;
    use pretty_assertions::assert_eq;
    use quadtree::RasterCorners;
    use streaming::TileIndex;

    const URI: &str = "mem://layer";

    fn corners() -> RasterCorners {
        RasterCorners {
            upper_left: GeoPoint::new(1.0, 0.0),
            upper_right: GeoPoint::new(1.0, 1.0),
            lower_right: GeoPoint::new(0.0, 1.0),
            lower_left: GeoPoint::new(0.0, 0.0),
        }
    }

    // a single 256px tile: the root is the only level
    fn dataset() -> RasterDataset {
        RasterDataset::new("layer", URI, 256, 256, corners()).with_gsd(1.0)
    }

    fn factory() -> Arc<MemorySourceFactory> {
        Arc::new(MemorySourceFactory::new(256, PixelFormat::Rgba, true))
    }

    fn layer(dataset: RasterDataset, factory: &Arc<MemorySourceFactory>) -> TiledRasterLayer {
        TiledRasterLayer::new(
            7,
            dataset,
            factory.clone() as Arc<dyn TileSourceFactory>,
            RasterLayerOptions::default(),
            RenderGlobals::new(),
        )
    }

    fn view() -> MapView {
        MapView::new(GeoBounds::new(-1.0, -1.0, 2.0, 2.0), 1.0)
    }

    /// Draws, runs the queued reads, and advances the pump.
    fn frame(
        layer: &mut TiledRasterLayer,
        view: &mut MapView,
        gfx: &mut RecordingContext,
    ) -> Option<DrawReport> {
        let report = layer.draw(view, gfx);
        if let Some(tree) = layer.quadtree() {
            tree.reader().run_pending();
        }
        view.advance();
        report
    }

    struct FailingFactory;

    impl TileSourceFactory for FailingFactory {
        fn open(&self, dataset: &RasterDataset) -> Result<Arc<dyn TileSource>, LayerError> {
            Err(LayerError::SourceFactory {
                uri: dataset.uri.clone(),
                reason: "offline".into(),
            })
        }
    }

    #[test]
    fn tree_is_built_on_first_draw() {
        let factory = factory();
        let mut layer = layer(dataset(), &factory);
        assert!(layer.quadtree().is_none());
        assert_eq!(layer.state(), TileState::Resolved);
        assert_eq!(layer.id(), LayerId(7));

        let mut gfx = RecordingContext::new();
        let mut view = view();
        let report = frame(&mut layer, &mut view, &mut gfx).unwrap();
        assert_eq!(report.fetches_issued, 1);
        assert_eq!(factory.open_count(), 1);

        frame(&mut layer, &mut view, &mut gfx).unwrap();
        assert_eq!(factory.open_count(), 1);
        assert_eq!(layer.state(), TileState::Resolved);
        assert!(!gfx.draw_calls().is_empty());
    }

    #[test]
    fn failed_init_is_not_retried_until_release() {
        let mut layer = TiledRasterLayer::new(
            1,
            dataset(),
            Arc::new(FailingFactory),
            RasterLayerOptions::default(),
            RenderGlobals::new(),
        );
        let mut gfx = RecordingContext::new();
        let view = view();
        assert!(layer.draw(&view, &mut gfx).is_none());
        assert!(layer.draw(&view, &mut gfx).is_none());
        assert_eq!(layer.state(), TileState::Resolved);
        assert!(gfx.commands().is_empty());
    }

    #[test]
    fn degenerate_corners_fail_init() {
        let mut ds = dataset();
        ds.corners.upper_right = ds.corners.upper_left;
        ds.corners.lower_right = ds.corners.upper_left;
        let factory = factory();
        let mut layer = layer(ds, &factory);
        let mut gfx = RecordingContext::new();
        assert!(layer.draw(&view(), &mut gfx).is_none());
        assert!(layer.quadtree().is_none());
    }

    #[test]
    fn relative_scale_and_remote_shape_tree_options() {
        let factory = factory();
        let mut options = RasterLayerOptions::default();
        options.relative_scale = 0.25;
        let mut layer = TiledRasterLayer::new(
            2,
            dataset().remote(),
            factory.clone() as Arc<dyn TileSourceFactory>,
            options,
            RenderGlobals::new(),
        );
        let mut gfx = RecordingContext::new();
        layer.draw(&view(), &mut gfx);
        let tree = layer.quadtree().unwrap();
        assert_eq!(tree.options().level_transition_adjustment, 0.25);
        assert!(!tree.options().child_texture_copy_resolves_parent);

        let mut local = self::layer(dataset(), &factory);
        local.draw(&view(), &mut gfx);
        assert!(local.quadtree().unwrap().options().child_texture_copy_resolves_parent);
    }

    #[test]
    fn color_is_applied_at_the_next_draw() {
        let factory = factory();
        let mut layer = layer(dataset(), &factory);
        let color = layer.color_control();
        color.set_color(0x80FF_0000);
        assert_eq!(color.rgba(), [1.0, 0.0, 0.0, 128.0 / 255.0]);

        let mut gfx = RecordingContext::new();
        let mut view = view();
        frame(&mut layer, &mut view, &mut gfx);
        frame(&mut layer, &mut view, &mut gfx);
        let calls = gfx.draw_calls();
        assert!(!calls.is_empty());
        assert!(
            calls
                .iter()
                .all(|c| c.color == [1.0, 0.0, 0.0, 128.0 / 255.0])
        );
    }

    #[test]
    fn unpack_orders_channels_as_rgba() {
        assert_eq!(unpack_argb(0xFFFF_FFFF), [1.0; 4]);
        assert_eq!(unpack_argb(0x0000_FF00), [0.0, 1.0, 0.0, 0.0]);
        assert_eq!(unpack_argb(0xFF00_00FF), [0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn local_datasets_have_no_client_control() {
        let factory = factory();
        assert!(layer(dataset(), &factory).client_control().is_none());
        assert!(
            layer(dataset().remote(), &factory)
                .client_control()
                .is_some()
        );
    }

    #[test]
    fn client_changes_wait_for_the_render_thread() {
        let factory = factory();
        let mut layer = layer(dataset().remote(), &factory);
        let mut gfx = RecordingContext::new();
        let mut view = view();
        frame(&mut layer, &mut view, &mut gfx);
        frame(&mut layer, &mut view, &mut gfx);

        let control = layer.client_control().unwrap();
        control.set_offline_only(true);
        control.set_cache_auto_refresh_interval(30_000);
        let source = factory.last_opened().unwrap();
        let remote = source.memory_control().unwrap();
        assert!(!remote.is_offline_only());

        frame(&mut layer, &mut view, &mut gfx);
        assert!(remote.is_offline_only());
        assert_eq!(remote.cache_auto_refresh_interval(), 30_000);
        assert_eq!(remote.refreshes(), 0);
        assert!(control.take_pending().is_none());
    }

    #[test]
    fn cache_refresh_refetches_resident_tiles() {
        let factory = factory();
        let mut layer = layer(dataset().remote(), &factory);
        let mut gfx = RecordingContext::new();
        let mut view = view();
        frame(&mut layer, &mut view, &mut gfx);
        frame(&mut layer, &mut view, &mut gfx);
        let source = factory.last_opened().unwrap();
        let root = TileIndex::new(0, 0, 0);
        assert_eq!(source.read_count(root), 1);

        layer.client_control().unwrap().refresh_cache();
        for _ in 0..3 {
            frame(&mut layer, &mut view, &mut gfx);
        }
        assert_eq!(source.memory_control().unwrap().refreshes(), 1);
        assert!(source.read_count(root) >= 2);
        assert_eq!(layer.state(), TileState::Resolved);
    }

    #[test]
    fn raster_data_is_available_inside_the_bounds() {
        let factory = factory();
        let mut layer = layer(dataset(), &factory);
        assert!(layer.access_raster_data(GeoPoint::new(0.5, 0.5)).is_none());

        let mut gfx = RecordingContext::new();
        layer.draw(&view(), &mut gfx);
        let pair = layer.access_raster_data(GeoPoint::new(0.5, 0.5)).unwrap();
        assert_eq!(pair.gsd(), 1.0);
        assert!(layer.access_raster_data(GeoPoint::new(5.0, 0.5)).is_none());
    }

    #[test]
    fn release_frees_textures_and_reinitializes() {
        let factory = factory();
        let mut options = RasterLayerOptions::default();
        options.texture_cache_enabled = false;
        options.quadtree.loading_texture_enabled = true;
        let mut layer = TiledRasterLayer::new(
            3,
            dataset(),
            factory.clone() as Arc<dyn TileSourceFactory>,
            options,
            RenderGlobals::new(),
        );
        let mut gfx = RecordingContext::new();
        let mut view = view();
        frame(&mut layer, &mut view, &mut gfx);
        frame(&mut layer, &mut view, &mut gfx);
        assert!(gfx.live_textures() > 0);

        layer.release(&mut gfx);
        assert!(layer.quadtree().is_none());
        assert_eq!(gfx.live_textures(), 0);
        assert_eq!(layer.state(), TileState::Resolved);

        frame(&mut layer, &mut view, &mut gfx);
        assert_eq!(factory.open_count(), 2);
    }

    #[test]
    fn options_load_from_partial_json() {
        let json = r#"{"relative_scale": 1.5, "quadtree": {"fade_timer_limit_ms": 250}}"#;
        let options = RasterLayerOptions::from_json_str(json).unwrap();
        assert_eq!(options.relative_scale, 1.5);
        assert!(options.texture_cache_enabled);
        assert_eq!(options.quadtree.fade_timer_limit_ms, 250);
        assert_eq!(options.quadtree.max_grid_size, QuadtreeOptions::default().max_grid_size);

        let json = serde_json::to_string(&options).unwrap();
        assert_eq!(RasterLayerOptions::from_json_str(&json).unwrap(), options);
    }

    #[test]
    fn suspended_layer_resumes_its_reads() {
        let factory = factory();
        let mut layer = layer(dataset(), &factory);
        let mut gfx = RecordingContext::new();
        let mut view = view();
        // nothing to park before the first draw
        layer.suspend();
        layer.resume();

        let report = layer.draw(&view, &mut gfx).unwrap();
        view.advance();
        assert_eq!(report.fetches_issued, 1);
        let source = factory.last_opened().unwrap();
        let tile = TileIndex::new(0, 0, 0);

        layer.suspend();
        layer.quadtree().unwrap().reader().run_pending();
        assert_eq!(source.read_count(tile), 0);
        // parked reads are not restarted while suspended
        assert_eq!(frame(&mut layer, &mut view, &mut gfx).unwrap().fetches_issued, 0);
        assert_eq!(source.read_count(tile), 0);

        layer.resume();
        assert_eq!(frame(&mut layer, &mut view, &mut gfx).unwrap().fetches_issued, 1);
        let report = frame(&mut layer, &mut view, &mut gfx).unwrap();
        assert_eq!(report.state, TileState::Resolved);
        assert_eq!(layer.state(), TileState::Resolved);
        assert_eq!(source.read_count(tile), 1);
    }
}

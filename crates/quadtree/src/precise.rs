use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use foundation::{GeoPoint, Vec2};
use gpu::{GraphicsContext, TextureId};
use parking_lot::{Condvar, Mutex};
use runtime::RenderSender;
use streaming::{CacheEntry, CacheOpaque, SharedTextureCache};
use thiserror::Error;
use tracing::{debug, warn};

use crate::events::TreeEvent;
use crate::grid::GridVertex;
use crate::node::NodeId;
use crate::projection::ProjectionPair;
use crate::resolver::{NodeGridInfo, VertexResolver, unprojectable};
use crate::view::MapView;

/// Integer full-resolution image coordinate.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImagePoint {
    pub y: i64,
    pub x: i64,
}

impl ImagePoint {
    pub fn new(x: i64, y: i64) -> Self {
        Self { y, x }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlobError {
    #[error("precise point blob truncated: needed {needed} bytes, have {len}")]
    Truncated { needed: usize, len: usize },
    #[error("precise point blob has negative record count {0}")]
    NegativeCount(i32),
}

const PRECISE_RECORD_LEN: usize = 32;
const UNRESOLVABLE_RECORD_LEN: usize = 16;

/// Little-endian blob of resolved and unresolvable points.
pub fn encode_points(
    precise: &BTreeMap<ImagePoint, GeoPoint>,
    unresolvable: &BTreeSet<ImagePoint>,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        8 + precise.len() * PRECISE_RECORD_LEN + unresolvable.len() * UNRESOLVABLE_RECORD_LEN,
    );
    out.extend_from_slice(&(precise.len() as i32).to_le_bytes());
    for (p, g) in precise {
        out.extend_from_slice(&p.x.to_le_bytes());
        out.extend_from_slice(&p.y.to_le_bytes());
        out.extend_from_slice(&g.lat.to_le_bytes());
        out.extend_from_slice(&g.lon.to_le_bytes());
    }
    out.extend_from_slice(&(unresolvable.len() as i32).to_le_bytes());
    for p in unresolvable {
        out.extend_from_slice(&p.x.to_le_bytes());
        out.extend_from_slice(&p.y.to_le_bytes());
    }
    out
}

pub type DecodedPoints = (Vec<(ImagePoint, GeoPoint)>, Vec<ImagePoint>);

pub fn decode_points(data: &[u8]) -> Result<DecodedPoints, BlobError> {
    let mut reader = BlobReader { data, at: 0 };
    let n = reader.count()?;
    reader.require(n * PRECISE_RECORD_LEN)?;
    let mut precise = Vec::with_capacity(n);
    for _ in 0..n {
        let x = reader.i64()?;
        let y = reader.i64()?;
        let lat = reader.f64()?;
        let lon = reader.f64()?;
        precise.push((ImagePoint::new(x, y), GeoPoint::new(lat, lon)));
    }
    let n = reader.count()?;
    reader.require(n * UNRESOLVABLE_RECORD_LEN)?;
    let mut unresolvable = Vec::with_capacity(n);
    for _ in 0..n {
        let x = reader.i64()?;
        let y = reader.i64()?;
        unresolvable.push(ImagePoint::new(x, y));
    }
    Ok((precise, unresolvable))
}

struct BlobReader<'a> {
    data: &'a [u8],
    at: usize,
}

impl BlobReader<'_> {
    fn require(&self, len: usize) -> Result<(), BlobError> {
        let needed = self.at + len;
        if needed > self.data.len() {
            return Err(BlobError::Truncated {
                needed,
                len: self.data.len(),
            });
        }
        Ok(())
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], BlobError> {
        self.require(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.at..self.at + N]);
        self.at += N;
        Ok(out)
    }

    fn count(&mut self) -> Result<usize, BlobError> {
        let n = i32::from_le_bytes(self.take()?);
        usize::try_from(n).map_err(|_| BlobError::NegativeCount(n))
    }

    fn i64(&mut self) -> Result<i64, BlobError> {
        Ok(i64::from_le_bytes(self.take()?))
    }

    fn f64(&mut self) -> Result<f64, BlobError> {
        Ok(f64::from_le_bytes(self.take()?))
    }
}

#[derive(Debug, Default)]
struct PointCache {
    queue: VecDeque<ImagePoint>,
    pending: BTreeSet<ImagePoint>,
    unresolvable: BTreeSet<ImagePoint>,
    precise: BTreeMap<ImagePoint, GeoPoint>,
    worker_running: bool,
    shutdown: bool,
}

impl PointCache {
    fn merge(&mut self, (precise, unresolvable): DecodedPoints) -> usize {
        let n = precise.len() + unresolvable.len();
        for (p, g) in precise {
            self.precise.insert(p, g);
        }
        self.unresolvable.extend(unresolvable);
        let PointCache {
            queue,
            pending,
            precise,
            unresolvable,
            ..
        } = self;
        queue.retain(|p| !precise.contains_key(p) && !unresolvable.contains(p));
        pending.retain(|p| !precise.contains_key(p) && !unresolvable.contains(p));
        n
    }
}

struct Shared {
    cache: Mutex<PointCache>,
    ready: Condvar,
    projection: Arc<ProjectionPair>,
    events: RenderSender<TreeEvent>,
    invalidation_posted: AtomicBool,
}

impl Shared {
    fn notify_invalid(&self) {
        if self.invalidation_posted.swap(true, Ordering::AcqRel) {
            return;
        }
        if !self.events.try_post(TreeEvent::VerticesInvalid) {
            self.invalidation_posted.store(false, Ordering::Release);
        }
    }
}

fn run_worker(shared: Arc<Shared>) {
    debug!("precise vertex worker started");
    let mut finished: Option<(ImagePoint, Option<GeoPoint>)> = None;
    loop {
        let next = {
            let mut cache = shared.cache.lock();
            if let Some((p, result)) = finished.take() {
                match result {
                    Some(g) => {
                        cache.precise.insert(p, g);
                    }
                    None => {
                        cache.unresolvable.insert(p);
                    }
                }
                cache.pending.remove(&p);
                shared.notify_invalid();
            }
            loop {
                if cache.shutdown {
                    cache.worker_running = false;
                    debug!("precise vertex worker stopped");
                    return;
                }
                if let Some(p) = cache.queue.pop_front() {
                    break p;
                }
                shared.ready.wait(&mut cache);
            }
        };
        let result = shared
            .projection
            .image_to_ground(Vec2::new(next.x as f64, next.y as f64), true)
            .filter(|r| r.precise && r.value.is_finite())
            .map(|r| r.value);
        finished = Some((next, result));
    }
}

/// Grid width a node at `level` may be refined to, from `cap` at level 0
/// down by a factor of four per level.
pub fn refine_target(cap: u32, level: u32) -> u32 {
    let cap = cap.max(1);
    let shift = (level.saturating_mul(2)).min(cap.ilog2());
    (cap >> shift).max(1)
}

/// Refines mesh vertices with the precise projection on a background
/// thread.
///
/// Misses are queued for the worker and answered immediately with an
/// estimate interpolated from cached neighbours, or with the imprecise
/// projection. Once no node drawn in a pump waits on points, the coarsest
/// grids are doubled. Resolved points survive the resolver through the
/// texture cache under `"{uri},coords"`.
pub struct PreciseVertexResolver {
    shared: Arc<Shared>,
    cache_key: String,
    texture_cache: Option<SharedTextureCache<TextureId>>,
    refine_cap: u32,
    initialized: bool,
    current_node: Option<NodeGridInfo>,
    current_request: BTreeSet<ImagePoint>,
    request_nodes: BTreeMap<NodeId, NodeGridInfo>,
    requested: usize,
    needs_resolved: usize,
    nodes_pending: usize,
    worker: Option<JoinHandle<()>>,
}

impl PreciseVertexResolver {
    pub fn new(
        uri: &str,
        width: u64,
        height: u64,
        projection: Arc<ProjectionPair>,
        texture_cache: Option<SharedTextureCache<TextureId>>,
        events: RenderSender<TreeEvent>,
        refine_cap: u32,
    ) -> Self {
        let mut cache = PointCache::default();
        let (w, h) = (width as i64, height as i64);
        // raster corners are exact by definition
        for p in [
            ImagePoint::new(0, 0),
            ImagePoint::new(w, 0),
            ImagePoint::new(w, h),
            ImagePoint::new(0, h),
        ] {
            if let Some(g) = projection
                .imprecise()
                .image_to_ground(Vec2::new(p.x as f64, p.y as f64))
            {
                cache.precise.insert(p, g);
            }
        }
        Self {
            shared: Arc::new(Shared {
                cache: Mutex::new(cache),
                ready: Condvar::new(),
                projection,
                events,
                invalidation_posted: AtomicBool::new(false),
            }),
            cache_key: format!("{uri},coords"),
            texture_cache,
            refine_cap: refine_cap.max(1),
            initialized: false,
            current_node: None,
            current_request: BTreeSet::new(),
            request_nodes: BTreeMap::new(),
            requested: 0,
            needs_resolved: 0,
            nodes_pending: 0,
            worker: None,
        }
    }

    pub fn precise_count(&self) -> usize {
        self.shared.cache.lock().precise.len()
    }

    pub fn pending_count(&self) -> usize {
        self.shared.cache.lock().pending.len()
    }

    pub fn is_precise(&self, p: ImagePoint) -> bool {
        self.shared.cache.lock().precise.contains_key(&p)
    }

    /// Resolves every queued point on the calling thread. Used by headless
    /// hosts in place of the worker.
    pub fn resolve_pending(&self) -> usize {
        let mut done = 0;
        loop {
            let Some(p) = self.shared.cache.lock().queue.pop_front() else {
                break;
            };
            let result = self
                .shared
                .projection
                .image_to_ground(Vec2::new(p.x as f64, p.y as f64), true)
                .filter(|r| r.precise && r.value.is_finite())
                .map(|r| r.value);
            let mut cache = self.shared.cache.lock();
            match result {
                Some(g) => {
                    cache.precise.insert(p, g);
                }
                None => {
                    cache.unresolvable.insert(p);
                }
            }
            cache.pending.remove(&p);
            done += 1;
        }
        if done > 0 {
            self.shared.notify_invalid();
        }
        done
    }

    fn load_cached(&mut self, cache: &mut PointCache) {
        self.initialized = true;
        let Some(texture_cache) = &self.texture_cache else {
            return;
        };
        let Some(entry) = texture_cache.lock().remove(&self.cache_key) else {
            return;
        };
        let CacheOpaque::Blob(data) = entry.opaque else {
            return;
        };
        match decode_points(&data) {
            Ok(points) => {
                let n = cache.merge(points);
                debug!("loaded {n} cached precise points for {}", self.cache_key);
            }
            Err(err) => warn!("discarding cached precise points for {}: {err}", self.cache_key),
        }
    }

    fn request(&mut self, shared: &Arc<Shared>, cache: &mut PointCache, p: ImagePoint) {
        if cache.unresolvable.contains(&p) {
            return;
        }
        self.needs_resolved += 1;
        self.current_request.insert(p);
        if cache.pending.insert(p) {
            cache.queue.push_back(p);
        }
        if !cache.worker_running {
            let worker_shared = Arc::clone(shared);
            match std::thread::Builder::new()
                .name("precise-vertex-resolver".into())
                .spawn(move || run_worker(worker_shared))
            {
                Ok(handle) => {
                    cache.worker_running = true;
                    self.worker = Some(handle);
                }
                Err(err) => warn!("failed to start precise vertex worker: {err}"),
            }
        }
        shared.ready.notify_one();
    }

    fn interpolate(&self, cache: &PointCache, p: ImagePoint) -> Option<GeoPoint> {
        let node = self.current_node?;
        let dx = (node.src_width / node.grid_width.max(1) as u64) as i64;
        let dy = (node.src_height / node.grid_height.max(1) as u64) as i64;
        let midpoint = |a: ImagePoint, b: ImagePoint| {
            let (a, b) = (cache.precise.get(&a)?, cache.precise.get(&b)?);
            Some(GeoPoint::new((a.lat + b.lat) / 2.0, (a.lon + b.lon) / 2.0))
        };
        midpoint(ImagePoint::new(p.x - dx, p.y), ImagePoint::new(p.x + dx, p.y))
            .or_else(|| midpoint(ImagePoint::new(p.x, p.y - dy), ImagePoint::new(p.x, p.y + dy)))
            .or_else(|| {
                midpoint(
                    ImagePoint::new(p.x - dx, p.y - dy),
                    ImagePoint::new(p.x + dx, p.y + dy),
                )
            })
    }

    fn imprecise(&self, x: i64, y: i64) -> GridVertex {
        let value = self
            .shared
            .projection
            .imprecise()
            .image_to_ground(Vec2::new(x as f64, y as f64))
            .unwrap_or_else(unprojectable);
        GridVertex::new(value, false)
    }
}

impl VertexResolver for PreciseVertexResolver {
    fn begin_draw(&mut self, _view: &MapView) {
        self.current_request.clear();
        self.nodes_pending = 0;
    }

    fn end_draw(&mut self, view: &MapView) -> Vec<NodeId> {
        let mut expand = Vec::new();
        if !view.targeting && self.nodes_pending == 0 {
            let min_width = self
                .request_nodes
                .values()
                .map(|n| n.grid_width)
                .fold(self.refine_cap, u32::min);
            for n in self.request_nodes.values() {
                if n.grid_width > min_width {
                    continue;
                }
                if n.grid_width < refine_target(self.refine_cap, n.tile.level) {
                    expand.push(n.node);
                }
            }
        }
        self.request_nodes.clear();

        let mut cache = self.shared.cache.lock();
        let requested = &self.current_request;
        cache.queue.retain(|p| requested.contains(p));
        cache.pending.retain(|p| requested.contains(p));
        drop(cache);
        self.current_request.clear();
        expand
    }

    fn begin_node(&mut self, node: &NodeGridInfo) {
        self.current_node = Some(*node);
        self.needs_resolved = 0;
        self.requested = 0;
        self.request_nodes.insert(node.node, *node);
    }

    fn end_node(&mut self, _node: &NodeGridInfo) {
        self.current_node = None;
        if self.requested > 0 && self.needs_resolved > 0 {
            self.nodes_pending += 1;
        }
    }

    fn project(&mut self, view: &MapView, x: i64, y: i64) -> GridVertex {
        if view.targeting {
            return self.imprecise(x, y);
        }
        self.requested += 1;
        let p = ImagePoint::new(x, y);
        let shared = Arc::clone(&self.shared);
        let mut cache = shared.cache.lock();
        if !self.initialized && !cache.precise.contains_key(&p) {
            self.load_cached(&mut cache);
        }
        if let Some(g) = cache.precise.get(&p) {
            return GridVertex::new(*g, true);
        }
        self.request(&shared, &mut cache, p);
        // kept until the next VerticesInvalid clears the mesh
        if let Some(g) = self.interpolate(&cache, p) {
            return GridVertex::new(g, true);
        }
        drop(cache);
        self.imprecise(x, y)
    }

    fn vertices_refreshed(&mut self) {
        self.shared
            .invalidation_posted
            .store(false, Ordering::Release);
    }

    fn release(&mut self, gfx: &mut dyn GraphicsContext) {
        let mut cache = self.shared.cache.lock();
        cache.shutdown = true;
        cache.queue.clear();
        cache.pending.clear();
        self.shared.ready.notify_all();

        if let Some(texture_cache) = &self.texture_cache {
            if cache.precise.len() > 4 || !cache.unresolvable.is_empty() {
                let blob = encode_points(&cache.precise, &cache.unresolvable);
                debug!(
                    "storing {} precise and {} unresolvable points for {}",
                    cache.precise.len(),
                    cache.unresolvable.len(),
                    self.cache_key
                );
                match texture_cache
                    .lock()
                    .put(self.cache_key.clone(), CacheEntry::blob(blob))
                {
                    Ok(evicted) => {
                        for (_, entry) in evicted {
                            if let Some(tex) = entry.texture {
                                gfx.delete_texture(tex);
                            }
                        }
                    }
                    Err(err) => warn!("precise points for {} not cached: {err}", self.cache_key),
                }
            }
        }
        cache.precise.clear();
        cache.unresolvable.clear();
        drop(cache);
        self.initialized = false;

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("precise vertex worker panicked");
            }
        }
    }
}

impl Drop for PreciseVertexResolver {
    fn drop(&mut self) {
        self.shared.cache.lock().shutdown = true;
        self.shared.ready.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Arc;

    use super::{
        BlobError, ImagePoint, PreciseVertexResolver, decode_points, encode_points, refine_target,
    };
    use crate::events::TreeEvent;
    use crate::node::NodeId;
    use crate::projection::{CornerProjection, ProjectionPair, RasterCorners};
    use crate::resolver::{NodeGridInfo, VertexResolver};
    use crate::view::MapView;
    use foundation::{GeoBounds, GeoPoint, Handle};
    use gpu::{RecordingContext, TextureId};
    use runtime::RenderQueue;
    use streaming::{TextureCache, TileIndex};

    fn pair() -> Arc<ProjectionPair> {
        let corners = RasterCorners {
            upper_left: GeoPoint::new(1.0, 0.0),
            upper_right: GeoPoint::new(1.0, 1.0),
            lower_right: GeoPoint::new(0.0, 1.0),
            lower_left: GeoPoint::new(0.0, 0.0),
        };
        let proj = Arc::new(CornerProjection::new(256, 256, corners).unwrap());
        Arc::new(ProjectionPair::new(
            proj.clone(),
            Some(proj),
            400.0,
            256,
            256,
            8.0,
        ))
    }

    fn info(grid: u32) -> NodeGridInfo {
        NodeGridInfo {
            node: NodeId(Handle::new(0, 0)),
            tile: TileIndex::new(0, 0, 0),
            src_width: 256,
            src_height: 256,
            grid_width: grid,
            grid_height: grid,
        }
    }

    fn view() -> MapView {
        MapView::new(GeoBounds::new(0.0, 0.0, 1.0, 1.0), 400.0)
    }

    #[test]
    fn refine_target_drops_by_four_per_level() {
        assert_eq!(refine_target(16, 0), 16);
        assert_eq!(refine_target(16, 1), 4);
        assert_eq!(refine_target(16, 2), 1);
        assert_eq!(refine_target(16, 9), 1);
        assert_eq!(refine_target(1, 0), 1);
    }

    #[test]
    fn blob_round_trip_and_truncation() {
        let mut precise = BTreeMap::new();
        precise.insert(ImagePoint::new(3, 4), GeoPoint::new(1.5, -2.5));
        let mut unresolvable = BTreeSet::new();
        unresolvable.insert(ImagePoint::new(-1, 9));
        let blob = encode_points(&precise, &unresolvable);
        assert_eq!(blob.len(), 4 + 32 + 4 + 16);
        let (p, u) = decode_points(&blob).unwrap();
        assert_eq!(p, vec![(ImagePoint::new(3, 4), GeoPoint::new(1.5, -2.5))]);
        assert_eq!(u, vec![ImagePoint::new(-1, 9)]);

        assert!(matches!(
            decode_points(&blob[..20]),
            Err(BlobError::Truncated { .. })
        ));
        assert_eq!(
            decode_points(&(-2i32).to_le_bytes()),
            Err(BlobError::NegativeCount(-2))
        );
    }

    #[test]
    fn corners_are_seeded_as_precise() {
        let q = RenderQueue::<TreeEvent>::bounded(8);
        let resolver = PreciseVertexResolver::new("mem://a", 256, 256, pair(), None, q.sender(), 16);
        assert_eq!(resolver.precise_count(), 4);
        assert!(resolver.is_precise(ImagePoint::new(256, 256)));
    }

    #[test]
    fn fully_precise_grid_is_expanded() {
        let q = RenderQueue::<TreeEvent>::bounded(8);
        let mut resolver =
            PreciseVertexResolver::new("mem://a", 256, 256, pair(), None, q.sender(), 16);
        let view = view();
        resolver.begin_draw(&view);
        resolver.begin_node(&info(1));
        for (x, y) in [(0, 0), (256, 0), (0, 256), (256, 256)] {
            assert!(resolver.project(&view, x, y).resolved);
        }
        resolver.end_node(&info(1));
        assert_eq!(resolver.end_draw(&view), vec![NodeId(Handle::new(0, 0))]);
    }

    #[test]
    fn pending_points_block_expansion_and_interpolate() {
        let q = RenderQueue::<TreeEvent>::bounded(8);
        let mut resolver =
            PreciseVertexResolver::new("mem://a", 256, 256, pair(), None, q.sender(), 16);
        let view = view();
        resolver.begin_draw(&view);
        resolver.begin_node(&info(2));
        // midpoint of the top edge sits between two seeded corners
        let v = resolver.project(&view, 128, 0);
        assert!(v.resolved);
        assert!((v.value.lon - 0.5).abs() < 1e-9);
        resolver.end_node(&info(2));
        assert!(resolver.end_draw(&view).is_empty());
        resolver.release(&mut RecordingContext::new());
    }

    #[test]
    fn targeting_skips_refinement() {
        let q = RenderQueue::<TreeEvent>::bounded(8);
        let mut resolver =
            PreciseVertexResolver::new("mem://a", 256, 256, pair(), None, q.sender(), 16);
        let view = view().with_targeting(true);
        resolver.begin_draw(&view);
        resolver.begin_node(&info(1));
        assert!(!resolver.project(&view, 0, 0).resolved);
        resolver.end_node(&info(1));
        assert!(resolver.end_draw(&view).is_empty());
        assert_eq!(resolver.pending_count(), 0);
    }

    #[test]
    fn resolved_points_survive_through_cache() {
        let texture_cache = TextureCache::<TextureId>::shared(1 << 20);
        let q = RenderQueue::<TreeEvent>::bounded(8);
        let mut gfx = RecordingContext::new();
        let view = view();

        let mut first = PreciseVertexResolver::new(
            "mem://a",
            256,
            256,
            pair(),
            Some(texture_cache.clone()),
            q.sender(),
            16,
        );
        // keep the worker from starting so points resolve on this thread
        first.shared.cache.lock().worker_running = true;
        first.begin_draw(&view);
        first.begin_node(&info(2));
        first.project(&view, 128, 128);
        first.end_node(&info(2));
        assert_eq!(first.resolve_pending(), 1);
        assert!(first.is_precise(ImagePoint::new(128, 128)));
        assert_eq!(q.try_recv(), Some(TreeEvent::VerticesInvalid));
        first.release(&mut gfx);
        assert!(texture_cache.lock().contains("mem://a,coords"));

        let mut second = PreciseVertexResolver::new(
            "mem://a",
            256,
            256,
            pair(),
            Some(texture_cache.clone()),
            q.sender(),
            16,
        );
        second.begin_draw(&view);
        second.begin_node(&info(2));
        assert!(second.project(&view, 128, 128).resolved);
        second.end_node(&info(2));
        assert!(!texture_cache.lock().contains("mem://a,coords"));
    }
}

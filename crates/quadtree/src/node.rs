use foundation::{GeoBounds, GeoPoint, Handle, Vec2};
use gpu::{BufferId, Filter, TextureFormat, TextureId};
use streaming::{ReadRequest, TileGeometry, TileIndex, TileSource};

use crate::grid::GridVertex;
use crate::options::QuadtreeOptions;
use crate::projection::DatasetProjection;
use crate::resolver::NodeGridInfo;
use crate::state::TileState;

/// Arena address of a node within its tree.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub Handle);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node{}", self.0)
    }
}

/// Full-resolution pixel rectangle `[x, x + width) x [y, y + height)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SourceRect {
    pub x: u64,
    pub y: u64,
    pub width: u64,
    pub height: u64,
}

impl SourceRect {
    fn corners(&self) -> [Vec2; 4] {
        let (x0, y0) = (self.x as f64, self.y as f64);
        let (x1, y1) = ((self.x + self.width) as f64, (self.y + self.height) as f64);
        [
            Vec2::new(x0, y0),
            Vec2::new(x1, y0),
            Vec2::new(x1, y1),
            Vec2::new(x0, y1),
        ]
    }

    pub(crate) fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x as f64
            && y >= self.y as f64
            && x < (self.x + self.width) as f64
            && y < (self.y + self.height) as f64
    }

    pub(crate) fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }

    fn geo_bounds(&self, projection: &dyn DatasetProjection) -> GeoBounds {
        let points = self
            .corners()
            .into_iter()
            .filter_map(|p| projection.image_to_ground(p))
            .map(|g| (g.lon, g.lat));
        GeoBounds::from_points(points).unwrap_or(GeoBounds::new(0.0, 0.0, 0.0, 0.0))
    }
}

/// Node texture format: the source format, unless a non-RGBA format would
/// need a non-power-of-two texture.
pub fn tile_texture_format(source: TextureFormat, width: u32, height: u32) -> TextureFormat {
    if source == TextureFormat::Rgba || (width.is_power_of_two() && height.is_power_of_two()) {
        source
    } else {
        TextureFormat::Rgba
    }
}

/// Grid cells per side for a tile spanning the given extent in degrees.
pub fn grid_size(bounds: &GeoBounds, options: &QuadtreeOptions) -> u32 {
    let min = options.min_grid_size.max(1);
    let max = options.max_grid_size.max(min);
    let deg = options.grid_sample_distance_deg;
    let subdivisions = |span: f64| {
        let cells = if deg > 0.0 && span.is_finite() {
            (span.abs() / deg).ceil().clamp(1.0, f64::from(max))
        } else {
            1.0
        };
        (cells as u32).next_power_of_two().clamp(min, max)
    };
    let lat = subdivisions(bounds.max_lat - bounds.min_lat);
    let lon = subdivisions(bounds.max_lon - bounds.min_lon);
    lat.max(lon)
}

/// One tile of the quadtree.
///
/// Geometry is fixed when the node is created; everything else changes as
/// the node resolves, borrows, and is drawn.
pub(crate) struct TileNode {
    pub(crate) tile: TileIndex,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: [Option<NodeId>; 4],

    pub(crate) src: SourceRect,
    pub(crate) tile_width: u32,
    pub(crate) tile_height: u32,
    pub(crate) bounds: GeoBounds,
    pub(crate) centroid: GeoPoint,
    pub(crate) child_bounds: [Option<GeoBounds>; 4],

    pub(crate) state: TileState,
    pub(crate) tile_version: i64,
    pub(crate) received_update: bool,
    pub(crate) derived_unresolvable_data: bool,
    pub(crate) touched: bool,
    pub(crate) last_touch: Option<u64>,
    pub(crate) current_request: Option<ReadRequest>,
    pub(crate) read_start_s: f64,
    pub(crate) read_elapsed_ms: f64,
    pub(crate) fade_timer_ms: f64,

    pub(crate) texture_format: TextureFormat,
    pub(crate) texture: Option<TextureId>,
    pub(crate) filter: Option<(Filter, Filter)>,
    pub(crate) composite_nearest: bool,

    pub(crate) grid_width: u32,
    pub(crate) grid_height: u32,
    pub(crate) vertices: Vec<Option<GridVertex>>,
    pub(crate) vertex_buffer: Option<BufferId>,
    pub(crate) origin: [f64; 3],
    pub(crate) vertices_valid: bool,
    pub(crate) vertex_srid: Option<i32>,
    pub(crate) tex_coords: Option<BufferId>,
    pub(crate) tex_coords_shared: bool,
    pub(crate) indices: Option<BufferId>,
    pub(crate) indices_shared: bool,
    pub(crate) tex_coords_valid: bool,

    pub(crate) borrowing_from: Option<NodeId>,
    pub(crate) borrow_tex_coords: Option<BufferId>,
}

impl TileNode {
    pub(crate) fn new(
        source: &dyn TileSource,
        projection: &dyn DatasetProjection,
        options: &QuadtreeOptions,
        tile: TileIndex,
        parent: Option<NodeId>,
    ) -> Self {
        let TileIndex { col, row, level } = tile;
        let src = SourceRect {
            x: source.tile_source_x(level, col),
            y: source.tile_source_y(level, row),
            width: source.tile_source_width(level, col),
            height: source.tile_source_height(level, row),
        };
        let tile_width = source.tile_width_at(level, col);
        let tile_height = source.tile_height_at(level, row);
        let bounds = src.geo_bounds(projection);
        let centroid = projection
            .image_to_ground(Vec2::new(
                src.x as f64 + src.width as f64 / 2.0,
                src.y as f64 + src.height as f64 / 2.0,
            ))
            .unwrap_or_else(|| {
                let (lon, lat) = bounds.center();
                GeoPoint::new(lat, lon)
            });

        let mut child_bounds = [None; 4];
        for (i, slot) in child_bounds.iter_mut().enumerate() {
            *slot = child_rect(source, tile, src, tile_width, tile_height, i)
                .map(|r| r.geo_bounds(projection));
        }

        let grid = grid_size(&bounds, options);
        let format = tile_texture_format(
            crate::texture::source_texture_format(source.format()),
            tile_width,
            tile_height,
        );

        Self {
            tile,
            parent,
            children: [None; 4],
            src,
            tile_width,
            tile_height,
            bounds,
            centroid,
            child_bounds,
            state: TileState::Unresolved,
            tile_version: -1,
            received_update: false,
            derived_unresolvable_data: false,
            touched: false,
            last_touch: None,
            current_request: None,
            read_start_s: 0.0,
            read_elapsed_ms: 0.0,
            fade_timer_ms: 0.0,
            texture_format: format,
            texture: None,
            filter: None,
            composite_nearest: false,
            grid_width: grid,
            grid_height: grid,
            vertices: vec![None; vertex_count(grid, grid)],
            vertex_buffer: None,
            origin: [0.0; 3],
            vertices_valid: false,
            vertex_srid: None,
            tex_coords: None,
            tex_coords_shared: false,
            indices: None,
            indices_shared: false,
            tex_coords_valid: false,
            borrowing_from: None,
            borrow_tex_coords: None,
        }
    }

    pub(crate) fn grid_info(&self, id: NodeId) -> NodeGridInfo {
        NodeGridInfo {
            node: id,
            tile: self.tile,
            src_width: self.src.width,
            src_height: self.src.height,
            grid_width: self.grid_width,
            grid_height: self.grid_height,
        }
    }

    pub(crate) fn child_tile(&self, i: usize) -> Option<TileIndex> {
        self.tile.child(i)
    }

    /// Doubles the mesh density; the next draw re-samples every vertex.
    pub(crate) fn expand_grid(&mut self) {
        self.grid_width *= 2;
        self.grid_height *= 2;
        self.vertices = vec![None; vertex_count(self.grid_width, self.grid_height)];
        self.vertices_valid = false;
        self.tex_coords_valid = false;
        self.borrowing_from = None;
    }

    pub(crate) fn invalidate_vertices(&mut self) {
        self.vertices.iter_mut().for_each(|v| *v = None);
        self.vertices_valid = false;
    }

    pub(crate) fn has_data(&self) -> bool {
        self.texture.is_some() && (self.state == TileState::Resolved || self.received_update)
    }
}

pub(crate) fn vertex_count(grid_width: u32, grid_height: u32) -> usize {
    (grid_width as usize + 1) * (grid_height as usize + 1)
}

/// Source extent of child `i` (UL, UR, LL, LR), or `None` when the tile is
/// narrow or short enough that the child is absent.
fn child_rect(
    source: &dyn TileSource,
    tile: TileIndex,
    src: SourceRect,
    tile_width: u32,
    tile_height: u32,
    i: usize,
) -> Option<SourceRect> {
    if tile.level == 0 {
        return None;
    }
    let half_width = source.tile_width() / 2;
    let half_height = source.tile_height() / 2;
    let skip_right = tile_width <= half_width;
    let skip_bottom = tile_height <= half_height;
    let (tx, ty) = (i % 2, i / 2);
    if (tx == 1 && skip_right) || (ty == 1 && skip_bottom) {
        return None;
    }

    let mid_x = if skip_right {
        src.x + src.width / 2
    } else {
        src.x + ((source.tile_width() as u64) << (tile.level - 1))
    };
    let mid_y = if skip_bottom {
        src.y + src.height / 2
    } else {
        src.y + ((source.tile_height() as u64) << (tile.level - 1))
    };
    let right = src.x + src.width;
    let bottom = src.y + src.height;

    let (x0, x1) = match (tx, skip_right) {
        (0, true) => (src.x, right),
        (0, false) => (src.x, mid_x),
        _ => (mid_x, right),
    };
    let (y0, y1) = match (ty, skip_bottom) {
        (0, true) => (src.y, bottom),
        (0, false) => (src.y, mid_y),
        _ => (mid_y, bottom),
    };
    Some(SourceRect {
        x: x0,
        y: y0,
        width: x1.saturating_sub(x0),
        height: y1.saturating_sub(y0),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{SourceRect, TileNode, child_rect, grid_size, tile_texture_format};
    use crate::options::QuadtreeOptions;
    use crate::projection::{CornerProjection, RasterCorners};
    use foundation::{GeoBounds, GeoPoint};
    use gpu::TextureFormat;
    use streaming::{MemoryTileSource, PixelFormat, TileIndex};

    fn source(width: u64, height: u64) -> Arc<MemoryTileSource> {
        Arc::new(MemoryTileSource::new(
            "mem://node",
            width,
            height,
            256,
            PixelFormat::Rgb,
            true,
        ))
    }

    fn projection(width: u64, height: u64) -> CornerProjection {
        CornerProjection::new(
            width,
            height,
            RasterCorners {
                upper_left: GeoPoint::new(10.0, 0.0),
                upper_right: GeoPoint::new(10.0, 10.0),
                lower_right: GeoPoint::new(0.0, 10.0),
                lower_left: GeoPoint::new(0.0, 0.0),
            },
        )
        .unwrap()
    }

    #[test]
    fn non_rgba_npot_tiles_fall_back_to_rgba() {
        assert_eq!(tile_texture_format(TextureFormat::Rgb, 256, 256), TextureFormat::Rgb);
        assert_eq!(tile_texture_format(TextureFormat::Rgb, 200, 256), TextureFormat::Rgba);
        assert_eq!(tile_texture_format(TextureFormat::Rgba, 200, 100), TextureFormat::Rgba);
    }

    #[test]
    fn grid_size_follows_sample_distance() {
        let options = QuadtreeOptions::default();
        // 0.125 degree samples over a 1 degree tile
        assert_eq!(grid_size(&GeoBounds::new(0.0, 0.0, 1.0, 0.1), &options), 8);
        assert_eq!(grid_size(&GeoBounds::new(0.0, 0.0, 0.01, 0.01), &options), 1);
        assert_eq!(grid_size(&GeoBounds::new(0.0, 0.0, 90.0, 45.0), &options), 32);
    }

    #[test]
    fn narrow_tiles_have_only_left_children() {
        let src = source(300, 1024);
        // level 1: 150 px wide, so one column of children
        let tile = TileIndex::new(0, 0, 1);
        let rect = SourceRect {
            x: 0,
            y: 0,
            width: 300,
            height: 512,
        };
        let left = child_rect(src.as_ref(), tile, rect, 150, 256, 0).unwrap();
        assert_eq!((left.x, left.width, left.height), (0, 300, 256));
        assert!(child_rect(src.as_ref(), tile, rect, 150, 256, 1).is_none());
        let lower = child_rect(src.as_ref(), tile, rect, 150, 256, 2).unwrap();
        assert_eq!((lower.y, lower.height), (256, 256));
        assert!(child_rect(src.as_ref(), tile, rect, 150, 256, 3).is_none());
    }

    #[test]
    fn root_geometry_spans_the_raster() {
        let src = source(1024, 1024);
        let node = TileNode::new(
            src.as_ref(),
            &projection(1024, 1024),
            &QuadtreeOptions::default(),
            TileIndex::new(0, 0, 2),
            None,
        );
        assert_eq!(node.src.width, 1024);
        assert_eq!((node.tile_width, node.tile_height), (256, 256));
        assert!((node.bounds.max_lon - 10.0).abs() < 1e-9);
        assert!((node.centroid.lat - 5.0).abs() < 1e-9);
        let ul = node.child_bounds[0].unwrap();
        assert!((ul.min_lat - 5.0).abs() < 1e-9 && (ul.max_lon - 5.0).abs() < 1e-9);
        assert_eq!(node.texture_format, TextureFormat::Rgb);
        assert_eq!(node.vertices.len(), 33 * 33);
    }
}

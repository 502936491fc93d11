use std::sync::Arc;

use foundation::{GeoPoint, Vec2};
use gpu::GraphicsContext;
use streaming::TileIndex;

use crate::grid::GridVertex;
use crate::node::NodeId;
use crate::projection::ProjectionPair;
use crate::view::MapView;

/// Mesh layout of the node whose vertices are being sampled.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct NodeGridInfo {
    pub node: NodeId,
    pub tile: TileIndex,
    pub src_width: u64,
    pub src_height: u64,
    pub grid_width: u32,
    pub grid_height: u32,
}

/// Computes ground positions for mesh vertices.
///
/// One resolver serves a whole tree. Every call happens on the render
/// thread: `begin_draw`/`end_draw` bracket a pump and `begin_node`/`end_node`
/// bracket the re-sampling of one node's grid.
pub trait VertexResolver: Send {
    fn begin_draw(&mut self, _view: &MapView) {}

    /// Returns the nodes whose grids should be refined before the next pump.
    fn end_draw(&mut self, _view: &MapView) -> Vec<NodeId> {
        Vec::new()
    }

    fn begin_node(&mut self, _node: &NodeGridInfo) {}

    fn end_node(&mut self, _node: &NodeGridInfo) {}

    /// Ground position of full-resolution image point `(x, y)`.
    fn project(&mut self, view: &MapView, x: i64, y: i64) -> GridVertex;

    /// Called once the render thread has re-sampled after a
    /// [`crate::TreeEvent::VerticesInvalid`].
    fn vertices_refreshed(&mut self) {}

    fn release(&mut self, _gfx: &mut dyn GraphicsContext) {}
}

pub(crate) fn unprojectable() -> GeoPoint {
    GeoPoint::new(f64::NAN, f64::NAN)
}

/// Samples the imprecise projection directly.
pub struct DefaultVertexResolver {
    projection: Arc<ProjectionPair>,
}

impl DefaultVertexResolver {
    pub fn new(projection: Arc<ProjectionPair>) -> Self {
        Self { projection }
    }
}

impl VertexResolver for DefaultVertexResolver {
    fn project(&mut self, _view: &MapView, x: i64, y: i64) -> GridVertex {
        let value = self
            .projection
            .imprecise()
            .image_to_ground(Vec2::new(x as f64, y as f64))
            .unwrap_or_else(unprojectable);
        GridVertex::new(value, false)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{DefaultVertexResolver, VertexResolver};
    use crate::projection::{CornerProjection, ProjectionPair, RasterCorners};
    use crate::view::MapView;
    use foundation::{GeoBounds, GeoPoint};

    #[test]
    fn default_resolver_uses_imprecise_projection() {
        let corners = RasterCorners {
            upper_left: GeoPoint::new(1.0, 0.0),
            upper_right: GeoPoint::new(1.0, 1.0),
            lower_right: GeoPoint::new(0.0, 1.0),
            lower_left: GeoPoint::new(0.0, 0.0),
        };
        let proj = CornerProjection::new(100, 100, corners).unwrap();
        let pair = ProjectionPair::new(Arc::new(proj), None, 1000.0, 50, 50, 8.0);
        let mut resolver = DefaultVertexResolver::new(Arc::new(pair));
        let view = MapView::new(GeoBounds::new(0.0, 0.0, 1.0, 1.0), 100.0);
        let v = resolver.project(&view, 50, 25);
        assert!((v.value.lon - 0.5).abs() < 1e-9);
        assert!((v.value.lat - 0.75).abs() < 1e-9);
        assert!(!v.resolved);
        assert!(resolver.end_draw(&view).is_empty());
    }
}

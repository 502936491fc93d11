use std::sync::Arc;

use foundation::{Equirectangular, GeoBounds, GeoPoint, MapProjection, SRID_ECEF};
use runtime::RenderPump;

/// What the hosting map view exposes to the renderer for one pump.
#[derive(Clone)]
pub struct MapView {
    pub pump: RenderPump,
    /// Visible lon/lat bounds; `max_lon > 180` when the view crosses the
    /// antimeridian eastward.
    pub bounds: GeoBounds,
    /// Ground meters per screen pixel.
    pub draw_resolution: f64,
    /// Camera focus on the ground.
    pub focus: GeoPoint,
    pub crosses_antimeridian: bool,
    /// High-precision point selection in progress.
    pub targeting: bool,
    pub projection: Arc<dyn MapProjection>,
}

impl std::fmt::Debug for MapView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapView")
            .field("pump", &self.pump)
            .field("bounds", &self.bounds)
            .field("draw_resolution", &self.draw_resolution)
            .field("focus", &self.focus)
            .field("crosses_antimeridian", &self.crosses_antimeridian)
            .field("targeting", &self.targeting)
            .field("srid", &self.projection.srid())
            .finish()
    }
}

impl MapView {
    /// Flat lon/lat view focused on the center of `bounds`.
    pub fn new(bounds: GeoBounds, draw_resolution: f64) -> Self {
        let (lon, lat) = bounds.center();
        Self {
            pump: RenderPump::default(),
            bounds,
            draw_resolution,
            focus: GeoPoint::new(lat, lon),
            crosses_antimeridian: bounds.max_lon > 180.0 || bounds.min_lon < -180.0,
            targeting: false,
            projection: Arc::new(Equirectangular),
        }
    }

    pub fn with_pump(mut self, pump: RenderPump) -> Self {
        self.pump = pump;
        self
    }

    pub fn with_projection(mut self, projection: Arc<dyn MapProjection>) -> Self {
        self.projection = projection;
        self
    }

    pub fn with_focus(mut self, focus: GeoPoint) -> Self {
        self.focus = focus;
        self
    }

    pub fn with_targeting(mut self, targeting: bool) -> Self {
        self.targeting = targeting;
        self
    }

    pub fn srid(&self) -> i32 {
        self.projection.srid()
    }

    /// Next pump of the same view.
    pub fn advance(&mut self) {
        self.pump = self.pump.next();
    }

    /// Whether tiles need a second copy shifted by 360 degrees.
    pub fn draws_wrapped(&self) -> bool {
        self.crosses_antimeridian && self.srid() != SRID_ECEF
    }
}

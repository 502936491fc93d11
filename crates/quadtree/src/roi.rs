use foundation::{Aabb2, GeoBounds, GeoPoint};

use crate::projection::DatasetProjection;

/// Image-space regions of `raster_bounds` that the view can see.
///
/// A view crossing the antimeridian is split into its west and east parts,
/// each clamped to the raster separately. Every region is padded by one
/// pixel and clamped to the raster extent.
pub fn raster_roi(
    view_bounds: &GeoBounds,
    raster_bounds: &GeoBounds,
    width: u64,
    height: u64,
    projection: &dyn DatasetProjection,
) -> Vec<Aabb2> {
    let parts = if view_bounds.max_lon > 180.0 {
        vec![
            GeoBounds::new(view_bounds.min_lon, view_bounds.min_lat, 180.0, view_bounds.max_lat),
            GeoBounds::new(
                -180.0,
                view_bounds.min_lat,
                view_bounds.max_lon - 360.0,
                view_bounds.max_lat,
            ),
        ]
    } else if view_bounds.min_lon < -180.0 {
        vec![
            GeoBounds::new(
                view_bounds.min_lon + 360.0,
                view_bounds.min_lat,
                180.0,
                view_bounds.max_lat,
            ),
            GeoBounds::new(-180.0, view_bounds.min_lat, view_bounds.max_lon, view_bounds.max_lat),
        ]
    } else {
        vec![*view_bounds]
    };

    let extent = Aabb2::new([0.0, 0.0], [width as f64, height as f64]);
    let mut out = Vec::new();
    for part in parts {
        if !part.intersects(raster_bounds) {
            continue;
        }
        let clamped = GeoBounds::new(
            part.min_lon.max(raster_bounds.min_lon),
            part.min_lat.max(raster_bounds.min_lat),
            part.max_lon.min(raster_bounds.max_lon),
            part.max_lat.min(raster_bounds.max_lat),
        );
        let corners = [
            GeoPoint::new(clamped.max_lat, clamped.min_lon),
            GeoPoint::new(clamped.max_lat, clamped.max_lon),
            GeoPoint::new(clamped.min_lat, clamped.max_lon),
            GeoPoint::new(clamped.min_lat, clamped.min_lon),
        ];
        let mut min = [f64::INFINITY; 2];
        let mut max = [f64::NEG_INFINITY; 2];
        for c in corners {
            let Some(img) = projection.ground_to_image(c) else {
                continue;
            };
            min = [min[0].min(img.x), min[1].min(img.y)];
            max = [max[0].max(img.x), max[1].max(img.y)];
        }
        if !(min[0].is_finite() && max[0].is_finite()) {
            continue;
        }
        let roi = Aabb2::new([min[0] - 1.0, min[1] - 1.0], [max[0] + 1.0, max[1] + 1.0])
            .intersection(&extent);
        if !roi.is_empty() {
            out.push(roi);
        }
    }
    out
}

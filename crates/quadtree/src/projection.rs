use std::sync::Arc;

use foundation::{GeoBounds, GeoPoint, Vec2, surface_distance_m};
use thiserror::Error;
use tracing::warn;

/// Image/ground mapping for a raster dataset.
///
/// Image coordinates are full-resolution pixels with the origin at the
/// upper-left corner of the raster.
pub trait DatasetProjection: Send + Sync {
    fn image_to_ground(&self, image: Vec2) -> Option<GeoPoint>;
    fn ground_to_image(&self, ground: GeoPoint) -> Option<Vec2>;
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProjectionError {
    #[error("raster corners do not form a valid quadrilateral")]
    DegenerateCorners,
    #[error("raster has no extent ({width}x{height})")]
    EmptyRaster { width: u64, height: u64 },
}

/// Corner coordinates of a raster, in image order.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RasterCorners {
    pub upper_left: GeoPoint,
    pub upper_right: GeoPoint,
    pub lower_right: GeoPoint,
    pub lower_left: GeoPoint,
}

impl RasterCorners {
    pub fn bounds(&self) -> GeoBounds {
        let pts = [
            self.upper_left,
            self.upper_right,
            self.lower_right,
            self.lower_left,
        ];
        GeoBounds::from_points(pts.iter().map(|p| (p.lon, p.lat)))
            .unwrap_or(GeoBounds::new(0.0, 0.0, 0.0, 0.0))
    }
}

/// Projective mapping of the image rectangle onto its four corner
/// coordinates (lon/lat treated as planar).
#[derive(Debug, Clone, PartialEq)]
pub struct CornerProjection {
    width: f64,
    height: f64,
    // unit square -> (lon, lat), row-major 3x3
    forward: [f64; 9],
    inverse: [f64; 9],
}

impl CornerProjection {
    pub fn new(width: u64, height: u64, corners: RasterCorners) -> Result<Self, ProjectionError> {
        if width == 0 || height == 0 {
            return Err(ProjectionError::EmptyRaster { width, height });
        }
        let p = [
            corners.upper_left,
            corners.upper_right,
            corners.lower_right,
            corners.lower_left,
        ];
        if p.iter().any(|c| !c.is_finite()) {
            return Err(ProjectionError::DegenerateCorners);
        }
        let (x0, y0) = (p[0].lon, p[0].lat);
        let (x1, y1) = (p[1].lon, p[1].lat);
        let (x2, y2) = (p[2].lon, p[2].lat);
        let (x3, y3) = (p[3].lon, p[3].lat);

        let sx = x0 - x1 + x2 - x3;
        let sy = y0 - y1 + y2 - y3;
        let (dx1, dx2) = (x1 - x2, x3 - x2);
        let (dy1, dy2) = (y1 - y2, y3 - y2);
        let det = dx1 * dy2 - dx2 * dy1;
        if det.abs() < f64::EPSILON {
            return Err(ProjectionError::DegenerateCorners);
        }
        let g = (sx * dy2 - dx2 * sy) / det;
        let h = (dx1 * sy - sx * dy1) / det;
        let forward = [
            x1 - x0 + g * x1,
            x3 - x0 + h * x3,
            x0,
            y1 - y0 + g * y1,
            y3 - y0 + h * y3,
            y0,
            g,
            h,
            1.0,
        ];
        let inverse = adjugate(&forward);
        if determinant(&forward).abs() < f64::EPSILON {
            return Err(ProjectionError::DegenerateCorners);
        }
        Ok(Self {
            width: width as f64,
            height: height as f64,
            forward,
            inverse,
        })
    }
}

impl DatasetProjection for CornerProjection {
    fn image_to_ground(&self, image: Vec2) -> Option<GeoPoint> {
        let (lon, lat) = apply(&self.forward, image.x / self.width, image.y / self.height)?;
        Some(GeoPoint::new(lat, lon))
    }

    fn ground_to_image(&self, ground: GeoPoint) -> Option<Vec2> {
        let (u, v) = apply(&self.inverse, ground.lon, ground.lat)?;
        Some(Vec2::new(u * self.width, v * self.height))
    }
}

fn apply(m: &[f64; 9], x: f64, y: f64) -> Option<(f64, f64)> {
    let w = m[6] * x + m[7] * y + m[8];
    if w.abs() < 1e-12 {
        return None;
    }
    let out = (
        (m[0] * x + m[1] * y + m[2]) / w,
        (m[3] * x + m[4] * y + m[5]) / w,
    );
    (out.0.is_finite() && out.1.is_finite()).then_some(out)
}

fn determinant(m: &[f64; 9]) -> f64 {
    m[0] * (m[4] * m[8] - m[5] * m[7]) - m[1] * (m[3] * m[8] - m[5] * m[6])
        + m[2] * (m[3] * m[7] - m[4] * m[6])
}

// projective inverse up to scale
fn adjugate(m: &[f64; 9]) -> [f64; 9] {
    [
        m[4] * m[8] - m[5] * m[7],
        m[2] * m[7] - m[1] * m[8],
        m[1] * m[5] - m[2] * m[4],
        m[5] * m[6] - m[3] * m[8],
        m[0] * m[8] - m[2] * m[6],
        m[2] * m[3] - m[0] * m[5],
        m[3] * m[7] - m[4] * m[6],
        m[1] * m[6] - m[0] * m[7],
        m[0] * m[4] - m[1] * m[3],
    ]
}

/// Result of a projection through a [`ProjectionPair`].
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Projected<T> {
    pub value: T,
    /// Whether `value` came from the precise projection.
    pub precise: bool,
}

/// A fast imprecise projection, optionally backed by a precise one whose
/// results are rejected when they stray too far from the imprecise answer.
pub struct ProjectionPair {
    imprecise: Arc<dyn DatasetProjection>,
    precise: Option<Arc<dyn DatasetProjection>>,
    gsd: f64,
    tolerance_px: f64,
}

impl std::fmt::Debug for ProjectionPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectionPair")
            .field("precise", &self.precise.is_some())
            .field("gsd", &self.gsd)
            .field("tolerance_px", &self.tolerance_px)
            .finish()
    }
}

impl ProjectionPair {
    /// `gsd` is meters per full-resolution pixel; the discrepancy tolerance
    /// is the nominal tile diagonal divided by `divisor`.
    pub fn new(
        imprecise: Arc<dyn DatasetProjection>,
        precise: Option<Arc<dyn DatasetProjection>>,
        gsd: f64,
        tile_width: u32,
        tile_height: u32,
        divisor: f64,
    ) -> Self {
        let diagonal = (tile_width as f64).hypot(tile_height as f64);
        Self {
            imprecise,
            precise,
            gsd,
            tolerance_px: diagonal / divisor.max(f64::MIN_POSITIVE),
        }
    }

    pub fn imprecise(&self) -> &Arc<dyn DatasetProjection> {
        &self.imprecise
    }

    pub fn has_precise(&self) -> bool {
        self.precise.is_some()
    }

    pub fn gsd(&self) -> f64 {
        self.gsd
    }

    pub fn tolerance_px(&self) -> f64 {
        self.tolerance_px
    }

    pub fn image_to_ground(
        &self,
        image: Vec2,
        prefer_precise: bool,
    ) -> Option<Projected<GeoPoint>> {
        let imprecise = self.imprecise.image_to_ground(image);
        let precise = self.precise.as_ref().filter(|_| prefer_precise);
        if let Some(precise) = precise {
            if let Some(p) = precise.image_to_ground(image).filter(GeoPoint::is_finite) {
                match imprecise {
                    Some(i) => {
                        let err_m = surface_distance_m(p, i);
                        let err_px = err_m / self.gsd;
                        if err_px <= self.tolerance_px {
                            return Some(Projected {
                                value: p,
                                precise: true,
                            });
                        }
                        warn!(
                            "large discrepancy for image_to_ground at ({}, {}), discarding precise point (error={err_m:.1}m, {err_px:.1}px)",
                            image.x, image.y
                        );
                    }
                    None => {
                        return Some(Projected {
                            value: p,
                            precise: true,
                        });
                    }
                }
            }
        }
        imprecise.map(|value| Projected {
            value,
            precise: false,
        })
    }

    pub fn ground_to_image(
        &self,
        ground: GeoPoint,
        prefer_precise: bool,
    ) -> Option<Projected<Vec2>> {
        let imprecise = self.imprecise.ground_to_image(ground);
        let precise = self.precise.as_ref().filter(|_| prefer_precise);
        if let Some(precise) = precise {
            if let Some(p) = precise.ground_to_image(ground).filter(|v| v.is_finite()) {
                match imprecise {
                    Some(i) => {
                        let err_px = p.distance(i);
                        if err_px <= self.tolerance_px {
                            return Some(Projected {
                                value: p,
                                precise: true,
                            });
                        }
                        warn!(
                            "large discrepancy for ground_to_image at ({}, {}), discarding precise point (error={:.1}m, {err_px:.1}px)",
                            ground.lat,
                            ground.lon,
                            err_px * self.gsd
                        );
                    }
                    None => {
                        return Some(Projected {
                            value: p,
                            precise: true,
                        });
                    }
                }
            }
        }
        imprecise.map(|value| Projected {
            value,
            precise: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{CornerProjection, DatasetProjection, ProjectionError, ProjectionPair, RasterCorners};
    use foundation::{GeoPoint, Vec2};

    fn assert_close(a: f64, b: f64, eps: f64) {
        assert!((a - b).abs() <= eps, "expected {a} ~= {b} (eps={eps})");
    }

    fn corners() -> RasterCorners {
        RasterCorners {
            upper_left: GeoPoint::new(10.0, 20.0),
            upper_right: GeoPoint::new(10.5, 21.2),
            lower_right: GeoPoint::new(9.1, 21.0),
            lower_left: GeoPoint::new(9.0, 19.9),
        }
    }

    struct Offset {
        inner: CornerProjection,
        dlat: f64,
    }

    impl DatasetProjection for Offset {
        fn image_to_ground(&self, image: Vec2) -> Option<GeoPoint> {
            let g = self.inner.image_to_ground(image)?;
            Some(GeoPoint::new(g.lat + self.dlat, g.lon))
        }

        fn ground_to_image(&self, ground: GeoPoint) -> Option<Vec2> {
            let i = self.inner.ground_to_image(ground)?;
            Some(Vec2::new(i.x + self.dlat * 1.0e5, i.y))
        }
    }

    #[test]
    fn corners_map_exactly() {
        let proj = CornerProjection::new(1000, 500, corners()).unwrap();
        let c = corners();
        let ur = proj.image_to_ground(Vec2::new(1000.0, 0.0)).unwrap();
        assert_close(ur.lat, c.upper_right.lat, 1e-9);
        assert_close(ur.lon, c.upper_right.lon, 1e-9);
        let ll = proj.image_to_ground(Vec2::new(0.0, 500.0)).unwrap();
        assert_close(ll.lat, c.lower_left.lat, 1e-9);
        assert_close(ll.lon, c.lower_left.lon, 1e-9);
    }

    #[test]
    fn ground_to_image_inverts_all_corners() {
        let proj = CornerProjection::new(1000, 500, corners()).unwrap();
        for p in [
            Vec2::new(0.0, 0.0),
            Vec2::new(1000.0, 0.0),
            Vec2::new(1000.0, 500.0),
            Vec2::new(0.0, 500.0),
            Vec2::new(333.0, 120.0),
        ] {
            let g = proj.image_to_ground(p).unwrap();
            let back = proj.ground_to_image(g).unwrap();
            assert_close(back.x, p.x, 1e-6);
            assert_close(back.y, p.y, 1e-6);
        }
    }

    #[test]
    fn collinear_corners_are_rejected() {
        let line = RasterCorners {
            upper_left: GeoPoint::new(0.0, 0.0),
            upper_right: GeoPoint::new(0.0, 1.0),
            lower_right: GeoPoint::new(0.0, 2.0),
            lower_left: GeoPoint::new(0.0, 3.0),
        };
        assert_eq!(
            CornerProjection::new(10, 10, line),
            Err(ProjectionError::DegenerateCorners)
        );
        assert!(matches!(
            CornerProjection::new(0, 10, corners()),
            Err(ProjectionError::EmptyRaster { .. })
        ));
    }

    #[test]
    fn far_precise_point_falls_back_to_imprecise() {
        let imprecise = CornerProjection::new(1024, 1024, corners()).unwrap();
        // 500 tile diagonals at 1 m/px, expressed in degrees of latitude
        let diagonal_m = (256.0f64).hypot(256.0);
        let dlat = (500.0 * diagonal_m / foundation::EARTH_MEAN_RADIUS_M).to_degrees();
        let precise = Offset {
            inner: imprecise.clone(),
            dlat,
        };
        let pair = ProjectionPair::new(
            Arc::new(imprecise.clone()),
            Some(Arc::new(precise)),
            1.0,
            256,
            256,
            8.0,
        );
        let p = Vec2::new(100.0, 200.0);
        let out = pair.image_to_ground(p, true).unwrap();
        assert!(!out.precise);
        let expected = imprecise.image_to_ground(p).unwrap();
        assert_close(out.value.lat, expected.lat, 1e-12);
        assert_close(out.value.lon, expected.lon, 1e-12);
    }

    #[test]
    fn close_precise_point_is_accepted() {
        let imprecise = CornerProjection::new(1024, 1024, corners()).unwrap();
        let precise = Offset {
            inner: imprecise.clone(),
            dlat: 1.0e-7,
        };
        let pair = ProjectionPair::new(
            Arc::new(imprecise.clone()),
            Some(Arc::new(precise)),
            1.0,
            256,
            256,
            8.0,
        );
        let out = pair.image_to_ground(Vec2::new(10.0, 10.0), true).unwrap();
        assert!(out.precise);
        let img = pair
            .ground_to_image(GeoPoint::new(9.5, 20.5), true)
            .unwrap();
        assert!(img.precise);
    }

    #[test]
    fn precise_not_requested_stays_imprecise() {
        let imprecise = CornerProjection::new(1024, 1024, corners()).unwrap();
        let pair = ProjectionPair::new(
            Arc::new(imprecise.clone()),
            Some(Arc::new(imprecise)),
            1.0,
            256,
            256,
            8.0,
        );
        assert!(!pair.image_to_ground(Vec2::new(1.0, 1.0), false).unwrap().precise);
        assert!(pair.image_to_ground(Vec2::new(1.0, 1.0), true).unwrap().precise);
    }

    #[test]
    fn ground_discrepancy_uses_pixel_distance() {
        let imprecise = CornerProjection::new(1024, 1024, corners()).unwrap();
        let precise = Offset {
            inner: imprecise.clone(),
            dlat: 0.01,
        };
        let pair = ProjectionPair::new(
            Arc::new(imprecise),
            Some(Arc::new(precise)),
            1.0,
            256,
            256,
            8.0,
        );
        // 0.01 * 1e5 = 1000 px off, tolerance ~45 px
        let out = pair.ground_to_image(GeoPoint::new(9.5, 20.5), true).unwrap();
        assert!(!out.precise);
    }
}

/// Axis-aligned rectangle in image (pixel) space.
///
/// `min` is inclusive and `max` exclusive; a box with `max <= min` on either
/// axis is empty.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Aabb2 {
    pub min: [f64; 2],
    pub max: [f64; 2],
}

impl Aabb2 {
    pub fn new(min: [f64; 2], max: [f64; 2]) -> Self {
        Aabb2 { min, max }
    }

    pub fn from_origin_size(x: f64, y: f64, width: f64, height: f64) -> Self {
        Aabb2::new([x, y], [x + width, y + height])
    }

    pub fn width(&self) -> f64 {
        self.max[0] - self.min[0]
    }

    pub fn height(&self) -> f64 {
        self.max[1] - self.min[1]
    }

    pub fn is_empty(&self) -> bool {
        self.max[0] <= self.min[0] || self.max[1] <= self.min[1]
    }

    pub fn center(&self) -> [f64; 2] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
        ]
    }

    pub fn intersects(&self, other: &Aabb2) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.min[0] < other.max[0]
            && other.min[0] < self.max[0]
            && self.min[1] < other.max[1]
            && other.min[1] < self.max[1]
    }

    pub fn intersection(&self, other: &Aabb2) -> Aabb2 {
        Aabb2::new(
            [self.min[0].max(other.min[0]), self.min[1].max(other.min[1])],
            [self.max[0].min(other.max[0]), self.max[1].min(other.max[1])],
        )
    }
}

/// Geographic rectangle in degrees.
///
/// Longitudes are not normalized: a tile of a raster that wraps the
/// antimeridian may carry `min_lon < -180` or `max_lon > 180`, and a view that
/// crosses it carries `east > 180`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GeoBounds {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl GeoBounds {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// Smallest rectangle covering every `(lon, lat)` pair.
    pub fn from_points(points: impl IntoIterator<Item = (f64, f64)>) -> Option<Self> {
        let mut out: Option<GeoBounds> = None;
        for (lon, lat) in points {
            if !lon.is_finite() || !lat.is_finite() {
                continue;
            }
            out = Some(match out {
                None => GeoBounds::new(lon, lat, lon, lat),
                Some(b) => GeoBounds::new(
                    b.min_lon.min(lon),
                    b.min_lat.min(lat),
                    b.max_lon.max(lon),
                    b.max_lat.max(lat),
                ),
            });
        }
        out
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lon + self.max_lon) * 0.5,
            (self.min_lat + self.max_lat) * 0.5,
        )
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }

    /// Closed-interval overlap test with no longitude unwrapping.
    pub fn intersects(&self, other: &GeoBounds) -> bool {
        self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
            && self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
    }

    /// Overlap test that also tries this rectangle shifted by +/-360 degrees
    /// when it extends past the antimeridian.
    pub fn intersects_unwrapped(&self, view: &GeoBounds) -> bool {
        if self.intersects(view) {
            return true;
        }
        if self.min_lon < -180.0 {
            let shifted = GeoBounds::new(
                self.min_lon + 360.0,
                self.min_lat,
                (self.max_lon + 360.0).min(180.0),
                self.max_lat,
            );
            if shifted.intersects(view) {
                return true;
            }
        }
        if self.max_lon > 180.0 {
            let shifted = GeoBounds::new(
                (self.min_lon - 360.0).max(-180.0),
                self.min_lat,
                self.max_lon - 360.0,
                self.max_lat,
            );
            if shifted.intersects(view) {
                return true;
            }
        }
        (view.max_lon > 180.0 && self.shifted(360.0).intersects(view))
            || (view.min_lon < -180.0 && self.shifted(-360.0).intersects(view))
    }

    pub fn shifted(&self, dlon: f64) -> GeoBounds {
        GeoBounds::new(
            self.min_lon + dlon,
            self.min_lat,
            self.max_lon + dlon,
            self.max_lat,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{Aabb2, GeoBounds};

    #[test]
    fn touching_image_boxes_do_not_intersect() {
        let a = Aabb2::from_origin_size(0.0, 0.0, 10.0, 10.0);
        let b = Aabb2::from_origin_size(10.0, 0.0, 10.0, 10.0);
        assert!(!a.intersects(&b));
        assert!(a.intersects(&Aabb2::from_origin_size(9.0, 9.0, 1.0, 1.0)));
    }

    #[test]
    fn empty_box_never_intersects() {
        let a = Aabb2::from_origin_size(0.0, 0.0, 10.0, 10.0);
        let empty = Aabb2::new([5.0, 5.0], [5.0, 8.0]);
        assert!(empty.is_empty());
        assert!(!a.intersects(&empty));
    }

    #[test]
    fn wrapped_tile_hits_view_on_the_far_side() {
        let tile = GeoBounds::new(175.0, 0.0, 185.0, 5.0);
        let view = GeoBounds::new(-179.0, 1.0, -176.0, 4.0);
        assert!(!tile.intersects(&view));
        assert!(tile.intersects_unwrapped(&view));

        let west = GeoBounds::new(-185.0, 0.0, -175.0, 5.0);
        let view = GeoBounds::new(176.0, 1.0, 179.0, 4.0);
        assert!(west.intersects_unwrapped(&view));
    }

    #[test]
    fn view_past_the_antimeridian_sees_western_tiles() {
        let tile = GeoBounds::new(-179.0, 0.0, -170.0, 5.0);
        let view = GeoBounds::new(170.0, 0.0, 190.0, 5.0);
        assert!(!tile.intersects(&view));
        assert!(tile.intersects_unwrapped(&view));
        assert!(!GeoBounds::new(-150.0, 0.0, -140.0, 5.0).intersects_unwrapped(&view));
    }

    #[test]
    fn from_points_skips_non_finite_values() {
        let b = GeoBounds::from_points([(1.0, 2.0), (f64::NAN, 0.0), (-3.0, 4.0)]).unwrap();
        assert_eq!(b, GeoBounds::new(-3.0, 2.0, 1.0, 4.0));
        assert!(GeoBounds::from_points([(f64::NAN, f64::NAN)]).is_none());
    }
}

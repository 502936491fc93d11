use foundation::surface_distance_m;
use quadtree::RasterCorners;

/// Metadata needed to open and place one raster.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterDataset {
    pub name: String,
    pub uri: String,
    pub width: u64,
    pub height: u64,
    pub corners: RasterCorners,
    /// Meters per full-resolution pixel.
    pub gsd_m: f64,
    /// Served over the network; exposes cache and offline controls.
    pub remote: bool,
    /// Ask the source factory for a precise projection.
    pub precise: bool,
}

impl RasterDataset {
    /// The ground sample distance is estimated from the UL-LR diagonal.
    pub fn new(
        name: impl Into<String>,
        uri: impl Into<String>,
        width: u64,
        height: u64,
        corners: RasterCorners,
    ) -> Self {
        let diagonal_px = (width as f64).hypot(height as f64);
        let gsd_m = if diagonal_px > 0.0 {
            surface_distance_m(corners.upper_left, corners.lower_right) / diagonal_px
        } else {
            0.0
        };
        Self {
            name: name.into(),
            uri: uri.into(),
            width,
            height,
            corners,
            gsd_m,
            remote: false,
            precise: false,
        }
    }

    pub fn remote(mut self) -> Self {
        self.remote = true;
        self
    }

    pub fn with_precise(mut self) -> Self {
        self.precise = true;
        self
    }

    pub fn with_gsd(mut self, gsd_m: f64) -> Self {
        self.gsd_m = gsd_m;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::RasterDataset;
    use foundation::{GeoPoint, surface_distance_m};
    use quadtree::RasterCorners;

    fn assert_close(a: f64, b: f64, eps: f64) {
        assert!((a - b).abs() <= eps, "{a} vs {b}");
    }

    fn corners() -> RasterCorners {
        RasterCorners {
            upper_left: GeoPoint::new(1.0, 0.0),
            upper_right: GeoPoint::new(1.0, 1.0),
            lower_right: GeoPoint::new(0.0, 1.0),
            lower_left: GeoPoint::new(0.0, 0.0),
        }
    }

    #[test]
    fn gsd_spreads_the_diagonal_over_its_pixels() {
        let ds = RasterDataset::new("a", "mem://a", 3000, 4000, corners());
        let diagonal = surface_distance_m(GeoPoint::new(1.0, 0.0), GeoPoint::new(0.0, 1.0));
        assert_close(ds.gsd_m * 5000.0, diagonal, 1e-6);
        // roughly 157 km over 5000 px
        assert!(ds.gsd_m > 30.0 && ds.gsd_m < 33.0, "{}", ds.gsd_m);
        assert!(!ds.remote && !ds.precise);
    }

    #[test]
    fn empty_raster_has_zero_gsd() {
        let ds = RasterDataset::new("e", "mem://e", 0, 0, corners());
        assert_eq!(ds.gsd_m, 0.0);
    }
}

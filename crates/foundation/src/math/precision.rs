//! Precision helpers.
//!
//! GPU vertex data is `f32`; world positions are `f64`. Tile meshes are stored
//! relative to a per-tile origin so the `f32` offsets stay small.

use core::cmp::Ordering;

use super::Vec3;

/// A tile-local coordinate system: world positions minus `origin`, as `f32`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LocalOrigin {
    pub origin: Vec3,
}

impl LocalOrigin {
    pub fn new(origin: Vec3) -> Self {
        Self { origin }
    }

    #[inline]
    pub fn to_f32(self, world: Vec3) -> [f32; 3] {
        let d = world - self.origin;
        [d.x as f32, d.y as f32, d.z as f32]
    }
}

/// Canonicalize for ordering: `-0.0` becomes `0.0`, every NaN the same NaN.
pub fn canonical_f64(v: f64) -> f64 {
    if v == 0.0 {
        0.0
    } else if v.is_nan() {
        f64::NAN
    } else {
        v
    }
}

/// Deterministic total ordering for floats (NaN sorts last).
pub fn stable_total_cmp_f64(a: f64, b: f64) -> Ordering {
    canonical_f64(a).total_cmp(&canonical_f64(b))
}

#[cfg(test)]
mod tests {
    use super::{LocalOrigin, stable_total_cmp_f64};
    use core::cmp::Ordering;

    use crate::math::Vec3;

    #[test]
    fn stable_cmp_ignores_zero_sign_and_orders_nan_last() {
        assert_eq!(stable_total_cmp_f64(-0.0, 0.0), Ordering::Equal);
        assert_eq!(stable_total_cmp_f64(1.0, f64::NAN), Ordering::Less);
        assert_eq!(stable_total_cmp_f64(f64::NAN, f64::NAN), Ordering::Equal);
    }

    #[test]
    fn local_origin_keeps_small_offsets_exact() {
        let origin = Vec3::new(6_378_137.0, -2_000_000.0, 1_000_000.0);
        let world = Vec3::new(6_378_138.25, -2_000_001.0, 999_999.5);
        assert_eq!(LocalOrigin::new(origin).to_f32(world), [1.25, -1.0, -0.5]);
    }
}

use super::{GeoPoint, Vec3, ecef_to_geodetic, geodetic_to_ecef};

/// Spatial reference id for plate carree (lon/lat degrees).
pub const SRID_EQUIRECTANGULAR: i32 = 4326;
/// Spatial reference id for earth-centered, earth-fixed meters.
pub const SRID_ECEF: i32 = 4978;

/// Forward/inverse mapping between geographic points and a map's world space.
///
/// Implementations are pure; callers cache forward results keyed by `srid()`
/// and re-project when the active projection changes.
pub trait MapProjection: Send + Sync {
    fn srid(&self) -> i32;
    fn forward(&self, geo: GeoPoint) -> Vec3;
    fn inverse(&self, world: Vec3) -> GeoPoint;
}

/// `x = lon`, `y = lat`, `z = alt` (meters).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Equirectangular;

impl MapProjection for Equirectangular {
    fn srid(&self) -> i32 {
        SRID_EQUIRECTANGULAR
    }

    fn forward(&self, geo: GeoPoint) -> Vec3 {
        Vec3::new(geo.lon, geo.lat, geo.alt_m)
    }

    fn inverse(&self, world: Vec3) -> GeoPoint {
        GeoPoint::with_alt(world.y, world.x, world.z)
    }
}

/// WGS84 earth-centered, earth-fixed.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct EcefProjection;

impl MapProjection for EcefProjection {
    fn srid(&self) -> i32 {
        SRID_ECEF
    }

    fn forward(&self, geo: GeoPoint) -> Vec3 {
        geodetic_to_ecef(geo.to_geodetic())
    }

    fn inverse(&self, world: Vec3) -> GeoPoint {
        GeoPoint::from_geodetic(ecef_to_geodetic(world))
    }
}

pub mod dataset;
pub mod layer;
pub mod raster;

pub use dataset::*;
pub use layer::*;
pub use raster::*;

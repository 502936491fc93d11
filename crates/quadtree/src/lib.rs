//! Quadtree renderer for tiled raster imagery.
//!
//! A [`Quadtree`] owns one tree of tile nodes over a [`streaming::TileSource`].
//! Each [`Quadtree::draw`] picks the pyramid level for the view, fetches
//! what is missing through the asynchronous reader, and draws every visible
//! node with the best texture it has: its own, a composite of its children,
//! or a region of an ancestor's.

pub mod events;
pub mod grid;
mod mesh;
pub mod node;
pub mod options;
pub mod precise;
pub mod projection;
pub mod resolver;
pub mod roi;
mod shared;
pub mod state;
mod texture;
pub mod tree;
pub mod view;

pub use crate::shared::RenderGlobals;
pub use events::{NodeListener, ReadEvent, TreeEvent};
pub use grid::{GridVertex, SharedGrid, SharedGrids};
pub use node::{NodeId, grid_size, tile_texture_format};
pub use options::QuadtreeOptions;
pub use precise::{BlobError, ImagePoint, PreciseVertexResolver, decode_points, encode_points};
pub use projection::{
    CornerProjection, DatasetProjection, Projected, ProjectionError, ProjectionPair,
    RasterCorners,
};
pub use resolver::{DefaultVertexResolver, NodeGridInfo, VertexResolver};
pub use roi::raster_roi;
pub use state::{StateMask, TileState};
pub use tree::{DrawReport, Quadtree, TreeError, target_level};
pub use view::MapView;

use std::collections::BTreeMap;

use foundation::{GeoPoint, Vec3};
use gpu::{
    BufferId, BufferKind, GraphicsContext, TexCoord, as_bytes, quad_mesh_indices,
    quad_mesh_tex_coords,
};

/// One sample of a tile mesh.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct GridVertex {
    pub value: GeoPoint,
    /// Not re-sampled until the mesh is invalidated. Midpoints interpolated
    /// from precise neighbors count as resolved.
    pub resolved: bool,
    /// `value` in the map projection identified by `projected_srid`.
    pub projected: Vec3,
    pub projected_srid: Option<i32>,
}

impl GridVertex {
    pub fn new(value: GeoPoint, resolved: bool) -> Self {
        Self {
            value,
            resolved,
            projected: Vec3::zero(),
            projected_srid: None,
        }
    }
}

/// Texture coordinate and index buffers shared by every node with the same
/// uniform grid.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SharedGrid {
    pub tex_coords: BufferId,
    /// `None` for a single cell, which is drawn as a plain four-vertex strip.
    pub indices: Option<BufferId>,
}

#[derive(Debug, Default)]
pub struct SharedGrids {
    max_size: u32,
    grids: BTreeMap<u32, SharedGrid>,
}

impl SharedGrids {
    pub fn new(max_size: u32) -> Self {
        Self {
            max_size,
            grids: BTreeMap::new(),
        }
    }

    /// Square, power-of-two grids no larger than the configured maximum.
    pub fn is_uniform(&self, grid_width: u32, grid_height: u32) -> bool {
        grid_width == grid_height && grid_width.is_power_of_two() && grid_width <= self.max_size
    }

    pub fn get_or_create(&mut self, gfx: &mut dyn GraphicsContext, size: u32) -> SharedGrid {
        *self.grids.entry(size).or_insert_with(|| {
            let tc = quad_mesh_tex_coords(
                TexCoord::new(0.0, 0.0),
                TexCoord::new(1.0, 0.0),
                TexCoord::new(1.0, 1.0),
                TexCoord::new(0.0, 1.0),
                size,
                size,
            );
            let tex_coords = gfx.create_buffer(BufferKind::Vertex, as_bytes(&tc));
            let indices = (size > 1).then(|| {
                gfx.create_buffer(BufferKind::Index, as_bytes(&quad_mesh_indices(size, size)))
            });
            SharedGrid {
                tex_coords,
                indices,
            }
        })
    }

    pub fn len(&self) -> usize {
        self.grids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grids.is_empty()
    }

    pub fn release(&mut self, gfx: &mut dyn GraphicsContext) {
        for grid in std::mem::take(&mut self.grids).into_values() {
            gfx.delete_buffer(grid.tex_coords);
            if let Some(indices) = grid.indices {
                gfx.delete_buffer(indices);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SharedGrids;
    use gpu::{BufferKind, RecordingContext};

    #[test]
    fn uniform_grids_are_square_powers_of_two() {
        let grids = SharedGrids::new(32);
        assert!(grids.is_uniform(8, 8));
        assert!(!grids.is_uniform(8, 4));
        assert!(!grids.is_uniform(6, 6));
        assert!(!grids.is_uniform(64, 64));
    }

    #[test]
    fn grids_are_interned_by_size() {
        let mut gfx = RecordingContext::new();
        let mut grids = SharedGrids::new(32);
        let a = grids.get_or_create(&mut gfx, 4);
        let b = grids.get_or_create(&mut gfx, 4);
        assert_eq!(a, b);
        assert_eq!(gfx.buffer_kind(a.indices.unwrap()), Some(BufferKind::Index));
        let single = grids.get_or_create(&mut gfx, 1);
        assert!(single.indices.is_none());
        assert_eq!(gfx.live_buffers(), 3);

        grids.release(&mut gfx);
        assert_eq!(gfx.live_buffers(), 0);
        assert!(grids.is_empty());
    }
}

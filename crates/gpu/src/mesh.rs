use bytemuck::{Pod, Zeroable};

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Default, Pod, Zeroable)]
pub struct TexCoord {
    pub u: f32,
    pub v: f32,
}

impl TexCoord {
    pub fn new(u: f32, v: f32) -> Self {
        Self { u, v }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Default, Pod, Zeroable)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn from_array(v: [f32; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

pub fn quad_mesh_vertex_count(grid_width: u32, grid_height: u32) -> u32 {
    (grid_width + 1) * (grid_height + 1)
}

/// Index count of a triangle strip covering the grid, with two degenerate
/// indices joining consecutive rows.
pub fn quad_mesh_index_count(grid_width: u32, grid_height: u32) -> u32 {
    if grid_width == 0 || grid_height == 0 {
        return 0;
    }
    2 * (grid_width + 1) * grid_height + 2 * (grid_height - 1)
}

/// Texture coordinates for a `(gw + 1) x (gh + 1)` vertex grid, row-major
/// from the upper-left corner, bilinearly interpolated between corners.
pub fn quad_mesh_tex_coords(
    ul: TexCoord,
    ur: TexCoord,
    lr: TexCoord,
    ll: TexCoord,
    grid_width: u32,
    grid_height: u32,
) -> Vec<TexCoord> {
    let mut out = Vec::with_capacity(quad_mesh_vertex_count(grid_width, grid_height) as usize);
    for row in 0..=grid_height {
        let t = row as f32 / grid_height.max(1) as f32;
        let left = lerp(ul, ll, t);
        let right = lerp(ur, lr, t);
        for col in 0..=grid_width {
            let s = col as f32 / grid_width.max(1) as f32;
            out.push(lerp(left, right, s));
        }
    }
    out
}

pub fn quad_mesh_indices(grid_width: u32, grid_height: u32) -> Vec<u16> {
    let mut out = Vec::with_capacity(quad_mesh_index_count(grid_width, grid_height) as usize);
    let stride = grid_width + 1;
    for row in 0..grid_height {
        if row > 0 {
            // degenerate join: repeat the last index and the next row's first
            if let Some(&last) = out.last() {
                out.push(last);
            }
            out.push((row * stride) as u16);
        }
        for col in 0..=grid_width {
            out.push((row * stride + col) as u16);
            out.push(((row + 1) * stride + col) as u16);
        }
    }
    out
}

pub fn as_bytes<T: Pod>(items: &[T]) -> &[u8] {
    bytemuck::cast_slice(items)
}

fn lerp(a: TexCoord, b: TexCoord, t: f32) -> TexCoord {
    TexCoord::new(a.u + (b.u - a.u) * t, a.v + (b.v - a.v) * t)
}

use foundation::LocalOrigin;
use gpu::{
    BufferKind, Filter, GraphicsContext, Position, TexCoord, TextureId, as_bytes,
    quad_mesh_index_count, quad_mesh_indices, quad_mesh_tex_coords, quad_mesh_vertex_count,
};

use crate::node::{NodeId, TileNode};
use crate::shared::NodeCore;
use crate::tree::Quadtree;
use crate::view::MapView;

/// Which texture coordinates a draw uses.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum TexCoordSource {
    Own,
    Borrowed,
}

pub(crate) fn validate_tex_coords(
    core: &mut NodeCore,
    node: &mut TileNode,
    gfx: &mut dyn GraphicsContext,
) {
    if node.tex_coords_valid && node.tex_coords.is_some() {
        return;
    }
    if let Some(buffer) = node.tex_coords.take() {
        if !node.tex_coords_shared {
            core.delete_buffer(gfx, buffer);
        }
    }
    if let Some(buffer) = node.indices.take() {
        if !node.indices_shared {
            core.delete_buffer(gfx, buffer);
        }
    }

    let (gw, gh) = (node.grid_width, node.grid_height);
    if core.grids.is_uniform(gw, gh) {
        let grid = core.grids.get_or_create(gfx, gw);
        node.tex_coords = Some(grid.tex_coords);
        node.indices = grid.indices;
        node.tex_coords_shared = true;
        node.indices_shared = true;
    } else {
        let tc = quad_mesh_tex_coords(
            TexCoord::new(0.0, 0.0),
            TexCoord::new(1.0, 0.0),
            TexCoord::new(1.0, 1.0),
            TexCoord::new(0.0, 1.0),
            gw,
            gh,
        );
        node.tex_coords = Some(gfx.create_buffer(BufferKind::Vertex, as_bytes(&tc)));
        node.indices = (gw > 1 || gh > 1)
            .then(|| gfx.create_buffer(BufferKind::Index, as_bytes(&quad_mesh_indices(gw, gh))));
        node.tex_coords_shared = false;
        node.indices_shared = false;
    }
    node.tex_coords_valid = true;
}

impl Quadtree {
    /// Re-samples the node's grid where needed and uploads positions
    /// relative to the node centroid.
    pub(crate) fn validate_vertices(
        &mut self,
        id: NodeId,
        view: &MapView,
        gfx: &mut dyn GraphicsContext,
    ) {
        let Quadtree { core, nodes, .. } = self;
        let Some(node) = nodes.get_mut(id.0) else {
            return;
        };
        let srid = view.srid();
        if node.vertices_valid && node.vertex_srid == Some(srid) && node.vertex_buffer.is_some() {
            return;
        }

        let info = node.grid_info(id);
        let origin = view.projection.forward(node.centroid);
        let local = LocalOrigin::new(origin);
        let (gw, gh) = (node.grid_width as u64, node.grid_height as u64);
        let src = node.src;

        core.resolver.begin_node(&info);
        let mut positions = Vec::with_capacity(node.vertices.len());
        for i in 0..=gh {
            let y = src.y + src.height * i / gh;
            for j in 0..=gw {
                let x = src.x + src.width * j / gw;
                let slot = &mut node.vertices[(i * (gw + 1) + j) as usize];
                if !slot.as_ref().is_some_and(|v| v.resolved) {
                    *slot = None;
                }
                let vertex =
                    slot.get_or_insert_with(|| core.resolver.project(view, x as i64, y as i64));
                if vertex.projected_srid != Some(srid) {
                    vertex.projected = view.projection.forward(vertex.value);
                    vertex.projected_srid = Some(srid);
                }
                positions.push(Position::from_array(local.to_f32(vertex.projected)));
            }
        }
        core.resolver.end_node(&info);

        if let Some(old) = node.vertex_buffer.take() {
            core.delete_buffer(gfx, old);
        }
        node.vertex_buffer = Some(gfx.create_buffer(BufferKind::Vertex, as_bytes(&positions)));
        node.origin = origin.as_array();
        node.vertices_valid = true;
        node.vertex_srid = Some(srid);
    }

    /// Issues the strip for one node, plus shifted copies when the view
    /// wraps the antimeridian.
    pub(crate) fn draw_texture(
        &mut self,
        id: NodeId,
        view: &MapView,
        gfx: &mut dyn GraphicsContext,
        texture: TextureId,
        tex_coords: TexCoordSource,
    ) {
        let Quadtree { core, nodes, .. } = self;
        let Some(node) = nodes.get_mut(id.0) else {
            return;
        };
        validate_tex_coords(core, node, gfx);
        let coords = match tex_coords {
            TexCoordSource::Own => node.tex_coords,
            TexCoordSource::Borrowed => node.borrow_tex_coords,
        };
        let (Some(coords), Some(vertices)) = (coords, node.vertex_buffer) else {
            return;
        };

        let own = Some(texture) == node.texture;
        if own {
            let filter = if node.composite_nearest {
                (Filter::Nearest, Filter::Nearest)
            } else {
                (Filter::Linear, core.mag_filter)
            };
            if node.filter != Some(filter) {
                gfx.set_texture_filter(texture, filter.0, filter.1);
                node.filter = Some(filter);
            }
        }

        let limit = core.options.fade_timer_limit_ms as f64;
        let fade = if own && limit > 0.0 {
            ((limit - node.fade_timer_ms) / limit).clamp(0.0, 1.0) as f32
        } else {
            1.0
        };
        let [r, g, b, a] = core.color;
        core.render_state.set_color(gfx, [r, g, b, a * fade]);
        core.render_state.bind_tex_coords(gfx, coords);
        core.render_state.bind_vertices(gfx, vertices);
        core.render_state.bind_texture(gfx, texture);
        core.render_state.bind_indices(gfx, node.indices);

        let (gw, gh) = (node.grid_width, node.grid_height);
        let count = if node.indices.is_some() {
            quad_mesh_index_count(gw, gh)
        } else {
            quad_mesh_vertex_count(gw, gh)
        };

        let mut shifts = Vec::with_capacity(2);
        if view.draws_wrapped() {
            if node.bounds.intersects(&view.bounds) {
                shifts.push(0.0);
            }
            for dlon in [360.0, -360.0] {
                if node.bounds.shifted(dlon).intersects(&view.bounds) {
                    shifts.push(dlon);
                }
            }
        }
        if shifts.is_empty() {
            shifts.push(0.0);
        }

        for dlon in shifts {
            let mut origin = node.origin;
            if dlon != 0.0 {
                let mut centroid = node.centroid;
                centroid.lon += dlon;
                origin = view.projection.forward(centroid).as_array();
            }
            gfx.set_origin(origin);
            gfx.draw_triangle_strip(count);
            core.frame.tiles_drawn += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::validate_tex_coords;
    use crate::tree::tests::tree_fixture;
    use gpu::RecordingContext;

    #[test]
    fn uniform_grids_share_buffers() {
        let mut gfx = RecordingContext::new();
        let (mut tree, _) = tree_fixture(512, 512, false);
        let root = tree.root_id();
        let crate::tree::Quadtree { core, nodes, .. } = &mut tree;
        let node = nodes.get_mut(root.0).unwrap();
        validate_tex_coords(core, node, &mut gfx);
        assert!(node.tex_coords_shared);
        let shared = node.tex_coords;

        // a 3x3 grid is not uniform
        node.grid_width = 3;
        node.grid_height = 3;
        node.tex_coords_valid = false;
        validate_tex_coords(core, node, &mut gfx);
        assert!(!node.tex_coords_shared);
        assert_ne!(node.tex_coords, shared);
        let own = node.tex_coords.unwrap();
        assert_eq!(gfx.buffer_contents(own).unwrap().len(), 16 * 8);
        assert!(gfx.buffer_contents(shared.unwrap()).is_some());
    }
}

use foundation::Arena;

use crate::context::{
    BufferId, BufferKind, Filter, GpuError, GraphicsContext, Ortho, QuadRect, TextureDesc,
    TextureFormat, TextureId, TextureRegion, convert_pixels,
};

#[derive(Debug, Clone, PartialEq)]
pub enum RenderCommand {
    CreateTexture { id: TextureId, desc: TextureDesc },
    UploadTexture { id: TextureId, region: TextureRegion },
    SetTextureFilter { id: TextureId, min: Filter, mag: Filter },
    DeleteTexture(TextureId),
    CreateBuffer { id: BufferId, kind: BufferKind, len: usize },
    DeleteBuffer(BufferId),
    BindTexture(TextureId),
    BindTexCoords(BufferId),
    BindVertices(BufferId),
    BindIndices(Option<BufferId>),
    SetColor([f32; 4]),
    SetOrigin([f64; 3]),
    Draw(DrawCall),
    BeginOffscreen { target: TextureId, projection: Ortho },
    OffscreenQuad { texture: TextureId, dst: QuadRect, uv: QuadRect },
    EndOffscreen,
}

/// Bindings in effect when a strip was drawn.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    pub texture: Option<TextureId>,
    pub tex_coords: Option<BufferId>,
    pub vertices: Option<BufferId>,
    pub indices: Option<BufferId>,
    pub color: [f32; 4],
    pub origin: [f64; 3],
    pub count: u32,
}

#[derive(Debug)]
struct TextureRecord {
    desc: TextureDesc,
    filter: (Filter, Filter),
    // always RGBA8 regardless of desc.format
    rgba: Vec<u8>,
}

#[derive(Debug)]
struct BufferRecord {
    kind: BufferKind,
    contents: Vec<u8>,
}

#[derive(Debug, Default, Clone)]
struct Bindings {
    texture: Option<TextureId>,
    tex_coords: Option<BufferId>,
    vertices: Option<BufferId>,
    indices: Option<BufferId>,
    color: [f32; 4],
    origin: [f64; 3],
}

/// Headless context that records every call and keeps texel storage so
/// off-screen composition can be inspected.
#[derive(Debug)]
pub struct RecordingContext {
    textures: Arena<TextureRecord>,
    buffers: Arena<BufferRecord>,
    commands: Vec<RenderCommand>,
    bindings: Bindings,
    offscreen_target: Option<TextureId>,
    offscreen_supported: bool,
}

impl Default for RecordingContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingContext {
    pub fn new() -> Self {
        Self {
            textures: Arena::new(),
            buffers: Arena::new(),
            commands: Vec::new(),
            bindings: Bindings {
                color: [1.0; 4],
                ..Bindings::default()
            },
            offscreen_target: None,
            offscreen_supported: true,
        }
    }

    /// Makes every `begin_offscreen` fail, as on platforms without
    /// framebuffer objects.
    pub fn without_offscreen() -> Self {
        Self {
            offscreen_supported: false,
            ..Self::new()
        }
    }

    pub fn commands(&self) -> &[RenderCommand] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    pub fn draw_calls(&self) -> Vec<&DrawCall> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                RenderCommand::Draw(call) => Some(call),
                _ => None,
            })
            .collect()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn has_texture(&self, id: TextureId) -> bool {
        self.textures.contains(id.0)
    }

    pub fn texture_filter(&self, id: TextureId) -> Option<(Filter, Filter)> {
        self.textures.get(id.0).map(|t| t.filter)
    }

    /// Texels of `id` as RGBA8, row-major from the top-left.
    pub fn texture_rgba(&self, id: TextureId) -> Option<&[u8]> {
        self.textures.get(id.0).map(|t| t.rgba.as_slice())
    }

    pub fn texel(&self, id: TextureId, x: u32, y: u32) -> Option<[u8; 4]> {
        let tex = self.textures.get(id.0)?;
        if x >= tex.desc.width || y >= tex.desc.height {
            return None;
        }
        let at = (y as usize * tex.desc.width as usize + x as usize) * 4;
        let mut out = [0u8; 4];
        out.copy_from_slice(&tex.rgba[at..at + 4]);
        Some(out)
    }

    pub fn buffer_contents(&self, id: BufferId) -> Option<&[u8]> {
        self.buffers.get(id.0).map(|b| b.contents.as_slice())
    }

    pub fn buffer_kind(&self, id: BufferId) -> Option<BufferKind> {
        self.buffers.get(id.0).map(|b| b.kind)
    }

    fn blit(&mut self, target: TextureId, texture: TextureId, dst: QuadRect, uv: QuadRect) {
        let Some(src) = self.textures.get(texture.0) else {
            return;
        };
        let (sw, sh) = (src.desc.width as usize, src.desc.height as usize);
        let src_rgba = src.rgba.clone();
        let Some(dst_tex) = self.textures.get_mut(target.0) else {
            return;
        };
        let (tw, th) = (dst_tex.desc.width as i64, dst_tex.desc.height as i64);
        let x0 = (dst.x0.min(dst.x1).floor() as i64).clamp(0, tw);
        let x1 = (dst.x0.max(dst.x1).ceil() as i64).clamp(0, tw);
        let y0 = (dst.y0.min(dst.y1).floor() as i64).clamp(0, th);
        let y1 = (dst.y0.max(dst.y1).ceil() as i64).clamp(0, th);
        let span_x = dst.x1 - dst.x0;
        let span_y = dst.y1 - dst.y0;
        if span_x == 0.0 || span_y == 0.0 || sw == 0 || sh == 0 {
            return;
        }
        for py in y0..y1 {
            let t = (py as f32 + 0.5 - dst.y0) / span_y;
            let v = uv.y0 + t * (uv.y1 - uv.y0);
            let sy = ((v * sh as f32).floor() as i64).clamp(0, sh as i64 - 1) as usize;
            for px in x0..x1 {
                let s = (px as f32 + 0.5 - dst.x0) / span_x;
                let u = uv.x0 + s * (uv.x1 - uv.x0);
                let sx = ((u * sw as f32).floor() as i64).clamp(0, sw as i64 - 1) as usize;
                let from = (sy * sw + sx) * 4;
                let to = (py as usize * tw as usize + px as usize) * 4;
                dst_tex.rgba[to..to + 4].copy_from_slice(&src_rgba[from..from + 4]);
            }
        }
    }
}

impl GraphicsContext for RecordingContext {
    fn create_texture(&mut self, desc: TextureDesc) -> TextureId {
        let id = TextureId(self.textures.insert(TextureRecord {
            desc,
            filter: (Filter::Linear, Filter::Linear),
            rgba: vec![0; desc.width as usize * desc.height as usize * 4],
        }));
        self.commands.push(RenderCommand::CreateTexture { id, desc });
        id
    }

    fn texture_desc(&self, id: TextureId) -> Option<TextureDesc> {
        self.textures.get(id.0).map(|t| t.desc)
    }

    fn upload_texture(
        &mut self,
        id: TextureId,
        region: TextureRegion,
        format: TextureFormat,
        pixels: &[u8],
    ) -> Result<(), GpuError> {
        let tex = self
            .textures
            .get_mut(id.0)
            .ok_or(GpuError::UnknownTexture(id))?;
        let (w, h) = (tex.desc.width, tex.desc.height);
        if region.x + region.width > w || region.y + region.height > h {
            return Err(GpuError::UploadOutOfBounds {
                region,
                width: w,
                height: h,
            });
        }
        let expected = region.width as usize * region.height as usize * format.bytes_per_pixel();
        if pixels.len() != expected {
            return Err(GpuError::UploadSize {
                expected,
                actual: pixels.len(),
            });
        }
        let rgba = convert_pixels(format, TextureFormat::Rgba, pixels);
        let row_bytes = region.width as usize * 4;
        for row in 0..region.height as usize {
            let to = ((region.y as usize + row) * w as usize + region.x as usize) * 4;
            let from = row * row_bytes;
            tex.rgba[to..to + row_bytes].copy_from_slice(&rgba[from..from + row_bytes]);
        }
        self.commands.push(RenderCommand::UploadTexture { id, region });
        Ok(())
    }

    fn set_texture_filter(&mut self, id: TextureId, min: Filter, mag: Filter) {
        if let Some(tex) = self.textures.get_mut(id.0) {
            tex.filter = (min, mag);
        }
        self.commands
            .push(RenderCommand::SetTextureFilter { id, min, mag });
    }

    fn delete_texture(&mut self, id: TextureId) {
        self.textures.remove(id.0);
        if self.bindings.texture == Some(id) {
            self.bindings.texture = None;
        }
        self.commands.push(RenderCommand::DeleteTexture(id));
    }

    fn create_buffer(&mut self, kind: BufferKind, contents: &[u8]) -> BufferId {
        let id = BufferId(self.buffers.insert(BufferRecord {
            kind,
            contents: contents.to_vec(),
        }));
        self.commands.push(RenderCommand::CreateBuffer {
            id,
            kind,
            len: contents.len(),
        });
        id
    }

    fn delete_buffer(&mut self, id: BufferId) {
        self.buffers.remove(id.0);
        self.commands.push(RenderCommand::DeleteBuffer(id));
    }

    fn bind_texture(&mut self, id: TextureId) {
        self.bindings.texture = Some(id);
        self.commands.push(RenderCommand::BindTexture(id));
    }

    fn bind_tex_coords(&mut self, id: BufferId) {
        self.bindings.tex_coords = Some(id);
        self.commands.push(RenderCommand::BindTexCoords(id));
    }

    fn bind_vertices(&mut self, id: BufferId) {
        self.bindings.vertices = Some(id);
        self.commands.push(RenderCommand::BindVertices(id));
    }

    fn bind_indices(&mut self, id: Option<BufferId>) {
        self.bindings.indices = id;
        self.commands.push(RenderCommand::BindIndices(id));
    }

    fn set_color(&mut self, rgba: [f32; 4]) {
        self.bindings.color = rgba;
        self.commands.push(RenderCommand::SetColor(rgba));
    }

    fn set_origin(&mut self, origin: [f64; 3]) {
        self.bindings.origin = origin;
        self.commands.push(RenderCommand::SetOrigin(origin));
    }

    fn draw_triangle_strip(&mut self, count: u32) {
        let b = &self.bindings;
        let call = DrawCall {
            texture: b.texture,
            tex_coords: b.tex_coords,
            vertices: b.vertices,
            indices: b.indices,
            color: b.color,
            origin: b.origin,
            count,
        };
        self.commands.push(RenderCommand::Draw(call));
    }

    fn begin_offscreen(&mut self, target: TextureId, projection: Ortho) -> Result<(), GpuError> {
        if !self.offscreen_supported {
            return Err(GpuError::FramebufferUnsupported);
        }
        if !self.textures.contains(target.0) {
            return Err(GpuError::UnknownTexture(target));
        }
        self.offscreen_target = Some(target);
        self.commands
            .push(RenderCommand::BeginOffscreen { target, projection });
        Ok(())
    }

    fn draw_offscreen_quad(&mut self, texture: TextureId, dst: QuadRect, uv: QuadRect) {
        if let Some(target) = self.offscreen_target {
            self.blit(target, texture, dst, uv);
        }
        self.commands
            .push(RenderCommand::OffscreenQuad { texture, dst, uv });
    }

    fn end_offscreen(&mut self) {
        self.offscreen_target = None;
        self.commands.push(RenderCommand::EndOffscreen);
    }
}

#[cfg(test)]
mod tests {
    use super::{RecordingContext, RenderCommand};
    use crate::context::{
        BufferKind, GpuError, GraphicsContext, Ortho, QuadRect, TextureDesc, TextureFormat,
        TextureRegion,
    };

    fn region(x: u32, y: u32, width: u32, height: u32) -> TextureRegion {
        TextureRegion {
            x,
            y,
            width,
            height,
        }
    }

    #[test]
    fn upload_converts_to_rgba_storage() {
        let mut gfx = RecordingContext::new();
        let tex = gfx.create_texture(TextureDesc::new(2, 2, TextureFormat::Luminance));
        gfx.upload_texture(tex, region(1, 1, 1, 1), TextureFormat::Luminance, &[99])
            .unwrap();
        assert_eq!(gfx.texel(tex, 1, 1), Some([99, 99, 99, 255]));
        assert_eq!(gfx.texel(tex, 0, 0), Some([0, 0, 0, 0]));
    }

    #[test]
    fn upload_rejects_out_of_bounds_region() {
        let mut gfx = RecordingContext::new();
        let tex = gfx.create_texture(TextureDesc::new(2, 2, TextureFormat::Rgba));
        let err = gfx
            .upload_texture(tex, region(1, 0, 2, 1), TextureFormat::Rgba, &[0; 8])
            .unwrap_err();
        assert!(matches!(err, GpuError::UploadOutOfBounds { .. }));
    }

    #[test]
    fn draw_captures_current_bindings() {
        let mut gfx = RecordingContext::new();
        let tex = gfx.create_texture(TextureDesc::new(1, 1, TextureFormat::Rgba));
        let vb = gfx.create_buffer(BufferKind::Vertex, &[0; 48]);
        gfx.bind_texture(tex);
        gfx.bind_vertices(vb);
        gfx.set_color([0.5, 1.0, 1.0, 1.0]);
        gfx.draw_triangle_strip(4);
        let calls = gfx.draw_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].texture, Some(tex));
        assert_eq!(calls[0].vertices, Some(vb));
        assert_eq!(calls[0].indices, None);
        assert_eq!(calls[0].color[0], 0.5);
    }

    #[test]
    fn offscreen_quad_blits_into_target_quadrant() {
        let mut gfx = RecordingContext::new();
        let src = gfx.create_texture(TextureDesc::new(2, 2, TextureFormat::Rgb));
        gfx.upload_texture(src, region(0, 0, 2, 2), TextureFormat::Rgb, &[200; 12])
            .unwrap();
        let dst = gfx.create_texture(TextureDesc::new(4, 4, TextureFormat::Rgba));
        gfx.begin_offscreen(dst, Ortho::new(0.0, 4.0, 0.0, 4.0))
            .unwrap();
        gfx.draw_offscreen_quad(
            src,
            QuadRect::new(2.0, 0.0, 4.0, 2.0),
            QuadRect::new(0.0, 0.0, 1.0, 1.0),
        );
        gfx.end_offscreen();
        assert_eq!(gfx.texel(dst, 3, 1), Some([200, 200, 200, 255]));
        assert_eq!(gfx.texel(dst, 1, 1), Some([0, 0, 0, 0]));
        assert_eq!(gfx.texel(dst, 3, 2), Some([0, 0, 0, 0]));
    }

    #[test]
    fn offscreen_can_be_unsupported() {
        let mut gfx = RecordingContext::without_offscreen();
        let dst = gfx.create_texture(TextureDesc::new(4, 4, TextureFormat::Rgba));
        assert_eq!(
            gfx.begin_offscreen(dst, Ortho::new(0.0, 4.0, 0.0, 4.0)),
            Err(GpuError::FramebufferUnsupported)
        );
    }

    #[test]
    fn delete_releases_storage() {
        let mut gfx = RecordingContext::new();
        let tex = gfx.create_texture(TextureDesc::new(1, 1, TextureFormat::Rgba));
        gfx.delete_texture(tex);
        assert_eq!(gfx.live_textures(), 0);
        assert!(!gfx.has_texture(tex));
        assert!(matches!(
            gfx.commands().last(),
            Some(RenderCommand::DeleteTexture(_))
        ));
    }
}

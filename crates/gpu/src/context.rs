use foundation::Handle;
use thiserror::Error;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TextureId(pub Handle);

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferId(pub Handle);

/// Texel layout, 8 bits per channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Luminance,
    LuminanceAlpha,
    Rgb,
    Rgba,
}

impl TextureFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            TextureFormat::Luminance => 1,
            TextureFormat::LuminanceAlpha => 2,
            TextureFormat::Rgb => 3,
            TextureFormat::Rgba => 4,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

impl TextureDesc {
    pub fn new(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }
}

/// Sub-rectangle of a texture, in texels.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TextureRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
}

/// Axis-aligned rectangle in either target units or texture coordinates.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct QuadRect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl QuadRect {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }
}

/// Orthographic projection for off-screen passes.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Ortho {
    pub left: f32,
    pub right: f32,
    pub bottom: f32,
    pub top: f32,
}

impl Ortho {
    pub fn new(left: f32, right: f32, bottom: f32, top: f32) -> Self {
        Self {
            left,
            right,
            bottom,
            top,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GpuError {
    #[error("unknown texture {0:?}")]
    UnknownTexture(TextureId),
    #[error("upload {region:?} outside texture {width}x{height}")]
    UploadOutOfBounds {
        region: TextureRegion,
        width: u32,
        height: u32,
    },
    #[error("upload expected {expected} bytes, got {actual}")]
    UploadSize { expected: usize, actual: usize },
    #[error("off-screen render targets are not supported")]
    FramebufferUnsupported,
}

/// The slice of a graphics API the tile renderer needs.
///
/// All calls happen on the render thread. Bindings persist until replaced;
/// `draw_triangle_strip` uses the currently bound texture, texture
/// coordinates, vertices, and (if bound) indices.
pub trait GraphicsContext {
    fn create_texture(&mut self, desc: TextureDesc) -> TextureId;
    fn texture_desc(&self, id: TextureId) -> Option<TextureDesc>;
    /// Uploads `pixels` laid out as `format`, converting to the texture's
    /// format when they differ.
    fn upload_texture(
        &mut self,
        id: TextureId,
        region: TextureRegion,
        format: TextureFormat,
        pixels: &[u8],
    ) -> Result<(), GpuError>;
    fn set_texture_filter(&mut self, id: TextureId, min: Filter, mag: Filter);
    fn delete_texture(&mut self, id: TextureId);

    fn create_buffer(&mut self, kind: BufferKind, contents: &[u8]) -> BufferId;
    fn delete_buffer(&mut self, id: BufferId);

    fn bind_texture(&mut self, id: TextureId);
    fn bind_tex_coords(&mut self, id: BufferId);
    fn bind_vertices(&mut self, id: BufferId);
    fn bind_indices(&mut self, id: Option<BufferId>);
    fn set_color(&mut self, rgba: [f32; 4]);
    /// Model origin added to every vertex (vertices are origin-relative f32).
    fn set_origin(&mut self, origin: [f64; 3]);
    /// Draws `count` vertices, or `count` indices when an index buffer is bound.
    fn draw_triangle_strip(&mut self, count: u32);

    /// Redirects quad draws into `target` until `end_offscreen`.
    fn begin_offscreen(&mut self, target: TextureId, projection: Ortho) -> Result<(), GpuError>;
    fn draw_offscreen_quad(&mut self, texture: TextureId, dst: QuadRect, uv: QuadRect);
    fn end_offscreen(&mut self);
}

/// Converts one pixel layout to another (8 bits per channel).
///
/// Expanding a luminance value fills every color channel; missing alpha is
/// opaque.
pub fn convert_pixels(from: TextureFormat, to: TextureFormat, pixels: &[u8]) -> Vec<u8> {
    if from == to {
        return pixels.to_vec();
    }
    let n = pixels.len() / from.bytes_per_pixel();
    let mut out = Vec::with_capacity(n * to.bytes_per_pixel());
    for px in pixels.chunks_exact(from.bytes_per_pixel()) {
        let rgba = match from {
            TextureFormat::Luminance => [px[0], px[0], px[0], 255],
            TextureFormat::LuminanceAlpha => [px[0], px[0], px[0], px[1]],
            TextureFormat::Rgb => [px[0], px[1], px[2], 255],
            TextureFormat::Rgba => [px[0], px[1], px[2], px[3]],
        };
        match to {
            TextureFormat::Luminance => out.push(rgba[0]),
            TextureFormat::LuminanceAlpha => out.extend_from_slice(&[rgba[0], rgba[3]]),
            TextureFormat::Rgb => out.extend_from_slice(&rgba[..3]),
            TextureFormat::Rgba => out.extend_from_slice(&rgba),
        }
    }
    out
}

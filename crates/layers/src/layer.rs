use gpu::GraphicsContext;
use quadtree::{DrawReport, MapView, TileState};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct LayerId(pub u64);

/// A map layer drawn by the host once per render pump.
///
/// Every method is called on the render thread.
pub trait Layer {
    fn id(&self) -> LayerId;

    /// Returns `None` when the layer has nothing to draw.
    fn draw(&mut self, view: &MapView, gfx: &mut dyn GraphicsContext) -> Option<DrawReport>;

    fn release(&mut self, gfx: &mut dyn GraphicsContext);

    fn state(&self) -> TileState;

    fn suspend(&mut self) {}

    fn resume(&mut self) {}
}

pub mod context;
pub mod mesh;
pub mod recording;

pub use context::*;
pub use mesh::*;
pub use recording::{DrawCall, RecordingContext, RenderCommand};

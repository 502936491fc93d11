pub mod cache;
pub mod memory;
pub mod prioritizer;
pub mod reader;
pub mod request;
pub mod source;

pub use cache::*;
pub use memory::*;
pub use prioritizer::*;
pub use reader::*;
pub use request::*;
pub use source::*;

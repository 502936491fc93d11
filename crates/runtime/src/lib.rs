pub mod budget;
pub mod pump;
pub mod render_queue;
pub mod work_queue;

pub use budget::*;
pub use pump::*;
pub use render_queue::*;
pub use work_queue::*;

mod buffer_pool_manager;
mod clock_replacer;
mod frame_header;
mod page_guard;

pub use buffer_pool_manager::*;
pub use clock_replacer::*;
pub use frame_header::*;
pub use page_guard::*;

pub mod event_store;
pub mod file_position_log;

pub use event_store::*;
pub use file_position_log::*;

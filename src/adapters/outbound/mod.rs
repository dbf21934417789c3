pub mod buffered_logger;
pub mod file_logger;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod mapping;
pub mod memory;
pub mod noop_logger;
pub mod postgres;

pub use buffered_logger::*;
pub use file_logger::*;
#[cfg(feature = "kafka")]
pub use kafka::*;
pub use mapping::*;
pub use memory::*;
pub use noop_logger::*;
pub use postgres::*;

pub mod actors;
pub mod aggregate;
pub mod events;
pub mod geofence;
pub mod ports;
pub mod projections;
pub mod proof;

pub use actors::*;
pub use aggregate::*;
pub use events::*;
pub use geofence::*;
pub use ports::*;
pub use projections::*;
pub use proof::*;

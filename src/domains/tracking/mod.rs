pub mod events;
pub mod feed;
pub mod ingestor;
pub mod ports;
pub mod position;
pub mod reporter;
pub mod simulator;

pub use events::*;
pub use feed::*;
pub use ingestor::*;
pub use ports::*;
pub use position::*;
pub use reporter::*;
pub use simulator::*;

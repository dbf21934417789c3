pub mod coordinate;
pub mod haversine;

pub use coordinate::*;
pub use haversine::*;

pub mod delivery;
pub mod geo;
pub mod logger;
pub mod session;
pub mod tracking;

pub use logger::*;

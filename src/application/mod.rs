pub mod delivery_service;
pub mod tracking_service;

pub use delivery_service::*;
pub use tracking_service::*;

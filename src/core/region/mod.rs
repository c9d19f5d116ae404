pub mod listeners;
pub mod model;

pub use listeners::{StatusListener, StatusListeners};
pub use model::{Region, RegionStatus};

pub mod broadcast;
pub mod engine;
pub mod registry;

pub use broadcast::BroadcastRouter;
pub use engine::SessionEngine;
pub use registry::{ConnectionRegistry, Departure};

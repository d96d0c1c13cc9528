//! Multiplexed per-job event streams for subscribers (§4.6).

pub mod bus;

pub use bus::{Event, EventBus, EventKind};

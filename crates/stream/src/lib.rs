//! Streaming: which chunks each connection should hold, and tick timing.
//!
//! # Invariants
//! - A connection never holds more chunks than its view square contains once
//!   the unload budget has caught up.
//! - Chunks are sent nearest first; no chunk is sent twice without an unload
//!   in between.

mod timer;
mod view;

pub use timer::TickTimer;
pub use view::{StreamConfig, StreamStats, ViewTracker, ViewUpdate};

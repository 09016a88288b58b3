//! Progress event emitter
//!
//! Turns byte-level transfer progress into a throttled sequence of
//! self-contained events, delivered to the caller over a per-session channel.

mod emitter;
mod event;
mod throttle;

pub use emitter::{EventEmitter, channel};
pub use event::{ProgressEvent, STORAGE_FAILED_MESSAGE, TRANSFER_FAILED_MESSAGE};
#[cfg(test)]
pub use throttle::PERCENT_STEP;

//! Real-time hand-off primitives
//!
//! - [`gc`]: collector thread for deferred reclamation
//! - [`channel`]: snapshot publisher from the control thread to the audio thread

pub mod channel;
pub mod gc;

pub use channel::{PublishError, RealtimeStateChannel, Snapshot};
pub use gc::gc_handle;

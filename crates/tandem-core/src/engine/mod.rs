//! Control-side engines
//!
//! - [`ReceiverEngine`]: owns every inbound bridge and publishes the active
//!   set to the inbound dispatcher
//! - [`SenderEngine`]: the same for outbound bridges
//! - [`ControlLoop`]: applies [`ControlEvent`](crate::events::ControlEvent)s
//!   to both engines and reports the outcome

mod control;
mod receivers;
mod senders;

pub use control::*;
pub use receivers::*;
pub use senders::*;

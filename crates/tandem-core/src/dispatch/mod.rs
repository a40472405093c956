//! Per-callback block dispatch
//!
//! A dispatcher is owned by the audio thread and runs once per hardware
//! callback. It reads the clock, resolves drift between the network timebase
//! and the device, and runs every active bridge for one block:
//!
//! - [`InboundDispatcher`]: pulls each inbound bridge's block, mixes them and
//!   runs the global drift converter into the device output.
//! - [`OutboundDispatcher`]: stamps the device input block and forwards it to
//!   each outbound bridge.
//!
//! The set of active bridges arrives through a
//! [`RealtimeStateChannel`](crate::rt::RealtimeStateChannel) and is acquired
//! fresh at the start of every block.

mod inbound;
mod outbound;

pub use inbound::InboundDispatcher;
pub use outbound::OutboundDispatcher;

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use basedrop::Shared;

use crate::bridge::{InboundBridgeState, OutboundBridgeState};

/// Inbound bridges as seen by the audio thread
pub type ActiveInboundSet = Vec<Shared<InboundBridgeState>>;

/// Outbound bridges as seen by the audio thread
pub type ActiveOutboundSet = Vec<Shared<OutboundBridgeState>>;

/// Dispatcher state readable from other threads
///
/// Written by the audio thread with relaxed atomics once per block.
#[derive(Debug)]
pub struct DispatchStats {
    ratio_bits: AtomicU64,
    drift_frames: AtomicI64,
    blocks: AtomicU64,
    realignments: AtomicU64,
}

impl DispatchStats {
    pub fn new() -> Self {
        Self {
            ratio_bits: AtomicU64::new(1.0f64.to_bits()),
            drift_frames: AtomicI64::new(0),
            blocks: AtomicU64::new(0),
            realignments: AtomicU64::new(0),
        }
    }

    /// Damped correction ratio applied to the last block
    pub fn ratio(&self) -> f64 {
        f64::from_bits(self.ratio_bits.load(Ordering::Relaxed))
    }

    /// Measured drift (network clock minus play position) in device frames
    pub fn drift_frames(&self) -> i64 {
        self.drift_frames.load(Ordering::Relaxed)
    }

    pub fn blocks(&self) -> u64 {
        self.blocks.load(Ordering::Relaxed)
    }

    pub fn realignments(&self) -> u64 {
        self.realignments.load(Ordering::Relaxed)
    }

    fn record_block(&self, ratio: f64, drift_frames: i64) {
        self.ratio_bits.store(ratio.to_bits(), Ordering::Relaxed);
        self.drift_frames.store(drift_frames, Ordering::Relaxed);
        self.blocks.fetch_add(1, Ordering::Relaxed);
    }

    fn record_realignment(&self) {
        self.realignments.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for DispatchStats {
    fn default() -> Self {
        Self::new()
    }
}

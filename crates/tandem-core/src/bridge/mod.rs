//! Clock-domain bridges
//!
//! A bridge carries one network stream across the boundary between the PTP
//! timebase and the device timebase:
//!
//! - [`InboundBridge`]: network → device. Reads the stream at a timestamp
//!   cursor and, when the stream rate differs from the device rate, converts
//!   it with a fixed-ratio resampler.
//! - [`OutboundBridge`]: device → network. Stamps device blocks and hands
//!   them to the stream layer.
//!
//! Each bridge is split in two. The control-side half (`InboundBridge`,
//! `OutboundBridge`) owns configuration and builds immutable state snapshots
//! ([`InboundBridgeState`], [`OutboundBridgeState`]); the dispatchers run
//! those snapshots on the audio thread.
//!
//! # Lifecycle
//!
//! ```text
//!  Unconfigured ──prepare_input──► InputReady ──prepare_output──► OutputReady
//!       ▲                              ▲                               │
//!       └──────────── reset ───────────┴──────── release_output ───────┘
//! ```

mod inbound;
mod outbound;

pub use inbound::{InboundBridge, InboundBridgeState};
pub use outbound::{OutboundBridge, OutboundBridgeState, SendOutcome};

use crate::clock::ClockTime;
use crate::diagnostics::SkipReason;
use crate::timestamp::WrappingU32;
use crate::types::RESAMPLER_GUARD_FRAMES;

/// Configuration progress of a bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BridgePhase {
    #[default]
    Unconfigured,
    /// Network-side format known
    InputReady,
    /// Both sides known, processing enabled
    OutputReady,
}

/// How an inbound bridge moves samples between rate domains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionMode {
    /// Stream and device rates match; samples are read straight into the output
    PassThrough,
    /// Rates differ; a fixed-ratio resampler converts stream to device rate
    Resampling { input_rate: u32, output_rate: u32 },
}

/// Per-block timing handed to every bridge by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockTiming {
    /// Device-rate timestamp of the first frame of this block
    pub device_timestamp: WrappingU32,
    /// Network time the block was stamped with
    pub now: ClockTime,
    /// Alignment epoch; a change means the timebase was re-seeded
    pub epoch: u64,
}

/// Result of one bridge block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    Delivered,
    /// The block was replaced with silence (or not sent)
    Skipped(SkipReason),
}

impl BlockOutcome {
    #[inline]
    pub fn is_delivered(self) -> bool {
        matches!(self, BlockOutcome::Delivered)
    }
}

/// Largest block a bridge is asked for, given the device block ceiling
///
/// The global drift converter pulls slightly more or fewer frames than the
/// device block, so bridges are prepared for a little headroom.
pub fn bridge_block_ceiling(max_frames_per_block: usize) -> usize {
    max_frames_per_block + max_frames_per_block / 50 + 2 * RESAMPLER_GUARD_FRAMES
}

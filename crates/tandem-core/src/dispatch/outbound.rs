//! Device → network block dispatch
//!
//! Device input is never resampled on the way out, so the correction lives
//! in the timestamp alone: every block is stamped with the network clock's
//! device-rate time at the callback. The stamp follows the clock to within a
//! frame at all times. The gap to the previous block's end is the measured
//! drift; a gap beyond the re-alignment threshold is reported as a
//! discontinuity.

use std::sync::Arc;

use super::{ActiveOutboundSet, DispatchStats};
use crate::bridge::SendOutcome;
use crate::clock::{ClockSource, ClockTime};
use crate::config::DriftConfig;
use crate::diagnostics::{SkipReason, StatusEvent, StatusSender};
use crate::format::DeviceFormat;
use crate::rt::RealtimeStateChannel;
use crate::stream::StreamWriter;
use crate::timestamp::WrappingU32;
use crate::types::AudioBuffer;

/// Audio-thread driver for all outbound bridges of one device
pub struct OutboundDispatcher {
    device: DeviceFormat,
    drift: DriftConfig,
    clock: Arc<dyn ClockSource>,
    writer: Arc<dyn StreamWriter>,
    bridges: Arc<RealtimeStateChannel<ActiveOutboundSet>>,
    cursor: Option<WrappingU32>,
    status: StatusSender,
    stats: Arc<DispatchStats>,
}

impl OutboundDispatcher {
    pub fn new(
        device: DeviceFormat,
        drift: DriftConfig,
        bridges: Arc<RealtimeStateChannel<ActiveOutboundSet>>,
        clock: Arc<dyn ClockSource>,
        writer: Arc<dyn StreamWriter>,
        status: StatusSender,
    ) -> Self {
        Self {
            device,
            drift,
            clock,
            writer,
            bridges,
            cursor: None,
            status,
            stats: Arc::new(DispatchStats::new()),
        }
    }

    pub fn device(&self) -> DeviceFormat {
        self.device
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }

    /// Timestamp a contiguous next block would carry, once seeded
    pub fn cursor(&self) -> Option<WrappingU32> {
        self.cursor
    }

    /// Stamp one device input block and forward it to every active sender
    ///
    /// Returns false if the block was dropped as a whole. Individual write
    /// failures are reported but do not fail the block.
    pub fn process(&mut self, input: &AudioBuffer, host_time_ns: Option<u64>) -> bool {
        self.status.begin_block();
        let frames = input.num_frames();
        if frames == 0 {
            return true;
        }
        if frames > self.device.max_frames_per_block {
            self.status.report(StatusEvent::DeviceBlockSkipped {
                reason: SkipReason::BlockTooLarge { frames },
            });
            return false;
        }

        if !self.clock.is_locked() || !self.clock.is_calibrated() {
            self.cursor = None;
            self.status.report(StatusEvent::ClockUnavailable);
            return false;
        }

        let now = match host_time_ns {
            Some(host_ns) => self.clock.adjusted_time(host_ns),
            None => self.clock.now(),
        };
        let stamp = self.resolve_stamp(now, frames);

        let bridges = self.bridges.acquire();
        for bridge in bridges.iter() {
            match bridge.send(&*self.writer, input, stamp) {
                SendOutcome::Sent => {}
                SendOutcome::Skipped(reason) => self.status.report(StatusEvent::BlockSkipped {
                    stream: bridge.id(),
                    reason,
                }),
                SendOutcome::Failed(error) => self.status.report(StatusEvent::WriteFailed {
                    stream: bridge.id(),
                    error,
                }),
            }
        }

        self.cursor = Some(stamp.advance(frames as u32));
        true
    }

    /// Stamp for a block starting at `now`; measures the gap to the last one
    fn resolve_stamp(&mut self, now: ClockTime, frames: usize) -> WrappingU32 {
        let rtp_now = now.to_rtp_timestamp32(self.device.sample_rate());
        let Some(cursor) = self.cursor else {
            self.stats.record_block(1.0, 0);
            return rtp_now;
        };

        let drift = rtp_now.diff(cursor);
        if drift.abs() > self.drift.realign_threshold_frames(frames) {
            self.stats.record_realignment();
            self.stats.record_block(1.0, 0);
            self.status.report(StatusEvent::Realigned { drift_frames: drift });
            return rtp_now;
        }

        let rate = self.device.sample_rate() as f64;
        self.stats.record_block((rate + drift as f64) / rate, drift);
        rtp_now
    }
}

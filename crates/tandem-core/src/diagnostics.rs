//! Status reporting from the audio thread
//!
//! The audio thread never logs: formatting and I/O would blow the callback
//! deadline. Instead it pushes small [`StatusEvent`]s into a wait-free `rtrb`
//! ring and the control thread drains them with a [`StatusMonitor`], which
//! logs each one and keeps running counters.
//!
//! A stream that goes silent fails every block, so reporting is rate limited
//! per event kind: at most one event of a kind per `interval_blocks` blocks.
//! Events that were held back are counted and the count rides along with the
//! next event of that kind that does get through.
//!
//! ```ignore
//! let (mut status, mut monitor) = status_channel(256, 500);
//!
//! // Audio thread
//! status.begin_block();
//! status.report(StatusEvent::BlockSkipped { stream, reason: SkipReason::NoData });
//!
//! // Control thread
//! monitor.poll();
//! println!("{:?}", monitor.counters());
//! ```

use crate::stream::WriteError;
use crate::types::StreamId;

/// Why a block produced silence instead of audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Bridge is not `OutputReady` (or a sender is disabled)
    NotReady,
    /// The stream layer had no data for the requested position
    NoData,
    /// The converter generated fewer frames than requested
    ResamplerShort { requested: usize, generated: usize },
    /// The converter returned an error
    ResamplerFailed,
    /// Block larger than the buffers prepared for the device
    BlockTooLarge { frames: usize },
    /// Bridge state was in use elsewhere for this block
    Busy,
}

/// One status event raised on the audio thread
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatusEvent {
    /// A stream's contribution to a block was replaced by silence
    BlockSkipped { stream: StreamId, reason: SkipReason },
    /// The whole device block was replaced by silence
    DeviceBlockSkipped { reason: SkipReason },
    /// Drift exceeded the re-alignment threshold; the timebase was re-seeded
    Realigned { drift_frames: i64 },
    /// The stream layer refused an outbound block
    WriteFailed { stream: StreamId, error: WriteError },
    /// Clock not locked/calibrated; output muted
    ClockUnavailable,
}

/// Kinds used for rate limiting (one limiter slot each)
///
/// Converter shortfalls get their own slots so a suppressed count always
/// describes events of a single class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    BlockSkipped,
    DeviceBlockSkipped,
    ResamplerShort,
    DeviceResamplerShort,
    Realigned,
    WriteFailed,
    ClockUnavailable,
}

const NUM_KINDS: usize = 7;

impl StatusKind {
    fn index(self) -> usize {
        match self {
            StatusKind::BlockSkipped => 0,
            StatusKind::DeviceBlockSkipped => 1,
            StatusKind::ResamplerShort => 2,
            StatusKind::DeviceResamplerShort => 3,
            StatusKind::Realigned => 4,
            StatusKind::WriteFailed => 5,
            StatusKind::ClockUnavailable => 6,
        }
    }
}

impl StatusEvent {
    pub fn kind(&self) -> StatusKind {
        match self {
            StatusEvent::BlockSkipped {
                reason: SkipReason::ResamplerShort { .. },
                ..
            } => StatusKind::ResamplerShort,
            StatusEvent::BlockSkipped { .. } => StatusKind::BlockSkipped,
            StatusEvent::DeviceBlockSkipped {
                reason: SkipReason::ResamplerShort { .. },
            } => StatusKind::DeviceResamplerShort,
            StatusEvent::DeviceBlockSkipped { .. } => StatusKind::DeviceBlockSkipped,
            StatusEvent::Realigned { .. } => StatusKind::Realigned,
            StatusEvent::WriteFailed { .. } => StatusKind::WriteFailed,
            StatusEvent::ClockUnavailable => StatusKind::ClockUnavailable,
        }
    }
}

/// An event as delivered to the control thread
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusReport {
    /// Block counter value when the event was raised
    pub block: u64,
    /// Events of the same kind held back since the previous report
    pub suppressed: u32,
    pub event: StatusEvent,
}

/// Audio-thread end of the status ring
pub struct StatusSender {
    producer: rtrb::Producer<StatusReport>,
    interval_blocks: u64,
    block: u64,
    last_sent: [Option<u64>; NUM_KINDS],
    suppressed: [u32; NUM_KINDS],
}

impl StatusSender {
    /// Mark the start of a new device block
    #[inline]
    pub fn begin_block(&mut self) {
        self.block = self.block.wrapping_add(1);
    }

    /// Report an event, subject to per-kind rate limiting
    ///
    /// Never blocks or allocates. If the ring is full the event is counted as
    /// suppressed.
    pub fn report(&mut self, event: StatusEvent) {
        let slot = event.kind().index();
        if let Some(last) = self.last_sent[slot] {
            if self.block.wrapping_sub(last) < self.interval_blocks {
                self.suppressed[slot] = self.suppressed[slot].saturating_add(1);
                return;
            }
        }

        let report = StatusReport {
            block: self.block,
            suppressed: self.suppressed[slot],
            event,
        };
        match self.producer.push(report) {
            Ok(()) => {
                self.last_sent[slot] = Some(self.block);
                self.suppressed[slot] = 0;
            }
            Err(rtrb::PushError::Full(_)) => {
                self.suppressed[slot] = self.suppressed[slot].saturating_add(1);
            }
        }
    }

    pub fn blocks(&self) -> u64 {
        self.block
    }
}

/// Running totals of everything the audio thread reported
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticCounters {
    pub blocks_skipped: u64,
    pub device_blocks_skipped: u64,
    pub resampler_mismatches: u64,
    pub realignments: u64,
    pub write_failures: u64,
    pub clock_unavailable: u64,
    /// Events that were rate limited away (included in the totals above)
    pub suppressed: u64,
}

/// Control-thread end of the status ring
pub struct StatusMonitor {
    consumer: rtrb::Consumer<StatusReport>,
    counters: DiagnosticCounters,
}

impl StatusMonitor {
    /// Drain pending reports, log them and update the counters
    ///
    /// Returns the drained reports in arrival order.
    pub fn poll(&mut self) -> Vec<StatusReport> {
        let mut reports = Vec::new();
        while let Ok(report) = self.consumer.pop() {
            self.record(&report);
            log_report(&report);
            reports.push(report);
        }
        reports
    }

    pub fn counters(&self) -> DiagnosticCounters {
        self.counters
    }

    fn record(&mut self, report: &StatusReport) {
        let count = 1 + report.suppressed as u64;
        let counters = &mut self.counters;
        counters.suppressed += report.suppressed as u64;
        match report.event {
            StatusEvent::BlockSkipped { reason, .. } => {
                counters.blocks_skipped += count;
                if matches!(reason, SkipReason::ResamplerShort { .. }) {
                    counters.resampler_mismatches += count;
                }
            }
            StatusEvent::DeviceBlockSkipped { reason } => {
                counters.device_blocks_skipped += count;
                if matches!(reason, SkipReason::ResamplerShort { .. }) {
                    counters.resampler_mismatches += count;
                }
            }
            StatusEvent::Realigned { .. } => counters.realignments += count,
            StatusEvent::WriteFailed { .. } => counters.write_failures += count,
            StatusEvent::ClockUnavailable => counters.clock_unavailable += count,
        }
    }
}

fn log_report(report: &StatusReport) {
    let suffix = if report.suppressed > 0 {
        format!(" ({} similar suppressed)", report.suppressed)
    } else {
        String::new()
    };
    match report.event {
        StatusEvent::BlockSkipped { stream, reason } => {
            log::warn!("{}: block {} skipped: {:?}{}", stream, report.block, reason, suffix)
        }
        StatusEvent::DeviceBlockSkipped { reason } => {
            log::warn!("Device block {} skipped: {:?}{}", report.block, reason, suffix)
        }
        StatusEvent::Realigned { drift_frames } => {
            log::warn!(
                "Re-aligned at block {} after {} frames of drift{}",
                report.block,
                drift_frames,
                suffix
            )
        }
        StatusEvent::WriteFailed { stream, error } => {
            log::warn!("{}: write failed at block {}: {}{}", stream, report.block, error, suffix)
        }
        StatusEvent::ClockUnavailable => {
            log::info!("Clock not locked at block {}, output muted{}", report.block, suffix)
        }
    }
}

/// Create a status ring with per-kind rate limiting
pub fn status_channel(capacity: usize, interval_blocks: u32) -> (StatusSender, StatusMonitor) {
    let (producer, consumer) = rtrb::RingBuffer::new(capacity.max(1));
    (
        StatusSender {
            producer,
            interval_blocks: interval_blocks as u64,
            block: 0,
            last_sent: [None; NUM_KINDS],
            suppressed: [0; NUM_KINDS],
        },
        StatusMonitor {
            consumer,
            counters: DiagnosticCounters::default(),
        },
    )
}

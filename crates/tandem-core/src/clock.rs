//! Read interface to the recovered network clock
//!
//! The clock-recovery algorithm itself lives elsewhere; the bridges only need
//! to know what time it is, whether the clock can be trusted yet, and how to
//! turn a time into a 32-bit sample timestamp at a given rate.

use std::fmt;

use crate::timestamp::WrappingU32;

const NANOS_PER_SECOND: u128 = 1_000_000_000;

/// A point on the network timebase, in nanoseconds since the PTP epoch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime {
    nanos: u64,
}

impl ClockTime {
    pub const fn from_nanos(nanos: u64) -> Self {
        Self { nanos }
    }

    pub const fn nanos(self) -> u64 {
        self.nanos
    }

    /// Whole samples elapsed at `sample_rate` since the epoch
    pub fn to_samples(self, sample_rate: u32) -> u64 {
        (self.nanos as u128 * sample_rate as u128 / NANOS_PER_SECOND) as u64
    }

    /// Time of sample `samples` at `sample_rate`
    ///
    /// Rounds up so that `from_samples(n, rate).to_samples(rate) == n`.
    pub fn from_samples(samples: u64, sample_rate: u32) -> Self {
        if sample_rate == 0 {
            return Self::default();
        }
        let nanos = (samples as u128 * NANOS_PER_SECOND).div_ceil(sample_rate as u128);
        Self { nanos: nanos.min(u64::MAX as u128) as u64 }
    }

    /// Lower 32 bits of the sample count at `sample_rate` (an RTP timestamp)
    pub fn to_rtp_timestamp32(self, sample_rate: u32) -> WrappingU32 {
        WrappingU32(self.to_samples(sample_rate) as u32)
    }

    /// Recover the full time of a 32-bit timestamp, picking the wrap closest to `near`
    ///
    /// Used to move a cursor from one rate domain to another: a device-rate
    /// timestamp is resolved against "now" and re-expressed at the stream rate.
    pub fn from_rtp_timestamp32(timestamp: WrappingU32, sample_rate: u32, near: ClockTime) -> Self {
        let near_ts = near.to_rtp_timestamp32(sample_rate);
        let near_samples = near.to_samples(sample_rate);
        let offset = timestamp.diff(near_ts);
        let samples = (near_samples as i128 + offset as i128).max(0) as u64;
        Self::from_samples(samples, sample_rate)
    }

    pub fn saturating_add_nanos(self, nanos: u64) -> Self {
        Self { nanos: self.nanos.saturating_add(nanos) }
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.nanos / 1_000_000_000;
        let sub = self.nanos % 1_000_000_000;
        write!(f, "{}.{:09}", secs, sub)
    }
}

/// The PTP clock as seen from the audio side
///
/// All methods must be callable from the audio thread: no blocking, no
/// allocation.
pub trait ClockSource: Send + Sync {
    /// Current network time
    fn now(&self) -> ClockTime;

    /// Clock is locked to a grandmaster and safe to derive timestamps from
    fn is_locked(&self) -> bool;

    /// Clock has a calibrated local-to-network mapping for host timestamps
    fn is_calibrated(&self) -> bool;

    /// Map a host (local monotonic) timestamp onto the network timebase
    fn adjusted_time(&self, host_time_ns: u64) -> ClockTime;

    /// Current host time in the timebase `adjusted_time` expects
    ///
    /// Lets a device backend anchor its own callback timestamps. Clocks
    /// without a host mapping return `None`.
    fn host_time_ns(&self) -> Option<u64> {
        None
    }
}

impl<C: ClockSource + ?Sized> ClockSource for std::sync::Arc<C> {
    fn now(&self) -> ClockTime {
        (**self).now()
    }

    fn is_locked(&self) -> bool {
        (**self).is_locked()
    }

    fn is_calibrated(&self) -> bool {
        (**self).is_calibrated()
    }

    fn adjusted_time(&self, host_time_ns: u64) -> ClockTime {
        (**self).adjusted_time(host_time_ns)
    }

    fn host_time_ns(&self) -> Option<u64> {
        (**self).host_time_ns()
    }
}

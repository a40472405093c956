//! Stand-ins for the network side when running against a real device
//!
//! - [`SystemClock`]: the host clock, optionally skewed, posing as a locked
//!   PTP clock
//! - [`ToneSource`]: receivers that always have a sine tone ready at any
//!   timestamp
//! - [`MeterWriter`]: a sender sink that only meters what it is given

use std::collections::HashMap;
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tandem_core::clock::{ClockSource, ClockTime};
use tandem_core::stream::{ReadOptions, StreamReader, StreamWriter, WriteError};
use tandem_core::timestamp::WrappingU32;
use tandem_core::{AudioBuffer, StreamId};

const TONE_AMPLITUDE: f64 = 0.2;

/// Host clock posing as a locked network clock
pub struct SystemClock {
    origin: Instant,
    origin_nanos: u64,
    skew: f64,
}

impl SystemClock {
    /// `ppm` makes the clock run that many parts per million fast
    pub fn new(ppm: f64) -> Self {
        let origin_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self {
            origin: Instant::now(),
            origin_nanos,
            skew: 1.0 + ppm * 1e-6,
        }
    }
}

impl ClockSource for SystemClock {
    fn now(&self) -> ClockTime {
        let host = self.origin_nanos.saturating_add(self.origin.elapsed().as_nanos() as u64);
        self.adjusted_time(host)
    }

    fn is_locked(&self) -> bool {
        true
    }

    fn is_calibrated(&self) -> bool {
        true
    }

    /// Host time runs unskewed from the same origin
    fn adjusted_time(&self, host_time_ns: u64) -> ClockTime {
        let elapsed = host_time_ns.saturating_sub(self.origin_nanos) as f64 * self.skew;
        ClockTime::from_nanos(self.origin_nanos.saturating_add(elapsed as u64))
    }

    fn host_time_ns(&self) -> Option<u64> {
        Some(self.origin_nanos.saturating_add(self.origin.elapsed().as_nanos() as u64))
    }
}

#[derive(Debug, Clone, Copy)]
struct Tone {
    hz: f64,
    sample_rate: f64,
}

/// Receivers producing a phase-continuous sine keyed on the read timestamp
#[derive(Default)]
pub struct ToneSource {
    tones: HashMap<StreamId, Tone>,
}

impl ToneSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tone(mut self, stream: StreamId, hz: f32, sample_rate: u32) -> Self {
        self.tones.insert(
            stream,
            Tone {
                hz: hz as f64,
                sample_rate: sample_rate as f64,
            },
        );
        self
    }
}

impl StreamReader for ToneSource {
    fn read_audio_data_realtime(
        &self,
        stream: StreamId,
        output: &mut AudioBuffer,
        frames: usize,
        at: WrappingU32,
        _options: ReadOptions,
    ) -> Option<usize> {
        let tone = self.tones.get(&stream)?;
        let frames = frames.min(output.capacity());
        output.set_num_frames(frames);
        let cycles_per_frame = tone.hz / tone.sample_rate;
        for ch in 0..output.num_channels() {
            for (i, sample) in output.channel_mut(ch).iter_mut().enumerate() {
                let ts = at.advance(i as u32).value() as f64;
                *sample = ((ts * cycles_per_frame).fract() * TAU).sin() as f32 * TONE_AMPLITUDE as f32;
            }
        }
        Some(frames)
    }
}

/// Sender sink that counts blocks and tracks the peak level
#[derive(Default)]
pub struct MeterWriter {
    blocks: AtomicU64,
    peak_bits: AtomicU32,
}

impl MeterWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks received so far and the peak since the last call
    pub fn take_reading(&self) -> (u64, f32) {
        let peak = f32::from_bits(self.peak_bits.swap(0, Ordering::Relaxed));
        (self.blocks.load(Ordering::Relaxed), peak)
    }
}

impl StreamWriter for MeterWriter {
    fn send_audio_data_realtime(
        &self,
        _stream: StreamId,
        input: &AudioBuffer,
        _frames: usize,
        _at: WrappingU32,
    ) -> Result<(), WriteError> {
        // Non-negative floats order the same as their bit patterns
        self.peak_bits.fetch_max(input.peak().to_bits(), Ordering::Relaxed);
        self.blocks.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

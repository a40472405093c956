//! Deterministic collaborators for unit tests

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::clock::{ClockSource, ClockTime};
use crate::resample::{Asrc, AsrcError, AsrcFactory, ProcessedFrames, ResamplerQuality};
use crate::stream::{ReadOptions, StreamReader, StreamWriter, WriteError};
use crate::timestamp::WrappingU32;
use crate::types::{AudioBuffer, StreamId};

/// Period of the ramp produced by [`RampReader`]
pub const RAMP_PERIOD: u32 = 4096;

/// Offset separating the ramps of different streams
pub const STREAM_OFFSET: f32 = 10_000.0;

/// Sample value [`RampReader`] produces for `stream` at timestamp `ts`
pub fn ramp_value(stream: StreamId, ts: WrappingU32) -> f32 {
    (ts.value() % RAMP_PERIOD) as f32 + stream.0 as f32 * STREAM_OFFSET
}

/// Clock advanced explicitly by the test, optionally running fast or slow
pub struct SimulatedClock {
    nanos: AtomicU64,
    ppm: f64,
    locked: AtomicBool,
    calibrated: AtomicBool,
}

impl SimulatedClock {
    /// Clock at `start`, running `ppm` parts per million fast
    pub fn new(start: ClockTime, ppm: f64) -> Self {
        Self {
            nanos: AtomicU64::new(start.nanos()),
            ppm,
            locked: AtomicBool::new(true),
            calibrated: AtomicBool::new(true),
        }
    }

    /// Clock whose 32-bit timestamp at `rate` is `frames_before_wrap` short of wrapping
    pub fn near_wrap(rate: u32, frames_before_wrap: u64, ppm: f64) -> Self {
        let samples = (3u64 << 32) - frames_before_wrap;
        Self::new(ClockTime::from_samples(samples, rate), ppm)
    }

    /// Advance by the duration of `frames` device frames (plus drift)
    pub fn advance_frames(&self, frames: usize, rate: u32) {
        let nominal = frames as f64 * 1e9 / rate as f64;
        let nanos = (nominal * (1.0 + self.ppm * 1e-6)).round() as u64;
        self.nanos.fetch_add(nanos, Ordering::SeqCst);
    }

    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::SeqCst);
    }

    pub fn set_calibrated(&self, calibrated: bool) {
        self.calibrated.store(calibrated, Ordering::SeqCst);
    }
}

impl ClockSource for SimulatedClock {
    fn now(&self) -> ClockTime {
        ClockTime::from_nanos(self.nanos.load(Ordering::SeqCst))
    }

    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    fn is_calibrated(&self) -> bool {
        self.calibrated.load(Ordering::SeqCst)
    }

    fn adjusted_time(&self, host_time_ns: u64) -> ClockTime {
        ClockTime::from_nanos(host_time_ns)
    }
}

/// Stream layer that always has data: a per-stream sawtooth keyed on timestamp
#[derive(Default)]
pub struct RampReader {
    missing: Mutex<HashSet<StreamId>>,
    reads: AtomicUsize,
}

impl RampReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make reads of `stream` return no data
    pub fn set_missing(&self, stream: StreamId, missing: bool) {
        let mut set = self.missing.lock().unwrap();
        if missing {
            set.insert(stream);
        } else {
            set.remove(&stream);
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl StreamReader for RampReader {
    fn read_audio_data_realtime(
        &self,
        stream: StreamId,
        output: &mut AudioBuffer,
        frames: usize,
        at: WrappingU32,
        _options: ReadOptions,
    ) -> Option<usize> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.missing.lock().unwrap().contains(&stream) {
            return None;
        }
        let frames = frames.min(output.capacity());
        output.set_num_frames(frames);
        for ch in 0..output.num_channels() {
            for (i, sample) in output.channel_mut(ch).iter_mut().enumerate() {
                *sample = ramp_value(stream, at.advance(i as u32));
            }
        }
        Some(frames)
    }
}

/// One block handed to [`RecordingWriter`]
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenBlock {
    pub stream: StreamId,
    pub timestamp: WrappingU32,
    pub frames: usize,
    pub first_sample: f32,
}

/// Stream layer that records every outbound block
#[derive(Default)]
pub struct RecordingWriter {
    blocks: Mutex<Vec<WrittenBlock>>,
    fail_with: Mutex<Option<WriteError>>,
}

impl RecordingWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, error: Option<WriteError>) {
        *self.fail_with.lock().unwrap() = error;
    }

    pub fn blocks(&self) -> Vec<WrittenBlock> {
        self.blocks.lock().unwrap().clone()
    }
}

impl StreamWriter for RecordingWriter {
    fn send_audio_data_realtime(
        &self,
        stream: StreamId,
        input: &AudioBuffer,
        frames: usize,
        at: WrappingU32,
    ) -> Result<(), WriteError> {
        if let Some(error) = *self.fail_with.lock().unwrap() {
            return Err(error);
        }
        let first_sample = if input.num_channels() > 0 && input.num_frames() > 0 {
            input.channel(0)[0]
        } else {
            0.0
        };
        self.blocks.lock().unwrap().push(WrittenBlock {
            stream,
            timestamp: at,
            frames,
            first_sample,
        });
        Ok(())
    }
}

/// Linear-interpolating converter with exact frame accounting
///
/// Consumes every input frame it is given and keeps the unconsumed tail as
/// history, so long-run consumption tracks the requested ratio exactly. At
/// ratio 1.0 between equal rates it is a bit-exact identity.
pub struct LinearAsrc {
    num_channels: usize,
    nominal_step: f64,
    max_output_frames: usize,
    pending: Vec<Vec<f32>>,
    position: f64,
    shortfall_on_first_call: usize,
    calls: usize,
}

impl LinearAsrc {
    pub fn new(num_channels: usize, input_rate: u32, output_rate: u32, max_output_frames: usize) -> Self {
        Self {
            num_channels,
            nominal_step: input_rate as f64 / output_rate as f64,
            max_output_frames,
            pending: vec![Vec::new(); num_channels],
            position: 0.0,
            shortfall_on_first_call: 0,
            calls: 0,
        }
    }

    /// Generate `frames` fewer frames than requested on the first call
    pub fn with_first_call_shortfall(mut self, frames: usize) -> Self {
        self.shortfall_on_first_call = frames;
        self
    }

    fn pending_frames(&self) -> usize {
        self.pending.first().map_or(0, Vec::len)
    }

    fn sample(&self, ch: usize, t: f64) -> f32 {
        let channel = &self.pending[ch];
        let index = t.floor() as usize;
        let frac = t - t.floor();
        let a = channel.get(index).copied().unwrap_or(0.0);
        if frac == 0.0 {
            return a;
        }
        let b = channel.get(index + 1).copied().unwrap_or(a);
        a + (b - a) * frac as f32
    }
}

impl Asrc for LinearAsrc {
    fn num_channels(&self) -> usize {
        self.num_channels
    }

    fn max_output_frames(&self) -> usize {
        self.max_output_frames
    }

    fn max_input_frames(&self) -> usize {
        (self.max_output_frames as f64 * self.nominal_step * 1.1).ceil() as usize + 2
    }

    fn required_input_frames(&mut self, output_frames: usize, ratio: f64) -> usize {
        if output_frames == 0 {
            return 0;
        }
        let step = self.nominal_step * ratio;
        let last = self.position + (output_frames - 1) as f64 * step;
        let mut needed = last.floor() as usize + 1;
        if last.fract() > 0.0 {
            needed += 1;
        }
        needed.saturating_sub(self.pending_frames())
    }

    fn process(
        &mut self,
        input: &AudioBuffer,
        input_frames: usize,
        output: &mut AudioBuffer,
        output_frames: usize,
        ratio: f64,
    ) -> Result<ProcessedFrames, AsrcError> {
        let needed = self.required_input_frames(output_frames, ratio);
        if input_frames < needed {
            return Err(AsrcError::BufferTooSmall {
                needed,
                available: input_frames,
            });
        }

        for (ch, pending) in self.pending.iter_mut().enumerate() {
            pending.extend_from_slice(&input.raw_channels()[ch][..input_frames]);
        }

        self.calls += 1;
        let generated = if self.calls == 1 {
            output_frames.saturating_sub(self.shortfall_on_first_call)
        } else {
            output_frames
        };

        let step = self.nominal_step * ratio;
        output.set_num_frames(generated);
        for ch in 0..self.num_channels.min(output.num_channels()) {
            for i in 0..generated {
                let value = self.sample(ch, self.position + i as f64 * step);
                output.channel_mut(ch)[i] = value;
            }
        }

        self.position += generated as f64 * step;
        let consumed = (self.position.floor() as usize).min(self.pending_frames());
        for pending in &mut self.pending {
            pending.drain(..consumed);
        }
        self.position -= consumed as f64;

        Ok(ProcessedFrames {
            frames_used: input_frames,
            frames_generated: generated,
        })
    }

    fn reset(&mut self) {
        for pending in &mut self.pending {
            pending.clear();
        }
        self.position = 0.0;
    }
}

/// Factory handing out [`LinearAsrc`]s, counting how many it created
#[derive(Default)]
pub struct LinearFactory {
    created: AtomicUsize,
    first_call_shortfall: usize,
}

impl LinearFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_first_call_shortfall(frames: usize) -> Self {
        Self {
            created: AtomicUsize::new(0),
            first_call_shortfall: frames,
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl AsrcFactory for LinearFactory {
    fn create(
        &self,
        num_channels: usize,
        input_rate: u32,
        output_rate: u32,
        max_output_frames: usize,
        _quality: ResamplerQuality,
    ) -> Result<Box<dyn Asrc>, AsrcError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(
            LinearAsrc::new(num_channels, input_rate, output_rate, max_output_frames)
                .with_first_call_shortfall(self.first_call_shortfall),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_identity_at_unity() {
        let mut asrc = LinearAsrc::new(1, 48000, 48000, 64);
        let input = AudioBuffer::from_channels(vec![(0..64).map(|i| i as f32).collect()]);
        let mut output = AudioBuffer::new(1, 64);

        let needed = asrc.required_input_frames(64, 1.0);
        assert_eq!(needed, 64);
        let processed = asrc.process(&input, needed, &mut output, 64, 1.0).unwrap();
        assert_eq!(processed.frames_generated, 64);
        assert_eq!(output.channel(0), input.channel(0));
    }

    #[test]
    fn test_linear_requirement_matches_generation() {
        let mut asrc = LinearAsrc::new(2, 48000, 44100, 441);
        let input = AudioBuffer::new(2, asrc.max_input_frames());
        let mut output = AudioBuffer::new(2, 441);
        let mut consumed = 0;
        for _ in 0..100 {
            let needed = asrc.required_input_frames(441, 1.0);
            let processed = asrc.process(&input, needed, &mut output, 441, 1.0).unwrap();
            assert_eq!(processed.frames_generated, 441);
            consumed += processed.frames_used;
        }
        // 100 blocks of 10ms at 48kHz, within interpolation look-ahead
        assert!((consumed as i64 - 48_000).abs() <= 2, "consumed {}", consumed);
    }

    #[test]
    fn test_first_call_shortfall() {
        let mut asrc = LinearAsrc::new(1, 48000, 48000, 32).with_first_call_shortfall(1);
        let input = AudioBuffer::new(1, 32);
        let mut output = AudioBuffer::new(1, 32);
        let first = asrc.process(&input, 32, &mut output, 32, 1.0).unwrap();
        assert_eq!(first.frames_generated, 31);
        let needed = asrc.required_input_frames(32, 1.0);
        let second = asrc.process(&input, needed, &mut output, 32, 1.0).unwrap();
        assert_eq!(second.frames_generated, 32);
    }

    #[test]
    fn test_simulated_clock_drift() {
        let clock = SimulatedClock::new(ClockTime::from_nanos(0), 50.0);
        clock.advance_frames(441, 44100);
        assert_eq!(clock.now().nanos(), 10_000_500);
    }
}

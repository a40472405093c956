//! Network → device block dispatch
//!
//! # Drift correction
//!
//! The global converter runs device rate to device rate in fixed chunks of
//! the size it was built for. Callbacks are served from the frames of the
//! last chunk that the device has not taken yet, so callbacks of any size up
//! to the chunk work. Two positions are kept on the device-rate timebase:
//!
//! - `feed`: timestamp of the next frame the bridges render into the converter
//! - the play head: timestamp of the next frame handed to the device
//!
//! Every callback compares the play head against the network clock:
//!
//! ```text
//! drift = rtp_now - head               (frames, wrapping-safe)
//! raw   = (rate + drift) / rate
//! ratio = clamp(filter(raw), 1 ± max_correction)
//! ```
//!
//! If the device clock runs slow relative to the network, the head falls
//! behind, the ratio rises above 1.0 and each chunk steps `chunk × ratio`
//! frames through the mix until it catches up. `feed` advances by exactly
//! the frames the converter consumed.
//!
//! Seeding puts `feed` ahead of the clock by the converter's output delay:
//! at zero drift the frame played at `t` is the frame the bridges rendered
//! for `t`, and only the converter's silent history precedes it.

use std::sync::Arc;

use super::{ActiveInboundSet, DispatchStats};
use crate::bridge::{BlockOutcome, BlockTiming};
use crate::clock::{ClockSource, ClockTime};
use crate::config::DriftConfig;
use crate::diagnostics::{SkipReason, StatusEvent, StatusSender};
use crate::drift::DriftFilter;
use crate::format::DeviceFormat;
use crate::resample::Asrc;
use crate::rt::RealtimeStateChannel;
use crate::stream::StreamReader;
use crate::timestamp::WrappingU32;
use crate::types::AudioBuffer;

/// Play positions beyond this are folded into the anchor
const REBASE_FRAMES: f64 = 1_048_576.0;

/// Converter positions on the device-rate network timebase
#[derive(Debug, Clone, Copy)]
struct Timeline {
    feed: WrappingU32,
    anchor: WrappingU32,
    /// Frames the converter output has covered since `anchor`
    played: f64,
}

impl Timeline {
    fn seeded(rtp_now: WrappingU32, output_delay: usize) -> Self {
        Self {
            feed: rtp_now.advance(output_delay as u32),
            anchor: rtp_now,
            played: 0.0,
        }
    }

    /// Drift of the play head, `pending` converted frames short of the output end
    fn drift(&self, rtp_now: WrappingU32, pending: usize, pending_ratio: f64) -> i64 {
        let head = self.played - pending as f64 * pending_ratio;
        (rtp_now.diff(self.anchor) as f64 - head).round() as i64
    }

    fn advance(&mut self, consumed: usize, generated: usize, ratio: f64) {
        self.feed = self.feed.advance(consumed as u32);
        self.played += generated as f64 * ratio;
        if self.played >= REBASE_FRAMES {
            let whole = self.played.floor();
            self.anchor = self.anchor.advance(whole as u32);
            self.played -= whole;
        }
    }
}

/// Audio-thread driver for all inbound bridges of one device
pub struct InboundDispatcher {
    device: DeviceFormat,
    drift: DriftConfig,
    filter: DriftFilter,
    clock: Arc<dyn ClockSource>,
    reader: Arc<dyn StreamReader>,
    bridges: Arc<RealtimeStateChannel<ActiveInboundSet>>,
    /// Global drift converter, device rate to device rate
    global: Box<dyn Asrc>,
    chunk_frames: usize,
    output_delay: usize,
    /// Sum of all bridge blocks (global converter input)
    mix: AudioBuffer,
    /// One bridge's block
    stream_block: AudioBuffer,
    /// Last converted chunk; `pending_len` frames from `pending_start` are unplayed
    converted: AudioBuffer,
    pending_start: usize,
    pending_len: usize,
    pending_ratio: f64,
    timeline: Option<Timeline>,
    seeded: bool,
    epoch: u64,
    status: StatusSender,
    stats: Arc<DispatchStats>,
}

impl InboundDispatcher {
    /// Build a dispatcher; all buffers are allocated here, never on the audio thread
    ///
    /// `global` runs in chunks of its `max_output_frames`, which should cover
    /// the device's largest block. `block_ceiling` is the largest number of
    /// frames the bridges were prepared to produce per block.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: DeviceFormat,
        drift: DriftConfig,
        global: Box<dyn Asrc>,
        block_ceiling: usize,
        bridges: Arc<RealtimeStateChannel<ActiveInboundSet>>,
        clock: Arc<dyn ClockSource>,
        reader: Arc<dyn StreamReader>,
        status: StatusSender,
    ) -> Self {
        let channels = device.num_channels();
        let chunk_frames = global.max_output_frames();
        Self {
            device,
            filter: DriftFilter::from_config(&drift),
            drift,
            clock,
            reader,
            bridges,
            output_delay: global.output_delay(),
            chunk_frames,
            global,
            mix: AudioBuffer::new(channels, block_ceiling),
            stream_block: AudioBuffer::new(channels, block_ceiling),
            converted: AudioBuffer::new(channels, chunk_frames),
            pending_start: 0,
            pending_len: 0,
            pending_ratio: 1.0,
            timeline: None,
            seeded: false,
            epoch: 0,
            status,
            stats: Arc::new(DispatchStats::new()),
        }
    }

    pub fn device(&self) -> DeviceFormat {
        self.device
    }

    /// Shared statistics handle for other threads
    pub fn stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }

    /// Device-rate position of the next frame rendered into the converter
    /// (absent until seeded)
    pub fn reference(&self) -> Option<WrappingU32> {
        self.timeline.map(|timeline| timeline.feed)
    }

    /// Number of re-seeds after the first one
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Fill `output` (its working length is the device block) for one callback
    ///
    /// `host_time_ns` is the driver's timestamp for the block, when it has
    /// one. Returns false if the block was replaced with silence.
    pub fn process(&mut self, output: &mut AudioBuffer, host_time_ns: Option<u64>) -> bool {
        self.status.begin_block();
        let frames = output.num_frames();
        if frames == 0 {
            return true;
        }
        if frames > self.device.max_frames_per_block || frames > self.chunk_frames {
            return self.skip_device_block(output, frames, SkipReason::BlockTooLarge { frames });
        }

        if !self.clock.is_locked() {
            self.timeline = None;
            output.clear();
            self.status.report(StatusEvent::ClockUnavailable);
            return false;
        }

        let now = self.read_now(host_time_ns);
        let rtp_now = now.to_rtp_timestamp32(self.device.sample_rate());
        let ratio = self.measure(rtp_now, frames);

        let from_pending = self.pending_len.min(frames);
        output.copy_frames_from(0, &self.converted, self.pending_start, from_pending);
        self.pending_start += from_pending;
        self.pending_len -= from_pending;
        if from_pending == frames {
            return true;
        }

        if let Err(reason) = self.convert_chunk(now, ratio) {
            // Converter state is unknown now; start over next block
            self.timeline = None;
            return self.skip_device_block(output, frames, reason);
        }
        let rest = frames - from_pending;
        output.copy_frames_from(from_pending, &self.converted, 0, rest);
        self.pending_start = rest;
        self.pending_len = self.chunk_frames - rest;
        self.pending_ratio = ratio;
        true
    }

    fn read_now(&self, host_time_ns: Option<u64>) -> ClockTime {
        match host_time_ns {
            Some(host_ns) if self.clock.is_calibrated() => self.clock.adjusted_time(host_ns),
            _ => self.clock.now(),
        }
    }

    /// Resolve drift for this block; returns the damped ratio
    fn measure(&mut self, rtp_now: WrappingU32, frames: usize) -> f64 {
        let Some(timeline) = self.timeline else {
            // First block after lock: seed, no correction
            self.seed(rtp_now);
            self.stats.record_block(1.0, 0);
            return 1.0;
        };

        let drift = timeline.drift(rtp_now, self.pending_len, self.pending_ratio);
        if drift.abs() > self.drift.realign_threshold_frames(frames) {
            self.seed(rtp_now);
            self.stats.record_realignment();
            self.status.report(StatusEvent::Realigned { drift_frames: drift });
            self.stats.record_block(1.0, 0);
            return 1.0;
        }

        let rate = self.device.sample_rate() as f64;
        let raw = (rate + drift as f64) / rate;
        let ratio = self.drift.clamp_ratio(self.filter.update(raw));
        self.stats.record_block(ratio, drift);
        ratio
    }

    /// Restart the timeline at `rtp_now`; bridges re-seed on the epoch change
    fn seed(&mut self, rtp_now: WrappingU32) {
        if self.seeded {
            self.epoch = self.epoch.wrapping_add(1);
        }
        self.seeded = true;
        self.timeline = Some(Timeline::seeded(rtp_now, self.output_delay));
        self.filter.reset();
        self.global.reset();
        self.pending_start = 0;
        self.pending_len = 0;
        self.pending_ratio = 1.0;
    }

    /// Render one chunk of every bridge at `feed` and convert the mix
    fn convert_chunk(&mut self, now: ClockTime, ratio: f64) -> Result<(), SkipReason> {
        let Some(feed) = self.reference() else {
            return Err(SkipReason::NotReady);
        };
        let chunk = self.chunk_frames;
        let needed = self.global.required_input_frames(chunk, ratio);
        if needed == 0 || needed > self.mix.capacity() {
            return Err(SkipReason::BlockTooLarge { frames: needed });
        }

        self.mix.set_num_frames(needed);
        self.mix.clear();
        let timing = BlockTiming {
            device_timestamp: feed,
            now,
            epoch: self.epoch,
        };

        let bridges = self.bridges.acquire();
        for bridge in bridges.iter() {
            self.stream_block.set_num_frames(needed);
            match bridge.render(&*self.reader, &mut self.stream_block, timing) {
                BlockOutcome::Delivered => self.mix.add_from(&self.stream_block),
                BlockOutcome::Skipped(reason) => self.status.report(StatusEvent::BlockSkipped {
                    stream: bridge.id(),
                    reason,
                }),
            }
        }
        drop(bridges);

        self.converted.set_num_frames(chunk);
        let processed = self
            .global
            .process(&self.mix, needed, &mut self.converted, chunk, ratio)
            .map_err(|_| SkipReason::ResamplerFailed)?;
        self.converted.set_num_frames(chunk);
        if processed.frames_generated != chunk {
            return Err(SkipReason::ResamplerShort {
                requested: chunk,
                generated: processed.frames_generated,
            });
        }

        if let Some(timeline) = self.timeline.as_mut() {
            timeline.advance(processed.frames_used, chunk, ratio);
        }
        Ok(())
    }

    fn skip_device_block(&mut self, output: &mut AudioBuffer, frames: usize, reason: SkipReason) -> bool {
        output.set_num_frames(frames);
        output.clear();
        self.status.report(StatusEvent::DeviceBlockSkipped { reason });
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{bridge_block_ceiling, InboundBridge};
    use crate::diagnostics::{status_channel, StatusMonitor};
    use crate::format::{AudioEncoding, AudioFormat};
    use crate::resample::{AsrcFactory, ResamplerQuality, RubatoFactory};
    use crate::testing::{ramp_value, LinearFactory, RampReader, SimulatedClock};
    use crate::types::StreamId;

    struct Rig {
        dispatcher: InboundDispatcher,
        channel: Arc<RealtimeStateChannel<ActiveInboundSet>>,
        clock: Arc<SimulatedClock>,
        reader: Arc<RampReader>,
        monitor: StatusMonitor,
        factory: Arc<LinearFactory>,
        device: DeviceFormat,
        bridges: Vec<InboundBridge>,
    }

    impl Rig {
        fn new(rate: u32, block: usize, clock: SimulatedClock) -> Self {
            let factory = Arc::new(LinearFactory::new());
            let global = factory
                .create(2, rate, rate, block, ResamplerQuality::Fast)
                .unwrap();
            Self::with_global(rate, block, clock, factory, global)
        }

        /// Production global converter; bridges still come from a `LinearFactory`
        fn with_rubato_global(rate: u32, block: usize, clock: SimulatedClock) -> Self {
            let global = RubatoFactory::default()
                .create(2, rate, rate, block, ResamplerQuality::Fast)
                .unwrap();
            Self::with_global(rate, block, clock, Arc::new(LinearFactory::new()), global)
        }

        fn with_global(
            rate: u32,
            block: usize,
            clock: SimulatedClock,
            factory: Arc<LinearFactory>,
            global: Box<dyn Asrc>,
        ) -> Self {
            let device = DeviceFormat::new(rate, 2, block);
            let ceiling = bridge_block_ceiling(block);
            let channel = Arc::new(RealtimeStateChannel::new(ActiveInboundSet::new()));
            let clock = Arc::new(clock);
            let reader = Arc::new(RampReader::new());
            let (status, monitor) = status_channel(64, 1);
            let dispatcher = InboundDispatcher::new(
                device,
                DriftConfig::default(),
                global,
                ceiling,
                channel.clone(),
                clock.clone(),
                reader.clone(),
                status,
            );
            Self {
                dispatcher,
                channel,
                clock,
                reader,
                monitor,
                factory,
                device,
                bridges: Vec::new(),
            }
        }

        fn add_stream(&mut self, id: u64, rate: u32, delay: u32) {
            let mut bridge = InboundBridge::new(StreamId(id), self.factory.clone(), ResamplerQuality::Sinc, delay);
            bridge
                .prepare_input(AudioFormat::network(AudioEncoding::PcmS24, rate, 2))
                .unwrap();
            bridge.prepare_output(self.device).unwrap();
            self.bridges.push(bridge);
            self.publish();
        }

        fn remove_stream(&mut self, id: u64) {
            self.bridges.retain(|b| b.id() != StreamId(id));
            self.publish();
        }

        fn publish(&self) {
            let set = self.bridges.iter().map(|b| b.state()).collect();
            self.channel.publish(set).unwrap();
        }

        /// Run one callback, then let the clock advance by one block
        fn run_block(&mut self, output: &mut AudioBuffer) -> bool {
            let frames = output.num_frames();
            let ok = self.dispatcher.process(output, None);
            self.clock.advance_frames(frames, self.device.sample_rate());
            ok
        }
    }

    #[test]
    fn test_pass_through_output_is_delayed_input() {
        let clock = SimulatedClock::near_wrap(48000, 4800, 0.0);
        let start = clock.now().to_rtp_timestamp32(48000);
        let mut rig = Rig::new(48000, 480, clock);
        rig.add_stream(1, 48000, 96);

        let mut output = AudioBuffer::new(2, 480);
        for block in 0..20u32 {
            assert!(rig.run_block(&mut output), "block {} skipped", block);
            assert_eq!(rig.dispatcher.stats().ratio(), 1.0);
            for ch in 0..2 {
                for (i, &sample) in output.channel(ch).iter().enumerate() {
                    let ts = start.advance(block * 480 + i as u32).rewind(96);
                    assert_eq!(sample, ramp_value(StreamId(1), ts), "block {} frame {}", block, i);
                }
            }
        }
        // 48k stream on a 48k device needs no stream resampler
        assert_eq!(rig.factory.created(), 1);
        assert!(rig.monitor.poll().is_empty());
    }

    #[test]
    fn test_rubato_global_is_aligned_at_zero_drift() {
        let clock = SimulatedClock::near_wrap(48000, 48_000, 0.0);
        let start = clock.now().to_rtp_timestamp32(48000);
        let mut rig = Rig::with_rubato_global(48000, 480, clock);
        rig.add_stream(1, 48000, 96);
        let stats = rig.dispatcher.stats();

        let mut output = AudioBuffer::new(2, 480);
        for block in 0..40u32 {
            assert!(rig.run_block(&mut output), "block {} skipped", block);
            assert_eq!(stats.ratio(), 1.0, "block {}", block);
            assert_eq!(stats.drift_frames(), 0, "block {}", block);
            for ch in 0..2 {
                for (i, &sample) in output.channel(ch).iter().enumerate() {
                    // Three frames of converter history precede the first aligned frame
                    let expected = if block == 0 && i < 3 {
                        0.0
                    } else {
                        ramp_value(StreamId(1), start.advance(block * 480 + i as u32).rewind(96))
                    };
                    assert_eq!(sample, expected, "block {} frame {}", block, i);
                }
            }
        }
        assert!(rig.monitor.poll().is_empty());
    }

    #[test]
    fn test_variable_callback_sizes_stay_aligned() {
        let clock = SimulatedClock::near_wrap(48000, 480_000, 0.0);
        let start = clock.now().to_rtp_timestamp32(48000);
        let mut rig = Rig::with_rubato_global(48000, 480, clock);
        rig.add_stream(2, 48000, 0);

        let mut position = 0u32;
        for &frames in [240usize, 144, 480, 96, 336].iter().cycle().take(30) {
            let mut output = AudioBuffer::new(2, frames);
            assert!(rig.run_block(&mut output), "callback at {} skipped", position);
            assert_eq!(rig.dispatcher.stats().drift_frames(), 0);
            for (i, &sample) in output.channel(0).iter().enumerate() {
                let at = position + i as u32;
                let expected = if at < 3 { 0.0 } else { ramp_value(StreamId(2), start.advance(at)) };
                assert_eq!(sample, expected, "frame {}", at);
            }
            position += frames as u32;
        }
        assert_eq!(rig.dispatcher.epoch(), 0);
        assert!(rig.monitor.poll().is_empty());
    }

    #[test]
    fn test_host_time_positions_block_when_calibrated() {
        let clock = SimulatedClock::near_wrap(48000, 100_000, 0.0);
        let start = clock.now().to_rtp_timestamp32(48000);
        let mut rig = Rig::new(48000, 480, clock);
        rig.add_stream(1, 48000, 0);

        // Driver stamped the block 5ms (240 frames) past the clock's reading
        let host = rig.clock.now().nanos() + 5_000_000;
        let mut output = AudioBuffer::new(2, 480);
        assert!(rig.dispatcher.process(&mut output, Some(host)));
        assert_eq!(output.channel(0)[0], ramp_value(StreamId(1), start.advance(240)));

        // An uncalibrated clock ignores the host time
        let clock = SimulatedClock::near_wrap(48000, 100_000, 0.0);
        clock.set_calibrated(false);
        let mut rig = Rig::new(48000, 480, clock);
        rig.add_stream(1, 48000, 0);
        let host = rig.clock.now().nanos() + 5_000_000;
        assert!(rig.dispatcher.process(&mut output, Some(host)));
        assert_eq!(output.channel(0)[0], ramp_value(StreamId(1), start));
    }

    #[test]
    fn test_drift_ratio_converges_to_clock_offset() {
        let clock = SimulatedClock::near_wrap(44100, 441 * 1000, 50.0);
        let mut rig = Rig::new(44100, 441, clock);
        rig.add_stream(1, 48000, 0);
        let stats = rig.dispatcher.stats();

        let mut output = AudioBuffer::new(2, 441);
        let mut ratios = Vec::new();
        for block in 0..3000 {
            assert!(rig.run_block(&mut output), "block {} skipped", block);
            let ratio = stats.ratio();
            assert!(ratio <= 1.0 + crate::types::JND_PITCH && ratio >= 1.0 - crate::types::JND_PITCH);
            ratios.push(ratio);
        }

        let settled = &ratios[1000..];
        let mean = settled.iter().sum::<f64>() / settled.len() as f64;
        assert!((mean - 1.00005).abs() < 1e-5, "mean ratio {}", mean);
        assert!(settled.iter().all(|&r| r > 1.0 && r < 1.0001));
        assert!(stats.drift_frames().abs() <= 4);
        assert!(output.peak() > 0.0);

        rig.monitor.poll();
        let counters = rig.monitor.counters();
        assert_eq!(counters.blocks_skipped, 0);
        assert_eq!(counters.realignments, 0);
        assert_eq!(rig.factory.created(), 2);
    }

    #[test]
    fn test_removed_stream_stops_contributing() {
        let clock = SimulatedClock::near_wrap(48000, 100_000, 0.0);
        let start = clock.now().to_rtp_timestamp32(48000);
        let mut rig = Rig::new(48000, 480, clock);
        rig.add_stream(1, 48000, 0);
        rig.add_stream(2, 48000, 0);

        let mut output = AudioBuffer::new(2, 480);
        let mut block = 0u32;
        for _ in 0..5 {
            assert!(rig.run_block(&mut output));
            let ts = start.advance(block * 480);
            assert_eq!(output.channel(0)[0], ramp_value(StreamId(1), ts) + ramp_value(StreamId(2), ts));
            block += 1;
        }

        // Keep a snapshot of the old set alive across the removal
        let held = rig.channel.acquire();
        rig.remove_stream(2);
        assert_eq!(held.len(), 2);

        for _ in 0..5 {
            assert!(rig.run_block(&mut output));
            let ts = start.advance(block * 480);
            for (i, &sample) in output.channel(1).iter().enumerate() {
                assert_eq!(sample, ramp_value(StreamId(1), ts.advance(i as u32)));
            }
            block += 1;
        }
        assert!(held.iter().all(|state| state.delay_frames() == 0));
    }

    #[test]
    fn test_unlocked_clock_mutes_output() {
        let clock = SimulatedClock::near_wrap(48000, 100_000, 0.0);
        clock.set_locked(false);
        let mut rig = Rig::new(48000, 128, clock);
        rig.add_stream(1, 48000, 0);

        let mut output = AudioBuffer::from_channels(vec![vec![1.0; 128]; 2]);
        assert!(!rig.run_block(&mut output));
        assert_eq!(output.peak(), 0.0);
        assert!(rig.dispatcher.reference().is_none());

        rig.clock.set_locked(true);
        assert!(rig.run_block(&mut output));
        assert!(output.peak() > 0.0);

        rig.monitor.poll();
        assert_eq!(rig.monitor.counters().clock_unavailable, 1);
    }

    #[test]
    fn test_clock_jump_realigns() {
        let clock = SimulatedClock::near_wrap(48000, 100_000, 0.0);
        let mut rig = Rig::new(48000, 480, clock);
        rig.add_stream(1, 48000, 0);
        let mut output = AudioBuffer::new(2, 480);
        for _ in 0..4 {
            assert!(rig.run_block(&mut output));
        }

        // Clock leaps ten blocks ahead, far beyond the two-block threshold
        rig.clock.advance_frames(4800, 48000);
        let jumped = rig.clock.now().to_rtp_timestamp32(48000);
        assert!(rig.run_block(&mut output));
        assert_eq!(rig.dispatcher.epoch(), 1);
        assert_eq!(output.channel(0)[0], ramp_value(StreamId(1), jumped));

        rig.monitor.poll();
        assert_eq!(rig.monitor.counters().realignments, 1);
        assert_eq!(rig.dispatcher.stats().realignments(), 1);
    }

    #[test]
    fn test_missing_stream_reported_others_play() {
        let clock = SimulatedClock::near_wrap(48000, 100_000, 0.0);
        let start = clock.now().to_rtp_timestamp32(48000);
        let mut rig = Rig::new(48000, 64, clock);
        rig.add_stream(1, 48000, 0);
        rig.add_stream(2, 48000, 0);
        rig.reader.set_missing(StreamId(2), true);

        let mut output = AudioBuffer::new(2, 64);
        assert!(rig.run_block(&mut output));
        assert_eq!(output.channel(0)[0], ramp_value(StreamId(1), start));

        let reports = rig.monitor.poll();
        assert_eq!(reports.len(), 1);
        assert!(matches!(
            reports[0].event,
            StatusEvent::BlockSkipped {
                stream: StreamId(2),
                reason: SkipReason::NoData
            }
        ));
    }

    #[test]
    fn test_oversized_block_is_skipped() {
        let clock = SimulatedClock::near_wrap(48000, 100_000, 0.0);
        let mut rig = Rig::new(48000, 64, clock);
        let mut output = AudioBuffer::new(2, 128);
        assert!(!rig.run_block(&mut output));
        assert_eq!(output.peak(), 0.0);
        rig.monitor.poll();
        assert_eq!(rig.monitor.counters().device_blocks_skipped, 1);
    }
}

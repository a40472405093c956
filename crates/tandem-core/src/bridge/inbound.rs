//! Network → device bridge

use std::sync::{Arc, Mutex};

use basedrop::{Handle, Shared};

use super::{bridge_block_ceiling, BlockOutcome, BlockTiming, BridgePhase, ConversionMode};
use crate::clock::ClockTime;
use crate::diagnostics::SkipReason;
use crate::error::{BridgeError, BridgeResult};
use crate::format::{AudioFormat, DeviceFormat};
use crate::resample::{scratch_capacity, Asrc, AsrcFactory, ResamplerQuality};
use crate::rt::gc_handle;
use crate::stream::{ReadOptions, StreamReader};
use crate::timestamp::WrappingU32;
use crate::types::{AudioBuffer, StreamId};

/// Mutable audio-thread state of a resampling bridge
///
/// Built on the control thread, then touched only by the audio thread.
struct ResampleKernel {
    resampler: Box<dyn Asrc>,
    /// Stream-rate input read from the stream layer
    scratch: AudioBuffer,
    /// Device-rate output of the resampler
    converted: AudioBuffer,
    /// Next stream timestamp to read, absent until a block succeeds
    cursor: Option<WrappingU32>,
    epoch: Option<u64>,
}

impl ResampleKernel {
    fn forget_position(&mut self) {
        self.cursor = None;
        self.resampler.reset();
    }

    fn render(
        &mut self,
        id: StreamId,
        delay_frames: u32,
        rates: (u32, u32),
        reader: &dyn StreamReader,
        output: &mut AudioBuffer,
        timing: BlockTiming,
    ) -> BlockOutcome {
        let (input_rate, output_rate) = rates;
        let frames = output.num_frames();

        if self.epoch != Some(timing.epoch) {
            self.forget_position();
            self.epoch = Some(timing.epoch);
        }
        if frames > self.converted.capacity() {
            return BlockOutcome::Skipped(SkipReason::BlockTooLarge { frames });
        }

        // Seed ahead by the converter delay so the first aligned frame lands on the device timestamp
        let cursor = self.cursor.unwrap_or_else(|| {
            ClockTime::from_rtp_timestamp32(timing.device_timestamp, output_rate, timing.now)
                .to_rtp_timestamp32(input_rate)
                .advance(self.resampler.output_delay() as u32)
        });

        let needed = self.resampler.required_input_frames(frames, 1.0);
        if needed == 0 || needed > self.scratch.capacity() {
            return BlockOutcome::Skipped(SkipReason::BlockTooLarge { frames: needed });
        }

        self.scratch.set_num_frames(needed);
        let at = cursor.rewind(delay_frames);
        let Some(read) = reader.read_audio_data_realtime(id, &mut self.scratch, needed, at, ReadOptions::default())
        else {
            self.forget_position();
            return BlockOutcome::Skipped(SkipReason::NoData);
        };
        pad_with_silence(&mut self.scratch, read, needed);

        self.converted.set_num_frames(frames);
        let processed = match self.resampler.process(&self.scratch, needed, &mut self.converted, frames, 1.0) {
            Ok(processed) => processed,
            Err(_) => {
                self.forget_position();
                return BlockOutcome::Skipped(SkipReason::ResamplerFailed);
            }
        };
        self.cursor = Some(cursor.advance(processed.frames_used as u32));

        if processed.frames_generated != frames {
            return BlockOutcome::Skipped(SkipReason::ResamplerShort {
                requested: frames,
                generated: processed.frames_generated,
            });
        }

        output.copy_from(&self.converted);
        BlockOutcome::Delivered
    }
}

/// Extend a short read to `frames` with silence
fn pad_with_silence(buffer: &mut AudioBuffer, read: usize, frames: usize) {
    let read = read.min(frames);
    buffer.set_num_frames(frames);
    for ch in 0..buffer.num_channels() {
        buffer.channel_mut(ch)[read..].fill(0.0);
    }
}

/// Immutable per-stream state run by the audio thread
///
/// Everything except the resampler kernel is fixed once published. The
/// kernel sits behind a mutex the audio thread only ever `try_lock`s; the
/// control thread never locks it after publishing.
pub struct InboundBridgeState {
    id: StreamId,
    phase: BridgePhase,
    input_format: Option<AudioFormat>,
    device: Option<DeviceFormat>,
    delay_frames: u32,
    mode: Option<ConversionMode>,
    kernel: Option<Shared<Mutex<ResampleKernel>>>,
}

impl InboundBridgeState {
    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn phase(&self) -> BridgePhase {
        self.phase
    }

    pub fn mode(&self) -> Option<ConversionMode> {
        self.mode
    }

    pub fn delay_frames(&self) -> u32 {
        self.delay_frames
    }

    pub fn input_format(&self) -> Option<AudioFormat> {
        self.input_format
    }

    pub fn device_format(&self) -> Option<DeviceFormat> {
        self.device
    }

    /// Produce `output.num_frames()` device-rate frames for this block
    ///
    /// On any failure `output` holds silence. Never blocks or allocates.
    pub fn render(&self, reader: &dyn StreamReader, output: &mut AudioBuffer, timing: BlockTiming) -> BlockOutcome {
        let outcome = self.render_inner(reader, output, timing);
        if !outcome.is_delivered() {
            output.clear();
        }
        outcome
    }

    /// [`render`](Self::render) reduced to "did this block carry audio"
    pub fn process_block(&self, reader: &dyn StreamReader, output: &mut AudioBuffer, timing: BlockTiming) -> bool {
        self.render(reader, output, timing).is_delivered()
    }

    fn render_inner(&self, reader: &dyn StreamReader, output: &mut AudioBuffer, timing: BlockTiming) -> BlockOutcome {
        if self.phase != BridgePhase::OutputReady {
            return BlockOutcome::Skipped(SkipReason::NotReady);
        }

        match self.mode {
            Some(ConversionMode::PassThrough) => {
                let frames = output.num_frames();
                let at = timing.device_timestamp.rewind(self.delay_frames);
                match reader.read_audio_data_realtime(self.id, output, frames, at, ReadOptions::default()) {
                    Some(read) => {
                        pad_with_silence(output, read, frames);
                        BlockOutcome::Delivered
                    }
                    None => {
                        output.set_num_frames(frames);
                        BlockOutcome::Skipped(SkipReason::NoData)
                    }
                }
            }
            Some(ConversionMode::Resampling {
                input_rate,
                output_rate,
            }) => {
                let Some(kernel) = &self.kernel else {
                    return BlockOutcome::Skipped(SkipReason::NotReady);
                };
                let Ok(mut kernel) = kernel.try_lock() else {
                    return BlockOutcome::Skipped(SkipReason::Busy);
                };
                kernel.render(
                    self.id,
                    self.delay_frames,
                    (input_rate, output_rate),
                    reader,
                    output,
                    timing,
                )
            }
            None => BlockOutcome::Skipped(SkipReason::NotReady),
        }
    }
}

/// Control-side half of a network → device bridge
pub struct InboundBridge {
    id: StreamId,
    input: Option<AudioFormat>,
    device: Option<DeviceFormat>,
    delay_frames: u32,
    quality: ResamplerQuality,
    factory: Arc<dyn AsrcFactory>,
    handle: Handle,
    mode: Option<ConversionMode>,
    kernel: Option<Shared<Mutex<ResampleKernel>>>,
    state: Shared<InboundBridgeState>,
}

impl InboundBridge {
    pub fn new(id: StreamId, factory: Arc<dyn AsrcFactory>, quality: ResamplerQuality, delay_frames: u32) -> Self {
        let handle = gc_handle();
        let state = Shared::new(
            &handle,
            InboundBridgeState {
                id,
                phase: BridgePhase::Unconfigured,
                input_format: None,
                device: None,
                delay_frames,
                mode: None,
                kernel: None,
            },
        );
        Self {
            id,
            input: None,
            device: None,
            delay_frames,
            quality,
            factory,
            handle,
            mode: None,
            kernel: None,
            state,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn phase(&self) -> BridgePhase {
        match (self.input, self.mode) {
            (None, _) => BridgePhase::Unconfigured,
            (Some(_), None) => BridgePhase::InputReady,
            (Some(_), Some(_)) => BridgePhase::OutputReady,
        }
    }

    pub fn input_format(&self) -> Option<AudioFormat> {
        self.input
    }

    pub fn device_format(&self) -> Option<DeviceFormat> {
        self.device
    }

    pub fn delay_frames(&self) -> u32 {
        self.delay_frames
    }

    pub fn mode(&self) -> Option<ConversionMode> {
        self.mode
    }

    /// Record the network-side format
    ///
    /// An invalid format is rejected and leaves the bridge as it was.
    pub fn prepare_input(&mut self, format: AudioFormat) -> BridgeResult<()> {
        if !format.is_valid() {
            log::warn!("{}: rejecting invalid input format {}", self.id, format);
            return Err(BridgeError::InvalidFormat(format));
        }
        if self.input == Some(format) {
            return Ok(());
        }
        self.input = Some(format);
        self.recompute()
    }

    /// Record the device-side format and block ceiling
    pub fn prepare_output(&mut self, device: DeviceFormat) -> BridgeResult<()> {
        if !device.is_valid() {
            log::warn!("{}: rejecting invalid device format {}", self.id, device.format);
            return Err(BridgeError::InvalidFormat(device.format));
        }
        if self.device == Some(device) && self.mode.is_some() {
            return Ok(());
        }
        self.device = Some(device);
        self.recompute()
    }

    /// Forget the device side (device stopped); drops the resampler and cursor
    pub fn release_output(&mut self) {
        self.device = None;
        self.mode = None;
        self.kernel = None;
        self.refresh_state();
    }

    /// Back to `Unconfigured`
    pub fn reset(&mut self) {
        self.input = None;
        self.mode = None;
        self.kernel = None;
        self.refresh_state();
    }

    /// Change the read offset; the running resampler and cursor are kept
    pub fn set_delay(&mut self, delay_frames: u32) {
        self.delay_frames = delay_frames;
        self.refresh_state();
    }

    /// Snapshot of the current state for publishing to the audio thread
    pub fn state(&self) -> Shared<InboundBridgeState> {
        Shared::clone(&self.state)
    }

    /// Run one block directly against the current state
    ///
    /// For single-threaded use; dispatchers go through published snapshots.
    pub fn process_block(
        &self,
        reader: &dyn StreamReader,
        output: &mut AudioBuffer,
        device_timestamp: WrappingU32,
        now: ClockTime,
    ) -> bool {
        self.state.process_block(
            reader,
            output,
            BlockTiming {
                device_timestamp,
                now,
                epoch: 0,
            },
        )
    }

    fn recompute(&mut self) -> BridgeResult<()> {
        self.mode = None;
        self.kernel = None;

        let result = match (self.input, self.device) {
            (Some(input), Some(device)) => self.build_conversion(input, device),
            _ => Ok(()),
        };
        self.refresh_state();
        result
    }

    fn build_conversion(&mut self, input: AudioFormat, device: DeviceFormat) -> BridgeResult<()> {
        let ceiling = bridge_block_ceiling(device.max_frames_per_block);
        let input_rate = input.sample_rate;
        let output_rate = device.sample_rate();

        if input_rate == output_rate {
            log::info!("{}: pass-through at {}Hz", self.id, input_rate);
            self.mode = Some(ConversionMode::PassThrough);
            return Ok(());
        }

        let channels = input.num_channels as usize;
        let resampler = self
            .factory
            .create(channels, input_rate, output_rate, ceiling, self.quality)?;
        let scratch = AudioBuffer::new(
            channels,
            scratch_capacity(resampler.as_ref(), ceiling, input_rate, output_rate),
        );
        let kernel = ResampleKernel {
            resampler,
            scratch,
            converted: AudioBuffer::new(channels, ceiling),
            cursor: None,
            epoch: None,
        };

        log::info!(
            "{}: resampling {}Hz -> {}Hz ({} channels, block ceiling {})",
            self.id,
            input_rate,
            output_rate,
            channels,
            ceiling
        );
        self.kernel = Some(Shared::new(&self.handle, Mutex::new(kernel)));
        self.mode = Some(ConversionMode::Resampling {
            input_rate,
            output_rate,
        });
        Ok(())
    }

    fn refresh_state(&mut self) {
        self.state = Shared::new(
            &self.handle,
            InboundBridgeState {
                id: self.id,
                phase: self.phase(),
                input_format: self.input,
                device: self.device,
                delay_frames: self.delay_frames,
                mode: self.mode,
                kernel: self.kernel.clone(),
            },
        );
    }
}

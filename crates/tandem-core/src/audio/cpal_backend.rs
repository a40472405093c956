//! CPAL device streams
//!
//! ```text
//!  ┌──────────────────┐  publish   ┌──────────────────────┐
//!  │  Control thread  │──────────►│ RealtimeStateChannel │
//!  │ (engines, events)│            └──────────┬───────────┘
//!  └──────────────────┘                       │ acquire
//!                                             ▼
//!  ┌──────────────────┐  callback  ┌──────────────────────┐
//!  │   cpal stream    │──────────►│  Inbound / Outbound  │
//!  │  (audio thread)  │◄──────────│     dispatcher       │
//!  └──────────────────┘ interleave └──────────────────────┘
//! ```
//!
//! Each callback buffer is split into chunks no larger than the device block
//! ceiling the bridges were prepared for, and each chunk is converted between
//! cpal's interleaved layout and a pre-allocated [`AudioBuffer`].
//!
//! Callback timestamps are handed to the dispatchers as host time. cpal
//! hides the origin of its [`cpal::StreamInstant`]s, so the first callback
//! pairs its instant with the clock's own host time and later instants are
//! offsets from that anchor.

use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, SampleFormat, Stream, StreamConfig};

use super::config::AudioConfig;
use super::device::{resolve_device, Direction};
use super::error::{AudioError, AudioResult};
use crate::clock::ClockSource;
use crate::diagnostics::StatusSender;
use crate::dispatch::{DispatchStats, InboundDispatcher, OutboundDispatcher};
use crate::engine::{ReceiverEngine, SenderEngine};
use crate::format::DeviceFormat;
use crate::stream::{StreamReader, StreamWriter};
use crate::types::{AudioBuffer, MAX_BLOCK_FRAMES};

/// A running device stream
///
/// Keeps the cpal stream alive. Drop this to stop audio, then tell the
/// engine with `device_stopped`.
pub struct StreamHandle {
    _stream: Stream,
    device_name: String,
    device: DeviceFormat,
    buffer_size: u32,
    stats: Arc<DispatchStats>,
}

impl StreamHandle {
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn device_format(&self) -> DeviceFormat {
        self.device
    }

    /// Requested buffer size in frames
    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    pub fn latency_ms(&self) -> f32 {
        (self.buffer_size as f32 / self.device.sample_rate() as f32) * 1000.0
    }

    /// Drift statistics of the dispatcher running on this stream
    pub fn stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }
}

/// Largest block handed to a dispatcher for a requested buffer size
///
/// cpal may deliver callbacks larger than requested; those are split.
pub fn device_block_ceiling(buffer_size: u32) -> usize {
    (buffer_size as usize * 2).clamp(1, MAX_BLOCK_FRAMES)
}

/// Open the output device and play all receivers on it
pub fn start_receiver_stream(
    config: &AudioConfig,
    receivers: &mut ReceiverEngine,
    clock: Arc<dyn ClockSource>,
    reader: Arc<dyn StreamReader>,
    status: StatusSender,
) -> AudioResult<StreamHandle> {
    let device = resolve_device(config.output_device.as_ref(), Direction::Output)?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    let (stream_config, buffer_size) = select_config(&device, config, Direction::Output)?;
    let format = device_format(&stream_config, buffer_size);
    log_stream("Output", &device_name, &stream_config, buffer_size);

    receivers.device_about_to_start(format)?;
    let mut dispatcher = receivers.create_dispatcher(clock.clone(), reader, status)?;
    let stats = dispatcher.stats();

    let channels = stream_config.channels as usize;
    let rate = format.sample_rate();
    let mut block = AudioBuffer::new(format.num_channels(), format.max_frames_per_block);
    let mut host_time = HostTimeMapper::new(clock);
    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], info: &cpal::OutputCallbackInfo| {
                let host_ns = host_time.host_time_ns(info.timestamp().callback);
                render_output(&mut dispatcher, &mut block, data, channels, host_ns, rate);
            },
            move |err| {
                log::error!("Output stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;
    stream
        .play()
        .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;

    log::info!("Receiver stream started on {}", device_name);
    Ok(StreamHandle {
        _stream: stream,
        device_name,
        device: format,
        buffer_size,
        stats,
    })
}

/// Open the input device and feed all senders from it
pub fn start_sender_stream(
    config: &AudioConfig,
    senders: &mut SenderEngine,
    clock: Arc<dyn ClockSource>,
    writer: Arc<dyn StreamWriter>,
    status: StatusSender,
) -> AudioResult<StreamHandle> {
    let device = resolve_device(config.input_device.as_ref(), Direction::Input)?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    let (stream_config, buffer_size) = select_config(&device, config, Direction::Input)?;
    let format = device_format(&stream_config, buffer_size);
    log_stream("Input", &device_name, &stream_config, buffer_size);

    senders.device_about_to_start(format)?;
    let mut dispatcher = senders.create_dispatcher(clock.clone(), writer, status)?;
    let stats = dispatcher.stats();

    let channels = stream_config.channels as usize;
    let rate = format.sample_rate();
    let mut block = AudioBuffer::new(format.num_channels(), format.max_frames_per_block);
    let mut host_time = HostTimeMapper::new(clock);
    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], info: &cpal::InputCallbackInfo| {
                let host_ns = host_time.host_time_ns(info.timestamp().capture);
                capture_input(&mut dispatcher, &mut block, data, channels, host_ns, rate);
            },
            move |err| {
                log::error!("Input stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;
    stream
        .play()
        .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;

    log::info!("Sender stream started on {}", device_name);
    Ok(StreamHandle {
        _stream: stream,
        device_name,
        device: format,
        buffer_size,
        stats,
    })
}

/// Maps cpal stream instants onto the clock's host timebase
struct HostTimeMapper {
    clock: Arc<dyn ClockSource>,
    anchor: Option<(cpal::StreamInstant, u64)>,
}

impl HostTimeMapper {
    fn new(clock: Arc<dyn ClockSource>) -> Self {
        Self { clock, anchor: None }
    }

    /// `None` until the clock offers a host time to anchor on
    fn host_time_ns(&mut self, instant: cpal::StreamInstant) -> Option<u64> {
        let (anchor, anchor_ns) = match self.anchor {
            Some(anchor) => anchor,
            None => {
                let anchor = (instant, self.clock.host_time_ns()?);
                self.anchor = Some(anchor);
                anchor
            }
        };
        Some(match instant.duration_since(&anchor) {
            Some(after) => offset_host_time(anchor_ns, after, true),
            None => offset_host_time(anchor_ns, anchor.duration_since(&instant).unwrap_or_default(), false),
        })
    }
}

fn offset_host_time(anchor_ns: u64, offset: Duration, forward: bool) -> u64 {
    let offset = u64::try_from(offset.as_nanos()).unwrap_or(u64::MAX);
    if forward {
        anchor_ns.saturating_add(offset)
    } else {
        anchor_ns.saturating_sub(offset)
    }
}

/// Host time of the chunk starting `frames_before` frames into a callback
fn chunk_host_time(host_ns: Option<u64>, frames_before: usize, rate: u32) -> Option<u64> {
    let offset = (frames_before as u128 * 1_000_000_000) / rate.max(1) as u128;
    host_ns.map(|ns| ns.saturating_add(offset as u64))
}

fn render_output(
    dispatcher: &mut InboundDispatcher,
    block: &mut AudioBuffer,
    data: &mut [f32],
    channels: usize,
    host_ns: Option<u64>,
    rate: u32,
) {
    if channels == 0 {
        return;
    }
    let chunk_samples = block.capacity() * channels;
    let mut frames_before = 0;
    for chunk in data.chunks_mut(chunk_samples) {
        let frames = chunk.len() / channels;
        block.set_num_frames(frames);
        dispatcher.process(block, chunk_host_time(host_ns, frames_before, rate));
        block.write_interleaved(chunk, channels);
        frames_before += frames;
    }
}

fn capture_input(
    dispatcher: &mut OutboundDispatcher,
    block: &mut AudioBuffer,
    data: &[f32],
    channels: usize,
    host_ns: Option<u64>,
    rate: u32,
) {
    if channels == 0 {
        return;
    }
    let chunk_samples = block.capacity() * channels;
    let mut frames_before = 0;
    for chunk in data.chunks(chunk_samples) {
        block.read_interleaved(chunk, channels);
        dispatcher.process(block, chunk_host_time(host_ns, frames_before, rate));
        frames_before += chunk.len() / channels;
    }
}

fn device_format(config: &StreamConfig, buffer_size: u32) -> DeviceFormat {
    DeviceFormat::new(
        config.sample_rate.0,
        config.channels as u32,
        device_block_ceiling(buffer_size),
    )
}

fn log_stream(label: &str, name: &str, config: &StreamConfig, buffer_size: u32) {
    log::info!(
        "{} device {}: {} channels, {}Hz, {} frames (~{:.1}ms)",
        label,
        name,
        config.channels,
        config.sample_rate.0,
        buffer_size,
        (buffer_size as f32 / config.sample_rate.0 as f32) * 1000.0
    );
}

/// Pick an f32 configuration at the requested rate
///
/// Returns the stream config and the requested buffer size in frames.
fn select_config(
    device: &cpal::Device,
    config: &AudioConfig,
    direction: Direction,
) -> AudioResult<(StreamConfig, u32)> {
    let supported: Vec<_> = match direction {
        Direction::Output => device
            .supported_output_configs()
            .map_err(|e| AudioError::ConfigError(e.to_string()))?
            .collect(),
        Direction::Input => device
            .supported_input_configs()
            .map_err(|e| AudioError::ConfigError(e.to_string()))?
            .collect(),
    };

    let target = config.target_sample_rate();
    let in_range = |c: &&cpal::SupportedStreamConfigRange| {
        target >= c.min_sample_rate().0 && target <= c.max_sample_rate().0
    };
    let float = |c: &&cpal::SupportedStreamConfigRange| c.sample_format() == SampleFormat::F32;

    let best = supported
        .iter()
        .filter(float)
        .find(|c| c.channels() >= 2 && in_range(c))
        .or_else(|| supported.iter().filter(float).find(in_range))
        .or_else(|| supported.iter().find(float))
        .ok_or_else(|| AudioError::ConfigError("No 32-bit float configuration available".to_string()))?;

    let sample_rate = if in_range(&best) {
        cpal::SampleRate(target)
    } else {
        let fallback = best.max_sample_rate();
        log::warn!(
            "Audio device doesn't support {}Hz, falling back to {}Hz (streams will be resampled)",
            target,
            fallback.0
        );
        fallback
    };

    let buffer_size = config.buffer_size.frames();
    let stream_config = StreamConfig {
        channels: best.channels(),
        sample_rate,
        buffer_size: CpalBufferSize::Fixed(buffer_size),
    };
    Ok((stream_config, buffer_size))
}

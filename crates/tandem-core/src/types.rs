//! Common types for Tandem
//!
//! This module contains the fundamental audio types shared by the bridges,
//! the dispatchers and the device backend: the non-interleaved float buffer
//! and stream identifiers.

use std::fmt;

/// Audio sample type (32-bit float on the device side)
pub type Sample = f32;

/// Maximum block size to pre-allocate for real-time safety
/// Covers all common device configurations (64 .. 4096 frames)
pub const MAX_BLOCK_FRAMES: usize = 8192;

/// Extra frames reserved in resampler input buffers for look-ahead
pub const RESAMPLER_GUARD_FRAMES: usize = 8;

/// Just noticeable difference for pitch (0.6%, about 10 cents)
///
/// Drift correction is never allowed to move the playback ratio further
/// than this from 1.0.
pub const JND_PITCH: f64 = 0.006;

/// Identifier of a network stream (receiver or sender)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

/// A non-interleaved buffer of float samples
///
/// Storage is allocated once (`channels × capacity`) on the control thread.
/// The audio thread only changes the working length with
/// [`AudioBuffer::set_num_frames`], which never allocates.
#[derive(Debug, Clone, Default)]
pub struct AudioBuffer {
    channels: Vec<Vec<Sample>>,
    num_frames: usize,
}

impl AudioBuffer {
    /// Create a silent buffer with the given channel count and frame capacity
    ///
    /// The working length starts at the full capacity.
    pub fn new(num_channels: usize, capacity: usize) -> Self {
        Self {
            channels: vec![vec![0.0; capacity]; num_channels],
            num_frames: capacity,
        }
    }

    /// Create a buffer from per-channel sample vectors (must all be equally long)
    pub fn from_channels(channels: Vec<Vec<Sample>>) -> Self {
        let num_frames = channels.first().map_or(0, Vec::len);
        assert!(
            channels.iter().all(|c| c.len() == num_frames),
            "Channel lengths must match"
        );
        Self { channels, num_frames }
    }

    /// Number of channels
    #[inline]
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Current working length in frames
    #[inline]
    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    /// Allocated length in frames
    #[inline]
    pub fn capacity(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Set the working length of the pre-allocated buffer (real-time safe)
    ///
    /// Clamped to the capacity, so an oversized request never reads past
    /// the allocation.
    #[inline]
    pub fn set_num_frames(&mut self, num_frames: usize) {
        debug_assert!(num_frames <= self.capacity(), "set_num_frames beyond capacity");
        self.num_frames = num_frames.min(self.capacity());
    }

    /// Working-length slice of one channel
    #[inline]
    pub fn channel(&self, index: usize) -> &[Sample] {
        &self.channels[index][..self.num_frames]
    }

    /// Mutable working-length slice of one channel
    #[inline]
    pub fn channel_mut(&mut self, index: usize) -> &mut [Sample] {
        let n = self.num_frames;
        &mut self.channels[index][..n]
    }

    /// Full-capacity channel storage, for converters that take their own frame counts
    #[inline]
    pub(crate) fn raw_channels(&self) -> &[Vec<Sample>] {
        &self.channels
    }

    /// Mutable full-capacity channel storage
    #[inline]
    pub(crate) fn raw_channels_mut(&mut self) -> &mut [Vec<Sample>] {
        &mut self.channels
    }

    /// Fill the working length with silence
    pub fn clear(&mut self) {
        let n = self.num_frames;
        for channel in &mut self.channels {
            channel[..n].fill(0.0);
        }
    }

    /// Add another buffer into this one (summing overlapping channels and frames)
    pub fn add_from(&mut self, other: &AudioBuffer) {
        let frames = self.num_frames.min(other.num_frames);
        for (dst, src) in self.channels.iter_mut().zip(other.channels.iter()) {
            for (d, s) in dst[..frames].iter_mut().zip(src[..frames].iter()) {
                *d += *s;
            }
        }
    }

    /// Copy another buffer into this one (overlapping channels and frames)
    pub fn copy_from(&mut self, other: &AudioBuffer) {
        let frames = self.num_frames.min(other.num_frames);
        for (dst, src) in self.channels.iter_mut().zip(other.channels.iter()) {
            dst[..frames].copy_from_slice(&src[..frames]);
        }
    }

    /// Copy `frames` frames of `other` starting at `src_start` to `dst_start`
    ///
    /// Works on the allocated storage and leaves both working lengths alone;
    /// the copy is cut short at either buffer's capacity.
    pub fn copy_frames_from(&mut self, dst_start: usize, other: &AudioBuffer, src_start: usize, frames: usize) {
        for (dst, src) in self.channels.iter_mut().zip(other.channels.iter()) {
            let frames = frames
                .min(dst.len().saturating_sub(dst_start))
                .min(src.len().saturating_sub(src_start));
            dst[dst_start..dst_start + frames].copy_from_slice(&src[src_start..src_start + frames]);
        }
    }

    /// Deinterleave `[c0, c1, .., c0, c1, ..]` into the working length
    ///
    /// Extra device channels are dropped, missing ones are left silent.
    pub fn read_interleaved(&mut self, interleaved: &[Sample], device_channels: usize) {
        if device_channels == 0 {
            return;
        }
        let frames = (interleaved.len() / device_channels).min(self.capacity());
        self.num_frames = frames;
        for (ch, channel) in self.channels.iter_mut().enumerate() {
            if ch >= device_channels {
                channel[..frames].fill(0.0);
                continue;
            }
            for (i, frame) in interleaved.chunks_exact(device_channels).take(frames).enumerate() {
                channel[i] = frame[ch];
            }
        }
    }

    /// Interleave the working length into a device buffer
    ///
    /// Device channels beyond this buffer's channel count are silenced, as
    /// are frames beyond the working length.
    pub fn write_interleaved(&self, interleaved: &mut [Sample], device_channels: usize) {
        if device_channels == 0 {
            return;
        }
        for (i, frame) in interleaved.chunks_mut(device_channels).enumerate() {
            for (ch, out) in frame.iter_mut().enumerate() {
                *out = if i < self.num_frames && ch < self.channels.len() {
                    self.channels[ch][i]
                } else {
                    0.0
                };
            }
        }
    }

    /// Peak absolute sample value over the working length
    pub fn peak(&self) -> Sample {
        self.channels
            .iter()
            .flat_map(|c| c[..self.num_frames].iter())
            .map(|s| s.abs())
            .fold(0.0, Sample::max)
    }
}

//! Boundary to the network stream layer
//!
//! RTP session handling, jitter buffers and packetisation are owned by the
//! stream layer. The bridges see it only through these two traits, both of
//! which are called from the audio thread.

use thiserror::Error;

use crate::timestamp::WrappingU32;
use crate::types::{AudioBuffer, StreamId};

/// Options for a real-time read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadOptions {
    /// Leave the read position untouched (peek without consuming)
    pub peek: bool,
}

/// Reader side of the network stream layer (inbound audio)
pub trait StreamReader: Send + Sync {
    /// Copy `frames` frames of `stream`, starting at stream timestamp `at`, into `output`
    ///
    /// Returns the number of frames read, or `None` if no data is available
    /// for that position (not yet received, already discarded, unknown stream).
    /// Must not block or allocate.
    fn read_audio_data_realtime(
        &self,
        stream: StreamId,
        output: &mut AudioBuffer,
        frames: usize,
        at: WrappingU32,
        options: ReadOptions,
    ) -> Option<usize>;
}

/// Errors reported by the writer side
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteError {
    /// The stream layer's buffer is full
    #[error("Stream buffer overrun")]
    Overrun,

    /// The stream layer refused the block (unknown stream, bad format)
    #[error("Stream rejected the block")]
    Rejected,
}

/// Writer side of the network stream layer (outbound audio)
pub trait StreamWriter: Send + Sync {
    /// Hand `frames` frames of `input`, stamped with stream timestamp `at`, to `stream`
    ///
    /// Must not block or allocate.
    fn send_audio_data_realtime(
        &self,
        stream: StreamId,
        input: &AudioBuffer,
        frames: usize,
        at: WrappingU32,
    ) -> Result<(), WriteError>;
}

impl<R: StreamReader + ?Sized> StreamReader for std::sync::Arc<R> {
    fn read_audio_data_realtime(
        &self,
        stream: StreamId,
        output: &mut AudioBuffer,
        frames: usize,
        at: WrappingU32,
        options: ReadOptions,
    ) -> Option<usize> {
        (**self).read_audio_data_realtime(stream, output, frames, at, options)
    }
}

impl<W: StreamWriter + ?Sized> StreamWriter for std::sync::Arc<W> {
    fn send_audio_data_realtime(
        &self,
        stream: StreamId,
        input: &AudioBuffer,
        frames: usize,
        at: WrappingU32,
    ) -> Result<(), WriteError> {
        (**self).send_audio_data_realtime(stream, input, frames, at)
    }
}

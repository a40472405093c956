//! Device backend
//!
//! Runs the dispatchers inside cpal device callbacks:
//! - [`start_receiver_stream`]: an output stream driving an
//!   [`InboundDispatcher`](crate::dispatch::InboundDispatcher)
//! - [`start_sender_stream`]: an input stream driving an
//!   [`OutboundDispatcher`](crate::dispatch::OutboundDispatcher)
//!
//! # Example Usage
//!
//! ```ignore
//! let config = AudioConfig::default().with_buffer_frames(256);
//! let handle = start_receiver_stream(&config, &mut receivers, clock, reader, status)?;
//! // ... later
//! drop(handle);
//! receivers.device_stopped()?;
//! ```

mod config;
mod cpal_backend;
mod device;
mod error;

pub use config::{AudioConfig, BufferSize, DeviceId, DEFAULT_BUFFER_SIZE, DEFAULT_SAMPLE_RATE, MIN_BUFFER_SIZE};
pub use cpal_backend::{device_block_ceiling, start_receiver_stream, start_sender_stream, StreamHandle};
pub use device::{find_device_by_id, get_input_devices, get_output_devices, resolve_device, AudioDevice, Direction};
pub use error::{AudioError, AudioResult};

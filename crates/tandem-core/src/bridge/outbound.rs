//! Device → network bridge
//!
//! Outbound audio is never resampled: a sender must carry the device's
//! native rate. The bridge only stamps each device block with a network
//! timestamp and hands it to the stream layer.

use basedrop::{Handle, Shared};

use super::BridgePhase;
use crate::diagnostics::SkipReason;
use crate::error::{BridgeError, BridgeResult};
use crate::format::{AudioFormat, DeviceFormat};
use crate::rt::gc_handle;
use crate::stream::{StreamWriter, WriteError};
use crate::timestamp::WrappingU32;
use crate::types::{AudioBuffer, StreamId};

/// Result of handing one block to the stream layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Skipped(SkipReason),
    Failed(WriteError),
}

impl SendOutcome {
    pub fn is_sent(self) -> bool {
        matches!(self, SendOutcome::Sent)
    }
}

/// Immutable per-sender state run by the audio thread
#[derive(Debug, Clone)]
pub struct OutboundBridgeState {
    id: StreamId,
    phase: BridgePhase,
    format: Option<AudioFormat>,
    enabled: bool,
}

impl OutboundBridgeState {
    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn phase(&self) -> BridgePhase {
        self.phase
    }

    pub fn format(&self) -> Option<AudioFormat> {
        self.format
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Hand `input` (one device block) to the stream layer at `network_timestamp`
    ///
    /// Failures are returned for reporting; this never blocks or retries.
    pub fn send(&self, writer: &dyn StreamWriter, input: &AudioBuffer, network_timestamp: WrappingU32) -> SendOutcome {
        if self.phase != BridgePhase::OutputReady || !self.enabled {
            return SendOutcome::Skipped(SkipReason::NotReady);
        }
        match writer.send_audio_data_realtime(self.id, input, input.num_frames(), network_timestamp) {
            Ok(()) => SendOutcome::Sent,
            Err(error) => SendOutcome::Failed(error),
        }
    }

    pub fn process_block(&self, writer: &dyn StreamWriter, input: &AudioBuffer, network_timestamp: WrappingU32) -> bool {
        self.send(writer, input, network_timestamp).is_sent()
    }
}

/// Control-side half of a device → network bridge
pub struct OutboundBridge {
    id: StreamId,
    format: Option<AudioFormat>,
    device: Option<DeviceFormat>,
    enabled: bool,
    handle: Handle,
    state: Shared<OutboundBridgeState>,
}

impl OutboundBridge {
    pub fn new(id: StreamId) -> Self {
        let handle = gc_handle();
        let state = Shared::new(
            &handle,
            OutboundBridgeState {
                id,
                phase: BridgePhase::Unconfigured,
                format: None,
                enabled: true,
            },
        );
        Self {
            id,
            format: None,
            device: None,
            enabled: true,
            handle,
            state,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn format(&self) -> Option<AudioFormat> {
        self.format
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn phase(&self) -> BridgePhase {
        match (self.format, self.device) {
            (None, _) => BridgePhase::Unconfigured,
            (Some(format), Some(device)) if format.sample_rate == device.sample_rate() => BridgePhase::OutputReady,
            (Some(_), _) => BridgePhase::InputReady,
        }
    }

    /// Record the network-side format
    ///
    /// Rejects invalid formats, and formats whose rate differs from an
    /// already known device rate.
    pub fn prepare_input(&mut self, format: AudioFormat) -> BridgeResult<()> {
        if !format.is_valid() {
            log::warn!("{}: rejecting invalid sender format {}", self.id, format);
            return Err(BridgeError::InvalidFormat(format));
        }
        if let Some(device) = self.device {
            if format.sample_rate != device.sample_rate() {
                log::warn!(
                    "{}: sender rate {}Hz differs from device rate {}Hz",
                    self.id,
                    format.sample_rate,
                    device.sample_rate()
                );
                return Err(BridgeError::InvalidFormat(format));
            }
        }
        self.format = Some(format);
        self.refresh_state();
        Ok(())
    }

    /// Record the device format
    ///
    /// The device is always recorded. If the sender's rate does not match,
    /// the bridge stays `InputReady` and `InvalidFormat` is returned.
    pub fn prepare_output(&mut self, device: DeviceFormat) -> BridgeResult<()> {
        if !device.is_valid() {
            return Err(BridgeError::InvalidFormat(device.format));
        }
        self.device = Some(device);
        self.refresh_state();
        match self.format {
            Some(format) if format.sample_rate != device.sample_rate() => {
                log::warn!(
                    "{}: sender rate {}Hz differs from device rate {}Hz, sender idle",
                    self.id,
                    format.sample_rate,
                    device.sample_rate()
                );
                Err(BridgeError::InvalidFormat(format))
            }
            _ => Ok(()),
        }
    }

    pub fn release_output(&mut self) {
        self.device = None;
        self.refresh_state();
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.refresh_state();
    }

    pub fn state(&self) -> Shared<OutboundBridgeState> {
        Shared::clone(&self.state)
    }

    /// Send one block directly through the current state
    pub fn process_block(&self, writer: &dyn StreamWriter, input: &AudioBuffer, network_timestamp: WrappingU32) -> bool {
        self.state.process_block(writer, input, network_timestamp)
    }

    fn refresh_state(&mut self) {
        self.state = Shared::new(
            &self.handle,
            OutboundBridgeState {
                id: self.id,
                phase: self.phase(),
                format: self.format,
                enabled: self.enabled,
            },
        );
    }
}

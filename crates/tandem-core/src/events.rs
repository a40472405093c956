//! Control events
//!
//! Stream discovery, format negotiation and device lifecycle changes arrive
//! as [`ControlEvent`]s over a crossbeam channel. The control loop applies
//! them to the engines in arrival order; nothing here touches the audio
//! thread directly.

use crossbeam::channel::{Receiver, Sender};

use crate::format::{AudioFormat, DeviceFormat};
use crate::types::StreamId;

/// Default capacity of the control channel
pub const CONTROL_QUEUE_CAPACITY: usize = 256;

/// Something the control thread must react to
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    // ─────────────────────────────────────────────────────────────
    // Receivers (network → device)
    // ─────────────────────────────────────────────────────────────
    /// A network stream appeared and should be played on the device
    ReceiverAdded { id: StreamId, format: AudioFormat },
    /// The stream renegotiated its format
    ReceiverFormatChanged { id: StreamId, format: AudioFormat },
    /// Operator changed the playout delay
    ReceiverDelayChanged { id: StreamId, delay_frames: u32 },
    ReceiverRemoved { id: StreamId },

    // ─────────────────────────────────────────────────────────────
    // Senders (device → network)
    // ─────────────────────────────────────────────────────────────
    SenderAdded { id: StreamId, format: AudioFormat },
    SenderEnabled { id: StreamId, enabled: bool },
    SenderRemoved { id: StreamId },

    // ─────────────────────────────────────────────────────────────
    // Device
    // ─────────────────────────────────────────────────────────────
    /// The device is about to start with this format
    DeviceStarted(DeviceFormat),
    DeviceStopped,
}

impl ControlEvent {
    /// Stream the event refers to, if any
    pub fn stream(&self) -> Option<StreamId> {
        match self {
            Self::ReceiverAdded { id, .. }
            | Self::ReceiverFormatChanged { id, .. }
            | Self::ReceiverDelayChanged { id, .. }
            | Self::ReceiverRemoved { id }
            | Self::SenderAdded { id, .. }
            | Self::SenderEnabled { id, .. }
            | Self::SenderRemoved { id } => Some(*id),
            Self::DeviceStarted(_) | Self::DeviceStopped => None,
        }
    }
}

/// Create a bounded control channel
pub fn control_channel(capacity: usize) -> (Sender<ControlEvent>, Receiver<ControlEvent>) {
    crossbeam::channel::bounded(capacity.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::AudioEncoding;

    #[test]
    fn test_events_arrive_in_order() {
        let (tx, rx) = control_channel(CONTROL_QUEUE_CAPACITY);
        let format = AudioFormat::network(AudioEncoding::PcmS24, 48000, 2);
        tx.send(ControlEvent::ReceiverAdded { id: StreamId(1), format }).unwrap();
        tx.send(ControlEvent::DeviceStopped).unwrap();

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].stream(), Some(StreamId(1)));
        assert_eq!(events[1], ControlEvent::DeviceStopped);
    }

    #[test]
    fn test_bounded_channel_reports_full() {
        let (tx, _rx) = control_channel(1);
        tx.try_send(ControlEvent::DeviceStopped).unwrap();
        assert!(tx.try_send(ControlEvent::DeviceStopped).is_err());
    }
}

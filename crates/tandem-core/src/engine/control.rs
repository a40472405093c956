//! Control loop: applies [`ControlEvent`]s to the engines

use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError};

use super::{ReceiverEngine, ReceiverState, SenderEngine, SenderState};
use crate::error::BridgeError;
use crate::events::ControlEvent;
use crate::format::DeviceFormat;
use crate::types::StreamId;

/// Outcome of one applied control event, for observers
#[derive(Debug)]
pub enum EngineNotification {
    Receiver(ReceiverState),
    ReceiverRemoved(StreamId),
    Sender(SenderState),
    SenderRemoved(StreamId),
    /// Device started (`Some`) or stopped (`None`)
    Device(Option<DeviceFormat>),
    /// The event could not be applied
    Rejected { event: ControlEvent, error: BridgeError },
}

/// Owns both engines and drains the control channel into them
pub struct ControlLoop {
    receivers: ReceiverEngine,
    senders: SenderEngine,
    events: Receiver<ControlEvent>,
}

impl ControlLoop {
    pub fn new(receivers: ReceiverEngine, senders: SenderEngine, events: Receiver<ControlEvent>) -> Self {
        Self {
            receivers,
            senders,
            events,
        }
    }

    pub fn receivers(&self) -> &ReceiverEngine {
        &self.receivers
    }

    pub fn receivers_mut(&mut self) -> &mut ReceiverEngine {
        &mut self.receivers
    }

    pub fn senders(&self) -> &SenderEngine {
        &self.senders
    }

    pub fn senders_mut(&mut self) -> &mut SenderEngine {
        &mut self.senders
    }

    /// Apply every pending event without blocking
    pub fn pump(&mut self) -> Vec<EngineNotification> {
        let pending: Vec<ControlEvent> = self.events.try_iter().collect();
        pending.into_iter().map(|event| self.apply(event)).collect()
    }

    /// Wait up to `timeout` for an event, then apply everything pending
    ///
    /// Returns `None` once every sender of the channel is gone.
    pub fn pump_timeout(&mut self, timeout: Duration) -> Option<Vec<EngineNotification>> {
        match self.events.recv_timeout(timeout) {
            Ok(first) => {
                let mut notifications = vec![self.apply(first)];
                notifications.extend(self.pump());
                Some(notifications)
            }
            Err(RecvTimeoutError::Timeout) => Some(Vec::new()),
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Apply one event to the engines
    pub fn apply(&mut self, event: ControlEvent) -> EngineNotification {
        log::debug!("Control event: {:?}", event);
        let result = match &event {
            ControlEvent::ReceiverAdded { id, format } => self
                .receivers
                .add_receiver(*id, *format)
                .map(EngineNotification::Receiver),
            ControlEvent::ReceiverFormatChanged { id, format } => self
                .receivers
                .update_format(*id, *format)
                .map(EngineNotification::Receiver),
            ControlEvent::ReceiverDelayChanged { id, delay_frames } => self
                .receivers
                .set_receiver_delay(*id, *delay_frames)
                .map(EngineNotification::Receiver),
            ControlEvent::ReceiverRemoved { id } => self
                .receivers
                .remove_receiver(*id)
                .map(|()| EngineNotification::ReceiverRemoved(*id)),
            ControlEvent::SenderAdded { id, format } => self
                .senders
                .add_sender(*id, *format)
                .map(EngineNotification::Sender),
            ControlEvent::SenderEnabled { id, enabled } => self
                .senders
                .set_enabled(*id, *enabled)
                .map(EngineNotification::Sender),
            ControlEvent::SenderRemoved { id } => self
                .senders
                .remove_sender(*id)
                .map(|()| EngineNotification::SenderRemoved(*id)),
            ControlEvent::DeviceStarted(device) => self.device_started(*device),
            ControlEvent::DeviceStopped => self.device_stopped(),
        };

        result.unwrap_or_else(|error| {
            log::warn!("Rejected {:?}: {}", event, error);
            EngineNotification::Rejected { event, error }
        })
    }

    /// Wait until the audio threads run the latest published state
    pub fn sync(&self) -> Result<(), BridgeError> {
        self.receivers.sync()?;
        self.senders.sync()
    }

    fn device_started(&mut self, device: DeviceFormat) -> Result<EngineNotification, BridgeError> {
        log::info!(
            "Device starting: {} ({} frames max per block)",
            device.format,
            device.max_frames_per_block
        );
        self.receivers.device_about_to_start(device)?;
        self.senders.device_about_to_start(device)?;
        Ok(EngineNotification::Device(Some(device)))
    }

    fn device_stopped(&mut self) -> Result<EngineNotification, BridgeError> {
        log::info!("Device stopped");
        self.receivers.device_stopped()?;
        self.senders.device_stopped()?;
        Ok(EngineNotification::Device(None))
    }
}

//! Control-side owner of all outbound bridges

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::bridge::{BridgePhase, OutboundBridge};
use crate::clock::ClockSource;
use crate::config::BridgeConfig;
use crate::diagnostics::StatusSender;
use crate::dispatch::{ActiveOutboundSet, OutboundDispatcher};
use crate::error::{BridgeError, BridgeResult};
use crate::format::{AudioFormat, DeviceFormat};
use crate::rt::RealtimeStateChannel;
use crate::stream::StreamWriter;
use crate::types::StreamId;

/// Observer snapshot of one sender
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderState {
    pub id: StreamId,
    pub phase: BridgePhase,
    pub format: Option<AudioFormat>,
    pub enabled: bool,
}

impl SenderState {
    fn of(bridge: &OutboundBridge) -> Self {
        Self {
            id: bridge.id(),
            phase: bridge.phase(),
            format: bridge.format(),
            enabled: bridge.is_enabled(),
        }
    }

    /// Sender is actually transmitting
    pub fn is_active(&self) -> bool {
        self.enabled && self.phase == BridgePhase::OutputReady
    }
}

/// All device → network streams of one device
pub struct SenderEngine {
    config: BridgeConfig,
    bridges: BTreeMap<StreamId, OutboundBridge>,
    channel: Arc<RealtimeStateChannel<ActiveOutboundSet>>,
    device: Option<DeviceFormat>,
}

impl SenderEngine {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            bridges: BTreeMap::new(),
            channel: Arc::new(RealtimeStateChannel::new(ActiveOutboundSet::new())),
            device: None,
        }
    }

    pub fn channel(&self) -> Arc<RealtimeStateChannel<ActiveOutboundSet>> {
        Arc::clone(&self.channel)
    }

    pub fn device(&self) -> Option<DeviceFormat> {
        self.device
    }

    /// Start transmitting device input as a network stream
    ///
    /// The sender must carry the device's native rate. A rejected sender is
    /// still registered, idle, so it can be enabled or removed later.
    pub fn add_sender(&mut self, id: StreamId, format: AudioFormat) -> BridgeResult<SenderState> {
        if self.bridges.contains_key(&id) {
            return Err(BridgeError::DuplicateStream(id));
        }

        let mut bridge = OutboundBridge::new(id);
        if let Some(device) = self.device {
            bridge.prepare_output(device)?;
        }
        let prepared = bridge.prepare_input(format);
        let state = SenderState::of(&bridge);
        self.bridges.insert(id, bridge);
        self.publish()?;

        prepared.map(|()| {
            log::info!("{}: sender added ({})", id, format);
            state
        })
    }

    pub fn set_enabled(&mut self, id: StreamId, enabled: bool) -> BridgeResult<SenderState> {
        let bridge = self.bridges.get_mut(&id).ok_or(BridgeError::UnknownStream(id))?;
        bridge.set_enabled(enabled);
        let state = SenderState::of(bridge);
        log::info!("{}: sender {}", id, if enabled { "enabled" } else { "disabled" });
        self.publish()?;
        Ok(state)
    }

    pub fn remove_sender(&mut self, id: StreamId) -> BridgeResult<()> {
        self.bridges.remove(&id).ok_or(BridgeError::UnknownStream(id))?;
        self.publish()?;
        log::info!("{}: sender removed", id);
        Ok(())
    }

    /// Prepare every sender for `device`; senders at another rate stay idle
    pub fn device_about_to_start(&mut self, device: DeviceFormat) -> BridgeResult<()> {
        if !device.is_valid() {
            return Err(BridgeError::InvalidFormat(device.format));
        }
        self.device = Some(device);
        for bridge in self.bridges.values_mut() {
            if let Err(e) = bridge.prepare_output(device) {
                log::warn!("{}: cannot send from device: {}", bridge.id(), e);
            }
        }
        self.publish()?;
        Ok(())
    }

    pub fn device_stopped(&mut self) -> BridgeResult<()> {
        self.device = None;
        for bridge in self.bridges.values_mut() {
            bridge.release_output();
        }
        self.publish()?;
        Ok(())
    }

    /// Build the audio-thread half for the current device
    pub fn create_dispatcher(
        &self,
        clock: Arc<dyn ClockSource>,
        writer: Arc<dyn StreamWriter>,
        status: StatusSender,
    ) -> BridgeResult<OutboundDispatcher> {
        let device = self.device.ok_or(BridgeError::DeviceNotPrepared)?;
        self.config.validate()?;
        Ok(OutboundDispatcher::new(
            device,
            self.config.drift.clone(),
            self.channel(),
            clock,
            writer,
            status,
        ))
    }

    /// Publish the enabled, `OutputReady` senders to the audio thread
    pub fn publish(&self) -> BridgeResult<u64> {
        let active: ActiveOutboundSet = self
            .bridges
            .values()
            .filter(|bridge| bridge.is_enabled() && bridge.phase() == BridgePhase::OutputReady)
            .map(OutboundBridge::state)
            .collect();
        Ok(self.channel.publish(active)?)
    }

    pub fn sync(&self) -> BridgeResult<()> {
        let timeout = self.config.sync_timeout();
        if self.channel.sync(timeout) {
            Ok(())
        } else {
            Err(BridgeError::Timeout(timeout))
        }
    }

    pub fn sender_state(&self, id: StreamId) -> Option<SenderState> {
        self.bridges.get(&id).map(SenderState::of)
    }

    pub fn senders(&self) -> Vec<SenderState> {
        self.bridges.values().map(SenderState::of).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::AudioEncoding;

    fn format(rate: u32) -> AudioFormat {
        AudioFormat::network(AudioEncoding::PcmS16, rate, 2)
    }

    fn published(engine: &SenderEngine) -> Vec<StreamId> {
        engine.channel().peek().iter().map(|state| state.id()).collect()
    }

    #[test]
    fn test_sender_must_match_device_rate() {
        let mut engine = SenderEngine::new(BridgeConfig::default());
        engine.device_about_to_start(DeviceFormat::new(48000, 2, 256)).unwrap();

        assert!(matches!(
            engine.add_sender(StreamId(1), format(44100)),
            Err(BridgeError::InvalidFormat(_))
        ));
        assert_eq!(engine.sender_state(StreamId(1)).unwrap().phase, BridgePhase::Unconfigured);

        let state = engine.add_sender(StreamId(2), format(48000)).unwrap();
        assert!(state.is_active());
        assert_eq!(published(&engine), vec![StreamId(2)]);
    }

    #[test]
    fn test_disabled_sender_is_not_published() {
        let mut engine = SenderEngine::new(BridgeConfig::default());
        engine.add_sender(StreamId(1), format(48000)).unwrap();
        engine.device_about_to_start(DeviceFormat::new(48000, 2, 256)).unwrap();
        assert_eq!(published(&engine), vec![StreamId(1)]);

        let state = engine.set_enabled(StreamId(1), false).unwrap();
        assert!(!state.is_active());
        assert!(published(&engine).is_empty());

        engine.set_enabled(StreamId(1), true).unwrap();
        assert_eq!(published(&engine), vec![StreamId(1)]);
    }

    #[test]
    fn test_device_rate_change_idles_senders() {
        let mut engine = SenderEngine::new(BridgeConfig::default());
        engine.add_sender(StreamId(1), format(48000)).unwrap();
        engine.device_about_to_start(DeviceFormat::new(48000, 2, 256)).unwrap();
        engine.device_stopped().unwrap();
        assert!(published(&engine).is_empty());

        engine.device_about_to_start(DeviceFormat::new(96000, 2, 256)).unwrap();
        assert_eq!(engine.sender_state(StreamId(1)).unwrap().phase, BridgePhase::InputReady);
        assert!(published(&engine).is_empty());
    }

    #[test]
    fn test_remove_unknown_sender() {
        let mut engine = SenderEngine::new(BridgeConfig::default());
        assert!(matches!(
            engine.remove_sender(StreamId(4)),
            Err(BridgeError::UnknownStream(StreamId(4)))
        ));
        assert!(engine.set_enabled(StreamId(4), true).is_err());
    }
}

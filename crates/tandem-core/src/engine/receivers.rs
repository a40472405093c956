//! Control-side owner of all inbound bridges

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::bridge::{bridge_block_ceiling, BridgePhase, ConversionMode, InboundBridge};
use crate::clock::ClockSource;
use crate::config::BridgeConfig;
use crate::diagnostics::StatusSender;
use crate::dispatch::{ActiveInboundSet, InboundDispatcher};
use crate::error::{BridgeError, BridgeResult};
use crate::format::{AudioFormat, DeviceFormat};
use crate::resample::{AsrcFactory, ResamplerQuality};
use crate::rt::RealtimeStateChannel;
use crate::stream::StreamReader;
use crate::types::StreamId;

/// Observer snapshot of one receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverState {
    pub id: StreamId,
    pub phase: BridgePhase,
    pub format: Option<AudioFormat>,
    pub mode: Option<ConversionMode>,
    pub delay_frames: u32,
}

impl ReceiverState {
    fn of(bridge: &InboundBridge) -> Self {
        Self {
            id: bridge.id(),
            phase: bridge.phase(),
            format: bridge.input_format(),
            mode: bridge.mode(),
            delay_frames: bridge.delay_frames(),
        }
    }
}

/// All network → device streams of one device
///
/// Every mutation republishes the set of `OutputReady` bridges to the audio
/// thread before returning.
pub struct ReceiverEngine {
    config: BridgeConfig,
    factory: Arc<dyn AsrcFactory>,
    bridges: BTreeMap<StreamId, InboundBridge>,
    channel: Arc<RealtimeStateChannel<ActiveInboundSet>>,
    device: Option<DeviceFormat>,
}

impl ReceiverEngine {
    pub fn new(config: BridgeConfig, factory: Arc<dyn AsrcFactory>) -> Self {
        Self {
            config,
            factory,
            bridges: BTreeMap::new(),
            channel: Arc::new(RealtimeStateChannel::new(ActiveInboundSet::new())),
            device: None,
        }
    }

    /// Channel the inbound dispatcher acquires from
    pub fn channel(&self) -> Arc<RealtimeStateChannel<ActiveInboundSet>> {
        Arc::clone(&self.channel)
    }

    pub fn device(&self) -> Option<DeviceFormat> {
        self.device
    }

    /// Start playing a network stream
    ///
    /// A stream with an invalid format is still registered (as
    /// `Unconfigured`) so a later format change can bring it up; the error is
    /// returned all the same.
    pub fn add_receiver(&mut self, id: StreamId, format: AudioFormat) -> BridgeResult<ReceiverState> {
        if self.bridges.contains_key(&id) {
            return Err(BridgeError::DuplicateStream(id));
        }

        let mut bridge = InboundBridge::new(
            id,
            Arc::clone(&self.factory),
            self.config.resampler.quality,
            self.config.default_delay_frames,
        );
        let prepared = self.prepare(&mut bridge, format);
        let state = ReceiverState::of(&bridge);
        self.bridges.insert(id, bridge);
        self.publish()?;

        prepared.map(|()| {
            log::info!("{}: receiver added ({})", id, format);
            state
        })
    }

    /// Renegotiate a receiver's format
    ///
    /// An invalid format takes the receiver back to `Unconfigured`.
    pub fn update_format(&mut self, id: StreamId, format: AudioFormat) -> BridgeResult<ReceiverState> {
        let mut bridge = self.bridges.remove(&id).ok_or(BridgeError::UnknownStream(id))?;
        let prepared = self.prepare(&mut bridge, format);
        if prepared.is_err() {
            bridge.reset();
        }
        let state = ReceiverState::of(&bridge);
        self.bridges.insert(id, bridge);
        self.publish()?;
        prepared.map(|()| state)
    }

    /// Change a receiver's playout delay without disturbing its resampler
    pub fn set_receiver_delay(&mut self, id: StreamId, delay_frames: u32) -> BridgeResult<ReceiverState> {
        let bridge = self.bridges.get_mut(&id).ok_or(BridgeError::UnknownStream(id))?;
        bridge.set_delay(delay_frames);
        let state = ReceiverState::of(bridge);
        log::debug!("{}: delay set to {} frames", id, delay_frames);
        self.publish()?;
        Ok(state)
    }

    /// Stop playing a stream
    ///
    /// The audio thread may still be running the removed bridge's last
    /// snapshot; it is reclaimed once that block is done with it.
    pub fn remove_receiver(&mut self, id: StreamId) -> BridgeResult<()> {
        self.bridges.remove(&id).ok_or(BridgeError::UnknownStream(id))?;
        self.publish()?;
        log::info!("{}: receiver removed", id);
        Ok(())
    }

    /// Prepare every receiver for `device`
    ///
    /// Receivers that fail to prepare stay idle and are logged; the device
    /// itself is accepted as long as its format is valid.
    pub fn device_about_to_start(&mut self, device: DeviceFormat) -> BridgeResult<()> {
        if !device.is_valid() {
            return Err(BridgeError::InvalidFormat(device.format));
        }
        self.device = Some(device);
        for bridge in self.bridges.values_mut() {
            if bridge.input_format().is_none() {
                continue;
            }
            if let Err(e) = bridge.prepare_output(device) {
                log::warn!("{}: cannot play on device: {}", bridge.id(), e);
            }
        }
        self.publish()?;
        Ok(())
    }

    /// Forget the device: cursors and resamplers are dropped
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
        reader: Arc<dyn StreamReader>,
        status: StatusSender,
    ) -> BridgeResult<InboundDispatcher> {
        let device = self.device.ok_or(BridgeError::DeviceNotPrepared)?;
        self.config.validate()?;
        let global = self.factory.create(
            device.num_channels(),
            device.sample_rate(),
            device.sample_rate(),
            device.max_frames_per_block,
            ResamplerQuality::Fast,
        )?;
        Ok(InboundDispatcher::new(
            device,
            self.config.drift.clone(),
            global,
            bridge_block_ceiling(device.max_frames_per_block),
            self.channel(),
            clock,
            reader,
            status,
        ))
    }

    /// Publish the `OutputReady` receivers to the audio thread
    pub fn publish(&self) -> BridgeResult<u64> {
        let active: ActiveInboundSet = self
            .bridges
            .values()
            .filter(|bridge| bridge.phase() == BridgePhase::OutputReady)
            .map(InboundBridge::state)
            .collect();
        Ok(self.channel.publish(active)?)
    }

    /// Wait until the audio thread runs the latest published set
    pub fn sync(&self) -> BridgeResult<()> {
        let timeout = self.config.sync_timeout();
        if self.channel.sync(timeout) {
            Ok(())
        } else {
            Err(BridgeError::Timeout(timeout))
        }
    }

    pub fn receiver_state(&self, id: StreamId) -> Option<ReceiverState> {
        self.bridges.get(&id).map(ReceiverState::of)
    }

    pub fn receivers(&self) -> Vec<ReceiverState> {
        self.bridges.values().map(ReceiverState::of).collect()
    }

    fn prepare(&self, bridge: &mut InboundBridge, format: AudioFormat) -> BridgeResult<()> {
        bridge.prepare_input(format)?;
        match self.device {
            Some(device) => bridge.prepare_output(device),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::AudioEncoding;
    use crate::testing::LinearFactory;
    use std::time::Duration;

    fn engine() -> (ReceiverEngine, Arc<LinearFactory>) {
        let factory = Arc::new(LinearFactory::new());
        let config = BridgeConfig {
            sync_timeout_ms: 20,
            ..BridgeConfig::default()
        };
        (ReceiverEngine::new(config, factory.clone()), factory)
    }

    fn format(rate: u32) -> AudioFormat {
        AudioFormat::network(AudioEncoding::PcmS24, rate, 2)
    }

    fn published(engine: &ReceiverEngine) -> Vec<StreamId> {
        engine.channel().peek().iter().map(|state| state.id()).collect()
    }

    #[test]
    fn test_receivers_publish_once_device_known() {
        let (mut engine, factory) = engine();
        engine.add_receiver(StreamId(1), format(48000)).unwrap();
        engine.add_receiver(StreamId(2), format(96000)).unwrap();
        assert!(published(&engine).is_empty());

        engine.device_about_to_start(DeviceFormat::new(48000, 2, 256)).unwrap();
        assert_eq!(published(&engine), vec![StreamId(1), StreamId(2)]);
        assert_eq!(factory.created(), 1);
        assert_eq!(
            engine.receiver_state(StreamId(1)).unwrap().mode,
            Some(ConversionMode::PassThrough)
        );
    }

    #[test]
    fn test_invalid_format_registers_unconfigured() {
        let (mut engine, _) = engine();
        engine.device_about_to_start(DeviceFormat::new(48000, 2, 256)).unwrap();

        let result = engine.add_receiver(StreamId(7), format(0));
        assert!(matches!(result, Err(BridgeError::InvalidFormat(_))));
        assert_eq!(engine.receiver_state(StreamId(7)).unwrap().phase, BridgePhase::Unconfigured);
        assert!(published(&engine).is_empty());

        let state = engine.update_format(StreamId(7), format(44100)).unwrap();
        assert_eq!(state.phase, BridgePhase::OutputReady);
        assert_eq!(published(&engine), vec![StreamId(7)]);

        // Renegotiating to garbage resets the stream
        assert!(engine.update_format(StreamId(7), format(0)).is_err());
        assert_eq!(engine.receiver_state(StreamId(7)).unwrap().phase, BridgePhase::Unconfigured);
        assert!(published(&engine).is_empty());
    }

    #[test]
    fn test_duplicate_and_unknown_streams() {
        let (mut engine, _) = engine();
        engine.add_receiver(StreamId(1), format(48000)).unwrap();
        assert!(matches!(
            engine.add_receiver(StreamId(1), format(48000)),
            Err(BridgeError::DuplicateStream(StreamId(1)))
        ));
        assert!(matches!(
            engine.remove_receiver(StreamId(9)),
            Err(BridgeError::UnknownStream(StreamId(9)))
        ));
        assert!(engine.set_receiver_delay(StreamId(9), 10).is_err());
    }

    #[test]
    fn test_delay_change_republishes() {
        let (mut engine, factory) = engine();
        engine.device_about_to_start(DeviceFormat::new(44100, 2, 441)).unwrap();
        engine.add_receiver(StreamId(3), format(48000)).unwrap();
        let before = engine.channel().generation();

        engine.set_receiver_delay(StreamId(3), 240).unwrap();
        assert!(engine.channel().generation() > before);
        assert_eq!(engine.channel().peek()[0].delay_frames(), 240);
        assert_eq!(factory.created(), 1);
    }

    #[test]
    fn test_device_stop_releases_and_restart_rebuilds() {
        let (mut engine, factory) = engine();
        engine.add_receiver(StreamId(1), format(96000)).unwrap();
        engine.device_about_to_start(DeviceFormat::new(48000, 2, 128)).unwrap();
        assert_eq!(published(&engine).len(), 1);

        engine.device_stopped().unwrap();
        assert!(published(&engine).is_empty());
        assert_eq!(engine.receiver_state(StreamId(1)).unwrap().phase, BridgePhase::InputReady);
        assert!(matches!(
            engine.create_dispatcher(
                Arc::new(crate::testing::SimulatedClock::new(Default::default(), 0.0)),
                Arc::new(crate::testing::RampReader::new()),
                crate::diagnostics::status_channel(4, 1).0,
            ),
            Err(BridgeError::DeviceNotPrepared)
        ));

        engine.device_about_to_start(DeviceFormat::new(48000, 2, 128)).unwrap();
        assert_eq!(published(&engine).len(), 1);
        assert_eq!(factory.created(), 2);
    }

    #[test]
    fn test_dispatcher_refuses_invalid_drift_config() {
        let mut config = BridgeConfig::default();
        config.drift.max_correction = -0.01;
        let mut engine = ReceiverEngine::new(config, Arc::new(LinearFactory::new()));
        engine.device_about_to_start(DeviceFormat::new(48000, 2, 128)).unwrap();

        let result = engine.create_dispatcher(
            Arc::new(crate::testing::SimulatedClock::new(Default::default(), 0.0)),
            Arc::new(crate::testing::RampReader::new()),
            crate::diagnostics::status_channel(4, 1).0,
        );
        assert!(matches!(result, Err(BridgeError::InvalidConfig(_))));
    }

    #[test]
    fn test_sync_times_out_without_audio_thread() {
        let (mut engine, _) = engine();
        engine.add_receiver(StreamId(1), format(48000)).unwrap();
        assert!(matches!(engine.sync(), Err(BridgeError::Timeout(t)) if t == Duration::from_millis(20)));

        // Audio thread picks the set up
        let _ = engine.channel().acquire();
        assert!(engine.sync().is_ok());
    }

    #[test]
    fn test_removed_receiver_disappears_from_set() {
        let (mut engine, _) = engine();
        engine.device_about_to_start(DeviceFormat::new(48000, 2, 128)).unwrap();
        engine.add_receiver(StreamId(1), format(48000)).unwrap();
        engine.add_receiver(StreamId(2), format(48000)).unwrap();
        let held = engine.channel().acquire();

        engine.remove_receiver(StreamId(1)).unwrap();
        assert_eq!(published(&engine), vec![StreamId(2)]);
        assert_eq!(held.len(), 2);
        assert_eq!(engine.receivers().len(), 1);
    }
}

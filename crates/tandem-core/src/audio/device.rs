//! Audio device enumeration
//!
//! Devices are enumerated from every available cpal host, so on Linux both
//! the ALSA hardware devices and any sound-server devices show up.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Host, HostId};

use super::config::DeviceId;
use super::error::{AudioError, AudioResult};

/// Sample rates checked against each device's supported ranges
const COMMON_SAMPLE_RATES: [u32; 6] = [44100, 48000, 88200, 96000, 176400, 192000];

/// Which side of a device a stream uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Playback (receivers)
    Output,
    /// Capture (senders)
    Input,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Output => "output",
            Direction::Input => "input",
        }
    }
}

fn host_name(host_id: HostId) -> String {
    let name = format!("{:?}", host_id);
    match name.as_str() {
        "Alsa" => "ALSA".to_string(),
        "Jack" => "JACK".to_string(),
        "Wasapi" => "WASAPI".to_string(),
        _ => name,
    }
}

fn get_host_by_name(name: &str) -> Option<Host> {
    cpal::available_hosts()
        .into_iter()
        .find(|host_id| host_name(*host_id) == name)
        .and_then(|host_id| cpal::host_from_id(host_id).ok())
}

fn host_devices(host: &Host, direction: Direction) -> Option<Vec<cpal::Device>> {
    let devices: Vec<cpal::Device> = match direction {
        Direction::Output => host.output_devices().ok()?.collect(),
        Direction::Input => host.input_devices().ok()?.collect(),
    };
    Some(devices)
}

fn host_default(host: &Host, direction: Direction) -> Option<cpal::Device> {
    match direction {
        Direction::Output => host.default_output_device(),
        Direction::Input => host.default_input_device(),
    }
}

/// Information about an audio device
#[derive(Debug, Clone)]
pub struct AudioDevice {
    /// Identifier for configuration (includes host info)
    pub id: DeviceId,
    pub name: String,
    /// Host backend name (e.g. "ALSA")
    pub host: String,
    pub is_default: bool,
    /// Common sample rates within the supported ranges
    pub sample_rates: Vec<u32>,
    pub max_channels: u16,
}

impl std::fmt::Display for AudioDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.host, self.name)
    }
}

fn supported_ranges(device: &cpal::Device, direction: Direction) -> Vec<cpal::SupportedStreamConfigRange> {
    let ranges = match direction {
        Direction::Output => device.supported_output_configs().map(|c| c.collect()),
        Direction::Input => device.supported_input_configs().map(|c| c.collect()),
    };
    ranges.unwrap_or_default()
}

fn enumerate(direction: Direction) -> AudioResult<Vec<AudioDevice>> {
    let mut all_devices: Vec<AudioDevice> = Vec::new();

    for host_id in cpal::available_hosts() {
        let host = match cpal::host_from_id(host_id) {
            Ok(h) => h,
            Err(e) => {
                log::debug!("Could not initialize host {:?}: {}", host_id, e);
                continue;
            }
        };
        let host_label = host_name(host_id);
        let default_name = host_default(&host, direction).and_then(|d| d.name().ok());

        let Some(devices) = host_devices(&host, direction) else {
            log::debug!("Could not enumerate {} devices for {:?}", direction.label(), host_id);
            continue;
        };

        for device in devices {
            let Ok(name) = device.name() else {
                continue;
            };
            let configs = supported_ranges(&device, direction);
            if configs.is_empty() {
                continue;
            }

            let mut sample_rates: Vec<u32> = Vec::new();
            let mut max_channels: u16 = 0;
            for config in &configs {
                max_channels = max_channels.max(config.channels());
                for rate in COMMON_SAMPLE_RATES {
                    if rate >= config.min_sample_rate().0
                        && rate <= config.max_sample_rate().0
                        && !sample_rates.contains(&rate)
                    {
                        sample_rates.push(rate);
                    }
                }
            }
            sample_rates.sort_unstable();

            all_devices.push(AudioDevice {
                id: DeviceId::with_host(&name, &host_label),
                is_default: default_name.as_ref() == Some(&name),
                name,
                host: host_label.clone(),
                sample_rates,
                max_channels,
            });
        }
    }

    if all_devices.is_empty() {
        return Err(AudioError::NoDevices(direction.label()));
    }

    // Default devices first, then by host, then by name
    all_devices.sort_by(|a, b| {
        b.is_default
            .cmp(&a.is_default)
            .then_with(|| a.host.cmp(&b.host))
            .then_with(|| a.name.cmp(&b.name))
    });

    log::info!("Enumerated {} audio {} devices", all_devices.len(), direction.label());
    Ok(all_devices)
}

/// All playback devices from all hosts
pub fn get_output_devices() -> AudioResult<Vec<AudioDevice>> {
    enumerate(Direction::Output)
}

/// All capture devices from all hosts
pub fn get_input_devices() -> AudioResult<Vec<AudioDevice>> {
    enumerate(Direction::Input)
}

/// Find a device by its ID
///
/// Uses the host named in the ID if there is one, otherwise searches all
/// available hosts.
pub fn find_device_by_id(id: &DeviceId, direction: Direction) -> AudioResult<cpal::Device> {
    let matches = |d: &cpal::Device| d.name().ok().as_ref() == Some(&id.name);

    if let Some(host) = id.host.as_deref().and_then(get_host_by_name) {
        return host_devices(&host, direction)
            .ok_or_else(|| AudioError::ConfigError(format!("cannot enumerate {} devices", direction.label())))?
            .into_iter()
            .find(matches)
            .ok_or_else(|| AudioError::DeviceNotFound(id.name.clone()));
    }

    for host_id in cpal::available_hosts() {
        let Ok(host) = cpal::host_from_id(host_id) else {
            continue;
        };
        if let Some(device) = host_devices(&host, direction).and_then(|d| d.into_iter().find(matches)) {
            return Ok(device);
        }
    }

    Err(AudioError::DeviceNotFound(id.name.clone()))
}

/// The configured device, or the default host's default device
pub fn resolve_device(id: Option<&DeviceId>, direction: Direction) -> AudioResult<cpal::Device> {
    match id {
        Some(id) => find_device_by_id(id, direction),
        None => host_default(&cpal::default_host(), direction)
            .ok_or_else(|| AudioError::NoDefaultDevice(format!("no default {} device", direction.label()))),
    }
}

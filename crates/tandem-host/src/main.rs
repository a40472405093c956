//! Tandem Host - runs the clock-domain bridges against a local audio device
//!
//! Simulated network receivers (sine tones) are played on the output device
//! through the inbound bridges; optionally the input device is captured
//! through an outbound bridge into a level meter.
//!
//! ## Command line flags
//!
//! - `--list-devices`: print audio devices and exit
//! - `--config <path>`: use a config file other than ~/.config/tandem/host.yaml
//! - `--write-default-config`: write the default config to the config path and exit

mod config;
mod loopback;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use tandem_core::audio::{get_input_devices, get_output_devices, start_receiver_stream, start_sender_stream};
use tandem_core::config::{load_config, save_config};
use tandem_core::diagnostics::status_channel;
use tandem_core::engine::{ControlLoop, EngineNotification, ReceiverEngine, SenderEngine};
use tandem_core::events::{control_channel, ControlEvent, CONTROL_QUEUE_CAPACITY};
use tandem_core::resample::RubatoFactory;

use config::{default_host_config_path, HostConfig};
use loopback::{MeterWriter, SystemClock, ToneSource};

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|arg| arg == "--list-devices") {
        list_devices();
        return Ok(());
    }

    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
        .unwrap_or_else(default_host_config_path);

    if args.iter().any(|arg| arg == "--write-default-config") {
        save_config(&HostConfig::default(), &config_path)?;
        println!("Wrote default config to {}", config_path.display());
        return Ok(());
    }

    let config: HostConfig = load_config(&config_path);
    config.bridge.validate().context("Invalid bridge configuration")?;
    run(config)
}

fn list_devices() {
    for (label, devices) in [("Output", get_output_devices()), ("Input", get_input_devices())] {
        println!("{} devices:", label);
        match devices {
            Ok(devices) => {
                for device in devices {
                    let marker = if device.is_default { "*" } else { " " };
                    println!(
                        " {} {} ({} ch, {:?} Hz)",
                        marker, device, device.max_channels, device.sample_rates
                    );
                }
            }
            Err(e) => println!("   {}", e),
        }
    }
}

fn run(config: HostConfig) -> Result<()> {
    let loopback = &config.loopback;
    log::info!("tandem-host starting up");

    let clock = Arc::new(SystemClock::new(loopback.clock_ppm));
    let source = loopback
        .receivers()
        .fold(ToneSource::new(), |source, (id, hz)| source.with_tone(id, hz, loopback.stream_rate));
    let source = Arc::new(source);
    let meter = Arc::new(MeterWriter::new());

    let factory = Arc::new(RubatoFactory::new(config.bridge.resampler.clone()));
    let receivers = ReceiverEngine::new(config.bridge.clone(), factory);
    let senders = SenderEngine::new(config.bridge.clone());
    let (events, event_rx) = control_channel(CONTROL_QUEUE_CAPACITY);
    let mut control = ControlLoop::new(receivers, senders, event_rx);

    for (id, hz) in loopback.receivers() {
        log::info!("{}: {}Hz tone at {}", id, hz, loopback.stream_format());
        events.send(ControlEvent::ReceiverAdded {
            id,
            format: loopback.stream_format(),
        })?;
        if loopback.delay_frames > 0 {
            events.send(ControlEvent::ReceiverDelayChanged {
                id,
                delay_frames: loopback.delay_frames,
            })?;
        }
    }
    report_notifications(control.pump());

    let (receiver_status, mut receiver_monitor) =
        status_channel(config.bridge.status_queue_capacity, config.bridge.status_interval_blocks);
    let output = start_receiver_stream(
        &config.audio,
        control.receivers_mut(),
        clock.clone(),
        source,
        receiver_status,
    )
    .context("Failed to start output stream")?;
    println!(
        "Playing {} receiver(s) on {} ({}, ~{:.1}ms blocks)",
        loopback.tones_hz.len(),
        output.device_name(),
        output.device_format().format,
        output.latency_ms()
    );

    let mut input = None;
    if loopback.enable_sender {
        let (sender_status, sender_monitor) =
            status_channel(config.bridge.status_queue_capacity, config.bridge.status_interval_blocks);
        match start_sender_stream(
            &config.audio,
            control.senders_mut(),
            clock.clone(),
            meter.clone(),
            sender_status,
        ) {
            Ok(handle) => {
                // Sender must carry the device's native rate
                let format = loopback.stream_format().with_sample_rate(handle.device_format().sample_rate());
                events.send(ControlEvent::SenderAdded {
                    id: loopback.sender_id(),
                    format,
                })?;
                input = Some((handle, sender_monitor));
            }
            Err(e) => log::warn!("Sender disabled: {}", e),
        }
    }

    if let Err(e) = control.sync() {
        log::warn!("Audio thread has not picked up the bridges yet: {}", e);
    }

    let deadline = Instant::now() + Duration::from_secs(loopback.run_seconds);
    let mut next_report = Instant::now() + REPORT_INTERVAL;
    while Instant::now() < deadline {
        match control.pump_timeout(Duration::from_millis(50)) {
            Some(notifications) => report_notifications(notifications),
            None => break,
        }
        receiver_monitor.poll();
        if let Some((_, monitor)) = input.as_mut() {
            monitor.poll();
        }

        if Instant::now() >= next_report {
            next_report += REPORT_INTERVAL;
            let stats = output.stats();
            log::info!(
                "Output: ratio {:.6}, drift {} frames, {} blocks, {} re-alignments",
                stats.ratio(),
                stats.drift_frames(),
                stats.blocks(),
                stats.realignments()
            );
            if input.is_some() {
                let (blocks, peak) = meter.take_reading();
                log::info!("Input: {} blocks sent, peak {:.3}", blocks, peak);
            }
        }
    }

    drop(input);
    drop(output);
    events.send(ControlEvent::DeviceStopped)?;
    report_notifications(control.pump());

    let counters = receiver_monitor.counters();
    println!(
        "Done: {} skipped bridge blocks, {} skipped device blocks, {} re-alignments",
        counters.blocks_skipped, counters.device_blocks_skipped, counters.realignments
    );
    Ok(())
}

fn report_notifications(notifications: Vec<EngineNotification>) {
    for notification in notifications {
        match notification {
            EngineNotification::Receiver(state) => {
                log::info!("{}: {:?}, {:?}", state.id, state.phase, state.mode)
            }
            EngineNotification::Sender(state) => {
                log::info!("{}: {:?}, active: {}", state.id, state.phase, state.is_active())
            }
            EngineNotification::Rejected { event, error } => {
                log::warn!("Control event {:?} rejected: {}", event, error)
            }
            other => log::debug!("{:?}", other),
        }
    }
}

// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for frame provider operations
//!
//! This module provides command-line functionality for:
//! - Listing capture devices and the format each would run at
//! - Running a capture session and printing its statistics
//! - Printing the effective configuration

use frame_provider::backends::camera::v4l2_device::V4l2DeviceProvider;
use frame_provider::backends::camera::{DeviceProvider, FormatSelector, ProviderManager};
use frame_provider::backends::virtual_camera::{SimulatedDevice, SimulatedProvider};
use frame_provider::config::ProviderConfig;
use frame_provider::errors::ProviderResult;
use frame_provider::pipelines::{FrameSink, PublishedFrame};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Device id used by `--simulate` when none is given
const SIMULATED_DEVICE_ID: &str = "sim0";

/// Counts what the provider hands to the host
#[derive(Default)]
struct StatsSink {
    frames: AtomicU64,
    lit_frames: AtomicU64,
    bytes: AtomicU64,
    availability_updates: AtomicU64,
    available: AtomicBool,
}

impl FrameSink for StatsSink {
    fn publish_frame(&self, frame: PublishedFrame) -> ProviderResult<()> {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.bytes
            .fetch_add(frame.pixels.len() as u64, Ordering::Relaxed);
        if frame.illumination_active().unwrap_or(false) {
            self.lit_frames.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn update_availability(&self, available: bool) {
        self.availability_updates.fetch_add(1, Ordering::Relaxed);
        self.available.store(available, Ordering::SeqCst);
        if !available {
            println!();
            println!("Device became unavailable");
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<ProviderConfig, Box<dyn std::error::Error>> {
    Ok(ProviderConfig::load_or_default(path.as_deref())?)
}

fn device_provider(config: &ProviderConfig, simulate: bool) -> Arc<dyn DeviceProvider> {
    if simulate {
        Arc::new(SimulatedProvider::single(SimulatedDevice::new(
            SIMULATED_DEVICE_ID,
        )))
    } else {
        Arc::new(V4l2DeviceProvider::new(config))
    }
}

/// List capture devices and the format the selector would pick
pub fn list_devices(
    config_path: Option<PathBuf>,
    simulate: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    let provider = device_provider(&config, simulate);
    let selector = FormatSelector::new(config.required_subtype);

    let devices = provider.enumerate();
    if devices.is_empty() {
        println!("No capture devices found.");
        return Ok(());
    }

    println!("Available capture devices:");
    println!();
    for identity in devices {
        println!("  {} ({})", identity.name, identity.id);
        if !identity.driver.is_empty() {
            println!("      Driver: {}", identity.driver);
        }

        match provider.open_device(&identity.id) {
            Ok(device) => match selector.select(device.as_ref()) {
                Ok(selected) => println!(
                    "      Format: {} (stream {})",
                    selected.format, selected.stream_index
                ),
                Err(e) => println!("      Format: none ({})", e),
            },
            Err(e) => println!("      Unusable: {}", e),
        }
        println!();
    }

    Ok(())
}

/// Run one provider for `seconds` and print what it published
pub fn capture(
    device: Option<String>,
    seconds: u64,
    config_path: Option<PathBuf>,
    simulate: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    let device_id = device.unwrap_or_else(|| {
        if simulate {
            SIMULATED_DEVICE_ID.to_string()
        } else {
            "/dev/video0".to_string()
        }
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let sink = Arc::new(StatsSink::default());
    let manager = ProviderManager::new(
        device_provider(&config, simulate),
        sink.clone(),
        config.clone(),
        runtime.handle().clone(),
    );

    let provider = manager.device_added(&device_id)?;
    let profile = provider.profile();
    println!(
        "Using device: {} (stream {})",
        device_id,
        provider.acquisition().session().stream_index()
    );
    println!(
        "Publishing: {}x{} {} ({} illumination)",
        profile.width,
        profile.height,
        profile.pixel_format,
        config.illumination.display_name()
    );

    // Set up Ctrl+C handler
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    println!();
    println!("Capturing... (press Ctrl+C to stop early)");
    sink.available.store(provider.is_available(), Ordering::SeqCst);
    provider.start()?;

    let start = Instant::now();
    let target_duration = Duration::from_secs(seconds);
    while start.elapsed() < target_duration {
        if stop_flag.load(Ordering::SeqCst) {
            println!();
            println!("Stopping early...");
            break;
        }

        let elapsed = start.elapsed().as_secs();
        print!(
            "\rCapturing: {:02}:{:02}  frames: {}",
            elapsed / 60,
            elapsed % 60,
            sink.frames.load(Ordering::Relaxed)
        );
        std::io::Write::flush(&mut std::io::stdout())?;

        std::thread::sleep(Duration::from_millis(100));
    }
    println!();

    provider.stop()?;
    let loop_stats = provider.stats();
    let publish_stats = provider.publish_stats();
    manager.shutdown();

    let elapsed = start.elapsed().as_secs_f64().max(f64::EPSILON);
    let frames = sink.frames.load(Ordering::Relaxed);
    println!();
    println!("Read steps:           {}", loop_stats.steps);
    println!("Frames committed:     {}", loop_stats.frames_published);
    println!("Frames published:     {}", frames);
    println!("Frames lit:           {}", sink.lit_frames.load(Ordering::Relaxed));
    println!("Frames dropped:       {}", publish_stats.dropped);
    println!("Bytes published:      {}", sink.bytes.load(Ordering::Relaxed));
    println!("Average rate:         {:.1} fps", frames as f64 / elapsed);
    println!("Availability changes: {}", loop_stats.availability_changes);
    println!("Peak concurrent steps: {}", loop_stats.peak_concurrent_steps);
    println!(
        "Device available:     {}",
        sink.available.load(Ordering::SeqCst)
    );

    Ok(())
}

/// Print the effective configuration as JSON
pub fn show_config(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the frame provider and provider manager

use frame_provider::backends::camera::DeviceProvider;
use frame_provider::backends::virtual_camera::{SimulatedDevice, SimulatedProvider};
use frame_provider::constants::property;
use frame_provider::media::VideoSubtype;
use frame_provider::pipelines::PropertyChangeStatus;
use frame_provider::{
    FrameProvider, FrameSink, IlluminationMode, ProviderConfig, ProviderManager, ProviderResult,
    PublishedFrame,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Sink that keeps everything it is handed
#[derive(Default)]
struct CollectingSink {
    frames: Mutex<Vec<PublishedFrame>>,
    availability: Mutex<Vec<bool>>,
}

impl CollectingSink {
    fn frame_count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }
}

impl FrameSink for CollectingSink {
    fn publish_frame(&self, frame: PublishedFrame) -> ProviderResult<()> {
        self.frames.lock().unwrap().push(frame);
        Ok(())
    }

    fn update_availability(&self, available: bool) {
        self.availability.lock().unwrap().push(available);
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn simulated(id: &str) -> SimulatedDevice {
    SimulatedDevice::new(id).with_read_delay(Duration::from_millis(2))
}

#[test]
fn test_publishes_gray8_frames_with_alternating_illumination() {
    let rt = runtime();
    let devices = SimulatedProvider::single(simulated("sim0"));
    let sink = Arc::new(CollectingSink::default());
    let provider = FrameProvider::open(
        &devices,
        "sim0",
        &ProviderConfig::default(),
        sink.clone(),
        rt.handle().clone(),
    )
    .unwrap();

    let profile = provider.profile();
    assert_eq!(profile.pixel_format, VideoSubtype::Gray8);
    assert_eq!((profile.width, profile.height), (160, 120));

    provider.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || sink.frame_count() >= 6));
    provider.stop().unwrap();
    thread::sleep(Duration::from_millis(50));

    let frames = sink.frames.lock().unwrap();
    assert!(frames.iter().all(|f| f.pixels.len() == 160 * 120));
    assert_eq!(frames[0].illumination_active(), Some(true));
    for pair in frames.windows(2) {
        assert_ne!(pair[0].illumination_active(), pair[1].illumination_active());
        assert!(pair[1].sequence > pair[0].sequence);
        assert!(pair[1].relative_time >= pair[0].relative_time);
    }
}

#[test]
fn test_luma_is_stripped_from_yuy2() {
    let rt = runtime();
    let devices = SimulatedProvider::single(simulated("sim0"));
    let sink = Arc::new(CollectingSink::default());
    let provider = FrameProvider::open(
        &devices,
        "sim0",
        &ProviderConfig::default(),
        sink.clone(),
        rt.handle().clone(),
    )
    .unwrap();

    provider.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || sink.frame_count() >= 1));
    provider.shutdown();

    let frames = sink.frames.lock().unwrap();
    let first = &frames[0];
    // The simulated gradient puts (x + row + sequence) in every luma byte
    let shift = first.sequence as usize;
    assert_eq!(first.pixels[0], shift as u8);
    assert_eq!(first.pixels[1], (1 + shift) as u8);
    assert_eq!(first.pixels[160], (1 + shift) as u8);
}

#[test]
fn test_mirror_state_is_published() {
    let rt = runtime();
    let devices = SimulatedProvider::single(simulated("sim0").with_mirrored(true));
    let sink = Arc::new(CollectingSink::default());
    let provider = FrameProvider::open(
        &devices,
        "sim0",
        &ProviderConfig::default(),
        sink.clone(),
        rt.handle().clone(),
    )
    .unwrap();

    assert_eq!(provider.property(property::IS_MIRRORED), Some(json!(true)));
    provider.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || sink.frame_count() >= 1));
    provider.shutdown();

    assert_eq!(sink.frames.lock().unwrap()[0].is_mirrored(), Some(true));
}

#[test]
fn test_always_on_mode_properties() {
    let rt = runtime();
    let devices = SimulatedProvider::single(simulated("sim0"));
    let config = ProviderConfig {
        illumination: IlluminationMode::AlwaysOn,
        ..ProviderConfig::default()
    };
    let sink = Arc::new(CollectingSink::default());
    let provider =
        FrameProvider::open(&devices, "sim0", &config, sink.clone(), rt.handle().clone()).unwrap();

    assert_eq!(
        provider.property(property::INTERLEAVED_ILLUMINATION_ENABLED),
        Some(json!(false))
    );
    assert_eq!(
        provider.property(property::AMBIENT_SUBTRACTION_ENABLED),
        Some(json!(true))
    );

    provider.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || sink.frame_count() >= 3));
    provider.shutdown();

    let frames = sink.frames.lock().unwrap();
    assert!(frames.iter().all(|f| f.illumination_active() == Some(true)));
}

#[test]
fn test_property_requests() {
    let rt = runtime();
    let devices = SimulatedProvider::single(simulated("sim0"));
    let provider = FrameProvider::open(
        &devices,
        "sim0",
        &ProviderConfig::default(),
        Arc::new(CollectingSink::default()),
        rt.handle().clone(),
    )
    .unwrap();

    assert_eq!(
        provider.set_property(property::VIDEO_PROFILE, json!({})),
        PropertyChangeStatus::NotSupported
    );
    assert_eq!(
        provider.set_property(property::AVAILABLE_VIDEO_PROFILES, json!([])),
        PropertyChangeStatus::ReadOnly
    );
    assert_eq!(
        provider.set_property(property::EXPOSURE_COMPENSATION, json!("bright")),
        PropertyChangeStatus::ValueOutOfRange
    );
    assert_eq!(
        provider.set_property(property::EXPOSURE_COMPENSATION, json!(-500)),
        PropertyChangeStatus::Accepted
    );
    assert_eq!(
        provider.property(property::EXPOSURE_COMPENSATION),
        Some(json!(-500))
    );
    assert_eq!(
        provider.set_property("host_tag", json!("front")),
        PropertyChangeStatus::Accepted
    );
    assert_eq!(provider.property("host_tag"), Some(json!("front")));
}

#[test]
fn test_unplug_reports_unavailable() {
    let rt = runtime();
    let devices = SimulatedProvider::single(simulated("sim0"));
    let sink = Arc::new(CollectingSink::default());
    let provider = FrameProvider::open(
        &devices,
        "sim0",
        &ProviderConfig::default(),
        sink.clone(),
        rt.handle().clone(),
    )
    .unwrap();

    provider.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || sink.frame_count() >= 1));
    devices.remove("sim0");

    assert!(wait_until(Duration::from_secs(2), || {
        !sink.availability.lock().unwrap().is_empty()
    }));
    assert!(!provider.is_available());
    provider.shutdown();

    assert_eq!(*sink.availability.lock().unwrap(), vec![false]);
}

#[test]
fn test_start_is_idempotent() {
    let rt = runtime();
    let devices = SimulatedProvider::single(simulated("sim0"));
    let provider = FrameProvider::open(
        &devices,
        "sim0",
        &ProviderConfig::default(),
        Arc::new(CollectingSink::default()),
        rt.handle().clone(),
    )
    .unwrap();

    provider.start().unwrap();
    provider.start().unwrap();
    assert!(provider.is_running());
    provider.stop().unwrap();
    assert!(!provider.is_running());
    provider.stop().unwrap();
}

#[test]
fn test_manager_tracks_devices() {
    let rt = runtime();
    let devices = Arc::new(SimulatedProvider::new(vec![simulated("sim0"), simulated("sim1")]));
    let manager = ProviderManager::new(
        devices.clone() as Arc<dyn DeviceProvider>,
        Arc::new(CollectingSink::default()),
        ProviderConfig::default(),
        rt.handle().clone(),
    );

    let first = manager.device_added("sim0").unwrap();
    let again = manager.device_added("sim0").unwrap();
    assert!(Arc::ptr_eq(&first, &again));
    manager.device_added("sim1").unwrap();
    assert!(manager.device_added("sim7").is_err());
    assert_eq!(manager.provider_ids(), vec!["sim0".to_string(), "sim1".to_string()]);

    assert!(manager.device_removed("sim0"));
    assert!(!manager.device_removed("sim0"));
    assert!(manager.get_provider("sim0").is_none());

    // Unplug and replug sim1: the manager must build a fresh provider
    let unplugged = devices.remove("sim1").unwrap();
    assert!(manager.device_removed("sim1"));
    assert!(manager.device_added("sim1").is_err());
    unplugged.control().reconnect();
    devices.add(unplugged);
    let replugged = manager.device_added("sim1").unwrap();
    assert!(replugged.is_available());

    manager.shutdown();
    assert!(manager.is_shut_down());
    assert!(manager.provider_ids().is_empty());
    assert!(manager.device_added("sim1").is_err());
}

// SPDX-License-Identifier: GPL-3.0-only

//! Host-facing frame provider
//!
//! Wraps one [`AcquisitionLoop`] and turns its notifications into calls on a
//! [`FrameSink`]:
//!
//! ```text
//! AcquisitionLoop ──frame ready──▶ copy current frame
//!                                       │
//!                                       ▼
//!                            PassThroughTransform (illumination tag)
//!                                       │
//!                                       ▼
//!                               YUY2 → Gray8 strip
//!                                       │
//!                                       ▼
//!                           FrameSink::publish_frame
//!
//! AcquisitionLoop ──availability──▶ FrameSink::update_availability
//! ```
//!
//! The provider also owns the property set the host reads (video profile,
//! device ids, mirror and illumination state) and answers property change
//! requests.

use super::transform::{MediaTransform, PassThroughTransform, Sample, illumination_source};
use crate::backends::camera::types::{Capability, FormatDescriptor, Frame, Ratio};
use crate::backends::camera::{
    AcquisitionLoop, DeviceProvider, DeviceSession, FormatSelector, LoopStats, SubscriptionToken,
};
use crate::config::ProviderConfig;
use crate::constants::{IlluminationMode, property};
use crate::errors::{ProviderError, ProviderResult};
use crate::media::formats::VideoSubtype;
use crate::media::yuy2_to_gray8;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Description of the frames a provider publishes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoProfile {
    pub pixel_format: VideoSubtype,
    pub width: u32,
    pub height: u32,
    pub pixel_aspect_ratio: f64,
    /// Frame duration in 100 ns ticks
    pub frame_duration: u64,
}

impl VideoProfile {
    /// Gray8 profile for a negotiated capture format
    ///
    /// Only YUY2 sources can be reduced to Gray8. A device reporting no frame
    /// rate is assumed to run at `fallback_rate`.
    pub fn from_format(format: &FormatDescriptor, fallback_rate: u32) -> ProviderResult<Self> {
        if format.subtype != VideoSubtype::Yuy2 {
            return Err(ProviderError::InvalidMediaType);
        }

        let rate = if format.frame_rate.num == 0 {
            Ratio::from_int(fallback_rate)
        } else {
            format.frame_rate
        };

        Ok(Self {
            pixel_format: VideoSubtype::Gray8,
            width: format.width,
            height: format.height,
            pixel_aspect_ratio: format.pixel_aspect.as_f64(),
            frame_duration: rate.frame_duration_ticks(),
        })
    }

    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize
    }

    fn to_value(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Frame handed to the host
#[derive(Debug, Clone)]
pub struct PublishedFrame {
    /// Gray8 pixels, `width * height` bytes
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Capture time relative to stream start
    pub relative_time: Duration,
    pub sequence: u64,
    pub properties: Map<String, Value>,
}

impl PublishedFrame {
    pub fn illumination_active(&self) -> Option<bool> {
        self.properties
            .get(property::ACTIVE_ILLUMINATION_ENABLED)
            .and_then(Value::as_bool)
    }

    pub fn is_mirrored(&self) -> Option<bool> {
        self.properties
            .get(property::IS_MIRRORED)
            .and_then(Value::as_bool)
    }
}

/// Host distribution collaborator
pub trait FrameSink: Send + Sync {
    /// Deliver one frame
    fn publish_frame(&self, frame: PublishedFrame) -> ProviderResult<()>;

    /// Report whether the device is reachable
    fn update_availability(&self, available: bool);
}

/// Outcome of a property change request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyChangeStatus {
    Accepted,
    NotSupported,
    ReadOnly,
    ValueOutOfRange,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishStats {
    pub published: u64,
    pub dropped: u64,
}

struct ProviderShared {
    id: String,
    acquisition: AcquisitionLoop,
    sink: Arc<dyn FrameSink>,
    transform: Mutex<PassThroughTransform>,
    profile: VideoProfile,
    illumination: IlluminationMode,
    properties: Mutex<Map<String, Value>>,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl ProviderShared {
    fn session(&self) -> &Arc<DeviceSession> {
        self.acquisition.session()
    }

    fn lock_properties(&self) -> MutexGuard<'_, Map<String, Value>> {
        self.properties.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_transform(&self) -> MutexGuard<'_, PassThroughTransform> {
        self.transform.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn on_frame_ready(&self) {
        if !matches!(self.acquisition.current_frame_result(), Some(Ok(()))) {
            return;
        }
        let Some(frame) = self.acquisition.current_frame() else {
            return;
        };

        match self.build_frame(frame) {
            Ok(published) => {
                if let Err(e) = self.sink.publish_frame(published) {
                    warn!(provider = %self.id, error = %e, "Failed to publish frame");
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.published.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(e) => {
                warn!(provider = %self.id, error = %e, "Dropping frame");
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn on_availability_changed(&self) {
        let available = self.acquisition.is_available();
        info!(provider = %self.id, available, "Availability changed");
        self.sink.update_availability(available);
    }

    fn build_frame(&self, frame: Frame) -> ProviderResult<PublishedFrame> {
        let illumination = self.tag_illumination(&frame)?;

        let format = frame.format;
        let mut pixels = vec![0u8; self.profile.frame_size()];
        yuy2_to_gray8(
            &frame.data,
            format.width,
            format.height,
            frame.stride as usize,
            &mut pixels,
        )?;

        let mut properties = Map::new();
        properties.insert(
            property::ACTIVE_ILLUMINATION_ENABLED.to_string(),
            Value::Bool(illumination),
        );
        properties.insert(
            property::IS_MIRRORED.to_string(),
            Value::Bool(self.session().is_mirrored()),
        );

        debug!(provider = %self.id, sequence = frame.sequence, illumination, "Publishing frame");

        Ok(PublishedFrame {
            pixels,
            width: format.width,
            height: format.height,
            relative_time: frame.timestamp,
            sequence: frame.sequence,
            properties,
        })
    }

    /// Run the frame through the transform stage and read back its tag.
    /// Untagged samples count as lit so the host never discards them.
    fn tag_illumination(&self, frame: &Frame) -> ProviderResult<bool> {
        let mut transform = self.lock_transform();
        if let Err(e) = transform.submit(0, Sample::from(frame.clone())) {
            transform.flush();
            return Err(e);
        }
        let sample = transform.produce_output()?;
        Ok(sample.illumination_active.unwrap_or(true))
    }

    /// Refresh properties that can change while the device is open
    fn update_source_properties(&self) {
        let session = self.session();
        let exposure = session.capability_value(Capability::ExposureCompensation.name());
        let mirrored = session.is_mirrored();

        let mut properties = self.lock_properties();
        if let Ok(value) = exposure {
            properties.insert(property::EXPOSURE_COMPENSATION.to_string(), json!(value));
        }
        properties.insert(property::IS_MIRRORED.to_string(), Value::Bool(mirrored));
    }
}

/// Publishes frames from one capture device
pub struct FrameProvider {
    shared: Arc<ProviderShared>,
    frame_token: SubscriptionToken,
    availability_token: SubscriptionToken,
}

impl FrameProvider {
    /// Open `device_id` and prepare it for publishing
    ///
    /// The device is left idle; call [`FrameProvider::start`] to begin.
    pub fn open(
        devices: &dyn DeviceProvider,
        device_id: &str,
        config: &ProviderConfig,
        sink: Arc<dyn FrameSink>,
        runtime: Handle,
    ) -> ProviderResult<Self> {
        let selector = FormatSelector::new(config.required_subtype);
        let session = Arc::new(DeviceSession::open(devices, device_id, &selector)?);
        let format = session.format();
        let profile = VideoProfile::from_format(&format, config.default_frame_rate)?;

        let mut transform = PassThroughTransform::new(
            Box::new(vec![format]),
            illumination_source(config.illumination),
        );
        transform.set_input_type(0, &format, false)?;

        let acquisition = AcquisitionLoop::builder(Arc::clone(&session))
            .name(device_id)
            .runtime(runtime)
            .stop_wait(config.stop_wait())
            .build()?;

        let identity = session.identity();
        let mut properties = Map::new();
        let profile_value = profile.to_value();
        properties.insert(property::VIDEO_PROFILE.to_string(), profile_value.clone());
        properties.insert(
            property::SUPPORTED_VIDEO_PROFILES.to_string(),
            Value::Array(vec![profile_value.clone()]),
        );
        properties.insert(
            property::AVAILABLE_VIDEO_PROFILES.to_string(),
            Value::Array(vec![profile_value]),
        );
        properties.insert(property::ID.to_string(), json!([identity.id]));
        properties.insert(property::DISPLAY_NAME.to_string(), json!(identity.name));
        properties.insert(property::DEVICE_KIND.to_string(), json!(config.device_kind));
        properties.insert(
            property::ILLUMINATION_MODE.to_string(),
            serde_json::to_value(config.illumination)?,
        );
        properties.insert(
            property::INTERLEAVED_ILLUMINATION_ENABLED.to_string(),
            Value::Bool(config.illumination.is_interleaved()),
        );
        properties.insert(
            property::AMBIENT_SUBTRACTION_ENABLED.to_string(),
            Value::Bool(config.illumination.ambient_subtracted()),
        );

        let shared = Arc::new(ProviderShared {
            id: device_id.to_string(),
            acquisition,
            sink,
            transform: Mutex::new(transform),
            profile,
            illumination: config.illumination,
            properties: Mutex::new(properties),
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });
        shared.update_source_properties();

        // Handlers hold weak references, the loop lives inside `shared`
        let weak: Weak<ProviderShared> = Arc::downgrade(&shared);
        let frame_token = shared.acquisition.subscribe_frame_ready(move || {
            if let Some(shared) = weak.upgrade() {
                shared.on_frame_ready();
            }
        })?;
        let weak: Weak<ProviderShared> = Arc::downgrade(&shared);
        let availability_token = shared.acquisition.subscribe_availability_changed(move || {
            if let Some(shared) = weak.upgrade() {
                shared.on_availability_changed();
            }
        })?;

        info!(
            provider = %device_id,
            width = profile.width,
            height = profile.height,
            illumination = config.illumination.display_name(),
            "Frame provider ready"
        );

        Ok(Self {
            shared,
            frame_token,
            availability_token,
        })
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn profile(&self) -> VideoProfile {
        self.shared.profile
    }

    pub fn illumination_mode(&self) -> IlluminationMode {
        self.shared.illumination
    }

    /// Begin publishing; a running provider is left alone
    pub fn start(&self) -> ProviderResult<()> {
        if self.shared.acquisition.is_running() {
            return Ok(());
        }
        self.shared.acquisition.start()?;
        self.shared.update_source_properties();
        Ok(())
    }

    /// Stop publishing without waiting for the in-flight read
    pub fn stop(&self) -> ProviderResult<()> {
        if !self.shared.acquisition.is_running() {
            return Ok(());
        }
        self.shared.acquisition.stop(false)?;
        self.shared.lock_transform().flush();
        Ok(())
    }

    /// Stop, detach the handlers and close the device
    pub fn shutdown(&self) {
        let acquisition = &self.shared.acquisition;
        acquisition.shutdown();
        let _ = acquisition.unsubscribe_frame_ready(self.frame_token);
        let _ = acquisition.unsubscribe_availability_changed(self.availability_token);
        self.shared.lock_transform().flush();
        info!(provider = %self.shared.id, "Frame provider shut down");
    }

    pub fn is_running(&self) -> bool {
        self.shared.acquisition.is_running()
    }

    pub fn is_available(&self) -> bool {
        self.shared.acquisition.is_available()
    }

    pub fn properties(&self) -> Map<String, Value> {
        self.shared.lock_properties().clone()
    }

    pub fn property(&self, name: &str) -> Option<Value> {
        self.shared.lock_properties().get(name).cloned()
    }

    /// Handle a host request to change a property
    pub fn set_property(&self, name: &str, value: Value) -> PropertyChangeStatus {
        let status = match name {
            // Single profile, switching would need a re-open
            property::VIDEO_PROFILE => PropertyChangeStatus::NotSupported,
            property::SUPPORTED_VIDEO_PROFILES | property::AVAILABLE_VIDEO_PROFILES => {
                PropertyChangeStatus::ReadOnly
            }
            property::EXPOSURE_COMPENSATION => self.set_exposure_compensation(&value),
            _ => {
                self.shared.lock_properties().insert(name.to_string(), value);
                PropertyChangeStatus::Accepted
            }
        };
        debug!(provider = %self.shared.id, property = name, ?status, "Property change request");
        status
    }

    fn set_exposure_compensation(&self, value: &Value) -> PropertyChangeStatus {
        let name = Capability::ExposureCompensation.name();
        let session = self.shared.session();
        if !session.is_capability_supported(name) {
            return PropertyChangeStatus::NotSupported;
        }

        let Some(requested) = value.as_f64() else {
            return PropertyChangeStatus::ValueOutOfRange;
        };
        let requested = requested.round().clamp(i32::MIN as f64, i32::MAX as f64) as i32;

        match session.try_set_capability(name, requested) {
            Ok(applied) => {
                self.shared
                    .lock_properties()
                    .insert(property::EXPOSURE_COMPENSATION.to_string(), json!(applied));
                PropertyChangeStatus::Accepted
            }
            Err(e) => {
                warn!(provider = %self.shared.id, error = %e, "Failed to set exposure compensation");
                PropertyChangeStatus::ValueOutOfRange
            }
        }
    }

    pub fn stats(&self) -> LoopStats {
        self.shared.acquisition.stats()
    }

    pub fn publish_stats(&self) -> PublishStats {
        PublishStats {
            published: self.shared.published.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn acquisition(&self) -> &AcquisitionLoop {
        &self.shared.acquisition
    }
}

impl std::fmt::Debug for FrameProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameProvider")
            .field("id", &self.shared.id)
            .field("profile", &self.shared.profile)
            .field("acquisition", &self.shared.acquisition)
            .finish()
    }
}

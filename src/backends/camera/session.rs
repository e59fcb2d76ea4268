// SPDX-License-Identifier: GPL-3.0-only

//! Device session
//!
//! Owns the connection to one capture device together with the format fixed
//! at open time. Every operation takes the session mutex, so a blocking read
//! and a stream toggle never interleave. A handle that reports itself dead is
//! dropped by [`DeviceSession::close`] and never touched again; recovering
//! means opening a new session.

use super::format_selector::{FormatSelector, SelectedFormat};
use super::types::{Capability, CapabilityRange, DeviceIdentity, FormatDescriptor, Frame, FrameTags};
use super::{CaptureDevice, DeviceProvider};
use crate::errors::{ProviderError, ProviderResult};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of [`DeviceSession::read_frame`]
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    pub result: ProviderResult<Frame>,
    /// `false` once the handle must be discarded
    pub still_valid: bool,
}

impl ReadOutcome {
    fn valid(result: ProviderResult<Frame>) -> Self {
        Self {
            result,
            still_valid: true,
        }
    }

    fn invalid(error: ProviderError) -> Self {
        Self {
            result: Err(error),
            still_valid: false,
        }
    }
}

struct SessionInner {
    device: Option<Box<dyn CaptureDevice>>,
    stream_index: u32,
    format: FormatDescriptor,
    stream_active: bool,
    identity: DeviceIdentity,
    mirrored: bool,
    last_timestamp: Duration,
    next_sequence: u64,
}

pub struct DeviceSession {
    inner: Mutex<SessionInner>,
}

impl DeviceSession {
    /// Open `device_id`, negotiate a format and leave the stream deselected
    ///
    /// No session exists unless every step succeeds.
    pub fn open(
        provider: &dyn DeviceProvider,
        device_id: &str,
        selector: &FormatSelector,
    ) -> ProviderResult<Self> {
        let mut device = provider.open_device(device_id)?;

        let SelectedFormat {
            stream_index,
            format,
        } = selector.select(device.as_ref())?;

        device
            .set_current_format(stream_index, &format)
            .map_err(|e| open_failed(device_id, "set format", e))?;
        device
            .set_stream_selection(stream_index, false)
            .map_err(|e| open_failed(device_id, "deselect stream", e))?;

        let identity = device.identity();
        let mirrored = match device.query_mirrored() {
            Ok(mirrored) => mirrored,
            Err(e) => {
                debug!(device = %device_id, error = %e, "Mirror state unavailable");
                false
            }
        };

        info!(
            device = %device_id,
            name = %identity.name,
            format = %format,
            stream = stream_index,
            mirrored,
            "Opened device session"
        );

        Ok(Self {
            inner: Mutex::new(SessionInner {
                device: Some(device),
                stream_index,
                format,
                stream_active: false,
                identity,
                mirrored,
                last_timestamp: Duration::ZERO,
                next_sequence: 0,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Select or deselect the capture stream
    ///
    /// Repeating the current state is a no-op. Deselecting a closed session
    /// succeeds; selecting one fails with `InvalidState`.
    pub fn set_stream_active(&self, active: bool) -> ProviderResult<()> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let stream_index = inner.stream_index;

        let Some(device) = inner.device.as_mut() else {
            return if active {
                Err(ProviderError::InvalidState(
                    "cannot activate a closed session".to_string(),
                ))
            } else {
                Ok(())
            };
        };

        if inner.stream_active == active {
            return Ok(());
        }

        device.set_stream_selection(stream_index, active)?;
        inner.stream_active = active;
        debug!(stream = stream_index, active, "Stream selection changed");
        Ok(())
    }

    pub fn is_stream_active(&self) -> bool {
        self.lock().stream_active
    }

    /// Blocking read of one frame
    ///
    /// | situation                     | result                   | still valid |
    /// |-------------------------------|--------------------------|-------------|
    /// | session closed                | `InvalidState`           | no          |
    /// | stream deselected             | `NotActive`              | yes         |
    /// | read failed or error flagged  | `DeviceInvalidated`      | no          |
    /// | no sample delivered           | `ReadTransientFailure`   | yes         |
    /// | sample delivered              | `Ok(frame)`              | yes         |
    pub fn read_frame(&self) -> ReadOutcome {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let stream_index = inner.stream_index;

        let Some(device) = inner.device.as_mut() else {
            return ReadOutcome::invalid(ProviderError::InvalidState(
                "session closed".to_string(),
            ));
        };

        // Fails once the device is gone, even while deselected
        match device.stream_selection(stream_index) {
            Ok(true) => {}
            Ok(false) => return ReadOutcome::valid(Err(ProviderError::NotActive)),
            Err(e) => {
                warn!(error = %e, "Stream selection query failed");
                return ReadOutcome::invalid(ProviderError::DeviceInvalidated);
            }
        }

        let read = match device.read_sample(stream_index) {
            Ok(read) => read,
            Err(e) => {
                warn!(error = %e, "Device read failed");
                return ReadOutcome::invalid(ProviderError::DeviceInvalidated);
            }
        };

        if read.stream_error {
            warn!("Device flagged a stream error");
            return ReadOutcome::invalid(ProviderError::DeviceInvalidated);
        }

        let Some(sample) = read.sample else {
            return ReadOutcome::valid(Err(ProviderError::ReadTransientFailure));
        };

        // Timestamps never go backwards within a session
        let timestamp = sample.timestamp.max(inner.last_timestamp);
        inner.last_timestamp = timestamp;
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;

        ReadOutcome::valid(Ok(Frame {
            data: sample.data,
            format: inner.format,
            stride: sample.stride,
            timestamp,
            sequence,
            tags: FrameTags {
                illumination_active: None,
                mirrored: inner.mirrored,
            },
        }))
    }

    /// Re-query cached device state
    ///
    /// An unsupported mirror query keeps the previous value; any other
    /// failure resets it to `false`.
    pub fn refresh_cached_state(&self) -> ProviderResult<()> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let Some(device) = inner.device.as_ref() else {
            return Err(ProviderError::InvalidState("session closed".to_string()));
        };

        match device.query_mirrored() {
            Ok(mirrored) => inner.mirrored = mirrored,
            Err(ProviderError::NotSupported(_)) => {}
            Err(e) => {
                debug!(error = %e, "Mirror query failed, assuming not mirrored");
                inner.mirrored = false;
            }
        }
        Ok(())
    }

    /// Release the handle and forget identification strings
    ///
    /// Returns `true` when this call released the handle, `false` when the
    /// session was already closed.
    pub fn close(&self) -> bool {
        let mut inner = self.lock();
        let Some(device) = inner.device.take() else {
            return false;
        };
        info!(device = %inner.identity.id, "Closing device session");
        drop(device);
        inner.stream_active = false;
        inner.identity = DeviceIdentity::default();
        true
    }

    pub fn is_open(&self) -> bool {
        self.lock().device.is_some()
    }

    /// Format negotiated at open; unchanged for the life of the session
    pub fn format(&self) -> FormatDescriptor {
        self.lock().format
    }

    pub fn stream_index(&self) -> u32 {
        self.lock().stream_index
    }

    /// Identification strings, empty once closed
    pub fn identity(&self) -> DeviceIdentity {
        self.lock().identity.clone()
    }

    /// Cached mirror state
    pub fn is_mirrored(&self) -> bool {
        self.lock().mirrored
    }

    // ===== Capability pass-through =====

    pub fn is_capability_supported(&self, name: &str) -> bool {
        self.capability_range(name).is_ok()
    }

    /// Range of the named capability
    pub fn capability_range(&self, name: &str) -> ProviderResult<CapabilityRange> {
        let capability = parse_capability(name)?;
        let inner = self.lock();
        let device = inner
            .device
            .as_ref()
            .ok_or_else(|| ProviderError::InvalidState("session closed".to_string()))?;
        device.capability_range(capability)
    }

    /// Current value of the named capability
    pub fn capability_value(&self, name: &str) -> ProviderResult<i32> {
        let capability = parse_capability(name)?;
        let inner = self.lock();
        let device = inner
            .device
            .as_ref()
            .ok_or_else(|| ProviderError::InvalidState("session closed".to_string()))?;
        device.capability_value(capability)
    }

    /// Set the named capability, clamping `value` into the device range
    ///
    /// Returns the value the device reports after the write.
    pub fn try_set_capability(&self, name: &str, value: i32) -> ProviderResult<i32> {
        let capability = parse_capability(name)?;
        let mut guard = self.lock();
        let inner = &mut *guard;
        let device = inner
            .device
            .as_mut()
            .ok_or_else(|| ProviderError::InvalidState("session closed".to_string()))?;

        let range = device.capability_range(capability)?;
        let clamped = range.clamp(value);
        if clamped != value {
            debug!(capability = name, requested = value, clamped, "Clamped capability value");
        }
        let applied = device.set_capability(capability, clamped)?;

        if capability == Capability::Mirror {
            inner.mirrored = applied != 0;
        }
        Ok(applied)
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("DeviceSession")
            .field("device", &inner.identity.id)
            .field("open", &inner.device.is_some())
            .field("format", &inner.format)
            .field("stream_index", &inner.stream_index)
            .field("stream_active", &inner.stream_active)
            .finish()
    }
}

fn parse_capability(name: &str) -> ProviderResult<Capability> {
    Capability::from_name(name).ok_or_else(|| ProviderError::NotSupported(name.to_string()))
}

fn open_failed(device_id: &str, step: &str, error: ProviderError) -> ProviderError {
    ProviderError::DeviceOpenFailed(format!("{}: {} failed: {}", device_id, step, error))
}

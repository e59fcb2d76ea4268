// SPDX-License-Identifier: GPL-3.0-only

//! Simulated capture device
//!
//! An in-process device that produces YUY2 frames without hardware. Each
//! device carries a shared [`SimulatedControl`] so a test (or the CLI's
//! `--simulate` mode) can pull the plug, inject empty reads, slow reads down
//! or flip the mirror control while a session is running.
//!
//! ```text
//! SimulatedProvider ──open_device──▶ SimulatedDevice (clone)
//!                                          │
//!                                          ▼
//!                               SimulatedControl (shared)
//!                                  ▲
//!                                  │ invalidate / delay / mirror
//!                               test or CLI
//! ```

use crate::backends::camera::types::{
    Capability, CapabilityRange, DeviceIdentity, DeviceRead, FormatDescriptor, FrameData, Ratio,
    RawSample,
};
use crate::backends::camera::{CaptureDevice, DeviceProvider, FormatEnumerator};
use crate::errors::{ProviderError, ProviderResult};
use crate::media::formats::VideoSubtype;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// Shared knobs and counters of a simulated device
#[derive(Debug, Default)]
struct ControlState {
    invalidated: AtomicBool,
    stream_error_once: AtomicBool,
    empty_reads: AtomicU32,
    read_delay_us: AtomicU64,
    mirrored: AtomicBool,
    mirror_unsupported: AtomicBool,
    mirror_query_fails: AtomicBool,
    selected: AtomicBool,
    reads: AtomicU64,
    reads_in_flight: AtomicU32,
    peak_reads_in_flight: AtomicU32,
    capabilities: Mutex<HashMap<Capability, i32>>,
}

/// Handle for steering a simulated device from outside the session
#[derive(Debug, Clone, Default)]
pub struct SimulatedControl {
    state: Arc<ControlState>,
}

impl SimulatedControl {
    /// Make every following read fail as if the device was unplugged
    pub fn invalidate(&self) {
        info!("Simulated device invalidated");
        self.state.invalidated.store(true, Ordering::SeqCst);
    }

    /// Undo [`invalidate`](Self::invalidate), as if the device came back
    pub fn reconnect(&self) {
        self.state.invalidated.store(false, Ordering::SeqCst);
    }

    pub fn is_invalidated(&self) -> bool {
        self.state.invalidated.load(Ordering::SeqCst)
    }

    /// Flag a stream error on the next read only
    pub fn flag_stream_error_once(&self) {
        self.state.stream_error_once.store(true, Ordering::SeqCst);
    }

    /// Next `count` reads deliver no sample
    pub fn inject_empty_reads(&self, count: u32) {
        self.state.empty_reads.store(count, Ordering::SeqCst);
    }

    /// Sleep this long inside every read
    pub fn set_read_delay(&self, delay: Duration) {
        self.state
            .read_delay_us
            .store(delay.as_micros() as u64, Ordering::SeqCst);
    }

    pub fn set_mirrored(&self, mirrored: bool) {
        self.state.mirrored.store(mirrored, Ordering::SeqCst);
    }

    pub fn set_mirror_supported(&self, supported: bool) {
        self.state.mirror_unsupported.store(!supported, Ordering::SeqCst);
    }

    /// Mirror query fails with an I/O error instead of answering
    pub fn set_mirror_query_fails(&self, fails: bool) {
        self.state.mirror_query_fails.store(fails, Ordering::SeqCst);
    }

    pub fn is_stream_selected(&self) -> bool {
        self.state.selected.load(Ordering::SeqCst)
    }

    /// Total reads issued against the device
    pub fn reads(&self) -> u64 {
        self.state.reads.load(Ordering::SeqCst)
    }

    /// Largest number of reads that were ever executing at the same time
    pub fn peak_concurrent_reads(&self) -> u32 {
        self.state.peak_reads_in_flight.load(Ordering::SeqCst)
    }

    pub fn capability_value(&self, capability: Capability) -> Option<i32> {
        self.state
            .capabilities
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&capability)
            .copied()
    }
}

/// In-process capture device producing a moving YUY2 gradient
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    id: String,
    name: String,
    formats: Vec<Vec<FormatDescriptor>>,
    current: Option<(u32, FormatDescriptor)>,
    sequence: u64,
    control: SimulatedControl,
}

impl SimulatedDevice {
    /// Device offering one stream: NV12 then YUY2, both 160x120 at 30fps
    pub fn new(id: &str) -> Self {
        let rate = Ratio::from_int(30);
        Self {
            id: id.to_string(),
            name: format!("Simulated Camera ({})", id),
            formats: vec![vec![
                FormatDescriptor::video(VideoSubtype::Nv12, 160, 120, rate),
                FormatDescriptor::video(VideoSubtype::Yuy2, 160, 120, rate),
            ]],
            current: None,
            sequence: 0,
            control: SimulatedControl::default(),
        }
    }

    /// Replace the offered formats, outer index is the stream
    pub fn with_formats(mut self, formats: Vec<Vec<FormatDescriptor>>) -> Self {
        self.formats = formats;
        self
    }

    pub fn with_mirrored(self, mirrored: bool) -> Self {
        self.control.set_mirrored(mirrored);
        self
    }

    pub fn with_read_delay(self, delay: Duration) -> Self {
        self.control.set_read_delay(delay);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn control(&self) -> SimulatedControl {
        self.control.clone()
    }

    fn render(&self, format: &FormatDescriptor) -> Vec<u8> {
        let row_bytes = format.width as usize * 2;
        let mut data = vec![0x80u8; row_bytes * format.height as usize];
        let shift = self.sequence as usize;
        for (row, line) in data.chunks_exact_mut(row_bytes.max(1)).enumerate() {
            for (x, pair) in line.chunks_exact_mut(2).enumerate() {
                pair[0] = (x + row + shift) as u8;
            }
        }
        data
    }
}

impl FormatEnumerator for SimulatedDevice {
    fn native_format(&self, stream: u32, index: u32) -> ProviderResult<FormatDescriptor> {
        self.formats.native_format(stream, index)
    }
}

impl CaptureDevice for SimulatedDevice {
    fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            id: self.id.clone(),
            name: self.name.clone(),
            driver: "simulated".to_string(),
            real_path: self.id.clone(),
        }
    }

    fn set_current_format(&mut self, stream: u32, format: &FormatDescriptor) -> ProviderResult<()> {
        let offered = self
            .formats
            .get(stream as usize)
            .ok_or(ProviderError::InvalidStream)?;
        if !offered.contains(format) {
            return Err(ProviderError::InvalidMediaType);
        }
        self.current = Some((stream, *format));
        Ok(())
    }

    fn set_stream_selection(&mut self, stream: u32, selected: bool) -> ProviderResult<()> {
        if self.control.is_invalidated() {
            return Err(ProviderError::Io("device disconnected".to_string()));
        }
        if stream as usize >= self.formats.len() {
            return Err(ProviderError::InvalidStream);
        }
        self.control.state.selected.store(selected, Ordering::SeqCst);
        Ok(())
    }

    fn stream_selection(&self, stream: u32) -> ProviderResult<bool> {
        if self.control.is_invalidated() {
            return Err(ProviderError::Io("device disconnected".to_string()));
        }
        if stream as usize >= self.formats.len() {
            return Err(ProviderError::InvalidStream);
        }
        Ok(self.control.is_stream_selected())
    }

    fn read_sample(&mut self, stream: u32) -> ProviderResult<DeviceRead> {
        let state = Arc::clone(&self.control.state);
        state.reads.fetch_add(1, Ordering::SeqCst);
        let in_flight = state.reads_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state
            .peak_reads_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);

        let delay = state.read_delay_us.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_micros(delay));
        }

        let result = self.read_inner(stream);
        state.reads_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn query_mirrored(&self) -> ProviderResult<bool> {
        let state = &self.control.state;
        if state.mirror_unsupported.load(Ordering::SeqCst) {
            return Err(ProviderError::NotSupported("mirror".to_string()));
        }
        if state.mirror_query_fails.load(Ordering::SeqCst) {
            return Err(ProviderError::Io("mirror query failed".to_string()));
        }
        Ok(state.mirrored.load(Ordering::SeqCst))
    }

    fn capability_range(&self, capability: Capability) -> ProviderResult<CapabilityRange> {
        match capability {
            Capability::ExposureCompensation => Ok(CapabilityRange {
                min: -2000,
                max: 2000,
                step: 1,
                default: 0,
            }),
            Capability::Brightness => Ok(CapabilityRange {
                min: 0,
                max: 255,
                step: 1,
                default: 128,
            }),
            Capability::Mirror if !self.control.state.mirror_unsupported.load(Ordering::SeqCst) => {
                Ok(CapabilityRange {
                    min: 0,
                    max: 1,
                    step: 1,
                    default: 0,
                })
            }
            other => Err(ProviderError::NotSupported(other.name().to_string())),
        }
    }

    fn capability_value(&self, capability: Capability) -> ProviderResult<i32> {
        let range = self.capability_range(capability)?;
        if capability == Capability::Mirror {
            return Ok(i32::from(self.control.state.mirrored.load(Ordering::SeqCst)));
        }
        Ok(self.control.capability_value(capability).unwrap_or(range.default))
    }

    fn set_capability(&mut self, capability: Capability, value: i32) -> ProviderResult<i32> {
        let range = self.capability_range(capability)?;
        let value = range.clamp(value);
        if capability == Capability::Mirror {
            self.control.set_mirrored(value != 0);
        }
        self.control
            .state
            .capabilities
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(capability, value);
        Ok(value)
    }
}

impl SimulatedDevice {
    fn read_inner(&mut self, stream: u32) -> ProviderResult<DeviceRead> {
        let state = &self.control.state;
        if state.invalidated.load(Ordering::SeqCst) {
            return Err(ProviderError::Io("device disconnected".to_string()));
        }
        if state.stream_error_once.swap(false, Ordering::SeqCst) {
            return Ok(DeviceRead {
                sample: None,
                stream_error: true,
            });
        }
        let skip = state
            .empty_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if skip || !state.selected.load(Ordering::SeqCst) {
            return Ok(DeviceRead::default());
        }

        let Some((current_stream, format)) = self.current else {
            return Err(ProviderError::InvalidState("no format set".to_string()));
        };
        if current_stream != stream {
            return Err(ProviderError::InvalidStream);
        }

        let data = self.render(&format);
        let period = format.frame_rate.frame_period().unwrap_or_default();
        let timestamp = period * self.sequence as u32;
        self.sequence += 1;

        Ok(DeviceRead {
            sample: Some(RawSample {
                data: FrameData::from(data),
                timestamp,
                stride: format.width * 2,
            }),
            stream_error: false,
        })
    }
}

/// Provider over a set of simulated devices that can be plugged and unplugged
#[derive(Debug, Default)]
pub struct SimulatedProvider {
    devices: Mutex<Vec<SimulatedDevice>>,
}

impl SimulatedProvider {
    pub fn new(devices: Vec<SimulatedDevice>) -> Self {
        Self {
            devices: Mutex::new(devices),
        }
    }

    pub fn single(device: SimulatedDevice) -> Self {
        Self::new(vec![device])
    }

    /// Plug a device in
    pub fn add(&self, device: SimulatedDevice) {
        debug!(device = %device.id, "Simulated device added");
        self.devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(device);
    }

    /// Unplug a device; open handles see the loss on their next read
    pub fn remove(&self, id: &str) -> Option<SimulatedDevice> {
        let mut devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        let index = devices.iter().position(|d| d.id == id)?;
        let device = devices.remove(index);
        device.control.invalidate();
        Some(device)
    }
}

impl DeviceProvider for SimulatedProvider {
    fn enumerate(&self) -> Vec<DeviceIdentity> {
        self.devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|d| d.identity())
            .collect()
    }

    fn open_device(&self, id: &str) -> ProviderResult<Box<dyn CaptureDevice>> {
        let devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        let device = devices
            .iter()
            .find(|d| d.id == id)
            .ok_or_else(|| ProviderError::DeviceNotFound(id.to_string()))?;
        if device.control.is_invalidated() {
            return Err(ProviderError::DeviceOpenFailed(format!(
                "{}: device not responding",
                id
            )));
        }
        Ok(Box::new(device.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_is_packed_yuy2() {
        let device = SimulatedDevice::new("sim0");
        let format = device.formats[0][1];
        let data = device.render(&format);
        assert_eq!(data.len(), (format.width * format.height * 2) as usize);
        assert!(data.iter().skip(1).step_by(2).all(|&c| c == 0x80));
    }

    #[test]
    fn test_empty_reads_consumed() {
        let mut device = SimulatedDevice::new("sim0");
        let format = device.formats[0][1];
        device.set_current_format(0, &format).unwrap();
        device.set_stream_selection(0, true).unwrap();
        device.control().inject_empty_reads(2);

        assert!(device.read_sample(0).unwrap().sample.is_none());
        assert!(device.read_sample(0).unwrap().sample.is_none());
        assert!(device.read_sample(0).unwrap().sample.is_some());
    }

    #[test]
    fn test_removed_device_cannot_be_opened() {
        let provider = SimulatedProvider::single(SimulatedDevice::new("sim0"));
        assert_eq!(provider.enumerate().len(), 1);
        let removed = provider.remove("sim0").unwrap();
        assert!(removed.control().is_invalidated());
        assert!(matches!(
            provider.open_device("sim0"),
            Err(ProviderError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_unsupported_format_rejected() {
        let mut device = SimulatedDevice::new("sim0");
        let bogus = FormatDescriptor::video(VideoSubtype::Rgb24, 1, 1, Ratio::from_int(5));
        assert_eq!(
            device.set_current_format(0, &bogus),
            Err(ProviderError::InvalidMediaType)
        );
    }
}

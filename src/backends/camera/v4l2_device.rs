// SPDX-License-Identifier: GPL-3.0-only

//! Native V4L2 capture device
//!
//! Opens `/dev/videoN` nodes directly through the `v4l` crate. Each node
//! exposes a single stream (index 0). Its formats are enumerated once at open
//! time as discrete frame size and interval combinations.
//!
//! Selecting the stream creates an mmap buffer stream; deselecting drops it,
//! which stops streaming and returns the buffers to the driver.

use super::types::{
    Capability, CapabilityRange, DeviceIdentity, DeviceRead, FormatDescriptor, FrameData, Ratio,
    RawSample,
};
use super::v4l2_controls::{self, V4L2_CID_HFLIP};
use super::v4l2_utils;
use super::{CaptureDevice, DeviceProvider, FormatEnumerator};
use crate::config::ProviderConfig;
use crate::errors::{ProviderError, ProviderResult};
use crate::media::formats::VideoSubtype;
use ouroboros::self_referencing;
use std::io;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};
use v4l::buffer::{Flags, Type};
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::video::capture::Parameters;
use v4l::{Format, FourCC};

/// Device together with the buffer stream borrowing it
#[self_referencing]
struct StreamingDevice {
    device: Device,
    #[borrows(device)]
    #[covariant]
    stream: Stream<'this>,
}

enum DeviceState {
    Idle(Device),
    Streaming(StreamingDevice),
    /// Stream setup failed and took the device with it
    Lost,
}

/// Candidate format plus the FourCC the driver expects for it
#[derive(Debug, Clone, Copy)]
struct NativeFormat {
    descriptor: FormatDescriptor,
    fourcc: FourCC,
}

/// Open V4L2 capture node
pub struct V4l2CaptureDevice {
    path: String,
    identity: DeviceIdentity,
    formats: Vec<NativeFormat>,
    state: DeviceState,
    /// Bytes per row of the negotiated format
    stride: u32,
    current: Option<FormatDescriptor>,
    selected: bool,
    buffer_count: u32,
    read_timeout: Duration,
}

impl V4l2CaptureDevice {
    pub fn open(
        identity: DeviceIdentity,
        buffer_count: u32,
        read_timeout: Duration,
        fallback_rate: u32,
    ) -> ProviderResult<Self> {
        let path = identity.id.clone();
        let device = Device::with_path(&path).map_err(|e| {
            ProviderError::DeviceOpenFailed(format!("{}: {}", path, e))
        })?;
        let formats = enumerate_formats(&device, fallback_rate);

        info!(
            path = %path,
            name = %identity.name,
            driver = %identity.driver,
            formats = formats.len(),
            "Opened V4L2 device"
        );

        Ok(Self {
            path,
            identity,
            formats,
            state: DeviceState::Idle(device),
            stride: 0,
            current: None,
            selected: false,
            buffer_count,
            read_timeout,
        })
    }

    fn check_stream(stream: u32) -> ProviderResult<()> {
        if stream == 0 {
            Ok(())
        } else {
            Err(ProviderError::InvalidStream)
        }
    }

    fn node_present(&self) -> bool {
        Path::new(&self.path).exists()
    }

    fn start_streaming(&mut self) -> ProviderResult<()> {
        let DeviceState::Idle(device) = std::mem::replace(&mut self.state, DeviceState::Lost) else {
            return Ok(());
        };

        let buffer_count = self.buffer_count;
        let read_timeout = self.read_timeout;
        let built = StreamingDeviceTryBuilder {
            device,
            stream_builder: |device| {
                Stream::with_buffers(device, Type::VideoCapture, buffer_count).map(|mut stream| {
                    stream.set_timeout(read_timeout);
                    stream
                })
            },
        }
        .try_build_or_recover();

        match built {
            Ok(streaming) => {
                debug!(path = %self.path, buffer_count, "Created mmap stream");
                self.state = DeviceState::Streaming(streaming);
                Ok(())
            }
            Err((e, heads)) => {
                self.state = DeviceState::Idle(heads.device);
                Err(ProviderError::Io(format!("failed to create stream: {}", e)))
            }
        }
    }

    fn stop_streaming(&mut self) {
        if let DeviceState::Streaming(streaming) =
            std::mem::replace(&mut self.state, DeviceState::Lost)
        {
            // Dropping the stream issues STREAMOFF and unmaps the buffers
            self.state = DeviceState::Idle(streaming.into_heads().device);
            debug!(path = %self.path, "Stopped mmap stream");
        }
    }
}

impl FormatEnumerator for V4l2CaptureDevice {
    fn native_format(&self, stream: u32, index: u32) -> ProviderResult<FormatDescriptor> {
        Self::check_stream(stream)?;
        self.formats
            .get(index as usize)
            .map(|f| f.descriptor)
            .ok_or(ProviderError::NoMoreTypes)
    }
}

impl CaptureDevice for V4l2CaptureDevice {
    fn identity(&self) -> DeviceIdentity {
        self.identity.clone()
    }

    fn set_current_format(&mut self, stream: u32, format: &FormatDescriptor) -> ProviderResult<()> {
        Self::check_stream(stream)?;
        let native = *self
            .formats
            .iter()
            .find(|f| f.descriptor == *format)
            .ok_or(ProviderError::InvalidMediaType)?;
        let DeviceState::Idle(device) = &self.state else {
            return Err(ProviderError::InvalidState(
                "format change while streaming".to_string(),
            ));
        };

        let requested = Format::new(format.width, format.height, native.fourcc);
        let actual = device.set_format(&requested)?;
        if actual.width != format.width
            || actual.height != format.height
            || actual.fourcc != native.fourcc
        {
            warn!(
                path = %self.path,
                requested = %format,
                width = actual.width,
                height = actual.height,
                "Driver substituted a different format"
            );
            return Err(ProviderError::InvalidMediaType);
        }

        let fps = format.frame_rate.as_f64().round() as u32;
        if fps > 0
            && let Err(e) = device.set_params(&Parameters::with_fps(fps))
        {
            warn!(path = %self.path, fps, error = %e, "Failed to set frame rate");
        }

        self.stride = actual.stride;
        self.current = Some(*format);
        info!(path = %self.path, format = %format, stride = actual.stride, "Capture format set");
        Ok(())
    }

    fn set_stream_selection(&mut self, stream: u32, selected: bool) -> ProviderResult<()> {
        Self::check_stream(stream)?;
        if !self.node_present() {
            return Err(ProviderError::Io(format!("{} disappeared", self.path)));
        }

        if selected {
            if self.current.is_none() {
                return Err(ProviderError::InvalidState("no format set".to_string()));
            }
            self.start_streaming()?;
        } else {
            self.stop_streaming();
        }
        self.selected = selected;
        Ok(())
    }

    fn stream_selection(&self, stream: u32) -> ProviderResult<bool> {
        Self::check_stream(stream)?;
        if !self.node_present() || matches!(self.state, DeviceState::Lost) {
            return Err(ProviderError::Io(format!("{} disappeared", self.path)));
        }
        Ok(self.selected)
    }

    fn read_sample(&mut self, stream: u32) -> ProviderResult<DeviceRead> {
        Self::check_stream(stream)?;
        let streaming = match &mut self.state {
            DeviceState::Streaming(streaming) => streaming,
            DeviceState::Idle(_) => return Ok(DeviceRead::default()),
            DeviceState::Lost => {
                return Err(ProviderError::Io(format!("{} lost", self.path)));
            }
        };

        let captured = streaming.with_stream_mut(|stream| {
            stream.next().map(|(buf, meta)| {
                let used = (meta.bytesused as usize).min(buf.len());
                let used = if used == 0 { buf.len() } else { used };
                (buf[..used].to_vec(), *meta)
            })
        });

        match captured {
            Ok((data, meta)) => {
                let stream_error = meta.flags.contains(Flags::ERROR);
                let timestamp = Duration::from_secs(meta.timestamp.sec.max(0) as u64)
                    + Duration::from_micros(meta.timestamp.usec.max(0) as u64);
                Ok(DeviceRead {
                    sample: Some(RawSample {
                        data: FrameData::from(data),
                        timestamp,
                        stride: self.stride,
                    }),
                    stream_error,
                })
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                debug!(path = %self.path, "Read timed out");
                Ok(DeviceRead::default())
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(DeviceRead::default()),
            Err(e) => Err(ProviderError::Io(format!("{}: {}", self.path, e))),
        }
    }

    fn query_mirrored(&self) -> ProviderResult<bool> {
        if !v4l2_controls::has_control(&self.path, V4L2_CID_HFLIP) {
            return Err(ProviderError::NotSupported("mirror".to_string()));
        }
        Ok(v4l2_controls::get_control(&self.path, V4L2_CID_HFLIP)? != 0)
    }

    fn capability_range(&self, capability: Capability) -> ProviderResult<CapabilityRange> {
        let info =
            v4l2_controls::query_control(&self.path, v4l2_controls::capability_control(capability))?;
        if info.is_disabled() || info.is_read_only() {
            return Err(ProviderError::NotSupported(capability.name().to_string()));
        }
        Ok(info.range())
    }

    fn capability_value(&self, capability: Capability) -> ProviderResult<i32> {
        v4l2_controls::get_control(&self.path, v4l2_controls::capability_control(capability))
    }

    fn set_capability(&mut self, capability: Capability, value: i32) -> ProviderResult<i32> {
        v4l2_controls::set_control(
            &self.path,
            v4l2_controls::capability_control(capability),
            value,
        )
    }
}

/// Enumerate discrete size and interval combinations of every pixel format
fn enumerate_formats(device: &Device, fallback_rate: u32) -> Vec<NativeFormat> {
    let mut formats = Vec::new();

    let descriptions = match device.enum_formats() {
        Ok(descriptions) => descriptions,
        Err(e) => {
            warn!(error = %e, "Failed to enumerate formats");
            return formats;
        }
    };

    for desc in descriptions {
        let subtype = VideoSubtype::from_fourcc(desc.fourcc.repr);
        let Ok(sizes) = device.enum_framesizes(desc.fourcc) else {
            continue;
        };

        for size in sizes {
            let (width, height) = match size.size {
                v4l::framesize::FrameSizeEnum::Discrete(discrete) => {
                    (discrete.width, discrete.height)
                }
                v4l::framesize::FrameSizeEnum::Stepwise(step) => (step.max_width, step.max_height),
            };

            let mut rates = Vec::new();
            if let Ok(intervals) = device.enum_frameintervals(desc.fourcc, width, height) {
                for interval in intervals {
                    if let v4l::frameinterval::FrameIntervalEnum::Discrete(frac) = interval.interval
                        && frac.numerator > 0
                    {
                        rates.push(Ratio::new(frac.denominator, frac.numerator));
                    }
                }
            }
            if rates.is_empty() {
                rates.push(Ratio::from_int(fallback_rate));
            }

            for rate in rates {
                formats.push(NativeFormat {
                    descriptor: FormatDescriptor::video(subtype, width, height, rate),
                    fourcc: desc.fourcc,
                });
            }
        }
    }

    formats
}

/// Provider over the V4L2 nodes of this machine; device ids are node paths
#[derive(Debug, Clone)]
pub struct V4l2DeviceProvider {
    buffer_count: u32,
    read_timeout: Duration,
    fallback_rate: u32,
}

impl V4l2DeviceProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            buffer_count: config.buffer_count,
            read_timeout: config.read_timeout(),
            fallback_rate: config.default_frame_rate,
        }
    }
}

impl DeviceProvider for V4l2DeviceProvider {
    fn enumerate(&self) -> Vec<DeviceIdentity> {
        v4l2_utils::list_capture_devices()
    }

    fn open_device(&self, id: &str) -> ProviderResult<Box<dyn CaptureDevice>> {
        if !Path::new(id).exists() {
            return Err(ProviderError::DeviceNotFound(id.to_string()));
        }
        let identity = v4l2_utils::build_device_identity(id).ok_or_else(|| {
            ProviderError::DeviceOpenFailed(format!("{}: not a streaming capture device", id))
        })?;
        let device = V4l2CaptureDevice::open(
            identity,
            self.buffer_count,
            self.read_timeout,
            self.fallback_rate,
        )?;
        Ok(Box::new(device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_node_not_found() {
        let provider = V4l2DeviceProvider::new(&ProviderConfig::default());
        assert!(matches!(
            provider.open_device("/dev/nonexistent-video-node"),
            Err(ProviderError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_provider_takes_config_values() {
        let config = ProviderConfig {
            buffer_count: 8,
            read_timeout_ms: 250,
            ..ProviderConfig::default()
        };
        let provider = V4l2DeviceProvider::new(&config);
        assert_eq!(provider.buffer_count, 8);
        assert_eq!(provider.read_timeout, Duration::from_millis(250));
    }
}

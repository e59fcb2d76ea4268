// SPDX-License-Identifier: GPL-3.0-only
// Shared types for the capture backends

//! Shared types for capture backends

use crate::constants::TICKS_PER_SECOND;
use crate::media::formats::VideoSubtype;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Frame payload, shared by reference count
///
/// Cloning a `FrameData` never copies pixels. Consumers of the current frame
/// get a clone, the slot keeps its own reference.
#[derive(Clone)]
pub struct FrameData(Arc<[u8]>);

impl FrameData {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        FrameData(bytes.into())
    }

    /// Get the length of the frame data in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the frame data is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether two handles share the same allocation
    pub fn ptr_eq(&self, other: &FrameData) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for FrameData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FrameData({} bytes)", self.0.len())
    }
}

impl From<Vec<u8>> for FrameData {
    fn from(bytes: Vec<u8>) -> Self {
        FrameData(bytes.into())
    }
}

impl From<&[u8]> for FrameData {
    fn from(bytes: &[u8]) -> Self {
        FrameData(Arc::from(bytes))
    }
}

impl AsRef<[u8]> for FrameData {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::ops::Deref for FrameData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

/// Major media kind of a format candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MajorKind {
    Video,
    Audio,
    /// Metadata streams and anything else a device may expose
    Other,
}

/// Scan order of the frame lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InterlaceMode {
    Progressive,
    Interlaced,
    /// The device did not say
    Unknown,
}

/// Ratio as numerator/denominator, used for frame rates and pixel aspect
/// Stores exact values to handle NTSC rates like 59.94fps (60000/1001)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ratio {
    pub num: u32,
    pub denom: u32,
}

impl Ratio {
    /// Create a new ratio; a zero denominator is stored as 1
    pub fn new(num: u32, denom: u32) -> Self {
        Self {
            num,
            denom: if denom == 0 { 1 } else { denom },
        }
    }

    pub fn from_int(value: u32) -> Self {
        Self { num: value, denom: 1 }
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.denom as f64
    }

    /// Frame duration in 100ns ticks, rounded to nearest: `1e7 / fps + 0.5`.
    /// Zero for a zero rate.
    pub fn frame_duration_ticks(&self) -> u64 {
        if self.num == 0 {
            return 0;
        }
        (TICKS_PER_SECOND as f64 / self.as_f64() + 0.5) as u64
    }

    /// Frame period; `None` for a zero rate
    pub fn frame_period(&self) -> Option<Duration> {
        if self.num == 0 {
            return None;
        }
        Some(Duration::from_nanos(self.frame_duration_ticks() * 100))
    }
}

impl std::fmt::Display for Ratio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.denom != 1 {
            write!(f, "{:.2}", self.as_f64())
        } else {
            write!(f, "{}", self.num)
        }
    }
}

impl Default for Ratio {
    fn default() -> Self {
        Self { num: 1, denom: 1 }
    }
}

/// One capture format candidate offered by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormatDescriptor {
    pub major: MajorKind,
    pub subtype: VideoSubtype,
    pub width: u32,
    pub height: u32,
    /// Every sample has the same byte size (false for compressed formats)
    pub fixed_size_samples: bool,
    pub interlace: InterlaceMode,
    pub frame_rate: Ratio,
    pub pixel_aspect: Ratio,
}

impl FormatDescriptor {
    /// Progressive, fixed-size video descriptor with square pixels
    pub fn video(subtype: VideoSubtype, width: u32, height: u32, frame_rate: Ratio) -> Self {
        Self {
            major: MajorKind::Video,
            subtype,
            width,
            height,
            fixed_size_samples: !subtype.is_compressed(),
            interlace: InterlaceMode::Progressive,
            frame_rate,
            pixel_aspect: Ratio::default(),
        }
    }
}

impl std::fmt::Display for FormatDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}x{} @ {}fps",
            self.subtype, self.width, self.height, self.frame_rate
        )
    }
}

/// Sample as delivered by a device read, before session bookkeeping
#[derive(Debug, Clone)]
pub struct RawSample {
    pub data: FrameData,
    /// Device timestamp relative to the device's own epoch
    pub timestamp: Duration,
    /// Bytes per row, may include padding
    pub stride: u32,
}

/// Outcome of one blocking device read
#[derive(Debug, Clone, Default)]
pub struct DeviceRead {
    /// `None` when the device produced nothing this time
    pub sample: Option<RawSample>,
    /// The device flagged a stream error alongside (or instead of) the sample
    pub stream_error: bool,
}

/// Per-frame annotations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameTags {
    /// Set by the transform stage; `None` until tagged
    pub illumination_active: Option<bool>,
    /// Mirror state of the device when the frame was read
    pub mirrored: bool,
}

/// A captured frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: FrameData,
    pub format: FormatDescriptor,
    pub stride: u32,
    /// Capture timestamp, non-decreasing within a session
    pub timestamp: Duration,
    /// Read sequence number within the session, starting at 0
    pub sequence: u64,
    pub tags: FrameTags,
}

/// Identification strings cached by an open session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Stable device identifier (e.g., /dev/video0)
    pub id: String,
    /// Human-readable name (V4L2 card)
    pub name: String,
    /// Driver name (V4L2 driver)
    pub driver: String,
    /// Real device path (resolved symlinks)
    pub real_path: String,
}

/// Device capabilities reachable through the control pass-through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    Brightness,
    Contrast,
    Gain,
    Exposure,
    ExposureCompensation,
    BacklightCompensation,
    Mirror,
}

impl Capability {
    pub const ALL: [Capability; 7] = [
        Capability::Brightness,
        Capability::Contrast,
        Capability::Gain,
        Capability::Exposure,
        Capability::ExposureCompensation,
        Capability::BacklightCompensation,
        Capability::Mirror,
    ];

    /// Parse a capability from its snake_case name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Capability::Brightness => "brightness",
            Capability::Contrast => "contrast",
            Capability::Gain => "gain",
            Capability::Exposure => "exposure",
            Capability::ExposureCompensation => "exposure_compensation",
            Capability::BacklightCompensation => "backlight_compensation",
            Capability::Mirror => "mirror",
        }
    }
}

/// Value range of a device capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRange {
    pub min: i32,
    pub max: i32,
    pub step: i32,
    pub default: i32,
}

impl CapabilityRange {
    /// Clamp `value` into the range
    pub fn clamp(&self, value: i32) -> i32 {
        value.clamp(self.min, self.max.max(self.min))
    }
}

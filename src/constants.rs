// SPDX-License-Identifier: GPL-3.0-only

//! Provider-wide constants

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the illumination tag on outgoing samples is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IlluminationMode {
    /// Toggle between lit and unlit on every sample (IR emitter pulsed per frame)
    #[default]
    Alternating,
    /// Every sample is tagged as lit
    AlwaysOn,
    /// Every sample is tagged as unlit
    AlwaysOff,
}

impl IlluminationMode {
    /// All modes, for CLI and config listings
    pub const ALL: [IlluminationMode; 3] = [
        IlluminationMode::Alternating,
        IlluminationMode::AlwaysOn,
        IlluminationMode::AlwaysOff,
    ];

    /// Get display name for the mode
    pub fn display_name(&self) -> &'static str {
        match self {
            IlluminationMode::Alternating => "Alternating",
            IlluminationMode::AlwaysOn => "Always on",
            IlluminationMode::AlwaysOff => "Always off",
        }
    }

    /// Whether the emitter flashes between frames
    pub fn is_interleaved(&self) -> bool {
        matches!(self, IlluminationMode::Alternating)
    }

    /// Whether frames arrive with ambient light already subtracted
    pub fn ambient_subtracted(&self) -> bool {
        matches!(self, IlluminationMode::AlwaysOn)
    }
}

/// Upper bound on how long `stop(wait = true)` blocks for the in-flight read
/// step. One frame period at 10 fps.
pub const DEFAULT_STOP_WAIT: Duration = Duration::from_millis(100);

/// Number of mmap buffers requested from V4L2 drivers
pub const DEFAULT_BUFFER_COUNT: u32 = 4;

/// Per-read timeout handed to the V4L2 stream. A timeout is reported as
/// "no sample", never as a dead device.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Media types probed per stream before the selector gives up on a device
/// that never reports exhaustion
pub const MAX_FORMAT_PROBES: u32 = 512;

/// Fallback frame rate when a device reports none
pub const DEFAULT_FRAME_RATE: u32 = 30;

/// Duration units per second used for frame durations and timestamps
/// (100-nanosecond ticks)
pub const TICKS_PER_SECOND: u64 = 10_000_000;

/// Device category string used when registering providers
pub const DEFAULT_DEVICE_KIND: &str = "infrared";

/// Property keys exposed by the frame provider
pub mod property {
    pub const VIDEO_PROFILE: &str = "video_profile";
    pub const SUPPORTED_VIDEO_PROFILES: &str = "supported_video_profiles";
    pub const AVAILABLE_VIDEO_PROFILES: &str = "available_video_profiles";
    pub const ID: &str = "id";
    pub const DISPLAY_NAME: &str = "display_name";
    pub const DEVICE_KIND: &str = "device_kind";
    pub const IS_MIRRORED: &str = "is_mirrored";
    pub const EXPOSURE_COMPENSATION: &str = "exposure_compensation";
    pub const ACTIVE_ILLUMINATION_ENABLED: &str = "active_illumination_enabled";
    pub const INTERLEAVED_ILLUMINATION_ENABLED: &str = "interleaved_illumination_enabled";
    pub const AMBIENT_SUBTRACTION_ENABLED: &str = "ambient_subtraction_enabled";
    pub const ILLUMINATION_MODE: &str = "illumination_mode";
}

// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 camera control interface
//!
//! Query and set the V4L2 controls backing [`Capability`] values: image
//! controls, exposure bias and the horizontal flip used as the mirror state.
//!
//! Inspired by [cameractrls](https://github.com/soyersoyer/cameractrls).

use super::types::{Capability, CapabilityRange};
use crate::errors::{ProviderError, ProviderResult};
use std::fs::File;
use std::os::unix::io::AsRawFd;
use tracing::{debug, warn};

// ===== V4L2 Control Class Bases =====
const V4L2_CTRL_CLASS_USER: u32 = 0x00980000;
const V4L2_CTRL_CLASS_CAMERA: u32 = 0x009a0000;

const V4L2_CID_BASE: u32 = V4L2_CTRL_CLASS_USER | 0x900;
const V4L2_CID_CAMERA_CLASS_BASE: u32 = V4L2_CTRL_CLASS_CAMERA | 0x900;

// ===== V4L2 Control IDs (User Class) =====

pub const V4L2_CID_BRIGHTNESS: u32 = V4L2_CID_BASE;
pub const V4L2_CID_CONTRAST: u32 = V4L2_CID_BASE + 1;
pub const V4L2_CID_GAIN: u32 = V4L2_CID_BASE + 19;
/// Horizontal flip, reported as the mirror state
pub const V4L2_CID_HFLIP: u32 = V4L2_CID_BASE + 20;
pub const V4L2_CID_BACKLIGHT_COMPENSATION: u32 = V4L2_CID_BASE + 28;

// ===== V4L2 Control IDs (Camera Class) =====

/// Absolute exposure time in 100µs units
pub const V4L2_CID_EXPOSURE_ABSOLUTE: u32 = V4L2_CID_CAMERA_CLASS_BASE + 2;
/// Exposure compensation (EV bias) in 0.001 EV units
pub const V4L2_CID_AUTO_EXPOSURE_BIAS: u32 = V4L2_CID_CAMERA_CLASS_BASE + 19;

// ===== V4L2 Control Flags =====
const V4L2_CTRL_FLAG_DISABLED: u32 = 0x0001;
const V4L2_CTRL_FLAG_READ_ONLY: u32 = 0x0004;

// ===== V4L2 ioctl Numbers =====
// Calculated as: (dir << 30) | (size << 16) | ('V' << 8) | nr

/// Get control value (v4l2_control: 8 bytes)
const VIDIOC_G_CTRL: libc::c_ulong = 0xC008561B;
/// Set control value (v4l2_control: 8 bytes)
const VIDIOC_S_CTRL: libc::c_ulong = 0xC008561C;
/// Query control info (v4l2_queryctrl: 68 bytes)
const VIDIOC_QUERYCTRL: libc::c_ulong = 0xC0445624;

#[repr(C)]
struct V4l2Control {
    id: u32,
    value: i32,
}

#[repr(C)]
struct V4l2Queryctrl {
    id: u32,
    ctrl_type: u32,
    name: [u8; 32],
    minimum: i32,
    maximum: i32,
    step: i32,
    default_value: i32,
    flags: u32,
    reserved: [u32; 2],
}

/// Information about a V4L2 control
#[derive(Debug, Clone)]
pub struct ControlInfo {
    pub id: u32,
    pub name: String,
    pub minimum: i32,
    pub maximum: i32,
    pub step: i32,
    pub default_value: i32,
    pub flags: u32,
}

impl ControlInfo {
    pub fn is_disabled(&self) -> bool {
        self.flags & V4L2_CTRL_FLAG_DISABLED != 0
    }

    pub fn is_read_only(&self) -> bool {
        self.flags & V4L2_CTRL_FLAG_READ_ONLY != 0
    }

    pub fn range(&self) -> CapabilityRange {
        CapabilityRange {
            min: self.minimum,
            max: self.maximum,
            step: self.step,
            default: self.default_value,
        }
    }
}

/// Control id backing a capability
pub fn capability_control(capability: Capability) -> u32 {
    match capability {
        Capability::Brightness => V4L2_CID_BRIGHTNESS,
        Capability::Contrast => V4L2_CID_CONTRAST,
        Capability::Gain => V4L2_CID_GAIN,
        Capability::Exposure => V4L2_CID_EXPOSURE_ABSOLUTE,
        Capability::ExposureCompensation => V4L2_CID_AUTO_EXPOSURE_BIAS,
        Capability::BacklightCompensation => V4L2_CID_BACKLIGHT_COMPENSATION,
        Capability::Mirror => V4L2_CID_HFLIP,
    }
}

fn extract_name(bytes: &[u8; 32]) -> String {
    let name_len = bytes.iter().position(|&c| c == 0).unwrap_or(32);
    String::from_utf8_lossy(&bytes[..name_len]).to_string()
}

fn open(device_path: &str) -> ProviderResult<File> {
    File::open(device_path)
        .map_err(|e| ProviderError::Io(format!("failed to open {}: {}", device_path, e)))
}

/// Query a control; `Err(NotSupported)` if the driver does not know it
pub fn query_control(device_path: &str, control_id: u32) -> ProviderResult<ControlInfo> {
    let file = open(device_path)?;

    let mut qctrl = V4l2Queryctrl {
        id: control_id,
        ctrl_type: 0,
        name: [0; 32],
        minimum: 0,
        maximum: 0,
        step: 0,
        default_value: 0,
        flags: 0,
        reserved: [0; 2],
    };

    let result = unsafe {
        libc::ioctl(
            file.as_raw_fd(),
            VIDIOC_QUERYCTRL,
            &mut qctrl as *mut V4l2Queryctrl,
        )
    };
    if result < 0 {
        return Err(ProviderError::NotSupported(format!(
            "control {:#x} on {}",
            control_id, device_path
        )));
    }

    Ok(ControlInfo {
        id: qctrl.id,
        name: extract_name(&qctrl.name),
        minimum: qctrl.minimum,
        maximum: qctrl.maximum,
        step: qctrl.step,
        default_value: qctrl.default_value,
        flags: qctrl.flags,
    })
}

/// Get current value of a control
pub fn get_control(device_path: &str, control_id: u32) -> ProviderResult<i32> {
    let file = open(device_path)?;
    let mut ctrl = V4l2Control {
        id: control_id,
        value: 0,
    };

    let result =
        unsafe { libc::ioctl(file.as_raw_fd(), VIDIOC_G_CTRL, &mut ctrl as *mut V4l2Control) };
    if result < 0 {
        let errno = std::io::Error::last_os_error();
        debug!(device_path, control_id, ?errno, "Failed to get V4L2 control");
        return Err(ProviderError::Io(format!("get control: {}", errno)));
    }

    Ok(ctrl.value)
}

/// Set a control, returning the value the driver stored
pub fn set_control(device_path: &str, control_id: u32, value: i32) -> ProviderResult<i32> {
    let file = open(device_path)?;
    let mut ctrl = V4l2Control {
        id: control_id,
        value,
    };

    let result =
        unsafe { libc::ioctl(file.as_raw_fd(), VIDIOC_S_CTRL, &mut ctrl as *mut V4l2Control) };
    if result < 0 {
        let errno = std::io::Error::last_os_error();
        warn!(device_path, control_id, value, ?errno, "Failed to set V4L2 control");
        return Err(ProviderError::Io(format!("set control: {}", errno)));
    }

    if ctrl.value != value {
        debug!(
            device_path,
            control_id,
            requested = value,
            actual = ctrl.value,
            "V4L2 control value was clamped"
        );
    }

    Ok(ctrl.value)
}

/// Check if a control is available on the device
pub fn has_control(device_path: &str, control_id: u32) -> bool {
    query_control(device_path, control_id)
        .map(|info| !info.is_disabled())
        .unwrap_or(false)
}

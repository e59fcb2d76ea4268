// SPDX-License-Identifier: GPL-3.0-only

//! Shared V4L2 utility functions
//!
//! Device node discovery and identification through `VIDIOC_QUERYCAP`.

use super::types::DeviceIdentity;
use std::os::unix::io::{AsRawFd, RawFd};
use tracing::debug;

/// VIDIOC_QUERYCAP ioctl number
const VIDIOC_QUERYCAP: libc::c_ulong = 0x80685600;

/// Single-planar video capture
const V4L2_CAP_VIDEO_CAPTURE: u32 = 0x00000001;
/// Streaming I/O (mmap buffers)
const V4L2_CAP_STREAMING: u32 = 0x04000000;
/// `device_caps` is filled in
const V4L2_CAP_DEVICE_CAPS: u32 = 0x80000000;

/// V4L2 capability structure for VIDIOC_QUERYCAP ioctl
#[repr(C)]
struct V4l2Capability {
    driver: [u8; 16],
    card: [u8; 32],
    bus_info: [u8; 32],
    version: u32,
    capabilities: u32,
    device_caps: u32,
    reserved: [u32; 3],
}

impl V4l2Capability {
    /// Capabilities of this node rather than the whole physical device
    fn node_caps(&self) -> u32 {
        if self.capabilities & V4L2_CAP_DEVICE_CAPS != 0 {
            self.device_caps
        } else {
            self.capabilities
        }
    }
}

/// Query V4L2 capabilities for an open file descriptor.
fn query_v4l2_cap(fd: RawFd) -> Option<V4l2Capability> {
    let mut cap: V4l2Capability = unsafe { std::mem::zeroed() };
    let result = unsafe { libc::ioctl(fd, VIDIOC_QUERYCAP as _, &mut cap as *mut V4l2Capability) };
    if result < 0 { None } else { Some(cap) }
}

fn c_string(bytes: &[u8]) -> String {
    let len = bytes.iter().position(|&c| c == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..len]).trim().to_string()
}

/// Build the identity of a V4L2 node
///
/// Resolves symlinks to get the real device path and queries driver and card
/// names. Returns `None` if the node cannot be opened or is not a streaming
/// capture device.
pub fn build_device_identity(v4l2_path: &str) -> Option<DeviceIdentity> {
    let file = std::fs::File::open(v4l2_path).ok()?;
    let cap = query_v4l2_cap(file.as_raw_fd())?;

    let caps = cap.node_caps();
    if caps & V4L2_CAP_VIDEO_CAPTURE == 0 || caps & V4L2_CAP_STREAMING == 0 {
        debug!(v4l2_path, caps = format!("{:#x}", caps), "Not a streaming capture node");
        return None;
    }

    let real_path = std::fs::canonicalize(v4l2_path)
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| v4l2_path.to_string());

    let driver = c_string(&cap.driver);
    let card = c_string(&cap.card);
    debug!(v4l2_path, driver = %driver, card = %card, "Identified V4L2 device");

    Some(DeviceIdentity {
        id: v4l2_path.to_string(),
        name: if card.is_empty() {
            v4l2_path.to_string()
        } else {
            card
        },
        driver,
        real_path,
    })
}

/// All streaming capture nodes under `/dev`, sorted by path
pub fn list_capture_devices() -> Vec<DeviceIdentity> {
    let entries = match std::fs::read_dir("/dev") {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut paths: Vec<String> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            is_video_node(&name).then(|| format!("/dev/{}", name))
        })
        .collect();
    paths.sort_by_key(|path| node_number(path));

    paths
        .iter()
        .filter_map(|path| build_device_identity(path))
        .collect()
}

fn is_video_node(name: &str) -> bool {
    name.strip_prefix("video")
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

fn node_number(path: &str) -> u32 {
    path.trim_start_matches("/dev/video").parse().unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_node_names() {
        assert!(is_video_node("video0"));
        assert!(is_video_node("video12"));
        assert!(!is_video_node("video"));
        assert!(!is_video_node("v4l-subdev0"));
        assert!(!is_video_node("video0p"));
    }

    #[test]
    fn test_node_ordering_is_numeric() {
        let mut paths = vec!["/dev/video10", "/dev/video2", "/dev/video0"];
        paths.sort_by_key(|p| node_number(p));
        assert_eq!(paths, vec!["/dev/video0", "/dev/video2", "/dev/video10"]);
    }

    #[test]
    fn test_missing_node_has_no_identity() {
        assert!(build_device_identity("/dev/nonexistent-video-node").is_none());
    }

    #[test]
    fn test_c_string_stops_at_nul() {
        assert_eq!(c_string(b"uvcvideo\0\0\0"), "uvcvideo");
    }
}

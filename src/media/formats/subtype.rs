// SPDX-License-Identifier: GPL-3.0-only

//! Pixel subtype metadata for capture and transform formats

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pixel encoding of a video media type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoSubtype {
    // ===== RGB formats =====
    Rgb8,
    Rgb555,
    Rgb565,
    Rgb24,
    Rgb32,
    Argb32,
    Ai44,

    // ===== YUV 8-bit =====
    /// AYUV 4:4:4 packed with alpha
    Ayuv,
    /// I420 4:2:0 planar (Y + U + V)
    I420,
    /// IYUV, identical layout to I420
    Iyuv,
    /// NV11 4:1:1 semi-planar
    Nv11,
    /// NV12 4:2:0 semi-planar (Y plane + interleaved UV)
    Nv12,
    /// UYVY 4:2:2 packed (U Y0 V Y1)
    Uyvy,
    Y41p,
    Y41t,
    Y42t,
    /// YUY2 4:2:2 packed (Y0 U Y1 V), also called YUYV
    Yuy2,
    /// YV12 4:2:0 planar (Y + V + U)
    Yv12,

    // ===== YUV high bit depth =====
    P010,
    P016,
    P210,
    P216,
    V210,
    V216,
    V410,
    Y210,
    Y216,
    Y410,
    Y416,

    // ===== Single channel =====
    /// 8-bit luma only, used for published frames
    Gray8,

    // ===== Compressed =====
    Mjpg,
    H264,

    /// Anything else, by FourCC
    Other([u8; 4]),
}

impl VideoSubtype {
    /// Uncompressed encodings a pass-through stage may advertise
    pub const UNCOMPRESSED: [VideoSubtype; 29] = [
        VideoSubtype::Rgb8,
        VideoSubtype::Rgb555,
        VideoSubtype::Rgb565,
        VideoSubtype::Rgb24,
        VideoSubtype::Rgb32,
        VideoSubtype::Argb32,
        VideoSubtype::Ai44,
        VideoSubtype::Ayuv,
        VideoSubtype::I420,
        VideoSubtype::Iyuv,
        VideoSubtype::Nv11,
        VideoSubtype::Nv12,
        VideoSubtype::Uyvy,
        VideoSubtype::Y41p,
        VideoSubtype::Y41t,
        VideoSubtype::Y42t,
        VideoSubtype::Yuy2,
        VideoSubtype::Yv12,
        VideoSubtype::P010,
        VideoSubtype::P016,
        VideoSubtype::P210,
        VideoSubtype::P216,
        VideoSubtype::V210,
        VideoSubtype::V216,
        VideoSubtype::V410,
        VideoSubtype::Y210,
        VideoSubtype::Y216,
        VideoSubtype::Y410,
        VideoSubtype::Y416,
    ];

    /// Map a V4L2 FourCC to a subtype
    pub fn from_fourcc(fourcc: [u8; 4]) -> Self {
        match &fourcc {
            b"YUYV" | b"YUY2" => Self::Yuy2,
            b"UYVY" => Self::Uyvy,
            b"NV12" => Self::Nv12,
            b"YU12" | b"I420" => Self::I420,
            b"YV12" => Self::Yv12,
            b"Y41P" => Self::Y41p,
            b"AYUV" => Self::Ayuv,
            b"P010" => Self::P010,
            b"P016" => Self::P016,
            b"Y210" => Self::Y210,
            b"Y216" => Self::Y216,
            b"RGB1" => Self::Rgb8,
            b"RGBO" => Self::Rgb555,
            b"RGBP" => Self::Rgb565,
            b"RGB3" | b"BGR3" => Self::Rgb24,
            b"RGB4" | b"BGR4" | b"XR24" | b"XB24" => Self::Rgb32,
            b"AR24" | b"AB24" => Self::Argb32,
            b"GREY" | b"Y800" => Self::Gray8,
            b"MJPG" | b"JPEG" => Self::Mjpg,
            b"H264" | b"AVC1" => Self::H264,
            _ => Self::Other(fourcc),
        }
    }

    /// Whether the encoding is compressed
    pub fn is_compressed(&self) -> bool {
        matches!(self, Self::Mjpg | Self::H264)
    }

    /// Whether the encoding is in the pass-through allow-list
    pub fn is_pass_through_supported(&self) -> bool {
        Self::UNCOMPRESSED.contains(self)
    }

    pub fn name(&self) -> String {
        match self {
            Self::Other(code) => String::from_utf8_lossy(code).into_owned(),
            other => format!("{:?}", other).to_uppercase(),
        }
    }
}

impl fmt::Display for VideoSubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_aliases_map_to_yuy2() {
        assert_eq!(VideoSubtype::from_fourcc(*b"YUYV"), VideoSubtype::Yuy2);
        assert_eq!(VideoSubtype::from_fourcc(*b"YUY2"), VideoSubtype::Yuy2);
    }

    #[test]
    fn test_unknown_fourcc_is_preserved() {
        let subtype = VideoSubtype::from_fourcc(*b"Z16 ");
        assert_eq!(subtype, VideoSubtype::Other(*b"Z16 "));
        assert_eq!(subtype.name(), "Z16 ");
    }

    #[test]
    fn test_compressed_formats_not_pass_through() {
        assert!(VideoSubtype::Mjpg.is_compressed());
        assert!(!VideoSubtype::Mjpg.is_pass_through_supported());
        assert!(!VideoSubtype::Gray8.is_pass_through_supported());
        assert!(VideoSubtype::Nv12.is_pass_through_supported());
    }

    #[test]
    fn test_display_name() {
        assert_eq!(VideoSubtype::Yuy2.to_string(), "YUY2");
        assert_eq!(VideoSubtype::Argb32.to_string(), "ARGB32");
    }
}

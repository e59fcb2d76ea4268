// SPDX-License-Identifier: GPL-3.0-only

//! Capture format negotiation
//!
//! Streams are scanned in ascending order and, within a stream, formats in
//! the order the device reports them. The first candidate passing
//! [`FormatSelector::is_valid`] wins, so the result is deterministic for a
//! given device.

use super::FormatEnumerator;
use super::types::{FormatDescriptor, InterlaceMode, MajorKind};
use crate::constants::MAX_FORMAT_PROBES;
use crate::errors::{ProviderError, ProviderResult};
use crate::media::formats::VideoSubtype;
use tracing::{debug, info};

/// Format chosen for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectedFormat {
    pub stream_index: u32,
    pub format: FormatDescriptor,
}

#[derive(Debug, Clone, Copy)]
pub struct FormatSelector {
    required_subtype: VideoSubtype,
}

impl Default for FormatSelector {
    fn default() -> Self {
        Self::new(VideoSubtype::Yuy2)
    }
}

impl FormatSelector {
    pub fn new(required_subtype: VideoSubtype) -> Self {
        Self { required_subtype }
    }

    pub fn required_subtype(&self) -> VideoSubtype {
        self.required_subtype
    }

    /// Validity predicate: video, required subtype, fixed-size samples,
    /// progressive
    pub fn is_valid(&self, format: &FormatDescriptor) -> bool {
        format.major == MajorKind::Video
            && format.subtype == self.required_subtype
            && format.fixed_size_samples
            && format.interlace == InterlaceMode::Progressive
    }

    /// Pick the first valid candidate
    ///
    /// A per-entry query error skips that entry. `NoMoreTypes` moves on to the
    /// next stream and `InvalidStream` ends the scan.
    pub fn select<E: FormatEnumerator + ?Sized>(&self, source: &E) -> ProviderResult<SelectedFormat> {
        for stream in 0..MAX_FORMAT_PROBES {
            for index in 0..MAX_FORMAT_PROBES {
                match source.native_format(stream, index) {
                    Ok(format) if self.is_valid(&format) => {
                        info!(stream, index, format = %format, "Selected capture format");
                        return Ok(SelectedFormat {
                            stream_index: stream,
                            format,
                        });
                    }
                    Ok(format) => {
                        debug!(stream, index, format = %format, "Skipping incompatible format");
                    }
                    Err(ProviderError::NoMoreTypes) => break,
                    Err(ProviderError::InvalidStream) => {
                        return Err(ProviderError::NoCompatibleFormat);
                    }
                    Err(e) => {
                        debug!(stream, index, error = %e, "Skipping unreadable format entry");
                    }
                }
            }
        }

        Err(ProviderError::NoCompatibleFormat)
    }
}

/// Static candidate lists, outer index is the stream
impl FormatEnumerator for Vec<Vec<FormatDescriptor>> {
    fn native_format(&self, stream: u32, index: u32) -> ProviderResult<FormatDescriptor> {
        let formats = self
            .get(stream as usize)
            .ok_or(ProviderError::InvalidStream)?;
        formats
            .get(index as usize)
            .copied()
            .ok_or(ProviderError::NoMoreTypes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::Ratio;

    fn yuy2(width: u32, height: u32) -> FormatDescriptor {
        FormatDescriptor::video(VideoSubtype::Yuy2, width, height, Ratio::from_int(30))
    }

    fn nv12(width: u32, height: u32) -> FormatDescriptor {
        FormatDescriptor::video(VideoSubtype::Nv12, width, height, Ratio::from_int(30))
    }

    #[test]
    fn test_first_valid_candidate_wins() {
        let candidates = vec![vec![nv12(640, 480), yuy2(640, 480), yuy2(1280, 720)]];
        let selected = FormatSelector::default().select(&candidates).unwrap();
        assert_eq!(selected.stream_index, 0);
        assert_eq!(selected.format, yuy2(640, 480));
    }

    #[test]
    fn test_later_stream_used_when_earlier_has_nothing() {
        let candidates = vec![vec![nv12(640, 480)], vec![yuy2(320, 240)]];
        let selected = FormatSelector::default().select(&candidates).unwrap();
        assert_eq!(selected.stream_index, 1);
        assert_eq!(selected.format.width, 320);
    }

    #[test]
    fn test_interlaced_and_variable_size_rejected() {
        let mut interlaced = yuy2(640, 480);
        interlaced.interlace = InterlaceMode::Interlaced;
        let mut variable = yuy2(640, 480);
        variable.fixed_size_samples = false;
        let mut audio = yuy2(640, 480);
        audio.major = MajorKind::Audio;

        let candidates = vec![vec![interlaced, variable, audio]];
        assert_eq!(
            FormatSelector::default().select(&candidates),
            Err(ProviderError::NoCompatibleFormat)
        );
    }

    #[test]
    fn test_no_streams() {
        let candidates: Vec<Vec<FormatDescriptor>> = Vec::new();
        assert_eq!(
            FormatSelector::default().select(&candidates),
            Err(ProviderError::NoCompatibleFormat)
        );
    }

    #[test]
    fn test_configurable_subtype() {
        let candidates = vec![vec![yuy2(640, 480), nv12(640, 480)]];
        let selected = FormatSelector::new(VideoSubtype::Nv12)
            .select(&candidates)
            .unwrap();
        assert_eq!(selected.format.subtype, VideoSubtype::Nv12);
    }
}

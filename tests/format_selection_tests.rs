// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for capture format negotiation

use frame_provider::backends::camera::types::{FormatDescriptor, InterlaceMode, MajorKind, Ratio};
use frame_provider::backends::camera::{FormatEnumerator, FormatSelector, SelectedFormat};
use frame_provider::media::VideoSubtype;
use frame_provider::{ProviderError, ProviderResult};

fn video(subtype: VideoSubtype, width: u32, height: u32) -> FormatDescriptor {
    FormatDescriptor::video(subtype, width, height, Ratio::from_int(30))
}

/// Enumerator whose entries can fail individually
struct FlakyEnumerator {
    streams: Vec<Vec<ProviderResult<FormatDescriptor>>>,
}

impl FormatEnumerator for FlakyEnumerator {
    fn native_format(&self, stream: u32, index: u32) -> ProviderResult<FormatDescriptor> {
        let entries = self
            .streams
            .get(stream as usize)
            .ok_or(ProviderError::InvalidStream)?;
        entries
            .get(index as usize)
            .cloned()
            .unwrap_or(Err(ProviderError::NoMoreTypes))
    }
}

#[test]
fn test_first_valid_candidate_wins() {
    let formats = vec![vec![
        video(VideoSubtype::Nv12, 640, 480),
        video(VideoSubtype::Yuy2, 640, 480),
        video(VideoSubtype::Yuy2, 1280, 720),
    ]];

    let selected = FormatSelector::default().select(&formats).unwrap();
    assert_eq!(
        selected,
        SelectedFormat {
            stream_index: 0,
            format: video(VideoSubtype::Yuy2, 640, 480),
        }
    );
}

#[test]
fn test_later_stream_scanned_after_exhaustion() {
    let formats = vec![
        vec![video(VideoSubtype::Mjpg, 1920, 1080)],
        vec![video(VideoSubtype::Yuy2, 340, 340)],
    ];

    let selected = FormatSelector::default().select(&formats).unwrap();
    assert_eq!(selected.stream_index, 1);
    assert_eq!(selected.format.width, 340);
}

#[test]
fn test_interlaced_and_non_video_rejected() {
    let mut interlaced = video(VideoSubtype::Yuy2, 640, 480);
    interlaced.interlace = InterlaceMode::Interlaced;
    let mut metadata = video(VideoSubtype::Yuy2, 640, 480);
    metadata.major = MajorKind::Other;
    let mut variable = video(VideoSubtype::Yuy2, 640, 480);
    variable.fixed_size_samples = false;

    let formats = vec![vec![interlaced, metadata, variable]];
    assert_eq!(
        FormatSelector::default().select(&formats),
        Err(ProviderError::NoCompatibleFormat)
    );
}

#[test]
fn test_unreadable_entry_is_skipped() {
    let source = FlakyEnumerator {
        streams: vec![vec![
            Err(ProviderError::Io("query failed".to_string())),
            Ok(video(VideoSubtype::Yuy2, 320, 240)),
        ]],
    };

    let selected = FormatSelector::default().select(&source).unwrap();
    assert_eq!(selected.format.width, 320);
}

#[test]
fn test_no_streams_means_no_format() {
    let formats: Vec<Vec<FormatDescriptor>> = Vec::new();
    assert_eq!(
        FormatSelector::default().select(&formats),
        Err(ProviderError::NoCompatibleFormat)
    );
}

#[test]
fn test_required_subtype_is_configurable() {
    let formats = vec![vec![
        video(VideoSubtype::Yuy2, 640, 480),
        video(VideoSubtype::Nv12, 640, 480),
    ]];

    let selector = FormatSelector::new(VideoSubtype::Nv12);
    assert_eq!(selector.required_subtype(), VideoSubtype::Nv12);
    assert_eq!(
        selector.select(&formats).unwrap().format.subtype,
        VideoSubtype::Nv12
    );
}

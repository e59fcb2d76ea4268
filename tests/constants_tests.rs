// SPDX-License-Identifier: MPL-2.0

//! Integration tests for constants module

use frame_provider::backends::camera::types::Ratio;
use frame_provider::constants::{self, IlluminationMode, TICKS_PER_SECOND};

#[test]
fn test_illumination_modes() {
    assert_eq!(IlluminationMode::ALL.len(), 3);
    assert_eq!(IlluminationMode::default(), IlluminationMode::Alternating);
}

#[test]
fn test_stop_wait_is_one_frame_at_ten_fps() {
    let period = Ratio::from_int(10).frame_period().unwrap();
    assert_eq!(constants::DEFAULT_STOP_WAIT, period);
}

#[test]
fn test_frame_duration_ticks() {
    // 1e7 / 30 + 0.5, truncated
    assert_eq!(Ratio::from_int(30).frame_duration_ticks(), 333_333);
    assert_eq!(Ratio::new(30_000, 1001).frame_duration_ticks(), 333_667);
    assert_eq!(Ratio::from_int(1).frame_duration_ticks(), TICKS_PER_SECOND);
}

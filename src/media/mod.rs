// SPDX-License-Identifier: MPL-2.0

//! Media utilities
//!
//! # Formats
//!
//! The [`formats`] module provides pixel subtype metadata ([`VideoSubtype`])
//! and the YUY2 to Gray8 luma strip applied to every published frame.

pub mod formats;

pub use formats::VideoSubtype;
pub use formats::conversions::{yuy2_to_gray8, yuy2_to_gray8_vec};

// SPDX-License-Identifier: MPL-2.0

//! Format and subtype utilities
//!
//! This module provides pixel subtype metadata and the luma strip used when
//! publishing frames.

pub mod conversions;
pub mod subtype;

pub use subtype::VideoSubtype;

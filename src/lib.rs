// SPDX-License-Identifier: MPL-2.0

//! Frame provider - single-device frame acquisition and relay
//!
//! This library opens one capture device, negotiates a fixed format, reads
//! frames on a shared worker pool and republishes them as Gray8 frames tagged
//! with illumination and mirror state.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Device sessions, the acquisition loop and device backends
//! - [`media`]: Pixel subtypes and conversion
//! - [`pipelines`]: Transform stage and host-facing frame provider
//! - [`config`]: Provider configuration handling
//! - [`errors`]: Error taxonomy
//!
//! # Example
//!
//! ```ignore
//! let manager = ProviderManager::new(devices, sink, ProviderConfig::default(), handle);
//! let provider = manager.device_added("/dev/video2")?;
//! provider.start()?;
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod media;
pub mod pipelines;

// Re-export commonly used types
pub use backends::camera::{
    AcquisitionLoop, DeviceSession, FormatSelector, ProviderManager, SelectedFormat,
};
pub use config::ProviderConfig;
pub use constants::IlluminationMode;
pub use errors::{ProviderError, ProviderResult};
pub use pipelines::{FrameProvider, FrameSink, PassThroughTransform, PublishedFrame};

// SPDX-License-Identifier: MPL-2.0

//! Capture device abstraction
//!
//! This module provides the trait seams between the acquisition engine and
//! concrete capture hardware, plus the engine itself.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │   ProviderManager   │  ← One provider per added device
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │   AcquisitionLoop   │  ← Self-rescheduling read steps, stop handshake
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │    DeviceSession    │  ← Negotiated format, stream selection, cached state
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │ CaptureDevice Trait │  ← Common interface
//! └──────────┬──────────┘
//!            │
//!       ┌────┴─────┐
//!       ▼          ▼
//!    ┌──────┐ ┌─────────┐
//!    │ V4L2 │ │Simulated│
//!    └──────┘ └─────────┘
//! ```

pub mod format_selector;
pub mod frame_loop;
pub mod manager;
pub mod session;
pub mod types;
pub mod v4l2_controls;
pub mod v4l2_device;
pub mod v4l2_utils;

pub use format_selector::{FormatSelector, SelectedFormat};
pub use frame_loop::{AcquisitionLoop, AcquisitionState, LoopStats, SubscriptionToken};
pub use manager::ProviderManager;
pub use session::{DeviceSession, ReadOutcome};
pub use types::*;

use crate::errors::ProviderResult;

/// Indexed access to the native formats a device offers
///
/// Exhaustion is signalled through errors: `NoMoreTypes` ends the current
/// stream, `InvalidStream` ends the enumeration.
pub trait FormatEnumerator {
    /// Format at `index` within `stream`
    fn native_format(&self, stream: u32, index: u32) -> ProviderResult<FormatDescriptor>;
}

/// Open connection to one capture device
///
/// Implementations perform blocking I/O. Callers serialize access; the trait
/// only requires `Send` so a handle can move between pool threads.
pub trait CaptureDevice: FormatEnumerator + Send {
    // ===== Identification =====

    /// Identification strings of the device
    fn identity(&self) -> DeviceIdentity;

    // ===== Configuration =====

    /// Fix the capture format of `stream`
    fn set_current_format(&mut self, stream: u32, format: &FormatDescriptor)
    -> ProviderResult<()>;

    /// Select or deselect `stream` for delivery
    fn set_stream_selection(&mut self, stream: u32, selected: bool) -> ProviderResult<()>;

    /// Whether `stream` is selected; fails once the device is gone
    fn stream_selection(&self, stream: u32) -> ProviderResult<bool>;

    // ===== Capture =====

    /// Blocking read of one sample from `stream`
    ///
    /// # Returns
    /// * `Ok(DeviceRead)` - the read completed; `sample` may be empty and
    ///   `stream_error` may be set
    /// * `Err(_)` - the read itself failed and the handle is unusable
    fn read_sample(&mut self, stream: u32) -> ProviderResult<DeviceRead>;

    // ===== State & controls =====

    /// Current horizontal mirror state
    ///
    /// Returns `Err(ProviderError::NotSupported)` when the device has no
    /// mirror control.
    fn query_mirrored(&self) -> ProviderResult<bool>;

    /// Range of a capability, `Err(NotSupported)` when absent
    fn capability_range(&self, capability: Capability) -> ProviderResult<CapabilityRange>;

    /// Current value of a capability
    fn capability_value(&self, capability: Capability) -> ProviderResult<i32>;

    /// Apply a capability value, returning the value the device now reports
    fn set_capability(&mut self, capability: Capability, value: i32) -> ProviderResult<i32>;
}

/// Resolves device identifiers to live handles
pub trait DeviceProvider: Send + Sync {
    /// Enumerate devices this provider can open
    fn enumerate(&self) -> Vec<DeviceIdentity>;

    /// Open the device identified by `id`
    ///
    /// # Returns
    /// * `Err(ProviderError::DeviceNotFound)` - no such device
    /// * `Err(ProviderError::DeviceOpenFailed)` - present but unusable
    fn open_device(&self, id: &str) -> ProviderResult<Box<dyn CaptureDevice>>;
}

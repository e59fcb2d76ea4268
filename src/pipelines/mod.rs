// SPDX-License-Identifier: MPL-2.0

//! Processing pipelines between the acquisition loop and the host
//!
//! # Pipeline Architecture
//!
//! ```text
//! ┌──────────────┐     ┌───────────────────┐     ┌──────────────┐
//! │ Current      │ ──▶ │  Transform        │ ──▶ │  Frame sink  │
//! │ frame (YUY2) │     │  - single slot    │     │  (Gray8)     │
//! │              │     │  - illumination   │     │              │
//! └──────────────┘     └───────────────────┘     └──────────────┘
//! ```
//!
//! # Modules
//!
//! - [`transform`]: Single-slot pass-through stage with type negotiation
//! - [`provider`]: Host-facing provider publishing Gray8 frames and properties

pub mod provider;
pub mod transform;

pub use provider::{
    FrameProvider, FrameSink, PropertyChangeStatus, PublishStats, PublishedFrame, VideoProfile,
};
pub use transform::{
    AlternatingIllumination, FixedIllumination, IlluminationSource, InputStatus, MediaTransform,
    MediaTypeSource, OutputStatus, PassThroughTransform, Sample, StreamInfo, StreamLimits,
    TransformMessage, TransformState, illumination_source,
};

// SPDX-License-Identifier: MPL-2.0

//! Backend abstraction layer for frame capture
//!
//! This module provides the capture engine and the devices it runs on:
//! - Device sessions and the self-rescheduling acquisition loop
//! - Native V4L2 capture devices
//! - Simulated devices for tests and hardware-free runs
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               Frame Provider                 │
//! └────────────────────┬────────────────────────┘
//!                      │
//! ┌────────────────────┴────────────────────────┐
//! │              Backend Layer                   │
//! │  ┌──────────────────────────────────────┐  │
//! │  │   Camera (session, acquisition loop)  │  │
//! │  └──────────────────┬───────────────────┘  │
//! │          ┌──────────┴──────────┐           │
//! │  ┌───────┴──────┐    ┌─────────┴────────┐  │
//! │  │     V4L2     │    │ Virtual Camera   │  │
//! │  │   (v4l/mmap) │    │   (simulated)    │  │
//! │  └──────────────┘    └──────────────────┘  │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`camera`]: Device traits, session, acquisition loop and V4L2 backend
//! - [`virtual_camera`]: Simulated capture devices

pub mod camera;
pub mod virtual_camera;

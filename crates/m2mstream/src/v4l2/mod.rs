// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! V4L2 device backend
//!
//! Implements the [`Device`](crate::device::Device) control surface for Linux
//! video nodes through the V4L2 ioctl interface.
//!
//! # Quick Start
//!
//! ```no_run
//! use m2mstream::device::Device;
//! use m2mstream::v4l2::{DeviceType, V4l2Device};
//!
//! let device = V4l2Device::open("/dev/video0")?;
//! let caps = device.query_capabilities()?;
//! if caps.device_type() == DeviceType::M2m {
//!     println!("{} is a memory-to-memory device", caps.card());
//! }
//! # Ok::<(), m2mstream::Error>(())
//! ```
//!
//! # Queue Types
//!
//! | Capability | Capture queue | Output queue |
//! |------------|---------------|--------------|
//! | `VIDEO_CAPTURE` | `VIDEO_CAPTURE` | - |
//! | `VIDEO_M2M` | `VIDEO_CAPTURE` | `VIDEO_OUTPUT` |
//! | `VIDEO_M2M_MPLANE` | `VIDEO_CAPTURE_MPLANE` | `VIDEO_OUTPUT_MPLANE` |
//!
//! # Readiness
//!
//! A single `poll()` on the device node covers all three conditions the
//! scheduler waits for: `POLLIN` for a filled capture buffer, `POLLOUT` for
//! a consumed output buffer and `POLLPRI` for a pending event.
//!
//! # Platform Support
//!
//! Tested on:
//! - NXP i.MX8M Plus (Hantro VPU)
//! - NXP i.MX95 (Wave6 VPU)
//! - Generic x86_64 with `vivid`/`vicodec` (development/testing)

mod capabilities;
mod device;
mod ioctl;

pub use capabilities::{Capabilities, DeviceType};
pub use device::V4l2Device;
/// Raw `linux/videodev2.h` definitions.
pub use v4l2r::bindings;

// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! V4L2 device capabilities
//!
//! - [`DeviceType`] - Classification of a V4L2 node (camera, M2M, output)
//! - [`Capabilities`] - Identity and capability flags reported by
//!   `VIDIOC_QUERYCAP`

use std::fmt;

use v4l2r::bindings::{
    v4l2_capability, V4L2_CAP_DEVICE_CAPS, V4L2_CAP_READWRITE, V4L2_CAP_STREAMING,
    V4L2_CAP_VIDEO_CAPTURE, V4L2_CAP_VIDEO_CAPTURE_MPLANE, V4L2_CAP_VIDEO_M2M,
    V4L2_CAP_VIDEO_M2M_MPLANE, V4L2_CAP_VIDEO_OUTPUT, V4L2_CAP_VIDEO_OUTPUT_MPLANE,
};

/// V4L2 device type classification
///
/// Derived from the capability flags alone:
///
/// - **M2m**: Has `VIDEO_M2M` or `VIDEO_M2M_MPLANE`, e.g. a hardware codec
/// - **Camera**: Has `VIDEO_CAPTURE` or `VIDEO_CAPTURE_MPLANE`
/// - **Output**: Has `VIDEO_OUTPUT` or `VIDEO_OUTPUT_MPLANE` only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    /// Video capture device (camera, frame grabber)
    Camera,

    /// Memory-to-memory device (decoder, encoder, converter)
    ///
    /// Accepts data on its output queue and produces results on its capture
    /// queue.
    M2m,

    /// Video output device (display, transmitter)
    Output,

    /// Device type could not be determined from capabilities.
    Unknown,
}

impl DeviceType {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceType::Camera => "Camera",
            DeviceType::M2m => "M2M",
            DeviceType::Output => "Output",
            DeviceType::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

const FLAG_NAMES: &[(u32, &str)] = &[
    (V4L2_CAP_VIDEO_CAPTURE, "VIDEO_CAPTURE"),
    (V4L2_CAP_VIDEO_OUTPUT, "VIDEO_OUTPUT"),
    (V4L2_CAP_VIDEO_CAPTURE_MPLANE, "VIDEO_CAPTURE_MPLANE"),
    (V4L2_CAP_VIDEO_OUTPUT_MPLANE, "VIDEO_OUTPUT_MPLANE"),
    (V4L2_CAP_VIDEO_M2M_MPLANE, "VIDEO_M2M_MPLANE"),
    (V4L2_CAP_VIDEO_M2M, "VIDEO_M2M"),
    (V4L2_CAP_READWRITE, "READWRITE"),
    (V4L2_CAP_STREAMING, "STREAMING"),
];

/// Capabilities reported by a V4L2 node
///
/// # Example
///
/// ```
/// use m2mstream::v4l2::bindings::{V4L2_CAP_STREAMING, V4L2_CAP_VIDEO_M2M_MPLANE};
/// use m2mstream::v4l2::{Capabilities, DeviceType};
///
/// let caps = Capabilities::new(
///     "wave6-dec",
///     "wave6 decoder",
///     "platform:wave6-dec",
///     V4L2_CAP_VIDEO_M2M_MPLANE | V4L2_CAP_STREAMING,
/// );
/// assert_eq!(caps.device_type(), DeviceType::M2m);
/// assert!(caps.is_multi_planar());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    driver: String,
    card: String,
    bus_info: String,
    version: u32,
    capabilities: u32,
}

impl Capabilities {
    /// Create a descriptor from its parts, `capabilities` holding
    /// `V4L2_CAP_*` flags.
    pub fn new(driver: &str, card: &str, bus_info: &str, capabilities: u32) -> Self {
        Capabilities {
            driver: driver.to_owned(),
            card: card.to_owned(),
            bus_info: bus_info.to_owned(),
            version: 0,
            capabilities,
        }
    }

    /// Uses the per-node `device_caps` when the driver provides them,
    /// otherwise the capabilities of the whole physical device.
    pub(crate) fn from_raw(raw: &v4l2_capability) -> Self {
        let capabilities = if raw.capabilities & V4L2_CAP_DEVICE_CAPS != 0 {
            raw.device_caps
        } else {
            raw.capabilities
        };
        Capabilities {
            driver: string_from_bytes(&raw.driver),
            card: string_from_bytes(&raw.card),
            bus_info: string_from_bytes(&raw.bus_info),
            version: raw.version,
            capabilities,
        }
    }

    /// Driver name (e.g., "wave6-dec", "vivid")
    pub fn driver(&self) -> &str {
        &self.driver
    }

    /// Card/device name from the driver
    pub fn card(&self) -> &str {
        &self.card
    }

    /// Bus information (e.g., "platform:wave6-dec")
    pub fn bus_info(&self) -> &str {
        &self.bus_info
    }

    /// Kernel version the driver was built for, as "major.minor.patch".
    pub fn version(&self) -> String {
        format!(
            "{}.{}.{}",
            (self.version >> 16) & 0xff,
            (self.version >> 8) & 0xff,
            self.version & 0xff
        )
    }

    /// Raw `V4L2_CAP_*` flags.
    pub fn flags(&self) -> u32 {
        self.capabilities
    }

    /// Names of the capability flags this crate knows about.
    pub fn flag_names(&self) -> Vec<&'static str> {
        FLAG_NAMES
            .iter()
            .filter(|(flag, _)| self.has(*flag))
            .map(|(_, name)| *name)
            .collect()
    }

    pub fn has(&self, flag: u32) -> bool {
        self.capabilities & flag != 0
    }

    pub fn is_m2m(&self) -> bool {
        self.has(V4L2_CAP_VIDEO_M2M) || self.has(V4L2_CAP_VIDEO_M2M_MPLANE)
    }

    /// Whether queues must use the multi-planar buffer types.
    pub fn is_multi_planar(&self) -> bool {
        self.has(V4L2_CAP_VIDEO_M2M_MPLANE)
    }

    pub fn supports_capture(&self) -> bool {
        self.has(V4L2_CAP_VIDEO_CAPTURE) || self.has(V4L2_CAP_VIDEO_CAPTURE_MPLANE)
    }

    pub fn supports_streaming(&self) -> bool {
        self.has(V4L2_CAP_STREAMING)
    }

    pub fn supports_read_write(&self) -> bool {
        self.has(V4L2_CAP_READWRITE)
    }

    pub fn device_type(&self) -> DeviceType {
        if self.is_m2m() {
            DeviceType::M2m
        } else if self.supports_capture() {
            DeviceType::Camera
        } else if self.has(V4L2_CAP_VIDEO_OUTPUT) || self.has(V4L2_CAP_VIDEO_OUTPUT_MPLANE) {
            DeviceType::Output
        } else {
            DeviceType::Unknown
        }
    }
}

/// Returns the string stored in a fixed-size, nul-padded uAPI byte array.
fn string_from_bytes(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) [{}] {}",
            self.card,
            self.driver,
            self.bus_info,
            self.device_type()
        )
    }
}

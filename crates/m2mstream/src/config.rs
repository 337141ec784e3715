// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Run configuration
//!
//! A [`Config`] is built once with the `with_*` methods and stays immutable
//! for the lifetime of a session.
//!
//! ```
//! use m2mstream::config::Config;
//! use m2mstream::memory::MemoryStrategy;
//! use std::time::Duration;
//!
//! let config = Config::default()
//!     .with_memory(MemoryStrategy::UserPtr)
//!     .with_force_format(true)
//!     .with_resolution(1280, 720)
//!     .with_frames(10)
//!     .with_timeout(Duration::from_secs(2));
//! assert_eq!(config.frames(), 10);
//! ```

use std::time::Duration;

use crate::device::{Direction, Format, Resolution};
use crate::fourcc::FourCC;
use crate::memory::MemoryStrategy;

/// Frames captured when no budget is given.
pub const DEFAULT_FRAMES: u32 = 70;

/// Readiness wait timeout when none is given.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Mapped buffers requested per queue when no count is given.
pub const DEFAULT_BUFFERS: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    memory: MemoryStrategy,
    force_format: bool,
    resolution: Option<Resolution>,
    frames: u32,
    timeout: Duration,
    buffers: u32,
    stop_on_eos: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            memory: MemoryStrategy::default(),
            force_format: false,
            resolution: None,
            frames: DEFAULT_FRAMES,
            timeout: DEFAULT_TIMEOUT,
            buffers: DEFAULT_BUFFERS,
            stop_on_eos: false,
        }
    }
}

impl Config {
    pub fn with_memory(mut self, memory: MemoryStrategy) -> Self {
        self.memory = memory;
        self
    }

    /// Force the fallback geometry and pixel formats onto the device instead
    /// of keeping its current format.
    pub fn with_force_format(mut self, force: bool) -> Self {
        self.force_format = force;
        self
    }

    /// Replace the fallback geometry used when forcing the format.
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.resolution = Some(Resolution::new(width, height));
        self
    }

    /// Number of captured frames after which the run ends.
    pub fn with_frames(mut self, frames: u32) -> Self {
        self.frames = frames;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Mapped buffers to request per queue. The device may grant fewer.
    pub fn with_buffers(mut self, buffers: u32) -> Self {
        self.buffers = buffers;
        self
    }

    /// End the run early once the device reports end-of-stream.
    pub fn with_stop_on_eos(mut self, stop: bool) -> Self {
        self.stop_on_eos = stop;
        self
    }

    pub fn memory(&self) -> MemoryStrategy {
        self.memory
    }

    pub fn force_format(&self) -> bool {
        self.force_format
    }

    pub fn resolution(&self) -> Option<Resolution> {
        self.resolution
    }

    pub fn frames(&self) -> u32 {
        self.frames
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn buffers(&self) -> u32 {
        self.buffers
    }

    pub fn stop_on_eos(&self) -> bool {
        self.stop_on_eos
    }

    /// The format forced onto `direction`, if forcing is enabled: YUV420 on
    /// capture and H.264 on output, at 640x480 for single-planar devices and
    /// 1920x1080 for multi-planar ones unless a resolution was given.
    pub fn forced_format(&self, direction: Direction, multi_planar: bool) -> Option<Format> {
        if !self.force_format {
            return None;
        }
        let fallback = if multi_planar {
            Resolution::new(1920, 1080)
        } else {
            Resolution::new(640, 480)
        };
        let res = self.resolution.unwrap_or(fallback);
        let pixel_format = match direction {
            Direction::Capture => FourCC::YUV420,
            Direction::Output => FourCC::H264,
        };
        Some(Format::new(res.width, res.height, pixel_format))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.memory(), MemoryStrategy::Mapped);
        assert_eq!(config.frames(), 70);
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.buffers(), 4);
        assert!(!config.force_format());
        assert!(!config.stop_on_eos());
    }

    #[test]
    fn test_forced_format_fallbacks() {
        let config = Config::default().with_force_format(true);
        let capture = config.forced_format(Direction::Capture, false).unwrap();
        assert_eq!(capture.resolution(), Resolution::new(640, 480));
        assert_eq!(capture.pixel_format, FourCC::YUV420);

        let output = config.forced_format(Direction::Output, true).unwrap();
        assert_eq!(output.resolution(), Resolution::new(1920, 1080));
        assert_eq!(output.pixel_format, FourCC::H264);
    }

    #[test]
    fn test_resolution_override() {
        let config = Config::default()
            .with_force_format(true)
            .with_resolution(320, 240);
        let format = config.forced_format(Direction::Capture, true).unwrap();
        assert_eq!(format.resolution(), Resolution::new(320, 240));
    }

    #[test]
    fn test_no_forced_format_by_default() {
        assert!(Config::default()
            .forced_format(Direction::Capture, false)
            .is_none());
    }
}

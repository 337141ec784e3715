// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Device control surface
//!
//! The streaming engine never talks to the kernel directly. Every control
//! operation it needs (capability query, format negotiation, buffer requests,
//! queueing, streaming, events and readiness polling) goes through the
//! [`Device`] trait, implemented for real V4L2 nodes by
//! [`V4l2Device`](crate::v4l2::V4l2Device). Tests drive the engine with an
//! in-memory implementation instead.
//!
//! The types in this module are the values exchanged across that boundary.

use std::fmt;
use std::time::Duration;

use crate::fourcc::FourCC;
use crate::memory::{MemoryStrategy, PlaneMemory};
use crate::v4l2::bindings;
use crate::v4l2::Capabilities;
use crate::Error;

/// Data flow direction of a queue, seen from the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Device produces frames the application consumes.
    Capture,
    /// Application produces data the device consumes.
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Capture => write!(f, "capture"),
            Direction::Output => write!(f, "output"),
        }
    }
}

/// One of the four V4L2 video buffer queue types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    VideoCapture,
    VideoOutput,
    VideoCaptureMplane,
    VideoOutputMplane,
}

impl QueueType {
    pub fn new(direction: Direction, multi_planar: bool) -> Self {
        match (direction, multi_planar) {
            (Direction::Capture, false) => QueueType::VideoCapture,
            (Direction::Output, false) => QueueType::VideoOutput,
            (Direction::Capture, true) => QueueType::VideoCaptureMplane,
            (Direction::Output, true) => QueueType::VideoOutputMplane,
        }
    }

    pub fn direction(self) -> Direction {
        match self {
            QueueType::VideoCapture | QueueType::VideoCaptureMplane => Direction::Capture,
            QueueType::VideoOutput | QueueType::VideoOutputMplane => Direction::Output,
        }
    }

    pub fn is_multi_planar(self) -> bool {
        matches!(
            self,
            QueueType::VideoCaptureMplane | QueueType::VideoOutputMplane
        )
    }

    /// The `V4L2_BUF_TYPE_*` value of this queue.
    pub fn as_raw(self) -> u32 {
        match self {
            QueueType::VideoCapture => bindings::v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_CAPTURE,
            QueueType::VideoOutput => bindings::v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_OUTPUT,
            QueueType::VideoCaptureMplane => {
                bindings::v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE
            }
            QueueType::VideoOutputMplane => {
                bindings::v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_OUTPUT_MPLANE
            }
        }
    }
}

impl fmt::Display for QueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueueType::VideoCapture => "VIDEO_CAPTURE",
            QueueType::VideoOutput => "VIDEO_OUTPUT",
            QueueType::VideoCaptureMplane => "VIDEO_CAPTURE_MPLANE",
            QueueType::VideoOutputMplane => "VIDEO_OUTPUT_MPLANE",
        };
        f.write_str(name)
    }
}

/// Video resolution
///
/// ```
/// use m2mstream::device::Resolution;
///
/// let res = Resolution::new(1920, 1080);
/// assert_eq!(res.to_string(), "1920x1080");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Line stride and buffer size of one plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaneFormat {
    pub bytes_per_line: u32,
    pub size_image: u32,
}

/// Negotiated format of one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    pub width: u32,
    pub height: u32,
    pub pixel_format: FourCC,
    /// `V4L2_FIELD_*` interlacing mode.
    pub field: u32,
    /// One entry for single-planar queues.
    pub planes: Vec<PlaneFormat>,
}

impl Format {
    /// Progressive (`V4L2_FIELD_NONE`) format with driver-computed plane sizes.
    pub fn new(width: u32, height: u32, pixel_format: FourCC) -> Self {
        Format {
            width,
            height,
            pixel_format,
            field: bindings::v4l2_field_V4L2_FIELD_NONE,
            planes: vec![PlaneFormat::default()],
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn num_planes(&self) -> usize {
        self.planes.len()
    }

    /// Raises a buggy driver's stride and image size to their minimum.
    ///
    /// The minimum stride assumes two bytes per pixel. Multi-planar formats
    /// are only corrected where the driver reported a non-zero value, since
    /// zero is meaningful there for some compressed formats.
    pub fn sanitize(&mut self, multi_planar: bool) {
        let min_stride = self.width.saturating_mul(2);
        for plane in &mut self.planes {
            if plane.bytes_per_line < min_stride && !(multi_planar && plane.bytes_per_line == 0) {
                plane.bytes_per_line = min_stride;
            }
            let min_size = plane.bytes_per_line.saturating_mul(self.height);
            if plane.size_image < min_size && !(multi_planar && plane.size_image == 0) {
                plane.size_image = min_size;
            }
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}x{}", self.pixel_format, self.width, self.height)?;
        for (i, plane) in self.planes.iter().enumerate() {
            write!(
                f,
                " [plane {}: stride {} size {}]",
                i, plane.bytes_per_line, plane.size_image
            )?;
        }
        Ok(())
    }
}

/// Length and mmap offset of one plane of a device-allocated buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    pub length: u32,
    pub offset: u32,
}

/// Per-plane values exchanged with the device on queue and dequeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaneDescriptor {
    pub bytes_used: u32,
    pub length: u32,
    /// Buffer address, only meaningful for user-pointer memory.
    pub userptr: usize,
}

/// A buffer handed back by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dequeued {
    pub index: u32,
    pub sequence: u32,
    pub planes: Vec<PlaneDescriptor>,
}

/// Event types a session can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    EndOfStream,
    SourceChange,
}

impl EventKind {
    pub fn as_raw(self) -> u32 {
        match self {
            EventKind::EndOfStream => bindings::V4L2_EVENT_EOS,
            EventKind::SourceChange => bindings::V4L2_EVENT_SOURCE_CHANGE,
        }
    }
}

/// A pending device event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// The device's capture format changed, `changes` holds the
    /// `V4L2_EVENT_SRC_CH_*` flags.
    SourceChanged { changes: u32 },
    EndOfStream,
    /// Any other event type, reported but otherwise ignored.
    Other(u32),
}

impl DeviceEvent {
    pub fn from_raw(kind: u32, changes: u32) -> Self {
        match kind {
            bindings::V4L2_EVENT_SOURCE_CHANGE => DeviceEvent::SourceChanged { changes },
            bindings::V4L2_EVENT_EOS => DeviceEvent::EndOfStream,
            other => DeviceEvent::Other(other),
        }
    }
}

/// Conditions a readiness wait watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest {
    pub capture: bool,
    pub output: bool,
    pub events: bool,
}

/// Conditions reported ready by a readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    pub capture: bool,
    pub output: bool,
    pub events: bool,
}

impl Readiness {
    /// `true` when nothing became ready, i.e. the wait timed out.
    pub fn is_empty(&self) -> bool {
        !(self.capture || self.output || self.events)
    }
}

/// The device control surface consumed by the streaming engine.
///
/// Implementations retry calls interrupted by signals. Non-blocking operations
/// report "nothing available" as `Ok(None)` and never as an error.
pub trait Device {
    fn query_capabilities(&self) -> Result<Capabilities, Error>;

    /// Resets the crop rectangle of `queue` to the driver default.
    fn reset_crop(&self, queue: QueueType) -> Result<(), Error>;

    fn get_format(&self, queue: QueueType) -> Result<Format, Error>;

    /// Requests `format` and returns what the driver actually applied.
    fn set_format(&self, queue: QueueType, format: &Format) -> Result<Format, Error>;

    /// Requests `count` buffers and returns the number granted. A count of
    /// zero releases the queue's buffers.
    fn request_buffers(
        &self,
        queue: QueueType,
        memory: MemoryStrategy,
        count: u32,
    ) -> Result<u32, Error>;

    /// Plane layouts of a device-allocated buffer.
    fn query_buffer(
        &self,
        queue: QueueType,
        index: u32,
        num_planes: usize,
    ) -> Result<Vec<PlaneLayout>, Error>;

    /// Maps one plane of a device-allocated buffer into the process.
    fn map_plane(&self, layout: PlaneLayout) -> Result<PlaneMemory, Error>;

    fn queue_buffer(
        &self,
        queue: QueueType,
        memory: MemoryStrategy,
        index: u32,
        planes: &[PlaneDescriptor],
    ) -> Result<(), Error>;

    /// Returns `Ok(None)` when no buffer is ready.
    fn dequeue_buffer(
        &self,
        queue: QueueType,
        memory: MemoryStrategy,
        num_planes: usize,
    ) -> Result<Option<Dequeued>, Error>;

    fn stream_on(&self, queue: QueueType) -> Result<(), Error>;

    fn stream_off(&self, queue: QueueType) -> Result<(), Error>;

    fn subscribe_event(&self, kind: EventKind) -> Result<(), Error>;

    /// Returns `Ok(None)` when no event is pending.
    fn dequeue_event(&self) -> Result<Option<DeviceEvent>, Error>;

    /// Copy I/O read, `Ok(None)` when no data is ready.
    fn read(&self, buf: &mut [u8]) -> Result<Option<usize>, Error>;

    /// Copy I/O write, `Ok(None)` when the device cannot accept data yet.
    fn write(&self, buf: &[u8]) -> Result<Option<usize>, Error>;

    /// Blocks until one of the `interest` conditions is ready or `timeout`
    /// expires, in which case the returned readiness is empty. A signal
    /// interruption is reported as an error for which
    /// [`Error::is_interrupted`] holds.
    fn wait(&self, interest: Interest, timeout: Duration) -> Result<Readiness, Error>;
}

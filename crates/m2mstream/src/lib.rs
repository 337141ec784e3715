// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! M2M Stream Library for Rust
//!
//! Zero-copy streaming I/O against V4L2 video devices, covering plain capture
//! devices and memory-to-memory (M2M) devices such as hardware decoders and
//! encoders. A fixed pool of buffers is shared with the device through the
//! V4L2 queue/dequeue ownership handoff, on one queue for capture-only devices
//! or on both queues for M2M devices, and survives asynchronous source-change
//! events by rebuilding the capture pool mid-run.
//!
//! # Quick Start
//!
//! ```no_run
//! use m2mstream::config::Config;
//! use m2mstream::scheduler::Scheduler;
//! use m2mstream::session::Session;
//! use m2mstream::v4l2::V4l2Device;
//!
//! let device = V4l2Device::open("/dev/video0")?;
//! let config = Config::default().with_frames(30);
//! let mut session = Session::open(device, config.clone())?;
//!
//! let mut sink = |planes: &[&[u8]]| println!("frame with {} planes", planes.len());
//! let mut source = |_buf: &mut [u8]| 0usize;
//!
//! session.start(&mut source)?;
//! let summary = Scheduler::new(&config).run(&mut session, &mut sink, &mut source)?;
//! session.close()?;
//! println!("captured {} frames", summary.frames);
//! # Ok::<(), m2mstream::Error>(())
//! ```
//!
//! # Components
//!
//! - [`pool::BufferPool`] - buffer negotiation, mapping and release
//! - [`stream::Stream`] - queue protocol for one direction
//! - [`event::EventChannel`] - asynchronous device notifications
//! - [`session::Session`] - format negotiation and reconfiguration
//! - [`scheduler::Scheduler`] - the readiness multiplexing loop
//!
//! All hardware access goes through the [`device::Device`] trait, implemented
//! for real V4L2 nodes by [`v4l2::V4l2Device`].

use std::{collections::TryReserveError, error, fmt, io, time::Duration};

use nix::errno::Errno;

use crate::device::QueueType;
use crate::pool::Ownership;

/// Error type for streaming operations
///
/// Every variant is fatal for the run except where [`Error::is_interrupted`]
/// reports a transient signal interruption.
#[derive(Debug)]
pub enum Error {
    /// I/O error from the device node or a file
    Io(io::Error),

    /// A system call on the device failed
    Os {
        /// Name of the failing call (e.g. `VIDIOC_DQBUF`)
        call: &'static str,
        /// The errno reported by the kernel
        errno: Errno,
    },

    /// The device lacks a capability or memory strategy the run requires
    NotSupported(String),

    /// The device granted fewer buffers than streaming requires
    InsufficientBuffers {
        /// Queue the buffers were requested on
        queue: QueueType,
        /// Number of buffers granted
        count: u32,
    },

    /// Application buffer memory could not be allocated
    Allocation(TryReserveError),

    /// No readiness condition became true before the timeout expired
    Timeout(Duration),

    /// A dequeued user-pointer buffer matched none of the pool's buffers
    UnknownBuffer {
        /// Address reported by the device
        address: usize,
        /// Length reported by the device
        length: u32,
    },

    /// The device returned a buffer index outside the pool
    InvalidIndex {
        /// Index reported by the device
        index: u32,
        /// Number of buffers in the pool
        count: usize,
    },

    /// A buffer ownership transition violated the handoff protocol
    Ownership {
        /// Buffer index
        index: u32,
        /// State before the attempted transition
        from: Ownership,
        /// Requested state
        to: Ownership,
    },

    /// The negotiated format cannot be used for streaming
    InvalidFormat(String),
}

impl Error {
    pub(crate) fn os(call: &'static str, errno: Errno) -> Self {
        Error::Os { call, errno }
    }

    /// Returns `true` for a signal interruption, which callers retry silently.
    pub fn is_interrupted(&self) -> bool {
        match self {
            Error::Io(err) => err.kind() == io::ErrorKind::Interrupted,
            Error::Os { errno, .. } => *errno == Errno::EINTR,
            _ => false,
        }
    }

    /// Returns the errno of a failed device call, if that is what this is.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Error::Os { errno, .. } => Some(*errno),
            Error::Io(err) => err.raw_os_error().map(Errno::from_raw),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Os { call, errno } => {
                write!(f, "{} error {}, {}", call, *errno as i32, errno.desc())
            }
            Error::NotSupported(msg) => write!(f, "not supported: {}", msg),
            Error::InsufficientBuffers { queue, count } => {
                write!(f, "insufficient buffer memory on {} ({} granted)", queue, count)
            }
            Error::Allocation(err) => write!(f, "out of memory: {}", err),
            Error::Timeout(timeout) => write!(f, "select timeout after {:?}", timeout),
            Error::UnknownBuffer { address, length } => write!(
                f,
                "dequeued user pointer {:#x} (len {}) matches no pool buffer",
                address, length
            ),
            Error::InvalidIndex { index, count } => {
                write!(f, "dequeued buffer index {} outside pool of {}", index, count)
            }
            Error::Ownership { index, from, to } => {
                write!(f, "buffer {} cannot move from {} to {}", index, from, to)
            }
            Error::InvalidFormat(msg) => write!(f, "invalid format: {}", msg),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Os { errno, .. } => Some(errno),
            Error::Allocation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<TryReserveError> for Error {
    fn from(err: TryReserveError) -> Self {
        Error::Allocation(err)
    }
}

/// The config module holds the immutable run configuration.
pub mod config;

/// The device module defines the control surface consumed by the engine.
pub mod device;

/// The event module drains asynchronous device notifications.
pub mod event;

/// The fourcc module provides portable handling of fourcc codes.
pub mod fourcc;

/// The memory module abstracts mapped and application-owned plane memory.
pub mod memory;

/// The pool module owns the buffers of one queue.
pub mod pool;

/// The scheduler module runs the readiness multiplexing loop.
pub mod scheduler;

/// The session module negotiates formats and coordinates reconfiguration.
pub mod session;

/// The stream module implements the enqueue/dequeue protocol of one queue.
pub mod stream;

/// The v4l2 module implements the device control surface for V4L2 nodes.
pub mod v4l2;

pub use crate::stream::{Sink, Source};

// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Streaming sessions
//!
//! A [`Session`] owns the device and one [`Stream`] per active direction:
//! capture always, output as well when the device is a memory-to-memory
//! device. Opening a session checks the device capabilities, negotiates the
//! formats, allocates the buffer pools and subscribes to device events.
//!
//! When the device reports a source change the capture stream is torn down
//! and rebuilt against the new format while the output stream keeps running:
//!
//! ```text
//! Running --SourceChanged--> Draining --(stop, release, renegotiate,
//!                                        reallocate, restart)--> Running
//! ```

use std::time::Duration;

use nix::errno::Errno;

use crate::config::Config;
use crate::device::{
    Device, DeviceEvent, Direction, EventKind, Format, Interest, QueueType, Readiness,
};
use crate::event::EventChannel;
use crate::memory::MemoryStrategy;
use crate::pool::BufferPool;
use crate::stream::{Progress, Sink, Source, Stream};
use crate::v4l2::Capabilities;
use crate::Error;

/// Counters of device events handled by a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventCounts {
    pub source_changes: u64,
    pub end_of_stream: u64,
    pub other: u64,
}

/// An open streaming session on one device.
#[derive(Debug)]
pub struct Session<D: Device> {
    device: D,
    config: Config,
    capabilities: Capabilities,
    capture: Stream,
    output: Option<Stream>,
    events: Option<EventChannel>,
    counts: EventCounts,
}

impl<D: Device> Session<D> {
    /// Checks `device` and sets up its streams as described by `config`.
    pub fn open(device: D, config: Config) -> Result<Self, Error> {
        let capabilities = match device.query_capabilities() {
            Ok(caps) => caps,
            Err(err) if matches!(err.errno(), Some(Errno::EINVAL | Errno::ENOTTY)) => {
                return Err(Error::NotSupported("not a V4L2 device".to_owned()))
            }
            Err(err) => return Err(err),
        };
        log::debug!("{}", capabilities);

        let m2m = capabilities.is_m2m();
        if !m2m && !capabilities.supports_capture() {
            return Err(Error::NotSupported("no video capture device".to_owned()));
        }
        match config.memory() {
            MemoryStrategy::Copy if !capabilities.supports_read_write() => {
                return Err(Error::NotSupported(
                    "device does not support read i/o".to_owned(),
                ))
            }
            MemoryStrategy::Mapped | MemoryStrategy::UserPtr
                if !capabilities.supports_streaming() =>
            {
                return Err(Error::NotSupported(
                    "device does not support streaming i/o".to_owned(),
                ))
            }
            _ => {}
        }

        let multi_planar = capabilities.is_multi_planar();
        let capture = open_stream(&device, &config, Direction::Capture, multi_planar)?;

        let (output, events) = if m2m {
            let output = open_stream(&device, &config, Direction::Output, multi_planar)?;
            let events = EventChannel::subscribe(
                &device,
                &[EventKind::EndOfStream, EventKind::SourceChange],
            )?;
            (Some(output), Some(events))
        } else {
            (None, None)
        };

        Ok(Session {
            device,
            config,
            capabilities,
            capture,
            output,
            events,
            counts: EventCounts::default(),
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn is_m2m(&self) -> bool {
        self.output.is_some()
    }

    pub fn is_multi_planar(&self) -> bool {
        self.capture.queue().is_multi_planar()
    }

    pub fn capture(&self) -> &Stream {
        &self.capture
    }

    pub fn output(&self) -> Option<&Stream> {
        self.output.as_ref()
    }

    pub fn event_counts(&self) -> EventCounts {
        self.counts
    }

    /// Starts the capture stream, then the output stream primed from `source`.
    pub fn start(&mut self, source: &mut dyn Source) -> Result<(), Error> {
        self.capture.start(&self.device, source)?;
        if let Some(output) = &mut self.output {
            output.start(&self.device, source)?;
        }
        Ok(())
    }

    /// The readiness conditions the scheduler should wait for.
    pub fn interest(&self) -> Interest {
        Interest {
            capture: true,
            output: self.output.is_some(),
            events: self.events.is_some(),
        }
    }

    pub fn wait(&self, timeout: Duration) -> Result<Readiness, Error> {
        self.device.wait(self.interest(), timeout)
    }

    pub fn service_capture(&mut self, sink: &mut dyn Sink) -> Result<Progress, Error> {
        let mut no_source = |_: &mut [u8]| 0usize;
        self.capture.service(&self.device, sink, &mut no_source)
    }

    /// Refills one output buffer. Does nothing without an output stream.
    pub fn service_output(&mut self, source: &mut dyn Source) -> Result<Progress, Error> {
        let Some(output) = &mut self.output else {
            return Ok(Progress::WouldBlock);
        };
        let mut no_sink = |_: &[&[u8]]| {};
        output.service(&self.device, &mut no_sink, source)
    }

    /// Drains pending device events, rebuilding the capture stream on a
    /// source change. Returns the events that were handled.
    pub fn handle_events(&mut self) -> Result<Vec<DeviceEvent>, Error> {
        let Some(channel) = &self.events else {
            return Ok(Vec::new());
        };
        let pending = channel.drain(&self.device).collect::<Result<Vec<_>, _>>()?;

        for event in &pending {
            match event {
                DeviceEvent::SourceChanged { changes } => {
                    log::info!("source change (flags {:#x})", changes);
                    self.counts.source_changes += 1;
                    self.reconfigure()?;
                }
                DeviceEvent::EndOfStream => {
                    log::info!("end of stream");
                    self.counts.end_of_stream += 1;
                }
                DeviceEvent::Other(kind) => {
                    log::debug!("ignoring event type {}", kind);
                    self.counts.other += 1;
                }
            }
        }
        Ok(pending)
    }

    /// Rebuilds the capture stream against the device's current format.
    ///
    /// The output stream is left untouched. The format is re-read rather
    /// than forced, since it is the device that changed it.
    pub fn reconfigure(&mut self) -> Result<(), Error> {
        let mut no_source = |_: &mut [u8]| 0usize;
        let queue = self.capture.queue();
        let memory = self.capture.memory();

        self.capture.stop(&self.device)?;
        self.capture.pool_mut().release_all(&self.device)?;

        let format = negotiate_format(&self.device, queue, None)?;
        let pool = BufferPool::allocate(
            &self.device,
            queue,
            memory,
            self.config.buffers(),
            &format,
        )?;
        log::info!("capture reconfigured to {}, {} buffers", format, pool.len());
        self.capture.replace(format, pool);
        self.capture.start(&self.device, &mut no_source)
    }

    /// Stops capture, then output. Stopping an idle session does nothing.
    pub fn stop(&mut self) -> Result<(), Error> {
        self.capture.stop(&self.device)?;
        if let Some(output) = &mut self.output {
            output.stop(&self.device)?;
        }
        Ok(())
    }

    /// Stops streaming, releases the capture pool and then the output pool,
    /// and hands the device back.
    pub fn close(mut self) -> Result<D, Error> {
        self.stop()?;
        self.capture.pool_mut().release_all(&self.device)?;
        if let Some(output) = &mut self.output {
            output.pool_mut().release_all(&self.device)?;
        }
        Ok(self.device)
    }
}

/// Negotiates the format of `queue`: crop reset (failures ignored), optional
/// forced format, then stride/size sanitation.
pub fn negotiate_format<D: Device>(
    device: &D,
    queue: QueueType,
    forced: Option<Format>,
) -> Result<Format, Error> {
    if let Err(err) = device.reset_crop(queue) {
        log::debug!("{}: crop reset ignored: {}", queue, err);
    }

    let mut format = match forced {
        Some(forced) => {
            let mut requested = device.get_format(queue)?;
            requested.width = forced.width;
            requested.height = forced.height;
            requested.pixel_format = forced.pixel_format;
            requested.field = forced.field;
            device.set_format(queue, &requested)?
        }
        None => device.get_format(queue)?,
    };

    format.sanitize(queue.is_multi_planar());
    if format.planes.is_empty() {
        return Err(Error::InvalidFormat(format!("{} reports no planes", queue)));
    }
    log::debug!("{}: {}", queue, format);
    Ok(format)
}

fn open_stream<D: Device>(
    device: &D,
    config: &Config,
    direction: Direction,
    multi_planar: bool,
) -> Result<Stream, Error> {
    let queue = QueueType::new(direction, multi_planar);
    let format = negotiate_format(device, queue, config.forced_format(direction, multi_planar))?;
    let pool = BufferPool::allocate(device, queue, config.memory(), config.buffers(), &format)?;
    Ok(Stream::new(format, pool))
}

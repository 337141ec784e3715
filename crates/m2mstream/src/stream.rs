// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Streams
//!
//! A [`Stream`] runs the enqueue/dequeue protocol of one queue. Capture
//! streams hand every dequeued frame to a [`Sink`] before giving the buffer
//! back to the device; output streams refill every dequeued buffer from a
//! [`Source`] before queueing it again. Copy I/O streams bypass the queues
//! and move data with `read()`/`write()` instead.

use crate::device::{Device, Direction, Format, QueueType};
use crate::memory::MemoryStrategy;
use crate::pool::{BufferPool, Ownership, Plane};
use crate::Error;

/// Receives captured frames, one slice of valid bytes per plane.
///
/// The slices borrow buffer memory that goes back to the device as soon as
/// `consume` returns.
pub trait Sink {
    fn consume(&mut self, planes: &[&[u8]]);
}

impl<F: FnMut(&[&[u8]])> Sink for F {
    fn consume(&mut self, planes: &[&[u8]]) {
        self(planes)
    }
}

/// Fills output buffers. Returns the number of bytes written into `buf`,
/// zero once the input is exhausted.
pub trait Source {
    fn supply(&mut self, buf: &mut [u8]) -> usize;
}

impl<F: FnMut(&mut [u8]) -> usize> Source for F {
    fn supply(&mut self, buf: &mut [u8]) -> usize {
        self(buf)
    }
}

/// Outcome of servicing a stream once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// A buffer (or a chunk of copy I/O data) moved through the stream.
    Progressed,
    /// The device had nothing ready; try again after the next wait.
    WouldBlock,
}

/// One direction of a session.
#[derive(Debug)]
pub struct Stream {
    queue: QueueType,
    format: Format,
    pool: BufferPool,
    streaming: bool,
    serviced: u64,
    bytes: u64,
}

impl Stream {
    pub fn new(format: Format, pool: BufferPool) -> Self {
        Stream {
            queue: pool.queue(),
            format,
            pool,
            streaming: false,
            serviced: 0,
            bytes: 0,
        }
    }

    pub fn direction(&self) -> Direction {
        self.queue.direction()
    }

    pub fn queue(&self) -> QueueType {
        self.queue
    }

    pub fn format(&self) -> &Format {
        &self.format
    }

    pub fn memory(&self) -> MemoryStrategy {
        self.pool.memory()
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Buffers dequeued and serviced so far, across reconfigurations.
    pub fn serviced(&self) -> u64 {
        self.serviced
    }

    /// Payload bytes delivered to the sink or taken from the source.
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes
    }

    /// Hands every buffer to the device and starts streaming.
    ///
    /// Output buffers are filled from `source` before being queued. Copy I/O
    /// has no queue and only marks the stream active.
    pub fn start<D: Device>(&mut self, device: &D, source: &mut dyn Source) -> Result<(), Error> {
        if self.streaming {
            return Ok(());
        }

        if self.memory().is_streaming() {
            let output = self.direction() == Direction::Output;
            let memory = self.memory();
            for buffer in self.pool.buffers_mut() {
                if output {
                    if let Some(planes) = buffer.planes_mut() {
                        for plane in planes {
                            self.bytes += fill_plane(self.queue, plane, source) as u64;
                        }
                    }
                }
                device.queue_buffer(self.queue, memory, buffer.index(), &buffer.descriptors(output))?;
                buffer.transition(Ownership::DeviceOwned)?;
            }
            device.stream_on(self.queue)?;
        }

        log::debug!("{}: streaming {} buffers", self.queue, self.pool.len());
        self.streaming = true;
        Ok(())
    }

    /// Stops streaming and takes every buffer back from the device.
    /// Stopping an idle stream does nothing.
    pub fn stop<D: Device>(&mut self, device: &D) -> Result<(), Error> {
        if !self.streaming {
            return Ok(());
        }

        if self.memory().is_streaming() {
            device.stream_off(self.queue)?;
            for buffer in self.pool.buffers_mut() {
                buffer.reclaim();
            }
        }

        log::debug!("{}: stream off", self.queue);
        self.streaming = false;
        Ok(())
    }

    /// Moves one buffer through the stream.
    ///
    /// Capture streams use `sink`, output streams use `source`.
    pub fn service<D: Device>(
        &mut self,
        device: &D,
        sink: &mut dyn Sink,
        source: &mut dyn Source,
    ) -> Result<Progress, Error> {
        match (self.memory(), self.direction()) {
            (MemoryStrategy::Copy, Direction::Capture) => self.read_frame(device, sink),
            (MemoryStrategy::Copy, Direction::Output) => self.write_chunk(device, source),
            (_, direction) => self.exchange(device, direction, sink, source),
        }
    }

    fn exchange<D: Device>(
        &mut self,
        device: &D,
        direction: Direction,
        sink: &mut dyn Sink,
        source: &mut dyn Source,
    ) -> Result<Progress, Error> {
        let memory = self.memory();
        let Some(dequeued) =
            device.dequeue_buffer(self.queue, memory, self.format.num_planes())?
        else {
            return Ok(Progress::WouldBlock);
        };

        let index = self.pool.identify(&dequeued)?;
        let queue = self.queue;
        let buffer = self.pool.buffer_mut(index)?;
        buffer.transition(Ownership::ApplicationOwned)?;

        let output = direction == Direction::Output;
        if let Some(planes) = buffer.planes_mut() {
            if output {
                for plane in planes {
                    self.bytes += fill_plane(queue, plane, source) as u64;
                }
            } else {
                for (plane, desc) in planes.iter_mut().zip(&dequeued.planes) {
                    plane.set_bytes_used(desc.bytes_used as usize);
                }
                let data: Vec<&[u8]> = planes.iter().map(|p| p.data()).collect();
                self.bytes += data.iter().map(|d| d.len() as u64).sum::<u64>();
                sink.consume(&data);
            }
        }
        log::trace!("{}: serviced buffer {} seq {}", queue, index, dequeued.sequence);

        device.queue_buffer(queue, memory, index, &buffer.descriptors(output))?;
        buffer.transition(Ownership::DeviceOwned)?;
        self.serviced += 1;
        Ok(Progress::Progressed)
    }

    fn read_frame<D: Device>(&mut self, device: &D, sink: &mut dyn Sink) -> Result<Progress, Error> {
        let buffer = self.pool.buffer_mut(0)?;
        let Some(planes) = buffer.planes_mut() else {
            return Ok(Progress::WouldBlock);
        };
        let Some(n) = device.read(planes[0].memory_mut())? else {
            return Ok(Progress::WouldBlock);
        };
        planes[0].set_bytes_used(n);
        sink.consume(&[planes[0].data()]);
        self.bytes += n as u64;
        self.serviced += 1;
        Ok(Progress::Progressed)
    }

    /// Writes the pending chunk, refilling it from `source` once it has been
    /// fully accepted by the device.
    fn write_chunk<D: Device>(
        &mut self,
        device: &D,
        source: &mut dyn Source,
    ) -> Result<Progress, Error> {
        let buffer = self.pool.buffer_mut(0)?;
        let Some(planes) = buffer.planes_mut() else {
            return Ok(Progress::WouldBlock);
        };
        let plane = &mut planes[0];
        if plane.bytes_used() == 0 {
            let n = source.supply(plane.memory_mut());
            plane.set_bytes_used(n);
            self.bytes += plane.bytes_used() as u64;
        }

        let pending = plane.bytes_used();
        if pending == 0 {
            return Ok(Progress::WouldBlock);
        }
        let Some(written) = device.write(plane.data())? else {
            return Ok(Progress::WouldBlock);
        };
        let written = written.min(pending);
        plane.memory_mut().copy_within(written..pending, 0);
        plane.set_bytes_used(pending - written);
        self.serviced += 1;
        Ok(Progress::Progressed)
    }

    /// Swaps in a freshly negotiated format and pool, returning the old pool
    /// for release. Only valid while the stream is stopped.
    pub(crate) fn replace(&mut self, format: Format, pool: BufferPool) -> BufferPool {
        debug_assert!(!self.streaming);
        self.format = format;
        std::mem::replace(&mut self.pool, pool)
    }

    pub(crate) fn pool_mut(&mut self) -> &mut BufferPool {
        &mut self.pool
    }
}

/// Refills one output plane and records how much the source supplied.
fn fill_plane(queue: QueueType, plane: &mut Plane, source: &mut dyn Source) -> usize {
    let n = source.supply(plane.memory_mut());
    if n < plane.length() {
        log::warn!("{}: short read {} instead of {}", queue, n, plane.length());
    }
    plane.set_bytes_used(n);
    plane.bytes_used()
}

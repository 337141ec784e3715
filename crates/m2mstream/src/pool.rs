// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Buffer pools
//!
//! A [`BufferPool`] owns the fixed set of buffers of one queue for one memory
//! strategy. Each [`Buffer`] tracks who currently owns it: the device between
//! enqueue and dequeue, the application between dequeue and the next
//! enqueue, and nobody while the queue is idle. The application may only
//! touch plane memory it owns.

use std::fmt;

use crate::device::{Dequeued, Device, Format, PlaneDescriptor, QueueType};
use crate::memory::{MemoryStrategy, PlaneMemory};
use crate::Error;

/// Ownership state of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ownership {
    /// Allocated but not queued.
    Free,
    /// Queued on the device; the application must not touch it.
    DeviceOwned,
    /// Dequeued and being serviced by the application.
    ApplicationOwned,
}

impl Ownership {
    fn can_become(self, next: Ownership) -> bool {
        matches!(
            (self, next),
            (Ownership::Free, Ownership::DeviceOwned)
                | (Ownership::ApplicationOwned, Ownership::DeviceOwned)
                | (Ownership::DeviceOwned, Ownership::ApplicationOwned)
        )
    }
}

impl fmt::Display for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ownership::Free => write!(f, "free"),
            Ownership::DeviceOwned => write!(f, "device-owned"),
            Ownership::ApplicationOwned => write!(f, "application-owned"),
        }
    }
}

/// One plane of a buffer and the number of valid bytes in it.
#[derive(Debug)]
pub struct Plane {
    memory: PlaneMemory,
    bytes_used: usize,
}

impl Plane {
    fn new(memory: PlaneMemory) -> Self {
        Plane {
            memory,
            bytes_used: 0,
        }
    }

    pub fn length(&self) -> usize {
        self.memory.len()
    }

    pub fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    pub fn address(&self) -> usize {
        self.memory.address()
    }

    /// The valid bytes of the plane.
    pub fn data(&self) -> &[u8] {
        &self.memory.as_slice()[..self.bytes_used]
    }

    pub(crate) fn memory_mut(&mut self) -> &mut [u8] {
        self.memory.as_mut_slice()
    }

    pub(crate) fn set_bytes_used(&mut self, bytes_used: usize) {
        self.bytes_used = bytes_used.min(self.length());
    }

    fn descriptor(&self, direction_is_output: bool) -> PlaneDescriptor {
        let bytes_used = if direction_is_output { self.bytes_used } else { 0 };
        PlaneDescriptor {
            bytes_used: u32::try_from(bytes_used).unwrap_or(u32::MAX),
            length: u32::try_from(self.length()).unwrap_or(u32::MAX),
            userptr: self.address(),
        }
    }
}

/// A buffer of the pool: an index plus one memory region per plane.
#[derive(Debug)]
pub struct Buffer {
    index: u32,
    planes: Vec<Plane>,
    state: Ownership,
}

impl Buffer {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn state(&self) -> Ownership {
        self.state
    }

    pub fn num_planes(&self) -> usize {
        self.planes.len()
    }

    /// Plane access, denied while the device owns the buffer.
    pub fn planes(&self) -> Option<&[Plane]> {
        match self.state {
            Ownership::DeviceOwned => None,
            _ => Some(&self.planes),
        }
    }

    pub(crate) fn planes_mut(&mut self) -> Option<&mut [Plane]> {
        match self.state {
            Ownership::DeviceOwned => None,
            _ => Some(&mut self.planes),
        }
    }

    /// Moves the buffer to `next`, rejecting transitions that break the
    /// queue/dequeue handoff.
    pub(crate) fn transition(&mut self, next: Ownership) -> Result<(), Error> {
        if !self.state.can_become(next) {
            return Err(Error::Ownership {
                index: self.index,
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Returns the buffer to `Free` after the device dropped its queue.
    pub(crate) fn reclaim(&mut self) {
        self.state = Ownership::Free;
    }

    pub(crate) fn descriptors(&self, output: bool) -> Vec<PlaneDescriptor> {
        self.planes.iter().map(|p| p.descriptor(output)).collect()
    }

    fn matches(&self, dequeued: &Dequeued) -> bool {
        self.planes.len() == dequeued.planes.len()
            && self.planes.iter().zip(&dequeued.planes).all(|(plane, desc)| {
                plane.address() == desc.userptr && plane.length() == desc.length as usize
            })
    }

    fn release(self) -> Result<(), Error> {
        for plane in self.planes {
            plane.memory.release()?;
        }
        Ok(())
    }
}

/// The buffers of one queue.
#[derive(Debug)]
pub struct BufferPool {
    queue: QueueType,
    memory: MemoryStrategy,
    buffers: Vec<Buffer>,
}

impl BufferPool {
    /// Buffer count requested for user-pointer streaming.
    pub const USERPTR_COUNT: u32 = 4;

    /// Fewest buffers that can keep a queue streaming.
    pub const MIN_BUFFERS: u32 = 2;

    /// An empty pool for `queue`, filled by [`acquire`](Self::acquire).
    pub fn new(queue: QueueType, memory: MemoryStrategy) -> Self {
        BufferPool {
            queue,
            memory,
            buffers: Vec::new(),
        }
    }

    /// Asks the device for `desired` buffers and returns how many to use.
    ///
    /// Copy I/O has no device pool and always uses a single buffer. User
    /// pointer pools use [`USERPTR_COUNT`](Self::USERPTR_COUNT) buffers even
    /// when the driver grants more.
    pub fn negotiate<D: Device>(
        device: &D,
        queue: QueueType,
        memory: MemoryStrategy,
        desired: u32,
    ) -> Result<u32, Error> {
        let desired = match memory {
            MemoryStrategy::Copy => return Ok(1),
            MemoryStrategy::Mapped => desired,
            MemoryStrategy::UserPtr => Self::USERPTR_COUNT,
        };

        let granted = match device.request_buffers(queue, memory, desired) {
            Ok(granted) => granted,
            Err(err) if err.errno() == Some(nix::errno::Errno::EINVAL) => {
                return Err(Error::NotSupported(format!(
                    "{} does not support {} streaming",
                    queue, memory
                )))
            }
            Err(err) => return Err(err),
        };

        if granted < Self::MIN_BUFFERS {
            return Err(Error::InsufficientBuffers {
                queue,
                count: granted,
            });
        }

        log::debug!("{}: {} {} buffers granted", queue, granted, memory);
        match memory {
            MemoryStrategy::UserPtr => Ok(granted.min(Self::USERPTR_COUNT)),
            _ => Ok(granted),
        }
    }

    /// Produces buffer `index`: mapped from the device for memory-mapped
    /// streaming, or freshly allocated for the other strategies.
    pub fn acquire<D: Device>(
        &self,
        device: &D,
        index: u32,
        format: &Format,
    ) -> Result<Buffer, Error> {
        let planes = match self.memory {
            MemoryStrategy::Mapped => {
                let layouts = device.query_buffer(self.queue, index, format.num_planes())?;
                let mut planes = Vec::with_capacity(layouts.len());
                for layout in layouts {
                    planes.push(Plane::new(device.map_plane(layout)?));
                }
                planes
            }
            MemoryStrategy::Copy | MemoryStrategy::UserPtr => {
                let mut planes = Vec::with_capacity(format.num_planes());
                for plane in &format.planes {
                    if plane.size_image == 0 {
                        return Err(Error::InvalidFormat(format!(
                            "{} plane with no image size",
                            self.queue
                        )));
                    }
                    planes.push(Plane::new(PlaneMemory::heap(plane.size_image as usize)?));
                }
                planes
            }
        };

        Ok(Buffer {
            index,
            planes,
            state: Ownership::Free,
        })
    }

    /// Negotiates a pool with the device and acquires all of its buffers.
    pub fn allocate<D: Device>(
        device: &D,
        queue: QueueType,
        memory: MemoryStrategy,
        desired: u32,
        format: &Format,
    ) -> Result<Self, Error> {
        let count = Self::negotiate(device, queue, memory, desired)?;
        let mut pool = BufferPool::new(queue, memory);
        for index in 0..count {
            let buffer = pool.acquire(device, index, format)?;
            pool.buffers.push(buffer);
        }
        Ok(pool)
    }

    /// Unmaps or frees every plane of every buffer, then retires the device
    /// pool. Leaves the pool empty.
    pub fn release_all<D: Device>(&mut self, device: &D) -> Result<(), Error> {
        for buffer in self.buffers.drain(..) {
            buffer.release()?;
        }
        if self.memory.is_streaming() {
            device.request_buffers(self.queue, self.memory, 0)?;
        }
        Ok(())
    }

    /// Maps a dequeued buffer back to its pool index.
    ///
    /// User-pointer buffers are matched by address and length of every plane,
    /// the other strategies by the reported index.
    pub fn identify(&self, dequeued: &Dequeued) -> Result<u32, Error> {
        if self.memory == MemoryStrategy::UserPtr {
            return self
                .buffers
                .iter()
                .find(|buffer| buffer.matches(dequeued))
                .map(|buffer| buffer.index)
                .ok_or_else(|| {
                    let plane = dequeued.planes.first().copied().unwrap_or_default();
                    Error::UnknownBuffer {
                        address: plane.userptr,
                        length: plane.length,
                    }
                });
        }

        if (dequeued.index as usize) < self.buffers.len() {
            Ok(dequeued.index)
        } else {
            Err(Error::InvalidIndex {
                index: dequeued.index,
                count: self.buffers.len(),
            })
        }
    }

    pub fn queue(&self) -> QueueType {
        self.queue
    }

    pub fn memory(&self) -> MemoryStrategy {
        self.memory
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn buffers(&self) -> &[Buffer] {
        &self.buffers
    }

    pub fn buffer(&self, index: u32) -> Option<&Buffer> {
        self.buffers.get(index as usize)
    }

    pub(crate) fn buffer_mut(&mut self, index: u32) -> Result<&mut Buffer, Error> {
        let count = self.buffers.len();
        self.buffers
            .get_mut(index as usize)
            .ok_or(Error::InvalidIndex { index, count })
    }

    pub(crate) fn buffers_mut(&mut self) -> &mut [Buffer] {
        &mut self.buffers
    }
}

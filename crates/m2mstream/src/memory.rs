// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Plane memory
//!
//! A buffer plane is backed either by a device mapping (memory-mapped
//! streaming) or by memory the application allocated itself (copy I/O and
//! user-pointer streaming). [`PlaneMemory`] hides the difference from the
//! rest of the engine.

use std::fmt;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;

use nix::sys::mman::munmap;

use crate::Error;

/// How buffer memory is exchanged with the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryStrategy {
    /// `read()`/`write()` into a single application buffer.
    Copy,
    /// Device-allocated buffers mapped into the process.
    #[default]
    Mapped,
    /// Application-allocated buffers passed to the device by address.
    UserPtr,
}

impl MemoryStrategy {
    /// `true` when buffers are exchanged through the device queues.
    pub fn is_streaming(self) -> bool {
        !matches!(self, MemoryStrategy::Copy)
    }

    pub fn name(self) -> &'static str {
        match self {
            MemoryStrategy::Copy => "read",
            MemoryStrategy::Mapped => "mmap",
            MemoryStrategy::UserPtr => "userptr",
        }
    }
}

impl fmt::Display for MemoryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A shared read/write mapping of a device buffer plane, unmapped on drop.
pub struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

// The mapping is plain memory owned exclusively by this handle.
unsafe impl Send for Mapping {}

impl Mapping {
    /// # Safety
    ///
    /// `ptr` must be the start of a live mapping of exactly `len` bytes that
    /// nothing else unmaps.
    pub(crate) unsafe fn from_raw(ptr: NonNull<u8>, len: usize) -> Self {
        Mapping { ptr, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr/len describe a live mapping owned by self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: ptr/len describe a live mapping owned by self.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Unmaps now, reporting failure instead of swallowing it in drop.
    pub fn unmap(self) -> Result<(), Error> {
        let this = ManuallyDrop::new(self);
        // SAFETY: the mapping is owned by this handle and never used again.
        unsafe { munmap(this.ptr.cast(), this.len) }.map_err(|errno| Error::os("munmap", errno))
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: the mapping is owned by this handle and never used again.
        if let Err(errno) = unsafe { munmap(self.ptr.cast(), self.len) } {
            log::warn!("munmap of {} bytes failed: {}", self.len, errno);
        }
    }
}

impl fmt::Debug for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapping")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

/// Memory backing one buffer plane.
#[derive(Debug)]
pub enum PlaneMemory {
    Mapped(Mapping),
    Heap(Box<[u8]>),
}

impl PlaneMemory {
    /// Allocates zeroed application memory, failing instead of aborting
    /// when the allocation cannot be satisfied.
    pub fn heap(len: usize) -> Result<Self, Error> {
        let mut data = Vec::new();
        data.try_reserve_exact(len)?;
        data.resize(len, 0);
        Ok(PlaneMemory::Heap(data.into_boxed_slice()))
    }

    pub fn len(&self) -> usize {
        match self {
            PlaneMemory::Mapped(mapping) => mapping.len(),
            PlaneMemory::Heap(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start address, as handed to the device for user-pointer memory.
    pub fn address(&self) -> usize {
        self.as_slice().as_ptr() as usize
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            PlaneMemory::Mapped(mapping) => mapping.as_slice(),
            PlaneMemory::Heap(data) => data,
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            PlaneMemory::Mapped(mapping) => mapping.as_mut_slice(),
            PlaneMemory::Heap(data) => data,
        }
    }

    /// Returns the memory to its owner.
    pub fn release(self) -> Result<(), Error> {
        match self {
            PlaneMemory::Mapped(mapping) => mapping.unmap(),
            PlaneMemory::Heap(_) => Ok(()),
        }
    }
}

// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! [`Device`] implementation for V4L2 character device nodes.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::num::NonZeroUsize;
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::errno::Errno;
use nix::libc::{self, c_int, c_ulong};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::mman::{mmap, MapFlags, ProtFlags};
use v4l2r::bindings::{
    v4l2_buffer, v4l2_capability, v4l2_crop, v4l2_cropcap, v4l2_event, v4l2_event_subscription,
    v4l2_format, v4l2_memory_V4L2_MEMORY_MMAP, v4l2_memory_V4L2_MEMORY_USERPTR, v4l2_plane,
    v4l2_requestbuffers, VIDEO_MAX_PLANES,
};

use super::capabilities::Capabilities;
use super::ioctl::{self, retry};
use crate::device::{
    Dequeued, Device, DeviceEvent, EventKind, Format, Interest, PlaneDescriptor, PlaneFormat,
    PlaneLayout, QueueType, Readiness,
};
use crate::fourcc::FourCC;
use crate::memory::{Mapping, MemoryStrategy, PlaneMemory};
use crate::Error;

const MAX_PLANES: usize = VIDEO_MAX_PLANES as usize;

/// An open V4L2 video node, in non-blocking mode.
///
/// ```no_run
/// use m2mstream::device::Device;
/// use m2mstream::v4l2::V4l2Device;
///
/// let device = V4l2Device::open("/dev/video0")?;
/// println!("{}", device.query_capabilities()?);
/// # Ok::<(), m2mstream::Error>(())
/// ```
#[derive(Debug)]
pub struct V4l2Device {
    file: File,
    path: PathBuf,
}

impl V4l2Device {
    /// Opens `path` read/write and non-blocking. Fails with
    /// [`Error::NotSupported`] when the path is not a character device.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path)?;
        if !metadata.file_type().is_char_device() {
            return Err(Error::NotSupported(format!(
                "{} is no device",
                path.display()
            )));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)?;
        log::debug!("opened {}", path.display());

        Ok(V4l2Device {
            file,
            path: path.to_owned(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    fn raw_format(&self, queue: QueueType) -> Result<v4l2_format, Error> {
        let mut raw = v4l2_format {
            type_: queue.as_raw(),
            ..Default::default()
        };
        // SAFETY: raw is a valid v4l2_format for the duration of the call.
        retry(|| unsafe { ioctl::vidioc_g_fmt(self.fd(), &mut raw) })
            .map_err(|errno| Error::os("VIDIOC_G_FMT", errno))?;
        Ok(raw)
    }
}

fn memory_type(memory: MemoryStrategy) -> Result<u32, Error> {
    match memory {
        MemoryStrategy::Mapped => Ok(v4l2_memory_V4L2_MEMORY_MMAP),
        MemoryStrategy::UserPtr => Ok(v4l2_memory_V4L2_MEMORY_USERPTR),
        MemoryStrategy::Copy => Err(Error::NotSupported(
            "read/write i/o has no buffer queue".to_owned(),
        )),
    }
}

fn format_from_raw(queue: QueueType, raw: &v4l2_format) -> Format {
    if queue.is_multi_planar() {
        // SAFETY: the driver fills pix_mp for multi-planar buffer types.
        let pix = unsafe { raw.fmt.pix_mp };
        let plane_fmt = pix.plane_fmt;
        let count = usize::from(pix.num_planes).clamp(1, MAX_PLANES);
        Format {
            width: pix.width,
            height: pix.height,
            pixel_format: FourCC::from(pix.pixelformat),
            field: pix.field,
            planes: plane_fmt[..count]
                .iter()
                .map(|p| PlaneFormat {
                    bytes_per_line: p.bytesperline,
                    size_image: p.sizeimage,
                })
                .collect(),
        }
    } else {
        // SAFETY: the driver fills pix for single-planar buffer types.
        let pix = unsafe { raw.fmt.pix };
        Format {
            width: pix.width,
            height: pix.height,
            pixel_format: FourCC::from(pix.pixelformat),
            field: pix.field,
            planes: vec![PlaneFormat {
                bytes_per_line: pix.bytesperline,
                size_image: pix.sizeimage,
            }],
        }
    }
}

fn apply_format(raw: &mut v4l2_format, queue: QueueType, format: &Format) {
    if queue.is_multi_planar() {
        // SAFETY: raw was filled by VIDIOC_G_FMT for this queue type.
        let mut pix = unsafe { raw.fmt.pix_mp };
        pix.width = format.width;
        pix.height = format.height;
        pix.pixelformat = format.pixel_format.into();
        pix.field = format.field;
        let mut plane_fmt = pix.plane_fmt;
        for (i, plane) in format.planes.iter().take(MAX_PLANES).enumerate() {
            plane_fmt[i].bytesperline = plane.bytes_per_line;
            plane_fmt[i].sizeimage = plane.size_image;
        }
        pix.plane_fmt = plane_fmt;
        pix.num_planes = format.planes.len().min(MAX_PLANES) as u8;
        raw.fmt.pix_mp = pix;
    } else {
        // SAFETY: raw was filled by VIDIOC_G_FMT for this queue type.
        let mut pix = unsafe { raw.fmt.pix };
        pix.width = format.width;
        pix.height = format.height;
        pix.pixelformat = format.pixel_format.into();
        pix.field = format.field;
        if let Some(plane) = format.planes.first() {
            pix.bytesperline = plane.bytes_per_line;
            pix.sizeimage = plane.size_image;
        }
        raw.fmt.pix = pix;
    }
}

/// Converts a readiness timeout to whole poll milliseconds, rounding up so a
/// sub-millisecond timeout still waits. Timeouts beyond `i32::MAX`
/// milliseconds cannot be expressed and are rejected.
fn poll_millis(timeout: Duration) -> Result<i32, Error> {
    let millis = (timeout.as_nanos() + 999_999) / 1_000_000;
    i32::try_from(millis).map_err(|_| Error::os("poll", Errno::EINVAL))
}

impl Device for V4l2Device {
    fn query_capabilities(&self) -> Result<Capabilities, Error> {
        let mut cap = v4l2_capability::default();
        // SAFETY: cap is a valid v4l2_capability for the duration of the call.
        retry(|| unsafe { ioctl::vidioc_querycap(self.fd(), &mut cap) })
            .map_err(|errno| Error::os("VIDIOC_QUERYCAP", errno))?;
        Ok(Capabilities::from_raw(&cap))
    }

    fn reset_crop(&self, queue: QueueType) -> Result<(), Error> {
        let mut cropcap = v4l2_cropcap {
            type_: queue.as_raw(),
            ..Default::default()
        };
        // SAFETY: cropcap is a valid v4l2_cropcap for the duration of the call.
        retry(|| unsafe { ioctl::vidioc_cropcap(self.fd(), &mut cropcap) })
            .map_err(|errno| Error::os("VIDIOC_CROPCAP", errno))?;

        let crop = v4l2_crop {
            type_: queue.as_raw(),
            c: cropcap.defrect,
        };
        // SAFETY: crop is a valid v4l2_crop for the duration of the call.
        retry(|| unsafe { ioctl::vidioc_s_crop(self.fd(), &crop) })
            .map_err(|errno| Error::os("VIDIOC_S_CROP", errno))?;
        Ok(())
    }

    fn get_format(&self, queue: QueueType) -> Result<Format, Error> {
        let raw = self.raw_format(queue)?;
        Ok(format_from_raw(queue, &raw))
    }

    fn set_format(&self, queue: QueueType, format: &Format) -> Result<Format, Error> {
        // Start from the current format so fields we don't model are kept.
        let mut raw = self.raw_format(queue)?;
        apply_format(&mut raw, queue, format);
        // SAFETY: raw is a valid v4l2_format for the duration of the call.
        retry(|| unsafe { ioctl::vidioc_s_fmt(self.fd(), &mut raw) })
            .map_err(|errno| Error::os("VIDIOC_S_FMT", errno))?;
        Ok(format_from_raw(queue, &raw))
    }

    fn request_buffers(
        &self,
        queue: QueueType,
        memory: MemoryStrategy,
        count: u32,
    ) -> Result<u32, Error> {
        let mut req = v4l2_requestbuffers {
            count,
            type_: queue.as_raw(),
            memory: memory_type(memory)?,
            ..Default::default()
        };
        // SAFETY: req is a valid v4l2_requestbuffers for the duration of the call.
        retry(|| unsafe { ioctl::vidioc_reqbufs(self.fd(), &mut req) })
            .map_err(|errno| Error::os("VIDIOC_REQBUFS", errno))?;
        Ok(req.count)
    }

    fn query_buffer(
        &self,
        queue: QueueType,
        index: u32,
        num_planes: usize,
    ) -> Result<Vec<PlaneLayout>, Error> {
        let mut planes = [v4l2_plane::default(); MAX_PLANES];
        let num_planes = num_planes.min(MAX_PLANES);
        let mut buf = v4l2_buffer {
            index,
            type_: queue.as_raw(),
            memory: v4l2_memory_V4L2_MEMORY_MMAP,
            ..Default::default()
        };
        if queue.is_multi_planar() {
            buf.length = num_planes as u32;
            buf.m.planes = planes.as_mut_ptr();
        }

        // SAFETY: buf and the plane array it points to outlive the call.
        retry(|| unsafe { ioctl::vidioc_querybuf(self.fd(), &mut buf) })
            .map_err(|errno| Error::os("VIDIOC_QUERYBUF", errno))?;

        if queue.is_multi_planar() {
            let count = (buf.length as usize).min(num_planes);
            Ok(planes[..count]
                .iter()
                .map(|p| PlaneLayout {
                    length: p.length,
                    // SAFETY: mem_offset is the member filled for MMAP buffers.
                    offset: unsafe { p.m.mem_offset },
                })
                .collect())
        } else {
            Ok(vec![PlaneLayout {
                length: buf.length,
                // SAFETY: offset is the member filled for MMAP buffers.
                offset: unsafe { buf.m.offset },
            }])
        }
    }

    fn map_plane(&self, layout: PlaneLayout) -> Result<PlaneMemory, Error> {
        let length = NonZeroUsize::new(layout.length as usize)
            .ok_or_else(|| Error::InvalidFormat("driver reported a zero-length plane".into()))?;
        // SAFETY: a fresh shared mapping of the device at a driver-provided
        // offset, owned by the returned Mapping.
        let ptr = unsafe {
            mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                self.file.as_fd(),
                layout.offset as libc::off_t,
            )
        }
        .map_err(|errno| Error::os("mmap", errno))?;
        log::trace!("mapped {} bytes at offset {:#x}", length, layout.offset);
        // SAFETY: ptr is the start of the mapping of exactly `length` bytes.
        Ok(PlaneMemory::Mapped(unsafe {
            Mapping::from_raw(ptr.cast(), length.get())
        }))
    }

    fn queue_buffer(
        &self,
        queue: QueueType,
        memory: MemoryStrategy,
        index: u32,
        planes: &[PlaneDescriptor],
    ) -> Result<(), Error> {
        let userptr = memory == MemoryStrategy::UserPtr;
        let mut raw_planes = [v4l2_plane::default(); MAX_PLANES];
        let mut buf = v4l2_buffer {
            index,
            type_: queue.as_raw(),
            memory: memory_type(memory)?,
            ..Default::default()
        };

        if queue.is_multi_planar() {
            let count = planes.len().min(MAX_PLANES);
            for (raw, desc) in raw_planes.iter_mut().zip(&planes[..count]) {
                raw.bytesused = desc.bytes_used;
                raw.length = desc.length;
                if userptr {
                    raw.m.userptr = desc.userptr as c_ulong;
                }
            }
            buf.length = count as u32;
            buf.m.planes = raw_planes.as_mut_ptr();
        } else if let Some(desc) = planes.first() {
            buf.bytesused = desc.bytes_used;
            if userptr {
                buf.m.userptr = desc.userptr as c_ulong;
                buf.length = desc.length;
            }
        }

        // SAFETY: buf and the plane array it points to outlive the call.
        retry(|| unsafe { ioctl::vidioc_qbuf(self.fd(), &mut buf) })
            .map_err(|errno| Error::os("VIDIOC_QBUF", errno))?;
        Ok(())
    }

    fn dequeue_buffer(
        &self,
        queue: QueueType,
        memory: MemoryStrategy,
        num_planes: usize,
    ) -> Result<Option<Dequeued>, Error> {
        let userptr = memory == MemoryStrategy::UserPtr;
        let num_planes = num_planes.min(MAX_PLANES);
        let mut raw_planes = [v4l2_plane::default(); MAX_PLANES];
        let mut buf = v4l2_buffer {
            type_: queue.as_raw(),
            memory: memory_type(memory)?,
            ..Default::default()
        };
        if queue.is_multi_planar() {
            buf.length = num_planes as u32;
            buf.m.planes = raw_planes.as_mut_ptr();
        }

        // SAFETY: buf and the plane array it points to outlive the call.
        match retry(|| unsafe { ioctl::vidioc_dqbuf(self.fd(), &mut buf) }) {
            Ok(_) => {}
            Err(Errno::EAGAIN) => return Ok(None),
            Err(errno) => return Err(Error::os("VIDIOC_DQBUF", errno)),
        }

        let planes = if queue.is_multi_planar() {
            let count = (buf.length as usize).min(num_planes);
            raw_planes[..count]
                .iter()
                .map(|p| PlaneDescriptor {
                    bytes_used: p.bytesused,
                    length: p.length,
                    // SAFETY: userptr is the member filled for USERPTR buffers.
                    userptr: if userptr {
                        (unsafe { p.m.userptr }) as usize
                    } else {
                        0
                    },
                })
                .collect()
        } else {
            vec![PlaneDescriptor {
                bytes_used: buf.bytesused,
                length: buf.length,
                // SAFETY: userptr is the member filled for USERPTR buffers.
                userptr: if userptr {
                    (unsafe { buf.m.userptr }) as usize
                } else {
                    0
                },
            }]
        };

        Ok(Some(Dequeued {
            index: buf.index,
            sequence: buf.sequence,
            planes,
        }))
    }

    fn stream_on(&self, queue: QueueType) -> Result<(), Error> {
        let ty = queue.as_raw() as c_int;
        // SAFETY: ty is a valid c_int for the duration of the call.
        retry(|| unsafe { ioctl::vidioc_streamon(self.fd(), &ty) })
            .map_err(|errno| Error::os("VIDIOC_STREAMON", errno))?;
        Ok(())
    }

    fn stream_off(&self, queue: QueueType) -> Result<(), Error> {
        let ty = queue.as_raw() as c_int;
        // SAFETY: ty is a valid c_int for the duration of the call.
        retry(|| unsafe { ioctl::vidioc_streamoff(self.fd(), &ty) })
            .map_err(|errno| Error::os("VIDIOC_STREAMOFF", errno))?;
        Ok(())
    }

    fn subscribe_event(&self, kind: EventKind) -> Result<(), Error> {
        let sub = v4l2_event_subscription {
            type_: kind.as_raw(),
            ..Default::default()
        };
        // SAFETY: sub is a valid v4l2_event_subscription for the duration of the call.
        retry(|| unsafe { ioctl::vidioc_subscribe_event(self.fd(), &sub) })
            .map_err(|errno| Error::os("VIDIOC_SUBSCRIBE_EVENT", errno))?;
        Ok(())
    }

    fn dequeue_event(&self) -> Result<Option<DeviceEvent>, Error> {
        let mut event = v4l2_event::default();
        // SAFETY: event is a valid v4l2_event for the duration of the call.
        match retry(|| unsafe { ioctl::vidioc_dqevent(self.fd(), &mut event) }) {
            Ok(_) => {}
            Err(Errno::ENOENT) => return Ok(None),
            Err(errno) => return Err(Error::os("VIDIOC_DQEVENT", errno)),
        }
        // SAFETY: every member of the payload union is plain data, and
        // `changes` is only meaningful for source change events.
        let changes = unsafe { event.u.src_change.changes };
        Ok(Some(DeviceEvent::from_raw(event.type_, changes)))
    }

    fn read(&self, buf: &mut [u8]) -> Result<Option<usize>, Error> {
        loop {
            match (&self.file).read(buf) {
                Ok(n) => return Ok(Some(n)),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(err) => return Err(Error::Io(err)),
            }
        }
    }

    fn write(&self, buf: &[u8]) -> Result<Option<usize>, Error> {
        loop {
            match (&self.file).write(buf) {
                Ok(n) => return Ok(Some(n)),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(err) => return Err(Error::Io(err)),
            }
        }
    }

    fn wait(&self, interest: Interest, timeout: Duration) -> Result<Readiness, Error> {
        let mut events = PollFlags::empty();
        if interest.capture {
            events |= PollFlags::POLLIN;
        }
        if interest.output {
            events |= PollFlags::POLLOUT;
        }
        if interest.events {
            events |= PollFlags::POLLPRI;
        }

        let mut fds = [PollFd::new(self.file.as_fd(), events)];
        let millis = poll_millis(timeout)?;
        let timeout = PollTimeout::try_from(millis).map_err(|_| Error::os("poll", Errno::EINVAL))?;
        let ready = poll(&mut fds, timeout)
            .map_err(|errno| Error::os("select", errno))?;
        if ready == 0 {
            return Ok(Readiness::default());
        }

        let revents = fds[0].revents().unwrap_or(PollFlags::empty());
        // An error condition makes both queues "ready" so the next dequeue
        // reports the actual failure.
        let failed = revents.intersects(PollFlags::POLLERR);
        Ok(Readiness {
            capture: interest.capture && (failed || revents.intersects(PollFlags::POLLIN)),
            output: interest.output && (failed || revents.intersects(PollFlags::POLLOUT)),
            events: interest.events && revents.intersects(PollFlags::POLLPRI),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use v4l2r::bindings::{v4l2_field_V4L2_FIELD_NONE, v4l2_pix_format};

    #[test]
    fn test_open_rejects_regular_file() {
        let path = std::env::temp_dir().join(format!("m2mstream-not-a-device-{}", std::process::id()));
        std::fs::write(&path, b"x").unwrap();
        let err = V4l2Device::open(&path).unwrap_err();
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(err, Error::NotSupported(_)));
    }

    #[test]
    fn test_open_missing_path() {
        let err = V4l2Device::open("/dev/m2mstream-does-not-exist").unwrap_err();
        match err {
            Error::Io(err) => assert_eq!(err.kind(), io::ErrorKind::NotFound),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_format_round_trip_through_raw_mplane() {
        let mut raw = v4l2_format {
            type_: QueueType::VideoCaptureMplane.as_raw(),
            ..Default::default()
        };
        let mut format = Format::new(1920, 1080, FourCC::YUV420);
        format.planes = vec![
            PlaneFormat {
                bytes_per_line: 1920,
                size_image: 1920 * 1080,
            },
            PlaneFormat {
                bytes_per_line: 960,
                size_image: 960 * 540 * 2,
            },
        ];
        apply_format(&mut raw, QueueType::VideoCaptureMplane, &format);
        assert_eq!(format_from_raw(QueueType::VideoCaptureMplane, &raw), format);
    }

    #[test]
    fn test_format_from_raw_single_planar() {
        let mut raw = v4l2_format {
            type_: QueueType::VideoCapture.as_raw(),
            ..Default::default()
        };
        raw.fmt.pix = v4l2_pix_format {
            width: 640,
            height: 480,
            pixelformat: FourCC::YUV420.into(),
            field: v4l2_field_V4L2_FIELD_NONE,
            bytesperline: 640,
            sizeimage: 640 * 480 * 3 / 2,
            ..Default::default()
        };
        let format = format_from_raw(QueueType::VideoCapture, &raw);
        assert_eq!(format.resolution().to_string(), "640x480");
        assert_eq!(format.planes.len(), 1);
        assert_eq!(format.planes[0].size_image, 460800);
    }

    #[test]
    fn test_copy_strategy_has_no_memory_type() {
        assert!(memory_type(MemoryStrategy::Copy).is_err());
        assert_eq!(memory_type(MemoryStrategy::UserPtr).unwrap(), 2);
    }

    #[test]
    fn test_poll_millis_keeps_long_timeouts() {
        assert_eq!(poll_millis(Duration::from_secs(120)).unwrap(), 120_000);
        assert_eq!(poll_millis(Duration::from_secs(10)).unwrap(), 10_000);
        assert_eq!(poll_millis(Duration::from_micros(1)).unwrap(), 1);
        assert_eq!(poll_millis(Duration::ZERO).unwrap(), 0);
        assert!(PollTimeout::try_from(poll_millis(Duration::from_secs(120)).unwrap()).is_ok());
    }

    #[test]
    fn test_poll_millis_rejects_unrepresentable_timeouts() {
        let err = poll_millis(Duration::from_secs(3_000_000)).unwrap_err();
        assert_eq!(err.errno(), Some(Errno::EINVAL));
    }
}

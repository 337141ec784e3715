// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Raw V4L2 ioctl entry points.
//!
//! Each wrapper is generated by `nix` from the request number and the size of
//! the argument structure taken from `v4l2r`'s generated uAPI bindings.

use nix::errno::Errno;
use nix::libc::c_int;

use v4l2r::bindings::{
    v4l2_buffer, v4l2_capability, v4l2_crop, v4l2_cropcap, v4l2_event, v4l2_event_subscription,
    v4l2_format, v4l2_requestbuffers,
};

nix::ioctl_read!(vidioc_querycap, b'V', 0, v4l2_capability);
nix::ioctl_readwrite!(vidioc_g_fmt, b'V', 4, v4l2_format);
nix::ioctl_readwrite!(vidioc_s_fmt, b'V', 5, v4l2_format);
nix::ioctl_readwrite!(vidioc_reqbufs, b'V', 8, v4l2_requestbuffers);
nix::ioctl_readwrite!(vidioc_querybuf, b'V', 9, v4l2_buffer);
nix::ioctl_readwrite!(vidioc_qbuf, b'V', 15, v4l2_buffer);
nix::ioctl_readwrite!(vidioc_dqbuf, b'V', 17, v4l2_buffer);
nix::ioctl_write_ptr!(vidioc_streamon, b'V', 18, c_int);
nix::ioctl_write_ptr!(vidioc_streamoff, b'V', 19, c_int);
nix::ioctl_readwrite!(vidioc_cropcap, b'V', 58, v4l2_cropcap);
nix::ioctl_write_ptr!(vidioc_s_crop, b'V', 60, v4l2_crop);
nix::ioctl_read!(vidioc_dqevent, b'V', 89, v4l2_event);
nix::ioctl_write_ptr!(vidioc_subscribe_event, b'V', 90, v4l2_event_subscription);

/// Retries `f` for as long as it fails with `EINTR`.
pub fn retry<T>(mut f: impl FnMut() -> nix::Result<T>) -> nix::Result<T> {
    loop {
        match f() {
            Err(Errno::EINTR) => continue,
            other => return other,
        }
    }
}

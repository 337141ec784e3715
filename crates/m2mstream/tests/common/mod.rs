// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies
//
// In-memory device used by the integration tests.
//
// FakeDevice models the parts of a V4L2 M2M driver the streaming engine
// relies on: buffers queued on a streaming queue complete in FIFO order,
// STREAMOFF returns every queued buffer, events are delivered from a FIFO,
// and readiness is derived from queue state unless a test scripts it.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use m2mstream::device::{
    Dequeued, Device, DeviceEvent, EventKind, Format, Interest, PlaneDescriptor, PlaneFormat,
    PlaneLayout, QueueType, Readiness,
};
use m2mstream::fourcc::FourCC;
use m2mstream::memory::{MemoryStrategy, PlaneMemory};
use m2mstream::v4l2::bindings::{
    V4L2_CAP_READWRITE, V4L2_CAP_STREAMING, V4L2_CAP_VIDEO_CAPTURE, V4L2_CAP_VIDEO_M2M_MPLANE,
};
use m2mstream::v4l2::Capabilities;
use m2mstream::Error;
use nix::errno::Errno;

/// A scripted outcome for the next readiness wait.
#[derive(Debug, Clone, Copy)]
pub enum Wait {
    Ready(Readiness),
    Timeout,
    Interrupted,
}

/// Something that happens once the capture queue has produced `after` frames.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub after: u64,
    pub event: DeviceEvent,
    /// Capture format the device switches to when the event fires.
    pub format: Option<Format>,
}

#[derive(Debug)]
pub struct State {
    pub caps: Capabilities,
    pub querycap_error: Option<Errno>,
    pub formats: HashMap<QueueType, Format>,
    /// Geometry the device substitutes for any requested one.
    pub adjust: Option<(u32, u32)>,
    /// Smallest non-zero pool the driver hands out.
    pub min_buffers: u32,
    pub max_buffers: u32,
    pub reqbufs_error: Option<Errno>,
    pub subscribe_error: Option<Errno>,
    pub granted: HashMap<QueueType, u32>,
    pub queued: HashMap<QueueType, VecDeque<(u32, Vec<PlaneDescriptor>)>>,
    pub streaming: HashSet<QueueType>,
    pub events: VecDeque<DeviceEvent>,
    pub subscribed: Vec<EventKind>,
    pub triggers: Vec<Trigger>,
    pub script: VecDeque<Wait>,
    /// Bytes the device reports per captured plane.
    pub payload: u32,
    /// Report a foreign address on user-pointer dequeues.
    pub corrupt_userptr: bool,
    pub captured: u64,
    /// `bytesused` of every output buffer queued, in order.
    pub output_payloads: Vec<u32>,
    pub read_chunks: VecDeque<Vec<u8>>,
    pub written: Vec<u8>,
    pub maps: usize,
    pub waits: Vec<Interest>,
    /// Queue/dequeue history per (queue, index): 'Q' or 'D'.
    pub history: HashMap<(QueueType, u32), String>,
    pub calls: Vec<String>,
}

#[derive(Debug)]
pub struct FakeDevice {
    pub state: RefCell<State>,
}

pub fn m2m_mplane_caps() -> Capabilities {
    Capabilities::new(
        "fake-codec",
        "fake decoder",
        "platform:fake",
        V4L2_CAP_VIDEO_M2M_MPLANE | V4L2_CAP_STREAMING,
    )
}

pub fn camera_caps() -> Capabilities {
    Capabilities::new(
        "fake-cam",
        "fake camera",
        "usb:fake",
        V4L2_CAP_VIDEO_CAPTURE | V4L2_CAP_STREAMING | V4L2_CAP_READWRITE,
    )
}

fn planes_for(width: u32, height: u32, count: usize) -> Vec<PlaneFormat> {
    (0..count)
        .map(|_| PlaneFormat {
            bytes_per_line: width,
            size_image: width * height,
        })
        .collect()
}

pub fn format(width: u32, height: u32, pixel_format: FourCC, planes: usize) -> Format {
    let mut format = Format::new(width, height, pixel_format);
    format.planes = planes_for(width, height, planes);
    format
}

impl FakeDevice {
    pub fn new(caps: Capabilities) -> Self {
        let multi_planar = caps.is_multi_planar();
        let (capture_queue, output_queue, planes) = if multi_planar {
            (QueueType::VideoCaptureMplane, QueueType::VideoOutputMplane, 2)
        } else {
            (QueueType::VideoCapture, QueueType::VideoOutput, 1)
        };
        let mut formats = HashMap::new();
        formats.insert(capture_queue, format(64, 32, FourCC::YUV420, planes));
        formats.insert(output_queue, format(64, 32, FourCC::H264, 1));

        FakeDevice {
            state: RefCell::new(State {
                caps,
                querycap_error: None,
                formats,
                adjust: None,
                min_buffers: 0,
                max_buffers: 8,
                reqbufs_error: None,
                subscribe_error: None,
                granted: HashMap::new(),
                queued: HashMap::new(),
                streaming: HashSet::new(),
                events: VecDeque::new(),
                subscribed: Vec::new(),
                triggers: Vec::new(),
                script: VecDeque::new(),
                payload: 100,
                corrupt_userptr: false,
                captured: 0,
                output_payloads: Vec::new(),
                read_chunks: VecDeque::new(),
                written: Vec::new(),
                maps: 0,
                waits: Vec::new(),
                history: HashMap::new(),
                calls: Vec::new(),
            }),
        }
    }

    pub fn m2m() -> Self {
        FakeDevice::new(m2m_mplane_caps())
    }

    pub fn camera() -> Self {
        FakeDevice::new(camera_caps())
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        f(&mut self.state.borrow_mut())
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    pub fn queued_count(&self, queue: QueueType) -> usize {
        self.state
            .borrow()
            .queued
            .get(&queue)
            .map_or(0, |q| q.len())
    }
}

fn os(call: &'static str, errno: Errno) -> Error {
    Error::Os { call, errno }
}

impl Device for FakeDevice {
    fn query_capabilities(&self) -> Result<Capabilities, Error> {
        let state = self.state.borrow();
        match state.querycap_error {
            Some(errno) => Err(os("VIDIOC_QUERYCAP", errno)),
            None => Ok(state.caps.clone()),
        }
    }

    fn reset_crop(&self, _queue: QueueType) -> Result<(), Error> {
        // Cropping is never supported, negotiation has to carry on.
        Err(os("VIDIOC_CROPCAP", Errno::EINVAL))
    }

    fn get_format(&self, queue: QueueType) -> Result<Format, Error> {
        self.state
            .borrow()
            .formats
            .get(&queue)
            .cloned()
            .ok_or(os("VIDIOC_G_FMT", Errno::EINVAL))
    }

    fn set_format(&self, queue: QueueType, format: &Format) -> Result<Format, Error> {
        let mut state = self.state.borrow_mut();
        let (width, height) = state.adjust.unwrap_or((format.width, format.height));
        let mut applied = format.clone();
        applied.width = width;
        applied.height = height;
        applied.planes = planes_for(width, height, format.planes.len().max(1));
        state.formats.insert(queue, applied.clone());
        state.calls.push(format!("S_FMT {} {}x{}", queue, width, height));
        Ok(applied)
    }

    fn request_buffers(
        &self,
        queue: QueueType,
        memory: MemoryStrategy,
        count: u32,
    ) -> Result<u32, Error> {
        let mut state = self.state.borrow_mut();
        if let Some(errno) = state.reqbufs_error {
            return Err(os("VIDIOC_REQBUFS", errno));
        }
        let granted = if count == 0 {
            0
        } else {
            count.max(state.min_buffers).min(state.max_buffers)
        };
        state.granted.insert(queue, granted);
        state.queued.remove(&queue);
        state.calls.push(format!("REQBUFS {} {} {}", queue, memory, count));
        Ok(granted)
    }

    fn query_buffer(
        &self,
        queue: QueueType,
        index: u32,
        num_planes: usize,
    ) -> Result<Vec<PlaneLayout>, Error> {
        let state = self.state.borrow();
        if index >= state.granted.get(&queue).copied().unwrap_or(0) {
            return Err(os("VIDIOC_QUERYBUF", Errno::EINVAL));
        }
        let format = &state.formats[&queue];
        Ok(format
            .planes
            .iter()
            .take(num_planes)
            .enumerate()
            .map(|(p, plane)| PlaneLayout {
                length: plane.size_image,
                offset: index * 0x10000 + p as u32 * 0x1000,
            })
            .collect())
    }

    fn map_plane(&self, layout: PlaneLayout) -> Result<PlaneMemory, Error> {
        self.state.borrow_mut().maps += 1;
        PlaneMemory::heap(layout.length as usize)
    }

    fn queue_buffer(
        &self,
        queue: QueueType,
        memory: MemoryStrategy,
        index: u32,
        planes: &[PlaneDescriptor],
    ) -> Result<(), Error> {
        let mut state = self.state.borrow_mut();
        if index >= state.granted.get(&queue).copied().unwrap_or(0) {
            return Err(os("VIDIOC_QBUF", Errno::EINVAL));
        }
        let fifo = state.queued.entry(queue).or_default();
        if fifo.iter().any(|(i, _)| *i == index) {
            // Queueing a buffer the driver already owns.
            return Err(os("VIDIOC_QBUF", Errno::EINVAL));
        }
        if memory == MemoryStrategy::UserPtr && planes.iter().any(|p| p.userptr == 0) {
            return Err(os("VIDIOC_QBUF", Errno::EFAULT));
        }
        fifo.push_back((index, planes.to_vec()));
        if queue.direction() == m2mstream::device::Direction::Output {
            let total = planes.iter().map(|p| p.bytes_used).sum();
            state.output_payloads.push(total);
        }
        state
            .history
            .entry((queue, index))
            .or_default()
            .push('Q');
        Ok(())
    }

    fn dequeue_buffer(
        &self,
        queue: QueueType,
        memory: MemoryStrategy,
        _num_planes: usize,
    ) -> Result<Option<Dequeued>, Error> {
        let mut state = self.state.borrow_mut();
        if !state.streaming.contains(&queue) {
            return Err(os("VIDIOC_DQBUF", Errno::EINVAL));
        }
        let Some((index, mut planes)) = state.queued.get_mut(&queue).and_then(|q| q.pop_front())
        else {
            return Ok(None);
        };

        let capture = queue.direction() == m2mstream::device::Direction::Capture;
        let payload = state.payload;
        for plane in &mut planes {
            if capture {
                plane.bytes_used = payload.min(plane.length);
            }
            if memory != MemoryStrategy::UserPtr {
                plane.userptr = 0;
            } else if state.corrupt_userptr {
                plane.userptr = 0xdead_0000;
            }
        }
        state
            .history
            .entry((queue, index))
            .or_default()
            .push('D');

        if capture {
            state.captured += 1;
            let captured = state.captured;
            let fired: Vec<Trigger> = state
                .triggers
                .iter()
                .filter(|t| t.after == captured)
                .cloned()
                .collect();
            for trigger in fired {
                if let Some(format) = trigger.format {
                    state.formats.insert(queue, format);
                }
                state.events.push_back(trigger.event);
            }
        }

        Ok(Some(Dequeued {
            index,
            sequence: state.captured as u32,
            planes,
        }))
    }

    fn stream_on(&self, queue: QueueType) -> Result<(), Error> {
        let mut state = self.state.borrow_mut();
        state.streaming.insert(queue);
        state.calls.push(format!("STREAMON {}", queue));
        Ok(())
    }

    fn stream_off(&self, queue: QueueType) -> Result<(), Error> {
        let mut state = self.state.borrow_mut();
        state.streaming.remove(&queue);
        state.queued.remove(&queue);
        for ((q, _), history) in state.history.iter_mut() {
            if *q == queue {
                history.push('|');
            }
        }
        state.calls.push(format!("STREAMOFF {}", queue));
        Ok(())
    }

    fn subscribe_event(&self, kind: EventKind) -> Result<(), Error> {
        let mut state = self.state.borrow_mut();
        if let Some(errno) = state.subscribe_error {
            return Err(os("VIDIOC_SUBSCRIBE_EVENT", errno));
        }
        state.subscribed.push(kind);
        state.calls.push(format!("SUBSCRIBE {:?}", kind));
        Ok(())
    }

    fn dequeue_event(&self) -> Result<Option<DeviceEvent>, Error> {
        Ok(self.state.borrow_mut().events.pop_front())
    }

    fn read(&self, buf: &mut [u8]) -> Result<Option<usize>, Error> {
        let mut state = self.state.borrow_mut();
        let Some(chunk) = state.read_chunks.pop_front() else {
            return Ok(None);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        state.captured += 1;
        Ok(Some(n))
    }

    fn write(&self, buf: &[u8]) -> Result<Option<usize>, Error> {
        self.state.borrow_mut().written.extend_from_slice(buf);
        Ok(Some(buf.len()))
    }

    fn wait(&self, interest: Interest, _timeout: Duration) -> Result<Readiness, Error> {
        let mut state = self.state.borrow_mut();
        state.waits.push(interest);
        if let Some(scripted) = state.script.pop_front() {
            return match scripted {
                Wait::Ready(ready) => Ok(ready),
                Wait::Timeout => Ok(Readiness::default()),
                Wait::Interrupted => Err(os("select", Errno::EINTR)),
            };
        }

        let has_work = |queue: QueueType| {
            state.streaming.contains(&queue) && state.queued.get(&queue).is_some_and(|q| !q.is_empty())
        };
        let multi_planar = state.caps.is_multi_planar();
        let capture_queue = QueueType::new(m2mstream::device::Direction::Capture, multi_planar);
        let output_queue = QueueType::new(m2mstream::device::Direction::Output, multi_planar);
        Ok(Readiness {
            capture: interest.capture
                && (has_work(capture_queue) || !state.read_chunks.is_empty()),
            output: interest.output && has_work(output_queue),
            events: interest.events && !state.events.is_empty(),
        })
    }
}

/// Each streaming period of a buffer's history must read Q, D, Q, D...
/// Periods are separated by STREAMOFF ('|').
pub fn alternates(history: &str) -> bool {
    history.split('|').all(|period| {
        period
            .chars()
            .enumerate()
            .all(|(i, c)| c == if i % 2 == 0 { 'Q' } else { 'D' })
    })
}

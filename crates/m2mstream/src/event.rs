// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Device events
//!
//! M2M devices announce end-of-stream and capture format changes through the
//! V4L2 event queue. The [`EventChannel`] subscribes to the interesting event
//! types once and then drains all pending events whenever the device signals
//! an exceptional condition.

use std::iter::FusedIterator;

use crate::device::{Device, DeviceEvent, EventKind};
use crate::Error;

/// Subscription to a set of device event kinds.
#[derive(Debug, Clone)]
pub struct EventChannel {
    kinds: Vec<EventKind>,
}

impl EventChannel {
    /// Subscribes to every kind in `kinds`. A failed subscription is fatal.
    pub fn subscribe<D: Device>(device: &D, kinds: &[EventKind]) -> Result<Self, Error> {
        for &kind in kinds {
            device.subscribe_event(kind)?;
            log::debug!("subscribed to {:?} events", kind);
        }
        Ok(EventChannel {
            kinds: kinds.to_vec(),
        })
    }

    pub fn kinds(&self) -> &[EventKind] {
        &self.kinds
    }

    /// Lazily dequeues pending events until the device reports none left.
    ///
    /// The iterator ends after the first error.
    pub fn drain<'d, D: Device>(&self, device: &'d D) -> Drain<'d, D> {
        Drain {
            device,
            done: false,
        }
    }
}

/// Iterator returned by [`EventChannel::drain`].
pub struct Drain<'d, D> {
    device: &'d D,
    done: bool,
}

impl<D: Device> Iterator for Drain<'_, D> {
    type Item = Result<DeviceEvent, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.device.dequeue_event() {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

impl<D: Device> FusedIterator for Drain<'_, D> {}

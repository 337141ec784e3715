// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Readiness multiplexing loop
//!
//! The [`Scheduler`] drives a started [`Session`] from a single thread. Each
//! round it blocks on one combined wait for capture, output and event
//! readiness, then services whatever became ready in a fixed order: capture,
//! then output, then events, at most once each. The frame budget only
//! shrinks when the capture stream delivers a frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::device::Device;
use crate::session::Session;
use crate::stream::{Progress, Sink, Source};
use crate::Error;

/// What a completed run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Frames delivered to the sink.
    pub frames: u64,
    pub capture_bytes: u64,
    /// Output buffers refilled after being consumed by the device.
    pub output_buffers: u64,
    pub output_bytes: u64,
    pub source_changes: u64,
    pub end_of_stream: u64,
    /// Readiness waits that returned with something ready.
    pub wait_rounds: u64,
}

/// Stream counters at one point of a run.
struct Totals {
    frames: u64,
    capture_bytes: u64,
    output_buffers: u64,
    output_bytes: u64,
}

impl Totals {
    fn of<D: Device>(session: &Session<D>) -> Self {
        let output = session.output();
        Totals {
            frames: session.capture().serviced(),
            capture_bytes: session.capture().bytes_transferred(),
            output_buffers: output.map_or(0, |o| o.serviced()),
            output_bytes: output.map_or(0, |o| o.bytes_transferred()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    frames: u32,
    timeout: Duration,
    stop_on_eos: bool,
    stop: Option<Arc<AtomicBool>>,
}

impl Scheduler {
    pub fn new(config: &Config) -> Self {
        Scheduler {
            frames: config.frames(),
            timeout: config.timeout(),
            stop_on_eos: config.stop_on_eos(),
            stop: None,
        }
    }

    /// Ends the run early once `flag` is set, checked before every wait.
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop = Some(flag);
        self
    }

    fn stop_requested(&self) -> bool {
        self.stop
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Runs until `frames` capture frames have been delivered to `sink`.
    ///
    /// Fails with [`Error::Timeout`] when a wait expires with nothing ready.
    /// With stop-on-EOS set, the run also ends after the round in which the
    /// device reported end-of-stream. A raised stop flag ends the run
    /// before the next wait.
    pub fn run<D: Device>(
        &self,
        session: &mut Session<D>,
        sink: &mut dyn Sink,
        source: &mut dyn Source,
    ) -> Result<RunSummary, Error> {
        let mut remaining = self.frames;
        let mut summary = RunSummary::default();
        let before = session.event_counts();
        let start = Totals::of(session);

        'frames: while remaining > 0 {
            loop {
                if self.stop_requested() {
                    log::info!("stop requested, {} frames left", remaining);
                    break 'frames;
                }
                let ready = match session.wait(self.timeout) {
                    Ok(ready) => ready,
                    Err(err) if err.is_interrupted() => continue,
                    Err(err) => return Err(err),
                };
                if ready.is_empty() {
                    log::error!("select timeout");
                    return Err(Error::Timeout(self.timeout));
                }
                summary.wait_rounds += 1;

                let mut captured = false;
                if ready.capture {
                    captured = session.service_capture(sink)? == Progress::Progressed;
                }
                if ready.output {
                    session.service_output(source)?;
                }
                if ready.events {
                    session.handle_events()?;
                }

                if self.stop_on_eos && session.event_counts().end_of_stream > before.end_of_stream
                {
                    log::info!("stopping on end of stream, {} frames left", remaining);
                    break 'frames;
                }
                if captured {
                    break;
                }
            }
            remaining -= 1;
        }

        let counts = session.event_counts();
        let end = Totals::of(session);
        summary.frames = end.frames - start.frames;
        summary.capture_bytes = end.capture_bytes - start.capture_bytes;
        summary.output_buffers = end.output_buffers - start.output_buffers;
        summary.output_bytes = end.output_bytes - start.output_bytes;
        summary.source_changes = counts.source_changes - before.source_changes;
        summary.end_of_stream = counts.end_of_stream - before.end_of_stream;
        Ok(summary)
    }
}

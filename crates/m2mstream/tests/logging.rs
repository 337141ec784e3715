// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies
//
// Diagnostic Logging Tests
//
// TESTING LAYERS:
//
// Layer 2 (Fake device - No hardware required):
//   - Short source reads are reported at warning level
//
// RUN:
//   cargo test --test logging

mod common;

use std::sync::Mutex;

use common::FakeDevice;
use log::{Level, LevelFilter, Log, Metadata, Record};
use m2mstream::device::QueueType;
use m2mstream::memory::MemoryStrategy;
use m2mstream::pool::BufferPool;
use m2mstream::session::negotiate_format;
use m2mstream::stream::Stream;

const OUTPUT: QueueType = QueueType::VideoOutputMplane;

struct Capture {
    records: Mutex<Vec<(Level, String)>>,
}

impl Log for Capture {
    fn enabled(&self, _: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if let Ok(mut records) = self.records.lock() {
            records.push((record.level(), record.args().to_string()));
        }
    }

    fn flush(&self) {}
}

static LOGGER: Capture = Capture {
    records: Mutex::new(Vec::new()),
};

fn short_reads() -> Vec<(Level, String)> {
    LOGGER
        .records
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, msg)| msg.contains("short read"))
        .cloned()
        .collect()
}

fn no_sink(_: &[&[u8]]) {}

#[test]
fn test_short_reads_are_warnings() {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(LevelFilter::Trace);

    let device = FakeDevice::m2m();
    let format = negotiate_format(&device, OUTPUT, None).unwrap();
    let pool = BufferPool::allocate(&device, OUTPUT, MemoryStrategy::Mapped, 4, &format).unwrap();
    let mut output = Stream::new(format, pool);

    // A source that always fills the buffer completely stays quiet.
    let mut full = |buf: &mut [u8]| buf.len();
    output.start(&device, &mut full).unwrap();
    output.service(&device, &mut no_sink, &mut full).unwrap();
    assert!(short_reads().is_empty());

    let mut short = |buf: &mut [u8]| buf.len() / 2;
    output.service(&device, &mut no_sink, &mut short).unwrap();
    let reads = short_reads();
    assert_eq!(reads.len(), 1);
    assert_eq!(reads[0].0, Level::Warn);
    assert!(reads[0].1.contains("VIDEO_OUTPUT_MPLANE"), "{}", reads[0].1);
}

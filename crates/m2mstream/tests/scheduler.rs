// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies
//
// Scheduler Tests
//
// TESTING LAYERS:
//
// Layer 2 (Fake device - No hardware required):
//   - Frame budget accounting and readiness servicing order
//   - Timeouts, interrupted waits and end-of-stream handling
//   - Source changes in the middle of a run
//
// RUN:
//   cargo test --test scheduler

mod common;

use std::time::Duration;

use common::{alternates, format, FakeDevice, Trigger, Wait};
use m2mstream::config::Config;
use m2mstream::device::DeviceEvent;
use m2mstream::fourcc::FourCC;
use m2mstream::memory::MemoryStrategy;
use m2mstream::scheduler::Scheduler;
use m2mstream::session::Session;
use m2mstream::Error;

fn no_source(_: &mut [u8]) -> usize {
    0
}

fn started(device: FakeDevice, config: &Config) -> Session<FakeDevice> {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut session = Session::open(device, config.clone()).unwrap();
    session.start(&mut no_source).unwrap();
    session
}

#[test]
fn test_capture_only_budget() {
    let config = Config::default().with_frames(3);
    let mut session = started(FakeDevice::camera(), &config);

    let mut sizes = Vec::new();
    let mut sink = |planes: &[&[u8]]| sizes.push(planes[0].len());
    let summary = Scheduler::new(&config)
        .run(&mut session, &mut sink, &mut no_source)
        .unwrap();

    assert_eq!(summary.frames, 3);
    assert_eq!(summary.wait_rounds, 3);
    assert_eq!(summary.output_buffers, 0);
    assert_eq!(sizes, vec![100; 3]);
    session.device().with(|s| {
        assert_eq!(s.waits.len(), 3);
        assert!(s.waits.iter().all(|w| w.capture && !w.output && !w.events));
    });
}

#[test]
fn test_m2m_feeds_source_data() {
    let config = Config::default().with_frames(1);
    let _ = env_logger::builder().is_test(true).try_init();
    let mut session = Session::open(FakeDevice::m2m(), config.clone()).unwrap();

    let mut supplied = false;
    let mut source = |buf: &mut [u8]| {
        if supplied {
            return 0;
        }
        supplied = true;
        buf[..1024].fill(0x5a);
        1024
    };
    session.start(&mut source).unwrap();

    let mut frames = 0;
    let mut sink = |_: &[&[u8]]| frames += 1;
    let summary = Scheduler::new(&config)
        .run(&mut session, &mut sink, &mut source)
        .unwrap();

    assert_eq!(summary.frames, 1);
    assert_eq!(frames, 1);
    assert_eq!(session.device().with(|s| s.output_payloads[0]), 1024);
}

#[test]
fn test_unknown_user_pointer_aborts_run() {
    let config = Config::default().with_memory(MemoryStrategy::UserPtr);
    let mut session = started(FakeDevice::m2m(), &config);
    session.device().with(|s| s.corrupt_userptr = true);

    let mut sink = |_: &[&[u8]]| {};
    let err = Scheduler::new(&config)
        .run(&mut session, &mut sink, &mut no_source)
        .unwrap_err();
    assert!(matches!(err, Error::UnknownBuffer { .. }), "{}", err);
}

#[test]
fn test_timeout_is_an_error() {
    let config = Config::default().with_timeout(Duration::from_millis(5));
    let mut session = started(FakeDevice::m2m(), &config);
    session.device().with(|s| s.script.push_back(Wait::Timeout));

    let mut sink = |_: &[&[u8]]| {};
    let err = Scheduler::new(&config)
        .run(&mut session, &mut sink, &mut no_source)
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(t) if t == Duration::from_millis(5)));
}

#[test]
fn test_interrupted_wait_is_retried() {
    let config = Config::default().with_frames(2);
    let mut session = started(FakeDevice::camera(), &config);
    session.device().with(|s| {
        s.script.push_back(Wait::Interrupted);
        s.script.push_back(Wait::Interrupted);
    });

    let mut sink = |_: &[&[u8]]| {};
    let summary = Scheduler::new(&config)
        .run(&mut session, &mut sink, &mut no_source)
        .unwrap();

    assert_eq!(summary.frames, 2);
    assert_eq!(summary.wait_rounds, 2);
    assert_eq!(session.device().with(|s| s.waits.len()), 4);
}

fn end_of_stream_after(frames: u64) -> FakeDevice {
    let device = FakeDevice::m2m();
    device.with(|s| {
        s.triggers.push(Trigger {
            after: frames,
            event: DeviceEvent::EndOfStream,
            format: None,
        })
    });
    device
}

#[test]
fn test_end_of_stream_stops_when_asked() {
    let config = Config::default().with_frames(10).with_stop_on_eos(true);
    let mut session = started(end_of_stream_after(2), &config);

    let mut sink = |_: &[&[u8]]| {};
    let summary = Scheduler::new(&config)
        .run(&mut session, &mut sink, &mut no_source)
        .unwrap();

    // The event is seen in the round after the frame that raised it.
    assert_eq!(summary.frames, 3);
    assert_eq!(summary.end_of_stream, 1);
}

#[test]
fn test_end_of_stream_is_logged_by_default() {
    let config = Config::default().with_frames(10);
    let mut session = started(end_of_stream_after(2), &config);

    let mut sink = |_: &[&[u8]]| {};
    let summary = Scheduler::new(&config)
        .run(&mut session, &mut sink, &mut no_source)
        .unwrap();

    assert_eq!(summary.frames, 10);
    assert_eq!(summary.end_of_stream, 1);
}

#[test]
fn test_source_change_during_run() {
    let config = Config::default().with_frames(5);
    let device = FakeDevice::m2m();
    device.with(|s| {
        s.triggers.push(Trigger {
            after: 2,
            event: DeviceEvent::SourceChanged { changes: 1 },
            format: Some(format(128, 64, FourCC::YUV420, 2)),
        })
    });
    let mut session = started(device, &config);

    let mut sizes = Vec::new();
    let mut sink = |planes: &[&[u8]]| sizes.push(planes.len());
    let summary = Scheduler::new(&config)
        .run(&mut session, &mut sink, &mut no_source)
        .unwrap();

    assert_eq!(summary.frames, 5);
    assert_eq!(summary.source_changes, 1);
    assert_eq!(summary.output_buffers, summary.wait_rounds);
    assert_eq!(session.capture().format().width, 128);
    assert!(sizes.iter().all(|&n| n == 2));
    session.device().with(|s| {
        for history in s.history.values() {
            assert!(alternates(history), "{}", history);
        }
    });
}

#[test]
fn test_copy_capture_run() {
    let config = Config::default()
        .with_memory(MemoryStrategy::Copy)
        .with_frames(2);
    let device = FakeDevice::camera();
    device.with(|s| {
        s.read_chunks.push_back(vec![1; 64]);
        s.read_chunks.push_back(vec![2; 32]);
    });
    let mut session = started(device, &config);

    let mut frames = Vec::new();
    let mut sink = |planes: &[&[u8]]| frames.push(planes[0].to_vec());
    let summary = Scheduler::new(&config)
        .run(&mut session, &mut sink, &mut no_source)
        .unwrap();

    assert_eq!(summary.frames, 2);
    assert_eq!(summary.capture_bytes, 96);
    assert_eq!(frames, vec![vec![1; 64], vec![2; 32]]);
}

#[test]
fn test_runs_resume_where_they_left_off() {
    let config = Config::default().with_frames(2);
    let mut session = started(FakeDevice::m2m(), &config);
    let scheduler = Scheduler::new(&config);

    let mut sink = |_: &[&[u8]]| {};
    let first = scheduler.run(&mut session, &mut sink, &mut no_source).unwrap();
    let second = scheduler.run(&mut session, &mut sink, &mut no_source).unwrap();
    assert_eq!(first.frames, 2);
    assert_eq!(second.frames, 2);
    assert_eq!(session.capture().serviced(), 4);
}

#[test]
fn test_stop_flag_ends_run() {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    let config = Config::default().with_frames(10);
    let mut session = started(FakeDevice::m2m(), &config);
    let flag = Arc::new(AtomicBool::new(false));
    let scheduler = Scheduler::new(&config).with_stop_flag(Arc::clone(&flag));

    // Raise the flag from inside the sink, as a signal handler would.
    let mut frames = 0;
    let mut sink = |_: &[&[u8]]| {
        frames += 1;
        if frames == 4 {
            flag.store(true, Ordering::Relaxed);
        }
    };
    let summary = scheduler.run(&mut session, &mut sink, &mut no_source).unwrap();
    assert_eq!(summary.frames, 4);

    let summary = scheduler.run(&mut session, &mut sink, &mut no_source).unwrap();
    assert_eq!(summary.frames, 0);
    assert_eq!(summary.wait_rounds, 0);
}

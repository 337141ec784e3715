// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use crate::metrics::RunMetrics;
use crate::sink::FileSink;
use crate::source::{self, Framing};
use crate::utils;
use clap::Args as ClapArgs;
use m2mstream::config::Config;
use m2mstream::memory::MemoryStrategy;
use m2mstream::scheduler::Scheduler;
use m2mstream::session::Session;
use m2mstream::v4l2::V4l2Device;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

/// Longest readiness wait `poll()` can express.
const MAX_TIMEOUT_SECS: u64 = i32::MAX as u64 / 1000;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Video device
    #[arg(short, long, default_value = "/dev/video0")]
    device: PathBuf,

    /// Use memory mapped buffers (default)
    #[arg(short = 'm', long, conflicts_with_all = ["read", "userp"])]
    mmap: bool,

    /// Use read() and write() calls
    #[arg(short = 'r', long, conflicts_with = "userp")]
    read: bool,

    /// Use application allocated buffers
    #[arg(short = 'u', long)]
    userp: bool,

    /// Write captured frames to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Force format to YU12 capture and H264 output
    #[arg(short = 'f', long)]
    format: bool,

    /// Forced geometry in WxH format (requires --format)
    #[arg(long, requires = "format")]
    resolution: Option<String>,

    /// Number of frames to capture
    #[arg(short = 'c', long, default_value_t = m2mstream::config::DEFAULT_FRAMES,
          value_parser = clap::value_parser!(u32).range(1..))]
    count: u32,

    /// Input file for the output queue of M2M devices
    #[arg(short = 'i', long)]
    infile: Option<PathBuf>,

    /// How the input file is split into buffers
    #[arg(long, value_enum, default_value_t = Framing::Au)]
    framing: Framing,

    /// Readiness timeout in seconds
    #[arg(long, default_value = "10",
          value_parser = clap::value_parser!(u64).range(1..=MAX_TIMEOUT_SECS))]
    timeout: u64,

    /// Mapped buffers to request per queue
    #[arg(long, default_value_t = m2mstream::config::DEFAULT_BUFFERS,
          value_parser = clap::value_parser!(u32).range(2..))]
    buffers: u32,

    /// Stop once the device reports end of stream
    #[arg(long)]
    stop_on_eos: bool,

    /// Print run metrics when done
    #[arg(long)]
    metrics: bool,
}

impl Args {
    fn memory(&self) -> MemoryStrategy {
        if self.read {
            MemoryStrategy::Copy
        } else if self.userp {
            MemoryStrategy::UserPtr
        } else {
            MemoryStrategy::Mapped
        }
    }

    fn config(&self) -> Result<Config, CliError> {
        let mut config = Config::default()
            .with_memory(self.memory())
            .with_force_format(self.format)
            .with_frames(self.count)
            .with_timeout(Duration::from_secs(self.timeout))
            .with_buffers(self.buffers)
            .with_stop_on_eos(self.stop_on_eos);

        if let Some(resolution) = &self.resolution {
            let (width, height) = utils::parse_resolution(resolution)?;
            config = config.with_resolution(width, height);
        }
        Ok(config)
    }
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::debug!("Run parameters: {:?}", args);

    let config = args.config()?;
    log::info!(
        "Opening {} ({} i/o)",
        args.device.display(),
        config.memory()
    );

    let device = V4l2Device::open(&args.device)?;
    let mut session = Session::open(device, config.clone())?;
    let caps = session.capabilities();
    log::info!(
        "{} ({}), {}{}",
        caps.card(),
        caps.driver(),
        caps.device_type(),
        if session.is_multi_planar() {
            ", multi-planar"
        } else {
            ""
        }
    );
    log::info!("Capture format: {}", session.capture().format());
    if let Some(output) = session.output() {
        log::info!("Output format: {}", output.format());
    } else if args.infile.is_some() {
        log::warn!("Device has no output queue, ignoring input file");
    }

    let term = utils::install_signal_handler()?;
    let mut sink = FileSink::new(args.output.clone());
    let mut source = source::open(args.infile.as_deref(), args.framing);

    let start_time = Instant::now();
    session.start(&mut *source)?;
    let result = Scheduler::new(&config)
        .with_stop_flag(term.clone())
        .run(&mut session, &mut sink, &mut *source);

    // Tear down even when the run failed, but report the run error first.
    let closed = session.close();
    let summary = result?;
    closed?;
    let elapsed = start_time.elapsed();

    if term.load(Ordering::Relaxed) {
        log::info!("Received Ctrl+C, stopped early");
    }
    log::info!(
        "Captured {} frames in {:.1}s",
        summary.frames,
        elapsed.as_secs_f64()
    );
    if let Some(path) = &args.output {
        log::info!("Wrote {} bytes to {}", sink.bytes_written(), path.display());
    }

    let metrics = RunMetrics::new(&summary, elapsed);
    if json {
        metrics
            .print_json()
            .map_err(|e| CliError::General(format!("Failed to serialize JSON: {}", e)))?;
    } else if args.metrics {
        metrics.print_text();
    }

    Ok(())
}

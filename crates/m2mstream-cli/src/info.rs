// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use clap::Args as ClapArgs;
use m2mstream::device::{Device, Direction, QueueType};
use m2mstream::v4l2::{Capabilities, V4l2Device};
use nix::errno::Errno;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Video device path
    #[arg(short, long, default_value = "/dev/video0")]
    device: PathBuf,
}

#[derive(Debug, Serialize)]
struct DeviceInfo {
    path: String,
    driver: String,
    card: String,
    bus_info: String,
    version: String,
    device_type: String,
    capabilities: Vec<String>,
    multi_planar: bool,
    streaming: bool,
    read_write: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    capture_format: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    output_format: Option<String>,
}

impl DeviceInfo {
    fn new(path: &Path, caps: &Capabilities) -> Self {
        DeviceInfo {
            path: path.display().to_string(),
            driver: caps.driver().to_string(),
            card: caps.card().to_string(),
            bus_info: caps.bus_info().to_string(),
            version: caps.version(),
            device_type: caps.device_type().to_string(),
            capabilities: caps.flag_names().iter().map(|s| s.to_string()).collect(),
            multi_planar: caps.is_multi_planar(),
            streaming: caps.supports_streaming(),
            read_write: caps.supports_read_write(),
            capture_format: None,
            output_format: None,
        }
    }
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::debug!("Executing info command: {:?}", args);

    let device = V4l2Device::open(&args.device)?;
    let caps = device.query_capabilities().map_err(|e| {
        if is_not_v4l2(&e) {
            CliError::Unsupported(format!("{} is not a V4L2 device", args.device.display()))
        } else {
            CliError::from(e)
        }
    })?;

    let mut info = DeviceInfo::new(&args.device, &caps);
    let multi_planar = caps.is_multi_planar();
    if caps.is_m2m() || caps.supports_capture() {
        let queue = QueueType::new(Direction::Capture, multi_planar);
        info.capture_format = current_format(&device, queue);
    }
    if caps.is_m2m() {
        let queue = QueueType::new(Direction::Output, multi_planar);
        info.output_format = current_format(&device, queue);
    }

    if json {
        let json_str = serde_json::to_string_pretty(&info)
            .map_err(|e| CliError::General(format!("Failed to serialize JSON: {}", e)))?;
        println!("{}", json_str);
    } else {
        print_text_info(&info);
    }

    Ok(())
}

fn current_format(device: &V4l2Device, queue: QueueType) -> Option<String> {
    match device.get_format(queue) {
        Ok(format) => Some(format.to_string()),
        Err(e) => {
            log::warn!("Cannot read {} format: {}", queue, e);
            None
        }
    }
}

fn print_text_info(info: &DeviceInfo) {
    println!("Device:        {}", info.path);
    println!("Driver:        {} {}", info.driver, info.version);
    println!("Card:          {}", info.card);
    println!("Bus:           {}", info.bus_info);
    println!(
        "Type:          {}{}",
        info.device_type,
        if info.multi_planar { " (multi-planar)" } else { "" }
    );
    println!("Capabilities:  {}", info.capabilities.join(" "));

    let mut io = Vec::new();
    if info.streaming {
        io.push("mmap");
        io.push("userptr");
    }
    if info.read_write {
        io.push("read");
    }
    println!("I/O methods:   {}", io.join(", "));

    if let Some(format) = &info.capture_format {
        println!("Capture:       {}", format);
    }
    if let Some(format) = &info.output_format {
        println!("Output:        {}", format);
    }
}

/// EINVAL or ENOTTY on the capability query means no V4L2 driver.
fn is_not_v4l2(err: &m2mstream::Error) -> bool {
    matches!(err.errno(), Some(Errno::EINVAL | Errno::ENOTTY))
}

// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use m2mstream::Sink;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

/// Writes every captured plane to a file, in plane order.
///
/// The file is created on the first frame. If it cannot be created, or a
/// write fails, the problem is logged once and later frames are dropped so
/// that the run itself carries on.
pub struct FileSink {
    path: Option<PathBuf>,
    file: Option<File>,
    failed: bool,
    frames: u64,
    bytes: u64,
}

impl FileSink {
    /// A sink writing to `path`, or discarding frames when `path` is `None`.
    pub fn new(path: Option<PathBuf>) -> Self {
        FileSink {
            path,
            file: None,
            failed: false,
            frames: 0,
            bytes: 0,
        }
    }

    /// Frames handed to the sink.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Bytes written to the file.
    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    fn file(&mut self) -> Option<&mut File> {
        if self.failed {
            return None;
        }
        if self.file.is_none() {
            let path = self.path.as_ref()?;
            match File::create(path) {
                Ok(file) => {
                    log::debug!("Writing frames to {}", path.display());
                    self.file = Some(file);
                }
                Err(e) => {
                    log::warn!("Cannot create {}: {}, frames dropped", path.display(), e);
                    self.failed = true;
                    return None;
                }
            }
        }
        self.file.as_mut()
    }
}

impl Sink for FileSink {
    fn consume(&mut self, planes: &[&[u8]]) {
        self.frames += 1;
        log::trace!(
            "Frame {}: {} planes, {} bytes",
            self.frames,
            planes.len(),
            planes.iter().map(|p| p.len()).sum::<usize>()
        );

        let Some(file) = self.file() else {
            return;
        };
        let mut written = 0;
        let result = planes.iter().try_for_each(|plane| {
            file.write_all(plane)?;
            written += plane.len() as u64;
            Ok::<(), std::io::Error>(())
        });
        self.bytes += written;
        if let Err(e) = result {
            log::warn!("Frame write failed: {}, frames dropped", e);
            self.failed = true;
        }
    }
}

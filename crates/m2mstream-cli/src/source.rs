// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::utils::find_access_unit;
use clap::ValueEnum;
use m2mstream::Source;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// How the input file is cut into output buffers.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// One H.264 access unit per buffer, split at access unit delimiters
    #[default]
    Au,
    /// As many bytes as fit in each buffer
    Raw,
}

/// Opens `path` for reading, logging instead of failing.
fn open_input(path: &Path) -> Option<File> {
    match File::open(path) {
        Ok(file) => {
            log::debug!("Reading input from {}", path.display());
            Some(file)
        }
        Err(e) => {
            log::warn!("Cannot open {}: {}, supplying empty buffers", path.display(), e);
            None
        }
    }
}

/// Reads until `buf` is full or the input ends.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Builds the source for `framing` reading from `path`, if any.
pub fn open(path: Option<&Path>, framing: Framing) -> Box<dyn Source> {
    let file = path.and_then(open_input);
    match framing {
        Framing::Au => Box::new(AccessUnitSource::new(file)),
        Framing::Raw => Box::new(FileSource::new(file)),
    }
}

/// Fills each buffer with the next bytes of a file.
pub struct FileSource<R> {
    input: Option<R>,
}

impl<R: Read> FileSource<R> {
    pub fn new(input: Option<R>) -> Self {
        FileSource { input }
    }
}

impl<R: Read> Source for FileSource<R> {
    fn supply(&mut self, buf: &mut [u8]) -> usize {
        let Some(input) = &mut self.input else {
            return 0;
        };
        match read_full(input, buf) {
            Ok(n) if n < buf.len() => {
                log::warn!("Short read {} instead of {}", n, buf.len());
                n
            }
            Ok(n) => {
                log::trace!("Read {} bytes", n);
                n
            }
            Err(e) => {
                log::warn!("Input read failed: {}", e);
                0
            }
        }
    }
}

/// Fills each buffer with exactly one access unit.
///
/// Each call reads a full buffer from the current offset, then keeps only the
/// bytes before the next access unit delimiter. The remainder of the buffer is
/// zeroed and the offset advances by the bytes kept, so the next call starts
/// at the delimiter. Without a delimiter in range the whole read is kept.
pub struct AccessUnitSource<R> {
    input: Option<R>,
    offset: u64,
}

impl<R: Read + Seek> AccessUnitSource<R> {
    pub fn new(input: Option<R>) -> Self {
        AccessUnitSource { input, offset: 0 }
    }

    /// File offset of the next access unit.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn next_unit(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(input) = &mut self.input else {
            return Ok(0);
        };
        input.seek(SeekFrom::Start(self.offset))?;
        let read = read_full(input, buf)?;
        let length = find_access_unit(&buf[..read]).unwrap_or(read);

        buf[length..].fill(0);
        self.offset += length as u64;
        Ok(length)
    }
}

impl<R: Read + Seek> Source for AccessUnitSource<R> {
    fn supply(&mut self, buf: &mut [u8]) -> usize {
        match self.next_unit(buf) {
            Ok(length) => {
                log::trace!("Used {} bytes, first {:02x?}", length, &buf[..length.min(8)]);
                length
            }
            Err(e) => {
                log::warn!("Input read failed: {}", e);
                0
            }
        }
    }
}

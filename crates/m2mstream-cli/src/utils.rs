// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use signal_hook::consts::SIGINT;
use signal_hook::flag;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// H.264 access unit delimiter: a 4-byte start code followed by NAL type 9.
pub const ACCESS_UNIT_DELIMITER: [u8; 5] = [0x00, 0x00, 0x00, 0x01, 0x09];

/// Parse resolution string in format "WxH" or "W*H"
pub fn parse_resolution(s: &str) -> Result<(u32, u32), CliError> {
    let Some((width_str, height_str)) = s.split_once('x').or_else(|| s.split_once('*')) else {
        return Err(CliError::InvalidArgs(format!(
            "Invalid resolution format (expected WxH or W*H): {}",
            s
        )));
    };

    let width = width_str
        .parse::<u32>()
        .map_err(|_| CliError::InvalidArgs(format!("Invalid width in resolution: {}", s)))?;
    let height = height_str
        .parse::<u32>()
        .map_err(|_| CliError::InvalidArgs(format!("Invalid height in resolution: {}", s)))?;

    if width == 0 || height == 0 {
        return Err(CliError::InvalidArgs(format!(
            "Resolution dimensions must be positive: {}",
            s
        )));
    }

    Ok((width, height))
}

/// Install signal handler for graceful shutdown on Ctrl+C
///
/// Returns an Arc<AtomicBool> that will be set to true when SIGINT is received.
pub fn install_signal_handler() -> Result<Arc<AtomicBool>, CliError> {
    let term = Arc::new(AtomicBool::new(false));

    flag::register(SIGINT, Arc::clone(&term))
        .map_err(|e| CliError::General(format!("Failed to register signal handler: {}", e)))?;

    log::debug!("Installed SIGINT handler");
    Ok(term)
}

/// Offset of the next access unit delimiter in `data`.
///
/// The search starts at offset 1 so that a delimiter at the very start of
/// `data`, which opens the current access unit, is skipped.
pub fn find_access_unit(data: &[u8]) -> Option<usize> {
    if data.len() <= 1 {
        return None;
    }
    data[1..]
        .windows(ACCESS_UNIT_DELIMITER.len())
        .position(|w| w == ACCESS_UNIT_DELIMITER)
        .map(|pos| pos + 1)
}

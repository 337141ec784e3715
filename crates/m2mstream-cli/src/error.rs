// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use std::fmt;
use std::process::ExitCode;

/// CLI-specific error type with exit code mapping
#[derive(Debug)]
pub enum CliError {
    /// Invalid command-line arguments
    InvalidArgs(String),
    /// Device node missing or inaccessible
    DeviceNotFound(String),
    /// Device lacks a capability or memory strategy the run needs
    Unsupported(String),
    /// Device stopped producing buffers
    Timeout(String),
    /// Any other streaming failure
    General(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::InvalidArgs(msg) => write!(f, "Invalid arguments: {}", msg),
            CliError::DeviceNotFound(msg) => write!(f, "Device not found: {}", msg),
            CliError::Unsupported(msg) => write!(f, "Unsupported device: {}", msg),
            CliError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            CliError::General(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for CliError {}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    fn code(&self) -> u8 {
        match self {
            CliError::InvalidArgs(_) => 2,
            CliError::DeviceNotFound(_) => 3,
            CliError::Unsupported(_) => 4,
            CliError::Timeout(_) => 6,
            CliError::General(_) => 1,
        }
    }
}

/// Map m2mstream::Error to CliError with appropriate exit codes
impl From<m2mstream::Error> for CliError {
    fn from(err: m2mstream::Error) -> Self {
        use m2mstream::Error;

        match &err {
            Error::Io(io_err) => match io_err.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    CliError::DeviceNotFound(err.to_string())
                }
                _ => CliError::General(err.to_string()),
            },
            Error::NotSupported(_) | Error::InsufficientBuffers { .. } => {
                CliError::Unsupported(err.to_string())
            }
            Error::Timeout(_) => CliError::Timeout(err.to_string()),
            _ => CliError::General(err.to_string()),
        }
    }
}

/// Helper function to convert result to exit code
pub fn result_to_exit_code<T>(result: Result<T, CliError>) -> ExitCode {
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            e.exit_code()
        }
    }
}

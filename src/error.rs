// SPDX-License-Identifier: GPL-3.0-or-later
/*
 * PLDM firmware update: error types
 *
 * Copyright (c) 2023 Code Construct
 */

use core::fmt;

/// Why a remote firmware-update agent's response was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFault {
    /// Completion code other than success
    CompletionCode(u8),
    /// Received length differs from the length computed from the response
    /// contents. For truncated responses `expected` is a lower bound.
    Length { actual: usize, expected: usize },
}

impl fmt::Display for DeviceFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CompletionCode(cc) => write!(f, "completion code 0x{:02x}", cc),
            Self::Length { actual, expected } => {
                write!(f, "response length {}, expected {}", actual, expected)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A declared size or length runs past, or disagrees with, the bytes
    /// actually available.
    #[error("bad buffer size")]
    BadBufferSize,
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    #[error("header CRC mismatch: stored 0x{stored:08x}, computed 0x{computed:08x}")]
    CrcError { stored: u32, computed: u32 },
    #[error("device error: {0}")]
    DeviceError(DeviceFault),
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
    /// More than one device identifier record matched, see
    /// [`MatchPolicy::RejectAmbiguous`](crate::pldm_fw_pkg::MatchPolicy)
    #[error("device identifier records {first} and {second} both match")]
    AmbiguousMatch { first: usize, second: usize },
}

pub type Result<T> = core::result::Result<T, Error>;

impl<I> From<nom::Err<nom::error::Error<I>>> for Error {
    fn from(_: nom::Err<nom::error::Error<I>>) -> Self {
        Error::BadBufferSize
    }
}

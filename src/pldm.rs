// SPDX-License-Identifier: GPL-3.0-or-later
/*
 * PLDM firmware update: PLDM message definitions.
 *
 * Copyright (c) 2023 Code Construct
 */

use log::error;
use nom::{
    combinator::map, number::complete::le_u8, sequence::tuple, IResult,
};

use crate::error::{DeviceFault, Error, Result};

pub const PLDM_TYPE_FW: u8 = 5;

/// Size of the common request header
pub const PLDM_HDR_SIZE: usize = 3;
/// Common header plus completion code
pub const PLDM_RSP_HDR_SIZE: usize = PLDM_HDR_SIZE + 1;

pub const PLDM_SUCCESS: u8 = 0x00;

const PLDM_RQ: u8 = 1 << 7;
const PLDM_INSTANCE_MASK: u8 = 0x1f;
const PLDM_TYPE_MASK: u8 = 0x3f;

type VResult<I, O> = IResult<I, O>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PldmHeader {
    pub request: bool,
    pub instance_id: u8,
    pub typ: u8,
    pub cmd: u8,
}

impl PldmHeader {
    pub fn new(request: bool, instance_id: u8, typ: u8, cmd: u8) -> Self {
        Self {
            request,
            instance_id: instance_id & PLDM_INSTANCE_MASK,
            typ: typ & PLDM_TYPE_MASK,
            cmd,
        }
    }

    pub fn to_bytes(&self) -> [u8; PLDM_HDR_SIZE] {
        let rq = if self.request { PLDM_RQ } else { 0 };
        [rq | self.instance_id, self.typ, self.cmd]
    }

    pub fn parse(buf: &[u8]) -> VResult<&[u8], Self> {
        map(tuple((le_u8, le_u8, le_u8)), |(b0, b1, cmd)| PldmHeader {
            request: b0 & PLDM_RQ != 0,
            instance_id: b0 & PLDM_INSTANCE_MASK,
            typ: b1 & PLDM_TYPE_MASK,
            cmd,
        })(buf)
    }
}

pub struct PldmRequest {
    pub hdr: PldmHeader,
    pub data: Vec<u8>,
}

impl PldmRequest {
    pub fn new(instance_id: u8, typ: u8, cmd: u8) -> Self {
        Self {
            hdr: PldmHeader::new(true, instance_id, typ, cmd),
            data: Vec::new(),
        }
    }

    pub fn set_data(&mut self, data: Vec<u8>) {
        self.data = data;
    }

    /// Wire form: common header followed by the request payload
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut tx_buf = Vec::with_capacity(self.data.len() + PLDM_HDR_SIZE);
        tx_buf.extend_from_slice(&self.hdr.to_bytes());
        tx_buf.extend_from_slice(&self.data);
        tx_buf
    }
}

/// A received response, borrowed from the receive buffer. `data` is
/// everything after the completion code.
#[derive(Debug)]
pub struct PldmResponse<'a> {
    pub hdr: PldmHeader,
    pub cc: u8,
    pub data: &'a [u8],
}

impl<'a> PldmResponse<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<Self> {
        if buf.is_empty() {
            return Err(Error::InvalidParameter("empty response buffer"));
        }

        let (data, (hdr, cc)) = tuple((PldmHeader::parse, le_u8))(buf)
            .map_err(|_| {
                Error::DeviceError(DeviceFault::Length {
                    actual: buf.len(),
                    expected: PLDM_RSP_HDR_SIZE,
                })
            })?;

        Ok(PldmResponse { hdr, cc, data })
    }
}

/// Check the completion code of a response. `function` and `device` only
/// feed the diagnostics.
pub fn check_completion<'a>(
    rsp_buf: &'a [u8],
    function: &str,
    device: &str,
) -> Result<PldmResponse<'a>> {
    let rsp = PldmResponse::parse(rsp_buf).map_err(|e| {
        error!("{}: {} short response: {}", function, device, e);
        e
    })?;

    if rsp.cc != PLDM_SUCCESS {
        error!("{}: {} failed: 0x{:x}", function, device, rsp.cc);
        return Err(Error::DeviceError(DeviceFault::CompletionCode(rsp.cc)));
    }

    Ok(rsp)
}

/// Check the completion code, then require the response length to be
/// exactly `expected`.
pub fn check_completion_and_length(
    rsp_buf: &[u8],
    actual: usize,
    expected: usize,
    function: &str,
    device: &str,
) -> Result<()> {
    check_completion(rsp_buf, function, device)?;

    if actual != expected {
        error!(
            "{}: {} response len={}, exp={}",
            function, device, actual, expected
        );
        return Err(Error::DeviceError(DeviceFault::Length { actual, expected }));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_header_layout() {
        let mut req = PldmRequest::new(0x23, PLDM_TYPE_FW, 0x02);
        req.set_data(vec![0xaa]);
        // instance id is 5 bits wide
        assert_eq!(req.to_bytes(), vec![0x83, 0x05, 0x02, 0xaa]);
    }

    #[test]
    fn response_header_parse() {
        let buf = [0x03, 0x05, 0x01, 0x00, 0x11];
        let rsp = check_completion(&buf, "test", "dev").unwrap();
        assert!(!rsp.hdr.request);
        assert_eq!(rsp.hdr.instance_id, 3);
        assert_eq!(rsp.hdr.typ, PLDM_TYPE_FW);
        assert_eq!(rsp.hdr.cmd, 0x01);
        assert_eq!(rsp.data, &[0x11]);
    }

    #[test]
    fn completion_failure() {
        let buf = [0x00, 0x05, 0x01, 0x81];
        assert_eq!(
            check_completion(&buf, "test", "dev").unwrap_err(),
            Error::DeviceError(DeviceFault::CompletionCode(0x81))
        );
    }

    #[test]
    fn short_and_empty_responses() {
        assert!(matches!(
            check_completion(&[], "test", "dev"),
            Err(Error::InvalidParameter(_))
        ));
        assert_eq!(
            check_completion(&[0x00, 0x05, 0x01], "test", "dev").unwrap_err(),
            Error::DeviceError(DeviceFault::Length {
                actual: 3,
                expected: PLDM_RSP_HDR_SIZE
            })
        );
    }

    #[test]
    fn length_must_match_exactly() {
        let buf = [0x00, 0x05, 0x01, 0x00];
        assert!(check_completion_and_length(&buf, 10, 10, "t", "d").is_ok());
        for actual in [9, 11] {
            assert_eq!(
                check_completion_and_length(&buf, actual, 10, "t", "d")
                    .unwrap_err(),
                Error::DeviceError(DeviceFault::Length {
                    actual,
                    expected: 10
                })
            );
        }
    }

    #[test]
    fn completion_checked_before_length() {
        let buf = [0x00, 0x05, 0x01, 0x01];
        assert_eq!(
            check_completion_and_length(&buf, 1, 10, "t", "d").unwrap_err(),
            Error::DeviceError(DeviceFault::CompletionCode(0x01))
        );
    }
}

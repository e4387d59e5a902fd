// SPDX-License-Identifier: GPL-3.0-or-later
/*
 * PLDM firmware update: package and response validation
 *
 * Copyright (c) 2023 Code Construct
 */

//! Parsing and validation for PLDM for Firmware Update (DSP0267).
//!
//! Two independent halves:
//!
//! * [`pldm_fw_pkg`]: navigating and validating a firmware update package
//!   held in memory, and matching its device identifier records against a
//!   device's descriptors.
//! * [`pldm_fw`]: validating `QueryDeviceIdentifiers` and
//!   `GetFirmwareParameters` responses from a firmware device.
//!
//! Nothing here copies out of the caller's buffer; parsed values borrow
//! from it.

pub mod error;
pub mod pldm;
pub mod pldm_fw;
pub mod pldm_fw_pkg;

pub use error::{DeviceFault, Error, Result};
pub use pldm_fw::{
    descriptor_is_in_list, validate_get_firmware_parameters,
    validate_query_device_identifiers, Descriptor, DescriptorIter,
};
pub use pldm_fw_pkg::{validate_header, MatchPolicy, Package, PackageHeader};

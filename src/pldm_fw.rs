// SPDX-License-Identifier: GPL-3.0-or-later
/*
 * PLDM firmware update: PLDM type 5 messaging
 *
 * Copyright (c) 2023 Code Construct
 */

use core::fmt;

use enumset::{EnumSet, EnumSetType};
use itertools::Itertools;
use log::{error, info};

use nom::{
    branch::alt,
    bytes::complete::{tag, take},
    character::complete::{i32 as c_i32, u32 as c_u32},
    combinator::{all_consuming, map, map_parser, rest, value},
    number::complete::{le_u16, le_u32, le_u8},
    sequence::tuple,
    IResult,
};

use crate::error::{DeviceFault, Error, Result};
use crate::pldm::{self, PldmHeader, PldmRequest, PLDM_RSP_HDR_SIZE, PLDM_TYPE_FW};

type VResult<I, O> = IResult<I, O>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FwCommand {
    QueryDeviceIdentifiers = 0x01,
    GetFirmwareParameters = 0x02,
    QueryDownstreamDevices = 0x03,
    QueryDownstreamIdentifiers = 0x04,
    GetDownstreamFirmwareParameters = 0x05,
    RequestUpdate = 0x10,
    GetPackageData = 0x11,
    GetDeviceMetaData = 0x12,
    PassComponentTable = 0x13,
    UpdateComponent = 0x14,
    RequestFirmwareData = 0x15,
    TransferComplete = 0x16,
    VerifyComplete = 0x17,
    ApplyComplete = 0x18,
    GetMetaData = 0x19,
    ActivateFirmware = 0x1a,
    GetStatus = 0x1b,
    CancelUpdateComponent = 0x1c,
    CancelUpdate = 0x1d,
    ActivatePendingComponentImageSet = 0x1e,
    ActivatePendingComponentImage = 0x1f,
    RequestDownstreamDeviceUpdate = 0x20,
}

/// Firmware update specific completion codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FwCompletionCode {
    NotInUpdateMode,
    AlreadyInUpdateMode,
    DataOutOfRange,
    InvalidTransferLength,
    InvalidStateForCommand,
    IncompleteUpdate,
    BusyInBackground,
    CancelPending,
    CommandNotExpected,
    RetryRequestFwData,
    UnableToInitiateUpdate,
    ActivationNotRequired,
    SelfContainedActivationNotPermitted,
    NoDeviceMetadata,
    RetryRequestUpdate,
    NoPackageData,
    InvalidTransferHandle,
    InvalidTransferOperationFlag,
    ActivatePendingImageNotPermitted,
    PackageDataError,
}

impl FwCompletionCode {
    pub fn from_u8(cc: u8) -> Option<Self> {
        let c = match cc {
            0x80 => Self::NotInUpdateMode,
            0x81 => Self::AlreadyInUpdateMode,
            0x82 => Self::DataOutOfRange,
            0x83 => Self::InvalidTransferLength,
            0x84 => Self::InvalidStateForCommand,
            0x85 => Self::IncompleteUpdate,
            0x86 => Self::BusyInBackground,
            0x87 => Self::CancelPending,
            0x88 => Self::CommandNotExpected,
            0x89 => Self::RetryRequestFwData,
            0x8a => Self::UnableToInitiateUpdate,
            0x8b => Self::ActivationNotRequired,
            0x8c => Self::SelfContainedActivationNotPermitted,
            0x8d => Self::NoDeviceMetadata,
            0x8e => Self::RetryRequestUpdate,
            0x8f => Self::NoPackageData,
            0x90 => Self::InvalidTransferHandle,
            0x91 => Self::InvalidTransferOperationFlag,
            0x92 => Self::ActivatePendingImageNotPermitted,
            0x93 => Self::PackageDataError,
            _ => return None,
        };
        Some(c)
    }
}

/// Build the common header for a firmware update message
pub fn fill_common(request: bool, instance_id: u8, cmd: FwCommand) -> PldmHeader {
    PldmHeader::new(request, instance_id, PLDM_TYPE_FW, cmd as u8)
}

pub fn fw_request(instance_id: u8, cmd: FwCommand) -> PldmRequest {
    PldmRequest::new(instance_id, PLDM_TYPE_FW, cmd as u8)
}

fn check_fw_completion<'a>(
    rsp_buf: &'a [u8],
    function: &str,
    device: &str,
) -> Result<pldm::PldmResponse<'a>> {
    pldm::check_completion(rsp_buf, function, device).map_err(|e| {
        if let Error::DeviceError(DeviceFault::CompletionCode(cc)) = &e {
            if let Some(c) = FwCompletionCode::from_u8(*cc) {
                error!("{}: {} reported {:?}", function, device, c);
            }
        }
        e
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringType {
    Unknown,
    Ascii,
    Utf8,
    Utf16,
    Utf16Le,
    Utf16Be,
    Reserved(u8),
}

impl From<u8> for StringType {
    fn from(x: u8) -> Self {
        match x {
            0 => Self::Unknown,
            1 => Self::Ascii,
            2 => Self::Utf8,
            3 => Self::Utf16,
            4 => Self::Utf16Le,
            5 => Self::Utf16Be,
            r => Self::Reserved(r),
        }
    }
}

/// A typed version string, borrowed from the message or package
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionString<'a> {
    pub typ: StringType,
    pub bytes: &'a [u8],
}

fn utf16_units(bytes: &[u8], big_endian: bool) -> impl Iterator<Item = u16> + '_ {
    bytes.iter().tuples().map(move |(a, b)| {
        if big_endian {
            (*a as u16) << 8 | (*b as u16)
        } else {
            (*b as u16) << 8 | (*a as u16)
        }
    })
}

fn decode_utf16(bytes: &[u8], big_endian: bool) -> String {
    char::decode_utf16(utf16_units(bytes, big_endian))
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

impl VersionString<'_> {
    /// Decoded text, or `None` for untyped byte strings
    pub fn to_text(&self) -> Option<String> {
        let s = match self.typ {
            StringType::Ascii | StringType::Utf8 => {
                String::from_utf8_lossy(self.bytes).into_owned()
            }
            StringType::Utf16 => match self.bytes {
                [0xff, 0xfe, r @ ..] => decode_utf16(r, false),
                [0xfe, 0xff, r @ ..] => decode_utf16(r, true),
                b => decode_utf16(b, true),
            },
            StringType::Utf16Le => decode_utf16(self.bytes, false),
            StringType::Utf16Be => decode_utf16(self.bytes, true),
            StringType::Unknown | StringType::Reserved(_) => return None,
        };
        Some(s)
    }
}

impl fmt::Display for VersionString<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let trim_chars = ['\0', ' '];
        match self.to_text() {
            Some(s) => {
                write!(f, "{}", s.trim_end_matches(&trim_chars).escape_default())
            }
            None => {
                for b in self.bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

pub fn parse_string<'a>(
    typ: u8,
    len: u8,
) -> impl FnMut(&'a [u8]) -> VResult<&'a [u8], VersionString<'a>> {
    map(take(len), move |bytes: &'a [u8]| VersionString {
        typ: typ.into(),
        bytes,
    })
}

// Where we have type, length and data all adjacent (and in that order)
pub fn parse_string_adjacent(buf: &[u8]) -> VResult<&[u8], VersionString<'_>> {
    let (r, (typ, len)) = tuple((le_u8, le_u8))(buf)?;
    parse_string(typ, len)(r)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorType {
    PciVendorId,
    IanaEnterpriseId,
    Uuid,
    PnpVendorId,
    AcpiVendorId,
    IeeeCompanyId,
    ScsiVendorId,
    PciDeviceId,
    PciSubsystemVendorId,
    PciSubsystemId,
    PciRevisionId,
    Vendor,
    Other(u16),
}

impl From<u16> for DescriptorType {
    fn from(x: u16) -> Self {
        match x {
            0x0000 => Self::PciVendorId,
            0x0001 => Self::IanaEnterpriseId,
            0x0002 => Self::Uuid,
            0x0003 => Self::PnpVendorId,
            0x0004 => Self::AcpiVendorId,
            0x0005 => Self::IeeeCompanyId,
            0x0006 => Self::ScsiVendorId,
            0x0100 => Self::PciDeviceId,
            0x0101 => Self::PciSubsystemVendorId,
            0x0102 => Self::PciSubsystemId,
            0x0103 => Self::PciRevisionId,
            0xffff => Self::Vendor,
            o => Self::Other(o),
        }
    }
}

/// Size of a descriptor's type and length fields
pub const DESCRIPTOR_HDR_SIZE: usize = 4;

/// A firmware device descriptor: type, length and data. Equality is on
/// type and data bytes, which also covers the length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor<'a> {
    pub typ: u16,
    pub data: &'a [u8],
}

impl<'a> Descriptor<'a> {
    pub fn new(typ: u16, data: &'a [u8]) -> Self {
        Self { typ, data }
    }

    pub fn descriptor_type(&self) -> DescriptorType {
        self.typ.into()
    }

    /// Bytes occupied on the wire, including type and length
    pub fn encoded_len(&self) -> usize {
        DESCRIPTOR_HDR_SIZE + self.data.len()
    }

    /// Parse one descriptor; the remainder is where the next one starts.
    pub fn parse(buf: &'a [u8]) -> VResult<&'a [u8], Self> {
        let (r, (typ, len)) = tuple((le_u16, le_u16))(buf)?;
        let (r, data) = take(len)(r)?;
        Ok((r, Descriptor { typ, data }))
    }

    pub fn is_in_list(&self, list: &[Descriptor<'_>]) -> bool {
        descriptor_is_in_list(self, list)
    }
}

/// True if some entry of `list` has the same type, length and data
pub fn descriptor_is_in_list(desc: &Descriptor<'_>, list: &[Descriptor<'_>]) -> bool {
    list.iter().any(|d| d.typ == desc.typ && d.data == desc.data)
}

fn vendor_title(data: &[u8]) -> Option<(VersionString<'_>, &[u8])> {
    let r: VResult<&[u8], _> = tuple((parse_string_adjacent, rest))(data);
    r.ok().map(|(_, t)| t)
}

impl fmt::Display for Descriptor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = |f: &mut fmt::Formatter<'_>, d: &[u8]| -> fmt::Result {
            write!(f, "[")?;
            for b in d {
                write!(f, "{:02x}", b)?;
            }
            write!(f, "]")
        };

        match (self.descriptor_type(), self.data) {
            (DescriptorType::PciVendorId, &[a, b]) => {
                write!(f, "pci-vid:{:04x}", u16::from_le_bytes([a, b]))
            }
            (DescriptorType::PciDeviceId, &[a, b]) => {
                write!(f, "pci-did:{:04x}", u16::from_le_bytes([a, b]))
            }
            (DescriptorType::IanaEnterpriseId, &[a, b, c, d]) => {
                write!(f, "iana:{:08x}", u32::from_le_bytes([a, b, c, d]))
            }
            (DescriptorType::Uuid, d) if d.len() == 16 => match uuid::Uuid::from_slice(d) {
                Ok(u) => write!(f, "uuid:{}", u),
                Err(_) => hex(f, d),
            },
            (DescriptorType::Vendor, d) => {
                write!(f, "vendor:")?;
                match vendor_title(d) {
                    Some((title, data)) => {
                        write!(f, "{}", title)?;
                        hex(f, data)
                    }
                    None => hex(f, d),
                }
            }
            (_, d) => {
                write!(f, "type-{:04x}:", self.typ)?;
                hex(f, d)
            }
        }
    }
}

/// Walks `count` back-to-back descriptors. Each step is bounds checked
/// against the containing area; after the first error the iterator ends.
#[derive(Debug, Clone)]
pub struct DescriptorIter<'a> {
    buf: &'a [u8],
    remaining: usize,
}

impl<'a> DescriptorIter<'a> {
    pub fn new(buf: &'a [u8], count: usize) -> Self {
        Self {
            buf,
            remaining: count,
        }
    }

    /// Bytes following the descriptors walked so far
    pub fn remainder(&self) -> &'a [u8] {
        self.buf
    }
}

impl<'a> Iterator for DescriptorIter<'a> {
    type Item = Result<Descriptor<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        match Descriptor::parse(self.buf) {
            Ok((r, d)) => {
                self.remaining -= 1;
                self.buf = r;
                Some(Ok(d))
            }
            Err(_) => {
                self.remaining = 0;
                Some(Err(Error::BadBufferSize))
            }
        }
    }
}

pub type PldmDate = chrono::naive::NaiveDate;

pub fn pldm_date_parse(buf: &[u8]) -> VResult<&[u8], Option<PldmDate>> {
    /* YYYYMMDD */
    let (r, o) = alt((
        value(None, tag([0u8; 8])),
        map(
            tuple((
                map_parser(take(4u8), all_consuming(c_i32)),
                map_parser(take(2u8), all_consuming(c_u32)),
                map_parser(take(2u8), all_consuming(c_u32)),
            )),
            Some,
        ),
        // not a date, but still occupies the field
        value(None, take(8u8)),
    ))(buf)?;

    let d = o.and_then(|(y, m, d)| PldmDate::from_ymd_opt(y, m, d));

    Ok((r, d))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentClassification {
    Unknown,
    Other,
    Driver,
    ConfigurationSoftware,
    ApplicationSoftware,
    Instrumentation,
    FirmwareOrBios,
    DiagnosticSoftware,
    OperatingSystem,
    Middleware,
    Firmware,
    BiosOrFcode,
    SupportServicePack,
    SoftwareBundle,
    DownstreamDevice,
    Vendor(u16),
    Reserved(u16),
}

impl From<u16> for ComponentClassification {
    fn from(x: u16) -> Self {
        match x {
            0x0000 => Self::Unknown,
            0x0001 => Self::Other,
            0x0002 => Self::Driver,
            0x0003 => Self::ConfigurationSoftware,
            0x0004 => Self::ApplicationSoftware,
            0x0005 => Self::Instrumentation,
            0x0006 => Self::FirmwareOrBios,
            0x0007 => Self::DiagnosticSoftware,
            0x0008 => Self::OperatingSystem,
            0x0009 => Self::Middleware,
            0x000a => Self::Firmware,
            0x000b => Self::BiosOrFcode,
            0x000c => Self::SupportServicePack,
            0x000d => Self::SoftwareBundle,
            0xffff => Self::DownstreamDevice,
            v @ 0x8000..=0xfffe => Self::Vendor(v),
            r => Self::Reserved(r),
        }
    }
}

impl From<ComponentClassification> for u16 {
    fn from(c: ComponentClassification) -> u16 {
        use ComponentClassification::*;
        match c {
            Unknown => 0x0000,
            Other => 0x0001,
            Driver => 0x0002,
            ConfigurationSoftware => 0x0003,
            ApplicationSoftware => 0x0004,
            Instrumentation => 0x0005,
            FirmwareOrBios => 0x0006,
            DiagnosticSoftware => 0x0007,
            OperatingSystem => 0x0008,
            Middleware => 0x0009,
            Firmware => 0x000a,
            BiosOrFcode => 0x000b,
            SupportServicePack => 0x000c,
            SoftwareBundle => 0x000d,
            DownstreamDevice => 0xffff,
            Vendor(v) | Reserved(v) => v,
        }
    }
}

#[derive(EnumSetType, Debug)]
pub enum ActivationMethod {
    PendingComponentImageSet = 7,
    PendingImage = 6,
    ACPowerCycle = 5,
    DCPowerCycle = 4,
    SystemReboot = 3,
    MediumSpecificReset = 2,
    SelfContained = 1,
    Automatic = 0,
}

pub type ActivationMethods = EnumSet<ActivationMethod>;

/// Build a flag set from a wire value, dropping reserved bits
pub(crate) fn flags_from_u32<T: EnumSetType>(x: u32) -> EnumSet<T> {
    EnumSet::<T>::from_u32(x & EnumSet::<T>::all().as_u32())
}

#[derive(EnumSetType, Debug)]
pub enum DeviceCapability {
    ComponentUpdateFailureRecovery = 0,
    ComponentUpdateFailureRetry = 1,
    FDHostFunctionalityDuringUpdate = 2,
    FDPartialUpdates = 3,
    FDUpdateModeRestrictionOSActive = 4,
    FDDowngradeRestrictions = 8,
    SecurityRevisionUpdateRequest = 9,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapabilities(EnumSet<DeviceCapability>);

impl DeviceCapabilities {
    pub fn from_u32(x: u32) -> Self {
        Self(flags_from_u32(x))
    }

    pub fn as_u32(&self) -> u32 {
        self.0.as_u32()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, cap: DeviceCapability) -> bool {
        self.0.contains(cap)
    }
}

#[derive(EnumSetType, Debug)]
pub enum ComponentCapability {
    FDApplyState = 0,
    ComponentDowngrade = 2,
    SecurityRevisionUpdateRequest = 3,
    SecurityRevisionNotLatest = 4,
}

pub type ComponentCapabilities = EnumSet<ComponentCapability>;

#[derive(Debug, Clone, Copy)]
pub struct ComponentVersion<'a> {
    pub stamp: u32,
    pub version: VersionString<'a>,
    pub date: Option<PldmDate>,
}

impl fmt::Display for ComponentVersion<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.version)?;
        if let Some(d) = self.date {
            write!(f, " ({:?})", d)?;
        }
        if self.stamp != 0 {
            write!(f, " [{:08x}]", self.stamp)?;
        }
        Ok(())
    }
}

/// Fixed part of a component parameter table entry, before the version
/// strings
pub const COMPONENT_ENTRY_FIXED_SIZE: usize = 39;
const COMPONENT_ENTRY_ACTIVE_LEN_OFFSET: usize = 10;
const COMPONENT_ENTRY_PENDING_LEN_OFFSET: usize = 24;

/// One entry of the Get Firmware Parameters component parameter table
#[derive(Debug, Clone, Copy)]
pub struct ComponentParameterEntry<'a> {
    pub classification: ComponentClassification,
    pub identifier: u16,
    pub classification_index: u8,
    pub active: ComponentVersion<'a>,
    pub pending: ComponentVersion<'a>,
    pub activation_methods: ActivationMethods,
    pub caps_during_update: ComponentCapabilities,
}

impl<'a> ComponentParameterEntry<'a> {
    pub fn parse(buf: &'a [u8]) -> VResult<&'a [u8], Self> {
        let (
            r,
            (
                classification,
                identifier,
                classification_index,
                c1,
                c2,
                activation_methods,
                caps_during_update,
            ),
        ) = tuple((
            le_u16,
            le_u16,
            le_u8,
            tuple((le_u32, le_u8, le_u8, pldm_date_parse)),
            tuple((le_u32, le_u8, le_u8, pldm_date_parse)),
            le_u16,
            le_u32,
        ))(buf)?;

        let (r, c1_str) = parse_string(c1.1, c1.2)(r)?;
        let (r, c2_str) = parse_string(c2.1, c2.2)(r)?;

        let c = ComponentParameterEntry {
            classification: classification.into(),
            identifier,
            classification_index,
            active: ComponentVersion {
                stamp: c1.0,
                version: c1_str,
                date: c1.3,
            },
            pending: ComponentVersion {
                stamp: c2.0,
                version: c2_str,
                date: c2.3,
            },
            activation_methods: flags_from_u32(activation_methods as u32),
            caps_during_update: flags_from_u32(caps_during_update),
        };

        Ok((r, c))
    }

    pub fn encoded_len(&self) -> usize {
        COMPONENT_ENTRY_FIXED_SIZE
            + self.active.version.bytes.len()
            + self.pending.version.bytes.len()
    }
}

impl fmt::Display for ComponentParameterEntry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Class=0x{:x} Id=0x{:x} Ver={}",
            u16::from(self.classification),
            self.identifier,
            self.active
        )
    }
}

#[derive(Debug, Clone)]
pub struct ComponentParameterIter<'a> {
    buf: &'a [u8],
    remaining: usize,
}

impl<'a> Iterator for ComponentParameterIter<'a> {
    type Item = Result<ComponentParameterEntry<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        match ComponentParameterEntry::parse(self.buf) {
            Ok((r, c)) => {
                self.remaining -= 1;
                self.buf = r;
                Some(Ok(c))
            }
            Err(_) => {
                self.remaining = 0;
                Some(Err(Error::BadBufferSize))
            }
        }
    }
}

/// Fixed part of a Query Device Identifiers response, up to the first
/// descriptor
pub const QUERY_DEVICE_IDS_RSP_FIXED_SIZE: usize = PLDM_RSP_HDR_SIZE + 4 + 1;

/// A validated Query Device Identifiers response
#[derive(Debug, Clone)]
pub struct DeviceIdentifiers<'a> {
    pub hdr: PldmHeader,
    pub length: u32,
    pub count: u8,
    descriptors: &'a [u8],
}

impl<'a> DeviceIdentifiers<'a> {
    pub fn descriptors(&self) -> DescriptorIter<'a> {
        DescriptorIter::new(self.descriptors, self.count as usize)
    }
}

impl fmt::Display for DeviceIdentifiers<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for id in self.descriptors().flatten() {
            write!(f, "{}{}", if first { "" } else { "," }, id)?;
            first = false;
        }
        Ok(())
    }
}

/// Check a Query Device Identifiers response. The declared descriptor
/// length is authoritative: the response must be exactly the fixed part
/// plus that many bytes.
pub fn validate_query_device_identifiers<'a>(
    buf: &'a [u8],
    device: &str,
) -> Result<DeviceIdentifiers<'a>> {
    const FUNC: &str = "validate_query_device_identifiers";

    let rsp = check_fw_completion(buf, FUNC, device)?;

    let (descriptors, (length, count)) =
        tuple((le_u32, le_u8))(rsp.data).map_err(|_: nom::Err<nom::error::Error<&[u8]>>| {
            error!("{}: {} short rsp: {}", FUNC, device, buf.len());
            Error::DeviceError(DeviceFault::Length {
                actual: buf.len(),
                expected: QUERY_DEVICE_IDS_RSP_FIXED_SIZE,
            })
        })?;

    let expected = QUERY_DEVICE_IDS_RSP_FIXED_SIZE + length as usize;
    pldm::check_completion_and_length(buf, buf.len(), expected, FUNC, device)?;

    let ids = DeviceIdentifiers {
        hdr: rsp.hdr,
        length,
        count,
        descriptors,
    };

    info!("{}: {} DescCount={}", FUNC, device, count);
    for (i, d) in ids.descriptors().enumerate() {
        let d = d.map_err(|e| {
            error!("{}: {} descriptor {} overruns length {}", FUNC, device, i, length);
            e
        })?;
        info!("Desc {} Type=0x{:x} Len={} {}", i, d.typ, d.data.len(), d);
    }

    Ok(ids)
}

/// Fixed part of a Get Firmware Parameters response, up to the image set
/// version strings
pub const GET_FW_PARAMS_RSP_FIXED_SIZE: usize = PLDM_RSP_HDR_SIZE + 4 + 2 + 4;

/// A validated Get Firmware Parameters response
#[derive(Debug, Clone)]
pub struct FirmwareParameters<'a> {
    pub hdr: PldmHeader,
    pub caps: DeviceCapabilities,
    pub component_count: u16,
    pub active: VersionString<'a>,
    pub pending: VersionString<'a>,
    table: &'a [u8],
}

impl<'a> FirmwareParameters<'a> {
    fn parse(hdr: PldmHeader, data: &'a [u8]) -> Result<Self> {
        let res: VResult<&[u8], _> =
            tuple((le_u32, le_u16, le_u8, le_u8, le_u8, le_u8))(data);
        let (r, p) = res?;

        let (
            caps,
            component_count,
            active_str_type,
            active_str_len,
            pending_str_type,
            pending_str_len,
        ) = p;

        let (r, active) = parse_string(active_str_type, active_str_len)(r)?;
        let (r, pending) = parse_string(pending_str_type, pending_str_len)(r)?;

        let fp = FirmwareParameters {
            hdr,
            caps: DeviceCapabilities::from_u32(caps),
            component_count,
            active,
            pending,
            table: r,
        };

        Ok(fp)
    }

    pub fn components(&self) -> ComponentParameterIter<'a> {
        ComponentParameterIter {
            buf: self.table,
            remaining: self.component_count as usize,
        }
    }

    /// Component table entry by index, walking from the first entry
    pub fn component(&self, index: usize) -> Result<ComponentParameterEntry<'a>> {
        if index >= self.component_count as usize {
            return Err(Error::InvalidParameter("component index out of range"));
        }

        self.components()
            .nth(index)
            .unwrap_or(Err(Error::BadBufferSize))
    }

    /// Find the first component at or after `start` with the given
    /// classification and identifier. Returns its index along with the
    /// entry; continue the search from `index + 1`.
    pub fn next_matching_component(
        &self,
        start: usize,
        classification: u16,
        identifier: u16,
    ) -> Result<Option<(usize, ComponentParameterEntry<'a>)>> {
        for (i, c) in self.components().enumerate().skip(start) {
            let c = c?;
            if u16::from(c.classification) == classification
                && c.identifier == identifier
            {
                return Ok(Some((i, c)));
            }
        }
        Ok(None)
    }
}

/// Compute the length a Get Firmware Parameters response must have by
/// walking its component table entry by entry.
fn get_fw_params_expected_len(buf: &[u8]) -> Result<usize> {
    let short = |expected| {
        Error::DeviceError(DeviceFault::Length {
            actual: buf.len(),
            expected,
        })
    };

    let fixed = buf
        .get(..GET_FW_PARAMS_RSP_FIXED_SIZE)
        .ok_or_else(|| short(GET_FW_PARAMS_RSP_FIXED_SIZE))?;
    let count = u16::from_le_bytes([fixed[8], fixed[9]]) as usize;
    let active_len = fixed[11] as usize;
    let pending_len = fixed[13] as usize;

    let mut len = GET_FW_PARAMS_RSP_FIXED_SIZE + active_len + pending_len;
    for _ in 0..count {
        let entry = buf
            .get(len..len + COMPONENT_ENTRY_FIXED_SIZE)
            .ok_or_else(|| short(len + COMPONENT_ENTRY_FIXED_SIZE))?;
        len += COMPONENT_ENTRY_FIXED_SIZE
            + entry[COMPONENT_ENTRY_ACTIVE_LEN_OFFSET] as usize
            + entry[COMPONENT_ENTRY_PENDING_LEN_OFFSET] as usize;
    }

    Ok(len)
}

/// Check a Get Firmware Parameters response. The response must be exactly
/// as long as its fixed part, image set strings and component table.
pub fn validate_get_firmware_parameters<'a>(
    buf: &'a [u8],
    device: &str,
) -> Result<FirmwareParameters<'a>> {
    const FUNC: &str = "validate_get_firmware_parameters";

    let rsp = check_fw_completion(buf, FUNC, device)?;

    let expected = get_fw_params_expected_len(buf).map_err(|e| {
        error!("{}: {} bad rsp length: {}", FUNC, device, e);
        e
    })?;
    pldm::check_completion_and_length(buf, buf.len(), expected, FUNC, device)?;

    let fp = FirmwareParameters::parse(rsp.hdr, rsp.data)?;

    info!("{}: {} {} components", FUNC, device, fp.component_count);
    for (i, c) in fp.components().enumerate() {
        info!("Component {} {}", i, c?);
    }

    Ok(fp)
}

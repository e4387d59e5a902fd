// SPDX-License-Identifier: GPL-3.0-or-later
/*
 * PLDM firmware update: PLDM type 5 package parsing
 *
 * Copyright (c) 2023 Code Construct
 */

//! Firmware update package navigation and validation.
//!
//! Every view here borrows from the package buffer. Navigation bounds-checks
//! each step against the buffer, but only [`PackageHeader::validate`]
//! reconciles the declared sizes against each other; callers should
//! validate once (or use [`Package::new`]) before trusting what they find.

use core::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};
use crc::{Crc, CRC_32_ISO_HDLC};
use enumset::{EnumSet, EnumSetType};
use log::{debug, error, info};
use nom::{
    bytes::complete::take,
    combinator::{map, map_res},
    error::ErrorKind,
    number::complete::{le_u16, le_u32, le_u8},
    sequence::tuple,
    IResult,
};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::pldm_fw::{
    self, flags_from_u32, parse_string, parse_string_adjacent,
    ActivationMethods, ComponentClassification, Descriptor, DescriptorIter,
    VersionString,
};

type VResult<I, O> = IResult<I, O>;

pub const PKG_FORMAT_REVISION_1: u8 = 0x01;
pub const PKG_FORMAT_REVISION_2: u8 = 0x02;

pub const PKG_UUID_V1_0: Uuid = Uuid::from_bytes([
    0xf0, 0x18, 0x87, 0x8c, 0xcb, 0x7d, 0x49, 0x43, 0x98, 0x00, 0xa0, 0x2f,
    0x05, 0x9a, 0xca, 0x02,
]);
pub const PKG_UUID_V1_1: Uuid = Uuid::from_bytes([
    0x12, 0x44, 0xd2, 0x64, 0x8d, 0x7d, 0x47, 0x18, 0xa0, 0x30, 0xfc, 0x8a,
    0x56, 0x58, 0x7d, 0x5a,
]);

/// Package header up to and including the version string length
pub const PKG_HDR_FIXED_SIZE: usize = 36;
pub const PKG_HDR_CRC_SIZE: usize = 4;
pub const DEVICE_ID_RECORD_FIXED_SIZE: usize = 11;
pub const COMPONENT_IMAGE_INFO_FIXED_SIZE: usize = 22;
const DEVICE_ID_AREA_HDR_SIZE: usize = 1;
const COMPONENT_IMAGE_AREA_HDR_SIZE: usize = 2;
const TIMESTAMP104_SIZE: usize = 13;

fn short<I>(input: I) -> nom::Err<nom::error::Error<I>> {
    nom::Err::Error(nom::error::Error::new(input, ErrorKind::LengthValue))
}

/// PLDM timestamp104, as carried in the package release date/time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp104(pub [u8; TIMESTAMP104_SIZE]);

impl Timestamp104 {
    pub fn utc_offset_minutes(&self) -> i16 {
        i16::from_le_bytes([self.0[0], self.0[1]])
    }

    /// `None` when the fields do not form a valid date and time, which
    /// includes the all-zero "unspecified" timestamp
    pub fn to_datetime(&self) -> Option<DateTime<FixedOffset>> {
        let t = &self.0;
        let micros = u32::from_le_bytes([t[2], t[3], t[4], 0]);
        let year = u16::from_le_bytes([t[10], t[11]]);

        let naive = NaiveDate::from_ymd_opt(year as i32, t[9] as u32, t[8] as u32)?
            .and_hms_micro_opt(t[7] as u32, t[6] as u32, t[5] as u32, micros)?;
        let offset =
            FixedOffset::east_opt(self.utc_offset_minutes() as i32 * 60)?;

        offset.from_local_datetime(&naive).single()
    }
}

#[derive(EnumSetType, Debug)]
pub enum ComponentOption {
    ForceUpdate = 0,
    UseComparisonStamp = 1,
}

pub type ComponentOptions = EnumSet<ComponentOption>;

/// The applicable components bitmap of a device identifier record
#[derive(Debug, Clone, Copy)]
pub struct ComponentBitmap<'a> {
    bits: &'a [u8],
}

impl<'a> ComponentBitmap<'a> {
    pub fn parse(
        component_bits: u16,
    ) -> impl FnMut(&'a [u8]) -> VResult<&'a [u8], Self> {
        let bytes = component_bits / 8;
        map(take(bytes), |bits| ComponentBitmap { bits })
    }

    pub fn bit_len(&self) -> usize {
        self.bits.len() * 8
    }

    pub fn is_set(&self, i: usize) -> Result<bool> {
        let byte = self
            .bits
            .get(i / 8)
            .ok_or(Error::InvalidParameter("component index beyond bitmap"))?;
        Ok(byte & (1 << (i % 8)) != 0)
    }

    pub fn iter_set(&self) -> impl Iterator<Item = usize> + 'a {
        let bits = self.bits;
        (0..bits.len() * 8).filter(move |i| bits[i / 8] & (1 << (i % 8)) != 0)
    }
}

impl fmt::Display for ComponentBitmap<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for i in self.iter_set() {
            write!(f, "{}{}", if first { "" } else { ", " }, i)?;
            first = false;
        }
        Ok(())
    }
}

/// One firmware device (or downstream device) identifier record
#[derive(Debug, Clone)]
pub struct DeviceIdRecord<'a> {
    pub length: u16,
    pub descriptor_count: u8,
    pub update_option_flags: u32,
    pub package_data_length: u16,
    pub applicable_components: ComponentBitmap<'a>,
    pub image_set_version: VersionString<'a>,
    // descriptors and package data, up to the declared record length
    body: &'a [u8],
}

impl<'a> DeviceIdRecord<'a> {
    /// Parse one record. The remainder starts at `length` bytes from the
    /// start of this record, whatever the sub-fields add up to.
    pub fn parse(buf: &'a [u8], component_bits: u16) -> VResult<&'a [u8], Self> {
        let (
            r,
            (len, desc_count, flags, set_ver_type, set_ver_len, pkg_data_len),
        ) = tuple((le_u16, le_u8, le_u32, le_u8, le_u8, le_u16))(buf)?;

        let len_usize = len as usize;
        if len_usize < DEVICE_ID_RECORD_FIXED_SIZE {
            return Err(short(buf));
        }

        // split the length bytes into r
        let (rest, r) = take(len_usize - DEVICE_ID_RECORD_FIXED_SIZE)(r)?;

        let (r, components) = ComponentBitmap::parse(component_bits)(r)?;
        let (body, set_ver) = parse_string(set_ver_type, set_ver_len)(r)?;

        let rec = DeviceIdRecord {
            length: len,
            descriptor_count: desc_count,
            update_option_flags: flags,
            package_data_length: pkg_data_len,
            applicable_components: components,
            image_set_version: set_ver,
            body,
        };

        Ok((rest, rec))
    }

    pub fn descriptors(&self) -> DescriptorIter<'a> {
        DescriptorIter::new(self.body, self.descriptor_count as usize)
    }

    pub fn package_data(&self) -> Result<&'a [u8]> {
        let mut it = self.descriptors();
        for d in it.by_ref() {
            d?;
        }
        it.remainder()
            .get(..self.package_data_length as usize)
            .ok_or(Error::BadBufferSize)
    }

    /// Record length as computed from the sub-fields, rather than the
    /// declared `length`
    pub fn computed_len(&self) -> Result<usize> {
        let mut len = DEVICE_ID_RECORD_FIXED_SIZE
            + self.applicable_components.bits.len()
            + self.image_set_version.bytes.len();
        for d in self.descriptors() {
            len += d?.encoded_len();
        }
        Ok(len + self.package_data_length as usize)
    }
}

/// Iterates records of an already-parsed device identifier area
#[derive(Debug, Clone)]
pub struct DeviceIdRecordIter<'a> {
    buf: &'a [u8],
    remaining: usize,
    component_bits: u16,
}

impl<'a> Iterator for DeviceIdRecordIter<'a> {
    type Item = DeviceIdRecord<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        // every record was bounds checked by DeviceIdArea::parse
        match DeviceIdRecord::parse(self.buf, self.component_bits) {
            Ok((r, rec)) => {
                self.remaining -= 1;
                self.buf = r;
                Some(rec)
            }
            Err(_) => {
                self.remaining = 0;
                None
            }
        }
    }
}

/// Firmware device or downstream device identifier area
#[derive(Debug, Clone)]
pub struct DeviceIdArea<'a> {
    pub record_count: u8,
    records: &'a [u8],
    component_bits: u16,
}

impl<'a> DeviceIdArea<'a> {
    /// Parse an area starting at `buf`, walking each record by its
    /// declared length.
    pub fn parse(buf: &'a [u8], component_bits: u16) -> Result<Self> {
        let (body, record_count) =
            le_u8::<_, nom::error::Error<&[u8]>>(buf)?;

        let mut r = body;
        for _ in 0..record_count {
            let (next, _) = DeviceIdRecord::parse(r, component_bits)?;
            r = next;
        }

        let records = &body[..body.len() - r.len()];
        debug!(
            "device id area: records={} AreaSize={}",
            record_count,
            DEVICE_ID_AREA_HDR_SIZE + records.len()
        );

        Ok(DeviceIdArea {
            record_count,
            records,
            component_bits,
        })
    }

    /// Area size in bytes: the count byte plus each record's declared length
    pub fn size(&self) -> usize {
        DEVICE_ID_AREA_HDR_SIZE + self.records.len()
    }

    pub fn records(&self) -> DeviceIdRecordIter<'a> {
        DeviceIdRecordIter {
            buf: self.records,
            remaining: self.record_count as usize,
            component_bits: self.component_bits,
        }
    }
}

/// Component image information entry
#[derive(Debug, Clone)]
pub struct ComponentImageInfo<'a> {
    pub classification: ComponentClassification,
    pub identifier: u16,
    pub comparison_stamp: u32,
    pub options: ComponentOptions,
    pub requested_activation_method: ActivationMethods,
    pub location_offset: u32,
    pub size: u32,
    pub version: VersionString<'a>,
}

impl<'a> ComponentImageInfo<'a> {
    pub fn parse(buf: &'a [u8]) -> VResult<&'a [u8], Self> {
        let (
            r,
            (
                classification,
                identifier,
                comparison_stamp,
                options,
                activation_method,
                location_offset,
                size,
                version,
            ),
        ) = tuple((
            le_u16,
            le_u16,
            le_u32,
            le_u16,
            le_u16,
            le_u32,
            le_u32,
            parse_string_adjacent,
        ))(buf)?;

        let c = ComponentImageInfo {
            classification: classification.into(),
            identifier,
            comparison_stamp,
            options: flags_from_u32(options as u32),
            requested_activation_method: flags_from_u32(activation_method as u32),
            location_offset,
            size,
            version,
        };
        Ok((r, c))
    }

    /// Size of this entry in the header
    pub fn encoded_len(&self) -> usize {
        COMPONENT_IMAGE_INFO_FIXED_SIZE + self.version.bytes.len()
    }
}

#[derive(Debug, Clone)]
pub struct ComponentImageIter<'a> {
    buf: &'a [u8],
    remaining: usize,
}

impl<'a> Iterator for ComponentImageIter<'a> {
    type Item = ComponentImageInfo<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        // bounds checked by ComponentImageInfoArea::parse
        match ComponentImageInfo::parse(self.buf) {
            Ok((r, c)) => {
                self.remaining -= 1;
                self.buf = r;
                Some(c)
            }
            Err(_) => {
                self.remaining = 0;
                None
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ComponentImageInfoArea<'a> {
    pub image_count: u16,
    images: &'a [u8],
}

impl<'a> ComponentImageInfoArea<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<Self> {
        let (body, image_count) =
            le_u16::<_, nom::error::Error<&[u8]>>(buf)?;

        let mut r = body;
        for _ in 0..image_count {
            let (next, _) = ComponentImageInfo::parse(r)?;
            r = next;
        }

        let images = &body[..body.len() - r.len()];
        debug!(
            "component image area: images={} AreaSize={}",
            image_count,
            COMPONENT_IMAGE_AREA_HDR_SIZE + images.len()
        );

        Ok(ComponentImageInfoArea {
            image_count,
            images,
        })
    }

    pub fn size(&self) -> usize {
        COMPONENT_IMAGE_AREA_HDR_SIZE + self.images.len()
    }

    pub fn images(&self) -> ComponentImageIter<'a> {
        ComponentImageIter {
            buf: self.images,
            remaining: self.image_count as usize,
        }
    }
}

/// How to treat more than one device identifier record matching the
/// local descriptors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchPolicy {
    /// The first matching record wins
    #[default]
    FirstMatch,
    /// A second matching record is an [`Error::AmbiguousMatch`]
    RejectAmbiguous,
}

/// The package header, borrowed from the start of the package buffer
#[derive(Debug, Clone)]
pub struct PackageHeader<'a> {
    buf: &'a [u8],
    pub identifier: Uuid,
    pub format_revision: u8,
    pub size: u16,
    pub release_date_time: Timestamp104,
    pub component_bitmap_bit_length: u16,
    pub version: VersionString<'a>,
}

impl<'a> PackageHeader<'a> {
    /// Parse the fixed header fields and version string of the package in
    /// `buf`. `buf` is the whole package, header and images.
    pub fn parse(buf: &'a [u8]) -> Result<Self> {
        if buf.is_empty() {
            return Err(Error::InvalidParameter("empty package buffer"));
        }

        let (
            _,
            (
                identifier,
                format_revision,
                size,
                release_date_time,
                component_bitmap_bit_length,
                version,
            ),
        ) = tuple((
            map_res(take(16usize), Uuid::from_slice),
            le_u8,
            le_u16,
            map_res(take(TIMESTAMP104_SIZE), |b: &[u8]| {
                b.try_into().map(Timestamp104)
            }),
            le_u16,
            parse_string_adjacent,
        ))(buf)?;

        Ok(PackageHeader {
            buf,
            identifier,
            format_revision,
            size,
            release_date_time,
            component_bitmap_bit_length,
            version,
        })
    }

    /// The full package buffer this header was parsed from
    pub fn as_bytes(&self) -> &'a [u8] {
        self.buf
    }

    pub fn fw_device_id_area(&self) -> Result<DeviceIdArea<'a>> {
        let offset = PKG_HDR_FIXED_SIZE + self.version.bytes.len();
        debug!("fw device id area offset=0x{:x}", offset);
        let buf = self.buf.get(offset..).ok_or(Error::BadBufferSize)?;
        DeviceIdArea::parse(buf, self.component_bitmap_bit_length)
    }

    /// Only present from format revision 2
    pub fn downstream_device_id_area(&self) -> Result<Option<DeviceIdArea<'a>>> {
        if self.format_revision < PKG_FORMAT_REVISION_2 {
            return Ok(None);
        }

        let offset = PKG_HDR_FIXED_SIZE
            + self.version.bytes.len()
            + self.fw_device_id_area()?.size();
        let buf = self.buf.get(offset..).ok_or(Error::BadBufferSize)?;
        DeviceIdArea::parse(buf, self.component_bitmap_bit_length).map(Some)
    }

    pub fn component_image_info_area(&self) -> Result<ComponentImageInfoArea<'a>> {
        let mut offset = PKG_HDR_FIXED_SIZE
            + self.version.bytes.len()
            + self.fw_device_id_area()?.size();
        if let Some(ds) = self.downstream_device_id_area()? {
            offset += ds.size();
        }
        let buf = self.buf.get(offset..).ok_or(Error::BadBufferSize)?;
        ComponentImageInfoArea::parse(buf)
    }

    /// Check the header against the whole package buffer. Checks run in a
    /// fixed order and the first failure is returned.
    pub fn validate(&self) -> Result<()> {
        const FUNC: &str = "PackageHeader::validate";
        let length = self.buf.len();
        let hdr_size = self.size as usize;

        if length < PKG_HDR_FIXED_SIZE
            || length < hdr_size
            || hdr_size < PKG_HDR_FIXED_SIZE + PKG_HDR_CRC_SIZE
        {
            error!("{}: bad length={} hdr size={}", FUNC, length, hdr_size);
            return Err(Error::BadBufferSize);
        }

        let expected_uuid = match self.format_revision {
            PKG_FORMAT_REVISION_1 => PKG_UUID_V1_0,
            PKG_FORMAT_REVISION_2 => PKG_UUID_V1_1,
            v => {
                error!("{}: unsupported version={}", FUNC, v);
                return Err(Error::Unsupported("package format revision"));
            }
        };

        if self.identifier != expected_uuid {
            error!("{}: invalid package id {}", FUNC, self.identifier);
            return Err(Error::Unsupported("package identifier"));
        }

        let crc_offset = hdr_size - PKG_HDR_CRC_SIZE;
        let c = &self.buf[crc_offset..hdr_size];
        let stored = u32::from_le_bytes([c[0], c[1], c[2], c[3]]);
        let crc32 = Crc::<u32>::new(&CRC_32_ISO_HDLC);
        let computed = crc32.checksum(&self.buf[..crc_offset]);
        if stored != computed {
            error!(
                "{}: Crc offset={} mismatch 0x{:x}/0x{:x}",
                FUNC, crc_offset, stored, computed
            );
            return Err(Error::CrcError { stored, computed });
        }

        if self.component_bitmap_bit_length % 8 != 0 {
            error!(
                "{}: invalid ComponentBitmapBitLength={}",
                FUNC, self.component_bitmap_bit_length
            );
            return Err(Error::Unsupported("component bitmap bit length"));
        }

        let fw_area = self.fw_device_id_area()?;
        let ds_area = self.downstream_device_id_area()?;
        let image_area = self.component_image_info_area()?;

        let mut pkg_len = PKG_HDR_FIXED_SIZE + self.version.bytes.len();
        pkg_len += fw_area.size();
        if let Some(ds) = &ds_area {
            pkg_len += ds.size();
        }
        pkg_len += image_area.size();
        pkg_len += PKG_HDR_CRC_SIZE;

        if pkg_len != hdr_size {
            error!("{}: invalid hdr length {}/{}", FUNC, pkg_len, hdr_size);
            return Err(Error::Unsupported("header size"));
        }

        for rec in fw_area.records().chain(ds_area.iter().flat_map(|a| a.records())) {
            match rec.computed_len() {
                Ok(l) if l == rec.length as usize => (),
                l => {
                    error!(
                        "{}: device id record length {} computed {:?}",
                        FUNC, rec.length, l
                    );
                    return Err(Error::Unsupported("device identifier record length"));
                }
            }
        }

        for img in image_area.images() {
            pkg_len += img.size as usize;
        }

        if pkg_len != length {
            error!("{}: invalid pkg length {}/{}", FUNC, pkg_len, length);
            return Err(Error::Unsupported("package length"));
        }

        Ok(())
    }

    /// Find the first firmware device record whose descriptors all appear
    /// in `local`.
    pub fn matches_firmware_device(
        &self,
        local: &[Descriptor<'_>],
    ) -> Result<Option<DeviceIdRecord<'a>>> {
        self.find_firmware_device(local, MatchPolicy::FirstMatch)
            .map(|m| m.map(|(_, rec)| rec))
    }

    /// As [`matches_firmware_device`](Self::matches_firmware_device), also
    /// returning the record index, with the ambiguity handling chosen by
    /// `policy`.
    pub fn find_firmware_device(
        &self,
        local: &[Descriptor<'_>],
        policy: MatchPolicy,
    ) -> Result<Option<(usize, DeviceIdRecord<'a>)>> {
        let area = self.fw_device_id_area()?;
        let mut found: Option<(usize, DeviceIdRecord<'a>)> = None;

        for (i, rec) in area.records().enumerate() {
            if !record_matches(&rec, local)? {
                continue;
            }

            if let Some((first, _)) = &found {
                error!("device id records {} and {} both match", first, i);
                return Err(Error::AmbiguousMatch {
                    first: *first,
                    second: i,
                });
            }
            if policy == MatchPolicy::FirstMatch {
                return Ok(Some((i, rec)));
            }
            found = Some((i, rec));
        }

        Ok(found)
    }

    /// Whether component `index` of the component image area applies to
    /// the device described by `record`
    pub fn component_is_applicable(
        &self,
        index: usize,
        record: &DeviceIdRecord<'_>,
    ) -> Result<bool> {
        if index >= self.component_bitmap_bit_length as usize {
            return Err(Error::InvalidParameter("component index beyond bitmap"));
        }
        record.applicable_components.is_set(index)
    }

    /// The image payload described by `info`
    pub fn image_data(&self, info: &ComponentImageInfo<'_>) -> Result<&'a [u8]> {
        let start = info.location_offset as usize;
        let end = start
            .checked_add(info.size as usize)
            .ok_or(Error::BadBufferSize)?;
        self.buf.get(start..end).ok_or(Error::BadBufferSize)
    }
}

fn record_matches(
    rec: &DeviceIdRecord<'_>,
    local: &[Descriptor<'_>],
) -> Result<bool> {
    for d in rec.descriptors() {
        let d = d?;
        info!("Type=0x{:x} Len={} {}", d.typ, d.data.len(), d);
        if !pldm_fw::descriptor_is_in_list(&d, local) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// A package whose header has been validated
#[derive(Debug, Clone)]
pub struct Package<'a> {
    hdr: PackageHeader<'a>,
    fw_devices: DeviceIdArea<'a>,
    downstream_devices: Option<DeviceIdArea<'a>>,
    components: ComponentImageInfoArea<'a>,
}

impl<'a> Package<'a> {
    pub fn new(buf: &'a [u8]) -> Result<Self> {
        let hdr = PackageHeader::parse(buf)?;
        hdr.validate()?;

        Ok(Package {
            fw_devices: hdr.fw_device_id_area()?,
            downstream_devices: hdr.downstream_device_id_area()?,
            components: hdr.component_image_info_area()?,
            hdr,
        })
    }

    pub fn header(&self) -> &PackageHeader<'a> {
        &self.hdr
    }

    pub fn devices(&self) -> DeviceIdRecordIter<'a> {
        self.fw_devices.records()
    }

    pub fn downstream_devices(&self) -> Option<DeviceIdRecordIter<'a>> {
        self.downstream_devices.as_ref().map(|a| a.records())
    }

    pub fn components(&self) -> ComponentImageIter<'a> {
        self.components.images()
    }

    pub fn find_firmware_device(
        &self,
        local: &[Descriptor<'_>],
        policy: MatchPolicy,
    ) -> Result<Option<(usize, DeviceIdRecord<'a>)>> {
        self.hdr.find_firmware_device(local, policy)
    }

    /// Components that apply to `record`, with their index. Fails with
    /// `InvalidParameter` if the package has more components than the
    /// bitmap has bits.
    pub fn applicable_components(
        &self,
        record: &DeviceIdRecord<'_>,
    ) -> Result<Vec<(usize, ComponentImageInfo<'a>)>> {
        let mut v = Vec::new();
        for (i, c) in self.components().enumerate() {
            if self.hdr.component_is_applicable(i, record)? {
                v.push((i, c));
            }
        }
        Ok(v)
    }

    pub fn image_data(&self, info: &ComponentImageInfo<'_>) -> Result<&'a [u8]> {
        self.hdr.image_data(info)
    }
}

/// Parse and validate the package header in `buf`
pub fn validate_header(buf: &[u8]) -> Result<PackageHeader<'_>> {
    let hdr = PackageHeader::parse(buf)?;
    hdr.validate()?;
    Ok(hdr)
}

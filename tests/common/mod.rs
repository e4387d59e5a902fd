// SPDX-License-Identifier: GPL-3.0-or-later
/*
 * PLDM firmware update: test package and response builders
 *
 * Copyright (c) 2023 Code Construct
 */

#![allow(dead_code)]

use crc::{Crc, CRC_32_ISO_HDLC};
use pldm_fw_pkg::pldm_fw_pkg::{PKG_UUID_V1_0, PKG_UUID_V1_1};
use uuid::Uuid;

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub const PCI_VID: u16 = 0x0000;
pub const PCI_DID: u16 = 0x0100;
pub const IANA: u16 = 0x0001;

/// Offset of the header size field
pub const SIZE_OFFSET: usize = 17;

#[derive(Debug, Clone, Default)]
pub struct DeviceRecord {
    pub flags: u32,
    pub bitmap: Vec<u8>,
    pub version: Vec<u8>,
    pub descriptors: Vec<(u16, Vec<u8>)>,
    pub package_data: Vec<u8>,
    /// Added to the computed record length
    pub length_skew: i32,
    /// Added to the declared package data length only
    pub package_data_skew: i32,
}

impl DeviceRecord {
    pub fn new(bitmap: &[u8], descriptors: &[(u16, &[u8])]) -> Self {
        DeviceRecord {
            bitmap: bitmap.to_vec(),
            version: b"1.0".to_vec(),
            descriptors: descriptors
                .iter()
                .map(|(t, d)| (*t, d.to_vec()))
                .collect(),
            ..Default::default()
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        let desc_len: usize =
            self.descriptors.iter().map(|(_, d)| 4 + d.len()).sum();
        let len = 11
            + self.bitmap.len()
            + self.version.len()
            + desc_len
            + self.package_data.len();
        let len = (len as i32 + self.length_skew) as u16;

        out.extend_from_slice(&len.to_le_bytes());
        out.push(self.descriptors.len() as u8);
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.push(1);
        out.push(self.version.len() as u8);
        let pkg_len = (self.package_data.len() as i32 + self.package_data_skew) as u16;
        out.extend_from_slice(&pkg_len.to_le_bytes());
        out.extend_from_slice(&self.bitmap);
        out.extend_from_slice(&self.version);
        for (t, d) in &self.descriptors {
            out.extend_from_slice(&t.to_le_bytes());
            out.extend_from_slice(&(d.len() as u16).to_le_bytes());
            out.extend_from_slice(d);
        }
        out.extend_from_slice(&self.package_data);
    }
}

#[derive(Debug, Clone, Default)]
pub struct Component {
    pub classification: u16,
    pub identifier: u16,
    pub comparison_stamp: u32,
    pub options: u16,
    pub activation: u16,
    pub version: Vec<u8>,
    pub image: Vec<u8>,
}

impl Component {
    pub fn new(identifier: u16, image: &[u8]) -> Self {
        Component {
            classification: 0x000a,
            identifier,
            version: b"fw-1".to_vec(),
            image: image.to_vec(),
            ..Default::default()
        }
    }
}

/// Emits a complete package: header with correct size and CRC, then the
/// component images back to back.
#[derive(Debug, Clone)]
pub struct PackageBuilder {
    pub revision: u8,
    pub identifier: Uuid,
    pub bitmap_bits: u16,
    pub version: Vec<u8>,
    pub release: [u8; 13],
    pub devices: Vec<DeviceRecord>,
    pub downstream: Vec<DeviceRecord>,
    pub components: Vec<Component>,
}

impl PackageBuilder {
    pub fn new(revision: u8) -> Self {
        PackageBuilder {
            revision,
            identifier: if revision >= 2 {
                PKG_UUID_V1_1
            } else {
                PKG_UUID_V1_0
            },
            bitmap_bits: 16,
            version: b"pkg-1.0".to_vec(),
            release: [0; 13],
            devices: Vec::new(),
            downstream: Vec::new(),
            components: Vec::new(),
        }
    }

    pub fn device(mut self, rec: DeviceRecord) -> Self {
        self.devices.push(rec);
        self
    }

    pub fn downstream(mut self, rec: DeviceRecord) -> Self {
        self.downstream.push(rec);
        self
    }

    pub fn component(mut self, c: Component) -> Self {
        self.components.push(c);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.identifier.as_bytes());
        out.push(self.revision);
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&self.release);
        out.extend_from_slice(&self.bitmap_bits.to_le_bytes());
        out.push(1);
        out.push(self.version.len() as u8);
        out.extend_from_slice(&self.version);

        out.push(self.devices.len() as u8);
        for d in &self.devices {
            d.encode(&mut out);
        }

        if self.revision >= 2 {
            out.push(self.downstream.len() as u8);
            for d in &self.downstream {
                d.encode(&mut out);
            }
        }

        out.extend_from_slice(&(self.components.len() as u16).to_le_bytes());
        let mut offset_fields = Vec::new();
        for c in &self.components {
            out.extend_from_slice(&c.classification.to_le_bytes());
            out.extend_from_slice(&c.identifier.to_le_bytes());
            out.extend_from_slice(&c.comparison_stamp.to_le_bytes());
            out.extend_from_slice(&c.options.to_le_bytes());
            out.extend_from_slice(&c.activation.to_le_bytes());
            offset_fields.push(out.len());
            out.extend_from_slice(&[0; 4]);
            out.extend_from_slice(&(c.image.len() as u32).to_le_bytes());
            out.push(1);
            out.push(c.version.len() as u8);
            out.extend_from_slice(&c.version);
        }

        let size = out.len() + 4;
        out[SIZE_OFFSET..SIZE_OFFSET + 2]
            .copy_from_slice(&(size as u16).to_le_bytes());

        let mut location = size as u32;
        for (field, c) in offset_fields.iter().zip(&self.components) {
            out[*field..*field + 4].copy_from_slice(&location.to_le_bytes());
            location += c.image.len() as u32;
        }

        out.extend_from_slice(&[0; 4]);
        fix_crc(&mut out);

        for c in &self.components {
            out.extend_from_slice(&c.image);
        }
        out
    }
}

pub fn header_size(pkg: &[u8]) -> usize {
    u16::from_le_bytes([pkg[SIZE_OFFSET], pkg[SIZE_OFFSET + 1]]) as usize
}

/// Recompute the header CRC after editing header bytes
pub fn fix_crc(pkg: &mut [u8]) {
    let size = header_size(pkg);
    let crc32 = Crc::<u32>::new(&CRC_32_ISO_HDLC);
    let crc = crc32.checksum(&pkg[..size - 4]);
    pkg[size - 4..size].copy_from_slice(&crc.to_le_bytes());
}

/// Query Device Identifiers response, instance 0
pub fn query_ids_rsp(descriptors: &[(u16, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (t, d) in descriptors {
        body.extend_from_slice(&t.to_le_bytes());
        body.extend_from_slice(&(d.len() as u16).to_le_bytes());
        body.extend_from_slice(d);
    }

    let mut out = vec![0x00, 0x05, 0x01, 0x00];
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.push(descriptors.len() as u8);
    out.extend_from_slice(&body);
    out
}

#[derive(Debug, Clone, Default)]
pub struct ParamEntry {
    pub classification: u16,
    pub identifier: u16,
    pub active_stamp: u32,
    pub active: Vec<u8>,
    pub active_date: [u8; 8],
    pub pending: Vec<u8>,
    pub activation: u16,
    pub caps: u32,
}

impl ParamEntry {
    pub fn new(classification: u16, identifier: u16, active: &[u8]) -> Self {
        ParamEntry {
            classification,
            identifier,
            active: active.to_vec(),
            ..Default::default()
        }
    }
}

/// Get Firmware Parameters response, instance 0
pub fn fw_params_rsp(
    caps: u32,
    active: &[u8],
    pending: &[u8],
    entries: &[ParamEntry],
) -> Vec<u8> {
    let mut out = vec![0x00, 0x05, 0x02, 0x00];
    out.extend_from_slice(&caps.to_le_bytes());
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    out.extend_from_slice(&[1, active.len() as u8, 1, pending.len() as u8]);
    out.extend_from_slice(active);
    out.extend_from_slice(pending);

    for e in entries {
        out.extend_from_slice(&e.classification.to_le_bytes());
        out.extend_from_slice(&e.identifier.to_le_bytes());
        out.push(0);
        out.extend_from_slice(&e.active_stamp.to_le_bytes());
        out.extend_from_slice(&[1, e.active.len() as u8]);
        out.extend_from_slice(&e.active_date);
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&[1, e.pending.len() as u8]);
        out.extend_from_slice(&[0; 8]);
        out.extend_from_slice(&e.activation.to_le_bytes());
        out.extend_from_slice(&e.caps.to_le_bytes());
        out.extend_from_slice(&e.active);
        out.extend_from_slice(&e.pending);
    }
    out
}

/*
 * Copyright (C) 2023 The Android Open Source Project
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

/// `verity` module implements the "verity" target in the device mapper
/// framework. Specifically, it provides `DmVerityTargetBuilder` struct which
/// is used to construct a `DmVerityTarget` struct which is then given to
/// `DeviceMapper` to create a mapper device.
use crate::DmTargetSpec;

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::mem::size_of;
use std::path::Path;
use zerocopy::AsBytes;

const SECTOR_SIZE: u64 = 512;

// The UAPI for the verity target is at:
// Documentation/admin-guide/device-mapper/verity.rst

/// Digest check failure policy of the kernel driver. The kernel returns EIO
/// by default; the other two modes are explicit table arguments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DmVerityMode {
    /// Fail the read with EIO (kernel default, no table token).
    Eio,
    /// Restart the system when a corrupted block is found.
    RestartOnCorruption,
    /// Log the error and continue; the device is effectively unprotected.
    IgnoreCorruption,
}

impl DmVerityMode {
    fn token(&self) -> Option<&'static str> {
        match self {
            DmVerityMode::Eio => None,
            DmVerityMode::RestartOnCorruption => Some("restart_on_corruption"),
            DmVerityMode::IgnoreCorruption => Some("ignore_corruption"),
        }
    }
}

/// Forward error correction arguments of a verity target.
pub struct DmVerityFec<'a> {
    /// Device holding the Reed-Solomon parity data.
    pub device: &'a Path,
    /// Number of parity roots.
    pub num_roots: u32,
    /// Size of the FEC area, in data blocks.
    pub blocks: u64,
    /// First data block of the FEC area.
    pub start: u64,
}

pub struct DmVerityTarget(Box<[u8]>);

impl DmVerityTarget {
    /// Flatten into slice
    pub fn as_slice(&self) -> &[u8] {
        self.0.as_ref()
    }
}

pub struct DmVerityTargetBuilder<'a> {
    version: u32,
    data_device: Option<&'a Path>,
    data_size: u64,
    hash_device: Option<&'a Path>,
    data_block_size: u32,
    hash_block_size: u32,
    hash_start_block: u64,
    hash_algorithm: &'a str,
    root_digest: Option<&'a str>,
    salt: Option<&'a str>,
    fec: Option<DmVerityFec<'a>>,
    mode: DmVerityMode,
    ignore_zero_blocks: bool,
}

impl<'a> Default for DmVerityTargetBuilder<'a> {
    fn default() -> Self {
        DmVerityTargetBuilder {
            version: 1,
            data_device: None,
            data_size: 0,
            hash_device: None,
            data_block_size: 4096,
            hash_block_size: 4096,
            hash_start_block: 0,
            hash_algorithm: "sha256",
            root_digest: None,
            salt: None,
            fec: None,
            mode: DmVerityMode::Eio,
            ignore_zero_blocks: false,
        }
    }
}

impl<'a> DmVerityTargetBuilder<'a> {
    /// Sets the on-disk format version of the verity target.
    pub fn version(&mut self, version: u32) -> &mut Self {
        self.version = version;
        self
    }

    /// Sets the device that will be used as the data device (i.e. providing
    /// actual data) and its size in bytes.
    pub fn data_device(&mut self, p: &'a Path, size: u64) -> &mut Self {
        self.data_device = Some(p);
        self.data_size = size;
        self
    }

    /// Sets the device providing the hash tree. May be the data device when
    /// the tree is appended to the filesystem image.
    pub fn hash_device(&mut self, p: &'a Path) -> &mut Self {
        self.hash_device = Some(p);
        self
    }

    /// Sets the data block size and the hash block size, in bytes.
    pub fn block_sizes(&mut self, data: u32, hash: u32) -> &mut Self {
        self.data_block_size = data;
        self.hash_block_size = hash;
        self
    }

    /// Sets the block number (in hash blocks) where the hash tree starts on
    /// the hash device.
    pub fn hash_start_block(&mut self, block: u64) -> &mut Self {
        self.hash_start_block = block;
        self
    }

    /// Sets the hash algorithm that the hash tree uses.
    pub fn hash_algorithm(&mut self, algorithm: &'a str) -> &mut Self {
        self.hash_algorithm = algorithm;
        self
    }

    /// Sets the root digest of the hash tree, hex-encoded.
    pub fn root_digest(&mut self, digest: &'a str) -> &mut Self {
        self.root_digest = Some(digest);
        self
    }

    /// Sets the salt used when hashing, hex-encoded. May be empty.
    pub fn salt(&mut self, salt: &'a str) -> &mut Self {
        self.salt = Some(salt);
        self
    }

    /// Attaches forward error correction data to the target.
    pub fn fec(&mut self, fec: DmVerityFec<'a>) -> &mut Self {
        self.fec = Some(fec);
        self
    }

    /// Sets the behavior on detection of a corrupted block.
    pub fn mode(&mut self, mode: DmVerityMode) -> &mut Self {
        self.mode = mode;
        self
    }

    /// Treats blocks of zeroes as valid without consulting the tree.
    pub fn ignore_zero_blocks(&mut self) -> &mut Self {
        self.ignore_zero_blocks = true;
        self
    }

    /// Constructs a `DmVerityTarget`.
    pub fn build(&self) -> Result<DmVerityTarget> {
        // The `DmVerityTarget` struct actually is a flattened data consisting
        // of a header and body. The format of the header is `dm_target_spec`
        // as defined in include/uapi/linux/dm-ioctl.h.
        let data_device = self
            .data_device
            .context("data device is not set")?
            .to_str()
            .context("data device path is not encoded in utf8")?;
        let hash_device = self
            .hash_device
            .context("hash device is not set")?
            .to_str()
            .context("hash device path is not encoded in utf8")?;
        let root_digest = self.root_digest.context("root digest is not set")?;
        let salt = match self.salt {
            Some(salt) if !salt.is_empty() => salt,
            _ => "-", // Denotes an empty salt.
        };

        if self.data_block_size == 0 || self.data_size % u64::from(self.data_block_size) != 0 {
            bail!(
                "data size {} is not a multiple of the block size {}",
                self.data_size,
                self.data_block_size
            );
        }
        let num_data_blocks = self.data_size / u64::from(self.data_block_size);

        // Serialize the information according to the spec, which is ...
        // DmTargetSpec{...}
        // <version> <data_device> <hash_device> <data_block_size> \
        // <hash_block_size> <num_data_blocks> <hash_start_block> <algorithm> \
        // <digest> <salt> [<#opt_params> <opt_params>]
        let mut body = String::new();
        use std::fmt::Write;
        write!(&mut body, "{} ", self.version)?;
        write!(&mut body, "{} ", data_device)?;
        write!(&mut body, "{} ", hash_device)?;
        write!(&mut body, "{} ", self.data_block_size)?;
        write!(&mut body, "{} ", self.hash_block_size)?;
        write!(&mut body, "{} ", num_data_blocks)?;
        write!(&mut body, "{} ", self.hash_start_block)?;
        write!(&mut body, "{} ", self.hash_algorithm)?;
        write!(&mut body, "{} ", root_digest)?;
        write!(&mut body, "{}", salt)?;

        let mut optional_args = Vec::new();
        if let Some(fec) = &self.fec {
            let fec_device = fec
                .device
                .to_str()
                .context("fec device path is not encoded in utf8")?;
            optional_args.push("use_fec_from_device".to_string());
            optional_args.push(fec_device.to_string());
            optional_args.push("fec_roots".to_string());
            optional_args.push(fec.num_roots.to_string());
            optional_args.push("fec_blocks".to_string());
            optional_args.push(fec.blocks.to_string());
            optional_args.push("fec_start".to_string());
            optional_args.push(fec.start.to_string());
        }
        if let Some(token) = self.mode.token() {
            optional_args.push(token.to_string());
        }
        if self.ignore_zero_blocks {
            optional_args.push("ignore_zero_blocks".to_string());
        }
        if !optional_args.is_empty() {
            write!(&mut body, " {} {}", optional_args.len(), optional_args.join(" "))?;
        }
        write!(&mut body, "\0")?; // null terminator

        let size = size_of::<DmTargetSpec>() + body.len();
        let aligned_size = (size + 7) & !7; // align to 8 byte boundaries
        let padding = aligned_size - size;

        let mut header = DmTargetSpec::new("verity")?;
        header.sector_start = 0;
        header.length = self.data_size / SECTOR_SIZE; // number of 512-byte sectors
        header.next = aligned_size as u32;

        let mut buf = Vec::with_capacity(aligned_size);
        buf.write_all(header.as_bytes())?;
        buf.write_all(body.as_bytes())?;
        buf.write_all(vec![0; padding].as_slice())?;

        Ok(DmVerityTarget(buf.into_boxed_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_string(target: &DmVerityTarget) -> String {
        let body = &target.as_slice()[size_of::<DmTargetSpec>()..];
        let nul = body.iter().position(|b| *b == 0).unwrap();
        String::from_utf8(body[..nul].to_vec()).unwrap()
    }

    #[test]
    fn basic_table_layout() {
        let device = Path::new("/dev/block/by-name/system_a");
        let target = DmVerityTargetBuilder::default()
            .data_device(device, 8 * 1024 * 1024)
            .hash_device(device)
            .hash_start_block(2048)
            .root_digest("deadbeef")
            .salt("cafe")
            .build()
            .unwrap();

        assert_eq!(
            body_string(&target),
            "1 /dev/block/by-name/system_a /dev/block/by-name/system_a \
             4096 4096 2048 2048 sha256 deadbeef cafe"
        );
        // 8 MiB in 512-byte sectors.
        assert_eq!(target.as_slice().len() % 8, 0);
    }

    #[test]
    fn empty_salt_is_dash() {
        let device = Path::new("/dev/sda1");
        let target = DmVerityTargetBuilder::default()
            .data_device(device, 4096)
            .hash_device(device)
            .root_digest("00")
            .salt("")
            .build()
            .unwrap();
        assert!(body_string(&target).ends_with("00 -"));
    }

    #[test]
    fn optional_args_are_counted() {
        let device = Path::new("/dev/sda1");
        let target = DmVerityTargetBuilder::default()
            .data_device(device, 4096)
            .hash_device(device)
            .root_digest("00")
            .fec(DmVerityFec { device, num_roots: 2, blocks: 1029, start: 1029 })
            .mode(DmVerityMode::RestartOnCorruption)
            .ignore_zero_blocks()
            .build()
            .unwrap();
        assert!(body_string(&target).ends_with(
            "10 use_fec_from_device /dev/sda1 fec_roots 2 fec_blocks 1029 \
             fec_start 1029 restart_on_corruption ignore_zero_blocks"
        ));
    }

    #[test]
    fn eio_mode_has_no_token() {
        let device = Path::new("/dev/sda1");
        let target = DmVerityTargetBuilder::default()
            .data_device(device, 4096)
            .hash_device(device)
            .root_digest("00")
            .mode(DmVerityMode::Eio)
            .build()
            .unwrap();
        assert!(body_string(&target).ends_with("00 -"));
    }

    #[test]
    fn misaligned_data_size_is_rejected() {
        let device = Path::new("/dev/sda1");
        assert!(DmVerityTargetBuilder::default()
            .data_device(device, 4097)
            .hash_device(device)
            .root_digest("00")
            .build()
            .is_err());
    }

    #[test]
    fn missing_data_device_is_rejected() {
        assert!(DmVerityTargetBuilder::default()
            .root_digest("00")
            .build()
            .is_err());
    }
}

// Copyright 2023, The Android Open Source Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Finding a partition's hashtree descriptor in the verified vbmeta images
//! and programming a dm-verity device from it.

use anyhow::{anyhow, bail, Context, Result};
use avb::Descriptor;
use devicemapper::verity::{DmVerityFec, DmVerityMode, DmVerityTarget, DmVerityTargetBuilder};
use devicemapper::DeviceMapper;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bootconfig::BootConfig;
use crate::fstab::FstabEntry;
use crate::util::{bytes_to_hex, set_block_device_readonly, wait_for_file};
use crate::vbmeta::VBMetaData;

/// A hashtree descriptor copied out of a verified vbmeta image, with the
/// salt and root digest already hex-encoded the way the kernel table wants
/// them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HashtreeDescriptor {
    /// dm-verity on-disk format version.
    pub dm_verity_version: u32,
    /// Size of the filesystem data covered by the tree.
    pub image_size: u64,
    /// Offset of the tree within the partition.
    pub tree_offset: u64,
    /// Block size the data is hashed in.
    pub data_block_size: u32,
    /// Block size of the tree nodes.
    pub hash_block_size: u32,
    /// Number of Reed-Solomon parity roots, 0 if there is no FEC.
    pub fec_num_roots: u32,
    /// Offset of the FEC data within the partition.
    pub fec_offset: u64,
    /// Size of the FEC data.
    pub fec_size: u64,
    /// Hash algorithm name, e.g. `sha256`.
    pub hash_algorithm: String,
    /// Hex-encoded salt.
    pub salt: String,
    /// Hex-encoded root digest.
    pub root_digest: String,
}

/// Scans the verified images in chain order for the hashtree descriptor of
/// `partition_name`. An image or descriptor that does not parse is skipped
/// as untrusted rather than aborting the scan; only a completely missing
/// descriptor is an error.
pub fn get_hashtree_descriptor(
    partition_name: &str,
    vbmeta_images: &[VBMetaData],
) -> Result<HashtreeDescriptor> {
    for vbmeta in vbmeta_images {
        let Ok(descriptors) = avb::descriptors(vbmeta.data()) else {
            warn!("{}: skipping vbmeta with invalid descriptors", vbmeta.partition());
            continue;
        };
        for (i, descriptor) in descriptors.iter().enumerate() {
            if let Descriptor::Hashtree(_) = descriptor {
                let Ok(hashtree) = descriptor.to_hashtree() else {
                    warn!("{}: descriptor[{}] is invalid", vbmeta.partition(), i);
                    continue;
                };
                // The name is not NUL-terminated; the descriptor's length
                // field decides how many bytes take part in the comparison.
                if hashtree.partition_name() != partition_name.as_bytes() {
                    continue;
                }
                return Ok(HashtreeDescriptor {
                    dm_verity_version: hashtree.dm_verity_version,
                    image_size: hashtree.image_size,
                    tree_offset: hashtree.tree_offset,
                    data_block_size: hashtree.data_block_size,
                    hash_block_size: hashtree.hash_block_size,
                    fec_num_roots: hashtree.fec_num_roots,
                    fec_offset: hashtree.fec_offset,
                    fec_size: hashtree.fec_size,
                    hash_algorithm: hashtree.hash_algorithm.clone(),
                    salt: bytes_to_hex(hashtree.salt()),
                    root_digest: bytes_to_hex(hashtree.root_digest()),
                });
            }
        }
    }
    bail!("partition descriptor not found: {partition_name}");
}

/// Builds the dm-verity table for a hashtree-protected partition.
///
/// The check failure policy comes from the boot config key `veritymode`:
/// absent or `enforcing` restarts on corruption, `logging` only logs, `eio`
/// leaves the kernel default, anything else is rejected.
fn construct_verity_table(
    hashtree_desc: &HashtreeDescriptor,
    blk_device: &Path,
    bootconfig: &BootConfig,
) -> Result<DmVerityTarget> {
    let verity_mode = bootconfig.get("veritymode").unwrap_or("enforcing");
    let mode = match verity_mode {
        "enforcing" => DmVerityMode::RestartOnCorruption,
        "logging" => DmVerityMode::IgnoreCorruption,
        "eio" => DmVerityMode::Eio, // the kernel default
        other => bail!("unknown androidboot.veritymode: {other}"),
    };

    if hashtree_desc.data_block_size == 0 || hashtree_desc.hash_block_size == 0 {
        bail!("zero block size in hashtree descriptor");
    }

    let mut builder = DmVerityTargetBuilder::default();
    builder
        .version(hashtree_desc.dm_verity_version)
        .data_device(blk_device, hashtree_desc.image_size)
        .hash_device(blk_device)
        .block_sizes(hashtree_desc.data_block_size, hashtree_desc.hash_block_size)
        .hash_start_block(hashtree_desc.tree_offset / u64::from(hashtree_desc.hash_block_size))
        .hash_algorithm(&hashtree_desc.hash_algorithm)
        .root_digest(&hashtree_desc.root_digest)
        .salt(&hashtree_desc.salt)
        .mode(mode)
        // Always use ignore_zero_blocks.
        .ignore_zero_blocks();
    if hashtree_desc.fec_size > 0 {
        let fec_blocks = hashtree_desc.fec_offset / u64::from(hashtree_desc.data_block_size);
        // TODO: fec_blocks and fec_start both carry fec_offset /
        // data_block_size; check whether fec_blocks should instead be the
        // number of blocks the FEC area spans.
        builder.fec(DmVerityFec {
            device: blk_device,
            num_roots: hashtree_desc.fec_num_roots,
            blocks: fec_blocks,
            start: fec_blocks,
        });
    }
    builder.build()
}

/// The device-mapper capability used to instantiate verity devices. The
/// kernel-backed implementation is [`DeviceMapper`]; tests substitute an
/// in-memory fake.
pub trait VerityDevice {
    /// Creates a read-only verity device `name` from `target` and returns
    /// the mapper device path.
    fn create_verity_device(&self, name: &str, target: &DmVerityTarget) -> Result<PathBuf>;
}

impl VerityDevice for DeviceMapper {
    fn create_verity_device(&self, name: &str, target: &DmVerityTarget) -> Result<PathBuf> {
        DeviceMapper::create_verity_device(self, name, target)
    }
}

/// Stacks a dm-verity device on top of `fstab_entry.blk_device` according to
/// a verified hashtree descriptor, then redirects the mount record at the
/// mapper device. The mapper device is named after the mount point's
/// basename, so `/system` is served by `system`.
pub fn hashtree_dm_verity_setup(
    dm: &impl VerityDevice,
    fstab_entry: &mut FstabEntry,
    hashtree_desc: &HashtreeDescriptor,
    bootconfig: &BootConfig,
    wait_for_verity_dev: bool,
) -> Result<()> {
    let table = construct_verity_table(hashtree_desc, &fstab_entry.blk_device, bootconfig)
        .context("failed to construct verity table")?;

    let device_name = fstab_entry
        .mount_point
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("bad mount point: {:?}", fstab_entry.mount_point))?;

    let dev_path = dm
        .create_verity_device(device_name, &table)
        .context("couldn't create verity device")?;
    info!("{}: created dm-verity device {}", device_name, dev_path.display());

    // Mark the underlying block device read-only at the kernel level. Best
    // effort; the verity table itself is already read-only.
    if let Err(e) = set_block_device_readonly(&fstab_entry.blk_device) {
        warn!("failed to set {} read-only: {:#}", fstab_entry.blk_device.display(), e);
    }

    // Mount the verity device instead of the raw one.
    fstab_entry.blk_device = dev_path.clone();

    if wait_for_verity_dev && !wait_for_file(&dev_path, Duration::from_secs(1)) {
        bail!("verity device {} did not appear", dev_path.display());
    }
    Ok(())
}

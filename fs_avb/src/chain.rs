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

//! The recursive driver that loads a partition's vbmeta, verifies it and
//! follows its chain descriptors into the partitions they delegate to.

use anyhow::{bail, Context, Result};
use avb::Descriptor;
use log::warn;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::str;
use std::time::Duration;

use crate::ops::{avb_partition_to_device_partition, AvbOps};
use crate::util::wait_for_file;
use crate::vbmeta::{verify_vbmeta_data, VBMetaData};
use crate::VerifyResult;

/// A delegation found in a verified image: the chained partition's name and
/// the public key its own vbmeta must be signed with.
#[derive(Clone, Debug)]
pub struct ChainInfo {
    /// AVB partition name, without slot suffix.
    pub partition_name: String,
    /// AVB-encoded public key blob.
    pub public_key_blob: Vec<u8>,
}

/// Knobs of [`load_and_verify_vbmeta`] that apply to the whole walk.
#[derive(Clone, Debug)]
pub struct VerifyOptions {
    /// Suffix appended to partition names on the current slot, e.g. `_a`.
    pub ab_suffix: String,
    /// Suffix for `_other`-suffixed partition names, e.g. `_b`.
    pub ab_other_suffix: String,
    /// Keep walking through signature, hash and key mismatches and report
    /// them in the final verdict instead of failing. Meant for unlocked
    /// devices; a production boot leaves this off.
    pub allow_verification_error: bool,
    /// Follow chain partition descriptors into the partitions they name.
    pub load_chained_vbmeta: bool,
    /// Consult the rollback hook for every verified image.
    pub rollback_protection: bool,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        VerifyOptions {
            ab_suffix: String::new(),
            ab_other_suffix: String::new(),
            allow_verification_error: false,
            load_chained_vbmeta: true,
            rollback_protection: false,
        }
    }
}

/// Collects the chain partition descriptors of a verified image. Any
/// corruption in the descriptor region is fatal here: the image's signature
/// already checked out, so a bad descriptor means the image itself lies.
fn get_chain_partition_info(vbmeta: &VBMetaData) -> Result<Vec<ChainInfo>> {
    let descriptors = avb::descriptors(vbmeta.data())
        .with_context(|| format!("{}: invalid descriptors in vbmeta", vbmeta.partition()))?;

    let mut chain_partitions = Vec::new();
    for (i, descriptor) in descriptors.iter().enumerate() {
        if let Descriptor::ChainPartition(_) = descriptor {
            let chain = descriptor.to_chain_partition().with_context(|| {
                format!("{}: chain descriptor[{}] is invalid", vbmeta.partition(), i)
            })?;
            let partition_name = str::from_utf8(chain.partition_name()).with_context(|| {
                format!("{}: chain descriptor[{}] has a non-UTF-8 name", vbmeta.partition(), i)
            })?;
            chain_partitions.push(ChainInfo {
                partition_name: partition_name.to_string(),
                public_key_blob: chain.public_key().to_vec(),
            });
        }
    }
    Ok(chain_partitions)
}

/// Loads and verifies `partition_name`'s vbmeta and, transitively, the
/// vbmeta of every partition it chains to. Verified images are appended to
/// `out_vbmeta_images` in depth-first visit order, the entry partition
/// first.
///
/// The returned verdict is [`VerifyResult::Success`] only if every image in
/// the tree verified against its expected key. With
/// `allow_verification_error` set, mismatches degrade the verdict to
/// [`VerifyResult::ErrorVerification`] and the walk continues; without it
/// they are errors. Structural failures are always errors and abort the
/// walk.
pub fn load_and_verify_vbmeta(
    partition_name: &str,
    expected_public_key_blob: &[u8],
    options: &VerifyOptions,
    ops: &impl AvbOps,
    out_vbmeta_images: &mut Vec<VBMetaData>,
) -> Result<VerifyResult> {
    load_and_verify_vbmeta_impl(
        partition_name,
        expected_public_key_blob,
        options,
        ops,
        false, /* is_chained_vbmeta */
        out_vbmeta_images,
    )
}

fn load_and_verify_vbmeta_impl(
    partition_name: &str,
    expected_public_key_blob: &[u8],
    options: &VerifyOptions,
    ops: &impl AvbOps,
    is_chained_vbmeta: bool,
    out_vbmeta_images: &mut Vec<VBMetaData>,
) -> Result<VerifyResult> {
    // The device path might be a symlink created by init; give it a moment
    // to appear before declaring the partition missing.
    let device_path = ops.device_path(&avb_partition_to_device_partition(
        partition_name,
        &options.ab_suffix,
        &options.ab_other_suffix,
    ));
    if !wait_for_file(&device_path, Duration::from_secs(1)) {
        bail!("no such partition: {}", device_path.display());
    }

    let fd = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_CLOEXEC)
        .open(&device_path)
        .with_context(|| format!("failed to open {}", device_path.display()))?;

    let (mut vbmeta, mut verify_result) =
        verify_vbmeta_data(&fd, partition_name, expected_public_key_blob)
            .with_context(|| format!("{partition_name}: failed to load vbmeta"))?;
    drop(fd);

    if !options.allow_verification_error && verify_result == VerifyResult::ErrorVerification {
        bail!("{partition_name}: verification error is not allowed");
    }

    let vbmeta_header = vbmeta.vbmeta_header(true /* update_vbmeta_size */)?;

    if options.rollback_protection
        && ops.rollback_detected(partition_name, vbmeta_header.rollback_index)
    {
        bail!("{partition_name}: rollback detected");
    }

    // vbmeta flags can only be set by the top-level vbmeta image.
    if is_chained_vbmeta && vbmeta_header.flags != 0 {
        bail!("{partition_name}: chained vbmeta image has non-zero flags");
    }

    out_vbmeta_images.push(vbmeta);

    // If verification has been disabled by a bit in the image, we're done.
    if vbmeta_header.flags & avb::VBMETA_FLAGS_VERIFICATION_DISABLED != 0 {
        warn!("VERIFICATION_DISABLED bit is set for partition: {partition_name}");
        return Ok(verify_result);
    }

    if options.load_chained_vbmeta {
        let chain_partitions = match out_vbmeta_images.last() {
            Some(vbmeta) => get_chain_partition_info(vbmeta)?,
            None => Vec::new(),
        };
        for chain in chain_partitions {
            let sub_result = load_and_verify_vbmeta_impl(
                &chain.partition_name,
                &chain.public_key_blob,
                options,
                ops,
                true, /* is_chained_vbmeta */
                out_vbmeta_images,
            )?;
            // A failed child has already aborted the walk above; what is
            // left to merge is a tolerated verification error.
            if sub_result != VerifyResult::Success {
                verify_result = sub_result;
            }
        }
    }

    Ok(verify_result)
}

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

//! Loading a partition's vbmeta blob and checking its signature.

use anyhow::{anyhow, bail, Context, Result};
use avb::{Footer, VbmetaImageHeader, VbmetaVerifyResult, FOOTER_SIZE};
use log::error;
use std::fs::File;
use std::io::{self, Seek, SeekFrom};
use std::os::unix::fs::FileExt;

use crate::VerifyResult;

/// A partition's vbmeta blob: the owned bytes plus the partition it was read
/// from. Created by [`verify_vbmeta_data`]; immutable apart from the one-time
/// size update in [`VBMetaData::vbmeta_header`].
pub struct VBMetaData {
    data: Vec<u8>,
    partition_name: String,
}

impl VBMetaData {
    /// The largest vbmeta blob a partition may carry. Also the synthetic
    /// read size for `vbmeta` partitions, which have no footer.
    pub const MAX_SIZE: u64 = 64 * 1024;

    fn new(data: Vec<u8>, partition_name: &str) -> VBMetaData {
        VBMetaData { data, partition_name: partition_name.to_string() }
    }

    /// The blob bytes. After [`VBMetaData::vbmeta_header`] ran with the size
    /// update, this is exactly the image extent the header declares.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Current size of the blob in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// The partition the blob was read from.
    pub fn partition(&self) -> &str {
        &self.partition_name
    }

    /// Byte-swaps a copy of the image header. With `update_vbmeta_size` set,
    /// the buffer is also shrunk to the exact size the header declares,
    /// which becomes the authoritative extent for every later consumer.
    pub fn vbmeta_header(&mut self, update_vbmeta_size: bool) -> Result<VbmetaImageHeader> {
        let header = VbmetaImageHeader::parse(&self.data)
            .with_context(|| format!("{}: failed to get vbmeta header", self.partition_name))?;
        if update_vbmeta_size {
            let size = header
                .image_size()
                .filter(|size| *size <= self.data.len() as u64)
                .ok_or_else(|| {
                    anyhow!("{}: vbmeta size out of bounds", self.partition_name)
                })?;
            self.data.truncate(size as usize);
        }
        Ok(header)
    }
}

fn partition_size(fd: &File) -> Result<u64> {
    // The fd's offset is only used here; all reads are position-independent.
    let mut fd = fd;
    Ok(fd.seek(SeekFrom::End(0))?)
}

/// Reads and validates the footer from the tail of the partition.
fn avb_footer(fd: &File) -> Result<Footer> {
    let footer_offset = partition_size(fd)?
        .checked_sub(FOOTER_SIZE as u64)
        .ok_or_else(|| anyhow!("partition smaller than a footer"))?;
    let mut footer_buf = [0u8; FOOTER_SIZE];
    fd.read_exact_at(&mut footer_buf, footer_offset)
        .context("failed to read AVB footer")?;
    Footer::parse(&footer_buf).context("AVB footer verification failed")
}

/// Fills `buf` from `offset`, accepting a short read at end-of-file.
fn read_at_most(fd: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    while !buf.is_empty() {
        match fd.read_at(buf, offset) {
            Ok(0) => break,
            Ok(n) => {
                let rest = buf;
                buf = &mut rest[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Compares the recovered signing key against the expectation. An empty
/// expectation accepts any key; the caller is trusting something else, like
/// the hardware root at the top of the chain.
fn verify_public_key_blob(key: &[u8], expected_key_blob: &[u8]) -> bool {
    expected_key_blob.is_empty() || key == expected_key_blob
}

/// Checks the integrity of a loaded vbmeta blob and that it was signed with
/// the expected key. Cryptographic mismatches come back as
/// [`VerifyResult::ErrorVerification`] for the caller's policy to judge;
/// structurally uninterpretable blobs are errors.
pub fn verify_vbmeta_signature(
    vbmeta: &VBMetaData,
    expected_public_key_blob: &[u8],
) -> Result<VerifyResult> {
    match avb::vbmeta_image_verify(vbmeta.data()) {
        VbmetaVerifyResult::Ok { public_key } => {
            if public_key.is_empty() {
                bail!(
                    "{}: error verifying vbmeta image: failed to get public key",
                    vbmeta.partition()
                );
            }
            if !verify_public_key_blob(public_key, expected_public_key_blob) {
                error!(
                    "{}: error verifying vbmeta image: public key used to sign data \
                     does not match key in chain descriptor",
                    vbmeta.partition()
                );
                return Ok(VerifyResult::ErrorVerification);
            }
            Ok(VerifyResult::Success)
        }
        verdict @ (VbmetaVerifyResult::OkNotSigned
        | VbmetaVerifyResult::HashMismatch
        | VbmetaVerifyResult::SignatureMismatch) => {
            error!("{}: error verifying vbmeta image: {:?}", vbmeta.partition(), verdict);
            Ok(VerifyResult::ErrorVerification)
        }
        // No way to continue with these.
        VbmetaVerifyResult::InvalidVbmetaHeader => {
            bail!("{}: error verifying vbmeta image: invalid vbmeta header", vbmeta.partition())
        }
        VbmetaVerifyResult::UnsupportedVersion => {
            bail!("{}: error verifying vbmeta image: unsupported AVB version", vbmeta.partition())
        }
    }
}

/// Locates, reads and verifies the vbmeta blob of an open partition.
///
/// Partitions named `vbmeta*` hold a bare blob at offset 0 and are read with
/// the synthetic maximum size, tolerating a short read; the real extent is
/// re-derived from the header later. Every other partition declares the
/// blob's location in its footer and must yield exactly that many bytes.
pub fn verify_vbmeta_data(
    fd: &File,
    partition_name: &str,
    expected_public_key_blob: &[u8],
) -> Result<(VBMetaData, VerifyResult)> {
    let mut vbmeta_offset = 0;
    let mut vbmeta_size = VBMetaData::MAX_SIZE;
    let is_vbmeta_partition = partition_name.starts_with("vbmeta");

    if !is_vbmeta_partition {
        let footer = avb_footer(fd).with_context(|| format!("{partition_name}: no footer"))?;
        vbmeta_offset = footer.vbmeta_offset;
        vbmeta_size = footer.vbmeta_size;
    }
    if vbmeta_size > VBMetaData::MAX_SIZE {
        bail!("{partition_name}: vbmeta size in footer exceeds {}", VBMetaData::MAX_SIZE);
    }

    let mut data = vec![0u8; vbmeta_size as usize];
    if is_vbmeta_partition {
        read_at_most(fd, &mut data, vbmeta_offset)
    } else {
        fd.read_exact_at(&mut data, vbmeta_offset)
    }
    .with_context(|| {
        format!(
            "{partition_name}: failed to read vbmeta at offset {vbmeta_offset} \
             with size {vbmeta_size}"
        )
    })?;

    let vbmeta = VBMetaData::new(data, partition_name);
    let verify_result = verify_vbmeta_signature(&vbmeta, expected_public_key_blob)?;
    Ok((vbmeta, verify_result))
}

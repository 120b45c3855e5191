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

//! Cryptographic verification of a vbmeta image.

use crate::crypto::{decode_public_key, AlgorithmType};
use crate::{VbmetaImageHeader, HEADER_MAGIC, HEADER_SIZE, VERSION_MAJOR};

/// Verdict of [`vbmeta_image_verify`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VbmetaVerifyResult<'a> {
    /// The image is well formed and its signature checks out against the
    /// embedded key, which is handed back for the caller's trust decision.
    Ok {
        /// The AVB-encoded public key recovered from the auxiliary block.
        public_key: &'a [u8],
    },
    /// The image is well formed but carries no signature.
    OkNotSigned,
    /// The digest in the authentication block does not match the image.
    HashMismatch,
    /// The signature does not verify against the embedded key.
    SignatureMismatch,
    /// The image cannot be interpreted at all.
    InvalidVbmetaHeader,
    /// The image requires a newer format version than this library knows.
    UnsupportedVersion,
}

fn window(block: &[u8], offset: u64, size: u64) -> Option<&[u8]> {
    let end = offset.checked_add(size)?;
    if end > block.len() as u64 {
        return None;
    }
    Some(&block[offset as usize..end as usize])
}

/// Checks that `data` holds a well-formed vbmeta image whose digest and
/// signature match the public key embedded in its auxiliary block. Trailing
/// bytes after the image are ignored. This establishes integrity only; the
/// caller decides whether the recovered key is trusted.
pub fn vbmeta_image_verify(data: &[u8]) -> VbmetaVerifyResult<'_> {
    if data.len() < HEADER_SIZE || data[..4] != HEADER_MAGIC {
        return VbmetaVerifyResult::InvalidVbmetaHeader;
    }
    let header = match VbmetaImageHeader::parse(data) {
        Ok(header) => header,
        Err(_) => return VbmetaVerifyResult::InvalidVbmetaHeader,
    };
    if header.required_libavb_version_major != VERSION_MAJOR {
        return VbmetaVerifyResult::UnsupportedVersion;
    }
    // Both block sizes must be a multiple of 64.
    if header.authentication_data_block_size % 64 != 0
        || header.auxiliary_data_block_size % 64 != 0
    {
        return VbmetaVerifyResult::InvalidVbmetaHeader;
    }
    let Some(image_size) = header.image_size() else {
        return VbmetaVerifyResult::InvalidVbmetaHeader;
    };
    if image_size > data.len() as u64 {
        return VbmetaVerifyResult::InvalidVbmetaHeader;
    }
    let auth_end = HEADER_SIZE + header.authentication_data_block_size as usize;
    let auth = &data[HEADER_SIZE..auth_end];
    let aux = &data[auth_end..auth_end + header.auxiliary_data_block_size as usize];

    let (Some(hash), Some(signature), Some(public_key), Some(_descriptors)) = (
        window(auth, header.hash_offset, header.hash_size),
        window(auth, header.signature_offset, header.signature_size),
        window(aux, header.public_key_offset, header.public_key_size),
        window(aux, header.descriptors_offset, header.descriptors_size),
    ) else {
        return VbmetaVerifyResult::InvalidVbmetaHeader;
    };

    let algorithm = AlgorithmType::from_raw(header.algorithm_type);
    match algorithm {
        AlgorithmType::None => return VbmetaVerifyResult::OkNotSigned,
        AlgorithmType::Unknown(_) => return VbmetaVerifyResult::InvalidVbmetaHeader,
        _ => {}
    }
    if header.hash_size as usize != algorithm.hash_len() {
        return VbmetaVerifyResult::InvalidVbmetaHeader;
    }

    // The signed payload is the header followed by the auxiliary block; the
    // authentication block is skipped since it holds the values under test.
    let mut signed = Vec::with_capacity(HEADER_SIZE + aux.len());
    signed.extend_from_slice(&data[..HEADER_SIZE]);
    signed.extend_from_slice(aux);
    let digest = algorithm.hash(&signed);

    if digest != hash {
        return VbmetaVerifyResult::HashMismatch;
    }

    let key = match decode_public_key(public_key) {
        Ok(key) => key,
        Err(_) => return VbmetaVerifyResult::SignatureMismatch,
    };
    if algorithm.verify(&key, &digest, signature).is_err() {
        return VbmetaVerifyResult::SignatureMismatch;
    }

    VbmetaVerifyResult::Ok { public_key }
}

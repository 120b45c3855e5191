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

//! Android Verified Boot byte-order and signature primitives: parsing of the
//! vbmeta footer, header and descriptors, and cryptographic verification of a
//! vbmeta image against the public key embedded in it.
//!
//! All multi-byte fields are big-endian on the wire. Parsing never casts in
//! place; fixed-size structures are byte-swapped into owned structs and
//! variable-length trailing data is handed out as borrowed byte ranges.

mod crypto;
mod descriptor;
mod verify;

use std::io::{self, Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};
use thiserror::Error;

pub use crate::crypto::{decode_public_key, encode_public_key, AlgorithmType, CryptoError};
pub use crate::descriptor::{
    descriptors, ChainPartitionDescriptor, Descriptor, HashtreeDescriptor,
};
pub use crate::verify::{vbmeta_image_verify, VbmetaVerifyResult};

/// Magic at the start of a vbmeta image header.
pub const HEADER_MAGIC: [u8; 4] = *b"AVB0";
/// Magic at the start of a vbmeta footer.
pub const FOOTER_MAGIC: [u8; 4] = *b"AVBf";

/// Size of the serialized vbmeta image header.
pub const HEADER_SIZE: usize = 256;
/// Size of the serialized footer at the tail of a partition image.
pub const FOOTER_SIZE: usize = 64;

/// Highest vbmeta header major version this library understands.
pub const VERSION_MAJOR: u32 = 1;
/// Highest footer major version this library understands.
pub const FOOTER_VERSION_MAJOR: u32 = 1;

/// Header flag: the hashtree descriptors of the image should not be enforced.
pub const VBMETA_FLAGS_HASHTREE_DISABLED: u32 = 1 << 0;
/// Header flag: verification has been disabled by the device owner.
pub const VBMETA_FLAGS_VERIFICATION_DISABLED: u32 = 1 << 1;

/// Errors from parsing AVB structures.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The footer magic, version or size check failed.
    #[error("invalid footer")]
    InvalidFooter,
    /// The vbmeta header is truncated or malformed.
    #[error("invalid vbmeta header")]
    InvalidHeader,
    /// A descriptor or the descriptor region is malformed.
    #[error("invalid descriptor")]
    InvalidDescriptor,
    /// There was an IO error.
    #[error("IO error")]
    Io(#[from] io::Error),
}

/// The footer found in the last [`FOOTER_SIZE`] bytes of a partition image,
/// locating the vbmeta blob inside the partition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Footer {
    /// Footer format major version.
    pub version_major: u32,
    /// Footer format minor version.
    pub version_minor: u32,
    /// Size of the image without the hashtree, FEC and vbmeta trailer.
    pub original_image_size: u64,
    /// Offset of the vbmeta blob within the partition.
    pub vbmeta_offset: u64,
    /// Size of the vbmeta blob.
    pub vbmeta_size: u64,
}

impl Footer {
    /// Validates and byte-swaps a serialized footer.
    pub fn parse(data: &[u8]) -> Result<Footer, ParseError> {
        if data.len() < FOOTER_SIZE || data[..4] != FOOTER_MAGIC {
            return Err(ParseError::InvalidFooter);
        }
        let mut cursor = Cursor::new(&data[4..]);
        let version_major = cursor.read_u32::<BigEndian>()?;
        let version_minor = cursor.read_u32::<BigEndian>()?;
        if version_major > FOOTER_VERSION_MAJOR {
            return Err(ParseError::InvalidFooter);
        }
        Ok(Footer {
            version_major,
            version_minor,
            original_image_size: cursor.read_u64::<BigEndian>()?,
            vbmeta_offset: cursor.read_u64::<BigEndian>()?,
            vbmeta_size: cursor.read_u64::<BigEndian>()?,
        })
    }
}

/// The fixed-size header at the start of a vbmeta image, byte-swapped to host
/// order. No validation beyond the length check is performed here; use
/// [`vbmeta_image_verify`] to establish that the image is well formed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VbmetaImageHeader {
    /// Minimum libavb major version required to interpret the image.
    pub required_libavb_version_major: u32,
    /// Minimum libavb minor version required to interpret the image.
    pub required_libavb_version_minor: u32,
    /// Size of the authentication data block following the header.
    pub authentication_data_block_size: u64,
    /// Size of the auxiliary data block following the authentication block.
    pub auxiliary_data_block_size: u64,
    /// Raw algorithm identifier, see [`AlgorithmType::from_raw`].
    pub algorithm_type: u32,
    /// Offset of the digest within the authentication block.
    pub hash_offset: u64,
    /// Size of the digest.
    pub hash_size: u64,
    /// Offset of the signature within the authentication block.
    pub signature_offset: u64,
    /// Size of the signature.
    pub signature_size: u64,
    /// Offset of the public key within the auxiliary block.
    pub public_key_offset: u64,
    /// Size of the public key.
    pub public_key_size: u64,
    /// Offset of the public key metadata within the auxiliary block.
    pub public_key_metadata_offset: u64,
    /// Size of the public key metadata.
    pub public_key_metadata_size: u64,
    /// Offset of the descriptor region within the auxiliary block.
    pub descriptors_offset: u64,
    /// Size of the descriptor region.
    pub descriptors_size: u64,
    /// Rollback index of the image.
    pub rollback_index: u64,
    /// Image flags; only meaningful on a top-level image.
    pub flags: u32,
    /// Rollback index slot to use.
    pub rollback_index_location: u32,
    /// NUL-padded release string of the tool that made the image.
    pub release_string: String,
}

impl VbmetaImageHeader {
    /// Byte-swaps a copy of the header at the start of `data`.
    pub fn parse(data: &[u8]) -> Result<VbmetaImageHeader, ParseError> {
        if data.len() < HEADER_SIZE {
            return Err(ParseError::InvalidHeader);
        }
        let mut cursor = Cursor::new(&data[4..HEADER_SIZE]);
        let required_libavb_version_major = cursor.read_u32::<BigEndian>()?;
        let required_libavb_version_minor = cursor.read_u32::<BigEndian>()?;
        let authentication_data_block_size = cursor.read_u64::<BigEndian>()?;
        let auxiliary_data_block_size = cursor.read_u64::<BigEndian>()?;
        let algorithm_type = cursor.read_u32::<BigEndian>()?;
        let hash_offset = cursor.read_u64::<BigEndian>()?;
        let hash_size = cursor.read_u64::<BigEndian>()?;
        let signature_offset = cursor.read_u64::<BigEndian>()?;
        let signature_size = cursor.read_u64::<BigEndian>()?;
        let public_key_offset = cursor.read_u64::<BigEndian>()?;
        let public_key_size = cursor.read_u64::<BigEndian>()?;
        let public_key_metadata_offset = cursor.read_u64::<BigEndian>()?;
        let public_key_metadata_size = cursor.read_u64::<BigEndian>()?;
        let descriptors_offset = cursor.read_u64::<BigEndian>()?;
        let descriptors_size = cursor.read_u64::<BigEndian>()?;
        let rollback_index = cursor.read_u64::<BigEndian>()?;
        let flags = cursor.read_u32::<BigEndian>()?;
        let rollback_index_location = cursor.read_u32::<BigEndian>()?;
        let mut release_string_raw = [0u8; 48];
        cursor.read_exact(&mut release_string_raw)?;
        let nul = release_string_raw.iter().position(|b| *b == 0).unwrap_or(48);
        let release_string = String::from_utf8_lossy(&release_string_raw[..nul]).into_owned();

        Ok(VbmetaImageHeader {
            required_libavb_version_major,
            required_libavb_version_minor,
            authentication_data_block_size,
            auxiliary_data_block_size,
            algorithm_type,
            hash_offset,
            hash_size,
            signature_offset,
            signature_size,
            public_key_offset,
            public_key_size,
            public_key_metadata_offset,
            public_key_metadata_size,
            descriptors_offset,
            descriptors_size,
            rollback_index,
            flags,
            rollback_index_location,
            release_string,
        })
    }

    /// Total size of the vbmeta image described by this header: the header
    /// itself plus both data blocks. `None` on arithmetic overflow.
    pub fn image_size(&self) -> Option<u64> {
        (HEADER_SIZE as u64)
            .checked_add(self.authentication_data_block_size)?
            .checked_add(self.auxiliary_data_block_size)
    }
}

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

//! Enumeration and parsing of the descriptors in a vbmeta auxiliary block.

use std::io::Cursor;

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};

use crate::{ParseError, VbmetaImageHeader, HEADER_SIZE};

const DESCRIPTOR_TAG_PROPERTY: u64 = 0;
const DESCRIPTOR_TAG_HASHTREE: u64 = 1;
const DESCRIPTOR_TAG_HASH: u64 = 2;
const DESCRIPTOR_TAG_KERNEL_CMDLINE: u64 = 3;
const DESCRIPTOR_TAG_CHAIN_PARTITION: u64 = 4;

/// Size of the generic descriptor header (tag + num_bytes_following).
const DESCRIPTOR_SIZE: usize = 16;
/// Size of a hashtree descriptor up to its variable-length trailer.
const HASHTREE_DESCRIPTOR_SIZE: usize = 180;
/// Size of a chain partition descriptor up to its variable-length trailer.
const CHAIN_PARTITION_DESCRIPTOR_SIZE: usize = 92;

/// A descriptor found in a vbmeta image. Each variant carries the raw bytes
/// of the whole descriptor, generic header included.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Descriptor<'a> {
    /// A free-form key/value property.
    Property(&'a [u8]),
    /// dm-verity hashtree parameters for a partition.
    Hashtree(&'a [u8]),
    /// A plain hash over a whole partition.
    Hash(&'a [u8]),
    /// A kernel command line fragment.
    KernelCmdline(&'a [u8]),
    /// A delegation to another partition's vbmeta, with its expected key.
    ChainPartition(&'a [u8]),
    /// A tag this library does not know. Ignored by all consumers.
    Unknown,
}

/// Finds the descriptors of a vbmeta image, validating and byte-swapping each
/// generic descriptor header along the way. An error means the descriptor
/// region itself cannot be trusted, not just a single entry.
pub fn descriptors(data: &[u8]) -> Result<Vec<Descriptor<'_>>, ParseError> {
    let header = VbmetaImageHeader::parse(data)?;

    let aux_start = (HEADER_SIZE as u64)
        .checked_add(header.authentication_data_block_size)
        .ok_or(ParseError::InvalidDescriptor)?;
    let aux_end = aux_start
        .checked_add(header.auxiliary_data_block_size)
        .ok_or(ParseError::InvalidDescriptor)?;
    if aux_end > data.len() as u64 {
        return Err(ParseError::InvalidDescriptor);
    }
    let aux = &data[aux_start as usize..aux_end as usize];

    let region_end = header
        .descriptors_offset
        .checked_add(header.descriptors_size)
        .ok_or(ParseError::InvalidDescriptor)?;
    if region_end > aux.len() as u64 {
        return Err(ParseError::InvalidDescriptor);
    }
    let mut rest = &aux[header.descriptors_offset as usize..region_end as usize];

    let mut found = Vec::new();
    while !rest.is_empty() {
        if rest.len() < DESCRIPTOR_SIZE {
            return Err(ParseError::InvalidDescriptor);
        }
        let tag = BigEndian::read_u64(&rest[..8]);
        let num_bytes_following = BigEndian::read_u64(&rest[8..16]);
        if num_bytes_following % 8 != 0 {
            return Err(ParseError::InvalidDescriptor);
        }
        let total = (DESCRIPTOR_SIZE as u64)
            .checked_add(num_bytes_following)
            .filter(|total| *total <= rest.len() as u64)
            .ok_or(ParseError::InvalidDescriptor)? as usize;
        let raw = &rest[..total];
        found.push(match tag {
            DESCRIPTOR_TAG_PROPERTY => Descriptor::Property(raw),
            DESCRIPTOR_TAG_HASHTREE => Descriptor::Hashtree(raw),
            DESCRIPTOR_TAG_HASH => Descriptor::Hash(raw),
            DESCRIPTOR_TAG_KERNEL_CMDLINE => Descriptor::KernelCmdline(raw),
            DESCRIPTOR_TAG_CHAIN_PARTITION => Descriptor::ChainPartition(raw),
            _ => Descriptor::Unknown,
        });
        rest = &rest[total..];
    }
    Ok(found)
}

impl<'a> Descriptor<'a> {
    /// Validates and byte-swaps the descriptor as a hashtree descriptor.
    pub fn to_hashtree(&self) -> Result<HashtreeDescriptor<'a>, ParseError> {
        match self {
            Self::Hashtree(raw) => HashtreeDescriptor::parse(raw),
            _ => Err(ParseError::InvalidDescriptor),
        }
    }

    /// Validates and byte-swaps the descriptor as a chain partition
    /// descriptor.
    pub fn to_chain_partition(&self) -> Result<ChainPartitionDescriptor<'a>, ParseError> {
        match self {
            Self::ChainPartition(raw) => ChainPartitionDescriptor::parse(raw),
            _ => Err(ParseError::InvalidDescriptor),
        }
    }
}

/// A hashtree descriptor, byte-swapped to host order. The partition name,
/// salt and root digest live immediately after the fixed-size portion and are
/// exposed as borrowed ranges; none of them is NUL-terminated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HashtreeDescriptor<'a> {
    /// dm-verity on-disk format version.
    pub dm_verity_version: u32,
    /// Size of the filesystem data covered by the tree.
    pub image_size: u64,
    /// Offset of the tree within the partition.
    pub tree_offset: u64,
    /// Size of the tree.
    pub tree_size: u64,
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
    /// Length of the partition name trailer.
    pub partition_name_len: u32,
    /// Length of the salt trailer.
    pub salt_len: u32,
    /// Length of the root digest trailer.
    pub root_digest_len: u32,
    /// Descriptor flags.
    pub flags: u32,
    trailing: &'a [u8],
}

impl<'a> HashtreeDescriptor<'a> {
    fn parse(raw: &'a [u8]) -> Result<HashtreeDescriptor<'a>, ParseError> {
        if raw.len() < HASHTREE_DESCRIPTOR_SIZE
            || BigEndian::read_u64(&raw[..8]) != DESCRIPTOR_TAG_HASHTREE
        {
            return Err(ParseError::InvalidDescriptor);
        }
        let mut cursor = Cursor::new(&raw[DESCRIPTOR_SIZE..HASHTREE_DESCRIPTOR_SIZE]);
        let dm_verity_version = cursor.read_u32::<BigEndian>()?;
        let image_size = cursor.read_u64::<BigEndian>()?;
        let tree_offset = cursor.read_u64::<BigEndian>()?;
        let tree_size = cursor.read_u64::<BigEndian>()?;
        let data_block_size = cursor.read_u32::<BigEndian>()?;
        let hash_block_size = cursor.read_u32::<BigEndian>()?;
        let fec_num_roots = cursor.read_u32::<BigEndian>()?;
        let fec_offset = cursor.read_u64::<BigEndian>()?;
        let fec_size = cursor.read_u64::<BigEndian>()?;
        let mut hash_algorithm_raw = [0u8; 32];
        std::io::Read::read_exact(&mut cursor, &mut hash_algorithm_raw)?;
        let partition_name_len = cursor.read_u32::<BigEndian>()?;
        let salt_len = cursor.read_u32::<BigEndian>()?;
        let root_digest_len = cursor.read_u32::<BigEndian>()?;
        let flags = cursor.read_u32::<BigEndian>()?;

        let nul = hash_algorithm_raw.iter().position(|b| *b == 0).unwrap_or(32);
        let hash_algorithm = &hash_algorithm_raw[..nul];
        if !hash_algorithm.is_ascii() {
            return Err(ParseError::InvalidDescriptor);
        }
        let hash_algorithm = String::from_utf8_lossy(hash_algorithm).into_owned();

        let trailer_len = (partition_name_len as u64)
            .checked_add(salt_len as u64)
            .and_then(|len| len.checked_add(root_digest_len as u64))
            .ok_or(ParseError::InvalidDescriptor)?;
        let trailer_end = (HASHTREE_DESCRIPTOR_SIZE as u64)
            .checked_add(trailer_len)
            .filter(|end| *end <= raw.len() as u64)
            .ok_or(ParseError::InvalidDescriptor)? as usize;
        let trailing = &raw[HASHTREE_DESCRIPTOR_SIZE..trailer_end];

        Ok(HashtreeDescriptor {
            dm_verity_version,
            image_size,
            tree_offset,
            tree_size,
            data_block_size,
            hash_block_size,
            fec_num_roots,
            fec_offset,
            fec_size,
            hash_algorithm,
            partition_name_len,
            salt_len,
            root_digest_len,
            flags,
            trailing,
        })
    }

    /// The partition name the tree belongs to, as raw bytes.
    pub fn partition_name(&self) -> &'a [u8] {
        &self.trailing[..self.partition_name_len as usize]
    }

    /// The salt prepended to every block before hashing.
    pub fn salt(&self) -> &'a [u8] {
        let start = self.partition_name_len as usize;
        &self.trailing[start..start + self.salt_len as usize]
    }

    /// The signed root digest of the tree.
    pub fn root_digest(&self) -> &'a [u8] {
        let start = self.partition_name_len as usize + self.salt_len as usize;
        &self.trailing[start..start + self.root_digest_len as usize]
    }
}

/// A chain partition descriptor, byte-swapped to host order. The partition
/// name and expected public key blob follow the fixed-size portion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainPartitionDescriptor<'a> {
    /// Rollback index slot of the chained partition.
    pub rollback_index_location: u32,
    /// Length of the partition name trailer.
    pub partition_name_len: u32,
    /// Length of the public key trailer.
    pub public_key_len: u32,
    trailing: &'a [u8],
}

impl<'a> ChainPartitionDescriptor<'a> {
    fn parse(raw: &'a [u8]) -> Result<ChainPartitionDescriptor<'a>, ParseError> {
        if raw.len() < CHAIN_PARTITION_DESCRIPTOR_SIZE
            || BigEndian::read_u64(&raw[..8]) != DESCRIPTOR_TAG_CHAIN_PARTITION
        {
            return Err(ParseError::InvalidDescriptor);
        }
        let mut cursor = Cursor::new(&raw[DESCRIPTOR_SIZE..]);
        let rollback_index_location = cursor.read_u32::<BigEndian>()?;
        let partition_name_len = cursor.read_u32::<BigEndian>()?;
        let public_key_len = cursor.read_u32::<BigEndian>()?;

        let trailer_len = (partition_name_len as u64)
            .checked_add(public_key_len as u64)
            .ok_or(ParseError::InvalidDescriptor)?;
        let trailer_end = (CHAIN_PARTITION_DESCRIPTOR_SIZE as u64)
            .checked_add(trailer_len)
            .filter(|end| *end <= raw.len() as u64)
            .ok_or(ParseError::InvalidDescriptor)? as usize;
        let trailing = &raw[CHAIN_PARTITION_DESCRIPTOR_SIZE..trailer_end];

        Ok(ChainPartitionDescriptor {
            rollback_index_location,
            partition_name_len,
            public_key_len,
            trailing,
        })
    }

    /// The chained partition's name, as raw bytes.
    pub fn partition_name(&self) -> &'a [u8] {
        &self.trailing[..self.partition_name_len as usize]
    }

    /// The public key blob the chained partition must be signed with.
    pub fn public_key(&self) -> &'a [u8] {
        let start = self.partition_name_len as usize;
        &self.trailing[start..start + self.public_key_len as usize]
    }
}

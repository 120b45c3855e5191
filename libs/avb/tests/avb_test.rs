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

//! Builds vbmeta images in memory and checks parsing and verification.

use avb::{
    descriptors, encode_public_key, vbmeta_image_verify, AlgorithmType, Descriptor, ParseError,
    VbmetaImageHeader, VbmetaVerifyResult, HEADER_MAGIC, HEADER_SIZE,
};
use byteorder::{BigEndian, WriteBytesExt};
use rsa::RsaPrivateKey;
use std::io::Write;

fn round_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) / alignment * alignment
}

/// Serializes a hashtree descriptor with fixed tree geometry.
fn hashtree_descriptor(partition_name: &str, salt: &[u8], root_digest: &[u8]) -> Vec<u8> {
    let trailer_len = partition_name.len() + salt.len() + root_digest.len();
    let num_bytes_following = round_up(180 - 16 + trailer_len, 8);

    let mut raw = Vec::new();
    raw.write_u64::<BigEndian>(1).unwrap(); // tag: hashtree
    raw.write_u64::<BigEndian>(num_bytes_following as u64).unwrap();
    raw.write_u32::<BigEndian>(1).unwrap(); // dm_verity_version
    raw.write_u64::<BigEndian>(0x80_0000).unwrap(); // image_size
    raw.write_u64::<BigEndian>(0x80_0000).unwrap(); // tree_offset
    raw.write_u64::<BigEndian>(0x11000).unwrap(); // tree_size
    raw.write_u32::<BigEndian>(4096).unwrap(); // data_block_size
    raw.write_u32::<BigEndian>(4096).unwrap(); // hash_block_size
    raw.write_u32::<BigEndian>(2).unwrap(); // fec_num_roots
    raw.write_u64::<BigEndian>(0x81_1000).unwrap(); // fec_offset
    raw.write_u64::<BigEndian>(0x8000).unwrap(); // fec_size
    let mut algorithm = [0u8; 32];
    algorithm[..6].copy_from_slice(b"sha256");
    raw.write_all(&algorithm).unwrap();
    raw.write_u32::<BigEndian>(partition_name.len() as u32).unwrap();
    raw.write_u32::<BigEndian>(salt.len() as u32).unwrap();
    raw.write_u32::<BigEndian>(root_digest.len() as u32).unwrap();
    raw.write_u32::<BigEndian>(0).unwrap(); // flags
    raw.write_all(&[0u8; 60]).unwrap(); // reserved
    raw.write_all(partition_name.as_bytes()).unwrap();
    raw.write_all(salt).unwrap();
    raw.write_all(root_digest).unwrap();
    raw.resize(16 + num_bytes_following, 0);
    raw
}

/// Serializes a chain partition descriptor.
fn chain_descriptor(partition_name: &str, public_key: &[u8]) -> Vec<u8> {
    let trailer_len = partition_name.len() + public_key.len();
    let num_bytes_following = round_up(92 - 16 + trailer_len, 8);

    let mut raw = Vec::new();
    raw.write_u64::<BigEndian>(4).unwrap(); // tag: chain partition
    raw.write_u64::<BigEndian>(num_bytes_following as u64).unwrap();
    raw.write_u32::<BigEndian>(1).unwrap(); // rollback_index_location
    raw.write_u32::<BigEndian>(partition_name.len() as u32).unwrap();
    raw.write_u32::<BigEndian>(public_key.len() as u32).unwrap();
    raw.write_all(&[0u8; 64]).unwrap(); // reserved
    raw.write_all(partition_name.as_bytes()).unwrap();
    raw.write_all(public_key).unwrap();
    raw.resize(16 + num_bytes_following, 0);
    raw
}

/// Serializes a descriptor with a tag nothing recognizes.
fn unknown_descriptor() -> Vec<u8> {
    let mut raw = Vec::new();
    raw.write_u64::<BigEndian>(0x2a).unwrap();
    raw.write_u64::<BigEndian>(8).unwrap();
    raw.write_all(&[0u8; 8]).unwrap();
    raw
}

/// Serializes (and, for a signing algorithm, signs) a whole vbmeta image.
fn make_vbmeta_image(
    algorithm: AlgorithmType,
    key: Option<&RsaPrivateKey>,
    descriptors: &[Vec<u8>],
    flags: u32,
) -> Vec<u8> {
    let descriptors_raw: Vec<u8> = descriptors.concat();
    let public_key = match key {
        Some(key) => encode_public_key(&key.to_public_key()).unwrap(),
        None => Vec::new(),
    };

    let hash_size = algorithm.hash_len();
    let signature_size = algorithm.signature_len();
    let auth_size = round_up(hash_size + signature_size, 64);
    let aux_size = round_up(descriptors_raw.len() + public_key.len(), 64);

    let mut header = Vec::with_capacity(HEADER_SIZE);
    header.write_all(&HEADER_MAGIC).unwrap();
    header.write_u32::<BigEndian>(1).unwrap(); // required_libavb_version_major
    header.write_u32::<BigEndian>(0).unwrap(); // required_libavb_version_minor
    header.write_u64::<BigEndian>(auth_size as u64).unwrap();
    header.write_u64::<BigEndian>(aux_size as u64).unwrap();
    header.write_u32::<BigEndian>(algorithm.to_raw()).unwrap();
    header.write_u64::<BigEndian>(0).unwrap(); // hash_offset
    header.write_u64::<BigEndian>(hash_size as u64).unwrap();
    header.write_u64::<BigEndian>(hash_size as u64).unwrap(); // signature_offset
    header.write_u64::<BigEndian>(signature_size as u64).unwrap();
    header.write_u64::<BigEndian>(descriptors_raw.len() as u64).unwrap(); // public_key_offset
    header.write_u64::<BigEndian>(public_key.len() as u64).unwrap();
    header
        .write_u64::<BigEndian>((descriptors_raw.len() + public_key.len()) as u64)
        .unwrap(); // public_key_metadata_offset
    header.write_u64::<BigEndian>(0).unwrap(); // public_key_metadata_size
    header.write_u64::<BigEndian>(0).unwrap(); // descriptors_offset
    header.write_u64::<BigEndian>(descriptors_raw.len() as u64).unwrap();
    header.write_u64::<BigEndian>(0).unwrap(); // rollback_index
    header.write_u32::<BigEndian>(flags).unwrap();
    header.write_u32::<BigEndian>(0).unwrap(); // rollback_index_location
    let mut release_string = [0u8; 48];
    release_string[..13].copy_from_slice(b"avbtool 1.2.0");
    header.write_all(&release_string).unwrap();
    header.write_all(&[0u8; 80]).unwrap(); // reserved
    assert_eq!(header.len(), HEADER_SIZE);

    let mut aux = Vec::with_capacity(aux_size);
    aux.extend_from_slice(&descriptors_raw);
    aux.extend_from_slice(&public_key);
    aux.resize(aux_size, 0);

    let mut auth = Vec::with_capacity(auth_size);
    if let Some(key) = key {
        let mut signed = Vec::with_capacity(HEADER_SIZE + aux.len());
        signed.extend_from_slice(&header);
        signed.extend_from_slice(&aux);
        let digest = algorithm.hash(&signed);
        let signature = algorithm.sign(key, &digest).unwrap();
        auth.extend_from_slice(&digest);
        auth.extend_from_slice(&signature);
    }
    auth.resize(auth_size, 0);

    let mut image = header;
    image.extend_from_slice(&auth);
    image.extend_from_slice(&aux);
    image
}

fn test_key() -> RsaPrivateKey {
    RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap()
}

#[test]
fn unsigned_image_is_ok_not_signed() {
    let image = make_vbmeta_image(AlgorithmType::None, None, &[], 0);
    assert_eq!(vbmeta_image_verify(&image), VbmetaVerifyResult::OkNotSigned);
}

#[test]
fn signed_image_recovers_public_key() {
    let key = test_key();
    let image = make_vbmeta_image(AlgorithmType::Sha256Rsa2048, Some(&key), &[], 0);
    let expected = encode_public_key(&key.to_public_key()).unwrap();
    match vbmeta_image_verify(&image) {
        VbmetaVerifyResult::Ok { public_key } => assert_eq!(public_key, expected.as_slice()),
        other => panic!("expected Ok, got {:?}", other),
    }
}

#[test]
fn trailing_bytes_are_ignored() {
    let key = test_key();
    let mut image = make_vbmeta_image(AlgorithmType::Sha256Rsa2048, Some(&key), &[], 0);
    image.resize(image.len() + 4096, 0);
    assert!(matches!(
        vbmeta_image_verify(&image),
        VbmetaVerifyResult::Ok { .. }
    ));
}

#[test]
fn tampered_aux_block_is_hash_mismatch() {
    let key = test_key();
    let descriptors = vec![hashtree_descriptor("system", &[0xaa; 16], &[0xbb; 32])];
    let mut image = make_vbmeta_image(AlgorithmType::Sha256Rsa2048, Some(&key), &descriptors, 0);
    let header = VbmetaImageHeader::parse(&image).unwrap();
    let aux_start = HEADER_SIZE + header.authentication_data_block_size as usize;
    image[aux_start + 40] ^= 0x01;
    assert_eq!(vbmeta_image_verify(&image), VbmetaVerifyResult::HashMismatch);
}

#[test]
fn tampered_signature_is_signature_mismatch() {
    let key = test_key();
    let mut image = make_vbmeta_image(AlgorithmType::Sha256Rsa2048, Some(&key), &[], 0);
    // The signature sits after the digest in the authentication block.
    let offset = HEADER_SIZE + AlgorithmType::Sha256Rsa2048.hash_len() + 5;
    image[offset] ^= 0x01;
    assert_eq!(
        vbmeta_image_verify(&image),
        VbmetaVerifyResult::SignatureMismatch
    );
}

#[test]
fn bad_magic_is_invalid_header() {
    let mut image = make_vbmeta_image(AlgorithmType::None, None, &[], 0);
    image[0] = b'X';
    assert_eq!(
        vbmeta_image_verify(&image),
        VbmetaVerifyResult::InvalidVbmetaHeader
    );
}

#[test]
fn future_major_version_is_unsupported() {
    let mut image = make_vbmeta_image(AlgorithmType::None, None, &[], 0);
    image[4..8].copy_from_slice(&2u32.to_be_bytes());
    assert_eq!(
        vbmeta_image_verify(&image),
        VbmetaVerifyResult::UnsupportedVersion
    );
}

#[test]
fn truncated_image_is_invalid_header() {
    let image = make_vbmeta_image(AlgorithmType::None, None, &[], 0);
    assert_eq!(
        vbmeta_image_verify(&image[..image.len() - 1]),
        VbmetaVerifyResult::InvalidVbmetaHeader
    );
}

#[test]
fn descriptors_are_enumerated_in_order() {
    let key = test_key();
    let chained_key = encode_public_key(&test_key().to_public_key()).unwrap();
    let raw = vec![
        hashtree_descriptor("system", &[0xaa; 16], &[0xbb; 32]),
        unknown_descriptor(),
        chain_descriptor("vendor", &chained_key),
    ];
    let image = make_vbmeta_image(AlgorithmType::Sha256Rsa2048, Some(&key), &raw, 0);

    let found = descriptors(&image).unwrap();
    assert_eq!(found.len(), 3);

    let hashtree = found[0].to_hashtree().unwrap();
    assert_eq!(hashtree.partition_name(), b"system");
    assert_eq!(hashtree.salt(), &[0xaa; 16]);
    assert_eq!(hashtree.root_digest(), &[0xbb; 32]);
    assert_eq!(hashtree.data_block_size, 4096);
    assert_eq!(hashtree.image_size, 0x80_0000);
    assert_eq!(hashtree.hash_algorithm, "sha256");

    assert_eq!(found[1], Descriptor::Unknown);

    let chain = found[2].to_chain_partition().unwrap();
    assert_eq!(chain.partition_name(), b"vendor");
    assert_eq!(chain.public_key(), chained_key.as_slice());
}

#[test]
fn misaligned_descriptor_length_fails_enumeration() {
    let raw = vec![hashtree_descriptor("system", &[0xaa; 16], &[0xbb; 32])];
    let mut image = make_vbmeta_image(AlgorithmType::None, None, &raw, 0);
    let header = VbmetaImageHeader::parse(&image).unwrap();
    let aux_start = HEADER_SIZE + header.authentication_data_block_size as usize;
    // Corrupt num_bytes_following of the first descriptor.
    image[aux_start + 8..aux_start + 16].copy_from_slice(&173u64.to_be_bytes());
    assert!(matches!(
        descriptors(&image),
        Err(ParseError::InvalidDescriptor)
    ));
}

#[test]
fn oversized_name_length_fails_typed_parse() {
    let mut raw = hashtree_descriptor("system", &[0xaa; 16], &[0xbb; 32]);
    // Claim a partition name far past the descriptor's end.
    raw[104..108].copy_from_slice(&1024u32.to_be_bytes());
    let image = make_vbmeta_image(AlgorithmType::None, None, &[raw], 0);
    let found = descriptors(&image).unwrap();
    assert!(found[0].to_hashtree().is_err());
}

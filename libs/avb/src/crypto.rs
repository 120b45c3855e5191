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

//! Signature algorithms and the AVB binary public key format.

use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt};
use num_bigint_dig::{ModInverse, ToBigInt};
use num_traits::{Pow, ToPrimitive};
use rsa::{traits::PublicKeyParts, BigUint, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;

/// The largest modulus this library accepts, in bytes.
const MAX_KEY_SIZE: usize = 8192 / 8;

/// Errors from key handling and signature operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Only public exponent 65537 is used by AVB keys.
    #[error("RSA public exponent not supported: {0}")]
    UnsupportedExponent(BigUint),
    /// The key blob is shorter than its declared key size.
    #[error("public key blob truncated")]
    TruncatedKey,
    /// The modulus has no inverse mod 2^32, so it is not a valid RSA modulus.
    #[error("modulus not invertible")]
    NotInvertible,
    /// Signing or verification cannot be done with this algorithm identifier.
    #[error("algorithm not supported: {0:?}")]
    UnsupportedAlgorithm(AlgorithmType),
    /// The RSA operation itself failed (bad key material or bad signature).
    #[error("RSA operation failed")]
    Rsa(#[from] rsa::Error),
}

/// Signature algorithm of a vbmeta image.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AlgorithmType {
    /// The image is unsigned.
    None,
    /// SHA-256 digest, 2048-bit RSA key.
    Sha256Rsa2048,
    /// SHA-256 digest, 4096-bit RSA key.
    Sha256Rsa4096,
    /// SHA-256 digest, 8192-bit RSA key.
    Sha256Rsa8192,
    /// SHA-512 digest, 2048-bit RSA key.
    Sha512Rsa2048,
    /// SHA-512 digest, 4096-bit RSA key.
    Sha512Rsa4096,
    /// SHA-512 digest, 8192-bit RSA key.
    Sha512Rsa8192,
    /// An identifier this library does not know.
    Unknown(u32),
}

impl AlgorithmType {
    /// Maps the wire identifier to an algorithm.
    pub fn from_raw(value: u32) -> Self {
        match value {
            0 => Self::None,
            1 => Self::Sha256Rsa2048,
            2 => Self::Sha256Rsa4096,
            3 => Self::Sha256Rsa8192,
            4 => Self::Sha512Rsa2048,
            5 => Self::Sha512Rsa4096,
            6 => Self::Sha512Rsa8192,
            v => Self::Unknown(v),
        }
    }

    /// Maps the algorithm back to its wire identifier.
    pub fn to_raw(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Sha256Rsa2048 => 1,
            Self::Sha256Rsa4096 => 2,
            Self::Sha256Rsa8192 => 3,
            Self::Sha512Rsa2048 => 4,
            Self::Sha512Rsa4096 => 5,
            Self::Sha512Rsa8192 => 6,
            Self::Unknown(v) => v,
        }
    }

    /// Digest length in bytes.
    pub fn hash_len(self) -> usize {
        match self {
            Self::None | Self::Unknown(_) => 0,
            Self::Sha256Rsa2048 | Self::Sha256Rsa4096 | Self::Sha256Rsa8192 => {
                Sha256::output_size()
            }
            Self::Sha512Rsa2048 | Self::Sha512Rsa4096 | Self::Sha512Rsa8192 => {
                Sha512::output_size()
            }
        }
    }

    /// Signature length in bytes (the key size).
    pub fn signature_len(self) -> usize {
        match self {
            Self::None | Self::Unknown(_) => 0,
            Self::Sha256Rsa2048 | Self::Sha512Rsa2048 => 256,
            Self::Sha256Rsa4096 | Self::Sha512Rsa4096 => 512,
            Self::Sha256Rsa8192 | Self::Sha512Rsa8192 => 1024,
        }
    }

    /// Length of the AVB-encoded public key blob for this algorithm.
    pub fn public_key_len(self) -> usize {
        match self {
            Self::None | Self::Unknown(_) => 0,
            Self::Sha256Rsa2048 | Self::Sha512Rsa2048 => 8 + 2 * 2048 / 8,
            Self::Sha256Rsa4096 | Self::Sha512Rsa4096 => 8 + 2 * 4096 / 8,
            Self::Sha256Rsa8192 | Self::Sha512Rsa8192 => 8 + 2 * 8192 / 8,
        }
    }

    /// Digest of `data` with this algorithm's hash function.
    pub fn hash(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::None | Self::Unknown(_) => vec![],
            Self::Sha256Rsa2048 | Self::Sha256Rsa4096 | Self::Sha256Rsa8192 => {
                Sha256::digest(data).to_vec()
            }
            Self::Sha512Rsa2048 | Self::Sha512Rsa4096 | Self::Sha512Rsa8192 => {
                Sha512::digest(data).to_vec()
            }
        }
    }

    /// Signs a precomputed digest with PKCS#1 v1.5 padding.
    pub fn sign(self, key: &RsaPrivateKey, digest: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let signature = match self {
            Self::None | Self::Unknown(_) => vec![],
            Self::Sha256Rsa2048 | Self::Sha256Rsa4096 | Self::Sha256Rsa8192 => {
                key.sign(Pkcs1v15Sign::new::<Sha256>(), digest)?
            }
            Self::Sha512Rsa2048 | Self::Sha512Rsa4096 | Self::Sha512Rsa8192 => {
                key.sign(Pkcs1v15Sign::new::<Sha512>(), digest)?
            }
        };
        Ok(signature)
    }

    /// Verifies a PKCS#1 v1.5 signature over a precomputed digest.
    pub fn verify(
        self,
        key: &RsaPublicKey,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<(), CryptoError> {
        match self {
            Self::None | Self::Unknown(_) => {}
            Self::Sha256Rsa2048 | Self::Sha256Rsa4096 | Self::Sha256Rsa8192 => {
                key.verify(Pkcs1v15Sign::new::<Sha256>(), digest, signature)?;
            }
            Self::Sha512Rsa2048 | Self::Sha512Rsa4096 | Self::Sha512Rsa8192 => {
                key.verify(Pkcs1v15Sign::new::<Sha512>(), digest, signature)?;
            }
        }
        Ok(())
    }
}

/// Encodes a public key in the AVB binary format: `key_num_bits`, `n0inv`,
/// the modulus and `rr = (2^key_num_bits)^2 mod n`, the latter two values
/// precomputed so that a bootloader can verify without bignum division.
pub fn encode_public_key(key: &RsaPublicKey) -> Result<Vec<u8>, CryptoError> {
    if key.e() != &BigUint::from(65537u32) {
        return Err(CryptoError::UnsupportedExponent(key.e().clone()));
    }

    let b = BigUint::from(1u64 << 32);
    let n0inv = b.to_bigint().ok_or(CryptoError::NotInvertible)?
        - key.n().mod_inverse(&b).ok_or(CryptoError::NotInvertible)?;
    let n0inv = n0inv.to_u32().ok_or(CryptoError::NotInvertible)?;
    let r = BigUint::from(2u32).pow(key.n().bits());
    let rrmodn = r.modpow(&BigUint::from(2u32), key.n());

    let key_bits = (key.size() * 8) as u32;

    let mut data = vec![];
    data.extend_from_slice(&key_bits.to_be_bytes());
    data.extend_from_slice(&n0inv.to_be_bytes());

    let modulus_raw = key.n().to_bytes_be();
    data.resize(data.len() + key.size() - modulus_raw.len(), 0);
    data.extend_from_slice(&modulus_raw);

    let rrmodn_raw = rrmodn.to_bytes_be();
    data.resize(data.len() + key.size() - rrmodn_raw.len(), 0);
    data.extend_from_slice(&rrmodn_raw);

    Ok(data)
}

/// Decodes a public key from the AVB binary format.
pub fn decode_public_key(data: &[u8]) -> Result<RsaPublicKey, CryptoError> {
    let mut reader = Cursor::new(data);
    let key_bits = reader
        .read_u32::<BigEndian>()
        .map_err(|_| CryptoError::TruncatedKey)? as usize;
    let key_size = key_bits / 8;
    if key_size == 0 || key_size > MAX_KEY_SIZE || data.len() < 8 + key_size {
        return Err(CryptoError::TruncatedKey);
    }

    // The 4-byte n0inv and the trailing rr are precomputed helpers; only the
    // modulus is needed to reconstruct the key.
    let modulus = BigUint::from_bytes_be(&data[8..8 + key_size]);
    let key = RsaPublicKey::new_with_max_size(modulus, BigUint::from(65537u32), MAX_KEY_SIZE)?;
    Ok(key)
}

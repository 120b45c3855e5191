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

//! Verified boot partition validation.
//!
//! Given a set of partitions, this library loads each partition's signed
//! vbmeta blob from its block device, verifies the signatures, follows
//! chain-partition descriptors between partitions, and programs a dm-verity
//! target over every partition protected by a hashtree descriptor so that
//! reads are checked against the signed root digest.
//!
//! The cryptographic and byte-order primitives live in the `avb` crate; the
//! kernel interface lives in the `devicemapper` crate. This crate supplies
//! the policy: which images to load, which keys to trust, and what to do
//! with the descriptors found in verified images.

pub mod bootconfig;
mod chain;
mod fstab;
mod hashtree;
mod ops;
mod util;
mod vbmeta;

pub use bootconfig::BootConfig;
pub use chain::{load_and_verify_vbmeta, ChainInfo, VerifyOptions};
pub use fstab::FstabEntry;
pub use hashtree::{
    get_hashtree_descriptor, hashtree_dm_verity_setup, HashtreeDescriptor, VerityDevice,
};
pub use ops::{avb_partition_to_device_partition, AvbOps, ByNameOps};
pub use vbmeta::{verify_vbmeta_data, verify_vbmeta_signature, VBMetaData};

/// Outcome of loading and verifying one or more vbmeta images when the
/// caller tolerates verification errors. Structural failures (unreadable
/// footer, corrupt descriptors, unsupported format and the like) are never
/// represented here; they surface as errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyResult {
    /// Every image verified against its expected key.
    Success,
    /// At least one image was unsigned, failed its hash or signature check,
    /// or was signed with a key other than the one its chain descriptor
    /// demands. Only reachable when the caller allows verification errors.
    ErrorVerification,
}

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

//! Host services the validator depends on, injected as capabilities so that
//! tests (and unusual partition layouts) can substitute their own.

use std::path::{Path, PathBuf};

/// Services the chain walker needs from its host.
pub trait AvbOps {
    /// Maps a device partition name (A/B suffix already applied) to the path
    /// of its block device. The core encodes no filesystem layout.
    fn device_path(&self, device_partition_name: &str) -> PathBuf;

    /// Reports whether the stored rollback index for `partition_name` is
    /// ahead of the image's `rollback_index`, i.e. the image is a rollback.
    ///
    /// The default reports no rollback. A platform with tamper-evident
    /// storage for per-partition monotonic counters overrides this.
    fn rollback_detected(&self, _partition_name: &str, _rollback_index: u64) -> bool {
        false
    }
}

/// Resolves partitions through a directory of by-name symlinks, the layout
/// init populates for the boot device (e.g. `/dev/block/by-name/system_a`).
pub struct ByNameOps {
    base: PathBuf,
}

impl ByNameOps {
    /// Resolves under the default `/dev/block/by-name` directory.
    pub fn new() -> ByNameOps {
        ByNameOps::with_base(Path::new("/dev/block/by-name"))
    }

    /// Resolves under the given symlink directory.
    pub fn with_base(base: &Path) -> ByNameOps {
        ByNameOps { base: base.to_path_buf() }
    }
}

impl Default for ByNameOps {
    fn default() -> Self {
        Self::new()
    }
}

impl AvbOps for ByNameOps {
    fn device_path(&self, device_partition_name: &str) -> PathBuf {
        self.base.join(device_partition_name)
    }
}

/// Converts an AVB partition name (without A/B suffix) to a device partition
/// name.
/// e.g.,       "system" => "system_a",
///       "system_other" => "system_b".
///
/// On a non-A/B device both suffixes are empty and the name maps to itself.
pub fn avb_partition_to_device_partition(
    avb_partition_name: &str,
    ab_suffix: &str,
    ab_other_suffix: &str,
) -> String {
    match avb_partition_name.strip_suffix("_other") {
        Some(stripped) => format!("{}{}", stripped, ab_other_suffix),
        None => format!("{}{}", avb_partition_name, ab_suffix),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_suffixes_are_identity() {
        assert_eq!(avb_partition_to_device_partition("system", "", ""), "system");
        assert_eq!(avb_partition_to_device_partition("system_other", "", ""), "system");
    }

    #[test]
    fn current_slot_gets_suffix() {
        assert_eq!(avb_partition_to_device_partition("system", "_a", "_b"), "system_a");
        assert_eq!(avb_partition_to_device_partition("vbmeta", "_a", "_b"), "vbmeta_a");
    }

    #[test]
    fn other_slot_gets_other_suffix() {
        assert_eq!(avb_partition_to_device_partition("system_other", "_a", "_b"), "system_b");
    }

    #[test]
    fn by_name_ops_joins_base_directory() {
        let ops = ByNameOps::with_base(Path::new("/dev/block/by-name"));
        assert_eq!(
            ops.device_path("system_a"),
            PathBuf::from("/dev/block/by-name/system_a")
        );
        assert!(!ops.rollback_detected("system", 42));
    }
}

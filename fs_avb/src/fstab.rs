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

use std::path::PathBuf;

/// The subset of a parsed fstab record that verity setup consumes. The fstab
/// file itself is parsed by the init system; callers hand records in and
/// mount whatever `blk_device` points at afterwards.
#[derive(Clone, Debug)]
pub struct FstabEntry {
    /// Block device backing the filesystem. Replaced with the mapper device
    /// path once a verity target has been stacked on top of it.
    pub blk_device: PathBuf,
    /// Where the filesystem gets mounted, e.g. `/system`. The basename also
    /// names the mapper device.
    pub mount_point: PathBuf,
    /// Filesystem type, e.g. `ext4`.
    pub fs_type: String,
}

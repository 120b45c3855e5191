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

//! Filesystem and encoding helpers.

use anyhow::{Context, Result};
use std::fmt::Write;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

// BLKROSET is _IO(0x12, 93) from include/uapi/linux/fs.h.
nix::ioctl_write_ptr_bad!(_blkroset, nix::request_code_none!(0x12, 93), libc::c_int);

/// Waits for `filename` to exist, polling until `relative_timeout` expires.
/// Device nodes and by-name symlinks are created asynchronously by init, so
/// a path may legitimately appear a moment after it is first needed.
pub(crate) fn wait_for_file(filename: &Path, relative_timeout: Duration) -> bool {
    let start_time = Instant::now();
    loop {
        if filename.exists() {
            return true;
        }
        thread::sleep(Duration::from_millis(50));
        if start_time.elapsed() > relative_timeout {
            return false;
        }
    }
}

/// Lowercase hex encoding of `bytes`.
pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::new(), |mut hex, byte| {
        // Writing to a String cannot fail.
        let _ = write!(hex, "{:02x}", byte);
        hex
    })
}

/// Flips the kernel-level read-only state of a block device.
pub(crate) fn set_block_device_readonly(blockdev: &Path) -> Result<()> {
    let fd = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_CLOEXEC)
        .open(blockdev)
        .with_context(|| format!("failed to open {}", blockdev.display()))?;
    let readonly: libc::c_int = 1;
    // SAFETY: the ioctl reads one int from this process and only changes
    // kernel-side state of the block device.
    unsafe { _blkroset(fd.as_raw_fd(), &readonly) }
        .with_context(|| format!("BLKROSET failed for {}", blockdev.display()))?;
    Ok(())
}

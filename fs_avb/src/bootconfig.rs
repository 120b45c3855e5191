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

//! Boot-time configuration from the kernel command line.

use anyhow::{Context, Result};
use std::fs;

/// Splits a kernel command line into ordered key/value pairs.
///
/// Values may be double-quoted to protect embedded spaces; the quotes are
/// stripped from the result. An unbalanced quote runs to the end of the
/// line. A bare `<key>` is indistinguishable from `<key>=`.
pub fn parse_boot_config(cmdline: &str) -> Vec<(String, String)> {
    let mut result = Vec::new();
    let mut base = 0;
    loop {
        // Find the end of this piece, skipping over quoted spans.
        let mut found = None;
        let mut cursor = base;
        while let Some(pos) = cmdline[cursor..].find([' ', '"']) {
            let pos = cursor + pos;
            if cmdline.as_bytes()[pos] != b'"' {
                found = Some(pos);
                break;
            }
            match cmdline[pos + 1..].find('"') {
                Some(close) => cursor = pos + 1 + close + 1,
                // An unbalanced quote is ok.
                None => break,
            }
        }
        let end = found.unwrap_or(cmdline.len());
        let piece: String = cmdline[base..end].chars().filter(|c| *c != '"').collect();
        match piece.split_once('=') {
            Some((key, value)) => result.push((key.to_string(), value.to_string())),
            None => {
                // No difference between <key> and <key>=.
                if !piece.is_empty() {
                    result.push((piece, String::new()));
                }
            }
        }
        match found {
            Some(pos) => base = pos + 1,
            None => break,
        }
    }
    result
}

/// Looks up `androidboot.<key>` in a kernel command line.
pub fn get_boot_config_from_kernel(cmdline: &str, android_key: &str) -> Option<String> {
    let key = format!("androidboot.{}", android_key);
    parse_boot_config(cmdline)
        .into_iter()
        .find(|(found, _)| *found == key)
        .map(|(_, value)| value)
}

/// The boot configuration of the running kernel, parsed once and then
/// queried by key. Handed to the validator rather than read through a global
/// so that tests and other boot environments can inject their own.
pub struct BootConfig {
    entries: Vec<(String, String)>,
}

impl BootConfig {
    /// Reads the booted kernel's command line.
    pub fn new() -> Result<BootConfig> {
        let cmdline = fs::read_to_string("/proc/cmdline").context("failed to read cmdline")?;
        Ok(BootConfig::from_cmdline(&cmdline))
    }

    /// Parses the given command line.
    pub fn from_cmdline(cmdline: &str) -> BootConfig {
        BootConfig { entries: parse_boot_config(cmdline) }
    }

    /// Returns the value of `androidboot.<key>`, if present.
    pub fn get(&self, android_key: &str) -> Option<&str> {
        let key = format!("androidboot.{}", android_key);
        self.entries
            .iter()
            .find(|(found, _)| *found == key)
            .map(|(_, value)| value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CMDLINE: &str = "rcupdate.rcu_expedited=1 rootwait ro \
        init=/init androidboot.bootdevice=1d84000.ufshc \
        androidboot.baseband=sdy androidboot.keymaster=1  skip_initramfs \
        androidboot.serialno=BLAHBLAHBLAH androidboot.slot_suffix=_a \
        androidboot.hardware.platform=sdw813 androidboot.hardware=foo \
        androidboot.revision=EVT1.0 androidboot.bootloader=burp-0.1-7521 \
        androidboot.hardware.sku=mary androidboot.hardware.radio.subtype=0 \
        androidboot.dtbo_idx=2 androidboot.mode=normal \
        androidboot.hardware.ddr=1GB,combuchi,LPDDR4X \
        androidboot.ddr_info=combuchiandroidboot.ddr_size=2GB \
        androidboot.hardware.ufs=2GB,combushi \
        androidboot.boottime=0BLE:58,1BLL:22,1BLE:571,2BLL:105,ODT:0,AVB:123 \
        androidboot.ramdump=disabled \
        dm=\"1 vroot none ro 1,0 10416 verity 1 624684 fec_start 624684\" \
        root=/dev/dm-0 \
        androidboot.vbmeta.device=PARTUUID=aa08f1a4-c7c9-402e-9a66-9707cafa9ceb \
        androidboot.vbmeta.avb_version=\"1.1\" \
        androidboot.vbmeta.device_state=unlocked \
        androidboot.vbmeta.hash_alg=sha256 androidboot.vbmeta.size=5248 \
        androidboot.vbmeta.digest=\
        ac13147e959861c20f2a6da97d25fe79e60e902c022a371c5c039d31e7c68860 \
        androidboot.vbmeta.invalidate_on_error=yes \
        androidboot.veritymode=enforcing androidboot.verifiedbootstate=orange \
        androidboot.space=\"sha256 5248 androidboot.nospace=nope\" \
        printk.devkmsg=on msm_rtb.filter=0x237 ehci-hcd.park=3 \
        \"string =\"\"string '\" \
        service_locator.enable=1 firmware_class.path=/vendor/firmware \
        cgroup.memory=nokmem lpm_levels.sleep_disabled=1 \
        buildvariant=userdebug  console=null \
        terminator=\"truncated";

    fn expected_result() -> Vec<(&'static str, &'static str)> {
        vec![
            ("rcupdate.rcu_expedited", "1"),
            ("rootwait", ""),
            ("ro", ""),
            ("init", "/init"),
            ("androidboot.bootdevice", "1d84000.ufshc"),
            ("androidboot.baseband", "sdy"),
            ("androidboot.keymaster", "1"),
            ("skip_initramfs", ""),
            ("androidboot.serialno", "BLAHBLAHBLAH"),
            ("androidboot.slot_suffix", "_a"),
            ("androidboot.hardware.platform", "sdw813"),
            ("androidboot.hardware", "foo"),
            ("androidboot.revision", "EVT1.0"),
            ("androidboot.bootloader", "burp-0.1-7521"),
            ("androidboot.hardware.sku", "mary"),
            ("androidboot.hardware.radio.subtype", "0"),
            ("androidboot.dtbo_idx", "2"),
            ("androidboot.mode", "normal"),
            ("androidboot.hardware.ddr", "1GB,combuchi,LPDDR4X"),
            ("androidboot.ddr_info", "combuchiandroidboot.ddr_size=2GB"),
            ("androidboot.hardware.ufs", "2GB,combushi"),
            ("androidboot.boottime", "0BLE:58,1BLL:22,1BLE:571,2BLL:105,ODT:0,AVB:123"),
            ("androidboot.ramdump", "disabled"),
            ("dm", "1 vroot none ro 1,0 10416 verity 1 624684 fec_start 624684"),
            ("root", "/dev/dm-0"),
            ("androidboot.vbmeta.device", "PARTUUID=aa08f1a4-c7c9-402e-9a66-9707cafa9ceb"),
            ("androidboot.vbmeta.avb_version", "1.1"),
            ("androidboot.vbmeta.device_state", "unlocked"),
            ("androidboot.vbmeta.hash_alg", "sha256"),
            ("androidboot.vbmeta.size", "5248"),
            (
                "androidboot.vbmeta.digest",
                "ac13147e959861c20f2a6da97d25fe79e60e902c022a371c5c039d31e7c68860",
            ),
            ("androidboot.vbmeta.invalidate_on_error", "yes"),
            ("androidboot.veritymode", "enforcing"),
            ("androidboot.verifiedbootstate", "orange"),
            ("androidboot.space", "sha256 5248 androidboot.nospace=nope"),
            ("printk.devkmsg", "on"),
            ("msm_rtb.filter", "0x237"),
            ("ehci-hcd.park", "3"),
            ("string ", "string '"),
            ("service_locator.enable", "1"),
            ("firmware_class.path", "/vendor/firmware"),
            ("cgroup.memory", "nokmem"),
            ("lpm_levels.sleep_disabled", "1"),
            ("buildvariant", "userdebug"),
            ("console", "null"),
            ("terminator", "truncated"),
        ]
    }

    #[test]
    fn parses_quoted_and_unquoted_pairs() {
        let parsed = parse_boot_config(CMDLINE);
        let expected: Vec<(String, String)> = expected_result()
            .into_iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        assert_eq!(parsed, expected);
    }

    #[test]
    fn androidboot_keys_are_found() {
        for (key, value) in expected_result() {
            let Some(key) = key.strip_prefix("androidboot.") else {
                continue;
            };
            assert_eq!(
                get_boot_config_from_kernel(CMDLINE, key).as_deref(),
                Some(value),
                "for {key}"
            );
        }
    }

    #[test]
    fn prefix_of_a_key_does_not_match() {
        assert_eq!(get_boot_config_from_kernel(CMDLINE, "vbmeta.avb_versio"), None);
    }

    #[test]
    fn keys_inside_quoted_values_do_not_match() {
        assert_eq!(get_boot_config_from_kernel(CMDLINE, "nospace"), None);
    }

    #[test]
    fn bootconfig_handle_looks_up_androidboot_keys() {
        let config = BootConfig::from_cmdline(CMDLINE);
        assert_eq!(config.get("veritymode"), Some("enforcing"));
        assert_eq!(config.get("missing"), None);
    }
}

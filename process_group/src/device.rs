//! Accelerator discovery.
//!
//! Only the amount of visible devices matters here, the devices themselves are
//! driven by the inference runtime.

use std::{env, fs, io};

/// Environment variable that restricts the visible devices.
pub const VISIBLE_DEVICES_VAR: &str = "CUDA_VISIBLE_DEVICES";

const DEVICE_DIR: &str = "/dev";
const DEVICE_NODE_PREFIX: &str = "nvidia";

/// An accelerator pinned to this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Device {
    pub ordinal: usize,
}

impl Device {
    /// Pins a device by the global `rank` modulo the amount of visible devices.
    ///
    /// # Returns
    /// `None` if there are no visible devices.
    pub fn for_rank(rank: usize, visible: usize) -> Option<Self> {
        (visible > 0).then(|| Self {
            ordinal: rank % visible,
        })
    }
}

/// Counts the devices visible to this process.
///
/// `CUDA_VISIBLE_DEVICES` wins when set, otherwise the `/dev/nvidiaN` device
/// nodes are counted.
///
/// # Errors
/// Returns an io error if the device directory exists but can't be listed.
pub fn visible_devices() -> io::Result<usize> {
    if let Ok(list) = env::var(VISIBLE_DEVICES_VAR) {
        return Ok(count_visible(&list));
    }

    let entries = match fs::read_dir(DEVICE_DIR) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut count = 0;
    for entry in entries {
        let name = entry?.file_name();
        if name.to_str().is_some_and(is_device_node) {
            count += 1;
        }
    }

    Ok(count)
}

/// Counts the entries of a visible devices list.
///
/// Like the driver does, the list is cut at the first entry that is not a
/// device index or uuid, so `"0,1,-1,2"` exposes two devices.
pub fn count_visible(list: &str) -> usize {
    list.split(',')
        .map(str::trim)
        .take_while(|entry| is_device_entry(entry))
        .count()
}

fn is_device_entry(entry: &str) -> bool {
    if entry.is_empty() {
        return false;
    }

    entry.parse::<usize>().is_ok() || entry.starts_with("GPU-") || entry.starts_with("MIG-")
}

fn is_device_node(name: &str) -> bool {
    name.strip_prefix(DEVICE_NODE_PREFIX)
        .is_some_and(|ordinal| !ordinal.is_empty() && ordinal.bytes().all(|b| b.is_ascii_digit()))
}

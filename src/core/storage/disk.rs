use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

const KB: f64 = 1_000.0;
const MB: f64 = 1_000_000.0;
const GB: f64 = 1_000_000_000.0;

/// Capacity of one volume, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiskUsage {
    pub total_bytes: u64,
    pub free_bytes: u64,
}

impl DiskUsage {
    /// Used share of the volume in `0.0..=1.0`. `None` for an empty volume.
    pub fn usage_ratio(&self) -> Option<f64> {
        if self.total_bytes == 0 {
            return None;
        }
        let used = self.total_bytes.saturating_sub(self.free_bytes);
        Some(used as f64 / self.total_bytes as f64)
    }
}

/// Free/total space of the volume holding the download directory.
#[derive(Debug, Clone)]
pub struct DiskSpace {
    path: PathBuf,
}

impl DiskSpace {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Fresh reading for the volume whose mount point is the longest prefix
    /// of the watched path.
    pub fn usage(&self) -> Option<DiskUsage> {
        let disks = sysinfo::Disks::new_with_refreshed_list();
        let canonical = std::fs::canonicalize(&self.path).unwrap_or_else(|_| self.path.clone());

        let mut best_len = 0usize;
        let mut usage = None;
        for disk in disks.list() {
            let mount = disk.mount_point();
            if canonical.starts_with(mount) {
                let len = mount.as_os_str().len();
                if len >= best_len {
                    best_len = len;
                    usage = Some(DiskUsage {
                        total_bytes: disk.total_space(),
                        free_bytes: disk.available_space(),
                    });
                }
            }
        }

        if usage.is_none() {
            debug!("No volume found for {:?}", self.path);
        }
        usage
    }

    pub fn total_bytes(&self) -> Option<u64> {
        self.usage().map(|u| u.total_bytes)
    }

    pub fn free_bytes(&self) -> Option<u64> {
        self.usage().map(|u| u.free_bytes)
    }

    pub fn usage_ratio(&self) -> Option<f64> {
        self.usage().and_then(|u| u.usage_ratio())
    }

    /// Free space formatted for display, e.g. `"12.3 GB"`.
    pub fn available_string(&self) -> Option<String> {
        self.free_bytes().map(format_bytes)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Decimal units, KB at the smallest.
pub fn format_bytes(bytes: u64) -> String {
    let value = bytes as f64;
    if value >= GB {
        format!("{:.2} GB", value / GB)
    } else if value >= MB {
        format!("{:.1} MB", value / MB)
    } else {
        format!("{:.0} KB", value / KB)
    }
}

//! Device node naming and the mount points with special failure policy.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};

/// Default timeout when waiting for a device node to appear.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Where device nodes live and which mount points get special treatment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLayout {
    /// MTD block nodes are this prefix followed by the MTD index.
    pub mtd_block_prefix: String,
    /// iNAND block nodes are this prefix followed by the partition index.
    pub inand_block_prefix: String,
    /// Loopback nodes are this prefix followed by the slot index.
    pub loop_device_prefix: String,
    /// An ext4 volume failing to mount here is reformatted.
    pub cache_mount_point: Utf8PathBuf,
    /// A failure to mount here is flagged but does not fail the command.
    pub data_mount_point: Utf8PathBuf,
    /// How long `wait` mounts poll for their source.
    pub wait_timeout: Duration,
}

impl Default for DeviceLayout {
    fn default() -> Self {
        Self {
            mtd_block_prefix: "/dev/block/mtdblock".into(),
            inand_block_prefix: "/dev/block/cardblkinand".into(),
            loop_device_prefix: "/dev/block/loop".into(),
            cache_mount_point: "/cache".into(),
            data_mount_point: "/data".into(),
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }
}

impl DeviceLayout {
    /// Block device node for MTD partition `index`.
    pub fn mtd_block_path(&self, index: u32) -> Utf8PathBuf {
        format!("{}{index}", self.mtd_block_prefix).into()
    }

    /// Block device node for iNAND partition `index`.
    pub fn inand_block_path(&self, index: u32) -> Utf8PathBuf {
        format!("{}{index}", self.inand_block_prefix).into()
    }

    /// Whether `target` is the cache mount point.
    pub fn is_cache(&self, target: &Utf8Path) -> bool {
        same_mount_point(target, &self.cache_mount_point)
    }

    /// Whether `target` is the primary data mount point.
    pub fn is_data(&self, target: &Utf8Path) -> bool {
        same_mount_point(target, &self.data_mount_point)
    }
}

/// Compare mount points ignoring trailing slashes and `.` components.
fn same_mount_point(a: &Utf8Path, b: &Utf8Path) -> bool {
    a.components().eq(b.components())
}

//! # Configuration
//!
//! Device naming, the special mount points and the external programs we
//! call out to are read from TOML fragments in `initmount/`
//! (e.g. `/etc/initmount/10-board.toml`), merged in systemd drop-in order.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use fn_error_context::context;
use initmount_mount::layout::DeviceLayout;
use initmount_mount::resolver::DEFAULT_INAND_POLL_INTERVAL;
use initmount_mount::ubi::DEFAULT_CTRL_DEV;
use serde::{Deserialize, Serialize};

const SYSTEMD_CONVENTIONAL_BASES: &[&str] = &["/usr/lib", "/usr/local/lib", "/etc", "/run"];
const CONFIG_DIR: &str = "initmount";

/// The toplevel of a configuration fragment.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub(crate) struct ConfigurationToplevel {
    pub(crate) mount: Option<MountConfiguration>,
}

/// The serialized `[mount]` section
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename = "mount", rename_all = "kebab-case", deny_unknown_fields)]
pub(crate) struct MountConfiguration {
    /// An ext4 volume failing to mount here is reformatted.
    pub(crate) cache_mount_point: Option<Utf8PathBuf>,
    /// A failure to mount here sets `ro.init.mountdatafail`.
    pub(crate) data_mount_point: Option<Utf8PathBuf>,
    pub(crate) mtd_block_prefix: Option<String>,
    pub(crate) loop_device_prefix: Option<String>,
    pub(crate) inand_block_prefix: Option<String>,
    /// Partition list for `mtd@` names.
    pub(crate) mtd_table: Option<Utf8PathBuf>,
    /// Partition list for `inand@` names.
    pub(crate) inand_table: Option<Utf8PathBuf>,
    pub(crate) ubi_ctrl_device: Option<Utf8PathBuf>,
    /// Timeout for `wait` mounts and the `wait` command.
    pub(crate) wait_timeout_secs: Option<u64>,
    pub(crate) inand_poll_interval_ms: Option<u64>,
    /// Give up resolving `inand@` names after this long; unset waits forever.
    pub(crate) inand_timeout_secs: Option<u64>,
    /// Command prefix for writing a property; name and value are appended.
    pub(crate) property_setter: Option<Vec<String>>,
    /// Command prefix for reading a property; the name is appended.
    pub(crate) property_getter: Option<Vec<String>>,
    /// Command prefix for firing a trigger; the trigger name is appended.
    pub(crate) trigger_command: Option<Vec<String>>,
    /// Command prefix for creating an ext4 filesystem; the device is appended.
    pub(crate) ext4_formatter: Option<Vec<String>>,
    /// Command prefix for enabling swap; the device is appended.
    pub(crate) swapon_command: Option<Vec<String>>,
    /// Filesystem checker run by `e2fsck`.
    pub(crate) e2fsck_command: Option<Vec<String>>,
}

fn merge_basic<T>(s: &mut Option<T>, o: Option<T>) {
    if let Some(o) = o {
        *s = Some(o);
    }
}

trait Mergeable {
    fn merge(&mut self, other: Self)
    where
        Self: Sized;
}

impl Mergeable for MountConfiguration {
    /// Apply any values in other, overriding any existing values in `self`.
    fn merge(&mut self, other: Self) {
        merge_basic(&mut self.cache_mount_point, other.cache_mount_point);
        merge_basic(&mut self.data_mount_point, other.data_mount_point);
        merge_basic(&mut self.mtd_block_prefix, other.mtd_block_prefix);
        merge_basic(&mut self.loop_device_prefix, other.loop_device_prefix);
        merge_basic(&mut self.inand_block_prefix, other.inand_block_prefix);
        merge_basic(&mut self.mtd_table, other.mtd_table);
        merge_basic(&mut self.inand_table, other.inand_table);
        merge_basic(&mut self.ubi_ctrl_device, other.ubi_ctrl_device);
        merge_basic(&mut self.wait_timeout_secs, other.wait_timeout_secs);
        merge_basic(&mut self.inand_poll_interval_ms, other.inand_poll_interval_ms);
        merge_basic(&mut self.inand_timeout_secs, other.inand_timeout_secs);
        merge_basic(&mut self.property_setter, other.property_setter);
        merge_basic(&mut self.property_getter, other.property_getter);
        merge_basic(&mut self.trigger_command, other.trigger_command);
        merge_basic(&mut self.ext4_formatter, other.ext4_formatter);
        merge_basic(&mut self.swapon_command, other.swapon_command);
        merge_basic(&mut self.e2fsck_command, other.e2fsck_command);
    }
}

fn argv(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

impl MountConfiguration {
    /// Device naming and special mount points, with defaults filled in.
    pub(crate) fn layout(&self) -> DeviceLayout {
        let mut layout = DeviceLayout::default();
        let MountConfiguration {
            cache_mount_point,
            data_mount_point,
            mtd_block_prefix,
            loop_device_prefix,
            inand_block_prefix,
            ..
        } = self.clone();
        if let Some(v) = cache_mount_point {
            layout.cache_mount_point = v;
        }
        if let Some(v) = data_mount_point {
            layout.data_mount_point = v;
        }
        if let Some(v) = mtd_block_prefix {
            layout.mtd_block_prefix = v;
        }
        if let Some(v) = loop_device_prefix {
            layout.loop_device_prefix = v;
        }
        if let Some(v) = inand_block_prefix {
            layout.inand_block_prefix = v;
        }
        if let Some(secs) = self.wait_timeout_secs {
            layout.wait_timeout = Duration::from_secs(secs);
        }
        layout
    }

    pub(crate) fn mtd_table(&self) -> Utf8PathBuf {
        self.mtd_table.clone().unwrap_or_else(|| "/proc/mtd".into())
    }

    pub(crate) fn inand_table(&self) -> Utf8PathBuf {
        self.inand_table
            .clone()
            .unwrap_or_else(|| "/proc/inand".into())
    }

    pub(crate) fn ubi_ctrl_device(&self) -> Utf8PathBuf {
        self.ubi_ctrl_device
            .clone()
            .unwrap_or_else(|| DEFAULT_CTRL_DEV.into())
    }

    pub(crate) fn inand_poll_interval(&self) -> Duration {
        self.inand_poll_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_INAND_POLL_INTERVAL)
    }

    pub(crate) fn inand_timeout(&self) -> Option<Duration> {
        self.inand_timeout_secs.map(Duration::from_secs)
    }

    pub(crate) fn property_setter(&self) -> Vec<String> {
        self.property_setter
            .clone()
            .unwrap_or_else(|| argv(&["setprop"]))
    }

    pub(crate) fn property_getter(&self) -> Vec<String> {
        self.property_getter
            .clone()
            .unwrap_or_else(|| argv(&["getprop"]))
    }

    pub(crate) fn trigger_command(&self) -> Vec<String> {
        self.trigger_command
            .clone()
            .unwrap_or_else(|| argv(&["initctl", "trigger"]))
    }

    pub(crate) fn ext4_formatter(&self) -> Vec<String> {
        self.ext4_formatter
            .clone()
            .unwrap_or_else(|| argv(&["mkfs.ext4", "-F"]))
    }

    pub(crate) fn swapon_command(&self) -> Vec<String> {
        self.swapon_command
            .clone()
            .unwrap_or_else(|| argv(&["swapon"]))
    }

    pub(crate) fn e2fsck_command(&self) -> Vec<String> {
        self.e2fsck_command
            .clone()
            .unwrap_or_else(|| argv(&["e2fsck"]))
    }
}

/// Load the configuration, merging all found configuration files.
#[context("Loading configuration")]
pub(crate) fn load_config() -> Result<MountConfiguration> {
    load_config_from(SYSTEMD_CONVENTIONAL_BASES)
}

pub(crate) fn load_config_from<P: AsRef<Path>>(bases: &[P]) -> Result<MountConfiguration> {
    let fragments = liboverdrop::scan(bases, CONFIG_DIR, &["toml"], true);
    let mut config = MountConfiguration::default();
    for (_name, path) in fragments {
        let buf = std::fs::read_to_string(&path)?;
        let mut unused = HashSet::new();
        let de = toml::Deserializer::parse(&buf).with_context(|| format!("Parsing {path:?}"))?;
        let c: ConfigurationToplevel = serde_ignored::deserialize(de, |path| {
            unused.insert(path.to_string());
        })
        .with_context(|| format!("Parsing {path:?}"))?;
        for key in unused {
            tracing::warn!("{path:?}: Unknown key {key}");
        }
        if let Some(mount) = c.mount {
            tracing::debug!("Merging config from {path:?}: {mount:?}");
            config.merge(mount);
        }
    }
    Ok(config)
}

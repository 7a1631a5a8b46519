//! The storage table, and the routines that act on all of its entries.
//!
//! Each non-comment line has five whitespace separated columns:
//!
//! ```text
//! <src> <mount_point> <type> <mnt_flags> <fs_mgr_flags>
//! /dev/block/by-name/userdata /data ext4 noatime,nosuid,nodev,barrier=1 wait,encryptable=footer
//! ```

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;
use initmount_mount::bulk::BulkMountResult;
use initmount_mount::flags::parse_flag_list;
use initmount_mount::mounter::Mounter;
use initmount_mount::wait::wait_for_path;
use initmount_utils::CommandRunExt;
use rustix::mount::MountFlags;

const SWAP_TYPE: &str = "swap";

/// Entry flags interpreted by the bulk-mount routine rather than the kernel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct FsMgrFlags {
    /// Wait for the source device before mounting.
    pub(crate) wait: bool,
    /// Where the crypto footer lives, for `encryptable=` and `forceencrypt=`.
    pub(crate) crypt_location: Option<String>,
    /// Mounted later by the volume daemon.
    pub(crate) vold_managed: bool,
    pub(crate) recovery_only: bool,
}

impl FsMgrFlags {
    fn parse(list: &str) -> Self {
        let mut r = Self::default();
        for flag in list.split(',').filter(|f| !f.is_empty()) {
            let (name, value) = flag.split_once('=').unwrap_or((flag, ""));
            match name {
                "wait" => r.wait = true,
                "encryptable" | "forceencrypt" => r.crypt_location = Some(value.to_owned()),
                "voldmanaged" => r.vold_managed = true,
                "recoveryonly" => r.recovery_only = true,
                "defaults" => {}
                _ => tracing::debug!("Ignoring storage table flag {flag}"),
            }
        }
        r
    }
}

/// One line of the storage table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FstabEntry {
    pub(crate) source: Utf8PathBuf,
    pub(crate) mount_point: Utf8PathBuf,
    pub(crate) fstype: String,
    pub(crate) flags: MountFlags,
    pub(crate) data: Option<String>,
    pub(crate) fs_mgr: FsMgrFlags,
}

impl FstabEntry {
    fn is_swap(&self) -> bool {
        self.fstype == SWAP_TYPE
    }

    /// Why the bulk mount leaves this entry alone, if it does.
    fn skip_reason(&self) -> Option<&'static str> {
        if self.fs_mgr.vold_managed {
            Some("managed by vold")
        } else if self.fs_mgr.recovery_only {
            Some("recovery only")
        } else if self.is_swap() {
            Some("swap")
        } else {
            None
        }
    }
}

/// Parse storage table text.
pub(crate) fn parse_fstab(contents: &str) -> Result<Vec<FstabEntry>> {
    let mut entries = Vec::new();
    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [source, mount_point, fstype, mnt_flags, fs_mgr_flags] = fields[..] else {
            anyhow::bail!(
                "line {}: expected 5 fields, found {}",
                lineno + 1,
                fields.len()
            );
        };
        let (flags, data) = parse_flag_list(mnt_flags);
        entries.push(FstabEntry {
            source: source.into(),
            mount_point: mount_point.into(),
            fstype: fstype.to_owned(),
            flags,
            data,
            fs_mgr: FsMgrFlags::parse(fs_mgr_flags),
        });
    }
    Ok(entries)
}

/// Read and parse the storage table at `path`.
#[context("Reading storage table {path}")]
pub(crate) fn read_fstab(path: &Utf8Path) -> Result<Vec<FstabEntry>> {
    let buf = std::fs::read_to_string(path)?;
    parse_fstab(&buf)
}

/// Mount every mountable entry.
///
/// A failed mount of an entry carrying a crypto location means the
/// volume is encrypted; any other failure is an error, which wins over
/// encryption.
pub(crate) fn mount_all(
    entries: &[FstabEntry],
    mounter: &dyn Mounter,
    wait_timeout: Duration,
) -> BulkMountResult {
    let mut encrypted = false;
    let mut errors = 0usize;
    for entry in entries {
        let FstabEntry {
            source,
            mount_point,
            fstype,
            ..
        } = entry;
        if let Some(reason) = entry.skip_reason() {
            tracing::debug!("Skipping {mount_point}: {reason}");
            continue;
        }
        if entry.fs_mgr.wait {
            wait_for_path(source, wait_timeout);
        }
        match mounter.mount(
            source.as_str(),
            mount_point,
            fstype,
            entry.flags,
            entry.data.as_deref(),
        ) {
            Ok(()) => tracing::info!("Mounted {source} on {mount_point}"),
            Err(e) if entry.fs_mgr.crypt_location.is_some() => {
                tracing::warn!("Mounting {source} on {mount_point} failed ({e}); assuming encrypted");
                encrypted = true;
            }
            Err(e) => {
                tracing::error!("Failed to mount {source} ({fstype}) on {mount_point}: {e}");
                errors += 1;
            }
        }
    }
    if errors > 0 {
        tracing::error!("{errors} storage table entries failed to mount");
        BulkMountResult::Error
    } else if encrypted {
        BulkMountResult::Encrypted
    } else {
        BulkMountResult::Unencrypted
    }
}

/// Enable every swap entry by running `swapon` followed by its device.
///
/// All entries are attempted; the error names how many failed.
pub(crate) fn swapon_all(
    entries: &[FstabEntry],
    swapon: &[String],
    wait_timeout: Duration,
) -> Result<()> {
    let (program, args) = swapon
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("Empty swapon command"))?;
    let mut failed = 0usize;
    for entry in entries.iter().filter(|e| e.is_swap()) {
        if entry.fs_mgr.wait {
            wait_for_path(&entry.source, wait_timeout);
        }
        let r = Command::new(program)
            .args(args)
            .arg(entry.source.as_str())
            .log_debug()
            .run_capture_stderr()
            .with_context(|| format!("Enabling swap on {}", entry.source));
        if let Err(e) = r {
            tracing::error!("{e:#}");
            failed += 1;
        }
    }
    if failed > 0 {
        anyhow::bail!("{failed} swap devices failed to activate");
    }
    Ok(())
}

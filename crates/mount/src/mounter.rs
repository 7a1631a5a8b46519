//! The mount syscall and the external filesystem formatter.

use std::ffi::CString;
use std::io;
use std::process::Command;

use anyhow::Result;
use camino::Utf8Path;
use fn_error_context::context;
use initmount_utils::CommandRunExt;
use rustix::mount::{MountFlags, UnmountFlags};

/// Performs mounts and unmounts.
pub trait Mounter: std::fmt::Debug {
    /// Mount `source` on `target`.
    fn mount(
        &self,
        source: &str,
        target: &Utf8Path,
        fstype: &str,
        flags: MountFlags,
        data: Option<&str>,
    ) -> io::Result<()>;

    /// Unmount `target`.
    fn unmount(&self, target: &Utf8Path) -> io::Result<()>;
}

/// The real `mount(2)`/`umount2(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyscallMounter;

impl Mounter for SyscallMounter {
    fn mount(
        &self,
        source: &str,
        target: &Utf8Path,
        fstype: &str,
        flags: MountFlags,
        data: Option<&str>,
    ) -> io::Result<()> {
        let data = data
            .map(CString::new)
            .transpose()
            .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
        rustix::mount::mount(
            source,
            target.as_std_path(),
            fstype,
            flags,
            data.as_deref(),
        )?;
        Ok(())
    }

    fn unmount(&self, target: &Utf8Path) -> io::Result<()> {
        rustix::mount::unmount(target.as_std_path(), UnmountFlags::empty())?;
        Ok(())
    }
}

/// Creates a fresh filesystem on a block device.
pub trait Formatter: std::fmt::Debug {
    /// Create an ext4 filesystem on `device`, which will be mounted at
    /// `mount_point`.
    fn format_ext4(&self, device: &Utf8Path, mount_point: &Utf8Path) -> Result<()>;
}

/// Runs an external mkfs program: the configured argument vector with
/// the device appended.
#[derive(Debug, Clone)]
pub struct CommandFormatter {
    argv: Vec<String>,
}

impl CommandFormatter {
    /// A formatter invoking `argv` followed by the device path.
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

impl Default for CommandFormatter {
    fn default() -> Self {
        Self::new(vec!["mkfs.ext4".into(), "-F".into()])
    }
}

impl Formatter for CommandFormatter {
    #[context("Formatting {device} for {mount_point}")]
    fn format_ext4(&self, device: &Utf8Path, mount_point: &Utf8Path) -> Result<()> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("Empty formatter command"))?;
        Command::new(program)
            .args(args)
            .arg(device.as_str())
            .log_debug()
            .run_capture_stderr()
    }
}

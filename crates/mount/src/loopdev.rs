//! Allocation of loopback devices for `loop@` mounts.
//!
//! There is no lock around the loop namespace; a slot is ours only once
//! the status query reported it unbound *and* the bind ioctl succeeded.

use std::fs::OpenOptions;
use std::io;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use camino::{Utf8Path, Utf8PathBuf};
use rustix::fs::{Mode, OFlags};

use crate::MountError;
use crate::sys;

/// One open loopback device node.
///
/// Dropping the slot closes the node; it does not unbind it.
pub trait LoopSlot: std::fmt::Debug {
    /// Whether the node currently has no backing file.
    fn is_free(&self) -> bool;
    /// Bind `backing` to this node.
    fn bind(&self, backing: BorrowedFd<'_>) -> io::Result<()>;
    /// Remove the binding.
    fn clear(&self) -> io::Result<()>;
}

/// The loopback device namespace.
pub trait LoopControl: std::fmt::Debug {
    /// Path of the node for slot `index`.
    fn node_path(&self, index: u32) -> Utf8PathBuf;
    /// Open the node for slot `index`.
    fn open_slot(&self, index: u32, read_only: bool) -> io::Result<Box<dyn LoopSlot>>;
}

/// Loop device nodes named by a fixed prefix plus index.
#[derive(Debug, Clone)]
pub struct LoopDevices {
    prefix: String,
}

impl LoopDevices {
    /// Nodes named `<prefix><index>`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

#[derive(Debug)]
struct KernelLoopSlot {
    fd: OwnedFd,
}

impl LoopSlot for KernelLoopSlot {
    fn is_free(&self) -> bool {
        sys::loop_is_unbound(self.fd.as_fd())
    }

    fn bind(&self, backing: BorrowedFd<'_>) -> io::Result<()> {
        sys::loop_set_fd(self.fd.as_fd(), backing)
    }

    fn clear(&self) -> io::Result<()> {
        sys::loop_clr_fd(self.fd.as_fd())
    }
}

fn open_mode(read_only: bool) -> OFlags {
    if read_only {
        OFlags::RDONLY
    } else {
        OFlags::RDWR
    }
}

impl LoopControl for LoopDevices {
    fn node_path(&self, index: u32) -> Utf8PathBuf {
        format!("{}{index}", self.prefix).into()
    }

    fn open_slot(&self, index: u32, read_only: bool) -> io::Result<Box<dyn LoopSlot>> {
        let path = self.node_path(index);
        let fd = rustix::fs::open(
            path.as_std_path(),
            open_mode(read_only) | OFlags::CLOEXEC,
            Mode::empty(),
        )?;
        Ok(Box::new(KernelLoopSlot { fd }))
    }
}

/// A claimed loop device with a file bound to it.
#[derive(Debug)]
pub struct LoopBinding {
    path: Utf8PathBuf,
    slot: Box<dyn LoopSlot>,
}

impl LoopBinding {
    /// The loop device node to mount.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Unbind the device and close it. Used when the mount failed.
    pub fn clear(self) {
        if let Err(e) = self.slot.clear() {
            tracing::error!("Failed to clear loop device {}: {e}", self.path);
        }
    }
}

/// Bind `backing` to the first free loop device.
///
/// Slots are scanned by increasing index. A slot that is in use, or
/// whose bind fails, is closed and skipped. The scan ends with
/// [`MountError::AllocationExhausted`] when a node cannot be opened,
/// which is how running past the last loop device shows up.
pub fn allocate(
    control: &dyn LoopControl,
    backing: &Utf8Path,
    read_only: bool,
) -> Result<LoopBinding, MountError> {
    let backing_file = OpenOptions::new()
        .read(true)
        .write(!read_only)
        .open(backing)
        .map_err(|err| MountError::BackingFile {
            path: backing.to_owned(),
            err,
        })?;

    let mut index = 0u32;
    loop {
        let slot = control
            .open_slot(index, read_only)
            .map_err(|err| MountError::AllocationExhausted {
                backing: backing.to_owned(),
                err,
            })?;
        if slot.is_free() {
            match slot.bind(backing_file.as_fd()) {
                Ok(()) => {
                    let path = control.node_path(index);
                    tracing::debug!("Bound {backing} to {path}");
                    // The kernel holds its own reference to the backing file now.
                    drop(backing_file);
                    return Ok(LoopBinding { path, slot });
                }
                Err(e) => tracing::debug!("Binding loop slot {index} failed: {e}"),
            }
        }
        drop(slot);
        index = index.checked_add(1).ok_or_else(|| MountError::AllocationExhausted {
            backing: backing.to_owned(),
            err: io::Error::from_raw_os_error(libc::ENODEV),
        })?;
    }
}

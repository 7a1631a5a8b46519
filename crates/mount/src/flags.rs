//! Translation of mount flag tokens into a mount flag bitmask.

use rustix::mount::MountFlags;

/// Token that requests waiting for the source device to appear.
pub const WAIT_TOKEN: &str = "wait";

/// Recognized flag tokens. `rw` and `defaults` contribute no bits.
const MOUNT_FLAG_TABLE: &[(&str, libc::c_ulong)] = &[
    ("noatime", libc::MS_NOATIME),
    ("noexec", libc::MS_NOEXEC),
    ("nosuid", libc::MS_NOSUID),
    ("nodev", libc::MS_NODEV),
    ("nodiratime", libc::MS_NODIRATIME),
    ("ro", libc::MS_RDONLY),
    ("rw", 0),
    ("remount", libc::MS_REMOUNT),
    ("bind", libc::MS_BIND),
    ("rec", libc::MS_REC),
    ("unbindable", libc::MS_UNBINDABLE),
    ("private", libc::MS_PRIVATE),
    ("slave", libc::MS_SLAVE),
    ("shared", libc::MS_SHARED),
    ("defaults", 0),
];

fn lookup_flag(token: &str) -> Option<libc::c_ulong> {
    MOUNT_FLAG_TABLE
        .iter()
        .find(|(name, _)| *name == token)
        .map(|(_, bits)| *bits)
}

fn to_mount_flags(bits: libc::c_ulong) -> MountFlags {
    // Propagation and remount bits are not named by rustix; keep them
    // as raw bits so they reach the syscall unchanged.
    MountFlags::from_bits_retain(bits as _)
}

/// The result of translating the trailing tokens of a `mount` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOptions {
    /// Bitwise OR of all recognized flags.
    pub flags: MountFlags,
    /// Set by the `wait` token.
    pub wait_for_source: bool,
    /// Free-form filesystem option string.
    pub data: Option<String>,
}

impl MountOptions {
    /// Whether the read-only flag was requested.
    pub fn read_only(&self) -> bool {
        self.flags.contains(MountFlags::RDONLY)
    }
}

/// Translate the flag tokens of a `mount` command.
///
/// Recognized tokens are OR'd into the bitmask and `wait` sets
/// [`MountOptions::wait_for_source`]. An unrecognized token becomes the
/// free-form option string only when it is the final token; anywhere
/// else it is ignored.
pub fn parse_mount_flags<S: AsRef<str>>(tokens: &[S]) -> MountOptions {
    let mut bits: libc::c_ulong = 0;
    let mut wait_for_source = false;
    let mut data = None;
    for (i, token) in tokens.iter().enumerate() {
        let token = token.as_ref();
        if let Some(flag) = lookup_flag(token) {
            bits |= flag;
        } else if token == WAIT_TOKEN {
            wait_for_source = true;
        } else if i + 1 == tokens.len() {
            data = Some(token.to_owned());
        } else {
            tracing::debug!("Ignoring unrecognized mount flag {token}");
        }
    }
    MountOptions {
        flags: to_mount_flags(bits),
        wait_for_source,
        data,
    }
}

/// Translate a comma separated storage-table flag column.
///
/// Unlike [`parse_mount_flags`] every unrecognized entry is kept, and
/// they are joined with commas into the option string.
pub fn parse_flag_list(list: &str) -> (MountFlags, Option<String>) {
    let mut bits: libc::c_ulong = 0;
    let mut rest = Vec::new();
    for token in list.split(',').filter(|t| !t.is_empty()) {
        match lookup_flag(token) {
            Some(flag) => bits |= flag,
            None => rest.push(token),
        }
    }
    let data = (!rest.is_empty()).then(|| rest.join(","));
    (to_mount_flags(bits), data)
}

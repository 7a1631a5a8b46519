use std::io;
use std::time::Duration;

use camino::Utf8PathBuf;

/// Status reported for a remount that still failed after formatting.
pub(crate) const STATUS_REMOUNT_AFTER_FORMAT: i32 = -2;
/// Status reported for every other failure.
pub(crate) const STATUS_FAILURE: i32 = -1;

/// Failures of a single mount, attach or detach command.
///
/// None of these unwind past the command dispatcher; each collapses to
/// a signed status via [`MountError::status`].
#[derive(Debug, thiserror::Error)]
pub enum MountError {
    /// A symbolic device name is not present in its name table.
    #[error("cannot resolve {name}: {reason}")]
    Resolution {
        /// The full specifier, e.g. `mtd@system`.
        name: String,
        /// Why the lookup failed.
        reason: String,
    },

    /// A polled name lookup did not succeed before the configured deadline.
    #[error("timed out after {waited:?} resolving {name}")]
    ResolutionTimeout {
        /// The full specifier.
        name: String,
        /// How long we polled.
        waited: Duration,
    },

    /// The backing file of a loop mount could not be opened.
    #[error("opening loop backing file {path}")]
    BackingFile {
        /// The backing file.
        path: Utf8PathBuf,
        /// Underlying error.
        #[source]
        err: io::Error,
    },

    /// No free loopback slot could be claimed.
    #[error("out of loopback devices for {backing}")]
    AllocationExhausted {
        /// The backing file we were trying to bind.
        backing: Utf8PathBuf,
        /// The error that ended the scan.
        #[source]
        err: io::Error,
    },

    /// The mount syscall failed.
    #[error("mounting {device} ({fstype}) on {target}")]
    MountSyscall {
        /// Device node or source string passed to the kernel.
        device: String,
        /// Mount point.
        target: Utf8PathBuf,
        /// Filesystem type.
        fstype: String,
        /// Underlying error.
        #[source]
        err: io::Error,
    },

    /// The volume was reformatted but still failed to mount.
    #[error("re-mount of {device} on {target} failed after format")]
    FormatRemountFailed {
        /// Device node.
        device: Utf8PathBuf,
        /// Mount point.
        target: Utf8PathBuf,
        /// Underlying error.
        #[source]
        err: io::Error,
    },

    /// The external formatter failed.
    #[error("formatting {device}: {reason}")]
    Format {
        /// Device node.
        device: Utf8PathBuf,
        /// Formatter diagnostics.
        reason: String,
    },

    /// The isolated bulk-mount child could not be run to completion.
    #[error("bulk mount child: {reason}")]
    ChildTermination {
        /// What went wrong.
        reason: String,
    },

    /// A target string does not use an accepted scheme.
    #[error("unsupported target {target:?}")]
    UnsupportedTarget {
        /// The rejected target.
        target: String,
    },

    /// The kernel has no UBI attach/detach control interface.
    #[error("MTD attach/detach is not supported by the running kernel")]
    UbiUnsupported,

    /// A UBI control request failed.
    #[error("{what}")]
    Ubi {
        /// The request, e.g. `attaching mtd3`.
        what: String,
        /// Underlying error.
        #[source]
        err: io::Error,
    },

    /// A command was invoked with the wrong arguments.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
}

impl MountError {
    /// The signed status code for the command dispatcher.
    pub fn status(&self) -> i32 {
        match self {
            MountError::FormatRemountFailed { .. } => STATUS_REMOUNT_AFTER_FORMAT,
            _ => STATUS_FAILURE,
        }
    }
}

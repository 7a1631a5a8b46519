//! # initmount command line tool
//!
//! Each subcommand is one init builtin. The process exit code is the
//! builtin's signed status (so `-1` shows up as 255).

use std::ffi::OsString;
use std::time::Duration;

use anyhow::Result;
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use initmount_mount::MountError;
use initmount_mount::command_status;
use initmount_mount::executor::MountRequest;
use initmount_mount::wait::wait_for_path;

use crate::builtins::System;
use crate::config;

/// Status of a builtin that failed outside the mount error taxonomy.
const STATUS_FAILURE: i32 = -1;

/// Options for `mount`.
#[derive(Debug, Parser, PartialEq, Eq)]
pub(crate) struct MountOpts {
    /// Filesystem type, e.g. `ext4` or `ubifs`.
    pub(crate) fstype: String,
    /// Device node, or `mtd@<name>`, `loop@<file>`, `inand@<name>`.
    pub(crate) source: String,
    /// Mount point.
    pub(crate) target: Utf8PathBuf,
    /// Mount flags (`ro`, `noatime`, ...), `wait`, and finally an
    /// optional filesystem option string.
    #[clap(trailing_var_arg = true, allow_hyphen_values = true)]
    pub(crate) flags: Vec<String>,
}

/// Hidden commands used by initmount itself.
#[derive(Debug, Subcommand, PartialEq, Eq)]
#[clap(rename_all = "kebab-case")]
pub(crate) enum InternalsOpts {
    /// Run the bulk mount in this process; invoked by `mount_all`.
    MountAllChild {
        /// Storage table.
        fstab: Utf8PathBuf,
    },
}

/// Mount orchestration builtins for early boot.
#[derive(Debug, Parser, PartialEq, Eq)]
#[clap(name = "initmount", version, rename_all = "snake_case")]
pub(crate) enum Opt {
    /// Mount a filesystem.
    Mount(MountOpts),
    /// Mount everything in a storage table in an isolated child process,
    /// and publish whether the device is encrypted.
    MountAll {
        /// Storage table.
        fstab: Utf8PathBuf,
    },
    /// Attach an MTD partition (`mtd@<name>`) as a UBI device.
    Ubiattach {
        /// `mtd@<name>`
        target: String,
    },
    /// Detach a UBI device.
    Ubidetach {
        /// `mtd@<name>`, `devn@<number>` or `dev@<path>`
        target: String,
    },
    /// Wait for a path to exist.
    Wait {
        /// The path to wait for.
        path: Utf8PathBuf,
        /// Timeout in seconds; defaults to the configured wait timeout.
        timeout_secs: Option<u64>,
    },
    /// Enable every swap entry of a storage table.
    SwaponAll {
        /// Storage table.
        fstab: Utf8PathBuf,
    },
    /// Make sure an ext4 volume is mountable, formatting it if not.
    ConfirmFormatted {
        /// Filesystem type; only `ext4` is checked.
        fstype: String,
        /// Block device.
        device: Utf8PathBuf,
        /// Scratch mount point for the probe mount.
        target: Utf8PathBuf,
    },
    /// Run the filesystem checker; always succeeds.
    E2fsck {
        /// Checker options and device.
        #[clap(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    #[clap(subcommand, hide = true)]
    Internals(InternalsOpts),
}

/// Log a failed builtin and collapse it to its status.
fn report<T>(verb: &str, r: Result<T, MountError>) -> i32 {
    let status = command_status(&r);
    if let Err(e) = r {
        tracing::error!("{verb}: {:#}", anyhow::Error::new(e));
    }
    status
}

/// Parse the provided arguments and execute.
/// Calls [`clap::Error::exit`] on failure, printing the error message and aborting the program.
pub fn run_from_iter<I>(args: I) -> Result<i32>
where
    I: IntoIterator,
    I::Item: Into<OsString> + Clone,
{
    run_from_opt(Opt::parse_from(args))
}

/// Internal (non-generic/monomorphized) primary CLI entrypoint
fn run_from_opt(opt: Opt) -> Result<i32> {
    let sys = System::new(config::load_config()?);
    let status = match opt {
        Opt::Mount(opts) => {
            let req = MountRequest::new(opts.fstype, opts.source, opts.target, opts.flags);
            report("mount", sys.mount(&req))
        }
        Opt::MountAll { fstab } => sys.mount_all(&fstab).status(),
        Opt::Ubiattach { target } => report("ubiattach", sys.ubiattach(&target)),
        Opt::Ubidetach { target } => report("ubidetach", sys.ubidetach(&target)),
        Opt::Wait { path, timeout_secs } => {
            let timeout = timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(sys.layout().wait_timeout);
            if wait_for_path(&path, timeout) {
                0
            } else {
                STATUS_FAILURE
            }
        }
        Opt::SwaponAll { fstab } => match sys.swapon_all(&fstab) {
            Ok(()) => 0,
            Err(e) => {
                tracing::error!("swapon_all: {e:#}");
                STATUS_FAILURE
            }
        },
        Opt::ConfirmFormatted {
            fstype,
            device,
            target,
        } => report(
            "confirm_formatted",
            sys.confirm_formatted(&fstype, &device, &target),
        ),
        Opt::E2fsck { args } => {
            sys.e2fsck(&args);
            0
        }
        Opt::Internals(InternalsOpts::MountAllChild { fstab }) => {
            sys.mount_all_child(&fstab).status()
        }
    };
    Ok(status)
}

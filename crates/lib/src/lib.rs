//! # Mount orchestration builtins for early boot
//!
//! This is the implementation library for initmount. The `initmount`
//! binary (`crates/cli`) is a thin wrapper that delegates to
//! [`cli::run_from_iter`].
//!
//! The API is internal and not stable for external consumption.
//!
//! # Module Index
//!
//! - [`cli`] - Command-line interface implementation (clap-based)
//! - `config` - TOML configuration fragments
//! - `builtins` - The builtins wired to the real system
//! - `fstab` - The storage table and the bulk-mount routine
//! - `props` - Property store and trigger queue backed by external programs
//!
//! The mount engine itself lives in
//! [`initmount-mount`](../initmount_mount/index.html).

mod builtins;
pub mod cli;
mod config;
mod fstab;
mod props;

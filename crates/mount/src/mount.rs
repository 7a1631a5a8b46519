//! Mount orchestration for early boot.
//!
//! This crate turns the volume descriptors used by init scripts
//! (`mtd@<name>`, `loop@<path>`, `inand@<name>`, or a plain device node)
//! into mounted filesystems, attaches and detaches UBI devices, and
//! supervises the isolated "mount everything in the storage table" step.
//!
//! Everything here is synchronous; the only concurrency is the child
//! process spawned by [`bulk::BulkMountSupervisor`].
//!
//! Collaborators owned by the rest of the system (the property store,
//! the action trigger queue, device name tables, the filesystem
//! formatter, the UBI control library) are modelled as traits so the
//! policies can be exercised without a real device.

pub mod bulk;
mod error;
pub mod executor;
pub mod flags;
pub mod layout;
pub mod loopdev;
pub mod mounter;
pub mod props;
pub mod resolver;
pub mod scheme;
mod sys;
pub mod ubi;
pub mod wait;

pub use error::MountError;

/// Collapse the result of a builtin into the signed status handed back
/// to the command dispatcher: `0` on success, negative on failure.
pub fn command_status<T>(r: &Result<T, MountError>) -> i32 {
    match r {
        Ok(_) => 0,
        Err(e) => e.status(),
    }
}

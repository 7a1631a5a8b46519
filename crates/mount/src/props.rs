//! The global property store and action trigger queue, as seen from here.

use anyhow::Result;

/// Encryption state of the device after the bulk mount.
pub const CRYPTO_STATE_PROP: &str = "ro.crypto.state";
/// Tells the volume daemon to start decryption.
pub const VOLD_DECRYPT_PROP: &str = "vold.decrypt";
/// Set when the primary data partition failed to mount.
pub const MOUNT_DATA_FAIL_PROP: &str = "ro.init.mountdatafail";
/// Trigger fired when the bulk mount found no encrypted volume.
pub const NONENCRYPTED_TRIGGER: &str = "nonencrypted";

/// Named, globally visible key-value entries.
pub trait PropertyStore: std::fmt::Debug {
    /// Read a property; `None` if unset.
    fn get(&self, name: &str) -> Result<Option<String>>;
    /// Write a property.
    fn set(&self, name: &str, value: &str) -> Result<()>;
}

/// Queues the actions registered against a trigger name.
pub trait TriggerQueue: std::fmt::Debug {
    /// Schedule every action registered for `trigger`.
    fn queue_trigger(&self, trigger: &str) -> Result<()>;
}

/// Write a property, logging rather than propagating a failure.
/// Returns whether the write went through.
pub(crate) fn set_logged(props: &dyn PropertyStore, name: &str, value: &str) -> bool {
    match props.set(name, value) {
        Ok(()) => {
            tracing::debug!("Set {name}={value}");
            true
        }
        Err(e) => {
            tracing::error!("Failed to set {name}={value}: {e:#}");
            false
        }
    }
}

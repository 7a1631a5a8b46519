//! Parsing of the schemed device specifiers used by init scripts.
//!
//! Specifiers are parsed once into a tagged variant; everything
//! downstream matches on the variant instead of re-testing prefixes.

use camino::Utf8PathBuf;

use crate::MountError;

/// Prefix naming a raw flash partition by label.
pub const MTD_PREFIX: &str = "mtd@";
/// Prefix naming a file to expose through a loopback device.
pub const LOOP_PREFIX: &str = "loop@";
/// Prefix naming an iNAND partition alias.
pub const INAND_PREFIX: &str = "inand@";
/// Prefix naming a UBI device by its logical device number.
pub const UBI_DEVN_PREFIX: &str = "devn@";
/// Prefix naming a UBI device by its device node.
pub const UBI_DEV_PREFIX: &str = "dev@";

/// Filesystem types starting with this are mounted with one retry.
const UBIFS_PREFIX: &str = "ubifs";
/// Filesystem types starting with this are eligible for format-and-retry.
const EXT4_PREFIX: &str = "ext4";

/// The source half of a `mount` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceScheme {
    /// `mtd@<name>`
    Mtd(String),
    /// `loop@<path>`
    Loop(Utf8PathBuf),
    /// `inand@<name>`
    Inand(String),
    /// Anything else, taken as a device path.
    Raw(Utf8PathBuf),
}

impl SourceScheme {
    /// Classify a source specifier. This never fails; unrecognized
    /// specifiers are device paths.
    pub fn parse(spec: &str) -> Self {
        if let Some(name) = spec.strip_prefix(MTD_PREFIX) {
            SourceScheme::Mtd(name.to_owned())
        } else if let Some(path) = spec.strip_prefix(LOOP_PREFIX) {
            SourceScheme::Loop(path.into())
        } else if let Some(name) = spec.strip_prefix(INAND_PREFIX) {
            SourceScheme::Inand(name.to_owned())
        } else {
            SourceScheme::Raw(spec.into())
        }
    }
}

/// Whether `fstype` belongs to the ubifs family.
///
/// This is a prefix match, not equality.
pub fn is_ubifs(fstype: &str) -> bool {
    fstype.starts_with(UBIFS_PREFIX)
}

/// Whether `fstype` belongs to the ext4 family.
pub fn is_ext4(fstype: &str) -> bool {
    fstype.starts_with(EXT4_PREFIX)
}

/// Which UBI device a `ubiattach`/`ubidetach` command refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UbiTarget {
    /// `mtd@<name>`: the UBI device built on this MTD partition.
    ByMtdName(String),
    /// `devn@<n>`: UBI logical device number.
    ByDeviceNumber(u32),
    /// `dev@<path>`: MTD character device node (major 90) of the
    /// partition the UBI device is built on.
    ByDevicePath(Utf8PathBuf),
}

impl UbiTarget {
    /// Parse a detach target; exactly one of the three forms must match.
    pub fn parse(target: &str) -> Result<Self, MountError> {
        let unsupported = || MountError::UnsupportedTarget {
            target: target.to_owned(),
        };
        if let Some(name) = target.strip_prefix(MTD_PREFIX) {
            if name.is_empty() {
                return Err(unsupported());
            }
            Ok(UbiTarget::ByMtdName(name.to_owned()))
        } else if let Some(n) = target.strip_prefix(UBI_DEVN_PREFIX) {
            n.parse().map(UbiTarget::ByDeviceNumber).map_err(|_| unsupported())
        } else if let Some(path) = target.strip_prefix(UBI_DEV_PREFIX) {
            if path.is_empty() {
                return Err(unsupported());
            }
            Ok(UbiTarget::ByDevicePath(path.into()))
        } else {
            Err(unsupported())
        }
    }

    /// Parse an attach target, which only accepts `mtd@<name>`.
    pub fn parse_attach(target: &str) -> Result<Self, MountError> {
        match Self::parse(target)? {
            t @ UbiTarget::ByMtdName(_) => Ok(t),
            _ => Err(MountError::UnsupportedTarget {
                target: target.to_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_scheme() {
        assert_eq!(
            SourceScheme::parse("mtd@system"),
            SourceScheme::Mtd("system".into())
        );
        assert_eq!(
            SourceScheme::parse("loop@/data/app.img"),
            SourceScheme::Loop("/data/app.img".into())
        );
        assert_eq!(
            SourceScheme::parse("inand@cache"),
            SourceScheme::Inand("cache".into())
        );
        assert_eq!(
            SourceScheme::parse("/dev/block/mmcblk0p2"),
            SourceScheme::Raw("/dev/block/mmcblk0p2".into())
        );
        // Only a leading scheme counts
        assert_eq!(
            SourceScheme::parse("/dev/mtd@x"),
            SourceScheme::Raw("/dev/mtd@x".into())
        );
    }

    #[test]
    fn test_fstype_families() {
        assert!(is_ubifs("ubifs"));
        assert!(is_ubifs("ubifs2"));
        assert!(!is_ubifs("ubi"));
        assert!(is_ext4("ext4"));
        assert!(!is_ext4("ext3"));
    }

    #[test]
    fn test_ubi_target() {
        assert_eq!(
            UbiTarget::parse("mtd@system").unwrap(),
            UbiTarget::ByMtdName("system".into())
        );
        assert_eq!(
            UbiTarget::parse("devn@3").unwrap(),
            UbiTarget::ByDeviceNumber(3)
        );
        assert_eq!(
            UbiTarget::parse("dev@/dev/mtd4").unwrap(),
            UbiTarget::ByDevicePath("/dev/mtd4".into())
        );
        for bad in ["foo@bar", "devn@-1", "devn@x", "dev@", "mtd@", "/dev/ubi0"] {
            assert!(
                matches!(
                    UbiTarget::parse(bad),
                    Err(MountError::UnsupportedTarget { .. })
                ),
                "{bad}"
            );
        }
        assert!(UbiTarget::parse_attach("mtd@system").is_ok());
        assert!(UbiTarget::parse_attach("devn@1").is_err());
        assert!(UbiTarget::parse_attach("dev@/dev/mtd4").is_err());
    }
}

//! Resolution of symbolic flash partition names to device indices.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use camino::Utf8PathBuf;

use crate::MountError;
use crate::scheme::{INAND_PREFIX, MTD_PREFIX};

/// Default interval between iNAND name lookups.
pub const DEFAULT_INAND_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A name → index lookup capability, e.g. the kernel's MTD partition list.
pub trait NameTable: std::fmt::Debug {
    /// Look up the index of the partition labelled `name`.
    ///
    /// Returns `Ok(None)` if the table is readable but has no such entry.
    fn index_of(&self, name: &str) -> Result<Option<u32>>;
}

/// A name table in the format of `/proc/mtd`:
///
/// ```text
/// dev:    size   erasesize  name
/// mtd0: 00200000 00020000 "boot"
/// ```
///
/// The file is re-read on every lookup, since it changes as drivers
/// enumerate partitions.
#[derive(Debug, Clone)]
pub struct PartitionListTable {
    path: Utf8PathBuf,
}

impl PartitionListTable {
    /// A table backed by the given file.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Parse one entry line, returning the index and the unquoted name.
fn parse_partition_line(line: &str) -> Option<(u32, &str)> {
    let (dev, rest) = line.split_once(':')?;
    let index = dev
        .trim_start_matches(|c: char| !c.is_ascii_digit())
        .parse()
        .ok()?;
    let name = rest.rsplit_once(char::is_whitespace).map_or(rest, |(_, n)| n);
    let name = name.trim().strip_prefix('"')?.strip_suffix('"')?;
    Some((index, name))
}

impl NameTable for PartitionListTable {
    fn index_of(&self, name: &str) -> Result<Option<u32>> {
        let buf = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Reading {}", self.path))?;
        Ok(buf
            .lines()
            .filter_map(parse_partition_line)
            .find(|(_, n)| *n == name)
            .map(|(i, _)| i))
    }
}

/// Maps `mtd@` and `inand@` names to device indices.
#[derive(Debug)]
pub struct DeviceResolver<'a> {
    mtd: &'a dyn NameTable,
    inand: &'a dyn NameTable,
    /// Interval between iNAND lookups.
    pub inand_poll_interval: Duration,
    /// Deadline for iNAND lookups; `None` polls until the name appears.
    pub inand_timeout: Option<Duration>,
}

impl<'a> DeviceResolver<'a> {
    /// Resolver over the given tables, with unbounded iNAND polling.
    pub fn new(mtd: &'a dyn NameTable, inand: &'a dyn NameTable) -> Self {
        Self {
            mtd,
            inand,
            inand_poll_interval: DEFAULT_INAND_POLL_INTERVAL,
            inand_timeout: None,
        }
    }

    /// Resolve an MTD partition name. A single attempt; a missing name
    /// is an error.
    pub fn resolve_mtd(&self, name: &str) -> Result<u32, MountError> {
        let spec = format!("{MTD_PREFIX}{name}");
        match self.mtd.index_of(name) {
            Ok(Some(index)) => {
                tracing::debug!("Resolved {spec} to mtd{index}");
                Ok(index)
            }
            Ok(None) => Err(MountError::Resolution {
                name: spec,
                reason: "no such partition".into(),
            }),
            Err(e) => Err(MountError::Resolution {
                name: spec,
                reason: format!("{e:#}"),
            }),
        }
    }

    /// Resolve an iNAND partition name, polling while the flash
    /// subsystem is still enumerating.
    ///
    /// With no [`Self::inand_timeout`] this blocks until the name shows up.
    pub fn resolve_inand(&self, name: &str) -> Result<u32, MountError> {
        let spec = format!("{INAND_PREFIX}{name}");
        let start = Instant::now();
        loop {
            match self.inand.index_of(name) {
                Ok(Some(index)) => {
                    tracing::info!("Resolved {spec} to index {index}");
                    return Ok(index);
                }
                Ok(None) => tracing::debug!("{spec} not available yet"),
                Err(e) => tracing::debug!("{spec} not available yet: {e:#}"),
            }
            if let Some(timeout) = self.inand_timeout {
                let waited = start.elapsed();
                if waited >= timeout {
                    return Err(MountError::ResolutionTimeout { name: spec, waited });
                }
            }
            std::thread::sleep(self.inand_poll_interval);
        }
    }
}

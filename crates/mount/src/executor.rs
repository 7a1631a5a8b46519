//! The `mount` builtin: one request, one strategy chosen by the source
//! scheme, one signed status.

use camino::{Utf8Path, Utf8PathBuf};
use rustix::fs::{Mode, OFlags};
use rustix::mount::MountFlags;

use crate::MountError;
use crate::flags::{MountOptions, parse_mount_flags};
use crate::layout::DeviceLayout;
use crate::loopdev::{self, LoopBinding, LoopControl};
use crate::mounter::{Formatter, Mounter};
use crate::props::{MOUNT_DATA_FAIL_PROP, PropertyStore, set_logged};
use crate::resolver::DeviceResolver;
use crate::scheme::{SourceScheme, is_ext4, is_ubifs};
use crate::wait::wait_for_path;

/// Options used by the first-boot format probe.
const CONFIRM_FORMAT_DATA: &str = "noauto_da_alloc";

/// A parsed `mount <type> <source> <target> [flag|option ...]` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRequest {
    /// Filesystem type passed to the kernel.
    pub filesystem_type: String,
    /// Source specifier, possibly schemed (`mtd@`, `loop@`, `inand@`).
    pub source_spec: String,
    /// Mount point.
    pub target_path: Utf8PathBuf,
    /// The trailing tokens as given.
    pub flag_tokens: Vec<String>,
    /// The translated tokens.
    pub options: MountOptions,
}

impl MountRequest {
    /// Build a request, translating the flag tokens.
    pub fn new(
        filesystem_type: impl Into<String>,
        source_spec: impl Into<String>,
        target_path: impl Into<Utf8PathBuf>,
        flag_tokens: Vec<String>,
    ) -> Self {
        let options = parse_mount_flags(&flag_tokens);
        Self {
            filesystem_type: filesystem_type.into(),
            source_spec: source_spec.into(),
            target_path: target_path.into(),
            flag_tokens,
            options,
        }
    }
}

/// A source specifier turned into something the kernel can mount.
#[derive(Debug)]
pub enum ResolvedSource {
    /// A device path used as given.
    Raw(Utf8PathBuf),
    /// MTD block device index.
    MtdBlock(u32),
    /// A loop device with the backing file bound to it.
    LoopBound(LoopBinding),
    /// iNAND block device index.
    InandBlock(u32),
}

impl ResolvedSource {
    /// The device node to hand to the mount syscall.
    pub fn device_path(&self, layout: &DeviceLayout) -> Utf8PathBuf {
        match self {
            ResolvedSource::Raw(p) => p.clone(),
            ResolvedSource::MtdBlock(i) => layout.mtd_block_path(*i),
            ResolvedSource::LoopBound(b) => b.path().to_owned(),
            ResolvedSource::InandBlock(i) => layout.inand_block_path(*i),
        }
    }

    /// Release a source whose mount failed, undoing any loop binding.
    fn abandon(self) {
        if let ResolvedSource::LoopBound(binding) = self {
            binding.clear();
        }
    }
}

/// What a `mount` command did, beyond its status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountOutcome {
    /// Whether the filesystem is mounted.
    pub succeeded: bool,
    /// Whether the volume was handed to the formatter.
    pub formatted: bool,
    /// A property written to signal a failure that was not escalated.
    pub signaled_property: Option<(String, String)>,
}

impl MountOutcome {
    fn mounted() -> Self {
        Self {
            succeeded: true,
            ..Default::default()
        }
    }
}

/// Executes mount requests against the injected collaborators.
#[derive(Debug)]
pub struct MountExecutor<'a> {
    /// Device naming and special mount points.
    pub layout: &'a DeviceLayout,
    /// Name tables for `mtd@` and `inand@`.
    pub resolver: &'a DeviceResolver<'a>,
    /// Loop device namespace.
    pub loops: &'a dyn LoopControl,
    /// The mount syscall.
    pub mounter: &'a dyn Mounter,
    /// ext4 formatter for the cache fallback.
    pub formatter: &'a dyn Formatter,
    /// Property store for the data failure flag.
    pub properties: &'a dyn PropertyStore,
}

impl MountExecutor<'_> {
    /// Run a `mount` command.
    pub fn mount(&self, req: &MountRequest) -> Result<MountOutcome, MountError> {
        match SourceScheme::parse(&req.source_spec) {
            SourceScheme::Mtd(name) => self.mount_mtd(req, &name),
            _ if is_ubifs(&req.filesystem_type) => self.mount_ubifs(req),
            SourceScheme::Loop(path) => self.mount_loop(req, &path),
            SourceScheme::Inand(name) => {
                let index = self.resolver.resolve_inand(&name)?;
                self.mount_block(req, ResolvedSource::InandBlock(index))
            }
            SourceScheme::Raw(path) => self.mount_block(req, ResolvedSource::Raw(path)),
        }
    }

    fn syscall(
        &self,
        req: &MountRequest,
        device: &str,
        flags: MountFlags,
        data: Option<&str>,
    ) -> Result<(), MountError> {
        let target = &req.target_path;
        let fstype = &req.filesystem_type;
        self.mounter
            .mount(device, target, fstype, flags, data)
            .map_err(|err| {
                tracing::error!("Failed to mount {device} ({fstype}) on {target}: {err}");
                MountError::MountSyscall {
                    device: device.to_owned(),
                    target: target.clone(),
                    fstype: fstype.clone(),
                    err,
                }
            })?;
        tracing::info!("Mounted {device} on {target}");
        Ok(())
    }

    fn mount_device(&self, req: &MountRequest, device: &str) -> Result<(), MountError> {
        self.syscall(
            req,
            device,
            req.options.flags,
            req.options.data.as_deref(),
        )
    }

    fn wait_if_requested(&self, req: &MountRequest, device: &Utf8Path) {
        if req.options.wait_for_source {
            // A timeout is not fatal; the mount below reports the real error.
            wait_for_path(device, self.layout.wait_timeout);
        }
    }

    fn mount_mtd(&self, req: &MountRequest, name: &str) -> Result<MountOutcome, MountError> {
        let source = ResolvedSource::MtdBlock(self.resolver.resolve_mtd(name)?);
        let device = source.device_path(self.layout);
        self.wait_if_requested(req, &device);
        self.mount_device(req, device.as_str())?;
        Ok(MountOutcome::mounted())
    }

    fn mount_ubifs(&self, req: &MountRequest) -> Result<MountOutcome, MountError> {
        if self.mount_device(req, &req.source_spec).is_err() {
            tracing::warn!("ubifs mount of {} failed; retrying", req.source_spec);
            self.mount_device(req, &req.source_spec)?;
        }
        Ok(MountOutcome::mounted())
    }

    fn mount_loop(&self, req: &MountRequest, backing: &Utf8Path) -> Result<MountOutcome, MountError> {
        let binding = loopdev::allocate(self.loops, backing, req.options.read_only())?;
        let source = ResolvedSource::LoopBound(binding);
        let device = source.device_path(self.layout);
        match self.mount_device(req, device.as_str()) {
            // Dropping the source closes the node; the binding stays for
            // as long as the filesystem is mounted.
            Ok(()) => Ok(MountOutcome::mounted()),
            Err(e) => {
                source.abandon();
                Err(e)
            }
        }
    }

    /// Mount a block device, applying the cache and data failure policies.
    fn mount_block(
        &self,
        req: &MountRequest,
        source: ResolvedSource,
    ) -> Result<MountOutcome, MountError> {
        let device = source.device_path(self.layout);
        let target = &req.target_path;
        self.wait_if_requested(req, &device);
        let err = match self.mount_device(req, device.as_str()) {
            Ok(()) => return Ok(MountOutcome::mounted()),
            Err(e) => e,
        };

        if is_ext4(&req.filesystem_type) && self.layout.is_cache(target) {
            tracing::error!("Mounting cache failed; formatting {device}");
            if let Err(e) = self.formatter.format_ext4(&device, target) {
                tracing::error!("{e:#}");
            }
            return match self.mount_device(req, device.as_str()) {
                Ok(()) => Ok(MountOutcome {
                    succeeded: true,
                    formatted: true,
                    signaled_property: None,
                }),
                Err(MountError::MountSyscall { err, .. }) => {
                    Err(MountError::FormatRemountFailed {
                        device,
                        target: target.clone(),
                        err,
                    })
                }
                Err(e) => Err(e),
            };
        }

        if self.layout.is_data(target) {
            let previous = self.properties.get(MOUNT_DATA_FAIL_PROP).ok().flatten();
            tracing::error!(
                "Mounting data failed; setting {MOUNT_DATA_FAIL_PROP} (was {})",
                previous.as_deref().unwrap_or("unset")
            );
            let signaled = set_logged(self.properties, MOUNT_DATA_FAIL_PROP, "true");
            return Ok(MountOutcome {
                succeeded: false,
                formatted: false,
                signaled_property: signaled
                    .then(|| (MOUNT_DATA_FAIL_PROP.into(), "true".into())),
            });
        }

        Err(err)
    }

    /// Make sure an ext4 volume is mountable, formatting it if it is not.
    ///
    /// The volume is probe-mounted and unmounted again. Other filesystem
    /// types are left alone.
    pub fn confirm_formatted(
        &self,
        fstype: &str,
        device: &Utf8Path,
        target: &Utf8Path,
    ) -> Result<(), MountError> {
        if !is_ext4(fstype) {
            tracing::debug!("Not confirming format of {fstype} volume {device}");
            return Ok(());
        }
        let req = MountRequest {
            filesystem_type: "ext4".into(),
            source_spec: device.to_string(),
            target_path: target.to_owned(),
            flag_tokens: Vec::new(),
            options: MountOptions {
                flags: MountFlags::NOATIME
                    | MountFlags::NODIRATIME
                    | MountFlags::NOSUID
                    | MountFlags::NODEV,
                wait_for_source: false,
                data: Some(CONFIRM_FORMAT_DATA.into()),
            },
        };
        if self.mount_device(&req, device.as_str()).is_err() {
            tracing::error!("Probe mount of {device} failed, maybe first boot; formatting");
            self.formatter
                .format_ext4(device, target)
                .map_err(|e| MountError::Format {
                    device: device.to_owned(),
                    reason: format!("{e:#}"),
                })?;
            sync_device(device);
            self.mount_device(&req, device.as_str())
                .map_err(|e| match e {
                    MountError::MountSyscall { err, .. } => MountError::FormatRemountFailed {
                        device: device.to_owned(),
                        target: target.to_owned(),
                        err,
                    },
                    e => e,
                })?;
        }
        if let Err(e) = self.mounter.unmount(target) {
            tracing::error!("Failed to unmount {target} after format check: {e}");
        }
        Ok(())
    }
}

/// Flush a freshly written device node.
fn sync_device(device: &Utf8Path) {
    let r = rustix::fs::open(
        device.as_std_path(),
        OFlags::RDWR | OFlags::CLOEXEC,
        Mode::empty(),
    )
    .and_then(|fd| rustix::fs::fsync(&fd));
    if let Err(e) = r {
        tracing::debug!("Syncing {device}: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopdev::tests::{FakeLoops, FakeState, backing_file};
    use crate::mounter::tests::{FakeFormatter, FakeMounter};
    use crate::props::tests::FakeProperties;
    use crate::resolver::tests::FakeTable;
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct Harness {
        layout: DeviceLayout,
        mtd: FakeTable,
        inand: FakeTable,
        loops: Option<FakeLoops>,
        mounter: FakeMounter,
        formatter: FakeFormatter,
        props: FakeProperties,
    }

    impl Harness {
        fn with_mounter(mounter: FakeMounter) -> Self {
            Self {
                mounter,
                ..Default::default()
            }
        }

        fn with_executor<R>(&self, f: impl FnOnce(&MountExecutor<'_>) -> R) -> R {
            let mut resolver = DeviceResolver::new(&self.mtd, &self.inand);
            resolver.inand_poll_interval = Duration::from_millis(1);
            let empty = FakeLoops::new(&[]);
            let loops = self.loops.as_ref().unwrap_or(&empty);
            let exec = MountExecutor {
                layout: &self.layout,
                resolver: &resolver,
                loops,
                mounter: &self.mounter,
                formatter: &self.formatter,
                properties: &self.props,
            };
            f(&exec)
        }

        fn mount(&self, req: &MountRequest) -> Result<MountOutcome, MountError> {
            self.with_executor(|e| e.mount(req))
        }

        fn sources(&self) -> Vec<String> {
            self.mounter
                .calls
                .borrow()
                .iter()
                .map(|c| c.source.clone())
                .collect()
        }
    }

    fn req(fstype: &str, source: &str, target: &str, tokens: &[&str]) -> MountRequest {
        MountRequest::new(
            fstype,
            source,
            target,
            tokens.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn test_request_translates_tokens() {
        let r = req("ext4", "/dev/x", "/cache", &["noatime", "rw", "wait"]);
        assert_eq!(r.options.flags, MountFlags::NOATIME);
        assert!(r.options.wait_for_source);
        assert_eq!(r.options.data, None);
        assert_eq!(r.flag_tokens.len(), 3);
    }

    #[test]
    fn test_mtd() {
        let mut h = Harness::default();
        h.mtd = FakeTable::with(&[("system", 3)]);
        let out = h
            .mount(&req("yaffs2", "mtd@system", "/system", &["ro", "barrier=1"]))
            .unwrap();
        assert!(out.succeeded);
        let calls = h.mounter.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].source, "/dev/block/mtdblock3");
        assert_eq!(calls[0].target, "/system");
        assert_eq!(calls[0].flags, MountFlags::RDONLY);
        assert_eq!(calls[0].data.as_deref(), Some("barrier=1"));
    }

    #[test]
    fn test_mtd_failures_are_final() {
        let mut h = Harness::with_mounter(FakeMounter::failing(1, libc::EINVAL));
        h.mtd = FakeTable::with(&[("cache", 2)]);
        // No format fallback for mtd sources, even on the cache mount point
        let e = h.mount(&req("ext4", "mtd@cache", "/cache", &[])).unwrap_err();
        assert!(matches!(e, MountError::MountSyscall { .. }));
        assert_eq!(e.status(), -1);
        assert_eq!(h.mounter.calls.borrow().len(), 1);
        assert!(h.formatter.calls.borrow().is_empty());

        let e = h.mount(&req("ext4", "mtd@nope", "/x", &[])).unwrap_err();
        assert!(matches!(e, MountError::Resolution { .. }));
        assert_eq!(h.mounter.calls.borrow().len(), 1);
    }

    #[test]
    fn test_ubifs_retries_once() {
        let h = Harness::with_mounter(FakeMounter::failing(1, libc::EBUSY));
        let out = h
            .mount(&req("ubifs", "ubi0:system", "/system", &[]))
            .unwrap();
        assert!(out.succeeded);
        assert_eq!(h.sources(), vec!["ubi0:system", "ubi0:system"]);

        let h = Harness::with_mounter(FakeMounter::failing(3, libc::EBUSY));
        let e = h
            .mount(&req("ubifs", "ubi0:system", "/system", &[]))
            .unwrap_err();
        assert_eq!(e.status(), -1);
        assert_eq!(h.mounter.calls.borrow().len(), 2);
    }

    #[test]
    fn test_ubifs_takes_precedence_over_loop() {
        let h = Harness::default();
        h.mount(&req("ubifs", "loop@/img", "/mnt", &[])).unwrap();
        assert_eq!(h.sources(), vec!["loop@/img"]);
    }

    #[test]
    fn test_loop_success_keeps_binding() -> anyhow::Result<()> {
        let (_td, img) = backing_file()?;
        let mut h = Harness::default();
        let loops = FakeLoops::new(&[FakeState::Busy, FakeState::Free]);
        h.loops = Some(loops.clone());
        let out = h
            .mount(&req("ext4", &format!("loop@{img}"), "/mnt/img", &["ro"]))
            .unwrap();
        assert!(out.succeeded);
        assert_eq!(h.sources(), vec!["/dev/block/loop1"]);
        assert_eq!(loops.states.borrow()[1], FakeState::Bound);
        let ev = loops.events.borrow();
        assert!(ev.cleared.is_empty());
        assert_eq!(ev.closed, vec![0, 1]);
        // `ro` opens every probed node read-only
        assert_eq!(ev.read_only, vec![true, true]);
        Ok(())
    }

    #[test]
    fn test_loop_failure_clears_binding() -> anyhow::Result<()> {
        let (_td, img) = backing_file()?;
        let mut h = Harness::with_mounter(FakeMounter::failing(1, libc::EINVAL));
        let loops = FakeLoops::new(&[FakeState::Free]);
        h.loops = Some(loops.clone());
        let e = h
            .mount(&req("ext4", &format!("loop@{img}"), "/mnt/img", &[]))
            .unwrap_err();
        assert!(matches!(e, MountError::MountSyscall { .. }));
        assert_eq!(loops.states.borrow()[0], FakeState::Free);
        let ev = loops.events.borrow();
        assert_eq!(ev.cleared, vec![0]);
        assert_eq!(ev.closed, vec![0]);
        assert_eq!(ev.read_only, vec![false]);
        Ok(())
    }

    #[test]
    fn test_loop_exhausted() -> anyhow::Result<()> {
        let (_td, img) = backing_file()?;
        let mut h = Harness::default();
        h.loops = Some(FakeLoops::new(&[FakeState::Busy]));
        let e = h
            .mount(&req("ext4", &format!("loop@{img}"), "/mnt/img", &[]))
            .unwrap_err();
        assert!(matches!(e, MountError::AllocationExhausted { .. }));
        assert!(h.mounter.calls.borrow().is_empty());
        Ok(())
    }

    #[test]
    fn test_inand() {
        let mut h = Harness::default();
        h.inand = FakeTable::with(&[("data", 5)]);
        h.inand.delay.set(2);
        h.mount(&req("ext4", "inand@data", "/data", &[])).unwrap();
        assert_eq!(h.sources(), vec!["/dev/block/cardblkinand5"]);
    }

    #[test]
    fn test_inand_data_failure_is_flagged() {
        let mut h = Harness::with_mounter(FakeMounter::failing(1, libc::EINVAL));
        h.inand = FakeTable::with(&[("data", 5)]);
        let r = h.mount(&req("ext4", "inand@data", "/data", &[]));
        assert_eq!(crate::command_status(&r), 0);
        assert!(!r.unwrap().succeeded);
        assert_eq!(h.props.value(MOUNT_DATA_FAIL_PROP).as_deref(), Some("true"));
        assert_eq!(h.sources(), vec!["/dev/block/cardblkinand5"]);
        assert!(h.formatter.calls.borrow().is_empty());
    }

    #[test]
    fn test_inand_cache_format_then_retry() {
        let mut h = Harness::with_mounter(FakeMounter::failing(1, libc::EINVAL));
        h.inand = FakeTable::with(&[("cache", 2)]);
        let out = h
            .mount(&req("ext4", "inand@cache", "/cache", &[]))
            .unwrap();
        assert!(out.succeeded);
        assert!(out.formatted);
        assert_eq!(*h.formatter.calls.borrow(), vec!["/dev/block/cardblkinand2"]);
        assert_eq!(
            h.sources(),
            vec!["/dev/block/cardblkinand2", "/dev/block/cardblkinand2"]
        );
    }

    /// A layout whose block nodes live in a scratch directory, with node
    /// `3` of each kind present.
    fn scratch_layout(dir: &Utf8Path) -> anyhow::Result<DeviceLayout> {
        std::fs::write(dir.join("mtdblock3"), b"")?;
        std::fs::write(dir.join("inand3"), b"")?;
        Ok(DeviceLayout {
            mtd_block_prefix: format!("{dir}/mtdblock"),
            inand_block_prefix: format!("{dir}/inand"),
            wait_timeout: Duration::from_secs(30),
            ..Default::default()
        })
    }

    #[test]
    fn test_wait_uses_resolved_device() -> anyhow::Result<()> {
        let td = tempfile::tempdir()?;
        let dir = Utf8PathBuf::try_from(td.path().to_owned())?;
        let mut h = Harness::default();
        h.layout = scratch_layout(&dir)?;
        h.mtd = FakeTable::with(&[("system", 3)]);
        h.inand = FakeTable::with(&[("data", 3)]);
        // Waiting on the literal specifier would run into the timeout.
        let start = std::time::Instant::now();
        h.mount(&req("ext4", "mtd@system", "/system", &["wait"]))?;
        h.mount(&req("ext4", "inand@data", "/data", &["wait"]))?;
        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(
            h.sources(),
            vec![format!("{dir}/mtdblock3"), format!("{dir}/inand3")]
        );
        Ok(())
    }

    #[test]
    fn test_mtd_wait_timeout_still_mounts() -> anyhow::Result<()> {
        let td = tempfile::tempdir()?;
        let dir = Utf8PathBuf::try_from(td.path().to_owned())?;
        let mut h = Harness::default();
        h.layout = scratch_layout(&dir)?;
        h.layout.wait_timeout = Duration::from_millis(20);
        h.mtd = FakeTable::with(&[("vendor", 4)]);
        h.mount(&req("ext4", "mtd@vendor", "/vendor", &["wait"]))?;
        assert_eq!(h.sources(), vec![format!("{dir}/mtdblock4")]);
        Ok(())
    }

    #[test]
    fn test_cache_format_then_retry() {
        let h = Harness::with_mounter(FakeMounter::failing(1, libc::EINVAL));
        let out = h
            .mount(&req("ext4", "/dev/x", "/cache", &["noatime"]))
            .unwrap();
        assert_eq!(
            out,
            MountOutcome {
                succeeded: true,
                formatted: true,
                signaled_property: None
            }
        );
        assert_eq!(*h.formatter.calls.borrow(), vec!["/dev/x"]);
        assert_eq!(h.sources(), vec!["/dev/x", "/dev/x"]);
    }

    #[test]
    fn test_cache_retry_failure_is_distinct() {
        let h = Harness::with_mounter(FakeMounter::failing(2, libc::EINVAL));
        let r = h.mount(&req("ext4", "/dev/x", "/cache", &["noatime"]));
        assert_eq!(crate::command_status(&r), -2);
        assert!(matches!(r, Err(MountError::FormatRemountFailed { .. })));
        assert_eq!(h.formatter.calls.borrow().len(), 1);
        assert_eq!(h.mounter.calls.borrow().len(), 2);
    }

    #[test]
    fn test_cache_formatter_failure_still_retries() {
        let mut h = Harness::with_mounter(FakeMounter::failing(1, libc::EINVAL));
        h.formatter.fail = true;
        let out = h.mount(&req("ext4", "/dev/x", "/cache", &[])).unwrap();
        assert!(out.succeeded);
        assert_eq!(h.mounter.calls.borrow().len(), 2);
    }

    #[test]
    fn test_cache_non_ext4_not_formatted() {
        let h = Harness::with_mounter(FakeMounter::failing(1, libc::EINVAL));
        let e = h.mount(&req("f2fs", "/dev/x", "/cache", &[])).unwrap_err();
        assert_eq!(e.status(), -1);
        assert!(h.formatter.calls.borrow().is_empty());
    }

    #[test]
    fn test_data_failure_is_flagged_not_fatal() {
        let h = Harness::with_mounter(FakeMounter::failing(1, libc::EINVAL));
        let r = h.mount(&req("f2fs", "/dev/y", "/data", &[]));
        assert_eq!(crate::command_status(&r), 0);
        let out = r.unwrap();
        assert!(!out.succeeded);
        assert_eq!(
            out.signaled_property,
            Some(("ro.init.mountdatafail".into(), "true".into()))
        );
        assert_eq!(h.props.value(MOUNT_DATA_FAIL_PROP).as_deref(), Some("true"));
        assert!(h.formatter.calls.borrow().is_empty());
    }

    #[test]
    fn test_data_flag_write_failure_not_reported() {
        let mut h = Harness::with_mounter(FakeMounter::failing(1, libc::EINVAL));
        h.props.read_only = true;
        let out = h.mount(&req("ext4", "/dev/y", "/data", &[])).unwrap();
        assert!(!out.succeeded);
        assert_eq!(out.signaled_property, None);
    }

    #[test]
    fn test_data_success_sets_nothing() {
        let h = Harness::default();
        h.mount(&req("ext4", "/dev/y", "/data", &[])).unwrap();
        assert!(h.props.writes.borrow().is_empty());
    }

    #[test]
    fn test_raw_failure() {
        let h = Harness::with_mounter(FakeMounter::failing(1, libc::ENOENT));
        let e = h
            .mount(&req("ext4", "/dev/z", "/vendor", &[]))
            .unwrap_err();
        assert_eq!(e.status(), -1);
        assert!(h.props.writes.borrow().is_empty());
    }

    #[test]
    fn test_raw_wait() -> anyhow::Result<()> {
        let td = tempfile::tempdir()?;
        let dev = Utf8PathBuf::try_from(td.path().join("dev"))?;
        std::fs::write(&dev, b"")?;
        let h = Harness::default();
        h.mount(&req("ext4", dev.as_str(), "/vendor", &["wait"]))?;
        assert_eq!(h.sources(), vec![dev.to_string()]);
        Ok(())
    }

    #[test]
    fn test_confirm_formatted() {
        // Probe succeeds: just unmount
        let h = Harness::default();
        let dev = Utf8Path::new("/dev/block/misc");
        let mp = Utf8Path::new("/mnt/misc");
        h.with_executor(|e| e.confirm_formatted("ext4", dev, mp)).unwrap();
        assert!(h.formatter.calls.borrow().is_empty());
        assert_eq!(*h.mounter.unmounts.borrow(), vec!["/mnt/misc"]);
        let calls = h.mounter.calls.borrow();
        assert_eq!(calls[0].data.as_deref(), Some("noauto_da_alloc"));
        assert!(calls[0].flags.contains(MountFlags::NODIRATIME));
        drop(calls);

        // Probe fails: format, retry, unmount
        let h = Harness::with_mounter(FakeMounter::failing(1, libc::EINVAL));
        h.with_executor(|e| e.confirm_formatted("ext4", dev, mp)).unwrap();
        assert_eq!(h.formatter.calls.borrow().len(), 1);
        assert_eq!(h.mounter.calls.borrow().len(), 2);
        assert_eq!(h.mounter.unmounts.borrow().len(), 1);

        // Retry fails too
        let h = Harness::with_mounter(FakeMounter::failing(2, libc::EINVAL));
        let r = h.with_executor(|e| e.confirm_formatted("ext4", dev, mp));
        assert_eq!(crate::command_status(&r), -2);
        assert!(h.mounter.unmounts.borrow().is_empty());

        // Formatter failure is fatal here
        let mut h = Harness::with_mounter(FakeMounter::failing(1, libc::EINVAL));
        h.formatter.fail = true;
        let r = h.with_executor(|e| e.confirm_formatted("ext4", dev, mp));
        assert!(matches!(r, Err(MountError::Format { .. })));
        assert_eq!(h.mounter.calls.borrow().len(), 1);

        // Other types are ignored
        let h = Harness::default();
        h.with_executor(|e| e.confirm_formatted("vfat", dev, mp)).unwrap();
        assert!(h.mounter.calls.borrow().is_empty());
    }
}

//! The builtins wired to the real system.

use std::process::Command;

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use initmount_mount::MountError;
use initmount_mount::bulk::{BulkMountResult, BulkMountSupervisor, ChildProcessRunner};
use initmount_mount::executor::{MountExecutor, MountOutcome, MountRequest};
use initmount_mount::layout::DeviceLayout;
use initmount_mount::loopdev::LoopDevices;
use initmount_mount::mounter::{CommandFormatter, SyscallMounter};
use initmount_mount::resolver::{DeviceResolver, PartitionListTable};
use initmount_mount::ubi::{KernelUbi, UbiController};
use initmount_utils::CommandRunExt;

use crate::config::MountConfiguration;
use crate::fstab;
use crate::props::{CommandPropertyStore, CommandTriggerQueue};

/// Re-executing ourselves runs the bulk mount in a fresh process.
const SELF_EXE: &str = "/proc/self/exe";
/// Arguments selecting the bulk-mount child; the table path is appended.
const MOUNT_ALL_CHILD_ARGS: &[&str] = &["internals", "mount-all-child"];

/// Production collaborators for every builtin.
#[derive(Debug)]
pub(crate) struct System {
    config: MountConfiguration,
    layout: DeviceLayout,
    mtd: PartitionListTable,
    inand: PartitionListTable,
    loops: LoopDevices,
    mounter: SyscallMounter,
    formatter: CommandFormatter,
    properties: CommandPropertyStore,
    triggers: CommandTriggerQueue,
    ubi: KernelUbi,
    ubi_ctrl: Utf8PathBuf,
}

impl System {
    pub(crate) fn new(config: MountConfiguration) -> Self {
        let layout = config.layout();
        Self {
            mtd: PartitionListTable::new(config.mtd_table()),
            inand: PartitionListTable::new(config.inand_table()),
            loops: LoopDevices::new(layout.loop_device_prefix.clone()),
            mounter: SyscallMounter,
            formatter: CommandFormatter::new(config.ext4_formatter()),
            properties: CommandPropertyStore {
                getter: config.property_getter(),
                setter: config.property_setter(),
            },
            triggers: CommandTriggerQueue {
                argv: config.trigger_command(),
            },
            ubi: KernelUbi::default(),
            ubi_ctrl: config.ubi_ctrl_device(),
            layout,
            config,
        }
    }

    pub(crate) fn layout(&self) -> &DeviceLayout {
        &self.layout
    }

    fn resolver(&self) -> DeviceResolver<'_> {
        let mut resolver = DeviceResolver::new(&self.mtd, &self.inand);
        resolver.inand_poll_interval = self.config.inand_poll_interval();
        resolver.inand_timeout = self.config.inand_timeout();
        resolver
    }

    fn with_executor<T>(&self, f: impl FnOnce(&MountExecutor<'_>) -> T) -> T {
        let resolver = self.resolver();
        let executor = MountExecutor {
            layout: &self.layout,
            resolver: &resolver,
            loops: &self.loops,
            mounter: &self.mounter,
            formatter: &self.formatter,
            properties: &self.properties,
        };
        f(&executor)
    }

    pub(crate) fn mount(&self, req: &MountRequest) -> Result<MountOutcome, MountError> {
        self.with_executor(|e| e.mount(req))
    }

    pub(crate) fn confirm_formatted(
        &self,
        fstype: &str,
        device: &Utf8Path,
        target: &Utf8Path,
    ) -> Result<(), MountError> {
        self.with_executor(|e| e.confirm_formatted(fstype, device, target))
    }

    pub(crate) fn mount_all(&self, fstab: &Utf8Path) -> BulkMountResult {
        let runner = ChildProcessRunner::new(SELF_EXE, MOUNT_ALL_CHILD_ARGS.iter().copied());
        BulkMountSupervisor {
            runner: &runner,
            properties: &self.properties,
            triggers: &self.triggers,
        }
        .mount_all(fstab)
    }

    /// The body of the bulk-mount child process.
    pub(crate) fn mount_all_child(&self, fstab: &Utf8Path) -> BulkMountResult {
        match fstab::read_fstab(fstab) {
            Ok(entries) => fstab::mount_all(&entries, &self.mounter, self.layout.wait_timeout),
            Err(e) => {
                tracing::error!("{e:#}");
                BulkMountResult::Error
            }
        }
    }

    pub(crate) fn swapon_all(&self, fstab: &Utf8Path) -> Result<()> {
        let entries = fstab::read_fstab(fstab)?;
        fstab::swapon_all(
            &entries,
            &self.config.swapon_command(),
            self.layout.wait_timeout,
        )
    }

    fn ubi_controller<T>(&self, f: impl FnOnce(&UbiController<'_>) -> T) -> T {
        let resolver = self.resolver();
        let controller = UbiController {
            library: &self.ubi,
            resolver: &resolver,
            ctrl_dev: &self.ubi_ctrl,
        };
        f(&controller)
    }

    pub(crate) fn ubiattach(&self, target: &str) -> Result<u32, MountError> {
        self.ubi_controller(|c| c.attach(target))
    }

    pub(crate) fn ubidetach(&self, target: &str) -> Result<(), MountError> {
        self.ubi_controller(|c| c.detach(target))
    }

    /// Run the filesystem checker with exactly two arguments (options
    /// and device). Its outcome is only logged.
    pub(crate) fn e2fsck(&self, args: &[String]) {
        if args.len() != 2 {
            tracing::error!("e2fsck: expected 2 arguments, got {}", args.len());
            return;
        }
        let argv = self.config.e2fsck_command();
        let Some((program, prefix)) = argv.split_first() else {
            tracing::error!("Empty e2fsck command");
            return;
        };
        let r = Command::new(program)
            .args(prefix)
            .args(args)
            .log_debug()
            .run_inherited_with_cmd_context();
        match r {
            Ok(()) => tracing::info!("e2fsck {} completed", args.join(" ")),
            Err(e) => tracing::error!("{e:#}"),
        }
    }
}

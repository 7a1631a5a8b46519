//! The `ubiattach` and `ubidetach` builtins.
//!
//! Both commands parse their target before touching the UBI control
//! interface, and open and close the control library exactly once.

use std::io;
use std::os::fd::{AsFd, OwnedFd};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std_ext::cap_std::{ambient_authority, fs::Dir};
use rustix::fs::{FileType, Mode, OFlags};

use crate::MountError;
use crate::resolver::DeviceResolver;
use crate::scheme::UbiTarget;
use crate::sys::{self, UBI_DEV_NUM_AUTO, UbiAttachReq};

/// Default UBI control device node.
pub const DEFAULT_CTRL_DEV: &str = "/dev/ubi_ctrl";

/// Character device major of MTD nodes (`/dev/mtdN`).
const MTD_CHAR_MAJOR: u32 = 90;

/// Present only when the kernel supports runtime attach and detach.
const CTRL_DEV_ATTR: &str = "class/misc/ubi_ctrl/dev";

/// Opens sessions with the UBI subsystem.
pub trait UbiLibrary: std::fmt::Debug {
    /// Open a session. Dropping the handle closes it.
    fn open(&self) -> io::Result<Box<dyn UbiHandle + '_>>;
}

/// An open session with the UBI subsystem.
pub trait UbiHandle: std::fmt::Debug {
    /// Major number of the control device, `None` if the running kernel
    /// cannot attach or detach at runtime.
    fn ctrl_major(&self) -> io::Result<Option<u32>>;
    /// Attach MTD device `mtd_num` with an automatically assigned UBI
    /// device number and the default VID header offset; returns the
    /// assigned number.
    fn attach_mtd(&self, ctrl_dev: &Utf8Path, mtd_num: u32) -> io::Result<u32>;
    /// Remove UBI device `ubi_num`.
    fn remove_dev(&self, ctrl_dev: &Utf8Path, ubi_num: u32) -> io::Result<()>;
    /// Detach the UBI device built on MTD device `mtd_num`.
    fn detach_mtd(&self, ctrl_dev: &Utf8Path, mtd_num: u32) -> io::Result<()>;
    /// Detach the UBI device built on the MTD character node `node`.
    fn detach_node(&self, ctrl_dev: &Utf8Path, node: &Utf8Path) -> io::Result<()>;
}

/// The kernel UBI interface: sysfs plus ioctls on the control device.
#[derive(Debug, Clone)]
pub struct KernelUbi {
    sysfs: Utf8PathBuf,
}

impl KernelUbi {
    /// Use the sysfs mounted at `sysfs`.
    pub fn new(sysfs: impl Into<Utf8PathBuf>) -> Self {
        Self {
            sysfs: sysfs.into(),
        }
    }
}

impl Default for KernelUbi {
    fn default() -> Self {
        Self::new("/sys")
    }
}

impl UbiLibrary for KernelUbi {
    fn open(&self) -> io::Result<Box<dyn UbiHandle + '_>> {
        let sysfs = Dir::open_ambient_dir(&self.sysfs, ambient_authority())?;
        // No class directory means no UBI support at all.
        let class = sysfs.open_dir("class/ubi")?;
        Ok(Box::new(KernelUbiHandle { sysfs, class }))
    }
}

#[derive(Debug)]
struct KernelUbiHandle {
    sysfs: Dir,
    class: Dir,
}

/// Parse the major number out of a sysfs `dev` attribute (`major:minor`).
fn parse_major(dev: &str) -> Option<u32> {
    dev.trim().split_once(':')?.0.parse().ok()
}

/// Read a sysfs attribute, `None` if it does not exist.
fn read_optional(sysfs: &Dir, attr: &str) -> io::Result<Option<String>> {
    match sysfs.read_to_string(attr) {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn invalid_data(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

impl KernelUbiHandle {
    fn open_ctrl(&self, ctrl_dev: &Utf8Path) -> io::Result<OwnedFd> {
        Ok(rustix::fs::open(
            ctrl_dev.as_std_path(),
            OFlags::RDONLY | OFlags::CLOEXEC,
            Mode::empty(),
        )?)
    }

    /// Find the UBI device number attached to `mtd_num`.
    fn ubi_num_for_mtd(&self, mtd_num: u32) -> io::Result<Option<u32>> {
        for entry in self.class.entries_utf8()? {
            let name = entry?.file_name()?;
            let Some(ubi_num) = name.strip_prefix("ubi").and_then(|n| n.parse::<u32>().ok())
            else {
                // ctrl node and volumes (ubiN_M)
                continue;
            };
            // Attributes are read relative to the sysfs root, since the
            // class entries are symlinks into the device tree.
            let attr = format!("class/ubi/{name}/mtd_num");
            let Some(contents) = read_optional(&self.sysfs, &attr)? else {
                continue;
            };
            let found: u32 = contents
                .trim()
                .parse()
                .map_err(|_| invalid_data(format!("parsing {attr}: {contents:?}")))?;
            if found == mtd_num {
                return Ok(Some(ubi_num));
            }
        }
        Ok(None)
    }
}

impl UbiHandle for KernelUbiHandle {
    fn ctrl_major(&self) -> io::Result<Option<u32>> {
        let Some(dev) = read_optional(&self.sysfs, CTRL_DEV_ATTR)? else {
            return Ok(None);
        };
        parse_major(&dev)
            .map(Some)
            .ok_or_else(|| invalid_data(format!("parsing ubi_ctrl dev {dev:?}")))
    }

    fn attach_mtd(&self, ctrl_dev: &Utf8Path, mtd_num: u32) -> io::Result<u32> {
        let ctrl = self.open_ctrl(ctrl_dev)?;
        let mtd_num =
            i32::try_from(mtd_num).map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
        let mut req = UbiAttachReq {
            ubi_num: UBI_DEV_NUM_AUTO,
            mtd_num,
            vid_hdr_offset: 0,
            ..Default::default()
        };
        sys::ubi_attach(ctrl.as_fd(), &mut req)?;
        u32::try_from(req.ubi_num).map_err(|_| invalid_data(format!("ubi_num {}", req.ubi_num)))
    }

    fn remove_dev(&self, ctrl_dev: &Utf8Path, ubi_num: u32) -> io::Result<()> {
        let ctrl = self.open_ctrl(ctrl_dev)?;
        let ubi_num =
            i32::try_from(ubi_num).map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
        sys::ubi_detach(ctrl.as_fd(), ubi_num)
    }

    fn detach_mtd(&self, ctrl_dev: &Utf8Path, mtd_num: u32) -> io::Result<()> {
        let ubi_num = self
            .ubi_num_for_mtd(mtd_num)?
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENODEV))?;
        self.remove_dev(ctrl_dev, ubi_num)
    }

    fn detach_node(&self, ctrl_dev: &Utf8Path, node: &Utf8Path) -> io::Result<()> {
        let st = rustix::fs::stat(node.as_std_path())?;
        let rdev = st.st_rdev;
        if FileType::from_raw_mode(st.st_mode) != FileType::CharacterDevice
            || rustix::fs::major(rdev) != MTD_CHAR_MAJOR
        {
            return Err(io::Error::from_raw_os_error(libc::ENODEV));
        }
        // Each MTD has a read-write and a read-only minor.
        self.detach_mtd(ctrl_dev, rustix::fs::minor(rdev) / 2)
    }
}

/// Attaches and detaches MTD partitions as UBI devices.
#[derive(Debug)]
pub struct UbiController<'a> {
    /// The UBI subsystem.
    pub library: &'a dyn UbiLibrary,
    /// Resolves `mtd@` names.
    pub resolver: &'a DeviceResolver<'a>,
    /// The control device node.
    pub ctrl_dev: &'a Utf8Path,
}

impl UbiController<'_> {
    /// Run `f` within one library session, after checking that the
    /// kernel supports runtime attach and detach.
    fn with_session<T>(
        &self,
        f: impl FnOnce(&dyn UbiHandle) -> Result<T, MountError>,
    ) -> Result<T, MountError> {
        let handle = self.library.open().map_err(|err| MountError::Ubi {
            what: "opening the UBI library".into(),
            err,
        })?;
        match handle.ctrl_major() {
            Ok(Some(_)) => {}
            Ok(None) => return Err(MountError::UbiUnsupported),
            Err(err) => {
                return Err(MountError::Ubi {
                    what: "getting UBI information".into(),
                    err,
                });
            }
        }
        f(handle.as_ref())
    }

    /// `ubiattach mtd@<name>`; returns the assigned UBI device number.
    pub fn attach(&self, target: &str) -> Result<u32, MountError> {
        let mtd_num = match UbiTarget::parse_attach(target)? {
            UbiTarget::ByMtdName(name) => self.resolver.resolve_mtd(&name)?,
            _ => {
                return Err(MountError::UnsupportedTarget {
                    target: target.to_owned(),
                });
            }
        };
        let ubi_num = self.with_session(|h| {
            h.attach_mtd(self.ctrl_dev, mtd_num)
                .map_err(|err| MountError::Ubi {
                    what: format!("attaching mtd{mtd_num}"),
                    err,
                })
        })?;
        tracing::info!("Attached mtd{mtd_num} as ubi{ubi_num}");
        Ok(ubi_num)
    }

    /// `ubidetach mtd@<name>|devn@<n>|dev@<path>`.
    pub fn detach(&self, target: &str) -> Result<(), MountError> {
        let target = match UbiTarget::parse(target)? {
            UbiTarget::ByMtdName(name) => DetachBy::Mtd(self.resolver.resolve_mtd(&name)?),
            UbiTarget::ByDeviceNumber(n) => DetachBy::Ubi(n),
            UbiTarget::ByDevicePath(p) => DetachBy::Node(p),
        };
        self.with_session(|h| {
            let (what, r) = match &target {
                DetachBy::Ubi(n) => (format!("removing ubi{n}"), h.remove_dev(self.ctrl_dev, *n)),
                DetachBy::Mtd(n) => (format!("detaching mtd{n}"), h.detach_mtd(self.ctrl_dev, *n)),
                DetachBy::Node(p) => (format!("detaching {p}"), h.detach_node(self.ctrl_dev, p)),
            };
            r.map_err(|err| MountError::Ubi { what, err })
        })?;
        tracing::info!("Detached {target:?}");
        Ok(())
    }
}

/// A detach target with names already resolved.
#[derive(Debug)]
enum DetachBy {
    Mtd(u32),
    Ubi(u32),
    Node(Utf8PathBuf),
}

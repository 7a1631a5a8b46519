//! Raw ioctls for loop devices and the UBI control node.
#![allow(unsafe_code)]

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};

// linux/loop.h
const LOOP_SET_FD: libc::c_ulong = 0x4C00;
const LOOP_CLR_FD: libc::c_ulong = 0x4C01;
const LOOP_GET_STATUS64: libc::c_ulong = 0x4C05;
/// `sizeof(struct loop_info64)`
const LOOP_INFO64_SIZE: usize = 232;

// mtd/ubi-user.h: _IOW('o', 64, struct ubi_attach_req), _IOW('o', 65, __s32)
const UBI_IOCATT: libc::c_ulong = 0x4018_6F40;
const UBI_IOCDET: libc::c_ulong = 0x4004_6F41;

/// Let the kernel pick the UBI device number.
pub(crate) const UBI_DEV_NUM_AUTO: i32 = -1;

/// `struct ubi_attach_req`
// Most fields are only read by the kernel.
#[allow(dead_code)]
#[repr(C)]
#[derive(Debug, Default)]
pub(crate) struct UbiAttachReq {
    pub(crate) ubi_num: i32,
    pub(crate) mtd_num: i32,
    pub(crate) vid_hdr_offset: i32,
    pub(crate) max_beb_per1024: i16,
    pub(crate) disable_fm: i8,
    pub(crate) need_resv_pool: i8,
    pub(crate) padding: [i8; 8],
}

fn check(r: libc::c_int) -> io::Result<()> {
    if r < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Whether the loop device is unbound, i.e. the status query fails with `ENXIO`.
pub(crate) fn loop_is_unbound(fd: BorrowedFd<'_>) -> bool {
    // Aligned scratch space at least as large as struct loop_info64
    let mut info = [0u64; LOOP_INFO64_SIZE.div_ceil(8)];
    // SAFETY: LOOP_GET_STATUS64 writes at most sizeof(struct loop_info64)
    // bytes to the pointer, and the buffer is at least that large.
    let r = unsafe { libc::ioctl(fd.as_raw_fd(), LOOP_GET_STATUS64 as _, info.as_mut_ptr()) };
    r < 0 && io::Error::last_os_error().raw_os_error() == Some(libc::ENXIO)
}

/// Bind `backing` to the loop device.
pub(crate) fn loop_set_fd(fd: BorrowedFd<'_>, backing: BorrowedFd<'_>) -> io::Result<()> {
    // SAFETY: LOOP_SET_FD takes a file descriptor by value.
    check(unsafe {
        libc::ioctl(
            fd.as_raw_fd(),
            LOOP_SET_FD as _,
            backing.as_raw_fd() as libc::c_ulong,
        )
    })
}

/// Unbind the loop device.
pub(crate) fn loop_clr_fd(fd: BorrowedFd<'_>) -> io::Result<()> {
    // SAFETY: LOOP_CLR_FD takes no argument.
    check(unsafe { libc::ioctl(fd.as_raw_fd(), LOOP_CLR_FD as _, 0 as libc::c_ulong) })
}

/// Attach an MTD device; on success the kernel stores the new UBI
/// device number in `req.ubi_num`.
pub(crate) fn ubi_attach(ctrl: BorrowedFd<'_>, req: &mut UbiAttachReq) -> io::Result<()> {
    // SAFETY: UBI_IOCATT reads and writes a struct ubi_attach_req, which
    // UbiAttachReq mirrors with #[repr(C)].
    check(unsafe { libc::ioctl(ctrl.as_raw_fd(), UBI_IOCATT as _, req as *mut UbiAttachReq) })
}

/// Detach UBI device `ubi_num`.
pub(crate) fn ubi_detach(ctrl: BorrowedFd<'_>, ubi_num: i32) -> io::Result<()> {
    // SAFETY: UBI_IOCDET reads one __s32 through the pointer.
    check(unsafe { libc::ioctl(ctrl.as_raw_fd(), UBI_IOCDET as _, &ubi_num as *const i32) })
}

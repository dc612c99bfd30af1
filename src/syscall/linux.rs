//! Implements Syscall trait for Linux systems
use std::any::Any;
use std::os::unix::fs::symlink;
use std::path::Path;

use nix::mount::{mount, MsFlags};
use nix::sys::stat::Mode;
use nix::unistd::{chdir, chroot, mkdir};

use super::{Result, Syscall, SyscallError};

/// Empty structure to implement Syscall trait for
#[derive(Clone)]
pub struct LinuxSyscall;

impl Syscall for LinuxSyscall {
    /// To enable dynamic typing,
    /// see https://doc.rust-lang.org/std/any/index.html for more information
    fn as_any(&self) -> &dyn Any {
        self
    }

    /// Change the apparent root of the whole process.
    // chroot(2) acts on the fs_struct, which every thread of this process
    // shares, so the caller must serialize it against other calls.
    fn chroot(&self, path: &Path) -> Result<()> {
        chroot(path).map_err(|errno| SyscallError::ChrootFailed {
            path: path.to_owned(),
            errno,
        })
    }

    fn chdir(&self, path: &Path) -> Result<()> {
        chdir(path).map_err(|errno| SyscallError::ChdirFailed {
            path: path.to_owned(),
            errno,
        })
    }

    /// see https://man7.org/linux/man-pages/man2/mount.2.html
    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<()> {
        mount(source, target, fstype, flags, data).map_err(|errno| SyscallError::MountFailed {
            mount_source: source.map(|p| p.to_owned()),
            mount_target: target.to_owned(),
            fstype: fstype.map(|s| s.to_owned()),
            flags,
            data: data.map(|s| s.to_owned()),
            errno,
        })
    }

    fn mkdir(&self, path: &Path, mode: Mode) -> Result<()> {
        mkdir(path, mode).map_err(|errno| SyscallError::mkdir(path.to_owned(), mode, errno))
    }

    fn symlink(&self, original: &Path, link: &Path) -> Result<()> {
        symlink(original, link).map_err(|err| SyscallError::SymlinkFailed {
            old_path: original.to_owned(),
            new_path: link.to_owned(),
            err,
        })
    }
}

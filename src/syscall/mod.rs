//! Contains a wrapper of syscalls for unit tests
//! This provides a uniform interface for the executor
//! to call the kernel operations a request can ask for

pub mod linux;
#[allow(clippy::module_inception)]
pub mod syscall;
pub mod test;

pub use syscall::Syscall;

use std::path::PathBuf;

use nix::errno::Errno;
use nix::mount::MsFlags;
use nix::sys::stat::Mode;

#[derive(Debug, thiserror::Error)]
pub enum SyscallError {
    #[error("chroot to {path:?} failed: {errno}")]
    ChrootFailed { path: PathBuf, errno: Errno },
    #[error("chdir to {path:?} failed: {errno}")]
    ChdirFailed { path: PathBuf, errno: Errno },
    #[error("mount of {mount_source:?} on {mount_target:?} failed: {errno}")]
    MountFailed {
        mount_source: Option<PathBuf>,
        mount_target: PathBuf,
        fstype: Option<String>,
        flags: MsFlags,
        data: Option<String>,
        errno: Errno,
    },
    #[error("mkdir {path:?} with mode {mode:o} failed: {errno}")]
    MkdirFailed {
        path: PathBuf,
        mode: libc::mode_t,
        errno: Errno,
    },
    #[error("symlink {new_path:?} -> {old_path:?} failed: {err}")]
    SymlinkFailed {
        old_path: PathBuf,
        new_path: PathBuf,
        err: std::io::Error,
    },
}

impl SyscallError {
    pub(crate) fn mkdir(path: PathBuf, mode: Mode, errno: Errno) -> Self {
        SyscallError::MkdirFailed {
            path,
            mode: mode.bits(),
            errno,
        }
    }
}

type Result<T> = std::result::Result<T, SyscallError>;

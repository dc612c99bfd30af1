//! An interface trait so that the executor can call
//! necessary functions without having to worry about their
//! implementation details
use std::any::Any;
use std::path::Path;

use nix::mount::MsFlags;
use nix::sys::stat::Mode;

use crate::syscall::linux::LinuxSyscall;
use crate::syscall::test::TestHelperSyscall;
use crate::syscall::Result;

/// This specifies the kernel functionalities a pod init can be asked
/// to perform. Implementations are shared between session threads.
pub trait Syscall: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn chroot(&self, path: &Path) -> Result<()>;
    fn chdir(&self, path: &Path) -> Result<()>;
    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<()>;
    fn mkdir(&self, path: &Path, mode: Mode) -> Result<()>;
    fn symlink(&self, original: &Path, link: &Path) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyscallType {
    Linux,
    Test,
}

impl Default for SyscallType {
    fn default() -> Self {
        if cfg!(test) {
            SyscallType::Test
        } else {
            SyscallType::Linux
        }
    }
}

impl SyscallType {
    pub fn create_syscall(&self) -> Box<dyn Syscall> {
        match self {
            SyscallType::Linux => Box::new(LinuxSyscall),
            SyscallType::Test => Box::<TestHelperSyscall>::default(),
        }
    }
}

pub fn create_syscall() -> Box<dyn Syscall> {
    SyscallType::default().create_syscall()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_syscall_is_test_helper_under_test() {
        let syscall = create_syscall();
        assert!(syscall
            .as_any()
            .downcast_ref::<TestHelperSyscall>()
            .is_some());
    }

    #[test]
    fn test_linux_syscall_type() {
        let syscall = SyscallType::Linux.create_syscall();
        assert!(syscall.as_any().downcast_ref::<LinuxSyscall>().is_some());
    }
}

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use nix::errno::Errno;
use nix::mount::MsFlags;
use nix::sys::stat::Mode;

use super::{Result, Syscall, SyscallError};

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MountArgs {
    pub source: Option<PathBuf>,
    pub target: PathBuf,
    pub fstype: Option<String>,
    pub flags: MsFlags,
    pub data: Option<String>,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MkdirArgs {
    pub path: PathBuf,
    pub mode: Mode,
}

/// Records every call instead of touching the kernel. Safe to share
/// between session threads; also tracks how many calls overlapped.
#[derive(Default)]
pub struct TestHelperSyscall {
    chroot_args: Mutex<Vec<PathBuf>>,
    chdir_args: Mutex<Vec<PathBuf>>,
    mount_args: Mutex<Vec<MountArgs>>,
    mkdir_args: Mutex<Vec<MkdirArgs>>,
    symlink_args: Mutex<Vec<(PathBuf, PathBuf)>>,
    ret_err: Mutex<Option<Errno>>,
    delay: Mutex<Option<Duration>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TestHelperSyscall {
    /// Every following call fails with `errno` after being recorded.
    pub fn set_ret_err(&self, errno: Errno) {
        *lock(&self.ret_err) = Some(errno);
    }

    pub fn clear_ret_err(&self) {
        *lock(&self.ret_err) = None;
    }

    /// Makes every call sleep, which widens the window for overlapping calls.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    pub fn get_chroot_args(&self) -> Vec<PathBuf> {
        lock(&self.chroot_args).clone()
    }

    pub fn get_chdir_args(&self) -> Vec<PathBuf> {
        lock(&self.chdir_args).clone()
    }

    pub fn get_mount_args(&self) -> Vec<MountArgs> {
        lock(&self.mount_args).clone()
    }

    pub fn get_mkdir_args(&self) -> Vec<MkdirArgs> {
        lock(&self.mkdir_args).clone()
    }

    pub fn get_symlink_args(&self) -> Vec<(PathBuf, PathBuf)> {
        lock(&self.symlink_args).clone()
    }

    /// Total number of calls of any kind.
    pub fn call_count(&self) -> usize {
        lock(&self.chroot_args).len()
            + lock(&self.chdir_args).len()
            + lock(&self.mount_args).len()
            + lock(&self.mkdir_args).len()
            + lock(&self.symlink_args).len()
    }

    /// Highest number of calls that were in flight at the same time.
    pub fn max_concurrent_calls(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn enter(&self) -> Option<Errno> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let ret = *lock(&self.ret_err);
        self.active.fetch_sub(1, Ordering::SeqCst);
        ret
    }
}

impl Syscall for TestHelperSyscall {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn chroot(&self, path: &Path) -> Result<()> {
        lock(&self.chroot_args).push(path.to_owned());
        match self.enter() {
            Some(errno) => Err(SyscallError::ChrootFailed {
                path: path.to_owned(),
                errno,
            }),
            None => Ok(()),
        }
    }

    fn chdir(&self, path: &Path) -> Result<()> {
        lock(&self.chdir_args).push(path.to_owned());
        match self.enter() {
            Some(errno) => Err(SyscallError::ChdirFailed {
                path: path.to_owned(),
                errno,
            }),
            None => Ok(()),
        }
    }

    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<()> {
        let args = MountArgs {
            source: source.map(|x| x.to_owned()),
            target: target.to_owned(),
            fstype: fstype.map(|x| x.to_owned()),
            flags,
            data: data.map(|x| x.to_owned()),
        };
        lock(&self.mount_args).push(args.clone());
        match self.enter() {
            Some(errno) => Err(SyscallError::MountFailed {
                mount_source: args.source,
                mount_target: args.target,
                fstype: args.fstype,
                flags,
                data: args.data,
                errno,
            }),
            None => Ok(()),
        }
    }

    fn mkdir(&self, path: &Path, mode: Mode) -> Result<()> {
        lock(&self.mkdir_args).push(MkdirArgs {
            path: path.to_owned(),
            mode,
        });
        match self.enter() {
            Some(errno) => Err(SyscallError::mkdir(path.to_owned(), mode, errno)),
            None => Ok(()),
        }
    }

    fn symlink(&self, original: &Path, link: &Path) -> Result<()> {
        lock(&self.symlink_args).push((original.to_owned(), link.to_owned()));
        match self.enter() {
            Some(errno) => Err(SyscallError::SymlinkFailed {
                old_path: original.to_owned(),
                new_path: link.to_owned(),
                err: std::io::Error::from_raw_os_error(errno as i32),
            }),
            None => Ok(()),
        }
    }
}

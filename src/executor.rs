//! Performs the kernel operation behind a decoded command.
//!
//! Changing root and mounting act on state shared by the whole process, so
//! every call goes through a single lock. The lock is taken only around the
//! kernel calls; reading and decoding requests never hold it. Sessions run
//! on their own OS threads, so a call never migrates between threads.
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::command::{Command, Keyword};
use crate::syscall::{Syscall, SyscallError};

#[derive(Debug, thiserror::Error)]
#[error("{keyword} failed: {source}")]
pub struct ExecutionError {
    pub keyword: Keyword,
    #[source]
    pub source: SyscallError,
}

pub struct Executor {
    syscall: Mutex<Box<dyn Syscall>>,
}

impl Executor {
    pub fn new(syscall: Box<dyn Syscall>) -> Self {
        Self {
            syscall: Mutex::new(syscall),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn Syscall>> {
        // a session that panicked mid-call leaves nothing to repair
        self.syscall
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `f` with exclusive access to the syscall backend.
    pub fn with_syscall<T>(&self, f: impl FnOnce(&dyn Syscall) -> T) -> T {
        let syscall = self.lock();
        f(&**syscall)
    }

    /// Executes `command`. On failure nothing is rolled back; the kernel
    /// state is whatever the failed call left behind.
    pub fn execute(&self, command: &Command) -> Result<(), ExecutionError> {
        let syscall = self.lock();
        let result = match command {
            Command::Chroot { directory } => syscall
                .chroot(directory)
                .and_then(|_| syscall.chdir(Path::new("/"))),
            Command::Mount {
                source,
                destination,
                fstype,
                flags,
                data,
            } => syscall.mount(
                Some(source.as_path()),
                destination,
                fstype.as_deref(),
                *flags,
                data.as_deref(),
            ),
            Command::Mkdir { path, mode } => syscall.mkdir(path, *mode),
            Command::Symlink { target, link } => syscall.symlink(target, link),
        };
        drop(syscall);

        result.map_err(|source| ExecutionError {
            keyword: command.keyword(),
            source,
        })
    }
}

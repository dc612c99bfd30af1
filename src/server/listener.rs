use std::env;
use std::fs;
use std::io;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nix::unistd;

use super::{ServerConfig, Session, SupervisorError};
use crate::executor::Executor;

/// Longest path that fits in `sockaddr_un.sun_path`, minus the NUL.
const SUN_PATH_MAX: usize = 107;
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("failed to chdir to {path:?} while binding the init socket")]
    Chdir { source: nix::Error, path: PathBuf },
    #[error("invalid socket path: {0:?}")]
    InvalidPath(PathBuf),
    #[error("failed to get cwd")]
    GetCwd(#[source] io::Error),
    #[error("failed to remove stale socket {path:?}")]
    RemoveStale { source: io::Error, path: PathBuf },
    #[error("failed to bind init socket {path:?}")]
    Bind { source: io::Error, path: PathBuf },
    #[error("failed to restrict permissions of {path:?}")]
    Permissions { source: io::Error, path: PathBuf },
}

type Result<T> = std::result::Result<T, ListenerError>;

pub struct Listener {
    socket: UnixListener,
    path: PathBuf,
}

impl Listener {
    /// Binds the init socket at `socket_path`, replacing a stale socket
    /// left by an earlier run. Only root may connect.
    pub fn bind(socket_path: &Path) -> Result<Self> {
        remove_stale(socket_path)?;

        let socket = if socket_path.as_os_str().len() <= SUN_PATH_MAX {
            UnixListener::bind(socket_path).map_err(|source| ListenerError::Bind {
                source,
                path: socket_path.to_owned(),
            })?
        } else {
            bind_from_parent(socket_path)?
        };

        fs::set_permissions(socket_path, fs::Permissions::from_mode(0o600)).map_err(
            |source| ListenerError::Permissions {
                source,
                path: socket_path.to_owned(),
            },
        )?;

        Ok(Self {
            socket,
            path: socket_path.to_owned(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accepts connections forever, one session thread per connection.
    /// Returns only on a fault the pod cannot survive.
    pub fn serve(
        &self,
        executor: Arc<Executor>,
        config: &ServerConfig,
    ) -> std::result::Result<(), SupervisorError> {
        self.serve_with(executor, config, spawn_thread)
    }

    fn serve_with<S>(
        &self,
        executor: Arc<Executor>,
        config: &ServerConfig,
        mut spawn: S,
    ) -> std::result::Result<(), SupervisorError>
    where
        S: FnMut(String, SessionTask) -> io::Result<()>,
    {
        log::info!("listening on {:?}", self.path);
        let mut next_id: u64 = 0;
        loop {
            let stream = match self.socket.accept() {
                Ok((stream, _)) => stream,
                Err(err) if is_transient(&err) => {
                    log::warn!("accept failed, retrying: {}", err);
                    if is_fd_exhaustion(&err) {
                        thread::sleep(RETRY_BACKOFF);
                    }
                    continue;
                }
                Err(err) => return Err(SupervisorError::Accept(err)),
            };

            next_id += 1;
            let id = next_id;
            let executor = Arc::clone(&executor);
            let config = config.clone();
            let task: SessionTask = Box::new(move || {
                let result = Session::new(id, stream, executor, &config)
                    .and_then(|session| session.run());
                match result {
                    Ok(()) => log::debug!("[{}] session closed", id),
                    Err(fault) => log::warn!("[{}] session ended: {}", id, fault),
                }
            });
            // the connection goes away with the task; the listener stays
            if let Err(err) = spawn(format!("session-{}", id), task) {
                log::error!(
                    "[{}] failed to spawn session thread, dropping connection: {}",
                    id,
                    err
                );
                thread::sleep(RETRY_BACKOFF);
            }
        }
    }
}

type SessionTask = Box<dyn FnOnce() + Send + 'static>;

fn spawn_thread(name: String, task: SessionTask) -> io::Result<()> {
    thread::Builder::new().name(name).spawn(task).map(drop)
}

fn remove_stale(socket_path: &Path) -> Result<()> {
    match fs::symlink_metadata(socket_path) {
        Ok(meta) if meta.file_type().is_socket() => {
            log::debug!("removing stale socket {:?}", socket_path);
            fs::remove_file(socket_path).map_err(|source| ListenerError::RemoveStale {
                source,
                path: socket_path.to_owned(),
            })
        }
        _ => Ok(()),
    }
}

// sun_path holds at most 108 bytes, while the pod directory an init socket
// lives in can be nested deeply. Bind relative to the parent directory
// instead and move back afterwards. This runs before any session thread
// exists, so nothing observes the temporary working directory.
fn bind_from_parent(socket_path: &Path) -> Result<UnixListener> {
    let workdir = socket_path
        .parent()
        .ok_or_else(|| ListenerError::InvalidPath(socket_path.to_owned()))?;
    let socket_name = socket_path
        .file_name()
        .ok_or_else(|| ListenerError::InvalidPath(socket_path.to_owned()))?;
    let cwd = env::current_dir().map_err(ListenerError::GetCwd)?;
    unistd::chdir(workdir).map_err(|source| ListenerError::Chdir {
        source,
        path: workdir.to_owned(),
    })?;
    let bound = UnixListener::bind(socket_name).map_err(|source| ListenerError::Bind {
        source,
        path: socket_path.to_owned(),
    });
    unistd::chdir(&cwd).map_err(|source| ListenerError::Chdir { source, path: cwd })?;
    bound
}

fn is_fd_exhaustion(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EMFILE) | Some(libc::ENFILE))
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
    ) || is_fd_exhaustion(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syscall::test::TestHelperSyscall;
    use anyhow::Result;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_bind_replaces_stale_socket() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("init.sock");
        drop(UnixListener::bind(&path)?);
        assert!(path.exists());

        let listener = Listener::bind(&path)?;
        assert_eq!(listener.path(), path.as_path());
        let mode = fs::metadata(&path)?.permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        UnixStream::connect(&path)?;
        Ok(())
    }

    #[test]
    fn test_bind_refuses_to_replace_regular_file() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("init.sock");
        fs::write(&path, "not a socket")?;
        assert!(matches!(
            Listener::bind(&path),
            Err(ListenerError::Bind { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_transient_accept_errors() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(is_transient(&io::Error::from_raw_os_error(libc::EMFILE)));
        assert!(!is_transient(&io::Error::from_raw_os_error(libc::EBADF)));
    }

    #[test]
    fn test_spawn_failure_drops_only_that_connection() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("init.sock");
        let listener = Listener::bind(&path)?;
        let executor = Arc::new(Executor::new(Box::<TestHelperSyscall>::default()));
        let mut failures = 1;
        thread::spawn(move || {
            listener.serve_with(executor, &ServerConfig::default(), move |name, task| {
                if failures > 0 {
                    failures -= 1;
                    return Err(io::Error::from_raw_os_error(libc::EAGAIN));
                }
                spawn_thread(name, task)
            })
        });

        let mut dropped = UnixStream::connect(&path)?;
        dropped.set_read_timeout(Some(Duration::from_secs(10)))?;
        let mut buf = Vec::new();
        dropped.read_to_end(&mut buf)?;
        assert!(buf.is_empty());

        let mut served = UnixStream::connect(&path)?;
        served.set_read_timeout(Some(Duration::from_secs(10)))?;
        served.write_all(b"CHROOT\t/ok\n\n")?;
        let mut reply = String::new();
        BufReader::new(served).read_line(&mut reply)?;
        assert_eq!(reply, "REQUEST OK\n");
        Ok(())
    }
}

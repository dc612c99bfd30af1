//! What the init owes the pod as its PID 1: reaping orphans and ending
//! the pod when asked to.
use std::io;
use std::thread::{self, JoinHandle};

use nix::errno::Errno;
use nix::sys::signal::{SigSet, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};

pub const HANDLED_SIGNALS: [Signal; 5] = [
    Signal::SIGCHLD,
    Signal::SIGTERM,
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGHUP,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalAction {
    Reaped(usize),
    Terminate(Signal),
    Ignore(Signal),
}

pub fn handled_signals() -> SigSet {
    let mut set = SigSet::empty();
    for signal in HANDLED_SIGNALS {
        set.add(signal);
    }
    set
}

/// Blocks the handled signals on the calling thread. Must run before any
/// other thread is spawned so that every thread inherits the mask and the
/// signals are only ever consumed by `sigwait`.
pub fn block_signals() -> nix::Result<SigSet> {
    let set = handled_signals();
    set.thread_block()?;
    Ok(set)
}

/// Reaps every child that has exited so far.
pub fn reap_children() -> usize {
    let mut reaped = 0;
    loop {
        match waitpid(None, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => break,
            Ok(WaitStatus::Exited(pid, status)) => {
                log::debug!("reaped {} (exit status {})", pid, status);
                reaped += 1;
            }
            Ok(WaitStatus::Signaled(pid, signal, _)) => {
                log::debug!("reaped {} (killed by {})", pid, signal);
                reaped += 1;
            }
            Ok(_) => {}
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => break,
            Err(err) => {
                log::warn!("waitpid failed: {}", err);
                break;
            }
        }
    }
    reaped
}

pub fn handle_signal(signal: Signal) -> SignalAction {
    match signal {
        Signal::SIGCHLD => SignalAction::Reaped(reap_children()),
        Signal::SIGTERM | Signal::SIGINT | Signal::SIGQUIT => SignalAction::Terminate(signal),
        other => SignalAction::Ignore(other),
    }
}

/// Waits for `set` on a dedicated thread. A termination signal ends the
/// whole pod with status 0.
pub fn spawn_signal_thread(set: SigSet) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("signals".to_owned())
        .spawn(move || loop {
            let signal = match set.wait() {
                Ok(signal) => signal,
                Err(err) => {
                    log::error!("sigwait failed: {}", err);
                    continue;
                }
            };
            match handle_signal(signal) {
                SignalAction::Reaped(n) => log::trace!("reaped {} children", n),
                SignalAction::Terminate(signal) => {
                    log::info!("received {}, ending the pod", signal);
                    log::logger().flush();
                    std::process::exit(0);
                }
                SignalAction::Ignore(signal) => log::debug!("ignoring {}", signal),
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::{fork, ForkResult};
    use serial_test::serial;
    use std::time::{Duration, Instant};

    #[test]
    fn test_handled_signals() {
        let set = handled_signals();
        for signal in HANDLED_SIGNALS {
            assert!(set.contains(signal));
        }
        assert!(!set.contains(Signal::SIGUSR1));
    }

    #[test]
    fn test_handle_signal_actions() {
        assert_eq!(
            handle_signal(Signal::SIGTERM),
            SignalAction::Terminate(Signal::SIGTERM)
        );
        assert_eq!(
            handle_signal(Signal::SIGHUP),
            SignalAction::Ignore(Signal::SIGHUP)
        );
    }

    #[test]
    #[serial]
    fn test_reap_children() -> anyhow::Result<()> {
        match unsafe { fork()? } {
            ForkResult::Parent { .. } => {
                let start = Instant::now();
                let mut reaped = 0;
                while reaped == 0 && start.elapsed() < Duration::from_secs(5) {
                    thread::sleep(Duration::from_millis(10));
                    reaped += reap_children();
                }
                assert!(reaped >= 1);
            }
            ForkResult::Child => unsafe { libc::_exit(3) },
        }
        Ok(())
    }
}

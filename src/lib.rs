//! # podinit
//! A minimal PID 1 for pods. It reaps orphans and carries out privileged
//! filesystem setup (chroot, mounts) on behalf of an orchestrator that
//! talks to it over a local socket.

#[cfg(test)]
#[macro_use]
extern crate quickcheck;

pub mod client;
pub mod command;
pub mod executor;
pub mod init;
pub mod logger;
pub mod protocol;
pub mod server;
pub mod syscall;

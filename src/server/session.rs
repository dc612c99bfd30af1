//! One accepted connection: read a request, validate it, execute it,
//! reply, and repeat until the peer goes away.
use std::io::{self, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::sync::Arc;

use crate::command::Command;
use crate::executor::Executor;
use crate::protocol::{write_outcome, FrameError, Framer, Outcome, TimedRead};

use super::ServerConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingRequest,
    Validating,
    Executing,
    RepliedOk,
    RepliedErr,
    Closed,
}

/// Ends one session; the listener and other sessions carry on.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionFault {
    #[error("failed to set up connection")]
    Setup(#[source] io::Error),
    #[error("failed to read request")]
    Read(#[source] io::Error),
    #[error("failed to write reply")]
    Write(#[source] io::Error),
    #[error("peer closed the connection in the middle of a request")]
    Truncated,
    #[error("timed out waiting for a request")]
    TimedOut,
}

pub struct Session<R, W> {
    id: u64,
    framer: Framer<R>,
    writer: W,
    executor: Arc<Executor>,
    state: SessionState,
}

impl Session<BufReader<UnixStream>, UnixStream> {
    pub fn new(
        id: u64,
        stream: UnixStream,
        executor: Arc<Executor>,
        config: &ServerConfig,
    ) -> Result<Self, ConnectionFault> {
        let writer = stream.try_clone().map_err(ConnectionFault::Setup)?;
        Ok(Self::with_io(
            id,
            BufReader::new(stream),
            writer,
            executor,
            config,
        ))
    }
}

impl<R: TimedRead, W: Write> Session<R, W> {
    pub fn with_io(
        id: u64,
        reader: R,
        writer: W,
        executor: Arc<Executor>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            id,
            framer: Framer::new(reader)
                .with_timeout(config.request_timeout)
                .with_max_line_len(config.max_line_len),
            writer,
            executor,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        log::trace!("[{}] {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
    }

    /// Serves requests until the peer closes the connection or a
    /// connection fault occurs.
    pub fn run(mut self) -> Result<(), ConnectionFault> {
        log::debug!("[{}] session started", self.id);
        let result = loop {
            match self.serve_one() {
                Ok(true) => continue,
                Ok(false) => break Ok(()),
                Err(fault) => break Err(fault),
            }
        };
        self.transition(SessionState::Closed);
        result
    }

    /// Handles one request cycle. Returns `false` once the peer is gone.
    pub fn serve_one(&mut self) -> Result<bool, ConnectionFault> {
        self.transition(SessionState::AwaitingRequest);
        let raw = match self.framer.read_request() {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                log::debug!("[{}] peer closed the connection", self.id);
                return Ok(false);
            }
            Err(FrameError::Framing(err)) => {
                log::info!("[{}] protocol error: {}", self.id, err);
                self.reply(err.into())?;
                return Ok(true);
            }
            Err(FrameError::Truncated { lines }) => {
                log::info!("[{}] request cut short after {} lines", self.id, lines);
                self.reply_best_effort(Outcome::err("protocol error: request too short"));
                return Err(ConnectionFault::Truncated);
            }
            Err(FrameError::TimedOut { lines, partial }) => {
                if lines > 0 || partial {
                    log::info!("[{}] request timed out after {} lines", self.id, lines);
                    self.reply_best_effort(Outcome::err(
                        "protocol error: request too short: timed out",
                    ));
                }
                return Err(ConnectionFault::TimedOut);
            }
            Err(FrameError::Io(err)) => return Err(ConnectionFault::Read(err)),
        };

        self.transition(SessionState::Validating);
        let command = match Command::decode(&raw) {
            Ok(command) => command,
            Err(err) => {
                log::info!("[{}] protocol error: {}", self.id, err);
                self.reply(err.into())?;
                return Ok(true);
            }
        };

        self.transition(SessionState::Executing);
        log::info!("[{}] {} request", self.id, command.keyword());
        let outcome = match self.executor.execute(&command) {
            Ok(()) => {
                log::info!("[{}] {} succeeded, responding OK", self.id, command);
                Outcome::Ok
            }
            Err(err) => {
                log::error!("[{}] {}", self.id, err);
                err.into()
            }
        };
        self.reply(outcome)?;
        Ok(true)
    }

    fn reply(&mut self, outcome: Outcome) -> Result<(), ConnectionFault> {
        self.transition(if outcome.is_ok() {
            SessionState::RepliedOk
        } else {
            SessionState::RepliedErr
        });
        write_outcome(&mut self.writer, &outcome).map_err(ConnectionFault::Write)
    }

    fn reply_best_effort(&mut self, outcome: Outcome) {
        if let Err(err) = self.reply(outcome) {
            log::debug!("[{}] {}", self.id, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syscall::test::TestHelperSyscall;
    use nix::errno::Errno;
    use quickcheck::TestResult;
    use std::io::Cursor;

    fn session(input: &str) -> Session<Cursor<Vec<u8>>, Vec<u8>> {
        Session::with_io(
            1,
            Cursor::new(input.as_bytes().to_vec()),
            Vec::new(),
            Arc::new(Executor::new(Box::<TestHelperSyscall>::default())),
            &ServerConfig::default(),
        )
    }

    fn calls(session: &Session<Cursor<Vec<u8>>, Vec<u8>>) -> usize {
        session.executor.with_syscall(|s| {
            s.as_any()
                .downcast_ref::<TestHelperSyscall>()
                .expect("test syscall")
                .call_count()
        })
    }

    #[test]
    fn test_replies_in_order() {
        let mut session = session("CHROOT\t/var/tmp/c1\n\nCHROOT\tDIR\tFALSE\n\n");
        assert!(session.serve_one().unwrap());
        assert_eq!(session.state(), SessionState::RepliedOk);
        assert!(session.serve_one().unwrap());
        assert_eq!(session.state(), SessionState::RepliedErr);
        assert!(!session.serve_one().unwrap());

        let replies = String::from_utf8(session.writer.clone()).unwrap();
        let replies: Vec<&str> = replies.lines().collect();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0], "REQUEST OK");
        assert!(replies[1].starts_with("REQUEST FAILED: protocol error"));
        // only the well-formed chroot reached the kernel: chroot + chdir
        assert_eq!(calls(&session), 2);
    }

    #[test]
    fn test_malformed_requests_never_execute() {
        let input = "CHROOT\n\n\
                     MOUNT\tSRC\tDST\n\n\
                     MOUNT\tSRC\tDST\nFS\t\t\n\n\
                     MOUNT\tSRC\tDST\nFS\t0\t\nEXTRA\n\n";
        let mut session = session(input);
        for _ in 0..4 {
            assert!(session.serve_one().unwrap());
            assert_eq!(session.state(), SessionState::RepliedErr);
        }
        assert_eq!(calls(&session), 0);
    }

    #[test]
    fn test_execution_error_keeps_session() {
        let mut session = session("CHROOT\t/missing\n\nCHROOT\t/missing\n\n");
        session.executor.with_syscall(|s| {
            s.as_any()
                .downcast_ref::<TestHelperSyscall>()
                .expect("test syscall")
                .set_ret_err(Errno::ENOENT)
        });
        assert!(session.serve_one().unwrap());
        assert!(session.serve_one().unwrap());
        let replies = String::from_utf8(session.writer.clone()).unwrap();
        for reply in replies.lines() {
            assert!(reply.starts_with("REQUEST FAILED: CHROOT failed"), "{}", reply);
        }
    }

    #[test]
    fn test_truncated_request_ends_session() {
        let session = session("MOUNT\tSRC\tDST\n");
        assert!(matches!(session.run(), Err(ConnectionFault::Truncated)));
    }

    #[test]
    fn test_clean_close() {
        let session = session("");
        assert!(session.run().is_ok());
    }

    quickcheck! {
        fn property_repeated_rejection_never_executes(extra: String, times: u8) -> TestResult {
            if extra.is_empty() || extra.contains(['\t', '\n', '\0']) {
                return TestResult::discard();
            }
            let times = usize::from(times % 4) + 1;
            let request = format!("MOUNT\tSRC\tDST\t{}\nFS\t0\t\n\n", extra);
            let mut session = session(&request.repeat(times));
            for _ in 0..times {
                if !matches!(session.serve_one(), Ok(true)) {
                    return TestResult::failed();
                }
            }
            let replies = String::from_utf8_lossy(&session.writer).to_string();
            let replies: Vec<&str> = replies.lines().collect();
            TestResult::from_bool(
                calls(&session) == 0
                    && replies.len() == times
                    && replies.iter().all(|reply| *reply == replies[0])
                    && replies[0].starts_with("REQUEST FAILED: protocol error"),
            )
        }
    }
}

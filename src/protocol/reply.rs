//! Replies: exactly one line per request.
use std::io::{self, Write};

use crate::command::FramingError;
use crate::executor::ExecutionError;

pub const REQUEST_OK: &str = "REQUEST OK";
pub const REQUEST_FAILED: &str = "REQUEST FAILED";

/// What became of one request. Framing and execution failures look the
/// same on the wire apart from the message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Err { message: String },
}

impl Outcome {
    pub fn err(message: impl Into<String>) -> Self {
        Outcome::Err {
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok)
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Outcome::Ok => format!("{}\n", REQUEST_OK).into_bytes(),
            Outcome::Err { message } => {
                let message: String = message
                    .chars()
                    .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
                    .collect();
                format!("{}: {}\n", REQUEST_FAILED, message).into_bytes()
            }
        }
    }
}

impl From<FramingError> for Outcome {
    fn from(err: FramingError) -> Self {
        Outcome::err(format!("protocol error: {}", err))
    }
}

impl From<ExecutionError> for Outcome {
    fn from(err: ExecutionError) -> Self {
        Outcome::err(err.to_string())
    }
}

/// Writes the reply for `outcome`. A failure here is a connection fault.
pub fn write_outcome<W: Write>(writer: &mut W, outcome: &Outcome) -> io::Result<()> {
    writer.write_all(&outcome.encode())?;
    writer.flush()
}

/// A reply as the orchestrator sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Failed(String),
}

/// Interprets a reply line as sent by [`write_outcome`]. `None` if the
/// line is not a reply at all.
pub fn parse_reply(line: &str) -> Option<Reply> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    if line == REQUEST_OK {
        return Some(Reply::Ok);
    }
    line.strip_prefix(REQUEST_FAILED)
        .and_then(|rest| rest.strip_prefix(": "))
        .map(|message| Reply::Failed(message.to_owned()))
}

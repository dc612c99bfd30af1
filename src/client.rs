//! Talking to a pod init from the outside, one request at a time over a
//! persistent connection.
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::protocol::{encode_request, parse_reply, EncodeError, Reply};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to connect to {path:?}")]
    Connect { source: io::Error, path: PathBuf },
    #[error("failed to set socket timeout")]
    Timeout(#[source] io::Error),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("failed to send request")]
    Write(#[source] io::Error),
    #[error("failed to read reply")]
    Read(#[source] io::Error),
    #[error("connection closed before a reply arrived")]
    Closed,
    #[error("malformed reply {0:?}")]
    Malformed(String),
}

type Result<T> = std::result::Result<T, ClientError>;

pub struct Client {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
}

impl Client {
    /// Connects to the init socket. `timeout` bounds every read and write.
    pub fn connect(path: &Path, timeout: Option<Duration>) -> Result<Self> {
        let stream = UnixStream::connect(path).map_err(|source| ClientError::Connect {
            source,
            path: path.to_owned(),
        })?;
        stream
            .set_read_timeout(timeout)
            .and_then(|_| stream.set_write_timeout(timeout))
            .map_err(ClientError::Timeout)?;
        let writer = stream.try_clone().map_err(ClientError::Write)?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
        })
    }

    /// Sends one request and waits for its reply.
    pub fn request<L: AsRef<[String]>>(&mut self, lines: &[L]) -> Result<Reply> {
        let line = self.raw_request(lines)?;
        parse_reply(&line).ok_or(ClientError::Malformed(line))
    }

    /// Sends one request and returns the reply line as received.
    pub fn raw_request<L: AsRef<[String]>>(&mut self, lines: &[L]) -> Result<String> {
        let bytes = encode_request(lines)?;
        self.send_bytes(&bytes)
    }

    /// Writes `bytes` as they are and reads one reply line. Meant for
    /// exercising the framing of the init with malformed input.
    pub fn send_bytes(&mut self, bytes: &[u8]) -> Result<String> {
        self.writer.write_all(bytes).map_err(ClientError::Write)?;
        self.writer.flush().map_err(ClientError::Write)?;
        self.read_reply()
    }

    pub fn read_reply(&mut self) -> Result<String> {
        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .map_err(ClientError::Read)?;
        if n == 0 {
            return Err(ClientError::Closed);
        }
        Ok(line)
    }
}

/// Splits command line words into request lines at every `--`.
pub fn lines_from_args(args: &[String]) -> Vec<Vec<String>> {
    args.split(|arg| arg == "--")
        .filter(|line| !line.is_empty())
        .map(|line| line.to_vec())
        .collect()
}

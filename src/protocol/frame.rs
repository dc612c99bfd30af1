//! Line framing of requests.
//!
//! Fields are separated by a tab and lines end with a newline. A request is
//! its lines followed by one empty line. Empty lines seen while waiting for
//! a request are skipped.
use std::io::{self, BufRead, BufReader, Cursor, Read};
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

use crate::command::{FramingError, Keyword, Line, RawRequest};

pub const FIELD_SEPARATOR: u8 = b'\t';
pub const LINE_TERMINATOR: u8 = b'\n';
pub const DEFAULT_MAX_LINE_LEN: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The request was read completely but has the wrong shape. The stream
    /// is positioned at the start of the next request.
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error("request too short: connection closed after {lines} lines")]
    Truncated { lines: usize },
    /// `partial` is set when bytes of an unfinished line had arrived.
    #[error("request too short: timed out after {lines} lines")]
    TimedOut { lines: usize, partial: bool },
    #[error("failed to read request")]
    Io(#[source] io::Error),
}

/// A reader whose blocking reads can be bounded.
pub trait TimedRead: BufRead {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;
}

impl TimedRead for BufReader<UnixStream> {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.get_ref().set_read_timeout(timeout)
    }
}

impl<T: AsRef<[u8]>> TimedRead for Cursor<T> {
    fn set_read_timeout(&mut self, _: Option<Duration>) -> io::Result<()> {
        Ok(())
    }
}

enum RawLine {
    Eof,
    Partial,
    Line(Vec<u8>),
}

pub struct Framer<R> {
    reader: R,
    timeout: Option<Duration>,
    max_line_len: usize,
    deadline: Option<Instant>,
}

impl<R: TimedRead> Framer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            timeout: None,
            max_line_len: DEFAULT_MAX_LINE_LEN,
            deadline: None,
        }
    }

    /// Bounds the time one whole request may take to arrive.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_line_len(mut self, max_line_len: usize) -> Self {
        self.max_line_len = max_line_len;
        self
    }

    /// Reads the next request. `Ok(None)` means the peer closed the
    /// connection between requests.
    pub fn read_request(&mut self) -> Result<Option<RawRequest>, FrameError> {
        self.deadline = self.timeout.map(|t| Instant::now() + t);

        let first = loop {
            match self.read_line(0)? {
                None => return Ok(None),
                Some(Err(err)) => {
                    self.drain(1)?;
                    return Err(err.into());
                }
                Some(Ok(line)) if line.is_empty() => continue,
                Some(Ok(line)) => break line,
            }
        };

        let keyword = match first[0].parse::<Keyword>() {
            Ok(keyword) => keyword,
            Err(err) => {
                self.drain(1)?;
                return Err(err.into());
            }
        };
        let expected = keyword.continuation_lines() + 1;

        let mut lines = vec![first];
        while lines.len() < expected {
            match self.read_line(lines.len())? {
                None => return Err(FrameError::Truncated { lines: lines.len() }),
                Some(Err(err)) => {
                    self.drain(lines.len() + 1)?;
                    return Err(err.into());
                }
                Some(Ok(line)) if line.is_empty() => {
                    return Err(FramingError::RequestTooShort {
                        keyword,
                        expected,
                        got: lines.len(),
                    }
                    .into())
                }
                Some(Ok(line)) => lines.push(line),
            }
        }

        // Anything but the terminator now is smuggled data.
        match self.read_line(lines.len())? {
            None => Err(FrameError::Truncated { lines: lines.len() }),
            Some(Ok(line)) if line.is_empty() => Ok(Some(RawRequest::new(lines))),
            Some(_) => {
                let extra = self.drain(lines.len() + 1)?;
                Err(FramingError::ExtraLines {
                    keyword,
                    expected,
                    got: expected + 1 + extra,
                }
                .into())
            }
        }
    }

    /// Skips lines up to and including the next terminator and returns how
    /// many non-empty lines were skipped.
    fn drain(&mut self, seen: usize) -> Result<usize, FrameError> {
        let mut skipped = 0;
        loop {
            match self.read_raw_line(seen + skipped)? {
                RawLine::Eof | RawLine::Partial => {
                    return Err(FrameError::Truncated {
                        lines: seen + skipped,
                    })
                }
                RawLine::Line(bytes) if bytes.is_empty() => return Ok(skipped),
                RawLine::Line(_) => skipped += 1,
            }
        }
    }

    /// Reads and splits one line. The outer `Option` is `None` on a clean
    /// end of stream; the inner `Result` carries per-line framing errors
    /// that do not desynchronize the stream. An empty line comes back as
    /// an empty `Line`.
    fn read_line(&mut self, seen: usize) -> Result<Option<Result<Line, FramingError>>, FrameError> {
        match self.read_raw_line(seen)? {
            RawLine::Eof if seen == 0 => Ok(None),
            RawLine::Eof | RawLine::Partial => Err(FrameError::Truncated { lines: seen }),
            RawLine::Line(bytes) if bytes.len() > self.max_line_len => {
                Ok(Some(Err(FramingError::LineTooLong {
                    limit: self.max_line_len,
                })))
            }
            RawLine::Line(bytes) => Ok(Some(split_fields(bytes))),
        }
    }

    /// Reads one newline-terminated line without the newline. Overlong
    /// lines are consumed completely and returned with an oversized body
    /// so that the caller can reject them.
    fn read_raw_line(&mut self, seen: usize) -> Result<RawLine, FrameError> {
        let mut buf = Vec::new();
        let mut oversized = false;
        loop {
            self.arm_timeout(seen, !buf.is_empty() || oversized)?;
            let limit = (self.max_line_len + 1).saturating_sub(buf.len()) as u64;
            let read = (&mut self.reader)
                .take(limit.max(1))
                .read_until(LINE_TERMINATOR, &mut buf);
            let n = match read {
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    return Err(FrameError::TimedOut {
                        lines: seen,
                        partial: !buf.is_empty() || oversized,
                    })
                }
                Err(err) => return Err(FrameError::Io(err)),
            };

            if buf.last() == Some(&LINE_TERMINATOR) {
                buf.pop();
                if oversized {
                    buf.resize(self.max_line_len + 1, 0);
                }
                return Ok(RawLine::Line(buf));
            }
            if n == 0 {
                return Ok(if buf.is_empty() && !oversized {
                    RawLine::Eof
                } else {
                    RawLine::Partial
                });
            }
            if buf.len() > self.max_line_len {
                oversized = true;
                buf.clear();
            }
        }
    }

    fn arm_timeout(&mut self, seen: usize, partial: bool) -> Result<(), FrameError> {
        if let Some(deadline) = self.deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(FrameError::TimedOut {
                    lines: seen,
                    partial,
                });
            }
            self.reader
                .set_read_timeout(Some(remaining))
                .map_err(FrameError::Io)?;
        }
        Ok(())
    }
}

fn split_fields(bytes: Vec<u8>) -> Result<Line, FramingError> {
    let text = String::from_utf8(bytes).map_err(|_| FramingError::InvalidUtf8)?;
    if text.is_empty() {
        return Ok(Vec::new());
    }
    Ok(text
        .split(FIELD_SEPARATOR as char)
        .map(|field| field.to_owned())
        .collect())
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("line {line} has no fields")]
    EmptyLine { line: usize },
    #[error("field {field:?} on line {line} contains a tab, newline or NUL")]
    InvalidField { line: usize, field: String },
}

/// Encodes `lines` as one request, terminator included.
pub fn encode_request<L: AsRef<[String]>>(lines: &[L]) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::new();
    for (index, line) in lines.iter().enumerate() {
        let line = line.as_ref();
        // a single empty field would look like the terminator
        if line.is_empty() || (line.len() == 1 && line[0].is_empty()) {
            return Err(EncodeError::EmptyLine { line: index + 1 });
        }
        for (i, field) in line.iter().enumerate() {
            if field
                .bytes()
                .any(|b| b == FIELD_SEPARATOR || b == LINE_TERMINATOR || b == 0)
            {
                return Err(EncodeError::InvalidField {
                    line: index + 1,
                    field: field.clone(),
                });
            }
            if i > 0 {
                out.push(FIELD_SEPARATOR);
            }
            out.extend_from_slice(field.as_bytes());
        }
        out.push(LINE_TERMINATOR);
    }
    out.push(LINE_TERMINATOR);
    Ok(out)
}

//! The fixed vocabulary of privileged operations a pod init accepts,
//! and the decoding of a framed request into one of them.

pub mod schema;

pub use schema::{Field, Keyword, Schema};

use std::fmt;
use std::path::PathBuf;

use nix::mount::MsFlags;
use nix::sys::stat::Mode;

/// One line of a request: its fields in order.
pub type Line = Vec<String>;

/// The lines of one request as they came off the connection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawRequest {
    pub lines: Vec<Line>,
}

impl RawRequest {
    pub fn new(lines: Vec<Line>) -> Self {
        Self { lines }
    }
}

/// A request whose shape does not match the schema of its keyword.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    #[error("empty request")]
    EmptyRequest,
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("request too short: {keyword} expects {expected} lines, got {got}")]
    RequestTooShort {
        keyword: Keyword,
        expected: usize,
        got: usize,
    },
    #[error("extra cruft: {keyword} expects {expected} lines, got {got}")]
    ExtraLines {
        keyword: Keyword,
        expected: usize,
        got: usize,
    },
    #[error("line {line} of {keyword} is missing the {field} field")]
    MissingField {
        keyword: Keyword,
        line: usize,
        field: &'static str,
    },
    #[error("extra cruft on line {line} of {keyword}: expected {expected} fields, got {got}")]
    ExtraFields {
        keyword: Keyword,
        line: usize,
        expected: usize,
        got: usize,
    },
    #[error("{field} of {keyword} must not be empty")]
    EmptyField {
        keyword: Keyword,
        field: &'static str,
    },
    #[error("{field} contains a NUL byte")]
    NulByte { field: &'static str },
    #[error("invalid mount flags {0:?}")]
    InvalidFlags(String),
    #[error("invalid mode {0:?}")]
    InvalidMode(String),
    #[error("line longer than {limit} bytes")]
    LineTooLong { limit: usize },
    #[error("line is not valid utf-8")]
    InvalidUtf8,
}

/// A structurally valid request, ready for the executor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Change the root of the init to `directory` and enter it.
    Chroot { directory: PathBuf },
    /// mount(2). Empty `fstype` and `data` are passed to the kernel as NULL.
    Mount {
        source: PathBuf,
        destination: PathBuf,
        fstype: Option<String>,
        flags: MsFlags,
        data: Option<String>,
    },
    /// mkdir(2) with an explicit permission mode.
    Mkdir { path: PathBuf, mode: Mode },
    /// Create `link` pointing at `target`.
    Symlink { target: PathBuf, link: PathBuf },
}

impl Command {
    pub fn keyword(&self) -> Keyword {
        match self {
            Command::Chroot { .. } => Keyword::Chroot,
            Command::Mount { .. } => Keyword::Mount,
            Command::Mkdir { .. } => Keyword::Mkdir,
            Command::Symlink { .. } => Keyword::Symlink,
        }
    }

    /// Decodes a raw request. Nothing here touches the kernel; every
    /// rejection happens before the executor sees the request.
    pub fn decode(raw: &RawRequest) -> Result<Command, FramingError> {
        let first = raw
            .lines
            .first()
            .and_then(|line| line.first())
            .ok_or(FramingError::EmptyRequest)?;
        let keyword: Keyword = first.parse()?;
        let values = keyword.schema().check(&raw.lines)?;
        let mut fields = Fields {
            keyword,
            values: values.into_iter(),
        };

        let command = match keyword {
            Keyword::Chroot => Command::Chroot {
                directory: fields.next("directory")?.into(),
            },
            Keyword::Mount => Command::Mount {
                source: fields.next("source")?.into(),
                destination: fields.next("destination")?.into(),
                fstype: non_empty(fields.next("fstype")?),
                flags: parse_flags(fields.next("flags")?)?,
                data: non_empty(fields.next("data")?),
            },
            Keyword::Mkdir => Command::Mkdir {
                path: fields.next("path")?.into(),
                mode: parse_mode(fields.next("mode")?)?,
            },
            Keyword::Symlink => Command::Symlink {
                target: fields.next("target")?.into(),
                link: fields.next("link")?.into(),
            },
        };
        Ok(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Chroot { directory } => write!(f, "CHROOT {:?}", directory),
            Command::Mount {
                source,
                destination,
                fstype,
                flags,
                data,
            } => write!(
                f,
                "MOUNT {:?} {:?} fstype={:?} flags={:?} data={:?}",
                source, destination, fstype, flags, data
            ),
            Command::Mkdir { path, mode } => write!(f, "MKDIR {:?} {:o}", path, mode.bits()),
            Command::Symlink { target, link } => write!(f, "SYMLINK {:?} -> {:?}", link, target),
        }
    }
}

struct Fields<'a> {
    keyword: Keyword,
    values: std::vec::IntoIter<&'a str>,
}

impl<'a> Fields<'a> {
    fn next(&mut self, field: &'static str) -> Result<&'a str, FramingError> {
        self.values.next().ok_or(FramingError::MissingField {
            keyword: self.keyword,
            line: 0,
            field,
        })
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_owned())
    }
}

/// Mount flags travel as a plain decimal number. Signs, whitespace and
/// bits the kernel interface does not define are all rejected.
pub fn parse_flags(value: &str) -> Result<MsFlags, FramingError> {
    let invalid = || FramingError::InvalidFlags(value.to_owned());
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let bits: libc::c_ulong = value.parse().map_err(|_| invalid())?;
    MsFlags::from_bits(bits).ok_or_else(invalid)
}

/// Permission modes travel in octal, with or without a leading zero.
pub fn parse_mode(value: &str) -> Result<Mode, FramingError> {
    let invalid = || FramingError::InvalidMode(value.to_owned());
    if value.is_empty() || !value.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
        return Err(invalid());
    }
    let bits = u32::from_str_radix(value, 8).map_err(|_| invalid())?;
    if bits > 0o7777 {
        return Err(invalid());
    }
    Ok(Mode::from_bits_truncate(bits as libc::mode_t))
}

//! The shape every request must have, keyed by its command keyword.
//!
//! A request is a list of lines; the first field of the first line is the
//! keyword. The schema fixes how many lines follow the first one and how
//! many fields every line carries. Both counts are exact.
use std::fmt;
use std::str::FromStr;

use super::FramingError;

/// One positional field of a line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    /// The command keyword itself, first field of the first line.
    Keyword,
    /// Must be present and non-empty.
    Required(&'static str),
    /// Must be present, may be empty.
    Optional(&'static str),
}

impl Field {
    pub fn name(&self) -> &'static str {
        match self {
            Field::Keyword => "keyword",
            Field::Required(name) | Field::Optional(name) => *name,
        }
    }
}

#[derive(Debug)]
pub struct Schema {
    pub keyword: Keyword,
    pub lines: &'static [&'static [Field]],
}

const CHROOT: Schema = Schema {
    keyword: Keyword::Chroot,
    lines: &[&[Field::Keyword, Field::Required("directory")]],
};

const MOUNT: Schema = Schema {
    keyword: Keyword::Mount,
    lines: &[
        &[
            Field::Keyword,
            Field::Required("source"),
            Field::Required("destination"),
        ],
        &[
            Field::Optional("fstype"),
            Field::Required("flags"),
            Field::Optional("data"),
        ],
    ],
};

const MKDIR: Schema = Schema {
    keyword: Keyword::Mkdir,
    lines: &[&[Field::Keyword, Field::Required("path"), Field::Required("mode")]],
};

const SYMLINK: Schema = Schema {
    keyword: Keyword::Symlink,
    lines: &[&[
        Field::Keyword,
        Field::Required("target"),
        Field::Required("link"),
    ]],
};

/// Every command the init understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Keyword {
    Chroot,
    Mount,
    Mkdir,
    Symlink,
}

impl Keyword {
    pub const ALL: [Keyword; 4] = [
        Keyword::Chroot,
        Keyword::Mount,
        Keyword::Mkdir,
        Keyword::Symlink,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Keyword::Chroot => "CHROOT",
            Keyword::Mount => "MOUNT",
            Keyword::Mkdir => "MKDIR",
            Keyword::Symlink => "SYMLINK",
        }
    }

    pub fn schema(&self) -> &'static Schema {
        match self {
            Keyword::Chroot => &CHROOT,
            Keyword::Mount => &MOUNT,
            Keyword::Mkdir => &MKDIR,
            Keyword::Symlink => &SYMLINK,
        }
    }

    /// Number of lines that follow the keyword line.
    pub fn continuation_lines(&self) -> usize {
        self.schema().lines.len() - 1
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Keyword {
    type Err = FramingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Keyword::ALL
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| FramingError::UnknownCommand(s.to_owned()))
    }
}

impl Schema {
    /// Checks the exact shape of `lines` and returns every field after the
    /// keyword, in order. Optional fields that are empty come back as `""`.
    pub fn check<'a, L: AsRef<[String]>>(
        &self,
        lines: &'a [L],
    ) -> Result<Vec<&'a str>, FramingError> {
        let expected = self.lines.len();
        if lines.len() < expected {
            return Err(FramingError::RequestTooShort {
                keyword: self.keyword,
                expected,
                got: lines.len(),
            });
        }
        if lines.len() > expected {
            return Err(FramingError::ExtraLines {
                keyword: self.keyword,
                expected,
                got: lines.len(),
            });
        }

        let mut values = Vec::new();
        for (index, (line, fields)) in lines.iter().zip(self.lines.iter()).enumerate() {
            let line = line.as_ref();
            if line.len() < fields.len() {
                return Err(FramingError::MissingField {
                    keyword: self.keyword,
                    line: index + 1,
                    field: fields[line.len()].name(),
                });
            }
            if line.len() > fields.len() {
                return Err(FramingError::ExtraFields {
                    keyword: self.keyword,
                    line: index + 1,
                    expected: fields.len(),
                    got: line.len(),
                });
            }
            for (value, field) in line.iter().zip(fields.iter()) {
                if value.contains('\0') {
                    return Err(FramingError::NulByte {
                        field: field.name(),
                    });
                }
                match field {
                    Field::Keyword => {
                        if value != self.keyword.as_str() {
                            return Err(FramingError::UnknownCommand(value.clone()));
                        }
                    }
                    Field::Required(name) if value.is_empty() => {
                        return Err(FramingError::EmptyField {
                            keyword: self.keyword,
                            field: *name,
                        });
                    }
                    Field::Required(_) | Field::Optional(_) => values.push(value.as_str()),
                }
            }
        }
        Ok(values)
    }
}

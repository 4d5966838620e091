//! Open-mode strings and the flags they map to.

use nfsio_client::protocol::flags;
use nfsio_common::{NfsError, Result};
use std::fmt;
use std::str::FromStr;

/// Base letter of a mode string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseMode {
    /// `r`: open existing for reading
    Read,
    /// `w`: create or truncate for writing
    Write,
    /// `a`: create if needed, writes go to the end
    Append,
    /// `x`: create, failing if the file exists
    Exclusive,
}

impl BaseMode {
    fn letter(&self) -> char {
        match self {
            BaseMode::Read => 'r',
            BaseMode::Write => 'w',
            BaseMode::Append => 'a',
            BaseMode::Exclusive => 'x',
        }
    }
}

/// A parsed open mode such as `"r"`, `"w+"` or `"ab"`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessMode {
    pub base: BaseMode,
    /// `+` was given: open for both reading and writing
    pub update: bool,
    /// `b` was given: payloads are raw bytes
    pub binary: bool,
}

impl AccessMode {
    pub fn parse(mode: &str) -> Result<Self> {
        let invalid = || NfsError::InvalidMode(mode.to_string());

        let mut base = None;
        let mut update = false;
        let mut binary = false;

        for ch in mode.chars() {
            let letter = match ch {
                'r' => BaseMode::Read,
                'w' => BaseMode::Write,
                'a' => BaseMode::Append,
                'x' => BaseMode::Exclusive,
                '+' if !update => {
                    update = true;
                    continue;
                }
                'b' if !binary => {
                    binary = true;
                    continue;
                }
                _ => return Err(invalid()),
            };
            if base.replace(letter).is_some() {
                return Err(invalid());
            }
        }

        let base = base.ok_or_else(invalid)?;
        Ok(Self { base, update, binary })
    }

    pub fn readable(&self) -> bool {
        self.base == BaseMode::Read || self.update
    }

    pub fn writable(&self) -> bool {
        self.base != BaseMode::Read || self.update
    }

    /// Missing files are created instead of failing with ENOENT
    pub fn creates(&self) -> bool {
        self.base != BaseMode::Read
    }

    pub fn truncates(&self) -> bool {
        self.base == BaseMode::Write
    }

    pub fn appends(&self) -> bool {
        self.base == BaseMode::Append
    }

    /// Creation must fail if the file already exists
    pub fn exclusive(&self) -> bool {
        self.base == BaseMode::Exclusive
    }

    /// Flags handed to the open and create primitives
    pub fn flags(&self) -> i32 {
        let access = if self.update {
            flags::O_RDWR
        } else if self.base == BaseMode::Read {
            flags::O_RDONLY
        } else {
            flags::O_WRONLY
        };

        let extra = match self.base {
            BaseMode::Read => 0,
            BaseMode::Write => flags::O_CREAT | flags::O_TRUNC,
            BaseMode::Append => flags::O_CREAT | flags::O_APPEND,
            BaseMode::Exclusive => flags::O_CREAT | flags::O_EXCL,
        };

        access | extra
    }
}

impl FromStr for AccessMode {
    type Err = NfsError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base.letter())?;
        if self.update {
            write!(f, "+")?;
        }
        if self.binary {
            write!(f, "b")?;
        }
        Ok(())
    }
}

//! Text codecs applied to non-binary read/write payloads.

use crate::error::{NfsError, Result};
use encoding_rs::Encoding;
use std::borrow::Cow;
use std::fmt;

/// Encoding scheme for text framing
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// A WHATWG encoding such as `utf-8` or `windows-1252`
    Encoding(&'static Encoding),

    /// One byte per character, independent of any locale
    Raw,
}

impl Codec {
    /// Look up a codec by label; accepts anything `encoding_rs` knows plus `raw`
    pub fn from_label(label: &str) -> Result<Self> {
        let trimmed = label.trim();
        if trimmed.eq_ignore_ascii_case("raw") {
            return Ok(Codec::Raw);
        }

        Encoding::for_label(trimmed.as_bytes())
            .map(Codec::Encoding)
            .ok_or_else(|| NfsError::Codec(label.to_string()))
    }

    /// Resolve an optional label, `None` meaning the raw representation
    pub fn from_optional_label(label: Option<&str>) -> Result<Self> {
        match label {
            Some(label) => Self::from_label(label),
            None => Ok(Codec::Raw),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Codec::Encoding(encoding) => encoding.name(),
            Codec::Raw => "raw",
        }
    }

    /// Encode text into the bytes sent over the wire
    pub fn encode<'a>(&self, text: &'a str) -> Result<Cow<'a, [u8]>> {
        match self {
            Codec::Encoding(encoding) => {
                let (bytes, _, had_errors) = encoding.encode(text);
                if had_errors {
                    return Err(NfsError::Encode(self.name().to_string()));
                }
                Ok(bytes)
            }
            Codec::Raw => {
                if !encoding_rs::mem::is_str_latin1(text) {
                    return Err(NfsError::Encode(self.name().to_string()));
                }
                Ok(encoding_rs::mem::encode_latin1_lossy(text))
            }
        }
    }

    /// Decode bytes read from the wire into text
    pub fn decode<'a>(&self, bytes: &'a [u8]) -> Result<Cow<'a, str>> {
        match self {
            Codec::Encoding(encoding) => encoding
                .decode_without_bom_handling_and_without_replacement(bytes)
                .ok_or_else(|| NfsError::Decode(self.name().to_string())),
            Codec::Raw => Ok(encoding_rs::mem::decode_latin1(bytes)),
        }
    }
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Codec({})", self.name())
    }
}

impl Default for Codec {
    fn default() -> Self {
        Codec::Encoding(encoding_rs::UTF_8)
    }
}

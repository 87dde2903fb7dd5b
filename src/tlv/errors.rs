use std::error::Error;
use std::fmt::Display;

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum DecodeError {
    /// The input ended before the announced structure did. No partial decode
    /// is ever returned.
    TooShort { needed: usize, got: usize },
    /// More length bytes than we accept (0x84 and beyond).
    LengthBytes(usize),
    /// An extended length that would fit a shorter form.
    NonMinimalLength(usize),
    /// A mandatory inner tag was absent.
    MissingTag(u16),
    /// A structure whose bytes do not match any accepted shape.
    BadShape(&'static str),
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            DecodeError::TooShort { needed, got } => {
                write!(f, "Input too short, needed {}, got {}", needed, got)
            }
            DecodeError::LengthBytes(n) => {
                write!(f, "Length field of {} bytes is not supported", n)
            }
            DecodeError::NonMinimalLength(len) => {
                write!(f, "Length {} encoded in a non-minimal form", len)
            }
            DecodeError::MissingTag(tag) => write!(f, "Missing mandatory tag 0x{:02x}", tag),
            DecodeError::BadShape(what) => write!(f, "Malformed {}", what),
        }
    }
}

impl Error for DecodeError {}

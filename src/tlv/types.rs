use std::fmt;
use std::fmt::Display;

use super::errors::DecodeError;

/// One tag-length-value triple with its raw value bytes. Tags are one or two
/// bytes per the ISO 7816 continuation rule; nesting is parsed on demand with
/// [`Tlv::children`].
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Tlv {
    pub tag: u16,
    pub value: Vec<u8>,
}

/// Decode a tag and length, returning `(tag, value_len, header_len)`.
///
/// Lengths use the short form for 0..=127 and the extended form where a
/// leading 0x81/0x82/0x83 announces a 1/2/3-byte big-endian length. Anything
/// longer is rejected, as is a non-minimal extended encoding, so that
/// re-emitting a parsed structure reproduces it byte for byte.
pub fn read_tl(raw: &[u8]) -> Result<(u16, usize, usize), DecodeError> {
    if raw.len() < 2 {
        return Err(DecodeError::TooShort {
            needed: 2,
            got: raw.len(),
        });
    }

    // If the bottom 5 bits are set this is a 2 byte tag
    let (tag, tag_len) = if raw[0] & 0x1f == 0x1f {
        (u16::from_be_bytes(raw[..2].try_into().unwrap()), 2)
    } else {
        (raw[0] as u16, 1)
    };

    if raw.len() < tag_len + 1 {
        return Err(DecodeError::TooShort {
            needed: tag_len + 1,
            got: raw.len(),
        });
    }

    let first = raw[tag_len];
    let (len, len_len) = if first & 0x80 == 0x80 {
        let num_bytes = (first & 0x7f) as usize;
        if num_bytes == 0 || num_bytes > 3 {
            return Err(DecodeError::LengthBytes(num_bytes));
        }
        if raw.len() < tag_len + 1 + num_bytes {
            return Err(DecodeError::TooShort {
                needed: tag_len + 1 + num_bytes,
                got: raw.len(),
            });
        }
        let mut len = 0usize;
        for b in &raw[tag_len + 1..tag_len + 1 + num_bytes] {
            len = (len << 8) | (*b as usize);
        }
        let minimal = match num_bytes {
            1 => len >= 0x80,
            2 => len >= 0x100,
            _ => len >= 0x1_0000,
        };
        if !minimal {
            return Err(DecodeError::NonMinimalLength(len));
        }
        (len, num_bytes + 1)
    } else {
        (first as usize, 1)
    };

    Ok((tag, len, tag_len + len_len))
}

/// Append a tag and length header in the shortest valid form.
pub fn write_tl(tag: u16, len: usize, out: &mut Vec<u8>) {
    if tag > 0xff {
        out.extend_from_slice(&tag.to_be_bytes());
    } else {
        out.push(tag as u8);
    }
    if len <= 0x7f {
        out.push(len as u8);
    } else if len <= 0xff {
        out.push(0x81);
        out.push(len as u8);
    } else if len <= 0xffff {
        out.push(0x82);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(0x83);
        out.push((len >> 16) as u8);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    }
}

impl Tlv {
    pub fn new(tag: u16, value: impl Into<Vec<u8>>) -> Self {
        Tlv {
            tag,
            value: value.into(),
        }
    }

    /// Parse one TLV from the front of `raw`, returning it and the number of
    /// bytes consumed. Truncated input is an error, never a short decode.
    pub fn parse(raw: &[u8]) -> Result<(Tlv, usize), DecodeError> {
        let (tag, len, header) = read_tl(raw)?;
        if raw.len() < header + len {
            return Err(DecodeError::TooShort {
                needed: header + len,
                got: raw.len(),
            });
        }
        Ok((
            Tlv {
                tag,
                value: raw[header..header + len].to_vec(),
            },
            header + len,
        ))
    }

    /// Parse a sequence of TLVs covering all of `raw`.
    pub fn parse_all(mut raw: &[u8]) -> Result<Vec<Tlv>, DecodeError> {
        let mut out = Vec::new();
        while !raw.is_empty() {
            let (tlv, consumed) = Tlv::parse(raw)?;
            out.push(tlv);
            raw = &raw[consumed..];
        }
        Ok(out)
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        write_tl(self.tag, self.value.len(), out);
        out.extend_from_slice(&self.value);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.value.len() + 4);
        self.encode_into(&mut out);
        out
    }

    /// Parse this value as a nested TLV sequence.
    pub fn children(&self) -> Result<Vec<Tlv>, DecodeError> {
        Tlv::parse_all(&self.value)
    }
}

/// First TLV with the given tag, if any.
pub fn find(tlvs: &[Tlv], tag: u16) -> Option<&Tlv> {
    tlvs.iter().find(|t| t.tag == tag)
}

/// Like [`find`] but an error naming the tag when absent.
pub fn require(tlvs: &[Tlv], tag: u16) -> Result<&Tlv, DecodeError> {
    find(tlvs, tag).ok_or(DecodeError::MissingTag(tag))
}

impl Display for Tlv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = super::elements::ELEMENTS
            .get(&self.tag)
            .copied()
            .unwrap_or("<unknown tag>");
        write!(
            f,
            "0x{:02x} (\"{}\") => {}",
            self.tag,
            name,
            hex::encode(&self.value)
        )
    }
}

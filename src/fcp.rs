//! File control parameters: what SELECT tells us about a file.
//!
//! 3G cards answer with a 0x62 TLV template. 2G cards answer with a fixed
//! byte layout that predates TLV; we recognize it by shape and fold both into
//! the same [`FileInfo`].

use crate::tlv::{self, DecodeError, Tlv};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStructure {
    Transparent,
    LinearFixed { record_len: u16, record_count: u8 },
    Cyclic { record_len: u16, record_count: u8 },
    Dedicated,
}

impl FileStructure {
    pub fn record_len(&self) -> Option<u16> {
        match *self {
            FileStructure::LinearFixed { record_len, .. }
            | FileStructure::Cyclic { record_len, .. } => Some(record_len),
            _ => None,
        }
    }

    pub fn record_count(&self) -> Option<u8> {
        match *self {
            FileStructure::LinearFixed { record_count, .. }
            | FileStructure::Cyclic { record_count, .. } => Some(record_count),
            _ => None,
        }
    }
}

/// The security attribute block, kept in whichever encodings the card sent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SecurityAttrs {
    /// Tag 0x8C value: AM byte followed by condition bytes.
    pub compact: Option<Vec<u8>>,
    /// Tag 0x8B: access-rule file id and record number inside it.
    pub referenced: Option<(u16, u8)>,
    /// Tag 0x86, vendor-defined.
    pub proprietary: Option<Vec<u8>>,
    /// Tag 0xAB, expanded format.
    pub expanded: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub id: Option<u16>,
    pub structure: FileStructure,
    /// Body size in bytes (transparent) or record_len × record_count.
    pub size: usize,
    pub security: SecurityAttrs,
    pub lifecycle: Option<u8>,
}

impl FileInfo {
    pub fn is_record_based(&self) -> bool {
        self.structure.record_len().is_some()
    }
}

/// Parse a SELECT response in either the 0x62 FCP / 0x6F FCI template form
/// or the legacy 2G fixed shape.
pub fn parse_select_response(raw: &[u8]) -> Result<FileInfo, DecodeError> {
    match raw.first() {
        Some(0x62) | Some(0x6f) => parse_fcp(raw),
        _ => parse_legacy(raw),
    }
}

fn parse_fcp(raw: &[u8]) -> Result<FileInfo, DecodeError> {
    let (root, _) = Tlv::parse(raw)?;
    let inner = root.children()?;

    let mut structure = FileStructure::Transparent;
    let mut size_from_descriptor = None;
    if let Some(fd) = tlv::find(&inner, 0x82) {
        let v = &fd.value;
        if v.is_empty() {
            return Err(DecodeError::BadShape("file descriptor"));
        }
        let byte = v[0];
        if byte & 0x38 == 0x38 {
            structure = FileStructure::Dedicated;
        } else {
            // Record files carry record length and count behind the coding
            // byte; both are optional on some cards
            let record_len = if v.len() >= 4 {
                u16::from_be_bytes([v[2], v[3]])
            } else {
                0
            };
            let record_count = if v.len() >= 5 { v[4] } else { 0 };
            structure = match byte & 0x07 {
                0x01 => FileStructure::Transparent,
                0x02 => FileStructure::LinearFixed {
                    record_len,
                    record_count,
                },
                0x06 => FileStructure::Cyclic {
                    record_len,
                    record_count,
                },
                _ => FileStructure::Transparent,
            };
            if record_len > 0 && record_count > 0 {
                size_from_descriptor = Some(record_len as usize * record_count as usize);
            }
        }
    }

    let read_size = |tag: u16| -> Option<usize> {
        tlv::find(&inner, tag).map(|t| {
            t.value
                .iter()
                .fold(0usize, |acc, &b| (acc << 8) | b as usize)
        })
    };
    // Prefer 0x80, fall back to 0x81, fall back to the descriptor
    let size = read_size(0x80)
        .or_else(|| read_size(0x81))
        .or(size_from_descriptor)
        .unwrap_or(0);

    let id = tlv::find(&inner, 0x83).and_then(|t| {
        (t.value.len() == 2).then(|| u16::from_be_bytes([t.value[0], t.value[1]]))
    });

    let mut security = SecurityAttrs::default();
    if let Some(t) = tlv::find(&inner, 0x8c) {
        security.compact = Some(t.value.clone());
    }
    if let Some(t) = tlv::find(&inner, 0x8b) {
        // File id + record number; the 5-byte (fid, SE id, record) variant
        // keeps its last record number
        match t.value.as_slice() {
            [a, b, rec] => security.referenced = Some((u16::from_be_bytes([*a, *b]), *rec)),
            [a, b, .., rec] if t.value.len() >= 3 => {
                security.referenced = Some((u16::from_be_bytes([*a, *b]), *rec))
            }
            _ => return Err(DecodeError::BadShape("referenced security attributes")),
        }
    }
    if let Some(t) = tlv::find(&inner, 0x86) {
        security.proprietary = Some(t.value.clone());
    }
    if let Some(t) = tlv::find(&inner, 0xab) {
        security.expanded = Some(t.value.clone());
    }

    let lifecycle = tlv::find(&inner, 0x8a).and_then(|t| t.value.first().copied());

    Ok(FileInfo {
        id,
        structure,
        size,
        security,
        lifecycle,
    })
}

/// The 2G SELECT response: file size at bytes 2..4, file id at 4..6, type at
/// byte 6, structure at byte 13, record length at byte 14.
fn parse_legacy(raw: &[u8]) -> Result<FileInfo, DecodeError> {
    if raw.len() < 14 {
        return Err(DecodeError::BadShape("legacy select response"));
    }
    let size = u16::from_be_bytes([raw[2], raw[3]]) as usize;
    let id = u16::from_be_bytes([raw[4], raw[5]]);
    let kind = raw[6];
    if kind == 0x01 || kind == 0x02 {
        // MF or DF
        return Ok(FileInfo {
            id: Some(id),
            structure: FileStructure::Dedicated,
            size,
            security: SecurityAttrs::default(),
            lifecycle: None,
        });
    }

    let structure = match raw[13] {
        0x00 => FileStructure::Transparent,
        kind @ (0x01 | 0x03) => {
            let record_len = if raw.len() >= 15 { raw[14] as u16 } else { 0 };
            let record_count = if record_len > 0 {
                (size / record_len as usize) as u8
            } else {
                0
            };
            if kind == 0x01 {
                FileStructure::LinearFixed {
                    record_len,
                    record_count,
                }
            } else {
                FileStructure::Cyclic {
                    record_len,
                    record_count,
                }
            }
        }
        _ => return Err(DecodeError::BadShape("legacy EF structure byte")),
    };

    Ok(FileInfo {
        id: Some(id),
        structure,
        size,
        security: SecurityAttrs::default(),
        lifecycle: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn parse_transparent_fcp() {
        // IMSI-like EF: size 9, id 6F07, compact security, lifecycle active
        let raw = hex!("62 15 82 02 41 21 83 02 6f07 8a 01 05 8c 04 6f 01 01 0a 80 02 0009");
        let info = parse_select_response(&raw).unwrap();
        assert_eq!(info.id, Some(0x6f07));
        assert_eq!(info.structure, FileStructure::Transparent);
        assert_eq!(info.size, 9);
        assert_eq!(info.lifecycle, Some(0x05));
        assert_eq!(info.security.compact, Some(vec![0x6f, 0x01, 0x01, 0x0a]));
    }

    #[test]
    fn parse_linear_fixed_fcp() {
        let raw = hex!("62 10 82 05 42 21 00 26 08 83 02 6f60 8b 03 6f06 05");
        let info = parse_select_response(&raw).unwrap();
        assert_eq!(
            info.structure,
            FileStructure::LinearFixed {
                record_len: 0x26,
                record_count: 8
            }
        );
        // No 0x80/0x81: size falls back to record_len * record_count
        assert_eq!(info.size, 0x26 * 8);
        assert_eq!(info.security.referenced, Some((0x6f06, 5)));
    }

    #[test]
    fn size_prefers_tag_80() {
        let raw = hex!("62 0f 82 05 42 21 00 10 04 80 02 0030 81 02 0080");
        let info = parse_select_response(&raw).unwrap();
        assert_eq!(info.size, 0x30);
    }

    #[test]
    fn parse_dedicated_fcp() {
        let raw = hex!("62 08 82 02 78 21 83 02 7ff0");
        let info = parse_select_response(&raw).unwrap();
        assert_eq!(info.structure, FileStructure::Dedicated);
    }

    #[test]
    fn parse_legacy_transparent() {
        // GSM SELECT response: size 0x0009, id 6F07, EF, transparent
        let raw = hex!("0000 0009 6f07 04 00 11223344 01 00");
        let info = parse_select_response(&raw).unwrap();
        assert_eq!(info.id, Some(0x6f07));
        assert_eq!(info.size, 9);
        assert_eq!(info.structure, FileStructure::Transparent);
    }

    #[test]
    fn parse_legacy_linear_fixed() {
        let raw = hex!("0000 0040 6f40 04 00 11223344 01 01 20");
        let info = parse_select_response(&raw).unwrap();
        assert_eq!(
            info.structure,
            FileStructure::LinearFixed {
                record_len: 0x20,
                record_count: 2
            }
        );
    }

    #[test]
    fn truncated_input_fails_closed() {
        assert!(parse_select_response(&[0x62, 0x10, 0x82]).is_err());
        assert!(parse_select_response(&[0x00, 0x00, 0x09]).is_err());
    }
}

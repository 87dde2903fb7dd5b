//! Security attributes: who may read or update a file.
//!
//! Cards express these three ways. The compact form packs an access-mode
//! byte plus one condition per set bit. The referenced form points at a
//! record of the on-card access-rule file, which carries expanded
//! (access-mode DO, security-condition DO) pairs. The expanded form inlines
//! the same DO structure directly in the FCP.

use std::fmt;
use std::fmt::Display;

use crate::fcp::SecurityAttrs;
use crate::tlv::{DecodeError, Tlv};

/// Access-mode bits.
pub const AM_READ: u8 = 0x01;
pub const AM_UPDATE: u8 = 0x02;
pub const AM_UPDATE_RECORD: u8 = 0x10;
pub const AM_INCREASE: u8 = 0x40;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Always,
    Never,
    /// PIN #n, 1..=8
    Pin(u8),
    UniversalPin,
    /// Admin key #n, 1..=5
    Adm(u8),
    /// Any listed condition satisfies.
    AnyOf(Vec<Condition>),
    /// All listed conditions must be satisfied.
    AllOf(Vec<Condition>),
    /// Unresolved indirection into access-rule record k.
    Arr(u8),
}

impl Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Always => write!(f, "always"),
            Condition::Never => write!(f, "never"),
            Condition::Pin(n) => write!(f, "PIN {}", n),
            Condition::UniversalPin => write!(f, "PIN U"),
            Condition::Adm(n) => write!(f, "ADM {}", n),
            Condition::AnyOf(list) => {
                for (i, c) in list.iter().enumerate() {
                    if i > 0 {
                        write!(f, " / ")?;
                    }
                    c.fmt(f)?;
                }
                Ok(())
            }
            Condition::AllOf(list) => {
                for (i, c) in list.iter().enumerate() {
                    if i > 0 {
                        write!(f, " & ")?;
                    }
                    c.fmt(f)?;
                }
                Ok(())
            }
            Condition::Arr(k) => write!(f, "ARR#{}", k),
        }
    }
}

fn simple_condition(byte: u8) -> Result<Condition, DecodeError> {
    match byte {
        0x00 => Ok(Condition::Always),
        0xff => Ok(Condition::Never),
        0x01..=0x08 => Ok(Condition::Pin(byte)),
        0x0a..=0x0e => Ok(Condition::Adm(byte - 0x09)),
        0x11 => Ok(Condition::UniversalPin),
        _ => Err(DecodeError::BadShape("security condition byte")),
    }
}

/// Parse one condition from a byte stream, consuming group templates:
/// 0x8n opens an OR group of the n following conditions, 0xAn an AND group.
fn read_condition(raw: &[u8]) -> Result<(Condition, usize), DecodeError> {
    let first = *raw.first().ok_or(DecodeError::TooShort { needed: 1, got: 0 })?;
    match first {
        0x80..=0x8f | 0xa0..=0xaf => {
            let count = (first & 0x0f) as usize;
            if count == 0 {
                return Err(DecodeError::BadShape("empty condition template"));
            }
            let mut list = Vec::with_capacity(count);
            let mut offset = 1;
            for _ in 0..count {
                let (cond, used) = read_condition(&raw[offset..])?;
                list.push(cond);
                offset += used;
            }
            if first & 0xf0 == 0x80 {
                Ok((Condition::AnyOf(list), offset))
            } else {
                Ok((Condition::AllOf(list), offset))
            }
        }
        _ => Ok((simple_condition(first)?, 1)),
    }
}

/// Decode a compact (tag 0x8C) value: the access-mode byte, then one
/// condition per set bit, most significant bit first.
pub fn parse_compact(value: &[u8]) -> Result<Vec<(u8, Condition)>, DecodeError> {
    let (&am, mut rest) = value
        .split_first()
        .ok_or(DecodeError::BadShape("empty compact attributes"))?;
    let mut pairs = Vec::new();
    for bit in (0..8).rev() {
        let mask = 1u8 << bit;
        if am & mask != 0 {
            let (cond, used) = read_condition(rest)?;
            pairs.push((mask, cond));
            rest = &rest[used..];
        }
    }
    Ok(pairs)
}

/// Decode an access-rule record or an expanded (tag 0xAB) value: a sequence
/// of AM-DO (0x80 bitmask, or 0x81..0x8F instruction-specific) and SC-DO
/// pairs. Each SC-DO applies to the AM-DO before it.
pub fn parse_expanded(value: &[u8]) -> Result<Vec<(u8, Condition)>, DecodeError> {
    // Records come back 0xFF-padded to the record length; no DO starts with
    // 0xFF, so the first one terminates the sequence
    let mut tlvs = Vec::new();
    let mut rest = value;
    while !rest.is_empty() && rest[0] != 0xff {
        let (tlv, used) = Tlv::parse(rest)?;
        tlvs.push(tlv);
        rest = &rest[used..];
    }
    let mut pairs = Vec::new();
    let mut current_am: Option<u8> = None;
    for tlv in &tlvs {
        match tlv.tag {
            0x80 => {
                current_am = Some(
                    *tlv.value
                        .first()
                        .ok_or(DecodeError::BadShape("empty AM-DO"))?,
                );
            }
            // Instruction-specific AM-DOs are kept but not folded into the
            // read/update bitmask
            0x81..=0x8f => current_am = None,
            _ => {
                let am = match current_am {
                    Some(am) => am,
                    None => continue,
                };
                let cond = parse_sc_do(tlv)?;
                pairs.push((am, cond));
            }
        }
    }
    Ok(pairs)
}

fn parse_sc_do(tlv: &Tlv) -> Result<Condition, DecodeError> {
    match tlv.tag {
        0x90 => Ok(Condition::Always),
        0x97 => Ok(Condition::Never),
        0x9e => {
            let (cond, _) = read_condition(&tlv.value)?;
            Ok(cond)
        }
        0xa0 => {
            let inner = tlv.children()?;
            let list = inner
                .iter()
                .map(parse_sc_do)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Condition::AnyOf(list))
        }
        0xa7 => {
            let inner = tlv.children()?;
            let list = inner
                .iter()
                .map(parse_sc_do)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Condition::AllOf(list))
        }
        _ => Err(DecodeError::BadShape("security condition DO")),
    }
}

/// Read and write conditions for one file, in symbolic form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRule {
    pub read: Condition,
    pub update: Condition,
}

impl Display for AccessRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "read: {}, update: {}", self.read, self.update)
    }
}

/// Fold (access-mode, condition) pairs into a rule. The first pair covering
/// each of read and update wins; unspecified read defaults to "always",
/// unspecified write to "never".
pub fn rule_from_pairs(pairs: &[(u8, Condition)]) -> AccessRule {
    let mut read = None;
    let mut update = None;
    for (am, cond) in pairs {
        if read.is_none() && am & AM_READ != 0 {
            read = Some(cond.clone());
        }
        if update.is_none() && am & (AM_UPDATE | AM_UPDATE_RECORD) != 0 {
            update = Some(cond.clone());
        }
    }
    AccessRule {
        read: read.unwrap_or(Condition::Always),
        update: update.unwrap_or(Condition::Never),
    }
}

/// Resolve what can be resolved without touching the card. Compact beats
/// proprietary when both are present; a referenced block surfaces as
/// `Arr(k)` for the navigator to chase.
pub fn resolve_local(attrs: &SecurityAttrs) -> Result<AccessRule, DecodeError> {
    if let Some(compact) = &attrs.compact {
        return Ok(rule_from_pairs(&parse_compact(compact)?));
    }
    if let Some(expanded) = &attrs.expanded {
        return Ok(rule_from_pairs(&parse_expanded(expanded)?));
    }
    if let Some((_, record)) = attrs.referenced {
        return Ok(AccessRule {
            read: Condition::Arr(record),
            update: Condition::Arr(record),
        });
    }
    // Proprietary only, or nothing: the defaults
    Ok(AccessRule {
        read: Condition::Always,
        update: Condition::Never,
    })
}

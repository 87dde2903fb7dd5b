//! Public land mobile network identities: the 3-byte nibble-packed triplet,
//! the triplet-plus-access-technology record, and the forbidden list.

use std::fmt;
use std::fmt::Display;

use super::{CodecError, trim_ff};
use crate::errors::ValidationError;
use crate::tlv::DecodeError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plmn {
    /// Three-digit country code.
    pub mcc: String,
    /// Two- or three-digit network code.
    pub mnc: String,
}

impl Plmn {
    pub fn new(mcc: &str, mnc: &str) -> Result<Self, ValidationError> {
        if mcc.len() != 3 || !mcc.chars().all(|c| c.is_ascii_digit()) {
            return Err(ValidationError::NotDigits("MCC"));
        }
        if !(mnc.len() == 2 || mnc.len() == 3) || !mnc.chars().all(|c| c.is_ascii_digit()) {
            return Err(ValidationError::NotDigits("MNC"));
        }
        Ok(Plmn {
            mcc: mcc.to_string(),
            mnc: mnc.to_string(),
        })
    }
}

impl Display for Plmn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.mcc, self.mnc)
    }
}

fn nibble(b: u8) -> Result<char, CodecError> {
    match b {
        0x0..=0x9 => Ok(char::from(b'0' + b)),
        _ => Err(CodecError::Bcd(crate::bcd::BcdError::BadDigit(b))),
    }
}

/// Decode the 3-byte triplet. The third network digit's nibble is 0xF for
/// two-digit networks.
pub fn decode(raw: &[u8]) -> Result<Plmn, CodecError> {
    if raw.len() < 3 {
        return Err(DecodeError::BadShape("PLMN triplet").into());
    }
    let mcc = [
        nibble(raw[0] & 0x0f)?,
        nibble(raw[0] >> 4)?,
        nibble(raw[1] & 0x0f)?,
    ]
    .iter()
    .collect();
    let mut mnc = String::with_capacity(3);
    mnc.push(nibble(raw[2] & 0x0f)?);
    mnc.push(nibble(raw[2] >> 4)?);
    if raw[1] >> 4 != 0x0f {
        mnc.push(nibble(raw[1] >> 4)?);
    }
    Ok(Plmn { mcc, mnc })
}

pub fn encode(plmn: &Plmn) -> Result<[u8; 3], CodecError> {
    let p = Plmn::new(&plmn.mcc, &plmn.mnc)?;
    let d = |s: &str, i: usize| s.as_bytes()[i] - b'0';
    let mnc3 = if p.mnc.len() == 3 { d(&p.mnc, 2) } else { 0x0f };
    Ok([
        d(&p.mcc, 1) << 4 | d(&p.mcc, 0),
        mnc3 << 4 | d(&p.mcc, 2),
        d(&p.mnc, 1) << 4 | d(&p.mnc, 0),
    ])
}

/// Radio access technology mask carried behind a PLMN in the *PLMNwAcT
/// files, big-endian on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccessTech(pub u16);

impl AccessTech {
    pub const UTRAN: u16 = 0x8000;
    pub const EUTRAN: u16 = 0x4000;
    pub const GSM: u16 = 0x0080;
    pub const GSM_COMPACT: u16 = 0x0040;
    pub const NR: u16 = 0x0008;
    pub const NG_RAN: u16 = 0x0004;

    pub const ALL: AccessTech = AccessTech(
        Self::UTRAN | Self::EUTRAN | Self::GSM | Self::GSM_COMPACT | Self::NR | Self::NG_RAN,
    );

    pub fn contains(self, bit: u16) -> bool {
        self.0 & bit != 0
    }
}

impl Display for AccessTech {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::UTRAN, "UTRAN"),
            (Self::EUTRAN, "E-UTRAN"),
            (Self::GSM, "GSM"),
            (Self::GSM_COMPACT, "GSM-compact"),
            (Self::NR, "NR"),
            (Self::NG_RAN, "NG-RAN"),
        ];
        let mut first = true;
        for (bit, name) in names {
            if self.contains(bit) {
                if !first {
                    write!(f, "+")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        if first {
            write!(f, "none")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlmnAct {
    pub plmn: Plmn,
    pub act: AccessTech,
}

/// One 5-byte record of the PLMN-with-access-technology files.
pub fn decode_with_act(raw: &[u8]) -> Result<PlmnAct, CodecError> {
    if raw.len() < 5 {
        return Err(DecodeError::BadShape("PLMNwAcT record").into());
    }
    Ok(PlmnAct {
        plmn: decode(&raw[..3])?,
        act: AccessTech(u16::from_be_bytes([raw[3], raw[4]])),
    })
}

pub fn encode_with_act(entry: &PlmnAct) -> Result<[u8; 5], CodecError> {
    let triplet = encode(&entry.plmn)?;
    let act = entry.act.0.to_be_bytes();
    Ok([triplet[0], triplet[1], triplet[2], act[0], act[1]])
}

/// A whole *PLMNwAcT file: 5-byte entries, erased entries skipped.
pub fn decode_act_list(raw: &[u8]) -> Result<Vec<PlmnAct>, CodecError> {
    let mut out = Vec::new();
    for chunk in raw.chunks_exact(5) {
        if chunk[..3] == [0xff, 0xff, 0xff] {
            continue;
        }
        out.push(decode_with_act(chunk)?);
    }
    Ok(out)
}

pub fn encode_act_list(entries: &[PlmnAct], file_len: usize) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(file_len);
    for entry in entries {
        out.extend_from_slice(&encode_with_act(entry)?);
    }
    super::fit_ff(&out, file_len)
}

/// The forbidden list: bare 3-byte triplets, no technology mask.
pub fn decode_fplmn(raw: &[u8]) -> Result<Vec<Plmn>, CodecError> {
    let mut out = Vec::new();
    for chunk in trim_ff(raw).chunks(3) {
        if chunk.len() < 3 || chunk == [0xff, 0xff, 0xff] {
            continue;
        }
        out.push(decode(chunk)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn decode_two_digit_mnc() {
        let plmn = decode(&hex!("52 f0 88")).unwrap();
        assert_eq!(plmn.mcc, "250");
        assert_eq!(plmn.mnc, "88");
    }

    #[test]
    fn decode_three_digit_mnc() {
        // 302/720
        let plmn = decode(&hex!("03 02 27")).unwrap();
        assert_eq!(plmn.mcc, "302");
        assert_eq!(plmn.mnc, "720");
    }

    #[test]
    fn encode_known_triplet() {
        let plmn = Plmn::new("250", "88").unwrap();
        assert_eq!(encode(&plmn).unwrap(), hex!("52 f0 88"));
    }

    #[test]
    fn round_trip_mnc_lengths() {
        for (mcc, mnc) in [("250", "88"), ("262", "01"), ("302", "720"), ("001", "001")] {
            let plmn = Plmn::new(mcc, mnc).unwrap();
            let decoded = decode(&encode(&plmn).unwrap()).unwrap();
            assert_eq!(decoded, plmn);
        }
    }

    #[test]
    fn with_act_record() {
        let entry = decode_with_act(&hex!("52 f0 88 40 00")).unwrap();
        assert_eq!(entry.plmn, Plmn::new("250", "88").unwrap());
        assert_eq!(entry.act, AccessTech(AccessTech::EUTRAN));
        assert_eq!(entry.act.to_string(), "E-UTRAN");
        assert_eq!(encode_with_act(&entry).unwrap(), hex!("52 f0 88 40 00"));
    }

    #[test]
    fn act_list_skips_erased_entries() {
        let raw = hex!("52 f0 88 80 80 ff ff ff 00 00 32 f4 51 c0 00");
        let list = decode_act_list(&raw).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].act.to_string(), "UTRAN+GSM");
        assert_eq!(list[1].plmn.mcc, "234");
    }

    #[test]
    fn fplmn_list() {
        let raw = hex!("52 f0 88 13 00 61 ff ff ff");
        let list = decode_fplmn(&raw).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].to_string(), "310/160");
    }
}

//! Location information files: where the network last saw this card.

use super::{plmn, plmn::Plmn, CodecError};
use crate::tlv::DecodeError;

/// Update status, the last byte of each location file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    Updated,
    NotUpdated,
    PlmnNotAllowed,
    LaNotAllowed,
    Other(u8),
}

impl From<u8> for UpdateStatus {
    fn from(b: u8) -> Self {
        match b & 0x07 {
            0x00 => UpdateStatus::Updated,
            0x01 => UpdateStatus::NotUpdated,
            0x02 => UpdateStatus::PlmnNotAllowed,
            0x03 => UpdateStatus::LaNotAllowed,
            _ => UpdateStatus::Other(b),
        }
    }
}

/// Circuit-switched location: TMSI, location area, status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loci {
    pub tmsi: [u8; 4],
    pub plmn: Plmn,
    pub lac: u16,
    pub status: UpdateStatus,
}

pub fn decode_loci(raw: &[u8]) -> Result<Loci, CodecError> {
    if raw.len() < 11 {
        return Err(DecodeError::BadShape("location information").into());
    }
    Ok(Loci {
        tmsi: raw[0..4].try_into().unwrap(),
        plmn: plmn::decode(&raw[4..7])?,
        lac: u16::from_be_bytes([raw[7], raw[8]]),
        status: raw[10].into(),
    })
}

/// Packet-switched location: P-TMSI with its signature, routing area,
/// status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsLoci {
    pub ptmsi: [u8; 4],
    pub ptmsi_signature: [u8; 3],
    pub plmn: Plmn,
    pub lac: u16,
    pub rac: u8,
    pub status: UpdateStatus,
}

pub fn decode_psloci(raw: &[u8]) -> Result<PsLoci, CodecError> {
    if raw.len() < 14 {
        return Err(DecodeError::BadShape("PS location information").into());
    }
    Ok(PsLoci {
        ptmsi: raw[0..4].try_into().unwrap(),
        ptmsi_signature: raw[4..7].try_into().unwrap(),
        plmn: plmn::decode(&raw[7..10])?,
        lac: u16::from_be_bytes([raw[10], raw[11]]),
        rac: raw[12],
        status: raw[13].into(),
    })
}

/// EPS location: the GUTI is kept raw, the serving PLMN and status decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpsLoci {
    pub guti: Vec<u8>,
    pub tai_plmn: Plmn,
    pub status: UpdateStatus,
}

pub fn decode_epsloci(raw: &[u8]) -> Result<EpsLoci, CodecError> {
    if raw.len() < 18 {
        return Err(DecodeError::BadShape("EPS location information").into());
    }
    Ok(EpsLoci {
        guti: raw[..12].to_vec(),
        tai_plmn: plmn::decode(&raw[12..15])?,
        status: raw[17].into(),
    })
}

/// The erased image written by `clear` operations: all-FF identities with a
/// "not updated" status.
pub fn cleared(file_len: usize) -> Vec<u8> {
    let mut out = vec![0xff; file_len];
    if let Some(last) = out.last_mut() {
        *last = 0x01;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn decode_loci_fields() {
        let raw = hex!("01020304 52f088 9abc 00 00");
        let loci = decode_loci(&raw).unwrap();
        assert_eq!(loci.tmsi, [1, 2, 3, 4]);
        assert_eq!(loci.plmn.to_string(), "250/88");
        assert_eq!(loci.lac, 0x9abc);
        assert_eq!(loci.status, UpdateStatus::Updated);
    }

    #[test]
    fn decode_psloci_fields() {
        let raw = hex!("a1a2a3a4 b1b2b3 52f088 0102 05 03");
        let ps = decode_psloci(&raw).unwrap();
        assert_eq!(ps.ptmsi_signature, [0xb1, 0xb2, 0xb3]);
        assert_eq!(ps.rac, 0x05);
        assert_eq!(ps.status, UpdateStatus::LaNotAllowed);
    }

    #[test]
    fn cleared_image() {
        let raw = cleared(11);
        assert_eq!(raw[..10], [0xff; 10]);
        assert_eq!(raw[10], 0x01);
        // An erased PLMN has no digits to decode
        assert!(decode_loci(&raw).is_err());
    }
}

//! Administrative data: the card's operation mode and the declared length
//! of the network code.

use super::CodecError;
use crate::errors::ValidationError;
use crate::tlv::DecodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    Normal,
    TypeApproval,
    NormalSpecific,
    TypeApprovalSpecific,
    Maintenance,
    CellTest,
}

impl OperationMode {
    pub fn from_byte(b: u8) -> Result<Self, CodecError> {
        match b {
            0x00 => Ok(OperationMode::Normal),
            0x01 => Ok(OperationMode::TypeApproval),
            0x02 => Ok(OperationMode::NormalSpecific),
            0x04 => Ok(OperationMode::TypeApprovalSpecific),
            0x08 => Ok(OperationMode::Maintenance),
            0x80 => Ok(OperationMode::CellTest),
            _ => Err(DecodeError::BadShape("operation mode byte").into()),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            OperationMode::Normal => 0x00,
            OperationMode::TypeApproval => 0x01,
            OperationMode::NormalSpecific => 0x02,
            OperationMode::TypeApprovalSpecific => 0x04,
            OperationMode::Maintenance => 0x08,
            OperationMode::CellTest => 0x80,
        }
    }
}

impl std::str::FromStr for OperationMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(OperationMode::Normal),
            "type-approval" => Ok(OperationMode::TypeApproval),
            "normal-specific" => Ok(OperationMode::NormalSpecific),
            "type-approval-specific" => Ok(OperationMode::TypeApprovalSpecific),
            "maintenance" => Ok(OperationMode::Maintenance),
            "cell-test" => Ok(OperationMode::CellTest),
            _ => Err(ValidationError::Unsupported("operation mode name")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminData {
    pub mode: OperationMode,
    /// Low nibble of byte 4; absent on 3-byte 2G files.
    pub mnc_len: Option<u8>,
}

pub fn decode(raw: &[u8]) -> Result<AdminData, CodecError> {
    if raw.len() < 3 {
        return Err(DecodeError::BadShape("administrative data").into());
    }
    let mode = OperationMode::from_byte(raw[0])?;
    let mnc_len = if raw.len() >= 4 {
        let n = raw[3] & 0x0f;
        if n != 2 && n != 3 {
            return Err(DecodeError::BadShape("MNC length nibble").into());
        }
        Some(n)
    } else {
        None
    };
    Ok(AdminData { mode, mnc_len })
}

pub fn encode(ad: &AdminData, file_len: usize) -> Result<Vec<u8>, CodecError> {
    let mut out = vec![ad.mode.to_byte(), 0x00, 0x00];
    if let Some(n) = ad.mnc_len {
        if n != 2 && n != 3 {
            return Err(ValidationError::Unsupported("MNC length other than 2 or 3").into());
        }
        out.push(n);
    }
    if out.len() > file_len {
        return Err(CodecError::DoesNotFit {
            need: out.len(),
            have: file_len,
        });
    }
    // Unlike most files the tail pads with zero, not 0xFF
    out.resize(file_len, 0x00);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn decode_normal_with_mnc_len() {
        let ad = decode(&hex!("00 00 00 02")).unwrap();
        assert_eq!(ad.mode, OperationMode::Normal);
        assert_eq!(ad.mnc_len, Some(2));
    }

    #[test]
    fn decode_2g_without_mnc_len() {
        let ad = decode(&hex!("80 00 00")).unwrap();
        assert_eq!(ad.mode, OperationMode::CellTest);
        assert_eq!(ad.mnc_len, None);
    }

    #[test]
    fn round_trip() {
        let ad = AdminData {
            mode: OperationMode::TypeApproval,
            mnc_len: Some(3),
        };
        let raw = encode(&ad, 4).unwrap();
        assert_eq!(raw, hex!("01 00 00 03"));
        assert_eq!(decode(&raw).unwrap(), ad);
    }

    #[test]
    fn bad_values_refused() {
        assert!(decode(&hex!("03 00 00 02")).is_err());
        assert!(decode(&hex!("00 00 00 05")).is_err());
        assert!("weird".parse::<OperationMode>().is_err());
        assert_eq!(
            "cell-test".parse::<OperationMode>().unwrap(),
            OperationMode::CellTest
        );
    }
}

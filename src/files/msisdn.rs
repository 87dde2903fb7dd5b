//! The subscriber's own number: one record of the MSISDN file.
//!
//! Layout from the back: 2 trailing reference bytes, 10 BCD digit bytes,
//! the TON/NPI byte, the BCD length byte (which counts TON/NPI too), and
//! everything before that is the alphabetic identifier.

use super::{trim_ff, CodecError};
use crate::bcd;
use crate::errors::ValidationError;
use crate::tlv::DecodeError;

const TAIL: usize = 14;

pub const TON_INTERNATIONAL: u8 = 0x91;
pub const TON_UNKNOWN: u8 = 0x81;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Msisdn {
    pub label: String,
    pub number: String,
    pub international: bool,
}

pub fn decode(record: &[u8]) -> Result<Option<Msisdn>, CodecError> {
    if record.len() < TAIL {
        return Err(DecodeError::BadShape("MSISDN record").into());
    }
    let alpha_len = record.len() - TAIL;
    let tail = &record[alpha_len..];
    let bcd_len = tail[0] as usize;
    if bcd_len == 0xff {
        // Erased record
        return Ok(None);
    }
    if bcd_len < 2 || bcd_len > 11 {
        return Err(DecodeError::BadShape("MSISDN BCD length").into());
    }
    let ton = tail[1];
    let number = bcd::decode_phone(&tail[2..2 + (bcd_len - 1)])?;
    let label = String::from_utf8(trim_ff(&record[..alpha_len]).to_vec())
        .map_err(|_| DecodeError::BadShape("MSISDN alpha identifier"))?;
    Ok(Some(Msisdn {
        label,
        number,
        international: ton == TON_INTERNATIONAL,
    }))
}

pub fn encode(msisdn: &Msisdn, record_len: usize) -> Result<Vec<u8>, CodecError> {
    if record_len < TAIL {
        return Err(CodecError::DoesNotFit {
            need: TAIL,
            have: record_len,
        });
    }
    if msisdn.number.len() > 20 {
        return Err(ValidationError::LengthOutOfRange {
            what: "MSISDN",
            min: 1,
            max: 20,
            got: msisdn.number.len(),
        }
        .into());
    }
    let alpha_len = record_len - TAIL;
    if msisdn.label.len() > alpha_len {
        return Err(CodecError::DoesNotFit {
            need: TAIL + msisdn.label.len(),
            have: record_len,
        });
    }
    let digits = bcd::encode_phone(&msisdn.number)?;
    let mut out = vec![0xffu8; record_len];
    out[..msisdn.label.len()].copy_from_slice(msisdn.label.as_bytes());
    out[alpha_len] = (digits.len() + 1) as u8;
    out[alpha_len + 1] = if msisdn.international {
        TON_INTERNATIONAL
    } else {
        TON_UNKNOWN
    };
    out[alpha_len + 2..alpha_len + 2 + digits.len()].copy_from_slice(&digits);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let msisdn = Msisdn {
            label: "Own".to_string(),
            number: "79161234567".to_string(),
            international: true,
        };
        let record = encode(&msisdn, 24).unwrap();
        assert_eq!(record.len(), 24);
        assert_eq!(decode(&record).unwrap().unwrap(), msisdn);
    }

    #[test]
    fn known_layout() {
        let msisdn = Msisdn {
            label: String::new(),
            number: "123".to_string(),
            international: false,
        };
        let record = encode(&msisdn, 14).unwrap();
        assert_eq!(record[0], 0x03); // 2 BCD bytes + TON/NPI
        assert_eq!(record[1], TON_UNKNOWN);
        assert_eq!(record[2], 0x21);
        assert_eq!(record[3], 0xf3);
        assert_eq!(record[4], 0xff);
    }

    #[test]
    fn erased_record_is_none() {
        assert_eq!(decode(&[0xff; 24]).unwrap(), None);
    }

    #[test]
    fn star_and_hash_allowed() {
        let msisdn = Msisdn {
            label: String::new(),
            number: "*135#".to_string(),
            international: false,
        };
        let record = encode(&msisdn, 20).unwrap();
        assert_eq!(decode(&record).unwrap().unwrap().number, "*135#");
    }
}

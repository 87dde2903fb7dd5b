//! Emergency call codes: one record per number, 3 BCD bytes, an alpha
//! identifier, and a service-category byte at the end.

use super::{trim_ff, CodecError};
use crate::bcd;
use crate::tlv::DecodeError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmergencyNumber {
    pub number: String,
    pub label: String,
    pub category: u8,
}

pub fn decode(record: &[u8]) -> Result<Option<EmergencyNumber>, CodecError> {
    if record.len() < 4 {
        return Err(DecodeError::BadShape("emergency call code record").into());
    }
    if record[..3] == [0xff, 0xff, 0xff] {
        return Ok(None);
    }
    let number = bcd::decode(&record[..3])?;
    let label = String::from_utf8(trim_ff(&record[3..record.len() - 1]).to_vec())
        .map_err(|_| DecodeError::BadShape("emergency call code label"))?;
    Ok(Some(EmergencyNumber {
        number,
        label,
        category: record[record.len() - 1],
    }))
}

pub fn encode(entry: &EmergencyNumber, record_len: usize) -> Result<Vec<u8>, CodecError> {
    if entry.number.len() > 6 {
        return Err(crate::errors::ValidationError::LengthOutOfRange {
            what: "emergency number",
            min: 1,
            max: 6,
            got: entry.number.len(),
        }
        .into());
    }
    if record_len < 4 || entry.label.len() > record_len - 4 {
        return Err(CodecError::DoesNotFit {
            need: 4 + entry.label.len(),
            have: record_len,
        });
    }
    let mut out = vec![0xffu8; record_len];
    let digits = bcd::encode(&entry.number)?;
    out[..digits.len()].copy_from_slice(&digits);
    out[3..3 + entry.label.len()].copy_from_slice(entry.label.as_bytes());
    out[record_len - 1] = entry.category;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let entry = EmergencyNumber {
            number: "112".to_string(),
            label: "SOS".to_string(),
            category: 0x1f,
        };
        let record = encode(&entry, 8).unwrap();
        assert_eq!(record[0], 0x11);
        assert_eq!(record[1], 0xf2);
        assert_eq!(decode(&record).unwrap().unwrap(), entry);
    }

    #[test]
    fn erased_record() {
        assert_eq!(decode(&[0xff; 8]).unwrap(), None);
    }
}

//! The card serial number: up to 20 swapped-BCD digits, Luhn-checked.

use super::{fit_ff, trim_ff, CodecError};
use crate::bcd;
use crate::errors::ValidationError;

pub fn decode(raw: &[u8]) -> Result<String, CodecError> {
    Ok(bcd::decode(trim_ff(raw))?)
}

pub fn encode(iccid: &str, file_len: usize) -> Result<Vec<u8>, CodecError> {
    if !(18..=20).contains(&iccid.len()) {
        return Err(ValidationError::LengthOutOfRange {
            what: "ICCID",
            min: 18,
            max: 20,
            got: iccid.len(),
        }
        .into());
    }
    if !luhn_valid(iccid) {
        return Err(ValidationError::BadLuhn(iccid.to_string()).into());
    }
    fit_ff(&bcd::encode(iccid)?, file_len)
}

/// Luhn checksum over a decimal string, check digit included.
pub fn luhn_valid(digits: &str) -> bool {
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    let sum: u32 = digits
        .chars()
        .rev()
        .enumerate()
        .map(|(i, c)| {
            let d = c.to_digit(10).unwrap();
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

/// Append the Luhn check digit to a payload of digits.
pub fn with_luhn(payload: &str) -> String {
    for check in 0..10u8 {
        let candidate = format!("{}{}", payload, check);
        if luhn_valid(&candidate) {
            return candidate;
        }
    }
    unreachable!("one of ten check digits always satisfies Luhn")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn luhn() {
        assert!(luhn_valid("89014103211118510720"));
        assert!(!luhn_valid("89014103211118510721"));
        assert!(!luhn_valid(""));
        assert_eq!(with_luhn("8901410321111851072"), "89014103211118510720");
    }

    #[test]
    fn round_trip() {
        let iccid = "89014103211118510720";
        let raw = encode(iccid, 10).unwrap();
        assert_eq!(raw.len(), 10);
        assert_eq!(decode(&raw).unwrap(), iccid);
    }

    #[test]
    fn nineteen_digit_iccid_pads() {
        let iccid = with_luhn("898600123456789012");
        let raw = encode(&iccid, 10).unwrap();
        assert_eq!(raw[9] & 0xf0, 0xf0);
        assert_eq!(decode(&raw).unwrap(), iccid);
    }

    #[test]
    fn bad_luhn_refused() {
        assert!(encode("89014103211118510721", 10).is_err());
    }
}

//! The subscriber identity: a length byte, a parity nibble sharing its byte
//! with the first digit, then swapped-BCD digit pairs.

use super::{fit_ff, trim_ff, CodecError};
use crate::bcd;
use crate::errors::ValidationError;
use crate::tlv::DecodeError;

pub fn decode(raw: &[u8]) -> Result<String, CodecError> {
    let raw = trim_ff(raw);
    if raw.len() < 2 {
        return Err(DecodeError::BadShape("IMSI too short").into());
    }
    let len = raw[0] as usize;
    if len < 1 || raw.len() < 1 + len {
        return Err(DecodeError::BadShape("IMSI length byte").into());
    }
    let odd = raw[1] & 0x08 != 0;
    let first = raw[1] >> 4;
    if first > 9 {
        return Err(CodecError::Bcd(crate::bcd::BcdError::BadDigit(first)));
    }
    let mut digits = String::with_capacity(16);
    digits.push(char::from(b'0' + first));
    digits.push_str(&bcd::decode(&raw[2..1 + len])?);
    // The parity flag must agree with what the nibbles produced
    if (digits.len() % 2 == 1) != odd {
        return Err(DecodeError::BadShape("IMSI parity").into());
    }
    Ok(digits)
}

pub fn encode(imsi: &str, file_len: usize) -> Result<Vec<u8>, CodecError> {
    if !(6..=15).contains(&imsi.len()) {
        return Err(ValidationError::LengthOutOfRange {
            what: "IMSI",
            min: 6,
            max: 15,
            got: imsi.len(),
        }
        .into());
    }
    if !imsi.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::NotDigits("IMSI").into());
    }
    let odd = imsi.len() % 2 == 1;
    let first = imsi.as_bytes()[0] - b'0';
    let parity = if odd { 0x09 } else { 0x01 };
    let mut out = Vec::with_capacity(9);
    out.push(0); // patched below
    out.push(first << 4 | parity);
    out.extend(bcd::encode(&imsi[1..])?);
    out[0] = (out.len() - 1) as u8;
    fit_ff(&out, file_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn decode_known_imsi() {
        // 250 88 0000000003
        let raw = hex!("08 29 05 88 00 00 00 00 30");
        assert_eq!(decode(&raw).unwrap(), "250880000000003");
    }

    #[test]
    fn encode_known_imsi() {
        let raw = encode("250880000000003", 9).unwrap();
        assert_eq!(raw, hex!("08 29 05 88 00 00 00 00 30"));
    }

    #[test]
    fn round_trip_all_lengths() {
        for len in 6..=15 {
            let imsi: String = (0..len)
                .map(|i| char::from(b'0' + ((i * 7 + 3) % 10) as u8))
                .collect();
            let raw = encode(&imsi, 9).unwrap();
            assert_eq!(decode(&raw).unwrap(), imsi, "length {}", len);
        }
    }

    #[test]
    fn even_length_pads_with_f() {
        let raw = encode("26201123", 9).unwrap();
        // 8 digits: one in the parity byte, seven in BCD with a pad nibble
        assert_eq!(raw[0], 5);
        assert_eq!(raw[1], 0x21);
        assert_eq!(raw[5] & 0xf0, 0xf0);
        assert_eq!(decode(&raw).unwrap(), "26201123");
    }

    #[test]
    fn rejects_bad_input() {
        assert!(encode("12345", 9).is_err());
        assert!(encode("1234567890123456", 9).is_err());
        assert!(encode("25088000000000a", 9).is_err());
        assert!(decode(&[0x08]).is_err());
        assert!(decode(&hex!("08 2a 05 88 00 00 00 00 30")).is_err());
    }
}

use crate::errors::ValidationError;

/// Parse a hex byte string, ignoring interior whitespace and an optional
/// leading "0x". Fails on odd digit counts and non-hex characters.
pub fn parse_hex(s: &str) -> Result<Vec<u8>, ValidationError> {
    let stripped: String = s
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if stripped.len() % 2 != 0 {
        return Err(ValidationError::OddHexLength(stripped.len()));
    }
    hex::decode(&stripped).map_err(|_| {
        let bad = stripped
            .chars()
            .find(|c| !c.is_ascii_hexdigit())
            .unwrap_or('?');
        ValidationError::BadHexChar(bad)
    })
}

/// Parse hex and require an exact byte length.
pub fn parse_hex_exact(s: &str, len: usize) -> Result<Vec<u8>, ValidationError> {
    let bytes = parse_hex(s)?;
    if bytes.len() != len {
        return Err(ValidationError::WrongLength {
            what: "hex string",
            expected: len,
            got: bytes.len(),
        });
    }
    Ok(bytes)
}

pub fn left_pad_slice<const LEN: usize>(slice: &[u8]) -> [u8; LEN] {
    let mut s = [0; LEN];
    s[LEN - slice.len()..].copy_from_slice(slice);
    s
}

/// Pad `data` with 0xFF up to `len`.
pub fn pad_ff(data: &[u8], len: usize) -> Vec<u8> {
    let mut out = vec![0xff; len.max(data.len())];
    out[..data.len()].copy_from_slice(data);
    out
}

pub fn xor_into(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= s;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_ignores_whitespace_and_prefix() {
        assert_eq!(
            parse_hex("0xDE AD be ef").unwrap(),
            vec![0xde, 0xad, 0xbe, 0xef]
        );
        assert_eq!(parse_hex("  52 F0 88 ").unwrap(), vec![0x52, 0xf0, 0x88]);
    }

    #[test]
    fn hex_rejects_odd_and_garbage() {
        assert!(matches!(
            parse_hex("abc"),
            Err(ValidationError::OddHexLength(3))
        ));
        assert!(matches!(parse_hex("zz"), Err(ValidationError::BadHexChar('z'))));
    }

    #[test]
    fn exact_length_enforced() {
        assert!(parse_hex_exact("00112233445566778899aabbccddeeff", 16).is_ok());
        assert!(parse_hex_exact("0011", 16).is_err());
    }

    #[test]
    fn pad_ff_fills_tail() {
        assert_eq!(pad_ff(&[1, 2], 4), vec![1, 2, 0xff, 0xff]);
    }
}

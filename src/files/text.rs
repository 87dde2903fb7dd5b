//! The small text-carrying files: service provider name, language
//! indication, group identifiers.

use super::{fit_ff, trim_ff, CodecError};
use crate::errors::ValidationError;
use crate::tlv::DecodeError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceProviderName {
    /// Bit 0: display SPN when registered to the home network; bit 1: hide
    /// the network name.
    pub display_condition: u8,
    pub name: String,
}

pub fn decode_spn(raw: &[u8]) -> Result<ServiceProviderName, CodecError> {
    if raw.is_empty() {
        return Err(DecodeError::BadShape("service provider name").into());
    }
    let name = trim_ff(&raw[1..]);
    let name = String::from_utf8(name.to_vec())
        .map_err(|_| DecodeError::BadShape("service provider name encoding"))?;
    Ok(ServiceProviderName {
        display_condition: raw[0],
        name,
    })
}

pub fn encode_spn(spn: &ServiceProviderName, file_len: usize) -> Result<Vec<u8>, CodecError> {
    if !spn.name.is_ascii() {
        return Err(ValidationError::Unsupported("non-ASCII service provider name").into());
    }
    let mut out = Vec::with_capacity(file_len);
    out.push(spn.display_condition);
    out.extend_from_slice(spn.name.as_bytes());
    fit_ff(&out, file_len)
}

/// Language indication: a list of 2-character codes.
pub fn decode_languages(raw: &[u8]) -> Result<Vec<String>, CodecError> {
    let mut out = Vec::new();
    for chunk in trim_ff(raw).chunks_exact(2) {
        if chunk == [0xff, 0xff] {
            continue;
        }
        let code = String::from_utf8(chunk.to_vec())
            .map_err(|_| DecodeError::BadShape("language code"))?;
        out.push(code.to_lowercase());
    }
    Ok(out)
}

pub fn encode_languages(languages: &[String], file_len: usize) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(file_len);
    for lang in languages {
        if lang.len() != 2 || !lang.is_ascii() {
            return Err(ValidationError::Unsupported("language code length").into());
        }
        out.extend_from_slice(lang.to_lowercase().as_bytes());
    }
    fit_ff(&out, file_len)
}

/// Group identifiers are opaque; reading trims the padding, writing pads.
pub fn decode_gid(raw: &[u8]) -> Vec<u8> {
    trim_ff(raw).to_vec()
}

pub fn encode_gid(gid: &[u8], file_len: usize) -> Result<Vec<u8>, CodecError> {
    fit_ff(gid, file_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spn_round_trip() {
        let spn = ServiceProviderName {
            display_condition: 0x01,
            name: "TestNet".to_string(),
        };
        let raw = encode_spn(&spn, 17).unwrap();
        assert_eq!(raw.len(), 17);
        assert_eq!(raw[0], 0x01);
        assert_eq!(decode_spn(&raw).unwrap(), spn);
    }

    #[test]
    fn spn_too_long_refused() {
        let spn = ServiceProviderName {
            display_condition: 0,
            name: "x".repeat(20),
        };
        assert!(matches!(
            encode_spn(&spn, 17),
            Err(CodecError::DoesNotFit { need: 21, have: 17 })
        ));
    }

    #[test]
    fn languages_round_trip() {
        let langs = vec!["en".to_string(), "ru".to_string()];
        let raw = encode_languages(&langs, 6).unwrap();
        assert_eq!(&raw, b"enru\xff\xff");
        assert_eq!(decode_languages(&raw).unwrap(), langs);
    }
}

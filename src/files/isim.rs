//! IMS identity files: IMPI, IMPU, the home domain, and P-CSCF addresses.
//!
//! The identity files wrap a UTF-8 string in a single inner TLV with tag
//! 0x80 and pad the remainder of the file with zeros, not 0xFF.

use super::CodecError;
use crate::tlv::{DecodeError, Tlv};

fn trim_zero(raw: &[u8]) -> &[u8] {
    let end = raw.iter().rposition(|&b| b != 0x00).map_or(0, |p| p + 1);
    &raw[..end]
}

/// Decode one 0x80-wrapped identity (IMPI, one IMPU record, or the domain).
pub fn decode_identity(raw: &[u8]) -> Result<Option<String>, CodecError> {
    let raw = trim_zero(raw);
    if raw.is_empty() || raw.iter().all(|&b| b == 0xff) {
        return Ok(None);
    }
    let (tlv, _) = Tlv::parse(raw)?;
    if tlv.tag != 0x80 {
        return Err(DecodeError::BadShape("IMS identity tag").into());
    }
    let s = String::from_utf8(tlv.value)
        .map_err(|_| DecodeError::BadShape("IMS identity encoding"))?;
    Ok(Some(s))
}

pub fn encode_identity(identity: &str, file_len: usize) -> Result<Vec<u8>, CodecError> {
    let tlv = Tlv::new(0x80, identity.as_bytes().to_vec());
    let encoded = tlv.encode();
    if encoded.len() > file_len {
        return Err(CodecError::DoesNotFit {
            need: encoded.len(),
            have: file_len,
        });
    }
    let mut out = encoded;
    out.resize(file_len, 0x00);
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PcscfAddress {
    Fqdn(String),
    Ipv4([u8; 4]),
    Ipv6([u8; 16]),
}

impl std::fmt::Display for PcscfAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PcscfAddress::Fqdn(name) => write!(f, "{}", name),
            PcscfAddress::Ipv4(a) => {
                write!(f, "{}.{}.{}.{}", a[0], a[1], a[2], a[3])
            }
            PcscfAddress::Ipv6(a) => {
                write!(f, "{}", std::net::Ipv6Addr::from(*a))
            }
        }
    }
}

/// P-CSCF record: an address-type byte, then a TLV-wrapped name or raw
/// address octets.
pub fn decode_pcscf(raw: &[u8]) -> Result<Option<PcscfAddress>, CodecError> {
    // Trimming only decides emptiness; the address slices below must see
    // the untrimmed bytes, a raw address may end in zero
    if trim_zero(super::trim_ff(raw)).is_empty() {
        return Ok(None);
    }
    match raw[0] {
        0x00 => {
            let (tlv, _) = Tlv::parse(&raw[1..])?;
            if tlv.tag != 0x80 {
                return Err(DecodeError::BadShape("P-CSCF name tag").into());
            }
            let name = String::from_utf8(tlv.value)
                .map_err(|_| DecodeError::BadShape("P-CSCF name encoding"))?;
            Ok(Some(PcscfAddress::Fqdn(name)))
        }
        0x01 => {
            let addr: [u8; 4] = raw
                .get(1..5)
                .ok_or(DecodeError::BadShape("P-CSCF IPv4 address"))?
                .try_into()
                .unwrap();
            Ok(Some(PcscfAddress::Ipv4(addr)))
        }
        0x02 => {
            let addr: [u8; 16] = raw
                .get(1..17)
                .ok_or(DecodeError::BadShape("P-CSCF IPv6 address"))?
                .try_into()
                .unwrap();
            Ok(Some(PcscfAddress::Ipv6(addr)))
        }
        _ => Err(DecodeError::BadShape("P-CSCF address type").into()),
    }
}

pub fn encode_pcscf(address: &PcscfAddress, file_len: usize) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(file_len);
    match address {
        PcscfAddress::Fqdn(name) => {
            out.push(0x00);
            Tlv::new(0x80, name.as_bytes().to_vec()).encode_into(&mut out);
        }
        PcscfAddress::Ipv4(a) => {
            out.push(0x01);
            out.extend_from_slice(a);
        }
        PcscfAddress::Ipv6(a) => {
            out.push(0x02);
            out.extend_from_slice(a);
        }
    }
    if out.len() > file_len {
        return Err(CodecError::DoesNotFit {
            need: out.len(),
            have: file_len,
        });
    }
    out.resize(file_len, 0x00);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_round_trip() {
        let impi = "user@ims.mnc088.mcc250.3gppnetwork.org";
        let raw = encode_identity(impi, 64).unwrap();
        assert_eq!(raw.len(), 64);
        assert_eq!(raw[0], 0x80);
        assert_eq!(raw[1] as usize, impi.len());
        assert_eq!(raw[raw.len() - 1], 0x00);
        assert_eq!(decode_identity(&raw).unwrap().unwrap(), impi);
    }

    #[test]
    fn empty_identity_is_none() {
        assert_eq!(decode_identity(&[0x00; 16]).unwrap(), None);
        assert_eq!(decode_identity(&[]).unwrap(), None);
    }

    #[test]
    fn identity_too_long_refused() {
        assert!(encode_identity("x".repeat(64).as_str(), 16).is_err());
    }

    #[test]
    fn pcscf_fqdn_round_trip() {
        let addr = PcscfAddress::Fqdn("pcscf.ims.example.org".to_string());
        let raw = encode_pcscf(&addr, 40).unwrap();
        assert_eq!(raw[0], 0x00);
        assert_eq!(decode_pcscf(&raw).unwrap().unwrap(), addr);
    }

    #[test]
    fn pcscf_ipv4_round_trip() {
        let addr = PcscfAddress::Ipv4([10, 0, 0, 1]);
        let raw = encode_pcscf(&addr, 20).unwrap();
        assert_eq!(raw[..5], [0x01, 10, 0, 0, 1]);
        assert_eq!(decode_pcscf(&raw).unwrap().unwrap(), addr);
        assert_eq!(addr.to_string(), "10.0.0.1");
    }

    #[test]
    fn pcscf_ipv6_display() {
        let addr = PcscfAddress::Ipv6([0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(addr.to_string(), "2001:db8::1");
    }
}

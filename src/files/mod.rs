//! Decoders and encoders for the elementary files this toolkit understands.
//!
//! Each decoder takes the raw bytes of one transparent file or one record
//! and produces a structured value; each encoder takes the structured value
//! and a target length, producing a 0xFF-padded byte string (the on-card
//! erased state). All of them are pure; the navigator does the card I/O.

pub mod admin;
pub mod ecc;
pub mod iccid;
pub mod imsi;
pub mod isim;
pub mod loci;
pub mod msisdn;
pub mod plmn;
pub mod service_table;
pub mod smsp;
pub mod text;

use std::error::Error;
use std::fmt::Display;

use crate::bcd::BcdError;
use crate::errors::ValidationError;
use crate::tlv::DecodeError;

/// Elementary file identifiers, grouped by where they live.
pub mod ef {
    // Under the master directory
    pub const DIR: u16 = 0x2f00;
    pub const ICCID: u16 = 0x2fe2;

    // Under the USIM application
    pub const LI: u16 = 0x6f05;
    pub const ARR: u16 = 0x6f06;
    pub const IMSI: u16 = 0x6f07;
    pub const UST: u16 = 0x6f38;
    pub const ACC: u16 = 0x6f78;
    pub const SPN: u16 = 0x6f46;
    pub const AD: u16 = 0x6fad;
    pub const ECC: u16 = 0x6fb7;
    pub const FPLMN: u16 = 0x6f7b;
    pub const LOCI: u16 = 0x6f7e;
    pub const PSLOCI: u16 = 0x6f73;
    pub const EPSLOCI: u16 = 0x6fe3;
    pub const PLMN_W_ACT: u16 = 0x6f60;
    pub const OPLMN_W_ACT: u16 = 0x6f61;
    pub const HPLMN_W_ACT: u16 = 0x6f62;
    pub const MSISDN: u16 = 0x6f40;
    pub const SMSP: u16 = 0x6f42;
    pub const GID1: u16 = 0x6f3e;
    pub const GID2: u16 = 0x6f3f;

    // Under the ISIM application
    pub const IMPI: u16 = 0x6f02;
    pub const DOMAIN: u16 = 0x6f03;
    pub const IMPU: u16 = 0x6f04;
    pub const IST: u16 = 0x6f07;
    pub const PCSCF: u16 = 0x6f09;
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum CodecError {
    Bcd(BcdError),
    Decode(DecodeError),
    Validation(ValidationError),
    /// The value does not fit the target file or record length.
    DoesNotFit { need: usize, have: usize },
}

impl Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::Bcd(e) => e.fmt(f),
            CodecError::Decode(e) => e.fmt(f),
            CodecError::Validation(e) => e.fmt(f),
            CodecError::DoesNotFit { need, have } => {
                write!(f, "Encoded value needs {} bytes, file has {}", need, have)
            }
        }
    }
}

impl Error for CodecError {}

impl From<BcdError> for CodecError {
    fn from(e: BcdError) -> Self {
        CodecError::Bcd(e)
    }
}

impl From<DecodeError> for CodecError {
    fn from(e: DecodeError) -> Self {
        CodecError::Decode(e)
    }
}

impl From<ValidationError> for CodecError {
    fn from(e: ValidationError) -> Self {
        CodecError::Validation(e)
    }
}

/// Strip the 0xFF erased-state padding off the end of a file body.
pub fn trim_ff(raw: &[u8]) -> &[u8] {
    let end = raw
        .iter()
        .rposition(|&b| b != 0xff)
        .map_or(0, |p| p + 1);
    &raw[..end]
}

/// Fit `data` into `len` bytes of 0xFF padding, refusing to truncate.
pub fn fit_ff(data: &[u8], len: usize) -> Result<Vec<u8>, CodecError> {
    if data.len() > len {
        return Err(CodecError::DoesNotFit {
            need: data.len(),
            have: len,
        });
    }
    Ok(crate::util::pad_ff(data, len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_and_fit() {
        assert_eq!(trim_ff(&[0x01, 0xff, 0xff]), &[0x01]);
        assert_eq!(trim_ff(&[0xff, 0xff]), &[] as &[u8]);
        assert_eq!(fit_ff(&[1], 3).unwrap(), vec![1, 0xff, 0xff]);
        assert!(fit_ff(&[1, 2, 3, 4], 3).is_err());
    }
}

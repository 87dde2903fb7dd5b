//! The profile container: one outer tag-length-value holding an ordered
//! list of typed elements, each a tagged container from a fixed catalog.
//!
//! Elements keep their raw value bytes; known sub-fields are decoded on
//! demand and rewritten surgically, so an untouched profile re-emits byte
//! for byte.

pub mod build;
pub mod text;
pub mod validate;

use std::fmt;
use std::fmt::Display;

use crate::tlv::{self, DecodeError, Tlv};

/// The outer container tag.
pub const PROFILE_TAG: u16 = 0xbf20;

/// Element catalog. Unknown tags are preserved, not dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Header,
    MasterFile,
    PinCodes,
    PukCodes,
    AkaParams,
    UsimApp,
    IsimApp,
    GenericFile,
    SecurityDomain,
    Application,
    End,
    Unknown(u16),
}

impl ElementKind {
    pub fn tag(self) -> u16 {
        match self {
            ElementKind::Header => 0xa0,
            ElementKind::MasterFile => 0xa1,
            ElementKind::PinCodes => 0xa2,
            ElementKind::PukCodes => 0xa3,
            ElementKind::AkaParams => 0xa4,
            ElementKind::UsimApp => 0xa5,
            ElementKind::IsimApp => 0xa6,
            ElementKind::GenericFile => 0xa7,
            ElementKind::SecurityDomain => 0xa8,
            ElementKind::Application => 0xa9,
            ElementKind::End => 0xaf,
            ElementKind::Unknown(tag) => tag,
        }
    }

    pub fn from_tag(tag: u16) -> Self {
        match tag {
            0xa0 => ElementKind::Header,
            0xa1 => ElementKind::MasterFile,
            0xa2 => ElementKind::PinCodes,
            0xa3 => ElementKind::PukCodes,
            0xa4 => ElementKind::AkaParams,
            0xa5 => ElementKind::UsimApp,
            0xa6 => ElementKind::IsimApp,
            0xa7 => ElementKind::GenericFile,
            0xa8 => ElementKind::SecurityDomain,
            0xa9 => ElementKind::Application,
            0xaf => ElementKind::End,
            other => ElementKind::Unknown(other),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementKind::Header => "header",
            ElementKind::MasterFile => "masterFile",
            ElementKind::PinCodes => "pinCodes",
            ElementKind::PukCodes => "pukCodes",
            ElementKind::AkaParams => "akaParameters",
            ElementKind::UsimApp => "usimApplication",
            ElementKind::IsimApp => "isimApplication",
            ElementKind::GenericFile => "genericFile",
            ElementKind::SecurityDomain => "securityDomain",
            ElementKind::Application => "application",
            ElementKind::End => "end",
            ElementKind::Unknown(_) => "unknown",
        }
    }
}

impl Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementKind::Unknown(tag) => write!(f, "unknown#{:02x}", tag),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// Sub-field tags inside the elements that this toolkit edits.
pub mod field {
    /// Header: version, ICCID, profile name.
    pub const HDR_VERSION: u16 = 0x80;
    pub const HDR_ICCID: u16 = 0x5a;
    pub const HDR_NAME: u16 = 0x81;

    /// AKA parameters: algorithm id, K, OPc, OP, MNC length.
    pub const AKA_ALGORITHM: u16 = 0x80;
    pub const AKA_K: u16 = 0x81;
    pub const AKA_OPC: u16 = 0x82;
    pub const AKA_OP: u16 = 0x83;

    pub const ALG_MILENAGE: u8 = 0x01;
    pub const ALG_TUAK: u8 = 0x02;

    /// PIN and PUK code elements share the slot numbering.
    pub const CODE_SLOT1: u16 = 0x81;
    pub const CODE_SLOT2: u16 = 0x82;
    pub const CODE_ADM1: u16 = 0x8a;

    /// USIM application template.
    pub const USIM_AID: u16 = 0x4f;
    pub const USIM_IMSI: u16 = 0x80;
    pub const USIM_MNC_LEN: u16 = 0x81;

    /// ISIM application template; IMPU and P-CSCF repeat.
    pub const ISIM_AID: u16 = 0x4f;
    pub const ISIM_IMPI: u16 = 0x80;
    pub const ISIM_DOMAIN: u16 = 0x81;
    pub const ISIM_IMPU: u16 = 0x82;
    pub const ISIM_PCSCF: u16 = 0x83;

    /// PE-Application: package AID, load block, instance descriptors.
    pub const APP_AID: u16 = 0x4f;
    pub const APP_LOAD_BLOCK: u16 = 0xc4;
    pub const APP_INSTANCE: u16 = 0xe7;
    pub const INST_AID: u16 = 0x4f;
    pub const INST_PARAMS: u16 = 0xc9;
    pub const INST_APDU: u16 = 0x86;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileElement {
    pub kind: ElementKind,
    /// The element's value bytes, exactly as on the wire.
    pub raw: Vec<u8>,
}

impl ProfileElement {
    pub fn new(kind: ElementKind, raw: impl Into<Vec<u8>>) -> Self {
        ProfileElement {
            kind,
            raw: raw.into(),
        }
    }

    /// Parse the value as sub-TLVs.
    pub fn fields(&self) -> Result<Vec<Tlv>, DecodeError> {
        Tlv::parse_all(&self.raw)
    }

    pub fn field(&self, tag: u16) -> Option<Vec<u8>> {
        self.fields()
            .ok()
            .and_then(|fields| tlv::find(&fields, tag).map(|t| t.value.clone()))
    }

    /// Replace the first sub-TLV with `tag` (or append one), leaving every
    /// other field byte-identical.
    pub fn set_field(&mut self, tag: u16, value: Vec<u8>) -> Result<(), DecodeError> {
        let mut fields = self.fields()?;
        match fields.iter_mut().find(|t| t.tag == tag) {
            Some(existing) => existing.value = value,
            None => fields.push(Tlv::new(tag, value)),
        }
        let mut raw = Vec::with_capacity(self.raw.len());
        for field in &fields {
            field.encode_into(&mut raw);
        }
        self.raw = raw;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub elements: Vec<ProfileElement>,
}

impl Profile {
    /// Consume one outer TLV covering the whole input; anything after it is
    /// an error, not data to ignore.
    pub fn parse(raw: &[u8]) -> Result<Profile, DecodeError> {
        let (outer, consumed) = Tlv::parse(raw)?;
        if consumed != raw.len() {
            return Err(DecodeError::BadShape("bytes after the profile container"));
        }
        if outer.tag != PROFILE_TAG {
            return Err(DecodeError::BadShape("profile container tag"));
        }
        let elements = outer
            .children()?
            .into_iter()
            .map(|t| ProfileElement {
                kind: ElementKind::from_tag(t.tag),
                raw: t.value,
            })
            .collect();
        Ok(Profile { elements })
    }

    /// Serialize; lengths use the extended form whenever a value exceeds
    /// 127 bytes, so an untouched parse → emit is byte-identical.
    pub fn emit(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for element in &self.elements {
            tlv::write_tl(element.kind.tag(), element.raw.len(), &mut body);
            body.extend_from_slice(&element.raw);
        }
        let mut out = Vec::with_capacity(body.len() + 5);
        tlv::write_tl(PROFILE_TAG, body.len(), &mut out);
        out.extend_from_slice(&body);
        out
    }

    pub fn find(&self, kind: ElementKind) -> Option<&ProfileElement> {
        self.elements.iter().find(|e| e.kind == kind)
    }

    pub fn find_mut(&mut self, kind: ElementKind) -> Option<&mut ProfileElement> {
        self.elements.iter_mut().find(|e| e.kind == kind)
    }

    /// Positions of every element with the given kind, for the repeatable
    /// ones.
    pub fn positions(&self, kind: ElementKind) -> Vec<usize> {
        self.elements
            .iter()
            .enumerate()
            .filter(|(_, e)| e.kind == kind)
            .map(|(i, _)| i)
            .collect()
    }
}

#[cfg(test)]
pub(crate) fn sample_profile() -> Profile {
    use crate::files::iccid;

    let mut header = ProfileElement::new(ElementKind::Header, vec![]);
    header.set_field(field::HDR_VERSION, vec![2, 1]).unwrap();
    header
        .set_field(
            field::HDR_ICCID,
            crate::bcd::encode(&iccid::with_luhn("8901410321111851072")).unwrap(),
        )
        .unwrap();
    header
        .set_field(field::HDR_NAME, b"TestProfile".to_vec())
        .unwrap();

    let mf = ProfileElement::new(ElementKind::MasterFile, vec![0x83, 0x02, 0x3f, 0x00]);

    let mut pins = ProfileElement::new(ElementKind::PinCodes, vec![]);
    pins.set_field(field::CODE_SLOT1, b"1234".to_vec()).unwrap();
    let mut puks = ProfileElement::new(ElementKind::PukCodes, vec![]);
    puks.set_field(field::CODE_SLOT1, b"12345678".to_vec())
        .unwrap();

    let mut aka = ProfileElement::new(ElementKind::AkaParams, vec![]);
    aka.set_field(field::AKA_ALGORITHM, vec![field::ALG_MILENAGE])
        .unwrap();
    aka.set_field(field::AKA_K, vec![0x11; 16]).unwrap();
    aka.set_field(field::AKA_OPC, vec![0x22; 16]).unwrap();

    let mut usim = ProfileElement::new(ElementKind::UsimApp, vec![]);
    usim.set_field(field::USIM_AID, crate::nav::AID_USIM.to_vec())
        .unwrap();
    usim.set_field(
        field::USIM_IMSI,
        crate::files::imsi::encode("250880000000003", 9).unwrap(),
    )
    .unwrap();

    // A large generic file forces the extended length form
    let generic = ProfileElement::new(ElementKind::GenericFile, vec![0x5a; 300]);

    let end = ProfileElement::new(ElementKind::End, vec![]);

    Profile {
        elements: vec![header, mf, pins, puks, aka, usim, generic, end],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_parse_round_trip_is_identical() {
        let profile = sample_profile();
        let first = profile.emit();
        let parsed = Profile::parse(&first).unwrap();
        assert_eq!(parsed, profile);
        let second = parsed.emit();
        assert_eq!(first, second);
    }

    #[test]
    fn parse_twice_yields_equal_element_lists() {
        let raw = sample_profile().emit();
        let once = Profile::parse(&raw).unwrap();
        let again = Profile::parse(&once.emit()).unwrap();
        assert_eq!(once.elements, again.elements);
    }

    #[test]
    fn unknown_elements_survive() {
        let mut profile = sample_profile();
        profile.elements.insert(
            1,
            ProfileElement::new(ElementKind::Unknown(0xba), vec![1, 2, 3]),
        );
        let raw = profile.emit();
        let parsed = Profile::parse(&raw).unwrap();
        assert_eq!(parsed.elements[1].kind, ElementKind::Unknown(0xba));
        assert_eq!(parsed.emit(), raw);
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut raw = sample_profile().emit();
        raw.push(0x00);
        assert!(Profile::parse(&raw).is_err());
    }

    #[test]
    fn set_field_preserves_other_fields() {
        let mut profile = sample_profile();
        let header = profile.find_mut(ElementKind::Header).unwrap();
        let name_before = header.field(field::HDR_NAME).unwrap();
        header
            .set_field(
                field::HDR_ICCID,
                crate::bcd::encode("89445035401580377107").unwrap(),
            )
            .unwrap();
        assert_eq!(header.field(field::HDR_NAME).unwrap(), name_before);
    }

    #[test]
    fn extended_length_used_for_large_values() {
        let raw = sample_profile().emit();
        // The 300-byte generic file forces an 0x82-form length somewhere
        assert!(raw.windows(2).any(|w| w[0] == 0x82 && w[1] == 0x01));
    }
}

//! Profile assembly: clone a template, apply targeted overrides, insert
//! application elements for applet bundles.

use super::field;
use super::{ElementKind, Profile, ProfileElement};
use crate::auth::Algorithm;
use crate::bcd;
use crate::files::{iccid, imsi, CodecError};
use crate::tlv::Tlv;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppletInstance {
    pub aid: Vec<u8>,
    pub install_params: Vec<u8>,
    /// Per-instance APDU sequences sent after install.
    pub apdus: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppletBundle {
    pub package_aid: Vec<u8>,
    /// The flattened load image.
    pub load_block: Vec<u8>,
    pub instances: Vec<AppletInstance>,
}

/// What `build` may change; None leaves the template's bytes alone.
#[derive(Debug, Clone, Default)]
pub struct ProfileOverrides {
    pub iccid: Option<String>,
    pub imsi: Option<String>,
    pub mnc_len: Option<u8>,
    pub algorithm: Option<Algorithm>,
    pub k: Option<Vec<u8>>,
    pub op: Option<Vec<u8>>,
    pub opc: Option<Vec<u8>>,
    pub pin1: Option<String>,
    pub puk1: Option<String>,
    pub pin2: Option<String>,
    pub puk2: Option<String>,
    pub adm1: Option<String>,
    pub impi: Option<String>,
    pub domain: Option<String>,
    pub impu: Vec<String>,
    pub pcscf: Vec<String>,
    pub applets: Vec<AppletBundle>,
}

fn encode_applet(bundle: &AppletBundle) -> ProfileElement {
    let mut raw = Vec::new();
    Tlv::new(field::APP_AID, bundle.package_aid.clone()).encode_into(&mut raw);
    Tlv::new(field::APP_LOAD_BLOCK, bundle.load_block.clone()).encode_into(&mut raw);
    for instance in &bundle.instances {
        let mut inst = Vec::new();
        Tlv::new(field::INST_AID, instance.aid.clone()).encode_into(&mut inst);
        Tlv::new(field::INST_PARAMS, instance.install_params.clone()).encode_into(&mut inst);
        for apdu in &instance.apdus {
            Tlv::new(field::INST_APDU, apdu.clone()).encode_into(&mut inst);
        }
        Tlv::new(field::APP_INSTANCE, inst).encode_into(&mut raw);
    }
    ProfileElement::new(ElementKind::Application, raw)
}

fn set_string_field(
    profile: &mut Profile,
    kind: ElementKind,
    tag: u16,
    value: &str,
) -> Result<(), CodecError> {
    let element = profile
        .find_mut(kind)
        .ok_or(crate::tlv::DecodeError::MissingTag(kind.tag()))?;
    element.set_field(tag, value.as_bytes().to_vec())?;
    Ok(())
}

/// Build a new profile from `template` with `overrides` applied. The
/// template is not consumed; unrelated bytes are preserved exactly.
pub fn build(template: &Profile, overrides: &ProfileOverrides) -> Result<Profile, CodecError> {
    let mut profile = template.clone();

    if let Some(iccid_str) = &overrides.iccid {
        if !iccid::luhn_valid(iccid_str) {
            return Err(crate::errors::ValidationError::BadLuhn(iccid_str.clone()).into());
        }
        let header = profile
            .find_mut(ElementKind::Header)
            .ok_or(crate::tlv::DecodeError::MissingTag(0xa0))?;
        header.set_field(field::HDR_ICCID, bcd::encode(iccid_str)?)?;
    }

    if let Some(imsi_str) = &overrides.imsi {
        let encoded = imsi::encode(imsi_str, 9)?;
        let usim = profile
            .find_mut(ElementKind::UsimApp)
            .ok_or(crate::tlv::DecodeError::MissingTag(0xa5))?;
        usim.set_field(field::USIM_IMSI, encoded)?;
    }

    if let Some(mnc_len) = overrides.mnc_len {
        if mnc_len != 2 && mnc_len != 3 {
            return Err(
                crate::errors::ValidationError::Unsupported("MNC length other than 2 or 3").into(),
            );
        }
        let usim = profile
            .find_mut(ElementKind::UsimApp)
            .ok_or(crate::tlv::DecodeError::MissingTag(0xa5))?;
        usim.set_field(field::USIM_MNC_LEN, vec![mnc_len])?;
    }

    if overrides.algorithm.is_some()
        || overrides.k.is_some()
        || overrides.op.is_some()
        || overrides.opc.is_some()
    {
        let aka = profile
            .find_mut(ElementKind::AkaParams)
            .ok_or(crate::tlv::DecodeError::MissingTag(0xa4))?;
        if let Some(algorithm) = overrides.algorithm {
            let id = match algorithm {
                Algorithm::Milenage => field::ALG_MILENAGE,
                Algorithm::Tuak => field::ALG_TUAK,
            };
            aka.set_field(field::AKA_ALGORITHM, vec![id])?;
        }
        if let Some(k) = &overrides.k {
            aka.set_field(field::AKA_K, k.clone())?;
        }
        if let Some(op) = &overrides.op {
            aka.set_field(field::AKA_OP, op.clone())?;
        }
        if let Some(opc) = &overrides.opc {
            aka.set_field(field::AKA_OPC, opc.clone())?;
        }
    }

    for (value, kind, tag) in [
        (&overrides.pin1, ElementKind::PinCodes, field::CODE_SLOT1),
        (&overrides.pin2, ElementKind::PinCodes, field::CODE_SLOT2),
        (&overrides.adm1, ElementKind::PinCodes, field::CODE_ADM1),
        (&overrides.puk1, ElementKind::PukCodes, field::CODE_SLOT1),
        (&overrides.puk2, ElementKind::PukCodes, field::CODE_SLOT2),
    ] {
        if let Some(code) = value {
            set_string_field(&mut profile, kind, tag, code)?;
        }
    }

    if overrides.impi.is_some()
        || overrides.domain.is_some()
        || !overrides.impu.is_empty()
        || !overrides.pcscf.is_empty()
    {
        let isim = profile
            .find_mut(ElementKind::IsimApp)
            .ok_or(crate::tlv::DecodeError::MissingTag(0xa6))?;
        if let Some(impi) = &overrides.impi {
            isim.set_field(field::ISIM_IMPI, impi.as_bytes().to_vec())?;
        }
        if let Some(domain) = &overrides.domain {
            isim.set_field(field::ISIM_DOMAIN, domain.as_bytes().to_vec())?;
        }
        // Repeated fields replace wholesale: drop old entries, append new
        if !overrides.impu.is_empty() || !overrides.pcscf.is_empty() {
            let mut fields = isim.fields()?;
            if !overrides.impu.is_empty() {
                fields.retain(|t| t.tag != field::ISIM_IMPU);
                for impu in &overrides.impu {
                    fields.push(Tlv::new(field::ISIM_IMPU, impu.as_bytes().to_vec()));
                }
            }
            if !overrides.pcscf.is_empty() {
                fields.retain(|t| t.tag != field::ISIM_PCSCF);
                for pcscf in &overrides.pcscf {
                    fields.push(Tlv::new(field::ISIM_PCSCF, pcscf.as_bytes().to_vec()));
                }
            }
            let mut raw = Vec::new();
            for f in &fields {
                f.encode_into(&mut raw);
            }
            isim.raw = raw;
        }
    }

    // Applet bundles go in front of the end marker
    if !overrides.applets.is_empty() {
        let end_index = profile
            .positions(ElementKind::End)
            .first()
            .copied()
            .unwrap_or(profile.elements.len());
        for (offset, bundle) in overrides.applets.iter().enumerate() {
            profile
                .elements
                .insert(end_index + offset, encode_applet(bundle));
        }
    }

    Ok(profile)
}

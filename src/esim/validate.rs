//! Structural validation of a profile: ordering, identifiers, key sizes,
//! code formats, applet shape. Produces separate error and warning streams
//! and an overall verdict; decoding never stops at the first finding.

use super::field;
use super::{ElementKind, Profile};
use crate::bcd;
use crate::files::iccid;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }
}

fn check_code(report: &mut ValidationReport, what: &str, code: &[u8], min: usize, max: usize) {
    match std::str::from_utf8(code) {
        Ok(s) if s.chars().all(|c| c.is_ascii_digit()) => {
            if !(min..=max).contains(&s.len()) {
                report.error(format!("{} must be {}..={} digits, got {}", what, min, max, s.len()));
            }
        }
        _ => report.error(format!("{} must be decimal digits", what)),
    }
}

fn check_apdu(report: &mut ValidationReport, index: usize, apdu: &[u8]) {
    if apdu.len() < 4 {
        report.error(format!(
            "applet instance {}: APDU shorter than the 4-byte header",
            index
        ));
        return;
    }
    // With a body present the length byte must account for it: Lc + data,
    // optionally one trailing Le byte
    if apdu.len() > 5 {
        let lc = apdu[4] as usize;
        let body = apdu.len() - 5;
        if lc != body && lc + 1 != body {
            report.error(format!(
                "applet instance {}: APDU length byte {} inconsistent with {} body bytes",
                index, lc, body
            ));
        }
    }
}

pub fn validate(profile: &Profile) -> ValidationReport {
    let mut report = ValidationReport::default();

    // Ordering: header first, master file second, end last
    match profile.elements.first() {
        Some(e) if e.kind == ElementKind::Header => {}
        _ => report.error("profile must start with the header element"),
    }
    match profile.elements.get(1) {
        Some(e) if e.kind == ElementKind::MasterFile => {}
        _ => report.error("the master-file element must follow the header"),
    }
    match profile.elements.last() {
        Some(e) if e.kind == ElementKind::End => {}
        _ => report.error("profile must finish with the end element"),
    }
    if profile.positions(ElementKind::Header).len() > 1 {
        report.error("more than one header element");
    }

    // ICCID
    if let Some(header) = profile.find(ElementKind::Header) {
        match header.field(field::HDR_ICCID) {
            Some(raw) => match bcd::decode(&raw) {
                Ok(digits) => {
                    if !(18..=20).contains(&digits.len()) {
                        report.error(format!("ICCID has {} digits", digits.len()));
                    } else if !iccid::luhn_valid(&digits) {
                        report.error(format!("ICCID {} fails the Luhn check", digits));
                    }
                }
                Err(e) => report.error(format!("ICCID is not BCD: {}", e)),
            },
            None => report.error("header carries no ICCID"),
        }
    }

    // IMSI
    if let Some(usim) = profile.find(ElementKind::UsimApp) {
        match usim.field(field::USIM_IMSI) {
            Some(raw) => match crate::files::imsi::decode(&raw) {
                Ok(digits) => {
                    if !(6..=15).contains(&digits.len()) {
                        report.error(format!("IMSI has {} digits", digits.len()));
                    }
                }
                Err(e) => report.error(format!("IMSI does not decode: {}", e)),
            },
            None => report.warn("USIM application carries no IMSI"),
        }
    }

    // Key material against the declared algorithm
    if let Some(aka) = profile.find(ElementKind::AkaParams) {
        let algorithm = aka
            .field(field::AKA_ALGORITHM)
            .and_then(|v| v.first().copied());
        let k = aka.field(field::AKA_K);
        let opc = aka.field(field::AKA_OPC);
        let op = aka.field(field::AKA_OP);
        match algorithm {
            Some(field::ALG_MILENAGE) => {
                match &k {
                    Some(k) if k.len() == 16 => {}
                    Some(k) => report.error(format!("Milenage K must be 16 bytes, got {}", k.len())),
                    None => report.error("no subscriber key in the AKA element"),
                }
                match (&opc, &op) {
                    (Some(v), _) | (None, Some(v)) if v.len() == 16 => {}
                    (Some(v), _) | (None, Some(v)) => report.error(format!(
                        "Milenage OP/OPc must be 16 bytes, got {}",
                        v.len()
                    )),
                    (None, None) => report.error("neither OP nor OPc in the AKA element"),
                }
            }
            Some(field::ALG_TUAK) => {
                match &k {
                    Some(k) if k.len() == 16 || k.len() == 32 => {}
                    Some(k) => {
                        report.error(format!("TUAK K must be 16 or 32 bytes, got {}", k.len()))
                    }
                    None => report.error("no subscriber key in the AKA element"),
                }
                match (&opc, &op) {
                    (Some(v), _) | (None, Some(v)) if v.len() == 32 => {}
                    (Some(v), _) | (None, Some(v)) => {
                        report.error(format!("TUAK TOP/TOPc must be 32 bytes, got {}", v.len()))
                    }
                    (None, None) => report.error("neither TOP nor TOPc in the AKA element"),
                }
            }
            Some(other) => report.error(format!("unknown algorithm id {}", other)),
            None => report.warn("AKA element declares no algorithm"),
        }
    } else {
        report.warn("no AKA element");
    }

    // PIN and PUK codes
    for (kind, what, min, max) in [
        (ElementKind::PinCodes, "PIN", 4, 8),
        (ElementKind::PukCodes, "PUK", 8, 8),
    ] {
        if let Some(element) = profile.find(kind) {
            for tag in [field::CODE_SLOT1, field::CODE_SLOT2] {
                if let Some(code) = element.field(tag) {
                    check_code(&mut report, what, &code, min, max);
                }
            }
        }
    }

    // Applications
    for position in profile.positions(ElementKind::Application) {
        let app = &profile.elements[position];
        match app.field(field::APP_AID) {
            Some(aid) if (5..=16).contains(&aid.len()) => {}
            Some(aid) => report.error(format!("applet AID of {} bytes", aid.len())),
            None => report.error("application element without a package AID"),
        }
        if app.field(field::APP_LOAD_BLOCK).is_none() {
            report.error("application element without a load block");
        }
        let Ok(fields) = app.fields() else {
            report.error("application element is not a TLV sequence");
            continue;
        };
        for inst in fields.iter().filter(|t| t.tag == field::APP_INSTANCE) {
            let Ok(inner) = inst.children() else {
                report.error("instance descriptor is not a TLV sequence");
                continue;
            };
            match crate::tlv::find(&inner, field::INST_AID) {
                Some(aid) if (5..=16).contains(&aid.value.len()) => {}
                Some(aid) => report.error(format!("instance AID of {} bytes", aid.value.len())),
                None => report.error("instance descriptor without an AID"),
            }
            for (index, apdu) in inner
                .iter()
                .filter(|t| t.tag == field::INST_APDU)
                .enumerate()
            {
                check_apdu(&mut report, index, &apdu.value);
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::esim::{sample_profile, ProfileElement};

    #[test]
    fn sample_profile_passes() {
        let report = validate(&sample_profile());
        assert!(report.passed(), "errors: {:?}", report.errors);
    }

    #[test]
    fn order_violations_reported() {
        let mut profile = sample_profile();
        profile.elements.rotate_left(1);
        let report = validate(&profile);
        assert!(!report.passed());
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("start with the header")));
    }

    #[test]
    fn missing_end_reported() {
        let mut profile = sample_profile();
        profile.elements.pop();
        let report = validate(&profile);
        assert!(report.errors.iter().any(|e| e.contains("end element")));
    }

    #[test]
    fn bad_luhn_reported() {
        let mut profile = sample_profile();
        let header = profile.find_mut(crate::esim::ElementKind::Header).unwrap();
        header
            .set_field(
                field::HDR_ICCID,
                crate::bcd::encode("89014103211118510721").unwrap(),
            )
            .unwrap();
        let report = validate(&profile);
        assert!(report.errors.iter().any(|e| e.contains("Luhn")));
    }

    #[test]
    fn wrong_key_length_reported() {
        let mut profile = sample_profile();
        let aka = profile
            .find_mut(crate::esim::ElementKind::AkaParams)
            .unwrap();
        aka.set_field(field::AKA_K, vec![0x11; 17]).unwrap();
        let report = validate(&profile);
        assert!(report.errors.iter().any(|e| e.contains("16 bytes")));
    }

    #[test]
    fn bad_pin_reported() {
        let mut profile = sample_profile();
        let pins = profile
            .find_mut(crate::esim::ElementKind::PinCodes)
            .unwrap();
        pins.set_field(field::CODE_SLOT1, b"12ab".to_vec()).unwrap();
        let report = validate(&profile);
        assert!(report.errors.iter().any(|e| e.contains("decimal digits")));
    }

    #[test]
    fn apdu_shape_checked() {
        let mut profile = sample_profile();
        let mut raw = Vec::new();
        crate::tlv::Tlv::new(field::APP_AID, vec![0xa0, 0, 0, 1, 2]).encode_into(&mut raw);
        crate::tlv::Tlv::new(field::APP_LOAD_BLOCK, vec![0u8; 8]).encode_into(&mut raw);
        let mut inst = Vec::new();
        crate::tlv::Tlv::new(field::INST_AID, vec![0xa0, 0, 0, 1, 2, 1]).encode_into(&mut inst);
        crate::tlv::Tlv::new(field::INST_PARAMS, vec![]).encode_into(&mut inst);
        crate::tlv::Tlv::new(field::INST_APDU, vec![0x00, 0xa4]).encode_into(&mut inst);
        crate::tlv::Tlv::new(field::INST_APDU, vec![0x00, 0xa4, 0x04, 0x00, 0x05, 0x01])
            .encode_into(&mut inst);
        crate::tlv::Tlv::new(field::APP_INSTANCE, inst).encode_into(&mut raw);
        let end = profile.elements.len() - 1;
        profile
            .elements
            .insert(end, ProfileElement::new(crate::esim::ElementKind::Application, raw));

        let report = validate(&profile);
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("shorter than the 4-byte header")));
        assert!(report.errors.iter().any(|e| e.contains("inconsistent")));
    }
}

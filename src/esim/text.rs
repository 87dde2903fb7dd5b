//! The human-readable profile form: one value-notation line per element,
//! `name 'HEX'H`, carrying every byte. Text → binary → text is idempotent
//! after the first conversion.

use super::{ElementKind, Profile, ProfileElement};
use crate::errors::ValidationError;
use crate::util::parse_hex;

/// Render a profile as text.
pub fn emit(profile: &Profile) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "-- eUICC profile, {} elements\n",
        profile.elements.len()
    ));
    for element in &profile.elements {
        let name = match element.kind {
            ElementKind::Unknown(tag) => format!("unknown#{:02x}", tag),
            kind => kind.name().to_string(),
        };
        out.push_str(&format!("{} '{}'H\n", name, hex::encode(&element.raw)));
    }
    out
}

fn kind_from_name(name: &str) -> Result<ElementKind, ValidationError> {
    if let Some(tag_hex) = name.strip_prefix("unknown#") {
        let tag = u16::from_str_radix(tag_hex, 16)
            .map_err(|_| ValidationError::Unsupported("unknown-element tag"))?;
        return Ok(ElementKind::Unknown(tag));
    }
    for kind in [
        ElementKind::Header,
        ElementKind::MasterFile,
        ElementKind::PinCodes,
        ElementKind::PukCodes,
        ElementKind::AkaParams,
        ElementKind::UsimApp,
        ElementKind::IsimApp,
        ElementKind::GenericFile,
        ElementKind::SecurityDomain,
        ElementKind::Application,
        ElementKind::End,
    ] {
        if kind.name() == name {
            return Ok(kind);
        }
    }
    Err(ValidationError::Unsupported("element name"))
}

/// Parse the text form back. Comment lines start with `--`; blank lines are
/// fine; everything else must be a `name 'HEX'H` line.
pub fn parse(text: &str) -> Result<Profile, ValidationError> {
    let mut elements = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("--") {
            continue;
        }
        let (name, rest) = line
            .split_once(' ')
            .ok_or(ValidationError::Unsupported("profile text line"))?;
        let rest = rest.trim();
        let hex_body = rest
            .strip_prefix('\'')
            .and_then(|r| r.strip_suffix("'H"))
            .ok_or(ValidationError::Unsupported("profile text value"))?;
        let raw = parse_hex(hex_body)?;
        elements.push(ProfileElement::new(kind_from_name(name)?, raw));
    }
    if elements.is_empty() {
        return Err(ValidationError::Unsupported("empty profile text"));
    }
    Ok(Profile { elements })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::esim::sample_profile;

    #[test]
    fn text_round_trip_is_byte_identical() {
        // binary → text → binary → text: the binaries and the texts match
        let profile = sample_profile();
        let first_binary = profile.emit();
        let text = emit(&Profile::parse(&first_binary).unwrap());
        let reparsed = parse(&text).unwrap();
        let second_binary = reparsed.emit();
        assert_eq!(first_binary, second_binary);
        assert_eq!(emit(&Profile::parse(&second_binary).unwrap()), text);
    }

    #[test]
    fn two_kilobyte_profile_round_trips() {
        let mut profile = sample_profile();
        let filler: Vec<u8> = (0..2048u32).map(|i| (i * 31 % 251) as u8).collect();
        let end = profile.elements.len() - 1;
        profile.elements.insert(
            end,
            ProfileElement::new(ElementKind::GenericFile, filler),
        );
        let binary = profile.emit();
        assert!(binary.len() > 2048);
        let text = emit(&Profile::parse(&binary).unwrap());
        let recompiled = parse(&text).unwrap().emit();
        assert_eq!(recompiled, binary);
    }

    #[test]
    fn unknown_elements_round_trip() {
        let mut profile = sample_profile();
        profile.elements.insert(
            2,
            ProfileElement::new(ElementKind::Unknown(0xba), vec![9, 8, 7]),
        );
        let text = emit(&profile);
        assert!(text.contains("unknown#ba '090807'H"));
        assert_eq!(parse(&text).unwrap(), profile);
    }

    #[test]
    fn comments_and_blanks_ignored() {
        let text = "-- a comment\n\nheader '80021234'H\nend ''H\n";
        let profile = parse(text).unwrap();
        assert_eq!(profile.elements.len(), 2);
        assert_eq!(profile.elements[0].kind, ElementKind::Header);
        assert_eq!(profile.elements[1].raw.len(), 0);
    }

    #[test]
    fn malformed_lines_refused() {
        assert!(parse("header 80021234\n").is_err());
        assert!(parse("bogus '00'H\n").is_err());
        assert!(parse("").is_err());
    }
}

//! PIN and admin-key presentation.
//!
//! Successful presentations are cached inside the session for the power
//! cycle. PIN state survives a SELECT into another application, admin keys
//! often do not, so the navigator replays the cached admin keys after every
//! application change and absorbs individual failures.

use log::warn;

use crate::errors::{CardError, ProtocolError, ValidationError};
use crate::exchange::{exchange, ApduCommand, CardTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Credential {
    Pin1,
    Pin2,
    UniversalPin,
    /// Admin key 1..=5
    Adm(u8),
}

impl Credential {
    /// VERIFY key reference.
    pub fn reference(self) -> u8 {
        match self {
            Credential::Pin1 => 0x01,
            Credential::Pin2 => 0x81,
            Credential::UniversalPin => 0x11,
            Credential::Adm(n) => 0x09 + n,
        }
    }

    pub fn is_admin(self) -> bool {
        matches!(self, Credential::Adm(_))
    }
}

impl std::fmt::Display for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Pin1 => write!(f, "PIN 1"),
            Credential::Pin2 => write!(f, "PIN 2"),
            Credential::UniversalPin => write!(f, "universal PIN"),
            Credential::Adm(n) => write!(f, "ADM {}", n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Verified,
    /// 63 Cx: the card refused the value and reports x attempts left. Soft
    /// unless the caller asked for strict mode.
    AttemptsRemaining(u8),
}

/// Pad a PIN or admin value with 0xFF to the 8 bytes VERIFY wants.
pub fn pad_credential(value: &[u8]) -> Result<[u8; 8], ValidationError> {
    if value.is_empty() || value.len() > 8 {
        return Err(ValidationError::LengthOutOfRange {
            what: "credential value",
            min: 1,
            max: 8,
            got: value.len(),
        });
    }
    let mut padded = [0xffu8; 8];
    padded[..value.len()].copy_from_slice(value);
    Ok(padded)
}

/// A PIN given as its decimal digits.
pub fn pin_from_str(s: &str) -> Result<[u8; 8], ValidationError> {
    if !s.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::NotDigits("PIN"));
    }
    pad_credential(s.as_bytes())
}

/// Admin keys come either as up to 8 decimal digits (presented as ASCII) or
/// as 16 hex digits (presented raw).
pub fn adm_from_str(s: &str) -> Result<[u8; 8], ValidationError> {
    if s.len() <= 8 && s.chars().all(|c| c.is_ascii_digit()) {
        pad_credential(s.as_bytes())
    } else {
        let raw = crate::util::parse_hex_exact(s, 8)?;
        pad_credential(&raw)
    }
}

/// Present one credential. A 63 Cx answer is a soft outcome unless `strict`;
/// nothing here ever retries, so the attempt counter moves at most once per
/// call the caller consented to.
pub fn present(
    transport: &mut dyn CardTransport,
    cla: u8,
    credential: Credential,
    value: &[u8; 8],
    strict: bool,
) -> Result<PresentOutcome, CardError> {
    let cmd = ApduCommand::verify(cla, credential.reference(), value);
    let (_, sw) = exchange(transport, &cmd)?;
    match sw {
        0x9000 => Ok(PresentOutcome::Verified),
        sw if sw & 0xfff0 == 0x63c0 => {
            let remaining = (sw & 0x000f) as u8;
            if strict {
                Err(CardError::Protocol(ProtocolError { sw, ins: 0x20 }))
            } else {
                warn!(
                    "{} rejected, {} attempts remaining",
                    credential, remaining
                );
                Ok(PresentOutcome::AttemptsRemaining(remaining))
            }
        }
        sw => Err(CardError::Protocol(ProtocolError { sw, ins: 0x20 })),
    }
}

/// Presentation history for one power cycle, in order.
#[derive(Debug, Default, Clone)]
pub struct CredentialCache {
    presented: Vec<(Credential, [u8; 8])>,
}

impl CredentialCache {
    pub fn record(&mut self, credential: Credential, value: [u8; 8]) {
        self.presented.retain(|(c, _)| *c != credential);
        self.presented.push((credential, value));
    }

    pub fn value_for(&self, credential: Credential) -> Option<&[u8; 8]> {
        self.presented
            .iter()
            .find(|(c, _)| *c == credential)
            .map(|(_, v)| v)
    }

    pub fn admin_keys(&self) -> impl Iterator<Item = (Credential, &[u8; 8])> {
        self.presented
            .iter()
            .filter(|(c, _)| c.is_admin())
            .map(|(c, v)| (*c, v))
    }

    pub fn is_empty(&self) -> bool {
        self.presented.is_empty()
    }

    pub fn clear(&mut self) {
        self.presented.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testcard::MockCard;

    #[test]
    fn references() {
        assert_eq!(Credential::Pin1.reference(), 0x01);
        assert_eq!(Credential::UniversalPin.reference(), 0x11);
        assert_eq!(Credential::Adm(1).reference(), 0x0a);
        assert_eq!(Credential::Adm(5).reference(), 0x0e);
    }

    #[test]
    fn padding() {
        assert_eq!(
            pin_from_str("1234").unwrap(),
            [0x31, 0x32, 0x33, 0x34, 0xff, 0xff, 0xff, 0xff]
        );
        assert!(pin_from_str("12a4").is_err());
        assert_eq!(
            adm_from_str("4444444444444444").unwrap(),
            [0x44; 8]
        );
        assert_eq!(
            adm_from_str("55555555").unwrap(),
            [0x35; 8]
        );
    }

    #[test]
    fn soft_failure_reports_attempts() {
        let mut card = MockCard::new(vec![(
            [
                vec![0x00, 0x20, 0x00, 0x01, 0x08],
                vec![0x31, 0x32, 0x33, 0x34, 0xff, 0xff, 0xff, 0xff],
            ]
            .concat(),
            vec![0x63, 0xc2],
        )]);
        let value = pin_from_str("1234").unwrap();
        let outcome = present(&mut card, 0x00, Credential::Pin1, &value, false).unwrap();
        assert_eq!(outcome, PresentOutcome::AttemptsRemaining(2));
    }

    #[test]
    fn strict_mode_turns_soft_failure_into_error() {
        let mut card = MockCard::new(vec![(
            [
                vec![0x00, 0x20, 0x00, 0x01, 0x08],
                vec![0x31, 0x32, 0x33, 0x34, 0xff, 0xff, 0xff, 0xff],
            ]
            .concat(),
            vec![0x63, 0xc2],
        )]);
        let value = pin_from_str("1234").unwrap();
        let err = present(&mut card, 0x00, Credential::Pin1, &value, true).unwrap_err();
        assert!(matches!(
            err,
            CardError::Protocol(ProtocolError { sw: 0x63c2, .. })
        ));
    }

    #[test]
    fn cache_keeps_presentation_order_and_dedupes() {
        let mut cache = CredentialCache::default();
        cache.record(Credential::Pin1, [1; 8]);
        cache.record(Credential::Adm(1), [2; 8]);
        cache.record(Credential::Adm(4), [3; 8]);
        cache.record(Credential::Adm(1), [9; 8]);
        let admins: Vec<_> = cache.admin_keys().collect();
        assert_eq!(admins.len(), 2);
        assert_eq!(admins[0].0, Credential::Adm(4));
        assert_eq!(admins[1], (Credential::Adm(1), &[9u8; 8]));
        assert_eq!(cache.value_for(Credential::Pin1), Some(&[1u8; 8]));
    }
}

//! Access-rule provisioning: push one rule entry to the on-card rule
//! application over the secure channel.

use log::debug;

use crate::errors::{CardError, ProtocolError, ValidationError};
use crate::exchange::{ApduCommand, CardTransport};
use crate::scp::SecureChannel;
use crate::tlv::Tlv;

/// One rule: which device application (by certificate hash) may talk to
/// which card application, and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AramRule {
    /// Target application; None covers every application.
    pub target_aid: Option<Vec<u8>>,
    /// SHA-1 (20) or SHA-256 (32) certificate hash of the device app.
    pub hash: Vec<u8>,
    /// 8-byte permission bitmask value, stored as given.
    pub permission: Option<Vec<u8>>,
    /// One-byte APDU access rule (0x01 = always).
    pub apdu_rule: u8,
}

impl AramRule {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.hash.len() != 20 && self.hash.len() != 32 {
            return Err(ValidationError::WrongLength {
                what: "certificate hash",
                expected: 20,
                got: self.hash.len(),
            });
        }
        if let Some(aid) = &self.target_aid {
            if !(5..=16).contains(&aid.len()) {
                return Err(ValidationError::LengthOutOfRange {
                    what: "target AID",
                    min: 5,
                    max: 16,
                    got: aid.len(),
                });
            }
        }
        if let Some(p) = &self.permission {
            if p.len() != 8 {
                return Err(ValidationError::WrongLength {
                    what: "permission value",
                    expected: 8,
                    got: p.len(),
                });
            }
        }
        Ok(())
    }

    /// `E2 { E1 { 4F aid, C1 hash }, E3 { D0 rule, DB permission } }`.
    pub fn encode(&self) -> Vec<u8> {
        let mut reference = Vec::new();
        if let Some(aid) = &self.target_aid {
            Tlv::new(0x4f, aid.clone()).encode_into(&mut reference);
        }
        Tlv::new(0xc1, self.hash.clone()).encode_into(&mut reference);

        let mut rule = Vec::new();
        Tlv::new(0xd0, vec![self.apdu_rule]).encode_into(&mut rule);
        if let Some(p) = &self.permission {
            Tlv::new(0xdb, p.clone()).encode_into(&mut rule);
        }

        let mut body = Vec::new();
        Tlv::new(0xe1, reference).encode_into(&mut body);
        Tlv::new(0xe3, rule).encode_into(&mut body);
        Tlv::new(0xe2, body).encode()
    }
}

/// STORE DATA with a small set of P1 hints; rule applications disagree on
/// which block coding they expect.
pub fn store_rule<T: CardTransport>(
    channel: &mut SecureChannel<'_, T>,
    rule: &AramRule,
) -> Result<(), CardError> {
    rule.validate().map_err(CardError::Validation)?;
    let payload = rule.encode();
    let mut last = ProtocolError { sw: 0x6a86, ins: 0xe2 };
    for p1 in [0x80u8, 0x90, 0xa0] {
        let cmd = ApduCommand::new(0x80, 0xe2, p1, 0x00, payload.clone(), 0);
        let (_, sw) = channel.wrap_and_send(&cmd)?;
        match sw {
            0x9000 => return Ok(()),
            0x6a86 | 0x6985 | 0x6d00 => {
                debug!("store with P1 0x{:02x} refused (0x{:04x})", p1, sw);
                last = ProtocolError { sw, ins: 0xe2 };
            }
            sw => return Err(CardError::Protocol(ProtocolError { sw, ins: 0xe2 })),
        }
        if !channel.is_open() {
            break;
        }
    }
    Err(CardError::Protocol(last))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_nests_the_dos() {
        let rule = AramRule {
            target_aid: Some(vec![0xa0, 0x00, 0x00, 0x01, 0x51]),
            hash: vec![0xaa; 20],
            permission: None,
            apdu_rule: 0x01,
        };
        let encoded = rule.encode();
        let (outer, _) = Tlv::parse(&encoded).unwrap();
        assert_eq!(outer.tag, 0xe2);
        let inner = outer.children().unwrap();
        assert_eq!(inner[0].tag, 0xe1);
        assert_eq!(inner[1].tag, 0xe3);
        let reference = inner[0].children().unwrap();
        assert_eq!(reference[0].tag, 0x4f);
        assert_eq!(reference[1].tag, 0xc1);
        assert_eq!(reference[1].value.len(), 20);
    }

    #[test]
    fn validation() {
        let mut rule = AramRule {
            target_aid: None,
            hash: vec![0xaa; 32],
            permission: Some(vec![0; 8]),
            apdu_rule: 0x01,
        };
        assert!(rule.validate().is_ok());
        rule.hash = vec![0xaa; 21];
        assert!(rule.validate().is_err());
        rule.hash = vec![0xaa; 20];
        rule.target_aid = Some(vec![1, 2]);
        assert!(rule.validate().is_err());
    }
}

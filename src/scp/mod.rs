//! The GlobalPlatform secure channel.
//!
//! Two wire variants, chosen from the INITIALIZE UPDATE response: the
//! triple-DES variant with a retail-MAC chain, and the AES variant with a
//! CMAC chain. A [`SecureChannel`] mutably borrows the session for its whole
//! life, so no plain SELECT can slip past it and silently kill the channel
//! on the card; invalidation by status word is tracked in the object.

pub mod scp02;
pub mod scp03;

use log::{debug, info, warn};
use rand::Rng;

use crate::errors::{CardError, CryptoError, ProtocolError, ValidationError};
use crate::exchange::{ApduCommand, CardTransport};
use crate::nav::Session;

/// Issuer security domain selected when the caller does not override.
pub const DEFAULT_SD_AID: &[u8] = &[0xa0, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScpVariant {
    Scp02,
    Scp03,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityLevel {
    /// Command MAC only.
    Mac,
    /// Command MAC plus command encryption.
    MacEnc,
}

impl SecurityLevel {
    fn p1(self) -> u8 {
        match self {
            SecurityLevel::Mac => 0x01,
            SecurityLevel::MacEnc => 0x03,
        }
    }
}

impl std::str::FromStr for SecurityLevel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mac" => Ok(SecurityLevel::Mac),
            "enc" | "mac+enc" | "macenc" => Ok(SecurityLevel::MacEnc),
            // The response-MAC mode of the wire format is deliberately not
            // negotiated
            _ => Err(ValidationError::Unsupported("security level")),
        }
    }
}

/// The static ENC/MAC/DEK triple, 16 bytes each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticKeys {
    pub enc: [u8; 16],
    pub mac: [u8; 16],
    pub dek: [u8; 16],
}

impl StaticKeys {
    pub fn new(enc: [u8; 16], mac: [u8; 16], dek: [u8; 16]) -> Self {
        StaticKeys { enc, mac, dek }
    }

    /// Convenience single-value mode: ENC = MAC = DEK.
    pub fn from_psk(key: [u8; 16]) -> Self {
        StaticKeys {
            enc: key,
            mac: key,
            dek: key,
        }
    }

    pub fn from_hex(enc: &str, mac: &str, dek: &str) -> Result<Self, ValidationError> {
        let parse = |s: &str| -> Result<[u8; 16], ValidationError> {
            Ok(crate::util::parse_hex_exact(s, 16)?.try_into().unwrap())
        };
        Ok(StaticKeys {
            enc: parse(enc)?,
            mac: parse(mac)?,
            dek: parse(dek)?,
        })
    }
}

/// One candidate for the auto-probe.
#[derive(Debug, Clone)]
pub struct ProbeCandidate {
    pub label: String,
    pub keys: StaticKeys,
    pub kvn: u8,
    pub sd_aid: Option<Vec<u8>>,
}

enum SessionKeys {
    Scp02 {
        s_enc: Vec<u8>,
        s_mac: Vec<u8>,
        s_dek: Vec<u8>,
    },
    Scp03 {
        s_enc: Vec<u8>,
        s_mac: Vec<u8>,
    },
}

/// An open secure channel. Dropping it (or `close`) releases the session;
/// the on-card security state ends with the next reset or plain SELECT.
pub struct SecureChannel<'a, T: CardTransport> {
    session: &'a mut Session<T>,
    variant: ScpVariant,
    level: SecurityLevel,
    keys: SessionKeys,
    /// Retail-MAC ICV (first 8 bytes) or CMAC chaining value, zero at open.
    mac_chain: [u8; 16],
    /// Encryption block counter for the AES variant.
    enc_counter: u32,
    /// The sequence counter exchanged during key agreement.
    pub sequence_counter: u16,
    open: bool,
}

impl<'a, T: CardTransport> std::fmt::Debug for SecureChannel<'a, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("variant", &self.variant)
            .field("level", &self.level)
            .field("sequence_counter", &self.sequence_counter)
            .field("open", &self.open)
            .finish()
    }
}

struct InitUpdateResponse {
    variant: ScpVariant,
    key_info: (u8, u8),
    /// Sequence counter and card challenge for the DES variant (8 bytes),
    /// the bare 8-byte challenge for AES.
    challenge_context: Vec<u8>,
    card_cryptogram: [u8; 8],
    sequence_counter: u16,
}

fn parse_init_update(raw: &[u8]) -> Result<InitUpdateResponse, CardError> {
    if raw.len() < 28 {
        return Err(CardError::Decode(crate::tlv::DecodeError::BadShape(
            "initialize update response",
        )));
    }
    let key_info = (raw[10], raw[11]);
    match raw[11] {
        0x02 => Ok(InitUpdateResponse {
            variant: ScpVariant::Scp02,
            key_info,
            challenge_context: raw[12..20].to_vec(),
            card_cryptogram: raw[20..28].try_into().unwrap(),
            sequence_counter: u16::from_be_bytes([raw[12], raw[13]]),
        }),
        0x03 => {
            if raw.len() < 29 {
                return Err(CardError::Decode(crate::tlv::DecodeError::BadShape(
                    "initialize update response",
                )));
            }
            let counter = if raw.len() >= 32 {
                u16::from_be_bytes([raw[30], raw[31]])
            } else {
                0
            };
            Ok(InitUpdateResponse {
                variant: ScpVariant::Scp03,
                key_info,
                challenge_context: raw[13..21].to_vec(),
                card_cryptogram: raw[21..29].try_into().unwrap(),
                sequence_counter: counter,
            })
        }
        other => {
            warn!("unknown secure channel protocol 0x{:02x}", other);
            Err(CardError::Decode(crate::tlv::DecodeError::BadShape(
                "secure channel protocol identifier",
            )))
        }
    }
}

/// SELECT the security domain and run INITIALIZE UPDATE, without
/// authenticating. Shared by `open` and the probe.
fn init_update<T: CardTransport>(
    session: &mut Session<T>,
    sd_aid: Option<&[u8]>,
    kvn: u8,
    host_challenge: &[u8; 8],
) -> Result<InitUpdateResponse, CardError> {
    let aid = sd_aid.unwrap_or(DEFAULT_SD_AID);
    let select = ApduCommand::select_by_aid(session.cla(), aid);
    let (_, sw) = session.exchange_cmd(&select)?;
    if sw != 0x9000 {
        return Err(CardError::Protocol(ProtocolError { sw, ins: 0xa4 }));
    }
    let init = ApduCommand::new(0x80, 0x50, kvn, 0x00, host_challenge.to_vec(), 0x100);
    let (data, sw) = session.exchange_cmd(&init)?;
    if sw != 0x9000 {
        return Err(CardError::Protocol(ProtocolError { sw, ins: 0x50 }));
    }
    parse_init_update(&data)
}

/// Derive session keys and the expected cryptogram pair.
fn derive(
    keys: &StaticKeys,
    init: &InitUpdateResponse,
    host_challenge: &[u8; 8],
) -> (SessionKeys, [u8; 8], [u8; 8]) {
    match init.variant {
        ScpVariant::Scp02 => {
            let seq = init.sequence_counter;
            let s_enc = scp02::derive_session_key(&keys.enc, scp02::DD_ENC, seq);
            let s_mac = scp02::derive_session_key(&keys.mac, scp02::DD_MAC, seq);
            let s_dek = scp02::derive_session_key(&keys.dek, scp02::DD_DEK, seq);
            let ctx: &[u8; 8] = init.challenge_context.as_slice().try_into().unwrap();
            let card = scp02::card_cryptogram(&s_enc, host_challenge, ctx);
            let host = scp02::host_cryptogram(&s_enc, ctx, host_challenge);
            (
                SessionKeys::Scp02 {
                    s_enc,
                    s_mac,
                    s_dek,
                },
                card,
                host,
            )
        }
        ScpVariant::Scp03 => {
            let mut context = Vec::with_capacity(16);
            context.extend_from_slice(host_challenge);
            context.extend_from_slice(&init.challenge_context);
            let s_enc = scp03::kdf(&keys.enc, scp03::DD_S_ENC, 0x0080, &context);
            let s_mac = scp03::kdf(&keys.mac, scp03::DD_S_MAC, 0x0080, &context);
            let card: [u8; 8] = scp03::kdf(&s_mac, scp03::DD_CARD_CRYPTOGRAM, 0x0040, &context)
                .try_into()
                .unwrap();
            let host: [u8; 8] = scp03::kdf(&s_mac, scp03::DD_HOST_CRYPTOGRAM, 0x0040, &context)
                .try_into()
                .unwrap();
            (SessionKeys::Scp03 { s_enc, s_mac }, card, host)
        }
    }
}

impl<'a, T: CardTransport> SecureChannel<'a, T> {
    /// Open a channel: SELECT, INITIALIZE UPDATE, verify the card
    /// cryptogram, EXTERNAL AUTHENTICATE at the requested level.
    ///
    /// `host_challenge` is drawn from the thread CSPRNG unless the caller
    /// pins it (tests do).
    pub fn open(
        session: &'a mut Session<T>,
        sd_aid: Option<&[u8]>,
        keys: &StaticKeys,
        kvn: u8,
        level: SecurityLevel,
        host_challenge: Option<[u8; 8]>,
    ) -> Result<Self, CardError> {
        let host_challenge = host_challenge.unwrap_or_else(|| rand::thread_rng().gen());
        let init = init_update(session, sd_aid, kvn, &host_challenge)?;
        info!(
            "secure channel: {:?}, key version {}, sequence {}",
            init.variant, init.key_info.0, init.sequence_counter
        );
        let (session_keys, expected_card, host_cryptogram) =
            derive(keys, &init, &host_challenge);
        if expected_card != init.card_cryptogram {
            return Err(CardError::Crypto(CryptoError::CardCryptogramMismatch));
        }

        let mut channel = SecureChannel {
            session,
            variant: init.variant,
            level,
            keys: session_keys,
            mac_chain: [0; 16],
            enc_counter: 0,
            sequence_counter: init.sequence_counter,
            open: true,
        };

        // EXTERNAL AUTHENTICATE is itself MAC-wrapped, and seeds the chain
        let ext = ApduCommand::new(0x80, 0x82, level.p1(), 0x00, host_cryptogram.to_vec(), 0);
        let wrapped = channel.wrap(&ext, false)?;
        let (_, sw) = channel.session.exchange_cmd(&wrapped)?;
        if sw != 0x9000 {
            channel.open = false;
            return Err(CardError::Protocol(ProtocolError { sw, ins: 0x82 }));
        }
        channel.enc_counter = 1;
        Ok(channel)
    }

    /// Try INITIALIZE UPDATE with each candidate and report the first whose
    /// card cryptogram verifies. EXTERNAL AUTHENTICATE is never sent, so the
    /// card's failure counter is untouched.
    pub fn probe(
        session: &mut Session<T>,
        candidates: &[ProbeCandidate],
        host_challenge: Option<[u8; 8]>,
    ) -> Result<usize, CardError> {
        for (index, candidate) in candidates.iter().enumerate() {
            let challenge = host_challenge.unwrap_or_else(|| rand::thread_rng().gen());
            let init = match init_update(
                session,
                candidate.sd_aid.as_deref(),
                candidate.kvn,
                &challenge,
            ) {
                Ok(init) => init,
                Err(CardError::Protocol(e)) => {
                    debug!("candidate {:?}: {}", candidate.label, e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let (_, expected_card, _) = derive(&candidate.keys, &init, &challenge);
            if expected_card == init.card_cryptogram {
                info!("keyset {:?} matches", candidate.label);
                return Ok(index);
            }
        }
        Err(CardError::Crypto(CryptoError::NoKeysetMatched))
    }

    pub fn variant(&self) -> ScpVariant {
        self.variant
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// The data-encryption session key, reserved for key-update commands.
    pub fn dek(&self) -> Option<&[u8]> {
        match &self.keys {
            SessionKeys::Scp02 { s_dek, .. } => Some(s_dek),
            SessionKeys::Scp03 { .. } => None,
        }
    }

    /// Wrap one command: set the secure-messaging class bit, encrypt the
    /// data field when the level asks for it, append the chained MAC.
    fn wrap(&mut self, command: &ApduCommand, encrypt: bool) -> Result<ApduCommand, CardError> {
        let cla = command.cla | 0x04;
        let data = if encrypt && self.level == SecurityLevel::MacEnc && !command.data.is_empty() {
            match &self.keys {
                SessionKeys::Scp02 { s_enc, .. } => {
                    let padded = scp02::pad80(&command.data);
                    scp02::cbc_encrypt(s_enc, &[0; 8], &padded)
                }
                SessionKeys::Scp03 { s_enc, .. } => {
                    scp03::encrypt_data(s_enc, self.enc_counter, &command.data)
                }
            }
        } else {
            command.data.clone()
        };

        let lc = data.len() + 8;
        if lc > 255 {
            return Err(CardError::Transport(
                crate::errors::TransportError::CommandTooLong(lc),
            ));
        }
        let header = [cla, command.ins, command.p1, command.p2, lc as u8];

        let mac: [u8; 8] = match &self.keys {
            SessionKeys::Scp02 { s_mac, .. } => {
                let mut body = header.to_vec();
                body.extend_from_slice(&data);
                let icv: [u8; 8] = self.mac_chain[..8].try_into().unwrap();
                let mac = scp02::retail_mac(s_mac, &icv, &body);
                self.mac_chain[..8].copy_from_slice(&mac);
                mac
            }
            SessionKeys::Scp03 { s_mac, .. } => {
                let mut body = self.mac_chain.to_vec();
                body.extend_from_slice(&header);
                body.extend_from_slice(&data);
                let full = scp03::cmac_full(s_mac, &body);
                self.mac_chain = full;
                full[..8].try_into().unwrap()
            }
        };

        let mut wrapped_data = data;
        wrapped_data.extend_from_slice(&mac);
        Ok(ApduCommand::new(
            cla,
            command.ins,
            command.p1,
            command.p2,
            wrapped_data,
            command.ne,
        ))
    }

    /// Wrap one command and send it. Status words indicating loss of the
    /// card-side security state close the channel.
    pub fn wrap_and_send(&mut self, command: &ApduCommand) -> Result<(Vec<u8>, u16), CardError> {
        if !self.open {
            return Err(CardError::Crypto(CryptoError::SessionClosed));
        }
        let wrapped = self.wrap(command, true)?;
        let result = self.session.exchange_cmd(&wrapped);
        if let SessionKeys::Scp03 { .. } = self.keys {
            self.enc_counter += 1;
        }
        match &result {
            Ok((_, sw)) if matches!(sw, 0x6982 | 0x6985 | 0x6a88) => {
                warn!("card dropped the secure channel (0x{:04x})", sw);
                self.open = false;
            }
            Err(_) => self.open = false,
            _ => {}
        }
        result
    }

    pub fn invalidate(&mut self) {
        self.open = false;
    }

    /// Release the session. The card keeps its channel state until the next
    /// SELECT or reset.
    pub fn close(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testcard::MockCard;
    use hex_literal::hex;

    const HOST: [u8; 8] = hex!("0011223344556677");
    const KEY: [u8; 16] = hex!("404142434445464748494a4b4c4d4e4f");

    fn select_sd() -> (Vec<u8>, Vec<u8>) {
        (
            [
                vec![0x00, 0xa4, 0x04, 0x04, 0x08],
                DEFAULT_SD_AID.to_vec(),
                vec![0x00],
            ]
            .concat(),
            vec![0x90, 0x00],
        )
    }

    /// A card-side SCP02 INITIALIZE UPDATE answer for our fixed challenge.
    fn scp02_init_response(keys: &StaticKeys, seq: u16, card_challenge: [u8; 6]) -> Vec<u8> {
        let s_enc = scp02::derive_session_key(&keys.enc, scp02::DD_ENC, seq);
        let mut ctx = seq.to_be_bytes().to_vec();
        ctx.extend_from_slice(&card_challenge);
        let ctx: [u8; 8] = ctx.try_into().unwrap();
        let cryptogram = scp02::card_cryptogram(&s_enc, &HOST, &ctx);

        let mut resp = vec![0u8; 10]; // diversification data
        resp.push(0x01); // key version
        resp.push(0x02); // SCP02
        resp.extend_from_slice(&seq.to_be_bytes());
        resp.extend_from_slice(&card_challenge);
        resp.extend_from_slice(&cryptogram);
        resp.extend_from_slice(&[0x90, 0x00]);
        resp
    }

    /// What the host must send for EXTERNAL AUTHENTICATE, and its MAC (the
    /// seed of the command chain).
    fn ext_authenticate_apdu(keys: &StaticKeys) -> (Vec<u8>, [u8; 8]) {
        let seq = 0x0001u16;
        let card_challenge = hex!("aabbccddeeff");
        let s_enc = scp02::derive_session_key(&keys.enc, scp02::DD_ENC, seq);
        let s_mac = scp02::derive_session_key(&keys.mac, scp02::DD_MAC, seq);
        let mut ctx = seq.to_be_bytes().to_vec();
        ctx.extend_from_slice(&card_challenge);
        let ctx: [u8; 8] = ctx.try_into().unwrap();
        let host_cryptogram = scp02::host_cryptogram(&s_enc, &ctx, &HOST);
        let mut apdu = vec![0x84, 0x82, 0x01, 0x00, 0x10];
        apdu.extend_from_slice(&host_cryptogram);
        let mac = scp02::retail_mac(&s_mac, &[0; 8], &apdu);
        apdu.extend_from_slice(&mac);
        (apdu, mac)
    }

    fn open_scp02(script_tail: Vec<(Vec<u8>, Vec<u8>)>) -> Session<MockCard> {
        let keys = StaticKeys::from_psk(KEY);
        let seq = 0x0001u16;
        let card_challenge = hex!("aabbccddeeff");
        let (ext_apdu, _) = ext_authenticate_apdu(&keys);
        let mut script = vec![
            select_sd(),
            (
                [vec![0x80, 0x50, 0x01, 0x00, 0x08], HOST.to_vec(), vec![0x00]].concat(),
                scp02_init_response(&keys, seq, card_challenge),
            ),
            (ext_apdu, vec![0x90, 0x00]),
        ];
        script.extend(script_tail);
        let card = MockCard::new(script);
        Session::open(card, Some("standard")).unwrap()
    }

    #[test]
    fn scp02_handshake_succeeds() {
        let mut session = open_scp02(vec![]);
        let keys = StaticKeys::from_psk(KEY);
        let channel = SecureChannel::open(
            &mut session,
            None,
            &keys,
            0x01,
            SecurityLevel::Mac,
            Some(HOST),
        )
        .unwrap();
        assert!(channel.is_open());
        assert_eq!(channel.variant(), ScpVariant::Scp02);
        assert_eq!(channel.sequence_counter, 1);
    }

    #[test]
    fn wrap_chains_macs_from_external_authenticate() {
        let keys = StaticKeys::from_psk(KEY);
        let seq = 0x0001u16;
        let s_mac = scp02::derive_session_key(&keys.mac, scp02::DD_MAC, seq);

        // Expected first wrapped command: GET STATUS with the MAC chained
        // from the EXTERNAL AUTHENTICATE MAC
        let (_, ext_mac) = ext_authenticate_apdu(&keys);
        let mut session = open_scp02(vec![(
            {
                let body = vec![0x84, 0xf2, 0x80, 0x00, 0x0a, 0x4f, 0x00];
                let mac = scp02::retail_mac(&s_mac, &ext_mac, &body);
                let mut apdu = body;
                apdu.extend_from_slice(&mac);
                apdu.push(0x00);
                apdu
            },
            vec![0x90, 0x00],
        )]);

        let mut channel = SecureChannel::open(
            &mut session,
            None,
            &keys,
            0x01,
            SecurityLevel::Mac,
            Some(HOST),
        )
        .unwrap();
        let cmd = ApduCommand::new(0x80, 0xf2, 0x80, 0x00, vec![0x4f, 0x00], 0x100);
        let (_, sw) = channel.wrap_and_send(&cmd).unwrap();
        assert_eq!(sw, 0x9000);
    }

    #[test]
    fn wrong_keys_fail_the_cryptogram() {
        let mut session = open_scp02(vec![]);
        let wrong = StaticKeys::from_psk(hex!("000102030405060708090a0b0c0d0e0f"));
        let err = SecureChannel::open(
            &mut session,
            None,
            &wrong,
            0x01,
            SecurityLevel::Mac,
            Some(HOST),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CardError::Crypto(CryptoError::CardCryptogramMismatch)
        ));
    }

    #[test]
    fn probe_finds_matching_keyset_without_authenticating() {
        let keys = StaticKeys::from_psk(KEY);
        let seq = 0x0001u16;
        let card_challenge = hex!("aabbccddeeff");
        // Two probe rounds: both do SELECT + INITIALIZE UPDATE, nothing else
        let script = vec![
            select_sd(),
            (
                [vec![0x80, 0x50, 0x01, 0x00, 0x08], HOST.to_vec(), vec![0x00]].concat(),
                scp02_init_response(&keys, seq, card_challenge),
            ),
            select_sd(),
            (
                [vec![0x80, 0x50, 0x02, 0x00, 0x08], HOST.to_vec(), vec![0x00]].concat(),
                scp02_init_response(&keys, seq, card_challenge),
            ),
        ];
        let card = MockCard::new(script);
        let mut session = Session::open(card, Some("standard")).unwrap();
        let candidates = vec![
            ProbeCandidate {
                label: "wrong".to_string(),
                keys: StaticKeys::from_psk(hex!("00000000000000000000000000000000")),
                kvn: 0x01,
                sd_aid: None,
            },
            ProbeCandidate {
                label: "right".to_string(),
                keys,
                kvn: 0x02,
                sd_aid: None,
            },
        ];
        let index = SecureChannel::probe(&mut session, &candidates, Some(HOST)).unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn channel_closes_on_security_loss() {
        let keys = StaticKeys::from_psk(KEY);
        let seq = 0x0001u16;
        let s_mac = scp02::derive_session_key(&keys.mac, scp02::DD_MAC, seq);
        let (_, ext_mac) = ext_authenticate_apdu(&keys);
        let mut session = open_scp02(vec![(
            {
                let mut body = vec![0x84, 0xe4, 0x00, 0x00, 0x0c, 0x4f, 0x02, 0x11, 0x22];
                let mac = scp02::retail_mac(&s_mac, &ext_mac, &body);
                body.extend_from_slice(&mac);
                body
            },
            vec![0x69, 0x82],
        )]);
        let mut channel = SecureChannel::open(
            &mut session,
            None,
            &keys,
            0x01,
            SecurityLevel::Mac,
            Some(HOST),
        )
        .unwrap();
        let cmd = ApduCommand::new(0x80, 0xe4, 0x00, 0x00, vec![0x4f, 0x02, 0x11, 0x22], 0);
        let (_, sw) = channel.wrap_and_send(&cmd).unwrap();
        assert_eq!(sw, 0x6982);
        assert!(!channel.is_open());
        assert!(matches!(
            channel.wrap_and_send(&cmd),
            Err(CardError::Crypto(CryptoError::SessionClosed))
        ));
    }
}

//! The authentication engine: Milenage and TUAK network-side computation,
//! AUTN/AUTS handling, the on-card AUTHENTICATE flow, and the derived keys
//! (KASME, the legacy 2G triplet).
//!
//! All computation is a pure function of a [`AuthVars`]; the engine keeps no
//! hidden state.

pub mod milenage;
pub mod tuak;

use hmac::{Hmac, Mac};
use log::{debug, info};
use sha2::Sha256;

use crate::errors::{CardError, CryptoError, ProtocolError, ValidationError};
use crate::exchange::{ApduCommand, CardTransport};
use crate::files::plmn::Plmn;
use crate::nav::{AppKind, Session};
use crate::util::xor_into;

pub use tuak::TuakConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Milenage,
    Tuak,
}

impl std::str::FromStr for Algorithm {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "milenage" => Ok(Algorithm::Milenage),
            "tuak" => Ok(Algorithm::Tuak),
            _ => Err(ValidationError::Unsupported("authentication algorithm")),
        }
    }
}

/// Everything the network side needs. OP and OPc (TOP/TOPc for TUAK) are
/// alternatives; when OP is given the derived value is computed once.
#[derive(Debug, Clone)]
pub struct AuthVars {
    pub algorithm: Algorithm,
    /// 16 bytes for Milenage, 16 or 32 for TUAK.
    pub k: Vec<u8>,
    pub op: Option<Vec<u8>>,
    pub opc: Option<Vec<u8>>,
    pub rand: [u8; 16],
    pub sqn: [u8; 6],
    pub amf: [u8; 2],
    pub tuak: TuakConfig,
}

impl AuthVars {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let op_len = match self.algorithm {
            Algorithm::Milenage => {
                if self.k.len() != 16 {
                    return Err(ValidationError::WrongLength {
                        what: "subscriber key K",
                        expected: 16,
                        got: self.k.len(),
                    });
                }
                16
            }
            Algorithm::Tuak => {
                if self.k.len() != 16 && self.k.len() != 32 {
                    return Err(ValidationError::LengthOutOfRange {
                        what: "subscriber key K",
                        min: 16,
                        max: 32,
                        got: self.k.len(),
                    });
                }
                32
            }
        };
        for (name, value) in [("OP", &self.op), ("OPc", &self.opc)] {
            if let Some(v) = value {
                if v.len() != op_len {
                    return Err(ValidationError::WrongLength {
                        what: if name == "OP" { "operator variant OP" } else { "operator variant OPc" },
                        expected: op_len,
                        got: v.len(),
                    });
                }
            }
        }
        if self.op.is_none() && self.opc.is_none() {
            return Err(ValidationError::Unsupported("missing OP and OPc"));
        }
        if self.algorithm == Algorithm::Tuak {
            self.tuak.validate()?;
        }
        Ok(())
    }
}

/// The network-side outputs for one challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkVectors {
    pub rand: [u8; 16],
    pub autn: Vec<u8>,
    pub xres: Vec<u8>,
    pub ck: Vec<u8>,
    pub ik: Vec<u8>,
    pub ak: [u8; 6],
    pub mac_a: Vec<u8>,
}

fn derived_opc(vars: &AuthVars) -> Result<Vec<u8>, ValidationError> {
    if let Some(opc) = &vars.opc {
        return Ok(opc.clone());
    }
    let op = vars.op.as_ref().expect("validated");
    Ok(match vars.algorithm {
        Algorithm::Milenage => {
            let k: &[u8; 16] = vars.k.as_slice().try_into().expect("validated");
            milenage::opc_from_op(k, op.as_slice().try_into().expect("validated")).to_vec()
        }
        Algorithm::Tuak => tuak::topc_from_top(
            &vars.k,
            op.as_slice().try_into().expect("validated"),
            vars.tuak.iterations,
        )
        .to_vec(),
    })
}

/// AUTN = (SQN XOR AK) || AMF || MAC-A.
pub fn compose_autn(sqn: &[u8; 6], ak: &[u8; 6], amf: &[u8; 2], mac_a: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + mac_a.len());
    let mut masked = *sqn;
    xor_into(&mut masked, ak);
    out.extend_from_slice(&masked);
    out.extend_from_slice(amf);
    out.extend_from_slice(mac_a);
    out
}

/// Recover (SQN, AMF, MAC-A) from an AUTN given AK.
pub fn parse_autn(autn: &[u8], ak: &[u8; 6]) -> Result<([u8; 6], [u8; 2], Vec<u8>), ValidationError> {
    if autn.len() < 16 {
        return Err(ValidationError::LengthOutOfRange {
            what: "AUTN",
            min: 16,
            max: 40,
            got: autn.len(),
        });
    }
    let mut sqn: [u8; 6] = autn[0..6].try_into().unwrap();
    xor_into(&mut sqn, ak);
    let amf: [u8; 2] = autn[6..8].try_into().unwrap();
    Ok((sqn, amf, autn[8..].to_vec()))
}

/// Compute the full vector set from the variables.
pub fn compute_vectors(vars: &AuthVars) -> Result<NetworkVectors, ValidationError> {
    vars.validate()?;
    let opc = derived_opc(vars)?;
    match vars.algorithm {
        Algorithm::Milenage => {
            let k: &[u8; 16] = vars.k.as_slice().try_into().unwrap();
            let opc: &[u8; 16] = opc.as_slice().try_into().unwrap();
            let out = milenage::compute(k, opc, &vars.rand, &vars.sqn, &vars.amf);
            Ok(NetworkVectors {
                rand: vars.rand,
                autn: compose_autn(&vars.sqn, &out.ak, &vars.amf, &out.mac_a),
                xres: out.res.to_vec(),
                ck: out.ck.to_vec(),
                ik: out.ik.to_vec(),
                ak: out.ak,
                mac_a: out.mac_a.to_vec(),
            })
        }
        Algorithm::Tuak => {
            let topc: &[u8; 32] = opc.as_slice().try_into().unwrap();
            let out = tuak::compute(&vars.k, topc, &vars.rand, &vars.sqn, &vars.amf, &vars.tuak)?;
            Ok(NetworkVectors {
                rand: vars.rand,
                autn: compose_autn(&vars.sqn, &out.ak, &vars.amf, &out.mac_a),
                xres: out.res,
                ck: out.ck,
                ik: out.ik,
                ak: out.ak,
                mac_a: out.mac_a,
            })
        }
    }
}

/// 48-bit big-endian increment, wrapping.
pub fn sqn_increment(sqn: &[u8; 6]) -> [u8; 6] {
    let mut value = u64::from_be_bytes([0, 0, sqn[0], sqn[1], sqn[2], sqn[3], sqn[4], sqn[5]]);
    value = (value + 1) & 0xffff_ffff_ffff;
    let bytes = value.to_be_bytes();
    bytes[2..8].try_into().unwrap()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResyncResult {
    /// The card-side sequence number recovered from AUTS.
    pub sqn_ms: [u8; 6],
    /// What the caller should use next: SQNms + 1.
    pub next_sqn: [u8; 6],
}

/// Process an AUTS: unmask SQNms with AK*, verify MAC-S (AMF* is all-zero),
/// report the incremented sequence number.
pub fn process_auts(vars: &AuthVars, auts: &[u8]) -> Result<ResyncResult, CardError> {
    vars.validate().map_err(CardError::Validation)?;
    let opc = derived_opc(vars).map_err(CardError::Validation)?;
    let mac_len = match vars.algorithm {
        Algorithm::Milenage => 8,
        Algorithm::Tuak => vars.tuak.mac_len,
    };
    if auts.len() != 6 + mac_len {
        return Err(CardError::Validation(ValidationError::WrongLength {
            what: "AUTS",
            expected: 6 + mac_len,
            got: auts.len(),
        }));
    }
    let amf_star = [0u8; 2];
    let mut sqn_ms: [u8; 6] = auts[0..6].try_into().unwrap();
    let mac_s = &auts[6..];

    match vars.algorithm {
        Algorithm::Milenage => {
            let k: &[u8; 16] = vars.k.as_slice().try_into().unwrap();
            let opc: &[u8; 16] = opc.as_slice().try_into().unwrap();
            // AK* only depends on RAND, so one pass with the unmasked SQN
            // suffices for both steps
            let first = milenage::compute(k, opc, &vars.rand, &sqn_ms, &amf_star);
            xor_into(&mut sqn_ms, &first.ak_star);
            let second = milenage::compute(k, opc, &vars.rand, &sqn_ms, &amf_star);
            if second.mac_s != mac_s {
                return Err(CardError::Crypto(CryptoError::MacSMismatch));
            }
        }
        Algorithm::Tuak => {
            let topc: &[u8; 32] = opc.as_slice().try_into().unwrap();
            let first =
                tuak::compute(&vars.k, topc, &vars.rand, &sqn_ms, &amf_star, &vars.tuak)
                    .map_err(CardError::Validation)?;
            xor_into(&mut sqn_ms, &first.ak_star);
            let second =
                tuak::compute(&vars.k, topc, &vars.rand, &sqn_ms, &amf_star, &vars.tuak)
                    .map_err(CardError::Validation)?;
            if second.mac_s != mac_s {
                return Err(CardError::Crypto(CryptoError::MacSMismatch));
            }
        }
    }

    Ok(ResyncResult {
        sqn_ms,
        next_sqn: sqn_increment(&sqn_ms),
    })
}

/// What the card said to AUTHENTICATE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardAuthResponse {
    Success {
        res: Vec<u8>,
        ck: Vec<u8>,
        ik: Vec<u8>,
        kc: Option<Vec<u8>>,
    },
    SyncFailure {
        auts: Vec<u8>,
    },
}

/// Run AUTHENTICATE in the 3G security context against the selected USIM.
pub fn authenticate_card<T: CardTransport>(
    session: &mut Session<T>,
    rand: &[u8; 16],
    autn: &[u8],
) -> Result<CardAuthResponse, CardError> {
    if session.current_app() != Some(AppKind::Usim) {
        session.open_app(AppKind::Usim)?;
    }
    let mut data = Vec::with_capacity(2 + 16 + autn.len());
    data.push(16);
    data.extend_from_slice(rand);
    data.push(autn.len() as u8);
    data.extend_from_slice(autn);
    let cmd = ApduCommand::new(session.cla(), 0x88, 0x00, 0x81, data, 0x100);
    let (response, sw) = session.exchange_cmd(&cmd)?;
    if sw != 0x9000 {
        return Err(CardError::Protocol(ProtocolError { sw, ins: 0x88 }));
    }
    parse_auth_response(&response)
}

fn take_lv<'a>(raw: &'a [u8], what: &'static str) -> Result<(&'a [u8], &'a [u8]), CardError> {
    let (&len, rest) = raw.split_first().ok_or(CardError::Decode(
        crate::tlv::DecodeError::BadShape("authenticate response"),
    ))?;
    if rest.len() < len as usize {
        return Err(CardError::Decode(crate::tlv::DecodeError::BadShape(what)));
    }
    Ok(rest.split_at(len as usize))
}

fn parse_auth_response(raw: &[u8]) -> Result<CardAuthResponse, CardError> {
    match raw.first() {
        Some(0xdb) => {
            let (res, rest) = take_lv(&raw[1..], "RES")?;
            let (ck, rest) = take_lv(rest, "CK")?;
            let (ik, rest) = take_lv(rest, "IK")?;
            let kc = if rest.is_empty() {
                None
            } else {
                Some(take_lv(rest, "Kc")?.0.to_vec())
            };
            Ok(CardAuthResponse::Success {
                res: res.to_vec(),
                ck: ck.to_vec(),
                ik: ik.to_vec(),
                kc,
            })
        }
        Some(0xdc) => {
            let (auts, _) = take_lv(&raw[1..], "AUTS")?;
            Ok(CardAuthResponse::SyncFailure {
                auts: auts.to_vec(),
            })
        }
        _ => Err(CardError::Decode(crate::tlv::DecodeError::BadShape(
            "authenticate response tag",
        ))),
    }
}

/// One full run against the card: compute locally when K is known, send the
/// challenge, compare RES against XRES.
#[derive(Debug, Clone)]
pub struct AuthRun {
    pub vectors: Option<NetworkVectors>,
    pub card: CardAuthResponse,
    /// None in card-only mode.
    pub res_matches: Option<bool>,
}

pub fn run_against_card<T: CardTransport>(
    session: &mut Session<T>,
    vars: Option<&AuthVars>,
    rand: &[u8; 16],
    autn: Option<&[u8]>,
) -> Result<AuthRun, CardError> {
    let vectors = match (vars, autn) {
        // Card-only mode: replay a dumped RAND/AUTN pair, no local math
        (None, Some(_)) => None,
        (Some(vars), _) => Some(compute_vectors(vars).map_err(CardError::Validation)?),
        (None, None) => {
            return Err(CardError::Validation(ValidationError::Unsupported(
                "neither K nor AUTN given",
            )))
        }
    };
    let autn_bytes: Vec<u8> = match (autn, &vectors) {
        (Some(a), _) => a.to_vec(),
        (None, Some(v)) => v.autn.clone(),
        (None, None) => unreachable!(),
    };
    info!("AUTHENTICATE RAND {} AUTN {}", hex::encode(rand), hex::encode(&autn_bytes));
    let card = authenticate_card(session, rand, &autn_bytes)?;
    let res_matches = match (&vectors, &card) {
        (Some(v), CardAuthResponse::Success { res, .. }) => {
            debug!("XRES {} RES {}", hex::encode(&v.xres), hex::encode(res));
            Some(*res == v.xres)
        }
        _ => None,
    };
    Ok(AuthRun {
        vectors,
        card,
        res_matches,
    })
}

/// KASME per the standard LTE derivation: HMAC-SHA-256 over the serving
/// network identity and the masked sequence number, keyed with CK || IK.
pub fn derive_kasme(ck: &[u8], ik: &[u8], serving: &Plmn, sqn_xor_ak: &[u8; 6]) -> [u8; 32] {
    let plmn = crate::files::plmn::encode(serving).expect("validated PLMN");
    let mut s = Vec::with_capacity(14);
    s.push(0x10);
    s.extend_from_slice(&plmn);
    s.extend_from_slice(&[0x00, 0x03]);
    s.extend_from_slice(sqn_xor_ak);
    s.extend_from_slice(&[0x00, 0x06]);

    let mut key = Vec::with_capacity(ck.len() + ik.len());
    key.extend_from_slice(ck);
    key.extend_from_slice(ik);
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&key).expect("any key length works");
    mac.update(&s);
    mac.finalize().into_bytes().into()
}

/// The legacy 2G pair derived from a 3G run: SRES by folding RES, Kc by
/// folding CK and IK.
pub fn gsm_triplet(xres: &[u8], ck: &[u8], ik: &[u8]) -> ([u8; 4], [u8; 8]) {
    let mut padded = [0u8; 16];
    padded[..xres.len().min(16)].copy_from_slice(&xres[..xres.len().min(16)]);
    let mut sres = [0u8; 4];
    for chunk in padded.chunks(4) {
        xor_into(&mut sres, chunk);
    }
    let mut kc = [0u8; 8];
    for chunk in ck.chunks(8).chain(ik.chunks(8)) {
        xor_into(&mut kc, chunk);
    }
    (sres, kc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn vars() -> AuthVars {
        AuthVars {
            algorithm: Algorithm::Milenage,
            k: hex!("465b5ce8b199b49faa5f0a2ee238a6bc").to_vec(),
            op: Some(hex!("cdc202d5123e20f62b6d676ac72cb318").to_vec()),
            opc: None,
            rand: hex!("23553cbe9637a89d218ae64dae47bf35"),
            sqn: hex!("ff9bb4d0b607"),
            amf: hex!("b9b9"),
            tuak: TuakConfig::default(),
        }
    }

    #[test]
    fn vectors_match_test_set_1() {
        let v = compute_vectors(&vars()).unwrap();
        assert_eq!(v.mac_a, hex!("4a9ffac354dfafb3"));
        assert_eq!(v.xres, hex!("a54211d5e3ba50bf"));
        assert_eq!(v.ck, hex!("b40ba9a3c58b2a05bbf0d987b21bf8cb"));
        assert_eq!(v.ik, hex!("f769bcd751044604127672711c6d3441"));
        assert_eq!(v.ak, hex!("aa689c648370"));
        assert_eq!(v.autn, hex!("55f328b43577b9b94a9ffac354dfafb3"));
    }

    #[test]
    fn autn_round_trip() {
        let v = compute_vectors(&vars()).unwrap();
        let (sqn, amf, mac) = parse_autn(&v.autn, &v.ak).unwrap();
        assert_eq!(sqn, hex!("ff9bb4d0b607"));
        assert_eq!(amf, hex!("b9b9"));
        assert_eq!(mac, hex!("4a9ffac354dfafb3"));
    }

    #[test]
    fn autn_parse_known_value() {
        let autn = hex!("55f328b43577b9b94a9ffac354dfafb3");
        let ak = hex!("aa689c648370");
        let (sqn, amf, _) = parse_autn(&autn, &ak).unwrap();
        assert_eq!(sqn, hex!("ff9bb4d0b607"));
        assert_eq!(amf, hex!("b9b9"));
    }

    #[test]
    fn sqn_arithmetic() {
        assert_eq!(sqn_increment(&hex!("000000000000")), hex!("000000000001"));
        assert_eq!(sqn_increment(&hex!("0000000000ff")), hex!("000000000100"));
        assert_eq!(sqn_increment(&hex!("ffffffffffff")), hex!("000000000000"));
    }

    #[test]
    fn auts_round_trip_reports_next_sqn() {
        // Build an AUTS the way a card would, then verify we recover SQNms
        let v = vars();
        let k: [u8; 16] = v.k.clone().try_into().unwrap();
        let opc = milenage::opc_from_op(&k, &hex!("cdc202d5123e20f62b6d676ac72cb318"));
        let sqn_ms = hex!("000000001234");
        let out = milenage::compute(&k, &opc, &v.rand, &sqn_ms, &[0, 0]);
        let mut masked = sqn_ms;
        xor_into(&mut masked, &out.ak_star);
        let mut auts = masked.to_vec();
        auts.extend_from_slice(&out.mac_s);

        let result = process_auts(&v, &auts).unwrap();
        assert_eq!(result.sqn_ms, sqn_ms);
        assert_eq!(result.next_sqn, hex!("000000001235"));
    }

    #[test]
    fn auts_with_bad_mac_refused() {
        let v = vars();
        let mut auts = vec![0u8; 14];
        auts[13] = 0x01;
        assert!(matches!(
            process_auts(&v, &auts),
            Err(CardError::Crypto(CryptoError::MacSMismatch))
        ));
    }

    #[test]
    fn parse_success_response() {
        let raw = hex!(
            "db 08 a54211d5e3ba50bf 10 b40ba9a3c58b2a05bbf0d987b21bf8cb 10 f769bcd751044604127672711c6d3441"
        );
        let parsed = parse_auth_response(&raw).unwrap();
        match parsed {
            CardAuthResponse::Success { res, ck, ik, kc } => {
                assert_eq!(res, hex!("a54211d5e3ba50bf"));
                assert_eq!(ck.len(), 16);
                assert_eq!(ik.len(), 16);
                assert_eq!(kc, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parse_sync_failure_response() {
        let raw = hex!("dc 0e 0102030405060708090a0b0c0d0e");
        match parse_auth_response(&raw).unwrap() {
            CardAuthResponse::SyncFailure { auts } => assert_eq!(auts.len(), 14),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn kasme_is_deterministic_and_keyed() {
        let v = compute_vectors(&vars()).unwrap();
        let plmn = Plmn::new("250", "88").unwrap();
        let sqn_xor_ak: [u8; 6] = v.autn[0..6].try_into().unwrap();
        let a = derive_kasme(&v.ck, &v.ik, &plmn, &sqn_xor_ak);
        let b = derive_kasme(&v.ck, &v.ik, &plmn, &sqn_xor_ak);
        assert_eq!(a, b);
        let other = derive_kasme(&v.ik, &v.ck, &plmn, &sqn_xor_ak);
        assert_ne!(a, other);
    }

    #[test]
    fn gsm_triplet_folds() {
        let (sres, kc) = gsm_triplet(
            &hex!("a54211d5e3ba50bf"),
            &hex!("b40ba9a3c58b2a05bbf0d987b21bf8cb"),
            &hex!("f769bcd751044604127672711c6d3441"),
        );
        // SRES folds the zero-padded RES
        assert_eq!(sres, hex!("46f8416a"));
        let expected_kc = {
            let mut kc = [0u8; 8];
            for chunk in [
                &hex!("b40ba9a3c58b2a05")[..],
                &hex!("bbf0d987b21bf8cb")[..],
                &hex!("f769bcd751044604")[..],
                &hex!("127672711c6d3441")[..],
            ] {
                for (k, c) in kc.iter_mut().zip(chunk) {
                    *k ^= c;
                }
            }
            kc
        };
        assert_eq!(kc, expected_kc);
    }
}

//! Categorized self-tests against a connected card. Each category runs
//! after a warm reset so earlier tests cannot contaminate later ones, and
//! nothing here ever presents a candidate PIN value: negative security
//! tests use only shapes a card rejects without touching a retry counter.

use chrono::{DateTime, Utc};
use log::info;
use multimap::MultiMap;

use crate::auth::{self, AuthVars};
use crate::errors::CardError;
use crate::exchange::{ApduCommand, CardTransport};
use crate::files::{self, ef};
use crate::nav::{AppKind, Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    UsimFiles,
    IsimFiles,
    Auth,
    RawApdu,
    Security,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::UsimFiles,
        Category::IsimFiles,
        Category::Auth,
        Category::RawApdu,
        Category::Security,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Category::UsimFiles => "usim",
            Category::IsimFiles => "isim",
            Category::Auth => "auth",
            Category::RawApdu => "apdu",
            Category::Security => "security",
        }
    }
}

impl std::str::FromStr for Category {
    type Err = crate::errors::ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.label() == s)
            .ok_or(crate::errors::ValidationError::Unsupported("test category"))
    }
}

#[derive(Debug, Clone)]
pub struct TestOutcome {
    pub name: &'static str,
    pub category: Category,
    pub passed: bool,
    pub expected: String,
    pub actual: String,
    pub apdu_hex: String,
    pub response_hex: String,
    pub sw: u16,
    pub spec_ref: &'static str,
}

#[derive(Debug)]
pub struct TestReport {
    pub started: DateTime<Utc>,
    pub outcomes: Vec<TestOutcome>,
}

impl TestReport {
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.passed)
    }

    pub fn by_category(&self) -> MultiMap<Category, &TestOutcome> {
        self.outcomes.iter().map(|o| (o.category, o)).collect()
    }
}

/// One raw exchange captured for the report.
fn probe_apdu<T: CardTransport>(
    session: &mut Session<T>,
    name: &'static str,
    category: Category,
    spec_ref: &'static str,
    cmd: ApduCommand,
    expected_sws: &[u16],
) -> TestOutcome {
    let apdu_hex = cmd.encode().map(hex::encode).unwrap_or_default();
    match session.exchange_cmd(&cmd) {
        Ok((data, sw)) => TestOutcome {
            name,
            category,
            passed: expected_sws.contains(&sw),
            expected: expected_sws
                .iter()
                .map(|sw| format!("{:04x}", sw))
                .collect::<Vec<_>>()
                .join(" or "),
            actual: format!("{:04x}", sw),
            apdu_hex,
            response_hex: hex::encode(data),
            sw,
            spec_ref,
        },
        Err(e) => TestOutcome {
            name,
            category,
            passed: false,
            expected: "status word".to_string(),
            actual: e.to_string(),
            apdu_hex,
            response_hex: String::new(),
            sw: 0,
            spec_ref,
        },
    }
}

fn outcome_from_check(
    name: &'static str,
    category: Category,
    spec_ref: &'static str,
    expected: impl Into<String>,
    result: Result<String, CardError>,
) -> TestOutcome {
    let expected = expected.into();
    match result {
        Ok(actual) => TestOutcome {
            passed: true,
            name,
            category,
            expected,
            actual,
            apdu_hex: String::new(),
            response_hex: String::new(),
            sw: 0x9000,
            spec_ref,
        },
        Err(e) => TestOutcome {
            passed: false,
            name,
            category,
            expected,
            actual: e.to_string(),
            apdu_hex: String::new(),
            response_hex: String::new(),
            sw: match e {
                CardError::Protocol(p) => p.sw,
                _ => 0,
            },
            spec_ref,
        },
    }
}

fn run_usim_files<T: CardTransport>(session: &mut Session<T>, out: &mut Vec<TestOutcome>) {
    out.push(outcome_from_check(
        "iccid-read-decode",
        Category::UsimFiles,
        "TS 102.221 13.2",
        "decodable ICCID",
        session.select_mf().and_then(|_| {
            let (_, data) = session.read_ef_transparent(ef::ICCID)?;
            Ok(files::iccid::decode(&data)
                .map_err(|_| {
                    CardError::Decode(crate::tlv::DecodeError::BadShape("ICCID"))
                })?)
        }),
    ));
    let opened = session.open_app(AppKind::Usim);
    out.push(outcome_from_check(
        "usim-select",
        Category::UsimFiles,
        "TS 31.102 4.2",
        "USIM application selectable",
        opened.map(|_| "selected".to_string()),
    ));
    out.push(outcome_from_check(
        "imsi-read-decode",
        Category::UsimFiles,
        "TS 31.102 4.2.2",
        "decodable IMSI of 6..15 digits",
        session.read_ef_transparent(ef::IMSI).and_then(|(_, data)| {
            files::imsi::decode(&data)
                .map_err(|_| CardError::Decode(crate::tlv::DecodeError::BadShape("IMSI")))
        }),
    ));
    out.push(outcome_from_check(
        "ad-read-decode",
        Category::UsimFiles,
        "TS 31.102 4.2.18",
        "valid administrative data",
        session.read_ef_transparent(ef::AD).and_then(|(_, data)| {
            files::admin::decode(&data)
                .map(|ad| format!("{:?}", ad))
                .map_err(|_| CardError::Decode(crate::tlv::DecodeError::BadShape("AD")))
        }),
    ));
    out.push(outcome_from_check(
        "ust-read",
        Category::UsimFiles,
        "TS 31.102 4.2.8",
        "non-empty service table",
        session.read_ef_transparent(ef::UST).and_then(|(_, data)| {
            if data.is_empty() {
                Err(CardError::Decode(crate::tlv::DecodeError::BadShape("UST")))
            } else {
                let table = files::service_table::ServiceTable::from_bytes(data);
                Ok(format!("{} services", table.enabled_services().len()))
            }
        }),
    ));
}

fn run_isim_files<T: CardTransport>(session: &mut Session<T>, out: &mut Vec<TestOutcome>) {
    let opened = session.open_app(AppKind::Isim);
    let selectable = opened.is_ok();
    out.push(outcome_from_check(
        "isim-select",
        Category::IsimFiles,
        "TS 31.103 4.2",
        "ISIM application selectable",
        opened.map(|_| "selected".to_string()),
    ));
    if !selectable {
        return;
    }
    out.push(outcome_from_check(
        "impi-read-decode",
        Category::IsimFiles,
        "TS 31.103 4.2.2",
        "decodable IMPI",
        session.read_ef_transparent(ef::IMPI).and_then(|(_, data)| {
            files::isim::decode_identity(&data)
                .map(|v| v.unwrap_or_else(|| "(empty)".to_string()))
                .map_err(|_| CardError::Decode(crate::tlv::DecodeError::BadShape("IMPI")))
        }),
    ));
    out.push(outcome_from_check(
        "domain-read-decode",
        Category::IsimFiles,
        "TS 31.103 4.2.3",
        "decodable home domain",
        session.read_ef_transparent(ef::DOMAIN).and_then(|(_, data)| {
            files::isim::decode_identity(&data)
                .map(|v| v.unwrap_or_else(|| "(empty)".to_string()))
                .map_err(|_| CardError::Decode(crate::tlv::DecodeError::BadShape("DOMAIN")))
        }),
    ));
}

fn run_auth<T: CardTransport>(
    session: &mut Session<T>,
    vars: Option<&AuthVars>,
    out: &mut Vec<TestOutcome>,
) {
    let Some(vars) = vars else {
        info!("no authentication variables, skipping the auth category");
        return;
    };
    out.push(outcome_from_check(
        "authenticate-res-matches",
        Category::Auth,
        "TS 31.102 7.1.1",
        "RES equals XRES",
        auth::run_against_card(session, Some(vars), &vars.rand, None).and_then(|run| {
            match run.res_matches {
                Some(true) => Ok("match".to_string()),
                Some(false) => Err(CardError::Crypto(
                    crate::errors::CryptoError::CardCryptogramMismatch,
                )),
                None => Ok("card-only".to_string()),
            }
        }),
    ));
}

fn run_raw_apdu<T: CardTransport>(session: &mut Session<T>, out: &mut Vec<TestOutcome>) {
    let cla = session.cla();
    out.push(probe_apdu(
        session,
        "select-mf",
        Category::RawApdu,
        "TS 102.221 11.1.1",
        ApduCommand::select_file_id(cla, 0x3f00),
        &[0x9000],
    ));
    // Wrong instruction: must fail cleanly, and the transport must not loop
    // chasing response data that is not there
    out.push(probe_apdu(
        session,
        "wrong-instruction",
        Category::RawApdu,
        "TS 102.221 10.2.1",
        ApduCommand::new(cla, 0xff, 0x00, 0x00, vec![], 0),
        &[0x6d00, 0x6e00],
    ));
    out.push(probe_apdu(
        session,
        "wrong-class",
        Category::RawApdu,
        "TS 102.221 10.2.1",
        ApduCommand::new(0xe0, 0xa4, 0x00, 0x04, 0x3f00u16.to_be_bytes().to_vec(), 0x100),
        &[0x6e00, 0x6800],
    ));
}

fn run_security<T: CardTransport>(session: &mut Session<T>, out: &mut Vec<TestOutcome>) {
    let cla = session.cla();
    // Selecting a file that cannot exist
    out.push(probe_apdu(
        session,
        "select-missing-file",
        Category::Security,
        "TS 102.221 11.1.1",
        ApduCommand::select_file_id(cla, 0xeee0),
        &[0x6a82],
    ));
    // Empty VERIFY retrieves the retry counter without spending an attempt
    out.push(probe_apdu(
        session,
        "pin-status-no-decrement",
        Category::Security,
        "TS 102.221 11.1.9",
        ApduCommand::new(cla, 0x20, 0x00, 0x01, vec![], 0),
        &[0x9000, 0x63c0, 0x63c1, 0x63c2, 0x63c3, 0x6984],
    ));
    // Reading without having selected an elementary file
    out.push(probe_apdu(
        session,
        "read-without-select",
        Category::Security,
        "TS 102.221 11.1.3",
        ApduCommand::read_binary(cla, 0, 4),
        &[0x6986, 0x6982, 0x6a82],
    ));
}

/// Run the requested categories, warm-resetting between them.
pub fn run<T: CardTransport>(
    session: &mut Session<T>,
    categories: &[Category],
    vars: Option<&AuthVars>,
) -> Result<TestReport, CardError> {
    let mut outcomes = Vec::new();
    for (index, &category) in categories.iter().enumerate() {
        if index > 0 {
            session.warm_reset()?;
        }
        info!("running {} tests", category.label());
        match category {
            Category::UsimFiles => run_usim_files(session, &mut outcomes),
            Category::IsimFiles => run_isim_files(session, &mut outcomes),
            Category::Auth => run_auth(session, vars, &mut outcomes),
            Category::RawApdu => run_raw_apdu(session, &mut outcomes),
            Category::Security => run_security(session, &mut outcomes),
        }
    }
    Ok(TestReport {
        started: Utc::now(),
        outcomes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testcard::MockCard;

    fn ok(mut data: Vec<u8>) -> Vec<u8> {
        data.extend_from_slice(&[0x90, 0x00]);
        data
    }

    #[test]
    fn raw_apdu_category_with_negative_answers() {
        let script = vec![
            (
                vec![0x00, 0xa4, 0x00, 0x04, 0x02, 0x3f, 0x00, 0x00],
                ok(vec![0x62, 0x04, 0x82, 0x02, 0x78, 0x21]),
            ),
            (vec![0x00, 0xff, 0x00, 0x00], vec![0x6d, 0x00]),
            (
                vec![0xe0, 0xa4, 0x00, 0x04, 0x02, 0x3f, 0x00, 0x00],
                vec![0x6e, 0x00],
            ),
        ];
        let card = MockCard::new(script);
        let mut session = Session::open(card, Some("standard")).unwrap();
        let report = run(&mut session, &[Category::RawApdu], None).unwrap();
        assert_eq!(report.outcomes.len(), 3);
        assert!(report.passed(), "{:?}", report.outcomes);
        assert_eq!(report.outcomes[1].sw, 0x6d00);
    }

    #[test]
    fn warm_reset_between_categories() {
        let script = vec![
            // Security category first
            (vec![0x00, 0xa4, 0x00, 0x04, 0x02, 0xee, 0xe0, 0x00], vec![0x6a, 0x82]),
            (vec![0x00, 0x20, 0x00, 0x01], vec![0x63, 0xc3]),
            (vec![0x00, 0xb0, 0x00, 0x00, 0x04], vec![0x69, 0x86]),
            // After the reset, the raw category
            (
                vec![0x00, 0xa4, 0x00, 0x04, 0x02, 0x3f, 0x00, 0x00],
                ok(vec![0x62, 0x04, 0x82, 0x02, 0x78, 0x21]),
            ),
            (vec![0x00, 0xff, 0x00, 0x00], vec![0x6d, 0x00]),
            (
                vec![0xe0, 0xa4, 0x00, 0x04, 0x02, 0x3f, 0x00, 0x00],
                vec![0x6e, 0x00],
            ),
        ];
        let card = MockCard::new(script);
        let mut session = Session::open(card, Some("standard")).unwrap();
        let report = run(
            &mut session,
            &[Category::Security, Category::RawApdu],
            None,
        )
        .unwrap();
        assert!(report.passed(), "{:?}", report.outcomes);
        let grouped = report.by_category();
        assert_eq!(grouped.get_vec(&Category::Security).unwrap().len(), 3);
        assert_eq!(grouped.get_vec(&Category::RawApdu).unwrap().len(), 3);
    }

    #[test]
    fn failures_are_recorded_not_fatal() {
        let script = vec![(
            vec![0x00, 0xa4, 0x00, 0x04, 0x02, 0xee, 0xe0, 0x00],
            vec![0x90, 0x00], // a card that claims the file exists
        ),
            (vec![0x00, 0x20, 0x00, 0x01], vec![0x63, 0xc3]),
            (vec![0x00, 0xb0, 0x00, 0x00, 0x04], vec![0x69, 0x86]),
        ];
        let card = MockCard::new(script);
        let mut session = Session::open(card, Some("standard")).unwrap();
        let report = run(&mut session, &[Category::Security], None).unwrap();
        assert!(!report.passed());
        assert!(!report.outcomes[0].passed);
        assert!(report.outcomes[1].passed);
    }
}

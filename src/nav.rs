//! The file-system navigator: one open card, one current selection.
//!
//! Everything above the transport goes through a [`Session`]. It owns the
//! answer-to-reset, the vendor driver chosen from it, the detected
//! application identifiers, and the credentials presented this power cycle.
//! The mental model it maintains (which application and elementary file the
//! card currently has selected) is only ever mutated here, so it cannot
//! drift from the card's.

use std::collections::HashMap;

use log::{debug, info, warn};

use crate::access::{self, AccessRule, Condition};
use crate::credentials::{self, Credential, CredentialCache, PresentOutcome};
use crate::drivers::{self, CardDriver};
use crate::errors::{expect_ok, CardError, ProtocolError};
use crate::exchange::{exchange, ApduCommand, CardTransport, CLA_GSM};
use crate::fcp::{self, FileInfo};
use crate::tlv::Tlv;

pub const MF: u16 = 0x3f00;
pub const EF_DIR: u16 = 0x2f00;
pub const EF_ICCID: u16 = 0x2fe2;
pub const EF_ARR: u16 = 0x6f06;
pub const DF_GSM: u16 = 0x7f20;
pub const DF_TELECOM: u16 = 0x7f10;

/// 3GPP RID plus the application code bytes that tell USIM from ISIM.
pub const AID_USIM: &[u8] = &[0xa0, 0x00, 0x00, 0x00, 0x87, 0x10, 0x02];
pub const AID_ISIM: &[u8] = &[0xa0, 0x00, 0x00, 0x00, 0x87, 0x10, 0x04];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppKind {
    Usim,
    Isim,
}

/// Called at block boundaries of long operations; returning true stops the
/// operation with [`CardError::Cancelled`].
pub type Cancel<'a> = &'a dyn Fn() -> bool;

fn cancelled(cancel: Option<Cancel<'_>>, done: usize) -> Result<(), CardError> {
    match cancel {
        Some(f) if f() => Err(CardError::Cancelled { done }),
        _ => Ok(()),
    }
}

pub struct Session<T: CardTransport> {
    transport: T,
    driver: &'static CardDriver,
    pub detected_usim_aid: Option<Vec<u8>>,
    pub detected_isim_aid: Option<Vec<u8>>,
    usim_fallback_path: Option<Vec<u16>>,
    isim_fallback_path: Option<Vec<u16>>,
    scanned_dir: bool,
    current_app: Option<AppKind>,
    credentials: CredentialCache,
    arr_cache: HashMap<u8, AccessRule>,
    poisoned: bool,
}

impl<T: CardTransport> Session<T> {
    /// Open a session on a connected transport. The driver registry is
    /// consulted once, here; `driver_override` skips the ATR heuristic.
    pub fn open(transport: T, driver_override: Option<&str>) -> Result<Self, CardError> {
        let driver = match driver_override {
            Some(name) => drivers::driver_by_name(name).ok_or(
                crate::errors::ValidationError::Unsupported("requested card driver"),
            )?,
            None => drivers::driver_for_atr(transport.atr()),
        };
        info!(
            "card ATR {}, driver {:?}",
            hex::encode(transport.atr()),
            driver.name
        );
        Ok(Session {
            transport,
            driver,
            detected_usim_aid: None,
            detected_isim_aid: None,
            usim_fallback_path: Some(vec![DF_GSM]),
            isim_fallback_path: None,
            scanned_dir: false,
            current_app: None,
            credentials: CredentialCache::default(),
            arr_cache: HashMap::new(),
            poisoned: false,
        })
    }

    pub fn atr(&self) -> &[u8] {
        self.transport.atr()
    }

    pub fn driver(&self) -> &'static CardDriver {
        self.driver
    }

    /// The class byte used for everything on this card.
    pub fn cla(&self) -> u8 {
        self.driver.base_cla
    }

    /// Class byte for vendor-proprietary files, which on some cards stay on
    /// the 2G class even when everything else is 0x00.
    pub fn vendor_cla(&self) -> u8 {
        if self.driver.quirks.vendor_files_use_gsm_class {
            CLA_GSM
        } else {
            self.driver.base_cla
        }
    }

    pub fn current_app(&self) -> Option<AppKind> {
        self.current_app
    }

    /// Warm reset. Selection, access-rule memos and on-card credential state
    /// are gone; the cached credential values survive for the next rebind.
    pub fn warm_reset(&mut self) -> Result<(), CardError> {
        self.transport.reset().map_err(|e| {
            self.poisoned = true;
            CardError::Transport(e)
        })?;
        self.current_app = None;
        self.arr_cache.clear();
        self.scanned_dir = false;
        Ok(())
    }

    /// Send one command with chaining. All card traffic funnels through
    /// here; a transport error poisons the session for good.
    pub fn exchange_cmd(&mut self, command: &ApduCommand) -> Result<(Vec<u8>, u16), CardError> {
        if self.poisoned {
            return Err(CardError::Transport(
                crate::errors::TransportError::ReaderDisconnected,
            ));
        }
        exchange(&mut self.transport, command).map_err(|e| {
            self.poisoned = true;
            CardError::Transport(e)
        })
    }

    // ---- selection ----------------------------------------------------

    pub fn select_mf(&mut self) -> Result<(), CardError> {
        let cmd = ApduCommand::select_file_id(self.cla(), MF);
        let (_, sw) = self.exchange_cmd(&cmd)?;
        expect_ok(Vec::new(), sw, 0xa4)?;
        Ok(())
    }

    /// SELECT a file id under the current directory and parse what the card
    /// says about it.
    pub fn select_file(&mut self, id: u16) -> Result<FileInfo, CardError> {
        let cmd = ApduCommand::select_file_id(self.cla(), id);
        let (data, sw) = self.exchange_cmd(&cmd)?;
        let data = expect_ok(data, sw, 0xa4)?;
        Ok(fcp::parse_select_response(&data)?)
    }

    /// Walk an absolute path from the master directory, one SELECT per
    /// identifier. Sequential selection works on every profile, including
    /// the 2G class.
    pub fn select_abs_path(&mut self, path: &[u16]) -> Result<FileInfo, CardError> {
        self.select_mf()?;
        let mut last = None;
        for &id in path {
            last = Some(self.select_file(id)?);
        }
        last.ok_or_else(|| {
            CardError::Validation(crate::errors::ValidationError::Unsupported("empty path"))
        })
    }

    fn select_aid(&mut self, aid: &[u8]) -> Result<FileInfo, CardError> {
        let cmd = ApduCommand::select_by_aid(self.cla(), aid);
        let (data, sw) = self.exchange_cmd(&cmd)?;
        let data = expect_ok(data, sw, 0xa4)?;
        Ok(fcp::parse_select_response(&data)?)
    }

    /// Scan the application directory file and remember the USIM and ISIM
    /// identifiers it advertises.
    pub fn detect_applications(&mut self) -> Result<(), CardError> {
        self.scanned_dir = true;
        self.select_mf()?;
        let info = match self.select_file(EF_DIR) {
            Ok(info) => info,
            Err(CardError::Protocol(ProtocolError { sw: 0x6a82, .. })) => {
                debug!("no application directory file");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let record_len = info.structure.record_len().unwrap_or(0) as u8;
        let count = info.structure.record_count().unwrap_or(0);
        for n in 1..=count {
            let cmd = ApduCommand::read_record(self.cla(), n, record_len);
            let (data, sw) = self.exchange_cmd(&cmd)?;
            if sw != 0x9000 {
                continue;
            }
            let Ok((template, _)) = Tlv::parse(&data) else {
                continue;
            };
            if template.tag != 0x61 {
                continue;
            }
            let Ok(inner) = template.children() else {
                continue;
            };
            if let Some(aid) = crate::tlv::find(&inner, 0x4f) {
                if aid.value.starts_with(&AID_USIM[..7]) {
                    info!("directory: USIM {}", hex::encode(&aid.value));
                    self.detected_usim_aid = Some(aid.value.clone());
                } else if aid.value.starts_with(&AID_ISIM[..7]) {
                    info!("directory: ISIM {}", hex::encode(&aid.value));
                    self.detected_isim_aid = Some(aid.value.clone());
                }
            }
        }
        Ok(())
    }

    /// Open the USIM or ISIM application: detected identifier first, then
    /// the well-known one, then the two-byte fallback path for cards that
    /// answer "instruction not supported" to selection by name. Previously
    /// verified admin keys are re-presented afterwards.
    pub fn open_app(&mut self, kind: AppKind) -> Result<(), CardError> {
        if !self.scanned_dir {
            // Best effort; cards without EF.DIR still open via the
            // well-known identifier
            if let Err(e) = self.detect_applications() {
                debug!("application scan failed: {}", e);
            }
        }
        let detected = match kind {
            AppKind::Usim => self.detected_usim_aid.clone(),
            AppKind::Isim => self.detected_isim_aid.clone(),
        };
        let well_known = match kind {
            AppKind::Usim => AID_USIM,
            AppKind::Isim => AID_ISIM,
        };
        let fallback = match kind {
            AppKind::Usim => self.usim_fallback_path.clone(),
            AppKind::Isim => self.isim_fallback_path.clone(),
        };

        let mut outcome = match detected {
            Some(aid) => self.select_aid(&aid).map(|_| ()),
            None => Err(CardError::Protocol(ProtocolError {
                sw: 0x6a82,
                ins: 0xa4,
            })),
        };
        if outcome.is_err() {
            outcome = self.select_aid(well_known).map(|_| ());
        }
        let needs_fallback = matches!(
            &outcome,
            Err(CardError::Protocol(ProtocolError { sw, .. }))
                if matches!(sw, 0x6d00 | 0x6e00 | 0x6a82 | 0x6a86)
        );
        if needs_fallback {
            if let Some(path) = fallback {
                debug!("selection by name unavailable, trying the fallback path");
                outcome = self.select_abs_path(&path).map(|_| ());
            }
        }
        outcome?;

        self.current_app = Some(kind);
        self.arr_cache.clear();
        self.rebind_credentials();
        Ok(())
    }

    /// Replay every admin key verified this power cycle, in presentation
    /// order. Individual failures are absorbed: not every admin level
    /// exists on every card.
    pub fn rebind_credentials(&mut self) {
        let replay: Vec<_> = self
            .credentials
            .admin_keys()
            .map(|(c, v)| (c, *v))
            .collect();
        for (credential, value) in replay {
            match credentials::present(&mut self.transport, self.driver.base_cla, credential, &value, false)
            {
                Ok(PresentOutcome::Verified) => debug!("re-bound {}", credential),
                Ok(PresentOutcome::AttemptsRemaining(n)) => {
                    warn!("re-bind of {} refused, {} attempts left", credential, n)
                }
                Err(e) => debug!("re-bind of {} skipped: {}", credential, e),
            }
        }
    }

    // ---- credentials ---------------------------------------------------

    /// Present a credential and cache it on success.
    pub fn verify(
        &mut self,
        credential: Credential,
        value: &[u8; 8],
        strict: bool,
    ) -> Result<PresentOutcome, CardError> {
        let outcome =
            credentials::present(&mut self.transport, self.driver.base_cla, credential, value, strict)?;
        if outcome == PresentOutcome::Verified {
            self.credentials.record(credential, *value);
        }
        Ok(outcome)
    }

    pub fn credentials(&self) -> &CredentialCache {
        &self.credentials
    }

    // ---- reading -------------------------------------------------------

    /// Read a transparent file in bounded chunks.
    pub fn read_transparent(
        &mut self,
        size: usize,
        cancel: Option<Cancel<'_>>,
    ) -> Result<Vec<u8>, CardError> {
        let mut out = Vec::with_capacity(size);
        let mut offset = 0usize;
        while offset < size {
            cancelled(cancel, offset)?;
            let chunk = (size - offset).min(255) as u8;
            let cmd = ApduCommand::read_binary(self.cla(), offset as u16, chunk);
            let (data, sw) = self.exchange_cmd(&cmd)?;
            let data = expect_ok(data, sw, 0xb0)?;
            if data.is_empty() {
                break;
            }
            offset += data.len();
            out.extend_from_slice(&data);
        }
        Ok(out)
    }

    pub fn read_record(&mut self, number: u8, len: u8) -> Result<Vec<u8>, CardError> {
        let cmd = ApduCommand::read_record(self.cla(), number, len);
        let (data, sw) = self.exchange_cmd(&cmd)?;
        expect_ok(data, sw, 0xb2)
    }

    pub fn read_all_records(
        &mut self,
        info: &FileInfo,
        cancel: Option<Cancel<'_>>,
    ) -> Result<Vec<Vec<u8>>, CardError> {
        let len = info.structure.record_len().unwrap_or(0) as u8;
        let count = info.structure.record_count().unwrap_or(0);
        let mut records = Vec::with_capacity(count as usize);
        for n in 1..=count {
            cancelled(cancel, records.len())?;
            records.push(self.read_record(n, len)?);
        }
        Ok(records)
    }

    /// SELECT and read one transparent elementary file.
    pub fn read_ef_transparent(&mut self, id: u16) -> Result<(FileInfo, Vec<u8>), CardError> {
        let info = self.select_file(id)?;
        let data = self.read_transparent(info.size, None)?;
        Ok((info, data))
    }

    /// SELECT and read every record of a record-based elementary file.
    pub fn read_ef_records(&mut self, id: u16) -> Result<(FileInfo, Vec<Vec<u8>>), CardError> {
        let info = self.select_file(id)?;
        let records = self.read_all_records(&info, None)?;
        Ok((info, records))
    }

    // ---- writing -------------------------------------------------------

    /// Re-present everything we know and report whether anything was
    /// available to retry with.
    fn represent_for_retry(&mut self) -> bool {
        if self.credentials.is_empty() {
            return false;
        }
        self.rebind_credentials();
        true
    }

    /// Write a transparent file in bounded chunks. On "security not
    /// satisfied" the cached credentials are re-presented once and the
    /// failing chunk retried.
    pub fn update_transparent(
        &mut self,
        info: &FileInfo,
        data: &[u8],
        cancel: Option<Cancel<'_>>,
    ) -> Result<(), CardError> {
        let mut offset = 0usize;
        let mut retried = false;
        while offset < data.len() {
            cancelled(cancel, offset)?;
            if self.driver.quirks.reselect_before_write {
                if let Some(id) = info.id {
                    self.select_file(id)?;
                }
            }
            let chunk = &data[offset..(offset + 255).min(data.len())];
            let cmd = ApduCommand::update_binary(self.cla(), offset as u16, chunk);
            let (_, sw) = self.exchange_cmd(&cmd)?;
            match sw {
                0x9000 => offset += chunk.len(),
                0x6982 if !retried && self.represent_for_retry() => retried = true,
                sw => return Err(CardError::Protocol(ProtocolError { sw, ins: 0xd6 })),
            }
        }
        Ok(())
    }

    pub fn update_record(&mut self, info: &FileInfo, number: u8, data: &[u8]) -> Result<(), CardError> {
        if self.driver.quirks.reselect_before_write {
            if let Some(id) = info.id {
                self.select_file(id)?;
            }
        }
        let cmd = ApduCommand::update_record(self.cla(), number, data);
        let (_, sw) = self.exchange_cmd(&cmd)?;
        match sw {
            0x9000 => Ok(()),
            0x6982 if self.represent_for_retry() => {
                let cmd = ApduCommand::update_record(self.cla(), number, data);
                let (_, sw) = self.exchange_cmd(&cmd)?;
                expect_ok(Vec::new(), sw, 0xdc).map(|_| ())
            }
            sw => Err(CardError::Protocol(ProtocolError { sw, ins: 0xdc })),
        }
    }

    // ---- access rules --------------------------------------------------

    /// Resolve a file's access conditions, chasing a referenced-security
    /// indirection into the access-rule file. Resolved records are memoized
    /// per application; the original file is re-selected afterwards so the
    /// caller's selection still holds.
    pub fn resolve_access(&mut self, info: &FileInfo) -> Result<AccessRule, CardError> {
        let rule = access::resolve_local(&info.security)?;
        let record = match (&rule.read, &rule.update) {
            (Condition::Arr(k), _) | (_, Condition::Arr(k)) => *k,
            _ => return Ok(rule),
        };
        if let Some(cached) = self.arr_cache.get(&record) {
            return Ok(cached.clone());
        }
        let arr_file = info
            .security
            .referenced
            .map(|(id, _)| id)
            .unwrap_or(EF_ARR);
        let resolved = match self.select_file(arr_file) {
            Ok(arr_info) => {
                let len = arr_info.structure.record_len().unwrap_or(0) as u8;
                let raw = self.read_record(record, len)?;
                let pairs = access::parse_expanded(&raw)?;
                access::rule_from_pairs(&pairs)
            }
            Err(CardError::Protocol(ProtocolError { sw: 0x6a82, .. })) => {
                // No access-rule file: leave the indirection symbolic
                rule.clone()
            }
            Err(e) => return Err(e),
        };
        self.arr_cache.insert(record, resolved.clone());
        if let Some(id) = info.id {
            self.select_file(id)?;
        }
        Ok(resolved)
    }
}

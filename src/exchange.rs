use log::debug;

use crate::errors::TransportError;

/// Base class byte for interindustry commands.
pub const CLA_ISO: u8 = 0x00;
/// Base class byte for the legacy 2G profile.
pub const CLA_GSM: u8 = 0xa0;
/// Class byte for GlobalPlatform proprietary commands.
pub const CLA_GP: u8 = 0x80;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ApduCommand {
    /// Command class
    pub cla: u8,
    /// Command instruction
    pub ins: u8,
    /// First byte of command parameter
    pub p1: u8,
    /// Second byte of command parameter
    pub p2: u8,
    /// Command data
    pub data: Vec<u8>,
    /// Number of bytes expected for response, between 0 and 256 inclusive
    pub ne: u16,
}

impl ApduCommand {
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8, data: impl Into<Vec<u8>>, ne: u16) -> Self {
        ApduCommand {
            cla,
            ins,
            p1,
            p2,
            data: data.into(),
            ne,
        }
    }

    /// Encode as a short APDU. The half-duplex telecom link never needs the
    /// extended form; data over 255 bytes is refused.
    pub fn encode(&self) -> Result<Vec<u8>, TransportError> {
        let nc = self.data.len();
        if nc > 255 {
            return Err(TransportError::CommandTooLong(nc));
        }
        let mut raw = Vec::with_capacity(6 + nc);
        raw.extend_from_slice(&[self.cla, self.ins, self.p1, self.p2]);
        if nc > 0 {
            raw.push(nc as u8);
            raw.extend_from_slice(&self.data);
        }
        if self.ne > 0 {
            // 256 will be 0x100 which we truncate to 0x00. This is correct.
            raw.push(self.ne as u8);
        }
        Ok(raw)
    }

    pub fn select_by_aid(cla: u8, aid: &[u8]) -> ApduCommand {
        ApduCommand {
            cla,
            ins: 0xa4, // SELECT
            p1: 0x04,  // Select by DF name
            p2: 0x04,  // First or only occurrence, return FCP
            data: aid.to_vec(),
            ne: 0x100,
        }
    }

    pub fn select_file_id(cla: u8, id: u16) -> ApduCommand {
        ApduCommand {
            cla,
            ins: 0xa4,
            p1: 0x00, // Select by file identifier
            // The legacy 2G profile only knows P2 = 0, and answers with its
            // non-TLV response shape
            p2: if cla == CLA_GSM { 0x00 } else { 0x04 },
            data: id.to_be_bytes().to_vec(),
            ne: 0x100,
        }
    }

    pub fn select_path(cla: u8, path: &[u16]) -> ApduCommand {
        let mut data = Vec::with_capacity(path.len() * 2);
        for id in path {
            data.extend_from_slice(&id.to_be_bytes());
        }
        ApduCommand {
            cla,
            ins: 0xa4,
            p1: 0x08, // Select by path from MF
            p2: if cla == CLA_GSM { 0x00 } else { 0x04 },
            data,
            ne: 0x100,
        }
    }

    pub fn read_binary(cla: u8, offset: u16, le: u8) -> ApduCommand {
        ApduCommand {
            cla,
            ins: 0xb0, // READ BINARY
            p1: (offset >> 8) as u8 & 0x7f,
            p2: offset as u8,
            data: Vec::new(),
            ne: le as u16,
        }
    }

    pub fn read_record(cla: u8, record: u8, le: u8) -> ApduCommand {
        ApduCommand {
            cla,
            ins: 0xb2, // READ RECORD
            p1: record,
            p2: 0x04, // Absolute record number, current EF
            data: Vec::new(),
            ne: le as u16,
        }
    }

    pub fn update_binary(cla: u8, offset: u16, data: &[u8]) -> ApduCommand {
        ApduCommand {
            cla,
            ins: 0xd6, // UPDATE BINARY
            p1: (offset >> 8) as u8 & 0x7f,
            p2: offset as u8,
            data: data.to_vec(),
            ne: 0,
        }
    }

    pub fn update_record(cla: u8, record: u8, data: &[u8]) -> ApduCommand {
        ApduCommand {
            cla,
            ins: 0xdc, // UPDATE RECORD
            p1: record,
            p2: 0x04,
            data: data.to_vec(),
            ne: 0,
        }
    }

    pub fn verify(cla: u8, reference: u8, value: &[u8]) -> ApduCommand {
        ApduCommand {
            cla,
            ins: 0x20, // VERIFY
            p1: 0x00,
            p2: reference,
            data: value.to_vec(),
            ne: 0,
        }
    }

    /// Parse a raw command APDU (script lines, dumped traces). Accepts the
    /// four header bytes with optional Lc/data/Le.
    pub fn from_raw(raw: &[u8]) -> Result<ApduCommand, TransportError> {
        if raw.len() < 4 {
            return Err(TransportError::ResponseTooShort(raw.len()));
        }
        let (cla, ins, p1, p2) = (raw[0], raw[1], raw[2], raw[3]);
        let rest = &raw[4..];
        let (data, ne) = match rest {
            [] => (Vec::new(), 0u16),
            [le] => (Vec::new(), if *le == 0 { 0x100 } else { *le as u16 }),
            [lc, tail @ ..] => {
                let lc = *lc as usize;
                if tail.len() == lc {
                    (tail.to_vec(), 0)
                } else if tail.len() == lc + 1 {
                    let le = tail[lc];
                    (
                        tail[..lc].to_vec(),
                        if le == 0 { 0x100 } else { le as u16 },
                    )
                } else {
                    return Err(TransportError::ResponseTooShort(raw.len()));
                }
            }
        };
        Ok(ApduCommand {
            cla,
            ins,
            p1,
            p2,
            data,
            ne,
        })
    }

    fn get_response(cla: u8, le: u8) -> ApduCommand {
        ApduCommand {
            // Chaining keeps the base class of the command it continues; the
            // legacy 2G profile insists on 0xA0 here
            cla: if cla & 0xf0 == 0xa0 { CLA_GSM } else { CLA_ISO },
            ins: 0xc0, // GET RESPONSE
            p1: 0x00,
            p2: 0x00,
            data: Vec::new(),
            ne: le as u16,
        }
    }
}

/// The byte pipe to one physical card. The only component that blocks on I/O:
/// a response is fully received before the next command goes out.
pub trait CardTransport {
    fn transmit(&mut self, apdu: &[u8]) -> Result<Vec<u8>, TransportError>;
    /// Warm-reset the card, returning the fresh answer-to-reset. Any
    /// secure-channel or selection state above this layer is void afterwards.
    fn reset(&mut self) -> Result<Vec<u8>, TransportError>;
    fn atr(&self) -> &[u8];
}

/// A PC/SC connected reader.
pub struct PcscReader {
    card: pcsc::Card,
    atr: Vec<u8>,
}

impl PcscReader {
    /// Connect to the reader at `index` (see list-readers) with exclusive
    /// access.
    pub fn connect(context: &pcsc::Context, index: usize) -> Result<Self, TransportError> {
        let readers = context
            .list_readers_owned()
            .map_err(TransportError::from)?;
        let name = readers
            .get(index)
            .ok_or(TransportError::ReaderDisconnected)?;
        let card = context
            .connect(name, pcsc::ShareMode::Exclusive, pcsc::Protocols::ANY)
            .map_err(TransportError::from)?;
        let atr = Self::fetch_atr(&card)?;
        Ok(PcscReader { card, atr })
    }

    fn fetch_atr(card: &pcsc::Card) -> Result<Vec<u8>, TransportError> {
        let mut buf = [0u8; pcsc::MAX_ATR_SIZE];
        let atr = card
            .get_attribute(pcsc::Attribute::AtrString, &mut buf)
            .map_err(TransportError::from)?;
        Ok(atr.to_vec())
    }
}

impl CardTransport for PcscReader {
    fn transmit(&mut self, apdu: &[u8]) -> Result<Vec<u8>, TransportError> {
        let mut buf = [0u8; 4096];
        let data = self
            .card
            .transmit(apdu, &mut buf)
            .map_err(TransportError::from)?;
        Ok(data.to_vec())
    }

    fn reset(&mut self) -> Result<Vec<u8>, TransportError> {
        self.card
            .reconnect(
                pcsc::ShareMode::Exclusive,
                pcsc::Protocols::ANY,
                pcsc::Disposition::ResetCard,
            )
            .map_err(TransportError::from)?;
        self.atr = Self::fetch_atr(&self.card)?;
        Ok(self.atr.clone())
    }

    fn atr(&self) -> &[u8] {
        &self.atr
    }
}

/// Send one command and collect the full response, following the telecom
/// chaining conventions: 0x61LL pulls the payload with GET RESPONSE, 0x6CLL
/// reissues the command with the corrected Le. Other status words are
/// returned as-is and never chained on.
pub fn exchange(
    transport: &mut dyn CardTransport,
    command: &ApduCommand,
) -> Result<(Vec<u8>, u16), TransportError> {
    let raw = command.encode()?;
    debug!("=> {}", hex::encode(&raw));
    let mut data = transport.transmit(&raw)?;
    if data.len() < 2 {
        return Err(TransportError::ResponseTooShort(data.len()));
    }
    let mut sw1 = data[data.len() - 2];
    let mut sw2 = data[data.len() - 1];
    let mut response = data[..data.len() - 2].to_vec();

    if sw1 == 0x6c {
        // Wrong Le, reissue with the size the card wants
        let mut corrected = command.clone();
        corrected.ne = if sw2 == 0 { 0x100 } else { sw2 as u16 };
        let raw = corrected.encode()?;
        debug!("=> {} (Le corrected)", hex::encode(&raw));
        data = transport.transmit(&raw)?;
        if data.len() < 2 {
            return Err(TransportError::ResponseTooShort(data.len()));
        }
        sw1 = data[data.len() - 2];
        sw2 = data[data.len() - 1];
        response = data[..data.len() - 2].to_vec();
    }

    // 0x9F LL is the legacy 2G spelling of 0x61 LL
    while sw1 == 0x61 || (sw1 == 0x9f && command.cla & 0xf0 == 0xa0) {
        // Continuation data available
        let cont = ApduCommand::get_response(command.cla, sw2);
        let raw = cont.encode()?;
        debug!("=> {} (get response)", hex::encode(&raw));
        data = transport.transmit(&raw)?;
        if data.len() < 2 {
            return Err(TransportError::ResponseTooShort(data.len()));
        }
        sw1 = data[data.len() - 2];
        sw2 = data[data.len() - 1];
        response.extend_from_slice(&data[..data.len() - 2]);
    }

    let sw = (sw1 as u16) << 8 | sw2 as u16;
    debug!("<= {} {:04x}", hex::encode(&response), sw);
    Ok((response, sw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testcard::MockCard;

    #[test]
    fn encode_case_1_and_2() {
        let apdu = ApduCommand::new(0x00, 0xb0, 0x00, 0x10, vec![], 0x20);
        assert_eq!(apdu.encode().unwrap(), vec![0x00, 0xb0, 0x00, 0x10, 0x20]);
        let apdu = ApduCommand::new(0x00, 0x20, 0x00, 0x01, vec![0x31; 8], 0);
        assert_eq!(
            apdu.encode().unwrap(),
            [&[0x00, 0x20, 0x00, 0x01, 0x08][..], &[0x31; 8]].concat()
        );
    }

    #[test]
    fn encode_le_256_truncates_to_zero() {
        let apdu = ApduCommand::new(0x00, 0xa4, 0x04, 0x04, vec![0x3f, 0x00], 0x100);
        assert_eq!(
            apdu.encode().unwrap(),
            vec![0x00, 0xa4, 0x04, 0x04, 0x02, 0x3f, 0x00, 0x00]
        );
    }

    #[test]
    fn encode_refuses_oversized_data() {
        let apdu = ApduCommand::new(0x00, 0xd6, 0, 0, vec![0u8; 256], 0);
        assert_eq!(apdu.encode(), Err(TransportError::CommandTooLong(256)));
    }

    #[test]
    fn chain_61_pulls_with_get_response() {
        let mut card = MockCard::new(vec![
            (
                vec![0x00, 0xa4, 0x04, 0x04, 0x02, 0xa0, 0x00, 0x00],
                vec![0x61, 0x04],
            ),
            (
                vec![0x00, 0xc0, 0x00, 0x00, 0x04],
                vec![0x62, 0x02, 0x80, 0x00, 0x90, 0x00],
            ),
        ]);
        let (data, sw) = exchange(
            &mut card,
            &ApduCommand::select_by_aid(CLA_ISO, &[0xa0, 0x00]),
        )
        .unwrap();
        assert_eq!(sw, 0x9000);
        assert_eq!(data, vec![0x62, 0x02, 0x80, 0x00]);
    }

    #[test]
    fn chain_6c_reissues_with_corrected_le() {
        let mut card = MockCard::new(vec![
            (vec![0x00, 0xb0, 0x00, 0x00, 0x00], vec![0x6c, 0x02]),
            (vec![0x00, 0xb0, 0x00, 0x00, 0x02], vec![0xca, 0xfe, 0x90, 0x00]),
        ]);
        let cmd = ApduCommand::new(CLA_ISO, 0xb0, 0x00, 0x00, vec![], 0x100);
        let (data, sw) = exchange(&mut card, &cmd).unwrap();
        assert_eq!(sw, 0x9000);
        assert_eq!(data, vec![0xca, 0xfe]);
    }

    #[test]
    fn legacy_class_preserved_on_get_response() {
        let mut card = MockCard::new(vec![
            (vec![0xa0, 0xa4, 0x00, 0x00, 0x02, 0x6f, 0x07, 0x00], vec![0x9f, 0x0f]),
            (
                [vec![0xa0, 0xc0, 0x00, 0x00, 0x0f], vec![]].concat(),
                [vec![0u8; 15], vec![0x90, 0x00]].concat(),
            ),
        ]);
        // 2G cards answer SELECT with 0x9F LL, the legacy spelling of 0x61
        let cmd = ApduCommand::select_file_id(CLA_GSM, 0x6f07);
        let (data, sw) = exchange(&mut card, &cmd).unwrap();
        assert_eq!(sw, 0x9000);
        assert_eq!(data.len(), 15);
        assert!(card.exhausted());
    }

    #[test]
    fn from_raw_all_cases() {
        let apdu = ApduCommand::from_raw(&[0x00, 0xa4, 0x04, 0x00]).unwrap();
        assert!(apdu.data.is_empty());
        assert_eq!(apdu.ne, 0);

        let apdu = ApduCommand::from_raw(&[0x00, 0xb0, 0x00, 0x00, 0x10]).unwrap();
        assert_eq!(apdu.ne, 0x10);

        let apdu = ApduCommand::from_raw(&[0x00, 0xa4, 0x00, 0x04, 0x02, 0x3f, 0x00]).unwrap();
        assert_eq!(apdu.data, vec![0x3f, 0x00]);
        assert_eq!(apdu.ne, 0);

        let apdu =
            ApduCommand::from_raw(&[0x00, 0xa4, 0x00, 0x04, 0x02, 0x3f, 0x00, 0x00]).unwrap();
        assert_eq!(apdu.ne, 0x100);

        assert!(ApduCommand::from_raw(&[0x00, 0xa4]).is_err());
        assert!(ApduCommand::from_raw(&[0x00, 0xa4, 0x00, 0x04, 0x05, 0x3f]).is_err());
    }

    #[test]
    fn wrong_instruction_never_loops() {
        let mut card = MockCard::new(vec![(vec![0x00, 0xff, 0x00, 0x00], vec![0x6d, 0x00])]);
        let (data, sw) = exchange(
            &mut card,
            &ApduCommand::new(0x00, 0xff, 0x00, 0x00, vec![], 0),
        )
        .unwrap();
        assert_eq!(sw, 0x6d00);
        assert!(data.is_empty());
        assert!(card.exhausted());
    }
}

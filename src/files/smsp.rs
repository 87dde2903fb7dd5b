//! Short message service parameters: the record that tells the handset
//! which service centre to use.
//!
//! From the back: validity period (1), data coding scheme (1), protocol id
//! (1), service-centre address (12), destination address (12), parameter
//! indicators (1); everything before is the alpha identifier. An indicator
//! bit set to 1 means the parameter is absent.

use super::{trim_ff, CodecError};
use crate::bcd;
use crate::tlv::DecodeError;

const TAIL: usize = 28;

const IND_DEST: u8 = 0x01;
const IND_SC: u8 = 0x02;
const IND_PID: u8 = 0x04;
const IND_DCS: u8 = 0x08;
const IND_VP: u8 = 0x10;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Smsp {
    pub label: String,
    /// Service-centre number; a leading '+' marks the international type.
    pub smsc: Option<String>,
    pub pid: Option<u8>,
    pub dcs: Option<u8>,
    pub validity: Option<u8>,
}

fn decode_sc_address(raw: &[u8]) -> Result<Option<String>, CodecError> {
    let len = raw[0] as usize;
    if len == 0 || len == 0xff || len > 11 {
        return Ok(None);
    }
    let ton = raw[1];
    let digits = bcd::decode_phone(&raw[2..1 + len])?;
    Ok(Some(if ton == super::msisdn::TON_INTERNATIONAL {
        format!("+{}", digits)
    } else {
        digits
    }))
}

pub fn decode(record: &[u8]) -> Result<Option<Smsp>, CodecError> {
    if record.len() < TAIL {
        return Err(DecodeError::BadShape("SMS parameter record").into());
    }
    if record.iter().all(|&b| b == 0xff) {
        return Ok(None);
    }
    let alpha_len = record.len() - TAIL;
    let tail = &record[alpha_len..];
    let indicators = tail[0];
    let label = String::from_utf8(trim_ff(&record[..alpha_len]).to_vec())
        .map_err(|_| DecodeError::BadShape("SMS parameter alpha identifier"))?;
    let smsc = if indicators & IND_SC == 0 {
        decode_sc_address(&tail[13..25])?
    } else {
        None
    };
    Ok(Some(Smsp {
        label,
        smsc,
        pid: (indicators & IND_PID == 0).then(|| tail[25]),
        dcs: (indicators & IND_DCS == 0).then(|| tail[26]),
        validity: (indicators & IND_VP == 0).then(|| tail[27]),
    }))
}

pub fn encode(smsp: &Smsp, record_len: usize) -> Result<Vec<u8>, CodecError> {
    if record_len < TAIL || smsp.label.len() > record_len - TAIL {
        return Err(CodecError::DoesNotFit {
            need: TAIL + smsp.label.len(),
            have: record_len,
        });
    }
    let alpha_len = record_len - TAIL;
    let mut out = vec![0xffu8; record_len];
    out[..smsp.label.len()].copy_from_slice(smsp.label.as_bytes());

    // Destination address never written here
    let mut indicators = IND_DEST | IND_SC | IND_PID | IND_DCS | IND_VP;
    let tail = &mut out[alpha_len..];
    if let Some(smsc) = &smsp.smsc {
        let (number, ton) = match smsc.strip_prefix('+') {
            Some(rest) => (rest, super::msisdn::TON_INTERNATIONAL),
            None => (smsc.as_str(), super::msisdn::TON_UNKNOWN),
        };
        let digits = bcd::encode_phone(number)?;
        if digits.len() > 10 {
            return Err(CodecError::DoesNotFit {
                need: digits.len(),
                have: 10,
            });
        }
        indicators &= !IND_SC;
        tail[13] = (digits.len() + 1) as u8;
        tail[14] = ton;
        tail[15..15 + digits.len()].copy_from_slice(&digits);
    }
    if let Some(pid) = smsp.pid {
        indicators &= !IND_PID;
        tail[25] = pid;
    }
    if let Some(dcs) = smsp.dcs {
        indicators &= !IND_DCS;
        tail[26] = dcs;
    }
    if let Some(vp) = smsp.validity {
        indicators &= !IND_VP;
        tail[27] = vp;
    }
    tail[0] = indicators;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let smsp = Smsp {
            label: "SMS".to_string(),
            smsc: Some("+79262909090".to_string()),
            pid: Some(0),
            dcs: Some(0),
            validity: Some(0xa7),
        };
        let record = encode(&smsp, 34).unwrap();
        assert_eq!(record.len(), 34);
        assert_eq!(decode(&record).unwrap().unwrap(), smsp);
    }

    #[test]
    fn erased_record() {
        assert_eq!(decode(&[0xff; 28]).unwrap(), None);
    }

    #[test]
    fn absent_parameters_stay_absent() {
        let smsp = Smsp {
            label: String::new(),
            smsc: Some("1234".to_string()),
            ..Default::default()
        };
        let record = encode(&smsp, 28).unwrap();
        let decoded = decode(&record).unwrap().unwrap();
        assert_eq!(decoded.smsc.as_deref(), Some("1234"));
        assert_eq!(decoded.pid, None);
        assert_eq!(decoded.validity, None);
    }
}

//! The card registry and content lifecycle, all over the secure channel:
//! enumerate what is on the card, delete by identifier, and the
//! install-for-load / LOAD / install-for-install choreography.
//!
//! Every operation leaves the channel usable on success. Any failure
//! invalidates it: after a partial LOAD the card's content state is
//! undefined and nothing further should be trusted to it.

pub mod aram;
pub mod cap;

use log::{debug, info};
use sha1::{Digest, Sha1};

use crate::errors::{CardError, ProtocolError};
use crate::exchange::{ApduCommand, CardTransport};
use crate::nav::Cancel;
use crate::scp::SecureChannel;
use crate::tlv::Tlv;

pub use cap::CapFile;

/// GET STATUS category selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCategory {
    IssuerSecurityDomain,
    Applications,
    LoadFiles,
    Modules,
}

impl StatusCategory {
    pub const ALL: [StatusCategory; 4] = [
        StatusCategory::IssuerSecurityDomain,
        StatusCategory::Applications,
        StatusCategory::LoadFiles,
        StatusCategory::Modules,
    ];

    fn p1(self) -> u8 {
        match self {
            StatusCategory::IssuerSecurityDomain => 0x80,
            StatusCategory::Applications => 0x40,
            StatusCategory::LoadFiles => 0x20,
            StatusCategory::Modules => 0x10,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            StatusCategory::IssuerSecurityDomain => "issuer security domain",
            StatusCategory::Applications => "applications",
            StatusCategory::LoadFiles => "load files",
            StatusCategory::Modules => "modules",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub aid: Vec<u8>,
    pub lifecycle: u8,
    pub privileges: u8,
}

fn parse_status_entries(raw: &[u8]) -> Vec<RegistryEntry> {
    // Legacy format: length-prefixed AID, lifecycle byte, privilege byte
    let mut entries = Vec::new();
    let mut rest = raw;
    while let Some((&len, tail)) = rest.split_first() {
        let len = len as usize;
        if len == 0 || tail.len() < len + 2 {
            break;
        }
        entries.push(RegistryEntry {
            aid: tail[..len].to_vec(),
            lifecycle: tail[len],
            privileges: tail[len + 1],
        });
        rest = &tail[len + 2..];
    }
    entries
}

/// Iterate GET STATUS for one category, following the more-data status word
/// by setting P2's low bit until the card is done.
pub fn get_status<T: CardTransport>(
    channel: &mut SecureChannel<'_, T>,
    category: StatusCategory,
) -> Result<Vec<RegistryEntry>, CardError> {
    let mut entries = Vec::new();
    let mut p2 = 0x00u8;
    loop {
        let cmd = ApduCommand::new(
            0x80,
            0xf2,
            category.p1(),
            p2,
            vec![0x4f, 0x00],
            0x100,
        );
        let (data, sw) = channel.wrap_and_send(&cmd)?;
        match sw {
            0x9000 | 0x6310 => entries.extend(parse_status_entries(&data)),
            // Empty category on some cards
            0x6a83 => break,
            sw => {
                channel.invalidate();
                return Err(CardError::Protocol(ProtocolError { sw, ins: 0xf2 }));
            }
        }
        if sw != 0x6310 {
            break;
        }
        p2 = 0x01;
    }
    debug!("{}: {} entries", category.label(), entries.len());
    Ok(entries)
}

/// One DELETE carrying the whole identifier list, with related objects.
pub fn delete<T: CardTransport>(
    channel: &mut SecureChannel<'_, T>,
    aids: &[Vec<u8>],
) -> Result<(), CardError> {
    let mut data = Vec::new();
    for aid in aids {
        Tlv::new(0x4f, aid.clone()).encode_into(&mut data);
    }
    let cmd = ApduCommand::new(0x80, 0xe4, 0x00, 0x80, data, 0x100);
    let (_, sw) = channel.wrap_and_send(&cmd)?;
    if sw != 0x9000 {
        channel.invalidate();
        return Err(CardError::Protocol(ProtocolError { sw, ins: 0xe4 }));
    }
    info!("deleted {} identifiers", aids.len());
    Ok(())
}

/// Everything install-for-install needs to place one applet instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallSpec {
    pub package_aid: Vec<u8>,
    pub module_aid: Vec<u8>,
    pub instance_aid: Vec<u8>,
    pub privileges: u8,
    /// Raw install parameters, wrapped in the C9 DO on the wire.
    pub params: Vec<u8>,
    /// Security domain owning the load file; empty means the current one.
    pub sd_aid: Vec<u8>,
}

fn lv(out: &mut Vec<u8>, data: &[u8]) {
    out.push(data.len() as u8);
    out.extend_from_slice(data);
}

/// install-for-load + LOAD in blocks + install-for-install-and-make-
/// selectable. The cancellation predicate runs at every block boundary.
pub fn load_and_install<T: CardTransport>(
    channel: &mut SecureChannel<'_, T>,
    cap: &CapFile,
    spec: &InstallSpec,
    block_size: usize,
    cancel: Option<Cancel<'_>>,
) -> Result<(), CardError> {
    let load_data = cap.load_data();
    let hash = Sha1::digest(&load_data);

    // install [for load]
    let mut data = Vec::new();
    lv(&mut data, &spec.package_aid);
    lv(&mut data, &spec.sd_aid);
    lv(&mut data, &hash);
    lv(&mut data, &[]);
    lv(&mut data, &[]);
    let cmd = ApduCommand::new(0x80, 0xe6, 0x02, 0x00, data, 0x100);
    let (_, sw) = channel.wrap_and_send(&cmd)?;
    if sw != 0x9000 {
        channel.invalidate();
        return Err(CardError::Protocol(ProtocolError { sw, ins: 0xe6 }));
    }

    // LOAD: one C4 block, split and counted
    let mut blob = Vec::with_capacity(load_data.len() + 4);
    Tlv::new(0xc4, load_data).encode_into(&mut blob);
    let block_size = block_size.clamp(16, 240);
    let blocks: Vec<&[u8]> = blob.chunks(block_size).collect();
    info!("loading {} bytes in {} blocks", blob.len(), blocks.len());
    for (index, block) in blocks.iter().enumerate() {
        if let Some(f) = cancel {
            if f() {
                channel.invalidate();
                return Err(CardError::Cancelled { done: index });
            }
        }
        let last = index == blocks.len() - 1;
        let cmd = ApduCommand::new(
            0x80,
            0xe8,
            if last { 0x80 } else { 0x00 },
            index as u8,
            block.to_vec(),
            if last { 0x100 } else { 0 },
        );
        let (_, sw) = channel.wrap_and_send(&cmd)?;
        if sw != 0x9000 {
            channel.invalidate();
            return Err(CardError::Protocol(ProtocolError { sw, ins: 0xe8 }));
        }
    }

    // install [for install and make selectable]
    let mut params = Vec::new();
    Tlv::new(0xc9, spec.params.clone()).encode_into(&mut params);
    let mut data = Vec::new();
    lv(&mut data, &spec.package_aid);
    lv(&mut data, &spec.module_aid);
    lv(&mut data, &spec.instance_aid);
    lv(&mut data, &[spec.privileges]);
    lv(&mut data, &params);
    lv(&mut data, &[]);
    let cmd = ApduCommand::new(0x80, 0xe6, 0x0c, 0x00, data, 0x100);
    let (_, sw) = channel.wrap_and_send(&cmd)?;
    if sw != 0x9000 {
        channel.invalidate();
        return Err(CardError::Protocol(ProtocolError { sw, ins: 0xe6 }));
    }
    info!("installed {}", hex::encode(&spec.instance_aid));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_entry_parsing() {
        let raw = [
            0x08, 0xa0, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01, 0x9e, // ISD
            0x05, 0xa0, 0x00, 0x00, 0x01, 0x51, 0x07, 0x00,
        ];
        let entries = parse_status_entries(&raw);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].aid.len(), 8);
        assert_eq!(entries[0].lifecycle, 0x01);
        assert_eq!(entries[0].privileges, 0x9e);
        assert_eq!(entries[1].aid, vec![0xa0, 0x00, 0x00, 0x01, 0x51]);
    }

    #[test]
    fn truncated_status_entries_stop_cleanly() {
        let raw = [0x08, 0xa0, 0x00];
        assert!(parse_status_entries(&raw).is_empty());
        assert!(parse_status_entries(&[]).is_empty());
    }
}

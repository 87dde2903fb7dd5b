//! Vendor driver selection by answer-to-reset fingerprint.
//!
//! Consulted once when a session opens; the chosen driver decides the base
//! class byte and where the vendor keeps its proprietary algorithm and key
//! files. Prefix matching is a heuristic, so the choice can be overridden by
//! name from configuration.

use lazy_static::lazy_static;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Quirks {
    /// Vendor files only reachable by two-byte path with the 2G class, even
    /// when the card otherwise speaks 0x00.
    pub vendor_files_use_gsm_class: bool,
    /// UPDATE BINARY must be preceded by a fresh SELECT of the target file.
    pub reselect_before_write: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct CardDriver {
    pub name: &'static str,
    pub atr_prefixes: &'static [&'static [u8]],
    /// Class byte used everywhere after session open.
    pub base_cla: u8,
    /// Path of the proprietary algorithm-selector file, if the vendor has one.
    pub algo_selector_file: Option<&'static [u16]>,
    /// Named key files (label, path from MF).
    pub key_files: &'static [(&'static str, &'static [u16])],
    pub quirks: Quirks,
}

pub static STANDARD: CardDriver = CardDriver {
    name: "standard",
    atr_prefixes: &[],
    base_cla: 0x00,
    algo_selector_file: None,
    key_files: &[],
    quirks: Quirks {
        vendor_files_use_gsm_class: false,
        reselect_before_write: false,
    },
};

lazy_static! {
    static ref DRIVERS: Vec<CardDriver> = vec![
        CardDriver {
            name: "grcard2",
            atr_prefixes: &[&[0x3b, 0x99, 0x18, 0x00], &[0x3b, 0x9e, 0x95, 0x80]],
            base_cla: 0x00,
            algo_selector_file: Some(&[0x7fe0, 0x6fe0]),
            key_files: &[
                ("ki", &[0x7fe0, 0x6fe1]),
                ("opc", &[0x7fe0, 0x6fe2]),
            ],
            quirks: Quirks {
                vendor_files_use_gsm_class: true,
                reselect_before_write: false,
            },
        },
        CardDriver {
            name: "sysmo-usim",
            atr_prefixes: &[&[0x3b, 0x9f, 0x96, 0x80, 0x1f, 0xc7]],
            base_cla: 0x00,
            algo_selector_file: Some(&[0xa515]),
            key_files: &[("ki", &[0xa001]), ("opc", &[0xa001])],
            quirks: Quirks {
                vendor_files_use_gsm_class: false,
                reselect_before_write: false,
            },
        },
        CardDriver {
            name: "legacy-2g",
            atr_prefixes: &[&[0x3b, 0x16], &[0x3b, 0x02]],
            base_cla: 0xa0,
            algo_selector_file: None,
            key_files: &[],
            quirks: Quirks {
                vendor_files_use_gsm_class: true,
                reselect_before_write: true,
            },
        },
    ];
}

/// Longest matching ATR prefix wins; no match falls back to the standard
/// interindustry driver.
pub fn driver_for_atr(atr: &[u8]) -> &'static CardDriver {
    let mut best: Option<(&'static CardDriver, usize)> = None;
    for driver in DRIVERS.iter() {
        for prefix in driver.atr_prefixes {
            if atr.starts_with(prefix) {
                match best {
                    Some((_, len)) if len >= prefix.len() => {}
                    _ => best = Some((driver, prefix.len())),
                }
            }
        }
    }
    best.map(|(d, _)| d).unwrap_or(&STANDARD)
}

pub fn driver_by_name(name: &str) -> Option<&'static CardDriver> {
    if name == STANDARD.name {
        return Some(&STANDARD);
    }
    DRIVERS.iter().find(|d| d.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_atr_gets_standard_driver() {
        let d = driver_for_atr(&[0x3b, 0x00]);
        assert_eq!(d.name, "standard");
        assert_eq!(d.base_cla, 0x00);
    }

    #[test]
    fn longest_prefix_wins() {
        let d = driver_for_atr(&[0x3b, 0x9f, 0x96, 0x80, 0x1f, 0xc7, 0x80, 0x31]);
        assert_eq!(d.name, "sysmo-usim");
    }

    #[test]
    fn legacy_card_uses_gsm_class() {
        let d = driver_for_atr(&[0x3b, 0x16, 0x94, 0x71]);
        assert_eq!(d.base_cla, 0xa0);
        assert!(d.quirks.reselect_before_write);
    }

    #[test]
    fn lookup_by_name() {
        assert!(driver_by_name("grcard2").is_some());
        assert!(driver_by_name("standard").is_some());
        assert!(driver_by_name("nope").is_none());
    }
}

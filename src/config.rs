//! The JSON configuration file consumed by `write`, `esim build` and the
//! secure-channel subcommands. Nullable booleans mean "leave unchanged".

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::files::plmn::AccessTech;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CardConfig {
    pub iccid: Option<String>,
    pub imsi: Option<String>,
    pub spn: Option<String>,
    pub mcc: Option<String>,
    pub mnc: Option<String>,
    pub operation_mode: Option<String>,
    pub languages: Option<Vec<String>>,
    pub hplmn: Option<Vec<PlmnEntry>>,
    pub oplmn: Option<Vec<PlmnEntry>>,
    pub user_plmn: Option<Vec<PlmnEntry>>,
    #[serde(default)]
    pub clear_fplmn: bool,
    pub isim: Option<IsimConfig>,
    #[serde(default)]
    pub services: ServicesConfig,
    pub programmable: Option<ProgrammableConfig>,
    pub global_platform: Option<GpConfig>,
    /// Driver override for cards whose answer-to-reset defeats the
    /// heuristic.
    pub driver: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlmnEntry {
    pub mcc: String,
    pub mnc: String,
    /// Access-technology names; absent means all.
    pub act: Option<Vec<String>>,
}

impl PlmnEntry {
    pub fn access_tech(&self) -> Result<AccessTech, crate::errors::ValidationError> {
        let Some(names) = &self.act else {
            return Ok(AccessTech::ALL);
        };
        let mut mask = 0u16;
        for name in names {
            mask |= match name.to_ascii_lowercase().as_str() {
                "utran" | "3g" => AccessTech::UTRAN,
                "eutran" | "e-utran" | "4g" | "lte" => AccessTech::EUTRAN,
                "gsm" | "2g" => AccessTech::GSM,
                "gsm-compact" => AccessTech::GSM_COMPACT,
                "nr" | "5g" => AccessTech::NR,
                "ng-ran" => AccessTech::NG_RAN,
                _ => {
                    return Err(crate::errors::ValidationError::Unsupported(
                        "access technology name",
                    ))
                }
            };
        }
        Ok(AccessTech(mask))
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct IsimConfig {
    pub impi: Option<String>,
    #[serde(default)]
    pub impu: Vec<String>,
    pub domain: Option<String>,
    #[serde(default)]
    pub pcscf: Vec<String>,
}

/// Service switches; every one is tri-state.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServicesConfig {
    pub volte: Option<bool>,
    pub vowifi: Option<bool>,
    pub sms_over_ip: Option<bool>,
    pub gsm_access: Option<bool>,
    pub call_control: Option<bool>,
    pub gba: Option<bool>,
    #[serde(rename = "5g_nas_config")]
    pub nas_config_5g: Option<bool>,
    #[serde(rename = "5g_nssai")]
    pub nssai_5g: Option<bool>,
    pub suci_calculation: Option<bool>,
    pub isim_pcscf: Option<bool>,
    pub isim_sms_over_ip: Option<bool>,
    pub isim_voice_domain_pref: Option<bool>,
    pub isim_gba: Option<bool>,
    pub isim_http_digest: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProgrammableConfig {
    pub ki: Option<String>,
    pub op: Option<String>,
    pub opc: Option<String>,
    pub iccid: Option<String>,
    pub msisdn: Option<String>,
    pub acc: Option<String>,
    pub pin1: Option<String>,
    pub puk1: Option<String>,
    pub pin2: Option<String>,
    pub puk2: Option<String>,
    pub algorithm: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GpConfig {
    pub sd_aid: Option<String>,
    pub security_level: Option<String>,
    pub kvn: Option<u8>,
    pub scp: Option<u8>,
    #[serde(default)]
    pub keysets: Vec<KeysetConfig>,
    pub dms: Option<String>,
    #[serde(default)]
    pub aram: Vec<AramEntry>,
    #[serde(default)]
    pub applets: Vec<AppletEntry>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KeysetConfig {
    pub name: Option<String>,
    pub kvn: Option<u8>,
    /// Single-value PSK mode; overrides the triple.
    pub psk: Option<String>,
    pub enc: Option<String>,
    pub mac: Option<String>,
    pub dek: Option<String>,
}

impl KeysetConfig {
    pub fn static_keys(&self) -> Result<crate::scp::StaticKeys, crate::errors::ValidationError> {
        if let Some(psk) = &self.psk {
            let key: [u8; 16] = crate::util::parse_hex_exact(psk, 16)?.try_into().unwrap();
            return Ok(crate::scp::StaticKeys::from_psk(key));
        }
        match (&self.enc, &self.mac, &self.dek) {
            (Some(enc), Some(mac), Some(dek)) => {
                crate::scp::StaticKeys::from_hex(enc, mac, dek)
            }
            _ => Err(crate::errors::ValidationError::Unsupported(
                "keyset without psk or enc/mac/dek",
            )),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AramEntry {
    pub aid: Option<String>,
    pub hash: String,
    pub permission: Option<String>,
    pub apdu_rule: Option<u8>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppletEntry {
    pub cap_file: String,
    pub package_aid: String,
    pub module_aid: String,
    pub instance_aid: String,
    #[serde(default)]
    pub privileges: u8,
    pub params: Option<String>,
}

pub fn load(path: &Path) -> anyhow::Result<CardConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_config() {
        let text = r#"{
            "imsi": "250880000000003",
            "mcc": "250", "mnc": "88",
            "operation_mode": "normal",
            "languages": ["en", "ru"],
            "hplmn": [{"mcc": "250", "mnc": "88", "act": ["eutran", "nr"]}],
            "clear_fplmn": true,
            "isim": {"impi": "user@example.org", "impu": ["sip:user@example.org"]},
            "services": {"volte": true, "5g_nas_config": false},
            "programmable": {"ki": "000102030405060708090a0b0c0d0e0f", "algorithm": "milenage"},
            "global_platform": {"kvn": 1, "keysets": [{"name": "cm", "psk": "404142434445464748494a4b4c4d4e4f"}]}
        }"#;
        let config: CardConfig = serde_json::from_str(text).unwrap();
        assert_eq!(config.imsi.as_deref(), Some("250880000000003"));
        assert!(config.clear_fplmn);
        assert_eq!(config.services.volte, Some(true));
        assert_eq!(config.services.nas_config_5g, Some(false));
        assert_eq!(config.services.vowifi, None);
        let act = config.hplmn.as_ref().unwrap()[0].access_tech().unwrap();
        assert!(act.contains(AccessTech::EUTRAN));
        assert!(act.contains(AccessTech::NR));
        assert!(!act.contains(AccessTech::GSM));
        let keys = config.global_platform.unwrap().keysets[0]
            .static_keys()
            .unwrap();
        assert_eq!(keys.enc, keys.mac);
    }

    #[test]
    fn minimal_config() {
        let config: CardConfig = serde_json::from_str("{}").unwrap();
        assert!(config.imsi.is_none());
        assert!(!config.clear_fplmn);
        assert_eq!(config.services.volte, None);
    }

    #[test]
    fn keyset_needs_material() {
        let keyset = KeysetConfig::default();
        assert!(keyset.static_keys().is_err());
    }
}

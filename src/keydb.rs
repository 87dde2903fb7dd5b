//! The external key database: a plain-text table with a `var_out:` header
//! naming slash-separated fields, then whitespace-separated rows. Lookup is
//! by ICCID or IMSI; keyset extraction is by keyset name.

use std::collections::HashMap;

use crate::errors::ValidationError;
use crate::scp::StaticKeys;

#[derive(Debug, Clone)]
pub struct KeyDb {
    fields: Vec<String>,
    rows: Vec<Vec<String>>,
}

/// One matched row, addressable by field name.
#[derive(Debug, Clone)]
pub struct KeyRecord<'a> {
    values: HashMap<&'a str, &'a str>,
}

impl<'a> KeyRecord<'a> {
    pub fn get(&self, field: &str) -> Option<&'a str> {
        let wanted = field.to_ascii_uppercase();
        self.values
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(&wanted))
            .map(|(_, v)| *v)
    }

    /// A keyset by name: either the `<NAME>_ENC/_MAC/_DEK` triple, or a
    /// single `<NAME>` column treated as a shared value.
    pub fn keyset(&self, name: &str) -> Result<StaticKeys, ValidationError> {
        let triple = (
            self.get(&format!("{}_ENC", name)),
            self.get(&format!("{}_MAC", name)),
            self.get(&format!("{}_DEK", name)),
        );
        if let (Some(enc), Some(mac), Some(dek)) = triple {
            return StaticKeys::from_hex(enc, mac, dek);
        }
        if let Some(psk) = self.get(name) {
            let key: [u8; 16] = crate::util::parse_hex_exact(psk, 16)?.try_into().unwrap();
            return Ok(StaticKeys::from_psk(key));
        }
        Err(ValidationError::Unsupported("keyset name not in database"))
    }
}

impl KeyDb {
    pub fn parse(text: &str) -> Result<Self, ValidationError> {
        let mut lines = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'));
        let header = lines
            .next()
            .ok_or(ValidationError::Unsupported("empty key database"))?;
        let fields_part = header
            .strip_prefix("var_out:")
            .ok_or(ValidationError::Unsupported("key database header"))?;
        let fields: Vec<String> = fields_part
            .trim()
            .split('/')
            .map(|f| f.trim().to_ascii_uppercase())
            .filter(|f| !f.is_empty())
            .collect();
        if fields.is_empty() {
            return Err(ValidationError::Unsupported("key database header fields"));
        }
        let mut rows = Vec::new();
        for line in lines {
            let values: Vec<String> = line.split_whitespace().map(str::to_string).collect();
            if values.len() != fields.len() {
                return Err(ValidationError::WrongLength {
                    what: "key database row",
                    expected: fields.len(),
                    got: values.len(),
                });
            }
            rows.push(values);
        }
        Ok(KeyDb { fields, rows })
    }

    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        use anyhow::Context;
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Self::parse(&text)?)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Find the row whose ICCID or IMSI column equals `id`. ICCIDs match
    /// with or without their trailing check digit.
    pub fn lookup(&self, id: &str) -> Option<KeyRecord<'_>> {
        let column = |name: &str| self.fields.iter().position(|f| f == name);
        let iccid_col = column("ICCID");
        let imsi_col = column("IMSI");
        for row in &self.rows {
            let by_iccid = iccid_col.map_or(false, |c| {
                let cell = row[c].as_str();
                cell == id || (cell.len() > 1 && cell[..cell.len() - 1] == *id)
            });
            let by_imsi = imsi_col.map_or(false, |c| row[c] == id);
            if by_iccid || by_imsi {
                let values = self
                    .fields
                    .iter()
                    .zip(row)
                    .map(|(f, v)| (f.as_str(), v.as_str()))
                    .collect();
                return Some(KeyRecord { values });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DB: &str = "\
# lab cards
var_out: ICCID/IMSI/KI/OPC/CM/PSK40_ENC/PSK40_MAC/PSK40_DEK
89014103211118510720 250880000000003 000102030405060708090a0b0c0d0e0f 101112131415161718191a1b1c1d1e1f 404142434445464748494a4b4c4d4e4f 505152535455565758595a5b5c5d5e5f 606162636465666768696a6b6c6d6e6f 707172737475767778797a7b7c7d7e7f
";

    #[test]
    fn parse_and_lookup_by_imsi() {
        let db = KeyDb::parse(DB).unwrap();
        assert_eq!(db.len(), 1);
        let record = db.lookup("250880000000003").unwrap();
        assert_eq!(
            record.get("ki").unwrap(),
            "000102030405060708090a0b0c0d0e0f"
        );
    }

    #[test]
    fn lookup_by_iccid() {
        let db = KeyDb::parse(DB).unwrap();
        assert!(db.lookup("89014103211118510720").is_some());
        // Without the check digit
        assert!(db.lookup("8901410321111851072").is_some());
        assert!(db.lookup("999").is_none());
    }

    #[test]
    fn keyset_extraction() {
        let db = KeyDb::parse(DB).unwrap();
        let record = db.lookup("250880000000003").unwrap();
        // Single-column PSK keyset
        let cm = record.keyset("cm").unwrap();
        assert_eq!(cm.enc, cm.dek);
        // Triple keyset
        let psk40 = record.keyset("psk40").unwrap();
        assert_ne!(psk40.enc, psk40.mac);
        assert!(record.keyset("psk41").is_err());
    }

    #[test]
    fn malformed_rows_refused() {
        assert!(KeyDb::parse("var_out: A/B\n1\n").is_err());
        assert!(KeyDb::parse("nonsense\n").is_err());
        assert!(KeyDb::parse("").is_err());
    }
}

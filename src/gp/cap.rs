//! The applet container: a ZIP archive of named sub-components, or an
//! already flattened raw image. The LOAD payload concatenates whichever
//! components are present in the fixed order below.

use std::io::{Cursor, Read};

use anyhow::Context;

/// Concatenation order for the LOAD payload.
pub const COMPONENT_ORDER: [&str; 12] = [
    "Header",
    "Directory",
    "Import",
    "Applet",
    "Class",
    "Method",
    "StaticField",
    "Export",
    "ConstantPool",
    "RefLocation",
    "Descriptor",
    "Debug",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapComponent {
    pub name: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapFile {
    pub components: Vec<CapComponent>,
}

impl CapFile {
    /// Parse an archive or accept a raw image unchanged.
    pub fn parse(bytes: &[u8]) -> anyhow::Result<Self> {
        if bytes.starts_with(b"PK") {
            Self::parse_zip(bytes)
        } else if !bytes.is_empty() {
            Ok(CapFile {
                components: vec![CapComponent {
                    name: "Raw".to_string(),
                    data: bytes.to_vec(),
                }],
            })
        } else {
            anyhow::bail!("empty applet container");
        }
    }

    fn parse_zip(bytes: &[u8]) -> anyhow::Result<Self> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .context("Failed to open applet archive")?;
        let mut found: Vec<(usize, CapComponent)> = Vec::new();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).context("Failed to read archive entry")?;
            let name = entry.name().to_string();
            let Some(component) = component_name(&name) else {
                continue;
            };
            let mut data = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut data)
                .with_context(|| format!("Failed to extract {}", name))?;
            let order = COMPONENT_ORDER
                .iter()
                .position(|&c| c == component)
                .unwrap();
            found.push((
                order,
                CapComponent {
                    name: component.to_string(),
                    data,
                },
            ));
        }
        if found.is_empty() {
            anyhow::bail!("archive contains no applet components");
        }
        found.sort_by_key(|(order, _)| *order);
        if found[0].1.name != "Header" {
            anyhow::bail!("applet archive has no Header component");
        }
        Ok(CapFile {
            components: found.into_iter().map(|(_, c)| c).collect(),
        })
    }

    /// The bytes that go to the card, components in fixed order.
    pub fn load_data(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for component in &self.components {
            out.extend_from_slice(&component.data);
        }
        out
    }
}

/// "pkg/javacard/Header.cap" → "Header".
fn component_name(path: &str) -> Option<&'static str> {
    let file = path.rsplit('/').next()?;
    let stem = file.strip_suffix(".cap")?;
    COMPONENT_ORDER.iter().copied().find(|&c| c == stem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    fn archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            for (name, data) in entries {
                writer
                    .start_file(name.to_string(), FileOptions::default())
                    .unwrap();
                writer.write_all(data).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn zip_components_come_out_in_fixed_order() {
        let bytes = archive(&[
            ("pkg/javacard/Method.cap", b"MM"),
            ("pkg/javacard/Header.cap", b"HH"),
            ("pkg/javacard/Directory.cap", b"DD"),
            ("pkg/javacard/MANIFEST.MF", b"ignored"),
        ]);
        let cap = CapFile::parse(&bytes).unwrap();
        let names: Vec<_> = cap.components.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Header", "Directory", "Method"]);
        assert_eq!(cap.load_data(), b"HHDDMM");
    }

    #[test]
    fn raw_image_passes_through() {
        let cap = CapFile::parse(&[0x01, 0x02, 0x03]).unwrap();
        assert_eq!(cap.load_data(), vec![1, 2, 3]);
    }

    #[test]
    fn missing_header_refused() {
        let bytes = archive(&[("pkg/javacard/Method.cap", b"MM")]);
        assert!(CapFile::parse(&bytes).is_err());
        assert!(CapFile::parse(&[]).is_err());
    }
}

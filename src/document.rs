//! Installer document format.
//!
//! The bundler renders the manifest into a plain-text block that gets
//! injected into the installer template; the bootstrapper parses the
//! finished document back into an ordered set of embedded packages.
//! One block per package:
//!
//! ```text
//! package pip
//!     author: The pip developers
//!     license: MIT License (MIT)
//!     filename: pip-20.3.4-py2.py3-none-any.whl
//!     filedata:
//!         <base64, 8-space indent, fixed width>
//!     end
//! ```
//!
//! Insertion order encodes install-dependency order and survives the
//! render/parse round trip. The `author` and `license` fields are
//! optional; they are absent when the package was bundled from a
//! direct URL instead of the package index.

use anyhow::{bail, Context, Result};

/// Left padding of the base64 payload lines inside a package block.
pub const FILEDATA_PAD: usize = 8;

/// First line of every installer document; the trailing word is the
/// wheel label of the target the bundle was built for.
pub const SHEBANG_PREFIX: &str = "#! pip-bundler installer ";

/// One embedded package in textual form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedArtifact {
    /// Logical package name (`pip`, `cryptography`, ...).
    pub name: String,
    /// Package author as shown by the index, when known.
    pub author: Option<String>,
    /// Package license as shown by the index, when known.
    pub license: Option<String>,
    /// Artifact filename the payload was read from.
    pub filename: String,
    /// Base64 payload block, already line-wrapped and indented.
    pub filedata: String,
}

/// The manifest embedded in one installer document.
#[derive(Debug)]
pub struct EmbeddedManifest {
    /// Wheel label of the target this bundle was built for.
    pub runtime_tag: String,
    entries: Vec<EncodedArtifact>,
}

impl EmbeddedManifest {
    /// Look up an embedded package by logical name.
    pub fn get(&self, name: &str) -> Option<&EncodedArtifact> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Embedded packages in install-dependency order.
    pub fn iter(&self) -> impl Iterator<Item = &EncodedArtifact> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Render the manifest entries as the text block injected at the
/// `packages = {}` sentinel of the installer template.
pub fn render_manifest(entries: &[EncodedArtifact]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&format!("package {}\n", entry.name));
        if let Some(author) = &entry.author {
            out.push_str(&format!("    author: {author}\n"));
        }
        if let Some(license) = &entry.license {
            out.push_str(&format!("    license: {license}\n"));
        }
        out.push_str(&format!("    filename: {}\n", entry.filename));
        out.push_str("    filedata:\n");
        if !entry.filedata.is_empty() {
            out.push_str(&entry.filedata);
            out.push('\n');
        }
        out.push_str("    end\n");
    }
    // Drop the trailing newline; the template line it replaces supplies it.
    if out.ends_with('\n') {
        out.pop();
    }
    out
}

/// Parse a finished installer document back into its embedded manifest.
///
/// Lines outside package blocks (the shebang, comments, leftover
/// template text) are ignored, except that the shebang line is
/// required since it carries the runtime tag.
pub fn parse(text: &str) -> Result<EmbeddedManifest> {
    let mut runtime_tag = None;
    let mut entries: Vec<EncodedArtifact> = Vec::new();

    let mut current: Option<EncodedArtifact> = None;
    let mut in_filedata = false;
    let mut filedata_lines: Vec<&str> = Vec::new();

    for (lineno, raw) in text.lines().enumerate() {
        let lineno = lineno + 1;
        let line = raw.trim_end_matches('\r');

        if current.is_none() {
            if let Some(tag) = line.strip_prefix(SHEBANG_PREFIX) {
                runtime_tag = Some(tag.trim().to_string());
                continue;
            }
            if let Some(name) = line.strip_prefix("package ") {
                let name = name.trim();
                if name.is_empty() {
                    bail!("line {lineno}: package block without a name");
                }
                if entries.iter().any(|e| e.name == name) {
                    bail!("line {lineno}: duplicate package '{name}'");
                }
                current = Some(EncodedArtifact {
                    name: name.to_string(),
                    author: None,
                    license: None,
                    filename: String::new(),
                    filedata: String::new(),
                });
            }
            continue;
        }

        // Inside a package block. The terminator is matched at its
        // exact 4-space indent; payload lines sit at FILEDATA_PAD, so
        // a base64 line whose content happens to read "end" can never
        // close the block.
        if in_filedata {
            if line == "    end" {
                let mut entry = current.take().context("internal: block state lost")?;
                entry.filedata = filedata_lines.join("\n");
                filedata_lines.clear();
                in_filedata = false;
                if entry.filename.is_empty() {
                    bail!("package '{}' has no filename field", entry.name);
                }
                entries.push(entry);
            } else {
                filedata_lines.push(line);
            }
            continue;
        }

        let entry = current.as_mut().context("internal: block state lost")?;
        let field = line.trim_start();
        if let Some(value) = field.strip_prefix("author:") {
            entry.author = Some(value.trim().to_string());
        } else if let Some(value) = field.strip_prefix("license:") {
            entry.license = Some(value.trim().to_string());
        } else if let Some(value) = field.strip_prefix("filename:") {
            entry.filename = value.trim().to_string();
        } else if field == "filedata:" {
            in_filedata = true;
        } else {
            bail!(
                "line {lineno}: unknown field '{}' in package '{}'",
                field,
                entry.name
            );
        }
    }

    if let Some(entry) = current {
        bail!("unterminated package block '{}'", entry.name);
    }
    let runtime_tag = match runtime_tag {
        Some(tag) if !tag.is_empty() => tag,
        _ => bail!("installer document has no '{SHEBANG_PREFIX}<tag>' line"),
    };

    Ok(EmbeddedManifest {
        runtime_tag,
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode;

    fn artifact(name: &str, payload: &[u8]) -> EncodedArtifact {
        EncodedArtifact {
            name: name.to_string(),
            author: Some("Example Author".to_string()),
            license: Some("MIT License (MIT)".to_string()),
            filename: format!("{name}-1.0-py2.py3-none-any.whl"),
            filedata: encode::encode(payload, FILEDATA_PAD),
        }
    }

    fn document_with(entries: &[EncodedArtifact]) -> String {
        format!(
            "{}cp27-cp27mu-manylinux1_x86_64\n# comment\n{}\n",
            SHEBANG_PREFIX,
            render_manifest(entries)
        )
    }

    #[test]
    fn test_render_parse_round_trip_preserves_order_and_bytes() {
        let payloads: [&[u8]; 3] = [b"first payload", b"", b"\x00\xff\x7f third"];
        let entries = vec![
            artifact("pip", payloads[0]),
            artifact("wheel", payloads[1]),
            artifact("cryptography", payloads[2]),
        ];
        let parsed = parse(&document_with(&entries)).unwrap();

        assert_eq!(parsed.runtime_tag, "cp27-cp27mu-manylinux1_x86_64");
        let names: Vec<&str> = parsed.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["pip", "wheel", "cryptography"]);
        for (entry, payload) in parsed.iter().zip(payloads) {
            assert_eq!(encode::decode(&entry.filedata).unwrap(), payload);
        }
    }

    #[test]
    fn test_optional_metadata_survives_absence() {
        let mut entry = artifact("six", b"data");
        entry.author = None;
        entry.license = None;
        let parsed = parse(&document_with(&[entry])).unwrap();
        let six = parsed.get("six").unwrap();
        assert!(six.author.is_none());
        assert!(six.license.is_none());
        assert_eq!(six.filename, "six-1.0-py2.py3-none-any.whl");
    }

    // A 162-byte payload ending 0x01 0xE9 0xDD encodes to 216 base64
    // chars, so at the 71-char content width the final payload line is
    // exactly "end" (at FILEDATA_PAD indent). It must not close the
    // block.
    #[test]
    fn test_payload_line_reading_end_does_not_terminate_block() {
        let mut payload = vec![0x42u8; 159];
        payload.extend([0x01, 0xE9, 0xDD]);
        let entry = artifact("cffi", &payload);
        assert_eq!(entry.filedata.lines().last().unwrap().trim(), "end");

        let parsed = parse(&document_with(&[entry])).unwrap();
        let cffi = parsed.get("cffi").unwrap();
        assert_eq!(encode::decode(&cffi.filedata).unwrap(), payload);
    }

    #[test]
    fn test_duplicate_package_rejected() {
        let entries = vec![artifact("pip", b"a"), artifact("pip", b"b")];
        let err = parse(&document_with(&entries)).unwrap_err();
        assert!(err.to_string().contains("duplicate package 'pip'"));
    }

    #[test]
    fn test_unterminated_block_rejected() {
        let text = format!(
            "{}tag\npackage pip\n    filename: pip-1.0.whl\n    filedata:\n",
            SHEBANG_PREFIX
        );
        let err = parse(&text).unwrap_err();
        assert!(err.to_string().contains("unterminated"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let text = format!(
            "{}tag\npackage pip\n    sha256: abc\n    end\n",
            SHEBANG_PREFIX
        );
        assert!(parse(&text).is_err());
    }

    #[test]
    fn test_missing_shebang_rejected() {
        let entries = vec![artifact("pip", b"x")];
        let err = parse(&render_manifest(&entries)).unwrap_err();
        assert!(err.to_string().contains("installer document"));
    }
}

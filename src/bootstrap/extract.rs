//! Wheel extraction for the bootstrap phase.
//!
//! Only the entries under the package's own top-level directory are
//! unpacked. Wheels are trusted input in principle, but the prefix
//! filter plus the enclosed-name check keep a malformed archive from
//! writing outside the extraction root.

use std::fs;
use std::io;
use std::path::{Component, Path};

use anyhow::{bail, Context, Result};
use zip::ZipArchive;

/// Unpack the entries of `archive` whose paths sit under the package's
/// top-level directory (derived from the wheel filename) into `dest`.
pub fn unpack_wheel(archive: &Path, dest: &Path) -> Result<()> {
    let filename = archive
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("wheel path '{}' has no filename", archive.display()))?;
    let top = filename
        .split('-')
        .next()
        .filter(|s| !s.is_empty())
        .with_context(|| format!("wheel filename '{filename}' has no package name"))?;
    let prefix = format!("{top}/");

    let file = fs::File::open(archive)
        .with_context(|| format!("opening wheel '{}'", archive.display()))?;
    let mut zip = ZipArchive::new(file)
        .with_context(|| format!("reading wheel '{}'", archive.display()))?;

    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .with_context(|| format!("reading entry {index} of '{}'", archive.display()))?;
        if !entry.name().starts_with(&prefix) {
            continue;
        }
        // `enclosed_name` only rejects paths that net-escape the root;
        // an interior `..` like `pip/../evil.py` comes back Some and
        // would land outside the package's own subtree.
        let Some(relative) = entry.enclosed_name() else {
            bail!(
                "wheel entry '{}' escapes the extraction root",
                entry.name()
            );
        };
        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            bail!(
                "wheel entry '{}' escapes the extraction root",
                entry.name()
            );
        }
        let out = dest.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&out)
                .with_context(|| format!("creating directory '{}'", out.display()))?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating directory '{}'", parent.display()))?;
        }
        let mut target = fs::File::create(&out)
            .with_context(|| format!("creating '{}'", out.display()))?;
        io::copy(&mut entry, &mut target)
            .with_context(|| format!("writing '{}'", out.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    fn wheel_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(io::Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        for (name, data) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn write_wheel(dir: &Path, filename: &str, entries: &[(&str, &[u8])]) -> std::path::PathBuf {
        let path = dir.join(filename);
        fs::write(&path, wheel_bytes(entries)).unwrap();
        path
    }

    #[test]
    fn test_unpacks_only_the_package_top_level() {
        let temp = TempDir::new().unwrap();
        let wheel = write_wheel(
            temp.path(),
            "pip-20.3.4-py2.py3-none-any.whl",
            &[
                ("pip/__init__.py", b"# pip"),
                ("pip/_vendor/six.py", b"# six"),
                ("pip-20.3.4.dist-info/METADATA", b"Metadata-Version: 2.1"),
            ],
        );
        let dest = temp.path().join("out");
        fs::create_dir_all(&dest).unwrap();
        unpack_wheel(&wheel, &dest).unwrap();

        assert!(dest.join("pip/__init__.py").is_file());
        assert!(dest.join("pip/_vendor/six.py").is_file());
        assert!(!dest.join("pip-20.3.4.dist-info").exists());
        assert_eq!(fs::read(dest.join("pip/__init__.py")).unwrap(), b"# pip");
    }

    #[test]
    fn test_traversal_entry_under_prefix_is_fatal() {
        let temp = TempDir::new().unwrap();
        let wheel = write_wheel(
            temp.path(),
            "pip-20.3.4-py2.py3-none-any.whl",
            &[("pip/../evil.py", b"nope")],
        );
        let dest = temp.path().join("out");
        fs::create_dir_all(&dest).unwrap();
        let err = unpack_wheel(&wheel, &dest).unwrap_err();
        assert!(err.to_string().contains("escapes the extraction root"));
        // Neither inside nor above the extraction root.
        assert!(!dest.join("evil.py").exists());
        assert!(!temp.path().join("evil.py").exists());
    }

    #[test]
    fn test_foreign_top_level_entries_are_skipped() {
        let temp = TempDir::new().unwrap();
        let wheel = write_wheel(
            temp.path(),
            "wheel-0.36.2-py2.py3-none-any.whl",
            &[("wheel/__init__.py", b"# wheel"), ("other/file.py", b"no")],
        );
        let dest = temp.path().join("out");
        fs::create_dir_all(&dest).unwrap();
        unpack_wheel(&wheel, &dest).unwrap();
        assert!(dest.join("wheel/__init__.py").is_file());
        assert!(!dest.join("other").exists());
    }
}

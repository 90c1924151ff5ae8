//! Entry-point behavior: find and run the matching installer bundle.
//!
//! The running target interpreter is interrogated for its platform and
//! ABI tags, the matching installer document is located under a local
//! build tree or an http(s) remote root (remote documents land in a
//! private temporary directory first), and the bootstrap sequencer is
//! run over it. A local build tree may carry an entry-point
//! configuration whose `root` redirects to a remote.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use tempfile::TempDir;

use crate::bootstrap::{Sequencer, SubprocessPip};
use crate::bundle;
use crate::document;
use crate::error::BundlerError;

/// Probe run inside the target interpreter; prints
/// `<pyver> <abi> <arch> <semver>` on one line. Kept compatible with
/// Python 2.6, the oldest interpreter this tool serves.
const TAG_PROBE: &str = r#"
import sys
import platform
import distutils.util
from distutils import sysconfig

value = distutils.util.get_platform().replace("-", "_")
if value == "linux_x86_64" and sys.maxsize == 2147483647:
    value = "linux_i686"
arch = value.replace("linux", "manylinux1")

abid = ("d" if sysconfig.get_config_var("WITH_PYDEBUG") == 1 or
        hasattr(sys, "gettotalrefcount")
        else "")
abim = ("m" if sys.version_info < (3, 8) and
        sysconfig.get_config_var("WITH_PYMALLOC") == 1 or
        platform.python_implementation() == "CPython"
        else "")
abiu = ("u" if sys.version_info < (3, 3) and
        sysconfig.get_config_var("Py_UNICODE_SIZE") == 4 or
        sys.maxunicode == 0x10FFFF
        else "")

pyver = "cp%d%d" % sys.version_info[:2]
semver = "%d.%d" % sys.version_info[:2]
sys.stdout.write(" ".join([pyver, pyver + abid + abim + abiu, arch, semver]))
"#;

/// Platform and ABI tags of one target interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeTag {
    pub pyver: String,
    pub abi: String,
    pub arch: String,
    pub semver: String,
}

impl RuntimeTag {
    /// Wheel label, e.g. `cp27-cp27mu-manylinux1_x86_64`.
    pub fn label(&self) -> String {
        format!("{}-{}-{}", self.pyver, self.abi, self.arch)
    }
}

/// Where the matching installer document lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentLocation {
    Local(PathBuf),
    Remote(String),
}

/// Interrogate the target interpreter for its runtime tag.
pub fn runtime_tag(python: &Path) -> Result<RuntimeTag> {
    let output = Command::new(python)
        .args(["-c", TAG_PROBE])
        .output()
        .with_context(|| format!("invoking '{}'", python.display()))?;
    if !output.status.success() {
        bail!(
            "tag probe failed under '{}': {}",
            python.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    parse_tag(String::from_utf8_lossy(&output.stdout).trim())
}

fn parse_tag(line: &str) -> Result<RuntimeTag> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let [pyver, abi, arch, semver] = fields.as_slice() else {
        bail!("malformed tag probe output '{line}'");
    };
    if arch.starts_with("macosx") {
        return Err(BundlerError::Configuration(format!(
            "platform '{arch}' is not supported"
        ))
        .into());
    }
    Ok(RuntimeTag {
        pyver: pyver.to_string(),
        abi: abi.to_string(),
        arch: arch.to_string(),
        semver: semver.to_string(),
    })
}

fn is_remote(root: &str) -> bool {
    root.starts_with("http://") || root.starts_with("https://")
}

fn remote_document_url(root: &str, tag: &RuntimeTag) -> String {
    format!(
        "{}/{}/{}",
        root.trim_end_matches('/'),
        tag.semver,
        bundle::document_name(&tag.label())
    )
}

/// Resolve the installer document for `tag` under `root`.
///
/// A local root containing an entry-point configuration with a remote
/// `root =` line redirects to that remote.
pub fn locate_document(root: &str, tag: &RuntimeTag) -> Result<DocumentLocation> {
    if is_remote(root) {
        return Ok(DocumentLocation::Remote(remote_document_url(root, tag)));
    }

    let dir = Path::new(root);
    let conf = dir.join(bundle::ENTRYPOINT_NAME);
    if conf.is_file() {
        let text = fs::read_to_string(&conf)
            .with_context(|| format!("reading entry-point document '{}'", conf.display()))?;
        if let Some(remote) = entrypoint_root(&text) {
            return Ok(DocumentLocation::Remote(remote_document_url(&remote, tag)));
        }
    }
    Ok(DocumentLocation::Local(
        dir.join(&tag.semver).join(bundle::document_name(&tag.label())),
    ))
}

/// Remote root recorded in an entry-point document, if any.
fn entrypoint_root(text: &str) -> Option<String> {
    text.lines()
        .filter_map(|line| line.strip_prefix("root ="))
        .map(str::trim)
        .find(|value| is_remote(value))
        .map(str::to_string)
}

/// Read the installer document, downloading remote ones to a private
/// temporary location first.
pub fn fetch_document(location: &DocumentLocation) -> Result<String> {
    match location {
        DocumentLocation::Local(path) => {
            if !path.is_file() {
                return Err(BundlerError::Lookup(format!(
                    "no installer document at '{}'",
                    path.display()
                ))
                .into());
            }
            fs::read_to_string(path)
                .with_context(|| format!("reading installer document '{}'", path.display()))
        }
        DocumentLocation::Remote(url) => {
            println!("[install] downloading {url}");
            let response = reqwest::blocking::get(url)
                .with_context(|| format!("requesting installer document '{url}'"))?;
            let response = response.error_for_status().map_err(|err| {
                BundlerError::Lookup(format!("installer document '{url}' unavailable: {err}"))
            })?;
            let body = response
                .text()
                .with_context(|| format!("reading installer document '{url}'"))?;

            let tmpdir = TempDir::with_prefix("pip-bundler-download-")
                .context("creating download directory")?;
            let path = tmpdir.path().join("installer.bundle");
            fs::write(&path, &body)
                .with_context(|| format!("writing '{}'", path.display()))?;
            fs::read_to_string(&path)
                .with_context(|| format!("reading '{}'", path.display()))
        }
    }
}

/// Entry point: locate the bundle matching the interpreter and run the
/// bootstrap sequence over it.
pub fn run_install(root: &str, python: &str) -> Result<()> {
    let mut pip = SubprocessPip::new(python)?;
    let tag = runtime_tag(pip.python())?;
    println!("[install] target runtime {}", tag.label());

    let location = locate_document(root, &tag)?;
    let text = fetch_document(&location)?;
    let manifest = document::parse(&text).context("parsing installer document")?;
    if manifest.runtime_tag != tag.label() {
        return Err(BundlerError::Configuration(format!(
            "installer document targets '{}' but the interpreter is '{}'",
            manifest.runtime_tag,
            tag.label()
        ))
        .into());
    }

    Sequencer::new(&manifest, &mut pip).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tag() -> RuntimeTag {
        parse_tag("cp27 cp27mu manylinux1_x86_64 2.7").unwrap()
    }

    #[test]
    fn test_parse_tag_and_label() {
        let tag = tag();
        assert_eq!(tag.pyver, "cp27");
        assert_eq!(tag.semver, "2.7");
        assert_eq!(tag.label(), "cp27-cp27mu-manylinux1_x86_64");
    }

    #[test]
    fn test_macos_probe_is_a_configuration_error() {
        let err = parse_tag("cp27 cp27m macosx_10_9_x86_64 2.7").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BundlerError>(),
            Some(BundlerError::Configuration(_))
        ));
    }

    #[test]
    fn test_malformed_probe_output_rejected() {
        assert!(parse_tag("cp27 cp27mu").is_err());
        assert!(parse_tag("").is_err());
    }

    #[test]
    fn test_remote_root_resolves_to_versioned_url() {
        let location = locate_document("https://example.org/get-pip/", &tag()).unwrap();
        assert_eq!(
            location,
            DocumentLocation::Remote(
                "https://example.org/get-pip/2.7/\
                 get-pip-pyopenssl-cp27-cp27mu-manylinux1_x86_64.bundle"
                    .to_string()
            )
        );
    }

    #[test]
    fn test_local_root_resolves_under_version_subdirectory() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_str().unwrap();
        let location = locate_document(root, &tag()).unwrap();
        assert_eq!(
            location,
            DocumentLocation::Local(
                temp.path()
                    .join("2.7")
                    .join("get-pip-pyopenssl-cp27-cp27mu-manylinux1_x86_64.bundle")
            )
        );
    }

    #[test]
    fn test_entrypoint_conf_redirects_to_remote() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join(bundle::ENTRYPOINT_NAME),
            "# generated\nversion = 0.1.0\nroot = https://mirror.example.org/get-pip\n",
        )
        .unwrap();
        let location = locate_document(temp.path().to_str().unwrap(), &tag()).unwrap();
        assert!(matches!(
            location,
            DocumentLocation::Remote(url)
                if url.starts_with("https://mirror.example.org/get-pip/2.7/")
        ));
    }

    #[test]
    fn test_local_conf_without_remote_stays_local() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join(bundle::ENTRYPOINT_NAME),
            "version = 0.1.0\nroot = local\n",
        )
        .unwrap();
        let location = locate_document(temp.path().to_str().unwrap(), &tag()).unwrap();
        assert!(matches!(location, DocumentLocation::Local(_)));
    }

    #[test]
    fn test_missing_local_document_is_a_lookup_error() {
        let temp = TempDir::new().unwrap();
        let location = DocumentLocation::Local(temp.path().join("2.7/missing.bundle"));
        let err = fetch_document(&location).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BundlerError>(),
            Some(BundlerError::Lookup(_))
        ));
    }
}

//! Build-time bundle generation.
//!
//! For one target, [`generate`] resolves the hand-curated manifest,
//! fetches every artifact serially in manifest order, and injects the
//! rendered manifest into the installer template. [`build_all`] walks
//! the full target matrix the way the original build driver did,
//! skipping the combinations that never existed, and finishes by
//! writing the entry-point configuration document.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::document::{self, EncodedArtifact};
use crate::manifest::{manifest_for, Abi, Arch, TargetOs, TargetSpec};
use crate::package::PackageIndex;
use crate::template;

/// Installer document template; the shebang line and the empty
/// manifest literal are the two injection sentinels.
pub const INSTALLER_TEMPLATE: &str = include_str!("../templates/installer.in");

/// Entry-point configuration template; `version = none` is a required
/// sentinel, `root = local` an optional one.
pub const ENTRYPOINT_TEMPLATE: &str = include_str!("../templates/entrypoint.in");

/// Sentinel lines as they appear in the templates.
pub const RUNTIME_SENTINEL: &str = "#! pip-bundler installer none";
pub const MANIFEST_SENTINEL: &str = "packages = {}";
pub const VERSION_SENTINEL: &str = "version = none";
pub const ROOT_SENTINEL: &str = "root = local";

/// Name of the generated entry-point configuration document.
pub const ENTRYPOINT_NAME: &str = "get-pip-pyopenssl.conf";

/// Installer document filename for a wheel label.
pub fn document_name(label: &str) -> String {
    format!("get-pip-pyopenssl-{label}.bundle")
}

/// Generate the installer document for one target into `dest`.
///
/// Fetches run serially, in manifest order; construction and
/// validation happen before the first network access.
pub fn generate(spec: &TargetSpec, dest: &Path, index: &dyn PackageIndex) -> Result<PathBuf> {
    let mut manifest = manifest_for(spec)?;
    let label = spec.wheel_label();

    let mut blocks: Vec<EncodedArtifact> = Vec::with_capacity(manifest.len());
    for pkg in manifest.iter_mut() {
        println!("[build] bundling {}", pkg.filename());
        let block = pkg
            .to_encoded(index)
            .with_context(|| format!("bundling artifact '{}'", pkg.filename()))?;
        blocks.push(block);
    }

    let shebang = format!("{}{label}", document::SHEBANG_PREFIX);
    let body = document::render_manifest(&blocks);
    let rendered = template::inject(
        INSTALLER_TEMPLATE,
        &[
            (RUNTIME_SENTINEL, shebang.as_str()),
            (MANIFEST_SENTINEL, body.as_str()),
        ],
    );

    fs::create_dir_all(dest)
        .with_context(|| format!("creating destination directory '{}'", dest.display()))?;
    let path = dest.join(document_name(&label));
    fs::write(&path, rendered)
        .with_context(|| format!("writing installer document '{}'", path.display()))?;
    Ok(path)
}

/// Generate installer documents for every supported target into
/// per-Python-version subdirectories of `dest`, then write the
/// entry-point document (with `remote` embedded as the root override
/// when given).
pub fn build_all(dest: &Path, remote: Option<&str>, index: &dyn PackageIndex) -> Result<()> {
    for os in TargetOs::ALL {
        for arch in Arch::ALL {
            for abi in Abi::ALL {
                // Wide-unicode builds never shipped on Windows.
                if os == TargetOs::Windows && abi.is_wide_unicode() {
                    continue;
                }
                let spec = TargetSpec::new(os, arch, abi);
                println!("[build] target {} {} {}", os, arch, abi);
                generate(&spec, &dest.join(abi.semver()), index)?;
            }
        }
    }
    write_entrypoint(dest, remote)?;
    Ok(())
}

/// Render the entry-point configuration document into `dest`.
///
/// The version sentinel is always filled; the root sentinel only when
/// a remote root was requested, otherwise the document keeps its
/// `root = local` default.
pub fn write_entrypoint(dest: &Path, remote: Option<&str>) -> Result<PathBuf> {
    let version_line = format!("version = {}", env!("CARGO_PKG_VERSION"));
    let root_line = remote.map(|root| format!("root = {root}"));
    let mut substitutions: Vec<(&str, &str)> = vec![(VERSION_SENTINEL, version_line.as_str())];
    if let Some(line) = &root_line {
        substitutions.push((ROOT_SENTINEL, line.as_str()));
    }
    let rendered = template::inject(ENTRYPOINT_TEMPLATE, &substitutions);

    fs::create_dir_all(dest)
        .with_context(|| format!("creating destination directory '{}'", dest.display()))?;
    let path = dest.join(ENTRYPOINT_NAME);
    fs::write(&path, rendered)
        .with_context(|| format!("writing entry-point document '{}'", path.display()))?;
    Ok(path)
}

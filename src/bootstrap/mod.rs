//! Bootstrap sequencer.
//!
//! Runs the fixed install sequence of an installer document against a
//! target interpreter:
//!
//! ```text
//! Idle -> Extracting -> SelfReplacing -> InstallingDependencies
//!      -> Patching -> Done
//! ```
//!
//! with `Failed` reachable from every non-terminal state. The
//! self-replacement step is the delicate part: the embedded pip and
//! wheel packages are unpacked to a private staging directory and that
//! not-yet-installed pip, reached over `PYTHONPATH`, installs its own
//! permanent copy. The staging directory is then discarded and the
//! installed pip re-resolved before anything else runs.
//!
//! Every temporary directory is a [`tempfile::TempDir`] owned by the
//! phase that created it, so cleanup happens on every exit path,
//! including failure. The sequencer never changes the process working
//! directory; all paths it hands to collaborators are absolute.

pub mod extract;
pub mod pip;

use std::fs;

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::document::EmbeddedManifest;
use crate::encode;
use crate::error::BundlerError;
use crate::patch;

pub use pip::{PipDriver, SubprocessPip};

/// Packages installed during self-replacement, in install order.
/// `pip` and `wheel` are mandatory (they are also the two packages
/// unpacked for the bootstrap); the others install when embedded.
const BOOTSTRAP_SET: [&str; 4] = ["pip", "argparse", "wheel", "setuptools"];

/// Packages installed with forced flags (`-I --no-deps`) outside the
/// bootstrap set: the enum backports, whose metadata confuses older
/// pips into touching the network.
const FORCED_SET: [&str; 2] = ["ordereddict", "enum34"];

/// Sequencer state. Terminal states are `Done` and `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Extracting,
    SelfReplacing,
    InstallingDependencies,
    Patching,
    Done,
    Failed,
}

/// Drives one bootstrap run over an embedded manifest.
///
/// The manifest is passed in explicitly and shared by every phase;
/// there is no process-wide manifest state.
pub struct Sequencer<'a> {
    manifest: &'a EmbeddedManifest,
    pip: &'a mut dyn PipDriver,
    phase: Phase,
}

impl<'a> Sequencer<'a> {
    pub fn new(manifest: &'a EmbeddedManifest, pip: &'a mut dyn PipDriver) -> Self {
        Sequencer {
            manifest,
            pip,
            phase: Phase::Idle,
        }
    }

    /// Current (or final) state of the run.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Run the full sequence. Any error aborts the remaining phases,
    /// leaves the sequencer in `Failed`, and propagates.
    pub fn run(&mut self) -> Result<()> {
        match self.run_phases() {
            Ok(()) => {
                self.phase = Phase::Done;
                println!("[bootstrap] successfully patched pip");
                Ok(())
            }
            Err(err) => {
                self.phase = Phase::Failed;
                Err(err)
            }
        }
    }

    fn run_phases(&mut self) -> Result<()> {
        let manifest = self.manifest;

        // Unpack the two bootstrap packages into a private staging dir.
        self.phase = Phase::Extracting;
        let staging = TempDir::with_prefix("pip-bundler-bootstrap-")
            .context("creating bootstrap staging directory")?;
        for name in ["pip", "wheel"] {
            let entry = self.entry(name)?;
            let payload = encode::decode(&entry.filedata)
                .with_context(|| format!("decoding embedded package '{name}'"))?;
            let wheel_path = staging.path().join(&entry.filename);
            fs::write(&wheel_path, &payload)
                .with_context(|| format!("writing '{}'", wheel_path.display()))?;
            extract::unpack_wheel(&wheel_path, staging.path())
                .with_context(|| format!("unpacking bootstrap package '{name}'"))?;
            // Leave only the unpacked trees on the module search path.
            fs::remove_file(&wheel_path)
                .with_context(|| format!("removing '{}'", wheel_path.display()))?;
        }

        // The unpacked pip installs its own permanent copy.
        self.phase = Phase::SelfReplacing;
        self.pip.set_search_path(Some(staging.path()));
        let bootstrap_result = self.install_bootstrap_set();
        // The search path must come back down even when an install
        // failed, before the staging directory disappears.
        self.pip.set_search_path(None);
        bootstrap_result?;
        drop(staging);
        self.pip
            .refresh()
            .context("re-resolving the installed pip")?;

        // Remaining manifest entries, in manifest order.
        self.phase = Phase::InstallingDependencies;
        let remaining: Vec<String> = manifest
            .iter()
            .map(|entry| entry.name.clone())
            .filter(|name| !BOOTSTRAP_SET.contains(&name.as_str()))
            .collect();
        for name in remaining {
            let forced = FORCED_SET.contains(&name.as_str());
            self.auto_install(&name, forced)?;
        }

        // Redirect the installed pip's TLS through pyOpenSSL.
        self.phase = Phase::Patching;
        let pip_root = self.pip.package_root()?;
        println!("[bootstrap] patching pip at '{}'", pip_root.display());
        patch::patch_pip(&pip_root)?;
        Ok(())
    }

    fn install_bootstrap_set(&mut self) -> Result<()> {
        for name in BOOTSTRAP_SET {
            if self.manifest.contains(name) {
                self.auto_install(name, true)?;
            }
        }
        Ok(())
    }

    /// Decode one embedded package to a private temp dir and hand it
    /// to the install collaborator. The temp dir goes away when the
    /// call returns, successful or not.
    fn auto_install(&mut self, name: &str, forced: bool) -> Result<()> {
        let entry = self.entry(name)?;
        let payload = encode::decode(&entry.filedata)
            .with_context(|| format!("decoding embedded package '{name}'"))?;
        let filename = entry.filename.clone();

        let tmpdir = TempDir::with_prefix("pip-bundler-install-")
            .context("creating install staging directory")?;
        let artifact = tmpdir.path().join(&filename);
        fs::write(&artifact, &payload)
            .with_context(|| format!("writing '{}'", artifact.display()))?;
        println!("[bootstrap] installing {filename}");
        self.pip.install(&artifact, forced)
    }

    fn entry(&self, name: &str) -> Result<&'a crate::document::EncodedArtifact> {
        let manifest = self.manifest;
        manifest.get(name).ok_or_else(|| {
            BundlerError::Lookup(format!(
                "installer document has no embedded package '{name}'"
            ))
            .into()
        })
    }
}

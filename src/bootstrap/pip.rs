//! The external pip collaborator.
//!
//! pip's own install routine is opaque to the bootstrapper: it is a
//! subprocess that takes a local artifact path and returns an exit
//! status. The trait exists so the sequencer can be driven against a
//! recording fake in tests.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};

use crate::error::BundlerError;

/// Warning categories silenced on every pip invocation; these fire on
/// the very interpreters this tool exists for and would otherwise
/// drown the output.
const SILENCED_WARNINGS: [&str; 2] = [
    "pip._vendor.urllib3.exceptions.SNIMissingWarning",
    "pip._vendor.urllib3.exceptions.InsecurePlatformWarning",
];

/// External package-manager collaborator used by the sequencer.
pub trait PipDriver {
    /// Prepend (or clear) a directory on the interpreter's module
    /// search path for subsequent invocations. Used while the
    /// not-yet-installed bootstrap pip is the only pip available.
    fn set_search_path(&mut self, dir: Option<&Path>);

    /// Install one local artifact. `forced` adds isolation and
    /// no-dependency flags (`-I --no-deps`). A non-zero exit status is
    /// an [`BundlerError::Install`].
    fn install(&mut self, artifact: &Path, forced: bool) -> Result<()>;

    /// Re-acquire a handle to the installed pip after the bootstrap
    /// copy has been discarded, so later operations cannot see stale
    /// state.
    fn refresh(&mut self) -> Result<()>;

    /// Directory holding the installed pip package (`pip/__init__.py`
    /// lives directly under it). Target for the source patcher.
    fn package_root(&mut self) -> Result<PathBuf>;
}

/// [`PipDriver`] that shells out to `<python> -m pip`.
pub struct SubprocessPip {
    python: PathBuf,
    search_path: Option<PathBuf>,
    package_root: Option<PathBuf>,
}

impl SubprocessPip {
    /// Resolve `python` on PATH and wrap it.
    pub fn new(python: &str) -> Result<Self> {
        let python = which::which(python)
            .with_context(|| format!("locating python interpreter '{python}'"))?;
        Ok(Self::from_path(python))
    }

    /// Wrap an already-resolved interpreter path.
    pub fn from_path(python: PathBuf) -> Self {
        SubprocessPip {
            python,
            search_path: None,
            package_root: None,
        }
    }

    pub fn python(&self) -> &Path {
        &self.python
    }

    /// Interpreter invocation with the temporary search path (if any)
    /// prepended to `PYTHONPATH`.
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.python);
        if let Some(dir) = &self.search_path {
            let separator = if cfg!(windows) { ";" } else { ":" };
            let inherited = env::var("PYTHONPATH").unwrap_or_default();
            let value = if inherited.is_empty() {
                dir.display().to_string()
            } else {
                format!("{}{}{}", dir.display(), separator, inherited)
            };
            cmd.env("PYTHONPATH", value);
        }
        cmd
    }
}

impl PipDriver for SubprocessPip {
    fn set_search_path(&mut self, dir: Option<&Path>) {
        self.search_path = dir.map(Path::to_path_buf);
    }

    fn install(&mut self, artifact: &Path, forced: bool) -> Result<()> {
        let mut cmd = self.command();
        for category in SILENCED_WARNINGS {
            cmd.arg("-W").arg(format!("ignore::{category}"));
        }
        cmd.args(["-m", "pip", "install"]).arg(artifact);
        if forced {
            cmd.args(["-I", "--no-deps"]);
        }
        let status = cmd
            .status()
            .with_context(|| format!("invoking '{} -m pip'", self.python.display()))?;
        if !status.success() {
            return Err(BundlerError::Install(format!(
                "pip exited with {status} installing '{}'",
                artifact.display()
            ))
            .into());
        }
        Ok(())
    }

    fn refresh(&mut self) -> Result<()> {
        // A fresh interpreter sees only the installed pip; the
        // bootstrap copy is gone from the search path by now.
        let output = Command::new(&self.python)
            .args([
                "-c",
                "import os, sys, pip; sys.stdout.write(os.path.dirname(pip.__file__))",
            ])
            .output()
            .with_context(|| format!("invoking '{}'", self.python.display()))?;
        if !output.status.success() {
            return Err(BundlerError::Install(format!(
                "installed pip is not importable through '{}': {}",
                self.python.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            ))
            .into());
        }
        let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if root.is_empty() {
            return Err(BundlerError::Install(format!(
                "could not locate the installed pip through '{}'",
                self.python.display()
            ))
            .into());
        }
        self.package_root = Some(PathBuf::from(root));
        Ok(())
    }

    fn package_root(&mut self) -> Result<PathBuf> {
        if self.package_root.is_none() {
            self.refresh()?;
        }
        self.package_root
            .clone()
            .context("pip package root unavailable")
    }
}

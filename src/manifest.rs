//! Target description and manifest construction.
//!
//! The dependency graph is fixed and hand-curated per supported Python
//! ABI generation, not computed: the pip bootstrap set first, then the
//! cffi chain, the enum backports, the remaining pure-Python deps, and
//! finally cryptography and pyOpenSSL. Manifest order is install order
//! and must be preserved all the way into the generated document.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};

use crate::error::BundlerError;
use crate::package::Package;

/// Target operating system of a generated bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOs {
    Linux,
    Windows,
}

impl TargetOs {
    pub const ALL: [TargetOs; 2] = [TargetOs::Linux, TargetOs::Windows];
}

impl fmt::Display for TargetOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetOs::Linux => write!(f, "Linux"),
            TargetOs::Windows => write!(f, "Windows"),
        }
    }
}

impl FromStr for TargetOs {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Linux" => Ok(TargetOs::Linux),
            "Windows" => Ok(TargetOs::Windows),
            other => bail!("unsupported target '{other}'; expected 'Linux' or 'Windows'"),
        }
    }
}

/// Target CPU architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    Bits32,
    Bits64,
}

impl Arch {
    pub const ALL: [Arch; 2] = [Arch::Bits32, Arch::Bits64];
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arch::Bits32 => write!(f, "32bit"),
            Arch::Bits64 => write!(f, "64bit"),
        }
    }
}

impl FromStr for Arch {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "32bit" => Ok(Arch::Bits32),
            "64bit" => Ok(Arch::Bits64),
            other => bail!("unsupported architecture '{other}'; expected '32bit' or '64bit'"),
        }
    }
}

/// Python ABI of the target interpreter.
///
/// The "u" variants are the wide-unicode builds, which only ever
/// shipped on Linux.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abi {
    Cp26m,
    Cp26mu,
    Cp27m,
    Cp27mu,
}

impl Abi {
    pub const ALL: [Abi; 4] = [Abi::Cp26m, Abi::Cp26mu, Abi::Cp27m, Abi::Cp27mu];

    pub fn as_str(&self) -> &'static str {
        match self {
            Abi::Cp26m => "cp26m",
            Abi::Cp26mu => "cp26mu",
            Abi::Cp27m => "cp27m",
            Abi::Cp27mu => "cp27mu",
        }
    }

    /// Interpreter tag without the ABI flags (`cp26`, `cp27`).
    pub fn pyver(&self) -> &'static str {
        match self {
            Abi::Cp26m | Abi::Cp26mu => "cp26",
            Abi::Cp27m | Abi::Cp27mu => "cp27",
        }
    }

    /// Dotted Python version (`2.6`, `2.7`).
    pub fn semver(&self) -> &'static str {
        match self {
            Abi::Cp26m | Abi::Cp26mu => "2.6",
            Abi::Cp27m | Abi::Cp27mu => "2.7",
        }
    }

    /// Whether this is a wide-unicode ("u"-suffixed) build.
    pub fn is_wide_unicode(&self) -> bool {
        matches!(self, Abi::Cp26mu | Abi::Cp27mu)
    }
}

impl fmt::Display for Abi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Abi {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cp26m" => Ok(Abi::Cp26m),
            "cp26mu" => Ok(Abi::Cp26mu),
            "cp27m" => Ok(Abi::Cp27m),
            "cp27mu" => Ok(Abi::Cp27mu),
            other => bail!(
                "unsupported ABI '{other}'; expected one of cp26m, cp26mu, cp27m, cp27mu"
            ),
        }
    }
}

/// One (operating system, architecture, ABI) build target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSpec {
    pub os: TargetOs,
    pub arch: Arch,
    pub abi: Abi,
}

impl TargetSpec {
    pub fn new(os: TargetOs, arch: Arch, abi: Abi) -> Self {
        TargetSpec { os, arch, abi }
    }

    /// Wheel platform tag for this OS/arch pair.
    pub fn platform_tag(&self) -> &'static str {
        match (self.os, self.arch) {
            (TargetOs::Windows, Arch::Bits32) => "win32",
            (TargetOs::Windows, Arch::Bits64) => "win_amd64",
            (TargetOs::Linux, Arch::Bits32) => "manylinux1_i686",
            (TargetOs::Linux, Arch::Bits64) => "manylinux1_x86_64",
        }
    }

    /// Full wheel label, e.g. `cp27-cp27mu-manylinux1_x86_64`.
    pub fn wheel_label(&self) -> String {
        format!(
            "{}-{}-{}",
            self.abi.pyver(),
            self.abi,
            self.platform_tag()
        )
    }

    /// Reject combinations that never existed. Wide-unicode builds
    /// only shipped on Linux; asking for one under Windows is a fatal
    /// configuration error, checked before any network access.
    pub fn validate(&self) -> Result<()> {
        if self.os == TargetOs::Windows && self.abi.is_wide_unicode() {
            return Err(BundlerError::Configuration(format!(
                "unsupported Python ABI '{}' under {} {}",
                self.abi, self.os, self.arch
            ))
            .into());
        }
        Ok(())
    }
}

/// Ordered set of package descriptors for one target.
///
/// Insertion order encodes install-dependency order; logical names
/// are unique within one manifest.
#[derive(Debug, Default)]
pub struct Manifest {
    entries: Vec<Package>,
}

impl Manifest {
    pub fn new() -> Self {
        Manifest::default()
    }

    /// Append a descriptor, rejecting duplicate logical names.
    pub fn push(&mut self, pkg: Package) -> Result<()> {
        let name = pkg.name()?.to_string();
        if self.get(&name).is_some() {
            bail!("duplicate package '{name}' in manifest");
        }
        self.entries.push(pkg);
        Ok(())
    }

    /// Look up a descriptor by logical package name.
    pub fn get(&self, name: &str) -> Option<&Package> {
        self.entries
            .iter()
            .find(|pkg| pkg.name().map(|n| n == name).unwrap_or(false))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Package> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Package> {
        self.entries.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Logical names in install order.
    pub fn names(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter_map(|pkg| pkg.name().ok().map(str::to_string))
            .collect()
    }
}

/// Build the hand-curated manifest for one target.
///
/// The version tables are frozen: they are the last releases that
/// still support each ABI generation. cffi and cryptography carry the
/// target's wheel label; everything else is pure Python.
pub fn manifest_for(spec: &TargetSpec) -> Result<Manifest> {
    spec.validate()?;

    let label = spec.wheel_label();
    let mut manifest = Manifest::new();

    let files: Vec<String> = match spec.abi.semver() {
        "2.6" => {
            let cffi_version = match spec.os {
                TargetOs::Windows => "1.10.0",
                TargetOs::Linux => "1.11.2",
            };
            let crypto_version = match spec.os {
                TargetOs::Windows => "2.0.3",
                TargetOs::Linux => "2.1.1",
            };
            vec![
                // pip bootstrap set.
                "pip-9.0.3-py2.py3-none-any.whl".to_string(),
                "argparse-1.4.0-py2.py3-none-any.whl".to_string(),
                "wheel-0.29.0-py2.py3-none-any.whl".to_string(),
                "setuptools-36.8.0-py2.py3-none-any.whl".to_string(),
                // cffi chain (for cryptography).
                "pycparser-2.18.tar.gz".to_string(),
                format!("cffi-{cffi_version}-{label}.whl"),
                // enum backports (for cryptography).
                "ordereddict-1.1.tar.gz".to_string(),
                "enum34-1.1.10-py2-none-any.whl".to_string(),
                // Remaining pure-Python cryptography deps.
                "six-1.13.0-py2.py3-none-any.whl".to_string(),
                "asn1crypto-1.4.0-py2.py3-none-any.whl".to_string(),
                "idna-2.7-py2.py3-none-any.whl".to_string(),
                "ipaddress-1.0.23-py2.py3-none-any.whl".to_string(),
                format!("cryptography-{crypto_version}-{label}.whl"),
                // The TLS backend itself.
                "pyOpenSSL-16.2.0-py2.py3-none-any.whl".to_string(),
            ]
        }
        "2.7" => vec![
            // pip bootstrap set.
            "pip-20.3.4-py2.py3-none-any.whl".to_string(),
            "argparse-1.4.0-py2.py3-none-any.whl".to_string(),
            "wheel-0.36.2-py2.py3-none-any.whl".to_string(),
            "setuptools-44.1.1-py2.py3-none-any.whl".to_string(),
            // cffi chain (for cryptography).
            "pycparser-2.20-py2.py3-none-any.whl".to_string(),
            format!("cffi-1.14.6-{label}.whl"),
            // enum backports (for cryptography).
            "enum34-1.1.10-py2-none-any.whl".to_string(),
            // Remaining pure-Python cryptography deps.
            "six-1.16.0-py2.py3-none-any.whl".to_string(),
            "asn1crypto-1.4.0-py2.py3-none-any.whl".to_string(),
            "idna-2.10-py2.py3-none-any.whl".to_string(),
            "ipaddress-1.0.23-py2.py3-none-any.whl".to_string(),
            format!("cryptography-2.2.2-{label}.whl"),
            // The TLS backend itself.
            "pyOpenSSL-18.0.0-py2.py3-none-any.whl".to_string(),
        ],
        other => {
            return Err(BundlerError::Configuration(format!(
                "unsupported Python version '{other}' for ABI '{}'",
                spec.abi
            ))
            .into())
        }
    };

    for file in files {
        manifest.push(Package::new(file))?;
    }
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wheel_labels() {
        let spec = TargetSpec::new(TargetOs::Linux, Arch::Bits64, Abi::Cp27mu);
        assert_eq!(spec.wheel_label(), "cp27-cp27mu-manylinux1_x86_64");

        let spec = TargetSpec::new(TargetOs::Windows, Arch::Bits32, Abi::Cp26m);
        assert_eq!(spec.wheel_label(), "cp26-cp26m-win32");
    }

    #[test]
    fn test_windows_wide_unicode_rejected_before_any_network_access() {
        let spec = TargetSpec::new(TargetOs::Windows, Arch::Bits64, Abi::Cp27mu);
        let err = manifest_for(&spec).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<crate::error::BundlerError>(),
            Some(crate::error::BundlerError::Configuration(_))
        ));
    }

    #[test]
    fn test_manifest_order_is_deterministic() {
        let spec = TargetSpec::new(TargetOs::Linux, Arch::Bits64, Abi::Cp27mu);
        let first = manifest_for(&spec).unwrap().names();
        let second = manifest_for(&spec).unwrap().names();
        assert_eq!(first, second);
        assert_eq!(
            first,
            [
                "pip",
                "argparse",
                "wheel",
                "setuptools",
                "pycparser",
                "cffi",
                "enum34",
                "six",
                "asn1crypto",
                "idna",
                "ipaddress",
                "cryptography",
                "pyOpenSSL",
            ]
        );
    }

    #[test]
    fn test_cp26_manifest_includes_ordereddict_and_os_split_versions() {
        let linux = TargetSpec::new(TargetOs::Linux, Arch::Bits32, Abi::Cp26mu);
        let manifest = manifest_for(&linux).unwrap();
        assert!(manifest.get("ordereddict").is_some());
        assert_eq!(
            manifest.get("cffi").unwrap().filename(),
            "cffi-1.11.2-cp26-cp26mu-manylinux1_i686.whl"
        );

        let windows = TargetSpec::new(TargetOs::Windows, Arch::Bits32, Abi::Cp26m);
        let manifest = manifest_for(&windows).unwrap();
        assert_eq!(
            manifest.get("cryptography").unwrap().filename(),
            "cryptography-2.0.3-cp26-cp26m-win32.whl"
        );
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut manifest = Manifest::new();
        manifest
            .push(Package::new("six-1.16.0-py2.py3-none-any.whl"))
            .unwrap();
        assert!(manifest
            .push(Package::new("six-1.13.0-py2.py3-none-any.whl"))
            .is_err());
    }

    #[test]
    fn test_enum_ordering_precedes_cryptography() {
        let spec = TargetSpec::new(TargetOs::Linux, Arch::Bits64, Abi::Cp26mu);
        let names = manifest_for(&spec).unwrap().names();
        let pos = |n: &str| names.iter().position(|x| x == n).unwrap();
        assert!(pos("pip") < pos("pycparser"));
        assert!(pos("pycparser") < pos("cffi"));
        assert!(pos("enum34") < pos("cryptography"));
        assert!(pos("cryptography") < pos("pyOpenSSL"));
    }
}

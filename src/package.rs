//! Package descriptors and the package-index collaborator.
//!
//! A [`Package`] identifies one downloadable artifact by filename and
//! can resolve, fetch, and textify itself through a [`PackageIndex`].
//! The index is a trait so the bundler can run against the real PyPI
//! (HTML file-listing pages) in production and against canned pages in
//! tests.

use anyhow::{bail, Context, Result};
use regex::Regex;

use crate::document::{EncodedArtifact, FILEDATA_PAD};
use crate::encode;
use crate::error::BundlerError;

/// External lookup and download collaborator.
///
/// `project_page` returns the file-listing page for one released
/// version of a package; `download` retrieves an artifact by the URL
/// found on that page.
pub trait PackageIndex {
    fn project_page(&self, name: &str, version: &str) -> Result<String>;
    fn download(&self, url: &str) -> Result<Vec<u8>>;
}

/// One dependency artifact, identified by its filename.
///
/// The filename encodes name, version, and platform tag; `.tar.gz`
/// sdists strip two dot-suffix segments, every other artifact strips
/// one. Raw bytes and the project page are fetched at most once and
/// cached for the descriptor's lifetime.
#[derive(Debug, Clone)]
pub struct Package {
    filename: String,
    url: Option<String>,
    /// True when the URL was supplied at construction; such packages
    /// never touch the index, so they carry no author/license metadata.
    direct: bool,
    data: Option<Vec<u8>>,
    page: Option<String>,
}

impl Package {
    /// Descriptor that resolves its download URL through the index.
    pub fn new(filename: impl Into<String>) -> Self {
        Package {
            filename: filename.into(),
            url: None,
            direct: false,
            data: None,
            page: None,
        }
    }

    /// Descriptor preconstructed with a known download URL. Skips the
    /// index entirely; useful for mirrors and offline builds.
    pub fn with_url(filename: impl Into<String>, url: impl Into<String>) -> Self {
        Package {
            filename: filename.into(),
            url: Some(url.into()),
            direct: true,
            data: None,
            page: None,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Filename minus its suffix segments (two for `.tar.gz`, one
    /// otherwise).
    fn stem(&self) -> Result<&str> {
        let nsuffixes = if self.filename.ends_with(".tar.gz") { 2 } else { 1 };
        let mut base = self.filename.as_str();
        for _ in 0..nsuffixes {
            match base.rfind('.') {
                Some(idx) => base = &base[..idx],
                None => bail!("artifact filename '{}' has no suffix", self.filename),
            }
        }
        Ok(base)
    }

    /// Logical package name derived from the filename.
    pub fn name(&self) -> Result<&str> {
        self.stem()?
            .split('-')
            .next()
            .filter(|s| !s.is_empty())
            .with_context(|| format!("artifact filename '{}' has no name field", self.filename))
    }

    /// Package version derived from the filename.
    pub fn version(&self) -> Result<&str> {
        self.stem()?
            .split('-')
            .nth(1)
            .filter(|s| !s.is_empty())
            .with_context(|| format!("artifact filename '{}' has no version field", self.filename))
    }

    /// Project file-listing page, fetched once and cached.
    fn project_page(&mut self, index: &dyn PackageIndex) -> Result<&str> {
        if self.page.is_none() {
            let name = self.name()?.to_string();
            let version = self.version()?.to_string();
            let page = index
                .project_page(&name, &version)
                .with_context(|| format!("fetching index page for {name} {version}"))?;
            self.page = Some(page);
        }
        Ok(self.page.as_deref().unwrap_or_default())
    }

    /// Resolve the download URL, either preconstructed or by scanning
    /// the index page for an anchor row containing the exact filename.
    pub fn resolve_url(&mut self, index: &dyn PackageIndex) -> Result<&str> {
        if self.url.is_none() {
            let filename = self.filename.clone();
            let pattern = Regex::new(&format!(
                "<a href=\"(.*{}.*)\">",
                regex::escape(&filename)
            ))
            .context("compiling download link pattern")?;
            let page = self.project_page(index)?;
            let url = page
                .lines()
                .find_map(|row| pattern.captures(row))
                .map(|caps| caps[1].to_string());
            match url {
                Some(url) => self.url = Some(url),
                None => {
                    return Err(BundlerError::Lookup(format!(
                        "no download url found for artifact '{filename}'"
                    ))
                    .into())
                }
            }
        }
        Ok(self.url.as_deref().unwrap_or_default())
    }

    /// Package author as shown on the index page.
    pub fn author(&mut self, index: &dyn PackageIndex) -> Result<String> {
        let pattern = Regex::new("<p><strong>Author:</strong> <a href=\".*\">(.*)</a></p>")
            .context("compiling author pattern")?;
        let filename = self.filename.clone();
        let page = self.project_page(index)?;
        page.lines()
            .find_map(|row| pattern.captures(row))
            .map(|caps| caps[1].to_string())
            .ok_or_else(|| {
                BundlerError::Lookup(format!("no author found for artifact '{filename}'")).into()
            })
    }

    /// Package license as shown on the index page, with the common
    /// MIT/BSD spellings normalized to a single label each.
    pub fn license(&mut self, index: &dyn PackageIndex) -> Result<String> {
        let pattern = Regex::new("<p><strong>License:</strong> (.*)</p>")
            .context("compiling license pattern")?;
        let filename = self.filename.clone();
        let page = self.project_page(index)?;
        let raw = page
            .lines()
            .find_map(|row| pattern.captures(row))
            .map(|caps| caps[1].to_string())
            .ok_or_else(|| {
                BundlerError::Lookup(format!("no license found for artifact '{filename}'"))
            })?;
        Ok(normalize_license(&raw))
    }

    /// Download the artifact bytes, caching them for the descriptor's
    /// lifetime. Repeated calls never touch the network again.
    pub fn fetch(&mut self, index: &dyn PackageIndex) -> Result<&[u8]> {
        if self.data.is_none() {
            let url = self.resolve_url(index)?.to_string();
            let data = index
                .download(&url)
                .with_context(|| format!("downloading artifact '{}'", self.filename))?;
            self.data = Some(data);
        }
        Ok(self.data.as_deref().unwrap_or_default())
    }

    /// Textual form of the artifact for embedding in the installer
    /// document, fetching lazily if the bytes are not yet cached.
    ///
    /// Index-resolved packages carry author/license metadata; direct
    /// URL packages do not.
    pub fn to_encoded(&mut self, index: &dyn PackageIndex) -> Result<EncodedArtifact> {
        let name = self.name()?.to_string();
        let (author, license) = if self.direct {
            (None, None)
        } else {
            (Some(self.author(index)?), Some(self.license(index)?))
        };
        let data = self.fetch(index)?;
        let filedata = encode::encode(data, FILEDATA_PAD);
        Ok(EncodedArtifact {
            name,
            author,
            license,
            filename: self.filename.clone(),
            filedata,
        })
    }
}

/// Collapse the many MIT/BSD license spellings on index pages into a
/// single label each; everything else passes through unchanged.
fn normalize_license(raw: &str) -> String {
    let mit = Regex::new(r"^MIT( License( \(UNKNOWN|MIT.*\)?))?");
    let bsd = Regex::new(r"^BSD( License( \(UNKNOWN|BSD.*\)?))?");
    if mit.map(|re| re.is_match(raw)).unwrap_or(false) {
        "MIT License (MIT)".to_string()
    } else if bsd.map(|re| re.is_match(raw)).unwrap_or(false) {
        "BSD License (BSD)".to_string()
    } else {
        raw.to_string()
    }
}

/// The real package index at `https://pypi.org`.
///
/// Serves the per-release file-listing pages the descriptors scan for
/// download links and metadata rows.
pub struct PypiIndex {
    client: reqwest::blocking::Client,
    root: String,
}

impl PypiIndex {
    pub fn new() -> Self {
        Self::with_root("https://pypi.org")
    }

    /// Index rooted somewhere else (mirrors, local test servers).
    pub fn with_root(root: impl Into<String>) -> Self {
        PypiIndex {
            client: reqwest::blocking::Client::new(),
            root: root.into(),
        }
    }
}

impl Default for PypiIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl PackageIndex for PypiIndex {
    fn project_page(&self, name: &str, version: &str) -> Result<String> {
        let url = format!("{}/project/{}/{}/", self.root, name, version);
        let response = self
            .client
            .get(&url)
            .send()
            .with_context(|| format!("requesting index page '{url}'"))?;
        let response = response.error_for_status().map_err(|err| {
            BundlerError::Lookup(format!("index page '{url}' unavailable: {err}"))
        })?;
        response
            .text()
            .with_context(|| format!("reading index page '{url}'"))
    }

    fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("requesting artifact '{url}'"))?;
        let response = response
            .error_for_status()
            .map_err(|err| BundlerError::Lookup(format!("artifact '{url}' unavailable: {err}")))?;
        let bytes = response
            .bytes()
            .with_context(|| format!("reading artifact '{url}'"))?;
        Ok(bytes.to_vec())
    }
}

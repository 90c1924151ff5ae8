//! Self-contained pip installers with a pyOpenSSL TLS backend.
//!
//! Old CPython interpreters (2.6/2.7, narrow and wide unicode builds)
//! ship an `ssl` module without Server Name Indication, which locks
//! their pip out of today's package index entirely. This crate builds
//! installer bundles that work around that, and runs them:
//!
//! - **Bundler** (build time) - resolves a hand-curated dependency
//!   manifest per (OS, arch, ABI) target, downloads every wheel and
//!   sdist, base64-encodes them, and injects the result into a
//!   plain-text installer-document template.
//! - **Bootstrapper** (install time) - unpacks the embedded pip from a
//!   bundle, has it install its own permanent copy through the target
//!   interpreter, installs the remaining dependency chain in manifest
//!   order, and finally patches the installed pip's sources so its TLS
//!   goes through pyOpenSSL.
//!
//! # Architecture
//!
//! ```text
//! package::Package --> encode --> document --> template --> bundle
//!     (fetch)         (base64)   (render)     (inject)     (write)
//!
//! locate --> document --> bootstrap::Sequencer --> patch
//!  (find)     (parse)     (extract + install)     (rewrite)
//! ```
//!
//! Everything is sequential and single-threaded; every failure is
//! fatal and carries its context to the top level.

pub mod bootstrap;
pub mod bundle;
pub mod document;
pub mod encode;
pub mod error;
pub mod locate;
pub mod manifest;
pub mod package;
pub mod patch;
pub mod template;

pub use error::BundlerError;

//! Pattern-anchored source patching of the installed pip.
//!
//! Two independent single-pass text transformations redirect pip's TLS
//! layer through pyOpenSSL after installation:
//!
//! 1. anchor injection: right after a `try:` line, in front of the
//!    `import ssl` that follows it, inject a warnings-suppressed block
//!    that activates pyOpenSSL's urllib3 hook;
//! 2. literal substitution: in urllib3's pyopenssl shim, encode the
//!    outgoing payload to bytes before handing it to the socket.
//!
//! These are deliberately textual. The target files are foreign,
//! versioned Python sources whose exact formatting matters; parsing
//! them would buy nothing and break compatibility with the anchor
//! lines as they actually appear. Each pass reads the whole file
//! before writing anything back, so an interrupted run never leaves a
//! half-written file.
//!
//! The anchor pass carries no explicit already-patched guard, yet
//! re-running it on a patched file is a no-op: the line after `try:`
//! is then the injected `import warnings`, which clears the lookback
//! before the `import ssl` anchor comes around again.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::error::BundlerError;

/// Lines injected in front of pip's `import ssl`, indented to match it.
const INJECTION: [&str; 6] = [
    "import warnings",
    "with warnings.catch_warnings():",
    "    warnings.simplefilter(\"ignore\", category=DeprecationWarning)",
    "    from pip._vendor.urllib3.contrib import pyopenssl",
    "    pyopenssl.inject_into_urllib3()",
    "    del pyopenssl",
];

/// The network-send call rewritten by the substitution pass.
const SEND_CALL: &str = "return self.connection.send(data)";

/// Patch the installed pip rooted at `pip_root` (the directory that
/// holds pip's `__init__.py`).
///
/// The ssl-import anchor lives in `_vendor/distlib/compat.py` on
/// recent pip versions and in `__init__.py` on older ones; the first
/// existing file wins; if neither exists, patching fails.
pub fn patch_pip(pip_root: &Path) -> Result<()> {
    let target = ssl_import_file(pip_root)?;
    apply(&target, inject_pyopenssl_hook)
        .with_context(|| format!("patching ssl import in '{}'", target.display()))?;

    let pyopenssl = pip_root
        .join("_vendor")
        .join("urllib3")
        .join("contrib")
        .join("pyopenssl.py");
    if !pyopenssl.is_file() {
        return Err(BundlerError::Patch(format!(
            "pyopenssl shim not found at '{}'",
            pyopenssl.display()
        ))
        .into());
    }
    apply(&pyopenssl, rewrite_send_call)
        .with_context(|| format!("patching send call in '{}'", pyopenssl.display()))
}

/// Locate the file carrying the `import ssl` anchor, preferring the
/// distlib compat module and falling back to pip's own `__init__.py`.
fn ssl_import_file(pip_root: &Path) -> Result<PathBuf> {
    let compat = pip_root.join("_vendor").join("distlib").join("compat.py");
    if compat.is_file() {
        return Ok(compat);
    }
    let init = pip_root.join("__init__.py");
    if init.is_file() {
        return Ok(init);
    }
    Err(BundlerError::Patch(format!(
        "no ssl import target under '{}': neither '{}' nor '{}' exists",
        pip_root.display(),
        compat.display(),
        init.display()
    ))
    .into())
}

/// Read `path` fully, transform its text, and write the result back.
fn apply(path: &Path, transform: fn(&str) -> String) -> Result<()> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading patch target '{}'", path.display()))?;
    let patched = transform(&text);
    fs::write(path, patched)
        .map_err(|err| BundlerError::Patch(format!("writing '{}': {err}", path.display())).into())
}

/// Anchor-injection pass.
///
/// Streams the text line by line with a one-line lookback: a line
/// containing `try:` arms the flag; the next line, if it contains
/// `import ssl`, receives the injection block indented by its own
/// leading whitespace. Any other line clears the flag.
fn inject_pyopenssl_hook(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 256);
    let mut found_try = false;

    for line in text.split_inclusive('\n') {
        let body = line.trim_end_matches(['\n', '\r']);
        if body.contains("try:") {
            found_try = true;
        } else if found_try && body.contains("import ssl") {
            let indent = &body[..body.len() - body.trim_start().len()];
            for item in INJECTION {
                out.push_str(indent);
                out.push_str(item);
                out.push('\n');
            }
            found_try = false;
        } else {
            found_try = false;
        }
        out.push_str(line);
    }
    out
}

/// Literal-substitution pass: encode the payload of the urllib3
/// pyopenssl send call to bytes before it reaches the socket.
fn rewrite_send_call(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        if line.contains(SEND_CALL) {
            out.push_str(&line.replace("data", "data.encode()"));
        } else {
            out.push_str(line);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const COMPAT_SNIPPET: &str = "\
import os
try:
    import ssl
except ImportError:  # pragma: no cover
    ssl = None
";

    fn fake_pip_tree(with_compat: bool) -> TempDir {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("_vendor/urllib3/contrib")).unwrap();
        fs::write(
            root.join("_vendor/urllib3/contrib/pyopenssl.py"),
            "class WrappedSocket(object):\n    def sendall(self, data):\n        return self.connection.send(data)\n",
        )
        .unwrap();
        if with_compat {
            fs::create_dir_all(root.join("_vendor/distlib")).unwrap();
            fs::write(root.join("_vendor/distlib/compat.py"), COMPAT_SNIPPET).unwrap();
        }
        fs::write(root.join("__init__.py"), COMPAT_SNIPPET).unwrap();
        temp
    }

    #[test]
    fn test_injection_lands_between_try_and_import() {
        let patched = inject_pyopenssl_hook(COMPAT_SNIPPET);
        let lines: Vec<&str> = patched.lines().collect();
        assert_eq!(lines[1], "try:");
        assert_eq!(lines[2], "    import warnings");
        assert_eq!(lines[3], "    with warnings.catch_warnings():");
        assert_eq!(lines[7], "        del pyopenssl");
        assert_eq!(lines[8], "    import ssl");
        // Everything after the anchor is untouched.
        assert!(patched.ends_with("    ssl = None\n"));
    }

    #[test]
    fn test_indentation_is_taken_from_the_anchor_line() {
        let text = "def f():\n    try:\n        import ssl\n";
        let patched = inject_pyopenssl_hook(text);
        assert!(patched.contains("        import warnings\n"));
        assert!(patched.contains("            del pyopenssl\n"));
    }

    #[test]
    fn test_import_ssl_without_preceding_try_is_ignored() {
        let text = "import os\nimport ssl\n";
        assert_eq!(inject_pyopenssl_hook(text), text);
    }

    #[test]
    fn test_blank_line_between_try_and_import_disarms() {
        let text = "try:\n\n    import ssl\n";
        assert_eq!(inject_pyopenssl_hook(text), text);
    }

    #[test]
    fn test_flag_rearms_on_every_fresh_try() {
        let text = "try:\n    pass\ntry:\n    import ssl\n";
        let patched = inject_pyopenssl_hook(text);
        assert_eq!(patched.matches("inject_into_urllib3").count(), 1);
        assert!(patched.contains("try:\n    import warnings"));
    }

    // There is no explicit already-patched marker, but the injected
    // block lands between try: and import ssl, so on a second run the
    // lookback is cleared by `import warnings` before the anchor is
    // reached again.
    #[test]
    fn test_second_run_leaves_patched_file_unchanged() {
        let once = inject_pyopenssl_hook(COMPAT_SNIPPET);
        let twice = inject_pyopenssl_hook(&once);
        assert_eq!(once.matches("inject_into_urllib3()").count(), 1);
        assert_eq!(twice, once);
    }

    #[test]
    fn test_send_call_rewritten_to_encode() {
        let text = "    def sendall(self, data):\n        return self.connection.send(data)\n";
        let patched = rewrite_send_call(text);
        assert!(patched.contains("return self.connection.send(data.encode())"));
        assert!(patched.contains("def sendall(self, data):"));
    }

    #[test]
    fn test_patch_pip_prefers_compat_file() {
        let temp = fake_pip_tree(true);
        patch_pip(temp.path()).unwrap();

        let compat = fs::read_to_string(temp.path().join("_vendor/distlib/compat.py")).unwrap();
        assert!(compat.contains("inject_into_urllib3()"));
        // The fallback file is untouched when compat.py exists.
        let init = fs::read_to_string(temp.path().join("__init__.py")).unwrap();
        assert!(!init.contains("inject_into_urllib3()"));

        let shim =
            fs::read_to_string(temp.path().join("_vendor/urllib3/contrib/pyopenssl.py")).unwrap();
        assert!(shim.contains("send(data.encode())"));
    }

    #[test]
    fn test_patch_pip_falls_back_to_init() {
        let temp = fake_pip_tree(false);
        patch_pip(temp.path()).unwrap();
        let init = fs::read_to_string(temp.path().join("__init__.py")).unwrap();
        assert!(init.contains("inject_into_urllib3()"));
    }

    #[test]
    fn test_missing_targets_are_patch_errors() {
        let temp = TempDir::new().unwrap();
        let err = patch_pip(temp.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BundlerError>(),
            Some(BundlerError::Patch(_))
        ));
    }
}

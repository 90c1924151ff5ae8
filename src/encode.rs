//! Reversible binary-to-text codec for embedding artifacts.
//!
//! Packages are stored inside the generated installer document as
//! base64 blocks split into fixed-width lines. The decoder strips
//! per-line whitespace before decoding, so the blocks survive being
//! indented inside a larger document and any line-ending normalization
//! applied to it along the way.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// Total column width of an encoded line, including left padding.
pub const LINE_WIDTH: usize = 79;

/// Encode raw bytes as a base64 block with `pad` spaces of left
/// padding on every line. Line content shrinks so that padding plus
/// content stays within [`LINE_WIDTH`] columns.
pub fn encode(data: &[u8], pad: usize) -> String {
    encode_with_width(data, pad, LINE_WIDTH.saturating_sub(pad))
}

/// Encode raw bytes as a base64 block with an explicit content width.
pub fn encode_with_width(data: &[u8], pad: usize, nchars: usize) -> String {
    let raw = STANDARD.encode(data);
    let spaces = " ".repeat(pad);
    let nchars = nchars.max(1);

    let mut lines = Vec::with_capacity(raw.len() / nchars + 1);
    let bytes = raw.as_bytes();
    let mut start = 0;
    while start < bytes.len() {
        let end = (start + nchars).min(bytes.len());
        // base64 output is ASCII, so byte slicing never splits a char
        lines.push(format!("{}{}", spaces, &raw[start..end]));
        start = end;
    }
    lines.join("\n")
}

/// Decode a base64 block produced by [`encode`], tolerating leading
/// and trailing whitespace on every line (including `\r`).
///
/// Malformed base64 is a fatal error; the embedded payloads are
/// machine-generated, so corruption means the document is unusable.
pub fn decode(text: &str) -> Result<Vec<u8>> {
    let compact: String = text.lines().map(str::trim).collect();
    STANDARD
        .decode(compact.as_bytes())
        .context("decoding embedded base64 payload")
}

//! Body decoding: gzip detection, BOM stripping and UTF-8 validation.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;

/// Leading bytes of a gzip stream.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// UTF-8 byte order mark.
const UTF8_BOM: &[u8] = &[0xef, 0xbb, 0xbf];

/// Decodes a feed body into text.
///
/// Bodies starting with the gzip magic are decompressed first, whatever the
/// `Content-Type` or file extension said.
///
/// # Errors
///
/// Returns an error if decompression fails or the result is not UTF-8.
pub fn decode_body(bytes: &[u8]) -> Result<String> {
    let raw = if bytes.starts_with(&GZIP_MAGIC) {
        let mut out = Vec::with_capacity(bytes.len().saturating_mul(4));
        GzDecoder::new(bytes)
            .read_to_end(&mut out)
            .context("failed to decompress gzip body")?;
        tracing::debug!(
            compressed = bytes.len(),
            decompressed = out.len(),
            "Decompressed gzip body"
        );
        out
    } else {
        bytes.to_vec()
    };

    let raw = match raw.strip_prefix(UTF8_BOM) {
        Some(rest) => rest.to_vec(),
        None => raw,
    };
    String::from_utf8(raw).context("feed body is not valid UTF-8")
}

/// Reads and decodes a feed from disk.
///
/// # Errors
///
/// Returns an error if the file cannot be read or decoded.
pub fn read_local(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    decode_body(&bytes).with_context(|| format!("failed to decode {}", path.display()))
}

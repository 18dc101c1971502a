//! Reading profile input from files or stdin.
//!
//! Profiles are often shipped compressed. Gzip and zstd input is detected
//! by its magic bytes and decompressed transparently.

use crate::error::Result;
use flate2::read::GzDecoder;
use log::debug;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// Compression applied to an input stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Zstd,
}

impl Compression {
    /// Detect compression from the leading bytes of the input.
    pub fn detect(bytes: &[u8]) -> Self {
        if bytes.starts_with(&GZIP_MAGIC) {
            Compression::Gzip
        } else if bytes.starts_with(&ZSTD_MAGIC) {
            Compression::Zstd
        } else {
            Compression::None
        }
    }
}

/// Returns true when `path` names standard input.
pub fn is_stdin(path: &Path) -> bool {
    path.as_os_str() == "-"
}

/// Read the whole input at `path` (or stdin for `-`), decompressing it if
/// needed.
pub fn read_input(path: &Path) -> Result<Vec<u8>> {
    let mut raw = Vec::new();
    if is_stdin(path) {
        io::stdin().lock().read_to_end(&mut raw)?;
    } else {
        File::open(path)?.read_to_end(&mut raw)?;
    }
    decompress(raw)
}

/// Decompress `raw` according to its magic bytes.
pub fn decompress(raw: Vec<u8>) -> Result<Vec<u8>> {
    match Compression::detect(&raw) {
        Compression::None => Ok(raw),
        Compression::Gzip => {
            let mut decoded = Vec::new();
            GzDecoder::new(raw.as_slice()).read_to_end(&mut decoded)?;
            debug!("Decompressed gzip input: {} -> {} bytes", raw.len(), decoded.len());
            Ok(decoded)
        }
        Compression::Zstd => {
            let decoded = zstd::stream::decode_all(raw.as_slice())?;
            debug!("Decompressed zstd input: {} -> {} bytes", raw.len(), decoded.len());
            Ok(decoded)
        }
    }
}

//! SHA-256 content hashing for files and byte slices
//!
//! The hex digest identifies a plaintext in the custody store and is
//! rechecked after decryption.

use std::fmt::Write as _;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use encx_core::{EncxResult, IoResultExt};

/// Read buffer for streaming hashes
pub const READ_BLOCK: usize = 64 * 1024;

/// Hash a byte slice in memory.
pub fn digest_bytes(data: &[u8]) -> String {
    to_hex(&Sha256::digest(data))
}

/// Hash a file from disk in fixed-size blocks; the file is never fully loaded.
pub fn digest(path: &Path) -> EncxResult<String> {
    digest_in_blocks(path, READ_BLOCK)
}

/// Like [`digest`], reading at most `block` bytes at a time.
pub fn digest_in_blocks(path: &Path, block: usize) -> EncxResult<String> {
    let file = std::fs::File::open(path).at_path(path)?;
    hash_blocks(file, block.max(1)).at_path(path)
}

/// Hash everything a reader yields.
pub fn digest_reader<R: Read>(reader: R) -> std::io::Result<String> {
    hash_blocks(reader, READ_BLOCK)
}

fn hash_blocks<R: Read>(mut reader: R, block: usize) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; block];

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }

    Ok(to_hex(&hasher.finalize()))
}

/// Format bytes as lowercase hex
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Parse a 64-char hex string into a raw 32-byte digest
pub fn from_hex(hex: &str) -> Option<[u8; 32]> {
    if hex.len() != 64 {
        return None;
    }
    let mut out = [0u8; 32];
    for (i, pair) in hex.as_bytes().chunks(2).enumerate() {
        let s = std::str::from_utf8(pair).ok()?;
        out[i] = u8::from_str_radix(s, 16).ok()?;
    }
    Some(out)
}

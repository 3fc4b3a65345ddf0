use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::{EncxError, EncxResult};

/// Nonce length shared by every supported AEAD (96-bit)
pub const NONCE_LEN: usize = 12;

/// Authentication tag length shared by every supported AEAD
pub const TAG_LEN: usize = 16;

/// Length of a SHA-256 digest rendered as lowercase hex
pub const HASH_HEX_LEN: usize = 64;

/// AEAD algorithm used for a container and recorded in its custody record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    #[serde(rename = "aes-128-gcm")]
    Aes128Gcm,
    #[serde(rename = "aes-192-gcm")]
    Aes192Gcm,
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
}

impl Algorithm {
    pub fn key_len(self) -> usize {
        match self {
            Algorithm::Aes128Gcm => 16,
            Algorithm::Aes192Gcm => 24,
            Algorithm::Aes256Gcm | Algorithm::ChaCha20Poly1305 => 32,
        }
    }

    pub fn key_bits(self) -> u16 {
        (self.key_len() * 8) as u16
    }

    /// Wire identifier stored in the container header
    pub fn id(self) -> u8 {
        match self {
            Algorithm::Aes128Gcm => 1,
            Algorithm::Aes192Gcm => 2,
            Algorithm::Aes256Gcm => 3,
            Algorithm::ChaCha20Poly1305 => 4,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Algorithm::Aes128Gcm),
            2 => Some(Algorithm::Aes192Gcm),
            3 => Some(Algorithm::Aes256Gcm),
            4 => Some(Algorithm::ChaCha20Poly1305),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Aes128Gcm => "aes-128-gcm",
            Algorithm::Aes192Gcm => "aes-192-gcm",
            Algorithm::Aes256Gcm => "aes-256-gcm",
            Algorithm::ChaCha20Poly1305 => "chacha20-poly1305",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything needed to decrypt one container later.
///
/// Keyed in the custody store by `file_hash`, the SHA-256 of the plaintext.
/// Records are replaced or rejected as a whole, never patched.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodyRecord {
    /// SHA-256 of the plaintext (64 lowercase hex chars)
    pub file_hash: String,
    #[serde(with = "b64")]
    pub key: Vec<u8>,
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
    /// Tag of the final chunk, which seals the end of the stream
    #[serde(with = "b64")]
    pub tag: Vec<u8>,
    /// Where the container was written
    pub source_address: String,
    pub algorithm: Algorithm,
    /// Unix timestamp of the encryption
    #[serde(default)]
    pub created_at: u64,
}

impl CustodyRecord {
    /// Check that every field has the size its algorithm requires.
    pub fn validate(&self) -> EncxResult<()> {
        if self.file_hash.len() != HASH_HEX_LEN
            || !self
                .file_hash
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(EncxError::InvalidKeyMaterial(format!(
                "file hash must be {HASH_HEX_LEN} lowercase hex chars, got '{}'",
                self.file_hash
            )));
        }
        if self.key.len() != self.algorithm.key_len() {
            return Err(EncxError::InvalidKeyMaterial(format!(
                "{} needs a {}-byte key, got {}",
                self.algorithm,
                self.algorithm.key_len(),
                self.key.len()
            )));
        }
        if self.nonce.len() != NONCE_LEN {
            return Err(EncxError::InvalidKeyMaterial(format!(
                "nonce must be {NONCE_LEN} bytes, got {}",
                self.nonce.len()
            )));
        }
        if self.tag.len() != TAG_LEN {
            return Err(EncxError::InvalidKeyMaterial(format!(
                "tag must be {TAG_LEN} bytes, got {}",
                self.tag.len()
            )));
        }
        Ok(())
    }

    /// True when both records carry the same (key, nonce) pair.
    pub fn shares_key_material(&self, other: &CustodyRecord) -> bool {
        self.key == other.key && self.nonce == other.nonce
    }
}

impl Drop for CustodyRecord {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl fmt::Debug for CustodyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustodyRecord")
            .field("file_hash", &self.file_hash)
            .field("key", &"[REDACTED]")
            .field("nonce", &self.nonce)
            .field("tag", &self.tag)
            .field("source_address", &self.source_address)
            .field("algorithm", &self.algorithm)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Progress callback: `(bytes_done, bytes_total, message)`, invoked after each chunk
pub type ProgressFn = Box<dyn Fn(u64, u64, &str) + Send + Sync>;

/// Cooperative cancellation, observed between chunks only.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

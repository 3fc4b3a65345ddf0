//! Key and nonce supplied for decryption

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use zeroize::Zeroizing;

use encx_core::{Algorithm, CustodyRecord, EncxError, EncxResult};
use encx_crypto::SymmetricKey;

/// Raw key bytes and base nonce. The key length is checked against the
/// container's algorithm only once the header has been read.
pub struct KeyMaterial {
    key: Zeroizing<Vec<u8>>,
    nonce: Vec<u8>,
}

/// Where the key material for a decryption came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialSource {
    Supplied,
    Store,
}

impl KeyMaterial {
    pub fn new(key: &[u8], nonce: &[u8]) -> Self {
        Self {
            key: Zeroizing::new(key.to_vec()),
            nonce: nonce.to_vec(),
        }
    }

    /// Decode standard base64, as printed by `encx store search`.
    pub fn from_base64(key: &str, nonce: &str) -> EncxResult<Self> {
        let key = Zeroizing::new(
            STANDARD
                .decode(key.trim())
                .map_err(|e| EncxError::InvalidKeyMaterial(format!("key is not base64: {e}")))?,
        );
        let nonce = STANDARD
            .decode(nonce.trim())
            .map_err(|e| EncxError::InvalidKeyMaterial(format!("nonce is not base64: {e}")))?;
        Ok(Self { key, nonce })
    }

    pub fn from_record(record: &CustodyRecord) -> Self {
        Self::new(&record.key, &record.nonce)
    }

    pub fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    pub fn key_for(&self, algorithm: Algorithm) -> EncxResult<SymmetricKey> {
        SymmetricKey::from_bytes(algorithm, &self.key)
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key", &"[REDACTED]")
            .field("nonce_len", &self.nonce.len())
            .finish()
    }
}

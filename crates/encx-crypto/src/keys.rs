//! Symmetric key material: generation, validation, zeroization

use rand::RngCore;
use zeroize::Zeroize;

use encx_core::types::NONCE_LEN;
use encx_core::{Algorithm, EncxError, EncxResult};

/// A per-file symmetric key sized for one [`Algorithm`]. Zeroized on drop.
#[derive(Clone)]
pub struct SymmetricKey {
    bytes: Vec<u8>,
}

impl SymmetricKey {
    /// Generate a random key of the length `algorithm` requires.
    pub fn generate(algorithm: Algorithm) -> Self {
        let mut bytes = vec![0u8; algorithm.key_len()];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Wrap caller-supplied bytes, checking their length against `algorithm`.
    pub fn from_bytes(algorithm: Algorithm, bytes: &[u8]) -> EncxResult<Self> {
        if bytes.len() != algorithm.key_len() {
            return Err(EncxError::InvalidKeyMaterial(format!(
                "{algorithm} needs a {}-bit key, got {} bits",
                algorithm.key_bits(),
                bytes.len() * 8
            )));
        }
        Ok(Self {
            bytes: bytes.to_vec(),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("bits", &(self.bytes.len() * 8))
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Fresh random base nonce. Never derived from content, never reused.
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Convert a stored nonce back to its fixed-size form.
pub fn nonce_from_slice(bytes: &[u8]) -> EncxResult<[u8; NONCE_LEN]> {
    bytes.try_into().map_err(|_| {
        EncxError::InvalidKeyMaterial(format!(
            "nonce must be {NONCE_LEN} bytes, got {}",
            bytes.len()
        ))
    })
}

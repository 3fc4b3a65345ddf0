//! Per-chunk AEAD sealing with detached tags
//!
//! One [`ChunkCipher`] is built per container and reused for every chunk;
//! the chunk buffer is encrypted in place so the engine holds a single
//! chunk-sized allocation.

use aes_gcm::aead::consts::U12;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes192;
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm};
use chacha20poly1305::ChaCha20Poly1305;

use encx_core::types::{NONCE_LEN, TAG_LEN};
use encx_core::{Algorithm, EncxError, EncxResult};

use crate::keys::SymmetricKey;

type Aes192Gcm = AesGcm<Aes192, U12>;

pub enum ChunkCipher {
    Aes128(Aes128Gcm),
    Aes192(Aes192Gcm),
    Aes256(Aes256Gcm),
    ChaCha(ChaCha20Poly1305),
}

impl ChunkCipher {
    pub fn new(algorithm: Algorithm, key: &SymmetricKey) -> EncxResult<Self> {
        let bad_len = |_| {
            EncxError::InvalidKeyMaterial(format!(
                "{algorithm} needs a {}-bit key, got {} bits",
                algorithm.key_bits(),
                key.len() * 8
            ))
        };
        let k = key.as_bytes();
        Ok(match algorithm {
            Algorithm::Aes128Gcm => ChunkCipher::Aes128(Aes128Gcm::new_from_slice(k).map_err(bad_len)?),
            Algorithm::Aes192Gcm => ChunkCipher::Aes192(Aes192Gcm::new_from_slice(k).map_err(bad_len)?),
            Algorithm::Aes256Gcm => ChunkCipher::Aes256(Aes256Gcm::new_from_slice(k).map_err(bad_len)?),
            Algorithm::ChaCha20Poly1305 => {
                ChunkCipher::ChaCha(ChaCha20Poly1305::new_from_slice(k).map_err(bad_len)?)
            }
        })
    }

    /// Encrypt `buf` in place and return its tag.
    pub fn seal_in_place(
        &self,
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        buf: &mut [u8],
    ) -> EncxResult<[u8; TAG_LEN]> {
        let nonce = GenericArray::from_slice(nonce);
        let tag = match self {
            ChunkCipher::Aes128(c) => c.encrypt_in_place_detached(nonce, aad, buf),
            ChunkCipher::Aes192(c) => c.encrypt_in_place_detached(nonce, aad, buf),
            ChunkCipher::Aes256(c) => c.encrypt_in_place_detached(nonce, aad, buf),
            ChunkCipher::ChaCha(c) => c.encrypt_in_place_detached(nonce, aad, buf),
        }
        .map_err(|e| EncxError::InvalidKeyMaterial(format!("chunk encryption failed: {e}")))?;

        let mut out = [0u8; TAG_LEN];
        out.copy_from_slice(&tag);
        Ok(out)
    }

    /// Verify `tag` and decrypt `buf` in place. On failure `buf` content is unspecified.
    pub fn open_in_place(
        &self,
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        buf: &mut [u8],
        tag: &[u8; TAG_LEN],
    ) -> bool {
        let nonce = GenericArray::from_slice(nonce);
        let tag = GenericArray::from_slice(tag);
        match self {
            ChunkCipher::Aes128(c) => c.decrypt_in_place_detached(nonce, aad, buf, tag),
            ChunkCipher::Aes192(c) => c.decrypt_in_place_detached(nonce, aad, buf, tag),
            ChunkCipher::Aes256(c) => c.decrypt_in_place_detached(nonce, aad, buf, tag),
            ChunkCipher::ChaCha(c) => c.decrypt_in_place_detached(nonce, aad, buf, tag),
        }
        .is_ok()
    }
}

/// Derive the nonce for chunk `index`.
///
/// The counter occupies bytes 7..11 and the last-chunk flag byte 11, both
/// XORed into the random base nonce.
pub fn chunk_nonce(base: &[u8; NONCE_LEN], index: u32, last: bool) -> [u8; NONCE_LEN] {
    let mut nonce = *base;
    for (dst, src) in nonce[7..11].iter_mut().zip(index.to_be_bytes()) {
        *dst ^= src;
    }
    nonce[11] ^= u8::from(last);
    nonce
}

//! encx-crypto: streaming authenticated file encryption
//!
//! Pipeline: SHA-256 plaintext → header (nonce, hash, chunk geometry) → per-chunk AEAD → container
//!
//! Container layout:
//! ```text
//! header (70 bytes):
//!   magic "ENCX" | version u8 | algorithm u8 | chunk_size u32 BE | nonce [12]
//!   | plaintext SHA-256 [32] | plaintext_len u64 BE | chunk_count u64 BE
//! chunks, in order:
//!   [ciphertext (chunk_size bytes, last chunk shorter)][16-byte tag]
//! ```
//!
//! Chunk `i` is sealed with nonce = base_nonce ⊕ (0^7 || i as u32 BE || last_flag)
//! and AAD = the raw header, so chunks cannot be reordered, dropped, or moved
//! between containers, and a stream cut at a chunk boundary fails because no
//! surviving chunk carries the last flag.

pub mod cipher;
pub mod container;
pub mod hash;
pub mod keys;
pub mod stream;

pub use cipher::{chunk_nonce, ChunkCipher};
pub use container::{read_header, ContainerHeader, HEADER_LEN};
pub use hash::{digest, digest_bytes, digest_in_blocks};
pub use keys::{generate_nonce, SymmetricKey};
pub use stream::{
    chunk_size_for_budget, container_path, decrypt_file, encrypt_file, plaintext_path,
    verify_container, Opened, Sealed, StreamHooks, Verified,
};

pub use encx_core::types::{NONCE_LEN, TAG_LEN};

//! encx-store: custody records for encrypted files
//!
//! One JSON document maps each plaintext SHA-256 (lowercase hex) to the key,
//! base nonce and final tag needed to decrypt its container. The document is
//! re-read on every operation and replaced atomically after every mutation.

pub mod custody;

pub use custody::{CustodyStore, STORE_FORMAT_VERSION};

//! encx-identity: local root authority and certificate-based authentication
//!
//! - [`authority`]: lazily created self-signed root (Ed25519), leaf issuance
//! - [`validate`]: chain check of a presented certificate against the root
//! - [`challenge`]: signed-nonce proof of possession of the private key
//! - [`bundle`]: PKCS#12 export/import of a leaf identity

pub mod authority;
pub mod bundle;
pub mod certificate;
pub mod challenge;
pub mod validate;

pub use authority::{Bootstrap, IdentityFiles, IssuedIdentity, RootAuthority};
pub use bundle::{export_bundle, import_bundle, Bundle};
pub use certificate::Certificate;
pub use challenge::{
    challenge_response, respond, signing_key_from_pem, ChallengeSession, CHALLENGE_LEN,
};
pub use validate::{validate_at, validate_cert_against_ca};

pub use ed25519_dalek::{Signature, SigningKey};
pub use rcgen::{KeyPair, PublicKeyData};
pub use secrecy::{ExposeSecret, SecretString};

//! Challenge-response proof of possession
//!
//! The verifier issues a random challenge bound to the public key in a
//! presented certificate; the presenter signs it with the private key; the
//! verifier checks the signature. The two halves are separate so they can
//! run on different sides of whatever transport a caller chooses.

use ed25519_dalek::pkcs8::DecodePrivateKey;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::RngCore;
use tracing::debug;

use encx_core::{EncxError, EncxResult};

use crate::certificate::Certificate;

pub const CHALLENGE_LEN: usize = 32;

/// Domain-separation prefix for signed challenges
const CONTEXT: &[u8] = b"encx proof-of-possession v1\0";

/// One request/response round. Never persisted.
pub struct ChallengeSession {
    nonce: [u8; CHALLENGE_LEN],
    expected: VerifyingKey,
}

impl ChallengeSession {
    /// Start a round for the key certified by `cert`.
    pub fn issue(cert: &Certificate) -> EncxResult<Self> {
        let raw = cert.public_key_bytes()?;
        let expected = VerifyingKey::try_from(raw.as_slice()).map_err(|e| {
            EncxError::ProofOfPossessionFailed(format!(
                "certificate does not carry an Ed25519 public key: {e}"
            ))
        })?;

        let mut nonce = [0u8; CHALLENGE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        Ok(Self { nonce, expected })
    }

    /// The bytes the presenter must sign.
    pub fn challenge(&self) -> &[u8; CHALLENGE_LEN] {
        &self.nonce
    }

    /// Check the presenter's signature, consuming the session.
    pub fn verify(self, signature: &Signature) -> EncxResult<()> {
        self.expected
            .verify_strict(&signed_message(&self.nonce), signature)
            .map_err(|_| {
                EncxError::ProofOfPossessionFailed(
                    "signature does not verify under the certificate's public key".into(),
                )
            })?;
        debug!("proof of possession verified");
        Ok(())
    }
}

/// Presenter side: sign a challenge.
pub fn respond(key: &SigningKey, challenge: &[u8]) -> Signature {
    key.sign(&signed_message(challenge))
}

/// Parse a PKCS#8 PEM Ed25519 private key.
pub fn signing_key_from_pem(pem: &str) -> EncxResult<SigningKey> {
    SigningKey::from_pkcs8_pem(pem).map_err(|e| {
        EncxError::ProofOfPossessionFailed(format!("unreadable Ed25519 private key: {e}"))
    })
}

/// Run both halves locally: prove that `key` matches the key in `cert`.
pub fn challenge_response(key: &SigningKey, cert: &Certificate) -> EncxResult<()> {
    let session = ChallengeSession::issue(cert)?;
    let signature = respond(key, session.challenge());
    session.verify(&signature)
}

fn signed_message(challenge: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(CONTEXT.len() + challenge.len());
    msg.extend_from_slice(CONTEXT);
    msg.extend_from_slice(challenge);
    msg
}

//! Password-protected PKCS#12 bundles
//!
//! A bundle carries one leaf private key, its certificate, and the root
//! certificate that issued it, so an identity can move between machines as a
//! single `.p12` file.

use ed25519_dalek::pkcs8::DecodePrivateKey;
use ed25519_dalek::SigningKey;
use p12::PFX;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;
use zeroize::Zeroizing;

use encx_core::{EncxError, EncxResult};

use crate::authority::IssuedIdentity;
use crate::certificate::Certificate;

/// Contents of an imported bundle.
pub struct Bundle {
    /// PKCS#8 DER of the leaf private key
    pub private_key_der: Zeroizing<Vec<u8>>,
    pub certificate: Certificate,
    pub ca_certificates: Vec<Certificate>,
}

impl Bundle {
    pub fn signing_key(&self) -> EncxResult<SigningKey> {
        SigningKey::from_pkcs8_der(&self.private_key_der)
            .map_err(|e| EncxError::Identity(format!("bundle key is not Ed25519: {e}")))
    }
}

/// Serialize an issued identity as PKCS#12 DER.
pub fn export_bundle(identity: &IssuedIdentity, password: &SecretString) -> EncxResult<Vec<u8>> {
    let friendly_name = format!("encx-{}", identity.subject);
    let pfx = PFX::new(
        identity.certificate.der(),
        &identity.private_key_der,
        Some(identity.root.der()),
        password.expose_secret(),
        &friendly_name,
    )
    .ok_or_else(|| EncxError::Identity("could not build PKCS#12 bundle".into()))?;

    debug!(name = %friendly_name, "exported PKCS#12 bundle");
    Ok(pfx.to_der())
}

/// Parse PKCS#12 DER, checking the MAC with `password` first.
pub fn import_bundle(der: &[u8], password: &SecretString) -> EncxResult<Bundle> {
    let pfx = PFX::parse(der)
        .map_err(|e| EncxError::Identity(format!("not a PKCS#12 bundle: {e:?}")))?;

    let password = password.expose_secret();
    if !pfx.verify_mac(password) {
        return Err(EncxError::Identity(
            "wrong password or corrupted PKCS#12 bundle".into(),
        ));
    }

    let mut keys = pfx
        .key_bags(password)
        .map_err(|e| EncxError::Identity(format!("reading bundle keys: {e:?}")))?;
    if keys.len() != 1 {
        return Err(EncxError::Identity(format!(
            "bundle holds {} private keys, expected 1",
            keys.len()
        )));
    }
    let private_key_der = Zeroizing::new(keys.remove(0));

    let mut leaf = None;
    let mut ca_certificates = Vec::new();
    for der in pfx
        .cert_x509_bags(password)
        .map_err(|e| EncxError::Identity(format!("reading bundle certificates: {e:?}")))?
    {
        let cert = Certificate::from_der(&der)?;
        if cert.is_ca()? {
            ca_certificates.push(cert);
        } else if leaf.is_none() {
            leaf = Some(cert);
        } else {
            return Err(EncxError::Identity("bundle holds more than one leaf certificate".into()));
        }
    }
    let certificate =
        leaf.ok_or_else(|| EncxError::Identity("bundle holds no leaf certificate".into()))?;

    Ok(Bundle {
        private_key_der,
        certificate,
        ca_certificates,
    })
}

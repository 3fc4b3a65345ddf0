//! Local root certificate authority
//!
//! The root key and certificate live side by side in the authority directory
//! as `ca_private_key.pem` and `ca_certificate.pem`. They are created once,
//! on first use, and loaded unchanged on every later call:
//!
//! ```text
//! ABSENT ──ensure──▶ CREATING ──▶ PERSISTED ──ensure──▶ LOADED
//! ```
//!
//! Only one of the two files being present is an error; nothing is
//! regenerated over a half-present pair.

use std::path::{Path, PathBuf};

use rand::RngCore;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, KeyPair, KeyUsagePurpose, PublicKeyData, SerialNumber, PKCS_ED25519,
};
use secrecy::SecretString;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use encx_core::atomic::write_atomic;
use encx_core::config::AuthorityConfig;
use encx_core::{EncxError, EncxResult, IoResultExt};

use crate::certificate::Certificate;

pub const CA_KEY_FILE: &str = "ca_private_key.pem";
pub const CA_CERT_FILE: &str = "ca_certificate.pem";

/// How the authority came to be in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bootstrap {
    Created,
    Loaded,
}

pub struct RootAuthority {
    dir: PathBuf,
    key_pair: KeyPair,
    /// Issuer handle for rcgen, rebuilt from the persisted certificate on load
    issuer: rcgen::Certificate,
    certificate: Certificate,
    settings: AuthorityConfig,
    bootstrap: Bootstrap,
}

impl RootAuthority {
    /// Load the root authority from `config.dir`, creating it first if absent.
    pub fn ensure(config: &AuthorityConfig) -> EncxResult<Self> {
        let dir = config.resolved_dir();
        let key_path = dir.join(CA_KEY_FILE);
        let cert_path = dir.join(CA_CERT_FILE);

        match (key_path.exists(), cert_path.exists()) {
            (true, true) => Self::load(config, dir),
            (false, false) => Self::create(config, dir),
            (key, _) => {
                let (present, missing) = if key {
                    (CA_KEY_FILE, CA_CERT_FILE)
                } else {
                    (CA_CERT_FILE, CA_KEY_FILE)
                };
                Err(EncxError::Identity(format!(
                    "{} has {present} but no {missing}; restore the pair or remove both",
                    dir.display()
                )))
            }
        }
    }

    fn create(config: &AuthorityConfig, dir: PathBuf) -> EncxResult<Self> {
        let key_pair = KeyPair::generate_for(&PKCS_ED25519).map_err(rcgen_err("generating CA key"))?;

        let now = OffsetDateTime::now_utc();
        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(config, &config.common_name);
        params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        params.not_before = now - Duration::minutes(config.backdate_minutes.into());
        params.not_after = now + Duration::days(config.root_validity_days.into());
        params.serial_number = Some(random_serial());

        let issuer = params
            .self_signed(&key_pair)
            .map_err(rcgen_err("self-signing CA certificate"))?;
        let certificate = Certificate::from_pem(&issuer.pem())?;

        std::fs::create_dir_all(&dir).at_path(&dir)?;
        let key_pem = Zeroizing::new(key_pair.serialize_pem());
        persist_pair(&dir, &key_pem, certificate.pem())?;

        info!(dir = %dir.display(), subject = %config.common_name, "created root authority");
        Ok(Self {
            dir,
            key_pair,
            issuer,
            certificate,
            settings: config.clone(),
            bootstrap: Bootstrap::Created,
        })
    }

    fn load(config: &AuthorityConfig, dir: PathBuf) -> EncxResult<Self> {
        let key_path = dir.join(CA_KEY_FILE);
        let key_pem = Zeroizing::new(std::fs::read_to_string(&key_path).at_path(&key_path)?);
        let key_pair = KeyPair::from_pem(&key_pem).map_err(rcgen_err("parsing CA key"))?;
        let certificate = Certificate::load(&dir.join(CA_CERT_FILE))?;

        if !certificate.is_ca()? {
            return Err(EncxError::Identity(format!(
                "{CA_CERT_FILE} in {} is not a CA certificate",
                dir.display()
            )));
        }
        if certificate.public_key_bytes()? != key_pair.public_key_raw() {
            return Err(EncxError::Identity(format!(
                "{CA_KEY_FILE} does not match {CA_CERT_FILE} in {}",
                dir.display()
            )));
        }

        let issuer = CertificateParams::from_ca_cert_pem(certificate.pem())
            .map_err(rcgen_err("reading CA certificate"))?
            .self_signed(&key_pair)
            .map_err(rcgen_err("rebuilding CA issuer"))?;

        debug!(dir = %dir.display(), "loaded root authority");
        Ok(Self {
            dir,
            key_pair,
            issuer,
            certificate,
            settings: config.clone(),
            bootstrap: Bootstrap::Loaded,
        })
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn bootstrap(&self) -> Bootstrap {
        self.bootstrap
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Issue a leaf certificate for `subject` over `public_key`, using the
    /// configured leaf validity.
    pub fn issue_certificate(
        &self,
        subject: &str,
        public_key: &impl PublicKeyData,
    ) -> EncxResult<Certificate> {
        let now = OffsetDateTime::now_utc();
        self.issue_with_validity(
            subject,
            public_key,
            now - Duration::minutes(self.settings.backdate_minutes.into()),
            now + Duration::days(self.settings.leaf_validity_days.into()),
        )
    }

    /// Issue a leaf certificate with an explicit validity window.
    pub fn issue_with_validity(
        &self,
        subject: &str,
        public_key: &impl PublicKeyData,
        not_before: OffsetDateTime,
        not_after: OffsetDateTime,
    ) -> EncxResult<Certificate> {
        let subject = subject.trim();
        if subject.is_empty() {
            return Err(EncxError::Identity("certificate subject is empty".into()));
        }

        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(&self.settings, subject);
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        params.not_before = not_before;
        params.not_after = not_after;
        params.serial_number = Some(random_serial());

        let cert = params
            .signed_by(public_key, &self.issuer, &self.key_pair)
            .map_err(rcgen_err("signing leaf certificate"))?;

        info!(%subject, "issued leaf certificate");
        Certificate::from_pem(&cert.pem())
    }

    /// Generate a fresh Ed25519 key pair and a leaf certificate for it.
    pub fn issue_identity(&self, subject: &str) -> EncxResult<IssuedIdentity> {
        let key_pair =
            KeyPair::generate_for(&PKCS_ED25519).map_err(rcgen_err("generating leaf key"))?;
        let certificate = self.issue_certificate(subject, &key_pair)?;

        Ok(IssuedIdentity {
            subject: subject.trim().to_string(),
            private_key_pem: SecretString::from(key_pair.serialize_pem()),
            private_key_der: Zeroizing::new(key_pair.serialize_der()),
            public_key_pem: key_pair.public_key_pem(),
            certificate,
            root: self.certificate.clone(),
        })
    }
}

/// A leaf key pair with its certificate and the root that signed it.
pub struct IssuedIdentity {
    pub subject: String,
    pub private_key_pem: SecretString,
    /// PKCS#8 DER of the private key
    pub private_key_der: Zeroizing<Vec<u8>>,
    pub public_key_pem: String,
    pub certificate: Certificate,
    pub root: Certificate,
}

/// Where [`IssuedIdentity::write_to`] put each file.
#[derive(Debug, Clone)]
pub struct IdentityFiles {
    pub certificate: PathBuf,
    pub private_key: PathBuf,
    pub public_key: PathBuf,
}

impl IssuedIdentity {
    /// Write `certificate.pem`, `private_key.pem` and `public_key.pem` into `dir`.
    pub fn write_to(&self, dir: &Path, overwrite: bool) -> EncxResult<IdentityFiles> {
        use secrecy::ExposeSecret;

        std::fs::create_dir_all(dir).at_path(dir)?;
        let files = IdentityFiles {
            certificate: dir.join("certificate.pem"),
            private_key: dir.join("private_key.pem"),
            public_key: dir.join("public_key.pem"),
        };
        write_atomic(&files.certificate, self.certificate.pem().as_bytes(), overwrite)?;
        write_atomic(
            &files.private_key,
            self.private_key_pem.expose_secret().as_bytes(),
            overwrite,
        )?;
        write_atomic(&files.public_key, self.public_key_pem.as_bytes(), overwrite)?;
        Ok(files)
    }
}

/// Write the CA key, then its certificate. A failed certificate write takes
/// the key back out so the directory never holds half a pair.
fn persist_pair(dir: &Path, key_pem: &str, cert_pem: &str) -> EncxResult<()> {
    let key_path = dir.join(CA_KEY_FILE);
    write_atomic(&key_path, key_pem.as_bytes(), false)?;
    if let Err(e) = write_atomic(&dir.join(CA_CERT_FILE), cert_pem.as_bytes(), false) {
        if let Err(rm) = std::fs::remove_file(&key_path) {
            warn!(path = %key_path.display(), "failed to remove orphaned CA key: {rm}");
        }
        return Err(e);
    }
    Ok(())
}

fn distinguished_name(config: &AuthorityConfig, common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    if !config.country.is_empty() {
        dn.push(DnType::CountryName, config.country.as_str());
    }
    if !config.organization.is_empty() {
        dn.push(DnType::OrganizationName, config.organization.as_str());
    }
    dn.push(DnType::CommonName, common_name);
    dn
}

/// 128-bit positive serial
fn random_serial() -> SerialNumber {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes[0] = (bytes[0] & 0x7F) | 0x01;
    SerialNumber::from_slice(&bytes)
}

fn rcgen_err(what: &'static str) -> impl Fn(rcgen::Error) -> EncxError {
    move |e| EncxError::Identity(format!("{what}: {e}"))
}

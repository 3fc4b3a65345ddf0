//! Owned X.509 certificate with lazy parsing

use std::path::Path;

use x509_parser::certificate::X509Certificate;
use x509_parser::pem::parse_x509_pem;

use encx_core::{CertRejection, EncxError, EncxResult, IoResultExt};

/// A certificate kept as PEM text plus DER bytes.
///
/// Parsing borrows from `der`, so accessors re-parse on demand instead of
/// holding a self-referential structure.
#[derive(Clone, PartialEq, Eq)]
pub struct Certificate {
    pem: String,
    der: Vec<u8>,
}

impl Certificate {
    pub fn from_pem(pem: &str) -> EncxResult<Self> {
        let (_, block) = parse_x509_pem(pem.as_bytes())
            .map_err(|e| malformed(format!("not a PEM certificate: {e}")))?;
        if block.label != "CERTIFICATE" {
            return Err(malformed(format!("unexpected PEM label {}", block.label)));
        }
        let cert = Self {
            pem: pem.to_string(),
            der: block.contents,
        };
        cert.parse()?;
        Ok(cert)
    }

    pub fn from_der(der: &[u8]) -> EncxResult<Self> {
        let pem = to_pem("CERTIFICATE", der);
        let cert = Self {
            pem,
            der: der.to_vec(),
        };
        cert.parse()?;
        Ok(cert)
    }

    pub fn load(path: &Path) -> EncxResult<Self> {
        let pem = std::fs::read_to_string(path).at_path(path)?;
        Self::from_pem(&pem)
    }

    pub fn pem(&self) -> &str {
        &self.pem
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn parse(&self) -> EncxResult<X509Certificate<'_>> {
        x509_parser::parse_x509_certificate(&self.der)
            .map(|(_, cert)| cert)
            .map_err(|e| malformed(format!("invalid DER: {e}")))
    }

    pub fn subject(&self) -> EncxResult<String> {
        Ok(self.parse()?.subject().to_string())
    }

    pub fn issuer(&self) -> EncxResult<String> {
        Ok(self.parse()?.issuer().to_string())
    }

    pub fn is_ca(&self) -> EncxResult<bool> {
        Ok(self.parse()?.is_ca())
    }

    /// `(not_before, not_after)` as Unix timestamps.
    pub fn validity(&self) -> EncxResult<(i64, i64)> {
        let cert = self.parse()?;
        let v = cert.validity();
        Ok((v.not_before.timestamp(), v.not_after.timestamp()))
    }

    /// Raw subject public key bytes (32 bytes for Ed25519).
    pub fn public_key_bytes(&self) -> EncxResult<Vec<u8>> {
        Ok(self.parse()?.public_key().subject_public_key.data.to_vec())
    }
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let subject = self.subject().unwrap_or_else(|_| "<unparseable>".into());
        f.debug_struct("Certificate")
            .field("subject", &subject)
            .field("der_len", &self.der.len())
            .finish()
    }
}

fn malformed(reason: String) -> EncxError {
    EncxError::CertificateInvalid(CertRejection::Malformed(reason))
}

/// Wrap DER bytes in a PEM block with 64-column base64 lines.
pub(crate) fn to_pem(label: &str, der: &[u8]) -> String {
    use base64::Engine as _;
    let body = base64::engine::general_purpose::STANDARD.encode(der);
    let mut out = format!("-----BEGIN {label}-----\n");
    for line in body.as_bytes().chunks(64) {
        // base64 output is ASCII
        out.push_str(&String::from_utf8_lossy(line));
        out.push('\n');
    }
    out.push_str(&format!("-----END {label}-----\n"));
    out
}

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub type EncxResult<T> = Result<T, EncxError>;

#[derive(Debug, Error)]
pub enum EncxError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("key/nonce pair is already in custody for file {existing_hash}")]
    DuplicateKeyMaterial { existing_hash: String },

    #[error("custody record for {file_hash} already belongs to {holder}")]
    RecordConflict { file_hash: String, holder: String },

    #[error("authentication failed at chunk {chunk}: wrong key or nonce, or tampered data")]
    AuthenticationFailure { chunk: u64 },

    #[error("integrity mismatch: expected {expected}, recovered {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("destination already exists: {}", .0.display())]
    DestinationExists(PathBuf),

    #[error("certificate invalid: {0}")]
    CertificateInvalid(CertRejection),

    #[error("proof of possession failed: {0}")]
    ProofOfPossessionFailed(String),

    #[error("corrupt custody store: {0}")]
    CorruptStore(String),

    #[error("corrupt container: {0}")]
    CorruptContainer(String),

    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("identity error: {0}")]
    Identity(String),

    #[error("operation cancelled")]
    Cancelled,
}

/// Flat classification of [`EncxError`], enough for a UI to pick a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    DuplicateKeyMaterial,
    RecordConflict,
    AuthenticationFailure,
    IntegrityMismatch,
    DestinationExists,
    CertificateInvalid,
    ProofOfPossessionFailed,
    CorruptStore,
    CorruptContainer,
    InvalidKeyMaterial,
    Config,
    Identity,
    Cancelled,
}

impl EncxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EncxError::Io { .. } => ErrorKind::Io,
            EncxError::DuplicateKeyMaterial { .. } => ErrorKind::DuplicateKeyMaterial,
            EncxError::RecordConflict { .. } => ErrorKind::RecordConflict,
            EncxError::AuthenticationFailure { .. } => ErrorKind::AuthenticationFailure,
            EncxError::IntegrityMismatch { .. } => ErrorKind::IntegrityMismatch,
            EncxError::DestinationExists(_) => ErrorKind::DestinationExists,
            EncxError::CertificateInvalid(_) => ErrorKind::CertificateInvalid,
            EncxError::ProofOfPossessionFailed(_) => ErrorKind::ProofOfPossessionFailed,
            EncxError::CorruptStore(_) => ErrorKind::CorruptStore,
            EncxError::CorruptContainer(_) => ErrorKind::CorruptContainer,
            EncxError::InvalidKeyMaterial(_) => ErrorKind::InvalidKeyMaterial,
            EncxError::Config(_) => ErrorKind::Config,
            EncxError::Identity(_) => ErrorKind::Identity,
            EncxError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn io(path: &Path, source: std::io::Error) -> Self {
        EncxError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Why a certificate was rejected by chain validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertRejection {
    /// The certificate (or the CA certificate) could not be parsed
    Malformed(String),
    /// The presented CA certificate is not marked as a certificate authority
    IssuerNotCa,
    /// Issuer name of the candidate differs from the CA subject
    IssuerMismatch { issuer: String, ca_subject: String },
    /// Signature was not produced by the CA key
    BadSignature,
    /// Validity window has not started yet
    NotYetValid { not_before: i64, now: i64 },
    /// Validity window is over
    Expired { not_after: i64, now: i64 },
}

impl fmt::Display for CertRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertRejection::Malformed(e) => write!(f, "malformed certificate: {e}"),
            CertRejection::IssuerNotCa => write!(f, "issuer certificate is not a CA"),
            CertRejection::IssuerMismatch { issuer, ca_subject } => write!(
                f,
                "issuer name mismatch: certificate issuer is '{issuer}', CA subject is '{ca_subject}'"
            ),
            CertRejection::BadSignature => {
                write!(f, "chain signature invalid: not signed by the CA key")
            }
            CertRejection::NotYetValid { not_before, now } => write!(
                f,
                "validity window not started: not before {not_before}, now {now}"
            ),
            CertRejection::Expired { not_after, now } => {
                write!(f, "validity window ended: not after {not_after}, now {now}")
            }
        }
    }
}

/// Attach the offending path to a raw I/O result.
pub trait IoResultExt<T> {
    fn at_path(self, path: &Path) -> EncxResult<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn at_path(self, path: &Path) -> EncxResult<T> {
        self.map_err(|e| EncxError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        let err = EncxError::AuthenticationFailure { chunk: 3 };
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailure);
        assert!(err.to_string().contains("chunk 3"));

        let err = EncxError::CertificateInvalid(CertRejection::BadSignature);
        assert_eq!(err.kind(), ErrorKind::CertificateInvalid);
        assert!(err.to_string().contains("chain signature"));
    }

    #[test]
    fn test_io_context_keeps_path() {
        let res: std::io::Result<()> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "gone",
        ));
        let err = res.at_path(Path::new("/tmp/missing.bin")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().contains("/tmp/missing.bin"));
    }

    #[test]
    fn test_rejection_reasons_are_readable() {
        let r = CertRejection::Expired {
            not_after: 10,
            now: 20,
        };
        assert!(r.to_string().contains("validity window"));
        let r = CertRejection::NotYetValid {
            not_before: 30,
            now: 20,
        };
        assert!(r.to_string().contains("validity window"));
    }
}

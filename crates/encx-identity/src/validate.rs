//! Chain validation of a presented certificate against the root authority

use time::OffsetDateTime;
use tracing::debug;

use encx_core::{CertRejection, EncxError, EncxResult};

use crate::certificate::Certificate;

/// Check that `candidate` was issued by `ca` and is valid right now.
pub fn validate_cert_against_ca(candidate: &Certificate, ca: &Certificate) -> EncxResult<()> {
    validate_at(candidate, ca, OffsetDateTime::now_utc().unix_timestamp())
        .map_err(EncxError::CertificateInvalid)
}

/// Check issuance and validity at an explicit Unix time.
///
/// Checks run in order: the CA must be a CA, the candidate's issuer name
/// must equal the CA's subject, the signature must verify under the CA key,
/// and `now` must fall inside the candidate's validity window.
pub fn validate_at(
    candidate: &Certificate,
    ca: &Certificate,
    now: i64,
) -> Result<(), CertRejection> {
    let cand = candidate.parse().map_err(rejection)?;
    let root = ca.parse().map_err(rejection)?;

    if !root.is_ca() {
        return Err(CertRejection::IssuerNotCa);
    }

    let issuer = cand.issuer().to_string();
    let ca_subject = root.subject().to_string();
    if issuer != ca_subject {
        return Err(CertRejection::IssuerMismatch { issuer, ca_subject });
    }

    if cand.verify_signature(Some(root.public_key())).is_err() {
        return Err(CertRejection::BadSignature);
    }

    let validity = cand.validity();
    let not_before = validity.not_before.timestamp();
    let not_after = validity.not_after.timestamp();
    if now < not_before {
        return Err(CertRejection::NotYetValid { not_before, now });
    }
    if now > not_after {
        return Err(CertRejection::Expired { not_after, now });
    }

    debug!(subject = %cand.subject(), "certificate chains to the root authority");
    Ok(())
}

fn rejection(err: EncxError) -> CertRejection {
    match err {
        EncxError::CertificateInvalid(r) => r,
        other => CertRejection::Malformed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::RootAuthority;
    use encx_core::config::AuthorityConfig;
    use encx_core::ErrorKind;
    use rcgen::{KeyPair, PKCS_ED25519};
    use time::Duration;

    fn authority(dir: &std::path::Path) -> RootAuthority {
        RootAuthority::ensure(&AuthorityConfig {
            dir: dir.to_path_buf(),
            ..AuthorityConfig::default()
        })
        .unwrap()
    }

    fn leaf_key() -> KeyPair {
        KeyPair::generate_for(&PKCS_ED25519).unwrap()
    }

    #[test]
    fn test_issued_leaf_validates() {
        let tmp = tempfile::tempdir().unwrap();
        let ca = authority(tmp.path());
        let leaf = ca.issue_certificate("student1", &leaf_key()).unwrap();
        validate_cert_against_ca(&leaf, ca.certificate()).unwrap();
    }

    #[test]
    fn test_root_validates_against_itself() {
        let tmp = tempfile::tempdir().unwrap();
        let ca = authority(tmp.path());
        validate_cert_against_ca(ca.certificate(), ca.certificate()).unwrap();
    }

    #[test]
    fn test_foreign_signer_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        // Same configured subject, different key.
        let ours = authority(&tmp.path().join("ours"));
        let theirs = authority(&tmp.path().join("theirs"));
        let leaf = theirs.issue_certificate("mallory", &leaf_key()).unwrap();

        assert_eq!(
            validate_at(&leaf, ours.certificate(), OffsetDateTime::now_utc().unix_timestamp()),
            Err(CertRejection::BadSignature)
        );
        let err = validate_cert_against_ca(&leaf, ours.certificate()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CertificateInvalid);
        assert!(err.to_string().contains("chain signature invalid"));
    }

    #[test]
    fn test_issuer_name_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let ours = authority(&tmp.path().join("ours"));
        let other = RootAuthority::ensure(&AuthorityConfig {
            dir: tmp.path().join("other"),
            common_name: "Some Other CA".into(),
            ..AuthorityConfig::default()
        })
        .unwrap();
        let leaf = other.issue_certificate("dave", &leaf_key()).unwrap();

        let now = OffsetDateTime::now_utc().unix_timestamp();
        assert!(matches!(
            validate_at(&leaf, ours.certificate(), now),
            Err(CertRejection::IssuerMismatch { .. })
        ));
    }

    #[test]
    fn test_leaf_as_issuer_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let ca = authority(tmp.path());
        let leaf = ca.issue_certificate("erin", &leaf_key()).unwrap();
        let now = OffsetDateTime::now_utc().unix_timestamp();
        assert_eq!(validate_at(&leaf, &leaf, now), Err(CertRejection::IssuerNotCa));
    }

    #[test]
    fn test_validity_window() {
        let tmp = tempfile::tempdir().unwrap();
        let ca = authority(tmp.path());
        let now = OffsetDateTime::now_utc();

        let future = ca
            .issue_with_validity("later", &leaf_key(), now + Duration::days(1), now + Duration::days(30))
            .unwrap();
        let err = validate_cert_against_ca(&future, ca.certificate()).unwrap_err();
        assert!(err.to_string().contains("validity window"));
        assert!(matches!(
            validate_at(&future, ca.certificate(), now.unix_timestamp()),
            Err(CertRejection::NotYetValid { .. })
        ));

        let past = ca
            .issue_with_validity("earlier", &leaf_key(), now - Duration::days(30), now - Duration::days(1))
            .unwrap();
        let err = validate_cert_against_ca(&past, ca.certificate()).unwrap_err();
        assert!(err.to_string().contains("validity window"));
        assert!(matches!(
            validate_at(&past, ca.certificate(), now.unix_timestamp()),
            Err(CertRejection::Expired { .. })
        ));

        // The same expired certificate was fine while its window was open.
        let then = (now - Duration::days(10)).unix_timestamp();
        assert_eq!(validate_at(&past, ca.certificate(), then), Ok(()));
    }

    #[test]
    fn test_garbage_candidate_is_malformed() {
        let err = Certificate::from_der(b"\x30\x00").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CertificateInvalid);
        assert!(err.to_string().contains("malformed"));
    }
}

//! Certificate authentication: chain check, then proof of possession

use tracing::info;

use encx_core::EncxResult;
use encx_identity::{challenge_response, validate_cert_against_ca, Certificate, SigningKey};

/// Accept `cert` only if the root authority issued it, it is currently valid,
/// and the presenter holds the matching private key.
pub fn authenticate(ca: &Certificate, cert: &Certificate, key: &SigningKey) -> EncxResult<()> {
    validate_cert_against_ca(cert, ca)?;
    challenge_response(key, cert)?;
    info!(subject = %cert.subject()?, "authenticated");
    Ok(())
}

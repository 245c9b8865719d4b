use crate::models::error::SignatureError;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use tap::Tap;
use tracing::debug;

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";
const SIGNATURE_PREFIX: &str = "sha256=";

/// Checks a GitHub `X-Hub-Signature-256` header against the raw request body.
///
/// The MAC is computed over `payload` exactly as received; re-serialized JSON
/// would not match. The digest comparison is constant time.
///
/// # Errors
///
/// [`SignatureError::EmptySecret`] when `secret` is empty,
/// [`SignatureError::MissingHeader`] when there is no header, and
/// [`SignatureError::InvalidFormat`] when it lacks the `sha256=` prefix.
#[tracing::instrument(skip(payload, secret), fields(payload_length = payload.len()))]
pub fn verify_signature(
    payload: &[u8],
    header: Option<&str>,
    secret: &SecretString,
) -> Result<bool, SignatureError> {
    let secret_exposed = secret.expose_secret();
    if secret_exposed.is_empty() {
        return Err(SignatureError::EmptySecret);
    }

    let header = header
        .filter(|header| !header.is_empty())
        .ok_or(SignatureError::MissingHeader)?;
    let digest = header
        .strip_prefix(SIGNATURE_PREFIX)
        .ok_or_else(|| SignatureError::InvalidFormat {
            expected: "sha256=<hex_digest>".to_string(),
            got: header.to_string(),
        })?;

    // GitHub sends lowercase hex; anything else cannot be a match.
    let code_bytes = match hex::decode(digest) {
        Ok(bytes) if hex::encode(&bytes) == digest => bytes,
        _ => {
            debug!("Signature digest is not lowercase hex");
            return Ok(false);
        }
    };

    let mut mac = Hmac::<Sha256>::new_from_slice(secret_exposed.as_bytes())?;
    mac.update(payload);
    Ok(mac
        .verify_slice(&code_bytes[..])
        .is_ok()
        .tap(|verified| debug!(verified, "Compared signature")))
}

/// Produces the header value GitHub would send for `payload`.
///
/// # Errors
///
/// [`SignatureError::EmptySecret`] when `secret` is empty.
pub fn sign(payload: &[u8], secret: &SecretString) -> Result<String, SignatureError> {
    let secret_exposed = secret.expose_secret();
    if secret_exposed.is_empty() {
        return Err(SignatureError::EmptySecret);
    }
    let mut mac = Hmac::<Sha256>::new_from_slice(secret_exposed.as_bytes())?;
    mac.update(payload);
    Ok(format!(
        "{SIGNATURE_PREFIX}{}",
        hex::encode(mac.finalize().into_bytes())
    ))
}

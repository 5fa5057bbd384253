//! Webhook signature verification

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use tracing::warn;

use crate::error::ErrorCategory;

type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

/// Preferred signature header
pub const SIGNATURE_HEADER_256: &str = "X-Hub-Signature-256";
/// Legacy SHA-1 signature header, consulted when the SHA-256 one is absent
pub const SIGNATURE_HEADER_LEGACY: &str = "X-Hub-Signature";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationFailure {
    #[error("Webhook secret is not configured")]
    MissingSecret,

    #[error("X-Hub-Signature-256 or X-Hub-Signature not found in request headers")]
    MissingHeader,

    #[error("Signature header is not of the form <algorithm>=<hexdigest>")]
    MalformedHeader,

    #[error("Signature is not using sha256 or sha1")]
    UnsupportedAlgorithm(String),

    #[error("Signatures didn't match")]
    SignatureMismatch,
}

impl VerificationFailure {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MissingSecret => ErrorCategory::ConfigurationMissing,
            _ => ErrorCategory::AuthenticationFailed,
        }
    }
}

/// Digest algorithms accepted in the signature header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    Sha256,
    /// Legacy GitHub signatures
    Sha1,
}

impl SignatureAlgorithm {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sha256" => Some(Self::Sha256),
            "sha1" => Some(Self::Sha1),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha1 => "sha1",
        }
    }
}

/// Hex encoded HMAC of `body` under `secret`.
pub fn compute_signature(algorithm: SignatureAlgorithm, secret: &[u8], body: &[u8]) -> String {
    // HMAC accepts keys of any length, new_from_slice cannot fail here
    match algorithm {
        SignatureAlgorithm::Sha256 => {
            let mut mac = <HmacSha256 as Mac>::new_from_slice(secret)
                .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
            mac.update(body);
            hex::encode(mac.finalize().into_bytes())
        }
        SignatureAlgorithm::Sha1 => {
            let mut mac = <HmacSha1 as Mac>::new_from_slice(secret)
                .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
            mac.update(body);
            hex::encode(mac.finalize().into_bytes())
        }
    }
}

/// Verifies `header_value` (`"<algorithm>=<hexdigest>"`) against the raw body.
///
/// The digest comparison is constant-time (`Mac::verify_slice`). An empty
/// secret counts as not configured.
pub fn verify(
    secret: Option<&[u8]>,
    raw_body: &[u8],
    header_value: Option<&str>,
) -> Result<(), VerificationFailure> {
    let secret = match secret {
        Some(s) if !s.is_empty() => s,
        _ => return Err(VerificationFailure::MissingSecret),
    };
    let header_value = header_value.ok_or(VerificationFailure::MissingHeader)?;

    let (algorithm_name, digest_hex) = header_value
        .trim()
        .split_once('=')
        .ok_or(VerificationFailure::MalformedHeader)?;
    let algorithm = SignatureAlgorithm::from_name(algorithm_name)
        .ok_or_else(|| VerificationFailure::UnsupportedAlgorithm(algorithm_name.to_string()))?;

    let supplied = hex::decode(digest_hex).map_err(|_| {
        warn!("Signature header carries a non-hex {} digest", algorithm.name());
        VerificationFailure::SignatureMismatch
    })?;

    let verified = match algorithm {
        SignatureAlgorithm::Sha256 => {
            let mut mac = <HmacSha256 as Mac>::new_from_slice(secret)
                .map_err(|_| VerificationFailure::MissingSecret)?;
            mac.update(raw_body);
            mac.verify_slice(&supplied).is_ok()
        }
        SignatureAlgorithm::Sha1 => {
            let mut mac = <HmacSha1 as Mac>::new_from_slice(secret)
                .map_err(|_| VerificationFailure::MissingSecret)?;
            mac.update(raw_body);
            mac.verify_slice(&supplied).is_ok()
        }
    };

    if verified {
        Ok(())
    } else {
        Err(VerificationFailure::SignatureMismatch)
    }
}

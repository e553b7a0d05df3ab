use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-slack-signature";
pub const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
/// Requests older than this are treated as replays.
pub const MAX_REQUEST_AGE_SECS: i64 = 300;

const SIGNATURE_VERSION: &str = "v0";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing `{0}` header")]
    MissingHeader(&'static str),
    #[error("invalid request timestamp `{0}`")]
    InvalidTimestamp(String),
    #[error("request timestamp is {age_secs}s away from server time")]
    Stale { age_secs: i64 },
    #[error("request signature does not match")]
    Mismatch,
}

/// Verifies the `X-Slack-Signature` header of Events API requests.
#[derive(Clone, Debug)]
pub struct SignatureVerifier {
    signing_secret: SecretString,
}

impl SignatureVerifier {
    pub fn new(signing_secret: SecretString) -> Self {
        Self { signing_secret }
    }

    pub fn verify(
        &self,
        timestamp: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
        now_unix_secs: i64,
    ) -> Result<(), SignatureError> {
        let timestamp = timestamp.ok_or(SignatureError::MissingHeader(TIMESTAMP_HEADER))?;
        let signature = signature.ok_or(SignatureError::MissingHeader(SIGNATURE_HEADER))?;

        let sent_at = timestamp
            .trim()
            .parse::<i64>()
            .map_err(|_| SignatureError::InvalidTimestamp(timestamp.to_string()))?;
        let age_secs = (now_unix_secs - sent_at).abs();
        if age_secs > MAX_REQUEST_AGE_SECS {
            return Err(SignatureError::Stale { age_secs });
        }

        let provided = signature
            .trim()
            .strip_prefix("v0=")
            .and_then(|hex_digest| hex::decode(hex_digest).ok())
            .ok_or(SignatureError::Mismatch)?;

        let mut mac = self.mac(timestamp.trim())?;
        mac.update(body);
        mac.verify_slice(&provided).map_err(|_| SignatureError::Mismatch)
    }

    /// Computes the `v0=...` header value for `body`.
    pub fn sign(&self, timestamp: &str, body: &[u8]) -> Result<String, SignatureError> {
        let mut mac = self.mac(timestamp)?;
        mac.update(body);
        Ok(format!("{SIGNATURE_VERSION}={}", hex::encode(mac.finalize().into_bytes())))
    }

    fn mac(&self, timestamp: &str) -> Result<HmacSha256, SignatureError> {
        let mut mac = HmacSha256::new_from_slice(self.signing_secret.expose_secret().as_bytes())
            .map_err(|_| SignatureError::Mismatch)?;
        mac.update(format!("{SIGNATURE_VERSION}:{timestamp}:").as_bytes());
        Ok(mac)
    }
}

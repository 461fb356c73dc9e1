//! Signed, expiring claim sets as opaque bearer strings.
//!
//! Wire format is JWT compact serialization with a fixed HS256 header:
//! `base64url(header).base64url(claims).base64url(hmac_sha256)`, unpadded.
//! The codec checks structure and signature only. Expiry and revocation
//! belong to [`SessionManager`](super::session::SessionManager).

use super::clock::Clock;
use super::error::{AuthError, AuthResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

/// The only signing scheme the codec accepts.
pub const ALGORITHM: &str = "HS256";

/// Serialized once; every token carries the same header.
const HEADER_JSON: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

/// Decoded token contents. Fixed shape: unknown fields are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Claims {
    /// Principal id.
    pub sub: String,
    /// Issued-at, unix seconds.
    pub iat: i64,
    /// Expires-at, unix seconds. Always greater than `iat`.
    pub exp: i64,
    /// Token id, used only for revocation lookups.
    pub jti: String,
}

#[derive(Deserialize)]
struct Header {
    alg: String,
}

pub struct TokenCodec {
    key: Vec<u8>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Build a codec around the process-wide signing secret.
    pub fn new(secret: impl AsRef<[u8]>, clock: Arc<dyn Clock>) -> AuthResult<Self> {
        let key = secret.as_ref();
        if key.iter().all(u8::is_ascii_whitespace) {
            return Err(AuthError::configuration("signing secret is empty"));
        }
        Ok(Self {
            key: key.to_vec(),
            clock,
        })
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Issue a token for `subject` that expires at `expires_at`, handing
    /// back the claims that were signed.
    pub fn encode(&self, subject: &str, expires_at: i64) -> AuthResult<(String, Claims)> {
        if subject.is_empty() {
            return Err(AuthError::InvalidSubject);
        }
        let iat = self.clock.now();
        if expires_at <= iat {
            return Err(AuthError::configuration(
                "token expiry must be later than issuance",
            ));
        }

        let claims = Claims {
            sub: subject.to_owned(),
            iat,
            exp: expires_at,
            jti: uuid::Uuid::new_v4().to_string(),
        };
        let claims_json = serde_json::to_vec(&claims)
            .map_err(|e| AuthError::configuration(format!("claims serialization: {e}")))?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(HEADER_JSON),
            URL_SAFE_NO_PAD.encode(claims_json)
        );
        let signature = self.sign(signing_input.as_bytes())?;

        let token = format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature));
        Ok((token, claims))
    }

    /// Check structure and signature, then parse claims.
    pub fn decode(&self, token: &str) -> AuthResult<Claims> {
        let mut parts = token.split('.');
        let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::InvalidToken("expected three segments"));
        };

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| AuthError::InvalidToken("signature is not base64url"))?;

        // Nothing below the signing input is trusted until this passes.
        let signing_input = &token[..header_b64.len() + 1 + claims_b64.len()];
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| AuthError::InvalidToken("signature mismatch"))?;

        let header: Header = decode_segment(header_b64)
            .ok_or(AuthError::InvalidToken("malformed header"))?;
        if header.alg != ALGORITHM {
            return Err(AuthError::InvalidToken("unsupported algorithm"));
        }

        let claims: Claims = decode_segment(claims_b64)
            .ok_or(AuthError::InvalidToken("malformed claims"))?;
        if claims.sub.is_empty() || claims.jti.is_empty() {
            return Err(AuthError::InvalidToken("missing claim"));
        }
        if claims.exp <= claims.iat {
            return Err(AuthError::InvalidToken("expiry precedes issuance"));
        }

        Ok(claims)
    }

    fn mac(&self) -> AuthResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.key)
            .map_err(|_| AuthError::configuration("signing key rejected by HMAC"))
    }

    fn sign(&self, input: &[u8]) -> AuthResult<Vec<u8>> {
        let mut mac = self.mac()?;
        mac.update(input);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str) -> Option<T> {
    let bytes = URL_SAFE_NO_PAD.decode(segment).ok()?;
    serde_json::from_slice(&bytes).ok()
}

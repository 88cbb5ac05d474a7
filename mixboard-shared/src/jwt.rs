use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{self, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::UserProfile;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// User id.
    pub sub: String,
    pub jti: String,
    pub exp: i64,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl JwtClaims {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.sub.clone(),
            email: self.email.clone(),
            display_name: self.name.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("invalid token: {0}")]
    Decode(String),
    #[error("encoding failed: {0}")]
    Encode(String),
}

/// Reads the claims without checking the signature. Only for display purposes
/// on the client; the server always verifies.
pub fn decode_unverified(token: &str) -> Result<JwtClaims, JwtError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() < 2 {
        return Err(JwtError::Decode("invalid JWT format".into()));
    }
    let payload_b64 = parts[1];
    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|e| JwtError::Decode(format!("invalid base64 payload: {e}")))?;
    serde_json::from_slice::<JwtClaims>(&payload_bytes)
        .map_err(|e| JwtError::Decode(format!("invalid json payload: {e}")))
}

pub fn decode_and_verify(token: &str, secret: &[u8]) -> Result<JwtClaims, JwtError> {
    let key = DecodingKey::from_secret(secret);
    let validation = Validation::new(Algorithm::HS256);
    jsonwebtoken::decode::<JwtClaims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| JwtError::Decode(e.to_string()))
}

pub fn encode(token: &JwtClaims, secret: &[u8]) -> Result<String, JwtError> {
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        token,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|e| JwtError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(exp: i64) -> JwtClaims {
        JwtClaims {
            sub: "user-1".into(),
            jti: "j1".into(),
            exp,
            email: "ann@example.com".into(),
            name: Some("Ann".into()),
        }
    }

    #[test]
    fn roundtrip_and_reject_wrong_secret() {
        let far = 4_102_444_800; // 2100-01-01
        let token = encode(&claims(far), b"secret").unwrap();
        let back = decode_and_verify(&token, b"secret").unwrap();
        assert_eq!(back.sub, "user-1");
        assert_eq!(back.profile().display_name.as_deref(), Some("Ann"));
        assert!(decode_and_verify(&token, b"other").is_err());
        assert_eq!(decode_unverified(&token).unwrap().email, "ann@example.com");
    }

    #[test]
    fn expired_tokens_fail_verification() {
        let token = encode(&claims(1_000), b"secret").unwrap();
        assert!(decode_and_verify(&token, b"secret").is_err());
        assert!(decode_unverified(&token).is_ok());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode_unverified("nope").is_err());
        assert!(decode_unverified("a.!!!.c").is_err());
    }
}

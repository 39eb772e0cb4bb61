use base64::{Engine as _, engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD}};
use hmac::{Hmac, Mac};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::models::Role;

/// Max clock drift accepted on webhook timestamps, in seconds.
pub const WEBHOOK_TOLERANCE_SECS: i64 = 5 * 60;

/* -------------------------
   Session tokens
--------------------------*/

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// External identity id.
    pub sub: String,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<SessionMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    #[serde(default)]
    pub role: Option<String>,
}

impl SessionClaims {
    pub fn role(&self) -> Option<Role> {
        self.role
            .as_deref()
            .or_else(|| self.metadata.as_ref().and_then(|m| m.role.as_deref()))
            .and_then(Role::from_metadata)
    }
}

/// Verifies session JWTs issued by the identity provider without a network
/// round trip.
pub struct SessionVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl SessionVerifier {
    pub fn new(key: DecodingKey, algorithm: Algorithm) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.leeway = 5;
        Self { key, validation }
    }

    pub fn from_rsa_pem(pem: &str) -> anyhow::Result<Self> {
        let key = DecodingKey::from_rsa_pem(pem.as_bytes())?;
        Ok(Self::new(key, Algorithm::RS256))
    }

    pub fn verify(&self, token: &str) -> Option<SessionClaims> {
        match jsonwebtoken::decode::<SessionClaims>(token, &self.key, &self.validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                tracing::debug!(error = %e, "session token rejected");
                None
            }
        }
    }
}

/* -------------------------
   Account provisioning
--------------------------*/

/// Password handed to the identity provider for accounts created by staff.
/// Nobody learns it; the user signs in through the provider's own flows.
pub fn generate_throwaway_password() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Username derived from the e-mail local part: lowercase, `[a-z0-9_-]`,
/// 4..=64 chars.
pub fn derive_username(email: &str) -> String {
    let local = email.split('@').next().unwrap_or_default();
    let mut name: String = local
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    name = name.trim_matches('_').to_string();
    if name.len() < 4 {
        name = format!("user_{name}");
    }
    name.truncate(64);
    name
}

/* -------------------------
   Webhook signatures
--------------------------*/

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("webhook secret is malformed")]
    InvalidSecret,
    #[error("webhook timestamp is malformed")]
    InvalidTimestamp,
    #[error("webhook timestamp is outside the accepted window")]
    StaleTimestamp,
    #[error("no matching webhook signature")]
    NoMatch,
}

fn webhook_key(secret: &str) -> Result<Vec<u8>, SignatureError> {
    let raw = secret.strip_prefix("whsec_").unwrap_or(secret);
    STANDARD.decode(raw).map_err(|_| SignatureError::InvalidSecret)
}

fn webhook_mac(
    key: &[u8],
    msg_id: &str,
    timestamp: &str,
    body: &[u8],
) -> Result<Hmac<Sha256>, SignatureError> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(key).map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(msg_id.as_bytes());
    mac.update(b".");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(mac)
}

/// Checks `v1,<base64 hmac>` entries (space separated) over
/// `"{id}.{timestamp}.{body}"`.
pub fn verify_webhook_signature(
    secret: &str,
    msg_id: &str,
    timestamp: &str,
    signatures: &str,
    body: &[u8],
    now: i64,
) -> Result<(), SignatureError> {
    let ts: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| SignatureError::InvalidTimestamp)?;
    if (now - ts).abs() > WEBHOOK_TOLERANCE_SECS {
        return Err(SignatureError::StaleTimestamp);
    }

    let key = webhook_key(secret)?;
    let mac = webhook_mac(&key, msg_id, timestamp.trim(), body)?;

    let matched = signatures
        .split_whitespace()
        .filter_map(|entry| entry.strip_prefix("v1,"))
        .filter_map(|sig| STANDARD.decode(sig).ok())
        .any(|sig| mac.clone().verify_slice(&sig).is_ok());

    if matched {
        Ok(())
    } else {
        Err(SignatureError::NoMatch)
    }
}

#[cfg(test)]
pub fn sign_webhook(secret: &str, msg_id: &str, timestamp: &str, body: &[u8]) -> String {
    let key = webhook_key(secret).unwrap();
    let tag = webhook_mac(&key, msg_id, timestamp, body)
        .unwrap()
        .finalize()
        .into_bytes();
    format!("v1,{}", STANDARD.encode(tag))
}

#[cfg(test)]
pub mod test_tokens {
    use jsonwebtoken::{EncodingKey, Header};

    use super::*;

    pub const SECRET: &[u8] = b"test-session-secret";

    pub fn verifier() -> SessionVerifier {
        SessionVerifier::new(DecodingKey::from_secret(SECRET), Algorithm::HS256)
    }

    pub fn token(sub: &str, role: Option<&str>, exp: i64) -> String {
        let claims = SessionClaims {
            sub: sub.to_string(),
            exp,
            role: role.map(str::to_string),
            metadata: None,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(SECRET))
            .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_MfKQ9r8GKYqrTwjUPD8ILPZIo2LaLaSw";

    #[test]
    fn test_session_roundtrip_and_expiry() {
        let v = test_tokens::verifier();
        let future = chrono::Utc::now().timestamp() + 3600;
        let claims = v
            .verify(&test_tokens::token("user_2abc", Some("veterinarian"), future))
            .expect("valid token");
        assert_eq!(claims.sub, "user_2abc");
        assert_eq!(claims.role(), Some(Role::Doctor));

        let past = chrono::Utc::now().timestamp() - 3600;
        assert!(v.verify(&test_tokens::token("user_2abc", None, past)).is_none());
        assert!(v.verify("not-a-jwt").is_none());
    }

    #[test]
    fn test_role_from_metadata_claim() {
        let claims: SessionClaims = serde_json::from_value(serde_json::json!({
            "sub": "user_1",
            "exp": 0,
            "metadata": { "role": "client" }
        }))
        .unwrap();
        assert_eq!(claims.role(), Some(Role::Customer));
    }

    #[test]
    fn test_throwaway_password_is_random() {
        let a = generate_throwaway_password();
        let b = generate_throwaway_password();
        assert_eq!(a.len(), 43);
        assert_ne!(a, b);
    }

    #[test]
    fn test_derive_username() {
        assert_eq!(derive_username("Maria.Silva@clinic.com"), "maria_silva");
        assert_eq!(derive_username("jo@x.com"), "user_jo");
        assert_eq!(derive_username("dr-house+vet@x.com"), "dr-house_vet");
        assert_eq!(derive_username(&format!("{}@x.com", "a".repeat(80))).len(), 64);
    }

    #[test]
    fn test_webhook_signature_accepts_valid() {
        let body = br#"{"type":"user.created"}"#;
        let now = 1_700_000_000;
        let sig = sign_webhook(SECRET, "msg_1", "1700000000", body);
        let header = format!("v1,bm90LWl0 {sig}");
        assert_eq!(
            verify_webhook_signature(SECRET, "msg_1", "1700000000", &header, body, now),
            Ok(())
        );
    }

    #[test]
    fn test_webhook_signature_rejects_tampering() {
        let body = br#"{"type":"user.created"}"#;
        let now = 1_700_000_000;
        let sig = sign_webhook(SECRET, "msg_1", "1700000000", body);

        assert_eq!(
            verify_webhook_signature(SECRET, "msg_2", "1700000000", &sig, body, now),
            Err(SignatureError::NoMatch)
        );
        assert_eq!(
            verify_webhook_signature(SECRET, "msg_1", "1700000000", &sig, b"{}", now),
            Err(SignatureError::NoMatch)
        );
        assert_eq!(
            verify_webhook_signature(SECRET, "msg_1", "1700000000", &sig, body, now + 301),
            Err(SignatureError::StaleTimestamp)
        );
        assert_eq!(
            verify_webhook_signature(SECRET, "msg_1", "yesterday", &sig, body, now),
            Err(SignatureError::InvalidTimestamp)
        );
        assert_eq!(
            verify_webhook_signature("whsec_***", "msg_1", "1700000000", &sig, body, now),
            Err(SignatureError::InvalidSecret)
        );
    }
}

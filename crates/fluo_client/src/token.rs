//! Affine session credentials.
//!
//! Tokens and tickets are sealed blobs the client never inspects. Both are
//! affine: every operation that accepts one consumes it and either embeds the
//! replacement in the next state or surfaces it in the error payload. Neither
//! type is `Clone`, so a consumed binding cannot be observed again.
//!
//! On the wire both travel as unpadded Base64, decoded and encoded through
//! the constant-time codec so credential bytes never drive timing.

use ct_base64::Base64Error;
use serde::de::{self, Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

/// A live login session, rotated on every use.
#[must_use = "a session token is single-use; dropping it logs the user out"]
pub struct SessionToken {
    sealed: Vec<u8>,
}

impl SessionToken {
    /// Reconstruct a token from its unpadded Base64 wire form.
    ///
    /// # Errors
    /// Returns [`Base64Error::InvalidEncoding`] when the input is not valid
    /// unpadded Base64.
    pub fn from_encoded(encoded: &str) -> Result<Self, Base64Error> {
        ct_base64::decode_ct(encoded).map(|sealed| Self { sealed })
    }

    /// Encode the sealed bytes for the wire or for external storage.
    #[must_use]
    pub fn encode(&self) -> String {
        ct_base64::encode_ct(&self.sealed)
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionToken({} sealed bytes)", self.sealed.len())
    }
}

impl Serialize for SessionToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for SessionToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Self::from_encoded(&encoded).map_err(de::Error::custom)
    }
}

/// A single-use recovery permit issued by a privileged user. Structurally a
/// token, but redeemed as the request permit and invalidated server-side on
/// first use.
#[must_use = "a recovery ticket is single-use; dropping it wastes the issuance"]
pub struct Ticket {
    sealed: Vec<u8>,
}

impl Ticket {
    /// Reconstruct a ticket from its unpadded Base64 wire form.
    ///
    /// # Errors
    /// Returns [`Base64Error::InvalidEncoding`] when the input is not valid
    /// unpadded Base64.
    pub fn from_encoded(encoded: &str) -> Result<Self, Base64Error> {
        ct_base64::decode_ct(encoded).map(|sealed| Self { sealed })
    }

    /// Encode the sealed bytes for the wire or for handing to the end user.
    #[must_use]
    pub fn encode(&self) -> String {
        ct_base64::encode_ct(&self.sealed)
    }
}

impl std::fmt::Debug for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ticket({} sealed bytes)", self.sealed.len())
    }
}

impl Serialize for Ticket {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Ticket {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Self::from_encoded(&encoded).map_err(de::Error::custom)
    }
}

/// The result of peeking a session token: the token's owner plus the
/// replacement token. The consumed token is dead; ignoring `token` silently
/// logs the user out on the next check.
#[must_use = "the rotated token replaces the one just consumed"]
#[derive(Debug, serde::Deserialize)]
pub struct PeekedToken {
    pub user_id: Uuid,
    pub token: SessionToken,
}

/// Deliberately detail-free rejection from the token-check endpoint.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("token rejected")]
pub struct TokenRejected;

/// Revocation failed. When the IdP supplied a replacement token it must be
/// used for any retry; the one passed to `revoke_tokens` is dead either way.
#[must_use = "the replacement token, when present, must be used for retries"]
#[derive(Debug, Error)]
#[error("token revocation failed")]
pub struct RevokeError {
    replacement: Option<SessionToken>,
}

impl RevokeError {
    pub(crate) fn new(replacement: Option<SessionToken>) -> Self {
        Self { replacement }
    }

    /// Surrender the replacement token, if the IdP issued one.
    pub fn into_replacement(self) -> Option<SessionToken> {
        self.replacement
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_through_wire_form() {
        let token = SessionToken::from_encoded("AAECAwQ").unwrap();
        assert_eq!(token.encode(), "AAECAwQ");
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(json, "\"AAECAwQ\"");
        let back: SessionToken = serde_json::from_str(&json).unwrap();
        assert_eq!(back.encode(), "AAECAwQ");
    }

    #[test]
    fn token_rejects_invalid_encoding() {
        assert!(SessionToken::from_encoded("not base64!").is_err());
        let decoded: Result<SessionToken, _> = serde_json::from_str("\"%%%\"");
        assert!(decoded.is_err());
    }

    #[test]
    fn debug_never_prints_sealed_bytes() {
        let token = SessionToken::from_encoded("c2VjcmV0").unwrap();
        let rendered = format!("{token:?}");
        assert!(!rendered.contains("c2VjcmV0"));
        assert!(rendered.contains("6 sealed bytes"));
    }

    #[test]
    fn peeked_token_decodes_from_response_body() {
        let body = serde_json::json!({
            "user_id": "6f2c63e4-94c9-4b6f-9a55-3f6af40ce7b1",
            "token": "AAECAwQ"
        });
        let peeked: PeekedToken = serde_json::from_value(body).unwrap();
        assert_eq!(
            peeked.user_id.to_string(),
            "6f2c63e4-94c9-4b6f-9a55-3f6af40ce7b1"
        );
        assert_eq!(peeked.token.encode(), "AAECAwQ");
    }

    #[test]
    fn revoke_error_surrenders_replacement() {
        let replacement = SessionToken::from_encoded("AAECAwQ").unwrap();
        let error = RevokeError::new(Some(replacement));
        assert_eq!(error.into_replacement().unwrap().encode(), "AAECAwQ");
        assert!(RevokeError::new(None).into_replacement().is_none());
    }
}

//! Shared fixtures for exercising the SDK against a scripted IdP.
//!
//! Tests script a `wiremock::MockServer` one flow step at a time: the
//! helpers here build envelope responses and match requests by route,
//! operation name, and permit, so tests read as the wire dialogue they
//! assert.

pub mod idp;

use std::net::TcpListener;

/// Sandboxed environments may forbid binding sockets; tests that need a mock
/// server skip themselves when they cannot.
#[must_use]
pub fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

/// Deterministic sealed-token wire form for a test label.
#[must_use]
pub fn sealed(label: &str) -> String {
    ct_base64::encode_ct(label.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::sealed;

    #[test]
    fn sealed_is_unpadded_base64() {
        let encoded = sealed("token-1");
        assert!(!encoded.contains('='));
        assert_eq!(ct_base64::decode(&encoded).ok(), Some(b"token-1".to_vec()));
    }
}

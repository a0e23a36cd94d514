//! Wire envelope and shared per-stage bodies.
//!
//! Every non-ingress request is `{ "args": { "<op>": <body> }, "permit": ... }`
//! and every response is `{ "ret": <object|null>, "permit": <string|null> }`.
//! Response `ret` records declare at most one of an ok slot and an error
//! slot; the adapters at the bottom turn them into `Result`s so flow code
//! never touches raw optionality.

use crate::error::RequestError;
use crate::input::MfaKind;
use crate::token::SessionToken;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Opaque per-step continuation token issued by the IdP. Carried by exactly
/// one live state and consumed by its transition; the IdP validates it, so it
/// is not secret against tampering, only against replay outside the flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permit(String);

impl Permit {
    pub(crate) fn new(raw: String) -> Self {
        Self(raw)
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

/// Request envelope: stage-specific args plus the permit of the source state.
#[derive(Serialize)]
pub(crate) struct RequestEnvelope<'a, A: Serialize> {
    pub args: Tagged<'a, A>,
    pub permit: Option<&'a str>,
}

/// Response envelope: optional stage result plus the permit for the next
/// state. Terminal responses carry no permit.
#[derive(Deserialize)]
#[serde(bound(deserialize = "R: Deserialize<'de>"))]
pub(crate) struct ResponseEnvelope<R> {
    #[serde(default)]
    pub ret: Option<R>,
    #[serde(default)]
    pub permit: Option<String>,
}

impl<R> ResponseEnvelope<R> {
    /// The stage result, tolerating a `null`/absent `ret` for stages whose
    /// success body is empty.
    pub fn ret_or_empty(self) -> R
    where
        R: Default,
    {
        self.ret.unwrap_or_default()
    }

    /// Detach the permit, when the response carried one. Transitions that
    /// branch between a terminal and a non-terminal outcome take it here and
    /// insist on it only where the next state needs it.
    pub fn take_permit(&mut self) -> Option<Permit> {
        self.permit.take().map(Permit::new)
    }

    /// The permit a non-terminal transition requires.
    ///
    /// # Errors
    /// A missing permit on a non-terminal response is a contract violation
    /// and is reported as a decode failure.
    pub fn require_permit(&mut self) -> Result<Permit, RequestError> {
        self.take_permit().ok_or(RequestError::Deserialization)
    }
}

/// Wraps a request body in its operation name: `{ "<op>": <body> }`.
pub(crate) struct Tagged<'a, A: Serialize> {
    pub op: &'static str,
    pub body: &'a A,
}

impl<A: Serialize> Serialize for Tagged<'_, A> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(self.op, self.body)?;
        map.end()
    }
}

/// MFA enrolment selector with delivery details. Serialized as
/// `{"Totp": null}`, `{"Sms": <phone>}`, or `{"Email": <address>}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupKind {
    Totp,
    Sms(String),
    Email(String),
}

impl SetupKind {
    #[must_use]
    pub fn kind(&self) -> MfaKind {
        match self {
            Self::Totp => MfaKind::Totp,
            Self::Sms(_) => MfaKind::Sms,
            Self::Email(_) => MfaKind::Email,
        }
    }
}

impl Serialize for SetupKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            Self::Totp => map.serialize_entry("Totp", &())?,
            Self::Sms(phone) => map.serialize_entry("Sms", phone)?,
            Self::Email(address) => map.serialize_entry("Email", address)?,
        }
        map.end()
    }
}

// Shared request bodies.

#[derive(Serialize)]
pub(crate) struct GuessArgs<'a> {
    pub guess: &'a str,
}

#[derive(Serialize)]
pub(crate) struct KindArgs {
    pub kind: &'static str,
}

#[derive(Serialize)]
pub(crate) struct SetupArgs<'a> {
    pub kind: Option<&'a SetupKind>,
}

#[derive(Serialize)]
pub(crate) struct TokenArgs<'a> {
    pub token: &'a SessionToken,
}

#[derive(Serialize)]
pub(crate) struct EmptyArgs {}

// Shared response bodies.

/// Terminal responses that seal the flow with a session token.
#[derive(Default, Deserialize)]
pub(crate) struct TokenRet {
    #[serde(default)]
    pub token: Option<SessionToken>,
}

/// MFA enrolment acknowledgements; `setup_totp` carries the provisioning URI
/// for TOTP and is absent for the delivered kinds.
#[derive(Default, Deserialize)]
pub(crate) struct SetupMfaRet {
    #[serde(default)]
    pub setup_totp: Option<String>,
}

#[derive(Default, Deserialize)]
pub(crate) struct VerifySimpleRet {
    #[serde(default)]
    pub maybe_retry_simple: Option<bool>,
}

#[derive(Default, Deserialize)]
pub(crate) struct VerifyTotpRet {
    #[serde(default)]
    pub maybe_retry_totp: Option<bool>,
}

#[derive(Default, Deserialize)]
pub(crate) struct EmptyRet {}

// Response-to-result adapters. A response shape carries at most one of its
// ok and error slots; when only one slot is declared the other side is unit.

/// Two-slot adapter: exactly one of `ok`/`err` must be present.
///
/// # Errors
/// Both-absent and both-present are contract violations, reported as decode
/// failures.
pub(crate) fn outcome<T, E>(ok: Option<T>, err: Option<E>) -> Result<Result<T, E>, RequestError> {
    match (ok, err) {
        (Some(value), None) => Ok(Ok(value)),
        (None, Some(error)) => Ok(Err(error)),
        _ => Err(RequestError::Deserialization),
    }
}

/// Single-ok-slot adapter: the slot must be present.
///
/// # Errors
/// An absent slot is a contract violation, reported as a decode failure.
pub(crate) fn expect_ok<T>(ok: Option<T>) -> Result<T, RequestError> {
    ok.ok_or(RequestError::Deserialization)
}

/// Single-error-slot adapter: absence of the slot is the success.
pub(crate) fn refuse_if<E>(err: Option<E>) -> Result<(), E> {
    match err {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

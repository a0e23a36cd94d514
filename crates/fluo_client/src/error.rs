//! The fatal request plane.
//!
//! These errors abort the current flow operation; expected flow-level
//! failures (wrong OTP, unavailable MFA kind, rejected password) never appear
//! here — they travel as `Err` values inside the success envelope.

use thiserror::Error;

/// A per-step IdP request failed before a usable response was decoded.
///
/// The status interpretation is fixed: the permit behind the source state is
/// dead on `State`, expired or precondition-refused on `Precondition`, and
/// possibly still usable on `Request`. `Internal` leaves the permit
/// indeterminate.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The request never produced a status (connect failure, timeout, broken
    /// body stream).
    #[error("transport failure")]
    Transport(#[from] reqwest::Error),

    /// The response body was not the JSON shape the stage requires.
    #[error("failed to decode identity provider response")]
    Deserialization,

    /// 400: the IdP considered the request malformed.
    #[error("malformed request")]
    Request,

    /// 401: attempted to transition to an unauthorized state.
    #[error("attempted to transition to an unauthorized state")]
    State,

    /// 412: the permit expired or the arguments violated a precondition.
    #[error("permit expired or a request precondition failed")]
    Precondition,

    /// 500: the IdP failed internally.
    #[error("identity provider internal error")]
    Internal,

    /// Any status outside the enumerated set.
    #[error("unexpected identity provider status: {status}")]
    General { status: u16 },
}

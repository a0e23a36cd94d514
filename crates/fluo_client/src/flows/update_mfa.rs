//! MFA-update flow: re-authenticate with an existing method, then remove a
//! method or enrol a replacement.
//!
//! The IdP mutates nothing until the finalize step: every intermediate state
//! is pure verification and negotiation, so an abandoned flow leaves the MFA
//! configuration untouched. The session token is rotated at ingress and
//! again at finalize, and the finalize refusal path carries a replacement
//! token so a failure never logs the user out.

use crate::error::RequestError;
use crate::flows::setup::ProvisioningUri;
use crate::input::{MfaKind, SimpleOtp, Totp};
use crate::outcome::FlowResult;
use crate::token::SessionToken;
use crate::transport::{Route, Transport};
use crate::wire::{
    self, EmptyRet, GuessArgs, KindArgs, Permit, SetupArgs, SetupKind, SetupMfaRet, TokenArgs,
    VerifySimpleRet, VerifyTotpRet,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a removal request was refused before anything was committed.
///
/// The guarded variants return the [`Decide`] state unchanged so the caller
/// can pick a different action without restarting the flow.
#[must_use = "the guarded variants carry the state to continue from"]
#[derive(Debug, Error)]
pub enum CannotRemoveMfa {
    #[error("cannot remove the only configured MFA method")]
    IsOnlyMfaKind(Decide),
    #[error("the requested MFA method is not set up")]
    NotSetUp(Decide),
    /// The IdP reported an inconsistent MFA state for this removal.
    #[error("MFA state tampering in removal")]
    Upstream,
}

/// Finalization was refused. The carried token is the rotated replacement
/// and the caller must use it; the one sent with the request is dead.
#[must_use = "the rotated token must be used; the one sent with the request is dead"]
#[derive(Debug, Error)]
#[error("MFA update refused; the session token was rotated")]
pub struct UpdateMfaError {
    token: SessionToken,
}

impl UpdateMfaError {
    /// Surrender the rotated session token.
    pub fn into_token(self) -> SessionToken {
        self.token
    }
}

/// Serializable MFA-update state, tagged by stage for resume dispatch.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "stage")]
pub enum UpdateMfaState {
    StartUpdate {
        permit: Permit,
        old_mfa: Vec<MfaKind>,
    },
    CheckOtp {
        permit: Permit,
        old_mfa: Vec<MfaKind>,
    },
    CheckTotp {
        permit: Permit,
        old_mfa: Vec<MfaKind>,
    },
    Decide {
        permit: Permit,
        old_mfa: Vec<MfaKind>,
    },
    FinalizeRemoval {
        permit: Permit,
        old_mfa: Vec<MfaKind>,
    },
    EnsureOtpSetup {
        permit: Permit,
        old_mfa: Vec<MfaKind>,
    },
    EnsureTotpSetup {
        permit: Permit,
        old_mfa: Vec<MfaKind>,
    },
    FinalizeUpdate {
        permit: Permit,
        old_mfa: Vec<MfaKind>,
    },
}

/// A resumed MFA-update flow, one live state per stage tag.
#[derive(Debug)]
pub enum UpdateMfaFlow {
    StartUpdate(StartUpdate),
    CheckOtp(CheckOtp),
    CheckTotp(CheckTotp),
    Decide(Decide),
    FinalizeRemoval(FinalizeRemoval),
    EnsureOtpSetup(EnsureOtpSetup),
    EnsureTotpSetup(EnsureTotpSetup),
    FinalizeUpdate(FinalizeUpdate),
}

pub(crate) fn resume(transport: Transport, state: UpdateMfaState) -> UpdateMfaFlow {
    match state {
        UpdateMfaState::StartUpdate { permit, old_mfa } => UpdateMfaFlow::StartUpdate(StartUpdate {
            transport,
            permit,
            old_mfa,
        }),
        UpdateMfaState::CheckOtp { permit, old_mfa } => UpdateMfaFlow::CheckOtp(CheckOtp {
            transport,
            permit,
            old_mfa,
        }),
        UpdateMfaState::CheckTotp { permit, old_mfa } => UpdateMfaFlow::CheckTotp(CheckTotp {
            transport,
            permit,
            old_mfa,
        }),
        UpdateMfaState::Decide { permit, old_mfa } => UpdateMfaFlow::Decide(Decide {
            transport,
            permit,
            old_mfa,
        }),
        UpdateMfaState::FinalizeRemoval { permit, old_mfa } => {
            UpdateMfaFlow::FinalizeRemoval(FinalizeRemoval {
                transport,
                permit,
                old_mfa,
            })
        }
        UpdateMfaState::EnsureOtpSetup { permit, old_mfa } => {
            UpdateMfaFlow::EnsureOtpSetup(EnsureOtpSetup {
                transport,
                permit,
                old_mfa,
            })
        }
        UpdateMfaState::EnsureTotpSetup { permit, old_mfa } => {
            UpdateMfaFlow::EnsureTotpSetup(EnsureTotpSetup {
                transport,
                permit,
                old_mfa,
                uri: None,
            })
        }
        UpdateMfaState::FinalizeUpdate { permit, old_mfa } => {
            UpdateMfaFlow::FinalizeUpdate(FinalizeUpdate {
                transport,
                permit,
                old_mfa,
            })
        }
    }
}

#[derive(Deserialize)]
struct HelloUpdateBody {
    token: SessionToken,
    old_mfa: Vec<MfaKind>,
}

#[derive(Default, Deserialize)]
struct HelloUpdateRet {
    #[serde(default)]
    hello_update_mfa: Option<HelloUpdateBody>,
}

#[derive(Default, Deserialize)]
struct CheckRet {
    #[serde(default)]
    maybe_retry: Option<bool>,
}

#[derive(Default, Deserialize)]
struct RemoveRet {
    #[serde(default)]
    invalid_mfa: Option<bool>,
}

#[derive(Default, Deserialize)]
struct FinalizeRet {
    #[serde(default)]
    token: Option<SessionToken>,
    #[serde(default)]
    failed: Option<SessionToken>,
}

/// MFA-update ingress.
#[must_use = "a flow state is single-use; dropping it abandons the flow"]
#[derive(Debug)]
pub struct UpdateMfa {
    transport: Transport,
}

impl UpdateMfa {
    pub(crate) fn new(transport: Transport) -> Self {
        Self { transport }
    }

    /// Open the flow with the current session token. The rotated token is
    /// returned next to the state; it belongs to the caller, not the flow.
    ///
    /// # Errors
    /// Fatal request errors abort the operation; an invalid token surfaces
    /// as [`RequestError::State`].
    pub async fn hello(
        self,
        token: SessionToken,
    ) -> Result<(StartUpdate, SessionToken), RequestError> {
        let mut envelope = self
            .transport
            .call::<_, HelloUpdateRet>(
                Route::UpdateMfa,
                "hello_update_mfa",
                &TokenArgs { token: &token },
                None,
            )
            .await?;
        let permit = envelope.require_permit()?;
        let body = wire::expect_ok(envelope.ret_or_empty().hello_update_mfa)?;
        drop(token);

        Ok((
            StartUpdate {
                transport: self.transport,
                permit,
                old_mfa: body.old_mfa,
            },
            body.token,
        ))
    }
}

/// Pick an existing method to re-authenticate with. Selection is guarded
/// locally against the configured set; a refused selection returns the
/// unchanged state without a round-trip.
#[must_use = "a flow state is single-use; dropping it abandons the flow"]
#[derive(Debug)]
pub struct StartUpdate {
    transport: Transport,
    permit: Permit,
    old_mfa: Vec<MfaKind>,
}

impl StartUpdate {
    pub(crate) fn new(transport: Transport, permit: Permit, old_mfa: Vec<MfaKind>) -> Self {
        Self {
            transport,
            permit,
            old_mfa,
        }
    }

    /// The methods currently configured on the account.
    #[must_use]
    pub fn old_mfa(&self) -> &[MfaKind] {
        &self.old_mfa
    }

    /// Re-authenticate over SMS.
    ///
    /// # Errors
    /// Fatal request errors abort the operation.
    pub async fn sms(self) -> FlowResult<CheckOtp, StartUpdate> {
        self.check_otp(MfaKind::Sms).await
    }

    /// Re-authenticate over email.
    ///
    /// # Errors
    /// Fatal request errors abort the operation.
    pub async fn email(self) -> FlowResult<CheckOtp, StartUpdate> {
        self.check_otp(MfaKind::Email).await
    }

    /// Re-authenticate with the authenticator app.
    ///
    /// # Errors
    /// Fatal request errors abort the operation.
    pub async fn totp(self) -> FlowResult<CheckTotp, StartUpdate> {
        if !self.old_mfa.contains(&MfaKind::Totp) {
            return Ok(Err(self));
        }
        let permit = self.start_check(MfaKind::Totp).await?;
        Ok(Ok(CheckTotp {
            transport: self.transport,
            permit,
            old_mfa: self.old_mfa,
        }))
    }

    async fn check_otp(self, kind: MfaKind) -> FlowResult<CheckOtp, StartUpdate> {
        if !self.old_mfa.contains(&kind) {
            return Ok(Err(self));
        }
        let permit = self.start_check(kind).await?;
        Ok(Ok(CheckOtp {
            transport: self.transport,
            permit,
            old_mfa: self.old_mfa,
        }))
    }

    async fn start_check(&self, kind: MfaKind) -> Result<Permit, RequestError> {
        let mut envelope = self
            .transport
            .call::<_, EmptyRet>(
                Route::UpdateMfa,
                "start_check",
                &KindArgs {
                    kind: kind.wire_name(),
                },
                Some(&self.permit),
            )
            .await?;
        envelope.require_permit()
    }

    pub fn suspend(self) -> UpdateMfaState {
        UpdateMfaState::StartUpdate {
            permit: self.permit,
            old_mfa: self.old_mfa,
        }
    }
}

/// Prove control of the selected SMS or email method.
#[must_use = "a flow state is single-use; dropping it abandons the flow"]
#[derive(Debug)]
pub struct CheckOtp {
    transport: Transport,
    permit: Permit,
    old_mfa: Vec<MfaKind>,
}

impl CheckOtp {
    /// Submit the delivered code. A wrong guess returns to the selection
    /// state with a fresh permit.
    ///
    /// # Errors
    /// Fatal request errors abort the operation.
    pub async fn guess(self, code: SimpleOtp) -> FlowResult<Decide, StartUpdate> {
        check(
            self.transport,
            self.permit,
            self.old_mfa,
            "check_otp",
            code.as_str(),
        )
        .await
    }

    pub fn suspend(self) -> UpdateMfaState {
        UpdateMfaState::CheckOtp {
            permit: self.permit,
            old_mfa: self.old_mfa,
        }
    }
}

/// Prove control of the configured authenticator app.
#[must_use = "a flow state is single-use; dropping it abandons the flow"]
#[derive(Debug)]
pub struct CheckTotp {
    transport: Transport,
    permit: Permit,
    old_mfa: Vec<MfaKind>,
}

impl CheckTotp {
    /// Submit the authenticator code. A wrong guess returns to the selection
    /// state with a fresh permit.
    ///
    /// # Errors
    /// Fatal request errors abort the operation.
    pub async fn guess(self, code: Totp) -> FlowResult<Decide, StartUpdate> {
        check(
            self.transport,
            self.permit,
            self.old_mfa,
            "check_totp",
            code.as_str(),
        )
        .await
    }

    pub fn suspend(self) -> UpdateMfaState {
        UpdateMfaState::CheckTotp {
            permit: self.permit,
            old_mfa: self.old_mfa,
        }
    }
}

async fn check(
    transport: Transport,
    permit: Permit,
    old_mfa: Vec<MfaKind>,
    op: &'static str,
    guess: &str,
) -> FlowResult<Decide, StartUpdate> {
    let mut envelope = transport
        .call::<_, CheckRet>(Route::UpdateMfa, op, &GuessArgs { guess }, Some(&permit))
        .await?;
    let fresh = envelope.require_permit()?;
    let ret = envelope.ret_or_empty();

    match wire::refuse_if(ret.maybe_retry) {
        Ok(()) => Ok(Ok(Decide {
            transport,
            permit: fresh,
            old_mfa,
        })),
        Err(_) => Ok(Err(StartUpdate::new(transport, fresh, old_mfa))),
    }
}

/// Choose what the re-authenticated user changes: remove a method or enrol a
/// replacement.
#[must_use = "a flow state is single-use; dropping it abandons the flow"]
#[derive(Debug)]
pub struct Decide {
    transport: Transport,
    permit: Permit,
    old_mfa: Vec<MfaKind>,
}

impl Decide {
    /// The methods currently configured on the account.
    #[must_use]
    pub fn old_mfa(&self) -> &[MfaKind] {
        &self.old_mfa
    }

    /// Negotiate removal of `kind`. Refused locally when `kind` is not set
    /// up or is the only configured method; the IdP re-checks both. Nothing
    /// is committed until [`FinalizeRemoval::finalize`].
    ///
    /// # Errors
    /// Fatal request errors abort the operation; refusals come back as
    /// [`CannotRemoveMfa`], with the guarded variants carrying this state.
    pub async fn remove(self, kind: MfaKind) -> FlowResult<FinalizeRemoval, CannotRemoveMfa> {
        if !self.old_mfa.contains(&kind) {
            return Ok(Err(CannotRemoveMfa::NotSetUp(self)));
        }
        if self.old_mfa.len() == 1 {
            return Ok(Err(CannotRemoveMfa::IsOnlyMfaKind(self)));
        }

        let mut envelope = self
            .transport
            .call::<_, RemoveRet>(
                Route::UpdateMfa,
                "remove_mfa",
                &KindArgs {
                    kind: kind.wire_name(),
                },
                Some(&self.permit),
            )
            .await?;
        let permit = envelope.require_permit()?;
        let ret = envelope.ret_or_empty();

        // Failure is reported exactly when the response carries the
        // `invalid_mfa` slot.
        match wire::refuse_if(ret.invalid_mfa) {
            Ok(()) => Ok(Ok(FinalizeRemoval {
                transport: self.transport,
                permit,
                old_mfa: self.old_mfa,
            })),
            Err(_) => Ok(Err(CannotRemoveMfa::Upstream)),
        }
    }

    /// Negotiate enrolment of a replacement authenticator app.
    ///
    /// # Errors
    /// Fatal request errors abort the operation.
    pub async fn totp(self) -> Result<EnsureTotpSetup, RequestError> {
        let (uri, permit) = self.ensure(&SetupKind::Totp).await?;
        let uri = wire::expect_ok(uri)?;
        Ok(EnsureTotpSetup {
            transport: self.transport,
            permit,
            old_mfa: self.old_mfa,
            uri: Some(ProvisioningUri::new(uri)),
        })
    }

    /// Negotiate enrolment of a replacement SMS delivery.
    ///
    /// # Errors
    /// Fatal request errors abort the operation.
    pub async fn sms(self, phone: &str) -> Result<EnsureOtpSetup, RequestError> {
        let (_, permit) = self.ensure(&SetupKind::Sms(phone.to_string())).await?;
        Ok(EnsureOtpSetup {
            transport: self.transport,
            permit,
            old_mfa: self.old_mfa,
        })
    }

    /// Negotiate enrolment of a replacement email delivery.
    ///
    /// # Errors
    /// Fatal request errors abort the operation.
    pub async fn email(self, address: &str) -> Result<EnsureOtpSetup, RequestError> {
        let (_, permit) = self.ensure(&SetupKind::Email(address.to_string())).await?;
        Ok(EnsureOtpSetup {
            transport: self.transport,
            permit,
            old_mfa: self.old_mfa,
        })
    }

    async fn ensure(&self, kind: &SetupKind) -> Result<(Option<String>, Permit), RequestError> {
        let mut envelope = self
            .transport
            .call::<_, SetupMfaRet>(
                Route::UpdateMfa,
                "ensure_mfa",
                &SetupArgs { kind: Some(kind) },
                Some(&self.permit),
            )
            .await?;
        let permit = envelope.require_permit()?;
        Ok((envelope.ret_or_empty().setup_totp, permit))
    }

    pub fn suspend(self) -> UpdateMfaState {
        UpdateMfaState::Decide {
            permit: self.permit,
            old_mfa: self.old_mfa,
        }
    }
}

/// Prove control of the replacement SMS or email method.
#[must_use = "a flow state is single-use; dropping it abandons the flow"]
#[derive(Debug)]
pub struct EnsureOtpSetup {
    transport: Transport,
    permit: Permit,
    old_mfa: Vec<MfaKind>,
}

impl EnsureOtpSetup {
    /// Submit the delivered code. A wrong guess returns this state with a
    /// fresh permit.
    ///
    /// # Errors
    /// Fatal request errors abort the operation.
    pub async fn guess(self, code: SimpleOtp) -> FlowResult<FinalizeUpdate, EnsureOtpSetup> {
        let mut envelope = self
            .transport
            .call::<_, VerifySimpleRet>(
                Route::UpdateMfa,
                "verify_new_otp",
                &GuessArgs {
                    guess: code.as_str(),
                },
                Some(&self.permit),
            )
            .await?;
        let permit = envelope.require_permit()?;
        let ret = envelope.ret_or_empty();

        let Self {
            transport, old_mfa, ..
        } = self;
        match wire::refuse_if(ret.maybe_retry_simple) {
            Ok(()) => Ok(Ok(FinalizeUpdate {
                transport,
                permit,
                old_mfa,
            })),
            Err(_) => Ok(Err(Self {
                transport,
                permit,
                old_mfa,
            })),
        }
    }

    pub fn suspend(self) -> UpdateMfaState {
        UpdateMfaState::EnsureOtpSetup {
            permit: self.permit,
            old_mfa: self.old_mfa,
        }
    }
}

/// Prove control of the replacement authenticator app. The provisioning URI
/// exists only on the first attempt.
#[must_use = "a flow state is single-use; dropping it abandons the flow"]
#[derive(Debug)]
pub struct EnsureTotpSetup {
    transport: Transport,
    permit: Permit,
    old_mfa: Vec<MfaKind>,
    uri: Option<ProvisioningUri>,
}

impl EnsureTotpSetup {
    /// The URI to render as a QR code, present on the first attempt only.
    #[must_use]
    pub fn provisioning_uri(&self) -> Option<&ProvisioningUri> {
        self.uri.as_ref()
    }

    /// Submit the authenticator code. A wrong guess returns the bare state
    /// with a fresh permit.
    ///
    /// # Errors
    /// Fatal request errors abort the operation.
    pub async fn guess(self, code: Totp) -> FlowResult<FinalizeUpdate, EnsureTotpSetup> {
        let mut envelope = self
            .transport
            .call::<_, VerifyTotpRet>(
                Route::UpdateMfa,
                "verify_new_totp",
                &GuessArgs {
                    guess: code.as_str(),
                },
                Some(&self.permit),
            )
            .await?;
        let permit = envelope.require_permit()?;
        let ret = envelope.ret_or_empty();

        let Self {
            transport, old_mfa, ..
        } = self;
        match wire::refuse_if(ret.maybe_retry_totp) {
            Ok(()) => Ok(Ok(FinalizeUpdate {
                transport,
                permit,
                old_mfa,
            })),
            Err(_) => Ok(Err(Self {
                transport,
                permit,
                old_mfa,
                uri: None,
            })),
        }
    }

    pub fn suspend(self) -> UpdateMfaState {
        UpdateMfaState::EnsureTotpSetup {
            permit: self.permit,
            old_mfa: self.old_mfa,
        }
    }
}

/// Commit the negotiated removal.
#[must_use = "a flow state is single-use; dropping it abandons the flow"]
#[derive(Debug)]
pub struct FinalizeRemoval {
    transport: Transport,
    permit: Permit,
    old_mfa: Vec<MfaKind>,
}

impl FinalizeRemoval {
    /// Commit. This is the first and only mutation of the flow; the session
    /// token rotates either way.
    ///
    /// # Errors
    /// Fatal request errors abort the operation.
    pub async fn finalize(self, token: SessionToken) -> FlowResult<SessionToken, UpdateMfaError> {
        finalize(
            &self.transport,
            &self.permit,
            "finalize_removal",
            token,
        )
        .await
    }

    pub fn suspend(self) -> UpdateMfaState {
        UpdateMfaState::FinalizeRemoval {
            permit: self.permit,
            old_mfa: self.old_mfa,
        }
    }
}

/// Commit the verified replacement method.
#[must_use = "a flow state is single-use; dropping it abandons the flow"]
#[derive(Debug)]
pub struct FinalizeUpdate {
    transport: Transport,
    permit: Permit,
    old_mfa: Vec<MfaKind>,
}

impl FinalizeUpdate {
    /// Commit. This is the first and only mutation of the flow; the session
    /// token rotates either way.
    ///
    /// # Errors
    /// Fatal request errors abort the operation.
    pub async fn finalize(self, token: SessionToken) -> FlowResult<SessionToken, UpdateMfaError> {
        finalize(&self.transport, &self.permit, "finalize_update", token).await
    }

    pub fn suspend(self) -> UpdateMfaState {
        UpdateMfaState::FinalizeUpdate {
            permit: self.permit,
            old_mfa: self.old_mfa,
        }
    }
}

async fn finalize(
    transport: &Transport,
    permit: &Permit,
    op: &'static str,
    token: SessionToken,
) -> FlowResult<SessionToken, UpdateMfaError> {
    let envelope = transport
        .call::<_, FinalizeRet>(Route::UpdateMfa, op, &TokenArgs { token: &token }, Some(permit))
        .await?;
    let ret = envelope.ret_or_empty();
    drop(token);

    match wire::outcome(ret.token, ret.failed)? {
        Ok(rotated) => Ok(Ok(rotated)),
        Err(rotated) => Ok(Err(UpdateMfaError { token: rotated })),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn every_stage_tag_deserializes() {
        let tags = [
            "StartUpdate",
            "CheckOtp",
            "CheckTotp",
            "Decide",
            "FinalizeRemoval",
            "EnsureOtpSetup",
            "EnsureTotpSetup",
            "FinalizeUpdate",
        ];
        for tag in tags {
            let state: UpdateMfaState = serde_json::from_value(json!({
                "stage": tag,
                "permit": "p",
                "old_mfa": ["Totp"]
            }))
            .unwrap();
            assert_eq!(serde_json::to_value(&state).unwrap()["stage"], tag);
        }
    }

    #[test]
    fn upstream_removal_refusal_names_the_tampering() {
        assert!(
            CannotRemoveMfa::Upstream
                .to_string()
                .to_lowercase()
                .contains("tampering")
        );
    }
}

//! Ticket-based account recovery.
//!
//! A privileged user issues a single-use ticket scoped to one recovery
//! operation; the target user redeems it to reset their password, their MFA,
//! or both. The ticket rides as the request permit on redeem and is
//! invalidated server-side on first use.

use crate::error::RequestError;
use crate::flows::setup::ProvisioningUri;
use crate::input::Password;
use crate::outcome::FlowResult;
use crate::token::{SessionToken, Ticket};
use crate::transport::{Route, Transport};
use crate::wire::{self, EmptyArgs, EmptyRet, Permit, SetupArgs, SetupKind, SetupMfaRet, TokenRet};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Scope of an issued ticket. `Mutual` tickets allow one-sided resets only;
/// `Full` tickets also allow [`RecoveryOperation::ResetAll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketKind {
    Mutual,
    Full,
}

/// What the redeeming user is allowed to reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryOperation {
    ResetPassword,
    ResetMfa,
    ResetAll,
}

/// Issuance was refused. The carried token is the administrator's rotated
/// session token and must be used; the one sent with the request is dead.
#[must_use = "the rotated admin token must be used; the one sent with the request is dead"]
#[derive(Debug, Error)]
#[error("ticket issuance refused")]
pub struct TicketIssueError {
    token: SessionToken,
}

impl TicketIssueError {
    /// Surrender the administrator's rotated session token.
    pub fn into_token(self) -> SessionToken {
        self.token
    }
}

/// Why a redemption was refused.
#[must_use = "the InvalidOp variant returns the unredeemed ticket"]
#[derive(Debug, Error)]
pub enum TicketVerificationError {
    /// The IdP rejected the ticket: unknown, expired, or already redeemed.
    #[error("invalid or already-redeemed ticket")]
    InvalidTicket,
    /// The requested operation exceeds the ticket's scope. The IdP refuses
    /// without spending the ticket, so it is handed back for a narrower
    /// retry.
    #[error("operation not allowed for this ticket kind")]
    InvalidOp(Ticket),
}

/// A freshly issued ticket next to the administrator's rotated token.
#[must_use = "both the ticket and the rotated admin token must be surfaced"]
#[derive(Debug)]
pub struct IssuedTicket {
    pub ticket: Ticket,
    pub token: SessionToken,
}

/// Serializable recovery state, tagged by stage for resume dispatch.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "stage")]
pub enum TicketState {
    VerifiedTicket {
        permit: Permit,
        operation: RecoveryOperation,
    },
    ResetPassword {
        permit: Permit,
        operation: RecoveryOperation,
    },
    SetupMfa {
        permit: Permit,
        operation: RecoveryOperation,
    },
    CompleteRecovery {
        permit: Permit,
        operation: RecoveryOperation,
    },
}

/// A resumed recovery flow, one live state per stage tag.
#[derive(Debug)]
pub enum TicketFlow {
    VerifiedTicket(VerifiedTicket),
    ResetPassword(ResetPassword),
    SetupMfa(SetupMfa),
    CompleteRecovery(CompleteRecovery),
}

pub(crate) fn resume(transport: Transport, state: TicketState) -> TicketFlow {
    match state {
        TicketState::VerifiedTicket { permit, operation } => {
            TicketFlow::VerifiedTicket(VerifiedTicket {
                transport,
                permit,
                operation,
            })
        }
        TicketState::ResetPassword { permit, operation } => {
            TicketFlow::ResetPassword(ResetPassword {
                transport,
                permit,
                operation,
            })
        }
        TicketState::SetupMfa { permit, operation } => TicketFlow::SetupMfa(SetupMfa {
            transport,
            permit,
            operation,
        }),
        TicketState::CompleteRecovery { permit, operation } => {
            TicketFlow::CompleteRecovery(CompleteRecovery {
                transport,
                permit,
                operation,
            })
        }
    }
}

#[derive(Serialize)]
struct IssueTicketArgs<'a> {
    token: &'a SessionToken,
    username: &'a str,
    kind: TicketKind,
    reason: &'a str,
}

#[derive(Deserialize)]
struct IssueTicketBody {
    ticket: Ticket,
    token: SessionToken,
}

#[derive(Default, Deserialize)]
struct IssueTicketRet {
    #[serde(default)]
    issue_ticket: Option<IssueTicketBody>,
    #[serde(default)]
    refused: Option<SessionToken>,
}

#[derive(Serialize)]
struct RedeemArgs {
    operation: RecoveryOperation,
}

#[derive(Default, Deserialize)]
struct RedeemRet {
    #[serde(default)]
    invalid_ticket: Option<bool>,
    #[serde(default)]
    invalid_op: Option<bool>,
}

#[derive(Serialize)]
struct ResetPasswordArgs<'a> {
    password: &'a str,
}

/// Recovery ingress: issuance for administrators, redemption for end users.
#[must_use = "a flow state is single-use; dropping it abandons the flow"]
#[derive(Debug)]
pub struct Tickets {
    transport: Transport,
}

impl Tickets {
    pub(crate) fn new(transport: Transport) -> Self {
        Self { transport }
    }

    /// Issue a recovery ticket for `username`. The administrator's session
    /// token rotates on both outcomes.
    ///
    /// # Errors
    /// Fatal request errors abort the operation; a refusal carries the
    /// rotated admin token.
    pub async fn issue(
        self,
        admin_token: SessionToken,
        username: &str,
        kind: TicketKind,
        reason: &str,
    ) -> FlowResult<IssuedTicket, TicketIssueError> {
        let envelope = self
            .transport
            .call::<_, IssueTicketRet>(
                Route::Recovery,
                "issue_ticket",
                &IssueTicketArgs {
                    token: &admin_token,
                    username,
                    kind,
                    reason,
                },
                None,
            )
            .await?;
        let ret = envelope.ret_or_empty();
        drop(admin_token);

        match wire::outcome(ret.issue_ticket, ret.refused)? {
            Ok(body) => Ok(Ok(IssuedTicket {
                ticket: body.ticket,
                token: body.token,
            })),
            Err(rotated) => Ok(Err(TicketIssueError { token: rotated })),
        }
    }

    /// Redeem a ticket for `operation`. The ticket itself is the request
    /// permit. The ticket is opaque, so its scope lives with the IdP: a
    /// `Mutual` ticket asked for `ResetAll` is refused without being spent
    /// and handed back inside [`TicketVerificationError::InvalidOp`].
    ///
    /// # Errors
    /// Fatal request errors abort the operation; refusals come back as
    /// [`TicketVerificationError`].
    pub async fn redeem(
        self,
        ticket: Ticket,
        operation: RecoveryOperation,
    ) -> FlowResult<VerifiedTicket, TicketVerificationError> {
        let permit = Permit::new(ticket.encode());
        let mut envelope = self
            .transport
            .call::<_, RedeemRet>(
                Route::Recovery,
                "redeem_ticket",
                &RedeemArgs { operation },
                Some(&permit),
            )
            .await?;
        let fresh = envelope.take_permit();
        let ret = envelope.ret_or_empty();

        if ret.invalid_ticket.unwrap_or(false) {
            return Ok(Err(TicketVerificationError::InvalidTicket));
        }
        if ret.invalid_op.unwrap_or(false) {
            return Ok(Err(TicketVerificationError::InvalidOp(ticket)));
        }
        drop(ticket);

        let permit = fresh.ok_or(RequestError::Deserialization)?;
        Ok(Ok(VerifiedTicket {
            transport: self.transport,
            permit,
            operation,
        }))
    }
}

/// The next step after a successful redemption.
#[must_use = "a flow state is single-use; dropping it abandons the flow"]
#[derive(Debug)]
pub enum RecoveryStep {
    Password(ResetPassword),
    Mfa(SetupMfa),
}

/// A redeemed ticket, fixed to its operation.
#[must_use = "a flow state is single-use; dropping it abandons the flow"]
#[derive(Debug)]
pub struct VerifiedTicket {
    transport: Transport,
    permit: Permit,
    operation: RecoveryOperation,
}

impl VerifiedTicket {
    #[must_use]
    pub fn operation(&self) -> RecoveryOperation {
        self.operation
    }

    /// Route to the first reset step. Local: the operation was fixed at
    /// redemption and the permit already gates the next request.
    pub fn proceed(self) -> RecoveryStep {
        match self.operation {
            RecoveryOperation::ResetPassword | RecoveryOperation::ResetAll => {
                RecoveryStep::Password(ResetPassword {
                    transport: self.transport,
                    permit: self.permit,
                    operation: self.operation,
                })
            }
            RecoveryOperation::ResetMfa => RecoveryStep::Mfa(SetupMfa {
                transport: self.transport,
                permit: self.permit,
                operation: self.operation,
            }),
        }
    }

    pub fn suspend(self) -> TicketState {
        TicketState::VerifiedTicket {
            permit: self.permit,
            operation: self.operation,
        }
    }
}

/// What follows a password reset: MFA setup for `ResetAll`, otherwise the
/// completion step.
#[must_use = "a flow state is single-use; dropping it abandons the flow"]
#[derive(Debug)]
pub enum AfterPasswordReset {
    Mfa(SetupMfa),
    Complete(CompleteRecovery),
}

/// Set the replacement password.
#[must_use = "a flow state is single-use; dropping it abandons the flow"]
#[derive(Debug)]
pub struct ResetPassword {
    transport: Transport,
    permit: Permit,
    operation: RecoveryOperation,
}

impl ResetPassword {
    /// Submit the new password.
    ///
    /// # Errors
    /// Fatal request errors abort the operation; password policy is enforced
    /// by [`Password::parse`] before any request exists.
    pub async fn set(self, password: Password) -> Result<AfterPasswordReset, RequestError> {
        let mut envelope = self
            .transport
            .call::<_, EmptyRet>(
                Route::Recovery,
                "reset_password",
                &ResetPasswordArgs {
                    password: password.expose(),
                },
                Some(&self.permit),
            )
            .await?;
        let permit = envelope.require_permit()?;

        match self.operation {
            RecoveryOperation::ResetAll => Ok(AfterPasswordReset::Mfa(SetupMfa {
                transport: self.transport,
                permit,
                operation: self.operation,
            })),
            _ => Ok(AfterPasswordReset::Complete(CompleteRecovery {
                transport: self.transport,
                permit,
                operation: self.operation,
            })),
        }
    }

    pub fn suspend(self) -> TicketState {
        TicketState::ResetPassword {
            permit: self.permit,
            operation: self.operation,
        }
    }
}

/// Replace the account's MFA configuration in one shot. The privileged
/// ticket vouches for the user, so there is no verification step; a TOTP
/// enrolment hands the provisioning URI back next to the completion state.
#[must_use = "a flow state is single-use; dropping it abandons the flow"]
#[derive(Debug)]
pub struct SetupMfa {
    transport: Transport,
    permit: Permit,
    operation: RecoveryOperation,
}

impl SetupMfa {
    /// Enrol an authenticator app.
    ///
    /// # Errors
    /// Fatal request errors abort the operation.
    pub async fn totp(self) -> Result<(CompleteRecovery, ProvisioningUri), RequestError> {
        let (uri, permit) = self.enroll(&SetupKind::Totp).await?;
        let uri = wire::expect_ok(uri)?;
        Ok((
            CompleteRecovery {
                transport: self.transport,
                permit,
                operation: self.operation,
            },
            ProvisioningUri::new(uri),
        ))
    }

    /// Enrol SMS delivery to `phone`.
    ///
    /// # Errors
    /// Fatal request errors abort the operation.
    pub async fn sms(self, phone: &str) -> Result<CompleteRecovery, RequestError> {
        let (_, permit) = self.enroll(&SetupKind::Sms(phone.to_string())).await?;
        Ok(CompleteRecovery {
            transport: self.transport,
            permit,
            operation: self.operation,
        })
    }

    /// Enrol email delivery to `address`.
    ///
    /// # Errors
    /// Fatal request errors abort the operation.
    pub async fn email(self, address: &str) -> Result<CompleteRecovery, RequestError> {
        let (_, permit) = self.enroll(&SetupKind::Email(address.to_string())).await?;
        Ok(CompleteRecovery {
            transport: self.transport,
            permit,
            operation: self.operation,
        })
    }

    async fn enroll(&self, kind: &SetupKind) -> Result<(Option<String>, Permit), RequestError> {
        let mut envelope = self
            .transport
            .call::<_, SetupMfaRet>(
                Route::Recovery,
                "setup_recovery_mfa",
                &SetupArgs { kind: Some(kind) },
                Some(&self.permit),
            )
            .await?;
        let permit = envelope.require_permit()?;
        Ok((envelope.ret_or_empty().setup_totp, permit))
    }

    pub fn suspend(self) -> TicketState {
        TicketState::SetupMfa {
            permit: self.permit,
            operation: self.operation,
        }
    }
}

/// Commit the recovery and collect the fresh session token.
#[must_use = "a flow state is single-use; dropping it abandons the flow"]
#[derive(Debug)]
pub struct CompleteRecovery {
    transport: Transport,
    permit: Permit,
    operation: RecoveryOperation,
}

impl CompleteRecovery {
    /// Commit. Terminal: the fresh session token logs the recovered user in.
    ///
    /// # Errors
    /// Fatal request errors abort the operation.
    pub async fn complete(self) -> Result<SessionToken, RequestError> {
        let envelope = self
            .transport
            .call::<_, TokenRet>(
                Route::Recovery,
                "complete_recovery",
                &EmptyArgs {},
                Some(&self.permit),
            )
            .await?;
        wire::expect_ok(envelope.ret_or_empty().token)
    }

    pub fn suspend(self) -> TicketState {
        TicketState::CompleteRecovery {
            permit: self.permit,
            operation: self.operation,
        }
    }
}

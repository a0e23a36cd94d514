//! Login flow: password hello, MFA selection, code verification.

use crate::error::RequestError;
use crate::input::{MfaKind, Password, SimpleOtp, Totp};
use crate::outcome::FlowResult;
use crate::token::SessionToken;
use crate::transport::{Route, Transport};
use crate::wire::{self, EmptyRet, GuessArgs, KindArgs, Permit};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why the IdP refused the password hello.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoginFailure {
    #[error("username not found")]
    UsernameNotFound,
    #[error("incorrect password")]
    IncorrectPassword,
    #[error("account has no usable MFA kinds")]
    IllegalMfaKinds,
    /// The account has no MFA configured; use the migrate-login flow.
    #[error("account must use the migrate-login flow")]
    WrongFlow,
}

/// Serializable login state, tagged by stage for resume dispatch.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "stage")]
pub enum LoginState {
    InitMfa {
        permit: Permit,
        available_mfa: Vec<MfaKind>,
    },
    RetryInitMfa {
        permit: Permit,
        available_mfa: Vec<MfaKind>,
    },
    VerifyOtp {
        permit: Permit,
        available_mfa: Vec<MfaKind>,
        kind: MfaKind,
    },
    VerifyTotp {
        permit: Permit,
        available_mfa: Vec<MfaKind>,
    },
}

/// A resumed login flow, one live state per stage tag.
#[derive(Debug)]
pub enum LoginFlow {
    InitMfa(InitMfa),
    RetryInitMfa(RetryInitMfa),
    VerifyOtp(VerifyOtp),
    VerifyTotp(VerifyTotp),
}

pub(crate) fn resume(transport: Transport, state: LoginState) -> LoginFlow {
    match state {
        LoginState::InitMfa {
            permit,
            available_mfa,
        } => LoginFlow::InitMfa(InitMfa {
            transport,
            permit,
            available: available_mfa,
        }),
        LoginState::RetryInitMfa {
            permit,
            available_mfa,
        } => LoginFlow::RetryInitMfa(RetryInitMfa {
            transport,
            permit,
            available: available_mfa,
        }),
        LoginState::VerifyOtp {
            permit,
            available_mfa,
            kind,
        } => LoginFlow::VerifyOtp(VerifyOtp {
            transport,
            permit,
            available: available_mfa,
            kind,
        }),
        LoginState::VerifyTotp {
            permit,
            available_mfa,
        } => LoginFlow::VerifyTotp(VerifyTotp {
            transport,
            permit,
            available: available_mfa,
        }),
    }
}

#[derive(Serialize)]
struct HelloLoginArgs<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Default, Deserialize)]
struct HelloLoginRet {
    #[serde(default)]
    hello_login: Option<Vec<MfaKind>>,
    #[serde(default)]
    failure: Option<LoginFailure>,
}

#[derive(Default, Deserialize)]
struct VerifyLoginRet {
    #[serde(default)]
    token: Option<SessionToken>,
    #[serde(default)]
    retry_mfa: Option<Vec<MfaKind>>,
}

/// Login ingress.
#[must_use = "a flow state is single-use; dropping it abandons the flow"]
#[derive(Debug)]
pub struct Login {
    transport: Transport,
}

impl Login {
    pub(crate) fn new(transport: Transport) -> Self {
        Self { transport }
    }

    /// Present username and password. Success reports the account's
    /// available MFA kinds.
    ///
    /// # Errors
    /// Fatal request errors abort the operation; expected refusals come back
    /// as [`LoginFailure`].
    pub async fn start(
        self,
        username: &str,
        password: Password,
    ) -> FlowResult<InitMfa, LoginFailure> {
        let mut envelope = self
            .transport
            .call::<_, HelloLoginRet>(
                Route::Login,
                "hello_login",
                &HelloLoginArgs {
                    username,
                    password: password.expose(),
                },
                None,
            )
            .await?;
        let permit = envelope.take_permit();
        let ret = envelope.ret_or_empty();

        match wire::outcome(ret.hello_login, ret.failure)? {
            Ok(available) => {
                let permit = permit.ok_or(RequestError::Deserialization)?;
                Ok(Ok(InitMfa {
                    transport: self.transport,
                    permit,
                    available,
                }))
            }
            Err(failure) => Ok(Err(failure)),
        }
    }
}

/// Pick the MFA kind to challenge. Selection is guarded locally against the
/// available set; a refused selection returns the unchanged state without a
/// round-trip.
#[must_use = "a flow state is single-use; dropping it abandons the flow"]
#[derive(Debug)]
pub struct InitMfa {
    transport: Transport,
    permit: Permit,
    available: Vec<MfaKind>,
}

impl InitMfa {
    /// The complete set the IdP reported for this account.
    #[must_use]
    pub fn available(&self) -> &[MfaKind] {
        &self.available
    }

    /// Request an SMS challenge.
    ///
    /// # Errors
    /// Fatal request errors abort the operation.
    pub async fn sms(self) -> FlowResult<VerifyOtp, InitMfa> {
        self.select_otp(MfaKind::Sms).await
    }

    /// Request an email challenge.
    ///
    /// # Errors
    /// Fatal request errors abort the operation.
    pub async fn email(self) -> FlowResult<VerifyOtp, InitMfa> {
        self.select_otp(MfaKind::Email).await
    }

    /// Challenge the account's authenticator app.
    ///
    /// # Errors
    /// Fatal request errors abort the operation.
    pub async fn totp(self) -> FlowResult<VerifyTotp, InitMfa> {
        if !self.available.contains(&MfaKind::Totp) {
            return Ok(Err(self));
        }
        let permit = select(&self.transport, &self.permit, "init_mfa", MfaKind::Totp).await?;
        Ok(Ok(VerifyTotp {
            transport: self.transport,
            permit,
            available: self.available,
        }))
    }

    async fn select_otp(self, kind: MfaKind) -> FlowResult<VerifyOtp, InitMfa> {
        if !self.available.contains(&kind) {
            return Ok(Err(self));
        }
        let permit = select(&self.transport, &self.permit, "init_mfa", kind).await?;
        Ok(Ok(VerifyOtp {
            transport: self.transport,
            permit,
            available: self.available,
            kind,
        }))
    }

    pub fn suspend(self) -> LoginState {
        LoginState::InitMfa {
            permit: self.permit,
            available_mfa: self.available,
        }
    }
}

/// Same surface as [`InitMfa`], reached after a failed verification. The
/// distinct stage lets the IdP apply a different policy to re-selections.
#[must_use = "a flow state is single-use; dropping it abandons the flow"]
#[derive(Debug)]
pub struct RetryInitMfa {
    transport: Transport,
    permit: Permit,
    available: Vec<MfaKind>,
}

impl RetryInitMfa {
    pub(crate) fn new(transport: Transport, permit: Permit, available: Vec<MfaKind>) -> Self {
        Self {
            transport,
            permit,
            available,
        }
    }

    /// The complete set the IdP reported for this account.
    #[must_use]
    pub fn available(&self) -> &[MfaKind] {
        &self.available
    }

    /// Request an SMS challenge.
    ///
    /// # Errors
    /// Fatal request errors abort the operation.
    pub async fn sms(self) -> FlowResult<VerifyOtp, RetryInitMfa> {
        self.select_otp(MfaKind::Sms).await
    }

    /// Request an email challenge.
    ///
    /// # Errors
    /// Fatal request errors abort the operation.
    pub async fn email(self) -> FlowResult<VerifyOtp, RetryInitMfa> {
        self.select_otp(MfaKind::Email).await
    }

    /// Challenge the account's authenticator app.
    ///
    /// # Errors
    /// Fatal request errors abort the operation.
    pub async fn totp(self) -> FlowResult<VerifyTotp, RetryInitMfa> {
        if !self.available.contains(&MfaKind::Totp) {
            return Ok(Err(self));
        }
        let permit = select(&self.transport, &self.permit, "retry_init_mfa", MfaKind::Totp).await?;
        Ok(Ok(VerifyTotp {
            transport: self.transport,
            permit,
            available: self.available,
        }))
    }

    async fn select_otp(self, kind: MfaKind) -> FlowResult<VerifyOtp, RetryInitMfa> {
        if !self.available.contains(&kind) {
            return Ok(Err(self));
        }
        let permit = select(&self.transport, &self.permit, "retry_init_mfa", kind).await?;
        Ok(Ok(VerifyOtp {
            transport: self.transport,
            permit,
            available: self.available,
            kind,
        }))
    }

    pub fn suspend(self) -> LoginState {
        LoginState::RetryInitMfa {
            permit: self.permit,
            available_mfa: self.available,
        }
    }
}

async fn select(
    transport: &Transport,
    permit: &Permit,
    op: &'static str,
    kind: MfaKind,
) -> Result<Permit, RequestError> {
    let mut envelope = transport
        .call::<_, EmptyRet>(
            Route::Login,
            op,
            &KindArgs {
                kind: kind.wire_name(),
            },
            Some(permit),
        )
        .await?;
    envelope.require_permit()
}

/// Verify a delivered SMS or email code.
#[must_use = "a flow state is single-use; dropping it abandons the flow"]
#[derive(Debug)]
pub struct VerifyOtp {
    transport: Transport,
    permit: Permit,
    available: Vec<MfaKind>,
    kind: MfaKind,
}

impl VerifyOtp {
    /// The kind being challenged.
    #[must_use]
    pub fn kind(&self) -> MfaKind {
        self.kind
    }

    /// Submit the delivered code. Success is terminal and yields the session
    /// token; a wrong guess moves to [`RetryInitMfa`] with a fresh permit.
    ///
    /// # Errors
    /// Fatal request errors abort the operation.
    pub async fn guess(self, code: SimpleOtp) -> FlowResult<SessionToken, RetryInitMfa> {
        verify(
            self.transport,
            self.permit,
            self.available,
            "verify_otp",
            code.as_str(),
        )
        .await
    }

    pub fn suspend(self) -> LoginState {
        LoginState::VerifyOtp {
            permit: self.permit,
            available_mfa: self.available,
            kind: self.kind,
        }
    }
}

/// Verify an authenticator-app code.
#[must_use = "a flow state is single-use; dropping it abandons the flow"]
#[derive(Debug)]
pub struct VerifyTotp {
    transport: Transport,
    permit: Permit,
    available: Vec<MfaKind>,
}

impl VerifyTotp {
    /// Submit the authenticator code. Success is terminal and yields the
    /// session token; a wrong guess moves to [`RetryInitMfa`] with a fresh
    /// permit.
    ///
    /// # Errors
    /// Fatal request errors abort the operation.
    pub async fn guess(self, code: Totp) -> FlowResult<SessionToken, RetryInitMfa> {
        verify(
            self.transport,
            self.permit,
            self.available,
            "verify_totp",
            code.as_str(),
        )
        .await
    }

    pub fn suspend(self) -> LoginState {
        LoginState::VerifyTotp {
            permit: self.permit,
            available_mfa: self.available,
        }
    }
}

async fn verify(
    transport: Transport,
    permit: Permit,
    available: Vec<MfaKind>,
    op: &'static str,
    guess: &str,
) -> FlowResult<SessionToken, RetryInitMfa> {
    let mut envelope = transport
        .call::<_, VerifyLoginRet>(Route::Login, op, &GuessArgs { guess }, Some(&permit))
        .await?;
    let fresh = envelope.take_permit();
    let ret = envelope.ret_or_empty();

    match wire::outcome(ret.token, ret.retry_mfa)? {
        Ok(token) => Ok(Ok(token)),
        Err(reported) => {
            let fresh = fresh.ok_or(RequestError::Deserialization)?;
            // The IdP's list is authoritative; fall back to the carried one
            // only if the retry body omitted it.
            let available = if reported.is_empty() {
                available
            } else {
                reported
            };
            Ok(Err(RetryInitMfa::new(transport, fresh, available)))
        }
    }
}

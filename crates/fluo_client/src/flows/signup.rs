//! Signup flow: reserve a username, set a password, enrol MFA, collect the
//! first session token.

use crate::error::RequestError;
use crate::flows::setup::{self, SetupFamily};
use crate::input::{MfaKind, Password};
use crate::outcome::FlowResult;
use crate::transport::{Route, Transport};
use crate::wire::{self, Permit};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The username is taken.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("username already exists")]
pub struct UsernameAlreadyExists;

/// Serializable signup state, tagged by stage for resume dispatch.
///
/// `current_mfa` exists exactly in the two verification stages.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "stage")]
pub enum SignupState {
    Password {
        permit: Permit,
    },
    SetupFirstMfa {
        permit: Permit,
        already_setup: Vec<MfaKind>,
    },
    SetupMfaOrFinalize {
        permit: Permit,
        already_setup: Vec<MfaKind>,
    },
    VerifyOtpSetup {
        permit: Permit,
        already_setup: Vec<MfaKind>,
        current_mfa: MfaKind,
    },
    VerifyTotpSetup {
        permit: Permit,
        already_setup: Vec<MfaKind>,
        current_mfa: MfaKind,
    },
}

/// A resumed signup flow, one live state per stage tag.
#[derive(Debug)]
pub enum SignupFlow {
    Password(SetPassword),
    SetupFirstMfa(SetupFirstMfa),
    SetupMfaOrFinalize(SetupMfaOrFinalize),
    VerifyOtpSetup(VerifyOtpSetup),
    VerifyTotpSetup(VerifyTotpSetup),
}

pub(crate) fn resume(transport: Transport, state: SignupState) -> SignupFlow {
    match state {
        SignupState::Password { permit } => {
            SignupFlow::Password(SetPassword { transport, permit })
        }
        SignupState::SetupFirstMfa { permit, .. } => {
            SignupFlow::SetupFirstMfa(setup::FirstMfa::new(transport, permit))
        }
        SignupState::SetupMfaOrFinalize {
            permit,
            already_setup,
        } => SignupFlow::SetupMfaOrFinalize(setup::MfaOrFinish::new(
            transport,
            permit,
            already_setup,
        )),
        SignupState::VerifyOtpSetup {
            permit,
            already_setup,
            current_mfa,
        } => SignupFlow::VerifyOtpSetup(setup::VerifyOtpSetup::new(
            transport,
            permit,
            already_setup,
            current_mfa,
        )),
        SignupState::VerifyTotpSetup {
            permit,
            already_setup,
            ..
        } => SignupFlow::VerifyTotpSetup(setup::VerifyTotpSetup::new(
            transport,
            permit,
            already_setup,
            None,
        )),
    }
}

/// The signup instantiation of the shared MFA-enrolment surface.
#[derive(Debug)]
pub struct SignupFamily;

impl setup::sealed::Sealed for SignupFamily {}

impl SetupFamily for SignupFamily {
    type Record = SignupState;

    const ROUTE: Route = Route::Signup;

    fn first_mfa_record(permit: Permit) -> SignupState {
        SignupState::SetupFirstMfa {
            permit,
            already_setup: Vec::new(),
        }
    }

    fn or_finish_record(permit: Permit, already_setup: Vec<MfaKind>) -> SignupState {
        SignupState::SetupMfaOrFinalize {
            permit,
            already_setup,
        }
    }

    fn verify_otp_record(
        permit: Permit,
        already_setup: Vec<MfaKind>,
        current_mfa: MfaKind,
    ) -> SignupState {
        SignupState::VerifyOtpSetup {
            permit,
            already_setup,
            current_mfa,
        }
    }

    fn verify_totp_record(permit: Permit, already_setup: Vec<MfaKind>) -> SignupState {
        SignupState::VerifyTotpSetup {
            permit,
            already_setup,
            current_mfa: MfaKind::Totp,
        }
    }
}

pub type SetupFirstMfa = setup::FirstMfa<SignupFamily>;
pub type SetupMfaOrFinalize = setup::MfaOrFinish<SignupFamily>;
pub type VerifyOtpSetup = setup::VerifyOtpSetup<SignupFamily>;
pub type VerifyTotpSetup = setup::VerifyTotpSetup<SignupFamily>;

#[derive(Serialize)]
struct HelloSignupArgs<'a> {
    username: &'a str,
}

#[derive(Default, Deserialize)]
struct HelloSignupRet {
    #[serde(default)]
    username_exists: Option<bool>,
}

#[derive(Serialize)]
struct PasswordArgs<'a> {
    password: &'a str,
}

/// Signup ingress.
#[must_use = "a flow state is single-use; dropping it abandons the flow"]
#[derive(Debug)]
pub struct Signup {
    transport: Transport,
}

impl Signup {
    pub(crate) fn new(transport: Transport) -> Self {
        Self { transport }
    }

    /// Reserve a username.
    ///
    /// # Errors
    /// Fatal request errors abort the operation; a taken username comes back
    /// as [`UsernameAlreadyExists`].
    pub async fn start(self, username: &str) -> FlowResult<SetPassword, UsernameAlreadyExists> {
        let mut envelope = self
            .transport
            .call::<_, HelloSignupRet>(
                Route::Signup,
                "hello_signup",
                &HelloSignupArgs { username },
                None,
            )
            .await?;
        let permit = envelope.take_permit();
        let ret = envelope.ret_or_empty();

        if ret.username_exists.unwrap_or(false) {
            return Ok(Err(UsernameAlreadyExists));
        }
        let permit = permit.ok_or(RequestError::Deserialization)?;
        Ok(Ok(SetPassword {
            transport: self.transport,
            permit,
        }))
    }
}

/// Set the account password.
#[must_use = "a flow state is single-use; dropping it abandons the flow"]
#[derive(Debug)]
pub struct SetPassword {
    transport: Transport,
    permit: Permit,
}

impl SetPassword {
    /// Submit the validated password and move to MFA enrolment.
    ///
    /// # Errors
    /// Fatal request errors abort the operation; password policy is enforced
    /// by [`Password::parse`] before any request exists.
    pub async fn password(self, password: Password) -> Result<SetupFirstMfa, RequestError> {
        let mut envelope = self
            .transport
            .call::<_, wire::EmptyRet>(
                Route::Signup,
                "password",
                &PasswordArgs {
                    password: password.expose(),
                },
                Some(&self.permit),
            )
            .await?;
        let permit = envelope.require_permit()?;
        Ok(setup::FirstMfa::new(self.transport, permit))
    }

    pub fn suspend(self) -> SignupState {
        SignupState::Password {
            permit: self.permit,
        }
    }
}

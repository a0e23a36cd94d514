//! Migrate-login flow: first login for accounts that predate MFA.
//!
//! Same enrolment topology as signup, minus the password step (the legacy
//! password is verified at ingress). Accounts that already carry MFA are
//! bounced to the normal login flow with
//! [`LoginFailure::WrongFlow`](crate::LoginFailure::WrongFlow).

use crate::error::RequestError;
use crate::flows::login::LoginFailure;
use crate::flows::setup::{self, SetupFamily};
use crate::input::{MfaKind, Password};
use crate::outcome::FlowResult;
use crate::transport::{Route, Transport};
use crate::wire::{self, Permit};
use serde::{Deserialize, Serialize};

/// Serializable migrate-login state, tagged by stage for resume dispatch.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "stage")]
pub enum MigrateLoginState {
    SetupFirstMfa {
        permit: Permit,
        already_setup: Vec<MfaKind>,
    },
    NewMfaOrLogin {
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

/// A resumed migrate-login flow, one live state per stage tag.
#[derive(Debug)]
pub enum MigrateLoginFlow {
    SetupFirstMfa(SetupFirstMfa),
    NewMfaOrLogin(NewMfaOrLogin),
    VerifyOtpSetup(VerifyOtpSetup),
    VerifyTotpSetup(VerifyTotpSetup),
}

pub(crate) fn resume(transport: Transport, state: MigrateLoginState) -> MigrateLoginFlow {
    match state {
        MigrateLoginState::SetupFirstMfa { permit, .. } => {
            MigrateLoginFlow::SetupFirstMfa(setup::FirstMfa::new(transport, permit))
        }
        MigrateLoginState::NewMfaOrLogin {
            permit,
            already_setup,
        } => MigrateLoginFlow::NewMfaOrLogin(setup::MfaOrFinish::new(
            transport,
            permit,
            already_setup,
        )),
        MigrateLoginState::VerifyOtpSetup {
            permit,
            already_setup,
            current_mfa,
        } => MigrateLoginFlow::VerifyOtpSetup(setup::VerifyOtpSetup::new(
            transport,
            permit,
            already_setup,
            current_mfa,
        )),
        MigrateLoginState::VerifyTotpSetup {
            permit,
            already_setup,
            ..
        } => MigrateLoginFlow::VerifyTotpSetup(setup::VerifyTotpSetup::new(
            transport,
            permit,
            already_setup,
            None,
        )),
    }
}

/// The migrate-login instantiation of the shared MFA-enrolment surface.
#[derive(Debug)]
pub struct MigrateFamily;

impl setup::sealed::Sealed for MigrateFamily {}

impl SetupFamily for MigrateFamily {
    type Record = MigrateLoginState;

    const ROUTE: Route = Route::MigrateLogin;

    fn first_mfa_record(permit: Permit) -> MigrateLoginState {
        MigrateLoginState::SetupFirstMfa {
            permit,
            already_setup: Vec::new(),
        }
    }

    fn or_finish_record(permit: Permit, already_setup: Vec<MfaKind>) -> MigrateLoginState {
        MigrateLoginState::NewMfaOrLogin {
            permit,
            already_setup,
        }
    }

    fn verify_otp_record(
        permit: Permit,
        already_setup: Vec<MfaKind>,
        current_mfa: MfaKind,
    ) -> MigrateLoginState {
        MigrateLoginState::VerifyOtpSetup {
            permit,
            already_setup,
            current_mfa,
        }
    }

    fn verify_totp_record(permit: Permit, already_setup: Vec<MfaKind>) -> MigrateLoginState {
        MigrateLoginState::VerifyTotpSetup {
            permit,
            already_setup,
            current_mfa: MfaKind::Totp,
        }
    }
}

pub type SetupFirstMfa = setup::FirstMfa<MigrateFamily>;
pub type NewMfaOrLogin = setup::MfaOrFinish<MigrateFamily>;
pub type VerifyOtpSetup = setup::VerifyOtpSetup<MigrateFamily>;
pub type VerifyTotpSetup = setup::VerifyTotpSetup<MigrateFamily>;

#[derive(Serialize)]
struct HelloMigrateArgs<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Default, Deserialize)]
struct HelloMigrateRet {
    #[serde(default)]
    failure: Option<LoginFailure>,
}

/// Migrate-login ingress.
#[must_use = "a flow state is single-use; dropping it abandons the flow"]
#[derive(Debug)]
pub struct MigrateLogin {
    transport: Transport,
}

impl MigrateLogin {
    pub(crate) fn new(transport: Transport) -> Self {
        Self { transport }
    }

    /// Verify the legacy password and enter MFA enrolment.
    ///
    /// # Errors
    /// Fatal request errors abort the operation; expected refusals come back
    /// as [`LoginFailure`], `WrongFlow` meaning the account already has MFA
    /// and must use the normal login.
    pub async fn start(
        self,
        username: &str,
        password: Password,
    ) -> FlowResult<SetupFirstMfa, LoginFailure> {
        let mut envelope = self
            .transport
            .call::<_, HelloMigrateRet>(
                Route::MigrateLogin,
                "hello_migrate_login",
                &HelloMigrateArgs {
                    username,
                    password: password.expose(),
                },
                None,
            )
            .await?;
        let permit = envelope.take_permit();
        let ret = envelope.ret_or_empty();

        match wire::refuse_if(ret.failure) {
            Ok(()) => {
                let permit = permit.ok_or(RequestError::Deserialization)?;
                Ok(Ok(setup::FirstMfa::new(self.transport, permit)))
            }
            Err(failure) => Ok(Err(failure)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn every_stage_tag_is_flow_specific() {
        let states = [
            MigrateLoginState::SetupFirstMfa {
                permit: Permit::new("p1".to_string()),
                already_setup: Vec::new(),
            },
            MigrateLoginState::NewMfaOrLogin {
                permit: Permit::new("p2".to_string()),
                already_setup: vec![MfaKind::Sms],
            },
            MigrateLoginState::VerifyOtpSetup {
                permit: Permit::new("p3".to_string()),
                already_setup: Vec::new(),
                current_mfa: MfaKind::Email,
            },
            MigrateLoginState::VerifyTotpSetup {
                permit: Permit::new("p4".to_string()),
                already_setup: Vec::new(),
                current_mfa: MfaKind::Totp,
            },
        ];
        let tags: Vec<String> = states
            .iter()
            .map(|state| {
                serde_json::to_value(state).unwrap()["stage"]
                    .as_str()
                    .unwrap()
                    .to_string()
            })
            .collect();
        assert_eq!(
            tags,
            [
                "SetupFirstMfa",
                "NewMfaOrLogin",
                "VerifyOtpSetup",
                "VerifyTotpSetup"
            ]
        );
    }
}

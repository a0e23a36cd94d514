//! Account-deletion flow.
//!
//! Deletion is double-confirmed and every step rotates the session token,
//! including the refusal paths: a mistake anywhere in this flow must never
//! log the user out. Terminal success means deletion is scheduled
//! server-side (deferred by default); there is no token afterwards because
//! every session is condemned with the account.

use crate::error::RequestError;
use crate::input::Password;
use crate::outcome::FlowResult;
use crate::token::SessionToken;
use crate::transport::{Route, Transport};
use crate::wire::{self, Permit};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a deletion step was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteRefusal {
    InvalidUsername,
    IncorrectPassword,
    Refused,
}

impl std::fmt::Display for DeleteRefusal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::InvalidUsername => "the username does not match the session",
            Self::IncorrectPassword => "incorrect password",
            Self::Refused => "the identity provider refused the deletion",
        };
        f.write_str(text)
    }
}

/// A deletion step was refused. The carried token is the rotated replacement
/// and the caller must use it; the one sent with the request is dead.
#[must_use = "the rotated token must be used; the one sent with the request is dead"]
#[derive(Debug, Error)]
#[error("deletion refused: {reason}")]
pub struct DeleteError {
    reason: DeleteRefusal,
    token: SessionToken,
}

impl DeleteError {
    fn new(reason: DeleteRefusal, token: SessionToken) -> Self {
        Self { reason, token }
    }

    #[must_use]
    pub fn reason(&self) -> DeleteRefusal {
        self.reason
    }

    /// Surrender the rotated session token.
    pub fn into_token(self) -> SessionToken {
        self.token
    }
}

/// Serializable deletion state, tagged by stage for resume dispatch. The
/// record embeds the current session token, so treat the serialized form
/// with the same care as the token itself.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "stage")]
pub enum DeleteState {
    ConfirmPassword {
        permit: Permit,
        token: SessionToken,
    },
    ConfirmDeletion {
        permit: Permit,
        token: SessionToken,
    },
}

/// A resumed deletion flow, one live state per stage tag.
#[derive(Debug)]
pub enum DeleteFlow {
    ConfirmPassword(ConfirmPassword),
    ConfirmDeletion(ConfirmDeletion),
}

pub(crate) fn resume(transport: Transport, state: DeleteState) -> DeleteFlow {
    match state {
        DeleteState::ConfirmPassword { permit, token } => {
            DeleteFlow::ConfirmPassword(ConfirmPassword {
                transport,
                permit,
                token,
            })
        }
        DeleteState::ConfirmDeletion { permit, token } => {
            DeleteFlow::ConfirmDeletion(ConfirmDeletion {
                transport,
                permit,
                token,
            })
        }
    }
}

#[derive(Serialize)]
struct AskDeleteArgs<'a> {
    token: &'a SessionToken,
    username: &'a str,
}

#[derive(Default, Deserialize)]
struct AskDeleteRet {
    #[serde(default)]
    ask_delete: Option<SessionToken>,
    #[serde(default)]
    invalid_username: Option<SessionToken>,
}

#[derive(Serialize)]
struct ConfirmPasswordArgs<'a> {
    password: &'a str,
    token: &'a SessionToken,
}

#[derive(Default, Deserialize)]
struct ConfirmPasswordRet {
    #[serde(default)]
    confirm_password: Option<SessionToken>,
    #[serde(default)]
    incorrect_password: Option<SessionToken>,
}

#[derive(Serialize)]
struct ConfirmDeletionArgs<'a> {
    token: &'a SessionToken,
}

#[derive(Default, Deserialize)]
struct ConfirmDeletionRet {
    #[serde(default)]
    refused: Option<SessionToken>,
}

/// Deletion ingress.
#[must_use = "a flow state is single-use; dropping it abandons the flow"]
#[derive(Debug)]
pub struct DeleteUser {
    transport: Transport,
}

impl DeleteUser {
    pub(crate) fn new(transport: Transport) -> Self {
        Self { transport }
    }

    /// Open the deletion flow. The username must match the session as a
    /// deliberate friction step.
    ///
    /// # Errors
    /// Fatal request errors abort the operation; a mismatched username comes
    /// back as a [`DeleteError`] carrying the rotated token.
    pub async fn ask(
        self,
        token: SessionToken,
        username: &str,
    ) -> FlowResult<ConfirmPassword, DeleteError> {
        let mut envelope = self
            .transport
            .call::<_, AskDeleteRet>(
                Route::Delete,
                "ask_delete",
                &AskDeleteArgs {
                    token: &token,
                    username,
                },
                None,
            )
            .await?;
        let permit = envelope.take_permit();
        let ret = envelope.ret_or_empty();
        drop(token);

        match wire::outcome(ret.ask_delete, ret.invalid_username)? {
            Ok(rotated) => {
                let permit = permit.ok_or(RequestError::Deserialization)?;
                Ok(Ok(ConfirmPassword {
                    transport: self.transport,
                    permit,
                    token: rotated,
                }))
            }
            Err(rotated) => Ok(Err(DeleteError::new(DeleteRefusal::InvalidUsername, rotated))),
        }
    }
}

/// Re-prove the password before the final confirmation.
#[must_use = "a flow state is single-use; dropping it abandons the flow"]
#[derive(Debug)]
pub struct ConfirmPassword {
    transport: Transport,
    permit: Permit,
    token: SessionToken,
}

impl ConfirmPassword {
    /// Submit the account password.
    ///
    /// # Errors
    /// Fatal request errors abort the operation; a wrong password comes back
    /// as a [`DeleteError`] carrying the rotated token, leaving the user
    /// logged in.
    pub async fn password(self, password: Password) -> FlowResult<ConfirmDeletion, DeleteError> {
        let mut envelope = self
            .transport
            .call::<_, ConfirmPasswordRet>(
                Route::Delete,
                "confirm_password",
                &ConfirmPasswordArgs {
                    password: password.expose(),
                    token: &self.token,
                },
                Some(&self.permit),
            )
            .await?;
        let permit = envelope.take_permit();
        let ret = envelope.ret_or_empty();

        match wire::outcome(ret.confirm_password, ret.incorrect_password)? {
            Ok(rotated) => {
                let permit = permit.ok_or(RequestError::Deserialization)?;
                Ok(Ok(ConfirmDeletion {
                    transport: self.transport,
                    permit,
                    token: rotated,
                }))
            }
            Err(rotated) => Ok(Err(DeleteError::new(
                DeleteRefusal::IncorrectPassword,
                rotated,
            ))),
        }
    }

    pub fn suspend(self) -> DeleteState {
        DeleteState::ConfirmPassword {
            permit: self.permit,
            token: self.token,
        }
    }
}

/// The final confirmation.
#[must_use = "a flow state is single-use; dropping it abandons the flow"]
#[derive(Debug)]
pub struct ConfirmDeletion {
    transport: Transport,
    permit: Permit,
    token: SessionToken,
}

impl ConfirmDeletion {
    /// Confirm. Success schedules the deletion and ends every session; a
    /// refusal rotates the token and keeps the user logged in.
    ///
    /// # Errors
    /// Fatal request errors abort the operation.
    pub async fn confirm(self) -> FlowResult<(), DeleteError> {
        let envelope = self
            .transport
            .call::<_, ConfirmDeletionRet>(
                Route::Delete,
                "confirm_deletion",
                &ConfirmDeletionArgs { token: &self.token },
                Some(&self.permit),
            )
            .await?;
        let ret = envelope.ret_or_empty();

        match wire::refuse_if(ret.refused) {
            Ok(()) => Ok(Ok(())),
            Err(rotated) => Ok(Err(DeleteError::new(DeleteRefusal::Refused, rotated))),
        }
    }

    pub fn suspend(self) -> DeleteState {
        DeleteState::ConfirmDeletion {
            permit: self.permit,
            token: self.token,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn records_embed_the_rotated_token() {
        let token = SessionToken::from_encoded("c2VhbGVk").unwrap();
        let state = DeleteState::ConfirmDeletion {
            permit: Permit::new("p2".to_string()),
            token,
        };
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(
            value,
            json!({
                "stage": "ConfirmDeletion",
                "permit": "p2",
                "token": "c2VhbGVk"
            })
        );

        let back: DeleteState = serde_json::from_value(value).unwrap();
        let DeleteState::ConfirmDeletion { token, .. } = back else {
            panic!("wrong stage");
        };
        assert_eq!(token.encode(), "c2VhbGVk");
    }

    #[test]
    fn refusal_reasons_render_for_callers() {
        assert!(
            DeleteRefusal::IncorrectPassword
                .to_string()
                .contains("password")
        );
        assert!(DeleteRefusal::InvalidUsername.to_string().contains("username"));
    }
}

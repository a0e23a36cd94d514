//! The process-wide client handle.
//!
//! The client is stateless apart from host, port, and the shared transport;
//! it is cheap to clone and safe to share across concurrently progressing
//! flows. Each flow constructor hands out an ingress state; each `resume_*`
//! method reconstitutes a live state from its serialized record, dispatching
//! on the `stage` tag alone.

use crate::error::RequestError;
use crate::flows::delete::{DeleteFlow, DeleteState, DeleteUser};
use crate::flows::login::{Login, LoginFlow, LoginState};
use crate::flows::migrate::{MigrateLogin, MigrateLoginFlow, MigrateLoginState};
use crate::flows::signup::{Signup, SignupFlow, SignupState};
use crate::flows::ticket::{TicketFlow, TicketState, Tickets};
use crate::flows::update_mfa::{UpdateMfa, UpdateMfaFlow, UpdateMfaState};
use crate::flows::{delete, login, migrate, signup, ticket, update_mfa};
use crate::outcome::FlowResult;
use crate::token::{PeekedToken, RevokeError, SessionToken, TokenRejected};
use crate::transport::{CONNECT_TIMEOUT, ClientBuildError, REQUEST_TIMEOUT, Route, Transport};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const DEFAULT_USER_AGENT: &str = concat!("fluo/", env!("CARGO_PKG_VERSION"));

/// Client handle bound to one IdP endpoint.
#[derive(Debug, Clone)]
pub struct Client {
    transport: Transport,
}

/// Builder for non-default transport settings.
#[derive(Debug)]
pub struct ClientBuilder {
    host: String,
    port: u16,
    user_agent: String,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl ClientBuilder {
    #[must_use]
    pub fn user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = user_agent.to_string();
        self
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Build the client.
    ///
    /// # Errors
    /// Returns an error when the endpoint is invalid or the HTTP client
    /// cannot be constructed.
    pub fn build(self) -> Result<Client, ClientBuildError> {
        let transport = Transport::build(
            &self.host,
            self.port,
            &self.user_agent,
            self.connect_timeout,
            self.request_timeout,
        )?;
        Ok(Client { transport })
    }
}

impl Client {
    /// Build a client with default transport settings.
    ///
    /// # Errors
    /// Returns an error when the endpoint is invalid or the HTTP client
    /// cannot be constructed.
    pub fn new(host: &str, port: u16) -> Result<Self, ClientBuildError> {
        Self::builder(host, port).build()
    }

    /// Start configuring a client for `host:port`.
    #[must_use]
    pub fn builder(host: &str, port: u16) -> ClientBuilder {
        ClientBuilder {
            host: host.to_string(),
            port,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            connect_timeout: CONNECT_TIMEOUT,
            request_timeout: REQUEST_TIMEOUT,
        }
    }

    // Flow ingress states.

    pub fn login(&self) -> Login {
        Login::new(self.transport.clone())
    }

    pub fn signup(&self) -> Signup {
        Signup::new(self.transport.clone())
    }

    pub fn migrate_login(&self) -> MigrateLogin {
        MigrateLogin::new(self.transport.clone())
    }

    pub fn delete_user(&self) -> DeleteUser {
        DeleteUser::new(self.transport.clone())
    }

    pub fn update_mfa(&self) -> UpdateMfa {
        UpdateMfa::new(self.transport.clone())
    }

    pub fn ticket(&self) -> Tickets {
        Tickets::new(self.transport.clone())
    }

    // Resume dispatch, total over each flow's stage tags.

    pub fn resume_login(&self, state: LoginState) -> LoginFlow {
        login::resume(self.transport.clone(), state)
    }

    pub fn resume_signup(&self, state: SignupState) -> SignupFlow {
        signup::resume(self.transport.clone(), state)
    }

    pub fn resume_migrate_login(&self, state: MigrateLoginState) -> MigrateLoginFlow {
        migrate::resume(self.transport.clone(), state)
    }

    pub fn resume_delete(&self, state: DeleteState) -> DeleteFlow {
        delete::resume(self.transport.clone(), state)
    }

    pub fn resume_update_mfa(&self, state: UpdateMfaState) -> UpdateMfaFlow {
        update_mfa::resume(self.transport.clone(), state)
    }

    pub fn resume_ticket(&self, state: TicketState) -> TicketFlow {
        ticket::resume(self.transport.clone(), state)
    }

    // Token endpoints.

    /// Peek a session token: verify it and rotate it in one move. The passed
    /// token is dead afterwards; only the returned one works.
    ///
    /// Rejections are deliberately detail-free: the IdP's reasons would leak
    /// to potentially malicious callers.
    ///
    /// # Errors
    /// The outer error covers client-side transport and decode failures
    /// only; every IdP refusal is the opaque [`TokenRejected`].
    pub async fn check_token(
        &self,
        token: SessionToken,
    ) -> FlowResult<PeekedToken, TokenRejected> {
        let body = token.encode();
        drop(token);
        let (status, text) = self.transport.post_raw(Route::Refresh, body).await?;

        if !status.is_success() {
            debug!("token check refused with status {status}");
            return Ok(Err(TokenRejected));
        }
        let peeked: PeekedToken =
            serde_json::from_str(&text).map_err(|_| RequestError::Deserialization)?;
        Ok(Ok(peeked))
    }

    /// Revoke every session of the token's owner. Success returns nothing:
    /// all sessions, including this one, are dead. On failure the IdP may
    /// supply a replacement token, which must be used for any retry.
    ///
    /// # Errors
    /// The outer error covers client-side transport failures only.
    pub async fn revoke_tokens(&self, token: SessionToken) -> FlowResult<(), RevokeError> {
        #[derive(Default, Deserialize)]
        struct RevokeBody {
            #[serde(default)]
            token: Option<SessionToken>,
        }

        let body = token.encode();
        drop(token);
        let (status, text) = self.transport.post_raw(Route::Revoke, body).await?;

        if status.is_success() {
            return Ok(Ok(()));
        }
        debug!("revocation refused with status {status}");
        let replacement = serde_json::from_str::<RevokeBody>(&text)
            .unwrap_or_default()
            .token;
        Ok(Err(RevokeError::new(replacement)))
    }

    /// Probe the IdP's health route within `timeout`.
    pub async fn is_healthy(&self, timeout: Duration) -> bool {
        self.transport.probe(timeout).await
    }
}

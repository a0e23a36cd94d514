//! Request dispatch for the flow engine.
//!
//! This module keeps IdP connectivity in one place so every transition shares
//! request construction, timeouts, status interpretation, and tracing. The
//! transport is built once, is cheap to clone, and is shared immutably by
//! every flow state spawned from the same client.
//!
//! Flow overview:
//! - `call` wraps stage args and a permit into the request envelope, posts to
//!   one of the fixed routes, and decodes the response envelope.
//! - `post_raw` ships a bare token body to the `refresh`/`revoke` endpoints.
//! - `probe` drives the health route with a caller-supplied timeout.
//!
//! Status interpretation is exhaustive and fixed; anything that fails here is
//! fatal to the current flow operation.

use crate::error::RequestError;
use crate::wire::{Permit, RequestEnvelope, ResponseEnvelope, Tagged};
use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{Instrument, debug, info_span};
use url::Url;

pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The fixed route set. The IdP exposes one route per flow plus the token and
/// health endpoints; there is no way to address anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Signup,
    Login,
    Refresh,
    Revoke,
    Health,
    Delete,
    MigrateLogin,
    UpdateMfa,
    Recovery,
}

impl Route {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Signup => "signup",
            Self::Login => "login",
            Self::Refresh => "refresh",
            Self::Revoke => "revoke",
            Self::Health => "health",
            Self::Delete => "delete",
            Self::MigrateLogin => "mLogin",
            Self::UpdateMfa => "upMfa",
            Self::Recovery => "recovery",
        }
    }
}

/// The client could not be constructed.
#[derive(Debug, Error)]
pub enum ClientBuildError {
    #[error("invalid identity provider endpoint: {0}")]
    Endpoint(String),
    #[error("failed to construct HTTP client")]
    Http(#[from] reqwest::Error),
}

#[derive(Clone)]
pub(crate) struct Transport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    client: reqwest::Client,
    base: String,
}

impl Transport {
    /// Build a transport bound to `host:port`.
    ///
    /// # Errors
    /// Returns an error when the host does not form a valid URL or the HTTP
    /// client cannot be constructed.
    pub(crate) fn build(
        host: &str,
        port: u16,
        user_agent: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, ClientBuildError> {
        let base = format!("http://{host}:{port}");
        let parsed = Url::parse(&base)
            .map_err(|err| ClientBuildError::Endpoint(format!("{base}: {err}")))?;
        if parsed.host_str().is_none() {
            return Err(ClientBuildError::Endpoint(format!("{base}: no host")));
        }

        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            inner: Arc::new(TransportInner { client, base }),
        })
    }

    fn endpoint(&self, route: Route) -> String {
        format!("{}/{}", self.inner.base, route.as_str())
    }

    /// Dispatch one enveloped stage request and decode the response envelope.
    ///
    /// # Errors
    /// Returns the fixed status taxonomy, `Transport` for failures without a
    /// status, and `Deserialization` for undecodable bodies.
    pub(crate) async fn call<A, R>(
        &self,
        route: Route,
        op: &'static str,
        body: &A,
        permit: Option<&Permit>,
    ) -> Result<ResponseEnvelope<R>, RequestError>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let url = self.endpoint(route);
        let envelope = RequestEnvelope {
            args: Tagged { op, body },
            permit: permit.map(Permit::as_str),
        };

        let span = info_span!(
            "idp.request",
            http.method = "POST",
            url = %url,
            op = op
        );
        let response = self
            .inner
            .client
            .post(&url)
            .json(&envelope)
            .send()
            .instrument(span)
            .await?;

        interpret_status(response.status())?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|err| {
            debug!("failed to decode response envelope for {op}: {err}");
            RequestError::Deserialization
        })
    }

    /// Dispatch a bare body to a token endpoint and hand back status + body.
    ///
    /// # Errors
    /// Returns `Transport` when no status was produced.
    pub(crate) async fn post_raw(
        &self,
        route: Route,
        body: String,
    ) -> Result<(StatusCode, String), RequestError> {
        let url = self.endpoint(route);
        let span = info_span!(
            "idp.request",
            http.method = "POST",
            url = %url,
            op = route.as_str()
        );
        let response = self
            .inner
            .client
            .post(&url)
            .body(body)
            .send()
            .instrument(span)
            .await?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        Ok((status, text))
    }

    /// Probe the health route. Reachable and 2xx within `timeout` counts as
    /// healthy; everything else does not.
    pub(crate) async fn probe(&self, timeout: Duration) -> bool {
        let url = self.endpoint(Route::Health);
        let span = info_span!("idp.request", http.method = "GET", url = %url);
        match self
            .inner
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .instrument(span)
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                debug!("health probe failed: {err}");
                false
            }
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("base", &self.inner.base)
            .finish()
    }
}

/// The mandatory, exhaustive status interpretation.
fn interpret_status(status: StatusCode) -> Result<(), RequestError> {
    match status {
        StatusCode::OK => Ok(()),
        StatusCode::UNAUTHORIZED => Err(RequestError::State),
        StatusCode::PRECONDITION_FAILED => Err(RequestError::Precondition),
        StatusCode::BAD_REQUEST => Err(RequestError::Request),
        StatusCode::INTERNAL_SERVER_ERROR => Err(RequestError::Internal),
        other => Err(RequestError::General {
            status: other.as_u16(),
        }),
    }
}

//! Client SDK for the fluo identity provider.
//!
//! The IdP exposes every account operation as a server-authoritative state
//! machine; this crate materializes those machines as typed, consuming state
//! values. Each state carries the opaque permit for its next transition, can
//! be suspended to a `stage`-tagged JSON record and resumed on another
//! process, and is invalidated by use, so the type system rules out replayed
//! or aliased continuations.
//!
//! Session tokens are affine: every operation that takes one returns a
//! rotated replacement, either in the next state or in the error payload.
//! Token material crosses the wire as unpadded Base64 through a
//! constant-time codec (`ct_base64`).
//!
//! ```no_run
//! use fluo_client::{Client, Password, Totp};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let client = Client::new("idp.example.com", 8443)?;
//! let init = client
//!     .login()
//!     .start("bob123", Password::parse("Password1234!")?)
//!     .await?
//!     .map_err(|failure| anyhow::anyhow!("login refused: {failure}"))?;
//! let verify = init
//!     .totp()
//!     .await?
//!     .map_err(|_| anyhow::anyhow!("TOTP not available"))?;
//! let token = verify
//!     .guess(Totp::parse("12345678")?)
//!     .await?
//!     .map_err(|_| anyhow::anyhow!("wrong code"))?;
//! # let _ = token;
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
pub mod flows;
mod input;
mod outcome;
mod token;
mod transport;
mod wire;

pub use client::{Client, ClientBuilder};
pub use ct_base64::Base64Error;
pub use error::RequestError;
pub use flows::delete::{DeleteError, DeleteRefusal};
pub use flows::login::LoginFailure;
pub use flows::setup::ProvisioningUri;
pub use flows::signup::UsernameAlreadyExists;
pub use flows::ticket::{
    IssuedTicket, RecoveryOperation, TicketIssueError, TicketKind, TicketVerificationError,
};
pub use flows::update_mfa::{CannotRemoveMfa, UpdateMfaError};
pub use input::{MfaKind, OtpError, Password, PasswordError, SimpleOtp, Totp, UnknownMfaKind};
pub use outcome::{Collapse, FlowResult, FutureResultExt, ResultExt};
pub use token::{PeekedToken, RevokeError, SessionToken, Ticket, TokenRejected};
pub use transport::{ClientBuildError, Route};
pub use wire::{Permit, SetupKind};

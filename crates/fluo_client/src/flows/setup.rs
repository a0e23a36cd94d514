//! Shared MFA-enrolment surface.
//!
//! Signup and migrate-login walk the same enrolment topology: pick a first
//! method, prove control of it, then add further methods or finish and
//! collect the session token. The states here are generic over a
//! [`SetupFamily`], which supplies the flow's route and the constructors of
//! its serializable record; each flow exports type aliases over these
//! generics instead of duplicating the state machine.

use crate::error::RequestError;
use crate::input::{MfaKind, SimpleOtp, Totp};
use crate::outcome::FlowResult;
use crate::token::SessionToken;
use crate::transport::{Route, Transport};
use crate::wire::{
    self, GuessArgs, Permit, SetupArgs, SetupKind, SetupMfaRet, TokenRet, VerifySimpleRet,
    VerifyTotpRet,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

pub(crate) mod sealed {
    pub trait Sealed {}
}

/// Capability set a flow supplies to instantiate the enrolment surface.
///
/// The set of families is fixed: the trait is sealed because the flows are
/// enumerated, not user-composable.
pub trait SetupFamily: sealed::Sealed + Sized {
    /// Serializable state record of the owning flow.
    type Record: Serialize + DeserializeOwned;

    /// Route every request of the owning flow is posted to.
    const ROUTE: Route;

    fn first_mfa_record(permit: Permit) -> Self::Record;
    fn or_finish_record(permit: Permit, already_setup: Vec<MfaKind>) -> Self::Record;
    fn verify_otp_record(
        permit: Permit,
        already_setup: Vec<MfaKind>,
        current_mfa: MfaKind,
    ) -> Self::Record;
    fn verify_totp_record(permit: Permit, already_setup: Vec<MfaKind>) -> Self::Record;
}

/// TOTP provisioning URI, rendered as a QR code by the host application. The
/// SDK treats it as opaque text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningUri(String);

impl ProvisioningUri {
    pub(crate) fn new(raw: String) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProvisioningUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// First enrolment: the account has no MFA method yet, so there is no
/// "finish" move here.
#[must_use = "a flow state is single-use; dropping it abandons the flow"]
#[derive(Debug)]
pub struct FirstMfa<F: SetupFamily> {
    transport: Transport,
    permit: Permit,
    family: PhantomData<F>,
}

impl<F: SetupFamily> FirstMfa<F> {
    pub(crate) fn new(transport: Transport, permit: Permit) -> Self {
        Self {
            transport,
            permit,
            family: PhantomData,
        }
    }

    /// Enrol an authenticator app. The response carries the provisioning URI
    /// for the verification step.
    ///
    /// # Errors
    /// Fatal request errors only; enrolment has no expected failure branch.
    pub async fn totp(self) -> Result<VerifyTotpSetup<F>, RequestError> {
        let (uri, permit) = enroll::<F>(&self.transport, &self.permit, &SetupKind::Totp).await?;
        let uri = wire::expect_ok(uri)?;
        Ok(VerifyTotpSetup::new(
            self.transport,
            permit,
            Vec::new(),
            Some(ProvisioningUri::new(uri)),
        ))
    }

    /// Enrol SMS delivery to `phone`. The IdP sends the first code.
    ///
    /// # Errors
    /// Fatal request errors only.
    pub async fn sms(self, phone: &str) -> Result<VerifyOtpSetup<F>, RequestError> {
        let kind = SetupKind::Sms(phone.to_string());
        let (_, permit) = enroll::<F>(&self.transport, &self.permit, &kind).await?;
        Ok(VerifyOtpSetup::new(
            self.transport,
            permit,
            Vec::new(),
            MfaKind::Sms,
        ))
    }

    /// Enrol email delivery to `address`. The IdP sends the first code.
    ///
    /// # Errors
    /// Fatal request errors only.
    pub async fn email(self, address: &str) -> Result<VerifyOtpSetup<F>, RequestError> {
        let kind = SetupKind::Email(address.to_string());
        let (_, permit) = enroll::<F>(&self.transport, &self.permit, &kind).await?;
        Ok(VerifyOtpSetup::new(
            self.transport,
            permit,
            Vec::new(),
            MfaKind::Email,
        ))
    }

    pub fn suspend(self) -> F::Record {
        F::first_mfa_record(self.permit)
    }
}

/// Add another MFA method or finish the flow and collect the session token.
#[must_use = "a flow state is single-use; dropping it abandons the flow"]
#[derive(Debug)]
pub struct MfaOrFinish<F: SetupFamily> {
    transport: Transport,
    permit: Permit,
    already_setup: Vec<MfaKind>,
    family: PhantomData<F>,
}

impl<F: SetupFamily> MfaOrFinish<F> {
    pub(crate) fn new(transport: Transport, permit: Permit, already_setup: Vec<MfaKind>) -> Self {
        Self {
            transport,
            permit,
            already_setup,
            family: PhantomData,
        }
    }

    /// Kinds already enrolled in this flow, in enrolment order.
    #[must_use]
    pub fn already_setup(&self) -> &[MfaKind] {
        &self.already_setup
    }

    /// Enrol an additional authenticator app.
    ///
    /// # Errors
    /// Fatal request errors only.
    pub async fn totp(self) -> Result<VerifyTotpSetup<F>, RequestError> {
        let (uri, permit) = enroll::<F>(&self.transport, &self.permit, &SetupKind::Totp).await?;
        let uri = wire::expect_ok(uri)?;
        Ok(VerifyTotpSetup::new(
            self.transport,
            permit,
            self.already_setup,
            Some(ProvisioningUri::new(uri)),
        ))
    }

    /// Enrol an additional SMS delivery.
    ///
    /// # Errors
    /// Fatal request errors only.
    pub async fn sms(self, phone: &str) -> Result<VerifyOtpSetup<F>, RequestError> {
        let kind = SetupKind::Sms(phone.to_string());
        let (_, permit) = enroll::<F>(&self.transport, &self.permit, &kind).await?;
        Ok(VerifyOtpSetup::new(
            self.transport,
            permit,
            self.already_setup,
            MfaKind::Sms,
        ))
    }

    /// Enrol an additional email delivery.
    ///
    /// # Errors
    /// Fatal request errors only.
    pub async fn email(self, address: &str) -> Result<VerifyOtpSetup<F>, RequestError> {
        let kind = SetupKind::Email(address.to_string());
        let (_, permit) = enroll::<F>(&self.transport, &self.permit, &kind).await?;
        Ok(VerifyOtpSetup::new(
            self.transport,
            permit,
            self.already_setup,
            MfaKind::Email,
        ))
    }

    /// Terminal move: commit the enrolled set and collect the session token.
    /// On the wire this is the setup operation with a `null` kind.
    ///
    /// # Errors
    /// Fatal request errors only.
    pub async fn finish(self) -> Result<SessionToken, RequestError> {
        let envelope = self
            .transport
            .call::<_, TokenRet>(
                F::ROUTE,
                "setup_first_mfa",
                &SetupArgs { kind: None },
                Some(&self.permit),
            )
            .await?;
        wire::expect_ok(envelope.ret_or_empty().token)
    }

    pub fn suspend(self) -> F::Record {
        F::or_finish_record(self.permit, self.already_setup)
    }
}

/// Prove control of a freshly enrolled SMS or email method.
#[must_use = "a flow state is single-use; dropping it abandons the flow"]
#[derive(Debug)]
pub struct VerifyOtpSetup<F: SetupFamily> {
    transport: Transport,
    permit: Permit,
    already_setup: Vec<MfaKind>,
    kind: MfaKind,
    family: PhantomData<F>,
}

impl<F: SetupFamily> VerifyOtpSetup<F> {
    pub(crate) fn new(
        transport: Transport,
        permit: Permit,
        already_setup: Vec<MfaKind>,
        kind: MfaKind,
    ) -> Self {
        Self {
            transport,
            permit,
            already_setup,
            kind,
            family: PhantomData,
        }
    }

    /// The kind being verified.
    #[must_use]
    pub fn kind(&self) -> MfaKind {
        self.kind
    }

    /// Submit the delivered code. A wrong guess returns the verification
    /// state with a fresh permit so the user can try again.
    ///
    /// # Errors
    /// Fatal request errors abort the operation.
    pub async fn guess(self, code: SimpleOtp) -> FlowResult<MfaOrFinish<F>, VerifyOtpSetup<F>> {
        let mut envelope = self
            .transport
            .call::<_, VerifySimpleRet>(
                F::ROUTE,
                "verify_simple_otp",
                &GuessArgs {
                    guess: code.as_str(),
                },
                Some(&self.permit),
            )
            .await?;
        let permit = envelope.require_permit()?;
        let ret = envelope.ret_or_empty();

        let Self {
            transport,
            mut already_setup,
            kind,
            ..
        } = self;
        match wire::refuse_if(ret.maybe_retry_simple) {
            Ok(()) => {
                already_setup.push(kind);
                Ok(Ok(MfaOrFinish::new(transport, permit, already_setup)))
            }
            Err(_) => Ok(Err(Self::new(transport, permit, already_setup, kind))),
        }
    }

    pub fn suspend(self) -> F::Record {
        F::verify_otp_record(self.permit, self.already_setup, self.kind)
    }
}

/// Prove control of a freshly enrolled authenticator app.
///
/// The provisioning URI exists only on the first attempt: retries after a
/// wrong guess and resumed states carry the bare verification state.
#[must_use = "a flow state is single-use; dropping it abandons the flow"]
#[derive(Debug)]
pub struct VerifyTotpSetup<F: SetupFamily> {
    transport: Transport,
    permit: Permit,
    already_setup: Vec<MfaKind>,
    uri: Option<ProvisioningUri>,
    family: PhantomData<F>,
}

impl<F: SetupFamily> VerifyTotpSetup<F> {
    pub(crate) fn new(
        transport: Transport,
        permit: Permit,
        already_setup: Vec<MfaKind>,
        uri: Option<ProvisioningUri>,
    ) -> Self {
        Self {
            transport,
            permit,
            already_setup,
            uri,
            family: PhantomData,
        }
    }

    /// The URI to render as a QR code, present on the first attempt only.
    #[must_use]
    pub fn provisioning_uri(&self) -> Option<&ProvisioningUri> {
        self.uri.as_ref()
    }

    /// Submit the authenticator code. A wrong guess returns the bare
    /// verification state with a fresh permit.
    ///
    /// # Errors
    /// Fatal request errors abort the operation.
    pub async fn guess(self, code: Totp) -> FlowResult<MfaOrFinish<F>, VerifyTotpSetup<F>> {
        let mut envelope = self
            .transport
            .call::<_, VerifyTotpRet>(
                F::ROUTE,
                "verify_totp_setup",
                &GuessArgs {
                    guess: code.as_str(),
                },
                Some(&self.permit),
            )
            .await?;
        let permit = envelope.require_permit()?;
        let ret = envelope.ret_or_empty();

        let Self {
            transport,
            mut already_setup,
            ..
        } = self;
        match wire::refuse_if(ret.maybe_retry_totp) {
            Ok(()) => {
                already_setup.push(MfaKind::Totp);
                Ok(Ok(MfaOrFinish::new(transport, permit, already_setup)))
            }
            Err(_) => Ok(Err(Self::new(transport, permit, already_setup, None))),
        }
    }

    pub fn suspend(self) -> F::Record {
        F::verify_totp_record(self.permit, self.already_setup)
    }
}

/// One enrolment request; returns the optional provisioning URI and the
/// permit for the verification state.
async fn enroll<F: SetupFamily>(
    transport: &Transport,
    permit: &Permit,
    kind: &SetupKind,
) -> Result<(Option<String>, Permit), RequestError> {
    let mut envelope = transport
        .call::<_, SetupMfaRet>(
            F::ROUTE,
            "setup_first_mfa",
            &SetupArgs { kind: Some(kind) },
            Some(permit),
        )
        .await?;
    let permit = envelope.require_permit()?;
    let ret = envelope.ret_or_empty();
    Ok((ret.setup_totp, permit))
}

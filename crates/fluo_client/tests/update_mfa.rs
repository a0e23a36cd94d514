use anyhow::{Result, anyhow};
use fluo_client::flows::update_mfa::{UpdateMfaFlow, UpdateMfaState};
use fluo_client::{CannotRemoveMfa, Client, MfaKind, SessionToken, SimpleOtp, Totp};
use serde_json::json;
use test_support::{can_bind_localhost, idp, sealed};
use wiremock::MockServer;

fn client_for(server: &MockServer) -> Result<Client> {
    let addr = server.address();
    Ok(Client::new(&addr.ip().to_string(), addr.port())?)
}

/// Scripts hello + SMS re-auth up to the Decide state on permits p1..p3.
async fn mount_reauth(server: &MockServer) {
    idp::step("upMfa", "hello_update_mfa")
        .respond_with(idp::ok(
            json!({ "hello_update_mfa": {
                "token": sealed("rotated-1"),
                "old_mfa": ["Totp", "Sms"]
            }}),
            Some("p1"),
        ))
        .mount(server)
        .await;
    idp::step_with_permit("upMfa", "start_check", "p1")
        .respond_with(idp::ok(json!({}), Some("p2")))
        .mount(server)
        .await;
    idp::step_with_permit("upMfa", "check_otp", "p2")
        .respond_with(idp::ok(json!({}), Some("p3")))
        .mount(server)
        .await;
}

#[tokio::test]
async fn successful_removal_reaches_finalize_and_rotates_the_token() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = MockServer::start().await;
    mount_reauth(&server).await;

    // A clean removal response carries no `invalid_mfa` slot.
    idp::step_with_permit("upMfa", "remove_mfa", "p3")
        .and(wiremock::matchers::body_partial_json(json!({
            "args": { "remove_mfa": { "kind": "Sms" } }
        })))
        .respond_with(idp::ok(json!({}), Some("p4")))
        .expect(1)
        .mount(&server)
        .await;
    idp::step_with_permit("upMfa", "finalize_removal", "p4")
        .and(wiremock::matchers::body_partial_json(json!({
            "args": { "finalize_removal": { "token": sealed("rotated-1") } }
        })))
        .respond_with(idp::ok(json!({ "token": sealed("rotated-2") }), None))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server)?;
    let token = SessionToken::from_encoded(&sealed("session"))?;
    let (start, rotated) = client.update_mfa().hello(token).await?;
    assert_eq!(rotated.encode(), sealed("rotated-1"));
    assert_eq!(start.old_mfa(), [MfaKind::Totp, MfaKind::Sms]);

    let check = start.sms().await?.map_err(|_| anyhow!("SMS is set up"))?;
    let decide = check
        .guess(SimpleOtp::parse("123456")?)
        .await?
        .map_err(|_| anyhow!("re-auth should succeed"))?;

    let finalize = decide
        .remove(MfaKind::Sms)
        .await?
        .map_err(|error| anyhow!("removal should be negotiable: {error}"))?;
    let token = finalize
        .finalize(rotated)
        .await?
        .map_err(|_| anyhow!("finalize should succeed"))?;
    assert_eq!(token.encode(), sealed("rotated-2"));
    Ok(())
}

#[tokio::test]
async fn tampered_removal_is_reported_only_on_the_invalid_mfa_slot() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = MockServer::start().await;
    mount_reauth(&server).await;

    idp::step_with_permit("upMfa", "remove_mfa", "p3")
        .respond_with(idp::ok(json!({ "invalid_mfa": true }), Some("p4")))
        .mount(&server)
        .await;

    let client = client_for(&server)?;
    let token = SessionToken::from_encoded(&sealed("session"))?;
    let (start, rotated) = client.update_mfa().hello(token).await?;
    let decide = start
        .sms()
        .await?
        .map_err(|_| anyhow!("SMS is set up"))?
        .guess(SimpleOtp::parse("123456")?)
        .await?
        .map_err(|_| anyhow!("re-auth should succeed"))?;

    let refusal = decide
        .remove(MfaKind::Sms)
        .await?
        .err()
        .ok_or_else(|| anyhow!("expected a refusal"))?;
    assert!(matches!(refusal, CannotRemoveMfa::Upstream));
    drop(rotated);
    Ok(())
}

#[tokio::test]
async fn removal_guards_refuse_locally_and_return_the_state() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = MockServer::start().await;

    let client = client_for(&server)?;
    let state: UpdateMfaState = serde_json::from_value(json!({
        "stage": "Decide",
        "permit": "p3",
        "old_mfa": ["Totp"]
    }))?;
    let UpdateMfaFlow::Decide(decide) = client.resume_update_mfa(state) else {
        return Err(anyhow!("resume must dispatch on the stage tag"));
    };

    // Email is not configured.
    let decide = match decide.remove(MfaKind::Email).await? {
        Err(CannotRemoveMfa::NotSetUp(state)) => state,
        other => return Err(anyhow!("expected NotSetUp, got {other:?}")),
    };

    // TOTP is the only configured method.
    let refusal = decide.remove(MfaKind::Totp).await?;
    assert!(matches!(refusal, Err(CannotRemoveMfa::IsOnlyMfaKind(_))));

    // Both guards fired before any request existed.
    let requests = server
        .received_requests()
        .await
        .ok_or_else(|| anyhow!("request recording disabled"))?;
    assert!(requests.is_empty());
    Ok(())
}

#[tokio::test]
async fn replacing_totp_verifies_before_committing() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = MockServer::start().await;
    mount_reauth(&server).await;

    idp::step_with_permit("upMfa", "ensure_mfa", "p3")
        .and(wiremock::matchers::body_partial_json(json!({
            "args": { "ensure_mfa": { "kind": { "Totp": null } } }
        })))
        .respond_with(idp::ok(
            json!({ "setup_totp": "otpauth://totp/fluo:bob123?secret=KRSXG5A" }),
            Some("p4"),
        ))
        .mount(&server)
        .await;
    // First verification guess is wrong, second lands.
    idp::step_with_permit("upMfa", "verify_new_totp", "p4")
        .respond_with(idp::ok(json!({ "maybe_retry_totp": true }), Some("p5")))
        .expect(1)
        .mount(&server)
        .await;
    idp::step_with_permit("upMfa", "verify_new_totp", "p5")
        .respond_with(idp::ok(json!({}), Some("p6")))
        .expect(1)
        .mount(&server)
        .await;
    idp::step_with_permit("upMfa", "finalize_update", "p6")
        .respond_with(idp::ok(json!({ "failed": sealed("rotated-2") }), None))
        .mount(&server)
        .await;

    let client = client_for(&server)?;
    let token = SessionToken::from_encoded(&sealed("session"))?;
    let (start, rotated) = client.update_mfa().hello(token).await?;
    let decide = start
        .sms()
        .await?
        .map_err(|_| anyhow!("SMS is set up"))?
        .guess(SimpleOtp::parse("123456")?)
        .await?
        .map_err(|_| anyhow!("re-auth should succeed"))?;

    let ensure = decide.totp().await?;
    assert!(ensure.provisioning_uri().is_some());

    let ensure = match ensure.guess(Totp::parse("00000000")?).await? {
        Ok(_) => return Err(anyhow!("wrong guess must not advance")),
        Err(retry) => retry,
    };
    assert!(ensure.provisioning_uri().is_none());

    let finalize = ensure
        .guess(Totp::parse("12345678")?)
        .await?
        .map_err(|_| anyhow!("second guess should succeed"))?;

    // A refused finalize still rotates the session token.
    let refusal = finalize
        .finalize(rotated)
        .await?
        .err()
        .ok_or_else(|| anyhow!("expected a refusal"))?;
    assert_eq!(refusal.into_token().encode(), sealed("rotated-2"));
    Ok(())
}

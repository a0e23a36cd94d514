use anyhow::{Result, anyhow};
use fluo_client::flows::login::LoginFlow;
use fluo_client::{Client, LoginFailure, MfaKind, Password, PasswordError, RequestError, Totp};
use serde_json::json;
use test_support::{can_bind_localhost, idp, sealed};
use wiremock::MockServer;

fn client_for(server: &MockServer) -> Result<Client> {
    let addr = server.address();
    Ok(Client::new(&addr.ip().to_string(), addr.port())?)
}

fn password() -> Result<Password> {
    Ok(Password::parse("Password1234!")?)
}

#[tokio::test]
async fn login_happy_path_with_totp() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = MockServer::start().await;

    idp::step("login", "hello_login")
        .and(wiremock::matchers::body_partial_json(json!({
            "args": { "hello_login": { "username": "bob123", "password": "Password1234!" } }
        })))
        .respond_with(idp::ok(json!({ "hello_login": ["Totp"] }), Some("p1")))
        .expect(1)
        .mount(&server)
        .await;
    idp::step_with_permit("login", "init_mfa", "p1")
        .and(wiremock::matchers::body_partial_json(json!({
            "args": { "init_mfa": { "kind": "Totp" } }
        })))
        .respond_with(idp::ok(json!({}), Some("p2")))
        .expect(1)
        .mount(&server)
        .await;
    idp::step_with_permit("login", "verify_totp", "p2")
        .respond_with(idp::ok(json!({ "token": sealed("session-1") }), None))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server)?;
    let init = client
        .login()
        .start("bob123", password()?)
        .await?
        .map_err(|failure| anyhow!("unexpected refusal: {failure}"))?;
    assert_eq!(init.available(), [MfaKind::Totp]);

    let verify = init
        .totp()
        .await?
        .map_err(|_| anyhow!("TOTP should be available"))?;
    let token = verify
        .guess(Totp::parse("12345678")?)
        .await?
        .map_err(|_| anyhow!("guess should succeed"))?;
    assert_eq!(token.encode(), sealed("session-1"));
    Ok(())
}

#[tokio::test]
async fn wrong_totp_retries_then_succeeds() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = MockServer::start().await;

    idp::step("login", "hello_login")
        .respond_with(idp::ok(json!({ "hello_login": ["Totp"] }), Some("p1")))
        .mount(&server)
        .await;
    idp::step_with_permit("login", "init_mfa", "p1")
        .respond_with(idp::ok(json!({}), Some("p2")))
        .mount(&server)
        .await;
    // First guess is wrong: the IdP reissues the selection stage.
    idp::step_with_permit("login", "verify_totp", "p2")
        .respond_with(idp::ok(json!({ "retry_mfa": ["Totp"] }), Some("p3")))
        .expect(1)
        .mount(&server)
        .await;
    idp::step_with_permit("login", "retry_init_mfa", "p3")
        .respond_with(idp::ok(json!({}), Some("p4")))
        .expect(1)
        .mount(&server)
        .await;
    idp::step_with_permit("login", "verify_totp", "p4")
        .respond_with(idp::ok(json!({ "token": sealed("session-2") }), None))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server)?;
    let init = client
        .login()
        .start("bob123", password()?)
        .await?
        .map_err(|failure| anyhow!("unexpected refusal: {failure}"))?;
    let verify = init.totp().await?.map_err(|_| anyhow!("TOTP available"))?;

    let retry = match verify.guess(Totp::parse("00000000")?).await? {
        Ok(_) => return Err(anyhow!("wrong guess must not yield a token")),
        Err(retry) => retry,
    };
    assert_eq!(retry.available(), [MfaKind::Totp]);

    let verify = retry.totp().await?.map_err(|_| anyhow!("TOTP available"))?;
    let token = verify
        .guess(Totp::parse("12345678")?)
        .await?
        .map_err(|_| anyhow!("second guess should succeed"))?;
    assert_eq!(token.encode(), sealed("session-2"));
    Ok(())
}

#[tokio::test]
async fn unavailable_kind_is_refused_without_a_request() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = MockServer::start().await;

    idp::step("login", "hello_login")
        .respond_with(idp::ok(json!({ "hello_login": ["Totp"] }), Some("p1")))
        .mount(&server)
        .await;
    idp::step_with_permit("login", "init_mfa", "p1")
        .respond_with(idp::ok(json!({}), Some("p2")))
        .expect(1)
        .mount(&server)
        .await;
    idp::step_with_permit("login", "verify_totp", "p2")
        .respond_with(idp::ok(json!({ "token": sealed("session-3") }), None))
        .mount(&server)
        .await;

    let client = client_for(&server)?;
    let init = client
        .login()
        .start("bob123", password()?)
        .await?
        .map_err(|failure| anyhow!("unexpected refusal: {failure}"))?;

    // SMS is not in the available set: the state comes back unchanged and no
    // init_mfa request is spent on it.
    let init = match init.sms().await? {
        Ok(_) => return Err(anyhow!("unavailable kind must be refused")),
        Err(unchanged) => unchanged,
    };
    assert_eq!(init.available(), [MfaKind::Totp]);

    let verify = init.totp().await?.map_err(|_| anyhow!("TOTP available"))?;
    let token = verify
        .guess(Totp::parse("12345678")?)
        .await?
        .map_err(|_| anyhow!("guess should succeed"))?;
    assert_eq!(token.encode(), sealed("session-3"));
    Ok(())
}

#[tokio::test]
async fn hello_reports_typed_failures() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = MockServer::start().await;

    idp::step("login", "hello_login")
        .respond_with(idp::ok(json!({ "failure": "IncorrectPassword" }), None))
        .mount(&server)
        .await;

    let client = client_for(&server)?;
    let refusal = client
        .login()
        .start("bob123", password()?)
        .await?
        .err()
        .ok_or_else(|| anyhow!("expected a refusal"))?;
    assert_eq!(refusal, LoginFailure::IncorrectPassword);
    Ok(())
}

#[tokio::test]
async fn unauthorized_status_is_a_state_error() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = MockServer::start().await;

    idp::step("login", "hello_login")
        .respond_with(idp::status(401))
        .mount(&server)
        .await;

    let client = client_for(&server)?;
    let error = client
        .login()
        .start("bob123", password()?)
        .await
        .err()
        .ok_or_else(|| anyhow!("expected a fatal error"))?;
    assert!(matches!(error, RequestError::State));
    Ok(())
}

#[tokio::test]
async fn short_password_fails_before_any_request() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = MockServer::start().await;

    assert_eq!(
        Password::parse("Abc1!").err(),
        Some(PasswordError::TooFewChars { len: 5 })
    );

    let requests = server
        .received_requests()
        .await
        .ok_or_else(|| anyhow!("request recording disabled"))?;
    assert!(requests.is_empty());
    Ok(())
}

#[tokio::test]
async fn suspend_and_resume_reproduce_the_same_wire_behavior() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = MockServer::start().await;

    idp::step("login", "hello_login")
        .respond_with(idp::ok(json!({ "hello_login": ["Totp", "Sms"] }), Some("p1")))
        .mount(&server)
        .await;
    idp::step_with_permit("login", "init_mfa", "p1")
        .respond_with(idp::ok(json!({}), Some("p2")))
        .mount(&server)
        .await;
    idp::step_with_permit("login", "verify_totp", "p2")
        .respond_with(idp::ok(json!({ "token": sealed("session-4") }), None))
        .mount(&server)
        .await;

    let client = client_for(&server)?;
    let init = client
        .login()
        .start("bob123", password()?)
        .await?
        .map_err(|failure| anyhow!("unexpected refusal: {failure}"))?;

    // Park the state as a stateless server would, then resume it.
    let serialized = serde_json::to_string(&init.suspend())?;
    let parsed: serde_json::Value = serde_json::from_str(&serialized)?;
    assert_eq!(parsed["stage"], "InitMfa");
    assert_eq!(parsed["permit"], "p1");

    let resumed = client.resume_login(serde_json::from_str(&serialized)?);
    let LoginFlow::InitMfa(init) = resumed else {
        return Err(anyhow!("resume must dispatch on the stage tag"));
    };
    assert_eq!(init.available(), [MfaKind::Totp, MfaKind::Sms]);

    let verify = init.totp().await?.map_err(|_| anyhow!("TOTP available"))?;
    let token = verify
        .guess(Totp::parse("12345678")?)
        .await?
        .map_err(|_| anyhow!("guess should succeed"))?;
    assert_eq!(token.encode(), sealed("session-4"));
    Ok(())
}

use anyhow::{Result, anyhow};
use fluo_client::{Client, SessionToken};
use serde_json::json;
use std::time::Duration;
use test_support::{can_bind_localhost, idp, sealed};
use uuid::Uuid;
use wiremock::matchers::{body_string, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> Result<Client> {
    let addr = server.address();
    Ok(Client::new(&addr.ip().to_string(), addr.port())?)
}

#[tokio::test]
async fn peeking_rotates_and_the_rotation_chains() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = MockServer::start().await;
    let user_id = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/refresh"))
        .and(body_string(sealed("tok-1")))
        .respond_with(idp::peeked(user_id, &sealed("tok-2")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/refresh"))
        .and(body_string(sealed("tok-2")))
        .respond_with(idp::peeked(user_id, &sealed("tok-3")))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server)?;
    let token = SessionToken::from_encoded(&sealed("tok-1"))?;

    let peeked = client
        .check_token(token)
        .await?
        .map_err(|_| anyhow!("first peek should succeed"))?;
    assert_eq!(peeked.user_id, user_id);
    assert_eq!(peeked.token.encode(), sealed("tok-2"));

    // The replacement behaves exactly as the original did.
    let peeked = client
        .check_token(peeked.token)
        .await?
        .map_err(|_| anyhow!("peeking the replacement should succeed"))?;
    assert_eq!(peeked.user_id, user_id);
    assert_eq!(peeked.token.encode(), sealed("tok-3"));
    Ok(())
}

#[tokio::test]
async fn rejected_peeks_are_opaque() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = MockServer::start().await;

    // Whatever the IdP's reason, the caller learns nothing but "rejected".
    Mock::given(method("POST"))
        .and(path("/refresh"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "detail": "expired at 2026-07-31T00:00:00Z"
        })))
        .mount(&server)
        .await;

    let client = client_for(&server)?;
    let token = SessionToken::from_encoded(&sealed("dead-token"))?;
    let rejection = client.check_token(token).await?;
    assert!(rejection.is_err());
    Ok(())
}

#[tokio::test]
async fn revoking_succeeds_with_no_replacement() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/revoke"))
        .and(body_string(sealed("tok-1")))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server)?;
    let token = SessionToken::from_encoded(&sealed("tok-1"))?;
    client
        .revoke_tokens(token)
        .await?
        .map_err(|_| anyhow!("revocation should succeed"))?;
    Ok(())
}

#[tokio::test]
async fn failed_revocation_may_carry_a_replacement() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/revoke"))
        .respond_with(
            ResponseTemplate::new(412).set_body_json(json!({ "token": sealed("tok-2") })),
        )
        .mount(&server)
        .await;

    let client = client_for(&server)?;
    let token = SessionToken::from_encoded(&sealed("tok-1"))?;
    let failure = client
        .revoke_tokens(token)
        .await?
        .err()
        .ok_or_else(|| anyhow!("expected a failure"))?;
    let replacement = failure
        .into_replacement()
        .ok_or_else(|| anyhow!("expected a replacement token"))?;
    assert_eq!(replacement.encode(), sealed("tok-2"));
    Ok(())
}

#[tokio::test]
async fn failed_revocation_without_a_body_has_no_replacement() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/revoke"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = client_for(&server)?;
    let token = SessionToken::from_encoded(&sealed("tok-1"))?;
    let failure = client
        .revoke_tokens(token)
        .await?
        .err()
        .ok_or_else(|| anyhow!("expected a failure"))?;
    assert!(failure.into_replacement().is_none());
    Ok(())
}

#[tokio::test]
async fn health_probe_reports_both_directions() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let healthy = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "ok" })))
        .mount(&healthy)
        .await;

    let client = client_for(&healthy)?;
    assert!(client.is_healthy(Duration::from_secs(2)).await);

    let unhealthy = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&unhealthy)
        .await;

    let client = client_for(&unhealthy)?;
    assert!(!client.is_healthy(Duration::from_secs(2)).await);
    Ok(())
}

//! Builders for scripting one IdP step at a time.

use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockBuilder, ResponseTemplate};

/// Match one flow operation: POST to `route` with `{"args": {"<op>": ...}}`.
#[must_use]
pub fn step(route: &str, op: &str) -> MockBuilder {
    Mock::given(method("POST"))
        .and(path(format!("/{route}")))
        .and(body_partial_json(json!({ "args": { op: {} } })))
}

/// Refine a [`step`] to requests carrying a specific permit.
#[must_use]
pub fn step_with_permit(route: &str, op: &str, permit: &str) -> MockBuilder {
    step(route, op).and(body_partial_json(json!({ "permit": permit })))
}

/// A `200` envelope response: `{"ret": <ret>, "permit": <permit|null>}`.
#[must_use]
pub fn ok(ret: Value, permit: Option<&str>) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(envelope(ret, permit))
}

/// The raw envelope body, for tests that assert on it directly.
#[must_use]
pub fn envelope(ret: Value, permit: Option<&str>) -> Value {
    json!({ "ret": ret, "permit": permit })
}

/// An empty-bodied response with the given status, for the error taxonomy.
#[must_use]
pub fn status(code: u16) -> ResponseTemplate {
    ResponseTemplate::new(code)
}

/// A peeked-token body for the `refresh` endpoint.
#[must_use]
pub fn peeked(user_id: uuid::Uuid, token: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "user_id": user_id,
        "token": token
    }))
}

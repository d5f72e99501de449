// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::config::test_config;
use crate::error::GatewayError;
use crate::store::SharedStore;
use super::{blacklist_key, client_ip, constant_time_eq, extract_token, Authenticator, Claims};

const SECRET: &str = "test-secret";

fn store() -> SharedStore {
    SharedStore::new(&test_config(), CancellationToken::new())
}

fn production_auth() -> Authenticator {
    Authenticator::new(Some(SECRET.into()), true, store())
}

fn token_with(header: Header, iat: i64, exp: i64, id: &str, email: &str) -> String {
    let claims = Claims {
        id: id.into(),
        email: email.into(),
        name: "Alice".into(),
        image: None,
        iat,
        exp,
    };
    encode(&header, &claims, &EncodingKey::from_secret(SECRET.as_bytes()))
        .unwrap_or_default()
}

fn fresh_token() -> String {
    let now = chrono::Utc::now().timestamp();
    token_with(Header::default(), now - 10, now + 3600, "u1", "alice@x")
}

fn expect_rejected(result: Result<crate::events::UserSnapshot, GatewayError>) -> String {
    match result {
        Err(GatewayError::AuthRejected(detail)) => detail,
        other => panic!("expected AuthRejected, got {other:?}"),
    }
}

#[tokio::test]
async fn valid_token_is_admitted() -> anyhow::Result<()> {
    let user = production_auth().authenticate(Some(&fresh_token())).await?;
    assert_eq!(user.id, "u1");
    assert_eq!(user.email, "alice@x");
    assert_eq!(user.name, "Alice");
    Ok(())
}

#[tokio::test]
async fn missing_token_is_rejected() {
    let detail = expect_rejected(production_auth().authenticate(None).await);
    assert!(detail.contains("missing"));
}

#[tokio::test]
async fn expired_token_is_rejected() {
    let now = chrono::Utc::now().timestamp();
    let token = token_with(Header::default(), now - 7200, now - 3600, "u1", "alice@x");
    expect_rejected(production_auth().authenticate(Some(&token)).await);
}

#[tokio::test]
async fn old_token_is_rejected_even_if_unexpired() {
    let now = chrono::Utc::now().timestamp();
    // Issued two hours ago but expiry pushed far out.
    let token = token_with(Header::default(), now - 7200, now + 3600, "u1", "alice@x");
    let detail = expect_rejected(production_auth().authenticate(Some(&token)).await);
    assert!(detail.contains("hour"));
}

#[tokio::test]
async fn wrong_algorithm_is_rejected() {
    let now = chrono::Utc::now().timestamp();
    let token = token_with(Header::new(Algorithm::HS384), now, now + 3600, "u1", "alice@x");
    expect_rejected(production_auth().authenticate(Some(&token)).await);
}

#[tokio::test]
async fn empty_identity_claims_are_rejected() {
    let now = chrono::Utc::now().timestamp();
    let token = token_with(Header::default(), now, now + 3600, "", "alice@x");
    let detail = expect_rejected(production_auth().authenticate(Some(&token)).await);
    assert!(detail.contains("id or email"));
}

#[tokio::test]
async fn garbage_token_is_rejected() {
    expect_rejected(production_auth().authenticate(Some("not-a-jwt")).await);
}

#[tokio::test]
async fn dev_mode_parses_dot_triple() -> anyhow::Result<()> {
    let auth = Authenticator::new(None, false, store());
    let user = auth.authenticate(Some("u9.bob@x.Bob")).await?;
    assert_eq!(user.id, "u9");
    assert_eq!(user.email, "bob@x");
    assert_eq!(user.name, "Bob");
    Ok(())
}

#[tokio::test]
async fn dev_mode_admits_anonymously_without_token() -> anyhow::Result<()> {
    let auth = Authenticator::new(None, false, store());
    let user = auth.authenticate(None).await?;
    assert!(user.email.starts_with("anon-"));
    assert_eq!(user.name, "Anonymous");
    Ok(())
}

#[tokio::test]
async fn revocation_degrades_open_when_store_is_down() -> anyhow::Result<()> {
    // The disconnected store cannot answer the blacklist lookup; a valid
    // token must still be admitted.
    let user = production_auth().authenticate(Some(&fresh_token())).await?;
    assert_eq!(user.email, "alice@x");
    Ok(())
}

#[test]
fn blacklist_key_is_a_digest() {
    let key = blacklist_key("secret-token");
    assert!(key.starts_with("blacklist:"));
    assert!(!key.contains("secret-token"));
    assert_eq!(key.len(), "blacklist:".len() + 64);
    assert_eq!(key, blacklist_key("secret-token"));
}

#[test]
fn client_ip_prefers_forwarded_header() {
    let peer: std::net::SocketAddr = match "10.1.1.1:9999".parse() {
        Ok(addr) => addr,
        Err(e) => panic!("bad addr: {e}"),
    };
    let mut headers = axum::http::HeaderMap::new();
    assert_eq!(client_ip(&headers, peer), "10.1.1.1");
    headers.insert(
        "x-forwarded-for",
        axum::http::HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
    );
    assert_eq!(client_ip(&headers, peer), "203.0.113.7");
}

#[test]
fn token_extraction_prefers_query_then_header() {
    let mut headers = axum::http::HeaderMap::new();
    assert_eq!(extract_token(&headers, None), None);
    headers.insert("authorization", axum::http::HeaderValue::from_static("Bearer abc"));
    assert_eq!(extract_token(&headers, None).as_deref(), Some("abc"));
    assert_eq!(extract_token(&headers, Some("xyz")).as_deref(), Some("xyz"));
}

#[test]
fn constant_time_eq_basics() {
    assert!(constant_time_eq("k", "k"));
    assert!(!constant_time_eq("k", "K"));
    assert!(!constant_time_eq("k", "kk"));
}

#[tokio::test]
async fn revoke_without_store_reports_failure() {
    let auth = production_auth();
    assert!(auth.revoke(&fresh_token(), None).await.is_err());
}

#[test]
fn revoked_payload_is_json_true() {
    // Shape check for the marker written by revoke().
    assert_eq!(json!(true).to_string(), "true");
}

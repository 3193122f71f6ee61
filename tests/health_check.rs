//! Integration tests for the token authority server

use std::net::TcpListener;
use std::sync::Arc;
use token_authority::auth::{Clock, SessionPolicy, SystemClock, TokenAuthority, TokenCodec};
use token_authority::configuration::{JwtSettings, RateLimitSettings};
use token_authority::startup::run;
use token_authority::store::{InMemoryFamilyStore, InMemoryRevocationCache, InMemoryUserStore};

fn spawn_app() -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let jwt = JwtSettings {
        access_secret: "health-access-secret-0123456789abcdef".to_string(),
        refresh_secret: "health-refresh-secret-0123456789abcdef".to_string(),
        access_token_expiry: 900,
        refresh_token_expiry: 604800,
        issuer: "token-authority".to_string(),
    };
    let authority = TokenAuthority::new(
        TokenCodec::new(&jwt, clock.clone()),
        Arc::new(InMemoryUserStore::new()),
        Arc::new(InMemoryFamilyStore::new()),
        Arc::new(InMemoryRevocationCache::new(clock.clone())),
        clock,
        SessionPolicy::default(),
    );

    let rate_limit = RateLimitSettings {
        requests_per_minute: 10,
    };
    let server = run(listener, Arc::new(authority), &rate_limit)
        .expect("Failed to create server");

    let _ = tokio::spawn(async move {
        let _ = server.await;
    });

    format!("http://127.0.0.1:{}", port)
}

#[tokio::test]
async fn health_check_works() {
    let addr = spawn_app();

    let response = reqwest::Client::new()
        .get(&format!("{}/health_check", addr))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());
    assert_eq!(response.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let addr = spawn_app();

    let response = reqwest::Client::new()
        .get(&format!("{}/nothing-here", addr))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(404, response.status().as_u16());
}

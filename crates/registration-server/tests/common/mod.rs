//! Common test utilities for integration tests.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Request, Response},
    Router,
};
use discord_webhook::DiscordWebhookClient;
use registration_server::{
    api::{create_router, ApiOptions, AppState},
    notifier::{Notifier, RetryPolicy},
    service::RegistrationService,
    store::SqliteStore,
};
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::MockServer;

pub const ADMIN_TOKEN: &str = "test-admin-token";

/// Webhook path registered on the mock Discord server.
pub const WEBHOOK_PATH: &str = "/api/webhooks/123/abc";

/// Router plus a handle on its backing store.
pub struct TestApp {
    pub router: Router,
    pub store: SqliteStore,
}

impl TestApp {
    /// App backed by an in-memory store, notifying `webhook` when given.
    pub async fn new(webhook: Option<&MockServer>) -> Self {
        Self::with_options(webhook, ApiOptions::default()).await
    }

    pub async fn with_options(webhook: Option<&MockServer>, options: ApiOptions) -> Self {
        let store = SqliteStore::in_memory().await.unwrap();

        let client = webhook.map(|server| {
            DiscordWebhookClient::new(
                &format!("{}{}", server.uri(), WEBHOOK_PATH),
                Duration::from_secs(2),
            )
            .unwrap()
            .with_wait(true)
        });
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_unit: Duration::from_millis(10),
        };
        let notifier = Notifier::new(client, policy, Arc::new(store.clone()));

        let token = SecretString::new(ADMIN_TOKEN.to_string());
        let service = RegistrationService::new(store.clone(), notifier, Some(&token));

        Self {
            router: create_router(AppState::new(service), options),
            store,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn get_admin(&self, uri: &str) -> Response<Body> {
        self.send(
            Request::builder()
                .uri(uri)
                .header(header::AUTHORIZATION, format!("Bearer {}", ADMIN_TOKEN))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn post_json(&self, uri: &str, body: serde_json::Value) -> Response<Body> {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }
}

/// Start a mock Discord server.
pub async fn mock_discord_server() -> MockServer {
    MockServer::start().await
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

//! Webhook HTTP client.

use crate::error::WebhookError;
use crate::types::{WebhookPayload, WebhookResponse};
use reqwest::{Client, Url};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Client for a single Discord webhook URL.
#[derive(Clone)]
pub struct DiscordWebhookClient {
    client: Client,
    url: Url,
    wait: bool,
}

impl DiscordWebhookClient {
    /// Create a new webhook client.
    ///
    /// `timeout` bounds every request, connect included.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, WebhookError> {
        let url = Url::parse(url).map_err(|e| WebhookError::InvalidUrl(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(WebhookError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            url,
            wait: false,
        })
    }

    /// Ask Discord to return the created message in the response body.
    pub fn with_wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }

    fn request_url(&self) -> Url {
        let mut url = self.url.clone();
        if self.wait {
            url.query_pairs_mut().append_pair("wait", "true");
        }
        url
    }

    /// Execute the webhook once.
    #[instrument(skip(self, payload), fields(embeds = payload.embeds.len()))]
    pub async fn execute(&self, payload: &WebhookPayload) -> Result<WebhookResponse, WebhookError> {
        let response = self
            .client
            .post(self.request_url())
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        let body = body_or_empty(status.as_u16(), response.text().await);

        if !status.is_success() {
            warn!(status = %status, "Webhook rejected request");
            return Err(WebhookError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
                body,
            });
        }

        debug!(status = %status, "Webhook executed");
        Ok(WebhookResponse {
            status: status.as_u16(),
            body,
        })
    }
}

/// Response body text, empty when it could not be read.
fn body_or_empty(status: u16, body: Result<String, reqwest::Error>) -> String {
    body.unwrap_or_else(|e| {
        warn!(status, error = %e, "Failed to read webhook response body");
        String::new()
    })
}

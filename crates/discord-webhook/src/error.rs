//! Webhook client errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {reason}")]
    Status {
        status: u16,
        reason: String,
        body: String,
    },

    #[error("Invalid webhook URL: {0}")]
    InvalidUrl(String),
}

impl WebhookError {
    /// Whether the request timed out before a response arrived.
    pub fn is_timeout(&self) -> bool {
        matches!(self, WebhookError::Http(e) if e.is_timeout())
    }
}

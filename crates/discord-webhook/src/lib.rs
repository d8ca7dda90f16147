//! Discord webhook client.
//!
//! Builds embed payloads and executes a single POST against a webhook URL.
//! Retrying is left to the caller.

mod client;
mod error;
mod types;

pub use client::DiscordWebhookClient;
pub use error::WebhookError;
pub use types::*;

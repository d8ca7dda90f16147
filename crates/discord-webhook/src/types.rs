//! Discord execute-webhook payload types.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Body of an execute-webhook request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WebhookPayload {
    pub embeds: Vec<Embed>,
}

impl WebhookPayload {
    /// Payload carrying a single embed.
    pub fn with_embed(embed: Embed) -> Self {
        Self {
            embeds: vec![embed],
        }
    }
}

/// A rich embed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Embed {
    pub title: String,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    /// RFC 3339 timestamp shown under the embed
    pub timestamp: String,
    pub footer: EmbedFooter,
}

impl Embed {
    /// Create an embed with no fields.
    pub fn new(title: impl Into<String>, color: u32, timestamp: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            color,
            fields: Vec::new(),
            timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            footer: EmbedFooter::default(),
        }
    }

    /// Append an inline field.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(EmbedField::new(name, value, true));
        self
    }

    /// Append a field rendered on its own row.
    pub fn wide_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(EmbedField::new(name, value, false));
        self
    }

    pub fn footer(mut self, text: impl Into<String>) -> Self {
        self.footer = EmbedFooter { text: text.into() };
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

impl EmbedField {
    pub fn new(name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            inline,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EmbedFooter {
    pub text: String,
}

/// Successful webhook response.
#[derive(Debug, Clone)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Deserialize)]
struct CreatedMessage {
    id: String,
}

impl WebhookResponse {
    /// Id of the created message.
    ///
    /// Discord only returns the message when the webhook is executed with
    /// `wait=true`; otherwise the body is empty and this is `None`.
    pub fn message_id(&self) -> Option<String> {
        serde_json::from_str::<CreatedMessage>(&self.body)
            .ok()
            .map(|m| m.id)
    }
}

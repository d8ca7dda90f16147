//! Registration notifications with bounded retry.
//!
//! Each registration gets one delivery run: up to `max_attempts` POSTs to the
//! webhook, with `backoff_unit * 2^attempt` of sleep after every failed attempt
//! except the last. Every attempt is written to the delivery log before the
//! next one starts.

use crate::store::{AttemptStatus, DeliveryLog, Registration, RegistrationDetails, WebhookStatus};
use chrono::{DateTime, Utc};
use discord_webhook::{DiscordWebhookClient, Embed, WebhookPayload};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

/// Embed title for every registration.
const TITLE: &str = "New Registration";

/// Embed color for players (green).
pub const PLAYER_COLOR: u32 = 0x00ff00;

/// Embed color for guards (red).
pub const GUARD_COLOR: u32 = 0xff0000;

/// Characters of the user agent included in the embed.
const USER_AGENT_LIMIT: usize = 100;

const NOT_AVAILABLE: &str = "N/A";

/// Retry schedule for webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Base of the exponential backoff
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff_unit
            .checked_mul(2u32.saturating_pow(attempt))
            .unwrap_or(Duration::MAX)
    }

    /// Sum of all waits when every attempt fails.
    pub fn total_backoff(&self) -> Duration {
        (1..self.max_attempts)
            .map(|a| self.delay_after(a))
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

/// Result of a delivery run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The webhook accepted the payload.
    Delivered {
        attempts: u32,
        message_id: Option<String>,
    },
    /// Every attempt failed.
    Failed { attempts: u32 },
    /// No webhook URL is configured; nothing was attempted.
    NotConfigured,
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }

    /// Status to store on the registration.
    pub fn webhook_status(&self) -> WebhookStatus {
        if self.is_delivered() {
            WebhookStatus::Sent
        } else {
            WebhookStatus::Failed
        }
    }

    pub fn message_id(&self) -> Option<&str> {
        match self {
            DeliveryOutcome::Delivered { message_id, .. } => message_id.as_deref(),
            _ => None,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            DeliveryOutcome::Delivered { attempts, .. } | DeliveryOutcome::Failed { attempts } => {
                *attempts
            }
            DeliveryOutcome::NotConfigured => 0,
        }
    }
}

fn or_na(value: Option<&str>) -> String {
    value.unwrap_or(NOT_AVAILABLE).to_string()
}

fn truncate_user_agent(user_agent: Option<&str>) -> String {
    match user_agent {
        Some(ua) if !ua.is_empty() => ua.chars().take(USER_AGENT_LIMIT).collect(),
        _ => NOT_AVAILABLE.to_string(),
    }
}

/// Build the webhook payload announcing a registration.
pub fn build_payload(registration: &Registration, issued_at: DateTime<Utc>) -> WebhookPayload {
    let ip = or_na(registration.ip_address.as_deref());
    let user_agent = truncate_user_agent(registration.user_agent.as_deref());

    let embed = match &registration.details {
        RegistrationDetails::Player(player) => Embed::new(TITLE, PLAYER_COLOR, issued_at)
            .field("Role", "Player")
            .field("Name", or_na(player.full_name().as_deref()))
            .field("Class", or_na(player.class.as_deref()))
            .field("IP Address", ip)
            .wide_field("User Agent", user_agent),
        RegistrationDetails::Guard(guard) => Embed::new(TITLE, GUARD_COLOR, issued_at)
            .field("Role", "Guard")
            .field("Name", or_na(guard.guard_name.as_deref()))
            .field("Class", or_na(guard.guard_class.as_deref()))
            .field("Phone", or_na(guard.guard_phone.as_deref()))
            .field("Brings Phone", or_na(guard.brings_phone.map(|v| v.as_str())))
            .field(
                "Willing to Help",
                or_na(guard.willing_to_help.map(|v| v.as_str())),
            )
            .field("IP Address", ip)
            .wide_field("User Agent", user_agent),
    };

    WebhookPayload::with_embed(embed.footer(format!("ID: {}", registration.id)))
}

/// Delivers registration notifications and audits every attempt.
#[derive(Clone)]
pub struct Notifier {
    client: Option<DiscordWebhookClient>,
    policy: RetryPolicy,
    log: Arc<dyn DeliveryLog>,
}

impl Notifier {
    /// Create a notifier. `client` is `None` when no webhook URL is configured.
    pub fn new(
        client: Option<DiscordWebhookClient>,
        policy: RetryPolicy,
        log: Arc<dyn DeliveryLog>,
    ) -> Self {
        Self {
            client,
            policy,
            log,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run delivery for a registration to completion.
    ///
    /// Never returns an error: failures are reported through the outcome
    /// and the delivery log.
    #[instrument(skip(self, registration), fields(registration_id = registration.id, role = %registration.role()))]
    pub async fn deliver(&self, registration: &Registration) -> DeliveryOutcome {
        let Some(client) = &self.client else {
            error!("Webhook URL not configured, notification skipped");
            return DeliveryOutcome::NotConfigured;
        };

        let payload = build_payload(registration, Utc::now());
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match client.execute(&payload).await {
                Ok(response) => {
                    info!(attempt, "Webhook sent successfully");
                    self.record(registration.id, attempt, AttemptStatus::Success, &response.body)
                        .await;
                    return DeliveryOutcome::Delivered {
                        attempts: attempt,
                        message_id: response.message_id(),
                    };
                }
                Err(e) => {
                    warn!(attempt, max_attempts, error = %e, "Webhook attempt failed");
                    self.record(registration.id, attempt, AttemptStatus::Failed, &e.to_string())
                        .await;

                    if attempt < max_attempts {
                        let delay = self.policy.delay_after(attempt);
                        debug!(?delay, "Waiting before next webhook attempt");
                        sleep(delay).await;
                    }
                }
            }
        }

        error!(attempts = max_attempts, "All webhook attempts failed");
        DeliveryOutcome::Failed {
            attempts: max_attempts,
        }
    }

    async fn record(&self, registration_id: i64, attempt: u32, status: AttemptStatus, response: &str) {
        if let Err(e) = self
            .log
            .record_attempt(registration_id, attempt, status, response)
            .await
        {
            error!(registration_id, attempt, error = %e, "Failed to write webhook log");
        }
    }
}

//! Registration store and webhook delivery log.

mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// Role a registrant signs up for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Player,
    Guard,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Player => "player",
            Role::Guard => "guard",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "player" => Some(Role::Player),
            "guard" => Some(Role::Guard),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answer to a yes/no form question.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum YesNo {
    Yes,
    No,
}

impl YesNo {
    pub fn as_str(&self) -> &'static str {
        match self {
            YesNo::Yes => "yes",
            YesNo::No => "no",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "yes" => Some(YesNo::Yes),
            "no" => Some(YesNo::No),
            _ => None,
        }
    }
}

/// Notification delivery state of a registration.
///
/// Starts as `Pending` and moves exactly once to `Sent` or `Failed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Pending,
    Sent,
    Failed,
}

impl WebhookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookStatus::Pending => "pending",
            WebhookStatus::Sent => "sent",
            WebhookStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(WebhookStatus::Pending),
            "sent" => Some(WebhookStatus::Sent),
            "failed" => Some(WebhookStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for WebhookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Success,
    Failed,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Success => "success",
            AttemptStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(AttemptStatus::Success),
            "failed" => Some(AttemptStatus::Failed),
            _ => None,
        }
    }
}

/// Fields submitted by a player.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerDetails {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub class: Option<String>,
    pub phone: Option<String>,
}

impl PlayerDetails {
    /// First and last name joined, if either is present.
    pub fn full_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

/// Fields submitted by a guard.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GuardDetails {
    pub guard_name: Option<String>,
    pub guard_class: Option<String>,
    pub guard_phone: Option<String>,
    pub brings_phone: Option<YesNo>,
    pub willing_to_help: Option<YesNo>,
}

/// Role-specific part of a registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum RegistrationDetails {
    Player(PlayerDetails),
    Guard(GuardDetails),
}

impl RegistrationDetails {
    pub fn role(&self) -> Role {
        match self {
            RegistrationDetails::Player(_) => Role::Player,
            RegistrationDetails::Guard(_) => Role::Guard,
        }
    }
}

/// A validated submission, not yet stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRegistration {
    pub details: RegistrationDetails,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// A stored registration.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub id: i64,
    #[serde(flatten)]
    pub details: RegistrationDetails,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub webhook_status: WebhookStatus,
    pub discord_message_id: Option<String>,
}

impl Registration {
    pub fn role(&self) -> Role {
        self.details.role()
    }
}

/// One row of the delivery audit trail.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryLogEntry {
    pub id: i64,
    pub registration_id: i64,
    /// 1-based attempt number
    pub attempt: u32,
    pub status: AttemptStatus,
    /// Response body on success, error description on failure
    pub response: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Append-only sink for delivery attempts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryLog: Send + Sync {
    /// Record the outcome of one delivery attempt.
    async fn record_attempt(
        &self,
        registration_id: i64,
        attempt: u32,
        status: AttemptStatus,
        response: &str,
    ) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_name() {
        let mut player = PlayerDetails {
            first_name: Some("Ana".into()),
            last_name: Some("Lee".into()),
            ..Default::default()
        };
        assert_eq!(player.full_name().as_deref(), Some("Ana Lee"));

        player.first_name = None;
        assert_eq!(player.full_name().as_deref(), Some("Lee"));

        player.last_name = None;
        assert!(player.full_name().is_none());
    }

    #[test]
    fn test_registration_serialization() {
        let registration = Registration {
            id: 3,
            details: RegistrationDetails::Guard(GuardDetails {
                guard_name: Some("Sam".into()),
                brings_phone: Some(YesNo::Yes),
                ..Default::default()
            }),
            ip_address: Some("10.0.0.1".into()),
            user_agent: None,
            timestamp: Utc::now(),
            webhook_status: WebhookStatus::Sent,
            discord_message_id: None,
        };

        let json = serde_json::to_value(&registration).unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["role"], "guard");
        assert_eq!(json["guardName"], "Sam");
        assert_eq!(json["bringsPhone"], "yes");
        assert_eq!(json["ipAddress"], "10.0.0.1");
        assert_eq!(json["webhookStatus"], "sent");
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            WebhookStatus::Pending,
            WebhookStatus::Sent,
            WebhookStatus::Failed,
        ] {
            assert_eq!(WebhookStatus::parse(status.as_str()), Some(status));
        }
        assert!(WebhookStatus::parse("delivered").is_none());
        assert!(Role::parse("referee").is_none());
    }
}

//! Registration service: persistence, notification and admin reads.

use crate::error::ApiError;
use crate::notifier::Notifier;
use crate::store::{
    DeliveryLogEntry, NewRegistration, Registration, Role, SqliteStore, WebhookStatus,
};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

/// Result of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub id: i64,
    pub webhook_status: WebhookStatus,
}

/// Public view of a registration.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationSummary {
    pub id: i64,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
    pub webhook_status: WebhookStatus,
}

impl From<&Registration> for RegistrationSummary {
    fn from(r: &Registration) -> Self {
        Self {
            id: r.id,
            role: r.role(),
            timestamp: r.timestamp,
            webhook_status: r.webhook_status,
        }
    }
}

/// Hash a secret using SHA-256.
pub fn hash_secret(secret: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Coordinates the store and the notifier for each registration.
#[derive(Clone)]
pub struct RegistrationService {
    store: SqliteStore,
    notifier: Notifier,
    /// SHA-256 of the admin token; `None` disables admin access
    admin_token_hash: Option<String>,
}

impl RegistrationService {
    pub fn new(store: SqliteStore, notifier: Notifier, admin_token: Option<&SecretString>) -> Self {
        let admin_token_hash = admin_token
            .map(|t| t.expose_secret().trim())
            .filter(|t| !t.is_empty())
            .map(hash_secret);

        if admin_token_hash.is_none() {
            warn!("No admin token configured, admin endpoints are disabled");
        }

        Self {
            store,
            notifier,
            admin_token_hash,
        }
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    /// Store a validated registration, notify, and record the delivery status.
    ///
    /// Only the initial insert can fail the call. Notification problems end up
    /// in the stored `webhookStatus` and the delivery log.
    #[instrument(skip(self, registration), fields(role = %registration.details.role()))]
    pub async fn submit(&self, registration: NewRegistration) -> Result<SubmitOutcome, ApiError> {
        let registration = self.store.insert(&registration).await?;
        info!(registration_id = registration.id, "Registration stored");

        let outcome = self.notifier.deliver(&registration).await;
        let webhook_status = outcome.webhook_status();

        let mut recorded = self
            .store
            .finish_delivery(registration.id, webhook_status, outcome.message_id())
            .await;
        if let Err(e) = &recorded {
            warn!(
                registration_id = registration.id,
                error = %e,
                "Failed to record webhook status, retrying once"
            );
            recorded = self
                .store
                .finish_delivery(registration.id, webhook_status, outcome.message_id())
                .await;
        }

        match recorded {
            Ok(true) => info!(
                registration_id = registration.id,
                status = %webhook_status,
                attempts = outcome.attempts(),
                "Webhook status recorded"
            ),
            Ok(false) => warn!(
                registration_id = registration.id,
                "Registration no longer pending, status left unchanged"
            ),
            Err(e) => error!(
                registration_id = registration.id,
                status = %webhook_status,
                error = %e,
                "Failed to record webhook status, row left pending"
            ),
        }

        Ok(SubmitOutcome {
            id: registration.id,
            webhook_status,
        })
    }

    /// Look up a registration.
    pub async fn get(&self, id: i64) -> Result<RegistrationSummary, ApiError> {
        let registration = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(id.to_string()))?;
        Ok(RegistrationSummary::from(&registration))
    }

    /// Check a bearer credential against the admin token.
    pub fn authorize(&self, credential: Option<&str>) -> Result<(), ApiError> {
        match (&self.admin_token_hash, credential) {
            (Some(expected), Some(provided)) if hash_secret(provided) == *expected => Ok(()),
            _ => {
                warn!("Rejected admin request");
                Err(ApiError::Unauthorized)
            }
        }
    }

    /// Every registration, newest first. Admin only.
    pub async fn list_all(&self, credential: Option<&str>) -> Result<Vec<Registration>, ApiError> {
        self.authorize(credential)?;
        Ok(self.store.list_all().await?)
    }

    /// Delivery audit trail of one registration. Admin only.
    pub async fn delivery_log(
        &self,
        id: i64,
        credential: Option<&str>,
    ) -> Result<Vec<DeliveryLogEntry>, ApiError> {
        self.authorize(credential)?;
        if self.store.get(id).await?.is_none() {
            return Err(ApiError::NotFound(id.to_string()));
        }
        Ok(self.store.delivery_logs(id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::RetryPolicy;
    use crate::store::{AttemptStatus, PlayerDetails, RegistrationDetails};
    use discord_webhook::DiscordWebhookClient;
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn new_player() -> NewRegistration {
        NewRegistration {
            details: RegistrationDetails::Player(PlayerDetails {
                first_name: Some("Ana".into()),
                last_name: Some("Lee".into()),
                class: Some("5A".into()),
                phone: None,
            }),
            ip_address: Some("127.0.0.1".into()),
            user_agent: None,
        }
    }

    async fn service(webhook_url: Option<String>, admin: Option<&str>) -> RegistrationService {
        let store = SqliteStore::in_memory().await.unwrap();
        let client = webhook_url
            .map(|url| DiscordWebhookClient::new(&url, Duration::from_secs(2)).unwrap());
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_unit: Duration::from_millis(5),
        };
        let notifier = Notifier::new(client, policy, Arc::new(store.clone()));
        let token = admin.map(|t| SecretString::new(t.to_string()));
        RegistrationService::new(store, notifier, token.as_ref())
    }

    #[test]
    fn test_hash_secret() {
        let hash1 = hash_secret("test");
        let hash2 = hash_secret("test");
        let hash3 = hash_secret("different");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 64);
    }

    #[tokio::test]
    async fn test_submit_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let service = service(Some(server.uri()), None).await;
        let outcome = tokio_test::assert_ok!(service.submit(new_player()).await);
        assert_eq!(outcome.webhook_status, WebhookStatus::Sent);

        let summary = service.get(outcome.id).await.unwrap();
        assert_eq!(summary.webhook_status, WebhookStatus::Sent);
        assert_eq!(summary.role, Role::Player);
    }

    #[tokio::test]
    async fn test_submit_without_webhook_fails_without_logs() {
        let service = service(None, None).await;

        let outcome = service.submit(new_player()).await.unwrap();
        assert_eq!(outcome.webhook_status, WebhookStatus::Failed);

        let stored = service.store().get(outcome.id).await.unwrap().unwrap();
        assert_eq!(stored.webhook_status, WebhookStatus::Failed);
        assert!(service
            .store()
            .delivery_logs(outcome.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_submit_exhausted_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let service = service(Some(server.uri()), None).await;
        let outcome = service.submit(new_player()).await.unwrap();
        assert_eq!(outcome.webhook_status, WebhookStatus::Failed);

        let logs = service.store().delivery_logs(outcome.id).await.unwrap();
        assert_eq!(logs.len(), 3);
        assert!(logs.iter().all(|l| l.status == AttemptStatus::Failed));
    }

    #[tokio::test]
    async fn test_get_not_found() {
        let service = service(None, None).await;
        assert!(matches!(service.get(77).await, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_admin_authorization() {
        let service = service(None, Some("s3cret")).await;
        service.submit(new_player()).await.unwrap();

        assert!(matches!(
            service.list_all(None).await,
            Err(ApiError::Unauthorized)
        ));
        assert!(matches!(
            service.list_all(Some("wrong")).await,
            Err(ApiError::Unauthorized)
        ));
        assert_eq!(service.list_all(Some("s3cret")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_admin_disabled_without_token() {
        let service = service(None, Some("   ")).await;
        assert!(matches!(
            service.list_all(Some("")).await,
            Err(ApiError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_delivery_log_unknown_registration() {
        let service = service(None, Some("s3cret")).await;
        assert!(matches!(
            service.delivery_log(5, Some("s3cret")).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_status_write_failure_still_reports_outcome() {
        let service = service(None, None).await;
        sqlx::query(
            r#"
            CREATE TRIGGER block_status BEFORE UPDATE OF webhookStatus ON registrations
            BEGIN
                SELECT RAISE(ABORT, 'status locked');
            END
            "#,
        )
        .execute(service.store().pool())
        .await
        .unwrap();

        let outcome = service.submit(new_player()).await.unwrap();
        assert_eq!(outcome.webhook_status, WebhookStatus::Failed);

        // Both writes were rejected
        let stored = service.store().get(outcome.id).await.unwrap().unwrap();
        assert_eq!(stored.webhook_status, WebhookStatus::Pending);
    }
}

//! SQLite-backed registration store.

use super::{
    AttemptStatus, DeliveryLog, DeliveryLogEntry, GuardDetails, NewRegistration, PlayerDetails,
    Registration, RegistrationDetails, Role, StoreError, WebhookStatus, YesNo,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{FromRow, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Busy timeout before a locked write gives up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Registration store on a SQLite connection pool.
///
/// Cloning is cheap; clones share the pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

#[derive(Debug, FromRow)]
#[sqlx(rename_all = "camelCase")]
struct RegistrationRow {
    id: i64,
    role: String,
    first_name: Option<String>,
    last_name: Option<String>,
    class: Option<String>,
    phone: Option<String>,
    brings_phone: Option<String>,
    willing_to_help: Option<String>,
    guard_name: Option<String>,
    guard_class: Option<String>,
    guard_phone: Option<String>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    timestamp: DateTime<Utc>,
    webhook_status: String,
    discord_message_id: Option<String>,
}

#[derive(Debug, FromRow)]
#[sqlx(rename_all = "camelCase")]
struct DeliveryLogRow {
    id: i64,
    registration_id: i64,
    attempt: i64,
    status: String,
    response: Option<String>,
    timestamp: DateTime<Utc>,
}

fn parse_yes_no(value: Option<String>) -> Option<YesNo> {
    value.as_deref().and_then(YesNo::parse)
}

impl TryFrom<RegistrationRow> for Registration {
    type Error = StoreError;

    fn try_from(row: RegistrationRow) -> Result<Self, Self::Error> {
        let role = Role::parse(&row.role).ok_or_else(|| {
            StoreError::Corrupt(format!("registration {} has role '{}'", row.id, row.role))
        })?;
        let webhook_status = WebhookStatus::parse(&row.webhook_status).ok_or_else(|| {
            StoreError::Corrupt(format!(
                "registration {} has webhook status '{}'",
                row.id, row.webhook_status
            ))
        })?;

        let details = match role {
            Role::Player => RegistrationDetails::Player(PlayerDetails {
                first_name: row.first_name,
                last_name: row.last_name,
                class: row.class,
                phone: row.phone,
            }),
            Role::Guard => RegistrationDetails::Guard(GuardDetails {
                guard_name: row.guard_name,
                guard_class: row.guard_class,
                guard_phone: row.guard_phone,
                brings_phone: parse_yes_no(row.brings_phone),
                willing_to_help: parse_yes_no(row.willing_to_help),
            }),
        };

        Ok(Registration {
            id: row.id,
            details,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            timestamp: row.timestamp,
            webhook_status,
            discord_message_id: row.discord_message_id,
        })
    }
}

impl TryFrom<DeliveryLogRow> for DeliveryLogEntry {
    type Error = StoreError;

    fn try_from(row: DeliveryLogRow) -> Result<Self, Self::Error> {
        let status = AttemptStatus::parse(&row.status).ok_or_else(|| {
            StoreError::Corrupt(format!("webhook log {} has status '{}'", row.id, row.status))
        })?;
        let attempt = u32::try_from(row.attempt).map_err(|_| {
            StoreError::Corrupt(format!("webhook log {} has attempt {}", row.id, row.attempt))
        })?;

        Ok(DeliveryLogEntry {
            id: row.id,
            registration_id: row.registration_id,
            attempt,
            status,
            response: row.response,
            timestamp: row.timestamp,
        })
    }
}

/// Timestamps are stored as fixed-width RFC 3339 text so they sort lexically.
fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl SqliteStore {
    /// Open (creating if needed) the database at `database_url` and apply migrations.
    pub async fn open(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;

        info!(
            "Database pool opened at {} ({} max connections)",
            database_url, max_connections
        );

        Self::from_pool(pool).await
    }

    /// Private in-memory database on a single long-lived connection.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        debug!("Database migrations applied");
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Wait for checked-out connections to return, then close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database pool closed");
    }

    /// Store a new registration with `pending` webhook status.
    #[instrument(skip(self, new), fields(role = %new.details.role()))]
    pub async fn insert(&self, new: &NewRegistration) -> Result<Registration, StoreError> {
        let timestamp = Utc::now().trunc_subsecs(6);
        let (player, guard) = match &new.details {
            RegistrationDetails::Player(p) => (Some(p), None),
            RegistrationDetails::Guard(g) => (None, Some(g)),
        };

        let result = sqlx::query(
            r#"
            INSERT INTO registrations (
                role, firstName, lastName, class, phone,
                bringsPhone, willingToHelp, guardName, guardClass, guardPhone,
                ipAddress, userAgent, timestamp, webhookStatus
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(new.details.role().as_str())
        .bind(player.and_then(|p| p.first_name.as_deref()))
        .bind(player.and_then(|p| p.last_name.as_deref()))
        .bind(player.and_then(|p| p.class.as_deref()))
        .bind(player.and_then(|p| p.phone.as_deref()))
        .bind(guard.and_then(|g| g.brings_phone).map(|v| v.as_str()))
        .bind(guard.and_then(|g| g.willing_to_help).map(|v| v.as_str()))
        .bind(guard.and_then(|g| g.guard_name.as_deref()))
        .bind(guard.and_then(|g| g.guard_class.as_deref()))
        .bind(guard.and_then(|g| g.guard_phone.as_deref()))
        .bind(new.ip_address.as_deref())
        .bind(new.user_agent.as_deref())
        .bind(encode_timestamp(&timestamp))
        .bind(WebhookStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!(registration_id = id, "Registration stored");

        Ok(Registration {
            id,
            details: new.details.clone(),
            ip_address: new.ip_address.clone(),
            user_agent: new.user_agent.clone(),
            timestamp,
            webhook_status: WebhookStatus::Pending,
            discord_message_id: None,
        })
    }

    /// Fetch a registration by id.
    pub async fn get(&self, id: i64) -> Result<Option<Registration>, StoreError> {
        sqlx::query_as::<_, RegistrationRow>("SELECT * FROM registrations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Registration::try_from)
            .transpose()
    }

    /// All registrations, newest first.
    pub async fn list_all(&self) -> Result<Vec<Registration>, StoreError> {
        sqlx::query_as::<_, RegistrationRow>(
            "SELECT * FROM registrations ORDER BY timestamp DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Registration::try_from)
        .collect()
    }

    /// Record the final delivery status.
    ///
    /// Only rows still `pending` are updated. Returns whether the row changed.
    #[instrument(skip(self))]
    pub async fn finish_delivery(
        &self,
        id: i64,
        status: WebhookStatus,
        discord_message_id: Option<&str>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE registrations SET
                webhookStatus = ?,
                discordMessageId = ?
            WHERE id = ? AND webhookStatus = 'pending'
            "#,
        )
        .bind(status.as_str())
        .bind(discord_message_id)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Delivery attempts for a registration, in attempt order.
    pub async fn delivery_logs(
        &self,
        registration_id: i64,
    ) -> Result<Vec<DeliveryLogEntry>, StoreError> {
        sqlx::query_as::<_, DeliveryLogRow>(
            "SELECT * FROM webhook_logs WHERE registrationId = ? ORDER BY attempt, id",
        )
        .bind(registration_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(DeliveryLogEntry::try_from)
        .collect()
    }
}

#[async_trait]
impl DeliveryLog for SqliteStore {
    async fn record_attempt(
        &self,
        registration_id: i64,
        attempt: u32,
        status: AttemptStatus,
        response: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO webhook_logs (registrationId, attempt, status, response, timestamp)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(registration_id)
        .bind(i64::from(attempt))
        .bind(status.as_str())
        .bind(response)
        .bind(encode_timestamp(&Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(first: &str) -> NewRegistration {
        NewRegistration {
            details: RegistrationDetails::Player(PlayerDetails {
                first_name: Some(first.into()),
                last_name: Some("Lee".into()),
                class: Some("5A".into()),
                phone: None,
            }),
            ip_address: Some("127.0.0.1".into()),
            user_agent: Some("test-agent".into()),
        }
    }

    fn guard() -> NewRegistration {
        NewRegistration {
            details: RegistrationDetails::Guard(GuardDetails {
                guard_name: Some("Sam".into()),
                guard_class: None,
                guard_phone: Some("555-1234".into()),
                brings_phone: Some(YesNo::Yes),
                willing_to_help: Some(YesNo::No),
            }),
            ip_address: None,
            user_agent: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = SqliteStore::in_memory().await.unwrap();

        let inserted = store.insert(&guard()).await.unwrap();
        assert_eq!(inserted.webhook_status, WebhookStatus::Pending);

        let fetched = store.get(inserted.id).await.unwrap().unwrap();
        assert_eq!(fetched, inserted);
        assert_eq!(fetched.role(), Role::Guard);

        assert!(store.get(inserted.id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ids_are_monotonic() {
        let store = SqliteStore::in_memory().await.unwrap();

        let first = store.insert(&player("Ana")).await.unwrap();
        let second = store.insert(&player("Ben")).await.unwrap();
        assert!(second.id > first.id);
    }

    #[tokio::test]
    async fn test_list_all_newest_first() {
        let store = SqliteStore::in_memory().await.unwrap();

        let a = store.insert(&player("Ana")).await.unwrap();
        let b = store.insert(&guard()).await.unwrap();
        let c = store.insert(&player("Cy")).await.unwrap();

        let ids: Vec<i64> = store
            .list_all()
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![c.id, b.id, a.id]);
    }

    #[tokio::test]
    async fn test_finish_delivery_transitions_once() {
        let store = SqliteStore::in_memory().await.unwrap();
        let registration = store.insert(&player("Ana")).await.unwrap();

        assert!(store
            .finish_delivery(registration.id, WebhookStatus::Sent, Some("42"))
            .await
            .unwrap());
        assert!(!store
            .finish_delivery(registration.id, WebhookStatus::Failed, None)
            .await
            .unwrap());

        let fetched = store.get(registration.id).await.unwrap().unwrap();
        assert_eq!(fetched.webhook_status, WebhookStatus::Sent);
        assert_eq!(fetched.discord_message_id.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn test_delivery_log() {
        let store = SqliteStore::in_memory().await.unwrap();
        let registration = store.insert(&guard()).await.unwrap();

        store
            .record_attempt(registration.id, 1, AttemptStatus::Failed, "HTTP 500: Internal Server Error")
            .await
            .unwrap();
        store
            .record_attempt(registration.id, 2, AttemptStatus::Success, "")
            .await
            .unwrap();

        let logs = store.delivery_logs(registration.id).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].attempt, 1);
        assert_eq!(logs[0].status, AttemptStatus::Failed);
        assert_eq!(logs[1].status, AttemptStatus::Success);
        assert!(logs.iter().all(|l| l.registration_id == registration.id));
    }

    #[tokio::test]
    async fn test_delivery_log_requires_registration() {
        let store = SqliteStore::in_memory().await.unwrap();

        let result = store
            .record_attempt(999, 1, AttemptStatus::Failed, "nope")
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_reopen_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("registrations.db").display());

        let id = {
            let store = SqliteStore::open(&url, 2).await.unwrap();
            let id = store.insert(&player("Ana")).await.unwrap().id;
            store.close().await;
            id
        };

        let store = SqliteStore::open(&url, 2).await.unwrap();
        let fetched = store.get(id).await.unwrap().unwrap();
        assert_eq!(fetched.webhook_status, WebhookStatus::Pending);
        store.close().await;
    }
}

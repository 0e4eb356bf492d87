use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row, Sqlite, Transaction};

use salescope_core::clock::{Clock, SystemClock};
use salescope_core::domain::message::{MessageContent, Role};
use salescope_core::domain::session::{SessionEntry, SessionId};

use super::{decode_timestamp, encode_timestamp, PendingEntry, RepositoryError, SessionStore};
use crate::DbPool;

/// SQLite-backed session log. Expired sessions are dropped lazily on access
/// and in bulk by [`SqlSessionStore::purge_expired`].
pub struct SqlSessionStore {
    pool: DbPool,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl SqlSessionStore {
    pub fn new(pool: DbPool, ttl: Duration) -> Self {
        Self::with_clock(pool, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: DbPool, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { pool, ttl, clock }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Removes every expired session and its messages. Returns the number of
    /// sessions removed.
    pub async fn purge_expired(&self) -> Result<u64, RepositoryError> {
        let now = encode_timestamp(self.clock.now());
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM chat_message
             WHERE session_id IN (SELECT id FROM chat_session WHERE expires_at <= ?1)",
        )
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        let removed = sqlx::query("DELETE FROM chat_session WHERE expires_at <= ?1")
            .bind(&now)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(removed)
    }

    async fn evict_if_expired(
        tx: &mut Transaction<'_, Sqlite>,
        session_id: &SessionId,
        now: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "DELETE FROM chat_message
             WHERE session_id IN (SELECT id FROM chat_session WHERE id = ?1 AND expires_at <= ?2)",
        )
        .bind(session_id.as_str())
        .bind(now)
        .execute(&mut **tx)
        .await?;
        sqlx::query("DELETE FROM chat_session WHERE id = ?1 AND expires_at <= ?2")
            .bind(session_id.as_str())
            .bind(now)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn live_expiry(
        &self,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, RepositoryError> {
        let now = encode_timestamp(now);
        let mut tx = self.pool.begin().await?;
        Self::evict_if_expired(&mut tx, session_id, &now).await?;
        let expires_at: Option<String> =
            sqlx::query_scalar("SELECT expires_at FROM chat_session WHERE id = ?1")
                .bind(session_id.as_str())
                .fetch_optional(&mut *tx)
                .await?;
        tx.commit().await?;

        expires_at.as_deref().map(decode_timestamp).transpose()
    }
}

#[async_trait]
impl SessionStore for SqlSessionStore {
    async fn exists(&self, session_id: &SessionId) -> Result<bool, RepositoryError> {
        Ok(self.live_expiry(session_id, self.clock.now()).await?.is_some())
    }

    async fn append_exchange(
        &self,
        session_id: &SessionId,
        entries: Vec<PendingEntry>,
    ) -> Result<(), RepositoryError> {
        if entries.is_empty() {
            return Ok(());
        }

        let now = self.clock.now();
        let now_text = encode_timestamp(now);
        let expires_at = encode_timestamp(now + self.ttl);
        let encoded = entries
            .iter()
            .map(|entry| {
                let content_json = serde_json::to_string(&entry.content)?;
                let metadata_json =
                    entry.metadata.as_ref().map(serde_json::to_string).transpose()?;
                Ok((entry.role.as_str(), content_json, metadata_json))
            })
            .collect::<Result<Vec<_>, serde_json::Error>>()
            .map_err(|error| RepositoryError::Encode(error.to_string()))?;

        let mut tx = self.pool.begin().await?;
        Self::evict_if_expired(&mut tx, session_id, &now_text).await?;

        sqlx::query(
            "INSERT INTO chat_session (id, created_at, updated_at, expires_at)
             VALUES (?1, ?2, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                updated_at = excluded.updated_at,
                expires_at = excluded.expires_at",
        )
        .bind(session_id.as_str())
        .bind(&now_text)
        .bind(&expires_at)
        .execute(&mut *tx)
        .await?;

        for (role, content_json, metadata_json) in encoded {
            sqlx::query(
                "INSERT INTO chat_message (session_id, role, content_json, metadata_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(session_id.as_str())
            .bind(role)
            .bind(content_json)
            .bind(metadata_json)
            .bind(&now_text)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list(&self, session_id: &SessionId) -> Result<Vec<SessionEntry>, RepositoryError> {
        let now = encode_timestamp(self.clock.now());
        let mut tx = self.pool.begin().await?;
        Self::evict_if_expired(&mut tx, session_id, &now).await?;

        let rows = sqlx::query(
            "SELECT role, content_json, metadata_json, created_at
             FROM chat_message
             WHERE session_id = ?1
             ORDER BY id ASC",
        )
        .bind(session_id.as_str())
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn clear(&self, session_id: &SessionId) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chat_message WHERE session_id = ?1")
            .bind(session_id.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chat_session WHERE id = ?1")
            .bind(session_id.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn ttl_remaining(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<Duration>, RepositoryError> {
        let now = self.clock.now();
        Ok(self.live_expiry(session_id, now).await?.map(|expires_at| expires_at - now))
    }
}

fn entry_from_row(row: &SqliteRow) -> Result<SessionEntry, RepositoryError> {
    let role_raw: String = row.try_get("role")?;
    let role = role_raw.parse::<Role>().map_err(RepositoryError::Decode)?;

    let content_raw: String = row.try_get("content_json")?;
    let content = serde_json::from_str::<MessageContent>(&content_raw)
        .map_err(|error| RepositoryError::Decode(format!("message content: {error}")))?;

    let metadata = row
        .try_get::<Option<String>, _>("metadata_json")?
        .map(|raw| serde_json::from_str::<Value>(&raw))
        .transpose()
        .map_err(|error| RepositoryError::Decode(format!("message metadata: {error}")))?;

    let created_at: String = row.try_get("created_at")?;

    Ok(SessionEntry { role, content, metadata, created_at: decode_timestamp(&created_at)? })
}

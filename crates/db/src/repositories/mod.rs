use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::Value;
use thiserror::Error;

use salescope_core::domain::forecast::{ForecastMetric, SeriesPoint};
use salescope_core::domain::message::{MessageContent, Role};
use salescope_core::domain::session::{format_history, SessionEntry, SessionId};

pub mod memory;
pub mod sales;
pub mod session;

pub use memory::InMemorySessionStore;
pub use sales::{ProductSummary, SqlSalesRepository};
pub use session::SqlSessionStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("encode error: {0}")]
    Encode(String),
}

/// A message waiting to be written by [`SessionStore::append_exchange`].
#[derive(Clone, Debug, PartialEq)]
pub struct PendingEntry {
    pub role: Role,
    pub content: MessageContent,
    pub metadata: Option<Value>,
}

impl PendingEntry {
    pub fn new(role: Role, content: impl Into<MessageContent>) -> Self {
        Self { role, content: content.into(), metadata: None }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Append-only, TTL-bound message log per session.
///
/// A session that was never written, or whose TTL has lapsed, behaves as an
/// empty session: `exists` is false and `list` is empty. Every write
/// refreshes the TTL to the full window in the same critical section that
/// stores the messages.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn exists(&self, session_id: &SessionId) -> Result<bool, RepositoryError>;

    async fn append(
        &self,
        session_id: &SessionId,
        role: Role,
        content: MessageContent,
        metadata: Option<Value>,
    ) -> Result<(), RepositoryError> {
        self.append_exchange(session_id, vec![PendingEntry { role, content, metadata }]).await
    }

    /// Stores every entry, in order, or none of them.
    async fn append_exchange(
        &self,
        session_id: &SessionId,
        entries: Vec<PendingEntry>,
    ) -> Result<(), RepositoryError>;

    async fn list(&self, session_id: &SessionId) -> Result<Vec<SessionEntry>, RepositoryError>;

    async fn clear(&self, session_id: &SessionId) -> Result<(), RepositoryError>;

    async fn ttl_remaining(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<Duration>, RepositoryError>;

    async fn formatted_history(&self, session_id: &SessionId) -> Result<String, RepositoryError> {
        Ok(format_history(&self.list(session_id).await?))
    }
}

/// Read access to the monthly sales history used by forecasting.
#[async_trait]
pub trait SalesRepository: Send + Sync {
    async fn product_catalogue(&self) -> Result<Vec<ProductSummary>, RepositoryError>;

    /// Monthly totals for one product, or for every product summed under the
    /// aggregate series id when `product_id` is `None`. Ordered by period.
    async fn monthly_series(
        &self,
        product_id: Option<&str>,
        metric: ForecastMetric,
    ) -> Result<Vec<SeriesPoint>, RepositoryError>;
}

pub(crate) fn encode_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("invalid timestamp `{raw}`: {error}")))
}

//! Session-store adapter: reading prior exchanges into a prompt and
//! recording a finished turn.

use std::sync::Arc;

use serde_json::json;

use salescope_core::domain::intent::Route;
use salescope_core::domain::message::{MessageContent, Role};
use salescope_core::domain::session::{format_history, SessionId};
use salescope_core::errors::DomainError;
use salescope_db::{PendingEntry, RepositoryError, SessionStore};

/// Checks an inbound user message. Empty text is accepted here; the
/// classifier decides what an empty turn means.
pub fn validate_message(text: &str, max_chars: usize) -> Result<(), DomainError> {
    let length = text.chars().count();
    if length > max_chars {
        return Err(DomainError::InvalidMessage(format!(
            "message is {length} characters long; the limit is {max_chars}"
        )));
    }
    if text.contains('\0') {
        return Err(DomainError::InvalidMessage("message contains a NUL character".to_string()));
    }
    Ok(())
}

#[derive(Clone)]
pub struct ConversationLog {
    store: Arc<dyn SessionStore>,
    window: usize,
}

impl ConversationLog {
    pub fn new(store: Arc<dyn SessionStore>, window: usize) -> Self {
        Self { store, window }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// The last `window` successful entries rendered as `ROLE: text` lines,
    /// or `None` for a new or empty session.
    pub async fn recent_history(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<String>, RepositoryError> {
        let entries = self.store.list(session_id).await?;
        let kept = entries.into_iter().filter(|entry| !entry.is_error()).collect::<Vec<_>>();
        let start = kept.len().saturating_sub(self.window);
        let rendered = format_history(&kept[start..]);
        Ok((!rendered.trim().is_empty()).then_some(rendered))
    }

    /// Appends the user message and the assistant reply as one write: both
    /// are stored and the session TTL refreshed, or nothing is.
    pub async fn record_exchange(
        &self,
        session_id: &SessionId,
        user_text: &str,
        reply: MessageContent,
        route: Option<Route>,
        is_error: bool,
    ) -> Result<(), RepositoryError> {
        let route = route.map(|route| route.name());
        let exchange = vec![
            PendingEntry::new(Role::User, user_text),
            PendingEntry::new(Role::Assistant, reply)
                .with_metadata(json!({ "route": route, "is_error": is_error })),
        ];
        self.store.append_exchange(session_id, exchange).await
    }
}

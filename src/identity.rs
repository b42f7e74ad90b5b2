//! Session identity bootstrap
//!
//! The backend assigns a user id per session. [`SessionIdentity`] fetches it
//! once and caches it; when the fetch fails the session falls back to a
//! locally generated id so turns can still be submitted.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::services::HistoryService;

/// Lazily fetched, cached session user id
pub struct SessionIdentity {
    history: Arc<dyn HistoryService>,
    cached: RwLock<Option<String>>,
}

impl SessionIdentity {
    /// Create an identity backed by the given history service
    #[must_use]
    pub fn new(history: Arc<dyn HistoryService>) -> Self {
        Self {
            history,
            cached: RwLock::new(None),
        }
    }

    /// The session user id, fetching and caching it on first use
    ///
    /// A failed fetch caches a `temp_<millis>` fallback id; the session keeps
    /// one identity either way.
    pub async fn user_id(&self) -> String {
        {
            let guard = self.cached.read().await;
            if let Some(id) = guard.as_ref() {
                return id.clone();
            }
        }

        let mut guard = self.cached.write().await;
        if let Some(id) = guard.as_ref() {
            return id.clone();
        }

        let id = match self.history.fetch_user_id().await {
            Ok(id) => {
                tracing::debug!(user_id = %id, "session user id fetched");
                id
            }
            Err(e) => {
                let fallback = format!("temp_{}", chrono::Utc::now().timestamp_millis());
                tracing::warn!(error = %e, user_id = %fallback, "user id fetch failed, using local fallback");
                fallback
            }
        };
        *guard = Some(id.clone());
        id
    }
}

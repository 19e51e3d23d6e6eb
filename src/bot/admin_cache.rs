//! Cached chat administrator roster.
//!
//! Admin checks happen on every moderated message and every command, so
//! the roster is fetched at most once per TTL per chat. A fetch failure
//! denies admin status rather than granting it.

use crate::transport::ChatTransport;
use moka::future::Cache;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Per-chat administrator set with TTL-based refresh.
pub struct AdminRoster {
    cache: Cache<i64, Arc<HashSet<i64>>>,
}

impl AdminRoster {
    /// Create a roster cache with the given refresh interval.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Cache::builder().time_to_live(ttl).build(),
        }
    }

    /// Whether `user_id` currently administers `chat_id`. Fails closed.
    pub async fn is_admin(
        &self,
        transport: &dyn ChatTransport,
        chat_id: i64,
        user_id: i64,
    ) -> bool {
        if let Some(roster) = self.cache.get(&chat_id).await {
            return roster.contains(&user_id);
        }
        match transport.administrators(chat_id).await {
            Ok(roster) => {
                let roster = Arc::new(roster);
                self.cache.insert(chat_id, Arc::clone(&roster)).await;
                roster.contains(&user_id)
            }
            Err(e) => {
                warn!(chat_id, "failed to fetch administrators: {e}");
                false
            }
        }
    }
}

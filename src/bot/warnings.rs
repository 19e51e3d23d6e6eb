//! Enforcement of rejected submissions.
//!
//! Every message of a rejected submission is deleted, then a short-lived
//! warning is posted into the same topic. Warnings to the same user are
//! suppressed for a window so an album or a burst of violations does not
//! flood the chat; deletions always happen regardless of suppression.

use crate::moderation::policy::{Submission, Violation};
use crate::transport::ChatTransport;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Deletes violating messages and posts auto-expiring warnings.
pub struct WarningService {
    suppression: Cache<i64, ()>,
    warning_ttl: Duration,
}

impl WarningService {
    /// Create a service. `suppress_window` bounds repeat warnings per user;
    /// `warning_ttl` is how long a posted warning stays in the chat.
    #[must_use]
    pub fn new(suppress_window: Duration, warning_ttl: Duration) -> Self {
        Self {
            suppression: Cache::builder().time_to_live(suppress_window).build(),
            warning_ttl,
        }
    }

    /// Delete the submission's messages and warn the author.
    pub async fn enforce(
        &self,
        transport: &Arc<dyn ChatTransport>,
        submission: &Submission,
        violation: &Violation,
    ) {
        for message in &submission.messages {
            transport.delete_message(*message).await;
        }

        if self.suppression.contains_key(&submission.user_id) {
            debug!(user_id = submission.user_id, "warning suppressed");
            return;
        }

        let text = violation.warning_text(&submission.mention());
        match transport
            .send_to_thread(submission.chat_id, submission.thread_id, &text)
            .await
        {
            Ok(warning) => {
                // Suppress only once the warning is actually in the chat; a
                // failed send leaves the user eligible for the next attempt.
                self.suppression.insert(submission.user_id, ()).await;
                let transport = Arc::clone(transport);
                let ttl = self.warning_ttl;
                tokio::spawn(async move {
                    tokio::time::sleep(ttl).await;
                    transport.delete_message(warning).await;
                });
            }
            Err(e) => {
                warn!(
                    chat_id = submission.chat_id,
                    user_id = submission.user_id,
                    "failed to post warning: {e}"
                );
            }
        }
    }
}

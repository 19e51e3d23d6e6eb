//! Media-group (album) aggregation.
//!
//! Telegram delivers an album as separate messages sharing a media group
//! id. Parts are buffered and a quiet-period timer restarts on every new
//! part; once the group goes quiet it settles into a single [`Submission`]
//! and is handed to the moderation channel exactly once. Parts arriving
//! after settlement are reported so the caller can treat them standalone.

use crate::moderation::policy::Submission;
use moka::future::Cache;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Settled group ids are remembered for this long so stragglers are
/// recognized instead of silently re-opening the group.
const RESOLVED_TTL: Duration = Duration::from_secs(300);

/// What happened to a part handed to [`MediaGroupAggregator::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The part was merged into a pending group
    Buffered,
    /// The group already settled; treat the part as a standalone message
    AlreadyResolved,
}

struct PendingGroup {
    submission: Submission,
    timer: CancellationToken,
}

/// Debouncing collector that turns album parts into one submission.
pub struct MediaGroupAggregator {
    quiet_period: Duration,
    pending: Mutex<HashMap<String, PendingGroup>>,
    resolved: Cache<String, ()>,
    output: mpsc::Sender<Submission>,
}

impl MediaGroupAggregator {
    /// Create an aggregator that emits settled groups into `output`.
    #[must_use]
    pub fn new(quiet_period: Duration, output: mpsc::Sender<Submission>) -> Self {
        Self {
            quiet_period,
            pending: Mutex::new(HashMap::new()),
            resolved: Cache::builder().time_to_live(RESOLVED_TTL).build(),
            output,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingGroup>> {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Merge one album part into its group and restart the quiet timer.
    pub async fn add(self: &Arc<Self>, group_id: &str, part: Submission) -> AddOutcome {
        if self.resolved.contains_key(group_id) {
            return AddOutcome::AlreadyResolved;
        }

        let token = CancellationToken::new();
        {
            let mut pending = self.lock();
            // Re-check under the lock: the group may have settled while we
            // were waiting for it.
            if self.resolved.contains_key(group_id) {
                return AddOutcome::AlreadyResolved;
            }
            match pending.entry(group_id.to_string()) {
                Entry::Occupied(mut occupied) => {
                    let group = occupied.get_mut();
                    group.timer.cancel();
                    group.timer = token.clone();
                    merge(&mut group.submission, part);
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(PendingGroup {
                        submission: part,
                        timer: token.clone(),
                    });
                }
            }
        }

        self.arm_timer(group_id.to_string(), token);
        AddOutcome::Buffered
    }

    fn arm_timer(self: &Arc<Self>, group_id: String, token: CancellationToken) {
        let aggregator = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(aggregator.quiet_period) => {
                    aggregator.settle(&group_id).await;
                }
            }
        });
    }

    async fn settle(&self, group_id: &str) {
        // Mark resolved before removing so a racing part sees the group as
        // settled rather than re-opening it.
        self.resolved.insert(group_id.to_string(), ()).await;
        let group = self.lock().remove(group_id);
        let Some(group) = group else {
            return;
        };
        debug!(
            group_id,
            parts = group.submission.messages.len(),
            "media group settled"
        );
        if self.output.send(group.submission).await.is_err() {
            warn!(group_id, "moderation channel closed, dropping settled media group");
        }
    }
}

fn merge(into: &mut Submission, part: Submission) {
    into.messages.extend(part.messages);
    // The caption usually rides on one part only; keep the first non-empty.
    if into.text.trim().is_empty() && !part.text.trim().is_empty() {
        into.text = part.text;
    }
    into.has_sticker |= part.has_sticker;
}

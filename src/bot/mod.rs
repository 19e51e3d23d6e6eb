//! Telegram wiring: commands, the message pipeline, warnings and caches.

pub mod admin_cache;
pub mod handlers;
pub mod messages;
pub mod warnings;

pub use admin_cache::AdminRoster;
pub use handlers::Command;
pub use messages::ModerationContext;
pub use warnings::WarningService;

use crate::moderation::MediaGroupAggregator;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Runtime chat bindings, set by admin commands.
pub struct BotState {
    /// `(chat, topic)` of the monitored marketplace thread
    pub resale_topic: RwLock<Option<(i64, Option<i32>)>>,
    /// Chat that receives `/report` forwards
    pub report_chat: RwLock<Option<i64>>,
}

impl BotState {
    /// Create state, seeding the report chat from configuration if set.
    #[must_use]
    pub fn new(report_chat: Option<i64>) -> Self {
        Self {
            resale_topic: RwLock::new(None),
            report_chat: RwLock::new(report_chat),
        }
    }
}

/// Everything the update handlers need, injected through dptree.
pub struct BotDeps {
    /// Shared moderation services
    pub ctx: Arc<ModerationContext>,
    /// Album collector feeding the moderation channel
    pub aggregator: Arc<MediaGroupAggregator>,
    /// Cached admin roster
    pub admins: Arc<AdminRoster>,
    /// Mutable chat bindings
    pub state: BotState,
}

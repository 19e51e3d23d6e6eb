//! Marketplace moderation: cooldowns, album aggregation and the rulebook.

pub mod cooldown;
pub mod media_group;
pub mod policy;

pub use cooldown::{Category, CooldownLedger, CooldownScope};
pub use media_group::{AddOutcome, MediaGroupAggregator};
pub use policy::{ModerationPolicy, Submission, Verdict, Violation};

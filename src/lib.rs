//! Resale Guard - marketplace moderation bot for Telegram
//!
//! Watches a designated buy/sell forum topic, enforces hashtag and pricing
//! rules, rate-limits posting per category, and awards chat XP with rank
//! promotions.

/// Telegram bot wiring: command handlers, message pipeline, warnings
pub mod bot;
/// Configuration management
pub mod config;
/// Moderation core: cooldowns, media-group aggregation, policy
pub mod moderation;
/// Price extraction from free-form post text
pub mod price;
/// JSON-file persistence layer
pub mod storage;
/// Narrow chat-transport interface over teloxide
pub mod transport;
/// XP accrual and rank promotion
pub mod xp;

//! Configuration and settings management
//!
//! Loads settings from environment variables and defines moderation constants.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    pub telegram_token: String,

    /// Directory for the JSON persistence files
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Chat that receives user reports, if pre-configured
    pub report_chat_id: Option<i64>,
}

fn default_data_dir() -> String {
    "data".to_string()
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails or `TELEGRAM_TOKEN` is missing.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            // Environment::default() auto-converts UPPER_SNAKE_CASE to snake_case;
            // ignore_empty treats empty env vars as unset
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        s.try_deserialize()
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Default cooldown window between accepted posts in one category (12 hours)
#[must_use]
pub fn get_cooldown_seconds() -> u64 {
    env_u64("COOLDOWN_SECONDS", 43_200)
}

/// Minimum price for a #продам post, in hryvnias
#[must_use]
pub fn get_min_price() -> u32 {
    u32::try_from(env_u64("MIN_PRICE", 3000)).unwrap_or(3000)
}

/// Lower price floor for clothing posts (signaled by #одяг / #одежда)
#[must_use]
pub fn get_clothing_min_price() -> u32 {
    u32::try_from(env_u64("CLOTHING_MIN_PRICE", 1000)).unwrap_or(1000)
}

/// Quiet period after the last album part before a media group is evaluated
#[must_use]
pub fn get_quiet_period_ms() -> u64 {
    env_u64("MEDIA_GROUP_QUIET_MS", 1500)
}

/// How long a warning message stays in the chat before auto-deletion
#[must_use]
pub fn get_warning_ttl_secs() -> u64 {
    env_u64("WARNING_TTL_SECONDS", 5)
}

/// Window during which repeat warnings to the same user are suppressed
#[must_use]
pub fn get_warning_suppress_secs() -> u64 {
    env_u64("WARNING_SUPPRESS_SECONDS", 30)
}

/// TTL of the cached chat administrator roster
#[must_use]
pub fn get_admin_cache_ttl_secs() -> u64 {
    env_u64("ADMIN_CACHE_TTL_SECONDS", 60)
}

/// Extra posts the bonus-eligible rank may make inside an active window
#[must_use]
pub fn get_bonus_allowance() -> u32 {
    u32::try_from(env_u64("BONUS_ALLOWANCE", 2)).unwrap_or(2)
}

// XP system constants, matching the original community rules.
/// XP granted per eligible chat message
pub const XP_PER_MESSAGE: u32 = 1;
/// Minimum seconds between XP grants to one user
pub const XP_COOLDOWN_SECS: i64 = 60;
/// Maximum XP a user can earn per calendar day
pub const DAILY_XP_CAP: u32 = 100;

/// Fallback price candidates below this are ignored (sizes, quantities)
pub const PRICE_NOISE_FLOOR: f64 = 100.0;

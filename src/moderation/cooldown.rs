//! Per-user, per-category posting cooldowns.
//!
//! Tracks the last accepted post for every (user, category) pair and
//! enforces a configurable window between posts. The bonus-eligible rank
//! may make a small number of extra posts inside an active window; the
//! allowance counter resets whenever a fresh window opens.
//!
//! All operations are in-memory map mutations guarded by one mutex, with
//! no awaits inside the lock. Durability is best-effort: callers persist a
//! [`CooldownSnapshot`] and log failures without rolling back.

use crate::xp::ranks::Rank;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Marketplace post category, derived from hashtags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// `#куплю` posts
    Buy,
    /// `#продам` posts
    Sell,
}

impl Category {
    /// Stable lowercase name used in commands and persisted keys
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl std::str::FromStr for Category {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(Self::Buy),
            "sell" => Ok(Self::Sell),
            _ => Err(()),
        }
    }
}

/// Target of an administrative reset or custom-window override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownScope {
    /// A single category
    One(Category),
    /// Both categories
    All,
}

impl std::str::FromStr for CooldownScope {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "all" {
            return Ok(Self::All);
        }
        s.parse().map(Self::One)
    }
}

const CATEGORIES: [Category; 2] = [Category::Buy, Category::Sell];

/// State for one (user, category) pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CooldownRecord {
    /// Unix timestamp of the post that opened the current window
    pub last_post: u64,
    /// Posts made since the current window opened (bonus accounting)
    pub window_posts: u32,
}

/// Serializable dump of the ledger for the JSON store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CooldownSnapshot {
    /// Per-user, per-category records
    pub records: HashMap<i64, HashMap<Category, CooldownRecord>>,
    /// Per-user, per-category custom window overrides, in seconds
    pub custom_windows: HashMap<i64, HashMap<Category, u64>>,
}

#[derive(Default)]
struct Inner {
    records: HashMap<(i64, Category), CooldownRecord>,
    custom_windows: HashMap<(i64, Category), u64>,
}

/// Per-user, per-category rate limiter with rank bonus allowance.
pub struct CooldownLedger {
    default_window: u64,
    bonus_allowance: u32,
    inner: Mutex<Inner>,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

impl CooldownLedger {
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Create a ledger with the given default window and bonus allowance cap.
    #[must_use]
    pub fn new(default_window: u64, bonus_allowance: u32) -> Self {
        debug!(default_window, bonus_allowance, "cooldown ledger initialized");
        Self {
            default_window,
            bonus_allowance,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Effective window for a user and category, honoring custom overrides.
    #[must_use]
    pub fn window_for(&self, user_id: i64, category: Category) -> u64 {
        let inner = self.lock();
        inner
            .custom_windows
            .get(&(user_id, category))
            .copied()
            .unwrap_or(self.default_window)
    }

    /// Whether a post by `user_id` in `category` must be rejected right now.
    #[must_use]
    pub fn is_on_cooldown(&self, user_id: i64, category: Category, rank: &Rank) -> bool {
        self.is_on_cooldown_at(user_id, category, rank, unix_now())
    }

    /// [`Self::is_on_cooldown`] evaluated at an explicit timestamp.
    #[must_use]
    pub fn is_on_cooldown_at(&self, user_id: i64, category: Category, rank: &Rank, now: u64) -> bool {
        let inner = self.lock();
        let key = (user_id, category);
        let Some(record) = inner.records.get(&key) else {
            return false;
        };
        let window = window_of(&inner, self.default_window, key);
        blocked(record, window, rank, self.bonus_allowance, now)
    }

    /// Record an accepted post, opening a fresh window if the prior one
    /// expired and consuming one bonus slot for allowance-carrying ranks.
    pub fn record_successful_post(&self, user_id: i64, category: Category, rank: &Rank) {
        self.record_successful_post_at(user_id, category, rank, unix_now());
    }

    /// [`Self::record_successful_post`] at an explicit timestamp.
    pub fn record_successful_post_at(
        &self,
        user_id: i64,
        category: Category,
        rank: &Rank,
        now: u64,
    ) {
        let mut inner = self.lock();
        let inner = &mut *inner;
        let key = (user_id, category);
        let window = window_of(inner, self.default_window, key);
        let window_posts = record_post(inner, key, window, rank.has_bonus_allowance(), now);
        debug!(
            user_id,
            category = category.as_str(),
            window_posts,
            "recorded successful post"
        );
    }

    /// Check the cooldown and, if clear, record the post in the same lock
    /// scope. This is the accept path: a separate check-then-record pair
    /// would let two parallel posts both pass the check.
    ///
    /// # Errors
    ///
    /// Returns the remaining seconds of the active window when the post
    /// must be rejected; nothing is recorded in that case.
    pub fn check_and_record(
        &self,
        user_id: i64,
        category: Category,
        rank: &Rank,
    ) -> Result<(), u64> {
        self.check_and_record_at(user_id, category, rank, unix_now())
    }

    /// [`Self::check_and_record`] at an explicit timestamp.
    ///
    /// # Errors
    ///
    /// Returns the remaining seconds of the active window when the post
    /// must be rejected.
    pub fn check_and_record_at(
        &self,
        user_id: i64,
        category: Category,
        rank: &Rank,
        now: u64,
    ) -> Result<(), u64> {
        let mut inner = self.lock();
        let inner = &mut *inner;
        let key = (user_id, category);
        let window = window_of(inner, self.default_window, key);
        if let Some(record) = inner.records.get(&key) {
            if blocked(record, window, rank, self.bonus_allowance, now) {
                return Err(window.saturating_sub(now.saturating_sub(record.last_post)));
            }
        }
        let window_posts = record_post(inner, key, window, rank.has_bonus_allowance(), now);
        debug!(
            user_id,
            category = category.as_str(),
            window_posts,
            "recorded successful post"
        );
        Ok(())
    }

    /// Seconds until the window expires, floored at 0.
    #[must_use]
    pub fn remaining_seconds(&self, user_id: i64, category: Category) -> u64 {
        self.remaining_seconds_at(user_id, category, unix_now())
    }

    /// [`Self::remaining_seconds`] at an explicit timestamp.
    #[must_use]
    pub fn remaining_seconds_at(&self, user_id: i64, category: Category, now: u64) -> u64 {
        let inner = self.lock();
        let Some(record) = inner.records.get(&(user_id, category)) else {
            return 0;
        };
        let window = inner
            .custom_windows
            .get(&(user_id, category))
            .copied()
            .unwrap_or(self.default_window);
        window.saturating_sub(now.saturating_sub(record.last_post))
    }

    /// Clear stored cooldown state for one category or all of them.
    /// Returns whether anything was actually cleared.
    pub fn reset(&self, user_id: i64, scope: CooldownScope) -> bool {
        let mut inner = self.lock();
        let mut cleared = false;
        for category in scoped(scope) {
            cleared |= inner.records.remove(&(user_id, category)).is_some();
        }
        cleared
    }

    /// Install a per-user custom window, used by all subsequent queries.
    pub fn set_custom_window(&self, user_id: i64, scope: CooldownScope, seconds: u64) {
        let mut inner = self.lock();
        for category in scoped(scope) {
            inner.custom_windows.insert((user_id, category), seconds);
        }
    }

    /// Dump the ledger for persistence.
    #[must_use]
    pub fn snapshot(&self) -> CooldownSnapshot {
        let inner = self.lock();
        let mut snapshot = CooldownSnapshot::default();
        for (&(user, category), &record) in &inner.records {
            snapshot.records.entry(user).or_default().insert(category, record);
        }
        for (&(user, category), &window) in &inner.custom_windows {
            snapshot
                .custom_windows
                .entry(user)
                .or_default()
                .insert(category, window);
        }
        snapshot
    }

    /// Replace in-memory state with a previously persisted snapshot.
    pub fn restore(&self, snapshot: CooldownSnapshot) {
        let mut inner = self.lock();
        inner.records.clear();
        inner.custom_windows.clear();
        for (user, per_category) in snapshot.records {
            for (category, record) in per_category {
                inner.records.insert((user, category), record);
            }
        }
        for (user, per_category) in snapshot.custom_windows {
            for (category, window) in per_category {
                inner.custom_windows.insert((user, category), window);
            }
        }
    }
}

fn scoped(scope: CooldownScope) -> Vec<Category> {
    match scope {
        CooldownScope::One(category) => vec![category],
        CooldownScope::All => CATEGORIES.to_vec(),
    }
}

fn window_of(inner: &Inner, default_window: u64, key: (i64, Category)) -> u64 {
    inner.custom_windows.get(&key).copied().unwrap_or(default_window)
}

/// Whether an existing record blocks a post right now.
fn blocked(record: &CooldownRecord, window: u64, rank: &Rank, allowance: u32, now: u64) -> bool {
    if now.saturating_sub(record.last_post) >= window {
        return false;
    }
    // Window still active: the bonus rank may have unused allowance.
    !(rank.has_bonus_allowance() && record.window_posts < allowance)
}

/// Apply one accepted post to the map and return the new in-window count.
/// A first post opens a window at `now`; a post after expiry re-opens it;
/// bonus posts inside an active window keep the window anchored.
fn record_post(inner: &mut Inner, key: (i64, Category), window: u64, bonus: bool, now: u64) -> u32 {
    let record = match inner.records.entry(key) {
        Entry::Vacant(vacant) => vacant.insert(CooldownRecord {
            last_post: now,
            window_posts: 0,
        }),
        Entry::Occupied(occupied) => {
            let record = occupied.into_mut();
            if now.saturating_sub(record.last_post) >= window {
                record.last_post = now;
                record.window_posts = 0;
            }
            record
        }
    };
    if bonus {
        record.window_posts += 1;
    }
    record.window_posts
}

/// Parse an admin duration argument like `30m` or `2h` into seconds.
#[must_use]
pub fn parse_duration(input: &str) -> Option<u64> {
    let input = input.trim().to_lowercase();
    let unit = input.chars().last()?;
    let value: u64 = input[..input.len() - unit.len_utf8()].parse().ok()?;
    match unit {
        's' => Some(value),
        'm' => Some(value * 60),
        'h' => Some(value * 3600),
        'd' => Some(value * 86_400),
        _ => None,
    }
}

/// Format remaining cooldown time as a Ukrainian human-readable string.
#[must_use]
pub fn format_remaining(seconds: u64) -> String {
    let (minutes, seconds) = (seconds / 60, seconds % 60);
    let (hours, minutes) = (minutes / 60, minutes % 60);

    if hours > 0 {
        let hour_word = if hours > 1 { "годин" } else { "годину" };
        format!("{hours} {hour_word} та {minutes} хвилин")
    } else if minutes > 0 {
        let minute_word = if minutes == 1 { "хвилину" } else { "хвилин" };
        format!("{minutes} {minute_word} та {seconds} секунд")
    } else {
        format!("{seconds} секунд")
    }
}

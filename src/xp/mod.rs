//! XP accrual, daily caps, and rank promotion.
//!
//! Every non-command chat message may earn 1 XP, gated by a spam filter,
//! a 60-second per-user cooldown, and a 100 XP daily cap that rolls over
//! at local midnight. Ranks follow ascending XP thresholds; special
//! (admin-assigned) ranks are never overwritten automatically.
//!
//! Mutations happen in memory under one mutex; persistence to the JSON
//! store is best-effort and failures only cost durability, never
//! correctness of the running process.

pub mod ranks;

pub use ranks::Rank;

use crate::config::{DAILY_XP_CAP, XP_COOLDOWN_SECS, XP_PER_MESSAGE};
use crate::storage::JsonStore;
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

/// Persisted per-user XP state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    /// Telegram user id
    pub user_id: i64,
    /// Telegram username, if set
    pub username: Option<String>,
    /// Display name
    pub first_name: String,
    /// Lifetime XP
    pub xp: u32,
    /// Current tier
    pub rank: Rank,
    /// XP earned on `daily_xp_date`
    pub daily_xp: u32,
    /// Local date the daily counter belongs to
    pub daily_xp_date: NaiveDate,
    /// Time of the last XP grant
    pub last_xp_time: Option<DateTime<Utc>>,
    /// First time this user was observed
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

/// Who sent a message, as reported by the transport.
#[derive(Debug, Clone)]
pub struct UserIdentity {
    /// Telegram user id
    pub user_id: i64,
    /// Telegram username, if set
    pub username: Option<String>,
    /// Display name
    pub first_name: String,
}

/// Result of a successful XP grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XpOutcome {
    /// New lifetime XP
    pub xp: u32,
    /// Rank after the grant
    pub rank: Rank,
    /// Present when the grant crossed a tier threshold
    pub promotion: Option<Promotion>,
}

/// A tier change caused by an XP mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promotion {
    /// Tier before the change
    pub old_rank: Rank,
    /// Tier after the change
    pub new_rank: Rank,
}

/// One line of the append-only XP audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Affected user
    pub user_id: i64,
    /// Signed XP change (0 for pure rank changes)
    pub delta: i64,
    /// Human-readable reason
    pub reason: String,
    /// Acting administrator, when applicable
    pub admin_id: Option<i64>,
    /// When the change happened
    pub timestamp: DateTime<Utc>,
}

/// Snapshot of a user for `/profile`.
#[derive(Debug, Clone)]
pub struct Profile {
    /// Telegram user id
    pub user_id: i64,
    /// Telegram username, if set
    pub username: Option<String>,
    /// Display name
    pub first_name: String,
    /// Lifetime XP
    pub xp: u32,
    /// Current tier
    pub rank: Rank,
    /// XP earned today
    pub daily_xp: u32,
    /// Next tier to reach, absent for special and top ranks
    pub next: Option<NextRank>,
}

/// Progress toward the next ordinary tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextRank {
    /// The tier itself
    pub rank: Rank,
    /// Its XP threshold
    pub threshold: u32,
    /// XP still missing
    pub xp_needed: u32,
}

/// Whether a message is too low-effort to earn XP: bare acknowledgements,
/// runs of `+`/`-`, whitespace, or anything of two characters or fewer.
#[must_use]
pub fn is_spam_message(text: &str) -> bool {
    let text = text.trim().to_lowercase();
    if text.chars().count() <= 2 {
        return true;
    }
    if text.chars().all(|c| c == '+' || c == '-' || c == '.') {
        return true;
    }
    matches!(text.as_str(), "ок" | "ok" | "да" | "не" | "нет")
}

/// Per-user XP ledger with threshold-based promotions.
pub struct XpLedger {
    users: Mutex<HashMap<i64, UserRecord>>,
    store: Arc<JsonStore>,
}

impl XpLedger {
    /// Create a ledger over preloaded user records.
    #[must_use]
    pub fn new(store: Arc<JsonStore>, users: HashMap<i64, UserRecord>) -> Self {
        info!(users = users.len(), "XP ledger initialized");
        Self {
            users: Mutex::new(users),
            store,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<i64, UserRecord>> {
        self.users
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Process an ordinary chat message for XP. Returns `None` when no XP
    /// was granted (spam, cooldown, daily cap).
    pub async fn process_message(&self, who: &UserIdentity, text: &str) -> Option<XpOutcome> {
        let outcome = self.grant_message_xp_at(who, text, Utc::now(), Local::now().date_naive());
        if let Some(outcome) = &outcome {
            self.log_history(HistoryEntry {
                user_id: who.user_id,
                delta: i64::from(XP_PER_MESSAGE),
                reason: "повідомлення в чаті".to_string(),
                admin_id: None,
                timestamp: Utc::now(),
            })
            .await;
            if let Some(promotion) = &outcome.promotion {
                info!(
                    user_id = who.user_id,
                    from = %promotion.old_rank,
                    to = %promotion.new_rank,
                    "user promoted"
                );
            }
            self.persist().await;
        }
        outcome
    }

    fn grant_message_xp_at(
        &self,
        who: &UserIdentity,
        text: &str,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> Option<XpOutcome> {
        let mut users = self.lock();
        let record = users
            .entry(who.user_id)
            .or_insert_with(|| UserRecord::first_seen(who, now, today));
        record.username.clone_from(&who.username);
        record.first_name.clone_from(&who.first_name);
        record.updated_at = now;

        if is_spam_message(text) {
            return None;
        }
        if let Some(last) = record.last_xp_time {
            if (now - last).num_seconds() < XP_COOLDOWN_SECS {
                return None;
            }
        }
        if record.daily_xp_date != today {
            record.daily_xp = 0;
            record.daily_xp_date = today;
        }
        if record.daily_xp >= DAILY_XP_CAP {
            return None;
        }

        record.xp += XP_PER_MESSAGE;
        record.daily_xp += XP_PER_MESSAGE;
        record.last_xp_time = Some(now);

        let promotion = record.recalculate_rank();
        Some(XpOutcome {
            xp: record.xp,
            rank: record.rank.clone(),
            promotion,
        })
    }

    /// Current rank of a user, `Новачок` for users never seen.
    #[must_use]
    pub fn rank_of(&self, user_id: i64) -> Rank {
        self.lock()
            .get(&user_id)
            .map_or(Rank::Novice, |r| r.rank.clone())
    }

    /// Profile snapshot for `/profile`, `None` for unknown users.
    #[must_use]
    pub fn profile(&self, user_id: i64) -> Option<Profile> {
        let users = self.lock();
        let record = users.get(&user_id)?;
        let next = if record.rank.is_special() {
            None
        } else {
            Rank::next_threshold(record.xp).map(|(threshold, rank)| NextRank {
                rank,
                threshold,
                xp_needed: threshold - record.xp,
            })
        };
        Some(Profile {
            user_id: record.user_id,
            username: record.username.clone(),
            first_name: record.first_name.clone(),
            xp: record.xp,
            rank: record.rank.clone(),
            daily_xp: record.daily_xp,
            next,
        })
    }

    /// Top users by lifetime XP.
    #[must_use]
    pub fn leaderboard(&self, limit: usize) -> Vec<Profile> {
        let users = self.lock();
        let mut records: Vec<&UserRecord> = users.values().collect();
        records.sort_by(|a, b| b.xp.cmp(&a.xp));
        records
            .into_iter()
            .take(limit)
            .map(|r| Profile {
                user_id: r.user_id,
                username: r.username.clone(),
                first_name: r.first_name.clone(),
                xp: r.xp,
                rank: r.rank.clone(),
                daily_xp: r.daily_xp,
                next: None,
            })
            .collect()
    }

    /// Resolve `@username` (without the `@`) to a user id.
    #[must_use]
    pub fn find_by_username(&self, username: &str) -> Option<i64> {
        let needle = username.to_lowercase();
        self.lock()
            .values()
            .find(|r| {
                r.username
                    .as_ref()
                    .is_some_and(|u| u.to_lowercase() == needle)
            })
            .map(|r| r.user_id)
    }

    /// Apply a signed XP delta, bypassing the daily cap. Floors at 0.
    /// Returns the new lifetime XP, or `None` for unknown users.
    pub async fn admin_adjust_xp(
        &self,
        user_id: i64,
        delta: i64,
        admin_id: i64,
        reason: &str,
    ) -> Option<u32> {
        let new_xp = {
            let mut users = self.lock();
            let record = users.get_mut(&user_id)?;
            let adjusted = i64::from(record.xp).saturating_add(delta).max(0);
            record.xp = u32::try_from(adjusted).unwrap_or(u32::MAX);
            record.updated_at = Utc::now();
            record.recalculate_rank();
            record.xp
        };
        self.log_history(HistoryEntry {
            user_id,
            delta,
            reason: reason.to_string(),
            admin_id: Some(admin_id),
            timestamp: Utc::now(),
        })
        .await;
        self.persist().await;
        Some(new_xp)
    }

    /// Set lifetime XP to an absolute value. Returns the applied value,
    /// or `None` for unknown users.
    pub async fn admin_set_xp(
        &self,
        user_id: i64,
        xp: u32,
        admin_id: i64,
        reason: &str,
    ) -> Option<u32> {
        let delta = {
            let mut users = self.lock();
            let record = users.get_mut(&user_id)?;
            let delta = i64::from(xp) - i64::from(record.xp);
            record.xp = xp;
            record.updated_at = Utc::now();
            record.recalculate_rank();
            delta
        };
        self.log_history(HistoryEntry {
            user_id,
            delta,
            reason: reason.to_string(),
            admin_id: Some(admin_id),
            timestamp: Utc::now(),
        })
        .await;
        self.persist().await;
        Some(xp)
    }

    /// Assign any rank name, including the special tiers. Reverting a
    /// special tier back to automatic control requires [`Self::admin_reset`].
    pub async fn admin_set_rank(&self, user_id: i64, rank: Rank, admin_id: i64) -> bool {
        let found = {
            let mut users = self.lock();
            match users.get_mut(&user_id) {
                Some(record) => {
                    record.rank = rank.clone();
                    record.updated_at = Utc::now();
                    true
                }
                None => false,
            }
        };
        if found {
            self.log_history(HistoryEntry {
                user_id,
                delta: 0,
                reason: format!("ранг встановлено: {rank}"),
                admin_id: Some(admin_id),
                timestamp: Utc::now(),
            })
            .await;
            self.persist().await;
        }
        found
    }

    /// Zero out XP and return the user to the base rank.
    pub async fn admin_reset(&self, user_id: i64, admin_id: i64) -> bool {
        let found = {
            let mut users = self.lock();
            match users.get_mut(&user_id) {
                Some(record) => {
                    record.xp = 0;
                    record.daily_xp = 0;
                    record.rank = Rank::Novice;
                    record.updated_at = Utc::now();
                    true
                }
                None => false,
            }
        };
        if found {
            self.log_history(HistoryEntry {
                user_id,
                delta: 0,
                reason: "XP скинуто".to_string(),
                admin_id: Some(admin_id),
                timestamp: Utc::now(),
            })
            .await;
            self.persist().await;
        }
        found
    }

    async fn log_history(&self, entry: HistoryEntry) {
        if let Err(e) = self.store.append_history(&entry).await {
            error!("failed to append XP history: {e}");
        }
    }

    async fn persist(&self) {
        let users = self.lock().clone();
        if let Err(e) = self.store.save_users(&users).await {
            error!("failed to persist users: {e}");
        }
    }
}

impl UserRecord {
    fn first_seen(who: &UserIdentity, now: DateTime<Utc>, today: NaiveDate) -> Self {
        Self {
            user_id: who.user_id,
            username: who.username.clone(),
            first_name: who.first_name.clone(),
            xp: 0,
            rank: Rank::Novice,
            daily_xp: 0,
            daily_xp_date: today,
            last_xp_time: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Re-derive the rank from XP unless the current rank is special.
    /// Returns the promotion (or demotion) if the tier changed.
    fn recalculate_rank(&mut self) -> Option<Promotion> {
        if self.rank.is_special() {
            return None;
        }
        let new_rank = Rank::from_xp(self.xp);
        if new_rank == self.rank {
            return None;
        }
        let promotion = Promotion {
            old_rank: self.rank.clone(),
            new_rank: new_rank.clone(),
        };
        self.rank = new_rank;
        Some(promotion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ledger() -> XpLedger {
        let dir = std::env::temp_dir().join(format!("resale-guard-xp-{}", std::process::id()));
        XpLedger::new(Arc::new(JsonStore::new(dir)), HashMap::new())
    }

    fn who(user_id: i64) -> UserIdentity {
        UserIdentity {
            user_id,
            username: Some(format!("user{user_id}")),
            first_name: "Тест".to_string(),
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().expect("valid timestamp")
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 10).expect("valid date")
    }

    #[test]
    fn spam_classification() {
        assert!(is_spam_message("+"));
        assert!(is_spam_message("++--"));
        assert!(is_spam_message("..."));
        assert!(is_spam_message("ок"));
        assert!(is_spam_message("нет"));
        assert!(is_spam_message("   "));
        assert!(is_spam_message("ab"));
        assert!(!is_spam_message("продам кросівки"));
    }

    #[test]
    fn spam_earns_no_xp() {
        let ledger = ledger();
        assert!(ledger.grant_message_xp_at(&who(1), "+", at(0), today()).is_none());
        assert_eq!(ledger.profile(1).map(|p| p.xp), Some(0));
    }

    #[test]
    fn ordinary_message_grants_one_xp() {
        let ledger = ledger();
        let outcome = ledger
            .grant_message_xp_at(&who(1), "всім привіт, як справи?", at(0), today())
            .expect("XP granted");
        assert_eq!(outcome.xp, 1);
        assert_eq!(outcome.rank, Rank::Novice);
        assert!(outcome.promotion.is_none());
    }

    #[test]
    fn per_user_cooldown_blocks_rapid_messages() {
        let ledger = ledger();
        assert!(ledger.grant_message_xp_at(&who(1), "перше повідомлення", at(0), today()).is_some());
        assert!(ledger.grant_message_xp_at(&who(1), "друге повідомлення", at(10), today()).is_none());
        assert!(ledger.grant_message_xp_at(&who(1), "третє повідомлення", at(60), today()).is_some());
    }

    #[test]
    fn daily_cap_blocks_at_one_hundred_and_rolls_over() {
        let ledger = ledger();
        for i in 0..i64::from(DAILY_XP_CAP) {
            assert!(
                ledger
                    .grant_message_xp_at(&who(1), "звичайне повідомлення", at(i * 61), today())
                    .is_some(),
                "grant {i} should pass"
            );
        }
        // 101st eligible message the same day earns nothing.
        assert!(ledger
            .grant_message_xp_at(&who(1), "понад ліміт", at(10_000_000), today())
            .is_none());
        assert_eq!(ledger.profile(1).map(|p| p.xp), Some(DAILY_XP_CAP));

        // Date rollover resets the daily counter.
        let tomorrow = today().succ_opt().expect("valid date");
        assert!(ledger
            .grant_message_xp_at(&who(1), "наступного дня", at(10_000_100), tomorrow)
            .is_some());
    }

    #[test]
    fn promotion_fires_on_threshold_crossing() {
        let ledger = ledger();
        for i in 0..49 {
            ledger.grant_message_xp_at(&who(1), "звичайне повідомлення", at(i * 61), today());
        }
        let outcome = ledger
            .grant_message_xp_at(&who(1), "ювілейне повідомлення", at(50 * 61), today())
            .expect("XP granted");
        assert_eq!(outcome.xp, 50);
        assert_eq!(
            outcome.promotion,
            Some(Promotion {
                old_rank: Rank::Novice,
                new_rank: Rank::Member,
            })
        );
    }

    #[tokio::test]
    async fn special_rank_survives_threshold_crossing() {
        let ledger = ledger();
        ledger.grant_message_xp_at(&who(1), "перше повідомлення", at(0), today());
        assert!(ledger.admin_set_rank(1, Rank::Reseller, 99).await);
        assert!(ledger.admin_adjust_xp(1, 500, 99, "тест").await.is_some());

        let profile = ledger.profile(1).expect("known user");
        assert_eq!(profile.rank, Rank::Reseller);
        assert!(profile.next.is_none());
    }

    #[tokio::test]
    async fn admin_adjust_bypasses_daily_cap_and_floors_at_zero() {
        let ledger = ledger();
        ledger.grant_message_xp_at(&who(1), "перше повідомлення", at(0), today());

        assert_eq!(ledger.admin_adjust_xp(1, 500, 99, "бонус").await, Some(501));
        assert_eq!(ledger.rank_of(1), Rank::Authority);

        assert_eq!(ledger.admin_adjust_xp(1, -10_000, 99, "штраф").await, Some(0));
        assert_eq!(ledger.rank_of(1), Rank::Novice);
    }

    #[tokio::test]
    async fn admin_ops_on_unknown_user_fail() {
        let ledger = ledger();
        assert!(ledger.admin_adjust_xp(404, 10, 99, "тест").await.is_none());
        assert!(ledger.admin_set_xp(404, 10, 99, "тест").await.is_none());
        assert!(!ledger.admin_set_rank(404, Rank::Legend, 99).await);
        assert!(!ledger.admin_reset(404, 99).await);
    }

    #[tokio::test]
    async fn reset_returns_user_to_base_rank() {
        let ledger = ledger();
        ledger.grant_message_xp_at(&who(1), "перше повідомлення", at(0), today());
        ledger.admin_set_rank(1, Rank::Reseller, 99).await;

        assert!(ledger.admin_reset(1, 99).await);
        let profile = ledger.profile(1).expect("known user");
        assert_eq!(profile.xp, 0);
        assert_eq!(profile.rank, Rank::Novice);
    }

    #[test]
    fn profile_reports_next_threshold() {
        let ledger = ledger();
        ledger.grant_message_xp_at(&who(1), "перше повідомлення", at(0), today());
        let profile = ledger.profile(1).expect("known user");
        assert_eq!(
            profile.next,
            Some(NextRank {
                rank: Rank::Member,
                threshold: 50,
                xp_needed: 49,
            })
        );
    }

    #[test]
    fn leaderboard_sorted_by_xp() {
        let ledger = ledger();
        ledger.grant_message_xp_at(&who(1), "перше повідомлення", at(0), today());
        ledger.grant_message_xp_at(&who(2), "перше повідомлення", at(0), today());
        ledger.grant_message_xp_at(&who(2), "друге повідомлення", at(100), today());

        let top = ledger.leaderboard(10);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].user_id, 2);
        assert_eq!(top[0].xp, 2);
    }

    #[test]
    fn username_lookup_is_case_insensitive() {
        let ledger = ledger();
        ledger.grant_message_xp_at(&who(42), "перше повідомлення", at(0), today());
        assert_eq!(ledger.find_by_username("USER42"), Some(42));
        assert_eq!(ledger.find_by_username("nobody"), None);
    }
}

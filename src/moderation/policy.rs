//! The marketplace rulebook: classifies submissions and decides whether
//! they stay or get deleted with a warning.
//!
//! Checks run in a fixed order so the user always sees the most specific
//! reason first: missing hashtags, forbidden content, missing description,
//! cooldown, then the price floor for sale posts.

use crate::moderation::cooldown::{format_remaining, Category, CooldownLedger};
use crate::price::extract_price;
use crate::transport::MessageRef;
use crate::xp::ranks::Rank;
use std::sync::Arc;

/// One logical post: a single message or a settled media group.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Chat the submission arrived in
    pub chat_id: i64,
    /// Forum topic, if the chat uses topics
    pub thread_id: Option<i32>,
    /// Author's Telegram id
    pub user_id: i64,
    /// Author's @username, if set
    pub username: Option<String>,
    /// Author's first name, used when no username exists
    pub first_name: String,
    /// Combined text of the submission (caption for media groups)
    pub text: String,
    /// Whether any part of the submission is a sticker
    pub has_sticker: bool,
    /// All underlying chat messages, for deletion
    pub messages: Vec<MessageRef>,
}

impl Submission {
    /// How to address the author in a warning.
    #[must_use]
    pub fn mention(&self) -> String {
        self.username
            .as_ref()
            .map_or_else(|| self.first_name.clone(), |name| format!("@{name}"))
    }
}

/// Why a submission was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// No `#куплю` or `#продам` hashtag in a non-empty text
    Uncategorized,
    /// Stickers and similar content are not marketplace posts
    ForbiddenContent,
    /// Media without any describing text
    MissingDescription,
    /// The author's window for this category is still active
    OnCooldown {
        /// Seconds until the window expires
        remaining: u64,
    },
    /// Sale post priced below the applicable floor
    PriceBelowMinimum {
        /// The floor that applied, in hryvnias
        minimum: u32,
    },
}

impl Violation {
    /// Ukrainian warning shown in chat after the submission is deleted.
    #[must_use]
    pub fn warning_text(&self, mention: &str) -> String {
        match self {
            Self::Uncategorized => format!(
                "❌ {mention}, ваше повідомлення було видалено, оскільки воно не містить хештегів #куплю або #продам."
            ),
            Self::ForbiddenContent | Self::MissingDescription => format!(
                "❌ {mention}, ваше повідомлення було видалено, оскільки воно не відповідає правилам барахолки."
            ),
            Self::OnCooldown { remaining } => format!(
                "⏳ {mention}, ваше оголошення було видалено. Зачекайте ще {} перед наступним оголошенням у цій категорії.",
                format_remaining(*remaining)
            ),
            Self::PriceBelowMinimum { minimum } => format!(
                "❌ {mention}, ваше оголошення було видалено, оскільки мінімальна ціна для продажу — {minimum} грн."
            ),
        }
    }
}

/// Outcome of evaluating one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The submission stays in the chat
    Accepted {
        /// Category it was classified into
        category: Category,
    },
    /// The submission must be deleted and warned about
    Rejected(Violation),
}

/// Hashtags that mark a sale post as clothing, which has a lower floor.
const CLOTHING_TAGS: [&str; 2] = ["#одяг", "#одежда"];

/// Stateless rule evaluation over the shared cooldown ledger.
pub struct ModerationPolicy {
    cooldowns: Arc<CooldownLedger>,
    min_price: u32,
    clothing_min_price: u32,
}

impl ModerationPolicy {
    /// Build a policy over a shared cooldown ledger.
    #[must_use]
    pub const fn new(cooldowns: Arc<CooldownLedger>, min_price: u32, clothing_min_price: u32) -> Self {
        Self {
            cooldowns,
            min_price,
            clothing_min_price,
        }
    }

    /// Classify text into a category. `#продам` wins when both tags appear.
    #[must_use]
    pub fn detect_category(text: &str) -> Option<Category> {
        let lowered = text.to_lowercase();
        if lowered.contains("#продам") {
            Some(Category::Sell)
        } else if lowered.contains("#куплю") {
            Some(Category::Buy)
        } else {
            None
        }
    }

    fn min_price_for(&self, text: &str) -> u32 {
        let lowered = text.to_lowercase();
        if CLOTHING_TAGS.iter().any(|tag| lowered.contains(tag)) {
            self.clothing_min_price
        } else {
            self.min_price
        }
    }

    fn unix_now() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| d.as_secs())
    }

    /// Evaluate a submission without touching cooldown state.
    #[must_use]
    pub fn evaluate(&self, submission: &Submission, rank: &Rank) -> Verdict {
        self.evaluate_at(submission, rank, Self::unix_now())
    }

    /// [`Self::evaluate`] at an explicit timestamp.
    #[must_use]
    pub fn evaluate_at(&self, submission: &Submission, rank: &Rank, now: u64) -> Verdict {
        let text = submission.text.trim();

        let category = match Self::detect_category(text) {
            Some(category) => category,
            None if text.is_empty() => {
                let violation = if submission.has_sticker {
                    Violation::ForbiddenContent
                } else {
                    Violation::MissingDescription
                };
                return Verdict::Rejected(violation);
            }
            None => return Verdict::Rejected(Violation::Uncategorized),
        };

        if submission.has_sticker {
            return Verdict::Rejected(Violation::ForbiddenContent);
        }

        if self
            .cooldowns
            .is_on_cooldown_at(submission.user_id, category, rank, now)
        {
            let remaining = self
                .cooldowns
                .remaining_seconds_at(submission.user_id, category, now);
            return Verdict::Rejected(Violation::OnCooldown { remaining });
        }

        if category == Category::Sell {
            let minimum = self.min_price_for(text);
            match extract_price(text) {
                Some(price) if price >= f64::from(minimum) => {}
                _ => return Verdict::Rejected(Violation::PriceBelowMinimum { minimum }),
            }
        }

        Verdict::Accepted { category }
    }

    /// Evaluate and, on acceptance, record the post in the cooldown ledger.
    pub fn evaluate_and_record(&self, submission: &Submission, rank: &Rank) -> Verdict {
        self.evaluate_and_record_at(submission, rank, Self::unix_now())
    }

    /// [`Self::evaluate_and_record`] at an explicit timestamp.
    ///
    /// The accept path re-checks the cooldown and records the post under
    /// one ledger lock, so two concurrent submissions cannot both claim
    /// the same window slot.
    pub fn evaluate_and_record_at(
        &self,
        submission: &Submission,
        rank: &Rank,
        now: u64,
    ) -> Verdict {
        match self.evaluate_at(submission, rank, now) {
            Verdict::Accepted { category } => {
                match self
                    .cooldowns
                    .check_and_record_at(submission.user_id, category, rank, now)
                {
                    Ok(()) => Verdict::Accepted { category },
                    Err(remaining) => Verdict::Rejected(Violation::OnCooldown { remaining }),
                }
            }
            rejected => rejected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: u64 = 43_200;

    fn policy() -> ModerationPolicy {
        ModerationPolicy::new(Arc::new(CooldownLedger::new(WINDOW, 2)), 3000, 1000)
    }

    fn submission(text: &str) -> Submission {
        Submission {
            chat_id: -100,
            thread_id: Some(42),
            user_id: 7,
            username: Some("seller".to_string()),
            first_name: "Іван".to_string(),
            text: text.to_string(),
            has_sticker: false,
            messages: vec![MessageRef {
                chat_id: -100,
                message_id: 1,
            }],
        }
    }

    #[test]
    fn sale_above_floor_is_accepted() {
        let verdict = policy().evaluate_at(&submission("#продам кросівки, ціна: 3500 грн"), &Rank::Novice, 1000);
        assert_eq!(
            verdict,
            Verdict::Accepted {
                category: Category::Sell
            }
        );
    }

    #[test]
    fn sale_below_floor_is_rejected() {
        let verdict = policy().evaluate_at(&submission("#продам шапка 1200 грн"), &Rank::Novice, 1000);
        assert_eq!(
            verdict,
            Verdict::Rejected(Violation::PriceBelowMinimum { minimum: 3000 })
        );
    }

    #[test]
    fn clothing_tag_lowers_the_floor() {
        let policy = policy();
        let verdict = policy.evaluate_at(&submission("#продам #одяг куртка 1200 грн"), &Rank::Novice, 1000);
        assert_eq!(
            verdict,
            Verdict::Accepted {
                category: Category::Sell
            }
        );

        let verdict = policy.evaluate_at(&submission("#продам #одяг шкарпетки 500 грн"), &Rank::Novice, 1000);
        assert_eq!(
            verdict,
            Verdict::Rejected(Violation::PriceBelowMinimum { minimum: 1000 })
        );
    }

    #[test]
    fn sale_without_price_is_rejected() {
        let verdict = policy().evaluate_at(&submission("#продам кросівки, пишіть в лс"), &Rank::Novice, 1000);
        assert_eq!(
            verdict,
            Verdict::Rejected(Violation::PriceBelowMinimum { minimum: 3000 })
        );
    }

    #[test]
    fn buy_post_needs_no_price() {
        let verdict = policy().evaluate_at(&submission("#куплю кросівки 42 розмір"), &Rank::Novice, 1000);
        assert_eq!(
            verdict,
            Verdict::Accepted {
                category: Category::Buy
            }
        );
    }

    #[test]
    fn text_without_hashtags_is_uncategorized() {
        let verdict = policy().evaluate_at(&submission("продам кросівки 3500"), &Rank::Novice, 1000);
        assert_eq!(verdict, Verdict::Rejected(Violation::Uncategorized));
    }

    #[test]
    fn sell_tag_wins_over_buy_tag() {
        assert_eq!(
            ModerationPolicy::detect_category("#куплю або #продам"),
            Some(Category::Sell)
        );
    }

    #[test]
    fn sticker_is_forbidden() {
        let mut sub = submission("");
        sub.has_sticker = true;
        let verdict = policy().evaluate_at(&sub, &Rank::Novice, 1000);
        assert_eq!(verdict, Verdict::Rejected(Violation::ForbiddenContent));
    }

    #[test]
    fn media_without_text_is_rejected() {
        let verdict = policy().evaluate_at(&submission(""), &Rank::Novice, 1000);
        assert_eq!(verdict, Verdict::Rejected(Violation::MissingDescription));
    }

    #[test]
    fn second_post_in_window_is_on_cooldown() {
        let policy = policy();
        let t = 1_000_000;
        let sub = submission("#продам кросівки 3500 грн");

        assert!(matches!(
            policy.evaluate_and_record_at(&sub, &Rank::Novice, t),
            Verdict::Accepted { .. }
        ));

        // 5 minutes later, 11h55m of the 12h window remains.
        let verdict = policy.evaluate_at(&sub, &Rank::Novice, t + 300);
        assert_eq!(
            verdict,
            Verdict::Rejected(Violation::OnCooldown {
                remaining: WINDOW - 300
            })
        );
    }

    #[test]
    fn rejected_post_does_not_consume_the_window() {
        let policy = policy();
        let t = 1_000_000;

        let cheap = submission("#продам шапка 100 грн");
        assert!(matches!(
            policy.evaluate_and_record_at(&cheap, &Rank::Novice, t),
            Verdict::Rejected(_)
        ));

        let fine = submission("#продам кросівки 3500 грн");
        assert!(matches!(
            policy.evaluate_and_record_at(&fine, &Rank::Novice, t + 1),
            Verdict::Accepted { .. }
        ));
    }

    #[test]
    fn simultaneous_posts_accept_only_one() {
        // Two threads submit the same user's sale post at once; the ledger
        // must hand out the window slot exactly once per round.
        let policy = policy();
        for round in 0_i64..200 {
            let mut sub = submission("#продам кросівки 3500 грн");
            sub.user_id = 10_000 + round;
            let barrier = std::sync::Barrier::new(2);
            let accepted = std::thread::scope(|scope| {
                let handles: Vec<_> = (0..2)
                    .map(|_| {
                        scope.spawn(|| {
                            barrier.wait();
                            matches!(
                                policy.evaluate_and_record_at(&sub, &Rank::Novice, 1000),
                                Verdict::Accepted { .. }
                            )
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| handle.join().unwrap_or(false))
                    .filter(|won| *won)
                    .count()
            });
            assert_eq!(accepted, 1, "round {round}");
        }
    }

    #[test]
    fn categories_rate_limit_independently() {
        let policy = policy();
        let t = 1_000_000;

        policy.evaluate_and_record_at(&submission("#продам кросівки 3500 грн"), &Rank::Novice, t);
        let verdict = policy.evaluate_at(&submission("#куплю навушники"), &Rank::Novice, t + 10);
        assert_eq!(
            verdict,
            Verdict::Accepted {
                category: Category::Buy
            }
        );
    }

    #[test]
    fn cooldown_warning_text_names_remaining_time() {
        let violation = Violation::OnCooldown { remaining: 42_900 };
        let text = violation.warning_text("@seller");
        assert!(text.contains("@seller"));
        assert!(text.contains("11 годин та 55 хвилин"));
    }

    #[test]
    fn mention_falls_back_to_first_name() {
        let mut sub = submission("#куплю");
        sub.username = None;
        assert_eq!(sub.mention(), "Іван");
    }
}

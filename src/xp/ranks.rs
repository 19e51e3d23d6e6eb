//! Rank tiers derived from accumulated XP.
//!
//! Six ordinary tiers are reached by crossing ascending XP thresholds.
//! Two special tiers exist only through administrative assignment and are
//! never overwritten by automatic recalculation.

use serde::{Deserialize, Serialize};

/// A user's gamified tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Rank {
    /// Новачок, 0 XP
    Novice,
    /// Учасник, 50 XP
    Member,
    /// Активіст, 150 XP
    Activist,
    /// Авторитет, 300 XP
    Authority,
    /// Ветеран, 600 XP
    Veteran,
    /// Легенда, 1000 XP
    Legend,
    /// Ресейлер: admin-assigned, carries the cooldown bonus allowance
    Reseller,
    /// Адміністратор: admin-assigned
    Administrator,
    /// Any other admin-assigned name (not protected from recalculation)
    Custom(String),
}

/// Ascending XP thresholds for the ordinary tiers.
pub const RANK_THRESHOLDS: [(u32, Rank); 6] = [
    (0, Rank::Novice),
    (50, Rank::Member),
    (150, Rank::Activist),
    (300, Rank::Authority),
    (600, Rank::Veteran),
    (1000, Rank::Legend),
];

impl Rank {
    /// The highest ordinary tier whose threshold is at or below `xp`.
    /// Never returns a special tier.
    #[must_use]
    pub fn from_xp(xp: u32) -> Self {
        RANK_THRESHOLDS
            .iter()
            .rev()
            .find(|(threshold, _)| xp >= *threshold)
            .map_or(Self::Novice, |(_, rank)| rank.clone())
    }

    /// The next ordinary tier above `xp`, with its threshold, if any.
    #[must_use]
    pub fn next_threshold(xp: u32) -> Option<(u32, Self)> {
        RANK_THRESHOLDS
            .iter()
            .find(|(threshold, _)| xp < *threshold)
            .cloned()
    }

    /// Special tiers are immune to automatic recalculation.
    #[must_use]
    pub const fn is_special(&self) -> bool {
        matches!(self, Self::Reseller | Self::Administrator)
    }

    /// Only the Ресейлер tier may post extra times inside an active
    /// cooldown window.
    #[must_use]
    pub const fn has_bonus_allowance(&self) -> bool {
        matches!(self, Self::Reseller)
    }

    /// Display name, as shown in profiles and the leaderboard.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Novice => "Новачок",
            Self::Member => "Учасник",
            Self::Activist => "Активіст",
            Self::Authority => "Авторитет",
            Self::Veteran => "Ветеран",
            Self::Legend => "Легенда",
            Self::Reseller => "Ресейлер",
            Self::Administrator => "Адміністратор",
            Self::Custom(name) => name,
        }
    }

    /// Emoji shown next to the rank name.
    #[must_use]
    pub const fn emoji(&self) -> &'static str {
        match self {
            Self::Novice => "🌱",
            Self::Member => "👤",
            Self::Activist => "⭐",
            Self::Authority => "👑",
            Self::Veteran => "🏆",
            Self::Legend => "💎",
            Self::Reseller => "💰",
            Self::Administrator => "🔥",
            Self::Custom(_) => "❓",
        }
    }
}

impl Default for Rank {
    fn default() -> Self {
        Self::Novice
    }
}

impl std::fmt::Display for Rank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl From<String> for Rank {
    fn from(name: String) -> Self {
        match name.as_str() {
            "Новачок" => Self::Novice,
            "Учасник" => Self::Member,
            "Активіст" => Self::Activist,
            "Авторитет" => Self::Authority,
            "Ветеран" => Self::Veteran,
            "Легенда" => Self::Legend,
            "Ресейлер" => Self::Reseller,
            "Адміністратор" => Self::Administrator,
            _ => Self::Custom(name),
        }
    }
}

impl From<Rank> for String {
    fn from(rank: Rank) -> Self {
        rank.name().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_map_to_tiers() {
        assert_eq!(Rank::from_xp(0), Rank::Novice);
        assert_eq!(Rank::from_xp(49), Rank::Novice);
        assert_eq!(Rank::from_xp(50), Rank::Member);
        assert_eq!(Rank::from_xp(150), Rank::Activist);
        assert_eq!(Rank::from_xp(599), Rank::Authority);
        assert_eq!(Rank::from_xp(600), Rank::Veteran);
        assert_eq!(Rank::from_xp(100_000), Rank::Legend);
    }

    #[test]
    fn from_xp_is_monotonic_and_never_special() {
        let mut previous_idx = 0;
        for xp in 0..=1200 {
            let rank = Rank::from_xp(xp);
            assert!(!rank.is_special());
            let idx = RANK_THRESHOLDS
                .iter()
                .position(|(_, r)| *r == rank)
                .expect("ordinary tier");
            assert!(idx >= previous_idx, "rank regressed at {xp} XP");
            previous_idx = idx;
        }
        assert_eq!(Rank::from_xp(1200), Rank::Legend);
    }

    #[test]
    fn next_threshold_info() {
        assert_eq!(Rank::next_threshold(0), Some((50, Rank::Member)));
        assert_eq!(Rank::next_threshold(999), Some((1000, Rank::Legend)));
        assert_eq!(Rank::next_threshold(1000), None);
    }

    #[test]
    fn name_round_trip() {
        for rank in [
            Rank::Novice,
            Rank::Legend,
            Rank::Reseller,
            Rank::Administrator,
            Rank::Custom("Модератор".to_string()),
        ] {
            assert_eq!(Rank::from(String::from(rank.clone())), rank);
        }
    }
}

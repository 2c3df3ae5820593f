//! Daily claim rules.
//!
//! Pure functions over the last claim time and stored streak; the ledger
//! applies the result.
//!
//! ```text
//! days since last claim   outcome
//! ---------------------   -------------------------------------------
//! never claimed           streak = 1
//! 0 (or clock skew < 0)   rejected, remaining hours reported
//! 1                       streak + 1
//! 2 or more               streak = 1
//! streak reaches 5        reward doubled, streak stored as 0
//! ```
//!
//! Every claim also awards `25 + 5 * stored streak` XP. Reaching
//! `level * 100` XP raises the level by one and spends that much XP; at
//! most one level is gained per claim.

use chrono::{DateTime, Utc};
use serde::Serialize;
use spirit_types::STREAK_LENGTH;

use crate::config::EconomyConfig;

const SECS_PER_HOUR: i64 = 3_600;
const HOURS_PER_DAY: i64 = 24;
const BASE_CLAIM_XP: i64 = 25;
const STREAK_XP: i64 = 5;
const XP_PER_LEVEL: i64 = 100;

/// Which reward tier a claimer belongs to, derived from their roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberTier {
    /// Ordinary member.
    Member,
    /// Server booster.
    Booster,
    /// Administrator. Takes precedence over booster.
    Admin,
}

impl MemberTier {
    /// Base reward for this tier.
    pub const fn base_reward(self, economy: &EconomyConfig) -> i64 {
        match self {
            Self::Member => economy.daily_reward,
            Self::Booster => economy.booster_daily_reward,
            Self::Admin => economy.admin_daily_reward,
        }
    }
}

/// A granted claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimDecision {
    /// Spirit Points to credit.
    pub reward: i64,
    /// Streak to store.
    pub streak: i32,
    /// Streak position reached by this claim, 1..=5.
    pub progress: i32,
    /// Whether this claim completed a streak and paid double.
    pub bonus: bool,
}

/// Decide a claim made at `now`.
///
/// Returns `Err(remaining_hours)` when the previous claim is less than a
/// whole day old.
pub fn evaluate_claim(
    last_claim_at: Option<DateTime<Utc>>,
    stored_streak: i32,
    now: DateTime<Utc>,
    base_reward: i64,
) -> Result<ClaimDecision, i64> {
    let progress = match last_claim_at {
        None => 1,
        Some(last) => {
            let elapsed = now.signed_duration_since(last);
            if elapsed < chrono::TimeDelta::zero() {
                return Err(HOURS_PER_DAY);
            }
            match elapsed.num_days() {
                0 => {
                    let hours = elapsed.num_seconds() / SECS_PER_HOUR;
                    return Err(HOURS_PER_DAY.saturating_sub(hours));
                }
                1 => stored_streak.clamp(0, STREAK_LENGTH.saturating_sub(1)).saturating_add(1),
                _ => 1,
            }
        }
    };

    if progress >= STREAK_LENGTH {
        Ok(ClaimDecision {
            reward: base_reward.saturating_mul(2),
            streak: 0,
            progress: STREAK_LENGTH,
            bonus: true,
        })
    } else {
        Ok(ClaimDecision {
            reward: base_reward,
            streak: progress,
            progress,
            bonus: false,
        })
    }
}

/// Level and XP after a claim's award.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progression {
    /// XP awarded by the claim.
    pub gained: i64,
    /// Level after the award.
    pub level: i32,
    /// XP carried towards the next level.
    pub xp: i64,
    /// Whether the award crossed a level boundary.
    pub leveled_up: bool,
}

/// XP needed to leave `level`.
pub fn xp_to_next_level(level: i32) -> i64 {
    i64::from(level.max(1)).saturating_mul(XP_PER_LEVEL)
}

/// Apply one claim's XP to `level` and `xp`.
///
/// `stored_streak` is the streak written by the claim, so a bonus claim
/// that resets the streak earns the base amount.
pub fn award_claim_xp(level: i32, xp: i64, stored_streak: i32) -> Progression {
    let gained = BASE_CLAIM_XP.saturating_add(i64::from(stored_streak.max(0)).saturating_mul(STREAK_XP));
    let total = xp.max(0).saturating_add(gained);
    let required = xp_to_next_level(level);
    if total >= required {
        Progression {
            gained,
            level: level.max(1).saturating_add(1),
            xp: total.saturating_sub(required),
            leveled_up: true,
        }
    } else {
        Progression {
            gained,
            level: level.max(1),
            xp: total,
            leveled_up: false,
        }
    }
}

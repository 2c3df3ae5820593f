//! Economy tuning.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Reward amounts, limits, and grant durations.
///
/// Deserialized from the `economy` section of the bot configuration; every
/// field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomyConfig {
    /// Daily claim reward for ordinary members, in Spirit Points.
    pub daily_reward: i64,
    /// Daily claim reward for server boosters.
    pub booster_daily_reward: i64,
    /// Daily claim reward for administrators.
    pub admin_daily_reward: i64,
    /// Largest coinflip wager.
    pub max_bet: i64,
    /// Largest amount a single exchange, gift, grant, or removal may move.
    pub max_amount: i64,
    /// Minimum time between two gifts from the same sender to the same
    /// receiver, in seconds.
    pub gift_pair_cooldown_secs: u64,
    /// Lifetime of a temporary admin grant, in seconds.
    pub temp_admin_secs: u64,
    /// Lifetime of a name change card, in seconds.
    pub name_card_secs: u64,
    /// Entries shown by leaderboards.
    pub leaderboard_size: u32,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            daily_reward: 300,
            booster_daily_reward: 350,
            admin_daily_reward: 400,
            max_bet: 20_000,
            max_amount: 1_000_000_000_000,
            gift_pair_cooldown_secs: 86_400,
            temp_admin_secs: 3_600,
            name_card_secs: 86_400,
            leaderboard_size: 10,
        }
    }
}

impl EconomyConfig {
    /// Gift pair cooldown as a [`Duration`].
    pub const fn gift_pair_cooldown(&self) -> Duration {
        Duration::from_secs(self.gift_pair_cooldown_secs)
    }

    /// Temporary admin lifetime as a [`Duration`].
    pub const fn temp_admin_duration(&self) -> Duration {
        Duration::from_secs(self.temp_admin_secs)
    }

    /// Name change card lifetime as a [`Duration`].
    pub const fn name_card_duration(&self) -> Duration {
        Duration::from_secs(self.name_card_secs)
    }
}

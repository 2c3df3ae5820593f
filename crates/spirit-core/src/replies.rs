//! Plain-text reply rendering.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use spirit_ledger::{
    AdminOutcome, CATALOG, ClaimOutcome, CoinflipOutcome, ExchangeOutcome, GiftOutcome,
    xp_to_next_level,
};
use spirit_types::{Currency, LeaderboardEntry, STREAK_LENGTH, UserAccount, UserId};

use crate::command::usage;

/// `1234567` -> `1,234,567`.
pub fn amount(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len().saturating_add(digits.len() / 3).saturating_add(1));
    if value < 0 {
        out.push('-');
    }
    let lead = digits.len() % 3;
    for (i, ch) in digits.chars().enumerate() {
        if i != 0 && i % 3 == lead {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn mention(user: &UserId) -> String {
    format!("<@{user}>")
}

fn streak_bar(progress: i32) -> String {
    (1..=STREAK_LENGTH)
        .map(|step| if step <= progress { '■' } else { '□' })
        .collect()
}

fn level_line(level: i32, xp: i64) -> String {
    format!("Level {level} ({}/{} XP)", amount(xp), amount(xp_to_next_level(level)))
}

pub(crate) fn daily(outcome: &ClaimOutcome) -> String {
    let bonus = if outcome.bonus {
        " Streak complete, reward doubled!"
    } else {
        ""
    };
    let mut out = format!(
        "Daily reward claimed: +{} SP, +{} XP.{bonus}\nStreak {} {}/{STREAK_LENGTH}\nSpirit Points: {}\n{}",
        amount(outcome.reward),
        outcome.xp_gained,
        streak_bar(outcome.progress),
        outcome.progress,
        amount(outcome.spirit_points),
        level_line(outcome.level, outcome.xp),
    );
    if outcome.leveled_up {
        let _ = write!(out, "\nLevel up! You reached level {}.", outcome.level);
    }
    out
}

pub(crate) fn balance(owner: &UserId, currency: Currency, account: &UserAccount) -> String {
    let (label, value) = match currency {
        Currency::Balance => ("Spirit Stones", account.balance),
        Currency::SpiritPoints => ("Spirit Points", account.spirit_points),
    };
    format!(
        "{} holds {} {label} ({}).\n{}",
        mention(owner),
        amount(value),
        currency.symbol(),
        level_line(account.level, account.xp),
    )
}

pub(crate) fn exchange(outcome: &ExchangeOutcome) -> String {
    format!(
        "Exchanged {} SP into {} SS.\nSpirit Points: {} | Spirit Stones: {}",
        amount(outcome.amount),
        amount(outcome.amount),
        amount(outcome.spirit_points),
        amount(outcome.balance),
    )
}

pub(crate) fn coinflip(outcome: &CoinflipOutcome) -> String {
    let verdict = if outcome.won {
        format!("You won {} SP!", amount(outcome.bet))
    } else {
        format!("You lost {} SP.", amount(outcome.bet))
    };
    format!(
        "The coin lands on **{}**. {verdict}\nSpirit Points: {}",
        outcome.landed.name(),
        amount(outcome.spirit_points),
    )
}

pub(crate) fn gift(from: &UserId, to: &UserId, outcome: &GiftOutcome) -> String {
    format!(
        "{} gifted {} SS to {}.\nYour Spirit Stones: {}",
        mention(from),
        amount(outcome.amount),
        mention(to),
        amount(outcome.sender_balance),
    )
}

pub(crate) fn admin(outcome: &AdminOutcome) -> String {
    let verb = if outcome.amount >= 0 { "Granted" } else { "Removed" };
    format!(
        "{verb} {} SS {} {}.\nNew balance: {} SS",
        amount(outcome.amount.saturating_abs()),
        if outcome.amount >= 0 { "to" } else { "from" },
        mention(&outcome.target),
        amount(outcome.balance),
    )
}

pub(crate) fn leaderboard(title: &str, unit: &str, entries: &[LeaderboardEntry], empty: &str) -> String {
    if entries.is_empty() {
        return format!("{title}\n{empty}");
    }
    let mut out = title.to_owned();
    for (rank, entry) in (1_usize..).zip(entries) {
        let _ = write!(
            out,
            "\n#{rank} {} - {} {unit} (Lv {})",
            mention(&entry.user_id),
            amount(entry.value),
            entry.level
        );
    }
    out
}

pub(crate) fn expires(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

pub(crate) fn shop(prefix: &str) -> String {
    let mut out = "Spirit Shop".to_owned();
    for item in CATALOG {
        let _ = write!(
            out,
            "\n- {} (`{}`): {} SS, level {}+. {}",
            item.name,
            item.kind.key(),
            amount(item.price),
            item.level_req,
            item.description
        );
    }
    let _ = write!(out, "\nBuy with `{}`.", usage(prefix, "buy"));
    out
}

pub(crate) fn help(prefix: &str) -> String {
    const ENTRIES: [(&str, &str); 14] = [
        ("daily", "Claim your daily Spirit Points"),
        ("ssbal", "Show a Spirit Stone balance"),
        ("spbal", "Show a Spirit Point balance"),
        ("exchange", "Convert Spirit Points into Spirit Stones (1:1)"),
        ("coinflip", "Bet Spirit Points on a coin flip"),
        ("shop", "List the items for sale"),
        ("buy", "Buy an item from the shop"),
        ("gift", "Give Spirit Stones to another member"),
        ("transfer", "[admin] Grant Spirit Stones"),
        ("remove", "[admin] Remove Spirit Stones"),
        ("top", "Richest members"),
        ("lucky", "Biggest coinflip winners this month"),
        ("unlucky", "Biggest coinflip losers this month"),
        ("help", "This list"),
    ];
    let mut out = "Commands".to_owned();
    for (name, text) in ENTRIES {
        let _ = write!(out, "\n`{}` {text}", usage(prefix, name));
    }
    out
}

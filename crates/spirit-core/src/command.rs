//! Command parsing.
//!
//! A command is `<prefix><name> <args...>` with whitespace-separated
//! arguments. Member arguments accept a mention (`<@id>`, `<@!id>`) or a
//! bare numeric id.

use spirit_ledger::{Amount, ShopItemKind};
use spirit_types::{CoinFace, Currency, UserId};

/// A parsed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Claim the daily Spirit Points reward.
    Daily,
    /// Show a Spirit Stone balance.
    StoneBalance {
        /// Whose balance; the caller when absent.
        member: Option<UserId>,
    },
    /// Show a Spirit Point balance.
    PointBalance {
        /// Whose balance; the caller when absent.
        member: Option<UserId>,
    },
    /// Convert Spirit Points into Spirit Stones.
    Exchange {
        /// How much to convert.
        amount: Amount,
    },
    /// Bet Spirit Points on a coin flip.
    Coinflip {
        /// Called face.
        guess: CoinFace,
        /// Wager.
        amount: Amount,
    },
    /// List the shop.
    Shop,
    /// Buy a shop item.
    Buy {
        /// Item bought.
        item: ShopItemKind,
        /// Target member, for name change cards.
        target: Option<UserId>,
        /// New nickname, for name change cards.
        nickname: Option<String>,
    },
    /// Gift Spirit Stones.
    Gift {
        /// Receiver.
        to: UserId,
        /// Spirit Stones sent.
        amount: i64,
    },
    /// Administrator credit.
    Transfer {
        /// Account credited.
        to: UserId,
        /// Spirit Stones added.
        amount: i64,
    },
    /// Administrator debit.
    Remove {
        /// Account debited.
        from: UserId,
        /// Spirit Stones removed.
        amount: i64,
    },
    /// Richest members.
    Top {
        /// Ranked currency.
        currency: Currency,
    },
    /// Biggest gambling winners this month.
    Lucky,
    /// Biggest gambling losers this month.
    Unlucky,
    /// Command reference.
    Help,
}

impl Command {
    /// Name used for cooldown keys and logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::StoneBalance { .. } => "ssbal",
            Self::PointBalance { .. } => "spbal",
            Self::Exchange { .. } => "exchange",
            Self::Coinflip { .. } => "coinflip",
            Self::Shop => "shop",
            Self::Buy { .. } => "buy",
            Self::Gift { .. } => "gift",
            Self::Transfer { .. } => "transfer",
            Self::Remove { .. } => "remove",
            Self::Top { .. } => "top",
            Self::Lucky => "lucky",
            Self::Unlucky => "unlucky",
            Self::Help => "help",
        }
    }
}

/// Why a message did not parse into a command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The message does not start with the prefix.
    #[error("not a command")]
    NotACommand,

    /// No command has this name.
    #[error("Unknown command `{0}`.")]
    Unknown(String),

    /// The arguments did not match the command's usage.
    #[error("Usage: {0}")]
    Usage(String),
}

/// Usage line for a command, with the prefix applied.
pub fn usage(prefix: &str, name: &str) -> String {
    let args = match name {
        "ssbal" | "spbal" => " [member]",
        "exchange" => " <amount|all>",
        "coinflip" => " <heads|tails> <amount|all>",
        "buy" => " <item> [member] [new nickname]",
        "gift" | "transfer" | "remove" => " <member> <amount>",
        "top" => " [ss|sp]",
        _ => "",
    };
    format!("{prefix}{name}{args}")
}

/// Parse `text` as a command under `prefix`.
pub fn parse(prefix: &str, text: &str) -> Result<Command, ParseError> {
    let body = text.trim_start().strip_prefix(prefix).ok_or(ParseError::NotACommand)?;
    let mut words = body.split_whitespace();
    let name = words
        .next()
        .map(str::to_ascii_lowercase)
        .ok_or(ParseError::NotACommand)?;
    let args: Vec<&str> = words.collect();
    let bad_usage = || ParseError::Usage(usage(prefix, &name));

    let command = match (name.as_str(), args.as_slice()) {
        ("daily", []) => Command::Daily,
        ("ssbal", rest) => Command::StoneBalance {
            member: optional_member(rest).ok_or_else(bad_usage)?,
        },
        ("spbal", rest) => Command::PointBalance {
            member: optional_member(rest).ok_or_else(bad_usage)?,
        },
        ("exchange", [amount]) => Command::Exchange {
            amount: Amount::parse(amount).ok_or_else(bad_usage)?,
        },
        ("coinflip", [guess, amount]) => Command::Coinflip {
            guess: CoinFace::parse(guess).ok_or_else(bad_usage)?,
            amount: Amount::parse(amount).ok_or_else(bad_usage)?,
        },
        ("shop", []) => Command::Shop,
        ("buy", [item, rest @ ..]) => {
            let item = ShopItemKind::parse(item).ok_or_else(|| {
                ParseError::Usage(format!("{} (see {prefix}shop)", usage(prefix, "buy")))
            })?;
            let (target, nickname) = match rest {
                [] => (None, None),
                [member, nick @ ..] => {
                    let nickname = nick.join(" ");
                    (
                        Some(parse_member(member).ok_or_else(bad_usage)?),
                        (!nickname.is_empty()).then_some(nickname),
                    )
                }
            };
            Command::Buy {
                item,
                target,
                nickname,
            }
        }
        ("gift", [member, amount]) => Command::Gift {
            to: parse_member(member).ok_or_else(bad_usage)?,
            amount: parse_exact(amount).ok_or_else(bad_usage)?,
        },
        ("transfer", [member, amount]) => Command::Transfer {
            to: parse_member(member).ok_or_else(bad_usage)?,
            amount: parse_exact(amount).ok_or_else(bad_usage)?,
        },
        ("remove", [member, amount]) => Command::Remove {
            from: parse_member(member).ok_or_else(bad_usage)?,
            amount: parse_exact(amount).ok_or_else(bad_usage)?,
        },
        ("top", []) => Command::Top {
            currency: Currency::Balance,
        },
        ("top", [which]) => Command::Top {
            currency: parse_currency(which).ok_or_else(bad_usage)?,
        },
        ("lucky", []) => Command::Lucky,
        ("unlucky", []) => Command::Unlucky,
        ("help", _) => Command::Help,
        (
            "daily" | "exchange" | "coinflip" | "shop" | "gift" | "transfer" | "remove" | "top"
            | "lucky" | "unlucky",
            _,
        ) => return Err(bad_usage()),
        _ => return Err(ParseError::Unknown(name)),
    };
    Ok(command)
}

/// Parse a mention or a bare numeric id.
pub fn parse_member(raw: &str) -> Option<UserId> {
    let id = raw
        .strip_prefix("<@!")
        .or_else(|| raw.strip_prefix("<@"))
        .and_then(|rest| rest.strip_suffix('>'))
        .unwrap_or(raw);
    (!id.is_empty() && id.bytes().all(|b| b.is_ascii_digit())).then(|| UserId::new(id))
}

/// `None` means the arguments were invalid; `Some(None)` means absent.
fn optional_member(args: &[&str]) -> Option<Option<UserId>> {
    match args {
        [] => Some(None),
        [member] => parse_member(member).map(Some),
        _ => None,
    }
}

fn parse_exact(raw: &str) -> Option<i64> {
    match Amount::parse(raw)? {
        Amount::Exact(n) => Some(n),
        Amount::All => None,
    }
}

fn parse_currency(raw: &str) -> Option<Currency> {
    match raw.to_ascii_lowercase().as_str() {
        "ss" | "stones" | "balance" => Some(Currency::Balance),
        "sp" | "points" => Some(Currency::SpiritPoints),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mentions_and_raw_ids_parse() {
        assert_eq!(parse_member("<@123>"), Some(UserId::new("123")));
        assert_eq!(parse_member("<@!456>"), Some(UserId::new("456")));
        assert_eq!(parse_member("789"), Some(UserId::new("789")));
        assert_eq!(parse_member("<@&42>"), None);
        assert_eq!(parse_member("bob"), None);
        assert_eq!(parse_member("<@>"), None);
    }

    #[test]
    fn commands_parse_with_arguments() {
        assert_eq!(parse("!", "!daily"), Ok(Command::Daily));
        assert_eq!(
            parse("!", "!COINFLIP heads all"),
            Ok(Command::Coinflip {
                guess: CoinFace::Heads,
                amount: Amount::All
            })
        );
        assert_eq!(
            parse("!", "!gift <@!22> 1,500"),
            Ok(Command::Gift {
                to: UserId::new("22"),
                amount: 1_500
            })
        );
        assert_eq!(
            parse("!", "!ssbal <@5>"),
            Ok(Command::StoneBalance {
                member: Some(UserId::new("5"))
            })
        );
        assert_eq!(
            parse("!", "!top sp"),
            Ok(Command::Top {
                currency: Currency::SpiritPoints
            })
        );
    }

    #[test]
    fn name_change_card_keeps_spaces_in_nickname() {
        assert_eq!(
            parse("!", "!buy name_change_card <@9> Sir   Fluffy Pants"),
            Ok(Command::Buy {
                item: ShopItemKind::NameChangeCard,
                target: Some(UserId::new("9")),
                nickname: Some("Sir Fluffy Pants".to_owned()),
            })
        );
        assert_eq!(
            parse("!", "!buy temp_admin"),
            Ok(Command::Buy {
                item: ShopItemKind::TempAdmin,
                target: None,
                nickname: None,
            })
        );
    }

    #[test]
    fn bad_input_is_classified() {
        assert_eq!(parse("!", "hello there"), Err(ParseError::NotACommand));
        assert_eq!(parse("!", "!"), Err(ParseError::NotACommand));
        assert_eq!(
            parse("!", "!dance"),
            Err(ParseError::Unknown("dance".to_owned()))
        );
        assert_eq!(
            parse("!", "!gift bob 10"),
            Err(ParseError::Usage("!gift <member> <amount>".to_owned()))
        );
        assert_eq!(
            parse("!", "!gift <@1> all"),
            Err(ParseError::Usage("!gift <member> <amount>".to_owned()))
        );
        assert!(matches!(parse("!", "!coinflip edge 10"), Err(ParseError::Usage(_))));
        assert!(matches!(parse("!", "!daily now"), Err(ParseError::Usage(_))));
        assert!(matches!(parse("!", "!buy dragon"), Err(ParseError::Usage(_))));
    }
}

//! The shop catalog.

use serde::Serialize;

/// Item kinds sold in the shop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShopItemKind {
    /// Permanently protects the buyer's nickname from name change cards.
    NicknameLock,
    /// Temporary administrator role.
    TempAdmin,
    /// Permanent prestige role.
    HmwRole,
    /// Sets another member's nickname for a limited time.
    NameChangeCard,
}

impl ShopItemKind {
    /// Catalog key typed by users.
    pub const fn key(self) -> &'static str {
        match self {
            Self::NicknameLock => "nickname_lock",
            Self::TempAdmin => "temp_admin",
            Self::HmwRole => "hmw_role",
            Self::NameChangeCard => "name_change_card",
        }
    }

    /// Look up an item by catalog key, case-insensitively.
    pub fn parse(raw: &str) -> Option<Self> {
        CATALOG
            .iter()
            .map(|item| item.kind)
            .find(|kind| kind.key().eq_ignore_ascii_case(raw.trim()))
    }

    /// Catalog entry for this kind.
    pub const fn item(self) -> &'static ShopItem {
        match self {
            Self::NicknameLock => &NICKNAME_LOCK,
            Self::TempAdmin => &TEMP_ADMIN,
            Self::HmwRole => &HMW_ROLE,
            Self::NameChangeCard => &NAME_CHANGE_CARD,
        }
    }

    /// Whether a purchase needs a target member and a nickname.
    pub const fn needs_target(self) -> bool {
        matches!(self, Self::NameChangeCard)
    }
}

/// One catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShopItem {
    /// Item kind.
    pub kind: ShopItemKind,
    /// Display name.
    pub name: &'static str,
    /// Price in Spirit Stones.
    pub price: i64,
    /// Lowest level allowed to buy it.
    pub level_req: i32,
    /// One-line description.
    pub description: &'static str,
}

static NICKNAME_LOCK: ShopItem = ShopItem {
    kind: ShopItemKind::NicknameLock,
    name: "Nickname Lock",
    price: 5_000,
    level_req: 15,
    description: "Locks your nickname from changes",
};

static TEMP_ADMIN: ShopItem = ShopItem {
    kind: ShopItemKind::TempAdmin,
    name: "Temp Admin",
    price: 25_000,
    level_req: 20,
    description: "Gives temporary admin role for 1 hour",
};

static HMW_ROLE: ShopItem = ShopItem {
    kind: ShopItemKind::HmwRole,
    name: "HMW Role",
    price: 50_000,
    level_req: 30,
    description: "Grants the prestigious HMW role",
};

static NAME_CHANGE_CARD: ShopItem = ShopItem {
    kind: ShopItemKind::NameChangeCard,
    name: "Name Change Card",
    price: 10_000,
    level_req: 10,
    description: "Changes another member's nickname for 24 hours",
};

/// Every item for sale, in display order.
pub static CATALOG: [&ShopItem; 4] = [&NICKNAME_LOCK, &TEMP_ADMIN, &HMW_ROLE, &NAME_CHANGE_CARD];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_resolve_to_their_items() {
        for item in CATALOG {
            assert_eq!(ShopItemKind::parse(item.kind.key()), Some(item.kind));
            assert_eq!(item.kind.item(), item);
        }
        assert_eq!(ShopItemKind::parse(" Temp_Admin "), Some(ShopItemKind::TempAdmin));
        assert_eq!(ShopItemKind::parse("dragon"), None);
    }

    #[test]
    fn prices_are_positive() {
        assert!(CATALOG.iter().all(|item| item.price > 0));
    }

    #[test]
    fn level_requirements() {
        let required: Vec<_> = CATALOG.iter().map(|item| (item.kind.key(), item.level_req)).collect();
        assert_eq!(
            required,
            [("nickname_lock", 15), ("temp_admin", 20), ("hmw_role", 30), ("name_change_card", 10)]
        );
    }
}

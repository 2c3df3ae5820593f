//! Shared application state for the HTTP surface.

use spirit_core::BotContext;

/// State shared by every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The bot's components.
    pub bot: BotContext,
}

impl AppState {
    /// Wrap a bot context.
    pub const fn new(bot: BotContext) -> Self {
        Self { bot }
    }
}

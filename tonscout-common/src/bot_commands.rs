use serde::{Deserialize, Serialize};
use teloxide::prelude::{ChatId, UserId};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListingKind {
    /// Ranked by capitalization.
    Biggest,
    /// Ranked by absolute price change.
    Hottest,
    /// BigPump coins that got STON.fi liquidity and weren't announced yet.
    NewTokens,
}

impl ListingKind {
    pub fn title(&self) -> &'static str {
        match self {
            ListingKind::Biggest => "Biggest TON tokens",
            ListingKind::Hottest => "Hottest TON tokens",
            ListingKind::NewTokens => "New BigPump tokens with liquidity",
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub enum TgCommand {
    ListingsRefresh(ChatId, ListingKind),
    ListingsIgnored(ChatId),
    ListingsIgnorePrompt(ChatId),
    CancelListingsIgnore(ChatId),
    ListingsDeignore(ChatId, String),
    GenericDeleteCurrentMessage { allowed_user: Option<UserId> },
}

/// Pending input expected from a user in DM.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum MessageCommand {
    None,
    Start(String),
    ListingsIgnore(ChatId),
}

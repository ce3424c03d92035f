use std::{
    collections::{HashMap, HashSet},
    path::Path,
    time::Duration,
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tonscout_common::{
    bot_commands::ListingKind,
    teloxide::types::{ChatId, MessageId},
    utils::store::PersistentCachedStore,
};
use tokio::time::Instant;

use crate::{
    config::ListingsConfig,
    select::{address_key, IgnoreSet, SelectParams, SortKey},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatListingsSettings {
    #[serde(default)]
    pub ignored: IgnoreSet,
    #[serde(default)]
    pub auto_refresh: Option<Duration>,
    #[serde(default)]
    pub pin: bool,
    /// Subscribed to new-token announcements.
    #[serde(default)]
    pub new_tokens: bool,
    pub min_cap: f64,
    pub max_cap: f64,
    pub min_abs_change: f64,
    pub max_results: usize,
    #[serde(default)]
    pub sort: SortKey,
}

impl ChatListingsSettings {
    pub fn from_config(config: &ListingsConfig) -> Self {
        Self {
            ignored: IgnoreSet::new(),
            auto_refresh: None,
            pin: false,
            new_tokens: false,
            min_cap: config.defaults.min_cap,
            max_cap: config.defaults.max_cap,
            min_abs_change: config.defaults.min_abs_change,
            max_results: config.defaults.max_results,
            sort: config.defaults.sort,
        }
    }

    /// Pipeline parameters for a listing kind. The hot listing always ranks by change.
    pub fn select_params(&self, kind: ListingKind, min_volume: Option<f64>) -> SelectParams {
        SelectParams {
            min_cap: self.min_cap,
            max_cap: self.max_cap,
            min_abs_change: self.min_abs_change,
            min_volume,
            max_results: self.max_results,
            sort: match kind {
                ListingKind::Hottest => SortKey::ChangeDesc,
                _ => self.sort,
            },
        }
    }
}

/// In-memory state of one chat. Lost on restart, nothing in here is needed to recover.
#[derive(Debug, Default, Clone)]
pub struct ChatSession {
    pub last_rendered: HashMap<ListingKind, String>,
    pub last_message: HashMap<ListingKind, MessageId>,
    pub pinned_message: Option<MessageId>,
    pub last_auto_refresh: Option<Instant>,
}

impl ChatSession {
    pub fn auto_refresh_due(&self, interval: Duration, now: Instant) -> bool {
        match self.last_auto_refresh {
            Some(last) => now.saturating_duration_since(last) >= interval,
            None => true,
        }
    }
}

/// Feed snapshot shared by all chats, refreshed by the poll loop.
#[derive(Debug, Clone)]
pub struct FeedSnapshot<T> {
    pub data: T,
    pub fetched_at: DateTime<Utc>,
}

pub struct ListingsStore {
    settings: PersistentCachedStore<ChatId, ChatListingsSettings>,
    announced: PersistentCachedStore<ChatId, HashSet<String>>,
    sessions: DashMap<ChatId, ChatSession>,
    defaults: ChatListingsSettings,
}

impl ListingsStore {
    pub async fn new(
        data_dir: &Path,
        name: &str,
        defaults: ChatListingsSettings,
    ) -> Result<Self, anyhow::Error> {
        Ok(Self {
            settings: PersistentCachedStore::new(data_dir, &format!("{name}_settings")).await?,
            announced: PersistentCachedStore::new(data_dir, &format!("{name}_announced"))
                .await?,
            sessions: DashMap::new(),
            defaults,
        })
    }

    pub async fn settings(&self, chat_id: ChatId) -> ChatListingsSettings {
        self.settings
            .get(&chat_id)
            .await
            .unwrap_or_else(|| self.defaults.clone())
    }

    /// Applies `edit` to the chat settings under the chat's lock and persists the result.
    pub async fn edit_settings<R>(
        &self,
        chat_id: ChatId,
        edit: impl FnOnce(&mut ChatListingsSettings) -> R,
    ) -> Result<R, anyhow::Error> {
        self.settings
            .edit(chat_id, edit, Some(self.defaults.clone()))
            .await
    }

    /// Returns `false` if the address was already ignored.
    pub async fn ignore(&self, chat_id: ChatId, address: &str) -> Result<bool, anyhow::Error> {
        let key = address_key(address);
        self.edit_settings(chat_id, move |settings| settings.ignored.insert(key))
            .await
    }

    /// Returns `false` if the address wasn't ignored.
    pub async fn deignore(&self, chat_id: ChatId, address: &str) -> Result<bool, anyhow::Error> {
        let key = address_key(address);
        self.edit_settings(chat_id, move |settings| settings.ignored.remove(&key))
            .await
    }

    pub async fn chats(&self) -> Vec<(ChatId, ChatListingsSettings)> {
        match self.settings.values().await {
            Ok(values) => values
                .map(|entry| (*entry.key(), entry.value().clone()))
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    pub async fn announced(&self, chat_id: ChatId) -> HashSet<String> {
        self.announced.get(&chat_id).await.unwrap_or_default()
    }

    pub async fn mark_announced(
        &self,
        chat_id: ChatId,
        addresses: impl IntoIterator<Item = String>,
    ) -> Result<(), anyhow::Error> {
        let keys: Vec<String> = addresses.into_iter().map(|a| address_key(&a)).collect();
        if keys.is_empty() {
            return Ok(());
        }
        self.announced
            .edit(chat_id, move |announced| announced.extend(keys), Some(HashSet::new()))
            .await
    }

    pub fn session(&self, chat_id: ChatId) -> ChatSession {
        self.sessions
            .get(&chat_id)
            .map(|session| session.clone())
            .unwrap_or_default()
    }

    pub fn edit_session<R>(&self, chat_id: ChatId, edit: impl FnOnce(&mut ChatSession) -> R) -> R {
        let mut session = self.sessions.entry(chat_id).or_default();
        edit(session.value_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "0:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn defaults() -> ChatListingsSettings {
        ChatListingsSettings::from_config(&ListingsConfig::default())
    }

    #[tokio::test]
    async fn ignore_set_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let chat = ChatId(-1001);
        {
            let store = ListingsStore::new(dir.path(), "listings", defaults()).await.unwrap();
            assert!(store.ignore(chat, RAW).await.unwrap());
            assert!(!store.ignore(chat, &RAW.to_uppercase()).await.unwrap());
        }
        let store = ListingsStore::new(dir.path(), "listings", defaults()).await.unwrap();
        let settings = store.settings(chat).await;
        assert!(settings.ignored.contains(RAW));
        assert!(store.deignore(chat, RAW).await.unwrap());
        assert!(!store.deignore(chat, RAW).await.unwrap());
        assert!(store.settings(chat).await.ignored.is_empty());
    }

    #[tokio::test]
    async fn unknown_chats_get_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = ListingsStore::new(dir.path(), "listings", defaults()).await.unwrap();
        assert_eq!(store.settings(ChatId(5)).await, defaults());
        assert!(store.chats().await.is_empty());
    }

    #[tokio::test]
    async fn announced_addresses_are_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let store = ListingsStore::new(dir.path(), "listings", defaults()).await.unwrap();
        let friendly = tonscout_common::utils::address::canonicalize(RAW, true, false).unwrap();
        store.mark_announced(ChatId(1), [friendly]).await.unwrap();
        assert!(store.announced(ChatId(1)).await.contains(RAW));
        assert!(store.announced(ChatId(2)).await.is_empty());
    }

    #[test]
    fn hot_listing_ranks_by_change() {
        let settings = defaults();
        assert_eq!(
            settings.select_params(ListingKind::Hottest, None).sort,
            SortKey::ChangeDesc
        );
        assert_eq!(settings.select_params(ListingKind::Biggest, None).sort, settings.sort);
    }

    #[test]
    fn auto_refresh_due() {
        let now = Instant::now();
        let mut session = ChatSession::default();
        assert!(session.auto_refresh_due(Duration::from_secs(60), now));
        session.last_auto_refresh = Some(now);
        assert!(!session.auto_refresh_due(Duration::from_secs(60), now));
        assert!(session.auto_refresh_due(Duration::from_secs(60), now + Duration::from_secs(61)));
    }
}

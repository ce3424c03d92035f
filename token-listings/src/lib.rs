pub mod config;
pub mod records;
pub mod render;
pub mod select;
pub mod session;
pub mod sources;

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use tokio::{sync::RwLock, time::Instant};
use tonscout_common::{
    bot_commands::{ListingKind, MessageCommand, TgCommand},
    state::{ScoutBotModule, ScoutState},
    teloxide::{
        prelude::{ChatId, Message, UserId},
        types::{InlineKeyboardButton, InlineKeyboardMarkup, MessageId},
        utils::markdown,
    },
    tgbot::{split_command, BotData, MustAnswerCallbackQuery, TgCallbackContext},
    utils::{
        address::normalize_address,
        chat::{check_admin_permission_in_chat, get_chat_title_cached_5m, DM_CHAT},
        format_duration,
        parse_duration, tokens::format_compact_usd,
    },
};

use crate::{
    config::{ListingsConfig, NEW_TOKENS_FIRST_RUN, NEW_TOKENS_LIMIT},
    records::TokenRecord,
    render::{mark_cached, render_listing, render_new_tokens, StaleReason},
    select::{select, select_new_listings},
    session::{ChatListingsSettings, FeedSnapshot, ListingsStore},
    sources::{fetch_listings, fetch_new_token_inputs},
};

const MIN_AUTO_REFRESH: Duration = Duration::from_secs(60);

const HELP_TEXT: &str = "👋 *Welcome\\!*

I track TON token listings and new BigPump tokens with STON\\.fi liquidity\\.

*Commands:*
/listings \\- biggest tokens in the capitalization band
/hot \\- biggest movers in the band
/newtokens \\- new tokens with liquidity
/ignore `address` \\- hide a token in this chat
/deignore `address` \\- show it again
/ignored \\- hidden tokens
/autorefresh `30m`\\|`off` \\- repost /listings periodically
/pin `on`\\|`off` \\- pin the latest listing
/band `min` `max` \\- capitalization band in USD, e\\.g\\. `/band 10k 1m`
/threshold `percent` \\- minimum absolute price change";

const FETCH_FAILED_TEXT: &str = "⚠️ Couldn't load token listings right now, try again later\\.";

pub struct TokenListingsModule {
    service: Arc<ListingsService>,
}

struct ListingsService {
    state: Arc<ScoutState>,
    config: ListingsConfig,
    stores: HashMap<UserId, Arc<ListingsStore>>,
    feed: RwLock<Option<FeedSnapshot<Vec<TokenRecord>>>>,
}

struct Rendered {
    text: String,
    is_empty: bool,
    /// New tokens in `text`, marked announced only once the message is delivered.
    announce: Vec<String>,
}

struct Settled {
    text: String,
    announce: Vec<String>,
}

impl TokenListingsModule {
    /// Bots must be added to `state` before the module is created.
    pub async fn new(state: Arc<ScoutState>, config: ListingsConfig) -> Result<Self, anyhow::Error> {
        let defaults = ChatListingsSettings::from_config(&config);
        let mut stores = HashMap::new();
        for bot in state.bots() {
            let bot_id = bot.id();
            let store = ListingsStore::new(
                state.data_dir(),
                &format!("bot{bot_id}_token_listings"),
                defaults.clone(),
            )
            .await?;
            stores.insert(bot_id, Arc::new(store));
            log::info!("Token listings store loaded for bot {bot_id}");
        }
        Ok(Self {
            service: Arc::new(ListingsService {
                state,
                config,
                stores,
                feed: RwLock::new(None),
            }),
        })
    }
}

/// `10000`, `12.5k`, `$1,000,000`, `1.5M`.
pub fn parse_usd_amount(input: &str) -> Option<f64> {
    let cleaned = input.trim().trim_start_matches('$').replace([',', '_'], "");
    let lower = cleaned.to_lowercase();
    let (number, multiplier) = if let Some(n) = lower.strip_suffix('k') {
        (n, 1e3)
    } else if let Some(n) = lower.strip_suffix('m') {
        (n, 1e6)
    } else if let Some(n) = lower.strip_suffix('b') {
        (n, 1e9)
    } else {
        (lower.as_str(), 1.0)
    };
    let value = number.trim().parse::<f64>().ok()? * multiplier;
    (value.is_finite() && value >= 0.0).then_some(value)
}

fn short_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= 14 {
        return address.to_string();
    }
    let head: String = chars[..8].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}

async fn listing_keyboard(
    bot: &BotData,
    chat_id: ChatId,
    kind: ListingKind,
) -> Result<InlineKeyboardMarkup, anyhow::Error> {
    let mut buttons = vec![vec![InlineKeyboardButton::callback(
        "🔄 Refresh",
        bot.to_callback_data(&TgCommand::ListingsRefresh(chat_id, kind))
            .await?,
    )]];
    if kind != ListingKind::NewTokens {
        buttons.push(vec![InlineKeyboardButton::callback(
            "🚫 Ignored tokens",
            bot.to_callback_data(&TgCommand::ListingsIgnored(chat_id))
                .await?,
        )]);
    }
    Ok(InlineKeyboardMarkup::new(buttons))
}

impl ListingsService {
    fn store(&self, bot_id: UserId) -> Result<Arc<ListingsStore>, anyhow::Error> {
        self.stores
            .get(&bot_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("No token listings store for bot {bot_id}"))
    }

    async fn refresh_feed(&self) -> Result<FeedSnapshot<Vec<TokenRecord>>, anyhow::Error> {
        let ton_usd = self.state.ton_usd_price().await;
        let records = fetch_listings(self.config.source, ton_usd).await?;
        log::debug!(
            "Fetched {} records from {}",
            records.len(),
            self.config.source
        );
        let snapshot = FeedSnapshot {
            data: records,
            fetched_at: Utc::now(),
        };
        *self.feed.write().await = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// The shared snapshot if the poll loop refreshed it recently, a fresh fetch otherwise.
    async fn current_feed(&self) -> Result<FeedSnapshot<Vec<TokenRecord>>, anyhow::Error> {
        if let Some(snapshot) = self.feed.read().await.as_ref() {
            let age = Utc::now().signed_duration_since(snapshot.fetched_at);
            let fresh = age
                .to_std()
                .map_or(true, |age| age < self.config.poll_interval * 2);
            if fresh {
                return Ok(snapshot.clone());
            }
        }
        self.refresh_feed().await
    }

    async fn fresh_listing(
        &self,
        store: &ListingsStore,
        chat_id: ChatId,
        kind: ListingKind,
    ) -> Result<Rendered, anyhow::Error> {
        let feed = self.current_feed().await?;
        let settings = store.settings(chat_id).await;
        let params = settings.select_params(kind, self.config.defaults.min_volume);
        let selected = select(&feed.data, &params, &settings.ignored);
        Ok(Rendered {
            is_empty: selected.is_empty(),
            text: render_listing(kind, &selected, &params, &self.config.links, feed.fetched_at),
            announce: Vec::new(),
        })
    }

    /// Picks unannounced coins for the chat. The caller marks them announced after sending.
    async fn new_tokens_for_chat(
        &self,
        store: &ListingsStore,
        chat_id: ChatId,
        coins: &[TokenRecord],
        liquid: &HashSet<String>,
    ) -> Rendered {
        let settings = store.settings(chat_id).await;
        let announced = store.announced(chat_id).await;
        let selected =
            select_new_listings(coins, liquid, &announced, &settings.ignored, NEW_TOKENS_LIMIT);
        Rendered {
            is_empty: selected.is_empty(),
            text: render_new_tokens(&selected, &self.config.links, Utc::now()),
            announce: selected.into_iter().map(|coin| coin.address).collect(),
        }
    }

    async fn fresh_new_tokens(
        &self,
        store: &ListingsStore,
        chat_id: ChatId,
    ) -> Result<Rendered, anyhow::Error> {
        let ton_usd = self.state.ton_usd_price().await;
        let (coins, liquid) = fetch_new_token_inputs(ton_usd).await?;
        Ok(self
            .new_tokens_for_chat(store, chat_id, &coins, &liquid)
            .await)
    }

    /// Renders a fresh listing, or the last good one for this chat if the fetch failed
    /// or nothing qualified. An empty new-token run is final: it means nothing new.
    fn settle(
        &self,
        store: &ListingsStore,
        chat_id: ChatId,
        kind: ListingKind,
        fresh: Result<Rendered, anyhow::Error>,
    ) -> Settled {
        if let Err(err) = &fresh {
            log::warn!("Failed to build {kind:?} listing for {chat_id}: {err:?}");
        }
        let cached = store.session(chat_id).last_rendered.get(&kind).cloned();
        let text = match (fresh, cached) {
            (Ok(rendered), _) if !rendered.is_empty => {
                store.edit_session(chat_id, |session| {
                    session.last_rendered.insert(kind, rendered.text.clone())
                });
                return Settled {
                    text: rendered.text,
                    announce: rendered.announce,
                };
            }
            (Ok(rendered), _) if kind == ListingKind::NewTokens => rendered.text,
            (Ok(_), Some(cached)) => mark_cached(&cached, StaleReason::NothingQualified),
            (Err(_), Some(cached)) => mark_cached(&cached, StaleReason::FetchFailed),
            (Ok(rendered), None) => rendered.text,
            (Err(_), None) => FETCH_FAILED_TEXT.to_string(),
        };
        Settled {
            text,
            announce: Vec::new(),
        }
    }

    async fn listing_text(&self, store: &ListingsStore, chat_id: ChatId, kind: ListingKind) -> Settled {
        let fresh = match kind {
            ListingKind::NewTokens => self.fresh_new_tokens(store, chat_id).await,
            _ => self.fresh_listing(store, chat_id, kind).await,
        };
        self.settle(store, chat_id, kind, fresh)
    }

    /// Records that the tokens of a delivered listing were announced to the chat.
    async fn delivered(
        &self,
        store: &ListingsStore,
        chat_id: ChatId,
        announce: Vec<String>,
    ) -> Result<(), anyhow::Error> {
        store.mark_announced(chat_id, announce).await
    }

    async fn send_listing(
        &self,
        bot: &BotData,
        store: &ListingsStore,
        chat_id: ChatId,
        kind: ListingKind,
        listing: Settled,
    ) -> Result<(), anyhow::Error> {
        let keyboard = listing_keyboard(bot, chat_id, kind).await?;
        let message = bot.send_text_message(chat_id, listing.text, keyboard).await?;
        self.delivered(store, chat_id, listing.announce).await?;
        store.edit_session(chat_id, |session| {
            session.last_message.insert(kind, message.id)
        });
        if kind != ListingKind::NewTokens && store.settings(chat_id).await.pin {
            self.pin(bot, store, chat_id, message.id).await;
        }
        Ok(())
    }

    async fn post_listing(
        &self,
        bot: &BotData,
        store: &ListingsStore,
        chat_id: ChatId,
        kind: ListingKind,
    ) -> Result<(), anyhow::Error> {
        let listing = self.listing_text(store, chat_id, kind).await;
        self.send_listing(bot, store, chat_id, kind, listing).await
    }

    /// Pins `message_id` and unpins whatever this chat had pinned before.
    async fn pin(&self, bot: &BotData, store: &ListingsStore, chat_id: ChatId, message_id: MessageId) {
        let previous = store.edit_session(chat_id, |session| session.pinned_message.replace(message_id));
        if let Some(previous) = previous.filter(|previous| *previous != message_id) {
            if let Err(err) = bot.unpin_message(chat_id, previous).await {
                log::warn!("Failed to unpin {previous:?} in {chat_id}: {err:?}");
            }
        }
        if let Err(err) = bot.pin_message(chat_id, message_id).await {
            log::warn!("Failed to pin {message_id:?} in {chat_id}: {err:?}");
        }
    }

    async fn ignored_view(
        &self,
        bot: &BotData,
        store: &ListingsStore,
        chat_id: ChatId,
    ) -> Result<(String, InlineKeyboardMarkup), anyhow::Error> {
        let settings = store.settings(chat_id).await;
        let mut ignored: Vec<String> = settings.ignored.into_iter().collect();
        ignored.sort();

        let chat_name = if chat_id.is_user() {
            DM_CHAT.to_string()
        } else {
            get_chat_title_cached_5m(bot.bot(), chat_id)
                .await?
                .unwrap_or_else(|| "this chat".to_string())
        };
        let mut text = format!(
            "🚫 *Ignored tokens for {}*\n\n",
            markdown::escape(&chat_name)
        );
        if ignored.is_empty() {
            text.push_str("Nothing is ignored in this chat\\. Use `/ignore address` to hide a token\\.");
        }
        let mut buttons = Vec::new();
        for address in ignored {
            text.push_str(&format!("\\- {}\n", markdown::code_inline(&address)));
            buttons.push(vec![InlineKeyboardButton::callback(
                format!("✖ {}", short_address(&address)),
                bot.to_callback_data(&TgCommand::ListingsDeignore(chat_id, address))
                    .await?,
            )]);
        }
        if chat_id.is_user() {
            buttons.push(vec![InlineKeyboardButton::callback(
                "➕ Ignore a token",
                bot.to_callback_data(&TgCommand::ListingsIgnorePrompt(chat_id))
                    .await?,
            )]);
        }
        buttons.push(vec![InlineKeyboardButton::callback(
            "⬅️ Back to listings",
            bot.to_callback_data(&TgCommand::ListingsRefresh(chat_id, ListingKind::Biggest))
                .await?,
        )]);
        Ok((text, InlineKeyboardMarkup::new(buttons)))
    }

    async fn poll_tick(&self, now: Instant) {
        if let Err(err) = self.refresh_feed().await {
            log::warn!("Failed to refresh {} listings: {err:?}", self.config.source);
        }
        for bot in self.state.bots() {
            let Ok(store) = self.store(bot.id()) else {
                continue;
            };
            for (chat_id, settings) in store.chats().await {
                let Some(interval) = settings.auto_refresh else {
                    continue;
                };
                if !store.session(chat_id).auto_refresh_due(interval, now) {
                    continue;
                }
                store.edit_session(chat_id, |session| session.last_auto_refresh = Some(now));
                log::debug!("Auto-refreshing listings in {chat_id}");
                if let Err(err) = self
                    .post_listing(&bot, &store, chat_id, ListingKind::Biggest)
                    .await
                {
                    log::warn!("Failed to auto-refresh listings in {chat_id}: {err:?}");
                }
            }
        }
    }

    async fn announce_new_tokens(&self) {
        for bot in self.state.bots() {
            let Ok(store) = self.store(bot.id()) else {
                continue;
            };
            let subscribed: Vec<ChatId> = store
                .chats()
                .await
                .into_iter()
                .filter(|(_, settings)| settings.new_tokens)
                .map(|(chat_id, _)| chat_id)
                .collect();
            if subscribed.is_empty() {
                continue;
            }
            let ton_usd = self.state.ton_usd_price().await;
            let (coins, liquid) = match fetch_new_token_inputs(ton_usd).await {
                Ok(inputs) => inputs,
                Err(err) => {
                    log::warn!("Failed to fetch new tokens: {err:?}");
                    continue;
                }
            };
            log::info!(
                "Announcing new tokens to {} chats ({} coins, {} liquid addresses)",
                subscribed.len(),
                coins.len(),
                liquid.len()
            );
            for chat_id in subscribed {
                let fresh = self
                    .new_tokens_for_chat(&store, chat_id, &coins, &liquid)
                    .await;
                let listing = self.settle(&store, chat_id, ListingKind::NewTokens, Ok(fresh));
                if let Err(err) = self
                    .send_listing(&bot, &store, chat_id, ListingKind::NewTokens, listing)
                    .await
                {
                    log::warn!("Failed to announce new tokens in {chat_id}: {err:?}");
                }
            }
        }
    }
}

#[async_trait]
impl ScoutBotModule for TokenListingsModule {
    fn name(&self) -> &'static str {
        "Token Listings"
    }

    async fn start(&self) -> Result<(), anyhow::Error> {
        let service = Arc::clone(&self.service);
        tokio::spawn(async move {
            let mut next_poll = Instant::now();
            let mut next_new_tokens = Instant::now() + NEW_TOKENS_FIRST_RUN;
            loop {
                tokio::time::sleep_until(next_poll.min(next_new_tokens)).await;
                let now = Instant::now();
                if now >= next_poll {
                    next_poll = now + service.config.poll_interval;
                    service.poll_tick(now).await;
                }
                if now >= next_new_tokens {
                    next_new_tokens = now + service.config.new_tokens_interval;
                    service.announce_new_tokens().await;
                }
            }
        });
        log::info!(
            "Token listings started: source {}, poll every {}, new tokens every {}",
            self.service.config.source,
            format_duration(self.service.config.poll_interval),
            format_duration(self.service.config.new_tokens_interval)
        );
        Ok(())
    }

    async fn handle_message(
        &self,
        bot: &BotData,
        user_id: Option<UserId>,
        chat_id: ChatId,
        command: MessageCommand,
        text: &str,
        _message: &Message,
    ) -> Result<(), anyhow::Error> {
        let Some(user_id) = user_id else {
            return Ok(());
        };
        let service = &self.service;
        let store = service.store(bot.id())?;

        match command {
            MessageCommand::Start(_) => {
                store
                    .edit_settings(chat_id, |settings| settings.new_tokens = true)
                    .await?;
                bot.send_text_message_without_reply_markup(
                    chat_id,
                    format!("{HELP_TEXT}\n\nThis chat will get new token announcements\\."),
                )
                .await?;
                return Ok(());
            }
            MessageCommand::ListingsIgnore(target) if !text.trim_start().starts_with('/') => {
                let Some(address) = normalize_address(text.trim()) else {
                    bot.send_text_message_without_reply_markup(
                        chat_id,
                        "That doesn't look like a TON address\\. Send a raw `0:…` or a friendly `EQ…` address\\.".to_string(),
                    )
                    .await?;
                    return Ok(());
                };
                bot.remove_dm_message_command(&user_id).await?;
                store.ignore(target, &address).await?;
                let (view, keyboard) = service.ignored_view(bot, &store, target).await?;
                bot.send_text_message(
                    chat_id,
                    format!("Ignored {}\n\n{view}", markdown::code_inline(&address)),
                    keyboard,
                )
                .await?;
                return Ok(());
            }
            MessageCommand::ListingsIgnore(_) => {
                bot.remove_dm_message_command(&user_id).await?;
            }
            MessageCommand::None => {}
        }

        let Some((command, args)) = split_command(text, bot.username()) else {
            return Ok(());
        };
        match command {
            "help" => {
                bot.send_text_message_without_reply_markup(chat_id, HELP_TEXT.to_string())
                    .await?;
            }
            "listings" => {
                service
                    .post_listing(bot, &store, chat_id, ListingKind::Biggest)
                    .await?;
            }
            "hot" => {
                service
                    .post_listing(bot, &store, chat_id, ListingKind::Hottest)
                    .await?;
            }
            "newtokens" => {
                service
                    .post_listing(bot, &store, chat_id, ListingKind::NewTokens)
                    .await?;
            }
            "ignored" => {
                let (view, keyboard) = service.ignored_view(bot, &store, chat_id).await?;
                bot.send_text_message(chat_id, view, keyboard).await?;
            }
            "ignore" => {
                if !check_admin_permission_in_chat(bot, chat_id, user_id).await {
                    return Ok(());
                }
                if args.is_empty() {
                    if chat_id.is_user() {
                        bot.set_dm_message_command(user_id, MessageCommand::ListingsIgnore(chat_id))
                            .await?;
                        bot.send_text_message_without_reply_markup(
                            chat_id,
                            "Send me the address of the token to ignore\\.".to_string(),
                        )
                        .await?;
                    } else {
                        bot.send_text_message_without_reply_markup(
                            chat_id,
                            "Usage: `/ignore address`".to_string(),
                        )
                        .await?;
                    }
                    return Ok(());
                }
                let Some(address) = normalize_address(args) else {
                    bot.send_text_message_without_reply_markup(
                        chat_id,
                        "That doesn't look like a TON address\\.".to_string(),
                    )
                    .await?;
                    return Ok(());
                };
                let message = if store.ignore(chat_id, &address).await? {
                    format!(
                        "Ignored {}, it won't show up in this chat's listings\\.",
                        markdown::code_inline(&address)
                    )
                } else {
                    format!("{} is already ignored\\.", markdown::code_inline(&address))
                };
                bot.send_text_message_without_reply_markup(chat_id, message)
                    .await?;
            }
            "deignore" => {
                if !check_admin_permission_in_chat(bot, chat_id, user_id).await {
                    return Ok(());
                }
                let Some(address) = normalize_address(args) else {
                    let (view, keyboard) = service.ignored_view(bot, &store, chat_id).await?;
                    bot.send_text_message(chat_id, view, keyboard).await?;
                    return Ok(());
                };
                let message = if store.deignore(chat_id, &address).await? {
                    format!("{} is visible again\\.", markdown::code_inline(&address))
                } else {
                    format!("{} wasn't ignored\\.", markdown::code_inline(&address))
                };
                bot.send_text_message_without_reply_markup(chat_id, message)
                    .await?;
            }
            "autorefresh" => {
                if !check_admin_permission_in_chat(bot, chat_id, user_id).await {
                    return Ok(());
                }
                let message = match args.to_lowercase().as_str() {
                    "" => match store.settings(chat_id).await.auto_refresh {
                        Some(interval) => format!(
                            "Listings are reposted every {}\\. Use `/autorefresh off` to stop\\.",
                            markdown::escape(&format_duration(interval))
                        ),
                        None => "Auto\\-refresh is off\\. Use `/autorefresh 30m` to turn it on\\.".to_string(),
                    },
                    "off" => {
                        store
                            .edit_settings(chat_id, |settings| settings.auto_refresh = None)
                            .await?;
                        "Auto\\-refresh is off\\.".to_string()
                    }
                    args => match parse_duration(args) {
                        Some(interval) if interval >= MIN_AUTO_REFRESH => {
                            store
                                .edit_settings(chat_id, |settings| {
                                    settings.auto_refresh = Some(interval)
                                })
                                .await?;
                            store.edit_session(chat_id, |session| {
                                session.last_auto_refresh = Some(Instant::now())
                            });
                            format!(
                                "Listings will be reposted every {}\\.",
                                markdown::escape(&format_duration(interval))
                            )
                        }
                        Some(_) => "The shortest auto\\-refresh interval is 1 minute\\.".to_string(),
                        None => "Usage: `/autorefresh 30m` or `/autorefresh off`".to_string(),
                    },
                };
                bot.send_text_message_without_reply_markup(chat_id, message)
                    .await?;
            }
            "pin" => {
                if !check_admin_permission_in_chat(bot, chat_id, user_id).await {
                    return Ok(());
                }
                let message = match args.to_lowercase().as_str() {
                    "on" => {
                        store
                            .edit_settings(chat_id, |settings| settings.pin = true)
                            .await?;
                        "The latest listing will be pinned\\.".to_string()
                    }
                    "off" => {
                        store
                            .edit_settings(chat_id, |settings| settings.pin = false)
                            .await?;
                        let pinned =
                            store.edit_session(chat_id, |session| session.pinned_message.take());
                        if let Some(pinned) = pinned {
                            if let Err(err) = bot.unpin_message(chat_id, pinned).await {
                                log::warn!("Failed to unpin {pinned:?} in {chat_id}: {err:?}");
                            }
                        }
                        "Listings won't be pinned anymore\\.".to_string()
                    }
                    _ => format!(
                        "Pinning is {}\\. Usage: `/pin on` or `/pin off`",
                        if store.settings(chat_id).await.pin { "on" } else { "off" }
                    ),
                };
                bot.send_text_message_without_reply_markup(chat_id, message)
                    .await?;
            }
            "band" => {
                if !check_admin_permission_in_chat(bot, chat_id, user_id).await {
                    return Ok(());
                }
                let bounds: Vec<Option<f64>> =
                    args.split_whitespace().map(parse_usd_amount).collect();
                let message = match bounds.as_slice() {
                    [Some(min_cap), Some(max_cap)] if min_cap <= max_cap => {
                        let (min_cap, max_cap) = (*min_cap, *max_cap);
                        store
                            .edit_settings(chat_id, |settings| {
                                settings.min_cap = min_cap;
                                settings.max_cap = max_cap;
                            })
                            .await?;
                        format!(
                            "Capitalization band set to {} to {}\\.",
                            markdown::escape(&format_compact_usd(min_cap)),
                            markdown::escape(&format_compact_usd(max_cap))
                        )
                    }
                    _ => "Usage: `/band min max`, for example `/band 10k 1m`".to_string(),
                };
                bot.send_text_message_without_reply_markup(chat_id, message)
                    .await?;
            }
            "threshold" => {
                if !check_admin_permission_in_chat(bot, chat_id, user_id).await {
                    return Ok(());
                }
                let threshold = args
                    .trim()
                    .trim_end_matches('%')
                    .parse::<f64>()
                    .ok()
                    .filter(|threshold| threshold.is_finite() && *threshold >= 0.0);
                let message = match threshold {
                    Some(threshold) => {
                        store
                            .edit_settings(chat_id, |settings| settings.min_abs_change = threshold)
                            .await?;
                        format!(
                            "Tokens that moved less than {}% are hidden now\\.",
                            markdown::escape(&threshold.to_string())
                        )
                    }
                    None => "Usage: `/threshold 2`".to_string(),
                };
                bot.send_text_message_without_reply_markup(chat_id, message)
                    .await?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn handle_callback<'a>(
        &'a self,
        mut ctx: TgCallbackContext<'a>,
        _query: &mut Option<MustAnswerCallbackQuery>,
    ) -> Result<(), anyhow::Error> {
        let service = &self.service;
        let store = service.store(ctx.bot().id())?;
        match ctx.parse_command().await? {
            TgCommand::ListingsRefresh(chat_id, kind) => {
                let listing = service.listing_text(&store, chat_id, kind).await;
                let keyboard = listing_keyboard(ctx.bot(), chat_id, kind).await?;
                ctx.edit_or_send(listing.text, keyboard).await?;
                service.delivered(&store, chat_id, listing.announce).await?;
            }
            TgCommand::ListingsIgnored(chat_id) => {
                let (view, keyboard) = service.ignored_view(ctx.bot(), &store, chat_id).await?;
                ctx.edit_or_send(view, keyboard).await?;
            }
            TgCommand::ListingsIgnorePrompt(chat_id) => {
                if !check_admin_permission_in_chat(ctx.bot(), chat_id, ctx.user_id()).await {
                    return Ok(());
                }
                ctx.bot()
                    .set_dm_message_command(ctx.user_id(), MessageCommand::ListingsIgnore(chat_id))
                    .await?;
                let keyboard = InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
                    "⬅️ Cancel",
                    ctx.bot()
                        .to_callback_data(&TgCommand::CancelListingsIgnore(chat_id))
                        .await?,
                )]]);
                ctx.edit_or_send("Send me the address of the token to ignore\\.", keyboard)
                    .await?;
            }
            TgCommand::CancelListingsIgnore(chat_id) => {
                ctx.bot().remove_dm_message_command(&ctx.user_id()).await?;
                let (view, keyboard) = service.ignored_view(ctx.bot(), &store, chat_id).await?;
                ctx.edit_or_send(view, keyboard).await?;
            }
            TgCommand::ListingsDeignore(chat_id, address) => {
                if !check_admin_permission_in_chat(ctx.bot(), chat_id, ctx.user_id()).await {
                    return Ok(());
                }
                store.deignore(chat_id, &address).await?;
                let (view, keyboard) = service.ignored_view(ctx.bot(), &store, chat_id).await?;
                ctx.edit_or_send(view, keyboard).await?;
            }
            TgCommand::GenericDeleteCurrentMessage { allowed_user } => {
                if allowed_user.map_or(true, |user| user == ctx.user_id()) {
                    ctx.delete_last_message().await?;
                }
            }
        }
        Ok(())
    }
}

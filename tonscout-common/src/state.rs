use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use crate::{
    bot_commands::MessageCommand,
    tgbot::{BotData, MustAnswerCallbackQuery, TgCallbackContext},
    utils::requests::get_not_cached,
};

use async_trait::async_trait;
use dashmap::{
    mapref::{multiple::RefMulti, one::Ref},
    DashMap,
};
use serde::Deserialize;
use teloxide::prelude::{ChatId, Message, UserId};
use tokio::sync::{RwLock, RwLockReadGuard};

const TON_RATES_URL: &str = "https://tonapi.io/v2/rates?tokens=ton&currencies=usd";
const TON_PRICE_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

pub struct Scout {
    state: Arc<ScoutState>,
}

impl Scout {
    pub async fn new(data_dir: impl Into<PathBuf>) -> Result<Self, anyhow::Error> {
        let data_dir = data_dir.into();
        tokio::fs::create_dir_all(&data_dir).await?;
        let state = Arc::new(ScoutState::new(data_dir));
        Ok(Self { state })
    }

    pub fn state(&self) -> &ScoutState {
        &self.state
    }

    pub fn arc_clone_state(&self) -> Arc<ScoutState> {
        Arc::clone(&self.state)
    }

    pub async fn start_tg_bots(&self) -> Result<(), anyhow::Error> {
        for module in self.state.bot_modules().await.iter() {
            module.start().await?;
        }

        for bot in self.state.bots() {
            bot.start_polling().await?;
        }

        Ok(())
    }
}

pub struct ScoutState {
    bots: DashMap<UserId, BotData>,
    bot_modules: RwLock<Vec<Arc<dyn ScoutBotModule>>>,
    data_dir: PathBuf,
    ton_usd: Arc<RwLock<Option<f64>>>,
}

#[derive(Debug, Deserialize)]
struct RatesResponse {
    rates: HashMap<String, TokenRates>,
}

#[derive(Debug, Deserialize)]
struct TokenRates {
    prices: HashMap<String, f64>,
}

fn ton_usd_from_rates(response: &RatesResponse) -> Option<f64> {
    response
        .rates
        .iter()
        .find(|(token, _)| token.eq_ignore_ascii_case("ton"))
        .and_then(|(_, rates)| {
            rates
                .prices
                .iter()
                .find(|(currency, _)| currency.eq_ignore_ascii_case("usd"))
                .map(|(_, price)| *price)
        })
        .filter(|price| price.is_finite() && *price > 0.0)
}

impl ScoutState {
    /// Must be called inside a tokio runtime, the TON price poller is spawned here.
    pub fn new(data_dir: PathBuf) -> Self {
        let ton_usd = Arc::new(RwLock::new(None));
        let ton_usd_clone = Arc::clone(&ton_usd);
        tokio::spawn(async move {
            loop {
                match get_not_cached::<RatesResponse>(TON_RATES_URL).await {
                    Ok(response) => {
                        if let Some(price) = ton_usd_from_rates(&response) {
                            *ton_usd_clone.write().await = Some(price);
                        } else {
                            log::warn!("TON rates response has no USD price");
                        }
                    }
                    Err(err) => log::warn!("Failed to get TON price: {err:?}"),
                }
                tokio::time::sleep(TON_PRICE_REFRESH_INTERVAL).await;
            }
        });
        Self {
            bots: DashMap::new(),
            bot_modules: RwLock::new(Vec::new()),
            data_dir,
            ton_usd,
        }
    }

    pub async fn add_bot(&self, bot: BotData) -> Result<(), anyhow::Error> {
        let user_id = bot.id();
        self.bots.insert(user_id, bot);
        Ok(())
    }

    pub fn bot(&self, user_id: &UserId) -> Option<Ref<UserId, BotData>> {
        self.bots.get(user_id)
    }

    pub fn bots(&self) -> Vec<RefMulti<UserId, BotData>> {
        self.bots.iter().collect()
    }

    pub async fn add_bot_module<M: ScoutBotModule>(&self, module: impl Into<Arc<M>>) {
        self.bot_modules.write().await.push(module.into());
    }

    pub async fn bot_modules(&self) -> RwLockReadGuard<Vec<Arc<dyn ScoutBotModule>>> {
        self.bot_modules.read().await
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Last known TON/USD quote. `None` until the first successful fetch.
    pub async fn ton_usd_price(&self) -> Option<f64> {
        *self.ton_usd.read().await
    }
}

#[async_trait]
pub trait ScoutBotModule: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn start(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }

    async fn handle_message(
        &self,
        bot: &BotData,
        user_id: Option<UserId>,
        chat_id: ChatId,
        command: MessageCommand,
        text: &str,
        message: &Message,
    ) -> Result<(), anyhow::Error>;

    async fn handle_callback<'a>(
        &'a self,
        mut ctx: TgCallbackContext<'a>,
        query: &mut Option<MustAnswerCallbackQuery>,
    ) -> Result<(), anyhow::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ton_usd_rate() {
        let response: RatesResponse = serde_json::from_str(
            r#"{"rates":{"TON":{"prices":{"USD":5.42},"diff_24h":{"USD":"-1.2%"}}}}"#,
        )
        .unwrap();
        assert_eq!(ton_usd_from_rates(&response), Some(5.42));
    }

    #[test]
    fn rejects_missing_or_bad_rate() {
        let response: RatesResponse =
            serde_json::from_str(r#"{"rates":{"TON":{"prices":{"EUR":5.0}}}}"#).unwrap();
        assert_eq!(ton_usd_from_rates(&response), None);
        let response: RatesResponse =
            serde_json::from_str(r#"{"rates":{"TON":{"prices":{"USD":0.0}}}}"#).unwrap();
        assert_eq!(ton_usd_from_rates(&response), None);
    }
}

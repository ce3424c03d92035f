use std::time::Duration;

use log::info;
use reqwest::Url;
use token_listings::{config::ListingsConfig, TokenListingsModule};
use tonscout_common::state::Scout;
use tonscout_common::teloxide::adaptors::throttle::Limits;
use tonscout_common::teloxide::adaptors::CacheMe;
use tonscout_common::teloxide::prelude::{Bot, RequesterExt};
use tonscout_common::tgbot::BotData;

fn main() -> Result<(), anyhow::Error> {
    dotenvy::dotenv().ok();
    let debug_level = if std::env::var("DEBUG").is_ok() {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .with_module_level("tonscout_common", debug_level)
        .with_module_level("token_listings", debug_level)
        .env()
        .init()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async {
            let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());
            let scout = Scout::new(data_dir).await?;
            let listings_config = ListingsConfig::from_env()?;

            let base: Url = match std::env::var("TELEGRAM_API_URL") {
                Ok(url) => url.parse()?,
                Err(_) => "https://api.telegram.org".parse()?,
            };
            let token = std::env::var("BOT_TOKEN")
                .map_err(|_| anyhow::anyhow!("BOT_TOKEN is not set"))?;

            let bot = BotData::new(
                CacheMe::new(
                    Bot::with_client(
                        token,
                        reqwest::Client::builder()
                            .timeout(Duration::from_secs(30))
                            .build()?,
                    )
                    .set_api_url(base)
                    .throttle(Limits {
                        messages_per_sec_overall: 1000, // just to increase queue size
                        ..Limits::default()
                    }),
                ),
                scout.arc_clone_state(),
            )
            .await?;
            info!("Logged in as @{}", bot.username());
            scout.state().add_bot(bot).await?;

            scout
                .state()
                .add_bot_module(
                    TokenListingsModule::new(scout.arc_clone_state(), listings_config).await?,
                )
                .await;

            scout.start_tg_bots().await?;

            info!("Starting TON Scout");

            tokio::time::sleep(Duration::from_secs(u64::MAX)).await;

            Ok(())
        })
}

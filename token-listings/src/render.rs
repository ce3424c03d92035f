use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tonscout_common::{
    bot_commands::ListingKind,
    teloxide::utils::markdown,
    utils::{
        address::{Crc16Variant, RawAccount},
        tokens::{format_compact_usd, format_price_change, format_usd_amount},
    },
};

use crate::{records::TokenRecord, select::SelectParams};

pub const FOOTER_TIME_FORMAT: &str = "%d.%m.%Y %H:%M UTC";

/// How token addresses are turned into `t.me/<bot>?start=<prefix><address>` links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSettings {
    /// Username of the bot to deep link into. No links are rendered without it.
    pub ref_bot: Option<String>,
    pub ref_prefix: String,
    pub bounceable: bool,
    pub testnet: bool,
    pub checksum: Crc16Variant,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            ref_bot: None,
            ref_prefix: String::new(),
            bounceable: true,
            testnet: false,
            checksum: Crc16Variant::default(),
        }
    }
}

/// Friendly form of the address with the configured flags. Accepts raw or friendly input.
pub fn link_address(address: &str, links: &LinkSettings) -> Option<String> {
    match RawAccount::parse(address) {
        Ok(account) => Some(
            account
                .to_friendly(links.bounceable, links.testnet)
                .encode(links.checksum),
        ),
        Err(err) => {
            log::debug!("No link for {address}: {err}");
            None
        }
    }
}

pub fn deep_link(address: &str, links: &LinkSettings) -> Option<String> {
    let bot = links.ref_bot.as_deref().filter(|bot| !bot.is_empty())?;
    let address = link_address(address, links)?;
    Some(format!(
        "https://t.me/{bot}?start={prefix}{address}",
        bot = bot.trim_start_matches('@'),
        prefix = links.ref_prefix,
    ))
}

fn link(text: &str, url: &str) -> String {
    format!(
        "[{}]({})",
        markdown::escape(text),
        markdown::escape_link_url(url)
    )
}

pub fn footer(updated_at: DateTime<Utc>) -> String {
    markdown::italic(&markdown::escape(&format!(
        "Updated: {}",
        updated_at.format(FOOTER_TIME_FORMAT)
    )))
}

fn filter_summary(kind: ListingKind, params: &SelectParams) -> String {
    let mut summary = format!(
        "Cap {} to {}, change at least {}%",
        format_compact_usd(params.min_cap),
        format_compact_usd(params.max_cap),
        params.min_abs_change,
    );
    if let Some(min_volume) = params.min_volume {
        summary.push_str(&format!(", volume at least {}", format_compact_usd(min_volume)));
    }
    if kind == ListingKind::Hottest {
        summary.push_str(", sorted by change");
    }
    markdown::escape(&summary)
}

fn render_entry(rank: usize, record: &TokenRecord, links: &LinkSettings) -> String {
    let mut line = format!(
        "{rank}\\. *{symbol}*",
        symbol = markdown::escape(record.display_symbol())
    );
    if !record.name.is_empty() && record.name != record.symbol {
        line.push_str(&format!(" \\({}\\)", markdown::escape(&record.name)));
    }
    let cap = record
        .market_cap
        .map(format_compact_usd)
        .unwrap_or_else(|| "?".to_string());
    let change = format_price_change(record.price_change.unwrap_or(f64::NAN));
    line.push_str(&format!(
        " \\| MC {} \\| {}",
        markdown::escape(&cap),
        markdown::escape(&change)
    ));
    if let Some(url) = deep_link(&record.address, links) {
        line.push_str(&format!(" \\| {}", link("Trade", &url)));
    }
    line
}

/// Ranked listing message in MarkdownV2.
pub fn render_listing(
    kind: ListingKind,
    records: &[TokenRecord],
    params: &SelectParams,
    links: &LinkSettings,
    updated_at: DateTime<Utc>,
) -> String {
    let mut text = format!(
        "📊 *{title}*\n{summary}\n\n",
        title = markdown::escape(kind.title()),
        summary = filter_summary(kind, params),
    );
    if records.is_empty() {
        text.push_str("Nothing qualifies right now\\.\n");
    }
    for (i, record) in records.iter().enumerate() {
        text.push_str(&render_entry(i + 1, record, links));
        text.push('\n');
    }
    text.push('\n');
    text.push_str(&footer(updated_at));
    text
}

/// New-token announcement in MarkdownV2, one Tonviewer link per coin.
pub fn render_new_tokens(
    records: &[TokenRecord],
    links: &LinkSettings,
    updated_at: DateTime<Utc>,
) -> String {
    let mut text = format!(
        "🆕 *{title}*\n\n",
        title = markdown::escape(ListingKind::NewTokens.title())
    );
    if records.is_empty() {
        text.push_str("No new tokens with liquidity\\.\n");
    }
    for (i, record) in records.iter().enumerate() {
        let price = record
            .price
            .map(format_usd_amount)
            .unwrap_or_else(|| "-".to_string());
        text.push_str(&format!(
            "{rank}\\. *{symbol}* \\| {price} \\| {tonviewer}",
            rank = i + 1,
            symbol = markdown::escape(if record.symbol.is_empty() {
                "UNKNOWN"
            } else {
                &record.symbol
            }),
            price = markdown::escape(&price),
            tonviewer = link(
                "Tonviewer",
                &format!("https://tonviewer.com/{}", record.address)
            ),
        ));
        if let Some(url) = deep_link(&record.address, links) {
            text.push_str(&format!(" \\| {}", link("Trade", &url)));
        }
        text.push('\n');
    }
    text.push('\n');
    text.push_str(&footer(updated_at));
    text
}

/// Why a previously rendered message is shown instead of a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    FetchFailed,
    NothingQualified,
}

pub fn mark_cached(rendered: &str, reason: StaleReason) -> String {
    let note = match reason {
        StaleReason::FetchFailed => "⚠️ _Live data is unavailable, showing the last known listing_",
        StaleReason::NothingQualified => {
            "ℹ️ _No tokens qualify right now, showing the last non\\-empty listing_"
        }
    };
    format!("{note}\n\n{rendered}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const RAW_FOUNDATION: &str =
        "0:83dfd552e63729b472fcbcc8c45ebcc6691702558b68ec7527e1ba403a0f31a8";

    fn links() -> LinkSettings {
        LinkSettings {
            ref_bot: Some("ston_bridge_bot".to_string()),
            ref_prefix: "r_42-".to_string(),
            bounceable: true,
            testnet: false,
            checksum: Crc16Variant::CcittFalse,
        }
    }

    fn updated_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 7, 9, 3, 0).unwrap()
    }

    #[test]
    fn deep_link_uses_friendly_address() {
        assert_eq!(
            deep_link(RAW_FOUNDATION, &links()).as_deref(),
            Some("https://t.me/ston_bridge_bot?start=r_42-EQCD39VS5jcptHL8vMjEXrzGaRcCVYto7HUn4bpAOg8xqLQ1")
        );
    }

    #[test]
    fn deep_link_follows_configured_checksum() {
        let links = LinkSettings {
            checksum: Crc16Variant::Xmodem,
            ..links()
        };
        assert_eq!(
            deep_link(RAW_FOUNDATION, &links).as_deref(),
            Some("https://t.me/ston_bridge_bot?start=r_42-EQCD39VS5jcptHL8vMjEXrzGaRcCVYto7HUn4bpAOg8xqB2N")
        );
    }

    #[test]
    fn cached_note_names_the_reason() {
        let failed = mark_cached("1\\. AAA", StaleReason::FetchFailed);
        assert!(failed.starts_with("⚠️ _Live data is unavailable"));
        assert!(failed.ends_with("\n\n1\\. AAA"));
        let empty = mark_cached("1\\. AAA", StaleReason::NothingQualified);
        assert!(empty.contains("No tokens qualify right now"));
        assert!(!empty.contains("unavailable"));
    }

    #[test]
    fn deep_link_absent_without_bot_or_valid_address() {
        assert_eq!(deep_link("0:zz", &links()), None);
        assert_eq!(deep_link(RAW_FOUNDATION, &LinkSettings::default()), None);
    }

    #[test]
    fn footer_format() {
        assert_eq!(footer(updated_at()), "_Updated: 07\\.05\\.2024 09:03 UTC_");
    }

    #[test]
    fn listing_entries_escape_and_link() {
        let mut good = TokenRecord::new(RAW_FOUNDATION, 12_000.0, 6.0);
        good.symbol = "A.B".to_string();
        let mut broken = TokenRecord::new("not-an-address", 50_000.0, -45.5);
        broken.symbol = "BRK".to_string();
        let text = render_listing(
            ListingKind::Biggest,
            &[good, broken],
            &SelectParams::default(),
            &links(),
            updated_at(),
        );
        assert!(text.contains("1\\. *A\\.B* \\| MC $12K \\| \\+6\\.00% 🔺 \\| [Trade](https://t.me/"));
        assert!(text.contains("2\\. *BRK* \\| MC $50K \\| \\-45\\.50% 💩\n"));
        assert!(text.ends_with("_Updated: 07\\.05\\.2024 09:03 UTC_"));
    }

    #[test]
    fn empty_listing_says_so() {
        let text = render_listing(
            ListingKind::Hottest,
            &[],
            &SelectParams::default(),
            &links(),
            updated_at(),
        );
        assert!(text.contains("Nothing qualifies right now\\."));
        assert!(text.contains("sorted by change"));
    }

    #[test]
    fn new_tokens_link_tonviewer() {
        let mut coin = TokenRecord::new(RAW_FOUNDATION, 0.0, 0.0);
        coin.price = Some(0.5);
        let text = render_new_tokens(&[coin], &LinkSettings::default(), updated_at());
        assert!(text.contains("1\\. *UNKNOWN* \\| $0\\.500 \\| [Tonviewer](https://tonviewer.com/0:83df"));
        assert!(!text.contains("Trade"));

        let text = render_new_tokens(&[], &links(), updated_at());
        assert!(text.contains("No new tokens with liquidity\\."));
    }
}

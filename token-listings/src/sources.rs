use std::{collections::HashSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tonscout_common::utils::{
    requests::{get_cached_5m, get_not_cached},
    tokens::nano_ton_to_usd,
};

use crate::{
    records::{decode_each, lenient_f64, TokenRecord},
    select::address_key,
};

pub const BIGPUMP_COINS_URL: &str = "https://bigpump.app/api/v1/coins";
pub const STONFI_POOL_STATS_URL: &str = "https://api.ston.fi/v1/stats/pool";
pub const GECKOTERMINAL_POOLS_URL: &str =
    "https://api.geckoterminal.com/api/v2/networks/ton/pools";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ListingsSource {
    #[default]
    GeckoTerminal,
    BigPump,
}

impl FromStr for ListingsSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "geckoterminal" | "gecko" => Ok(Self::GeckoTerminal),
            "bigpump" => Ok(Self::BigPump),
            other => Err(anyhow::anyhow!("Unknown listings source: {other}")),
        }
    }
}

impl fmt::Display for ListingsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GeckoTerminal => write!(f, "GeckoTerminal"),
            Self::BigPump => write!(f, "BigPump"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BigPumpCoin {
    #[serde(default)]
    address: String,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    name: Option<String>,
    /// Quoted in TON.
    #[serde(default, deserialize_with = "lenient_f64")]
    price: Option<f64>,
    /// Quoted in nanoTON.
    #[serde(
        default,
        alias = "marketCap",
        alias = "market_cap_ton",
        deserialize_with = "lenient_f64"
    )]
    market_cap: Option<f64>,
    #[serde(
        default,
        alias = "priceChange24h",
        alias = "price_change_24h",
        alias = "change24h",
        deserialize_with = "lenient_f64"
    )]
    price_change: Option<f64>,
    #[serde(
        default,
        alias = "volume24h",
        alias = "volume_24h",
        deserialize_with = "lenient_f64"
    )]
    volume: Option<f64>,
}

/// `{ "coins": [...] }` from BigPump. TON amounts are converted with the TON/USD quote,
/// without a quote they stay unknown.
pub fn decode_bigpump_coins(payload: Value, ton_usd: Option<f64>) -> Vec<TokenRecord> {
    let coins = match payload {
        Value::Object(mut map) => match map.remove("coins") {
            Some(Value::Array(coins)) => coins,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    decode_each::<BigPumpCoin>(coins)
        .into_iter()
        .map(|coin| TokenRecord {
            name: coin.name.unwrap_or_default(),
            symbol: coin.symbol.unwrap_or_default(),
            address: coin.address,
            market_cap: coin
                .market_cap
                .zip(ton_usd)
                .map(|(nano, ton_usd)| nano_ton_to_usd(nano, ton_usd)),
            price_change: coin.price_change,
            volume: coin
                .volume
                .zip(ton_usd)
                .map(|(nano, ton_usd)| nano_ton_to_usd(nano, ton_usd)),
            price: coin.price.zip(ton_usd).map(|(price, ton_usd)| price * ton_usd),
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct StonfiPoolStat {
    #[serde(default)]
    base_address: Option<String>,
    #[serde(default)]
    quote_address: Option<String>,
}

/// Every address that appears on either side of a STON.fi pool, as set keys.
pub fn decode_stonfi_liquidity(payload: Value) -> HashSet<String> {
    let stats = match payload {
        Value::Object(mut map) => match map.remove("stats") {
            Some(Value::Array(stats)) => stats,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    decode_each::<StonfiPoolStat>(stats)
        .into_iter()
        .flat_map(|pool| [pool.base_address, pool.quote_address])
        .flatten()
        .filter(|address| !address.trim().is_empty())
        .map(|address| address_key(&address))
        .collect()
}

#[derive(Debug, Deserialize)]
struct GeckoPool {
    attributes: GeckoPoolAttributes,
    #[serde(default)]
    relationships: Option<GeckoRelationships>,
}

#[derive(Debug, Deserialize)]
struct GeckoPoolAttributes {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    base_token_price_usd: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    market_cap_usd: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    fdv_usd: Option<f64>,
    #[serde(default)]
    price_change_percentage: Option<GeckoTimeframes>,
    #[serde(default)]
    volume_usd: Option<GeckoTimeframes>,
}

#[derive(Debug, Deserialize)]
struct GeckoTimeframes {
    #[serde(default, deserialize_with = "lenient_f64")]
    h24: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct GeckoRelationships {
    base_token: GeckoRelationship,
}

#[derive(Debug, Deserialize)]
struct GeckoRelationship {
    data: GeckoRelationshipData,
}

#[derive(Debug, Deserialize)]
struct GeckoRelationshipData {
    id: String,
}

/// `{ "data": [ { "attributes": ..., "relationships": ... } ] }` from GeckoTerminal.
/// Market cap falls back to FDV, which GeckoTerminal always reports.
pub fn decode_geckoterminal_pools(payload: Value) -> Vec<TokenRecord> {
    let pools = match payload {
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(pools)) => pools,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    decode_each::<GeckoPool>(pools)
        .into_iter()
        .filter_map(|pool| {
            let id = pool.relationships?.base_token.data.id;
            let address = id.strip_prefix("ton_").unwrap_or(&id).to_string();
            let attributes = pool.attributes;
            let name = attributes.name.unwrap_or_default();
            let symbol = name
                .split_once(" / ")
                .map(|(base, _)| base.trim().to_string())
                .unwrap_or_else(|| name.clone());
            Some(TokenRecord {
                name,
                symbol,
                address,
                market_cap: attributes.market_cap_usd.or(attributes.fdv_usd),
                price_change: attributes.price_change_percentage.and_then(|p| p.h24),
                volume: attributes.volume_usd.and_then(|v| v.h24),
                price: attributes.base_token_price_usd,
            })
        })
        .collect()
}

pub async fn fetch_bigpump_coins(ton_usd: Option<f64>) -> Result<Vec<TokenRecord>, anyhow::Error> {
    let payload: Value = get_not_cached(BIGPUMP_COINS_URL).await?;
    Ok(decode_bigpump_coins(payload, ton_usd))
}

/// Pool stats are large and change slowly, so they're cached for 5 minutes.
pub async fn fetch_stonfi_liquidity() -> Result<HashSet<String>, anyhow::Error> {
    let payload: Value = get_cached_5m(STONFI_POOL_STATS_URL).await?;
    Ok(decode_stonfi_liquidity(payload))
}

pub async fn fetch_geckoterminal_pools() -> Result<Vec<TokenRecord>, anyhow::Error> {
    let payload: Value = get_not_cached(GECKOTERMINAL_POOLS_URL).await?;
    Ok(decode_geckoterminal_pools(payload))
}

pub async fn fetch_listings(
    source: ListingsSource,
    ton_usd: Option<f64>,
) -> Result<Vec<TokenRecord>, anyhow::Error> {
    match source {
        ListingsSource::GeckoTerminal => fetch_geckoterminal_pools().await,
        ListingsSource::BigPump => fetch_bigpump_coins(ton_usd).await,
    }
}

/// BigPump coins together with the STON.fi liquidity set, fetched concurrently.
pub async fn fetch_new_token_inputs(
    ton_usd: Option<f64>,
) -> Result<(Vec<TokenRecord>, HashSet<String>), anyhow::Error> {
    futures_util::future::try_join(fetch_bigpump_coins(ton_usd), fetch_stonfi_liquidity()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const RAW_A: &str = "0:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    #[test]
    fn bigpump_caps_are_converted_from_nano_ton() {
        let payload = json!({
            "coins": [
                { "address": RAW_A, "symbol": "AAA", "price": "0.5", "marketCap": "2000000000000", "priceChange24h": 6.0 },
                { "address": "0:bb", "symbol": null, "price": "N/A" },
                "garbage"
            ]
        });
        let records = decode_bigpump_coins(payload.clone(), Some(5.0));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].market_cap, Some(10_000.0));
        assert_eq!(records[0].price, Some(2.5));
        assert_eq!(records[0].price_change, Some(6.0));
        assert_eq!(records[1].symbol, "");
        assert_eq!(records[1].price, None);

        let records = decode_bigpump_coins(payload, None);
        assert_eq!(records[0].market_cap, None);
    }

    #[test]
    fn bigpump_without_coins_is_empty() {
        assert!(decode_bigpump_coins(json!({ "error": "down" }), Some(1.0)).is_empty());
        assert!(decode_bigpump_coins(json!([1, 2]), Some(1.0)).is_empty());
    }

    #[test]
    fn stonfi_liquidity_collects_both_sides() {
        let friendly_a =
            tonscout_common::utils::address::canonicalize(RAW_A, true, false).unwrap();
        let payload = json!({
            "stats": [
                { "base_address": friendly_a, "quote_address": "EQ_quote" },
                { "base_address": null, "quote_address": "" },
                { "base_address": "EQ_other" }
            ]
        });
        let liquid = decode_stonfi_liquidity(payload);
        assert_eq!(liquid.len(), 3);
        assert!(liquid.contains(&address_key(RAW_A)));
        assert!(liquid.contains("eq_quote"));
    }

    #[test]
    fn geckoterminal_pools_decode() {
        let payload = json!({
            "data": [
                {
                    "id": "ton_pool1",
                    "attributes": {
                        "name": "AAA / TON",
                        "base_token_price_usd": "0.0123",
                        "market_cap_usd": null,
                        "fdv_usd": "12000.5",
                        "price_change_percentage": { "m5": "0.1", "h24": "-6.5" },
                        "volume_usd": { "h24": "1500" }
                    },
                    "relationships": { "base_token": { "data": { "id": format!("ton_{RAW_A}"), "type": "token" } } }
                },
                { "attributes": { "name": "No relationships" } }
            ]
        });
        let records = decode_geckoterminal_pools(payload);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.symbol, "AAA");
        assert_eq!(record.address, RAW_A);
        assert_eq!(record.market_cap, Some(12000.5));
        assert_eq!(record.price_change, Some(-6.5));
        assert_eq!(record.volume, Some(1500.0));
        assert_eq!(record.price, Some(0.0123));
    }

    #[test]
    fn source_names() {
        assert_eq!("BigPump".parse::<ListingsSource>().unwrap(), ListingsSource::BigPump);
        assert_eq!(
            "geckoterminal".parse::<ListingsSource>().unwrap(),
            ListingsSource::GeckoTerminal
        );
        assert!("dexscreener".parse::<ListingsSource>().is_err());
    }
}

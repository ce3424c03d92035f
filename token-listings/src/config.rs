use std::{str::FromStr, time::Duration};

use anyhow::Context;

use crate::{
    render::LinkSettings,
    select::{SelectParams, SortKey},
    sources::ListingsSource,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_NEW_TOKENS_INTERVAL: Duration = Duration::from_secs(1800);
pub const NEW_TOKENS_FIRST_RUN: Duration = Duration::from_secs(5);
pub const NEW_TOKENS_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct ListingsConfig {
    /// Filter settings for chats that haven't changed them.
    pub defaults: SelectParams,
    pub source: ListingsSource,
    pub links: LinkSettings,
    pub poll_interval: Duration,
    pub new_tokens_interval: Duration,
}

impl Default for ListingsConfig {
    fn default() -> Self {
        Self {
            defaults: SelectParams {
                min_cap: 10_000.0,
                max_cap: 1_000_000.0,
                min_abs_change: 2.0,
                min_volume: None,
                max_results: 10,
                sort: SortKey::CapitalizationDesc,
            },
            source: ListingsSource::default(),
            links: LinkSettings::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            new_tokens_interval: DEFAULT_NEW_TOKENS_INTERVAL,
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>, anyhow::Error>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name).filter(|value| !value.trim().is_empty()) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow::anyhow!("{name}={value:?} is invalid: {err}")),
        None => Ok(None),
    }
}

fn parse_bool(value: &str) -> Result<bool, anyhow::Error> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow::anyhow!("Not a boolean: {other}")),
    }
}

impl ListingsConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, anyhow::Error> {
        let mut config = Self::default();
        let defaults = &mut config.defaults;
        if let Some(min_cap) = parse_var(&lookup, "LISTINGS_MIN_CAP")? {
            defaults.min_cap = min_cap;
        }
        if let Some(max_cap) = parse_var(&lookup, "LISTINGS_MAX_CAP")? {
            defaults.max_cap = max_cap;
        }
        if defaults.min_cap > defaults.max_cap {
            anyhow::bail!(
                "LISTINGS_MIN_CAP ({}) is above LISTINGS_MAX_CAP ({})",
                defaults.min_cap,
                defaults.max_cap
            );
        }
        if let Some(min_change) = parse_var::<f64>(&lookup, "LISTINGS_MIN_CHANGE")? {
            defaults.min_abs_change = min_change.abs();
        }
        defaults.min_volume = parse_var(&lookup, "LISTINGS_MIN_VOLUME")?;
        if let Some(max_results) = parse_var(&lookup, "LISTINGS_MAX_RESULTS")? {
            defaults.max_results = max_results;
        }
        if let Some(source) = parse_var(&lookup, "LISTINGS_SOURCE")? {
            config.source = source;
        }

        config.links.ref_bot = lookup("REF_BOT")
            .map(|bot| bot.trim().trim_start_matches('@').to_string())
            .filter(|bot| !bot.is_empty());
        config.links.ref_prefix = lookup("REF_PREFIX").unwrap_or_default().trim().to_string();
        if let Some(bounceable) = lookup("LINK_BOUNCEABLE") {
            config.links.bounceable = parse_bool(&bounceable).context("LINK_BOUNCEABLE")?;
        }
        if let Some(testnet) = lookup("LINK_TESTNET") {
            config.links.testnet = parse_bool(&testnet).context("LINK_TESTNET")?;
        }
        if let Some(checksum) = parse_var(&lookup, "LINK_CRC")? {
            config.links.checksum = checksum;
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "POLL_INTERVAL")? {
            config.poll_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "NEWTOKENS_INTERVAL")? {
            config.new_tokens_interval = Duration::from_secs(secs.max(1));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tonscout_common::utils::address::Crc16Variant;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<ListingsConfig, anyhow::Error> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ListingsConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_without_env() {
        assert_eq!(config(&[]).unwrap(), ListingsConfig::default());
    }

    #[test]
    fn reads_overrides() {
        let config = config(&[
            ("LISTINGS_MIN_CAP", "5000"),
            ("LISTINGS_MAX_CAP", "2000000"),
            ("LISTINGS_MIN_CHANGE", "-3.5"),
            ("LISTINGS_MIN_VOLUME", "100"),
            ("LISTINGS_MAX_RESULTS", "25"),
            ("LISTINGS_SOURCE", "bigpump"),
            ("REF_BOT", "@ston_bridge_bot"),
            ("REF_PREFIX", "r_1-"),
            ("LINK_BOUNCEABLE", "false"),
            ("LINK_CRC", "xmodem"),
            ("POLL_INTERVAL", "30"),
            ("NEWTOKENS_INTERVAL", ""),
        ])
        .unwrap();
        assert_eq!(config.defaults.min_cap, 5000.0);
        assert_eq!(config.defaults.max_cap, 2_000_000.0);
        assert_eq!(config.defaults.min_abs_change, 3.5);
        assert_eq!(config.defaults.min_volume, Some(100.0));
        assert_eq!(config.defaults.max_results, 25);
        assert_eq!(config.source, ListingsSource::BigPump);
        assert_eq!(config.links.ref_bot.as_deref(), Some("ston_bridge_bot"));
        assert_eq!(config.links.ref_prefix, "r_1-");
        assert!(!config.links.bounceable);
        assert!(!config.links.testnet);
        assert_eq!(config.links.checksum, Crc16Variant::Xmodem);
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.new_tokens_interval, DEFAULT_NEW_TOKENS_INTERVAL);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(config(&[("LISTINGS_MIN_CAP", "lots")]).is_err());
        assert!(config(&[("LISTINGS_MIN_CAP", "10"), ("LISTINGS_MAX_CAP", "5")]).is_err());
        assert!(config(&[("LINK_TESTNET", "maybe")]).is_err());
        assert!(config(&[("LINK_CRC", "crc32")]).is_err());
    }
}

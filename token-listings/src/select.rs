use std::collections::HashSet;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tonscout_common::utils::address::normalize_address;

use crate::records::TokenRecord;

/// Addresses in raw lowercase `wc:hex` form.
pub type IgnoreSet = HashSet<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortKey {
    /// Keep the order the source returned.
    AsReceived,
    #[default]
    CapitalizationDesc,
    /// By absolute change, so big drops rank next to big pumps.
    ChangeDesc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectParams {
    pub min_cap: f64,
    pub max_cap: f64,
    pub min_abs_change: f64,
    pub min_volume: Option<f64>,
    pub max_results: usize,
    pub sort: SortKey,
}

impl Default for SelectParams {
    fn default() -> Self {
        Self {
            min_cap: 10_000.0,
            max_cap: 1_000_000.0,
            min_abs_change: 2.0,
            min_volume: None,
            max_results: 10,
            sort: SortKey::default(),
        }
    }
}

/// Set key of an address. Unparseable addresses are still compared, case-insensitively.
pub fn address_key(address: &str) -> String {
    normalize_address(address).unwrap_or_else(|| address.trim().to_lowercase())
}

fn known(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

/// Filters, dedupes, sorts and truncates the records. Never fails, records that lack the
/// values a step needs are dropped by that step.
pub fn select(
    records: &[TokenRecord],
    params: &SelectParams,
    ignored: &IgnoreSet,
) -> Vec<TokenRecord> {
    let mut selected = records
        .iter()
        .filter(|record| {
            known(record.market_cap)
                .is_some_and(|cap| cap >= params.min_cap && cap <= params.max_cap)
        })
        .filter(|record| {
            known(record.price_change).is_some_and(|change| change.abs() >= params.min_abs_change)
        })
        .filter(|record| match params.min_volume {
            Some(min_volume) => known(record.volume).is_some_and(|volume| volume >= min_volume),
            None => true,
        })
        .map(|record| (address_key(&record.address), record))
        .filter(|(key, _)| !ignored.contains(key))
        .unique_by(|(key, _)| key.clone())
        .map(|(_, record)| record.clone())
        .collect::<Vec<_>>();

    // sort_by is stable, equal keys keep source order
    match params.sort {
        SortKey::AsReceived => {}
        SortKey::CapitalizationDesc => selected.sort_by(|a, b| {
            b.market_cap
                .unwrap_or_default()
                .total_cmp(&a.market_cap.unwrap_or_default())
        }),
        SortKey::ChangeDesc => selected.sort_by(|a, b| {
            b.price_change
                .unwrap_or_default()
                .abs()
                .total_cmp(&a.price_change.unwrap_or_default().abs())
        }),
    }
    selected.truncate(params.max_results);
    selected
}

/// BigPump coins that have STON.fi liquidity and weren't announced in this chat yet, in
/// source order. The caller marks the result as announced.
pub fn select_new_listings(
    coins: &[TokenRecord],
    liquid: &HashSet<String>,
    announced: &HashSet<String>,
    ignored: &IgnoreSet,
    limit: usize,
) -> Vec<TokenRecord> {
    coins
        .iter()
        .filter(|coin| !coin.address.trim().is_empty())
        .map(|coin| (address_key(&coin.address), coin))
        .filter(|(key, _)| liquid.contains(key))
        .filter(|(key, _)| !announced.contains(key) && !ignored.contains(key))
        .unique_by(|(key, _)| key.clone())
        .take(limit)
        .map(|(_, coin)| coin.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: char) -> String {
        format!("0:{}", byte.to_string().repeat(64))
    }

    fn params(max_results: usize, sort: SortKey) -> SelectParams {
        SelectParams {
            min_cap: 10_000.0,
            max_cap: 1_000_000.0,
            min_abs_change: 2.0,
            min_volume: None,
            max_results,
            sort,
        }
    }

    #[test]
    fn band_is_inclusive() {
        let records = vec![
            TokenRecord::new(addr('a'), 10_000.0, 5.0),
            TokenRecord::new(addr('b'), 1_000_000.0, 5.0),
            TokenRecord::new(addr('c'), 9_999.99, 5.0),
            TokenRecord::new(addr('d'), 1_000_000.01, 5.0),
        ];
        let selected = select(&records, &params(10, SortKey::AsReceived), &IgnoreSet::new());
        let addresses: Vec<_> = selected.iter().map(|r| r.address.clone()).collect();
        assert_eq!(addresses, vec![addr('a'), addr('b')]);
    }

    #[test]
    fn change_noise_is_dropped_in_both_directions() {
        let records = vec![
            TokenRecord::new(addr('a'), 50_000.0, 1.99),
            TokenRecord::new(addr('b'), 50_000.0, -1.5),
            TokenRecord::new(addr('c'), 50_000.0, -2.0),
            TokenRecord::new(addr('d'), 50_000.0, 2.0),
        ];
        let selected = select(&records, &params(10, SortKey::AsReceived), &IgnoreSet::new());
        let addresses: Vec<_> = selected.iter().map(|r| r.address.clone()).collect();
        assert_eq!(addresses, vec![addr('c'), addr('d')]);
    }

    #[test]
    fn ignored_addresses_never_appear() {
        let records = vec![
            TokenRecord::new(addr('a'), 50_000.0, 5.0),
            TokenRecord::new(addr('B'), 60_000.0, 5.0),
        ];
        let ignored: IgnoreSet = [address_key(&addr('b'))].into_iter().collect();
        let selected = select(&records, &params(10, SortKey::AsReceived), &ignored);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].address, addr('a'));
    }

    #[test]
    fn ignore_set_matches_friendly_form() {
        let friendly =
            tonscout_common::utils::address::canonicalize(&addr('a'), false, false).unwrap();
        let ignored: IgnoreSet = [address_key(&friendly)].into_iter().collect();
        let records = vec![TokenRecord::new(addr('a'), 50_000.0, 5.0)];
        assert!(select(&records, &params(10, SortKey::AsReceived), &ignored).is_empty());
    }

    #[test]
    fn output_is_bounded() {
        let records: Vec<_> = "abcdef"
            .chars()
            .map(|c| TokenRecord::new(addr(c), 50_000.0, 5.0))
            .collect();
        for max in 0..8 {
            let selected = select(&records, &params(max, SortKey::AsReceived), &IgnoreSet::new());
            assert_eq!(selected.len(), max.min(records.len()));
        }
    }

    #[test]
    fn malformed_records_are_skipped() {
        let mut records = vec![
            TokenRecord::new(addr('a'), 50_000.0, 5.0),
            TokenRecord::new(addr('b'), f64::NAN, 5.0),
            TokenRecord::new(addr('c'), 50_000.0, f64::INFINITY),
            TokenRecord::new(addr('d'), 50_000.0, 5.0),
        ];
        records[3].market_cap = None;
        records.push(TokenRecord {
            price_change: None,
            ..TokenRecord::new(addr('e'), 50_000.0, 0.0)
        });
        let selected = select(&records, &params(10, SortKey::AsReceived), &IgnoreSet::new());
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].address, addr('a'));
    }

    #[test]
    fn duplicates_keep_first_occurrence() {
        let mut first = TokenRecord::new(addr('a'), 50_000.0, 5.0);
        first.symbol = "FIRST".to_string();
        let mut second = TokenRecord::new(addr('A'), 70_000.0, 9.0);
        second.symbol = "SECOND".to_string();
        let selected = select(
            &[first, second],
            &params(10, SortKey::CapitalizationDesc),
            &IgnoreSet::new(),
        );
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].symbol, "FIRST");
    }

    #[test]
    fn sort_keys() {
        let records = vec![
            TokenRecord::new(addr('a'), 20_000.0, 3.0),
            TokenRecord::new(addr('b'), 90_000.0, -40.0),
            TokenRecord::new(addr('c'), 50_000.0, 12.0),
            TokenRecord::new(addr('d'), 50_000.0, 12.0),
        ];
        let order = |sort| {
            select(&records, &params(10, sort), &IgnoreSet::new())
                .into_iter()
                .map(|r| r.address.chars().nth(2).unwrap_or_default())
                .collect::<String>()
        };
        assert_eq!(order(SortKey::AsReceived), "abcd");
        assert_eq!(order(SortKey::CapitalizationDesc), "bcda");
        assert_eq!(order(SortKey::ChangeDesc), "bcda");
    }

    #[test]
    fn volume_filter_is_optional() {
        let mut with_volume = TokenRecord::new(addr('a'), 50_000.0, 5.0);
        with_volume.volume = Some(5_000.0);
        let without_volume = TokenRecord::new(addr('b'), 50_000.0, 5.0);
        let records = vec![with_volume, without_volume];

        let mut p = params(10, SortKey::AsReceived);
        assert_eq!(select(&records, &p, &IgnoreSet::new()).len(), 2);
        p.min_volume = Some(1_000.0);
        let selected = select(&records, &p, &IgnoreSet::new());
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].address, addr('a'));
        p.min_volume = Some(10_000.0);
        assert!(select(&records, &p, &IgnoreSet::new()).is_empty());
    }

    #[test]
    fn new_listings_need_liquidity_and_are_announced_once() {
        let coins: Vec<_> = "abcdefghijklmn"
            .chars()
            .map(|c| TokenRecord::new(addr(c), 0.0, 0.0))
            .chain(std::iter::once(TokenRecord::new("", 0.0, 0.0)))
            .collect();
        let liquid: HashSet<String> = "abcdefghijklm".chars().map(|c| address_key(&addr(c))).collect();
        let announced: HashSet<String> = [address_key(&addr('a'))].into_iter().collect();
        let ignored: IgnoreSet = [address_key(&addr('b'))].into_iter().collect();

        let selected = select_new_listings(&coins, &liquid, &announced, &ignored, 10);
        let order: String = selected
            .iter()
            .map(|r| r.address.chars().nth(2).unwrap_or_default())
            .collect();
        assert_eq!(order, "cdefghijkl");
    }
}

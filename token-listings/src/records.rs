use serde::{Deserialize, Deserializer, Serialize};

/// A token as it reaches the filter-rank pipeline. Missing or non-numeric upstream values
/// are `None`, the pipeline decides what to do with them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub name: String,
    pub symbol: String,
    /// Raw `workchain:hex` address as received.
    pub address: String,
    /// Effective capitalization in USD.
    pub market_cap: Option<f64>,
    /// Price change in percent, `6.0` means +6%.
    pub price_change: Option<f64>,
    /// Trading volume in USD.
    pub volume: Option<f64>,
    /// Price in USD.
    pub price: Option<f64>,
}

impl TokenRecord {
    pub fn new(address: impl Into<String>, market_cap: f64, price_change: f64) -> Self {
        Self {
            name: String::new(),
            symbol: String::new(),
            address: address.into(),
            market_cap: Some(market_cap),
            price_change: Some(price_change),
            volume: None,
            price: None,
        }
    }

    pub fn display_symbol(&self) -> &str {
        if !self.symbol.is_empty() {
            &self.symbol
        } else if !self.name.is_empty() {
            &self.name
        } else {
            "???"
        }
    }
}

/// Accepts `12.5`, `"12.5"`, `null`, `"N/A"` or anything else, anything that isn't a
/// finite number becomes `None`.
pub fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(number_from_value(&value))
}

pub fn number_from_value(value: &serde_json::Value) -> Option<f64> {
    let number = match value {
        serde_json::Value::Number(number) => number.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

/// Decodes every array element on its own, so one bad element doesn't take the whole
/// payload down.
pub fn decode_each<T: serde::de::DeserializeOwned>(items: Vec<serde_json::Value>) -> Vec<T> {
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<T>(item) {
            Ok(decoded) => Some(decoded),
            Err(err) => {
                log::debug!("Skipping malformed element: {err}");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Probe {
        #[serde(default, deserialize_with = "lenient_f64")]
        value: Option<f64>,
    }

    #[test]
    fn lenient_numbers() {
        let decode = |v: serde_json::Value| serde_json::from_value::<Probe>(v).unwrap().value;
        assert_eq!(decode(json!({ "value": 12.5 })), Some(12.5));
        assert_eq!(decode(json!({ "value": "12000" })), Some(12000.0));
        assert_eq!(decode(json!({ "value": "N/A" })), None);
        assert_eq!(decode(json!({ "value": null })), None);
        assert_eq!(decode(json!({ "value": [1] })), None);
        assert_eq!(decode(json!({})), None);
    }

    #[test]
    fn decode_each_skips_bad_elements() {
        let decoded: Vec<Probe> = decode_each(vec![
            json!({ "value": 1 }),
            json!("not an object"),
            json!({ "value": "2" }),
        ]);
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1].value, Some(2.0));
    }

    #[test]
    fn display_symbol_falls_back_to_name() {
        let mut record = TokenRecord::new("0:aa", 1.0, 1.0);
        assert_eq!(record.display_symbol(), "???");
        record.name = "Scout".to_string();
        assert_eq!(record.display_symbol(), "Scout");
        record.symbol = "SCT".to_string();
        assert_eq!(record.display_symbol(), "SCT");
    }
}

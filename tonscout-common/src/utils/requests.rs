use cached::proc_macro::cached;
use lazy_static::lazy_static;
use serde::de::DeserializeOwned;

lazy_static! {
    static ref CLIENT: reqwest::Client = reqwest::Client::builder()
        .user_agent("Mozilla/5.0 (compatible; TelegramBot/1.0)")
        .timeout(std::time::Duration::from_secs(20))
        .build()
        .expect("Failed to create reqwest client");
}

pub fn get_reqwest_client() -> &'static reqwest::Client {
    &CLIENT
}

async fn _get_internal(uri: &str) -> Result<serde_json::Value, anyhow::Error> {
    let response = get_reqwest_client().get(uri).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(anyhow::anyhow!("{uri} responded with {status}"));
    }
    Ok(response.json().await?)
}

#[cached(time = 300, result = true, size = 50)]
async fn _get_cached_5m(uri: String) -> Result<serde_json::Value, anyhow::Error> {
    _get_internal(&uri).await
}

pub async fn get_cached_5m<O: DeserializeOwned>(uri: &str) -> Result<O, anyhow::Error> {
    let res = _get_cached_5m(uri.to_string()).await?;
    Ok(serde_json::from_value(res)?)
}

pub async fn get_not_cached<O: DeserializeOwned>(uri: &str) -> Result<O, anyhow::Error> {
    let res = _get_internal(uri).await?;
    Ok(serde_json::from_value(res)?)
}

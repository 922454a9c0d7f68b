//! REST transport: envelope decoding for public and signed endpoints.

use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::core::{AssetInfo, Error, MarketInfo, Result};
use crate::exchange::model::{AssetEntry, PairEntry};
use crate::exchange::signer::Credentials;

/// The `(result, errors)` pair every authenticated call resolves to.
/// Transport failures surface as a one-element `errors` vector; callers
/// never see a panic or a hung reply.
#[derive(Debug, Clone, Default)]
pub struct ApiResponse {
    pub result: Option<Value>,
    pub errors: Vec<String>,
}

impl ApiResponse {
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self { result: None, errors: vec![message.into()] }
    }

    pub fn error_contains(&self, needle: &str) -> bool {
        self.errors.iter().any(|e| e.contains(needle))
    }
}

/// Thin wrapper over `reqwest` bound to one exchange base URL.
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
}

impl RestClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Unauthenticated market-data call. Errors in the envelope become
    /// `Error::Exchange`; the decoded `result` is returned otherwise.
    pub async fn public(&self, path: &str, params: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}/0/public/{}", self.base_url, path);
        let envelope: Value = self.http.get(&url).query(params).send().await?.json().await?;
        let (result, errors) = split_envelope(envelope);
        if !errors.is_empty() {
            return Err(Error::Exchange(errors.join("; ")));
        }
        result.ok_or_else(|| Error::Parse(format!("{}: envelope without result", path)))
    }

    /// Signed call. Infallible by contract: every failure mode collapses
    /// into the `errors` half of the response.
    pub(crate) async fn signed(
        &self,
        credentials: &Credentials,
        path: &str,
        params: &[(String, String)],
    ) -> ApiResponse {
        let url_path = format!("/0/private/{}", path);
        let nonce = chrono::Utc::now().timestamp_micros() as u64;
        let mut body = format!("nonce={}", nonce);
        for (k, v) in params {
            body.push('&');
            body.push_str(k);
            body.push('=');
            body.push_str(v);
        }
        let signature = credentials.sign(&url_path, nonce, &body);

        let sent = self
            .http
            .post(format!("{}{}", self.base_url, url_path))
            .header("API-Key", credentials.api_key())
            .header("API-Sign", signature)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await;

        let response = match sent {
            Ok(r) => r,
            Err(e) => return ApiResponse::transport(e.to_string()),
        };
        match response.json::<Value>().await {
            Ok(envelope) => {
                let (result, errors) = split_envelope(envelope);
                ApiResponse { result, errors }
            }
            Err(e) => ApiResponse::transport(e.to_string()),
        }
    }

    /// Fetch the asset catalogue, keyed by the exchange's asset names.
    pub async fn assets(&self) -> Result<HashMap<String, AssetInfo>> {
        let result = self.public("Assets", &[]).await?;
        let entries: HashMap<String, AssetEntry> = serde_json::from_value(result)?;
        Ok(entries
            .into_iter()
            .map(|(name, e)| (name.clone(), AssetInfo { name, decimals: e.decimals }))
            .collect())
    }

    /// Fetch the tradeable-pair catalogue, keyed by pair name.
    pub async fn asset_pairs(&self) -> Result<HashMap<String, MarketInfo>> {
        let result = self.public("AssetPairs", &[]).await?;
        let entries: HashMap<String, PairEntry> = serde_json::from_value(result)?;
        Ok(entries
            .into_iter()
            .map(|(pair, e)| {
                (
                    pair.clone(),
                    MarketInfo {
                        pair,
                        base: e.base,
                        quote: e.quote,
                        decimals: e.pair_decimals,
                        lot_decimals: e.lot_decimals,
                    },
                )
            })
            .collect())
    }
}

fn split_envelope(envelope: Value) -> (Option<Value>, Vec<String>) {
    let errors = envelope["error"]
        .as_array()
        .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();
    let result = match &envelope["result"] {
        Value::Null => None,
        v => Some(v.clone()),
    };
    (result, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_envelope() {
        let (result, errors) = split_envelope(json!({"error": [], "result": {"x": 1}}));
        assert!(errors.is_empty());
        assert_eq!(result.unwrap()["x"], 1);

        let (result, errors) = split_envelope(json!({"error": ["EAPI:Rate limit exceeded"]}));
        assert!(result.is_none());
        assert_eq!(errors, vec!["EAPI:Rate limit exceeded".to_string()]);
    }
}

//! Product API client
//!
//! Talks to a Rainforest-style request endpoint. Both calls are plain GETs
//! against the same URL, distinguished by the `type` query parameter:
//!
//! | Call | `type` | Identifier param | Payload |
//! |------|--------|------------------|---------|
//! | Discovery | `search` | `search_term` | `search_results[].asin` |
//! | Item fetch | `product` | `asin` | `product` |

use super::{Discoverer, FetchClient, FetchFailure, FetchOutcome, FetchUnit};
use crate::config::ApiConfig;
use crate::record::Record;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::time::Duration;

/// Builds the HTTP client shared by every fetch of a run
///
/// # Arguments
///
/// * `config` - The API configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &ApiConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Discovery and per-item client for the product API
///
/// Cloning is cheap; the underlying connection pool is shared.
#[derive(Debug, Clone)]
pub struct ProductApiClient {
    client: Client,
    endpoint: String,
    api_key: String,
    amazon_domain: String,
    max_page: u32,
}

impl ProductApiClient {
    /// Creates a client with its own connection pool
    pub fn new(config: &ApiConfig) -> Result<Self, reqwest::Error> {
        Ok(Self::with_client(build_http_client(config)?, config))
    }

    /// Creates a client around an existing connection pool
    pub fn with_client(client: Client, config: &ApiConfig) -> Self {
        Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            amazon_domain: config.amazon_domain.clone(),
            max_page: config.max_page,
        }
    }

    fn request(&self, kind: &str) -> RequestBuilder {
        self.client.get(&self.endpoint).query(&[
            ("api_key", self.api_key.as_str()),
            ("type", kind),
            ("amazon_domain", self.amazon_domain.as_str()),
        ])
    }

    /// Fetches a single product payload by identifier
    pub async fn fetch_product(&self, asin: &str) -> Result<Record, FetchFailure> {
        let request = self
            .request("product")
            .query(&[("output", "json"), ("asin", asin)]);
        let mut body = send_json(request).await?;

        match body.get_mut("product").map(Value::take) {
            Some(product) => Record::from_value(product)
                .ok_or_else(|| FetchFailure::Malformed("'product' is not an object".to_string())),
            None => Err(FetchFailure::MissingPayload("product".to_string())),
        }
    }

    /// Runs a search and returns the identifiers it lists
    pub async fn search(&self, term: &str) -> Result<Vec<String>, FetchFailure> {
        let max_page = self.max_page.to_string();
        let request = self
            .request("search")
            .query(&[("max_page", max_page.as_str()), ("search_term", term)]);
        let body = send_json(request).await?;
        Ok(extract_identifiers(&body))
    }
}

#[async_trait]
impl FetchClient for ProductApiClient {
    async fn fetch(&self, unit: &FetchUnit, _attempt: u32) -> FetchOutcome {
        self.fetch_product(&unit.id).await.into()
    }
}

#[async_trait]
impl Discoverer for ProductApiClient {
    async fn discover(&self, term: &str) -> Result<Vec<String>, FetchFailure> {
        self.search(term).await
    }
}

/// Sends a request and decodes its JSON body, classifying every failure
pub(crate) async fn send_json(request: RequestBuilder) -> Result<Value, FetchFailure> {
    let response = request
        .send()
        .await
        .map_err(|e| FetchFailure::from_reqwest(&e))?;

    if let Some(failure) = FetchFailure::from_status(response.status()) {
        return Err(failure);
    }

    let text = response
        .text()
        .await
        .map_err(|e| FetchFailure::from_reqwest(&e))?;

    serde_json::from_str(&text).map_err(|e| FetchFailure::Malformed(e.to_string()))
}

/// Pulls `search_results[].asin` out of a discovery response
///
/// Entries without a non-empty identifier are skipped.
fn extract_identifiers(body: &Value) -> Vec<String> {
    body.get("search_results")
        .and_then(Value::as_array)
        .map(|results| {
            results
                .iter()
                .filter_map(|entry| entry.get("asin").and_then(Value::as_str))
                .map(str::trim)
                .filter(|asin| !asin.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

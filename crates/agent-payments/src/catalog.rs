//! Stripe product catalog over the REST API.
//!
//! Product search is not covered by the typed Stripe bindings, so this talks
//! to `/v1/products/search` and `/v1/prices` directly with the secret key.

use std::time::Duration;

use agent_core::RetryPolicy;
use futures::future::try_join_all;
use serde::Deserialize;
use std::collections::HashMap;

use crate::error::{PaymentError, Result};
use crate::model::{Product, ProductPrice};

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";
pub const MAX_SEARCH_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct StripeProduct {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    images: Vec<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct StripePrice {
    id: String,
    unit_amount: Option<i64>,
    currency: String,
    #[serde(rename = "type")]
    price_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
}

/// Read-only catalog client
pub struct StripeCatalog {
    http: reqwest::Client,
    api_base: String,
    secret_key: String,
    retry: RetryPolicy,
}

impl StripeCatalog {
    pub fn new(secret_key: impl Into<String>, api_base: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PaymentError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Search active products; `limit` is clamped to 1..=100
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<Product>> {
        let limit = limit.clamp(1, MAX_SEARCH_LIMIT);
        let search = search_query(query);
        let limit_param = limit.to_string();

        let products: ListResponse<StripeProduct> = self
            .get(
                "/v1/products/search",
                &[("query", search.as_str()), ("limit", limit_param.as_str())],
            )
            .await?;

        let mut products = self.with_prices(products.data).await?;
        products.truncate(limit);

        tracing::debug!(query, count = products.len(), "Stripe product search");
        Ok(products)
    }

    async fn with_prices(&self, products: Vec<StripeProduct>) -> Result<Vec<Product>> {
        let lookups = products.into_iter().map(|p| async move {
            let prices: ListResponse<StripePrice> = self
                .get("/v1/prices", &[("product", p.id.as_str()), ("active", "true")])
                .await?;

            Ok::<_, PaymentError>(Product {
                id: p.id,
                name: p.name,
                description: p.description,
                images: p.images,
                metadata: p.metadata,
                prices: prices
                    .data
                    .into_iter()
                    .map(|price| ProductPrice {
                        id: price.id,
                        amount: price.unit_amount,
                        currency: price.currency,
                        price_type: price.price_type,
                    })
                    .collect(),
            })
        });

        try_join_all(lookups).await
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}{}", self.api_base, path);

        self.retry
            .run("stripe.catalog", || {
                let rb = self
                    .http
                    .get(&url)
                    .bearer_auth(&self.secret_key)
                    .query(query);
                async move {
                    let response = rb.send().await?;
                    let status = response.status();
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(stripe_status_error(status.as_u16(), &body));
                    }
                    response
                        .json::<T>()
                        .await
                        .map_err(|e| PaymentError::Decode(e.to_string()))
                }
            })
            .await
    }
}

/// Wrap free text into Stripe search syntax; pass through queries that
/// already use field clauses.
pub fn search_query(query: &str) -> String {
    let query = query.trim();
    if query.contains(':') || query.contains('~') {
        return query.to_string();
    }
    let escaped = query.replace('\\', "\\\\").replace('"', "\\\"");
    format!("active:'true' AND name~\"{}\"", escaped)
}

fn stripe_status_error(status: u16, body: &str) -> PaymentError {
    let message = serde_json::from_str::<StripeErrorBody>(body)
        .ok()
        .and_then(|b| b.error.message)
        .unwrap_or_else(|| body.to_string());

    if status == 429 || status >= 500 {
        PaymentError::StripeUnavailable(format!("HTTP {}: {}", status, message))
    } else {
        PaymentError::Stripe(format!("HTTP {}: {}", status, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn catalog(server: &MockServer) -> StripeCatalog {
        StripeCatalog::new("sk_test_123", server.base_url())
            .unwrap()
            .with_retry(RetryPolicy {
                base_ms: 1,
                jitter: 0.0,
                ..Default::default()
            })
    }

    #[test]
    fn test_search_query_wrapping() {
        assert_eq!(search_query("blue jeans"), "active:'true' AND name~\"blue jeans\"");
        assert_eq!(search_query("metadata['sku']:'A1'"), "metadata['sku']:'A1'");
        assert_eq!(search_query("6\" boots"), "active:'true' AND name~\"6\\\" boots\"");
    }

    #[tokio::test]
    async fn test_search_merges_prices() {
        let server = MockServer::start_async().await;
        let search = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v1/products/search")
                    .header("authorization", "Bearer sk_test_123")
                    .query_param("query", "active:'true' AND name~\"jacket\"")
                    .query_param("limit", "2");
                then.status(200).json_body(json!({
                    "object": "search_result",
                    "data": [
                        {"id": "prod_a", "name": "Rain Jacket", "images": [], "metadata": {"color": "blue"}},
                        {"id": "prod_b", "name": "Down Jacket", "description": "Warm"}
                    ]
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/prices").query_param("product", "prod_a");
                then.status(200).json_body(json!({
                    "data": [{"id": "price_a", "unit_amount": 8900, "currency": "usd", "type": "one_time"}]
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/prices").query_param("product", "prod_b");
                then.status(200).json_body(json!({"data": []}));
            })
            .await;

        let products = catalog(&server).search("jacket", 2).await.unwrap();
        search.assert_async().await;

        assert_eq!(products.len(), 2);
        assert_eq!(products[0].prices[0].amount, Some(8900));
        assert_eq!(products[0].metadata["color"], "blue");
        assert!(products[1].prices.is_empty());
    }

    #[tokio::test]
    async fn test_client_error_surfaces_stripe_message() {
        let server = MockServer::start_async().await;
        let search = server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/products/search");
                then.status(400)
                    .json_body(json!({"error": {"message": "Invalid search query"}}));
            })
            .await;

        let err = catalog(&server).search("x", 10).await.unwrap_err();
        assert!(matches!(err, PaymentError::Stripe(ref m) if m.contains("Invalid search query")));
        search.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let server = MockServer::start_async().await;
        let search = server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/products/search");
                then.status(500);
            })
            .await;

        let err = catalog(&server).search("x", 10).await.unwrap_err();
        assert!(matches!(err, PaymentError::StripeUnavailable(_)));
        search.assert_hits_async(3).await;
    }
}

//! Universal Checkout Protocol client
//!
//! Talks to a single merchant: discovery via `/.well-known/ucp`, then
//! create / update / complete / cancel / get on the endpoints the merchant
//! advertises (falling back to the conventional `/ucp/checkout` paths).
//!
//! ```text
//!  discover ──▶ create (draft) ──▶ update* ──▶ complete (SPT) ──▶ Order
//!                     │
//!                     └──────────▶ cancel
//! ```

use std::time::Duration;

use agent_core::RetryPolicy;
use reqwest::{header, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;
use url::Url;

use crate::error::{PaymentError, Result};
use crate::model::{
    CheckoutSession, CompleteCheckoutRequest, CreateCheckoutRequest, Order, UcpCapabilities,
    UpdateCheckoutRequest,
};

const DISCOVERY_PATH: &str = "/.well-known/ucp";

/// Per-merchant client settings
#[derive(Clone, Debug)]
pub struct UcpConfig {
    /// Base timeout; completion gets twice this
    pub timeout: Duration,

    /// Optional bearer token for merchants that require one
    pub auth_token: Option<String>,

    pub user_agent: String,

    pub retry: RetryPolicy,
}

impl Default for UcpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            auth_token: None,
            user_agent: concat!("checkout-agent/", env!("CARGO_PKG_VERSION")).into(),
            retry: RetryPolicy::default(),
        }
    }
}

/// UCP client bound to one merchant base URL
pub struct UcpClient {
    base: Url,
    http: reqwest::Client,
    config: UcpConfig,
    capabilities: OnceCell<UcpCapabilities>,
}

impl UcpClient {
    pub fn new(merchant_base_url: &str) -> Result<Self> {
        Self::with_config(merchant_base_url, UcpConfig::default())
    }

    pub fn with_config(merchant_base_url: &str, config: UcpConfig) -> Result<Self> {
        let base = parse_merchant_url(merchant_base_url)?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| PaymentError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            base,
            http,
            config,
            capabilities: OnceCell::new(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Fetch the merchant's capabilities. Cached for the lifetime of the
    /// client once a fetch succeeds; a 404 caches `supported = false`.
    pub async fn discover(&self) -> Result<UcpCapabilities> {
        self.capabilities
            .get_or_try_init(|| self.fetch_capabilities())
            .await
            .cloned()
    }

    pub async fn supports_ucp(&self) -> Result<bool> {
        Ok(self.discover().await?.supported)
    }

    pub async fn create_checkout(&self, request: &CreateCheckoutRequest) -> Result<CheckoutSession> {
        let caps = self.require_ucp().await?;
        let url = self.endpoint(&caps, "create_checkout", "/ucp/checkout", None)?;

        let session: CheckoutSession = self
            .send_json("ucp.create_checkout", &self.config.retry, || {
                self.request(Method::POST, url.clone()).json(request)
            })
            .await?;

        tracing::info!(
            merchant = %self.base,
            checkout_id = %session.id,
            status = session.status.as_str(),
            total = ?session.total(),
            "UCP checkout created"
        );
        Ok(session)
    }

    pub async fn update_checkout(
        &self,
        checkout_id: &str,
        update: &UpdateCheckoutRequest,
    ) -> Result<CheckoutSession> {
        let caps = self.require_ucp().await?;
        let url = self.endpoint(&caps, "update_checkout", "/ucp/checkout/{id}", Some(checkout_id))?;

        self.send_json("ucp.update_checkout", &self.config.retry, || {
            self.request(Method::PATCH, url.clone()).json(update)
        })
        .await
    }

    /// Complete with a shared payment token. Without an idempotency key the
    /// request is sent exactly once.
    pub async fn complete_checkout(
        &self,
        checkout_id: &str,
        payment_token: &str,
        idempotency_key: Option<&str>,
    ) -> Result<Order> {
        let caps = self.require_ucp().await?;
        let url = self.endpoint(
            &caps,
            "complete_checkout",
            "/ucp/checkout/{id}/complete",
            Some(checkout_id),
        )?;

        let body = CompleteCheckoutRequest {
            payment_token: payment_token.to_string(),
            idempotency_key: idempotency_key.map(str::to_string),
        };
        let policy = match idempotency_key {
            Some(_) => self.config.retry.clone(),
            None => RetryPolicy::none(),
        };

        let order: Order = self
            .send_json("ucp.complete_checkout", &policy, || {
                let mut rb = self
                    .request(Method::POST, url.clone())
                    .timeout(self.config.timeout * 2)
                    .json(&body);
                if let Some(key) = idempotency_key {
                    rb = rb.header("Idempotency-Key", key);
                }
                rb
            })
            .await?;

        tracing::info!(
            merchant = %self.base,
            checkout_id,
            order_id = %order.id,
            "UCP checkout completed"
        );
        Ok(order)
    }

    pub async fn cancel_checkout(&self, checkout_id: &str) -> Result<serde_json::Value> {
        let caps = self.require_ucp().await?;
        let url = self.endpoint(
            &caps,
            "cancel_checkout",
            "/ucp/checkout/{id}/cancel",
            Some(checkout_id),
        )?;

        self.send_json("ucp.cancel_checkout", &self.config.retry, || {
            self.request(Method::POST, url.clone())
        })
        .await
    }

    pub async fn get_checkout(&self, checkout_id: &str) -> Result<CheckoutSession> {
        let caps = self.require_ucp().await?;
        let url = self.endpoint(&caps, "get_checkout", "/ucp/checkout/{id}", Some(checkout_id))?;

        self.send_json("ucp.get_checkout", &self.config.retry, || {
            self.request(Method::GET, url.clone())
        })
        .await
    }

    async fn fetch_capabilities(&self) -> Result<UcpCapabilities> {
        let url = self
            .base
            .join(DISCOVERY_PATH)
            .map_err(|e| PaymentError::Config(e.to_string()))?;

        let caps = self
            .config
            .retry
            .run("ucp.discover", || {
                let rb = self.request(Method::GET, url.clone());
                async move {
                    let response = rb.send().await?;
                    let status = response.status();
                    if status == StatusCode::NOT_FOUND {
                        return Ok(UcpCapabilities::unsupported());
                    }
                    decode(response).await
                }
            })
            .await?;

        tracing::info!(
            merchant = %self.base,
            supported = caps.supported,
            version = %caps.version,
            "UCP discovery"
        );
        Ok(caps)
    }

    async fn require_ucp(&self) -> Result<UcpCapabilities> {
        let caps = self.discover().await?;
        if !caps.supported {
            return Err(PaymentError::UcpUnsupported(self.base.to_string()));
        }
        Ok(caps)
    }

    fn endpoint(
        &self,
        caps: &UcpCapabilities,
        operation: &str,
        default: &str,
        checkout_id: Option<&str>,
    ) -> Result<Url> {
        let template = caps
            .endpoints
            .get(operation)
            .map(String::as_str)
            .unwrap_or(default);
        let path = match checkout_id {
            Some(id) => template.replace("{id}", id),
            None => template.to_string(),
        };

        self.base
            .join(&path)
            .map_err(|e| PaymentError::Config(format!("bad endpoint '{}': {}", path, e)))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let rb = self
            .http
            .request(method, url)
            .header(header::CONTENT_TYPE, "application/json");

        match &self.config.auth_token {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    async fn send_json<T, F>(&self, operation: &str, policy: &RetryPolicy, build: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        tracing::debug!(merchant = %self.base, operation, "UCP request");

        policy
            .run(operation, || {
                let rb = build();
                async move { decode(rb.send().await?).await }
            })
            .await
    }
}

/// Non-2xx becomes `PaymentError::Ucp` with status and body preserved
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(PaymentError::Ucp {
            status: status.as_u16(),
            body,
        });
    }

    response
        .json::<T>()
        .await
        .map_err(|e| PaymentError::Decode(e.to_string()))
}

/// Validate a merchant base URL (http/https with a host)
pub fn parse_merchant_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| PaymentError::Config(format!("invalid merchant URL '{}': {}", raw, e)))?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(PaymentError::Config(format!(
            "merchant URL must be http(s) with a host: {}",
            raw
        )));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BuyerInfo, LineItem};
    use httpmock::prelude::*;
    use httpmock::Method::PATCH;
    use serde_json::json;

    fn client(server: &MockServer) -> UcpClient {
        let config = UcpConfig {
            auth_token: Some("merchant-token".into()),
            retry: RetryPolicy {
                base_ms: 1,
                jitter: 0.0,
                ..Default::default()
            },
            ..Default::default()
        };
        UcpClient::with_config(&server.base_url(), config).unwrap()
    }

    fn create_request() -> CreateCheckoutRequest {
        CreateCheckoutRequest {
            items: vec![LineItem {
                product_id: "prod_1".into(),
                quantity: 2,
                price_id: Some("price_1".into()),
                variant_id: None,
            }],
            buyer: BuyerInfo {
                email: "ada@example.com".into(),
                name: Some("Ada".into()),
                phone: None,
            },
            fulfillment_address: None,
            billing_address: None,
            metadata: None,
        }
    }

    async fn advertise(server: &MockServer, endpoints: serde_json::Value) {
        server
            .mock_async(|when, then| {
                when.method(GET).path("/.well-known/ucp");
                then.status(200).json_body(json!({
                    "supported": true,
                    "version": "1.1",
                    "endpoints": endpoints,
                    "features": ["shipping_options"]
                }));
            })
            .await;
    }

    #[tokio::test]
    async fn test_discovery_404_is_unsupported_and_cached() {
        let server = MockServer::start_async().await;
        let well_known = server
            .mock_async(|when, then| {
                when.method(GET).path("/.well-known/ucp");
                then.status(404);
            })
            .await;

        let client = client(&server);
        assert!(!client.supports_ucp().await.unwrap());
        assert!(!client.supports_ucp().await.unwrap());
        well_known.assert_hits_async(1).await;

        let err = client.create_checkout(&create_request()).await.unwrap_err();
        assert!(matches!(err, PaymentError::UcpUnsupported(_)));
    }

    #[tokio::test]
    async fn test_discovery_error_status_is_not_cached_as_unsupported() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/.well-known/ucp");
                then.status(403).body("forbidden");
            })
            .await;

        let err = client(&server).discover().await.unwrap_err();
        assert!(matches!(err, PaymentError::Ucp { status: 403, .. }));
    }

    #[tokio::test]
    async fn test_create_uses_advertised_endpoint_and_auth() {
        let server = MockServer::start_async().await;
        advertise(&server, json!({"create_checkout": "/api/v2/checkouts"})).await;
        let create = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/v2/checkouts")
                    .header("authorization", "Bearer merchant-token")
                    .json_body_partial(r#"{"buyer": {"email": "ada@example.com"}}"#);
                then.status(201).json_body(json!({
                    "id": "chk_42",
                    "status": "draft",
                    "items": [{"product_id": "prod_1", "quantity": 2}],
                    "totals": {"subtotal": 5000, "tax": 400, "shipping": 0, "total": 5400},
                    "currency": "usd",
                    "merchant_account_id": "acct_9"
                }));
            })
            .await;

        let session = client(&server).create_checkout(&create_request()).await.unwrap();
        create.assert_async().await;
        assert_eq!(session.id, "chk_42");
        assert_eq!(session.total(), Some(5400));
    }

    #[tokio::test]
    async fn test_update_substitutes_checkout_id() {
        let server = MockServer::start_async().await;
        advertise(&server, json!({})).await;
        let update = server
            .mock_async(|when, then| {
                when.method(PATCH)
                    .path("/ucp/checkout/chk_7")
                    .json_body(json!({"shipping_option_id": "express"}));
                then.status(200).json_body(json!({
                    "id": "chk_7",
                    "status": "pending",
                    "shipping_option_id": "express"
                }));
            })
            .await;

        let request = UpdateCheckoutRequest {
            shipping_option_id: Some("express".into()),
            ..Default::default()
        };
        let session = client(&server).update_checkout("chk_7", &request).await.unwrap();
        update.assert_async().await;
        assert_eq!(session.shipping_option_id.as_deref(), Some("express"));
    }

    #[tokio::test]
    async fn test_complete_sends_idempotency_key() {
        let server = MockServer::start_async().await;
        advertise(&server, json!({})).await;
        let complete = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/ucp/checkout/chk_1/complete")
                    .header("idempotency-key", "idem-1")
                    .json_body(json!({"payment_token": "pi_secret", "idempotency_key": "idem-1"}));
                then.status(200)
                    .json_body(json!({"order_id": "ord_1", "order_number": "A-1001", "status": "confirmed"}));
            })
            .await;

        let order = client(&server)
            .complete_checkout("chk_1", "pi_secret", Some("idem-1"))
            .await
            .unwrap();
        complete.assert_async().await;
        assert_eq!(order.id, "ord_1");
        assert_eq!(order.order_number.as_deref(), Some("A-1001"));
    }

    #[tokio::test]
    async fn test_complete_without_key_is_sent_once() {
        let server = MockServer::start_async().await;
        advertise(&server, json!({})).await;
        let complete = server
            .mock_async(|when, then| {
                when.method(POST).path("/ucp/checkout/chk_1/complete");
                then.status(503).body("busy");
            })
            .await;

        let err = client(&server)
            .complete_checkout("chk_1", "pi_secret", None)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Ucp { status: 503, .. }));
        complete.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_server_errors_retry_client_errors_do_not() {
        let server = MockServer::start_async().await;
        advertise(&server, json!({})).await;
        let flaky = server
            .mock_async(|when, then| {
                when.method(GET).path("/ucp/checkout/chk_5");
                then.status(502);
            })
            .await;
        let conflict = server
            .mock_async(|when, then| {
                when.method(POST).path("/ucp/checkout/chk_5/cancel");
                then.status(409).body("already completed");
            })
            .await;

        let client = client(&server);
        assert!(client.get_checkout("chk_5").await.is_err());
        flaky.assert_hits_async(3).await;

        let err = client.cancel_checkout("chk_5").await.unwrap_err();
        assert!(err.to_string().contains("already completed"));
        conflict.assert_hits_async(1).await;
    }

    #[test]
    fn test_merchant_url_validation() {
        assert!(parse_merchant_url("https://shop.example.com").is_ok());
        assert!(parse_merchant_url("ftp://shop.example.com").is_err());
        assert!(parse_merchant_url("not a url").is_err());
    }
}

//! Stripe payment provider
//!
//! Hosted Checkout sessions, order status lookups and shared payment tokens
//! through `async-stripe`; catalog search through [`StripeCatalog`].
//!
//! ```text
//! ┌─────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │  Shopper    │────▶│  Stripe Hosted  │────▶│ {merchant}/success│
//! │  (agent)    │     │  Checkout Page  │     │ {merchant}/cancel │
//! └─────────────┘     └─────────────────┘     └──────────────────┘
//! ```

use std::future::Future;
use std::time::Duration;

use agent_core::RetryPolicy;
use async_trait::async_trait;
use stripe::{
    CheckoutSession as StripeCheckoutSession, CheckoutSessionId, CheckoutSessionMode, Client,
    CreateCheckoutSession, CreateCheckoutSessionLineItems, CreatePaymentIntent,
    CreatePaymentIntentTransferData, Currency, CustomerId, PaymentIntent, RequestStrategy,
    StripeError,
};

use crate::catalog::{StripeCatalog, DEFAULT_API_BASE};
use crate::error::{PaymentError, Result};
use crate::model::{
    HostedCheckout, HostedCheckoutRequest, OrderStatus, PaymentIntentSummary, Product,
    SharedPaymentToken, SharedPaymentTokenRequest,
};
use crate::provider::PaymentProvider;

/// Per-attempt limit for typed Stripe calls
pub const DEFAULT_STRIPE_TIMEOUT: Duration = Duration::from_secs(30);

/// Stripe client wrapper
pub struct StripeClient {
    client: Client,
    catalog: StripeCatalog,
    webhook_secret: Option<String>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl StripeClient {
    /// Create a new Stripe client
    pub fn new(secret_key: &str, webhook_secret: Option<String>) -> Result<Self> {
        Self::with_api_base(secret_key, webhook_secret, DEFAULT_API_BASE)
    }

    /// Point catalog and typed calls at `api_base`
    pub fn with_api_base(
        secret_key: &str,
        webhook_secret: Option<String>,
        api_base: &str,
    ) -> Result<Self> {
        let base = url::Url::parse(&format!("{}/", api_base.trim_end_matches('/')))
            .map_err(|e| PaymentError::Config(format!("invalid Stripe API base '{}': {}", api_base, e)))?;

        Ok(Self {
            client: Client::from_url(base.as_str(), secret_key),
            catalog: StripeCatalog::new(secret_key, api_base)?,
            webhook_secret,
            retry: RetryPolicy::default(),
            timeout: DEFAULT_STRIPE_TIMEOUT,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.catalog = self.catalog.with_retry(retry.clone());
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Create from `STRIPE_SECRET_KEY`, optional `STRIPE_WEBHOOK_SECRET`
    /// and `STRIPE_API_BASE`
    pub fn from_env() -> Result<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| PaymentError::Config("STRIPE_SECRET_KEY not set".into()))?;
        let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET").ok();
        let api_base =
            std::env::var("STRIPE_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());

        Self::with_api_base(&secret_key, webhook_secret, &api_base)
    }

    /// Webhook signing secret, when webhooks are enabled
    pub fn webhook_secret(&self) -> Option<&str> {
        self.webhook_secret.as_deref()
    }

    pub fn catalog(&self) -> &StripeCatalog {
        &self.catalog
    }

    /// Get the underlying Stripe client
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

impl StripeClient {
    /// Run a typed Stripe request under the retry policy, each attempt
    /// bounded by the client timeout
    async fn call<T, F, Fut>(&self, operation: &str, mut request: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, StripeError>>,
    {
        let timeout = self.timeout;
        self.retry
            .run(operation, || {
                let pending = request();
                async move {
                    match tokio::time::timeout(timeout, pending).await {
                        Ok(result) => result.map_err(PaymentError::from),
                        Err(_) => Err(PaymentError::StripeUnavailable(format!(
                            "{} timed out after {}ms",
                            operation,
                            timeout.as_millis()
                        ))),
                    }
                }
            })
            .await
    }
}

fn parse_currency(code: &str) -> Result<Currency> {
    serde_json::from_value(serde_json::Value::String(code.to_ascii_lowercase()))
        .map_err(|_| PaymentError::Config(format!("unsupported currency '{}'", code)))
}

#[async_trait]
impl PaymentProvider for StripeClient {
    fn name(&self) -> &str {
        "stripe"
    }

    async fn search_products(&self, query: &str, limit: usize) -> Result<Vec<Product>> {
        self.catalog.search(query, limit).await
    }

    async fn create_checkout_session(&self, request: HostedCheckoutRequest) -> Result<HostedCheckout> {
        let mut params = CreateCheckoutSession::new();
        params.success_url = Some(&request.success_url);
        params.cancel_url = Some(&request.cancel_url);
        params.mode = Some(CheckoutSessionMode::Payment);
        params.customer_email = request.customer_email.as_deref();
        if !request.metadata.is_empty() {
            params.metadata = Some(request.metadata.clone());
        }

        params.line_items = Some(
            request
                .line_items
                .iter()
                .map(|item| CreateCheckoutSessionLineItems {
                    price: Some(item.price.clone()),
                    quantity: Some(u64::from(item.quantity)),
                    ..Default::default()
                })
                .collect(),
        );

        let session = self
            .call("stripe.checkout_session.create", || {
                StripeCheckoutSession::create(&self.client, params.clone())
            })
            .await?;

        let url = session
            .url
            .clone()
            .ok_or_else(|| PaymentError::Stripe("No checkout URL returned".into()))?;

        tracing::info!(
            session_id = %session.id,
            amount_total = ?session.amount_total,
            "Created Stripe checkout session"
        );

        Ok(HostedCheckout {
            id: session.id.to_string(),
            url,
            status: session.status.map(|s| s.to_string()),
            amount_total: session.amount_total,
            currency: session.currency.map(|c| c.to_string()),
            payment_status: Some(session.payment_status.to_string()),
        })
    }

    async fn order_status(&self, session_id: &str) -> Result<OrderStatus> {
        let id: CheckoutSessionId = session_id
            .parse()
            .map_err(|_| PaymentError::NotFound(format!("invalid checkout session id '{}'", session_id)))?;

        let session = self
            .call("stripe.checkout_session.retrieve", || {
                StripeCheckoutSession::retrieve(&self.client, &id, &["payment_intent"])
            })
            .await?;

        let payment_intent = match &session.payment_intent {
            Some(expandable) => {
                let intent = match expandable.as_object() {
                    Some(intent) => intent.clone(),
                    None => {
                        let intent_id = expandable.id();
                        self.call("stripe.payment_intent.retrieve", || {
                            PaymentIntent::retrieve(&self.client, &intent_id, &[])
                        })
                        .await?
                    }
                };
                Some(PaymentIntentSummary {
                    id: intent.id.to_string(),
                    status: intent.status.to_string(),
                    amount: intent.amount,
                    currency: intent.currency.to_string(),
                })
            }
            None => None,
        };

        Ok(OrderStatus {
            id: session.id.to_string(),
            status: session.status.map(|s| s.to_string()),
            payment_status: Some(session.payment_status.to_string()),
            amount_total: session.amount_total,
            currency: session.currency.map(|c| c.to_string()),
            payment_intent,
        })
    }

    async fn create_shared_payment_token(
        &self,
        request: SharedPaymentTokenRequest,
    ) -> Result<SharedPaymentToken> {
        if request.amount <= 0 {
            return Err(PaymentError::Stripe(format!(
                "payment amount must be positive, got {}",
                request.amount
            )));
        }

        let mut params = CreatePaymentIntent::new(request.amount, parse_currency(&request.currency)?);
        params.transfer_data = Some(CreatePaymentIntentTransferData {
            amount: None,
            destination: request.merchant_account_id.clone(),
        });
        if let Some(customer) = &request.customer_id {
            let customer: CustomerId = customer
                .parse()
                .map_err(|_| PaymentError::Stripe(format!("invalid customer id '{}'", customer)))?;
            params.customer = Some(customer);
        }
        if !request.metadata.is_empty() {
            params.metadata = Some(request.metadata.clone());
        }

        // Same key on every retry of this completion attempt
        let client = self
            .client
            .clone()
            .with_strategy(RequestStrategy::Idempotent(request.idempotency_key.clone()));
        let intent = self
            .call("stripe.payment_intent.create", || {
                PaymentIntent::create(&client, params.clone())
            })
            .await?;

        let token = intent
            .client_secret
            .clone()
            .ok_or_else(|| PaymentError::Stripe("PaymentIntent has no client secret".into()))?;

        tracing::info!(
            payment_intent = %intent.id,
            amount = intent.amount,
            merchant_account = %request.merchant_account_id,
            "Created shared payment token"
        );

        Ok(SharedPaymentToken {
            token,
            payment_intent_id: intent.id.to_string(),
            amount: intent.amount,
            currency: intent.currency.to_string(),
            status: intent.status.to_string(),
        })
    }
}

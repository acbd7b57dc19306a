//! Checkout orchestrator
//!
//! `PaymentAgent` owns the session carts and routes each checkout to UCP,
//! browser automation or Stripe hosted Checkout. Every operation computes
//! against the vendors first and commits to the cart last, while holding
//! that shopper's cart lock, so a failed call leaves the cart as it was.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::RwLock;
use url::Url;

use agent_core::SessionId;
use agent_payments::model::{
    Address, BuyerInfo, CheckoutSession, CreateCheckoutRequest, HostedCheckoutRequest,
    HostedLineItem, SharedPaymentTokenRequest, UpdateCheckoutRequest,
};
use agent_payments::{parse_merchant_url, PaymentError, PaymentProvider, UcpClient, UcpConfig, CART_SESSION_KEY};

use crate::browser::{AutomationJob, BrowserAutomation, JobItem};
use crate::cart::SessionCarts;
use crate::config::CommerceConfig;
use crate::error::{CommerceError, Result};
use crate::model::{
    ActiveCheckout, AddToCartOutcome, CancelOutcome, Cart, CartItem, CartView, CheckoutDetails,
    CheckoutProtocol,
    CompleteCheckoutOutcome, CreateCheckoutOutcome, DiscoveryOutcome, OrderStatusOutcome,
    SearchOutcome,
};

pub const MAX_SEARCH_LIMIT: usize = 100;
pub const MAX_QUANTITY: u32 = 999;
pub const MAX_CACHED_MERCHANTS: usize = 256;

fn default_quantity() -> i64 {
    1
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddToCartParams {
    pub product_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    #[serde(default)]
    pub price_id: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateCheckoutParams {
    pub merchant_url: String,
    pub buyer_email: String,
    #[serde(default)]
    pub buyer_name: Option<String>,
    #[serde(default)]
    pub shipping_address: Option<Address>,
    /// Saved payment method for browser checkout
    #[serde(default)]
    pub payment_method: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateCheckoutParams {
    pub checkout_id: String,
    #[serde(default)]
    pub fulfillment_address: Option<Address>,
    #[serde(default)]
    pub billing_address: Option<Address>,
    #[serde(default)]
    pub shipping_option_id: Option<String>,
}

pub struct PaymentAgent {
    provider: Option<Arc<dyn PaymentProvider>>,
    carts: SessionCarts,
    merchants: RwLock<HashMap<String, Arc<UcpClient>>>,
    ucp_config: UcpConfig,
    browser: Option<BrowserAutomation>,
}

impl PaymentAgent {
    /// Agent without browser fallback
    pub fn new(provider: Arc<dyn PaymentProvider>) -> Self {
        Self::with_provider(Some(provider))
    }

    /// Agent with no payment account. Carts and UCP checkout creation still
    /// work; search, hosted checkout, completion and order status report
    /// Stripe as not configured.
    pub fn without_payments() -> Self {
        Self::with_provider(None)
    }

    fn with_provider(provider: Option<Arc<dyn PaymentProvider>>) -> Self {
        Self {
            provider,
            carts: SessionCarts::new(),
            merchants: RwLock::new(HashMap::new()),
            ucp_config: UcpConfig::default(),
            browser: None,
        }
    }

    /// Agent wired from [`CommerceConfig`]; WebDriver fallback when enabled
    pub fn from_config(
        provider: Option<Arc<dyn PaymentProvider>>,
        config: &CommerceConfig,
    ) -> Result<Self> {
        let agent = Self::with_provider(provider).with_ucp_config(config.ucp.clone());
        if !config.browser_fallback_enabled {
            return Ok(agent);
        }
        Ok(agent.with_browser(BrowserAutomation::webdriver(config.browser.clone())?))
    }

    pub fn with_browser(mut self, browser: BrowserAutomation) -> Self {
        self.browser = Some(browser);
        self
    }

    pub fn with_ucp_config(mut self, config: UcpConfig) -> Self {
        self.ucp_config = config;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.as_ref().map_or("none", |p| p.name())
    }

    pub fn payments_configured(&self) -> bool {
        self.provider.is_some()
    }

    fn payments(&self) -> Result<&dyn PaymentProvider> {
        self.provider
            .as_deref()
            .ok_or_else(|| CommerceError::NotConfigured("Stripe".into()))
    }

    pub fn browser_fallback_enabled(&self) -> bool {
        self.browser.is_some()
    }

    pub fn carts(&self) -> &SessionCarts {
        &self.carts
    }

    // ------------------------------------------------------------------
    // Catalog and cart
    // ------------------------------------------------------------------

    pub async fn search_products(&self, query: &str, limit: usize) -> Result<SearchOutcome> {
        let query = query.trim();
        if query.is_empty() {
            return Err(CommerceError::Validation("Search query must not be empty".into()));
        }

        let products = self
            .payments()?
            .search_products(query, limit.clamp(1, MAX_SEARCH_LIMIT))
            .await?;

        tracing::info!(query, count = products.len(), "Product search");
        Ok(SearchOutcome {
            success: true,
            count: products.len(),
            products,
        })
    }

    pub async fn add_to_cart(&self, session: &SessionId, params: AddToCartParams) -> Result<AddToCartOutcome> {
        let product_id = params.product_id.trim();
        if product_id.is_empty() {
            return Err(CommerceError::Validation("product_id is required".into()));
        }
        let quantity = u32::try_from(params.quantity)
            .ok()
            .filter(|q| (1..=MAX_QUANTITY).contains(q))
            .ok_or_else(|| {
                CommerceError::Validation(format!("Quantity must be between 1 and {}", MAX_QUANTITY))
            })?;
        let price_id = params.price_id.filter(|p| !p.trim().is_empty());

        let handle = self.carts.handle(session).await;
        let mut cart = handle.lock().await;

        // The checkout was priced for the old contents
        if let Some(stale) = cart.checkout.take() {
            tracing::info!(session = %session, checkout_id = stale.id(), "Cart changed, dropping checkout");
        }
        cart.items.push(CartItem::new(product_id, quantity, price_id));

        tracing::info!(session = %session, product_id, quantity, cart_size = cart.items.len(), "Added to cart");
        Ok(AddToCartOutcome {
            success: true,
            message: format!("Added {} item(s) to cart", quantity),
            cart_size: cart.items.len(),
        })
    }

    pub async fn view_cart(&self, session: &SessionId) -> CartView {
        let Some(handle) = self.carts.existing(session).await else {
            return CartView {
                items: Vec::new(),
                item_count: 0,
                checkout_id: None,
            };
        };

        let cart = handle.lock().await;
        CartView {
            item_count: cart.items.len(),
            items: cart.items.clone(),
            checkout_id: cart.checkout.as_ref().map(|c| c.id().to_string()),
        }
    }

    /// Empty the cart and forget any checkout; returns the items removed
    pub async fn clear_cart(&self, session: &SessionId) -> usize {
        let Some(handle) = self.carts.existing(session).await else {
            return 0;
        };

        let removed = {
            let mut cart = handle.lock().await;
            let removed = cart.items.len();
            cart.clear();
            removed
        };
        drop(handle);
        self.carts.release(session).await;

        tracing::info!(session = %session, removed, "Cart cleared");
        removed
    }

    // ------------------------------------------------------------------
    // Checkout
    // ------------------------------------------------------------------

    pub async fn create_checkout(
        &self,
        session: &SessionId,
        params: CreateCheckoutParams,
    ) -> Result<CreateCheckoutOutcome> {
        let merchant = parse_merchant_url(&params.merchant_url)
            .map_err(|e| CommerceError::Validation(e.to_string()))?;
        let buyer_email = validate_email(&params.buyer_email)?;
        let buyer_name = params.buyer_name.filter(|n| !n.trim().is_empty());

        let handle = self.carts.existing(session).await.ok_or(CommerceError::EmptyCart)?;
        let mut cart = handle.lock().await;
        if cart.is_empty() {
            return Err(CommerceError::EmptyCart);
        }

        let client = self.ucp_client(&merchant).await?;
        let supports_ucp = match client.supports_ucp().await {
            Ok(supported) => supported,
            Err(e) => {
                tracing::warn!(merchant = %merchant, error = %e, "UCP discovery failed, treating as unsupported");
                false
            }
        };

        if supports_ucp {
            let request = CreateCheckoutRequest {
                items: cart.line_items(),
                buyer: BuyerInfo {
                    email: buyer_email,
                    name: buyer_name,
                    phone: None,
                },
                fulfillment_address: params.shipping_address,
                billing_address: None,
                metadata: Some(cart_metadata(session)),
            };
            let checkout = client.create_checkout(&request).await?;
            return Ok(commit_ucp(&mut cart, merchant_key(&merchant), checkout));
        }

        if let Some(browser) = &self.browser {
            let job = AutomationJob {
                merchant_url: merchant,
                items: cart
                    .items
                    .iter()
                    .map(|i| JobItem {
                        product_id: i.product_id.clone(),
                        quantity: i.quantity,
                    })
                    .collect(),
                buyer_email,
                buyer_name,
                shipping_address: params.shipping_address,
                payment_method: params.payment_method,
            };
            let result = browser.automate_checkout(&job).await;

            let mut outcome = CreateCheckoutOutcome::new(CheckoutProtocol::BrowserAutomation);
            if !result.is_success() {
                outcome.success = false;
                outcome.requires_manual_checkout = true;
                outcome.error = result.error_message().map(str::to_string);
                return Ok(outcome);
            }

            outcome.order_number = result.order_number().map(str::to_string);
            cart.clear();
            drop(cart);
            drop(handle);
            self.carts.release(session).await;
            tracing::info!(session = %session, order_number = ?outcome.order_number, "Browser checkout placed order");
            return Ok(outcome);
        }

        let base = merchant_key(&merchant);
        let request = HostedCheckoutRequest {
            line_items: cart
                .items
                .iter()
                .map(|i| HostedLineItem {
                    price: i.hosted_price().to_string(),
                    quantity: i.quantity,
                })
                .collect(),
            success_url: format!("{}/success", base),
            cancel_url: format!("{}/cancel", base),
            customer_email: Some(buyer_email),
            metadata: cart_metadata(session),
        };
        let hosted = self.payments()?.create_checkout_session(request).await?;

        let mut outcome = CreateCheckoutOutcome::new(CheckoutProtocol::StripeCheckout)
            .with_amount(hosted.amount_total, hosted.currency.clone());
        outcome.checkout_id = Some(hosted.id.clone());
        outcome.checkout_url = Some(hosted.url.clone());
        outcome.checkout = Some(CheckoutDetails::Hosted(hosted.clone()));

        tracing::info!(session = %session, checkout_id = %hosted.id, "Hosted checkout created");
        cart.checkout = Some(ActiveCheckout::Hosted {
            merchant_url: base,
            checkout: hosted,
        });
        Ok(outcome)
    }

    /// Change address or shipping on a UCP checkout
    pub async fn update_checkout(
        &self,
        session: &SessionId,
        params: UpdateCheckoutParams,
    ) -> Result<CheckoutSession> {
        let update = UpdateCheckoutRequest {
            items: None,
            fulfillment_address: params.fulfillment_address,
            billing_address: params.billing_address,
            shipping_option_id: params.shipping_option_id,
        };
        if update.is_empty() {
            return Err(CommerceError::Validation("Nothing to update".into()));
        }

        let handle = self.carts.existing(session).await.ok_or(CommerceError::NoActiveCheckout)?;
        let mut cart = handle.lock().await;
        let ActiveCheckout::Ucp { merchant_url, session: current } =
            require_active(&cart, &params.checkout_id)?.clone()
        else {
            return Err(CommerceError::Validation("Only UCP checkouts can be updated".into()));
        };
        ensure_open(&current)?;

        let client = self.ucp_client(&parse_merchant_url(&merchant_url)?).await?;
        let updated = client.update_checkout(&current.id, &update).await?;

        cart.checkout = Some(ActiveCheckout::Ucp {
            merchant_url,
            session: updated.clone(),
        });
        Ok(updated)
    }

    pub async fn complete_checkout(
        &self,
        session: &SessionId,
        checkout_id: &str,
        confirm_purchase: bool,
    ) -> Result<CompleteCheckoutOutcome> {
        if !confirm_purchase {
            return Ok(CompleteCheckoutOutcome::message(false, "Purchase not confirmed by user"));
        }

        let handle = self.carts.existing(session).await.ok_or(CommerceError::NoActiveCheckout)?;
        let mut cart = handle.lock().await;

        let (merchant_url, current) = match require_active(&cart, checkout_id)?.clone() {
            ActiveCheckout::Ucp { merchant_url, session } => (merchant_url, session),
            ActiveCheckout::Hosted { checkout, .. } => {
                let mut outcome =
                    CompleteCheckoutOutcome::message(true, "Please complete payment at the checkout URL");
                outcome.checkout_url = Some(checkout.url);
                return Ok(outcome);
            }
        };
        ensure_open(&current)?;

        let total = current.total().ok_or_else(|| {
            CommerceError::Validation("Merchant did not report a checkout total".into())
        })?;
        let merchant_account_id = current.merchant_account_id.clone().ok_or_else(|| {
            CommerceError::Validation("Merchant did not report a payment account".into())
        })?;
        let idempotency_key = uuid::Uuid::new_v4().to_string();

        let mut metadata = cart_metadata(session);
        metadata.insert("checkout_id".into(), current.id.clone());

        let token = self
            .payments()?
            .create_shared_payment_token(SharedPaymentTokenRequest {
                amount: total,
                currency: current.currency_or_default().to_string(),
                merchant_account_id,
                customer_id: None,
                metadata,
                idempotency_key: idempotency_key.clone(),
            })
            .await?;

        if token.amount != total {
            tracing::error!(
                checkout_id,
                checkout_total = total,
                token_amount = token.amount,
                "Payment token amount differs from checkout total"
            );
            return Err(PaymentError::AmountMismatch {
                checkout_total: total,
                token_amount: token.amount,
            }
            .into());
        }

        let client = self.ucp_client(&parse_merchant_url(&merchant_url)?).await?;
        let order = client
            .complete_checkout(&current.id, &token.token, Some(&idempotency_key))
            .await?;

        cart.clear();
        drop(cart);
        drop(handle);
        self.carts.release(session).await;
        tracing::info!(session = %session, checkout_id, order_id = %order.id, "Purchase completed");

        Ok(CompleteCheckoutOutcome {
            success: true,
            order_id: Some(order.id),
            order_number: order.order_number,
            checkout_url: None,
            message: "Purchase completed successfully!".into(),
        })
    }

    /// Abandon the active checkout; cart items stay
    pub async fn cancel_checkout(&self, session: &SessionId, checkout_id: &str) -> Result<CancelOutcome> {
        let handle = self.carts.existing(session).await.ok_or(CommerceError::NoActiveCheckout)?;
        let mut cart = handle.lock().await;

        if let ActiveCheckout::Ucp { merchant_url, session: current } =
            require_active(&cart, checkout_id)?.clone()
        {
            if current.status.is_open() {
                let client = self.ucp_client(&parse_merchant_url(&merchant_url)?).await?;
                client.cancel_checkout(&current.id).await?;
            }
        }

        cart.checkout = None;
        tracing::info!(session = %session, checkout_id, "Checkout cancelled");
        Ok(CancelOutcome {
            success: true,
            message: "Checkout cancelled. Your cart items are still saved.".into(),
        })
    }

    pub async fn check_order_status(&self, order_id: &str) -> Result<OrderStatusOutcome> {
        let order_id = order_id.trim();
        if order_id.is_empty() {
            return Err(CommerceError::Validation("order_id is required".into()));
        }

        let status = self.payments()?.order_status(order_id).await?;
        Ok(OrderStatusOutcome {
            success: true,
            status,
        })
    }

    pub async fn discover(&self, merchant_url: &str) -> Result<DiscoveryOutcome> {
        let merchant = parse_merchant_url(merchant_url)
            .map_err(|e| CommerceError::Validation(e.to_string()))?;
        let capabilities = self.ucp_client(&merchant).await?.discover().await?;

        Ok(DiscoveryOutcome {
            merchant_url: merchant_key(&merchant),
            supported: capabilities.supported,
            version: capabilities.version,
            endpoints: capabilities.endpoints,
            features: capabilities.features,
        })
    }

    /// One client per merchant base URL for the process lifetime, so
    /// discovery results are reused
    async fn ucp_client(&self, merchant: &Url) -> Result<Arc<UcpClient>> {
        let key = merchant_key(merchant);
        if let Some(client) = self.merchants.read().await.get(&key) {
            return Ok(client.clone());
        }

        let mut merchants = self.merchants.write().await;
        if let Some(client) = merchants.get(&key) {
            return Ok(client.clone());
        }
        let client = Arc::new(UcpClient::with_config(&key, self.ucp_config.clone())?);
        if merchants.len() >= MAX_CACHED_MERCHANTS {
            merchants.retain(|_, cached| Arc::strong_count(cached) > 1);
            if merchants.len() >= MAX_CACHED_MERCHANTS {
                if let Some(evict) = merchants.keys().next().cloned() {
                    merchants.remove(&evict);
                }
            }
        }
        merchants.insert(key, client.clone());
        Ok(client)
    }
}

fn merchant_key(merchant: &Url) -> String {
    merchant.as_str().trim_end_matches('/').to_string()
}

fn cart_metadata(session: &SessionId) -> HashMap<String, String> {
    HashMap::from([(CART_SESSION_KEY.to_string(), session.to_string())])
}

fn commit_ucp(cart: &mut Cart, merchant_url: String, checkout: CheckoutSession) -> CreateCheckoutOutcome {
    let mut outcome = CreateCheckoutOutcome::new(CheckoutProtocol::Ucp)
        .with_amount(checkout.total(), Some(checkout.currency_or_default().to_string()));
    outcome.checkout_id = Some(checkout.id.clone());
    outcome.checkout = Some(CheckoutDetails::Ucp(checkout.clone()));

    tracing::info!(
        merchant = %merchant_url,
        checkout_id = %checkout.id,
        total = ?checkout.total(),
        "UCP checkout created"
    );
    cart.checkout = Some(ActiveCheckout::Ucp {
        merchant_url,
        session: checkout,
    });
    outcome
}

fn require_active<'a>(cart: &'a Cart, checkout_id: &str) -> Result<&'a ActiveCheckout> {
    let active = cart.checkout.as_ref().ok_or(CommerceError::NoActiveCheckout)?;
    if active.id() != checkout_id {
        return Err(CommerceError::CheckoutMismatch {
            expected: active.id().to_string(),
            actual: checkout_id.to_string(),
        });
    }
    Ok(active)
}

fn ensure_open(checkout: &CheckoutSession) -> Result<()> {
    if checkout.status.is_open() {
        return Ok(());
    }
    Err(CommerceError::CheckoutClosed {
        id: checkout.id.clone(),
        status: checkout.status.as_str().to_string(),
    })
}

fn validate_email(raw: &str) -> Result<String> {
    let email = raw.trim();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !domain.contains('@')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    };

    if valid {
        Ok(email.to_string())
    } else {
        Err(CommerceError::Validation(format!("Invalid buyer email '{}'", raw)))
    }
}

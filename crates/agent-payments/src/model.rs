//! Wire and domain types shared by the Stripe and UCP clients.
//!
//! Amounts are integer minor units (cents). Merchant objects keep unknown
//! fields in `extra` so nothing the merchant sent is lost on the way back
//! to the caller.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Status of a merchant checkout session. Transitions are driven by the
/// merchant's responses only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckoutStatus {
    Draft,
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    Expired,
}

impl CheckoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutStatus::Draft => "draft",
            CheckoutStatus::Pending => "pending",
            CheckoutStatus::Confirmed => "confirmed",
            CheckoutStatus::Completed => "completed",
            CheckoutStatus::Cancelled => "cancelled",
            CheckoutStatus::Expired => "expired",
        }
    }

    /// Whether the session can still be updated or completed
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            CheckoutStatus::Draft | CheckoutStatus::Pending | CheckoutStatus::Confirmed
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub line1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub postal_code: String,
    pub country: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyerInfo {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Cart item as sent to a UCP merchant
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: String,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutTotals {
    #[serde(default)]
    pub subtotal: i64,
    #[serde(default)]
    pub tax: i64,
    #[serde(default)]
    pub shipping: i64,
    pub total: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShippingOption {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
}

/// Merchant checkout session, as last reported by the merchant
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub status: CheckoutStatus,
    #[serde(default)]
    pub items: Vec<LineItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer: Option<BuyerInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulfillment_address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub totals: Option<CheckoutTotals>,
    /// Flat total some merchants send instead of `totals`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_total: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping_option_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shipping_options: Vec<ShippingOption>,
    /// Connected Stripe account that receives the funds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_account_id: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CheckoutSession {
    /// Amount the buyer will be charged
    pub fn total(&self) -> Option<i64> {
        self.totals.as_ref().map(|t| t.total).or(self.amount_total)
    }

    pub fn currency_or_default(&self) -> &str {
        self.currency.as_deref().unwrap_or("usd")
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CreateCheckoutRequest {
    pub items: Vec<LineItem>,
    pub buyer: BuyerInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fulfillment_address: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_address: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

/// Partial update; only present fields are sent
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UpdateCheckoutRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<LineItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulfillment_address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping_option_id: Option<String>,
}

impl UpdateCheckoutRequest {
    pub fn is_empty(&self) -> bool {
        self.items.is_none()
            && self.fulfillment_address.is_none()
            && self.billing_address.is_none()
            && self.shipping_option_id.is_none()
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CompleteCheckoutRequest {
    pub payment_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// Result of a UCP completion
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    #[serde(alias = "order_id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// What a merchant advertises at `/.well-known/ucp`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UcpCapabilities {
    pub supported: bool,
    #[serde(default = "default_ucp_version")]
    pub version: String,
    #[serde(default)]
    pub endpoints: HashMap<String, String>,
    #[serde(default)]
    pub features: Vec<String>,
}

fn default_ucp_version() -> String {
    "1.0".into()
}

impl UcpCapabilities {
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            version: default_ucp_version(),
            endpoints: HashMap::new(),
            features: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Stripe side
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductPrice {
    pub id: String,
    pub amount: Option<i64>,
    pub currency: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub price_type: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub prices: Vec<ProductPrice>,
}

/// One hosted-checkout line; `price` is a Stripe price id
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedLineItem {
    pub price: String,
    pub quantity: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HostedCheckoutRequest {
    pub line_items: Vec<HostedLineItem>,
    pub success_url: String,
    pub cancel_url: String,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Stripe-hosted checkout page
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HostedCheckout {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntentSummary {
    pub id: String,
    pub status: String,
    pub amount: i64,
    pub currency: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderStatus {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_intent: Option<PaymentIntentSummary>,
}

#[derive(Clone, Debug)]
pub struct SharedPaymentTokenRequest {
    pub amount: i64,
    pub currency: String,
    pub merchant_account_id: String,
    pub customer_id: Option<String>,
    pub metadata: HashMap<String, String>,
    /// Keys the Stripe request so a retried attempt cannot double-charge
    pub idempotency_key: String,
}

/// Single-use token authorising exactly `amount` for one completion
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedPaymentToken {
    pub token: String,
    pub payment_intent_id: String,
    pub amount: i64,
    pub currency: String,
    pub status: String,
}
